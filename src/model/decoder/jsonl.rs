//! JSON-lines message logs.
//!
//! One message per line:
//! `{"topic": "/imu", "msg_type": "sensor_msgs/Imu", "timestamp": 12.5, "message": {...}}`.
//! A numeric `message.header.stamp` is taken as the header stamp.

use crate::error::ApiError;
use crate::model::decoder::{LogMessage, MessageIter, MessageLogDecoder, TopicInfo};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesLog;

fn parse_line(path: &Path, number: usize, line: &str) -> Result<LogMessage, ApiError> {
    let bad = |detail: &str| {
        ApiError::DataError(format!("{}:{}: {}", path.display(), number + 1, detail))
    };
    let value: Value = serde_json::from_str(line).map_err(|e| bad(&e.to_string()))?;
    let topic = value
        .get("topic")
        .and_then(Value::as_str)
        .ok_or_else(|| bad("missing 'topic'"))?;
    let log_time = value
        .get("timestamp")
        .and_then(Value::as_f64)
        .ok_or_else(|| bad("missing 'timestamp'"))?;
    let message = value.get("message").cloned().unwrap_or(Value::Null);
    let header_stamp = message
        .pointer("/header/stamp")
        .and_then(Value::as_f64);
    Ok(LogMessage {
        topic: topic.to_string(),
        msg_type: value
            .get("msg_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        log_time,
        header_stamp,
        message,
    })
}

struct LineMessages {
    path: PathBuf,
    lines: std::iter::Enumerate<std::io::Lines<BufReader<File>>>,
    topic: Option<String>,
}

impl Iterator for LineMessages {
    type Item = Result<LogMessage, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (number, line) = self.lines.next()?;
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            let message = match parse_line(&self.path, number, &line) {
                Ok(message) => message,
                Err(e) => return Some(Err(e)),
            };
            match &self.topic {
                Some(topic) if *topic != message.topic => continue,
                _ => return Some(Ok(message)),
            }
        }
    }
}

impl MessageLogDecoder for JsonLinesLog {
    fn extensions(&self) -> Vec<&'static str> {
        vec![".jsonl"]
    }

    fn messages(&self, path: &Path, topic: Option<&str>) -> Result<MessageIter, ApiError> {
        if !path.is_file() {
            return Err(ApiError::FileNotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        Ok(Box::new(LineMessages {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines().enumerate(),
            topic: topic.map(str::to_string),
        }))
    }

    fn topics(&self, path: &Path) -> Result<Vec<TopicInfo>, ApiError> {
        let mut topics: BTreeMap<String, TopicInfo> = BTreeMap::new();
        for message in self.messages(path, None)? {
            let message = message?;
            let ts = message.timestamp();
            topics
                .entry(message.topic.clone())
                .and_modify(|info| {
                    info.count += 1;
                    info.start = info.start.min(ts);
                    info.end = info.end.max(ts);
                })
                .or_insert(TopicInfo {
                    topic: message.topic,
                    msg_type: message.msg_type,
                    count: 1,
                    start: ts,
                    end: ts,
                });
        }
        Ok(topics.into_values().collect())
    }

    fn write(&self, path: &Path, messages: &[LogMessage]) -> Result<(), ApiError> {
        let mut out = BufWriter::new(File::create(path)?);
        for message in messages {
            let line = json!({
                "topic": message.topic,
                "msg_type": message.msg_type,
                "timestamp": message.log_time,
                "message": message.message,
            });
            writeln!(out, "{}", line)?;
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const LOG: &str = r#"{"topic": "/gps", "msg_type": "sensor_msgs/NavSatFix", "timestamp": 1.0, "message": {"header": {"stamp": 0.0}, "latitude": 35.0, "longitude": 139.0}}
{"topic": "/imu", "msg_type": "sensor_msgs/Imu", "timestamp": 1.5, "message": {"header": {"stamp": 1.4}}}

{"topic": "/gps", "msg_type": "sensor_msgs/NavSatFix", "timestamp": 2.0, "message": {"latitude": 35.1, "longitude": 139.1}}
"#;

    #[test]
    fn test_topic_filter_and_stamp_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        fs::write(&path, LOG).unwrap();

        let gps: Vec<LogMessage> = JsonLinesLog
            .messages(&path, Some("/gps"))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(gps.len(), 2);
        // zero header stamp falls back to the log time
        assert_eq!(gps[0].timestamp(), 1.0);

        let topics = JsonLinesLog.topics(&path).unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].topic, "/gps");
        assert_eq!((topics[0].start, topics[0].end), (1.0, 2.0));
        assert_eq!(topics[1].start, 1.4);
    }

    #[test]
    fn test_bad_line_reports_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"topic\": \"/a\", \"timestamp\": 1}\nnot json\n").unwrap();
        let results: Vec<_> = JsonLinesLog.messages(&path, None).unwrap().collect();
        assert!(results[0].is_ok());
        assert!(matches!(&results[1], Err(ApiError::DataError(m)) if m.contains(":2:")));
    }
}
