//! Point clouds in PCD format, ASCII and uncompressed binary.

use super::{ContentsSelector, LoadRequest, Model, ModelClass, ModelState, Payload, Selectors};
use crate::error::ApiError;
use crate::types::Document;
use ndarray::{Array2, Axis};
use serde_json::Value;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::warn;

const DEFAULT_FIELDS: &[&str] = &["x", "y", "z"];

pub fn pcd() -> Result<ModelClass, ApiError> {
    let selectors = Selectors::new()
        .extensions(&[".pcd"])
        .contents(ContentsSelector::pattern(".*")?);
    Ok(ModelClass::new("PointCloudPcd", 1, selectors, construct)
        .with_columns(DEFAULT_FIELDS)
        .with_settings(pcd_settings))
}

fn pcd_settings() -> Document {
    let mut settings = Document::new();
    // null keeps every field
    settings.insert("fields".to_string(), Value::Null);
    settings
}

fn construct(state: ModelState) -> Box<dyn Model> {
    Box::new(PcdModel { state })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    Binary,
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    size: usize,
    kind: char,
    count: usize,
}

#[derive(Debug)]
struct Header {
    fields: Vec<Field>,
    points: usize,
    encoding: Encoding,
    /// Offset of the first data byte
    body: usize,
}

impl Header {
    /// One column per scalar; multi-count fields become `name_0`, `name_1`, ...
    fn columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .flat_map(|f| {
                (0..f.count).map(move |i| match f.count {
                    1 => f.name.clone(),
                    _ => format!("{}_{}", f.name, i),
                })
            })
            .collect()
    }

    /// Bytes per point, `None` on overflow
    fn point_size(&self) -> Option<usize> {
        self.fields
            .iter()
            .try_fold(0usize, |acc, f| f.size.checked_mul(f.count)?.checked_add(acc))
    }
}

fn malformed(path: &Path, detail: impl std::fmt::Display) -> ApiError {
    ApiError::UnsupportedFile(format!("{}: {}", path.display(), detail))
}

fn parse_header(path: &Path, bytes: &[u8]) -> Result<Header, ApiError> {
    let mut names: Vec<String> = Vec::new();
    let mut sizes: Vec<usize> = Vec::new();
    let mut kinds: Vec<char> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut width = 0usize;
    let mut height = 1usize;
    let mut points = None;
    let mut offset = 0;

    while offset < bytes.len() {
        let end = bytes[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| offset + p + 1)
            .unwrap_or(bytes.len());
        let line = String::from_utf8_lossy(&bytes[offset..end]);
        offset = end;
        let mut tokens = line.split_whitespace();
        let key = match tokens.next() {
            Some(key) if !key.starts_with('#') => key.to_uppercase(),
            _ => continue,
        };
        let values: Vec<&str> = tokens.collect();
        let numbers = |values: &[&str]| -> Result<Vec<usize>, ApiError> {
            values
                .iter()
                .map(|v| v.parse().map_err(|_| malformed(path, format!("bad {} value '{}'", key, v))))
                .collect()
        };
        match key.as_str() {
            "FIELDS" => names = values.iter().map(|v| v.to_string()).collect(),
            "SIZE" => sizes = numbers(&values)?,
            "TYPE" => kinds = values.iter().filter_map(|v| v.chars().next()).collect(),
            "COUNT" => counts = numbers(&values)?,
            "WIDTH" => width = numbers(&values)?.first().copied().unwrap_or(0),
            "HEIGHT" => height = numbers(&values)?.first().copied().unwrap_or(1),
            "POINTS" => points = numbers(&values)?.first().copied(),
            "DATA" => {
                let encoding = match values.first().copied() {
                    Some("ascii") => Encoding::Ascii,
                    Some("binary") => Encoding::Binary,
                    other => {
                        return Err(malformed(
                            path,
                            format!("unsupported DATA encoding {:?}", other),
                        ))
                    }
                };
                if names.is_empty() {
                    return Err(malformed(path, "no FIELDS before DATA"));
                }
                if counts.is_empty() {
                    counts = vec![1; names.len()];
                }
                if sizes.len() != names.len()
                    || kinds.len() != names.len()
                    || counts.len() != names.len()
                {
                    return Err(malformed(path, "FIELDS, SIZE, TYPE and COUNT disagree"));
                }
                if let Some(i) = (0..names.len()).find(|&i| sizes[i] == 0 || counts[i] == 0) {
                    return Err(malformed(
                        path,
                        format!("field '{}' has zero SIZE or COUNT", names[i]),
                    ));
                }
                let fields = names
                    .into_iter()
                    .zip(sizes)
                    .zip(kinds)
                    .zip(counts)
                    .map(|(((name, size), kind), count)| Field {
                        name,
                        size,
                        kind: kind.to_ascii_uppercase(),
                        count,
                    })
                    .collect();
                let points = match points {
                    Some(points) => points,
                    None => width
                        .checked_mul(height)
                        .ok_or_else(|| malformed(path, "WIDTH * HEIGHT overflows"))?,
                };
                return Ok(Header {
                    fields,
                    points,
                    encoding,
                    body: offset,
                });
            }
            _ => {}
        }
    }
    Err(malformed(path, "missing DATA line"))
}

fn decode_scalar(path: &Path, field: &Field, raw: &[u8]) -> Result<f64, ApiError> {
    let value = match (field.kind, raw) {
        ('F', [a, b, c, d]) => f32::from_le_bytes([*a, *b, *c, *d]) as f64,
        ('F', bytes) if bytes.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            f64::from_le_bytes(buf)
        }
        ('I', [a]) => *a as i8 as f64,
        ('I', [a, b]) => i16::from_le_bytes([*a, *b]) as f64,
        ('I', [a, b, c, d]) => i32::from_le_bytes([*a, *b, *c, *d]) as f64,
        ('U', [a]) => *a as f64,
        ('U', [a, b]) => u16::from_le_bytes([*a, *b]) as f64,
        ('U', [a, b, c, d]) => u32::from_le_bytes([*a, *b, *c, *d]) as f64,
        (kind @ ('I' | 'U'), bytes) if bytes.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            match kind {
                'I' => i64::from_le_bytes(buf) as f64,
                _ => u64::from_le_bytes(buf) as f64,
            }
        }
        _ => {
            return Err(malformed(
                path,
                format!("unsupported field type {}{}", field.kind, field.size),
            ))
        }
    };
    Ok(value)
}

fn read_points(path: &Path) -> Result<(Vec<String>, Array2<f64>), ApiError> {
    if !path.is_file() {
        return Err(ApiError::FileNotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    let header = parse_header(path, &bytes)?;
    let columns = header.columns();
    let width = columns.len();
    let mut values = Vec::new();

    match header.encoding {
        Encoding::Ascii => {
            let body = String::from_utf8_lossy(&bytes[header.body..]);
            for (row, line) in body.lines().filter(|l| !l.trim().is_empty()).enumerate() {
                if row == header.points {
                    break;
                }
                let start = values.len();
                for token in line.split_whitespace() {
                    values.push(token.parse::<f64>().map_err(|_| {
                        ApiError::DataError(format!(
                            "{}: point {}: '{}' is not a number",
                            path.display(),
                            row,
                            token
                        ))
                    })?);
                }
                if values.len() - start != width {
                    return Err(ApiError::DataError(format!(
                        "{}: point {} has {} values, expected {}",
                        path.display(),
                        row,
                        values.len() - start,
                        width
                    )));
                }
            }
        }
        Encoding::Binary => {
            let point_size = header
                .point_size()
                .ok_or_else(|| malformed(path, "point size overflows"))?;
            let end = point_size
                .checked_mul(header.points)
                .and_then(|len| len.checked_add(header.body))
                .ok_or_else(|| malformed(path, "POINTS overflows"))?;
            let body = bytes
                .get(header.body..end)
                .ok_or_else(|| malformed(path, "truncated binary data"))?;
            for point in body.chunks_exact(point_size) {
                let mut offset = 0;
                for field in &header.fields {
                    for _ in 0..field.count {
                        values.push(decode_scalar(path, field, &point[offset..offset + field.size])?);
                        offset += field.size;
                    }
                }
            }
        }
    }

    let rows = values.len() / width.max(1);
    Ok((columns, Array2::from_shape_vec((rows, width), values)?))
}

pub struct PcdModel {
    state: ModelState,
}

impl PcdModel {
    fn selected_fields(&self, available: &[String]) -> Result<Vec<String>, ApiError> {
        match super::setting_strings(&self.state, "fields") {
            None => Ok(available.to_vec()),
            Some(fields) => {
                if let Some(missing) = fields.iter().find(|f| !available.contains(f)) {
                    return Err(ApiError::InvalidArgument(format!(
                        "field '{}' is not present (available: {})",
                        missing,
                        available.join(", ")
                    )));
                }
                Ok(fields)
            }
        }
    }
}

impl Model for PcdModel {
    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn read(&mut self, request: &LoadRequest) -> Result<(), ApiError> {
        if request.start_timestamp.is_some() || request.end_timestamp.is_some() {
            warn!(
                path = %request.path.display(),
                "Point clouds have no time axis; ignoring the requested range"
            );
        }
        let (columns, points) = read_points(&request.path)?;
        let fields = self.selected_fields(&columns)?;
        let indices: Vec<usize> = fields
            .iter()
            .filter_map(|f| columns.iter().position(|c| c == f))
            .collect();
        let selected = points.select(Axis(1), &indices);
        self.state.set_postfixes(fields);
        self.state.set_data(Vec::new(), Payload::Array(selected.into_dyn()));
        Ok(())
    }

    /// `compression`: `binary` (default) or `ascii`; values are written as `F4`
    fn write(&self, path: &Path, options: &Document) -> Result<(), ApiError> {
        let array = self.to_ndarray()?;
        let points = array
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|_| ApiError::InvalidArgument("point clouds must be (N, F)".to_string()))?;
        let fields: Vec<String> = match self.state.postfixes() {
            Some(fields) => fields.to_vec(),
            None => DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
        };
        if fields.len() != points.ncols() {
            return Err(ApiError::InvalidArgument(format!(
                "{} fields for {} columns",
                fields.len(),
                points.ncols()
            )));
        }
        let encoding = match options.get("compression").and_then(Value::as_str) {
            None | Some("binary") => Encoding::Binary,
            Some("ascii") => Encoding::Ascii,
            Some(other) => {
                return Err(ApiError::InvalidArgument(format!(
                    "unsupported compression '{}'",
                    other
                )))
            }
        };

        let n = fields.len();
        let mut header = String::new();
        let repeat = |token: &str| vec![token; n].join(" ");
        let _ = writeln!(header, "VERSION 0.7");
        let _ = writeln!(header, "FIELDS {}", fields.join(" "));
        let _ = writeln!(header, "SIZE {}", repeat("4"));
        let _ = writeln!(header, "TYPE {}", repeat("F"));
        let _ = writeln!(header, "COUNT {}", repeat("1"));
        let _ = writeln!(header, "WIDTH {}", points.nrows());
        let _ = writeln!(header, "HEIGHT 1");
        let _ = writeln!(header, "VIEWPOINT 0 0 0 1 0 0 0");
        let _ = writeln!(header, "POINTS {}", points.nrows());

        let mut out = header.into_bytes();
        match encoding {
            Encoding::Ascii => {
                out.extend_from_slice(b"DATA ascii\n");
                for row in points.rows() {
                    let line: Vec<String> = row.iter().map(|v| (*v as f32).to_string()).collect();
                    out.extend_from_slice(line.join(" ").as_bytes());
                    out.push(b'\n');
                }
            }
            Encoding::Binary => {
                out.extend_from_slice(b"DATA binary\n");
                for value in points.iter() {
                    out.extend_from_slice(&(*value as f32).to_le_bytes());
                }
            }
        }
        fs::write(path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::instance;
    use crate::model::LoadOptions;
    use serde_json::json;
    use tempfile::TempDir;

    const ASCII: &str = "# .PCD v0.7\nVERSION 0.7\nFIELDS x y z intensity\nSIZE 4 4 4 4\n\
TYPE F F F F\nCOUNT 1 1 1 1\nWIDTH 2\nHEIGHT 1\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS 2\nDATA ascii\n\
1 2 3 0.5\n4 5 6 0.25\n";

    #[test]
    fn test_ascii_with_field_selection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.pcd");
        fs::write(&path, ASCII).unwrap();
        let mut model = instance(pcd().unwrap(), json!({"contents": "lidar"}));
        let settings = json!({"fields": ["x", "intensity"]});
        model.configure(settings.as_object().unwrap()).unwrap();
        model.load(&LoadOptions::new().path(&path)).unwrap();
        let array = model.to_ndarray().unwrap();
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.iter().copied().collect::<Vec<_>>(), vec![1.0, 0.5, 4.0, 0.25]);
        assert_eq!(model.columns().unwrap(), vec!["lidar/x", "lidar/intensity"]);
    }

    #[test]
    fn test_binary_written_then_read() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("scan.pcd");
        let target = dir.path().join("copy.pcd");
        fs::write(&source, ASCII).unwrap();
        let mut model = instance(pcd().unwrap(), json!({"contents": "lidar"}));
        model.load(&LoadOptions::new().path(&source)).unwrap();
        model.save(Some(&target), &Document::new()).unwrap();

        let mut copy = instance(pcd().unwrap(), json!({"contents": "lidar"}));
        copy.load(&LoadOptions::new().path(&target)).unwrap();
        assert_eq!(copy.to_ndarray().unwrap(), model.to_ndarray().unwrap());
        assert_eq!(copy.columns().unwrap().len(), 4);
    }

    fn load_bytes(body: &[u8]) -> Result<(), ApiError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.pcd");
        fs::write(&path, body).unwrap();
        let mut model = instance(pcd().unwrap(), json!({}));
        model.load(&LoadOptions::new().path(&path))
    }

    #[test]
    fn test_malformed_binary_headers_are_unsupported() {
        let headers: [&[u8]; 4] = [
            b"FIELDS x\nSIZE 0\nTYPE F\nCOUNT 1\nPOINTS 2\nDATA binary\n",
            b"FIELDS x\nSIZE 4\nTYPE F\nCOUNT 0\nPOINTS 2\nDATA binary\n",
            b"SIZE 4\nTYPE F\nPOINTS 2\nDATA binary\n",
            b"FIELDS x y\nSIZE 4\nTYPE F F\nDATA binary\n",
        ];
        for header in headers {
            assert!(matches!(load_bytes(header), Err(ApiError::UnsupportedFile(_))));
        }
    }

    #[test]
    fn test_huge_point_count_is_rejected_without_allocating() {
        let header = format!(
            "FIELDS x\nSIZE 8\nTYPE F\nCOUNT 1\nPOINTS {}\nDATA binary\n",
            usize::MAX / 2
        );
        assert!(matches!(
            load_bytes(header.as_bytes()),
            Err(ApiError::UnsupportedFile(message)) if message.contains("overflows")
        ));

        let header = format!(
            "FIELDS x\nSIZE 4\nTYPE F\nCOUNT 1\nWIDTH {} \nHEIGHT 4\nDATA ascii\n",
            usize::MAX
        );
        assert!(matches!(load_bytes(header.as_bytes()), Err(ApiError::UnsupportedFile(_))));
    }

    #[test]
    fn test_truncated_binary_data() {
        let mut body = b"FIELDS x y\nSIZE 4 4\nTYPE F F\nCOUNT 1 1\nPOINTS 2\nDATA binary\n".to_vec();
        body.extend_from_slice(&1.0f32.to_le_bytes());
        body.extend_from_slice(&2.0f32.to_le_bytes());
        body.extend_from_slice(&3.0f32.to_le_bytes());
        assert!(matches!(
            load_bytes(&body),
            Err(ApiError::UnsupportedFile(message)) if message.contains("truncated")
        ));
    }

    #[test]
    fn test_unsupported_scalar_type() {
        let mut body = b"FIELDS x\nSIZE 2\nTYPE F\nCOUNT 1\nPOINTS 1\nDATA binary\n".to_vec();
        body.extend_from_slice(&[0, 0]);
        assert!(matches!(
            load_bytes(&body),
            Err(ApiError::UnsupportedFile(message)) if message.contains("F2")
        ));

        let mut body = b"FIELDS x\nSIZE 2\nTYPE U\nCOUNT 1\nPOINTS 1\nDATA binary\n".to_vec();
        body.extend_from_slice(&7u16.to_le_bytes());
        load_bytes(&body).unwrap();
    }

    #[test]
    fn test_unknown_field_and_time_range_warning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.pcd");
        fs::write(&path, ASCII).unwrap();
        let mut model = instance(pcd().unwrap(), json!({}));
        // a time range is ignored, not rejected
        model
            .load(&LoadOptions::new().path(&path).time_range(Some(0.0), Some(1.0)))
            .unwrap();
        assert!(model.timestamps().is_empty());

        let settings = json!({"fields": ["rgb"]});
        model.configure(settings.as_object().unwrap()).unwrap();
        assert!(matches!(
            model.load(&LoadOptions::new().path(&path)),
            Err(ApiError::InvalidArgument(_))
        ));
    }
}
