//! Class-level selectors matched against file metadata.

use crate::error::ApiError;
use crate::model::metadata::Metadata;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Compile a pattern that must match a whole string
pub fn full_regex(pattern: &str) -> Result<Regex, ApiError> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| ApiError::InvalidArgument(format!("invalid selector pattern '{}': {}", pattern, e)))
}

fn full_match(pattern: &str, text: &str) -> bool {
    match full_regex(pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!(error = %e, "Ignoring invalid selector pattern");
            false
        }
    }
}

/// Recursive regex match of a pattern value against a candidate value
///
/// Strings full-match, lists match when any pattern element matches any
/// candidate element, and mappings match when every pattern key full-matches
/// some candidate key whose value matches in turn. Values of different
/// shapes never match.
pub fn value_matches(pattern: &Value, candidate: &Value) -> bool {
    match (pattern, candidate) {
        (Value::String(p), Value::String(c)) => full_match(p, c),
        (Value::Array(ps), Value::Array(cs)) => {
            ps.iter().any(|p| cs.iter().any(|c| value_matches(p, c)))
        }
        (Value::Object(ps), Value::Object(cs)) => ps.iter().all(|(pk, pv)| {
            cs.iter()
                .any(|(ck, cv)| full_match(pk, ck) && value_matches(pv, cv))
        }),
        (Value::Number(p), Value::Number(c)) => p.as_f64() == c.as_f64(),
        (Value::Bool(p), Value::Bool(c)) => p == c,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

/// Which contents a model accepts
#[derive(Debug, Clone)]
pub enum ContentsSelector {
    /// Content name pattern
    Pattern(Regex),
    /// Any of several content name patterns
    AnyOf(Vec<Regex>),
    /// `{name pattern: attribute pattern}`
    Mapping(Value),
}

impl ContentsSelector {
    pub fn pattern(pattern: &str) -> Result<Self, ApiError> {
        Ok(ContentsSelector::Pattern(full_regex(pattern)?))
    }

    pub fn any_of(patterns: &[&str]) -> Result<Self, ApiError> {
        patterns
            .iter()
            .map(|p| full_regex(p))
            .collect::<Result<Vec<_>, _>>()
            .map(ContentsSelector::AnyOf)
    }

    /// Mapping selector; the value must be a JSON object
    pub fn mapping(selector: Value) -> Result<Self, ApiError> {
        if !selector.is_object() {
            return Err(ApiError::InvalidArgument(
                "a contents mapping selector must be an object".to_string(),
            ));
        }
        Ok(ContentsSelector::Mapping(selector))
    }

    fn matches_name(&self, name: &str) -> bool {
        match self {
            ContentsSelector::Pattern(re) => re.is_match(name),
            ContentsSelector::AnyOf(res) => res.iter().any(|re| re.is_match(name)),
            ContentsSelector::Mapping(selector) => selector
                .as_object()
                .and_then(|m| m.keys().next())
                .map(|key| full_match(key, name))
                .unwrap_or(false),
        }
    }

    /// Match the `contents` field of a metadata document
    pub fn matches(&self, contents: Option<&Value>) -> bool {
        let contents = match contents {
            None => return self.matches_name(""),
            Some(Value::Array(items)) if items.len() > 1 => {
                warn!("Loading multiple contents is not supported");
                return false;
            }
            Some(Value::Object(map)) if map.len() > 1 => {
                warn!("Loading multiple contents is not supported");
                return false;
            }
            Some(Value::Array(items)) => match items.first() {
                Some(item) => item,
                None => return self.matches_name(""),
            },
            Some(other) => other,
        };

        match (self, contents) {
            (_, Value::String(name)) => self.matches_name(name),
            (ContentsSelector::Mapping(selector), Value::Object(_)) => {
                value_matches(selector, contents)
            }
            (_, Value::Object(map)) => match map.keys().next() {
                Some(name) => self.matches_name(name),
                None => self.matches_name(""),
            },
            _ => false,
        }
    }
}

/// Full selector set of a model class
#[derive(Debug, Clone, Default)]
pub struct Selectors {
    /// Lowercase extensions with a leading dot; `None` accepts any
    pub file_extensions: Option<Vec<String>>,
    pub content_type: Option<Regex>,
    pub data_type: Option<Regex>,
    pub contents: Option<ContentsSelector>,
}

impl Selectors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extensions(mut self, extensions: &[&str]) -> Self {
        self.file_extensions = Some(extensions.iter().map(|e| e.to_lowercase()).collect());
        self
    }

    pub fn content_type(mut self, pattern: &str) -> Result<Self, ApiError> {
        self.content_type = Some(full_regex(pattern)?);
        Ok(self)
    }

    pub fn data_type(mut self, pattern: &str) -> Result<Self, ApiError> {
        self.data_type = Some(full_regex(pattern)?);
        Ok(self)
    }

    pub fn contents(mut self, contents: ContentsSelector) -> Self {
        self.contents = Some(contents);
        self
    }

    pub fn accepts_extension(&self, path: &Path) -> bool {
        match &self.file_extensions {
            None => true,
            Some(extensions) => extensions.contains(&extension_of(path)),
        }
    }

    /// Whether every selector accepts the metadata
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let path = metadata.path().unwrap_or_default();
        if !self.accepts_extension(&path) {
            return false;
        }
        if let Some(re) = &self.content_type {
            if !re.is_match(metadata.content_type().unwrap_or("")) {
                return false;
            }
        }
        if let Some(re) = &self.data_type {
            if !re.is_match(metadata.data_type().unwrap_or("")) {
                return false;
            }
        }
        match &self.contents {
            Some(selector) => selector.matches(metadata.contents()),
            None => true,
        }
    }
}

/// Lowercase extension with its leading dot, or an empty string
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}
