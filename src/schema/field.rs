//! Field-level shape descriptions used by document schemas.

use serde_json::Value;

/// Whether keys not declared by an object shape are accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extra {
    Allow,
    Forbid,
}

/// Expected type of a field value
#[derive(Debug, Clone)]
pub enum FieldType {
    /// String with a minimum length in characters
    Str { min_len: usize },
    Int { min: Option<i64> },
    /// Any number; integers are accepted
    Float,
    Bool,
    List,
    /// Any mapping
    Dict,
    Object(ObjectShape),
    Nullable(Box<FieldType>),
    Any,
}

impl FieldType {
    pub fn string() -> Self {
        FieldType::Str { min_len: 0 }
    }

    pub fn non_empty_string() -> Self {
        FieldType::Str { min_len: 1 }
    }

    pub fn int() -> Self {
        FieldType::Int { min: None }
    }

    pub fn non_negative_int() -> Self {
        FieldType::Int { min: Some(0) }
    }

    pub fn nullable(inner: FieldType) -> Self {
        FieldType::Nullable(Box::new(inner))
    }

    fn check(&self, path: &str, value: &Value, violations: &mut Vec<String>) {
        match (self, value) {
            (FieldType::Any, _) => {}
            (FieldType::Nullable(_), Value::Null) => {}
            (FieldType::Nullable(inner), other) => inner.check(path, other, violations),
            (FieldType::Str { min_len }, Value::String(s)) => {
                if s.chars().count() < *min_len {
                    violations.push(format!(
                        "{}: ensure this value has at least {} characters",
                        path, min_len
                    ));
                }
            }
            (FieldType::Int { min }, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                if let (Some(min), Some(v)) = (min, n.as_i64()) {
                    if v < *min {
                        violations.push(format!(
                            "{}: ensure this value is greater than or equal to {}",
                            path, min
                        ));
                    }
                }
            }
            (FieldType::Float, Value::Number(_)) => {}
            (FieldType::Bool, Value::Bool(_)) => {}
            (FieldType::List, Value::Array(_)) => {}
            (FieldType::Dict, Value::Object(_)) => {}
            (FieldType::Object(shape), Value::Object(map)) => {
                shape.check_map(path, map, violations)
            }
            (expected, other) => violations.push(format!(
                "{}: expected {}, got {}",
                path,
                expected.describe(),
                describe_value(other)
            )),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldType::Str { .. } => "string",
            FieldType::Int { .. } => "integer",
            FieldType::Float => "number",
            FieldType::Bool => "boolean",
            FieldType::List => "list",
            FieldType::Dict | FieldType::Object(_) => "mapping",
            FieldType::Nullable(inner) => inner.describe(),
            FieldType::Any => "any",
        }
    }
}

fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// A named field of an object shape
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: true,
        }
    }

    pub fn optional(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: false,
        }
    }
}

/// Structure of a mapping value
#[derive(Debug, Clone)]
pub struct ObjectShape {
    pub fields: Vec<FieldSpec>,
    pub extra: Extra,
}

impl ObjectShape {
    pub fn open(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            extra: Extra::Allow,
        }
    }

    pub fn closed(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            extra: Extra::Forbid,
        }
    }

    /// Append fields, keeping the extra-key policy
    pub fn extend(mut self, fields: Vec<FieldSpec>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Check a mapping, collecting every violation found
    pub fn check_map(
        &self,
        path: &str,
        map: &serde_json::Map<String, Value>,
        violations: &mut Vec<String>,
    ) {
        for field in &self.fields {
            let field_path = join(path, &field.name);
            match map.get(&field.name) {
                Some(value) => field.ty.check(&field_path, value, violations),
                None if field.required => {
                    violations.push(format!("{}: field required", field_path))
                }
                None => {}
            }
        }

        if self.extra == Extra::Forbid {
            for key in map.keys() {
                // Bookkeeping keys are always permitted
                if key.starts_with('_') {
                    continue;
                }
                if !self.fields.iter().any(|f| &f.name == key) {
                    violations.push(format!(
                        "{}: extra fields not permitted",
                        join(path, key)
                    ));
                }
            }
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}
