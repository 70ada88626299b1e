//! Shape checks applied by [`StateStore::set_state()`](super::StateStore::set_state)
//! when validation is requested.

use serde_json::Value;

/// Checks a value before it is written.
pub trait Validator: Send + Sync {
    /// Return a human-readable reason when the value is rejected.
    fn validate(&self, value: &Value) -> std::result::Result<(), String>;
}

/// JSON value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl JsonKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Requires an object with the listed fields, each of the given kind.
///
/// ```rust
/// # use keepsake::state::{JsonKind, ShapeValidator, Validator};
/// # use serde_json::json;
/// let class = ShapeValidator::new()
///     .field("name", JsonKind::String)
///     .field("students", JsonKind::Array);
/// assert!(class.validate(&json!({"name": "Algebra", "students": []})).is_ok());
/// assert!(class.validate(&json!({"name": 3})).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShapeValidator {
    required: Vec<(String, JsonKind)>,
}

impl ShapeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `name` to be present with kind `kind`.
    pub fn field(mut self, name: impl Into<String>, kind: JsonKind) -> Self {
        self.required.push((name.into(), kind));
        self
    }
}

impl Validator for ShapeValidator {
    fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        let Value::Object(fields) = value else {
            return Err(format!(
                "expected an object, found {}",
                JsonKind::of(value).as_str()
            ));
        };
        for (name, kind) in &self.required {
            match fields.get(name) {
                None => return Err(format!("missing field '{name}'")),
                Some(found) if JsonKind::of(found) != *kind => {
                    return Err(format!(
                        "field '{name}' must be {}, found {}",
                        kind.as_str(),
                        JsonKind::of(found).as_str()
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Fallback when validation is requested but no validator matches the key.
pub(crate) struct NotNull;

impl Validator for NotNull {
    fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        if value.is_null() {
            Err("value must not be null".to_string())
        } else {
            Ok(())
        }
    }
}
