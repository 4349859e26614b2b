//! Runtime types for task inputs and outputs.
//!
//! A [`RuntimeType`] names the shape of a value, checks values against that
//! shape, and carries the serialization strategy used when the value is
//! written to the artifact store.

use crate::serialization::{JsonSerializationStrategy, SerializationStrategy};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The structural kind of a runtime type.
#[derive(Debug, Clone)]
pub enum TypeKind {
    /// Accepts any value.
    Any,
    /// A boolean.
    Bool,
    /// An integer.
    Int,
    /// Any JSON number.
    Float,
    /// A string.
    String,
    /// A list of flat objects (a row set).
    Rows,
    /// A homogeneous list of the element type.
    List(Arc<RuntimeType>),
    /// The inner type or null.
    Nullable(Arc<RuntimeType>),
}

/// A named, typed description of task values.
#[derive(Debug, Clone)]
pub struct RuntimeType {
    name: String,
    kind: TypeKind,
    strategy: Arc<dyn SerializationStrategy>,
    custom_serialization: bool,
    description: Option<String>,
}

impl RuntimeType {
    /// Creates a type with the default serialization strategy.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            strategy: Arc::new(JsonSerializationStrategy),
            custom_serialization: false,
            description: None,
        }
    }

    /// The `Any` type.
    #[must_use]
    pub fn any() -> Self {
        Self::new("Any", TypeKind::Any)
    }

    /// The `Bool` type.
    #[must_use]
    pub fn bool() -> Self {
        Self::new("Bool", TypeKind::Bool)
    }

    /// The `Int` type.
    #[must_use]
    pub fn int() -> Self {
        Self::new("Int", TypeKind::Int)
    }

    /// The `Float` type.
    #[must_use]
    pub fn float() -> Self {
        Self::new("Float", TypeKind::Float)
    }

    /// The `String` type.
    #[must_use]
    pub fn string() -> Self {
        Self::new("String", TypeKind::String)
    }

    /// The `Rows` type.
    #[must_use]
    pub fn rows() -> Self {
        Self::new("Rows", TypeKind::Rows)
    }

    /// `List[inner]`.
    #[must_use]
    pub fn list(inner: Self) -> Self {
        let name = format!("List[{}]", inner.name);
        Self::new(name, TypeKind::List(Arc::new(inner)))
    }

    /// `Nullable[inner]`.
    #[must_use]
    pub fn nullable(inner: Self) -> Self {
        let name = format!("Nullable[{}]", inner.name);
        Self::new(name, TypeKind::Nullable(Arc::new(inner)))
    }

    /// Replaces the serialization strategy, marking the type as custom.
    #[must_use]
    pub fn with_serialization_strategy(mut self, strategy: Arc<dyn SerializationStrategy>) -> Self {
        self.strategy = strategy;
        self.custom_serialization = true;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the structural kind.
    #[must_use]
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the serialization strategy.
    #[must_use]
    pub fn serialization_strategy(&self) -> &Arc<dyn SerializationStrategy> {
        &self.strategy
    }

    /// True when the type declares a non-default serialization strategy.
    #[must_use]
    pub fn has_custom_serialization(&self) -> bool {
        self.custom_serialization
    }

    /// True for parameterized container types.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, TypeKind::List(_) | TypeKind::Nullable(_))
    }

    /// Returns the element type of a composite type.
    #[must_use]
    pub fn element_type(&self) -> Option<&Self> {
        match &self.kind {
            TypeKind::List(inner) | TypeKind::Nullable(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }

    /// Checks that `value` has the shape this type describes.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatch found.
    pub fn type_check(&self, value: &Value) -> Result<(), String> {
        let ok = match &self.kind {
            TypeKind::Any => true,
            TypeKind::Bool => value.is_boolean(),
            TypeKind::Int => value.is_i64() || value.is_u64(),
            TypeKind::Float => value.is_number(),
            TypeKind::String => value.is_string(),
            TypeKind::Rows => value
                .as_array()
                .is_some_and(|rows| rows.iter().all(Value::is_object)),
            TypeKind::List(inner) => {
                let Some(items) = value.as_array() else {
                    return Err(format!("expected a list, got {}", json_kind(value)));
                };
                for (index, item) in items.iter().enumerate() {
                    inner
                        .type_check(item)
                        .map_err(|reason| format!("element {index}: {reason}"))?;
                }
                true
            }
            TypeKind::Nullable(inner) => {
                if value.is_null() {
                    return Ok(());
                }
                return inner.type_check(value);
            }
        };

        if ok {
            Ok(())
        } else {
            Err(format!("expected {}, got {}", self.name, json_kind(value)))
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::CsvSerializationStrategy;
    use serde_json::json;

    #[test]
    fn test_builtin_type_checks() {
        assert!(RuntimeType::bool().type_check(&json!(true)).is_ok());
        assert!(RuntimeType::bool().type_check(&json!(1)).is_err());
        assert!(RuntimeType::int().type_check(&json!(3)).is_ok());
        assert!(RuntimeType::int().type_check(&json!(3.5)).is_err());
        assert!(RuntimeType::float().type_check(&json!(3)).is_ok());
        assert!(RuntimeType::string().type_check(&json!("x")).is_ok());
        assert!(RuntimeType::any().type_check(&json!({"k": [1]})).is_ok());
        assert!(RuntimeType::rows().type_check(&json!([{"a": 1}])).is_ok());
        assert!(RuntimeType::rows().type_check(&json!([1])).is_err());
    }

    #[test]
    fn test_composite_names_and_checks() {
        let ty = RuntimeType::list(RuntimeType::nullable(RuntimeType::int()));
        assert_eq!(ty.name(), "List[Nullable[Int]]");
        assert!(ty.is_composite());
        assert!(ty.type_check(&json!([1, null, 3])).is_ok());

        let err = ty.type_check(&json!([1, "two"])).unwrap_err();
        assert!(err.contains("element 1"));
        assert!(ty.type_check(&json!("nope")).is_err());
    }

    #[test]
    fn test_custom_strategy_marks_type() {
        let plain = RuntimeType::rows();
        assert!(!plain.has_custom_serialization());

        let csv = RuntimeType::new("CsvRows", TypeKind::Rows)
            .with_serialization_strategy(Arc::new(CsvSerializationStrategy));
        assert!(csv.has_custom_serialization());
        assert_eq!(csv.serialization_strategy().name(), "csv");
        assert!(RuntimeType::list(csv).element_type().is_some_and(RuntimeType::has_custom_serialization));
    }
}
