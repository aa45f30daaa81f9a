//! Payload validation against a registered definition.

use serde_json::{Map, Value};

use crate::definition::{Definition, FieldType};
use crate::errors::{BrokerError, Result};

impl FieldType {
    /// Whether a runtime JSON value has this type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// JSON type name used in error messages.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check `data` against `definition`.
///
/// Every declared field must be present with the declared type, and no
/// undeclared field may appear.
pub fn validate_data(definition: &Definition, data: &Map<String, Value>) -> Result<()> {
    for key in data.keys() {
        if definition.field(key).is_none() {
            return Err(BrokerError::validation(format!(
                "{} has no field named {key}",
                definition.identifier
            )));
        }
    }

    for field in &definition.fields {
        let Some(value) = data.get(&field.name) else {
            return Err(BrokerError::validation(format!(
                "{} is missing field {}",
                definition.identifier, field.name
            )));
        };
        if !field.field_type.matches(value) {
            return Err(BrokerError::validation(format!(
                "{}.{} expects {}, got {}",
                definition.identifier,
                field.name,
                field.field_type,
                json_type_name(value)
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionKind, FieldDefinition};
    use proptest::prelude::*;
    use serde_json::json;

    fn gps() -> Definition {
        Definition::new("GPS", DefinitionKind::Event)
            .with_field(FieldDefinition::new("lat", FieldType::Number).with_units("deg"))
            .with_field(FieldDefinition::new("label", FieldType::String))
            .with_field(FieldDefinition::new("fix", FieldType::Boolean))
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn accepts_matching_payload() {
        let payload = data(json!({"lat": 48.85, "label": "paris", "fix": true}));
        assert!(validate_data(&gps(), &payload).is_ok());
    }

    #[test]
    fn integers_count_as_numbers() {
        let payload = data(json!({"lat": 48, "label": "", "fix": false}));
        assert!(validate_data(&gps(), &payload).is_ok());
    }

    #[test]
    fn rejects_type_mismatch() {
        let payload = data(json!({"lat": "48.85", "label": "paris", "fix": true}));
        let err = validate_data(&gps(), &payload).unwrap_err();
        assert_eq!(err.to_string(), "validation failed: GPS.lat expects number, got string");
    }

    #[test]
    fn rejects_null_value() {
        let payload = data(json!({"lat": 1, "label": null, "fix": true}));
        let err = validate_data(&gps(), &payload).unwrap_err();
        assert!(err.to_string().contains("got null"));
    }

    #[test]
    fn rejects_missing_field() {
        let payload = data(json!({"lat": 1, "label": "x"}));
        let err = validate_data(&gps(), &payload).unwrap_err();
        assert!(err.to_string().contains("missing field fix"));
    }

    #[test]
    fn rejects_unknown_field() {
        let payload = data(json!({"lat": 1, "label": "x", "fix": true, "alt": 3}));
        let err = validate_data(&gps(), &payload).unwrap_err();
        assert!(err.to_string().contains("no field named alt"));
    }

    #[test]
    fn empty_definition_accepts_only_empty_data() {
        let def = Definition::new("TICK", DefinitionKind::Event);
        assert!(validate_data(&def, &Map::new()).is_ok());
        assert!(validate_data(&def, &data(json!({"x": 1}))).is_err());
    }

    #[test]
    fn nested_values_never_match() {
        for ty in [FieldType::String, FieldType::Number, FieldType::Boolean] {
            assert!(!ty.matches(&json!([1])));
            assert!(!ty.matches(&json!({"a": 1})));
        }
    }

    proptest! {
        #[test]
        fn any_finite_number_matches_number(n in proptest::num::f64::NORMAL) {
            prop_assert!(FieldType::Number.matches(&json!(n)));
            prop_assert!(!FieldType::String.matches(&json!(n)));
            prop_assert!(!FieldType::Boolean.matches(&json!(n)));
        }

        #[test]
        fn any_string_matches_only_string(s in ".*") {
            prop_assert!(FieldType::String.matches(&json!(s)));
            prop_assert!(!FieldType::Number.matches(&json!(s)));
        }
    }
}
