//! Schema validation helpers.
//!
//! This module validates `serde_json::Value` configurations against a [`Schema`]
//! before any remote call is made, and gives detailed error messages.
//!
//! # Example
//!
//! ```
//! use terraform_provider_aikido::schema::{Attribute, Schema, StringValidator};
//! use terraform_provider_aikido::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0().with_attribute(
//!     "name",
//!     Attribute::required_string().with_validator(StringValidator::length_at_least(1)),
//! );
//!
//! assert!(validate(&schema, &json!({"name": "platform"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": ""}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("name".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema};
use crate::types::is_unknown;
use serde_json::Value;
use std::collections::HashMap;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (provider sets these)
/// - Unknown values are skipped, they are checked again once known
/// - Attribute types must match the schema
/// - String values must satisfy the attribute's validators
/// - Nested list blocks are validated item by item
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
///
/// This is a convenience wrapper around [`validate`] that returns a Result.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
///
/// Returns `true` if valid, `false` otherwise.
/// Use [`validate`] to get detailed error information.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Render validation diagnostics as a single message.
pub fn describe(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match &d.detail {
            Some(detail) => format!("{}: {}", d.summary, detail),
            None => d.summary.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => {
            // Null is valid for optional blocks, but we can't validate further
            return;
        },
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value)))
                    .with_attribute_if_not_empty(path),
            );
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested_block) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested_block, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Skip computed-only attributes (provider sets these)
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) if is_unknown(v) => {},
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            if diagnostics.len() == before {
                if let Some(s) = v.as_str() {
                    validate_string(attr, s, path, diagnostics);
                }
            }
        },
    }
}

fn validate_string(attr: &Attribute, value: &str, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    for validator in &attr.validators {
        if let Err(reason) = validator.check(value) {
            diagnostics.push(
                Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                    .with_detail(reason)
                    .with_attribute(path),
            );
        }
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if is_unknown(value) {
        return;
    }

    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::List(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "list", value));
            }
        },
        AttributeType::Object(attrs) => {
            if let Some(obj) = value.as_object() {
                validate_object_type(attrs, obj, path, diagnostics);
            } else {
                diagnostics.push(type_error(path, "object", value));
            }
        },
    }
}

fn validate_object_type(
    attrs: &HashMap<String, AttributeType>,
    obj: &serde_json::Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (name, attr_type) in attrs {
        let attr_path = join_path(path, name);
        if let Some(value) = obj.get(name) {
            validate_attribute_type(attr_type, value, &attr_path, diagnostics);
        }
        // Object types carry no required/optional flags, so presence is not enforced
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if value.is_some_and(is_unknown) {
        return;
    }

    match value {
        // An absent block is an empty list
        None | Some(Value::Null) => {},
        Some(Value::Array(arr)) => {
            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        Some(v) => {
            diagnostics.push(
                Diagnostic::error(format!("Expected list for block '{}'", path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        },
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                // Accept floats without a fractional part
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        ))
        .with_attribute(path)
}

trait DiagnosticExt {
    fn with_attribute_if_not_empty(self, path: &str) -> Self;
}

impl DiagnosticExt for Diagnostic {
    fn with_attribute_if_not_empty(self, path: &str) -> Self {
        if path.is_empty() {
            self
        } else {
            self.with_attribute(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Block, NestedBlock, Schema, StringValidator};
    use crate::types::UNKNOWN_VALUE;
    use serde_json::json;

    fn responsibilities_schema() -> Schema {
        Schema::v0().with_block(
            "responsibilities",
            NestedBlock::list(
                Block::new()
                    .with_attribute("id", Attribute::required_int64())
                    .with_attribute(
                        "type",
                        Attribute::required_string()
                            .with_validator(StringValidator::one_of(["cloud", "domain"])),
                    ),
            ),
        )
    }

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &json!({"name": "test"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        let diagnostics = validate(&schema, &json!({"name": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_optional_attribute() {
        let schema = Schema::v0().with_attribute("base_url", Attribute::optional_string());

        assert!(validate(&schema, &json!({"base_url": "https://app.aikido.dev"})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"base_url": null})).is_empty());
        assert_eq!(validate(&schema, &json!({"base_url": true})).len(), 1);
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("id", Attribute::computed_int64());

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"id": "not a number"})).is_empty());
    }

    #[test]
    fn test_validate_string_validators() {
        let schema = Schema::v0().with_attribute(
            "name",
            Attribute::required_string().with_validator(StringValidator::length_at_least(1)),
        );

        let diagnostics = validate(&schema, &json!({"name": ""}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid value"));
        assert!(diagnostics[0]
            .detail
            .as_deref()
            .unwrap_or_default()
            .contains("at least 1"));
    }

    #[test]
    fn test_validate_unknown_values_skipped() {
        let schema = Schema::v0().with_attribute(
            "name",
            Attribute::required_string().with_validator(StringValidator::length_at_least(50)),
        );
        assert!(validate(&schema, &json!({"name": UNKNOWN_VALUE})).is_empty());

        let schema = responsibilities_schema();
        assert!(validate(&schema, &json!({"responsibilities": UNKNOWN_VALUE})).is_empty());
    }

    #[test]
    fn test_validate_list_block_items() {
        let schema = responsibilities_schema();

        let valid = json!({"responsibilities": [{"id": 1, "type": "cloud"}]});
        assert!(is_valid(&schema, &valid));

        let invalid = json!({"responsibilities": [
            {"id": 1, "type": "cloud"},
            {"id": 2, "type": "bucket"}
        ]});
        let diagnostics = validate(&schema, &invalid);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("responsibilities.1.type".to_string())
        );

        let missing_id = json!({"responsibilities": [{"type": "domain"}]});
        let diagnostics = validate(&schema, &missing_id);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("responsibilities.0.id".to_string())
        );

        let not_a_list = json!({"responsibilities": "cloud"});
        let diagnostics = validate(&schema, &not_a_list);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected list"));
    }

    #[test]
    fn test_validate_absent_list_block() {
        let schema = responsibilities_schema();

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"responsibilities": null})).is_empty());
        assert!(validate(&schema, &json!({"responsibilities": []})).is_empty());
    }

    #[test]
    fn test_validate_object_list_attribute() {
        let schema = Schema::v0().with_attribute(
            "users",
            Attribute::new(
                AttributeType::list(AttributeType::object([
                    ("id", AttributeType::Int64),
                    ("email", AttributeType::String),
                ])),
                crate::schema::AttributeFlags::optional(),
            ),
        );

        assert!(is_valid(&schema, &json!({"users": [{"id": 1, "email": "a@b.c"}]})));
        let diagnostics = validate(&schema, &json!({"users": [{"id": "one"}]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("users.0.id".to_string()));
    }

    #[test]
    fn test_validate_result_and_describe() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate_result(&schema, &json!({"name": "x"})).is_ok());
        let diagnostics = validate_result(&schema, &json!({})).unwrap_err();
        let message = describe(&diagnostics);
        assert!(message.contains("Missing required attribute 'name'"));
        assert!(message.contains("must be provided"));
    }

    #[test]
    fn test_validate_non_object_root() {
        let schema = Schema::v0();
        let diagnostics = validate(&schema, &json!([1, 2]));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, None);
        assert!(is_valid(&schema, &Value::Null));
    }

    #[test]
    fn test_is_int64() {
        assert!(is_int64(&json!(42)));
        assert!(is_int64(&json!(-7)));
        assert!(is_int64(&json!(3.0)));
        assert!(!is_int64(&json!(3.5)));
        assert!(!is_int64(&json!("3")));
    }
}
