//! Conversion of untyped, externally supplied arguments into typed
//! needle parameters.

use serde_json::{Map, Value};
use storage::{Arg, Needle, ValueType};
use thiserror::Error;

use crate::params::{NeedleParameter, ParamValue};

/// Argument validation errors. All of them are raised before any guest
/// code runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArgumentError {
    #[error("missing required argument: {0}")]
    MissingRequired(String),

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("invalid value for argument '{name}': expected {expected}, got {value}")]
    InvalidValue {
        name: String,
        expected: ValueType,
        value: String,
    },

    #[error("parameter '{name}' is {found} but the argument is declared {expected}")]
    TypeMismatch {
        name: String,
        expected: ValueType,
        found: ValueType,
    },
}

/// Parameters produced from raw input, plus the names that matched no
/// declared argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedArguments {
    pub params: Vec<NeedleParameter>,
    pub ignored: Vec<String>,
}

/// Coerce raw arguments (e.g. from an LLM tool call) into typed parameters
/// for `needle`.
///
/// A provided value that fails coercion fails the whole call. Unrecognized
/// names are ignored and reported in [`ParsedArguments::ignored`].
pub fn parse_arguments(
    raw: &Map<String, Value>,
    needle: &Needle,
) -> Result<ParsedArguments, ArgumentError> {
    let mut params = Vec::with_capacity(needle.args.len());

    for arg in &needle.args {
        match raw.get(&arg.name) {
            Some(value) if !value.is_null() => {
                params.push(NeedleParameter::new(&arg.name, coerce(arg, value)?));
            }
            _ if arg.required => return Err(ArgumentError::MissingRequired(arg.name.clone())),
            _ => {}
        }
    }

    let mut ignored: Vec<String> = raw
        .keys()
        .filter(|name| needle.arg(name).is_none())
        .cloned()
        .collect();
    ignored.sort();

    if !ignored.is_empty() {
        tracing::warn!(needle = %needle.name, ?ignored, "ignoring unrecognized arguments");
    }

    Ok(ParsedArguments { params, ignored })
}

fn coerce(arg: &Arg, value: &Value) -> Result<ParamValue, ArgumentError> {
    let coerced = match (arg.value_type, value) {
        (ValueType::String, Value::String(s)) => Some(ParamValue::String(s.clone())),
        (ValueType::String, Value::Number(n)) => Some(ParamValue::String(n.to_string())),
        (ValueType::String, Value::Bool(b)) => Some(ParamValue::String(b.to_string())),

        (ValueType::Int, Value::Number(n)) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(ParamValue::Int),
        (ValueType::Int, Value::String(s)) => s.trim().parse().ok().map(ParamValue::Int),

        (ValueType::Float, Value::Number(n)) => n.as_f64().map(ParamValue::Float),
        (ValueType::Float, Value::String(s)) => s.trim().parse().ok().map(ParamValue::Float),

        (ValueType::Boolean, Value::Bool(b)) => Some(ParamValue::Boolean(*b)),
        (ValueType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Some(ParamValue::Boolean(true)),
            "false" => Some(ParamValue::Boolean(false)),
            _ => None,
        },

        _ => None,
    };

    coerced.ok_or_else(|| ArgumentError::InvalidValue {
        name: arg.name.clone(),
        expected: arg.value_type,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn needle() -> Needle {
        Needle::new("mixed", "return 1", ValueType::Int)
            .with_arg(Arg::required("count", ValueType::Int))
            .with_arg(Arg::optional("ratio", ValueType::Float, Some("0.5")))
            .with_arg(Arg::optional("flag", ValueType::Boolean, None))
            .with_arg(Arg::optional("label", ValueType::String, None))
    }

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn coerces_json_scalars() {
        let parsed = parse_arguments(
            &raw(json!({"count": 3, "ratio": 2, "flag": true, "label": "x"})),
            &needle(),
        )
        .unwrap();

        assert_eq!(
            parsed.params,
            vec![
                NeedleParameter::int("count", 3),
                NeedleParameter::float("ratio", 2.0),
                NeedleParameter::boolean("flag", true),
                NeedleParameter::string("label", "x"),
            ]
        );
        assert!(parsed.ignored.is_empty());
    }

    #[test]
    fn coerces_strings() {
        let parsed = parse_arguments(
            &raw(json!({"count": "10", "ratio": "1.25", "flag": "false", "label": 7})),
            &needle(),
        )
        .unwrap();

        assert_eq!(parsed.params[0], NeedleParameter::int("count", 10));
        assert_eq!(parsed.params[1], NeedleParameter::float("ratio", 1.25));
        assert_eq!(parsed.params[2], NeedleParameter::boolean("flag", false));
        assert_eq!(parsed.params[3], NeedleParameter::string("label", "7"));
    }

    #[test]
    fn optional_arguments_may_be_omitted() {
        let parsed = parse_arguments(&raw(json!({"count": 1, "flag": null})), &needle()).unwrap();
        assert_eq!(parsed.params, vec![NeedleParameter::int("count", 1)]);
    }

    #[test]
    fn missing_required_fails() {
        let err = parse_arguments(&raw(json!({"ratio": 1.0})), &needle()).unwrap_err();
        assert_eq!(err, ArgumentError::MissingRequired("count".into()));

        let err = parse_arguments(&raw(json!({"count": null})), &needle()).unwrap_err();
        assert_eq!(err, ArgumentError::MissingRequired("count".into()));
    }

    #[test]
    fn strict_boolean_parse() {
        for bad in ["TRUE", "yes", "1", ""] {
            let err = parse_arguments(&raw(json!({"count": 1, "flag": bad})), &needle());
            assert!(
                matches!(err, Err(ArgumentError::InvalidValue { ref name, .. }) if name == "flag"),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_fractional_integers() {
        let err = parse_arguments(&raw(json!({"count": 1.5})), &needle()).unwrap_err();
        assert!(matches!(err, ArgumentError::InvalidValue { expected: ValueType::Int, .. }));

        let err = parse_arguments(&raw(json!({"count": "1.5"})), &needle()).unwrap_err();
        assert!(matches!(err, ArgumentError::InvalidValue { .. }));
    }

    #[test]
    fn rejects_compound_values() {
        let err = parse_arguments(&raw(json!({"count": 1, "label": ["a"]})), &needle());
        assert!(err.is_err());

        let err = parse_arguments(&raw(json!({"count": {"n": 1}})), &needle());
        assert!(err.is_err());
    }

    #[test]
    fn unknown_names_are_reported_not_fatal() {
        let parsed =
            parse_arguments(&raw(json!({"count": 1, "zzz": 1, "extra": "x"})), &needle()).unwrap();
        assert_eq!(parsed.params.len(), 1);
        assert_eq!(parsed.ignored, vec!["extra".to_string(), "zzz".to_string()]);
    }
}
