//! Data codec: typed values to and from the primitive job payload.
//!
//! Encoding is driven by the declared `TypedValue` variant. The raw
//! `{platformKey, value}` path exists for callers holding loosely-typed
//! JSON; an unknown tag there is reported, never silently coerced.

pub mod data;
pub mod value;

pub use data::{DataValue, MAX_DATA_BYTES, WorkData, WorkDataBuilder};
pub use value::{Args, SUPPORTED_TAGS, TypedValue};

use crate::error::CodecError;

/// Input key holding the callback (entry point) handle.
pub const CALLBACK_HANDLE_KEY: &str = "callbackHandle";
/// Input key holding the task handle.
pub const TASK_HANDLE_KEY: &str = "taskHandle";
/// Control keys that are never exposed as user arguments.
pub const RESERVED_KEYS: &[&str] = &[CALLBACK_HANDLE_KEY, TASK_HANDLE_KEY];

/// Encode one typed field into the builder.
pub fn encode(builder: &mut WorkDataBuilder, field: &str, value: &TypedValue) {
    let primitive = match value {
        TypedValue::String(s) => DataValue::String(s.clone()),
        TypedValue::Int(v) => DataValue::Long(*v),
        TypedValue::Double(v) => DataValue::Double(*v),
        TypedValue::Bool(v) => DataValue::Bool(*v),
        TypedValue::StringList(v) => DataValue::StringArray(v.clone()),
        TypedValue::IntList(v) => DataValue::LongArray(v.clone()),
        TypedValue::DoubleList(v) => DataValue::DoubleArray(v.clone()),
        TypedValue::BoolList(v) => DataValue::BoolArray(v.clone()),
    };
    builder.put(field, primitive);
}

/// Encode a whole argument map, rejecting reserved control keys.
pub fn encode_args(args: &Args) -> Result<WorkData, CodecError> {
    let mut builder = WorkData::builder();
    encode_into(&mut builder, args)?;
    builder.build()
}

/// Encode arguments into an existing builder (used when control keys are
/// added alongside).
pub fn encode_into(builder: &mut WorkDataBuilder, args: &Args) -> Result<(), CodecError> {
    for (field, value) in args {
        if RESERVED_KEYS.contains(&field.as_str()) {
            return Err(CodecError::ReservedKey {
                field: field.clone(),
            });
        }
        encode(builder, field, value);
    }
    Ok(())
}

/// Encode a raw `{platformKey, value}` object.
///
/// An unsupported tag leaves the builder untouched and is returned as
/// `CodecError::UnsupportedTag`.
pub fn encode_tagged(
    builder: &mut WorkDataBuilder,
    field: &str,
    raw: &serde_json::Value,
) -> Result<(), CodecError> {
    let value = parse_tagged(field, raw)?;
    encode(builder, field, &value);
    Ok(())
}

/// Parse one raw `{platformKey, value}` object into a `TypedValue`.
pub fn parse_tagged(field: &str, raw: &serde_json::Value) -> Result<TypedValue, CodecError> {
    let tag = raw
        .as_object()
        .and_then(|obj| obj.get("platformKey"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| CodecError::Malformed {
            field: field.to_string(),
        })?;

    if !SUPPORTED_TAGS.contains(&tag) {
        tracing::warn!(field, tag, "Dropping field with unsupported type tag");
        return Err(CodecError::UnsupportedTag {
            field: field.to_string(),
            tag: tag.to_string(),
        });
    }

    serde_json::from_value(raw.clone()).map_err(|_| CodecError::Mismatch {
        field: field.to_string(),
        tag: tag.to_string(),
    })
}

/// Parse a JSON object of `{platformKey, value}` entries into `Args`.
pub fn parse_args(raw: &serde_json::Map<String, serde_json::Value>) -> Result<Args, CodecError> {
    raw.iter()
        .map(|(field, v)| Ok((field.clone(), parse_tagged(field, v)?)))
        .collect()
}

/// Decode a payload back into typed arguments.
///
/// Reserved control keys and anything listed in `exclude` are skipped.
pub fn decode(data: &WorkData, exclude: &[&str]) -> Args {
    data.iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()) && !exclude.contains(&k.as_str()))
        .map(|(k, v)| {
            let value = match v {
                DataValue::String(s) => TypedValue::String(s.clone()),
                DataValue::Long(v) => TypedValue::Int(*v),
                DataValue::Double(v) => TypedValue::Double(*v),
                DataValue::Bool(v) => TypedValue::Bool(*v),
                DataValue::StringArray(v) => TypedValue::StringList(v.clone()),
                DataValue::LongArray(v) => TypedValue::IntList(v.clone()),
                DataValue::DoubleArray(v) => TypedValue::DoubleList(v.clone()),
                DataValue::BoolArray(v) => TypedValue::BoolList(v.clone()),
            };
            (k.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_values() -> Vec<TypedValue> {
        vec![
            TypedValue::String("hello".into()),
            TypedValue::Int(-42),
            TypedValue::Double(3.25),
            TypedValue::Bool(true),
            TypedValue::StringList(vec!["a".into(), "b".into()]),
            TypedValue::IntList(vec![1, 2, 3]),
            TypedValue::DoubleList(vec![0.5, 1.0]),
            TypedValue::BoolList(vec![true, false]),
        ]
    }

    #[test]
    fn every_variant_round_trips() {
        for value in sample_values() {
            let mut builder = WorkData::builder();
            encode(&mut builder, "field", &value);
            let data = builder.build().unwrap();
            let decoded = decode(&data, &[]);
            assert_eq!(decoded.get("field"), Some(&value), "tag {}", value.tag());
        }
    }

    #[test]
    fn unsupported_tag_is_flagged_and_leaves_payload_unchanged() {
        let mut builder = WorkData::builder();
        builder.put_long("kept", 1);

        let err = encode_tagged(
            &mut builder,
            "odd",
            &json!({"platformKey": "Map<String, int>", "value": {}}),
        )
        .unwrap_err();

        assert_eq!(
            err,
            CodecError::UnsupportedTag {
                field: "odd".into(),
                tag: "Map<String, int>".into()
            }
        );
        let data = builder.build().unwrap();
        assert_eq!(data.len(), 1);
        assert!(data.get("odd").is_none());
    }

    #[test]
    fn tag_payload_mismatch_is_an_error() {
        let mut builder = WorkData::builder();
        let err = encode_tagged(
            &mut builder,
            "count",
            &json!({"platformKey": "int", "value": "five"}),
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::Mismatch { .. }));
        assert!(builder.is_empty());
    }

    #[test]
    fn missing_platform_key_is_malformed() {
        let mut builder = WorkData::builder();
        let err = encode_tagged(&mut builder, "x", &json!(5)).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }

    #[test]
    fn decode_excludes_control_keys() {
        let mut builder = WorkData::builder();
        builder.put_long(CALLBACK_HANDLE_KEY, 11);
        builder.put_long(TASK_HANDLE_KEY, 12);
        encode(&mut builder, "count", &TypedValue::Int(5));
        encode(&mut builder, "skip", &TypedValue::Bool(false));
        let data = builder.build().unwrap();

        let args = decode(&data, &["skip"]);
        assert_eq!(args.len(), 1);
        assert_eq!(args.get("count"), Some(&TypedValue::Int(5)));
    }

    #[test]
    fn encode_args_rejects_reserved_keys() {
        let mut args = Args::new();
        args.insert(TASK_HANDLE_KEY.into(), TypedValue::Int(1));
        assert!(matches!(
            encode_args(&args),
            Err(CodecError::ReservedKey { .. })
        ));
    }

    #[test]
    fn parse_args_keeps_declared_types() {
        let raw = json!({
            "count": {"platformKey": "int", "value": 5},
            "ratio": {"platformKey": "double", "value": 5},
            "names": {"platformKey": "List<String>", "value": ["a"]},
        });
        let args = parse_args(raw.as_object().unwrap()).unwrap();
        assert_eq!(args["count"], TypedValue::Int(5));
        assert_eq!(args["ratio"], TypedValue::Double(5.0));
        assert_eq!(args["names"], TypedValue::StringList(vec!["a".into()]));
        assert_eq!(args.len(), 3);
    }
}
