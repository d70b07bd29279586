//! Encoder/Decoder (C5): app-value <-> DB-value conversion, per field and
//! per dialect, following the priority order in §4.4.

use crate::dialect::{DeclaredType, Dialect};
use crate::error::{LatticeError, Result};
use crate::schema::FieldInfo;
use crate::value::{DbValue, FieldValue};

/// Optional dialect-level encode/decode hooks (§6.1 `encode_value?` /
/// `decode_value?`). A driver that needs dialect-specific conversion for a
/// declared type (e.g. Postgres native booleans, MySQL TINYINT(1))
/// implements this; it sits between the field's custom hook and the
/// built-in defaults.
pub trait DialectCodec: Send + Sync {
    fn encode_value(&self, value: &FieldValue, declared: DeclaredType) -> Option<Result<DbValue>> {
        let _ = (value, declared);
        None
    }
    fn decode_value(&self, value: &DbValue, declared: DeclaredType) -> Option<Result<FieldValue>> {
        let _ = (value, declared);
        None
    }
}

/// No-op dialect codec: every dialect that has nothing special to add can
/// use this rather than writing an empty impl by hand.
pub struct DefaultDialectCodec;
impl DialectCodec for DefaultDialectCodec {}

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Encodes one field's value per the priority order in §4.4:
/// 1. field's custom encoder, 2. dialect encode hook, 3. defaults.
pub fn encode_field(
    field: &dyn FieldInfo,
    value: &FieldValue,
    dialect_codec: &dyn DialectCodec,
) -> Result<DbValue> {
    if let Some(result) = field.encode(value) {
        return result;
    }
    if let Some(result) = dialect_codec.encode_value(value, field.declared_type()) {
        return result;
    }
    Ok(default_encode(value))
}

/// Default encoding (§4.4 step 3): objects/arrays -> JSON text; dates ->
/// `YYYY-MM-DD HH:MM:SS.mmm`; null passes through; booleans pass through
/// (dialect-specific 0/1 coercion happens at render time, §4.2).
pub fn default_encode(value: &FieldValue) -> DbValue {
    match value {
        FieldValue::Null => DbValue::Null,
        FieldValue::Bool(b) => DbValue::Bool(*b),
        FieldValue::Int(i) => DbValue::Int(*i),
        FieldValue::Real(r) => DbValue::Real(*r),
        FieldValue::Text(s) => DbValue::Text(s.clone()),
        FieldValue::Blob(b) => DbValue::Blob(b.clone()),
        FieldValue::Json(v) => DbValue::Text(v.to_string()),
        FieldValue::DateTime(dt) => DbValue::Text(dt.format(DATE_FORMAT).to_string()),
        FieldValue::Expression(_) | FieldValue::Builtin(_) => {
            unreachable!("expressions/builtins are never routed through encode_field")
        }
    }
}

/// Decodes one returned column value per the priority order in §4.4.
pub fn decode_field(
    field: &dyn FieldInfo,
    value: DbValue,
    dialect_codec: &dyn DialectCodec,
) -> Result<FieldValue> {
    if let Some(result) = field.decode(&value) {
        return result;
    }
    if let Some(result) = dialect_codec.decode_value(&value, field.declared_type()) {
        return result;
    }
    default_decode(field.name(), field.declared_type(), value)
}

/// Default decoding (§4.4 step 3).
pub fn default_decode(
    field_name: &str,
    declared: DeclaredType,
    value: DbValue,
) -> Result<FieldValue> {
    match (declared, value) {
        (_, DbValue::Null) => Ok(FieldValue::Null),
        (DeclaredType::Json, DbValue::Text(text)) => {
            serde_json::from_str(&text)
                .map(FieldValue::Json)
                .map_err(|e| LatticeError::Decoding {
                    field: field_name.to_string(),
                    reason: e.to_string(),
                    truncated_input: truncate(&text),
                })
        }
        (DeclaredType::Datetime, DbValue::Text(text)) => parse_datetime(field_name, &text),
        (DeclaredType::Boolean, DbValue::Int(i)) => Ok(FieldValue::Bool(i != 0)),
        (DeclaredType::Boolean, DbValue::Bool(b)) => Ok(FieldValue::Bool(b)),
        (_, DbValue::Bool(b)) => Ok(FieldValue::Bool(b)),
        (_, DbValue::Int(i)) => Ok(FieldValue::Int(i)),
        (_, DbValue::Real(r)) => Ok(FieldValue::Real(r)),
        (_, DbValue::Text(s)) => Ok(FieldValue::Text(s)),
        (_, DbValue::Blob(b)) => Ok(FieldValue::Blob(b)),
    }
}

fn parse_datetime(field_name: &str, text: &str) -> Result<FieldValue> {
    let formats = [DATE_FORMAT, "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.3f"];
    for fmt in formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(FieldValue::DateTime(dt));
        }
    }
    Err(LatticeError::Decoding {
        field: field_name.to_string(),
        reason: "invalid date".to_string(),
        truncated_input: truncate(text),
    })
}

fn truncate(input: &str) -> String {
    const MAX: usize = 64;
    if input.len() <= MAX {
        input.to_string()
    } else {
        format!("{}...", &input[..MAX])
    }
}

/// Enforces the §4.4 rule: a field with any custom encode/decode hook must
/// not receive a `DBExpression` or `Builtin` value at mutation time.
pub fn reject_codec_conflict(table: &str, field: &dyn FieldInfo, value: &FieldValue) -> Result<()> {
    if field.has_custom_codec() && value.is_expression_or_builtin() {
        return Err(LatticeError::configuration(
            table,
            format!(
                "field `{}` declares a custom encode/decode hook and cannot accept a raw expression or builtin",
                field.name()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let original = serde_json::json!({"a": 1, "b": [1,2,3]});
        let encoded = default_encode(&FieldValue::Json(original.clone()));
        let decoded = default_decode("f", DeclaredType::Json, encoded).unwrap();
        match decoded {
            FieldValue::Json(v) => assert_eq!(v, original),
            _ => panic!("expected json"),
        }
    }

    #[test]
    fn date_round_trip_to_millisecond_precision() {
        let dt = chrono::NaiveDate::from_ymd_opt(2026, 7, 28)
            .unwrap()
            .and_hms_milli_opt(10, 30, 0, 125)
            .unwrap();
        let encoded = default_encode(&FieldValue::DateTime(dt));
        let decoded = default_decode("f", DeclaredType::Datetime, encoded).unwrap();
        match decoded {
            FieldValue::DateTime(got) => assert_eq!(got, dt),
            _ => panic!("expected datetime"),
        }
    }

    #[test]
    fn invalid_json_surfaces_typed_decoding_error() {
        let err = default_decode(
            "payload",
            DeclaredType::Json,
            DbValue::Text("{not json".into()),
        )
        .unwrap_err();
        match err {
            LatticeError::Decoding { field, .. } => assert_eq!(field, "payload"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
