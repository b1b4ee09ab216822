// ==========================================
// CCX 字段覆写 - 字段值与字段编解码
// ==========================================
// 存储格式: JSON 文本, 内容为字段自身的外部表示 (to_json 结果)
// 红线: 覆写仓储不解释外部表示, 只做 JSON 包装/解包
// ==========================================

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};
use std::fmt;
use thiserror::Error;

// ==========================================
// FieldValue - 字段值 (已解码)
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    List(Vec<JsonValue>),
    Dict(Map<String, JsonValue>),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::String(_) => "string",
            FieldValue::Date(_) => "date",
            FieldValue::List(_) => "list",
            FieldValue::Dict(_) => "dict",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Date(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

// ==========================================
// CodecError - 编解码错误
// ==========================================
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("字段类型不匹配: expected={expected}, actual={actual}")]
    TypeMismatch { expected: FieldKind, actual: String },

    #[error("字段值无效 (kind={kind}): {message}")]
    InvalidValue { kind: FieldKind, message: String },
}

// ==========================================
// FieldCodec - 字段编解码规则
// ==========================================
// 每个内容块字段提供自己的规则, 外部表示必须能被 serde_json 序列化
pub trait FieldCodec {
    /// 值 → 外部表示
    fn to_json(&self, value: &FieldValue) -> Result<JsonValue, CodecError>;

    /// 外部表示 → 值
    fn from_json(&self, value: JsonValue) -> Result<FieldValue, CodecError>;
}

// ==========================================
// FieldKind - 内置字段类型
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    String,
    Date,
    List,
    Dict,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Boolean => write!(f, "BOOLEAN"),
            FieldKind::Integer => write!(f, "INTEGER"),
            FieldKind::Float => write!(f, "FLOAT"),
            FieldKind::String => write!(f, "STRING"),
            FieldKind::Date => write!(f, "DATE"),
            FieldKind::List => write!(f, "LIST"),
            FieldKind::Dict => write!(f, "DICT"),
        }
    }
}

impl FieldKind {
    fn mismatch(&self, actual: &str) -> CodecError {
        CodecError::TypeMismatch {
            expected: *self,
            actual: actual.to_string(),
        }
    }

    fn invalid(&self, message: impl Into<String>) -> CodecError {
        CodecError::InvalidValue {
            kind: *self,
            message: message.into(),
        }
    }
}

impl FieldCodec for FieldKind {
    fn to_json(&self, value: &FieldValue) -> Result<JsonValue, CodecError> {
        // null 对所有类型都合法 (例如清空截止日期)
        if value.is_null() {
            return Ok(JsonValue::Null);
        }

        match (self, value) {
            (FieldKind::Boolean, FieldValue::Boolean(b)) => Ok(JsonValue::Bool(*b)),
            (FieldKind::Integer, FieldValue::Integer(i)) => Ok(JsonValue::from(*i)),
            (FieldKind::Float, FieldValue::Integer(i)) => Ok(JsonValue::from(*i as f64)),
            (FieldKind::Float, FieldValue::Float(x)) => Number::from_f64(*x)
                .map(JsonValue::Number)
                .ok_or_else(|| self.invalid(format!("非有限浮点数: {}", x))),
            (FieldKind::String, FieldValue::String(s)) => Ok(JsonValue::String(s.clone())),
            (FieldKind::Date, FieldValue::Date(d)) => {
                Ok(JsonValue::String(d.to_rfc3339_opts(SecondsFormat::Secs, true)))
            }
            (FieldKind::List, FieldValue::List(items)) => Ok(JsonValue::Array(items.clone())),
            (FieldKind::Dict, FieldValue::Dict(map)) => Ok(JsonValue::Object(map.clone())),
            (_, other) => Err(self.mismatch(other.type_name())),
        }
    }

    fn from_json(&self, value: JsonValue) -> Result<FieldValue, CodecError> {
        if value.is_null() {
            return Ok(FieldValue::Null);
        }

        match self {
            FieldKind::Boolean => match value {
                JsonValue::Bool(b) => Ok(FieldValue::Boolean(b)),
                JsonValue::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" => Ok(FieldValue::Boolean(true)),
                    "false" => Ok(FieldValue::Boolean(false)),
                    _ => Err(self.invalid(format!("无法解析布尔值: '{}'", s))),
                },
                other => Err(self.mismatch(json_type_name(&other))),
            },
            FieldKind::Integer => match value {
                JsonValue::Number(n) => n
                    .as_i64()
                    .map(FieldValue::Integer)
                    .ok_or_else(|| self.invalid(format!("不是整数: {}", n))),
                JsonValue::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(FieldValue::Integer)
                    .map_err(|e| self.invalid(e.to_string())),
                other => Err(self.mismatch(json_type_name(&other))),
            },
            FieldKind::Float => match value {
                JsonValue::Number(n) => n
                    .as_f64()
                    .map(FieldValue::Float)
                    .ok_or_else(|| self.invalid(format!("不是浮点数: {}", n))),
                JsonValue::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(FieldValue::Float)
                    .map_err(|e| self.invalid(e.to_string())),
                other => Err(self.mismatch(json_type_name(&other))),
            },
            FieldKind::String => match value {
                JsonValue::String(s) => Ok(FieldValue::String(s)),
                other => Err(self.mismatch(json_type_name(&other))),
            },
            FieldKind::Date => match value {
                JsonValue::String(s) => parse_date(&s)
                    .map(FieldValue::Date)
                    .ok_or_else(|| self.invalid(format!("无法解析日期: '{}'", s))),
                other => Err(self.mismatch(json_type_name(&other))),
            },
            FieldKind::List => match value {
                JsonValue::Array(items) => Ok(FieldValue::List(items)),
                other => Err(self.mismatch(json_type_name(&other))),
            },
            FieldKind::Dict => match value {
                JsonValue::Object(map) => Ok(FieldValue::Dict(map)),
                other => Err(self.mismatch(json_type_name(&other))),
            },
        }
    }
}

/// 接受 RFC 3339; 不带时区的时间按 UTC 处理
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_date_external_form() {
        let due = Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 0).unwrap();
        let external = FieldKind::Date.to_json(&FieldValue::Date(due)).unwrap();
        assert_eq!(external, json!("2025-03-01T23:59:00Z"));
        assert_eq!(FieldKind::Date.from_json(external).unwrap(), FieldValue::Date(due));
    }

    #[test]
    fn test_date_without_offset_is_utc() {
        let decoded = FieldKind::Date.from_json(json!("2025-03-01T08:00:00")).unwrap();
        assert_eq!(
            decoded,
            FieldValue::Date(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_null_is_valid_for_every_kind() {
        for kind in [FieldKind::Boolean, FieldKind::Date, FieldKind::Dict] {
            assert_eq!(kind.to_json(&FieldValue::Null).unwrap(), JsonValue::Null);
            assert_eq!(kind.from_json(JsonValue::Null).unwrap(), FieldValue::Null);
        }
    }

    #[test]
    fn test_type_mismatch() {
        let err = FieldKind::Integer.to_json(&FieldValue::from("five")).unwrap_err();
        assert!(matches!(
            err,
            CodecError::TypeMismatch { expected: FieldKind::Integer, .. }
        ));
        assert!(FieldKind::Dict.from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_lenient_scalar_decoding() {
        assert_eq!(FieldKind::Integer.from_json(json!("7")).unwrap(), FieldValue::Integer(7));
        assert_eq!(FieldKind::Boolean.from_json(json!("True")).unwrap(), FieldValue::Boolean(true));
        assert_eq!(FieldKind::Float.to_json(&FieldValue::Integer(2)).unwrap(), json!(2.0));
        assert!(FieldKind::Float.to_json(&FieldValue::Float(f64::NAN)).is_err());
    }
}
