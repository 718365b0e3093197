//! Backend-agnostic values.
//!
//! The [`Value`] enum carries every attribute value, query parameter, and
//! result cell through the mapper. [`ValueType`] is the declared type of an
//! entity attribute and drives [`Value::coerce`] when rows come back from a
//! backend that stores dates and booleans loosely (SQLite).
//!
//! [`KeyValue`] is the normalized form of a key used for batching and
//! stitching: integer-family values collapse to `i64`, text and UUIDs to text.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// A backend-agnostic representation of a database value.
///
/// # Examples
///
/// ```
/// use relorm_db::value::Value;
///
/// let v = Value::from(42_i64);
/// assert_eq!(v, Value::Int(42));
///
/// let v = Value::from("hello");
/// assert_eq!(v, Value::String("hello".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL; also the value of an unset attribute.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// Raw binary data.
    Bytes(Vec<u8>),
    /// A date without time.
    Date(NaiveDate),
    /// A date and time without timezone.
    DateTime(NaiveDateTime),
    /// A time without date.
    Time(NaiveTime),
    /// A UUID value.
    Uuid(uuid::Uuid),
    /// A JSON value.
    Json(serde_json::Value),
    /// A list of values.
    List(Vec<Value>),
}

/// The declared type of a scalar entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `bool`
    Bool,
    /// Any integer width.
    Int,
    /// `f32` / `f64`
    Float,
    /// `String`
    Text,
    /// `Vec<u8>`
    Bytes,
    /// A calendar date.
    Date,
    /// A timestamp.
    DateTime,
    /// A time of day.
    Time,
    /// A UUID.
    Uuid,
    /// An arbitrary JSON document.
    Json,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(dt) => write!(f, "{dt}"),
            Self::Time(t) => write!(f, "{t}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Json(j) => write!(f, "{j}"),
            Self::List(vals) => {
                write!(f, "[")?;
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ── From implementations ───────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<KeyValue> for Value {
    fn from(k: KeyValue) -> Self {
        match k {
            KeyValue::Int(i) => Self::Int(i),
            KeyValue::Text(s) => Self::String(s),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Self::Null,
        }
    }
}

impl Value {
    /// Returns `true` if this value is `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The current UTC timestamp, used for the time fields.
    pub fn now() -> Self {
        Self::DateTime(chrono::Utc::now().naive_utc())
    }

    /// Returns `true` for the zero value of the type: null, `false`, `0`,
    /// `0.0`, and empty strings, byte strings, and lists.
    ///
    /// Zero values are never written on insert and count as "unset" for
    /// primary keys.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(b) => !*b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::String(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Uuid(u) => u.is_nil(),
            Self::Json(j) => j.is_null(),
            Self::Date(_) | Self::DateTime(_) | Self::Time(_) => false,
        }
    }

    /// Attempts to extract a boolean value.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to extract an integer value.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to extract a float value; integers widen.
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Attempts to extract a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to extract a timestamp.
    pub const fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Returns the normalized key form of this value, or `None` for values
    /// that cannot identify a row (null, floats, blobs, ...).
    ///
    /// # Examples
    ///
    /// ```
    /// use relorm_db::value::{KeyValue, Value};
    ///
    /// assert_eq!(Value::Int(7).key(), Some(KeyValue::Int(7)));
    /// assert_eq!(Value::from("a").key(), Some(KeyValue::Text("a".into())));
    /// assert_eq!(Value::Null.key(), None);
    /// ```
    pub fn key(&self) -> Option<KeyValue> {
        match self {
            Self::Int(i) => Some(KeyValue::Int(*i)),
            Self::Bool(b) => Some(KeyValue::Int(i64::from(*b))),
            Self::String(s) => Some(KeyValue::Text(s.clone())),
            Self::Uuid(u) => Some(KeyValue::Text(u.to_string())),
            _ => None,
        }
    }

    /// Normalizes a composite key; `None` if any part cannot identify a row.
    pub fn keys(values: &[Self]) -> Option<Vec<KeyValue>> {
        values.iter().map(Self::key).collect()
    }

    /// Converts a raw backend value into the declared attribute type.
    ///
    /// Values that cannot be converted are returned unchanged.
    pub fn coerce(self, ty: ValueType) -> Self {
        match (ty, self) {
            (_, Self::Null) => Self::Null,
            (ValueType::Bool, Self::Int(i)) => Self::Bool(i != 0),
            (ValueType::Float, Self::Int(i)) => {
                #[allow(clippy::cast_precision_loss)]
                let f = i as f64;
                Self::Float(f)
            }
            (ValueType::Int, Self::Bool(b)) => Self::Int(i64::from(b)),
            (ValueType::DateTime, Self::String(s)) => parse_datetime(&s).map_or(Self::String(s), Self::DateTime),
            (ValueType::Date, Self::String(s)) => {
                NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_or(Self::String(s), Self::Date)
            }
            (ValueType::Time, Self::String(s)) => {
                parse_time(&s).map_or(Self::String(s), Self::Time)
            }
            (ValueType::Uuid, Self::String(s)) => {
                uuid::Uuid::parse_str(&s).map_or(Self::String(s), Self::Uuid)
            }
            (ValueType::Uuid, Self::Bytes(b)) => {
                uuid::Uuid::from_slice(&b).map_or(Self::Bytes(b), Self::Uuid)
            }
            (ValueType::Json, Self::String(s)) => {
                serde_json::from_str(&s).map_or(Self::String(s), Self::Json)
            }
            (_, v) => v,
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// A normalized key used to batch `IN (...)` queries and stitch rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    /// Any integer-family key.
    Int(i64),
    /// Text and UUID keys.
    Text(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_integers() {
        assert_eq!(Value::from(42_i32), Value::Int(42));
        assert_eq!(Value::from(42_i64), Value::Int(42));
        assert_eq!(Value::from(42_u32), Value::Int(42));
    }

    #[test]
    fn test_from_option() {
        let some_val: Option<i64> = Some(42);
        assert_eq!(Value::from(some_val), Value::Int(42));

        let none_val: Option<i64> = None;
        assert_eq!(Value::from(none_val), Value::Null);
    }

    #[test]
    fn test_display_list() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(list.to_string(), "[1, 2, 3]");
    }

    #[test]
    fn test_is_zero() {
        assert!(Value::Null.is_zero());
        assert!(Value::Int(0).is_zero());
        assert!(Value::from("").is_zero());
        assert!(Value::Bool(false).is_zero());
        assert!(!Value::Int(3).is_zero());
        assert!(!Value::from("x").is_zero());
        assert!(Value::Uuid(uuid::Uuid::nil()).is_zero());
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(Value::Int(3).key(), Some(KeyValue::Int(3)));
        assert_eq!(Value::Bool(true).key(), Some(KeyValue::Int(1)));
        let u = uuid::Uuid::new_v4();
        assert_eq!(Value::Uuid(u).key(), Some(KeyValue::Text(u.to_string())));
        assert_eq!(Value::Float(1.5).key(), None);
    }

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![KeyValue::Int(3), KeyValue::Int(1), KeyValue::Int(2)];
        keys.sort();
        assert_eq!(keys, vec![KeyValue::Int(1), KeyValue::Int(2), KeyValue::Int(3)]);
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(Value::Int(1).coerce(ValueType::Bool), Value::Bool(true));
        assert_eq!(Value::Int(0).coerce(ValueType::Bool), Value::Bool(false));
    }

    #[test]
    fn test_coerce_datetime() {
        let v = Value::from("2024-01-15 12:30:00").coerce(ValueType::DateTime);
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(v, Value::DateTime(expected));
    }

    #[test]
    fn test_coerce_datetime_fractional() {
        let v = Value::from("2024-01-15 12:30:00.250").coerce(ValueType::DateTime);
        assert!(v.as_datetime().is_some());
    }

    #[test]
    fn test_coerce_date_and_time() {
        let d = Value::from("2024-02-29").coerce(ValueType::Date);
        assert_eq!(d, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
        let t = Value::from("08:15:00").coerce(ValueType::Time);
        assert_eq!(t, Value::Time(NaiveTime::from_hms_opt(8, 15, 0).unwrap()));
    }

    #[test]
    fn test_coerce_leaves_unparseable() {
        let v = Value::from("not a date").coerce(ValueType::DateTime);
        assert_eq!(v, Value::from("not a date"));
    }

    #[test]
    fn test_coerce_null_stays_null() {
        assert_eq!(Value::Null.coerce(ValueType::Int), Value::Null);
    }

    #[test]
    fn test_keyvalue_into_value() {
        assert_eq!(Value::from(KeyValue::Int(4)), Value::Int(4));
        assert_eq!(Value::from(KeyValue::Text("k".into())), Value::from("k"));
    }
}
