use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DataTypeConversionError;
use crate::path::{self, Path, PathError};

/// Any datum flowing through fixtures: typed literals, comparison specials and nested data.
///
/// Equality is not structural for [`Value::Wildcard`] and [`Value::Pattern`]: they compare
/// equal to every value they accept. Map equality ignores key order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(String),
    Bytes(Vec<u8>),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Wildcard(Wildcard),
    Pattern(Pattern),
    Map(IndexMap<String, Value>),
    Sequence(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Any,
    Bool,
    Int,
    Float,
    Decimal,
    Bytes,
    Text,
    Date,
    Time,
    DateTime,
    Map,
    Sequence,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Any => "any",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Decimal => "decimal",
            Kind::Bytes => "bytes",
            Kind::Text => "str",
            Kind::Date => "date",
            Kind::Time => "time",
            Kind::DateTime => "datetime",
            Kind::Map => "dict",
            Kind::Sequence => "list",
        };
        f.write_str(s)
    }
}

/// Matches any value of `kind`, and `None` only when `permits_none` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wildcard {
    pub kind: Kind,
    pub permits_none: bool,
}

impl Wildcard {
    pub fn new(kind: Kind, permits_none: bool) -> Self {
        Self { kind, permits_none }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match value {
            Value::Null => self.permits_none,
            Value::Wildcard(other) => other.kind == self.kind,
            v => match self.kind {
                Kind::Any => true,
                Kind::Bool => matches!(v, Value::Bool(_)),
                Kind::Int => matches!(v, Value::Int(_)),
                Kind::Float => matches!(v, Value::Float(_) | Value::Int(_)),
                Kind::Decimal => match v {
                    Value::Decimal(_) | Value::Int(_) | Value::Float(_) => true,
                    Value::Text(t) => normalize_decimal(t).is_some(),
                    _ => false,
                },
                Kind::Bytes => matches!(v, Value::Bytes(_) | Value::Text(_)),
                Kind::Text => matches!(v, Value::Text(_)),
                Kind::Date => match v {
                    Value::Date(_) => true,
                    Value::Text(t) => parse_date(t).is_some(),
                    _ => false,
                },
                Kind::Time => match v {
                    Value::Time(_) => true,
                    Value::Text(t) => parse_time(t).is_some(),
                    _ => false,
                },
                Kind::DateTime => match v {
                    Value::DateTime(_) => true,
                    Value::Text(t) => parse_datetime(t).is_some(),
                    _ => false,
                },
                Kind::Map => matches!(v, Value::Map(_)),
                Kind::Sequence => matches!(v, Value::Sequence(_)),
            },
        }
    }
}

impl fmt::Display for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<any {}", self.kind)?;
        if self.permits_none {
            f.write_str(" or None")?;
        }
        f.write_str(">")
    }
}

/// A regular expression a text value must (or, negated, must not) match.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub regex: Regex,
    pub negate: bool,
}

impl Pattern {
    pub fn accepts(&self, value: &Value) -> bool {
        match value {
            Value::Text(t) => self.regex.is_match(t) != self.negate,
            _ => false,
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.negate == other.negate && self.regex.as_str() == other.regex.as_str()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            f.write_str("not ")?;
        }
        write!(f, "/{}/", self.regex.as_str())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Wildcard(a), Value::Wildcard(b)) => a.kind == b.kind,
            (Value::Wildcard(w), v) | (v, Value::Wildcard(w)) => w.accepts(v),
            (Value::Pattern(a), Value::Pattern(b)) => a == b,
            (Value::Pattern(p), v) | (v, Value::Pattern(p)) => p.accepts(v),
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Decimal(a), Value::Decimal(b)) => normalize_decimal(a) == normalize_decimal(b),
            (Value::Decimal(d), Value::Text(t)) | (Value::Text(t), Value::Decimal(d)) => {
                normalize_decimal(t).is_some() && normalize_decimal(t) == normalize_decimal(d)
            }
            (Value::Decimal(d), Value::Int(i)) | (Value::Int(i), Value::Decimal(d)) => {
                d.parse::<f64>().ok() == Some(*i as f64)
            }
            (Value::Decimal(d), Value::Float(x)) | (Value::Float(x), Value::Decimal(d)) => {
                d.parse::<f64>().ok() == Some(*x)
            }
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Bytes(b), Value::Text(t)) | (Value::Text(t), Value::Bytes(b)) => {
                b.as_slice() == t.as_bytes()
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Date(d), Value::Text(t)) | (Value::Text(t), Value::Date(d)) => {
                parse_date(t) == Some(*d)
            }
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Time(x), Value::Text(t)) | (Value::Text(t), Value::Time(x)) => {
                parse_time(t) == Some(*x)
            }
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::DateTime(x), Value::Text(t)) | (Value::Text(t), Value::DateTime(x)) => {
                parse_datetime(t) == Some(*x)
            }
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn map() -> Self {
        Value::Map(IndexMap::new())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// An empty map or sequence.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Map(m) => m.is_empty(),
            Value::Sequence(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// The runtime kind. Wildcards report their declared kind, patterns report text.
    pub fn kind(&self) -> Option<Kind> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Decimal(_) => Kind::Decimal,
            Value::Bytes(_) => Kind::Bytes,
            Value::Text(_) | Value::Pattern(_) => Kind::Text,
            Value::Date(_) => Kind::Date,
            Value::Time(_) => Kind::Time,
            Value::DateTime(_) => Kind::DateTime,
            Value::Wildcard(w) => w.kind,
            Value::Map(_) => Kind::Map,
            Value::Sequence(_) => Kind::Sequence,
        })
    }

    pub fn get_path(&self, path: &Path) -> Result<&Value, PathError> {
        path::get(self, path)
    }

    pub fn put_path(&mut self, path: &Path, value: Value) -> Result<(), PathError> {
        path::put(self, path, value)
    }

    /// Convenience for call sites holding a path string.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        Path::parse(path).ok().and_then(|p| path::get(self, &p).ok())
    }

    /// Recursively merge `overlay` into `self`. Maps merge key by key, anything else is
    /// replaced by the overlay.
    pub fn deep_merge(&mut self, overlay: Value) {
        match (self, overlay) {
            (Value::Map(base), Value::Map(over)) => {
                for (k, v) in over {
                    match base.get_mut(&k) {
                        Some(existing) => existing.deep_merge(v),
                        None => {
                            base.insert(k, v);
                        }
                    }
                }
            }
            (slot, over) => *slot = over,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Decimal(d) => f.write_str(d),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Text(t) => f.write_str(t),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::Wildcard(w) => write!(f, "{w}"),
            Value::Pattern(p) => write!(f, "{p}"),
            Value::Map(_) | Value::Sequence(_) => {
                let json: serde_json::Value = self.clone().into();
                write!(f, "{json}")
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        use serde_json::Value as J;
        match v {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(b),
            Value::Int(i) => J::from(i),
            Value::Float(x) => serde_json::Number::from_f64(x).map_or(J::Null, J::Number),
            Value::Map(m) => J::Object(m.into_iter().map(|(k, v)| (k, v.into())).collect()),
            Value::Sequence(s) => J::Array(s.into_iter().map(J::from).collect()),
            other => J::String(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

/// The type keyword of a typed literal such as `input int: id: 12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int,
    Float,
    Decimal,
    Bool,
    Bytes,
    Str,
    EmptyStr,
    EmptyList,
    EmptyDict,
    None,
    DateTime,
    Date,
    Time,
    Regex,
    NotRegex,
}

/// Regex alternation of every type keyword. Longer keywords come first where they share a prefix.
pub const TYPE_KEYWORDS: &str = "int|float|decimal|bool|bytes|encoded_unicode|str|emptystr|emptylist|emptydict|none|None|datetime|date|time|regex|not regex";

impl FromStr for DataType {
    type Err = DataTypeConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "int" => DataType::Int,
            "float" => DataType::Float,
            "decimal" => DataType::Decimal,
            "bool" => DataType::Bool,
            "bytes" => DataType::Bytes,
            "str" | "encoded_unicode" => DataType::Str,
            "emptystr" => DataType::EmptyStr,
            "emptylist" => DataType::EmptyList,
            "emptydict" => DataType::EmptyDict,
            "none" | "None" => DataType::None,
            "datetime" => DataType::DateTime,
            "date" => DataType::Date,
            "time" => DataType::Time,
            "regex" => DataType::Regex,
            "not regex" => DataType::NotRegex,
            other => {
                return Err(DataTypeConversionError {
                    data_type: other.to_string(),
                    value: String::new(),
                    reason: "unknown data type".into(),
                });
            }
        })
    }
}

impl DataType {
    /// Types that carry their value in the keyword itself.
    pub fn needs_value(self) -> bool {
        !matches!(
            self,
            DataType::EmptyStr | DataType::EmptyList | DataType::EmptyDict | DataType::None
        )
    }

    pub fn kind(self) -> Kind {
        match self {
            DataType::Int => Kind::Int,
            DataType::Float => Kind::Float,
            DataType::Decimal => Kind::Decimal,
            DataType::Bool => Kind::Bool,
            DataType::Bytes => Kind::Bytes,
            DataType::Str | DataType::EmptyStr | DataType::Regex | DataType::NotRegex => Kind::Text,
            DataType::EmptyList => Kind::Sequence,
            DataType::EmptyDict => Kind::Map,
            DataType::None => Kind::Any,
            DataType::DateTime => Kind::DateTime,
            DataType::Date => Kind::Date,
            DataType::Time => Kind::Time,
        }
    }

    /// Coerce the raw literal text to a value of this type.
    pub fn coerce(self, raw: Option<&str>) -> Result<Value, DataTypeConversionError> {
        let raw = raw.unwrap_or("").trim();
        let fail = |reason: &str| DataTypeConversionError {
            data_type: self.keyword().to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };
        if self.needs_value() && raw.is_empty() && self != DataType::Str {
            return Err(fail("a value is required"));
        }
        Ok(match self {
            DataType::Int => Value::Int(raw.parse().map_err(|_| fail("not an integer"))?),
            DataType::Float => Value::Float(raw.parse().map_err(|_| fail("not a number"))?),
            DataType::Decimal => {
                normalize_decimal(raw).ok_or_else(|| fail("not a decimal"))?;
                Value::Decimal(raw.trim_start_matches('+').to_string())
            }
            DataType::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => return Err(fail("expected true or false")),
            },
            DataType::Bytes => Value::Bytes(raw.as_bytes().to_vec()),
            DataType::Str => Value::Text(raw.to_string()),
            DataType::EmptyStr => Value::Text(String::new()),
            DataType::EmptyList => Value::Sequence(Vec::new()),
            DataType::EmptyDict => Value::map(),
            DataType::None => Value::Null,
            DataType::DateTime => {
                Value::DateTime(parse_datetime(raw).ok_or_else(|| fail("not a datetime"))?)
            }
            DataType::Date => Value::Date(parse_date(raw).ok_or_else(|| fail("not a date"))?),
            DataType::Time => Value::Time(parse_time(raw).ok_or_else(|| fail("not a time"))?),
            DataType::Regex | DataType::NotRegex => Value::Pattern(Pattern {
                regex: Regex::new(raw).map_err(|e| fail(&e.to_string()))?,
                negate: self == DataType::NotRegex,
            }),
        })
    }

    pub fn keyword(self) -> &'static str {
        match self {
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Decimal => "decimal",
            DataType::Bool => "bool",
            DataType::Bytes => "bytes",
            DataType::Str => "str",
            DataType::EmptyStr => "emptystr",
            DataType::EmptyList => "emptylist",
            DataType::EmptyDict => "emptydict",
            DataType::None => "None",
            DataType::DateTime => "datetime",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::Regex => "regex",
            DataType::NotRegex => "not regex",
        }
    }
}

/// Coerce `raw` using an optional type keyword; no keyword means `str`.
pub fn typed_value(data_type: Option<&str>, raw: Option<&str>) -> Result<Value, DataTypeConversionError> {
    let data_type = match data_type {
        Some(t) => t.parse::<DataType>()?,
        None => DataType::Str,
    };
    data_type.coerce(raw)
}

/// Canonical form of a decimal literal, or `None` if `s` is not one.
fn normalize_decimal(s: &str) -> Option<String> {
    let s = s.trim();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let mut out = String::new();
    if negative && !(int_part.is_empty() && frac_part.is_empty()) {
        out.push('-');
    }
    out.push_str(if int_part.is_empty() { "0" } else { int_part });
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    Some(out)
}

/// ISO-8601 datetime, or one of `now`, `utc_now`, `midnight`.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    match s {
        "now" => return Some(Local::now().naive_local()),
        "utc_now" => return Some(Utc::now().naive_utc()),
        "midnight" => return Local::now().date_naive().and_hms_opt(0, 0, 0),
        _ => {}
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    match s.trim() {
        "today" => Some(Local::now().date_naive()),
        s => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
    }
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    match s.trim() {
        "now" => Some(Local::now().time()),
        s => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .ok(),
    }
}
