//! Runtime values produced by evaluation.
//!
//! Scalars are owned. `List` and `ClassAd` alias nodes of the [`Arena`]
//! by id, so cloning a value never copies the structure it refers to.
//!
//! [`Arena`]: crate::ast::Arena

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

use crate::ast::ExprId;

/// A point in time: seconds since the Unix epoch plus the zone offset (in
/// seconds east of UTC) it is displayed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbsTime {
    pub secs: i64,
    pub offset: i32,
}

impl AbsTime {
    pub fn new(secs: i64, offset: i32) -> Self {
        Self { secs, offset }
    }

    /// The time as a chrono date in its own zone
    pub fn to_datetime(self) -> Option<DateTime<FixedOffset>> {
        let zone = FixedOffset::east_opt(self.offset)?;
        zone.timestamp_opt(self.secs, 0).single()
    }

    /// Parse RFC 3339 (`2024-05-01T12:00:00+02:00`), or a zone-less
    /// `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS` taken in `default_offset`.
    pub fn parse(text: &str, default_offset: i32) -> Option<AbsTime> {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(AbsTime::new(dt.timestamp(), dt.offset().local_minus_utc()));
        }
        let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
            .ok()?;
        let zone = FixedOffset::east_opt(default_offset)?;
        let local = zone.from_local_datetime(&naive).single()?;
        Some(AbsTime::new(local.timestamp(), default_offset))
    }
}

impl fmt::Display for AbsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%:z")),
            None => {
                let utc = Utc.timestamp_opt(self.secs, 0).single();
                match utc {
                    Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S+00:00")),
                    None => write!(f, "{}", self.secs),
                }
            }
        }
    }
}

/// Render a duration as `[-][D+]HH:MM:SS`
pub fn format_rel_time(secs: i64) -> String {
    let sign = if secs < 0 { "-" } else { "" };
    let total = secs.unsigned_abs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{}{}+{:02}:{:02}:{:02}", sign, days, hours, minutes, seconds)
    } else {
        format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds)
    }
}

/// Parse `[-][D+]HH:MM:SS`, `[-]MM:SS` or plain `[-]seconds`
pub fn parse_rel_time(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (days, clock) = match body.split_once('+') {
        Some((d, rest)) => (d.trim().parse::<i64>().ok()?, rest),
        None => (0, body),
    };
    let mut secs: i64 = 0;
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    for part in &parts {
        let n: i64 = part.trim().parse().ok()?;
        if n < 0 {
            return None;
        }
        secs = secs.checked_mul(60)?.checked_add(n)?;
    }
    let total = days.checked_mul(86_400)?.checked_add(secs)?;
    Some(if negative { -total } else { total })
}

/// Escape a string for double-quoted source text
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// The result of evaluating an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Valid but unresolvable in this scope
    Undefined,
    /// Semantically invalid
    Error,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(String),
    AbsTime(AbsTime),
    /// Signed duration in seconds
    RelTime(i64),
    /// Alias of an `ExprKind::List` node
    List(ExprId),
    /// Alias of an `ExprKind::ClassAd` node
    ClassAd(ExprId),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Error => "error",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::String(_) => "string",
            Value::AbsTime(_) => "absolute time",
            Value::RelTime(_) => "relative time",
            Value::List(_) => "list",
            Value::ClassAd(_) => "classad",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error)
    }

    /// Undefined or Error
    pub fn is_exceptional(&self) -> bool {
        matches!(self, Value::Undefined | Value::Error)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Real(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer or real, widened to `f64`
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Real(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_abs_time(&self) -> Option<AbsTime> {
        match self {
            Value::AbsTime(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_rel_time(&self) -> Option<i64> {
        match self {
            Value::RelTime(secs) => Some(*secs),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<ExprId> {
        match self {
            Value::List(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_classad(&self) -> Option<ExprId> {
        match self {
            Value::ClassAd(id) => Some(*id),
            _ => None,
        }
    }

    /// `=?=` identity: same kind and same payload. Strings compare
    /// case-sensitively, lists and records by node identity.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Real(a), Value::Real(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    /// Scalars print as source literals; lists and records print a
    /// placeholder (the unparser renders their contents).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Error => write!(f, "error"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Real(n) => write!(f, "{:?}", n),
            Value::String(s) => write!(f, "{}", quote(s)),
            Value::AbsTime(t) => write!(f, "absTime({})", quote(&t.to_string())),
            Value::RelTime(secs) => write!(f, "relTime({})", quote(&format_rel_time(*secs))),
            Value::List(id) => write!(f, "{{...}}{}", id),
            Value::ClassAd(id) => write!(f, "[...]{}", id),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Real(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<AbsTime> for Value {
    fn from(t: AbsTime) -> Self {
        Value::AbsTime(t)
    }
}
