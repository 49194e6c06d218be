//! Built-in functions
//!
//! The table is a sorted `static`, so resolving a call is a binary search
//! on the lowercased name and needs no initialization. Calls with the wrong
//! number or type of arguments evaluate to `error`.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::{self, Write as _};

use chrono::{DateTime, Datelike, FixedOffset, Local, Timelike, Utc};
use regex::{Regex, RegexBuilder};

use crate::ast::{ExprId, ExprKind, OpKind};
use crate::errors::EvalResult;
use crate::unparser::Unparser;

use super::operators;
use super::scope::Lookup;
use super::value::{format_rel_time, parse_rel_time, AbsTime, Value};
use super::Evaluator;

/// Accepted argument counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::Range(lo, hi) => (lo..=hi).contains(&count),
            Arity::AtLeast(n) => count >= n,
        }
    }
}

/// How a built-in receives its arguments
#[derive(Clone, Copy)]
pub(crate) enum Call {
    /// Arguments are evaluated first
    Eager(fn(&mut Evaluator<'_>, &[Value]) -> EvalResult<Value>),
    /// The function evaluates the argument expressions it needs
    Lazy(fn(&mut Evaluator<'_>, &[ExprId]) -> EvalResult<Value>),
}

/// An entry of the function table
pub struct Builtin {
    pub name: &'static str,
    pub arity: Arity,
    pub(crate) call: Call,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

const fn eager(
    name: &'static str,
    arity: Arity,
    call: fn(&mut Evaluator<'_>, &[Value]) -> EvalResult<Value>,
) -> Builtin {
    Builtin {
        name,
        arity,
        call: Call::Eager(call),
    }
}

const fn lazy(
    name: &'static str,
    arity: Arity,
    call: fn(&mut Evaluator<'_>, &[ExprId]) -> EvalResult<Value>,
) -> Builtin {
    Builtin {
        name,
        arity,
        call: Call::Lazy(call),
    }
}

/// Sorted by lowercased name
static BUILTINS: &[Builtin] = &[
    eager("absTime", Arity::Range(0, 2), builtin_abs_time),
    eager("allCompare", Arity::Exact(3), builtin_all_compare),
    eager("anyCompare", Arity::Exact(3), builtin_any_compare),
    eager("avg", Arity::Exact(1), builtin_avg),
    eager("bool", Arity::Exact(1), builtin_bool),
    eager("ceil", Arity::Exact(1), builtin_ceil),
    eager("ceiling", Arity::Exact(1), builtin_ceil),
    eager("currentTime", Arity::Exact(0), builtin_current_time),
    eager("dayTime", Arity::Exact(0), builtin_day_time),
    eager("floor", Arity::Exact(1), builtin_floor),
    eager("formatTime", Arity::Range(0, 2), builtin_format_time),
    eager("getDayOfMonth", Arity::Exact(1), builtin_get_day_of_month),
    eager("getDayOfWeek", Arity::Exact(1), builtin_get_day_of_week),
    eager("getDayOfYear", Arity::Exact(1), builtin_get_day_of_year),
    eager("getDays", Arity::Exact(1), builtin_get_days),
    eager("getHours", Arity::Exact(1), builtin_get_hours),
    eager("getMinutes", Arity::Exact(1), builtin_get_minutes),
    eager("getMonth", Arity::Exact(1), builtin_get_month),
    eager("getSeconds", Arity::Exact(1), builtin_get_seconds),
    eager("getYear", Arity::Exact(1), builtin_get_year),
    eager("identicalMember", Arity::Exact(2), builtin_identical_member),
    lazy("ifThenElse", Arity::Exact(3), builtin_if_then_else),
    eager("int", Arity::Exact(1), builtin_int),
    eager("interval", Arity::Exact(1), builtin_interval),
    eager("isAbsTime", Arity::Exact(1), builtin_is_abs_time),
    eager("isBoolean", Arity::Exact(1), builtin_is_boolean),
    eager("isClassAd", Arity::Exact(1), builtin_is_classad),
    eager("isError", Arity::Exact(1), builtin_is_error),
    eager("isInteger", Arity::Exact(1), builtin_is_integer),
    eager("isList", Arity::Exact(1), builtin_is_list),
    eager("isReal", Arity::Exact(1), builtin_is_real),
    eager("isRelTime", Arity::Exact(1), builtin_is_rel_time),
    eager("isString", Arity::Exact(1), builtin_is_string),
    eager("isUndefined", Arity::Exact(1), builtin_is_undefined),
    eager("join", Arity::AtLeast(0), builtin_join),
    eager("max", Arity::Exact(1), builtin_max),
    eager("member", Arity::Exact(2), builtin_member),
    eager("min", Arity::Exact(1), builtin_min),
    eager("pow", Arity::Exact(2), builtin_pow),
    eager("quantize", Arity::Exact(2), builtin_quantize),
    eager("real", Arity::Exact(1), builtin_real),
    eager("regexp", Arity::Range(2, 3), builtin_regexp),
    eager("regexpMember", Arity::Range(2, 3), builtin_regexp_member),
    eager("regexps", Arity::Range(3, 4), builtin_regexps),
    eager("relTime", Arity::Exact(1), builtin_rel_time),
    eager("replace", Arity::Range(3, 4), builtin_replace),
    eager("replaceAll", Arity::Range(3, 4), builtin_replace_all),
    eager("round", Arity::Exact(1), builtin_round),
    eager("size", Arity::Exact(1), builtin_size),
    eager("strcat", Arity::AtLeast(0), builtin_strcat),
    eager("strcmp", Arity::Exact(2), builtin_strcmp),
    eager("stricmp", Arity::Exact(2), builtin_stricmp),
    eager("string", Arity::Exact(1), builtin_string),
    eager("stringListsIntersect", Arity::Range(2, 3), builtin_string_lists_intersect),
    eager("substr", Arity::Range(2, 3), builtin_substr),
    eager("sum", Arity::Exact(1), builtin_sum),
    eager("time", Arity::Exact(0), builtin_time),
    eager("timeZoneOffset", Arity::Exact(0), builtin_time_zone_offset),
    eager("toLower", Arity::Exact(1), builtin_to_lower),
    eager("toUpper", Arity::Exact(1), builtin_to_upper),
    lazy("unparse", Arity::Exact(1), builtin_unparse),
    lazy("unresolved", Arity::Range(1, 2), builtin_unresolved),
    eager("version_in_range", Arity::Exact(3), builtin_version_in_range),
    eager("versioncmp", Arity::Exact(2), builtin_versioncmp),
    eager("versionEQ", Arity::Exact(2), builtin_version_eq),
    eager("versionGE", Arity::Exact(2), builtin_version_ge),
    eager("versionGT", Arity::Exact(2), builtin_version_gt),
    eager("versionLE", Arity::Exact(2), builtin_version_le),
    eager("versionLT", Arity::Exact(2), builtin_version_lt),
];

fn cmp_lowercase(name: &str, key: &str) -> Ordering {
    name.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(key.bytes().map(|c| c.to_ascii_lowercase()))
}

/// Resolve a function name, ignoring case
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS
        .binary_search_by(|builtin| cmp_lowercase(builtin.name, name))
        .ok()
        .map(|index| &BUILTINS[index])
}

/// Names of every built-in, in table order
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|builtin| builtin.name)
}

// --- shared conversions ---

/// Text form used by `string()`, `strcat()` and the string comparisons.
/// `None` for `undefined` and `error`.
fn to_text(evaluator: &Evaluator<'_>, value: &Value) -> Option<String> {
    match value {
        Value::Undefined | Value::Error => None,
        Value::String(s) => Some(s.clone()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Integer(n) => Some(n.to_string()),
        Value::Real(r) => Some(format!("{:?}", r)),
        Value::AbsTime(t) => Some(t.to_string()),
        Value::RelTime(secs) => Some(format_rel_time(*secs)),
        Value::List(id) | Value::ClassAd(id) => Some(Unparser::new(evaluator.arena()).expr(*id)),
    }
}

/// Truncate a real to an integer, or error when it does not fit
fn real_to_int(r: f64) -> Value {
    if r.is_finite() && r >= i64::MIN as f64 && r < i64::MAX as f64 {
        Value::Integer(r as i64)
    } else {
        Value::Error
    }
}

fn to_int(value: &Value) -> Value {
    match value {
        Value::Undefined => Value::Undefined,
        Value::Integer(n) => Value::Integer(*n),
        Value::Real(r) => real_to_int(r.trunc()),
        Value::Boolean(b) => Value::Integer(i64::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(n) => Value::Integer(n),
                Err(_) => match s.parse::<f64>() {
                    Ok(r) => real_to_int(r.trunc()),
                    Err(_) => Value::Error,
                },
            }
        }
        Value::AbsTime(t) => Value::Integer(t.secs),
        Value::RelTime(secs) => Value::Integer(*secs),
        Value::Error | Value::List(_) | Value::ClassAd(_) => Value::Error,
    }
}

fn to_real(value: &Value) -> Value {
    match value {
        Value::Undefined => Value::Undefined,
        Value::Integer(n) => Value::Real(*n as f64),
        Value::Real(r) => Value::Real(*r),
        Value::Boolean(b) => Value::Real(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(r) if r.is_finite() => Value::Real(r),
            _ => Value::Error,
        },
        Value::AbsTime(t) => Value::Real(t.secs as f64),
        Value::RelTime(secs) => Value::Real(*secs as f64),
        Value::Error | Value::List(_) | Value::ClassAd(_) => Value::Error,
    }
}

/// Error if any argument is error, else undefined if any is undefined
fn exceptional(args: &[Value]) -> Option<Value> {
    if args.iter().any(Value::is_error) {
        Some(Value::Error)
    } else if args.iter().any(Value::is_undefined) {
        Some(Value::Undefined)
    } else {
        None
    }
}

fn list_items<'a>(evaluator: &Evaluator<'a>, list: ExprId) -> &'a [ExprId] {
    evaluator
        .arena()
        .get(list)
        .and_then(|node| node.as_list())
        .unwrap_or_default()
}

fn local_offset() -> i32 {
    Local::now().offset().local_minus_utc()
}

// --- type predicates ---

/// isUndefined(x) -> bool
fn builtin_is_undefined(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(args[0].is_undefined()))
}

/// isError(x) -> bool
fn builtin_is_error(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(args[0].is_error()))
}

fn builtin_is_string(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(args[0], Value::String(_))))
}

fn builtin_is_integer(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(args[0], Value::Integer(_))))
}

fn builtin_is_real(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(args[0], Value::Real(_))))
}

fn builtin_is_list(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(args[0], Value::List(_))))
}

fn builtin_is_classad(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(args[0], Value::ClassAd(_))))
}

fn builtin_is_boolean(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(args[0], Value::Boolean(_))))
}

fn builtin_is_abs_time(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(args[0], Value::AbsTime(_))))
}

fn builtin_is_rel_time(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(args[0], Value::RelTime(_))))
}

// --- lists ---

fn membership(evaluator: &mut Evaluator<'_>, args: &[Value], identical: bool) -> EvalResult<Value> {
    let (item, list) = (&args[0], &args[1]);
    let list = match list {
        Value::List(id) => *id,
        Value::Undefined => return Ok(Value::Undefined),
        _ => return Ok(Value::Error),
    };
    match item {
        Value::List(_) | Value::ClassAd(_) => return Ok(Value::Error),
        Value::Undefined | Value::Error if !identical => return Ok(item.clone()),
        _ => {}
    }
    for element in list_items(evaluator, list) {
        let value = evaluator.evaluate_element(*element)?;
        let hit = if identical {
            item.is_identical(&value)
        } else {
            operators::binary(OpKind::Eq, item.clone(), value) == Value::Boolean(true)
        };
        if hit {
            return Ok(Value::Boolean(true));
        }
    }
    Ok(Value::Boolean(false))
}

/// member(x, list) -> bool, comparing with `==`
fn builtin_member(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    membership(evaluator, args, false)
}

/// identicalMember(x, list) -> bool, comparing with `=?=`
fn builtin_identical_member(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    membership(evaluator, args, true)
}

/// size(list | record | string) -> int
fn builtin_size(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let arena = evaluator.arena();
    Ok(match &args[0] {
        Value::Undefined => Value::Undefined,
        Value::List(id) => Value::Integer(list_items(evaluator, *id).len() as i64),
        Value::ClassAd(id) => arena
            .record(*id)
            .map_or(Value::Error, |record| Value::Integer(record.len() as i64)),
        Value::String(s) => Value::Integer(s.chars().count() as i64),
        _ => Value::Error,
    })
}

/// The numeric elements of a list argument, skipping undefined ones.
/// `Err` carries the function result when the list cannot be aggregated.
fn numeric_elements(evaluator: &mut Evaluator<'_>, arg: &Value) -> EvalResult<Result<Vec<Value>, Value>> {
    let list = match arg {
        Value::List(id) => *id,
        Value::Undefined => return Ok(Err(Value::Undefined)),
        _ => return Ok(Err(Value::Error)),
    };
    let mut numbers = Vec::new();
    for element in list_items(evaluator, list) {
        match evaluator.evaluate_element(*element)? {
            Value::Undefined => {}
            value if value.is_number() => numbers.push(value),
            _ => return Ok(Err(Value::Error)),
        }
    }
    Ok(Ok(numbers))
}

fn total(numbers: Vec<Value>) -> Value {
    numbers
        .into_iter()
        .fold(Value::Integer(0), |acc, n| operators::binary(OpKind::Add, acc, n))
}

/// sum(list) -> number; 0 for an empty list
fn builtin_sum(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(match numeric_elements(evaluator, &args[0])? {
        Ok(numbers) => total(numbers),
        Err(value) => value,
    })
}

/// avg(list) -> real; undefined for an empty list
fn builtin_avg(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(match numeric_elements(evaluator, &args[0])? {
        Ok(numbers) if numbers.is_empty() => Value::Undefined,
        Ok(numbers) => {
            let count = Value::Real(numbers.len() as f64);
            operators::binary(OpKind::Div, total(numbers), count)
        }
        Err(value) => value,
    })
}

fn extreme(evaluator: &mut Evaluator<'_>, arg: &Value, wanted: OpKind) -> EvalResult<Value> {
    Ok(match numeric_elements(evaluator, arg)? {
        Ok(numbers) => numbers.into_iter().fold(Value::Undefined, |best, n| {
            if best.is_undefined()
                || operators::binary(wanted, n.clone(), best.clone()) == Value::Boolean(true)
            {
                n
            } else {
                best
            }
        }),
        Err(value) => value,
    })
}

/// min(list) -> number; undefined for an empty list
fn builtin_min(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    extreme(evaluator, &args[0], OpKind::Lt)
}

/// max(list) -> number; undefined for an empty list
fn builtin_max(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    extreme(evaluator, &args[0], OpKind::Gt)
}

/// Compare every element of a list against a value with the operator
/// named by the first argument. An undefined comparison ends the scan
/// with false.
fn list_compare(evaluator: &mut Evaluator<'_>, args: &[Value], all: bool) -> EvalResult<Value> {
    let op = match &args[0] {
        Value::Undefined => return Ok(Value::Undefined),
        Value::String(op) => match op.as_str() {
            "<" => OpKind::Lt,
            "<=" => OpKind::Le,
            "!=" => OpKind::Ne,
            "==" => OpKind::Eq,
            ">" => OpKind::Gt,
            ">=" => OpKind::Ge,
            "is" => OpKind::MetaEq,
            "isnt" => OpKind::MetaNe,
            _ => return Ok(Value::Error),
        },
        _ => return Ok(Value::Error),
    };
    let list = match &args[1] {
        Value::List(id) => *id,
        Value::Undefined => return Ok(Value::Undefined),
        _ => return Ok(Value::Error),
    };
    for element in list_items(evaluator, list) {
        let value = evaluator.evaluate_element(*element)?;
        match operators::binary(op, value, args[2].clone()) {
            Value::Boolean(hit) if hit != all => return Ok(Value::Boolean(hit)),
            Value::Boolean(_) => {}
            Value::Undefined => return Ok(Value::Boolean(false)),
            _ => return Ok(Value::Error),
        }
    }
    Ok(Value::Boolean(all))
}

/// anyCompare(op, list, x) -> bool; false for an empty list
fn builtin_any_compare(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    list_compare(evaluator, args, false)
}

/// allCompare(op, list, x) -> bool; true for an empty list
fn builtin_all_compare(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    list_compare(evaluator, args, true)
}

// --- strings ---

/// strcat(x, ...) -> string
fn builtin_strcat(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if let Some(value) = exceptional(args) {
        return Ok(value);
    }
    let mut out = String::new();
    for arg in args {
        match to_text(evaluator, arg) {
            Some(text) => out.push_str(&text),
            None => return Ok(Value::Error),
        }
    }
    Ok(Value::String(out))
}

fn change_case(evaluator: &Evaluator<'_>, value: &Value, upper: bool) -> Value {
    match value {
        Value::Undefined | Value::Error => value.clone(),
        Value::List(_) | Value::ClassAd(_) => Value::Error,
        other => match to_text(evaluator, other) {
            Some(text) if upper => Value::String(text.to_uppercase()),
            Some(text) => Value::String(text.to_lowercase()),
            None => Value::Error,
        },
    }
}

/// toUpper(s) -> string
fn builtin_to_upper(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(change_case(evaluator, &args[0], true))
}

/// toLower(s) -> string
fn builtin_to_lower(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(change_case(evaluator, &args[0], false))
}

/// substr(s, offset[, length]) -> string
///
/// A negative offset counts from the end; a negative length leaves that
/// many characters off the end.
fn builtin_substr(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if let Some(value) = exceptional(args) {
        return Ok(value);
    }
    let (Value::String(s), Value::Integer(offset)) = (&args[0], &args[1]) else {
        return Ok(Value::Error);
    };
    let length = match args.get(2) {
        None => None,
        Some(Value::Integer(n)) => Some(*n),
        Some(_) => return Ok(Value::Error),
    };

    let chars: Vec<char> = s.chars().collect();
    let total = chars.len() as i64;
    let start = if *offset < 0 { total + offset } else { *offset }.clamp(0, total);
    let end = match length {
        None => total,
        Some(n) if n < 0 => total + n,
        Some(n) => start.saturating_add(n),
    }
    .clamp(start, total);
    Ok(Value::String(chars[start as usize..end as usize].iter().collect()))
}

fn string_compare(evaluator: &Evaluator<'_>, args: &[Value], ignore_case: bool) -> Value {
    if let Some(value) = exceptional(args) {
        return value;
    }
    let (Some(a), Some(b)) = (to_text(evaluator, &args[0]), to_text(evaluator, &args[1])) else {
        return Value::Error;
    };
    let ordering = if ignore_case {
        a.to_lowercase().cmp(&b.to_lowercase())
    } else {
        a.cmp(&b)
    };
    Value::Integer(match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

/// strcmp(a, b) -> int
fn builtin_strcmp(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(string_compare(evaluator, args, false))
}

/// stricmp(a, b) -> int, ignoring case
fn builtin_stricmp(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(string_compare(evaluator, args, true))
}

/// join(separator, x, ...) or join([separator,] list) -> string.
/// Undefined items are skipped; undefined when nothing is left.
fn builtin_join(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let mut parts = args.to_vec();
    if let [.., Value::List(list)] = args {
        if args.len() <= 2 {
            let separator = match args {
                [separator, _] => separator.clone(),
                _ => Value::String(String::new()),
            };
            parts = vec![separator];
            for element in list_items(evaluator, *list) {
                parts.push(evaluator.evaluate_element(*element)?);
            }
        }
    }
    let Some((separator, items)) = parts.split_first() else {
        return Ok(Value::String(String::new()));
    };

    let mut undefined = false;
    let separator = match separator {
        Value::Undefined => {
            undefined = true;
            String::new()
        }
        other => match to_text(evaluator, other) {
            Some(text) => text,
            None => return Ok(Value::Error),
        },
    };
    let mut out = String::new();
    let mut defined = false;
    for item in items {
        if item.is_undefined() {
            undefined = true;
            continue;
        }
        let Some(text) = to_text(evaluator, item) else {
            return Ok(Value::Error);
        };
        if !out.is_empty() {
            out.push_str(&separator);
        }
        out.push_str(&text);
        defined = true;
    }
    Ok(if !defined && undefined {
        Value::Undefined
    } else {
        Value::String(out)
    })
}

fn split_items<'s>(text: &'s str, delimiters: &'s str) -> impl Iterator<Item = &'s str> + 's {
    text.split(move |c: char| delimiters.contains(c))
        .filter(|item| !item.is_empty())
}

/// stringListsIntersect(a, b[, delimiters]) -> bool; items are split on
/// any of the delimiter characters, space and comma by default
fn builtin_string_lists_intersect(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if let Some(value) = exceptional(args) {
        return Ok(value);
    }
    let (Value::String(left), Value::String(right)) = (&args[0], &args[1]) else {
        return Ok(Value::Error);
    };
    let delimiters = match args.get(2) {
        None => " ,",
        Some(Value::String(delimiters)) if !delimiters.is_empty() => delimiters.as_str(),
        Some(Value::String(_)) => " ,",
        Some(_) => return Ok(Value::Error),
    };
    let right: HashSet<&str> = split_items(right, delimiters).collect();
    Ok(Value::Boolean(
        split_items(left, delimiters).any(|item| right.contains(item)),
    ))
}

// --- versions ---

fn digit_run(text: &[u8], start: usize) -> usize {
    text[start..]
        .iter()
        .position(|c| !c.is_ascii_digit())
        .map_or(text.len(), |len| start + len)
}

fn strip_zeros(digits: &[u8]) -> &[u8] {
    let zeros = digits.iter().take_while(|&&c| c == b'0').count();
    &digits[zeros..]
}

/// Order two version strings, comparing runs of digits by their numeric
/// value and everything else byte by byte
fn version_order(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let (end_a, end_b) = (digit_run(a, i), digit_run(b, j));
            let (da, db) = (strip_zeros(&a[i..end_a]), strip_zeros(&b[j..end_b]));
            let ordering = da.len().cmp(&db.len()).then_with(|| da.cmp(db));
            if ordering != Ordering::Equal {
                return ordering;
            }
            (i, j) = (end_a, end_b);
        } else {
            if a[i] != b[j] {
                return a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

/// Order the first two arguments as versions. `Err` carries the function
/// result when they cannot be compared.
fn compare_versions(evaluator: &Evaluator<'_>, args: &[Value]) -> Result<Ordering, Value> {
    if args[..2].iter().any(Value::is_undefined) {
        return Err(Value::Undefined);
    }
    match (to_text(evaluator, &args[0]), to_text(evaluator, &args[1])) {
        (Some(a), Some(b)) => Ok(version_order(&a, &b)),
        _ => Err(Value::Error),
    }
}

fn version_test(evaluator: &Evaluator<'_>, args: &[Value], holds: fn(Ordering) -> bool) -> Value {
    compare_versions(evaluator, args).map_or_else(|value| value, |ordering| Value::Boolean(holds(ordering)))
}

/// versioncmp(a, b) -> -1, 0 or 1
fn builtin_versioncmp(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(match compare_versions(evaluator, args) {
        Ok(ordering) => Value::Integer(ordering as i64),
        Err(value) => value,
    })
}

fn builtin_version_lt(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(version_test(evaluator, args, Ordering::is_lt))
}

fn builtin_version_le(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(version_test(evaluator, args, Ordering::is_le))
}

fn builtin_version_gt(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(version_test(evaluator, args, Ordering::is_gt))
}

fn builtin_version_ge(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(version_test(evaluator, args, Ordering::is_ge))
}

fn builtin_version_eq(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(version_test(evaluator, args, Ordering::is_eq))
}

/// version_in_range(v, min, max) -> bool, inclusive at both ends
fn builtin_version_in_range(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if args[1..].iter().any(Value::is_undefined) {
        return Ok(Value::Undefined);
    }
    let texts: Option<Vec<String>> = args.iter().map(|arg| to_text(evaluator, arg)).collect();
    Ok(match texts.as_deref() {
        Some([version, min, max]) => Value::Boolean(
            version_order(min, version).is_le() && version_order(version, max).is_le(),
        ),
        _ => Value::Error,
    })
}

// --- regular expressions ---

/// Options: `i` case-insensitive, `m` multi-line, `s` dot matches newline,
/// `x` ignore whitespace in the pattern
fn build_regex(pattern: &str, flags: &str) -> Option<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag.to_ascii_lowercase() {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            _ => {}
        }
    }
    builder.build().ok()
}

/// The options argument of the regex functions; `None` when it is not a
/// string
fn regex_flags(options: Option<&Value>) -> Option<&str> {
    match options {
        None => Some(""),
        Some(Value::String(flags)) => Some(flags),
        Some(_) => None,
    }
}

/// regexp(pattern, target[, options]) -> bool
fn builtin_regexp(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if let Some(value) = exceptional(args) {
        return Ok(value);
    }
    let (Value::String(pattern), Value::String(target)) = (&args[0], &args[1]) else {
        return Ok(Value::Error);
    };
    Ok(match regex_flags(args.get(2)).and_then(|flags| build_regex(pattern, flags)) {
        Some(re) => Value::Boolean(re.is_match(target)),
        None => Value::Error,
    })
}

/// regexpMember(pattern, list[, options]) -> bool
fn builtin_regexp_member(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if let Some(value) = exceptional(args) {
        return Ok(value);
    }
    let (Value::String(pattern), Value::List(list)) = (&args[0], &args[1]) else {
        return Ok(Value::Error);
    };
    let Some(re) = regex_flags(args.get(2)).and_then(|flags| build_regex(pattern, flags)) else {
        return Ok(Value::Error);
    };
    for element in list_items(evaluator, *list) {
        match evaluator.evaluate_element(*element)? {
            Value::String(s) if re.is_match(&s) => return Ok(Value::Boolean(true)),
            Value::String(_) | Value::Undefined => {}
            _ => return Ok(Value::Error),
        }
    }
    Ok(Value::Boolean(false))
}

/// Append `replacement` to `out` with `\N` standing for capture group N.
/// False when N is not a group of the pattern.
fn expand_groups(captures: &regex::Captures<'_>, replacement: &str, out: &mut String) -> bool {
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(group) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                let group = group as usize;
                if group >= captures.len() {
                    return false;
                }
                out.push_str(captures.get(group).map_or("", |m| m.as_str()));
                continue;
            }
        }
        out.push(c);
    }
    true
}

/// Shared body of `regexps`, `replace` and `replaceAll`. Option `f` keeps
/// the unmatched text of the target, `g` replaces every match.
fn substitute(args: &[Value], implied: &str) -> Value {
    if let Some(value) = exceptional(args) {
        return value;
    }
    let (Value::String(pattern), Value::String(target), Value::String(replacement)) =
        (&args[0], &args[1], &args[2])
    else {
        return Value::Error;
    };
    let Some(flags) = regex_flags(args.get(3)).map(|flags| format!("{}{}", flags, implied)) else {
        return Value::Error;
    };
    let Some(re) = build_regex(pattern, &flags) else {
        return Value::Error;
    };
    let full = flags.contains('f');
    let global = flags.contains('g');

    let mut out = String::new();
    let mut last = 0;
    for captures in re.captures_iter(target) {
        let Some(whole) = captures.get(0) else { continue };
        if full {
            out.push_str(&target[last..whole.start()]);
        }
        if !expand_groups(&captures, replacement, &mut out) {
            return Value::Error;
        }
        last = whole.end();
        if !global {
            break;
        }
    }
    if full {
        out.push_str(&target[last..]);
    }
    Value::String(out)
}

/// regexps(pattern, target, replacement[, options]) -> the expanded
/// replacement only
fn builtin_regexps(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(substitute(args, ""))
}

/// replace(pattern, target, replacement[, options]) -> target with the
/// first match replaced
fn builtin_replace(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(substitute(args, "f"))
}

/// replaceAll(pattern, target, replacement[, options])
fn builtin_replace_all(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(substitute(args, "fg"))
}

// --- conversions ---

/// int(x) -> int, truncating reals and parsing strings
fn builtin_int(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(to_int(&args[0]))
}

/// real(x) -> real
fn builtin_real(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(to_real(&args[0]))
}

/// string(x) -> string
fn builtin_string(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(match &args[0] {
        Value::Undefined | Value::Error => args[0].clone(),
        other => to_text(evaluator, other).map_or(Value::Error, Value::String),
    })
}

/// bool(x) -> bool. Strings other than "true"/"false" give undefined.
fn builtin_bool(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(match &args[0] {
        Value::Undefined => Value::Undefined,
        Value::Boolean(b) => Value::Boolean(*b),
        Value::Integer(n) => Value::Boolean(*n != 0),
        Value::Real(r) => Value::Boolean(*r != 0.0),
        Value::RelTime(secs) => Value::Boolean(*secs != 0),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Value::Boolean(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Value::Boolean(false),
        Value::String(_) => Value::Undefined,
        Value::Error | Value::AbsTime(_) | Value::List(_) | Value::ClassAd(_) => Value::Error,
    })
}

/// Seconds from an int, real or relative time
fn seconds_of(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(n) => Some(*n),
        Value::Real(r) => real_to_int(r.trunc()).as_int(),
        Value::RelTime(secs) => Some(*secs),
        _ => None,
    }
}

/// absTime([x[, zone offset]]) -> absolute time; the current time with
/// no arguments
fn builtin_abs_time(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if args.is_empty() {
        return Ok(Value::AbsTime(AbsTime::new(Utc::now().timestamp(), local_offset())));
    }
    if let Some(value) = exceptional(args) {
        return Ok(value);
    }
    let offset = match args.get(1) {
        None => None,
        Some(arg) => match seconds_of(arg).and_then(|secs| i32::try_from(secs).ok()) {
            Some(secs) if secs.abs() < 86_400 => Some(secs),
            _ => return Ok(Value::Error),
        },
    };
    let time = match &args[0] {
        Value::AbsTime(t) => Some(AbsTime::new(t.secs, offset.unwrap_or(t.offset))),
        Value::String(s) => AbsTime::parse(s, offset.unwrap_or_else(local_offset))
            .map(|t| AbsTime::new(t.secs, offset.unwrap_or(t.offset))),
        other => seconds_of(other).map(|secs| AbsTime::new(secs, offset.unwrap_or_else(local_offset))),
    };
    Ok(time.map_or(Value::Error, Value::AbsTime))
}

/// relTime(x) -> relative time
fn builtin_rel_time(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(match &args[0] {
        Value::Undefined => Value::Undefined,
        Value::AbsTime(t) => Value::RelTime(t.secs),
        Value::String(s) => parse_rel_time(s).map_or(Value::Error, Value::RelTime),
        other => seconds_of(other).map_or(Value::Error, Value::RelTime),
    })
}

// --- rounding ---

fn rounded(value: &Value, round: fn(f64) -> f64) -> Value {
    match value {
        Value::Integer(n) => Value::Integer(*n),
        Value::Undefined => Value::Undefined,
        other => match to_real(other) {
            Value::Real(r) => real_to_int(round(r)),
            _ => Value::Error,
        },
    }
}

/// floor(x) -> int
fn builtin_floor(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(rounded(&args[0], f64::floor))
}

/// ceil(x) / ceiling(x) -> int
fn builtin_ceil(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(rounded(&args[0], f64::ceil))
}

/// round(x) -> int, halves to even
fn builtin_round(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(rounded(&args[0], f64::round_ties_even))
}

/// pow(base, exponent) -> number. Integer powers with a non-negative
/// exponent stay integers.
fn builtin_pow(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if let Some(value) = exceptional(args) {
        return Ok(value);
    }
    Ok(match (&args[0], &args[1]) {
        (Value::Integer(base), Value::Integer(exp)) if *exp >= 0 => u32::try_from(*exp)
            .ok()
            .and_then(|exp| base.checked_pow(exp))
            .map_or(Value::Error, Value::Integer),
        (base, exp) => match (base.as_number(), exp.as_number()) {
            (Some(base), Some(exp)) => {
                let result = base.powf(exp);
                if result.is_finite() {
                    Value::Real(result)
                } else {
                    Value::Error
                }
            }
            _ => Value::Error,
        },
    })
}

/// quantize(x, step | list) -> the smallest multiple of `step` not below
/// `x`, or the first list element not below `x`
fn builtin_quantize(evaluator: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    if let Some(value) = exceptional(args) {
        return Ok(value);
    }
    let Value::Real(target) = to_real(&args[0]) else {
        return Ok(Value::Error);
    };
    let step = match &args[1] {
        Value::List(list) => {
            // Past the end of the list, round up to multiples of its last item
            let mut last = Value::Real(0.0);
            for element in list_items(evaluator, *list) {
                let value = evaluator.evaluate_element(*element)?;
                match to_real(&value) {
                    Value::Real(item) if item >= target => return Ok(value),
                    Value::Real(_) => last = value,
                    _ => return Ok(Value::Error),
                }
            }
            last
        }
        other => other.clone(),
    };
    Ok(match step {
        Value::Integer(0) => args[0].clone(),
        Value::Integer(step) => match &args[0] {
            Value::Integer(n) => step
                .checked_sub(1)
                .and_then(|bump| n.checked_add(bump))
                .and_then(|n| n.checked_div(step))
                .and_then(|n| n.checked_mul(step))
                .map_or(Value::Error, Value::Integer),
            _ => Value::Real((target / step as f64).ceil() * step as f64),
        },
        other => match to_real(&other) {
            Value::Real(step) if step.abs() <= 1e-8 => args[0].clone(),
            Value::Real(step) => Value::Real((target / step).ceil() * step),
            _ => Value::Error,
        },
    })
}

// --- time ---

/// time() -> int seconds since the epoch
fn builtin_time(_: &mut Evaluator<'_>, _: &[Value]) -> EvalResult<Value> {
    Ok(Value::Integer(Utc::now().timestamp()))
}

/// currentTime() -> absolute time in the local zone
fn builtin_current_time(_: &mut Evaluator<'_>, _: &[Value]) -> EvalResult<Value> {
    Ok(Value::AbsTime(AbsTime::new(Utc::now().timestamp(), local_offset())))
}

/// timeZoneOffset() -> relative time east of UTC
fn builtin_time_zone_offset(_: &mut Evaluator<'_>, _: &[Value]) -> EvalResult<Value> {
    Ok(Value::RelTime(i64::from(local_offset())))
}

/// dayTime() -> relative time since local midnight
fn builtin_day_time(_: &mut Evaluator<'_>, _: &[Value]) -> EvalResult<Value> {
    Ok(Value::RelTime(i64::from(Local::now().num_seconds_from_midnight())))
}

fn abs_time_field(value: &Value, field: fn(&DateTime<FixedOffset>) -> i64) -> Value {
    match value {
        Value::Undefined => Value::Undefined,
        Value::AbsTime(t) => t.to_datetime().map_or(Value::Error, |dt| Value::Integer(field(&dt))),
        _ => Value::Error,
    }
}

fn rel_time_field(value: &Value, field: fn(i64) -> i64) -> Value {
    match value {
        Value::Undefined => Value::Undefined,
        Value::RelTime(secs) => Value::Integer(field(*secs)),
        _ => Value::Error,
    }
}

fn builtin_get_year(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(abs_time_field(&args[0], |dt| i64::from(dt.year())))
}

/// getMonth(t) -> 1..=12
fn builtin_get_month(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(abs_time_field(&args[0], |dt| i64::from(dt.month())))
}

/// getDayOfYear(t) -> 0..=365
fn builtin_get_day_of_year(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(abs_time_field(&args[0], |dt| i64::from(dt.ordinal0())))
}

/// getDayOfMonth(t) -> 1..=31
fn builtin_get_day_of_month(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(abs_time_field(&args[0], |dt| i64::from(dt.day())))
}

/// getDayOfWeek(t) -> 0 (Sunday) ..= 6
fn builtin_get_day_of_week(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(abs_time_field(&args[0], |dt| {
        i64::from(dt.weekday().num_days_from_sunday())
    }))
}

fn builtin_get_days(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(rel_time_field(&args[0], |secs| secs / 86_400))
}

fn builtin_get_hours(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(rel_time_field(&args[0], |secs| (secs % 86_400) / 3_600))
}

fn builtin_get_minutes(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(rel_time_field(&args[0], |secs| (secs % 3_600) / 60))
}

fn builtin_get_seconds(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(rel_time_field(&args[0], |secs| secs % 60))
}

/// formatTime([t[, format]]) -> string, strftime-style. Integer times are
/// shown in the local zone; the default format is `%c`.
fn builtin_format_time(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    let time = match args.first() {
        None => Some(AbsTime::new(Utc::now().timestamp(), local_offset())),
        Some(Value::AbsTime(t)) => Some(*t),
        Some(Value::Integer(secs)) => Some(AbsTime::new(*secs, local_offset())),
        Some(_) => None,
    };
    let format = match args.get(1) {
        None => "%c",
        Some(Value::String(format)) => format.as_str(),
        Some(_) => return Ok(Value::Error),
    };
    let Some(datetime) = time.and_then(|t| t.to_datetime()) else {
        return Ok(Value::Error);
    };
    // An unknown conversion surfaces as a formatting error
    let mut out = String::new();
    Ok(match write!(out, "{}", datetime.format(format)) {
        Ok(()) => Value::String(out),
        Err(_) => Value::Error,
    })
}

/// `[days+]hh:mm:ss`, dropping leading fields that are zero
fn format_interval(total: i64) -> String {
    let days = total / 86_400;
    let rest = total % 86_400;
    let (hours, minutes, seconds) = (rest / 3_600, rest % 3_600 / 60, rest % 60);
    if days != 0 {
        format!(
            "{}+{:02}:{:02}:{:02}",
            days,
            hours.abs(),
            minutes.abs(),
            seconds.abs()
        )
    } else if hours != 0 {
        format!("{}:{:02}:{:02}", hours, minutes.abs(), seconds.abs())
    } else if minutes != 0 {
        format!("{}:{:02}", minutes, seconds.abs())
    } else {
        seconds.to_string()
    }
}

/// interval(seconds) -> string
fn builtin_interval(_: &mut Evaluator<'_>, args: &[Value]) -> EvalResult<Value> {
    Ok(match to_int(&args[0]) {
        Value::Integer(secs) => Value::String(format_interval(secs)),
        Value::Undefined => Value::Undefined,
        _ => Value::Error,
    })
}

// --- control ---

/// ifThenElse(cond, then, else); only the chosen arm is evaluated
fn builtin_if_then_else(evaluator: &mut Evaluator<'_>, args: &[ExprId]) -> EvalResult<Value> {
    let selector = evaluator.evaluate(args[0])?;
    match operators::selector(&selector) {
        Ok(true) => evaluator.evaluate(args[1]),
        Ok(false) => evaluator.evaluate(args[2]),
        Err(value) => Ok(value),
    }
}

// --- introspection ---

/// unparse(attr) -> the source text bound to `attr` in the current record,
/// or "" when it is not bound there
fn builtin_unparse(evaluator: &mut Evaluator<'_>, args: &[ExprId]) -> EvalResult<Value> {
    let arena = evaluator.arena();
    let Some(ExprKind::AttributeRef { base, name, absolute }) = arena.kind(args[0]) else {
        return Ok(Value::Error);
    };
    let bound = match (base, absolute, evaluator.state().current()) {
        (None, false, Some(current)) => arena.lookup(current, name),
        _ => None,
    };
    Ok(Value::String(
        bound.map_or_else(String::new, |expr| Unparser::new(arena).expr(expr)),
    ))
}

/// unresolved(attr[, pattern]) -> the references of the expression bound
/// to `attr` that resolve nowhere, joined with commas; with a pattern,
/// whether any of them matches it. A leading `target.` is dropped.
fn builtin_unresolved(evaluator: &mut Evaluator<'_>, args: &[ExprId]) -> EvalResult<Value> {
    let arena = evaluator.arena();
    let Some(ExprKind::AttributeRef { base, name, absolute }) = arena.kind(args[0]) else {
        return Ok(Value::Error);
    };
    let start = match evaluator.reference_start(*base, *absolute)? {
        Ok(start) => start,
        Err(value) => return Ok(value),
    };
    let Lookup::Found { expr, scope } = evaluator.lookup_in_scope(start, name)? else {
        return Ok(Value::Undefined);
    };
    let pattern = match args.get(1) {
        None => None,
        Some(arg) => match evaluator.evaluate(*arg)? {
            Value::String(pattern) => match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(_) => return Ok(Value::Error),
            },
            _ => return Ok(Value::Error),
        },
    };

    let saved = evaluator.state.current.replace(scope);
    let names = evaluator.references(expr, true);
    evaluator.state.current = saved;
    let names: Vec<String> = names?
        .into_iter()
        .map(|name| match name.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("target.") => name[7..].to_string(),
            _ => name,
        })
        .collect();

    Ok(match pattern {
        None => Value::String(names.join(",")),
        Some(re) => Value::Boolean(names.iter().any(|name| {
            re.find(name).is_some_and(|m| !m.as_str().is_empty())
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Arena;
    use pretty_assertions::assert_eq;

    fn eval(source: &str) -> Value {
        let mut arena = Arena::new();
        let expr = crate::parse_expr(&mut arena, source).unwrap();
        arena.evaluate(expr).unwrap()
    }

    fn eval_in(ad: &str, source: &str) -> Value {
        let mut arena = Arena::new();
        let ad = crate::parse_classad(&mut arena, ad).unwrap();
        let expr = crate::parse_expr(&mut arena, source).unwrap();
        arena.evaluate_expr(ad, expr).unwrap()
    }

    #[test]
    fn test_table_is_sorted() {
        for pair in BUILTINS.windows(2) {
            assert_eq!(
                cmp_lowercase(pair[0].name, pair[1].name),
                Ordering::Less,
                "{} must sort before {}",
                pair[0].name,
                pair[1].name
            );
        }
    }

    #[test]
    fn test_lookup_ignores_case() {
        assert_eq!(lookup("STRCAT").map(|b| b.name), Some("strcat"));
        assert_eq!(lookup("isundefined").map(|b| b.name), Some("isUndefined"));
        assert!(lookup("nope").is_none());
        assert!(Arity::Range(2, 3).accepts(3));
        assert!(!Arity::Exact(1).accepts(2));
    }

    #[test]
    fn test_predicates() {
        assert_eq!(eval("isUndefined(undefined)"), Value::Boolean(true));
        assert_eq!(eval("isError(1/0)"), Value::Boolean(true));
        assert_eq!(eval("isInteger(1.0)"), Value::Boolean(false));
        assert_eq!(eval("isList({})"), Value::Boolean(true));
        assert_eq!(eval("isClassAd([a = 1])"), Value::Boolean(true));
        assert_eq!(eval("isRelTime(relTime(5))"), Value::Boolean(true));
    }

    #[test]
    fn test_membership() {
        assert_eq!(eval("member(2, {1, 2, 3})"), Value::Boolean(true));
        assert_eq!(eval("member(\"B\", {\"a\", \"b\"})"), Value::Boolean(true));
        assert_eq!(eval("identicalMember(\"B\", {\"a\", \"b\"})"), Value::Boolean(false));
        assert_eq!(eval("member(undefined, {1})"), Value::Undefined);
        assert_eq!(eval("identicalMember(undefined, {undefined})"), Value::Boolean(true));
        assert_eq!(eval("member(1, 2)"), Value::Error);
        assert_eq!(eval("member(1)"), Value::Error);
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(eval("size({1, 2, 3})"), Value::Integer(3));
        assert_eq!(eval("size(\"héllo\")"), Value::Integer(5));
        assert_eq!(eval("size([a = 1; b = 2])"), Value::Integer(2));
        assert_eq!(eval("sum({1, 2, undefined, 3})"), Value::Integer(6));
        assert_eq!(eval("sum({})"), Value::Integer(0));
        assert_eq!(eval("sum({1, 2.5})"), Value::Real(3.5));
        assert_eq!(eval("sum({1, \"x\"})"), Value::Error);
        assert_eq!(eval("avg({1, 2})"), Value::Real(1.5));
        assert_eq!(eval("avg({})"), Value::Undefined);
        assert_eq!(eval("min({3, 1.5, 2})"), Value::Real(1.5));
        assert_eq!(eval("max({3, 1.5, 2})"), Value::Integer(3));
        assert_eq!(eval("max({})"), Value::Undefined);
    }

    #[test]
    fn test_strings() {
        assert_eq!(eval("strcat(\"a\", 1, true, 2.5)"), Value::from("a1true2.5"));
        assert_eq!(eval("strcat(\"a\", undefined)"), Value::Undefined);
        assert_eq!(eval("toUpper(\"MiXed\")"), Value::from("MIXED"));
        assert_eq!(eval("toLower(\"MiXed\")"), Value::from("mixed"));
        assert_eq!(eval("substr(\"abcdef\", 2)"), Value::from("cdef"));
        assert_eq!(eval("substr(\"abcdef\", -2)"), Value::from("ef"));
        assert_eq!(eval("substr(\"abcdef\", 1, 3)"), Value::from("bcd"));
        assert_eq!(eval("substr(\"abcdef\", 1, -1)"), Value::from("bcde"));
        assert_eq!(eval("substr(\"abc\", 10)"), Value::from(""));
        assert_eq!(eval("substr(1, 0)"), Value::Error);
        assert_eq!(eval("strcmp(\"a\", \"b\")"), Value::Integer(-1));
        assert_eq!(eval("strcmp(\"B\", \"a\")"), Value::Integer(-1));
        assert_eq!(eval("stricmp(\"B\", \"a\")"), Value::Integer(1));
        assert_eq!(eval("stricmp(\"ABC\", \"abc\")"), Value::Integer(0));
    }

    #[test]
    fn test_regexp() {
        assert_eq!(eval("regexp(\"^ab+c$\", \"abbbc\")"), Value::Boolean(true));
        assert_eq!(eval("regexp(\"^ABC$\", \"abc\")"), Value::Boolean(false));
        assert_eq!(eval("regexp(\"^ABC$\", \"abc\", \"i\")"), Value::Boolean(true));
        assert_eq!(eval("regexp(\"(\", \"abc\")"), Value::Error);
        assert_eq!(
            eval("regexpMember(\"^x\", {\"abc\", \"xyz\"})"),
            Value::Boolean(true)
        );
        assert_eq!(eval("regexpMember(\"^x\", {\"abc\", 3})"), Value::Error);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval("int(3.9)"), Value::Integer(3));
        assert_eq!(eval("int(-3.9)"), Value::Integer(-3));
        assert_eq!(eval("int(\"42\")"), Value::Integer(42));
        assert_eq!(eval("int(\"4.5\")"), Value::Integer(4));
        assert_eq!(eval("int(\"four\")"), Value::Error);
        assert_eq!(eval("int(true)"), Value::Integer(1));
        assert_eq!(eval("real(3)"), Value::Real(3.0));
        assert_eq!(eval("real(\"2.5\")"), Value::Real(2.5));
        assert_eq!(eval("string(42)"), Value::from("42"));
        assert_eq!(eval("string({1, \"a\"})"), Value::from("{ 1, \"a\" }"));
        assert_eq!(eval("bool(\"TRUE\")"), Value::Boolean(true));
        assert_eq!(eval("bool(\"maybe\")"), Value::Undefined);
        assert_eq!(eval("bool(0)"), Value::Boolean(false));
        assert_eq!(eval("bool({})"), Value::Error);
    }

    #[test]
    fn test_rounding_and_pow() {
        assert_eq!(eval("floor(2.7)"), Value::Integer(2));
        assert_eq!(eval("ceil(2.1)"), Value::Integer(3));
        assert_eq!(eval("ceiling(-2.1)"), Value::Integer(-2));
        assert_eq!(eval("round(2.5)"), Value::Integer(2));
        assert_eq!(eval("round(3.5)"), Value::Integer(4));
        assert_eq!(eval("floor(7)"), Value::Integer(7));
        assert_eq!(eval("floor(\"x\")"), Value::Error);
        assert_eq!(eval("pow(2, 10)"), Value::Integer(1024));
        assert_eq!(eval("pow(2, -1)"), Value::Real(0.5));
        assert_eq!(eval("pow(2, 100)"), Value::Error);
    }

    #[test]
    fn test_time_construction() {
        assert_eq!(
            eval("absTime(\"2024-01-02T03:04:05+00:00\")"),
            Value::AbsTime(AbsTime::new(1_704_164_645, 0))
        );
        assert_eq!(eval("absTime(60, 3600)"), Value::AbsTime(AbsTime::new(60, 3600)));
        assert_eq!(eval("absTime(\"not a time\")"), Value::Error);
        assert_eq!(eval("relTime(\"1+00:00:01\")"), Value::RelTime(86_401));
        assert_eq!(eval("relTime(90)"), Value::RelTime(90));
        assert!(matches!(eval("absTime()"), Value::AbsTime(_)));
        assert!(matches!(eval("time()"), Value::Integer(n) if n > 0));
        assert!(matches!(eval("dayTime()"), Value::RelTime(n) if (0..86_400).contains(&n)));
    }

    #[test]
    fn test_time_decomposition() {
        // 2024-02-29T13:14:15Z, a Thursday
        let t = "absTime(\"2024-02-29T13:14:15+00:00\")";
        assert_eq!(eval(&format!("getYear({t})")), Value::Integer(2024));
        assert_eq!(eval(&format!("getMonth({t})")), Value::Integer(2));
        assert_eq!(eval(&format!("getDayOfMonth({t})")), Value::Integer(29));
        assert_eq!(eval(&format!("getDayOfYear({t})")), Value::Integer(59));
        assert_eq!(eval(&format!("getDayOfWeek({t})")), Value::Integer(4));
        assert_eq!(eval(&format!("getHours({t})")), Value::Error);

        let d = "relTime(\"2+03:04:05\")";
        assert_eq!(eval(&format!("getDays({d})")), Value::Integer(2));
        assert_eq!(eval(&format!("getHours({d})")), Value::Integer(3));
        assert_eq!(eval(&format!("getMinutes({d})")), Value::Integer(4));
        assert_eq!(eval(&format!("getSeconds({d})")), Value::Integer(5));
    }

    #[test]
    fn test_if_then_else_is_lazy() {
        assert_eq!(eval("ifThenElse(true, 1, 1/0)"), Value::Integer(1));
        assert_eq!(eval("ifThenElse(0, 1/0, 2)"), Value::Integer(2));
        assert_eq!(eval("ifThenElse(undefined, 1, 2)"), Value::Undefined);
        assert_eq!(eval("ifThenElse(\"x\", 1, 2)"), Value::Error);
    }

    #[test]
    fn test_list_compare() {
        assert_eq!(eval("anyCompare(\"<\", {1, 5, 9}, 3)"), Value::Boolean(true));
        assert_eq!(eval("allCompare(\"<\", {1, 5}, 3)"), Value::Boolean(false));
        assert_eq!(eval("allCompare(\">=\", {4, 3}, 3)"), Value::Boolean(true));
        assert_eq!(eval("allCompare(\">=\", {}, 3)"), Value::Boolean(true));
        assert_eq!(eval("anyCompare(\"==\", {}, 1)"), Value::Boolean(false));
        assert_eq!(eval("anyCompare(\"is\", {2, undefined}, undefined)"), Value::Boolean(true));
        assert_eq!(eval("anyCompare(\"<\", {undefined, 0}, 1)"), Value::Boolean(false));
        assert_eq!(eval("anyCompare(\"~\", {1}, 1)"), Value::Error);
        assert_eq!(eval("anyCompare(\"<\", 1, 1)"), Value::Error);
        assert_eq!(eval("anyCompare(undefined, {1}, 1)"), Value::Undefined);
    }

    #[test]
    fn test_join() {
        assert_eq!(eval("join(\", \", \"a\", \"b\", 3)"), Value::from("a, b, 3"));
        assert_eq!(eval("join(\"-\", {\"x\", \"y\"})"), Value::from("x-y"));
        assert_eq!(eval("join({\"x\", \"y\"})"), Value::from("xy"));
        assert_eq!(eval("join(\"-\", \"a\", undefined, \"b\")"), Value::from("a-b"));
        assert_eq!(eval("join(\"-\", undefined)"), Value::Undefined);
        assert_eq!(eval("join()"), Value::from(""));
        assert_eq!(eval("join(\"-\", \"a\", 1/0)"), Value::Error);
    }

    #[test]
    fn test_format_time() {
        let t = "absTime(\"2024-02-29T13:14:15+01:00\")";
        assert_eq!(
            eval(&format!("formatTime({t}, \"%Y-%m-%d %H:%M:%S %z\")")),
            Value::from("2024-02-29 13:14:15 +0100")
        );
        assert!(matches!(
            eval(&format!("formatTime({t})")),
            Value::String(s) if s.starts_with("Thu Feb 29")
        ));
        assert!(matches!(eval("formatTime()"), Value::String(_)));
        assert_eq!(eval(&format!("formatTime({t}, 3)")), Value::Error);
        assert_eq!(eval(&format!("formatTime({t}, \"%Q\")")), Value::Error);
        assert_eq!(eval("formatTime(relTime(5))"), Value::Error);
    }

    #[test]
    fn test_interval() {
        assert_eq!(eval("interval(90061)"), Value::from("1+01:01:01"));
        assert_eq!(eval("interval(3725)"), Value::from("1:02:05"));
        assert_eq!(eval("interval(65)"), Value::from("1:05"));
        assert_eq!(eval("interval(7)"), Value::from("7"));
        assert_eq!(eval("interval(undefined)"), Value::Undefined);
        assert_eq!(eval("interval(\"soon\")"), Value::Error);
    }

    #[test]
    fn test_versions() {
        assert_eq!(version_order("1.9", "1.10"), Ordering::Less);
        assert_eq!(version_order("8.10.1", "8.9"), Ordering::Greater);
        assert_eq!(version_order("1.0", "1.0a"), Ordering::Less);
        assert_eq!(eval("versioncmp(\"1.9\", \"1.10\")"), Value::Integer(-1));
        assert_eq!(eval("versioncmp(\"2.0\", \"2.0\")"), Value::Integer(0));
        assert_eq!(eval("versioncmp(\"10.0\", \"9.9\")"), Value::Integer(1));
        assert_eq!(eval("versionLT(\"1.2\", \"1.10\")"), Value::Boolean(true));
        assert_eq!(eval("versionGT(\"1.2\", \"1.10\")"), Value::Boolean(false));
        assert_eq!(eval("versionEQ(\"3.1\", \"3.1\")"), Value::Boolean(true));
        assert_eq!(eval("versionLE(\"3.1\", \"3.1\")"), Value::Boolean(true));
        assert_eq!(eval("versionGE(\"3.0\", \"3.1\")"), Value::Boolean(false));
        assert_eq!(eval("versioncmp(undefined, \"1\")"), Value::Undefined);
        assert_eq!(eval("versioncmp(\"1\", 1/0)"), Value::Error);
        assert_eq!(eval("version_in_range(\"1.5\", \"1.0\", \"2.0\")"), Value::Boolean(true));
        assert_eq!(eval("version_in_range(\"2.1\", \"1.0\", \"2.0\")"), Value::Boolean(false));
        assert_eq!(eval("version_in_range(\"1.5\", undefined, \"2\")"), Value::Undefined);
    }

    #[test]
    fn test_substitution() {
        assert_eq!(
            eval(r#"regexps("([a-z]+)@([a-z]+)", "mail bob@host now", "\\2:\\1")"#),
            Value::from("host:bob")
        );
        assert_eq!(eval("regexps(\"x\", \"abc\", \"y\")"), Value::from(""));
        assert_eq!(eval("replace(\"o\", \"foo boo\", \"0\")"), Value::from("f0o boo"));
        assert_eq!(eval("replaceAll(\"o\", \"foo boo\", \"0\")"), Value::from("f00 b00"));
        assert_eq!(eval("replace(\"O\", \"foo\", \"0\", \"i\")"), Value::from("f0o"));
        assert_eq!(
            eval(r#"replaceAll("(b)", "abcb", "[\\1]")"#),
            Value::from("a[b]c[b]")
        );
        assert_eq!(eval(r#"regexps("(a)", "a", "\\2")"#), Value::Error);
        assert_eq!(eval("regexps(\"(\", \"a\", \"b\")"), Value::Error);
        assert_eq!(eval("replace(\"a\", \"b\", 1)"), Value::Error);
        assert_eq!(eval("replace(\"a\", undefined, \"b\")"), Value::Undefined);
    }

    #[test]
    fn test_quantize() {
        assert_eq!(eval("quantize(7, 4)"), Value::Integer(8));
        assert_eq!(eval("quantize(8, 4)"), Value::Integer(8));
        assert_eq!(eval("quantize(7.5, 2)"), Value::Real(8.0));
        assert_eq!(eval("quantize(2.5, 0.5)"), Value::Real(2.5));
        assert_eq!(eval("quantize(5, 0)"), Value::Integer(5));
        assert_eq!(eval("quantize(3, {2, 4, 8})"), Value::Integer(4));
        assert_eq!(eval("quantize(10, {2, 4})"), Value::Integer(12));
        assert_eq!(eval("quantize(3, {2, \"x\"})"), Value::Error);
        assert_eq!(eval("quantize(\"x\", 2)"), Value::Error);
    }

    #[test]
    fn test_string_lists_intersect() {
        assert_eq!(eval("stringListsIntersect(\"a,b,c\", \"x, c\")"), Value::Boolean(true));
        assert_eq!(eval("stringListsIntersect(\"a b\", \"c d\")"), Value::Boolean(false));
        assert_eq!(eval("stringListsIntersect(\"a;b\", \"b\", \";\")"), Value::Boolean(true));
        assert_eq!(eval("stringListsIntersect(\"a\", undefined)"), Value::Undefined);
        assert_eq!(eval("stringListsIntersect(1, \"a\")"), Value::Error);
    }

    #[test]
    fn test_unparse_bound_expression() {
        assert_eq!(eval_in("[a = 1 + 2]", "unparse(a)"), Value::from("1 + 2"));
        assert_eq!(eval_in("[a = 1 + 2]", "unparse(missing)"), Value::from(""));
        assert_eq!(eval_in("[a = 1 + 2]", "unparse(1)"), Value::Error);
    }

    #[test]
    fn test_unresolved_references() {
        let ad = "[a = b + other.c; b = 1; t = target.mem + x]";
        assert_eq!(eval_in(ad, "unresolved(a)"), Value::from("other.c"));
        assert_eq!(eval_in(ad, "unresolved(b)"), Value::from(""));
        assert_eq!(eval_in(ad, "unresolved(t)"), Value::from("mem,x"));
        assert_eq!(eval_in(ad, "unresolved(t, \"^ME\")"), Value::Boolean(true));
        assert_eq!(eval_in(ad, "unresolved(t, \"^zz\")"), Value::Boolean(false));
        assert_eq!(eval_in(ad, "unresolved(missing)"), Value::Undefined);
        assert_eq!(eval_in(ad, "unresolved(t, 1)"), Value::Error);
        assert_eq!(eval_in(ad, "unresolved(1)"), Value::Error);
    }
}
