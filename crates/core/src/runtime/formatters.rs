//! Pipe formatters: `@name|upperCase`, `{{ @a * @b | currency }}`.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::interpolation::Formatter;
use crate::vars::validation::describe;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatterError {
    #[error("unknown formatter '{0}'")]
    Unknown(String),

    #[error("{formatter} expects {expected}, got {actual}")]
    BadInput { formatter: String, expected: &'static str, actual: String },

    #[error("bad argument to {formatter}: {message}")]
    BadArgument { formatter: String, message: String },
}

/// Names accepted by [`apply`].
pub const FORMATTERS: &[&str] = &[
    "upperCase", "lowerCase", "capitalize", "titleCase", "trim", "slugify", "currency", "number",
    "percent", "date", "length", "json", "default", "truncate", "join", "prefix", "suffix",
];

/// Largest `number`/`percent` precision accepted.
const MAX_DECIMALS: usize = 20;

pub fn is_known(name: &str) -> bool {
    FORMATTERS.contains(&name) || matches!(name, "upper" | "uppercase" | "lower" | "lowercase")
}

/// Render a value as interpolated text. `null` renders as nothing.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(to_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// Apply one formatter. `null` passes through text formatters untouched so
/// that unset optional values stay empty.
pub fn apply(formatter: &Formatter, value: Value) -> Result<Value, FormatterError> {
    let name = formatter.name.as_str();
    let args = &formatter.args;

    let out = match name {
        "upperCase" | "uppercase" | "upper" => text_op(value, str::to_uppercase),
        "lowerCase" | "lowercase" | "lower" => text_op(value, str::to_lowercase),
        "capitalize" => text_op(value, capitalize),
        "titleCase" => text_op(value, title_case),
        "trim" => text_op(value, |s| s.trim().to_string()),
        "slugify" => text_op(value, slugify),
        "currency" => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let n = number_input(name, &value)?;
            let body = group_thousands(&format!("{:.2}", n.abs()));
            let sign = if n < 0.0 { "-" } else { "" };
            Value::String(format!("{sign}${body}"))
        }
        "number" => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let n = number_input(name, &value)?;
            let decimals = decimals_arg(formatter)?;
            Value::String(group_thousands(&format!("{n:.decimals$}")))
        }
        "percent" => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let n = number_input(name, &value)?;
            let decimals = decimals_arg(formatter)?;
            Value::String(format!("{:.decimals$}%", n * 100.0))
        }
        "date" => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let pattern = match args.first() {
                Some(Value::String(p)) => p.as_str(),
                Some(other) => {
                    return Err(FormatterError::BadArgument {
                        formatter: name.into(),
                        message: format!("pattern must be a string, got {}", describe(other)),
                    });
                }
                None => "%Y-%m-%d",
            };
            let date = date_input(name, &value)?;
            Value::String(format_date(name, &date, pattern)?)
        }
        "length" => match &value {
            Value::Null => Value::from(0),
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(items) => Value::from(items.len()),
            Value::Object(map) => Value::from(map.len()),
            other => Value::from(to_text(other).chars().count()),
        },
        "json" => Value::String(value.to_string()),
        "default" => {
            let empty = value.is_null() || value.as_str().is_some_and(str::is_empty);
            if empty { args.first().cloned().unwrap_or(Value::Null) } else { value }
        }
        "truncate" => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let limit = usize_arg(formatter, 0, 50)?;
            let text = to_text(&value);
            if text.chars().count() > limit {
                let cut: String = text.chars().take(limit).collect();
                Value::String(format!("{}...", cut.trim_end()))
            } else {
                Value::String(text)
            }
        }
        "join" => {
            let sep = match args.first() {
                Some(Value::String(s)) => s.clone(),
                Some(other) => to_text(other),
                None => ", ".to_string(),
            };
            match value {
                Value::Array(items) => {
                    Value::String(items.iter().map(to_text).collect::<Vec<_>>().join(&sep))
                }
                other => other,
            }
        }
        "prefix" | "suffix" => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let affix = args.first().map(to_text).unwrap_or_default();
            let text = to_text(&value);
            if name == "prefix" {
                Value::String(format!("{affix}{text}"))
            } else {
                Value::String(format!("{text}{affix}"))
            }
        }
        _ => return Err(FormatterError::Unknown(name.to_string())),
    };
    Ok(out)
}

fn text_op(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::Null => Value::Null,
        other => Value::String(f(&to_text(&other))),
    }
}

fn number_input(formatter: &str, value: &Value) -> Result<f64, FormatterError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| FormatterError::BadInput {
        formatter: formatter.to_string(),
        expected: "a number",
        actual: describe(value),
    })
}

fn date_input(formatter: &str, value: &Value) -> Result<DateTime<Utc>, FormatterError> {
    let parsed = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| Utc.from_utc_datetime(&d))
            }),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    };
    parsed.ok_or_else(|| FormatterError::BadInput {
        formatter: formatter.to_string(),
        expected: "a date (YYYY-MM-DD, RFC 3339 or unix seconds)",
        actual: describe(value),
    })
}

fn format_date(formatter: &str, date: &DateTime<Utc>, pattern: &str) -> Result<String, FormatterError> {
    let bad_pattern = || FormatterError::BadArgument {
        formatter: formatter.to_string(),
        message: format!("invalid date pattern '{pattern}'"),
    };
    let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(bad_pattern());
    }
    let mut out = String::new();
    write!(out, "{}", date.format_with_items(items.into_iter())).map_err(|_| bad_pattern())?;
    Ok(out)
}

fn decimals_arg(formatter: &Formatter) -> Result<usize, FormatterError> {
    let decimals = usize_arg(formatter, 0, 0)?;
    if decimals > MAX_DECIMALS {
        return Err(FormatterError::BadArgument {
            formatter: formatter.name.clone(),
            message: format!("at most {MAX_DECIMALS} decimals, got {decimals}"),
        });
    }
    Ok(decimals)
}

fn usize_arg(formatter: &Formatter, index: usize, default: usize) -> Result<usize, FormatterError> {
    match formatter.args.get(index) {
        None => Ok(default),
        Some(v) => v.as_u64().map(|n| n as usize).ok_or_else(|| FormatterError::BadArgument {
            formatter: formatter.name.clone(),
            message: format!("expected a non-negative integer, got {}", describe(v)),
        }),
    }
}

/// Insert `,` every three digits of the integer part of a formatted number.
fn group_thousands(formatted: &str) -> String {
    let (sign, digits) = match formatted.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", formatted),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac_part {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, hyphen-separated, alphanumerics only.
fn slugify(s: &str) -> String {
    let mut result = String::with_capacity(s.len());

    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            result.push(c.to_ascii_lowercase());
        } else if (c == ' ' || c == '_' || c == '-') && !result.ends_with('-') {
            result.push('-');
        }
    }

    result.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn fmt(name: &str, args: Vec<Value>, value: Value) -> Result<Value, FormatterError> {
        apply(&Formatter { name: name.into(), args }, value)
    }

    #[rstest]
    #[case("upperCase", vec![], json!("hello"), json!("HELLO"))]
    #[case("lowerCase", vec![], json!("HeLLo"), json!("hello"))]
    #[case("capitalize", vec![], json!("hello world"), json!("Hello world"))]
    #[case("titleCase", vec![], json!("hello WORLD"), json!("Hello World"))]
    #[case("trim", vec![], json!("  x  "), json!("x"))]
    #[case("slugify", vec![], json!("My Task: Do Something!"), json!("my-task-do-something"))]
    #[case("currency", vec![], json!(10), json!("$10.00"))]
    #[case("currency", vec![], json!(1234567.891), json!("$1,234,567.89"))]
    #[case("currency", vec![], json!(-5), json!("-$5.00"))]
    #[case("currency", vec![], json!("20"), json!("$20.00"))]
    #[case("number", vec![json!(2)], json!(1234.5), json!("1,234.50"))]
    #[case("number", vec![], json!(999), json!("999"))]
    #[case("percent", vec![json!(1)], json!(0.256), json!("25.6%"))]
    #[case("date", vec![json!("%d/%m/%Y")], json!("2024-03-05"), json!("05/03/2024"))]
    #[case("date", vec![], json!("2024-03-05T10:00:00Z"), json!("2024-03-05"))]
    #[case("length", vec![], json!([1, 2, 3]), json!(3))]
    #[case("length", vec![], json!("héllo"), json!(5))]
    #[case("json", vec![], json!({"a": 1}), json!("{\"a\":1}"))]
    #[case("default", vec![json!("n/a")], Value::Null, json!("n/a"))]
    #[case("default", vec![json!("n/a")], json!(""), json!("n/a"))]
    #[case("default", vec![json!("n/a")], json!("set"), json!("set"))]
    #[case("truncate", vec![json!(5)], json!("Hello world"), json!("Hello..."))]
    #[case("truncate", vec![json!(50)], json!("short"), json!("short"))]
    #[case("join", vec![json!(" / ")], json!(["a", "b"]), json!("a / b"))]
    #[case("prefix", vec![json!("~")], json!(5), json!("~5"))]
    #[case("suffix", vec![json!("!")], json!("hi"), json!("hi!"))]
    fn test_formatters(#[case] name: &str, #[case] args: Vec<Value>, #[case] input: Value, #[case] expected: Value) {
        assert_eq!(fmt(name, args, input).unwrap(), expected);
    }

    #[rstest]
    #[case("date", vec![json!("%Q")], json!("2024-03-05"))]
    #[case("date", vec![json!("%Y-%")], json!("2024-03-05"))]
    #[case("number", vec![json!(70000)], json!(1.5))]
    #[case("number", vec![json!(21)], json!(1.5))]
    #[case("percent", vec![json!(u64::MAX)], json!(0.5))]
    fn test_rejected_arguments(#[case] name: &str, #[case] args: Vec<Value>, #[case] input: Value) {
        assert!(matches!(fmt(name, args, input), Err(FormatterError::BadArgument { .. })));
    }

    #[test]
    fn test_max_decimals_still_formats() {
        let out = fmt("number", vec![json!(20)], json!(1.5)).unwrap();
        assert_eq!(out.as_str().unwrap().split_once('.').unwrap().1.len(), 20);
    }

    #[test]
    fn test_null_passes_through_text_formatters() {
        assert_eq!(fmt("upperCase", vec![], Value::Null).unwrap(), Value::Null);
        assert_eq!(fmt("currency", vec![], Value::Null).unwrap(), Value::Null);
        assert_eq!(fmt("prefix", vec![json!("$")], Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_bad_inputs() {
        assert!(matches!(fmt("currency", vec![], json!("abc")), Err(FormatterError::BadInput { .. })));
        assert!(matches!(fmt("number", vec![json!("x")], json!(1)), Err(FormatterError::BadArgument { .. })));
        assert!(matches!(fmt("date", vec![], json!("yesterday")), Err(FormatterError::BadInput { .. })));
        assert_eq!(fmt("sparkle", vec![], json!(1)), Err(FormatterError::Unknown("sparkle".into())));
    }

    #[test]
    fn test_to_text() {
        assert_eq!(to_text(&Value::Null), "");
        assert_eq!(to_text(&json!(2.5)), "2.5");
        assert_eq!(to_text(&json!(["a", 1])), "a, 1");
        assert_eq!(to_text(&json!(true)), "true");
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands("1234567"), "1,234,567");
        assert_eq!(group_thousands("-1000.5"), "-1,000.5");
        assert_eq!(group_thousands("12"), "12");
    }

    #[test]
    fn test_every_listed_formatter_is_known() {
        for name in FORMATTERS {
            assert!(is_known(name));
            assert_ne!(fmt(name, vec![], json!("1")), Err(FormatterError::Unknown(name.to_string())));
        }
    }
}
