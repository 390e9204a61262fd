//! The protocol's literal grammar.

use std::fmt::Write as _;

use crate::ast::Value;

/// Render a primitive value as a protocol literal, unescaped.
///
/// Returns `None` for values with no literal form (lists and records).
pub fn format(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Byte(n) => n.to_string(),
        Value::Int16(n) => n.to_string(),
        Value::Int32(n) => n.to_string(),
        Value::Int64(n) => format!("{}L", n),
        Value::Single(n) => format!("{}f", float_text(f64::from(*n))),
        Value::Double(n) => float_text(*n),
        Value::Decimal(d) => format!("{}M", d),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::DateTime(d) => format!("datetime'{}'", d.format("%Y-%m-%dT%H:%M:%S%.f")),
        Value::Guid(g) => format!("guid'{}'", g.hyphenated()),
        Value::Binary(bytes) => {
            let mut out = String::from("X'");
            for b in bytes {
                let _ = write!(out, "{:02X}", b);
            }
            out.push('\'');
            out
        }
        Value::List(_) | Value::Record(_) => return None,
    };
    Some(text)
}

fn float_text(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        n.to_string()
    }
}

/// Characters left as-is inside an escaped literal.
fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '!' | '*' | '\'' | '(' | ')')
}

/// Percent-encode everything outside the unreserved set, byte by byte.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_unreserved(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "%{:02X}", b);
            }
        }
    }
    out
}

/// A literal ready to be placed in a URI.
pub fn uri_literal(value: &Value) -> Option<String> {
    format(value).map(|text| escape(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    #[test]
    fn test_numeric_suffixes() {
        assert_eq!(format(&Value::Int32(10)).unwrap(), "10");
        assert_eq!(format(&Value::Int64(10)).unwrap(), "10L");
        assert_eq!(format(&Value::Decimal(Decimal::new(125, 1))).unwrap(), "12.5M");
        assert_eq!(format(&Value::Single(1.5)).unwrap(), "1.5f");
        assert_eq!(format(&Value::Double(2.25)).unwrap(), "2.25");
    }

    #[test]
    fn test_string_quotes_doubled() {
        assert_eq!(format(&Value::from("O'Neil")).unwrap(), "'O''Neil'");
    }

    #[test]
    fn test_datetime_and_escape() {
        let d = NaiveDate::from_ymd_opt(2008, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(format(&Value::DateTime(d)).unwrap(), "datetime'2008-01-02T03:04:05'");
        assert_eq!(uri_literal(&Value::DateTime(d)).unwrap(), "datetime'2008-01-02T03%3A04%3A05'");
    }

    #[test]
    fn test_escape_reserved() {
        assert_eq!(escape("'a b&c'"), "'a%20b%26c'");
        assert_eq!(escape("é"), "%C3%A9");
    }

    #[test]
    fn test_no_literal_for_records() {
        assert!(format(&Value::List(vec![])).is_none());
    }
}
