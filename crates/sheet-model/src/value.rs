use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{CellError, ErrorValue};

/// Tagged cell value.
///
/// The enum uses an explicit `{type, value}` layout for stable serialization.
/// Ranges are an evaluator-only concept and are never stored in a cell, so
/// they are deliberately absent here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    /// Empty / unset cell value.
    Empty,
    /// IEEE-754 double precision number.
    Number(f64),
    /// Plain UTF-8 text.
    Text(String),
    /// Boolean.
    Bool(bool),
    /// Spreadsheet error value.
    Error(CellError),
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

impl CellValue {
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    /// The error kind, if this value is an error.
    pub fn error_kind(&self) -> Option<ErrorValue> {
        match self {
            CellValue::Error(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Total numeric coercion: number itself, bool as 1/0, text parsed as a
    /// decimal, empty as 0. Errors and unparseable text yield `None`.
    pub fn coerce_to_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Text(s) => s.parse::<f64>().ok(),
            CellValue::Empty => Some(0.0),
            CellValue::Error(_) => None,
        }
    }

    /// Total text coercion. Empty becomes `""`; numbers render in their
    /// shortest round-trip form; booleans render lower-case.
    pub fn coerce_to_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            CellValue::Error(e) => e.message.clone(),
        }
    }

    /// Truthiness: bool is itself; numbers are non-zero; text is non-empty;
    /// empty is false; anything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Bool(b) => *b,
            CellValue::Number(n) => *n != 0.0,
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Empty => false,
            CellValue::Error(_) => true,
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<CellError> for CellValue {
    fn from(value: CellError) -> Self {
        CellValue::Error(value)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => f.write_str(&format_number(*n)),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Error(e) => f.write_str(e.kind.as_code()),
        }
    }
}

/// Render a number without trailing zeros: integral values print with no
/// decimal point, everything else in shortest round-trip form.
pub fn format_number(n: f64) -> String {
    if n == n.trunc() && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n.trunc() as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_coercion() {
        assert_eq!(CellValue::Number(2.5).coerce_to_number(), Some(2.5));
        assert_eq!(CellValue::Bool(true).coerce_to_number(), Some(1.0));
        assert_eq!(CellValue::Bool(false).coerce_to_number(), Some(0.0));
        assert_eq!(CellValue::Text("42".into()).coerce_to_number(), Some(42.0));
        assert_eq!(CellValue::Text("4.5e2".into()).coerce_to_number(), Some(450.0));
        assert_eq!(CellValue::Text("abc".into()).coerce_to_number(), None);
        assert_eq!(CellValue::Empty.coerce_to_number(), Some(0.0));
        assert_eq!(
            CellValue::Error(CellError::from_kind(ErrorValue::Div0)).coerce_to_number(),
            None
        );
    }

    #[test]
    fn text_coercion() {
        assert_eq!(CellValue::Empty.coerce_to_text(), "");
        assert_eq!(CellValue::Number(10.0).coerce_to_text(), "10");
        assert_eq!(CellValue::Number(6.5).coerce_to_text(), "6.5");
        assert_eq!(CellValue::Bool(true).coerce_to_text(), "true");
        assert_eq!(CellValue::Bool(false).coerce_to_text(), "false");
    }

    #[test]
    fn truthiness() {
        assert!(CellValue::Bool(true).is_truthy());
        assert!(!CellValue::Bool(false).is_truthy());
        assert!(CellValue::Number(-1.0).is_truthy());
        assert!(!CellValue::Number(0.0).is_truthy());
        assert!(CellValue::Text("x".into()).is_truthy());
        assert!(!CellValue::Text("".into()).is_truthy());
        assert!(!CellValue::Empty.is_truthy());
    }

    #[test]
    fn serde_layout_is_tagged() {
        let v = CellValue::Number(1.5);
        assert_eq!(
            serde_json::to_string(&v).unwrap(),
            r#"{"type":"number","value":1.5}"#
        );
        let back: CellValue = serde_json::from_str(r#"{"type":"text","value":"hi"}"#).unwrap();
        assert_eq!(back, CellValue::Text("hi".into()));
    }
}
