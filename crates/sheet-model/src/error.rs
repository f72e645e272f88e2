use core::fmt;
use core::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Spreadsheet error values.
///
/// The set is closed: these are the only error kinds the engine produces or
/// stores. `Null` and `Other` are representable but not emitted by the core.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorValue {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    NA,
    Other,
}

impl ErrorValue {
    /// The canonical display glyph for the error (including punctuation).
    pub const fn as_code(self) -> &'static str {
        match self {
            ErrorValue::Null => "#NULL!",
            ErrorValue::Div0 => "#DIV/0!",
            ErrorValue::Value => "#VALUE!",
            ErrorValue::Ref => "#REF!",
            ErrorValue::Name => "#NAME?",
            ErrorValue::Num => "#NUM!",
            ErrorValue::NA => "#N/A",
            ErrorValue::Other => "#ERROR!",
        }
    }

    /// Numeric error code used by the sparse cell store, which keeps the
    /// kind in a numeric attribute array alongside the interned message.
    pub const fn code(self) -> u8 {
        match self {
            ErrorValue::Null => 1,
            ErrorValue::Div0 => 2,
            ErrorValue::Value => 3,
            ErrorValue::Ref => 4,
            ErrorValue::Name => 5,
            ErrorValue::Num => 6,
            ErrorValue::NA => 7,
            ErrorValue::Other => 8,
        }
    }

    /// Inverse of [`ErrorValue::code`].
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ErrorValue::Null),
            2 => Some(ErrorValue::Div0),
            3 => Some(ErrorValue::Value),
            4 => Some(ErrorValue::Ref),
            5 => Some(ErrorValue::Name),
            6 => Some(ErrorValue::Num),
            7 => Some(ErrorValue::NA),
            8 => Some(ErrorValue::Other),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for ErrorValue {
    type Err = ParseErrorValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "#NULL!" => Ok(ErrorValue::Null),
            "#DIV/0!" => Ok(ErrorValue::Div0),
            "#VALUE!" => Ok(ErrorValue::Value),
            "#REF!" => Ok(ErrorValue::Ref),
            "#NAME?" => Ok(ErrorValue::Name),
            "#NUM!" => Ok(ErrorValue::Num),
            "#N/A" => Ok(ErrorValue::NA),
            "#ERROR!" => Ok(ErrorValue::Other),
            _ => Err(ParseErrorValueError),
        }
    }
}

/// Failed to parse an [`ErrorValue`] from a string.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParseErrorValueError;

impl fmt::Display for ParseErrorValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid spreadsheet error value")
    }
}

impl std::error::Error for ParseErrorValueError {}

impl Serialize for ErrorValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_code())
    }
}

impl<'de> Deserialize<'de> for ErrorValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<ErrorValue>()
            .map_err(|_| D::Error::custom(format!("unknown spreadsheet error: {s}")))
    }
}

/// An error stored in (or flowing through) a cell: a kind plus a
/// human-readable message.
///
/// Errors are first-class cell values. They travel through evaluation like
/// any other value and are never raised in the control-flow sense.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellError {
    pub kind: ErrorValue,
    pub message: String,
}

impl CellError {
    pub fn new(kind: ErrorValue, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.is_empty() {
            return Self::from_kind(kind);
        }
        Self { kind, message }
    }

    /// An error carrying its display glyph as the message.
    pub fn from_kind(kind: ErrorValue) -> Self {
        Self {
            kind,
            message: kind.as_code().to_string(),
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CellError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_string_roundtrip() {
        for (err, s) in [
            (ErrorValue::Null, "#NULL!"),
            (ErrorValue::Div0, "#DIV/0!"),
            (ErrorValue::Value, "#VALUE!"),
            (ErrorValue::Ref, "#REF!"),
            (ErrorValue::Name, "#NAME?"),
            (ErrorValue::Num, "#NUM!"),
            (ErrorValue::NA, "#N/A"),
            (ErrorValue::Other, "#ERROR!"),
        ] {
            assert_eq!(err.as_code(), s);
            assert_eq!(err.to_string(), s);
            assert_eq!(s.parse::<ErrorValue>().unwrap(), err);
        }
    }

    #[test]
    fn numeric_code_roundtrip() {
        for code in 1..=8u8 {
            let err = ErrorValue::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
        assert_eq!(ErrorValue::from_code(0), None);
        assert_eq!(ErrorValue::from_code(9), None);
    }

    #[test]
    fn empty_message_falls_back_to_glyph() {
        let e = CellError::new(ErrorValue::Div0, "");
        assert_eq!(e.message, "#DIV/0!");
    }
}
