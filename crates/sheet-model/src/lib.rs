//! `sheet-model` defines the core in-memory spreadsheet data structures.
//!
//! The crate is intentionally self-contained so it can be reused by:
//! - the calculation engine (lexer/parser, dependency graph, evaluation)
//! - host-facing API layers via `serde` (JSON-safe schema)

mod address;
mod error;
mod value;

pub use address::{A1ParseError, CellId, CellRef, Range, SheetRange};
pub use error::{CellError, ErrorValue, ParseErrorValueError};
pub use value::{format_number, CellValue};

/// Reserved worksheet id meaning "no worksheet". Real ids start at 1.
pub const NO_WORKSHEET: u32 = 0;
