//! Builtin function library.
//!
//! Functions are registered with the inventory-backed registry from dedicated
//! modules. Dispatch is by upper-cased name: an unknown name is a `#NAME?`
//! error and an arity mismatch is `#N/A`. Arguments arrive pre-evaluated,
//! with errors passed **as values** so each builtin chooses whether to
//! propagate them.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Local};
use sheet_model::{CellError, CellValue, ErrorValue, SheetRange};

mod aggregate;
mod logical;
mod math;
mod text;
mod volatile;

pub use volatile::{Clock, RandomSource, SystemClock, ThreadRandom, MS_PER_DAY, SERIAL_EPOCH_MS};

/// Whether a builtin's result may change between passes with identical
/// inputs. Cells calling a volatile builtin are re-marked dirty at the start
/// of every recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    NonVolatile,
    Volatile,
}

/// An evaluated argument: a scalar value, or a lazily-iterated range.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Scalar(CellValue),
    Range(SheetRange),
}

/// The capabilities a builtin gets from the evaluator: cell reads for range
/// iteration, plus the injected clock and random source.
pub trait FunctionContext {
    fn cell_value(&self, sheet_id: u32, row: u32, col: u32) -> CellValue;
    fn now(&self) -> DateTime<Local>;
    fn next_random(&self) -> f64;
}

pub type FunctionImpl = fn(&dyn FunctionContext, &[ArgValue]) -> CellValue;

/// Upper bound used by variadic builtins.
pub const VAR_ARGS: usize = 255;

#[derive(Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub volatility: Volatility,
    pub implementation: FunctionImpl,
}

inventory::collect!(FunctionSpec);

fn registry() -> &'static HashMap<&'static str, &'static FunctionSpec> {
    static REGISTRY: OnceLock<HashMap<&'static str, &'static FunctionSpec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        for spec in inventory::iter::<FunctionSpec> {
            map.insert(spec.name, spec);
        }
        map
    })
}

pub fn lookup_function(name: &str) -> Option<&'static FunctionSpec> {
    registry().get(name.to_ascii_uppercase().as_str()).copied()
}

/// True if the named builtin is volatile (`NOW`, `TODAY`, `RAND`). Detection
/// is purely syntactic, by name.
pub fn is_volatile_function(name: &str) -> bool {
    lookup_function(name)
        .map(|spec| spec.volatility == Volatility::Volatile)
        .unwrap_or(false)
}

/// Dispatch a builtin call.
pub fn call_function(ctx: &dyn FunctionContext, name: &str, args: &[ArgValue]) -> CellValue {
    let Some(spec) = lookup_function(name) else {
        return CellValue::Error(CellError::new(
            ErrorValue::Name,
            format!("unknown function: {}", name.to_ascii_uppercase()),
        ));
    };

    if args.len() < spec.min_args || args.len() > spec.max_args {
        let expected = if spec.min_args == spec.max_args {
            format!("{} argument(s)", spec.min_args)
        } else {
            format!("{} to {} arguments", spec.min_args, spec.max_args)
        };
        return CellValue::Error(CellError::new(
            ErrorValue::NA,
            format!("{} expects {expected}", spec.name),
        ));
    }

    (spec.implementation)(ctx, args)
}

/// Lazy row-major iteration over the cells of a range. Empty cells are
/// observed as `Empty`.
pub struct RangeValues<'a> {
    ctx: &'a dyn FunctionContext,
    range: SheetRange,
    row: u32,
    col: u32,
    done: bool,
}

impl<'a> RangeValues<'a> {
    pub fn new(ctx: &'a dyn FunctionContext, range: SheetRange) -> Self {
        Self {
            ctx,
            range,
            row: range.range.start.row,
            col: range.range.start.col,
            done: false,
        }
    }
}

impl Iterator for RangeValues<'_> {
    type Item = CellValue;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let value = self.ctx.cell_value(self.range.sheet_id, self.row, self.col);

        if self.col < self.range.range.end.col {
            self.col += 1;
        } else if self.row < self.range.range.end.row {
            self.col = self.range.range.start.col;
            self.row += 1;
        } else {
            self.done = true;
        }

        Some(value)
    }
}

/// The error carried by a direct scalar argument, if any. Ranges are never
/// errors themselves.
pub(crate) fn scalar_error(arg: &ArgValue) -> Option<CellError> {
    match arg {
        ArgValue::Scalar(CellValue::Error(e)) => Some(e.clone()),
        _ => None,
    }
}

/// Coerce a direct argument for the scalar numeric builtins. Ranges do not
/// coerce.
pub(crate) fn arg_number(arg: &ArgValue) -> Option<f64> {
    match arg {
        ArgValue::Scalar(v) => v.coerce_to_number(),
        ArgValue::Range(_) => None,
    }
}

pub(crate) fn value_error(message: impl Into<String>) -> CellValue {
    CellValue::Error(CellError::new(ErrorValue::Value, message))
}

pub(crate) fn na_error(message: impl Into<String>) -> CellValue {
    CellValue::Error(CellError::new(ErrorValue::NA, message))
}

pub(crate) fn num_error(message: impl Into<String>) -> CellValue {
    CellValue::Error(CellError::new(ErrorValue::Num, message))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use sheet_model::Range;

    #[test]
    fn unknown_function_is_a_name_error() {
        let ctx = GridContext::default();
        let out = call_function(&ctx, "NOSUCHFN", &[]);
        assert_eq!(out.error_kind(), Some(ErrorValue::Name));
    }

    #[test]
    fn dispatch_is_case_insensitive() {
        let ctx = GridContext::default();
        assert_eq!(call_function(&ctx, "sum", &[num(1.0), num(2.0)]), CellValue::Number(3.0));
    }

    #[test]
    fn arity_mismatch_is_na() {
        let ctx = GridContext::default();
        assert_eq!(
            call_function(&ctx, "NOT", &[]).error_kind(),
            Some(ErrorValue::NA)
        );
        assert_eq!(
            call_function(&ctx, "PI", &[num(1.0)]).error_kind(),
            Some(ErrorValue::NA)
        );
        assert_eq!(
            call_function(&ctx, "IF", &[boolean(true)]).error_kind(),
            Some(ErrorValue::NA)
        );
    }

    #[test]
    fn volatile_detection_by_name() {
        assert!(is_volatile_function("NOW"));
        assert!(is_volatile_function("today"));
        assert!(is_volatile_function("Rand"));
        assert!(!is_volatile_function("SUM"));
        assert!(!is_volatile_function("NOSUCHFN"));
    }

    #[test]
    fn range_iteration_is_row_major() {
        let mut ctx = GridContext::default();
        for row in 0..2u32 {
            for col in 0..2u32 {
                ctx.cells.insert(
                    (1, row, col),
                    CellValue::Number(f64::from(row * 10 + col)),
                );
            }
        }

        let range = SheetRange::new(1, Range::from_a1("A1:B2").unwrap());
        let values: Vec<CellValue> = RangeValues::new(&ctx, range).collect();
        assert_eq!(
            values,
            vec![
                CellValue::Number(0.0),
                CellValue::Number(1.0),
                CellValue::Number(10.0),
                CellValue::Number(11.0),
            ]
        );
    }
}
