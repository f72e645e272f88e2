//! Tree-walking formula evaluator.
//!
//! Evaluation is threaded with the "current cell" so relative offsets can be
//! resolved to absolute coordinates. Errors are values: they propagate
//! left-to-right through operators and are handed to builtins as arguments,
//! never raised.

use std::cmp::Ordering;

use chrono::{DateTime, Local};
use sheet_model::{CellError, CellId, CellRef, CellValue, ErrorValue, Range, SheetRange};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::functions::{self, ArgValue, FunctionContext};

/// Read access the evaluator needs from its host.
pub trait ValueResolver {
    /// Whether `sheet_id` currently has a definition.
    fn sheet_defined(&self, sheet_id: u32) -> bool;
    /// The displayed value of a cell (formula cells yield their cached
    /// result; absent cells yield `Empty`).
    fn cell_value(&self, id: CellId) -> CellValue;
    /// Resolve a named range to its bound rectangle.
    fn resolve_named_range(&self, name: &str) -> Result<SheetRange, CellError>;
    fn clock_now(&self) -> DateTime<Local>;
    fn next_random(&self) -> f64;
}

/// What a subexpression evaluates to: a scalar, or a lazily-iterated range
/// handed to builtins. Ranges are never stored in cells.
enum EvalValue {
    Scalar(CellValue),
    Range(SheetRange),
}

pub struct Evaluator<'a, R: ValueResolver> {
    resolver: &'a R,
    current: CellId,
}

impl<'a, R: ValueResolver> Evaluator<'a, R> {
    pub fn new(resolver: &'a R, current: CellId) -> Self {
        Self { resolver, current }
    }

    /// Evaluate a formula tree to the value stored as the cell's result.
    ///
    /// An empty scalar (a reference to an empty cell) lands as the number 0;
    /// a bare range result has no scalar meaning and lands as `Empty`.
    pub fn eval_root(&self, expr: &Expr) -> CellValue {
        match self.eval_value(expr) {
            EvalValue::Scalar(CellValue::Empty) => CellValue::Number(0.0),
            EvalValue::Scalar(v) => v,
            EvalValue::Range(_) => CellValue::Empty,
        }
    }

    fn eval_value(&self, expr: &Expr) -> EvalValue {
        match expr {
            Expr::Number(n) => EvalValue::Scalar(CellValue::Number(*n)),
            Expr::Text(s) => EvalValue::Scalar(CellValue::Text(s.clone())),
            Expr::Bool(b) => EvalValue::Scalar(CellValue::Bool(*b)),

            Expr::CellRef {
                sheet_id,
                row_offset,
                col_offset,
            } => {
                let Some(cell) = self.resolve_offset(*row_offset, *col_offset) else {
                    return scalar_error(ErrorValue::Ref, "invalid cell reference");
                };
                let sheet_id = self.resolve_sheet(*sheet_id);
                if !self.resolver.sheet_defined(sheet_id) {
                    return scalar_error(ErrorValue::Ref, "worksheet not found");
                }
                EvalValue::Scalar(self.resolver.cell_value(CellId {
                    sheet_id,
                    cell,
                }))
            }

            Expr::RangeRef {
                sheet_id,
                start_row_offset,
                start_col_offset,
                end_row_offset,
                end_col_offset,
            } => {
                let start = self.resolve_offset(*start_row_offset, *start_col_offset);
                let end = self.resolve_offset(*end_row_offset, *end_col_offset);
                let (Some(start), Some(end)) = (start, end) else {
                    return scalar_error(ErrorValue::Ref, "invalid range reference");
                };
                let sheet_id = self.resolve_sheet(*sheet_id);
                if !self.resolver.sheet_defined(sheet_id) {
                    return scalar_error(ErrorValue::Ref, "worksheet not found");
                }
                EvalValue::Range(SheetRange::new(sheet_id, Range::new(start, end)))
            }

            Expr::Name(name) => match self.resolver.resolve_named_range(name) {
                Ok(range) => EvalValue::Range(range),
                Err(e) => EvalValue::Scalar(CellValue::Error(e)),
            },

            Expr::Unary { op, operand } => {
                let v = self.eval_scalar(operand);
                if v.is_error() {
                    return EvalValue::Scalar(v);
                }
                let Some(n) = v.coerce_to_number() else {
                    let what = match op {
                        UnaryOp::Plus => "unary plus",
                        UnaryOp::Minus => "negation",
                        UnaryOp::Percent => "percent",
                    };
                    return scalar_error(
                        ErrorValue::Value,
                        format!("{what} requires a numeric value"),
                    );
                };
                let out = match op {
                    UnaryOp::Plus => n,
                    UnaryOp::Minus => -n,
                    UnaryOp::Percent => n / 100.0,
                };
                EvalValue::Scalar(CellValue::Number(out))
            }

            Expr::Binary { op, left, right } => {
                let l = self.eval_scalar(left);
                if l.is_error() {
                    return EvalValue::Scalar(l);
                }
                let r = self.eval_scalar(right);
                if r.is_error() {
                    return EvalValue::Scalar(r);
                }
                EvalValue::Scalar(apply_binary(*op, &l, &r))
            }

            Expr::Call { name, args } => {
                let args: Vec<ArgValue> = args
                    .iter()
                    .map(|arg| match self.eval_value(arg) {
                        EvalValue::Scalar(v) => ArgValue::Scalar(v),
                        EvalValue::Range(r) => ArgValue::Range(r),
                    })
                    .collect();
                EvalValue::Scalar(functions::call_function(self, name, &args))
            }
        }
    }

    /// Evaluate to a single scalar. A multi-cell construct in scalar position
    /// is a type error.
    fn eval_scalar(&self, expr: &Expr) -> CellValue {
        match self.eval_value(expr) {
            EvalValue::Scalar(v) => v,
            EvalValue::Range(_) => CellValue::Error(CellError::new(
                ErrorValue::Value,
                "range used where a single value is expected",
            )),
        }
    }

    fn resolve_sheet(&self, sheet_id: u32) -> u32 {
        if sheet_id == 0 {
            self.current.sheet_id
        } else {
            sheet_id
        }
    }

    fn resolve_offset(&self, row_offset: i32, col_offset: i32) -> Option<CellRef> {
        let row = i64::from(self.current.cell.row) + i64::from(row_offset);
        let col = i64::from(self.current.cell.col) + i64::from(col_offset);
        Some(CellRef::new(
            u32::try_from(row).ok()?,
            u32::try_from(col).ok()?,
        ))
    }
}

impl<'a, R: ValueResolver> FunctionContext for Evaluator<'a, R> {
    fn cell_value(&self, sheet_id: u32, row: u32, col: u32) -> CellValue {
        self.resolver.cell_value(CellId::new(sheet_id, row, col))
    }

    fn now(&self) -> DateTime<Local> {
        self.resolver.clock_now()
    }

    fn next_random(&self) -> f64 {
        self.resolver.next_random()
    }
}

fn scalar_error(kind: ErrorValue, message: impl Into<String>) -> EvalValue {
    EvalValue::Scalar(CellValue::Error(CellError::new(kind, message)))
}

fn numeric_error(what: &str) -> CellValue {
    CellValue::Error(CellError::new(
        ErrorValue::Value,
        format!("{what} requires numeric values"),
    ))
}

fn apply_binary(op: BinaryOp, l: &CellValue, r: &CellValue) -> CellValue {
    match op {
        BinaryOp::Add => match (l.coerce_to_number(), r.coerce_to_number()) {
            (Some(a), Some(b)) => CellValue::Number(a + b),
            _ => numeric_error("addition"),
        },
        BinaryOp::Sub => match (l.coerce_to_number(), r.coerce_to_number()) {
            (Some(a), Some(b)) => CellValue::Number(a - b),
            _ => numeric_error("subtraction"),
        },
        BinaryOp::Mul => match (l.coerce_to_number(), r.coerce_to_number()) {
            (Some(a), Some(b)) => CellValue::Number(a * b),
            _ => numeric_error("multiplication"),
        },
        BinaryOp::Div => match (l.coerce_to_number(), r.coerce_to_number()) {
            (Some(a), Some(b)) => {
                if b == 0.0 {
                    CellValue::Error(CellError::new(ErrorValue::Div0, "division by zero"))
                } else {
                    CellValue::Number(a / b)
                }
            }
            _ => numeric_error("division"),
        },
        BinaryOp::Mod => match (l.coerce_to_number(), r.coerce_to_number()) {
            (Some(a), Some(b)) => {
                if b == 0.0 {
                    CellValue::Error(CellError::new(ErrorValue::Div0, "division by zero"))
                } else {
                    CellValue::Number(a % b)
                }
            }
            _ => numeric_error("modulo"),
        },
        BinaryOp::Pow => match (l.coerce_to_number(), r.coerce_to_number()) {
            (Some(a), Some(b)) => CellValue::Number(a.powf(b)),
            _ => numeric_error("power"),
        },
        BinaryOp::Concat => {
            CellValue::Text(format!("{}{}", l.coerce_to_text(), r.coerce_to_text()))
        }
        BinaryOp::Eq => CellValue::Bool(compare_values(l, r) == Ordering::Equal),
        BinaryOp::Ne => CellValue::Bool(compare_values(l, r) != Ordering::Equal),
        BinaryOp::Lt => CellValue::Bool(compare_values(l, r) == Ordering::Less),
        BinaryOp::Le => CellValue::Bool(compare_values(l, r) != Ordering::Greater),
        BinaryOp::Gt => CellValue::Bool(compare_values(l, r) == Ordering::Greater),
        BinaryOp::Ge => CellValue::Bool(compare_values(l, r) != Ordering::Less),
    }
}

/// Comparison is numeric when both sides coerce (so `FALSE < TRUE` and
/// `"10" = 10`), and lexical over the textual form otherwise.
fn compare_values(l: &CellValue, r: &CellValue) -> Ordering {
    if let (Some(a), Some(b)) = (l.coerce_to_number(), r.coerce_to_number()) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    if let (CellValue::Bool(a), CellValue::Bool(b)) = (l, r) {
        return a.cmp(b);
    }
    l.coerce_to_text().cmp(&r.coerce_to_text())
}
