//! Expression trees produced by the parser.
//!
//! Cell and range references are stored as **relative offsets** against the
//! cell that owns the formula, so identical formulas in different cells can
//! share one interned tree and survive relocation. Worksheet ids are resolved
//! at parse time and stored absolute (0 means "the owning cell's sheet").

use core::fmt;

use sheet_model::format_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "&",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Plus,
    Minus,
    /// Postfix percent: divides the operand by 100.
    Percent,
}

/// A parsed formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    /// A single-cell reference. `sheet_id = 0` resolves to the owning cell's
    /// worksheet at evaluation time.
    CellRef {
        sheet_id: u32,
        row_offset: i32,
        col_offset: i32,
    },
    /// A rectangular range on one worksheet.
    RangeRef {
        sheet_id: u32,
        start_row_offset: i32,
        start_col_offset: i32,
        end_row_offset: i32,
        end_col_offset: i32,
    },
    /// A named-range reference, looked up at evaluation time.
    Name(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A builtin function call. The name is folded to upper case.
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

/// The canonical printer doubles as the formula intern key: whitespace and
/// other source-level accidents never reach it, so two formulas with the same
/// tree print identically and share one interned id.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => f.write_str(&format_number(*n)),
            Expr::Text(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Expr::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Expr::CellRef {
                sheet_id,
                row_offset,
                col_offset,
            } => {
                if *sheet_id != 0 {
                    write!(f, "WS_REF({sheet_id},{row_offset},{col_offset})")
                } else {
                    write!(f, "REF({row_offset},{col_offset})")
                }
            }
            Expr::RangeRef {
                sheet_id,
                start_row_offset,
                start_col_offset,
                end_row_offset,
                end_col_offset,
            } => {
                if *sheet_id != 0 {
                    write!(
                        f,
                        "WS_RANGE({sheet_id},{start_row_offset},{start_col_offset},{end_row_offset},{end_col_offset})"
                    )
                } else {
                    write!(
                        f,
                        "RANGE({start_row_offset},{start_col_offset},{end_row_offset},{end_col_offset})"
                    )
                }
            }
            Expr::Name(name) => f.write_str(name),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Plus => write!(f, "+{operand}"),
                UnaryOp::Minus => write!(f, "-{operand}"),
                UnaryOp::Percent => write!(f, "({operand}%)"),
            },
            Expr::Binary { op, left, right } => {
                write!(f, "({left}{}{right})", op.symbol())
            }
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}
