//! Recursive-descent formula parser.
//!
//! Precedence, lowest to highest: comparison, concatenation (`&`), additive,
//! multiplicative (`* / %`), power (`^`, right-associative), unary prefix
//! (`+ -`, chains allowed), postfix `%`, primary.
//!
//! Cell and range references are converted to offsets relative to the cell
//! being parsed; worksheet names are resolved to absolute ids through a
//! caller-provided resolver so unknown sheets can be interned on first
//! reference.

use sheet_model::ErrorValue;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::lexer::{LexError, Lexer, Token, TokenKind};

/// Parse failure. As with [`LexError`], the `kind` selects the spreadsheet
/// error stored in the cell when formula text fails to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub kind: ErrorValue,
}

impl ParseError {
    fn value(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorValue::Value,
        }
    }

    fn reference(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorValue::Ref,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            kind: err.kind,
        }
    }
}

/// Context for resolving references while parsing.
pub struct ParseContext<'a> {
    /// Worksheet owning the formula; baked into parsed references.
    pub current_sheet: u32,
    /// 0-based position of the cell being parsed; references are stored as
    /// offsets against it.
    pub current_row: u32,
    pub current_col: u32,
    /// Resolves a worksheet name to its id (0 when unknown). `Set` passes an
    /// interning resolver so not-yet-defined sheets get a stable id.
    pub resolve_sheet: Option<&'a mut dyn FnMut(&str) -> u32>,
}

impl<'a> ParseContext<'a> {
    /// Context for standalone parsing with no current cell.
    pub fn detached(resolve_sheet: Option<&'a mut dyn FnMut(&str) -> u32>) -> Self {
        Self {
            current_sheet: 0,
            current_row: 0,
            current_col: 0,
            resolve_sheet,
        }
    }
}

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    ctx: ParseContext<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, ctx: ParseContext<'a>) -> Self {
        Self {
            tokens,
            pos: 0,
            ctx,
        }
    }

    /// Parser for the standalone entry points; no token stream up front.
    pub fn with_context(ctx: ParseContext<'a>) -> Self {
        Self::new(Vec::new(), ctx)
    }

    /// Parse a full formula. Requires and consumes the leading `=`.
    pub fn parse(&mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::value("no tokens to parse"));
        }
        if self.peek_kind() != TokenKind::Equals {
            return Err(ParseError::value("formula must start with '='"));
        }
        self.pos += 1;

        let expr = self.parse_comparison()?;

        if self.peek_kind() != TokenKind::Eof {
            // A colon after a parsed cell means someone tried to build a
            // range out of worksheet-qualified endpoints.
            if self.peek_kind() == TokenKind::Colon && matches!(expr, Expr::CellRef { .. }) {
                return Err(ParseError::reference(
                    "cross-worksheet ranges are not supported",
                ));
            }
            return Err(ParseError::value(format!(
                "unexpected token after expression: {}",
                self.peek_text()
            )));
        }

        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_concatenation()?;

        while self.peek_kind() == TokenKind::BinaryOp {
            let op = match self.peek_text() {
                "=" => BinaryOp::Eq,
                "<>" | "!=" => BinaryOp::Ne,
                "<" => BinaryOp::Lt,
                "<=" => BinaryOp::Le,
                ">" => BinaryOp::Gt,
                ">=" => BinaryOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_concatenation()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_concatenation(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;

        while self.peek_kind() == TokenKind::BinaryOp && self.peek_text() == "&" {
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Expr::Binary {
                op: BinaryOp::Concat,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;

        while self.peek_kind() == TokenKind::BinaryOp {
            let op = match self.peek_text() {
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_power()?;

        while self.peek_kind() == TokenKind::BinaryOp {
            let op = match self.peek_text() {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                "%" => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_power()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_unary()?;

        if self.peek_kind() == TokenKind::BinaryOp && self.peek_text() == "^" {
            self.pos += 1;
            // Recurse at the same level for right-associativity.
            let right = self.parse_power()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.peek_kind() == TokenKind::UnaryPrefixOp {
            let op = match self.peek_text() {
                "+" => UnaryOp::Plus,
                "-" => UnaryOp::Minus,
                _ => return self.parse_postfix(),
            };
            self.pos += 1;
            // Recurse for chained unary operators.
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let node = self.parse_primary()?;

        if self.peek_kind() == TokenKind::UnaryPostfixOp && self.peek_text() == "%" {
            self.pos += 1;
            return Ok(Expr::Unary {
                op: UnaryOp::Percent,
                operand: Box::new(node),
            });
        }

        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ParseError::value("unexpected end of expression"))?;

        match tok.kind {
            TokenKind::Number => {
                self.pos += 1;
                let value: f64 = tok
                    .text
                    .parse()
                    .map_err(|_| ParseError::value(format!("invalid number: {}", tok.text)))?;
                Ok(Expr::Number(value))
            }
            TokenKind::Text => {
                self.pos += 1;
                Ok(Expr::Text(tok.text))
            }
            TokenKind::Bool => {
                self.pos += 1;
                Ok(Expr::Bool(tok.text == "TRUE"))
            }
            TokenKind::Cell => {
                self.pos += 1;
                self.parse_cell_reference(&tok)
            }
            TokenKind::Range => {
                self.pos += 1;
                self.parse_range(&tok)
            }
            TokenKind::Ident => {
                self.pos += 1;
                Ok(Expr::Name(tok.text))
            }
            TokenKind::Function => self.parse_function_call(),
            TokenKind::LeftParen => {
                self.pos += 1;
                let node = self.parse_comparison()?;
                if self.peek_kind() != TokenKind::RightParen {
                    return Err(ParseError::value("expected closing parenthesis"));
                }
                self.pos += 1;
                Ok(node)
            }
            TokenKind::Eof => Err(ParseError::value("unexpected end of expression")),
            _ => Err(ParseError::value(format!(
                "unexpected token: {}",
                tok.text
            ))),
        }
    }

    fn parse_function_call(&mut self) -> Result<Expr, ParseError> {
        let name = match self.tokens.get(self.pos) {
            Some(tok) if tok.kind == TokenKind::Function => tok.text.clone(),
            _ => return Err(ParseError::value("expected function name")),
        };
        self.pos += 1;

        if self.peek_kind() != TokenKind::LeftParen {
            return Err(ParseError::value("expected '(' after function name"));
        }
        self.pos += 1;

        let mut args = Vec::new();

        if self.peek_kind() == TokenKind::RightParen {
            self.pos += 1;
            return Ok(Expr::Call { name, args });
        }

        loop {
            let arg = self.parse_comparison()?;

            match self.peek_kind() {
                TokenKind::RightParen => {
                    args.push(arg);
                    self.pos += 1;
                    break;
                }
                TokenKind::Comma => {
                    args.push(arg);
                    self.pos += 1;
                }
                TokenKind::Colon if matches!(arg, Expr::CellRef { .. }) => {
                    return Err(ParseError::reference(
                        "cross-worksheet ranges are not supported",
                    ));
                }
                TokenKind::Eof => {
                    return Err(ParseError::value("unexpected end in function arguments"))
                }
                _ => {
                    return Err(ParseError::value(
                        "expected ',' or ')' in function arguments",
                    ))
                }
            }
        }

        Ok(Expr::Call { name, args })
    }

    /// Split a reference token into its worksheet prefix (resolved to an id)
    /// and the bare cell/range text.
    fn split_sheet_prefix(&mut self, text: &str) -> (u32, String) {
        match text.rsplit_once('!') {
            Some((sheet, rest)) => {
                let name = sheet
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .unwrap_or(sheet);
                let id = match self.ctx.resolve_sheet.as_mut() {
                    Some(resolve) => resolve(name),
                    None => 0,
                };
                (id, rest.to_string())
            }
            None => (self.ctx.current_sheet, text.to_string()),
        }
    }

    fn parse_cell_reference(&mut self, tok: &Token) -> Result<Expr, ParseError> {
        let (sheet_id, cell_str) = self.split_sheet_prefix(&tok.text);
        let (col, row) = parse_cell_address(&cell_str)?;

        Ok(Expr::CellRef {
            sheet_id,
            row_offset: (row - i64::from(self.ctx.current_row)) as i32,
            col_offset: (col - i64::from(self.ctx.current_col)) as i32,
        })
    }

    fn parse_range(&mut self, tok: &Token) -> Result<Expr, ParseError> {
        let (sheet_id, range_str) = self.split_sheet_prefix(&tok.text);

        let (start_str, end_str) = range_str
            .split_once(':')
            .ok_or_else(|| ParseError::reference(format!("invalid range format: {range_str}")))?;

        let (start_col, start_row) = parse_cell_address(start_str)
            .map_err(|_| ParseError::reference(format!("invalid start cell in range: {start_str}")))?;
        let (end_col, end_row) = parse_cell_address(end_str)
            .map_err(|_| ParseError::reference(format!("invalid end cell in range: {end_str}")))?;

        let row = i64::from(self.ctx.current_row);
        let col = i64::from(self.ctx.current_col);

        Ok(Expr::RangeRef {
            sheet_id,
            start_row_offset: (start_row - row) as i32,
            start_col_offset: (start_col - col) as i32,
            end_row_offset: (end_row - row) as i32,
            end_col_offset: (end_col - col) as i32,
        })
    }

    /// Parse a full textual address like `A1` or `Sheet1!B2` into
    /// `(worksheet_id, row, col)`. Ranges resolve to their start cell.
    /// The worksheet id is 0 when the address has no prefix and the context
    /// has no current worksheet.
    pub fn parse_full_address(&mut self, address: &str) -> Result<(u32, u32, u32), ParseError> {
        let tokens = Lexer::for_reference(address).tokenize()?;

        let tok = tokens
            .first()
            .filter(|t| t.kind != TokenKind::Eof)
            .cloned()
            .ok_or_else(|| ParseError::value(format!("no tokens found in address: {address}")))?;

        let (sheet_id, rest) = self.split_sheet_prefix(&tok.text);
        let cell_str = match tok.kind {
            TokenKind::Cell => rest,
            TokenKind::Range => rest
                .split_once(':')
                .map(|(start, _)| start.to_string())
                .ok_or_else(|| ParseError::value(format!("invalid range format: {rest}")))?,
            _ => {
                return Err(ParseError::value(format!(
                    "address is not a valid cell reference or range: {address}"
                )))
            }
        };

        let (col, row) = parse_cell_address(&cell_str)?;
        Ok((sheet_id, row as u32, col as u32))
    }

    /// Parse a standalone cell reference or range into an [`Expr`].
    pub fn parse_reference(&mut self, input: &str) -> Result<Expr, ParseError> {
        let tokens = Lexer::for_reference(input).tokenize()?;

        let tok = tokens
            .first()
            .filter(|t| t.kind != TokenKind::Eof)
            .cloned()
            .ok_or_else(|| ParseError::value(format!("no tokens found in input: {input}")))?;

        match tok.kind {
            TokenKind::Cell => self.parse_cell_reference(&tok),
            TokenKind::Range => self.parse_range(&tok),
            _ => Err(ParseError::reference(format!(
                "input is not a valid cell reference or range: {input}"
            ))),
        }
    }

    /// Parse a standalone (optionally signed) number literal.
    pub fn parse_number(&mut self, input: &str) -> Result<Expr, ParseError> {
        let tokens = Lexer::for_number(input).tokenize()?;

        let mut sign = 1.0;
        let mut index = 0;
        if tokens.len() >= 2 && tokens[0].kind == TokenKind::UnaryPrefixOp {
            match tokens[0].text.as_str() {
                "-" => sign = -1.0,
                "+" => {}
                _ => {
                    return Err(ParseError::value(format!(
                        "input is not a valid number: {input}"
                    )))
                }
            }
            index = 1;
        }

        let tok = tokens
            .get(index)
            .filter(|t| t.kind == TokenKind::Number)
            .ok_or_else(|| ParseError::value(format!("input is not a valid number: {input}")))?;
        // The sign and the number must account for the whole input.
        if tokens.len() != index + 2 {
            return Err(ParseError::value(format!(
                "input is not a valid number: {input}"
            )));
        }

        let value: f64 = tok
            .text
            .parse()
            .map_err(|_| ParseError::value(format!("invalid number format: {}", tok.text)))?;

        Ok(Expr::Number(sign * value))
    }

    /// Parse a standalone boolean literal.
    pub fn parse_boolean(&mut self, input: &str) -> Result<Expr, ParseError> {
        let tokens = Lexer::for_boolean(input).tokenize()?;

        let tok = tokens
            .first()
            .filter(|t| t.kind == TokenKind::Bool)
            .ok_or_else(|| ParseError::value(format!("input is not a valid boolean: {input}")))?;

        Ok(Expr::Bool(tok.text == "TRUE"))
    }

    /// Parse a standalone quoted string literal.
    pub fn parse_string(&mut self, input: &str) -> Result<Expr, ParseError> {
        let tokens = Lexer::for_string(input).tokenize()?;

        let tok = tokens
            .first()
            .filter(|t| t.kind == TokenKind::Text)
            .cloned()
            .ok_or_else(|| ParseError::value(format!("input is not a valid string: {input}")))?;

        Ok(Expr::Text(tok.text))
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn peek_text(&self) -> &str {
        self.tokens
            .get(self.pos)
            .map(|t| t.text.as_str())
            .unwrap_or("")
    }
}

/// Parse a bare cell address like `A1` into 0-based `(col, row)`.
fn parse_cell_address(cell: &str) -> Result<(i64, i64), ParseError> {
    if cell.len() < 2 {
        return Err(ParseError::reference(format!(
            "invalid cell reference: {cell}"
        )));
    }

    let bytes = cell.as_bytes();
    let mut letter_end = 0;
    while letter_end < bytes.len() && bytes[letter_end].is_ascii_alphabetic() {
        letter_end += 1;
    }

    if letter_end == 0 || letter_end == bytes.len() {
        return Err(ParseError::reference(format!(
            "invalid cell reference: {cell}"
        )));
    }

    // A = 0, B = 1, ..., Z = 25, AA = 26, AB = 27, ...
    let mut col: i64 = 0;
    for (i, b) in bytes[..letter_end].iter().enumerate() {
        col = col * 26 + i64::from(b.to_ascii_uppercase() - b'A');
        if i < letter_end - 1 {
            col += 1; // account for positional notation
        }
    }

    let row_str = &cell[letter_end..];
    let row_1_based: i64 = row_str
        .parse()
        .map_err(|_| ParseError::reference(format!("invalid row number: {row_str}")))?;
    if row_1_based < 1 {
        return Err(ParseError::reference(format!(
            "row number must be positive: {row_1_based}"
        )));
    }

    Ok((col, row_1_based - 1))
}
