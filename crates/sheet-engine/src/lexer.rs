//! State-validated formula tokenizer.
//!
//! The lexer is a state machine over the source position: after each token it
//! consults a transition table listing which token kinds may legally follow,
//! and a violation aborts tokenization. Parenthesis depth must end at zero and
//! string literals must be closed. Whitespace is skipped and otherwise
//! insignificant.

use sheet_model::ErrorValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,
    /// The leading `=` formula sigil. A later `=` lexes as [`TokenKind::BinaryOp`].
    Equals,
    Number,
    Text,
    Bool,
    Cell,
    Range,
    Function,
    UnaryPrefixOp,
    UnaryPostfixOp,
    BinaryOp,
    Comma,
    Colon,
    LeftParen,
    RightParen,
    Ident,
}

/// A lexical token with its source position (in characters).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, pos: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            pos,
        }
    }
}

/// Tokenization failure. The `kind` selects the spreadsheet error stored in
/// the cell when formula text fails to lex (`Ref` for cross-worksheet range
/// attempts, `Value` otherwise).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub kind: ErrorValue,
    pub pos: usize,
}

impl LexError {
    fn value(message: impl Into<String>, pos: usize) -> Self {
        Self {
            message: message.into(),
            kind: ErrorValue::Value,
            pos,
        }
    }

    fn reference(message: impl Into<String>, pos: usize) -> Self {
        Self {
            message: message.into(),
            kind: ErrorValue::Ref,
            pos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerState {
    Start,
    AfterEquals,
    AfterValue,
    AfterOperator,
    AfterLeftParen,
    AfterRightParen,
    AfterComma,
    AfterColon,
    AfterIdent,
}

/// Which token kinds may follow in the given state.
fn allowed_after(state: LexerState, kind: TokenKind) -> bool {
    use TokenKind::*;
    match state {
        LexerState::Start => matches!(
            kind,
            Equals | UnaryPrefixOp | Number | Text | Bool | Cell | Range | Function | Ident
                | LeftParen
        ),
        LexerState::AfterEquals => matches!(
            kind,
            Number | Text | Bool | Cell | Range | Function | Ident | LeftParen | UnaryPrefixOp
        ),
        // Whitespace is insignificant, so two adjacent values can never be
        // separated by it; a value must be followed by an operator or a
        // closing delimiter.
        LexerState::AfterValue => {
            matches!(kind, BinaryOp | UnaryPostfixOp | RightParen | Comma | Eof)
        }
        LexerState::AfterOperator => matches!(
            kind,
            Number | Text | Bool | Cell | Function | Ident | LeftParen | UnaryPrefixOp
        ),
        LexerState::AfterLeftParen => matches!(
            kind,
            Number | Text | Bool | Cell | Range | Function | Ident | LeftParen | UnaryPrefixOp
                | RightParen
        ),
        LexerState::AfterRightParen => {
            matches!(kind, BinaryOp | UnaryPostfixOp | RightParen | Comma | Eof)
        }
        LexerState::AfterComma => matches!(
            kind,
            Number | Text | Bool | Cell | Range | Function | Ident | LeftParen | UnaryPrefixOp
        ),
        LexerState::AfterColon => matches!(kind, Cell),
        LexerState::AfterIdent => {
            matches!(kind, LeftParen | BinaryOp | UnaryPostfixOp | RightParen | Comma | Eof)
        }
    }
}

/// Tokenizes formula source (and, via the specialized constructors, the
/// standalone value grammars used for address/number/boolean/string parsing).
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    state: LexerState,
    paren_depth: i32,
    /// For specialized lexers: the only token kinds accepted, bypassing the
    /// state transition table.
    expected: Option<&'static [TokenKind]>,
}

impl Lexer {
    /// Full formula lexer. Input must start with `=`.
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            state: LexerState::Start,
            paren_depth: 0,
            expected: None,
        }
    }

    /// Lexer accepting a single cell reference or range.
    pub fn for_reference(input: &str) -> Self {
        Self {
            expected: Some(&[TokenKind::Cell, TokenKind::Range]),
            ..Self::new(input)
        }
    }

    /// Lexer accepting a single (optionally signed) number.
    pub fn for_number(input: &str) -> Self {
        Self {
            expected: Some(&[TokenKind::UnaryPrefixOp, TokenKind::Number]),
            ..Self::new(input)
        }
    }

    /// Lexer accepting a single boolean literal.
    pub fn for_boolean(input: &str) -> Self {
        Self {
            expected: Some(&[TokenKind::Bool]),
            ..Self::new(input)
        }
    }

    /// Lexer accepting a single string literal.
    pub fn for_string(input: &str) -> Self {
        Self {
            expected: Some(&[TokenKind::Text]),
            ..Self::new(input)
        }
    }

    /// Tokenize the entire input. The returned stream always ends with an
    /// [`TokenKind::Eof`] token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        if self.expected.is_none() && self.chars.first() != Some(&'=') {
            return Err(LexError::value("formula must start with '='", 0));
        }

        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            if tok.kind == TokenKind::Eof {
                break;
            }

            if let Some(expected) = self.expected {
                if !expected.contains(&tok.kind) {
                    return Err(LexError::value(
                        format!("unexpected token: {}", tok.text),
                        tok.pos,
                    ));
                }
            } else if !allowed_after(self.state, tok.kind) {
                return Err(LexError::value(
                    format!("unexpected token: {}", tok.text),
                    tok.pos,
                ));
            }

            self.update_state(tok.kind);
            tokens.push(tok);
        }

        if self.paren_depth > 0 {
            return Err(LexError::value(
                "unbalanced parentheses: missing closing parenthesis",
                self.pos,
            ));
        }

        tokens.push(Token::new(TokenKind::Eof, "", self.pos));
        Ok(tokens)
    }

    fn update_state(&mut self, kind: TokenKind) {
        use TokenKind::*;
        self.state = match kind {
            Equals => LexerState::AfterEquals,
            Number | Text | Bool | Cell | Range => LexerState::AfterValue,
            UnaryPrefixOp | BinaryOp => LexerState::AfterOperator,
            // Postfix operators keep the current state.
            UnaryPostfixOp => self.state,
            LeftParen => LexerState::AfterLeftParen,
            RightParen => LexerState::AfterRightParen,
            Comma => LexerState::AfterComma,
            Colon => LexerState::AfterColon,
            Ident | Function => LexerState::AfterIdent,
            Eof => self.state,
        };
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        if self.pos >= self.chars.len() {
            return Ok(Token::new(TokenKind::Eof, "", self.pos));
        }

        let start = self.pos;
        let ch = self.current();

        if ch == '"' {
            return self.scan_string();
        }
        if ch == '\'' {
            return self.scan_quoted_sheet_ref();
        }
        if ch.is_ascii_digit() || (ch == '.' && self.peek(1).is_ascii_digit()) {
            return Ok(self.scan_number());
        }

        match ch {
            '(' => {
                self.pos += 1;
                self.paren_depth += 1;
                Ok(Token::new(TokenKind::LeftParen, "(", start))
            }
            ')' => {
                self.pos += 1;
                self.paren_depth -= 1;
                if self.paren_depth < 0 {
                    return Err(LexError::value("unexpected closing parenthesis", start));
                }
                Ok(Token::new(TokenKind::RightParen, ")", start))
            }
            ',' => {
                self.pos += 1;
                Ok(Token::new(TokenKind::Comma, ",", start))
            }
            ':' => {
                self.pos += 1;
                Ok(Token::new(TokenKind::Colon, ":", start))
            }
            '+' | '-' => Ok(self.scan_plus_minus()),
            '*' | '/' | '^' | '&' => {
                self.pos += 1;
                Ok(Token::new(TokenKind::BinaryOp, ch, start))
            }
            '%' => Ok(self.scan_percent()),
            '=' => {
                self.pos += 1;
                if start == 0 {
                    Ok(Token::new(TokenKind::Equals, "=", start))
                } else {
                    Ok(Token::new(TokenKind::BinaryOp, "=", start))
                }
            }
            '<' => {
                self.pos += 1;
                match self.current() {
                    '=' => {
                        self.pos += 1;
                        Ok(Token::new(TokenKind::BinaryOp, "<=", start))
                    }
                    '>' => {
                        self.pos += 1;
                        Ok(Token::new(TokenKind::BinaryOp, "<>", start))
                    }
                    _ => Ok(Token::new(TokenKind::BinaryOp, "<", start)),
                }
            }
            '>' => {
                self.pos += 1;
                if self.current() == '=' {
                    self.pos += 1;
                    Ok(Token::new(TokenKind::BinaryOp, ">=", start))
                } else {
                    Ok(Token::new(TokenKind::BinaryOp, ">", start))
                }
            }
            '!' => {
                if self.peek(1) == '=' {
                    self.pos += 2;
                    Ok(Token::new(TokenKind::BinaryOp, "!=", start))
                } else {
                    Err(LexError::value("unexpected '!'", start))
                }
            }
            _ if ch.is_ascii_alphabetic() || ch == '_' => self.scan_ident_or_cell(),
            _ => Err(LexError::value(format!("unexpected character: {ch}"), start)),
        }
    }

    fn current(&self) -> char {
        self.chars.get(self.pos).copied().unwrap_or('\0')
    }

    fn peek(&self, offset: usize) -> char {
        self.chars.get(self.pos + offset).copied().unwrap_or('\0')
    }

    fn substring(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current(), ' ' | '\t' | '\n' | '\r') {
            self.pos += 1;
        }
    }

    /// Scan a number including decimals and scientific notation. The exponent
    /// marker is only consumed when followed by at least one digit; otherwise
    /// the lexer backtracks so `1e` lexes as the number `1` and the ident `e`.
    fn scan_number(&mut self) -> Token {
        let start = self.pos;

        while self.current().is_ascii_digit() {
            self.pos += 1;
        }

        if self.current() == '.' && self.peek(1).is_ascii_digit() {
            self.pos += 1;
            while self.current().is_ascii_digit() {
                self.pos += 1;
            }
        }

        if matches!(self.current(), 'e' | 'E') {
            let saved = self.pos;
            self.pos += 1;
            if matches!(self.current(), '+' | '-') {
                self.pos += 1;
            }
            if self.current().is_ascii_digit() {
                while self.current().is_ascii_digit() {
                    self.pos += 1;
                }
            } else {
                self.pos = saved;
            }
        }

        Token::new(TokenKind::Number, self.substring(start, self.pos), start)
    }

    /// Scan a string literal. `""` inside the literal escapes a double quote.
    fn scan_string(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.pos += 1; // consume opening quote

        let mut result = String::new();
        while self.pos < self.chars.len() {
            let ch = self.current();
            if ch == '"' {
                if self.peek(1) == '"' {
                    result.push('"');
                    self.pos += 2;
                } else {
                    self.pos += 1; // consume closing quote
                    return Ok(Token::new(TokenKind::Text, result, start));
                }
            } else {
                result.push(ch);
                self.pos += 1;
            }
        }

        Err(LexError::value("unclosed string literal", start))
    }

    /// Scan identifiers, functions, cells, ranges, and booleans.
    fn scan_ident_or_cell(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        while self.current().is_ascii_alphanumeric() || self.current() == '_' {
            self.pos += 1;
        }

        let value = self.substring(start, self.pos);
        let upper = value.to_ascii_uppercase();

        if upper == "TRUE" || upper == "FALSE" {
            return Ok(Token::new(TokenKind::Bool, upper, start));
        }

        // A worksheet name directly followed by `!`.
        if self.current() == '!' && self.peek(1) != '=' {
            self.pos += 1;
            return self.scan_reference_after_bang(start);
        }

        if is_cell(&value) {
            if self.current() == ':' {
                let saved = self.pos;
                self.pos += 1;

                let cell_start = self.pos;
                while self.current().is_ascii_alphanumeric() {
                    self.pos += 1;
                }

                let second = self.substring(cell_start, self.pos);
                if is_cell(&second) {
                    if self.current() == '!' {
                        return Err(LexError::reference(
                            "invalid range reference: ranges may not span worksheets",
                            start,
                        ));
                    }
                    return Ok(Token::new(
                        TokenKind::Range,
                        self.substring(start, self.pos),
                        start,
                    ));
                }
                // Not a valid range; restore and emit just the cell.
                self.pos = saved;
            }
            return Ok(Token::new(TokenKind::Cell, value, start));
        }

        if self.current() == '(' {
            return Ok(Token::new(TokenKind::Function, upper, start));
        }

        Ok(Token::new(TokenKind::Ident, value, start))
    }

    /// Scan a single-quoted worksheet reference: `'Sheet name'!A1` or
    /// `'Sheet name'!A1:B2`.
    fn scan_quoted_sheet_ref(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.pos += 1; // consume opening quote

        while self.pos < self.chars.len() && self.current() != '\'' {
            self.pos += 1;
        }
        if self.pos >= self.chars.len() {
            return Err(LexError::value("unclosed worksheet name", start));
        }
        self.pos += 1; // consume closing quote

        if self.current() != '!' {
            return Err(LexError::value("expected '!' after worksheet name", start));
        }
        self.pos += 1;

        self.scan_reference_after_bang(start)
    }

    /// Scan the `Cell` or `Cell:Cell` part of a worksheet-qualified
    /// reference; `start` is where the worksheet name began so the token text
    /// keeps the full qualified form.
    fn scan_reference_after_bang(&mut self, start: usize) -> Result<Token, LexError> {
        let cell_start = self.pos;
        while self.current().is_ascii_alphanumeric() {
            self.pos += 1;
        }

        let cell = self.substring(cell_start, self.pos);
        if !is_cell(&cell) {
            return Err(LexError::reference(
                "invalid cell reference after worksheet",
                start,
            ));
        }

        if self.current() == ':' {
            self.pos += 1;
            let second_start = self.pos;
            while self.current().is_ascii_alphanumeric() {
                self.pos += 1;
            }

            let second = self.substring(second_start, self.pos);
            if !is_cell(&second) {
                return Err(LexError::reference("invalid range reference", start));
            }
            if self.current() == '!' {
                return Err(LexError::reference(
                    "invalid range reference: ranges may not span worksheets",
                    start,
                ));
            }
            return Ok(Token::new(
                TokenKind::Range,
                self.substring(start, self.pos),
                start,
            ));
        }

        Ok(Token::new(
            TokenKind::Cell,
            self.substring(start, self.pos),
            start,
        ))
    }

    /// `+` and `-` disambiguate to unary prefix when the state indicates the
    /// start of an operand, else binary.
    fn scan_plus_minus(&mut self) -> Token {
        let start = self.pos;
        let ch = self.current();
        self.pos += 1;

        let unary = matches!(
            self.state,
            LexerState::Start
                | LexerState::AfterEquals
                | LexerState::AfterOperator
                | LexerState::AfterLeftParen
                | LexerState::AfterComma
        );
        if unary {
            Token::new(TokenKind::UnaryPrefixOp, ch, start)
        } else {
            Token::new(TokenKind::BinaryOp, ch, start)
        }
    }

    /// `%` after a value is postfix percent unless the next non-whitespace
    /// character starts an operand, in which case it is the modulo operator.
    /// A following `+`/`-` reads as an operator, so `50%+1` is `(50%)+1`.
    fn scan_percent(&mut self) -> Token {
        let start = self.pos;
        self.pos += 1;

        let mut look = self.pos;
        while look < self.chars.len() && matches!(self.chars[look], ' ' | '\t' | '\n' | '\r') {
            look += 1;
        }
        let next = self.chars.get(look).copied().unwrap_or('\0');
        let starts_value = next.is_ascii_alphanumeric()
            || matches!(next, '.' | '_' | '(' | '"' | '\'');

        if starts_value {
            Token::new(TokenKind::BinaryOp, "%", start)
        } else {
            Token::new(TokenKind::UnaryPostfixOp, "%", start)
        }
    }
}

/// True if `s` is an A1-style cell reference: one or more ASCII letters
/// followed by one or more digits.
fn is_cell(s: &str) -> bool {
    if s.len() < 2 {
        return false;
    }

    let bytes = s.as_bytes();
    let mut letter_end = 0;
    while letter_end < bytes.len() && bytes[letter_end].is_ascii_alphabetic() {
        letter_end += 1;
    }

    if letter_end == 0 || letter_end == bytes.len() {
        return false;
    }

    bytes[letter_end..].iter().all(u8::is_ascii_digit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn basic_arithmetic() {
        assert_eq!(
            kinds("=1+2*3"),
            vec![
                TokenKind::Equals,
                TokenKind::Number,
                TokenKind::BinaryOp,
                TokenKind::Number,
                TokenKind::BinaryOp,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn requires_leading_equals() {
        let err = Lexer::new("1+2").tokenize().unwrap_err();
        assert_eq!(err.kind, ErrorValue::Value);
    }

    #[test]
    fn adjacent_values_are_rejected() {
        assert!(Lexer::new("=1 2").tokenize().is_err());
        assert!(Lexer::new(r#"="a" "b""#).tokenize().is_err());
    }

    #[test]
    fn unbalanced_parens_are_rejected() {
        assert!(Lexer::new("=(1+2").tokenize().is_err());
        assert!(Lexer::new("=1+2)").tokenize().is_err());
    }

    #[test]
    fn scientific_notation_backtracks_without_exponent_digits() {
        let tokens = Lexer::new("=1.5e3").tokenize().unwrap();
        assert_eq!(tokens[1].text, "1.5e3");

        // `2e` is the number 2 followed by the identifier `e`, which the
        // state machine then rejects after a value.
        assert!(Lexer::new("=2e").tokenize().is_err());
    }

    #[test]
    fn string_escapes() {
        let tokens = Lexer::new(r#"="say ""hi""""#).tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Text);
        assert_eq!(tokens[1].text, r#"say "hi""#);

        let err = Lexer::new(r#"="open"#).tokenize().unwrap_err();
        assert_eq!(err.message, "unclosed string literal");
    }

    #[test]
    fn booleans_are_case_insensitive() {
        let tokens = Lexer::new("=true").tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Bool);
        assert_eq!(tokens[1].text, "TRUE");
    }

    #[test]
    fn cells_ranges_functions_and_idents() {
        let tokens = Lexer::new("=SUM(A1:B2,C3,Total)").tokenize().unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Equals,
                TokenKind::Function,
                TokenKind::LeftParen,
                TokenKind::Range,
                TokenKind::Comma,
                TokenKind::Cell,
                TokenKind::Comma,
                TokenKind::Ident,
                TokenKind::RightParen,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[1].text, "SUM");
        assert_eq!(tokens[7].text, "Total");
    }

    #[test]
    fn worksheet_qualified_references() {
        let tokens = Lexer::new("=Sheet2!A1").tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Cell);
        assert_eq!(tokens[1].text, "Sheet2!A1");

        let tokens = Lexer::new("='My Sheet'!A1:B2").tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Range);
        assert_eq!(tokens[1].text, "'My Sheet'!A1:B2");
    }

    #[test]
    fn cross_worksheet_ranges_are_ref_errors() {
        let err = Lexer::new("=Sheet1!A1:Sheet2!B2").tokenize().unwrap_err();
        assert_eq!(err.kind, ErrorValue::Ref);

        let err = Lexer::new("=A1:Sheet2!B2").tokenize().unwrap_err();
        assert_eq!(err.kind, ErrorValue::Ref);
    }

    #[test]
    fn percent_is_postfix_or_modulo_by_lookahead() {
        let tokens = Lexer::new("=50%").tokenize().unwrap();
        assert_eq!(tokens[2].kind, TokenKind::UnaryPostfixOp);

        let tokens = Lexer::new("=5%2").tokenize().unwrap();
        assert_eq!(tokens[2].kind, TokenKind::BinaryOp);
        assert_eq!(tokens[2].text, "%");

        // A following operator keeps `%` postfix.
        let tokens = Lexer::new("=50%+1").tokenize().unwrap();
        assert_eq!(tokens[2].kind, TokenKind::UnaryPostfixOp);
        assert_eq!(tokens[3].kind, TokenKind::BinaryOp);
    }

    #[test]
    fn inequality_synonyms() {
        let tokens = Lexer::new("=1<>2").tokenize().unwrap();
        assert_eq!(tokens[2].text, "<>");

        let tokens = Lexer::new("=1!=2").tokenize().unwrap();
        assert_eq!(tokens[2].text, "!=");
    }

    #[test]
    fn unary_binary_disambiguation() {
        let tokens = Lexer::new("=-1+-2").tokenize().unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Equals,
                TokenKind::UnaryPrefixOp,
                TokenKind::Number,
                TokenKind::BinaryOp,
                TokenKind::UnaryPrefixOp,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn specialized_lexers_accept_only_their_kinds() {
        assert!(Lexer::for_number("-12.5").tokenize().is_ok());
        assert!(Lexer::for_number("abc").tokenize().is_err());
        assert!(Lexer::for_boolean("TRUE").tokenize().is_ok());
        assert!(Lexer::for_boolean("1").tokenize().is_err());
        assert!(Lexer::for_reference("B2").tokenize().is_ok());
        assert!(Lexer::for_reference("A1:C3").tokenize().is_ok());
        assert!(Lexer::for_reference("12").tokenize().is_err());
        assert!(Lexer::for_string(r#""hi""#).tokenize().is_ok());
    }

    #[test]
    fn leading_decimal_point_numbers() {
        let tokens = Lexer::new("=.5+1").tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Number);
        assert_eq!(tokens[1].text, ".5");
    }
}
