//! Lexer (tokenizer) for ClassAd source text.
//!
//! Converts source text into a stream of [`token::Token`]s for the parser.

pub mod token;

use crate::ast::Factor;
use crate::errors::{ClassAdError, ClassAdResult};
use token::{SourceLocation, Token, TokenKind};

/// Lexer for the ClassAd expression syntax
pub struct Lexer<'a> {
    /// Source text being lexed
    source: &'a str,
    /// Characters with their byte offsets
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    /// Current position in bytes
    position: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
    /// Start position of current token
    token_start: usize,
    token_start_line: usize,
    token_start_column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            position: 0,
            line: 1,
            column: 1,
            token_start: 0,
            token_start_line: 1,
            token_start_column: 1,
        }
    }

    pub fn source(&self) -> &str {
        self.source
    }

    /// Tokenize the whole input, ending with an `Eof` token
    pub fn tokenize(&mut self) -> ClassAdResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    /// Get the next token from the input
    pub fn next_token(&mut self) -> ClassAdResult<Token> {
        self.skip_whitespace_and_comments()?;

        self.token_start = self.position;
        self.token_start_line = self.line;
        self.token_start_column = self.column;

        let Some(ch) = self.peek_char() else {
            return Ok(self.make_token(TokenKind::Eof));
        };

        match ch {
            'a'..='z' | 'A'..='Z' | '_' => Ok(self.lex_identifier()),
            '0'..='9' => self.lex_number(),
            '"' => self.lex_string(),
            '[' => Ok(self.single(TokenKind::LeftBracket)),
            ']' => Ok(self.single(TokenKind::RightBracket)),
            '{' => Ok(self.single(TokenKind::LeftBrace)),
            '}' => Ok(self.single(TokenKind::RightBrace)),
            '(' => Ok(self.single(TokenKind::LeftParen)),
            ')' => Ok(self.single(TokenKind::RightParen)),
            ';' => Ok(self.single(TokenKind::Semicolon)),
            ',' => Ok(self.single(TokenKind::Comma)),
            '.' => Ok(self.single(TokenKind::Dot)),
            '?' => Ok(self.single(TokenKind::Question)),
            ':' => Ok(self.single(TokenKind::Colon)),
            '+' => Ok(self.single(TokenKind::Plus)),
            '-' => Ok(self.single(TokenKind::Minus)),
            '*' => Ok(self.single(TokenKind::Star)),
            '/' => Ok(self.single(TokenKind::Slash)),
            '%' => Ok(self.single(TokenKind::Percent)),
            '~' => Ok(self.single(TokenKind::Tilde)),
            '^' => Ok(self.single(TokenKind::Caret)),
            '=' => {
                self.advance();
                match (self.peek_char(), self.peek_char_at(1)) {
                    (Some('='), _) => {
                        self.advance();
                        Ok(self.make_token(TokenKind::EqEq))
                    }
                    (Some('?'), Some('=')) => {
                        self.advance();
                        self.advance();
                        Ok(self.make_token(TokenKind::MetaEq))
                    }
                    (Some('!'), Some('=')) => {
                        self.advance();
                        self.advance();
                        Ok(self.make_token(TokenKind::MetaNotEq))
                    }
                    _ => Ok(self.make_token(TokenKind::Assign)),
                }
            }
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(self.make_token(TokenKind::NotEq))
                } else {
                    Ok(self.make_token(TokenKind::Not))
                }
            }
            '<' => {
                self.advance();
                match self.peek_char() {
                    Some('=') => {
                        self.advance();
                        Ok(self.make_token(TokenKind::LtEq))
                    }
                    Some('<') => {
                        self.advance();
                        Ok(self.make_token(TokenKind::Shl))
                    }
                    _ => Ok(self.make_token(TokenKind::Lt)),
                }
            }
            '>' => {
                self.advance();
                match self.peek_char() {
                    Some('=') => {
                        self.advance();
                        Ok(self.make_token(TokenKind::GtEq))
                    }
                    Some('>') => {
                        self.advance();
                        if self.peek_char() == Some('>') {
                            self.advance();
                            Ok(self.make_token(TokenKind::UShr))
                        } else {
                            Ok(self.make_token(TokenKind::Shr))
                        }
                    }
                    _ => Ok(self.make_token(TokenKind::Gt)),
                }
            }
            '&' => {
                self.advance();
                if self.peek_char() == Some('&') {
                    self.advance();
                    Ok(self.make_token(TokenKind::And))
                } else {
                    Ok(self.make_token(TokenKind::Ampersand))
                }
            }
            '|' => {
                self.advance();
                if self.peek_char() == Some('|') {
                    self.advance();
                    Ok(self.make_token(TokenKind::Or))
                } else {
                    Ok(self.make_token(TokenKind::Pipe))
                }
            }
            other => Err(self.error_unexpected_char(other)),
        }
    }

    fn single(&mut self, kind: TokenKind) -> Token {
        self.advance();
        self.make_token(kind)
    }

    /// Peek at the current character without consuming
    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    /// Peek at a character at offset from current position
    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.source[self.position..].chars().nth(offset)
    }

    fn advance(&mut self) -> Option<char> {
        let (pos, ch) = self.chars.next()?;
        self.position = pos + ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    /// Skip whitespace, `// line` and `/* block */` comments
    fn skip_whitespace_and_comments(&mut self) -> ClassAdResult<()> {
        loop {
            match self.peek_char() {
                Some(ch) if ch.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_char_at(1) == Some('/') => {
                    while let Some(ch) = self.peek_char() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_char_at(1) == Some('*') => {
                    let start = self.current_location();
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek_char() {
                            None => {
                                return Err(ClassAdError::unexpected_token(
                                    self.source,
                                    &start,
                                    "*/",
                                    "<eof>",
                                    "block comment is never closed",
                                ))
                            }
                            Some('*') if self.peek_char_at(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Lex an identifier or keyword
    fn lex_identifier(&mut self) -> Token {
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text = &self.source[start..self.position];
        let kind =
            TokenKind::keyword_from_str(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()));
        self.make_token(kind)
    }

    /// Lex a number: decimal or `0x` integer, or real, with an optional K/M/G factor
    fn lex_number(&mut self) -> ClassAdResult<Token> {
        let start = self.position;

        if self.peek_char() == Some('0') && matches!(self.peek_char_at(1), Some('x' | 'X')) {
            self.advance();
            self.advance();
            let digits_start = self.position;
            self.consume_while(|c| c.is_ascii_hexdigit());
            let digits = &self.source[digits_start..self.position];
            let value = i64::from_str_radix(digits, 16)
                .map_err(|_| self.malformed(start))?;
            let factor = self.lex_factor(start)?;
            return Ok(self.make_token(TokenKind::Integer(value, factor)));
        }

        let mut is_real = false;
        self.consume_while(|c| c.is_ascii_digit());

        if self.peek_char() == Some('.') && self.peek_char_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            is_real = true;
            self.advance();
            self.consume_while(|c| c.is_ascii_digit());
        }

        if let Some('e' | 'E') = self.peek_char() {
            let signed = matches!(self.peek_char_at(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_char_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_real = true;
                self.advance();
                if signed {
                    self.advance();
                }
                self.consume_while(|c| c.is_ascii_digit());
            }
        }

        let text = &self.source[start..self.position];
        let kind = if is_real {
            let value: f64 = text.parse().map_err(|_| self.malformed(start))?;
            let factor = self.lex_factor(start)?;
            TokenKind::Real(value, factor)
        } else {
            let value: i64 = text.parse().map_err(|_| self.malformed(start))?;
            let factor = self.lex_factor(start)?;
            TokenKind::Integer(value, factor)
        };

        Ok(self.make_token(kind))
    }

    /// A single K, M or G directly after a number scales it
    fn lex_factor(&mut self, start: usize) -> ClassAdResult<Option<Factor>> {
        let factor = match self.peek_char() {
            Some('K' | 'k') => Some(Factor::Kilo),
            Some('M' | 'm') => Some(Factor::Mega),
            Some('G' | 'g') => Some(Factor::Giga),
            _ => None,
        };
        if factor.is_some() {
            self.advance();
        }
        if self
            .peek_char()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.consume_while(|c| c.is_ascii_alphanumeric() || c == '_');
            return Err(self.malformed(start));
        }
        Ok(factor)
    }

    fn consume_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(ch) = self.peek_char() {
            if !pred(ch) {
                break;
            }
            self.advance();
        }
    }

    /// Lex a double-quoted string
    fn lex_string(&mut self) -> ClassAdResult<Token> {
        self.advance(); // opening "
        let mut value = String::new();

        loop {
            match self.peek_char() {
                None | Some('\n') => {
                    return Err(ClassAdError::unterminated_string(
                        self.source,
                        &self.token_location(),
                    ));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    value.push(self.lex_escape_sequence()?);
                }
                Some(ch) => {
                    self.advance();
                    value.push(ch);
                }
            }
        }

        Ok(self.make_token(TokenKind::String(value)))
    }

    fn lex_escape_sequence(&mut self) -> ClassAdResult<char> {
        let escaped = match self.peek_char() {
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('\\') => '\\',
            Some('"') => '"',
            Some('\'') => '\'',
            Some('0') => '\0',
            Some(ch) => {
                return Err(ClassAdError::invalid_escape_sequence(
                    self.source,
                    &self.current_location(),
                    format!("\\{}", ch),
                ))
            }
            None => {
                return Err(ClassAdError::unterminated_string(
                    self.source,
                    &self.token_location(),
                ))
            }
        };
        self.advance();
        Ok(escaped)
    }

    /// Create a token with the current token span
    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.token_location())
    }

    fn token_location(&self) -> SourceLocation {
        SourceLocation::new(
            self.token_start_line,
            self.token_start_column,
            self.token_start,
            self.position - self.token_start,
        )
    }

    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column, self.position, 1)
    }

    fn malformed(&self, start: usize) -> ClassAdError {
        ClassAdError::malformed_number(
            self.source,
            &self.token_location(),
            &self.source[start..self.position],
        )
    }

    fn error_unexpected_char(&self, ch: char) -> ClassAdError {
        ClassAdError::unexpected_character(self.source, &self.current_location(), ch)
    }
}
