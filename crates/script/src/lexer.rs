//! Lexer for custom-task fragments
//!
//! Converts raw fragment text into a stream of tokens for parsing.

use crate::error::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Token types recognized by the lexer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenType {
    // Literals
    String(String),
    Number(f64),
    Integer(i64),

    // Identifiers and keywords
    Identifier(String),
    Keyword(Keyword),

    // Operators
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Not,
    Assign,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,

    // Special
    Newline,
    Eof,
    Comment(String),
}

/// Keywords of the fragment language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Keyword {
    Let,
    Def,
    If,
    Else,
    For,
    In,
    While,
    Break,
    Continue,
    Return,
    Raise,
    Import,
    From,
    As,
    True,
    False,
    Null,
}

/// Token with location information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub token_type: TokenType,
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub length: usize,
}

/// Lexer for fragment source text
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    keywords: HashMap<&'static str, Keyword>,
}

impl Lexer {
    /// Create a new lexer for the given input
    pub fn new(input: &str) -> Self {
        let keywords = HashMap::from([
            ("let", Keyword::Let),
            ("def", Keyword::Def),
            ("function", Keyword::Def),
            ("if", Keyword::If),
            ("else", Keyword::Else),
            ("for", Keyword::For),
            ("in", Keyword::In),
            ("while", Keyword::While),
            ("break", Keyword::Break),
            ("continue", Keyword::Continue),
            ("return", Keyword::Return),
            ("raise", Keyword::Raise),
            ("import", Keyword::Import),
            ("from", Keyword::From),
            ("as", Keyword::As),
            ("true", Keyword::True),
            ("True", Keyword::True),
            ("false", Keyword::False),
            ("False", Keyword::False),
            ("null", Keyword::Null),
            ("None", Keyword::Null),
        ]);

        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            keywords,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let is_eof = matches!(token.token_type, TokenType::Eof);
            tokens.push(token);

            if is_eof {
                break;
            }
        }

        Ok(tokens)
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let start_line = self.line;
        let start_column = self.column;
        let start_offset = self.position;

        let ch = match self.current_char() {
            Some(ch) => ch,
            None => {
                return Ok(Token {
                    token_type: TokenType::Eof,
                    line: start_line,
                    column: start_column,
                    offset: start_offset,
                    length: 0,
                })
            }
        };

        let token_type = match ch {
            '/' if self.peek_char() == Some('/') => {
                self.advance();
                self.advance();
                TokenType::Comment(self.read_line_comment())
            }
            '#' => {
                self.advance();
                TokenType::Comment(self.read_line_comment())
            }
            '/' if self.peek_char() == Some('*') => TokenType::Comment(self.read_block_comment()?),

            '"' | '\'' => TokenType::String(self.read_string(ch)?),

            c if c.is_ascii_digit() => self.read_number()?,

            c if c.is_alphabetic() || c == '_' => {
                let identifier = self.read_identifier();
                match identifier.as_str() {
                    "and" => TokenType::And,
                    "or" => TokenType::Or,
                    "not" => TokenType::Not,
                    _ => match self.keywords.get(identifier.as_str()) {
                        Some(keyword) => TokenType::Keyword(keyword.clone()),
                        None => TokenType::Identifier(identifier),
                    },
                }
            }

            '+' => self.single(TokenType::Plus),
            '-' => self.single(TokenType::Minus),
            '*' => self.single(TokenType::Multiply),
            '/' => self.single(TokenType::Divide),
            '%' => self.single(TokenType::Modulo),
            '=' if self.peek_char() == Some('=') => self.double(TokenType::Equal),
            '=' => self.single(TokenType::Assign),
            '!' if self.peek_char() == Some('=') => self.double(TokenType::NotEqual),
            '!' => self.single(TokenType::Not),
            '<' if self.peek_char() == Some('=') => self.double(TokenType::LessThanOrEqual),
            '<' => self.single(TokenType::LessThan),
            '>' if self.peek_char() == Some('=') => self.double(TokenType::GreaterThanOrEqual),
            '>' => self.single(TokenType::GreaterThan),
            '&' if self.peek_char() == Some('&') => self.double(TokenType::And),
            '|' if self.peek_char() == Some('|') => self.double(TokenType::Or),

            '(' => self.single(TokenType::LeftParen),
            ')' => self.single(TokenType::RightParen),
            '{' => self.single(TokenType::LeftBrace),
            '}' => self.single(TokenType::RightBrace),
            '[' => self.single(TokenType::LeftBracket),
            ']' => self.single(TokenType::RightBracket),
            ',' => self.single(TokenType::Comma),
            ';' => self.single(TokenType::Semicolon),
            ':' => self.single(TokenType::Colon),
            '.' => self.single(TokenType::Dot),

            '\n' => {
                self.advance();
                self.line += 1;
                self.column = 1;
                TokenType::Newline
            }

            _ => {
                return Err(ScriptError::Lexing(format!(
                    "Unexpected character '{}' at line {}, column {}",
                    ch, self.line, self.column
                )));
            }
        };

        Ok(Token {
            token_type,
            line: start_line,
            column: start_column,
            offset: start_offset,
            length: self.position - start_offset,
        })
    }

    fn single(&mut self, token_type: TokenType) -> TokenType {
        self.advance();
        token_type
    }

    fn double(&mut self, token_type: TokenType) -> TokenType {
        self.advance();
        self.advance();
        token_type
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() && ch != '\n' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, quote: char) -> Result<String> {
        let start_line = self.line;
        self.advance();
        let mut string = String::new();

        while let Some(ch) = self.current_char() {
            match ch {
                c if c == quote => {
                    self.advance();
                    return Ok(string);
                }
                '\\' => {
                    self.advance();
                    let escaped = self.current_char().ok_or_else(|| {
                        ScriptError::Lexing(format!(
                            "Unterminated string literal starting at line {}",
                            start_line
                        ))
                    })?;
                    match escaped {
                        'n' => string.push('\n'),
                        't' => string.push('\t'),
                        'r' => string.push('\r'),
                        '\\' => string.push('\\'),
                        '"' => string.push('"'),
                        '\'' => string.push('\''),
                        other => {
                            string.push('\\');
                            string.push(other);
                        }
                    }
                    self.advance();
                }
                '\n' => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                    string.push(ch);
                }
                _ => {
                    string.push(ch);
                    self.advance();
                }
            }
        }

        Err(ScriptError::Lexing(format!(
            "Unterminated string literal starting at line {}",
            start_line
        )))
    }

    fn read_number(&mut self) -> Result<TokenType> {
        let mut number_str = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() || ch == '_' {
                if ch != '_' {
                    number_str.push(ch);
                }
                self.advance();
            } else if ch == '.'
                && !has_dot
                && self.peek_char().is_some_and(|next| next.is_ascii_digit())
            {
                has_dot = true;
                number_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if has_dot {
            number_str
                .parse::<f64>()
                .map(TokenType::Number)
                .map_err(|_| ScriptError::Lexing(format!("Invalid number: {}", number_str)))
        } else {
            number_str
                .parse::<i64>()
                .map(TokenType::Integer)
                .map_err(|_| ScriptError::Lexing(format!("Invalid number: {}", number_str)))
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut identifier = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                identifier.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        identifier
    }

    fn read_line_comment(&mut self) -> String {
        let mut comment = String::new();
        while let Some(ch) = self.current_char() {
            if ch == '\n' {
                break;
            }
            comment.push(ch);
            self.advance();
        }
        comment
    }

    fn read_block_comment(&mut self) -> Result<String> {
        self.advance(); // /
        self.advance(); // *

        let mut comment = String::new();
        while let Some(ch) = self.current_char() {
            if ch == '*' && self.peek_char() == Some('/') {
                self.advance();
                self.advance();
                return Ok(comment);
            }
            if ch == '\n' {
                self.line += 1;
                self.column = 0;
            }
            comment.push(ch);
            self.advance();
        }

        Err(ScriptError::Lexing("Unterminated block comment".to_string()))
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if self.position < self.input.len() {
            self.position += 1;
            self.column += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(source: &str) -> Vec<TokenType> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        let tokens = types("let x = 42");
        assert_eq!(tokens.len(), 5);
        assert!(matches!(tokens[0], TokenType::Keyword(Keyword::Let)));
        assert!(matches!(tokens[1], TokenType::Identifier(ref s) if s == "x"));
        assert!(matches!(tokens[2], TokenType::Assign));
        assert!(matches!(tokens[3], TokenType::Integer(42)));
        assert!(matches!(tokens[4], TokenType::Eof));
    }

    #[test]
    fn test_single_and_double_quoted_strings() {
        let tokens = types(r#""hello" 'world'"#);
        assert_eq!(tokens[0], TokenType::String("hello".to_string()));
        assert_eq!(tokens[1], TokenType::String("world".to_string()));
    }

    #[test]
    fn test_word_operators_and_python_constants() {
        let tokens = types("not a and b or None");
        assert_eq!(tokens[0], TokenType::Not);
        assert_eq!(tokens[2], TokenType::And);
        assert_eq!(tokens[4], TokenType::Or);
        assert_eq!(tokens[5], TokenType::Keyword(Keyword::Null));
    }

    #[test]
    fn test_float_versus_attribute_access() {
        let tokens = types("1.5 x.y");
        assert_eq!(tokens[0], TokenType::Number(1.5));
        assert_eq!(tokens[2], TokenType::Dot);
    }

    #[test]
    fn test_comments() {
        let tokens = types("# hash comment\n// line comment\n/* block */");
        assert!(matches!(tokens[0], TokenType::Comment(_)));
        assert!(matches!(tokens[1], TokenType::Newline));
        assert!(matches!(tokens[2], TokenType::Comment(_)));
        assert!(matches!(tokens[3], TokenType::Newline));
        assert!(matches!(tokens[4], TokenType::Comment(_)));
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        let err = Lexer::new("\"open").tokenize().unwrap_err();
        assert!(matches!(err, ScriptError::Lexing(_)));
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("x = $").tokenize().unwrap_err();
        assert!(err.to_string().contains("Unexpected character '$'"));
    }
}
