use self::Token::*;
use anyhow::{bail, Result};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::Chars,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Assign,
    Asterisk,
    Bang,
    Colon,
    Comma,
    Else,
    EndOfFile,
    Equal,
    False,
    Function,
    GreaterThan,
    Identifier(String),
    If,
    Illegal(String),
    Integer(i64),
    LeftBrace,
    LeftBracket,
    LeftParentheses,
    LessThan,
    Let,
    Minus,
    NotEqual,
    Plus,
    Return,
    RightBrace,
    RightBracket,
    RightParentheses,
    Semicolon,
    Slash,
    Str(String),
    True,
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let token = match self {
            Assign => "=",
            Asterisk => "*",
            Bang => "!",
            Colon => ":",
            Comma => ",",
            Else => "else",
            EndOfFile => "end of file",
            Equal => "==",
            False => "false",
            Function => "fn",
            GreaterThan => ">",
            Identifier(identifier) => identifier.as_str(),
            If => "if",
            Illegal(illegal) => illegal.as_str(),
            Integer(integer) => return write!(f, "{}", integer),
            LeftBrace => "{",
            LeftBracket => "[",
            LeftParentheses => "(",
            LessThan => "<",
            Let => "let",
            Minus => "-",
            NotEqual => "!=",
            Plus => "+",
            Return => "return",
            RightBrace => "}",
            RightBracket => "]",
            RightParentheses => ")",
            Semicolon => ";",
            Slash => "/",
            Str(string) => return write!(f, "\"{}\"", string),
            True => "true",
        };
        write!(f, "{}", token)
    }
}

pub const EOF_CHAR: char = '\0';

pub struct Lexer<'a> {
    chars: Chars<'a>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Lexer<'a> {
        Self {
            chars: input.chars(),
        }
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_while(Self::is_whitespace);
        let first_char = self.read_char();
        let token = match first_char {
            '=' => self.next_char_or(Assign, '=', Equal),
            ';' => Semicolon,
            ':' => Colon,
            '(' => LeftParentheses,
            ')' => RightParentheses,
            ',' => Comma,
            '+' => Plus,
            '{' => LeftBrace,
            '}' => RightBrace,
            '[' => LeftBracket,
            ']' => RightBracket,
            '!' => self.next_char_or(Bang, '=', NotEqual),
            '<' => LessThan,
            '>' => GreaterThan,
            '-' => Minus,
            '*' => Asterisk,
            '/' => Slash,
            '"' => Str(self.read_string()?),
            EOF_CHAR => EndOfFile,
            c if Self::is_letter(c) => {
                let mut identifier = c.to_string();
                identifier.push_str(&self.take_while(Self::is_identifier_char));
                Self::lookup_identifier(&identifier)
            }
            c if Self::is_digit(c) => {
                let mut number = c.to_string();
                number.push_str(&self.take_while(Self::is_digit));
                Integer(number.parse::<i64>()?)
            }
            illegal => Illegal(illegal.to_string()),
        };
        Ok(token)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let next_token = self.next_token()?;
            if let Token::EndOfFile = next_token {
                break;
            }
            tokens.push(next_token);
        }
        Ok(tokens)
    }

    fn read_char(&mut self) -> char {
        self.chars.next().unwrap_or(EOF_CHAR)
    }

    fn read_string(&mut self) -> Result<String> {
        let string = self.take_while(|c| c != '"');
        if self.read_char() != '"' {
            bail!("Unterminated string literal: \"{}", string);
        }
        Ok(string)
    }

    fn peek_nth(&self, n: usize) -> char {
        self.chars.clone().nth(n).unwrap_or(EOF_CHAR)
    }

    fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) -> String {
        let mut chars = String::new();
        while predicate(self.peek_nth(0)) && !self.is_eof() {
            chars.push(self.read_char());
        }
        chars
    }

    fn skip_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while predicate(self.peek_nth(0)) && !self.is_eof() {
            self.read_char();
        }
    }

    fn is_letter(c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_'
    }

    fn is_identifier_char(c: char) -> bool {
        Self::is_letter(c) || Self::is_digit(c)
    }

    fn is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    fn is_whitespace(c: char) -> bool {
        c == ' ' || c == '\t' || c == '\n' || c == '\r'
    }

    fn lookup_identifier(identifier: &str) -> Token {
        match identifier {
            "fn" => Function,
            "let" => Let,
            "true" => True,
            "false" => False,
            "return" => Return,
            "if" => If,
            "else" => Else,
            _ => Identifier(identifier.to_string()),
        }
    }

    fn next_char_or(&mut self, default: Token, next_char: char, token: Token) -> Token {
        match self.peek_nth(0) {
            c if c == next_char => {
                self.read_char();
                token
            }
            _ => default,
        }
    }
}
