use crate::{flatten, lexer::Token};
use anyhow::{bail, Result};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    slice::Iter,
};

#[derive(Debug, PartialEq, Clone)]
pub enum Statement {
    Let(String, Expression),
    Return(Expression),
    Expression(Expression),
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let statement = match self {
            Self::Let(identifier, expression) => format!("let {} = {};", identifier, expression),
            Self::Return(expression) => format!("return {};", expression),
            Self::Expression(expression) => expression.to_string(),
        };
        write!(f, "{}", statement)
    }
}

pub type Block = Vec<Statement>;

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Identifier(String),
    Literal(Literal),
    Prefix(Operator, Box<Expression>),
    Infix(Box<Expression>, Operator, Box<Expression>),
    If(Box<Expression>, Block, Option<Block>),
    Function(FunctionLiteral),
    Call(Box<Expression>, Vec<Expression>),
    Index(Box<Expression>, Box<Expression>),
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let expression = match self {
            Self::Identifier(identifier) => identifier.to_string(),
            Self::Literal(literal) => literal.to_string(),
            Self::Prefix(operator, expression) => format!("({}{})", operator, expression),
            Self::Infix(left, operator, right) => format!("({} {} {})", left, operator, right),
            Self::If(condition, consequence, alternative) => {
                let mut expression =
                    format!("if {} {{ {} }}", condition, flatten(consequence, "; "));
                if let Some(alternative) = alternative {
                    expression.push_str(&format!(" else {{ {} }}", flatten(alternative, "; ")));
                }
                expression
            }
            Self::Function(function) => function.to_string(),
            Self::Call(function, arguments) => {
                format!("{}({})", function, flatten(arguments, ", "))
            }
            Self::Index(left, index) => format!("({}[{}])", left, index),
        };
        write!(f, "{}", expression)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct FunctionLiteral {
    pub name: Option<String>,
    pub parameters: Vec<String>,
    pub body: Block,
}

impl Display for FunctionLiteral {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let name = self
            .name
            .as_ref()
            .map(|name| format!("<{}>", name))
            .unwrap_or_default();
        write!(
            f,
            "fn{}({}) {{ {} }}",
            name,
            self.parameters.join(", "),
            flatten(&self.body, "; ")
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Literal {
    Integer(i64),
    Boolean(bool),
    String(String),
    Array(Vec<Expression>),
    Hash(Vec<(Expression, Expression)>),
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let literal = match self {
            Literal::Integer(x) => x.to_string(),
            Literal::Boolean(x) => x.to_string(),
            Literal::String(x) => format!("\"{}\"", x),
            Literal::Array(elements) => format!("[{}]", flatten(elements, ", ")),
            Literal::Hash(pairs) => {
                let pairs = pairs
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key, value))
                    .collect::<Vec<_>>();
                format!("{{{}}}", pairs.join(", "))
            }
        };
        write!(f, "{}", literal)
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    Not,
    Negate,
}

impl Operator {
    fn infix(token: &Token) -> Option<Self> {
        let operator = match token {
            Token::Plus => Self::Add,
            Token::Minus => Self::Subtract,
            Token::Asterisk => Self::Multiply,
            Token::Slash => Self::Divide,
            Token::Equal => Self::Equal,
            Token::NotEqual => Self::NotEqual,
            Token::LessThan => Self::LessThan,
            Token::GreaterThan => Self::GreaterThan,
            _ => return None,
        };
        Some(operator)
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let operator = match self {
            Self::Add => "+",
            Self::Subtract | Self::Negate => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::Not => "!",
        };
        write!(f, "{}", operator)
    }
}

#[derive(Debug, PartialEq, PartialOrd, Copy, Clone)]
pub enum Precedence {
    Lowest,
    Equals,
    LessThanGreaterThan,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

impl Precedence {
    pub fn of_token(token: &Token) -> Self {
        match token {
            Token::Equal => Self::Equals,
            Token::NotEqual => Self::Equals,
            Token::LessThan => Self::LessThanGreaterThan,
            Token::GreaterThan => Self::LessThanGreaterThan,
            Token::Plus => Self::Sum,
            Token::Minus => Self::Sum,
            Token::Slash => Self::Product,
            Token::Asterisk => Self::Product,
            Token::LeftParentheses => Self::Call,
            Token::LeftBracket => Self::Index,
            _ => Self::Lowest,
        }
    }
}

pub type Program = Vec<Statement>;

static END_OF_FILE: Token = Token::EndOfFile;

pub struct Parser<'a> {
    pub tokens: Iter<'a, Token>,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens: tokens.iter(),
        }
    }

    pub fn parse(&mut self) -> Result<Program> {
        let mut program = Program::new();
        while self.peek_nth(0) != &Token::EndOfFile {
            program.push(self.parse_statement()?);
        }
        Ok(program)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let statement = match self.peek_nth(0) {
            Token::Let => self.parse_let_statement()?,
            Token::Return => self.parse_return_statement()?,
            _ => Statement::Expression(self.parse_expression(Precedence::Lowest)?),
        };
        if self.peek_nth(0) == &Token::Semicolon {
            self.read_token();
        }
        Ok(statement)
    }

    fn parse_let_statement(&mut self) -> Result<Statement> {
        self.expect(&Token::Let)?;

        let identifier = match self.read_token() {
            Token::Identifier(identifier) => identifier.to_string(),
            token => bail!("Expected 'Identifier' token! Found '{}'.", token),
        };

        self.expect(&Token::Assign)?;

        let mut expression = self.parse_expression(Precedence::Lowest)?;
        if let Expression::Function(function) = &mut expression {
            function.name = Some(identifier.clone());
        }

        Ok(Statement::Let(identifier, expression))
    }

    fn parse_return_statement(&mut self) -> Result<Statement> {
        self.expect(&Token::Return)?;
        Ok(Statement::Return(self.parse_expression(Precedence::Lowest)?))
    }

    fn parse_block(&mut self) -> Result<Block> {
        self.expect(&Token::LeftBrace)?;
        let mut block = Block::new();
        loop {
            match self.peek_nth(0) {
                Token::RightBrace => break,
                Token::EndOfFile => bail!("Expected '}}' token! Found end of file."),
                _ => block.push(self.parse_statement()?),
            }
        }
        self.read_token();
        Ok(block)
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression> {
        let mut expression = match self.read_token() {
            Token::Identifier(identifier) => Expression::Identifier(identifier.to_string()),
            Token::Integer(value) => Expression::Literal(Literal::Integer(*value)),
            Token::Str(value) => Expression::Literal(Literal::String(value.to_string())),
            Token::True => Expression::Literal(Literal::Boolean(true)),
            Token::False => Expression::Literal(Literal::Boolean(false)),
            Token::Bang => self.parse_prefix_expression(Operator::Not)?,
            Token::Minus => self.parse_prefix_expression(Operator::Negate)?,
            Token::LeftParentheses => {
                let expression = self.parse_expression(Precedence::Lowest)?;
                self.expect(&Token::RightParentheses)?;
                expression
            }
            Token::If => self.parse_if_expression()?,
            Token::Function => self.parse_function_literal()?,
            Token::LeftBracket => {
                let elements = self.parse_expression_list(&Token::RightBracket)?;
                Expression::Literal(Literal::Array(elements))
            }
            Token::LeftBrace => self.parse_hash_literal()?,
            token => bail!("Token not valid for an expression: '{}'", token),
        };

        while self.peek_nth(0) != &Token::Semicolon
            && precedence < Precedence::of_token(self.peek_nth(0))
        {
            let token = self.read_token();
            expression = match token {
                Token::LeftParentheses => {
                    let arguments = self.parse_expression_list(&Token::RightParentheses)?;
                    Expression::Call(Box::new(expression), arguments)
                }
                Token::LeftBracket => {
                    let index = self.parse_expression(Precedence::Lowest)?;
                    self.expect(&Token::RightBracket)?;
                    Expression::Index(Box::new(expression), Box::new(index))
                }
                token => match Operator::infix(token) {
                    Some(operator) => {
                        let right = self.parse_expression(Precedence::of_token(token))?;
                        Expression::Infix(Box::new(expression), operator, Box::new(right))
                    }
                    None => bail!("Token not valid for an infix expression: '{}'", token),
                },
            };
        }

        Ok(expression)
    }

    fn parse_prefix_expression(&mut self, operator: Operator) -> Result<Expression> {
        Ok(Expression::Prefix(
            operator,
            Box::new(self.parse_expression(Precedence::Prefix)?),
        ))
    }

    fn parse_if_expression(&mut self) -> Result<Expression> {
        self.expect(&Token::LeftParentheses)?;
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(&Token::RightParentheses)?;

        let consequence = self.parse_block()?;

        let alternative = match self.peek_nth(0) {
            Token::Else => {
                self.read_token();
                match self.peek_nth(0) {
                    // `else if` chains nest as a single-statement alternative block
                    Token::If => {
                        self.read_token();
                        Some(vec![Statement::Expression(self.parse_if_expression()?)])
                    }
                    _ => Some(self.parse_block()?),
                }
            }
            _ => None,
        };

        Ok(Expression::If(Box::new(condition), consequence, alternative))
    }

    fn parse_function_literal(&mut self) -> Result<Expression> {
        self.expect(&Token::LeftParentheses)?;
        let mut parameters = Vec::new();
        if self.peek_nth(0) == &Token::RightParentheses {
            self.read_token();
        } else {
            loop {
                match self.read_token() {
                    Token::Identifier(identifier) => parameters.push(identifier.to_string()),
                    token => bail!("Expected parameter name! Found '{}'.", token),
                }
                match self.read_token() {
                    Token::Comma => continue,
                    Token::RightParentheses => break,
                    token => bail!("Expected ',' or ')' in parameter list! Found '{}'.", token),
                }
            }
        }

        let body = self.parse_block()?;

        Ok(Expression::Function(FunctionLiteral {
            name: None,
            parameters,
            body,
        }))
    }

    fn parse_expression_list(&mut self, end: &Token) -> Result<Vec<Expression>> {
        let mut expressions = Vec::new();
        if self.peek_nth(0) == end {
            self.read_token();
            return Ok(expressions);
        }
        loop {
            expressions.push(self.parse_expression(Precedence::Lowest)?);
            match self.read_token() {
                Token::Comma => continue,
                token if token == end => break,
                token => bail!("Expected ',' or '{}'! Found '{}'.", end, token),
            }
        }
        Ok(expressions)
    }

    fn parse_hash_literal(&mut self) -> Result<Expression> {
        let mut pairs = Vec::new();
        while self.peek_nth(0) != &Token::RightBrace {
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect(&Token::Colon)?;
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            match self.peek_nth(0) {
                Token::Comma => {
                    self.read_token();
                }
                Token::RightBrace => {}
                token => bail!("Expected ',' or '}}' in hash literal! Found '{}'.", token),
            }
        }
        self.read_token();
        Ok(Expression::Literal(Literal::Hash(pairs)))
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.read_token() {
            token if token == expected => Ok(()),
            token => bail!("Expected '{}' token! Found '{}'.", expected, token),
        }
    }

    fn read_token(&mut self) -> &'a Token {
        self.tokens.next().unwrap_or(&END_OF_FILE)
    }

    fn peek_nth(&self, n: usize) -> &'a Token {
        self.tokens.clone().nth(n).unwrap_or(&END_OF_FILE)
    }
}
