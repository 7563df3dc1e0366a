//! Parser for custom-task fragments
//!
//! Recursive descent over the token stream produced by [`crate::lexer::Lexer`].

use crate::ast::*;
use crate::error::{Result, ScriptError};
use crate::lexer::{Keyword, Lexer, Token, TokenType};

/// Lex and parse a fragment in one step
pub fn parse_source(source: &str) -> Result<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse()
}

/// Parser for fragment source
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    /// Create a new parser with the given tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    /// Parse the tokens into a program AST
    pub fn parse(&mut self) -> Result<Program> {
        let start_span = self.current_span();
        let mut statements = Vec::new();

        self.skip_trivia();
        while !self.is_at_end() {
            statements.push(self.parse_statement()?);
            self.end_statement()?;
            self.skip_trivia();
        }

        let end_span = if statements.is_empty() {
            start_span.clone()
        } else {
            self.previous_span()
        };

        Ok(Program {
            statements,
            span: Span {
                start: start_span.start,
                end: end_span.end,
            },
        })
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        if self.match_keyword(Keyword::Let) {
            Ok(Statement::Let(self.parse_let_statement()?))
        } else if self.match_keyword(Keyword::Def) {
            Ok(Statement::Function(self.parse_function_definition()?))
        } else if self.match_keyword(Keyword::If) {
            Ok(Statement::If(self.parse_if_statement()?))
        } else if self.match_keyword(Keyword::For) {
            Ok(Statement::For(self.parse_for_statement()?))
        } else if self.match_keyword(Keyword::While) {
            Ok(Statement::While(self.parse_while_statement()?))
        } else if self.match_keyword(Keyword::Return) {
            Ok(Statement::Return(self.parse_return_statement()?))
        } else if self.match_keyword(Keyword::Raise) {
            let start_span = self.previous_span();
            let value = self.parse_expression()?;
            Ok(Statement::Raise(RaiseStatement {
                value,
                span: self.span_from(start_span),
            }))
        } else if self.match_keyword(Keyword::Import) {
            Ok(Statement::Import(self.parse_import_statement()?))
        } else if self.match_keyword(Keyword::From) {
            Ok(Statement::Import(self.parse_from_import()?))
        } else if self.match_keyword(Keyword::Break) {
            Ok(Statement::Break(self.previous_span()))
        } else if self.match_keyword(Keyword::Continue) {
            Ok(Statement::Continue(self.previous_span()))
        } else {
            Ok(Statement::Expression(self.parse_expression()?))
        }
    }

    /// A statement ends at a newline, a semicolon, a closing brace or end of input
    fn end_statement(&mut self) -> Result<()> {
        match &self.peek().token_type {
            TokenType::Semicolon | TokenType::Newline | TokenType::Comment(_) => {
                self.advance();
                Ok(())
            }
            TokenType::RightBrace | TokenType::Eof => Ok(()),
            other => Err(ScriptError::Parsing(format!(
                "Unexpected {:?} after statement at line {}",
                other,
                self.peek().line
            ))),
        }
    }

    fn parse_let_statement(&mut self) -> Result<LetStatement> {
        let start_span = self.previous_span();
        let name = self.parse_identifier_name("Expected variable name after 'let'")?;
        self.consume_token(TokenType::Assign, "Expected '=' after variable name")?;
        let value = self.parse_expression()?;

        Ok(LetStatement {
            name,
            value,
            span: self.span_from(start_span),
        })
    }

    fn parse_function_definition(&mut self) -> Result<FunctionDefinition> {
        let start_span = self.previous_span();
        let name = self.parse_identifier_name("Expected function name")?;
        self.consume_token(TokenType::LeftParen, "Expected '(' after function name")?;

        let mut parameters = Vec::new();
        self.skip_trivia();
        while !self.check_token(&TokenType::RightParen) {
            let param_name = self.parse_identifier_name("Expected parameter name")?;
            let default_value = if self.match_token(&TokenType::Assign) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            parameters.push(Parameter {
                name: param_name,
                default_value,
            });

            self.skip_trivia();
            if !self.match_token(&TokenType::Comma) {
                break;
            }
            self.skip_trivia();
        }
        self.consume_token(TokenType::RightParen, "Expected ')' after parameters")?;
        self.match_token(&TokenType::Colon);

        let body = self.parse_block()?;

        Ok(FunctionDefinition {
            name,
            parameters,
            body,
            span: self.span_from(start_span),
        })
    }

    fn parse_block(&mut self) -> Result<Block> {
        self.skip_trivia();
        let start_span = self.current_span();
        self.consume_token(TokenType::LeftBrace, "Expected '{' to open block")?;

        let mut statements = Vec::new();
        self.skip_trivia();
        while !self.check_token(&TokenType::RightBrace) {
            if self.is_at_end() {
                return Err(ScriptError::Parsing(format!(
                    "Unclosed block starting at line {}",
                    start_span.start.line
                )));
            }
            statements.push(self.parse_statement()?);
            self.end_statement()?;
            self.skip_trivia();
        }
        self.consume_token(TokenType::RightBrace, "Expected '}' to close block")?;

        Ok(Block {
            statements,
            span: self.span_from(start_span),
        })
    }

    fn parse_if_statement(&mut self) -> Result<IfStatement> {
        let start_span = self.previous_span();
        let condition = self.parse_expression()?;
        let then_block = self.parse_block()?;

        let mut else_ifs = Vec::new();
        let mut else_block = None;

        loop {
            // `else` may sit on the line after the closing brace
            let checkpoint = self.current;
            self.skip_trivia();
            if !self.match_keyword(Keyword::Else) {
                self.current = checkpoint;
                break;
            }

            if self.match_keyword(Keyword::If) {
                let else_if_start = self.previous_span();
                let condition = self.parse_expression()?;
                let block = self.parse_block()?;
                else_ifs.push(ElseIf {
                    condition,
                    block,
                    span: self.span_from(else_if_start),
                });
            } else {
                else_block = Some(self.parse_block()?);
                break;
            }
        }

        Ok(IfStatement {
            condition,
            then_block,
            else_ifs,
            else_block,
            span: self.span_from(start_span),
        })
    }

    fn parse_for_statement(&mut self) -> Result<ForStatement> {
        let start_span = self.previous_span();
        let mut variables = vec![self.parse_identifier_name("Expected loop variable after 'for'")?];
        while self.match_token(&TokenType::Comma) {
            variables.push(self.parse_identifier_name("Expected loop variable after ','")?);
        }
        if !self.match_keyword(Keyword::In) {
            return Err(ScriptError::Parsing(format!(
                "Expected 'in' after loop variable at line {}",
                self.peek().line
            )));
        }
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;

        Ok(ForStatement {
            variables,
            iterable,
            body,
            span: self.span_from(start_span),
        })
    }

    fn parse_while_statement(&mut self) -> Result<WhileStatement> {
        let start_span = self.previous_span();
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;

        Ok(WhileStatement {
            condition,
            body,
            span: self.span_from(start_span),
        })
    }

    fn parse_return_statement(&mut self) -> Result<ReturnStatement> {
        let start_span = self.previous_span();
        let value = match self.peek().token_type {
            TokenType::Newline
            | TokenType::Semicolon
            | TokenType::RightBrace
            | TokenType::Comment(_)
            | TokenType::Eof => None,
            _ => Some(self.parse_expression()?),
        };

        Ok(ReturnStatement {
            value,
            span: self.span_from(start_span),
        })
    }

    fn parse_import_statement(&mut self) -> Result<ImportStatement> {
        let start_span = self.previous_span();
        let module = self.parse_module_path()?;
        let alias = if self.match_keyword(Keyword::As) {
            Some(self.parse_identifier_name("Expected alias after 'as'")?)
        } else {
            None
        };

        Ok(ImportStatement {
            module,
            alias,
            names: Vec::new(),
            span: self.span_from(start_span),
        })
    }

    fn parse_from_import(&mut self) -> Result<ImportStatement> {
        let start_span = self.previous_span();
        let module = self.parse_module_path()?;
        if !self.match_keyword(Keyword::Import) {
            return Err(ScriptError::Parsing(format!(
                "Expected 'import' after module path at line {}",
                self.peek().line
            )));
        }

        let parenthesized = self.match_token(&TokenType::LeftParen);
        let mut names = Vec::new();
        loop {
            if parenthesized {
                self.skip_trivia();
            }
            let name = self.parse_identifier_name("Expected name to import")?;
            let alias = if self.match_keyword(Keyword::As) {
                Some(self.parse_identifier_name("Expected alias after 'as'")?)
            } else {
                None
            };
            names.push(ImportedName { name, alias });

            if !self.match_token(&TokenType::Comma) {
                break;
            }
        }
        if parenthesized {
            self.skip_trivia();
            self.consume_token(TokenType::RightParen, "Expected ')' after imported names")?;
        }

        Ok(ImportStatement {
            module,
            alias: None,
            names,
            span: self.span_from(start_span),
        })
    }

    fn parse_module_path(&mut self) -> Result<Vec<String>> {
        let mut path = vec![self.parse_identifier_name("Expected module name")?];
        while self.match_token(&TokenType::Dot) {
            path.push(self.parse_identifier_name("Expected module name after '.'")?);
        }
        Ok(path)
    }

    /// Parse an expression
    pub fn parse_expression(&mut self) -> Result<Expression> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expression> {
        let expr = self.parse_logical_or()?;

        if self.match_token(&TokenType::Assign) {
            match &expr {
                Expression::Identifier(_) | Expression::IndexAccess(_) => {}
                _ => {
                    return Err(ScriptError::Parsing(format!(
                        "Invalid assignment target at line {}",
                        self.previous().line
                    )))
                }
            }
            let value = self.parse_assignment()?;
            let span = Span {
                start: self.get_expression_span(&expr).start,
                end: self.get_expression_span(&value).end,
            };
            return Ok(Expression::Assignment(Assignment {
                target: Box::new(expr),
                value: Box::new(value),
                span,
            }));
        }

        Ok(expr)
    }

    fn parse_logical_or(&mut self) -> Result<Expression> {
        let mut expr = self.parse_logical_and()?;
        while self.match_token(&TokenType::Or) {
            let right = self.parse_logical_and()?;
            expr = self.binary(expr, BinaryOperator::Or, right);
        }
        Ok(expr)
    }

    fn parse_logical_and(&mut self) -> Result<Expression> {
        let mut expr = self.parse_logical_not()?;
        while self.match_token(&TokenType::And) {
            let right = self.parse_logical_not()?;
            expr = self.binary(expr, BinaryOperator::And, right);
        }
        Ok(expr)
    }

    fn parse_logical_not(&mut self) -> Result<Expression> {
        if self.match_token(&TokenType::Not) {
            let start_span = self.previous_span();
            let operand = self.parse_logical_not()?;
            let end = self.get_expression_span(&operand).end;
            return Ok(Expression::UnaryOp(UnaryOperation {
                operator: UnaryOperator::Not,
                operand: Box::new(operand),
                span: Span {
                    start: start_span.start,
                    end,
                },
            }));
        }
        self.parse_equality()
    }

    fn parse_equality(&mut self) -> Result<Expression> {
        let mut expr = self.parse_comparison()?;
        while let Some(operator) =
            self.match_binary_operator(&[TokenType::Equal, TokenType::NotEqual])
        {
            let right = self.parse_comparison()?;
            expr = self.binary(expr, operator, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let mut expr = self.parse_addition()?;

        loop {
            if let Some(operator) = self.match_binary_operator(&[
                TokenType::LessThan,
                TokenType::LessThanOrEqual,
                TokenType::GreaterThan,
                TokenType::GreaterThanOrEqual,
            ]) {
                let right = self.parse_addition()?;
                expr = self.binary(expr, operator, right);
            } else if self.match_keyword(Keyword::In) {
                let right = self.parse_addition()?;
                expr = self.binary(expr, BinaryOperator::In, right);
            } else if self.check_token(&TokenType::Not)
                && matches!(self.peek_at(1).token_type, TokenType::Keyword(Keyword::In))
            {
                self.advance();
                self.advance();
                let right = self.parse_addition()?;
                let membership = self.binary(expr, BinaryOperator::In, right);
                let span = self.get_expression_span(&membership);
                expr = Expression::UnaryOp(UnaryOperation {
                    operator: UnaryOperator::Not,
                    operand: Box::new(membership),
                    span,
                });
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_addition(&mut self) -> Result<Expression> {
        let mut expr = self.parse_multiplication()?;
        while let Some(operator) = self.match_binary_operator(&[TokenType::Plus, TokenType::Minus])
        {
            let right = self.parse_multiplication()?;
            expr = self.binary(expr, operator, right);
        }
        Ok(expr)
    }

    fn parse_multiplication(&mut self) -> Result<Expression> {
        let mut expr = self.parse_unary()?;
        while let Some(operator) = self.match_binary_operator(&[
            TokenType::Multiply,
            TokenType::Divide,
            TokenType::Modulo,
        ]) {
            let right = self.parse_unary()?;
            expr = self.binary(expr, operator, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        if self.match_token(&TokenType::Minus) {
            let start_span = self.previous_span();
            let operand = self.parse_unary()?;
            let end = self.get_expression_span(&operand).end;
            return Ok(Expression::UnaryOp(UnaryOperation {
                operator: UnaryOperator::Negate,
                operand: Box::new(operand),
                span: Span {
                    start: start_span.start,
                    end,
                },
            }));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.match_token(&TokenType::Dot) {
                let start_span = self.get_expression_span(&expr);
                let field = self.parse_identifier_name("Expected field name after '.'")?;

                if self.match_token(&TokenType::LeftParen) {
                    let arguments = self.parse_arguments()?;
                    expr = Expression::MethodCall(MethodCall {
                        object: Box::new(expr),
                        method: field,
                        arguments,
                        span: self.span_from(start_span),
                    });
                } else {
                    expr = Expression::FieldAccess(FieldAccess {
                        object: Box::new(expr),
                        field,
                        span: self.span_from(start_span),
                    });
                }
            } else if self.match_token(&TokenType::LeftBracket) {
                let start_span = self.get_expression_span(&expr);
                self.skip_trivia();
                let index = self.parse_expression()?;
                self.skip_trivia();
                self.consume_token(TokenType::RightBracket, "Expected ']' after index")?;

                expr = Expression::IndexAccess(IndexAccess {
                    object: Box::new(expr),
                    index: Box::new(index),
                    span: self.span_from(start_span),
                });
            } else if self.match_token(&TokenType::LeftParen) {
                let start_span = self.get_expression_span(&expr);
                let arguments = self.parse_arguments()?;
                expr = Expression::Call(Call {
                    callee: Box::new(expr),
                    arguments,
                    span: self.span_from(start_span),
                });
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        let token = self.advance();
        let span = self.token_span(&token);

        match token.token_type {
            TokenType::String(value) => Ok(Expression::Literal(Literal::String(value))),
            TokenType::Integer(value) => Ok(Expression::Literal(Literal::Integer(value))),
            TokenType::Number(value) => Ok(Expression::Literal(Literal::Number(value))),
            TokenType::Keyword(Keyword::True) => Ok(Expression::Literal(Literal::Boolean(true))),
            TokenType::Keyword(Keyword::False) => {
                Ok(Expression::Literal(Literal::Boolean(false)))
            }
            TokenType::Keyword(Keyword::Null) => Ok(Expression::Literal(Literal::Null)),
            TokenType::Identifier(name) => Ok(Expression::Identifier(Identifier { name, span })),
            TokenType::LeftParen => {
                self.skip_trivia();
                let expr = self.parse_expression()?;
                self.skip_trivia();
                self.consume_token(TokenType::RightParen, "Expected ')' after expression")?;
                Ok(expr)
            }
            TokenType::LeftBracket => {
                let mut elements = Vec::new();
                self.skip_trivia();
                while !self.check_token(&TokenType::RightBracket) {
                    elements.push(self.parse_expression()?);
                    self.skip_trivia();
                    if !self.match_token(&TokenType::Comma) {
                        break;
                    }
                    self.skip_trivia();
                }
                self.consume_token(TokenType::RightBracket, "Expected ']' after list elements")?;
                Ok(Expression::List(ListExpression {
                    elements,
                    span: self.span_from(span),
                }))
            }
            TokenType::LeftBrace => {
                let mut entries = Vec::new();
                self.skip_trivia();
                while !self.check_token(&TokenType::RightBrace) {
                    let key = self.parse_expression()?;
                    self.skip_trivia();
                    self.consume_token(TokenType::Colon, "Expected ':' after map key")?;
                    self.skip_trivia();
                    let value = self.parse_expression()?;
                    entries.push(MapEntry { key, value });
                    self.skip_trivia();
                    if !self.match_token(&TokenType::Comma) {
                        break;
                    }
                    self.skip_trivia();
                }
                self.consume_token(TokenType::RightBrace, "Expected '}' after map entries")?;
                Ok(Expression::Map(MapExpression {
                    entries,
                    span: self.span_from(span),
                }))
            }
            other => Err(ScriptError::Parsing(format!(
                "Unexpected token {:?} at line {}, column {}",
                other, token.line, token.column
            ))),
        }
    }

    /// Parse call arguments after the opening parenthesis, consuming the closing one
    fn parse_arguments(&mut self) -> Result<Arguments> {
        let mut arguments = Arguments::default();
        self.skip_trivia();

        while !self.check_token(&TokenType::RightParen) {
            let is_keyword = matches!(self.peek().token_type, TokenType::Identifier(_))
                && matches!(self.peek_at(1).token_type, TokenType::Assign);

            if is_keyword {
                let name = self.parse_identifier_name("Expected keyword argument name")?;
                self.advance();
                let value = self.parse_expression()?;
                arguments.keyword.push((name, value));
            } else if !arguments.keyword.is_empty() {
                return Err(ScriptError::Parsing(format!(
                    "Positional argument follows keyword argument at line {}",
                    self.peek().line
                )));
            } else {
                arguments.positional.push(self.parse_expression()?);
            }

            self.skip_trivia();
            if !self.match_token(&TokenType::Comma) {
                break;
            }
            self.skip_trivia();
        }

        self.consume_token(TokenType::RightParen, "Expected ')' after arguments")?;
        Ok(arguments)
    }

    fn parse_identifier_name(&mut self, message: &str) -> Result<String> {
        match self.peek().token_type {
            TokenType::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(ScriptError::Parsing(format!(
                "{}: found {:?} at line {}",
                message,
                other,
                self.peek().line
            ))),
        }
    }

    fn binary(&self, left: Expression, operator: BinaryOperator, right: Expression) -> Expression {
        let span = Span {
            start: self.get_expression_span(&left).start,
            end: self.get_expression_span(&right).end,
        };
        Expression::BinaryOp(BinaryOperation {
            left: Box::new(left),
            operator,
            right: Box::new(right),
            span,
        })
    }

    // Utility methods
    fn match_keyword(&mut self, keyword: Keyword) -> bool {
        if let TokenType::Keyword(k) = &self.peek().token_type {
            if *k == keyword {
                self.advance();
                return true;
            }
        }
        false
    }

    fn match_token(&mut self, token_type: &TokenType) -> bool {
        if self.check_token(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_binary_operator(&mut self, operators: &[TokenType]) -> Option<BinaryOperator> {
        for op_token in operators {
            if self.check_token(op_token) {
                self.advance();
                return Self::token_to_binary_operator(op_token);
            }
        }
        None
    }

    fn token_to_binary_operator(token: &TokenType) -> Option<BinaryOperator> {
        let operator = match token {
            TokenType::Plus => BinaryOperator::Add,
            TokenType::Minus => BinaryOperator::Subtract,
            TokenType::Multiply => BinaryOperator::Multiply,
            TokenType::Divide => BinaryOperator::Divide,
            TokenType::Modulo => BinaryOperator::Modulo,
            TokenType::Equal => BinaryOperator::Equal,
            TokenType::NotEqual => BinaryOperator::NotEqual,
            TokenType::LessThan => BinaryOperator::LessThan,
            TokenType::LessThanOrEqual => BinaryOperator::LessThanOrEqual,
            TokenType::GreaterThan => BinaryOperator::GreaterThan,
            TokenType::GreaterThanOrEqual => BinaryOperator::GreaterThanOrEqual,
            TokenType::And => BinaryOperator::And,
            TokenType::Or => BinaryOperator::Or,
            _ => return None,
        };
        Some(operator)
    }

    fn consume_token(&mut self, expected: TokenType, message: &str) -> Result<Token> {
        if self.check_token(&expected) {
            Ok(self.advance())
        } else {
            Err(ScriptError::Parsing(format!(
                "{}: expected {:?}, found {:?} at line {}",
                message,
                expected,
                self.peek().token_type,
                self.peek().line
            )))
        }
    }

    fn check_token(&self, token_type: &TokenType) -> bool {
        std::mem::discriminant(&self.peek().token_type) == std::mem::discriminant(token_type)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().token_type, TokenType::Eof)
    }

    fn peek(&self) -> Token {
        self.peek_at(0)
    }

    fn peek_at(&self, distance: usize) -> Token {
        match self.tokens.get(self.current + distance) {
            Some(token) => token.clone(),
            None => {
                let last = self.tokens.last();
                Token {
                    token_type: TokenType::Eof,
                    line: last.map(|t| t.line).unwrap_or(1),
                    column: 0,
                    offset: last.map(|t| t.offset).unwrap_or(0),
                    length: 0,
                }
            }
        }
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn previous(&self) -> Token {
        let index = self.current.saturating_sub(1);
        match self.tokens.get(index) {
            Some(token) => token.clone(),
            None => self.peek_at(0),
        }
    }

    fn skip_trivia(&mut self) {
        while matches!(
            self.peek().token_type,
            TokenType::Newline | TokenType::Comment(_)
        ) {
            self.advance();
        }
    }

    // Span helper methods
    fn current_span(&self) -> Span {
        self.token_span(&self.peek())
    }

    fn previous_span(&self) -> Span {
        self.token_span(&self.previous())
    }

    fn span_from(&self, start: Span) -> Span {
        Span {
            start: start.start,
            end: self.previous_span().end,
        }
    }

    fn token_span(&self, token: &Token) -> Span {
        Span {
            start: SourceLocation {
                line: token.line,
                column: token.column,
                offset: token.offset,
            },
            end: SourceLocation {
                line: token.line,
                column: token.column + token.length,
                offset: token.offset + token.length,
            },
        }
    }

    fn get_expression_span(&self, expr: &Expression) -> Span {
        match expr {
            Expression::Literal(_) => self.previous_span(),
            Expression::Identifier(id) => id.span.clone(),
            Expression::FieldAccess(fa) => fa.span.clone(),
            Expression::IndexAccess(ia) => ia.span.clone(),
            Expression::Call(call) => call.span.clone(),
            Expression::MethodCall(mc) => mc.span.clone(),
            Expression::BinaryOp(bo) => bo.span.clone(),
            Expression::UnaryOp(uo) => uo.span.clone(),
            Expression::Assignment(a) => a.span.clone(),
            Expression::List(l) => l.span.clone(),
            Expression::Map(m) => m.span.clone(),
        }
    }
}
