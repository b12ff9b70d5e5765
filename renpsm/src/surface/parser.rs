//! A recursive descent parser for the rule language.
//!
//! Expressions are built through the folding constructors, and assignments
//! with a constant value are bound as soon as they are parsed, so later
//! instructions see their values.

use fxhash::FxHashMap;

use crate::core::fold;
use crate::core::symbols::SymbolTable;
use crate::core::{
    Args, Definition, Expr, Guards, Instruction, InstructionKind, Iteration, Limits, Literal,
    Membrane, ObjectRef, Op, Program,
};
use crate::files::FileId;
use crate::reporting::{Message, ParseMessage};
use crate::source::{BytePos, ByteRange, FileRange, Span};
use crate::surface::lexer::{self, Spanned, Token};
use crate::symbol::Symbol;

const EXPRESSION: &[&str] = &["integer literal", "real literal", "name", "(", "-", "!"];

pub struct Parser<'source, 'a> {
    file_id: FileId,
    tokens: Vec<Spanned<Token<'source>, BytePos>>,
    position: usize,
    eof: BytePos,
    symbols: &'a mut SymbolTable,
    limits: &'a Limits,
}

impl<'source, 'a> Parser<'source, 'a> {
    pub fn new(
        file_id: FileId,
        source: &'source str,
        symbols: &'a mut SymbolTable,
        limits: &'a Limits,
    ) -> Result<Parser<'source, 'a>, Message> {
        let tokens = lexer::tokens(file_id, source).collect::<Result<Vec<_>, _>>()?;
        Ok(Parser {
            file_id,
            tokens,
            position: 0,
            eof: source.len() as BytePos,
            symbols,
            limits,
        })
    }

    pub fn program(&mut self) -> Result<Program, Message> {
        self.expect(Token::At)?;
        match self.peek() {
            Some(Token::Name("model")) => self.position += 1,
            _ => return Err(self.unexpected(&["model"])),
        }
        self.expect(Token::Less)?;
        let (_, model) = self.name()?;
        self.expect(Token::Greater)?;

        let mut definitions = Vec::new();
        let mut seen = FxHashMap::<Symbol, Span>::default();
        while self.peek().is_some() {
            let definition = self.definition()?;
            if let Some(first) = seen.get(&definition.name) {
                let range = definition.span.range().unwrap_or_else(|| self.range(0, 0));
                return Err(ParseMessage::DuplicateDefinition {
                    range,
                    name: definition.name,
                    first: *first,
                }
                .into());
            }
            seen.insert(definition.name, definition.span);
            definitions.push(definition);
            self.check_limit(
                self.last_span(),
                definitions.len(),
                self.limits.definitions,
                "definitions",
            )?;
        }

        Ok(Program { model, definitions })
    }

    fn definition(&mut self) -> Result<Definition, Message> {
        let start = self.start();
        self.expect(Token::KeywordDef)?;
        let (_, name) = self.name()?;

        self.expect(Token::OpenParen)?;
        let mut params = Vec::new();
        if self.peek() != Some(&Token::CloseParen) {
            loop {
                params.push(self.name()?.1);
                if self.eat(&Token::Comma).is_none() {
                    break;
                }
            }
        }
        self.check_limit(self.last_span(), params.len(), self.limits.params, "parameters")?;
        self.expect(Token::CloseParen)?;

        self.expect(Token::OpenBrace)?;
        let mut instructions = Vec::new();
        while self.eat(&Token::CloseBrace).is_none() {
            instructions.push(self.instruction()?);
            self.expect(Token::Semicolon)?;
            self.check_limit(
                self.last_span(),
                instructions.len(),
                self.limits.instructions,
                "instructions",
            )?;
        }

        Ok(Definition {
            span: Span::from(self.range(start, self.last_end())),
            name,
            params,
            instructions,
        })
    }

    fn instruction(&mut self) -> Result<Instruction, Message> {
        let start = self.start();
        let kind = match (self.peek(), self.peek_nth(1), self.peek_nth(2)) {
            (Some(Token::At), Some(Token::Name("mu")), Some(Token::Equals)) => {
                self.position += 3;
                InstructionKind::Membranes(self.membrane()?)
            }
            (Some(Token::At), Some(Token::Name("ms")), Some(Token::OpenParen)) => {
                self.position += 3;
                let region = self.expr()?;
                self.expect(Token::CloseParen)?;
                self.expect(Token::Equals)?;
                let mut objects = Vec::new();
                loop {
                    let object = self.object_ref()?;
                    let multiplicity = match self.eat(&Token::Star) {
                        Some(_) => self.unary()?,
                        None => Expr::int(1),
                    };
                    objects.push((object, multiplicity));
                    if self.eat(&Token::Comma).is_none() {
                        break;
                    }
                }
                InstructionKind::Multiset { region, objects }
            }
            (Some(Token::At), _, _) => {
                self.position += 1;
                let target = self.object_ref()?;
                self.expect(Token::Equals)?;
                let value = self.expr()?;
                InstructionKind::InitVariable { target, value }
            }
            (Some(Token::KeywordCall), _, _) => {
                self.position += 1;
                let (_, name) = self.name()?;
                let args = self.call_args()?;
                InstructionKind::Call { name, args }
            }
            (Some(Token::OpenBracket), Some(Token::OpenBracket), _) => {
                self.position += 2;
                self.expect(Token::CloseBracket)?;
                self.expect(Token::Apostrophe)?;
                let child = self.primary()?;
                self.expect(Token::CloseBracket)?;
                self.expect(Token::Apostrophe)?;
                let parent = self.primary()?;
                let guards = self.guards()?;
                InstructionKind::Creation {
                    child,
                    parent,
                    guards,
                }
            }
            (Some(Token::OpenBracket), _, _) => {
                self.position += 1;
                let from = self.object_ref()?;
                self.expect(Token::HyphenGreater)?;
                let to = self.object_ref()?;
                self.expect(Token::CloseBracket)?;
                self.expect(Token::Apostrophe)?;
                let label = self.primary()?;
                let guards = self.guards()?;
                InstructionKind::Evolution {
                    from,
                    to,
                    label,
                    guards,
                }
            }
            (Some(Token::Name(_)), _, _) => {
                let target = self.object_ref()?;
                match self.peek() {
                    Some(Token::Equals) => {
                        self.position += 1;
                        let value = self.expr()?;
                        if let Some(literal) = value.as_literal() {
                            self.symbols.bind(target.name, literal);
                        }
                        InstructionKind::Assign { target, value }
                    }
                    Some(Token::LessHyphen) => {
                        self.position += 1;
                        let value = self.expr()?;
                        let guards = self.guards()?;
                        InstructionKind::Production {
                            target,
                            value,
                            guards,
                        }
                    }
                    _ => return Err(self.unexpected(&["=", "<-"])),
                }
            }
            _ => return Err(self.unexpected(&["@", "call", "[", "name", "}"])),
        };

        let iterations = match self.eat(&Token::Colon) {
            Some(_) => self.iterations()?,
            None => Vec::new(),
        };
        let span = Span::from(self.range(start, self.last_end()));
        self.check_limit(span, iterations.len(), self.limits.iterations, "iterators")?;

        Ok(Instruction {
            span,
            kind,
            iterations,
        })
    }

    fn membrane(&mut self) -> Result<Membrane, Message> {
        let start = self.start();
        self.expect(Token::OpenBracket)?;
        let mut children = Vec::new();
        while self.peek() == Some(&Token::OpenBracket) {
            children.push(self.membrane()?);
        }
        self.expect(Token::CloseBracket)?;
        let span = Span::from(self.range(start, self.last_end()));
        self.check_limit(span, children.len(), self.limits.membranes, "child membranes")?;
        self.expect(Token::Apostrophe)?;
        let label = self.primary()?;

        Ok(Membrane { label, children })
    }

    fn guards(&mut self) -> Result<Guards, Message> {
        let protein = match self.eat(&Token::Comma) {
            Some(_) => Some(self.protein()?),
            None => None,
        };
        let enzyme = match self.eat(&Token::Question) {
            Some(_) => Some(self.expr()?),
            None => None,
        };
        Ok(Guards { protein, enzyme })
    }

    /// Protein objects are never replaced by bound values.
    fn protein(&mut self) -> Result<Expr, Message> {
        match self.peek() {
            Some(Token::IntLiteral(_)) => self.primary(),
            Some(Token::Name(_)) => {
                let object = self.object_ref()?;
                Ok(Expr::Object(object.name, object.indices))
            }
            _ => Err(self.unexpected(&["integer literal", "name"])),
        }
    }

    fn iterations(&mut self) -> Result<Vec<Iteration>, Message> {
        let mut iterations = vec![self.iteration()?];
        while self.eat(&Token::Comma).is_some() {
            iterations.push(self.iteration()?);
        }
        Ok(iterations)
    }

    fn iteration(&mut self) -> Result<Iteration, Message> {
        if let (Some(Token::Name(_)), Some(Token::KeywordIn)) = (self.peek(), self.peek_nth(1)) {
            let (_, var) = self.name()?;
            self.position += 1;
            let region = self.expr()?;
            return Ok(Iteration::Set { var, region });
        }

        let low = self.additive()?;
        self.expect(Token::LessEquals)?;
        let (_, var) = self.name()?;
        self.expect(Token::LessEquals)?;
        let high = self.additive()?;
        Ok(Iteration::Range { var, low, high })
    }

    /// A possibly indexed object in target position, `X{1, i}`.
    fn object_ref(&mut self) -> Result<ObjectRef, Message> {
        let (_, name) = self.name()?;
        let indices = match self.peek() {
            Some(Token::OpenBrace) => self.indices()?,
            _ => Vec::new(),
        };
        Ok(ObjectRef { name, indices })
    }

    fn indices(&mut self) -> Result<Vec<Expr>, Message> {
        self.expect(Token::OpenBrace)?;
        let mut indices = Vec::new();
        if self.peek() != Some(&Token::CloseBrace) {
            loop {
                indices.push(self.expr()?);
                if self.eat(&Token::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(Token::CloseBrace)?;
        self.check_limit(self.last_span(), indices.len(), self.limits.arguments, "indices")?;
        Ok(indices)
    }

    fn call_args(&mut self) -> Result<Args, Message> {
        self.expect(Token::OpenParen)?;
        let mut exprs = Vec::new();
        if !matches!(self.peek(), Some(Token::CloseParen | Token::Colon)) {
            loop {
                exprs.push(self.expr()?);
                if self.eat(&Token::Comma).is_none() {
                    break;
                }
            }
        }
        let iterations = match self.eat(&Token::Colon) {
            Some(_) => self.iterations()?,
            None => Vec::new(),
        };
        self.expect(Token::CloseParen)?;

        let span = self.last_span();
        self.check_limit(span, exprs.len(), self.limits.arguments, "arguments")?;
        self.check_limit(span, iterations.len(), self.limits.iterations, "iterators")?;
        Ok(Args { exprs, iterations })
    }

    pub fn expr(&mut self) -> Result<Expr, Message> {
        self.binary(Op::Or.precedence())
    }

    fn additive(&mut self) -> Result<Expr, Message> {
        self.binary(Op::Add.precedence())
    }

    /// Left associative binary operators binding at least as tightly as
    /// `min_precedence`.
    fn binary(&mut self, min_precedence: u8) -> Result<Expr, Message> {
        let mut left = self.unary()?;
        while let Some(op) = self.peek().and_then(binary_op) {
            if op.precedence() < min_precedence {
                break;
            }
            self.position += 1;
            let right = self.binary(op.precedence() + 1)?;
            left = fold::fold(self.symbols, op, Some(left), Some(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, Message> {
        let op = match self.peek() {
            Some(Token::Minus) => Op::Sub,
            Some(Token::Bang) => Op::Not,
            _ => return self.primary(),
        };
        self.position += 1;
        let operand = self.unary()?;
        Ok(fold::fold(self.symbols, op, None, Some(operand)))
    }

    fn primary(&mut self) -> Result<Expr, Message> {
        match self.peek() {
            Some(Token::IntLiteral(_) | Token::RealLiteral(_)) => {
                let Some((start, token, end)) = self.next() else {
                    return Err(self.unexpected(EXPRESSION));
                };
                let literal = match token {
                    Token::IntLiteral(source) => source.parse().ok().map(Literal::Int),
                    Token::RealLiteral(source) => source.parse().ok().map(Literal::Real),
                    _ => None,
                };
                match literal {
                    Some(literal) => Ok(Expr::Lit(literal)),
                    None => {
                        let range = self.range(start, end);
                        Err(ParseMessage::InvalidLiteral { range }.into())
                    }
                }
            }
            Some(Token::Name(_)) => {
                let (_, name) = self.name()?;
                match self.peek() {
                    Some(Token::OpenParen) => Ok(Expr::Call(name, self.call_args()?)),
                    Some(Token::OpenBrace) => {
                        let indices = self.indices()?;
                        Ok(fold::object(self.symbols, name, indices))
                    }
                    _ => Ok(fold::name(self.symbols, name)),
                }
            }
            Some(Token::OpenParen) => {
                self.position += 1;
                let expr = self.expr()?;
                self.expect(Token::CloseParen)?;
                Ok(expr)
            }
            _ => Err(self.unexpected(EXPRESSION)),
        }
    }

    fn name(&mut self) -> Result<(FileRange, Symbol), Message> {
        match self.peek() {
            Some(Token::Name(name)) => {
                let symbol = Symbol::intern(name);
                let (start, _, end) = self.tokens[self.position];
                self.position += 1;
                Ok((self.range(start, end), symbol))
            }
            _ => Err(self.unexpected(&["name"])),
        }
    }

    fn peek(&self) -> Option<&Token<'source>> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, offset: usize) -> Option<&Token<'source>> {
        let (_, token, _) = self.tokens.get(self.position + offset)?;
        Some(token)
    }

    fn next(&mut self) -> Option<Spanned<Token<'source>, BytePos>> {
        let token = self.tokens.get(self.position).cloned()?;
        self.position += 1;
        Some(token)
    }

    fn eat(&mut self, token: &Token<'source>) -> Option<FileRange> {
        if self.peek() != Some(token) {
            return None;
        }
        let (start, _, end) = self.next()?;
        Some(self.range(start, end))
    }

    fn expect(&mut self, token: Token<'source>) -> Result<FileRange, Message> {
        match self.eat(&token) {
            Some(range) => Ok(range),
            None => Err(self.unexpected(&[token.description()])),
        }
    }

    fn unexpected(&self, expected: &[&'static str]) -> Message {
        let expected = expected.to_vec();
        match self.tokens.get(self.position) {
            Some((start, token, end)) => ParseMessage::UnexpectedToken {
                range: self.range(*start, *end),
                found: token.description(),
                expected,
            },
            None => ParseMessage::UnexpectedEof {
                range: self.range(self.eof, self.eof),
                expected,
            },
        }
        .into()
    }

    fn check_limit(
        &self,
        span: Span,
        count: usize,
        limit: usize,
        what: &'static str,
    ) -> Result<(), Message> {
        match count > limit {
            true => Err(Message::LimitExceeded { span, what, limit }),
            false => Ok(()),
        }
    }

    fn start(&self) -> BytePos {
        self.tokens
            .get(self.position)
            .map_or(self.eof, |(start, _, _)| *start)
    }

    fn last_end(&self) -> BytePos {
        match self.position.checked_sub(1) {
            Some(index) => self.tokens[index].2,
            None => 0,
        }
    }

    fn last_span(&self) -> Span {
        match self.position.checked_sub(1) {
            Some(index) => {
                let (start, _, end) = self.tokens[index];
                Span::from(self.range(start, end))
            }
            None => Span::Empty,
        }
    }

    fn range(&self, start: BytePos, end: BytePos) -> FileRange {
        FileRange::new(self.file_id, ByteRange::new(start, end))
    }
}

fn binary_op(token: &Token<'_>) -> Option<Op> {
    match token {
        Token::PipePipe => Some(Op::Or),
        Token::AmpersandAmpersand => Some(Op::And),
        Token::EqualsEquals => Some(Op::Eq),
        Token::BangEquals => Some(Op::Neq),
        Token::Less => Some(Op::Lt),
        Token::Greater => Some(Op::Gt),
        Token::LessEquals => Some(Op::Le),
        Token::GreaterEquals => Some(Op::Ge),
        Token::Plus => Some(Op::Add),
        Token::Minus => Some(Op::Sub),
        Token::Star => Some(Op::Mul),
        Token::ForwardSlash => Some(Op::Div),
        Token::Percent => Some(Op::Mod),
        _ => None,
    }
}
