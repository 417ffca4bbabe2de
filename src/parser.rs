//! Grammar-driven parser and interpreter.
//!
//! One recursive-descent function per grammar production; each function both
//! checks syntax/semantics and, when `interpret` is set, performs the
//! corresponding runtime effect.  There is no persisted syntax tree: a first
//! structural pass registers declarations and records the source offset of
//! every method body plus `main`'s, then execution re-seeks the scanner to
//! those offsets and runs the same grammar again with side effects enabled.
//!
//! Method calls save the scanner position, current token, scope cursor, and
//! interpret flag, run the callee's body, and restore them, so recursion and
//! nested calls stack naturally on the native call stack.

use std::collections::HashMap;
use std::io::prelude::*;

use crate::diag::{Diagnostic, ErrorKind, MiniCError};
use crate::scanner::Scanner;
use crate::scope::{Decl, DeclKind, PrimType, ScopeId, ScopeTree, Value};
use crate::token::{Token, TokenKind};

/// Typed result of one expression production: the static type and, in
/// interpret mode, the computed value.
#[derive(Debug, Clone, Copy)]
struct Operand {
    prim: PrimType,
    value: Value,
}

impl Operand {
    fn unknown(prim: PrimType) -> Operand {
        Operand {
            prim,
            value: Value::Unknown,
        }
    }
}

/// How a statement finished.  `Returning` propagates through statement
/// lists, blocks, and `while` up to the enclosing call boundary, which
/// consumes it.
#[derive(Debug)]
enum Flow {
    Normal,
    Returning(Operand),
}

/// A declared type: a primitive or the name of a user class.
#[derive(Debug)]
struct TypeSpec {
    prim: PrimType,
    class_name: Option<String>,
}

/// Saved scanner cursor and token for speculative lookahead.
#[derive(Debug)]
struct Mark {
    pos: usize,
    token: Token,
}

#[derive(Debug)]
pub struct Parser<'t, W: Write> {
    scanner: Scanner,
    output: &'t mut W,
    token: Token,
    scopes: ScopeTree,
    /// False while only checking syntax and declarations.
    interpret: bool,
    /// Source offset of the first token inside each recorded method body.
    method_offsets: HashMap<ScopeId, usize>,
    main_scope: Option<ScopeId>,
    main_offset: usize,
}

impl<'t, W: Write> Parser<'t, W> {
    pub fn new(scanner: Scanner, output: &'t mut W) -> Parser<'t, W> {
        Parser {
            scanner,
            output,
            token: Token::new("", TokenKind::End), // we haven't scanned anything yet
            scopes: ScopeTree::new(),
            interpret: false,
            method_offsets: HashMap::new(),
            main_scope: None,
            main_offset: 0,
        }
    }

    /// Checks and executes the whole program: one declaration pass over the
    /// source, then `main`'s body re-run in interpret mode.
    pub fn run(&mut self) -> Result<(), MiniCError> {
        self.next_token()?;
        self.program()?;
        if self.token.kind != TokenKind::End {
            return Err(self.fail(ErrorKind::UnexpectedToken {
                found: self.token.to_string(),
                expected: "end of program".to_string(),
            }));
        }
        writeln!(self.output, "analysis completed successfully")?;

        if let Some(main_id) = self.main_scope {
            let prev = self.scopes.current();
            self.interpret = true;
            self.scopes.set_current(main_id);
            self.seek(self.main_offset)?;
            self.scopes.open_block();
            let flow = self.statement_list()?;
            self.scopes.close_scope();
            let result = match flow {
                Flow::Returning(op) => coerce(op.value, PrimType::Int),
                Flow::Normal => {
                    self.expect(TokenKind::RightBrace)?;
                    Value::Int(0)
                }
            };
            self.interpret = false;
            self.scopes.set_current(prev);
            writeln!(self.output, "main returned {}", result)?;
        }
        Ok(())
    }

    // Program -> GlobalDescriptions "int" "main" "(" ")" "{" StatementList "}"
    fn program(&mut self) -> Result<(), MiniCError> {
        self.global_descriptions()?;
        self.expect(TokenKind::Int)?;
        self.expect(TokenKind::Main)?;
        self.expect(TokenKind::LeftParen)?;
        self.expect(TokenKind::RightParen)?;

        let main_id = self
            .scopes
            .declare(Decl::new("main", DeclKind::Function, PrimType::Int));
        let prev = self.scopes.current();
        self.scopes.set_current(main_id);

        self.expect(TokenKind::LeftBrace)?;
        self.main_offset = self.scanner.token_start();
        let saved = self.interpret;
        self.interpret = false;
        self.scopes.open_block();
        self.statement_list()?;
        self.scopes.close_scope();
        self.expect(TokenKind::RightBrace)?;
        self.interpret = saved;

        self.scopes.set_current(prev);
        self.main_scope = Some(main_id);
        Ok(())
    }

    fn global_descriptions(&mut self) -> Result<(), MiniCError> {
        while matches!(
            self.token.kind,
            TokenKind::Class | TokenKind::Int | TokenKind::Double | TokenKind::Identifier
        ) {
            if self.token.kind == TokenKind::Int {
                // "int" may start "int main", which ends the globals.
                let mark = self.mark();
                self.next_token()?;
                let is_main = self.token.kind == TokenKind::Main;
                self.rewind(mark);
                if is_main {
                    return Ok(());
                }
            }
            self.description()?;
        }
        Ok(())
    }

    // One top-level declaration: a class, a constant (initialized with a
    // literal), or a variable declaration shared with statement position.
    fn description(&mut self) -> Result<(), MiniCError> {
        if self.token.kind == TokenKind::Class {
            return self.class_desc();
        }
        let mark = self.mark();
        self.parse_type()?;
        self.expect_identifier()?;
        match self.token.kind {
            TokenKind::Assign => {
                self.rewind(mark);
                self.const_decl()
            }
            TokenKind::Semicolon | TokenKind::Comma => {
                self.rewind(mark);
                self.simple_statement()
            }
            _ => Err(self.fail(ErrorKind::UnexpectedToken {
                found: self.token.to_string(),
                expected: "'=' or ';'".to_string(),
            })),
        }
    }

    // ClassDesc -> "class" Id "{" MemberDecl* "}" ";"
    fn class_desc(&mut self) -> Result<(), MiniCError> {
        self.expect(TokenKind::Class)?;
        let name = self.expect_identifier()?;
        if self.scopes.lookup_local(&name).is_some() {
            return Err(self.fail(ErrorKind::DuplicateDeclaration(name)));
        }
        self.expect(TokenKind::LeftBrace)?;
        self.scopes
            .open_scope(Decl::new(&name, DeclKind::Class, PrimType::Undefined));
        let mut methods = vec![];
        while matches!(
            self.token.kind,
            TokenKind::Int | TokenKind::Double | TokenKind::Identifier
        ) {
            self.member_decl(&mut methods)?;
        }
        self.scopes.close_scope();
        self.expect(TokenKind::RightBrace)?;
        self.expect(TokenKind::Semicolon)?;

        // Bodies are checked only once the whole class is known, so members
        // may reference each other regardless of textual order.
        for method in methods {
            self.check_method_body(method)?;
        }
        Ok(())
    }

    fn member_decl(&mut self, methods: &mut Vec<ScopeId>) -> Result<(), MiniCError> {
        let mark = self.mark();
        self.parse_type()?;
        self.expect_identifier()?;
        match self.token.kind {
            TokenKind::LeftParen => {
                self.rewind(mark);
                self.method_decl(methods)
            }
            TokenKind::Comma | TokenKind::Semicolon => {
                self.rewind(mark);
                self.field_decl()
            }
            _ => Err(self.fail(ErrorKind::UnexpectedToken {
                found: self.token.to_string(),
                expected: "'(' or ';'".to_string(),
            })),
        }
    }

    // Method -> Type Id "(" ")" "{" ... "}"
    //
    // The body is skipped here; its start offset is recorded for the
    // structural check after the class closes and for execution.
    fn method_decl(&mut self, methods: &mut Vec<ScopeId>) -> Result<(), MiniCError> {
        let ty = self.parse_type()?;
        let name = self.expect_identifier()?;
        if ty.class_name.is_some() || !ty.prim.is_numeric() {
            return Err(self.fail(ErrorKind::BadMethodType(name)));
        }
        if self.scopes.lookup_local(&name).is_some() {
            return Err(self.fail(ErrorKind::DuplicateDeclaration(name)));
        }
        self.expect(TokenKind::LeftParen)?;
        self.expect(TokenKind::RightParen)?;
        let method_id = self
            .scopes
            .open_scope(Decl::new(&name, DeclKind::Method, ty.prim));
        self.expect(TokenKind::LeftBrace)?;
        self.method_offsets
            .insert(method_id, self.scanner.token_start());
        self.skip_balanced_braces()?;
        self.scopes.close_scope();
        methods.push(method_id);
        Ok(())
    }

    // Field -> Type Id ("," Id)* ";"
    fn field_decl(&mut self) -> Result<(), MiniCError> {
        let ty = self.parse_type()?;
        loop {
            let name = self.expect_identifier()?;
            if self.scopes.lookup_local(&name).is_some() {
                return Err(self.fail(ErrorKind::DuplicateDeclaration(name)));
            }
            let decl = match &ty.class_name {
                Some(class) => Decl::object(&name, DeclKind::Field, class),
                None => Decl::new(&name, DeclKind::Field, ty.prim),
            };
            self.scopes.declare(decl);
            if self.token.kind != TokenKind::Comma {
                break;
            }
            self.next_token()?;
        }
        self.expect(TokenKind::Semicolon)
    }

    // ConstDecl -> Type Id "=" Literal ";"
    fn const_decl(&mut self) -> Result<(), MiniCError> {
        let ty = self.parse_type()?;
        let name = self.expect_identifier()?;
        if ty.class_name.is_some() || !ty.prim.is_numeric() {
            return Err(self.fail(ErrorKind::BadConstType(name)));
        }
        if self.scopes.lookup_local(&name).is_some() {
            return Err(self.fail(ErrorKind::DuplicateDeclaration(name)));
        }
        self.expect(TokenKind::Assign)?;
        let lit = self.literal()?;
        self.expect(TokenKind::Semicolon)?;
        let mut decl = Decl::new(&name, DeclKind::Constant, ty.prim);
        decl.value = self.cast_for_assign(lit, ty.prim, &name)?;
        decl.initialized = true;
        self.scopes.declare(decl);
        Ok(())
    }

    fn parse_type(&mut self) -> Result<TypeSpec, MiniCError> {
        let spec = match self.token.kind {
            TokenKind::Int => TypeSpec {
                prim: PrimType::Int,
                class_name: None,
            },
            TokenKind::Double => TypeSpec {
                prim: PrimType::Double,
                class_name: None,
            },
            TokenKind::Identifier => TypeSpec {
                prim: PrimType::Undefined,
                class_name: Some(self.token.lexeme.clone()),
            },
            _ => return Err(self.fail(ErrorKind::ExpectedType)),
        };
        self.next_token()?;
        Ok(spec)
    }

    // Statement lists stop at the closing brace (or end of input) and
    // propagate an early return without touching the remaining tokens; the
    // enclosing call boundary re-seeks anyway.
    fn statement_list(&mut self) -> Result<Flow, MiniCError> {
        while !matches!(self.token.kind, TokenKind::RightBrace | TokenKind::End) {
            if let Flow::Returning(op) = self.statement()? {
                return Ok(Flow::Returning(op));
            }
        }
        Ok(Flow::Normal)
    }

    fn statement(&mut self) -> Result<Flow, MiniCError> {
        match self.token.kind {
            TokenKind::Semicolon => {
                self.next_token()?;
                Ok(Flow::Normal)
            }
            TokenKind::LeftBrace => self.block(),
            TokenKind::While => self.while_stmt(),
            TokenKind::Return => self.return_stmt(),
            TokenKind::Int
            | TokenKind::Double
            | TokenKind::Identifier
            | TokenKind::PlusPlus
            | TokenKind::MinusMinus => {
                self.simple_statement()?;
                Ok(Flow::Normal)
            }
            _ => Err(self.fail(ErrorKind::ExpectedStatement)),
        }
    }

    fn block(&mut self) -> Result<Flow, MiniCError> {
        self.expect(TokenKind::LeftBrace)?;
        self.scopes.open_block();
        let flow = self.statement_list()?;
        self.scopes.close_scope();
        match flow {
            Flow::Normal => {
                self.expect(TokenKind::RightBrace)?;
                Ok(Flow::Normal)
            }
            ret => Ok(ret),
        }
    }

    // While -> "while" "(" Expression ")" Statement
    //
    // Each iteration re-seeks to the condition offset.  The body runs with
    // interpret = outer && condition, so a false condition still parses the
    // body once for structural validation without executing it.
    fn while_stmt(&mut self) -> Result<Flow, MiniCError> {
        self.expect(TokenKind::While)?;
        let cond_offset = self.scanner.token_start();
        let outer = self.interpret;
        loop {
            self.seek(cond_offset)?;
            self.expect(TokenKind::LeftParen)?;
            let cond = self.expression()?;
            if !cond.prim.is_numeric() {
                return Err(self.fail(ErrorKind::NonNumericCondition));
            }
            self.expect(TokenKind::RightParen)?;
            let looping = outer && cond.value.is_truthy();
            self.interpret = looping;
            let flow = self.statement()?;
            self.interpret = outer;
            if let Flow::Returning(op) = flow {
                return Ok(Flow::Returning(op));
            }
            if !looping {
                return Ok(Flow::Normal);
            }
        }
    }

    // Return -> "return" Expression ";"
    fn return_stmt(&mut self) -> Result<Flow, MiniCError> {
        self.expect(TokenKind::Return)?;
        let op = self.expression()?;
        if !op.prim.is_numeric() {
            return Err(self.fail(ErrorKind::NonNumericReturn));
        }
        self.expect(TokenKind::Semicolon)?;
        if self.interpret {
            Ok(Flow::Returning(op))
        } else {
            Ok(Flow::Normal)
        }
    }

    // Declarations, assignments, increment/decrement, and method-call
    // statements.  Shared with top-level descriptions for plain and
    // object-variable declarations.
    fn simple_statement(&mut self) -> Result<(), MiniCError> {
        match self.token.kind {
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let inc = self.token.kind == TokenKind::PlusPlus;
                self.next_token()?;
                let (target, _, name) = self.designator(false)?;
                self.check_mutable_numeric(target, &name)?;
                if self.interpret {
                    self.step_value(target, inc);
                    self.print_assignment(target, &name)?;
                }
                self.expect(TokenKind::Semicolon)
            }
            TokenKind::Int | TokenKind::Double => self.var_decl(),
            _ => self.designator_statement(),
        }
    }

    // "int x;" or "int x = Expression;"
    fn var_decl(&mut self) -> Result<(), MiniCError> {
        let prim = if self.token.kind == TokenKind::Int {
            PrimType::Int
        } else {
            PrimType::Double
        };
        self.next_token()?;
        let name = self.expect_identifier()?;
        if self.scopes.lookup_local(&name).is_some() {
            return Err(self.fail(ErrorKind::DuplicateDeclaration(name)));
        }
        let mut init = None;
        if self.token.kind == TokenKind::Assign {
            self.next_token()?;
            let op = self.expression()?;
            if !compatible_assign(prim, op.prim) {
                return Err(self.fail(ErrorKind::IncompatibleAssignment(name)));
            }
            init = Some(op);
        }
        let mut decl = Decl::new(&name, DeclKind::Variable, prim);
        decl.initialized = init.is_some();
        let id = self.scopes.declare(decl);
        if self.interpret {
            if let Some(op) = init {
                self.assign(id, op, &name)?;
            }
        }
        self.expect(TokenKind::Semicolon)
    }

    // Statements starting with an identifier: object-variable declaration
    // ("C c;"), method call, postfix increment/decrement, or (compound)
    // assignment.
    fn designator_statement(&mut self) -> Result<(), MiniCError> {
        let mark = self.mark();
        let head = self.token.lexeme.clone();
        self.next_token()?;

        if self.token.kind == TokenKind::Identifier {
            let var = self.token.lexeme.clone();
            self.next_token()?;
            if self.scopes.lookup_local(&var).is_some() {
                return Err(self.fail(ErrorKind::DuplicateDeclaration(var)));
            }
            if self.scopes.lookup_global_class(&head).is_none() {
                return Err(self.fail(ErrorKind::UnknownClass(head)));
            }
            if self.token.kind == TokenKind::Assign {
                return Err(self.fail(ErrorKind::ObjectInitializer(var)));
            }
            self.scopes.declare(Decl::object(&var, DeclKind::Variable, &head));
            return self.expect(TokenKind::Semicolon);
        }

        self.rewind(mark);
        let (target, is_call, name) = self.designator(true)?;
        if is_call {
            if self.interpret {
                self.exec_method(target, &name)?;
            }
            return self.expect(TokenKind::Semicolon);
        }
        if self.scopes.decl(target).kind == DeclKind::Method {
            return Err(self.fail(ErrorKind::MethodNotCalled(name)));
        }

        match self.token.kind {
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let inc = self.token.kind == TokenKind::PlusPlus;
                self.check_mutable_numeric(target, &name)?;
                self.next_token()?;
                if self.interpret {
                    self.step_value(target, inc);
                    self.print_assignment(target, &name)?;
                }
                self.expect(TokenKind::Semicolon)
            }
            TokenKind::Assign
            | TokenKind::PlusAssign
            | TokenKind::MinusAssign
            | TokenKind::StarAssign
            | TokenKind::SlashAssign
            | TokenKind::PercentAssign => {
                // The target is vetted before the right-hand side is even
                // parsed, uniformly for plain and compound assignment.
                self.check_mutable_numeric(target, &name)?;
                let op_kind = self.token.kind;
                self.next_token()?;
                let rhs = self.expression()?;
                if !rhs.prim.is_numeric() {
                    return Err(self.fail(ErrorKind::NonNumericRhs));
                }
                let left_prim = self.scopes.decl(target).prim;
                let result = if op_kind == TokenKind::Assign {
                    rhs
                } else {
                    let left = self.read_operand(target);
                    self.eval_binary(compound_op(op_kind), left, rhs)?
                };
                if !compatible_assign(left_prim, result.prim) {
                    return Err(self.fail(ErrorKind::IncompatibleAssignment(name)));
                }
                if self.interpret {
                    self.assign(target, result, &name)?;
                }
                self.expect(TokenKind::Semicolon)
            }
            _ => Err(self.fail(ErrorKind::BadStatement(name))),
        }
    }

    /// Resolves a dotted designator: the head name lexically, then each
    /// `.member` step as a direct child of the globally looked-up class of
    /// the entity so far.  A trailing `()` is accepted only where calls are
    /// allowed and only on methods.
    fn designator(&mut self, allow_call: bool) -> Result<(ScopeId, bool, String), MiniCError> {
        if self.token.kind != TokenKind::Identifier {
            return Err(self.fail(ErrorKind::UnexpectedToken {
                found: self.token.to_string(),
                expected: "identifier".to_string(),
            }));
        }
        let head = self.token.lexeme.clone();
        let mut full = head.clone();
        let mut id = match self.scopes.lookup_lexical(&head) {
            Some(id) => id,
            None => return Err(self.fail(ErrorKind::UndeclaredIdentifier(head))),
        };
        self.next_token()?;

        while self.token.kind == TokenKind::Dot {
            self.next_token()?;
            let member = self.expect_identifier()?;
            full.push('.');
            full.push_str(&member);
            let decl = self.scopes.decl(id);
            if !matches!(decl.kind, DeclKind::Variable | DeclKind::Field)
                || decl.class_name.is_empty()
            {
                let name = decl.name.clone();
                return Err(self.fail(ErrorKind::MemberOfNonObject(name)));
            }
            let class_name = decl.class_name.clone();
            let class_id = match self.scopes.lookup_global_class(&class_name) {
                Some(id) => id,
                None => return Err(self.fail(ErrorKind::UnknownClass(class_name))),
            };
            id = match self.scopes.lookup_child(class_id, &member) {
                Some(id) => id,
                None => {
                    return Err(self.fail(ErrorKind::UnknownMember {
                        class: class_name,
                        member,
                    }))
                }
            };
        }

        let mut is_call = false;
        if self.token.kind == TokenKind::LeftParen {
            if !allow_call {
                return Err(self.fail(ErrorKind::CallNotAllowedHere));
            }
            if self.scopes.decl(id).kind != DeclKind::Method {
                return Err(self.fail(ErrorKind::CallOfNonMethod(full)));
            }
            self.expect(TokenKind::LeftParen)?;
            self.expect(TokenKind::RightParen)?;
            is_call = true;
        }
        Ok((id, is_call, full))
    }

    // Expression -> Term (RelOp Term)?
    fn expression(&mut self) -> Result<Operand, MiniCError> {
        let left = self.term()?;
        if matches!(
            self.token.kind,
            TokenKind::Less
                | TokenKind::Greater
                | TokenKind::LessEqual
                | TokenKind::GreaterEqual
                | TokenKind::EqualEqual
                | TokenKind::NotEqual
        ) {
            let op = self.token.kind;
            self.next_token()?;
            let right = self.term()?;
            return self.eval_binary(op, left, right);
        }
        Ok(left)
    }

    // Term -> Factor (("+" | "-") Factor)*
    fn term(&mut self) -> Result<Operand, MiniCError> {
        let mut acc = self.factor()?;
        while matches!(self.token.kind, TokenKind::Plus | TokenKind::Minus) {
            let op = self.token.kind;
            self.next_token()?;
            let rhs = self.factor()?;
            acc = self.eval_binary(op, acc, rhs)?;
        }
        Ok(acc)
    }

    // Factor -> Unary (("*" | "/" | "%") Unary)*
    fn factor(&mut self) -> Result<Operand, MiniCError> {
        let mut acc = self.unary()?;
        while matches!(
            self.token.kind,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent
        ) {
            let op = self.token.kind;
            self.next_token()?;
            let rhs = self.unary()?;
            acc = self.eval_binary(op, acc, rhs)?;
        }
        Ok(acc)
    }

    // Unary -> ("++" | "--") Designator | ("+" | "-")? Primary
    fn unary(&mut self) -> Result<Operand, MiniCError> {
        if matches!(self.token.kind, TokenKind::PlusPlus | TokenKind::MinusMinus) {
            let inc = self.token.kind == TokenKind::PlusPlus;
            self.next_token()?;
            let (target, _, name) = self.designator(false)?;
            self.check_mutable_numeric(target, &name)?;
            let prim = self.scopes.decl(target).prim;
            if self.interpret {
                // Prefix yields the stepped value.
                let value = self.step_value(target, inc);
                return Ok(Operand { prim, value });
            }
            return Ok(Operand::unknown(prim));
        }

        let negate = match self.token.kind {
            TokenKind::Minus => {
                self.next_token()?;
                true
            }
            TokenKind::Plus => {
                self.next_token()?;
                false
            }
            _ => false,
        };
        let mut op = self.primary()?;
        if negate && self.interpret {
            op.value = match op.value {
                Value::Int(n) => Value::Int(n.wrapping_neg()),
                Value::Double(d) => Value::Double(-d),
                v => v,
            };
        }
        Ok(op)
    }

    // Primary -> Designator ("++" | "--")? | Constant | "(" Expression ")"
    fn primary(&mut self) -> Result<Operand, MiniCError> {
        match self.token.kind {
            TokenKind::Identifier => {
                let (id, is_call, name) = self.designator(true)?;
                if is_call {
                    let prim = self.scopes.decl(id).prim;
                    if self.interpret {
                        let value = self.exec_method(id, &name)?;
                        return Ok(Operand { prim, value });
                    }
                    return Ok(Operand::unknown(prim));
                }
                let (kind, prim, stored) = {
                    let decl = self.scopes.decl(id);
                    (decl.kind, decl.prim, decl.value)
                };
                if kind == DeclKind::Method {
                    return Err(self.fail(ErrorKind::MethodNotCalled(name)));
                }
                let mut op = if self.interpret {
                    Operand {
                        prim,
                        value: coerce(stored, prim),
                    }
                } else {
                    Operand::unknown(prim)
                };
                if matches!(self.token.kind, TokenKind::PlusPlus | TokenKind::MinusMinus) {
                    let inc = self.token.kind == TokenKind::PlusPlus;
                    self.check_mutable_numeric(id, &name)?;
                    self.next_token()?;
                    if self.interpret {
                        // Postfix yields the value before the step.
                        let old = op.value;
                        self.step_value(id, inc);
                        op.value = old;
                    }
                }
                Ok(op)
            }
            TokenKind::ConstInt | TokenKind::ConstDouble => self.literal(),
            TokenKind::LeftParen => {
                self.next_token()?;
                let op = self.expression()?;
                self.expect(TokenKind::RightParen)?;
                Ok(op)
            }
            _ => Err(self.fail(ErrorKind::ExpectedExpression)),
        }
    }

    fn literal(&mut self) -> Result<Operand, MiniCError> {
        let text = self.token.lexeme.clone();
        let op = match self.token.kind {
            TokenKind::ConstInt => match text.parse::<i64>() {
                Ok(n) => Operand {
                    prim: PrimType::Int,
                    value: Value::Int(n),
                },
                Err(_) => return Err(self.fail(ErrorKind::MalformedNumber(text))),
            },
            TokenKind::ConstDouble => match text.parse::<f64>() {
                Ok(d) => Operand {
                    prim: PrimType::Double,
                    value: Value::Double(d),
                },
                Err(_) => return Err(self.fail(ErrorKind::MalformedNumber(text))),
            },
            _ => return Err(self.fail(ErrorKind::ExpectedExpression)),
        };
        self.next_token()?;
        Ok(op)
    }

    /// Evaluates one binary operation, or only its result type when not
    /// interpreting.  Comparisons always yield int 0/1; arithmetic widens to
    /// double when either operand is double; division or modulo by zero
    /// warns and yields zero; int overflow wraps.
    fn eval_binary(
        &mut self,
        op: TokenKind,
        l: Operand,
        r: Operand,
    ) -> Result<Operand, MiniCError> {
        if !l.prim.is_numeric() || !r.prim.is_numeric() {
            return Err(self.fail(ErrorKind::NonNumericOperand(op.to_string())));
        }
        let compare = matches!(
            op,
            TokenKind::Less
                | TokenKind::Greater
                | TokenKind::LessEqual
                | TokenKind::GreaterEqual
                | TokenKind::EqualEqual
                | TokenKind::NotEqual
        );
        if !self.interpret {
            let prim = if compare || (l.prim == PrimType::Int && r.prim == PrimType::Int) {
                PrimType::Int
            } else {
                PrimType::Double
            };
            return Ok(Operand::unknown(prim));
        }

        if compare {
            let (lv, rv) = (l.value.as_double(), r.value.as_double());
            let truth = match op {
                TokenKind::Less => lv < rv,
                TokenKind::Greater => lv > rv,
                TokenKind::LessEqual => lv <= rv,
                TokenKind::GreaterEqual => lv >= rv,
                TokenKind::EqualEqual => lv == rv,
                _ => lv != rv,
            };
            return Ok(Operand {
                prim: PrimType::Int,
                value: Value::Int(truth as i64),
            });
        }

        if l.prim == PrimType::Double || r.prim == PrimType::Double {
            let (lv, rv) = (l.value.as_double(), r.value.as_double());
            let value = match op {
                TokenKind::Plus => lv + rv,
                TokenKind::Minus => lv - rv,
                TokenKind::Star => lv * rv,
                TokenKind::Slash => {
                    if rv == 0.0 {
                        self.warn("division by zero")?;
                        0.0
                    } else {
                        lv / rv
                    }
                }
                _ => {
                    self.warn("'%' applied to double operands, truncating to int")?;
                    let ri = rv as i64;
                    if ri == 0 {
                        self.warn("modulo by zero")?;
                        0.0
                    } else {
                        (lv as i64).wrapping_rem(ri) as f64
                    }
                }
            };
            Ok(Operand {
                prim: PrimType::Double,
                value: Value::Double(value),
            })
        } else {
            // Int arithmetic wraps on overflow instead of aborting.
            let (lv, rv) = (l.value.as_int(), r.value.as_int());
            let value = match op {
                TokenKind::Plus => lv.wrapping_add(rv),
                TokenKind::Minus => lv.wrapping_sub(rv),
                TokenKind::Star => lv.wrapping_mul(rv),
                TokenKind::Slash => {
                    if rv == 0 {
                        self.warn("division by zero")?;
                        0
                    } else {
                        lv.wrapping_div(rv)
                    }
                }
                _ => {
                    if rv == 0 {
                        self.warn("modulo by zero")?;
                        0
                    } else {
                        lv.wrapping_rem(rv)
                    }
                }
            };
            Ok(Operand {
                prim: PrimType::Int,
                value: Value::Int(value),
            })
        }
    }

    /// Executes a method body: save the scanner position, current token,
    /// scope cursor, and interpret flag; seek to the recorded body offset in
    /// a fresh block scope under the method; run the statement list; coerce
    /// the returned value to the method's declared type; restore everything.
    fn exec_method(&mut self, method_id: ScopeId, full_name: &str) -> Result<Value, MiniCError> {
        let offset = match self.method_offsets.get(&method_id) {
            Some(&offset) => offset,
            None => return Err(self.fail(ErrorKind::MissingBody(full_name.to_string()))),
        };
        let saved_pos = self.scanner.pos();
        let saved_token = self.token.clone();
        let saved_scope = self.scopes.current();
        let saved_interpret = self.interpret;

        self.interpret = true;
        self.scopes.set_current(method_id);
        self.seek(offset)?;
        self.scopes.open_block();
        let flow = self.statement_list()?;
        self.scopes.close_scope();

        let prim = self.scopes.decl(method_id).prim;
        let value = match flow {
            Flow::Returning(op) => coerce(op.value, prim),
            // Falling off the end yields the type's zero value.
            Flow::Normal => prim.default_value(),
        };

        self.interpret = saved_interpret;
        self.scopes.set_current(saved_scope);
        self.scanner.set_pos(saved_pos);
        self.token = saved_token;
        Ok(value)
    }

    /// Structurally checks a recorded method body (no side effects), then
    /// restores the parse position.
    fn check_method_body(&mut self, method_id: ScopeId) -> Result<(), MiniCError> {
        let offset = match self.method_offsets.get(&method_id) {
            Some(&offset) => offset,
            None => {
                let name = self.scopes.decl(method_id).name.clone();
                return Err(self.fail(ErrorKind::MissingBody(name)));
            }
        };
        let saved_pos = self.scanner.pos();
        let saved_token = self.token.clone();
        let saved_scope = self.scopes.current();
        let saved_interpret = self.interpret;

        self.interpret = false;
        self.scopes.set_current(method_id);
        self.seek(offset)?;
        self.scopes.open_block();
        self.statement_list()?;
        self.scopes.close_scope();
        self.expect(TokenKind::RightBrace)?;

        self.interpret = saved_interpret;
        self.scopes.set_current(saved_scope);
        self.scanner.set_pos(saved_pos);
        self.token = saved_token;
        Ok(())
    }

    // Skips an already-opened brace-delimited span, current token included.
    fn skip_balanced_braces(&mut self) -> Result<(), MiniCError> {
        let mut depth = 1usize;
        loop {
            match self.token.kind {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => {
                    depth -= 1;
                    if depth == 0 {
                        return self.next_token();
                    }
                }
                TokenKind::End => {
                    return Err(self.fail(ErrorKind::UnexpectedToken {
                        found: self.token.to_string(),
                        expected: "'}'".to_string(),
                    }))
                }
                _ => (),
            }
            self.next_token()?;
        }
    }

    /// The target of an assignment or increment must be a variable or field
    /// of numeric type; checked before any right-hand side is evaluated.
    fn check_mutable_numeric(&self, target: ScopeId, name: &str) -> Result<(), MiniCError> {
        let decl = self.scopes.decl(target);
        if !matches!(decl.kind, DeclKind::Variable | DeclKind::Field) {
            return Err(self.fail(ErrorKind::NotAssignable(name.to_string())));
        }
        if !decl.prim.is_numeric() {
            return Err(self.fail(ErrorKind::NonNumericTarget(name.to_string())));
        }
        Ok(())
    }

    /// Current value of a declared name as an operand; unknown when only
    /// checking.
    fn read_operand(&self, target: ScopeId) -> Operand {
        let decl = self.scopes.decl(target);
        if self.interpret {
            Operand {
                prim: decl.prim,
                value: coerce(decl.value, decl.prim),
            }
        } else {
            Operand::unknown(decl.prim)
        }
    }

    /// Adds or subtracts one in the target's own type and stores the result,
    /// returning the new value.
    fn step_value(&mut self, target: ScopeId, inc: bool) -> Value {
        let decl = self.scopes.decl_mut(target);
        let value = match decl.prim {
            PrimType::Double => {
                Value::Double(decl.value.as_double() + if inc { 1.0 } else { -1.0 })
            }
            _ => Value::Int(decl.value.as_int().wrapping_add(if inc { 1 } else { -1 })),
        };
        decl.value = value;
        decl.initialized = true;
        value
    }

    /// Stores `src` into `target`, casting to the declared type with a
    /// warning on any implicit conversion, and traces the assignment.
    fn assign(&mut self, target: ScopeId, src: Operand, name: &str) -> Result<(), MiniCError> {
        let prim = self.scopes.decl(target).prim;
        let value = self.cast_for_assign(src, prim, name)?;
        let decl = self.scopes.decl_mut(target);
        decl.value = value;
        decl.initialized = true;
        self.print_assignment(target, name)
    }

    fn cast_for_assign(
        &mut self,
        src: Operand,
        to: PrimType,
        name: &str,
    ) -> Result<Value, MiniCError> {
        match to {
            PrimType::Int => {
                if src.prim == PrimType::Double {
                    self.warn(&format!(
                        "implicit conversion (double -> int) in assignment to '{}'",
                        name
                    ))?;
                }
                Ok(Value::Int(src.value.as_int()))
            }
            PrimType::Double => {
                if src.prim == PrimType::Int {
                    self.warn(&format!(
                        "implicit conversion (int -> double) in assignment to '{}'",
                        name
                    ))?;
                }
                Ok(Value::Double(src.value.as_double()))
            }
            PrimType::Undefined => Ok(Value::Unknown),
        }
    }

    fn print_assignment(&mut self, target: ScopeId, name: &str) -> Result<(), MiniCError> {
        let value = self.scopes.decl(target).value;
        writeln!(self.output, "{} = {}", name, value)?;
        Ok(())
    }

    fn warn(&mut self, msg: &str) -> Result<(), MiniCError> {
        writeln!(self.output, "warning: {}", msg)?;
        Ok(())
    }

    fn next_token(&mut self) -> Result<(), MiniCError> {
        let token = self.scanner.scan();
        if token.kind == TokenKind::Error {
            let kind = self
                .scanner
                .take_error()
                .unwrap_or(ErrorKind::UnknownCharacter(token.lexeme));
            return Err(self.fail(kind));
        }
        self.token = token;
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), MiniCError> {
        if self.token.kind == kind {
            self.next_token()
        } else {
            Err(self.fail(ErrorKind::UnexpectedToken {
                found: self.token.to_string(),
                expected: format!("'{}'", kind),
            }))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, MiniCError> {
        if self.token.kind == TokenKind::Identifier {
            let name = self.token.lexeme.clone();
            self.next_token()?;
            Ok(name)
        } else {
            Err(self.fail(ErrorKind::UnexpectedToken {
                found: self.token.to_string(),
                expected: "identifier".to_string(),
            }))
        }
    }

    fn seek(&mut self, offset: usize) -> Result<(), MiniCError> {
        self.scanner.set_pos(offset);
        self.next_token()
    }

    fn mark(&self) -> Mark {
        Mark {
            pos: self.scanner.pos(),
            token: self.token.clone(),
        }
    }

    fn rewind(&mut self, mark: Mark) {
        self.scanner.set_pos(mark.pos);
        self.token = mark.token;
    }

    fn fail(&self, kind: ErrorKind) -> MiniCError {
        MiniCError::Analysis(Diagnostic {
            line: self.scanner.line(),
            kind,
            snippet: self.scanner.current_line_text(),
        })
    }
}

fn compatible_assign(l: PrimType, r: PrimType) -> bool {
    // Identical primitive types, or int <-> double with a cast.
    l.is_numeric() && r.is_numeric()
}

fn compound_op(kind: TokenKind) -> TokenKind {
    match kind {
        TokenKind::PlusAssign => TokenKind::Plus,
        TokenKind::MinusAssign => TokenKind::Minus,
        TokenKind::StarAssign => TokenKind::Star,
        TokenKind::SlashAssign => TokenKind::Slash,
        _ => TokenKind::Percent,
    }
}

fn coerce(value: Value, prim: PrimType) -> Value {
    match prim {
        PrimType::Int => Value::Int(value.as_int()),
        PrimType::Double => Value::Double(value.as_double()),
        PrimType::Undefined => Value::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> Result<String, MiniCError> {
        let mut output = vec![];
        let scanner = Scanner::new(input);
        let mut parser = Parser::new(scanner, &mut output);
        parser.run()?;
        Ok(String::from_utf8(output).expect("trace output is UTF-8"))
    }

    fn run_err(input: &str) -> Diagnostic {
        match run(input) {
            Err(MiniCError::Analysis(d)) => d,
            r => panic!("unexpected output: {:?}", r),
        }
    }

    #[test]
    fn empty_main_succeeds() {
        let out = run("int main() { }").expect("clean program");
        assert_eq!(out, "analysis completed successfully\nmain returned 0\n");
    }

    #[test]
    fn program_must_end_with_main() {
        let d = run_err("int x;");
        assert_eq!(
            d.kind,
            ErrorKind::UnexpectedToken {
                found: "end of input".to_string(),
                expected: "'int'".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_declaration_in_same_scope() {
        let d = run_err("int main() { int x; int x; }");
        assert_eq!(d.kind, ErrorKind::DuplicateDeclaration("x".to_string()));
    }

    #[test]
    fn undeclared_identifier() {
        let d = run_err("int main() { x = 1; }");
        assert_eq!(d.kind, ErrorKind::UndeclaredIdentifier("x".to_string()));
    }

    #[test]
    fn assignment_to_constant_is_rejected() {
        let d = run_err("int k = 5;\nint main() { k = 1; }");
        assert_eq!(d.kind, ErrorKind::NotAssignable("k".to_string()));
    }

    #[test]
    fn object_arithmetic_is_rejected() {
        let d = run_err("class C { int f; };\nint main() { C c; int x; x = c + 1; }");
        assert_eq!(d.kind, ErrorKind::NonNumericOperand("+".to_string()));
    }

    #[test]
    fn object_assignment_is_rejected_before_the_rhs() {
        let d = run_err("class C { int f; };\nint main() { C c; c = bogus; }");
        assert_eq!(d.kind, ErrorKind::NonNumericTarget("c".to_string()));
    }

    #[test]
    fn object_initializer_is_rejected() {
        let d = run_err("class C { int f; };\nint main() { C c = 1; }");
        assert_eq!(d.kind, ErrorKind::ObjectInitializer("c".to_string()));
    }

    #[test]
    fn while_condition_must_be_numeric() {
        let d = run_err("class C { int f; };\nint main() { C c; while (c) { } }");
        assert_eq!(d.kind, ErrorKind::NonNumericCondition);
    }

    #[test]
    fn return_expression_must_be_numeric() {
        let d = run_err("class C { int f; };\nint main() { C c; return c; }");
        assert_eq!(d.kind, ErrorKind::NonNumericReturn);
    }

    #[test]
    fn member_access_on_non_object() {
        let d = run_err("int main() { int x; x.f = 1; }");
        assert_eq!(d.kind, ErrorKind::MemberOfNonObject("x".to_string()));
    }

    #[test]
    fn unknown_member() {
        let d = run_err("class C { int f; };\nint main() { C c; c.g = 1; }");
        assert_eq!(
            d.kind,
            ErrorKind::UnknownMember {
                class: "C".to_string(),
                member: "g".to_string(),
            }
        );
    }

    #[test]
    fn unknown_class() {
        let d = run_err("int main() { D d; }");
        assert_eq!(d.kind, ErrorKind::UnknownClass("D".to_string()));
    }

    #[test]
    fn calling_a_non_method() {
        let d = run_err("int main() { int x; x(); }");
        assert_eq!(d.kind, ErrorKind::CallOfNonMethod("x".to_string()));
    }

    #[test]
    fn method_used_without_a_call() {
        let d = run_err(
            "class C { int m() { return 1; } };\nint main() { C c; int x; x = c.m; }",
        );
        assert_eq!(d.kind, ErrorKind::MethodNotCalled("c.m".to_string()));
    }

    #[test]
    fn call_not_allowed_as_increment_target() {
        let d = run_err("class C { int m() { return 1; } };\nint main() { C c; ++c.m(); }");
        assert_eq!(d.kind, ErrorKind::CallNotAllowedHere);
    }

    #[test]
    fn constant_must_be_primitive() {
        let d = run_err("class C { int f; };\nC k = 1;\nint main() { }");
        assert_eq!(d.kind, ErrorKind::BadConstType("k".to_string()));
    }

    #[test]
    fn method_return_type_must_be_primitive() {
        let d = run_err("class C { C m() { return 1; } };\nint main() { }");
        assert_eq!(d.kind, ErrorKind::BadMethodType("m".to_string()));
    }

    #[test]
    fn errors_carry_line_and_snippet() {
        let d = run_err("int main() {\n    int x;\n    x = y;\n}");
        assert_eq!(d.line, 3);
        assert_eq!(d.kind, ErrorKind::UndeclaredIdentifier("y".to_string()));
        assert_eq!(d.snippet, "    x = y;");
    }

    #[test]
    fn malformed_constant_is_fatal() {
        let d = run_err("int main() {\n    int x = 3.;\n}");
        assert_eq!(d.line, 2);
        assert_eq!(d.kind, ErrorKind::MalformedNumber("3.".to_string()));
    }

    #[test]
    fn lone_bang_is_fatal() {
        let d = run_err("int main() { int x = !1; }");
        assert_eq!(d.kind, ErrorKind::UnknownCharacter("!".to_string()));
    }

    #[test]
    fn syntax_error_inside_never_executed_loop_body() {
        let d = run_err("int main() { int x; while (0) { x = ; } }");
        assert_eq!(d.kind, ErrorKind::ExpectedExpression);
    }

    #[test]
    fn syntax_error_inside_method_body() {
        let d = run_err("class C { int m() { return ; } };\nint main() { }");
        assert_eq!(d.kind, ErrorKind::ExpectedExpression);
    }

    #[test]
    fn missing_semicolon_after_class() {
        let d = run_err("class C { int f; }\nint main() { }");
        assert_eq!(
            d.kind,
            ErrorKind::UnexpectedToken {
                found: "int".to_string(),
                expected: "';'".to_string(),
            }
        );
    }

    #[test]
    fn second_pass_does_not_redeclare() {
        // The interpreting pass re-runs main's body in a fresh block scope,
        // so its declarations do not collide with the structural pass.
        let out = run("int main() { int x = 1; int y = 2; }").expect("clean program");
        assert_eq!(
            out,
            "analysis completed successfully\nx = 1\ny = 2\nmain returned 0\n"
        );
    }
}
