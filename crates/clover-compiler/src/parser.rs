//! Recursive-descent parser and bytecode emitter for Clover.
//!
//! The parser consumes tokens, consults the symbol tables, drives the
//! expression baker and emits bytecode directly into the output buffer.
//! There is no AST: control flow is handled with jump-patch lists that are
//! resolved when each context closes, and the `for` statement relocates
//! its iteration bytes past the body before emitting the back jump.

use smallvec::SmallVec;

use clover_core::{float_to_int, Op, Type, MAX_CODE_SIZE, MAX_CONSTS, MAX_GLOBALS, MAX_LOCALS};

use crate::error::{CompileError, CompilerDiagnostic};
use crate::expr::{ExprAction, ExprEntry};
use crate::output::OutputBuffer;
use crate::scanner::{Annotation, Scanner};
use crate::symbols::{CommandDef, Def, FunctionDef, Storage, StructDef, Symbol};
use crate::token::Token;
use crate::NativeFunction;

pub(crate) type PResult<T> = Result<T, CompileError>;

/// Reserved words.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Reserved {
    Def,
    Struct,
    Const,
    Table,
    Var,
    Function,
    Return,
    Break,
    Continue,
    Log,
    Command,
    While,
    Loop,
    For,
    If,
    Else,
    Float,
    Int,
}

fn reserved_from_str(s: &str) -> Option<Reserved> {
    Some(match s {
        "def" => Reserved::Def,
        "struct" => Reserved::Struct,
        "const" => Reserved::Const,
        "table" => Reserved::Table,
        "var" => Reserved::Var,
        "function" => Reserved::Function,
        "return" => Reserved::Return,
        "break" => Reserved::Break,
        "continue" => Reserved::Continue,
        "log" => Reserved::Log,
        "command" => Reserved::Command,
        "while" => Reserved::While,
        "loop" => Reserved::Loop,
        "for" => Reserved::For,
        "if" => Reserved::If,
        "else" => Reserved::Else,
        "float" => Reserved::Float,
        "int" => Reserved::Int,
        _ => return None,
    })
}

/// Whether an expression position permits an assignment operator.
#[derive(Copy, Clone, PartialEq, Eq)]
enum ArithType {
    Assign,
    Op,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Assign {
    None,
    Only,
    Op,
}

/// One row of the binary-operator table.
struct OpInfo {
    token: Token,
    prec: u8,
    int_op: Op,
    float_op: Op,
    assign: Assign,
    result: Type,
}

#[rustfmt::skip]
const OP_INFO: &[OpInfo] = &[
    OpInfo { token: Token::Equal,  prec: 1,  int_op: Op::None,   float_op: Op::None,     assign: Assign::Only, result: Type::None },
    OpInfo { token: Token::AddSto, prec: 1,  int_op: Op::AddInt, float_op: Op::AddFloat, assign: Assign::Op,   result: Type::None },
    OpInfo { token: Token::SubSto, prec: 1,  int_op: Op::SubInt, float_op: Op::SubFloat, assign: Assign::Op,   result: Type::None },
    OpInfo { token: Token::MulSto, prec: 1,  int_op: Op::MulInt, float_op: Op::MulFloat, assign: Assign::Op,   result: Type::None },
    OpInfo { token: Token::DivSto, prec: 1,  int_op: Op::DivInt, float_op: Op::DivFloat, assign: Assign::Op,   result: Type::None },
    OpInfo { token: Token::AndSto, prec: 1,  int_op: Op::And,    float_op: Op::None,     assign: Assign::Op,   result: Type::Int },
    OpInfo { token: Token::OrSto,  prec: 1,  int_op: Op::Or,     float_op: Op::None,     assign: Assign::Op,   result: Type::Int },
    OpInfo { token: Token::XorSto, prec: 1,  int_op: Op::Xor,    float_op: Op::None,     assign: Assign::Op,   result: Type::Int },
    OpInfo { token: Token::LOr,    prec: 6,  int_op: Op::LOr,    float_op: Op::None,     assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::LAnd,   prec: 7,  int_op: Op::LAnd,   float_op: Op::None,     assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::Or,     prec: 8,  int_op: Op::Or,     float_op: Op::None,     assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::Xor,    prec: 9,  int_op: Op::Xor,    float_op: Op::None,     assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::And,    prec: 10, int_op: Op::And,    float_op: Op::None,     assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::Eq,     prec: 11, int_op: Op::EQInt,  float_op: Op::EQFloat,  assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::Ne,     prec: 11, int_op: Op::NEInt,  float_op: Op::NEFloat,  assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::Lt,     prec: 12, int_op: Op::LTInt,  float_op: Op::LTFloat,  assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::Gt,     prec: 12, int_op: Op::GTInt,  float_op: Op::GTFloat,  assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::Ge,     prec: 12, int_op: Op::GEInt,  float_op: Op::GEFloat,  assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::Le,     prec: 12, int_op: Op::LEInt,  float_op: Op::LEFloat,  assign: Assign::None, result: Type::Int },
    OpInfo { token: Token::Plus,   prec: 14, int_op: Op::AddInt, float_op: Op::AddFloat, assign: Assign::None, result: Type::None },
    OpInfo { token: Token::Minus,  prec: 14, int_op: Op::SubInt, float_op: Op::SubFloat, assign: Assign::None, result: Type::None },
    OpInfo { token: Token::Mul,    prec: 15, int_op: Op::MulInt, float_op: Op::MulFloat, assign: Assign::None, result: Type::None },
    OpInfo { token: Token::Div,    prec: 15, int_op: Op::DivInt, float_op: Op::DivFloat, assign: Assign::None, result: Type::None },
];

fn op_info(token: Token) -> Option<&'static OpInfo> {
    OP_INFO.iter().find(|i| i.token == token)
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum JumpKind {
    Start,
    Continue,
    Break,
}

#[derive(Copy, Clone, Debug)]
struct JumpEntry {
    kind: JumpKind,
    addr: u16,
}

/// First 7 bytes of a command name, zero padded: the identity used for
/// duplicate detection and the table entry.
fn cmd_key(name: &str) -> [u8; 7] {
    let mut key = [0u8; 7];
    for (dst, &src) in key.iter_mut().zip(name.as_bytes().iter().take(7)) {
        *dst = src;
    }
    key
}

/// A command element waiting for its function references to resolve;
/// commands may name functions defined later in the file.
struct PendingCommand {
    name: String,
    count: u8,
    init_fn: String,
    loop_fn: String,
}

pub(crate) struct Parser<'a> {
    scanner: Scanner<'a>,
    pub(crate) out: OutputBuffer,
    pub(crate) pool: Vec<u32>,
    globals: Vec<Symbol>,
    functions: Vec<FunctionDef>,
    structs: Vec<StructDef>,
    defs: Vec<Def>,
    pending_commands: Vec<PendingCommand>,
    pub(crate) commands: Vec<CommandDef>,
    expr_stack: Vec<ExprEntry>,
    jump_lists: Vec<SmallVec<[JumpEntry; 8]>>,
    next_global: u16,
    pub(crate) global_size: u16,
    pub(crate) local_high_water: u16,
    in_function: bool,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(source: &'a str, natives: &[NativeFunction]) -> Self {
        let functions = natives
            .iter()
            .map(|n| FunctionDef::native(&n.name, n.id, n.ret, &n.params))
            .collect();
        Self {
            scanner: Scanner::new(source),
            out: OutputBuffer::new(),
            pool: Vec::new(),
            globals: Vec::new(),
            functions,
            structs: Vec::new(),
            defs: Vec::new(),
            pending_commands: Vec::new(),
            commands: Vec::new(),
            expr_stack: Vec::new(),
            jump_lists: Vec::new(),
            next_global: 0,
            global_size: 0,
            local_high_water: 0,
            in_function: false,
        }
    }

    pub(crate) fn take_annotations(&mut self) -> Vec<Annotation> {
        self.scanner.take_annotations()
    }

    /// Build a diagnostic for `error` at the current scan position.
    pub(crate) fn diagnostic(&mut self, error: CompileError) -> CompilerDiagnostic {
        let token = self.scanner.get_token();
        let text = match token {
            Token::Identifier | Token::String => {
                String::from_utf8_lossy(&self.scanner.token_value().text).into_owned()
            }
            Token::Integer => self.scanner.token_value().integer.to_string(),
            Token::Float => self.scanner.token_value().number.to_string(),
            Token::EndOfFile => "<eof>".to_string(),
            t if (t as u8) < 0x80 => (t as u8 as char).to_string(),
            _ => String::new(),
        };
        CompilerDiagnostic {
            error,
            token,
            text,
            line: self.scanner.lineno(),
            col: self.scanner.charno(),
        }
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn match_token(&mut self, t: Token) -> bool {
        if self.scanner.get_token() != t {
            return false;
        }
        self.scanner.retire_token();
        true
    }

    fn expect_token(&mut self, t: Token) -> PResult<()> {
        if !self.match_token(t) {
            return Err(CompileError::ExpectedToken);
        }
        Ok(())
    }

    fn match_reserved(&mut self, r: Reserved) -> bool {
        if self.scanner.get_token() != Token::Identifier {
            return false;
        }
        let text = self.scanner.token_string();
        if reserved_from_str(&text) != Some(r) {
            return false;
        }
        self.scanner.retire_token();
        true
    }

    /// Current token as a non-reserved identifier, without consuming it.
    fn peek_identifier(&mut self) -> Option<String> {
        if self.scanner.get_token() != Token::Identifier {
            return None;
        }
        let text = self.scanner.token_string();
        if reserved_from_str(&text).is_some() {
            return None;
        }
        Some(text)
    }

    fn identifier(&mut self) -> Option<String> {
        let id = self.peek_identifier()?;
        self.scanner.retire_token();
        Some(id)
    }

    /// An identifier that may be a reserved word. Function-name positions
    /// use this so a command can bind routines named `init` and `loop`.
    fn any_identifier(&mut self) -> Option<String> {
        if self.scanner.get_token() != Token::Identifier {
            return None;
        }
        let id = self.scanner.token_string();
        self.scanner.retire_token();
        Some(id)
    }

    fn integer_value(&mut self) -> Option<u32> {
        if self.scanner.get_token() != Token::Integer {
            return None;
        }
        let v = self.scanner.token_value().integer;
        self.scanner.retire_token();
        Some(v)
    }

    fn float_value(&mut self) -> Option<f32> {
        if self.scanner.get_token() != Token::Float {
            return None;
        }
        let v = self.scanner.token_value().number;
        self.scanner.retire_token();
        Some(v)
    }

    fn string_value(&mut self) -> Option<Vec<u8>> {
        if self.scanner.get_token() != Token::String {
            return None;
        }
        let v = self.scanner.token_value().text.clone();
        self.scanner.retire_token();
        Some(v)
    }

    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    /// Record the first code offset emitted for the current source line.
    fn annotate(&mut self) {
        if self.scanner.annotation() == -1 {
            self.scanner.set_annotation(self.out.len() as i32);
        }
    }

    fn add_op(&mut self, op: Op) {
        self.annotate();
        self.out.emit_op(op);
    }

    fn add_op_index(&mut self, op: Op, index: u8) {
        self.annotate();
        self.out.emit_op_index(op, index);
    }

    fn add_op_byte(&mut self, op: Op, b: u8) {
        self.add_op(op);
        self.out.emit_byte(b);
    }

    fn add_op_targ(&mut self, op: Op, targ: u16) {
        self.annotate();
        self.out.emit_op_targ(op, targ);
    }

    // ------------------------------------------------------------------
    // Symbol lookup and allocation
    // ------------------------------------------------------------------

    fn current_function(&mut self) -> PResult<&mut FunctionDef> {
        self.functions.last_mut().ok_or(CompileError::InternalError)
    }

    fn find_symbol(&self, name: &str) -> Option<Symbol> {
        if let Some(sym) = self.globals.iter().find(|s| s.name == name) {
            return Some(sym.clone());
        }
        if self.in_function {
            if let Some(f) = self.functions.last() {
                return f.find_local(name).cloned();
            }
        }
        None
    }

    fn find_function(&self, name: &str) -> Option<FunctionDef> {
        self.functions.iter().find(|f| f.name == name).cloned()
    }

    fn find_def(&self, name: &str) -> Option<u8> {
        self.defs.iter().find(|d| d.name == name).map(|d| d.value)
    }

    fn struct_from_type(&self, ty: Type) -> Option<&StructDef> {
        self.structs.get(ty.struct_index()? as usize)
    }

    fn find_struct_member(&self, ty: Type, name: &str) -> PResult<(u8, Type)> {
        let s = self
            .struct_from_type(ty)
            .ok_or(CompileError::ExpectedStructType)?;
        s.find_entry(name).ok_or(CompileError::InvalidStructId)
    }

    fn element_size(&self, ty: Type) -> u8 {
        self.struct_from_type(ty).map(|s| s.size()).unwrap_or(1)
    }

    fn add_global(
        &mut self,
        name: String,
        addr: u8,
        ty: Type,
        storage: Storage,
        ptr: bool,
        size: u8,
    ) -> PResult<()> {
        if self.globals.iter().any(|s| s.name == name) {
            return Err(CompileError::DuplicateIdentifier);
        }
        self.globals.push(Symbol {
            name,
            addr,
            ty,
            ptr,
            storage,
            size,
        });
        Ok(())
    }

    /// Deduplicating constant-pool insert for an int literal.
    fn find_int(&mut self, i: i32) -> PResult<u8> {
        self.find_pool_word(i as u32)
    }

    /// Deduplicating constant-pool insert for a float literal.
    fn find_float(&mut self, f: f32) -> PResult<u8> {
        self.find_pool_word(float_to_int(f))
    }

    fn find_pool_word(&mut self, w: u32) -> PResult<u8> {
        if let Some(pos) = self.pool.iter().position(|&v| v == w) {
            return Ok(pos as u8);
        }
        if self.pool.len() >= MAX_CONSTS {
            return Err(CompileError::TooManyConstants);
        }
        self.pool.push(w);
        Ok((self.pool.len() - 1) as u8)
    }

    // ------------------------------------------------------------------
    // Expression baking
    // ------------------------------------------------------------------

    fn bake(&mut self, action: ExprAction, matching: Type) -> PResult<Type> {
        match action {
            ExprAction::Right => self.bake_right(matching),
            ExprAction::Left => self.bake_left(matching),
            ExprAction::Ref => self.bake_ref(),
            ExprAction::LeftRef => self.bake_left_ref(),
            ExprAction::Ptr => self.bake_ptr(),
            ExprAction::Index => self.bake_index(),
            ExprAction::Offset => self.bake_offset(),
        }
    }

    /// Materialize the top entry as a value on the runtime stack.
    fn bake_right(&mut self, matching: Type) -> PResult<Type> {
        let entry = self
            .expr_stack
            .last()
            .ok_or(CompileError::InternalError)?
            .clone();
        let ty = match entry {
            ExprEntry::Int(i) => {
                if matching == Type::Float {
                    // Promote the literal.
                    let id = self.find_float(i as f32)?;
                    self.add_op_byte(Op::Push, id);
                    Type::Float
                } else {
                    let u = i as u32;
                    if u <= 15 {
                        self.add_op_index(Op::PushIntConstS, u as u8);
                    } else if u <= 255 {
                        self.add_op_byte(Op::PushIntConst, u as u8);
                    } else {
                        let id = self.find_int(i)?;
                        self.add_op_byte(Op::Push, id);
                    }
                    Type::Int
                }
            }
            ExprEntry::Float(f) => {
                let id = self.find_float(f)?;
                self.add_op_byte(Op::Push, id);
                Type::Float
            }
            ExprEntry::Id(name) => {
                let sym = self
                    .find_symbol(&name)
                    .ok_or(CompileError::UndefinedIdentifier)?;
                self.add_op_byte(Op::Push, sym.id());
                if sym.ptr && matching != Type::Ptr {
                    self.add_op(Op::PushDeref);
                    sym.ty
                } else if sym.ptr {
                    Type::Ptr
                } else {
                    sym.ty
                }
            }
            ExprEntry::Ref { ty, ptr } => {
                // A pointer ref's value is the address itself.
                if ptr {
                    Type::Ptr
                } else {
                    self.add_op(Op::PushDeref);
                    ty
                }
            }
            ExprEntry::Value(ty) => ty,
            ExprEntry::Function(_) | ExprEntry::Dot(_) => return Err(CompileError::InternalError),
        };
        self.expr_stack.pop();
        Ok(ty)
    }

    /// Ensure the top entry is a reference; leaves the entry in place.
    fn bake_ref(&mut self) -> PResult<Type> {
        let entry = self
            .expr_stack
            .last()
            .ok_or(CompileError::InternalError)?
            .clone();
        match entry {
            ExprEntry::Ref { ty, .. } => Ok(ty),
            ExprEntry::Id(name) => {
                let sym = self
                    .find_symbol(&name)
                    .ok_or(CompileError::UndefinedIdentifier)?;
                self.expr_stack.pop();
                self.expr_stack.push(ExprEntry::Ref {
                    ty: sym.ty,
                    ptr: sym.ptr,
                });
                self.add_op_byte(Op::PushRef, sym.id());
                Ok(if sym.ptr { Type::Ptr } else { sym.ty })
            }
            _ => Err(CompileError::ExpectedIdentifier),
        }
    }

    /// Ref plus a duplicate-and-load, for read-modify-write assignments.
    fn bake_left_ref(&mut self) -> PResult<Type> {
        let ty = self.bake_ref()?;
        self.add_op(Op::Dup);
        self.add_op(Op::PushDeref);
        Ok(ty)
    }

    /// Store the value on top of the runtime stack through the ref below.
    fn bake_left(&mut self, matching: Type) -> PResult<Type> {
        let entry = self
            .expr_stack
            .last()
            .ok_or(CompileError::InternalError)?
            .clone();
        let ExprEntry::Ref { ty, ptr } = entry else {
            return Err(CompileError::ExpectedLHSExpr);
        };
        let result = if ptr && matching != Type::Ptr {
            // Assigning through the pointer: fetch the target address
            // from under the value.
            self.add_op(Op::Swap);
            self.add_op(Op::PushDeref);
            self.add_op(Op::Swap);
            ty
        } else if ptr {
            Type::Ptr
        } else {
            ty
        };
        self.add_op(Op::PopDeref);
        self.expr_stack.pop();
        Ok(result)
    }

    /// Turn the top entry into a pointer value (`&`).
    fn bake_ptr(&mut self) -> PResult<Type> {
        let ty = self.bake_ref()?;
        self.expr_stack.pop();
        self.expr_stack.push(ExprEntry::Ref { ty, ptr: true });
        Ok(Type::Ptr)
    }

    /// The index value has just been baked on top of a ref; scale it by
    /// the element size. The ref entry stays, now addressing the element.
    fn bake_index(&mut self) -> PResult<Type> {
        let entry = self
            .expr_stack
            .last()
            .ok_or(CompileError::InternalError)?
            .clone();
        let ExprEntry::Ref { ty, .. } = entry else {
            return Err(CompileError::ExpectedRef);
        };
        let size = self.element_size(ty);
        self.add_op_index(Op::Index, size);
        Ok(ty)
    }

    /// Resolve a struct member: the top entry names the member (by index
    /// or name), the entry below is the struct ref.
    fn bake_offset(&mut self) -> PResult<Type> {
        if self.expr_stack.len() < 2 {
            return Err(CompileError::InternalError);
        }
        let member = self.expr_stack.pop().ok_or(CompileError::InternalError)?;
        let ExprEntry::Ref { ty: struct_ty, ptr } = self
            .expr_stack
            .last()
            .ok_or(CompileError::InternalError)?
            .clone()
        else {
            return Err(CompileError::InternalError);
        };
        // Through a pointer, load the target address first.
        if ptr {
            self.add_op(Op::PushDeref);
        }
        let (index, elem_ty) = match member {
            ExprEntry::Dot(i) => {
                let s = self
                    .struct_from_type(struct_ty)
                    .ok_or(CompileError::ExpectedStructType)?;
                let ty = s
                    .entries
                    .get(i as usize)
                    .ok_or(CompileError::InvalidStructId)?
                    .1;
                (i, ty)
            }
            ExprEntry::Id(name) => self.find_struct_member(struct_ty, &name)?,
            _ => return Err(CompileError::InternalError),
        };
        self.expr_stack.pop();
        self.expr_stack.push(ExprEntry::Ref {
            ty: elem_ty,
            ptr: false,
        });
        self.add_op_index(Op::Offset, index);
        Ok(elem_ty)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn assignment_expression(&mut self) -> PResult<bool> {
        self.arithmetic_expression_prec(1, ArithType::Assign)
    }

    fn arithmetic_expression(&mut self) -> PResult<bool> {
        self.arithmetic_expression_prec(1, ArithType::Op)
    }

    fn arithmetic_expression_prec(&mut self, min_prec: u8, arith: ArithType) -> PResult<bool> {
        if !self.unary_expression()? {
            return Ok(false);
        }

        loop {
            let token = self.scanner.get_token();
            let Some(info) = op_info(token) else {
                return Ok(true);
            };
            if info.prec < min_prec {
                return Ok(true);
            }
            let next_min_prec = info.prec + 1;
            self.scanner.retire_token();

            if arith != ArithType::Assign && info.assign != Assign::None {
                return Err(CompileError::AssignmentNotAllowedHere);
            }

            let left_type = match info.assign {
                Assign::None => self.bake(ExprAction::Right, Type::None)?,
                Assign::Only => self.bake(ExprAction::Ref, Type::None)?,
                Assign::Op => self.bake(ExprAction::LeftRef, Type::None)?,
            };

            if !self.arithmetic_expression_prec(next_min_prec, ArithType::Op)? {
                return Err(CompileError::ExpectedExpr);
            }

            let right_type = self.bake(ExprAction::Right, left_type)?;

            match info.assign {
                Assign::Only => {}
                Assign::Op => {
                    if left_type != right_type {
                        return Err(CompileError::MismatchedType);
                    }
                    let op = if left_type == Type::Int {
                        info.int_op
                    } else {
                        info.float_op
                    };
                    if op == Op::None {
                        return Err(CompileError::WrongType);
                    }
                    self.add_op(op);
                }
                Assign::None => {
                    if left_type != right_type {
                        return Err(CompileError::MismatchedType);
                    }
                    let op = if left_type == Type::Int {
                        info.int_op
                    } else {
                        info.float_op
                    };
                    if op == Op::None {
                        return Err(CompileError::WrongType);
                    }
                    self.add_op(op);
                    let result = if info.result != Type::None {
                        info.result
                    } else {
                        left_type
                    };
                    self.expr_stack.push(ExprEntry::Value(result));
                }
            }

            if info.assign != Assign::None {
                let stored = self.bake(ExprAction::Left, right_type)?;
                if stored != right_type {
                    return Err(CompileError::MismatchedType);
                }
            }
        }
    }

    fn unary_expression(&mut self) -> PResult<bool> {
        if self.postfix_expression()? {
            return Ok(true);
        }

        let token = if self.match_token(Token::Minus) {
            Token::Minus
        } else if self.match_token(Token::Twiddle) {
            Token::Twiddle
        } else if self.match_token(Token::Bang) {
            Token::Bang
        } else if self.match_token(Token::Inc) {
            Token::Inc
        } else if self.match_token(Token::Dec) {
            Token::Dec
        } else if self.match_token(Token::And) {
            Token::And
        } else {
            return Ok(false);
        };

        if !self.unary_expression()? {
            return Err(CompileError::ExpectedExpr);
        }

        match token {
            Token::And => {
                self.bake(ExprAction::Ptr, Type::None)?;
            }
            Token::Inc | Token::Dec => {
                let ty = self.bake(ExprAction::Ref, Type::None)?;
                self.expr_stack.pop();
                self.expr_stack.push(ExprEntry::Value(ty));
                if ty == Type::Float {
                    self.add_op(if token == Token::Inc {
                        Op::PreIncFloat
                    } else {
                        Op::PreDecFloat
                    });
                } else {
                    if ty != Type::Int {
                        return Err(CompileError::MismatchedType);
                    }
                    self.add_op(if token == Token::Inc {
                        Op::PreIncInt
                    } else {
                        Op::PreDecInt
                    });
                }
            }
            _ => {
                // Fold literals instead of emitting an op; this is also
                // how negative literals reach the constant pool, and it
                // lets a negated int promote to float later.
                match self.expr_stack.last() {
                    Some(&ExprEntry::Float(f)) if token == Token::Minus => {
                        self.expr_stack.pop();
                        self.expr_stack.push(ExprEntry::Float(-f));
                        return Ok(true);
                    }
                    Some(&ExprEntry::Int(i)) => {
                        let folded = match token {
                            Token::Minus => i.wrapping_neg(),
                            Token::Twiddle => !i,
                            _ => i32::from(i == 0),
                        };
                        self.expr_stack.pop();
                        self.expr_stack.push(ExprEntry::Int(folded));
                        return Ok(true);
                    }
                    Some(_) => {}
                    None => return Err(CompileError::InternalError),
                }

                let ty = self.bake(ExprAction::Right, Type::None)?;
                self.expr_stack.push(ExprEntry::Value(ty));
                if token == Token::Minus {
                    if ty == Type::Float {
                        self.add_op(Op::NegFloat);
                    } else {
                        if ty != Type::Int {
                            return Err(CompileError::MismatchedType);
                        }
                        self.add_op(Op::NegInt);
                    }
                } else {
                    if ty != Type::Int {
                        return Err(CompileError::WrongType);
                    }
                    self.add_op(if token == Token::Twiddle {
                        Op::Not
                    } else {
                        Op::LNot
                    });
                }
            }
        }
        Ok(true)
    }

    fn postfix_expression(&mut self) -> PResult<bool> {
        if !self.primary_expression()? {
            return Ok(false);
        }

        loop {
            if self.match_token(Token::OpenParen) {
                // The entry below must be the function name.
                let name = match self.expr_stack.last() {
                    Some(ExprEntry::Id(name)) => name.clone(),
                    _ => return Err(CompileError::ExpectedFunction),
                };
                let fun = self
                    .find_function(&name)
                    .ok_or(CompileError::ExpectedFunction)?;
                self.expr_stack.pop();
                self.expr_stack.push(ExprEntry::Function(name));

                self.argument_list(&fun)?;
                self.expect_token(Token::CloseParen)?;

                self.expr_stack.pop();
                self.expr_stack.push(ExprEntry::Value(fun.ty));

                if fun.native {
                    self.add_op_byte(Op::CallNative, fun.native_id());
                } else {
                    self.add_op_targ(Op::Call, fun.addr);
                }
            } else if self.match_token(Token::OpenBracket) {
                self.bake(ExprAction::Ref, Type::None)?;
                if !self.arithmetic_expression()? {
                    return Err(CompileError::ExpectedExpr);
                }
                self.expect_token(Token::CloseBracket)?;
                if self.bake(ExprAction::Right, Type::None)? != Type::Int {
                    return Err(CompileError::WrongType);
                }
                self.bake(ExprAction::Index, Type::None)?;
            } else if self.match_token(Token::Dot) {
                let member = self.identifier().ok_or(CompileError::ExpectedIdentifier)?;
                self.bake(ExprAction::Ref, Type::None)?;
                // The ref on top carries the struct type; resolve the
                // member to its index here so the Offset bake sees it.
                let struct_ty = match self.expr_stack.last() {
                    Some(&ExprEntry::Ref { ty, .. }) => ty,
                    _ => return Err(CompileError::InternalError),
                };
                let (index, _) = self.find_struct_member(struct_ty, &member)?;
                self.expr_stack.push(ExprEntry::Dot(index));
                self.bake(ExprAction::Offset, Type::None)?;
                return Ok(true);
            } else if self.match_token(Token::Inc) {
                let ty = self.bake(ExprAction::Ref, Type::None)?;
                self.expr_stack.pop();
                self.expr_stack.push(ExprEntry::Value(ty));
                if ty == Type::Float {
                    self.add_op(Op::PostIncFloat);
                } else {
                    if ty != Type::Int {
                        return Err(CompileError::MismatchedType);
                    }
                    self.add_op(Op::PostIncInt);
                }
            } else if self.match_token(Token::Dec) {
                let ty = self.bake(ExprAction::Ref, Type::None)?;
                self.expr_stack.pop();
                self.expr_stack.push(ExprEntry::Value(ty));
                if ty == Type::Float {
                    self.add_op(Op::PostDecFloat);
                } else {
                    if ty != Type::Int {
                        return Err(CompileError::MismatchedType);
                    }
                    self.add_op(Op::PostDecInt);
                }
            } else {
                return Ok(true);
            }
        }
    }

    fn primary_expression(&mut self) -> PResult<bool> {
        if self.match_token(Token::OpenParen) {
            if !self.arithmetic_expression()? {
                return Err(CompileError::ExpectedExpr);
            }
            self.expect_token(Token::CloseParen)?;
            return Ok(true);
        }

        if let Some(id) = self.identifier() {
            // Defs substitute as integer literals.
            if let Some(v) = self.find_def(&id) {
                self.expr_stack.push(ExprEntry::Int(i32::from(v)));
            } else {
                self.expr_stack.push(ExprEntry::Id(id));
            }
            return Ok(true);
        }

        if let Some(f) = self.float_value() {
            self.expr_stack.push(ExprEntry::Float(f));
            return Ok(true);
        }

        if let Some(i) = self.integer_value() {
            self.expr_stack.push(ExprEntry::Int(i as i32));
            return Ok(true);
        }

        Ok(false)
    }

    fn argument_list(&mut self, fun: &FunctionDef) -> PResult<()> {
        let mut count = 0usize;
        loop {
            if !self.arithmetic_expression()? {
                if count == 0 {
                    break;
                }
                return Err(CompileError::ExpectedExpr);
            }
            count += 1;
            if (fun.args as usize) < count {
                return Err(CompileError::WrongNumberOfArgs);
            }

            let sym = &fun.locals[count - 1];
            let expected = if sym.ptr { Type::Ptr } else { sym.ty };
            if self.bake(ExprAction::Right, expected)? != expected {
                return Err(CompileError::MismatchedType);
            }

            if !self.match_token(Token::Comma) {
                break;
            }
        }
        if fun.args as usize != count {
            return Err(CompileError::WrongNumberOfArgs);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Types and declarations
    // ------------------------------------------------------------------

    /// Parse a type name if one is next: `int`, `float`, or a known
    /// struct name.
    fn try_type(&mut self, ty: &mut Type) -> bool {
        if self.match_reserved(Reserved::Float) {
            *ty = Type::Float;
            return true;
        }
        if self.match_reserved(Reserved::Int) {
            *ty = Type::Int;
            return true;
        }
        let Some(id) = self.peek_identifier() else {
            return false;
        };
        if let Some(index) = self.structs.iter().position(|s| s.name == id) {
            *ty = Type::Struct(index as u8);
            self.scanner.retire_token();
            return true;
        }
        false
    }

    /// A literal value converted to the bit pattern of `ty`.
    fn value(&mut self, ty: Type) -> PResult<Option<u32>> {
        let neg = self.match_token(Token::Minus);
        if let Some(mut f) = self.float_value() {
            if neg {
                f = -f;
            }
            return Ok(Some(if ty == Type::Int {
                f.round() as i32 as u32
            } else {
                float_to_int(f)
            }));
        }
        if let Some(i) = self.integer_value() {
            let mut i = i as i32;
            if neg {
                i = i.wrapping_neg();
            }
            return Ok(Some(if ty == Type::Float {
                float_to_int(i as f32)
            } else {
                i as u32
            }));
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    pub(crate) fn program(&mut self) -> PResult<()> {
        self.scanner.set_ignore_newlines(true);
        while self.element()? {}
        if self.scanner.get_token() != Token::EndOfFile {
            return Err(CompileError::ExpectedEnd);
        }
        self.resolve_commands()
    }

    /// Resolve command function references now that every function has
    /// been seen.
    fn resolve_commands(&mut self) -> PResult<()> {
        for pending in std::mem::take(&mut self.pending_commands) {
            let init_addr = self.function_addr(&pending.init_fn)?;
            let loop_addr = self.function_addr(&pending.loop_fn)?;
            self.commands.push(CommandDef {
                name: pending.name,
                count: pending.count,
                init_addr,
                loop_addr,
            });
        }
        Ok(())
    }

    fn function_addr(&self, name: &str) -> PResult<u16> {
        let fun = self
            .functions
            .iter()
            .find(|f| f.name == name)
            .ok_or(CompileError::UndefinedIdentifier)?;
        if fun.native {
            return Err(CompileError::ExpectedFunction);
        }
        Ok(fun.addr)
    }

    fn element(&mut self) -> PResult<bool> {
        if self.def()? {
            self.expect_token(Token::Semicolon)?;
            return Ok(true);
        }
        if self.constant()? {
            self.expect_token(Token::Semicolon)?;
            return Ok(true);
        }
        if self.var_statement()? {
            return Ok(true);
        }
        if self.table()? {
            return Ok(true);
        }
        if self.struct_()? {
            return Ok(true);
        }
        if self.function()? {
            return Ok(true);
        }
        if self.command()? {
            self.expect_token(Token::Semicolon)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn def(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::Def) {
            return Ok(false);
        }
        let name = self.identifier().ok_or(CompileError::ExpectedIdentifier)?;
        let value = self.integer_value().ok_or(CompileError::ExpectedValue)?;
        if value > 255 {
            return Err(CompileError::DefOutOfRange);
        }
        self.defs.push(Def {
            name,
            value: value as u8,
        });
        Ok(true)
    }

    fn constant(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::Const) {
            return Ok(false);
        }
        let mut ty = Type::None;
        if !self.try_type(&mut ty) {
            return Err(CompileError::ExpectedType);
        }
        let name = self.identifier().ok_or(CompileError::ExpectedIdentifier)?;
        let value = self.value(ty)?.ok_or(CompileError::ExpectedValue)?;

        if self.pool.len() >= MAX_CONSTS {
            return Err(CompileError::TooManyConstants);
        }
        self.add_global(name, self.pool.len() as u8, ty, Storage::Const, false, 1)?;
        self.pool.push(value);
        Ok(true)
    }

    fn table(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::Table) {
            return Ok(false);
        }
        let mut ty = Type::None;
        if !self.try_type(&mut ty) {
            return Err(CompileError::ExpectedType);
        }
        let name = self.identifier().ok_or(CompileError::ExpectedIdentifier)?;
        self.expect_token(Token::OpenBrace)?;

        if self.pool.len() >= MAX_CONSTS {
            return Err(CompileError::TooManyConstants);
        }
        self.add_global(name, self.pool.len() as u8, ty, Storage::Const, false, 1)?;

        let mut have_values = false;
        while let Some(v) = self.value(ty)? {
            if self.pool.len() >= MAX_CONSTS {
                return Err(CompileError::TooManyConstants);
            }
            self.pool.push(v);
            have_values = true;
        }
        if !have_values {
            return Err(CompileError::ExpectedValue);
        }
        self.expect_token(Token::CloseBrace)?;
        Ok(true)
    }

    fn struct_(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::Struct) {
            return Ok(false);
        }
        let name = self.identifier().ok_or(CompileError::ExpectedIdentifier)?;
        self.structs.push(StructDef::new(name));
        self.expect_token(Token::OpenBrace)?;
        while self.struct_entry()? {}
        self.expect_token(Token::CloseBrace)?;
        Ok(true)
    }

    fn struct_entry(&mut self) -> PResult<bool> {
        let mut ty = Type::None;
        if !self.try_type(&mut ty) {
            return Ok(false);
        }
        let name = self.identifier().ok_or(CompileError::ExpectedIdentifier)?;
        self.expect_token(Token::Semicolon)?;
        let s = self.structs.last_mut().ok_or(CompileError::InternalError)?;
        if !s.add_entry(name, ty) {
            return Err(CompileError::TooManyVars);
        }
        Ok(true)
    }

    fn var_statement(&mut self) -> PResult<bool> {
        let mut ty = Type::None;
        if !self.try_type(&mut ty) {
            return Ok(false);
        }
        let ptr = self.match_token(Token::Mul);

        let mut have_one = false;
        loop {
            if !self.var(ty, ptr)? {
                if have_one {
                    return Err(CompileError::ExpectedVar);
                }
                break;
            }
            have_one = true;
            if !self.match_token(Token::Comma) {
                break;
            }
        }
        self.expect_token(Token::Semicolon)?;
        Ok(true)
    }

    fn var(&mut self, ty: Type, ptr: bool) -> PResult<bool> {
        let Some(name) = self.identifier() else {
            return Ok(false);
        };

        let mut count: u32 = 1;
        if self.match_token(Token::OpenBracket) {
            count = self.integer_value().ok_or(CompileError::ExpectedValue)?;
            self.expect_token(Token::CloseBracket)?;
        }
        let size = u64::from(count) * u64::from(self.element_size(ty));

        if self.in_function {
            let f = self.current_function()?;
            if u64::from(f.frame_words()) + size > MAX_LOCALS as u64 {
                return Err(CompileError::TooManyVars);
            }
            if !f.add_local(name.clone(), ty, ptr, size as u8) {
                return Err(CompileError::DuplicateIdentifier);
            }
        } else {
            if u64::from(self.next_global) + size > MAX_GLOBALS as u64 {
                return Err(CompileError::TooManyVars);
            }
            self.add_global(
                name.clone(),
                self.next_global as u8,
                ty,
                Storage::Global,
                ptr,
                size as u8,
            )?;
            self.next_global += size as u16;
            self.global_size = self.next_global;
        }

        // Initializer: scalar int/float locals only. Global initializers
        // would emit code no command ever executes, so they are rejected.
        if self.match_token(Token::Equal) {
            if !self.in_function || count != 1 || !(ty == Type::Int || ty == Type::Float) {
                return Err(CompileError::AssignmentNotAllowedHere);
            }
            self.expr_stack.push(ExprEntry::Id(name));
            self.bake(ExprAction::Ref, Type::None)?;
            if !self.arithmetic_expression()? {
                return Err(CompileError::ExpectedExpr);
            }
            if self.bake(ExprAction::Right, ty)? != ty {
                return Err(CompileError::WrongType);
            }
            if self.bake(ExprAction::Left, ty)? != ty {
                return Err(CompileError::MismatchedType);
            }
        }
        Ok(true)
    }

    fn function(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::Function) {
            return Ok(false);
        }

        // Return type is optional.
        let mut ty = Type::None;
        self.try_type(&mut ty);

        let name = self
            .any_identifier()
            .ok_or(CompileError::ExpectedIdentifier)?;
        if self.out.len() > MAX_CODE_SIZE {
            return Err(CompileError::ExecutableTooBig);
        }
        self.functions
            .push(FunctionDef::new(name, self.out.len() as u16, ty));
        self.in_function = true;

        self.expect_token(Token::OpenParen)?;
        self.formal_parameter_list()?;
        self.expect_token(Token::CloseParen)?;
        self.expect_token(Token::OpenBrace)?;

        let args = self.current_function()?.args;
        if args > 15 {
            return Err(CompileError::ParamOutOfRange);
        }

        // SetFrame comes first; the locals byte is backfilled once the
        // body has declared them all.
        self.add_op_index(Op::SetFrame, args);
        let locals_index = self.out.len();
        self.out.emit_byte(0);

        let body_start = self.out.len();
        while self.statement()? {}
        self.expect_token(Token::CloseBrace)?;

        let local_words = self.current_function()?.local_words();
        if local_words > 255 {
            return Err(CompileError::TooManyVars);
        }
        self.out.patch_byte(locals_index, local_words as u8);

        if local_words > self.local_high_water {
            self.local_high_water = local_words;
        }

        // Fall off the end: return zero.
        if self.out.len() == body_start || self.out.last_op() != Some(Op::Return) {
            self.add_op_index(Op::PushIntConstS, 0);
            self.add_op(Op::Return);
        }

        self.in_function = false;
        Ok(true)
    }

    fn formal_parameter_list(&mut self) -> PResult<()> {
        loop {
            let mut ty = Type::None;
            if !self.try_type(&mut ty) {
                return Ok(());
            }
            let ptr = self.match_token(Token::Mul);
            let name = self.identifier().ok_or(CompileError::ExpectedIdentifier)?;
            if !self.current_function()?.add_arg(name, ty, ptr) {
                return Err(CompileError::DuplicateIdentifier);
            }
            if !self.match_token(Token::Comma) {
                return Ok(());
            }
        }
    }

    fn command(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::Command) {
            return Ok(false);
        }
        let name = self.identifier().ok_or(CompileError::ExpectedIdentifier)?;
        let count = self.integer_value().ok_or(CompileError::ExpectedValue)?;
        if count > 15 {
            return Err(CompileError::InvalidParamCount);
        }

        let init_fn = self
            .any_identifier()
            .ok_or(CompileError::ExpectedIdentifier)?;
        let loop_fn = self
            .any_identifier()
            .ok_or(CompileError::ExpectedIdentifier)?;

        let key = cmd_key(&name);
        if self.pending_commands.iter().any(|c| cmd_key(&c.name) == key) {
            return Err(CompileError::DuplicateCmd);
        }
        self.pending_commands.push(PendingCommand {
            name,
            count: count as u8,
            init_fn,
            loop_fn,
        });
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> PResult<bool> {
        if self.compound_statement()? {
            return Ok(true);
        }
        if self.if_statement()? {
            return Ok(true);
        }
        if self.for_statement()? {
            return Ok(true);
        }
        if self.while_statement()? {
            return Ok(true);
        }
        if self.loop_statement()? {
            return Ok(true);
        }
        if self.return_statement()? {
            return Ok(true);
        }
        if self.jump_statement()? {
            return Ok(true);
        }
        if self.log_statement()? {
            return Ok(true);
        }
        if self.var_statement()? {
            return Ok(true);
        }
        if self.expression_statement()? {
            return Ok(true);
        }
        Ok(false)
    }

    fn compound_statement(&mut self) -> PResult<bool> {
        if !self.match_token(Token::OpenBrace) {
            return Ok(false);
        }
        // Locals declared in the block lose their names when it closes.
        let num_locals = if self.in_function {
            self.current_function()?.num_locals()
        } else {
            0
        };
        while self.statement()? {}
        self.expect_token(Token::CloseBrace)?;
        if self.in_function {
            self.current_function()?.prune_locals(num_locals);
        }
        Ok(true)
    }

    fn if_statement(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::If) {
            return Ok(false);
        }
        self.expect_token(Token::OpenParen)?;
        if !self.arithmetic_expression()? {
            return Err(CompileError::ExpectedExpr);
        }
        if self.bake(ExprAction::Right, Type::None)? != Type::Int {
            return Err(CompileError::WrongType);
        }
        self.expect_token(Token::CloseParen)?;

        let if_jump_addr = self.out.len();
        self.add_op_targ(Op::If, 0);

        if !self.statement()? {
            return Err(CompileError::ExpectedExpr);
        }

        // Without an else this is where a false condition lands.
        let mut if_target_addr = self.out.len();

        if self.match_reserved(Reserved::Else) {
            let else_jump_addr = self.out.len();
            self.add_op_targ(Op::Jump, 0);

            if_target_addr = self.out.len();
            if !self.statement()? {
                return Err(CompileError::ExpectedExpr);
            }

            let offset = self.out.len() as i32 - else_jump_addr as i32 - 2;
            if !self.out.patch_targ(else_jump_addr, offset) {
                return Err(CompileError::ElseTooBig);
            }
        }

        let offset = if_target_addr as i32 - if_jump_addr as i32 - 2;
        if !self.out.patch_targ(if_jump_addr, offset) {
            return Err(CompileError::IfTooBig);
        }
        Ok(true)
    }

    /// The `for` schema:
    ///
    /// ```text
    ///              <init>
    ///   startAddr: <cond>  If -> breakAddr
    ///              <body>
    ///   contAddr:  <iteration>
    ///              Jump -> startAddr
    ///   breakAddr:
    /// ```
    ///
    /// The iteration is compiled in source order, then its bytes are
    /// relocated to follow the body.
    fn for_statement(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::For) {
            return Ok(false);
        }
        self.expect_token(Token::OpenParen)?;

        if !self.match_token(Token::Semicolon) {
            let mut ty = Type::None;
            self.try_type(&mut ty);
            if ty != Type::None {
                // A declaration: must be int or float with an initializer.
                if !(ty == Type::Int || ty == Type::Float) {
                    return Err(CompileError::WrongType);
                }
                let name = self.identifier().ok_or(CompileError::ExpectedIdentifier)?;
                self.expect_token(Token::Equal)?;

                if !self.in_function {
                    return Err(CompileError::InternalError);
                }
                let f = self.current_function()?;
                if f.frame_words() + 1 > MAX_LOCALS as u16 {
                    return Err(CompileError::TooManyVars);
                }
                if !f.add_local(name.clone(), ty, false, 1) {
                    return Err(CompileError::DuplicateIdentifier);
                }

                self.expr_stack.push(ExprEntry::Id(name));
                self.bake(ExprAction::Ref, Type::None)?;
                if !self.arithmetic_expression()? {
                    return Err(CompileError::ExpectedExpr);
                }
                if self.bake(ExprAction::Right, ty)? != ty {
                    return Err(CompileError::WrongType);
                }
                if self.bake(ExprAction::Left, ty)? != ty {
                    return Err(CompileError::MismatchedType);
                }
            } else {
                if !self.assignment_expression()? {
                    return Err(CompileError::ExpectedExpr);
                }
                self.discard_expression_value()?;
            }
            self.expect_token(Token::Semicolon)?;
        }

        self.enter_jump_context();

        let start_addr = self.out.len();

        if !self.match_token(Token::Semicolon) {
            if !self.arithmetic_expression()? {
                return Err(CompileError::ExpectedExpr);
            }
            if self.bake(ExprAction::Right, Type::None)? != Type::Int {
                return Err(CompileError::WrongType);
            }
            self.add_jump_entry(Op::If, JumpKind::Break)?;
            self.expect_token(Token::Semicolon)?;
        }

        // Compile the iteration in place, then pull its bytes out.
        let mut iteration = Vec::new();
        if !self.match_token(Token::CloseParen) {
            let iter_addr = self.out.len();
            if !self.assignment_expression()? {
                return Err(CompileError::ExpectedExpr);
            }
            self.discard_expression_value()?;
            self.expect_token(Token::CloseParen)?;
            iteration = self.out.extract(iter_addr);
        }

        if !self.statement()? {
            return Err(CompileError::ExpectedExpr);
        }

        let mut cont_addr = start_addr;
        if !iteration.is_empty() {
            cont_addr = self.out.len();
            self.out.append(&iteration);
        }

        self.add_jump_entry(Op::Jump, JumpKind::Start)?;
        let break_addr = self.out.len();
        self.exit_jump_context(start_addr, cont_addr, break_addr)
            .map(|_| true)
    }

    fn while_statement(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::While) {
            return Ok(false);
        }
        self.enter_jump_context();
        self.expect_token(Token::OpenParen)?;

        let loop_addr = self.out.len();
        if !self.arithmetic_expression()? {
            return Err(CompileError::ExpectedExpr);
        }
        if self.bake(ExprAction::Right, Type::None)? != Type::Int {
            return Err(CompileError::WrongType);
        }
        self.add_jump_entry(Op::If, JumpKind::Break)?;
        self.expect_token(Token::CloseParen)?;

        if !self.statement()? {
            return Err(CompileError::ExpectedExpr);
        }

        self.add_jump_entry(Op::Jump, JumpKind::Continue)?;
        let break_addr = self.out.len();
        self.exit_jump_context(loop_addr, loop_addr, break_addr)
            .map(|_| true)
    }

    fn loop_statement(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::Loop) {
            return Ok(false);
        }
        self.enter_jump_context();

        let loop_addr = self.out.len();
        if !self.statement()? {
            return Err(CompileError::ExpectedExpr);
        }

        self.add_jump_entry(Op::Jump, JumpKind::Continue)?;
        let break_addr = self.out.len();
        self.exit_jump_context(loop_addr, loop_addr, break_addr)
            .map(|_| true)
    }

    fn return_statement(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::Return) {
            return Ok(false);
        }
        if self.arithmetic_expression()? {
            let ty = self.bake(ExprAction::Right, Type::None)?;
            if ty != self.current_function()?.ty {
                return Err(CompileError::MismatchedType);
            }
        } else {
            // A bare return needs a None function type; push a zero so
            // the frame restore always has a value.
            if self.current_function()?.ty != Type::None {
                return Err(CompileError::MismatchedType);
            }
            self.add_op_index(Op::PushIntConstS, 0);
        }
        self.add_op(Op::Return);
        self.expect_token(Token::Semicolon)?;
        Ok(true)
    }

    fn jump_statement(&mut self) -> PResult<bool> {
        let kind = if self.match_reserved(Reserved::Break) {
            JumpKind::Break
        } else if self.match_reserved(Reserved::Continue) {
            JumpKind::Continue
        } else {
            return Ok(false);
        };
        if self.jump_lists.is_empty() {
            return Err(CompileError::OnlyAllowedInLoop);
        }
        self.add_jump_entry(Op::Jump, kind)?;
        self.expect_token(Token::Semicolon)?;
        Ok(true)
    }

    fn log_statement(&mut self) -> PResult<bool> {
        if !self.match_reserved(Reserved::Log) {
            return Ok(false);
        }
        self.expect_token(Token::OpenParen)?;
        let text = self.string_value().ok_or(CompileError::ExpectedString)?;
        if text.len() >= 256 {
            return Err(CompileError::StringTooLong);
        }

        let mut num_args = 0u8;
        while self.match_token(Token::Comma) {
            if !self.arithmetic_expression()? {
                return Err(CompileError::ExpectedExpr);
            }
            num_args += 1;
            if num_args >= 16 {
                return Err(CompileError::TooManyVars);
            }
            let ty = self.bake(ExprAction::Right, Type::None)?;
            if ty != Type::Float && ty != Type::Int {
                return Err(CompileError::WrongType);
            }
        }

        self.add_op_index(Op::Log, num_args);
        self.out.emit_byte(text.len() as u8);
        for b in text {
            self.out.emit_byte(b);
        }

        self.expect_token(Token::CloseParen)?;
        self.expect_token(Token::Semicolon)?;
        Ok(true)
    }

    fn expression_statement(&mut self) -> PResult<bool> {
        if !self.assignment_expression()? {
            return Ok(false);
        }
        self.discard_expression_value()?;
        self.expect_token(Token::Semicolon)?;
        Ok(true)
    }

    /// An expression used as a statement may leave one unused entry (for
    /// instance a function's return value); materialize and drop it.
    fn discard_expression_value(&mut self) -> PResult<()> {
        if self.expr_stack.is_empty() {
            return Ok(());
        }
        if self.expr_stack.len() != 1 {
            return Err(CompileError::InternalError);
        }
        self.bake(ExprAction::Right, Type::None)?;
        self.add_op(Op::Drop);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Jump contexts
    // ------------------------------------------------------------------

    fn enter_jump_context(&mut self) {
        self.jump_lists.push(SmallVec::new());
    }

    /// Emit `op` with a zero target and record the site for patching.
    fn add_jump_entry(&mut self, op: Op, kind: JumpKind) -> PResult<()> {
        let addr = self.out.len() as u16;
        self.add_op_targ(op, 0);
        let list = self
            .jump_lists
            .last_mut()
            .ok_or(CompileError::InternalError)?;
        list.push(JumpEntry { kind, addr });
        Ok(())
    }

    /// Resolve every recorded jump in the innermost context.
    fn exit_jump_context(
        &mut self,
        start_addr: usize,
        cont_addr: usize,
        break_addr: usize,
    ) -> PResult<()> {
        let list = self.jump_lists.pop().ok_or(CompileError::InternalError)?;
        for entry in list {
            let target = match entry.kind {
                JumpKind::Start => start_addr,
                JumpKind::Continue => cont_addr,
                JumpKind::Break => break_addr,
            };
            let offset = target as i32 - i32::from(entry.addr) - 2;
            if !self.out.patch_targ(entry.addr as usize, offset) {
                return Err(CompileError::JumpTooBig);
            }
        }
        Ok(())
    }
}
