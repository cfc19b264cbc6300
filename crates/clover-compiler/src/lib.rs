//! Compiler for the Clover language.
//!
//! Clover is a small C-like imperative language that targets the Arly
//! virtual machine. Compilation is a single pass: the recursive-descent
//! parser drives an expression baker and emits bytecode directly, then the
//! image serializer wraps the result in the executable envelope the VM
//! loads. Compilation is pure: bytes in, bytes out.
//!
//! ```
//! let out = clover_compiler::compile(
//!     "command hello 0 init loop;
//!      function init() { }
//!      function int loop() { return 100; }",
//! )
//! .unwrap();
//! assert_eq!(&out.executable[0..4], b"arly");
//! ```

mod decompile;
mod error;
mod expr;
mod image;
mod output;
mod parser;
mod scanner;
mod symbols;
mod token;

pub use decompile::{decompile, DecompileError};
pub use error::{CompileError, CompilerDiagnostic};
pub use scanner::{Annotation, Scanner};
pub use token::{Token, TokenValue};

use clover_core::Type;

/// A native function signature the compiler can resolve calls against.
#[derive(Clone, Debug)]
pub struct NativeFunction {
    pub name: String,
    pub id: u8,
    pub ret: Type,
    pub params: Vec<(String, Type)>,
}

/// The result of a successful compilation: the executable image plus the
/// per-line annotations consumed by the decompiler.
#[derive(Clone, Debug)]
pub struct CompileOutput {
    pub executable: Vec<u8>,
    pub annotations: Vec<Annotation>,
}

/// Compiler front-end. Core natives are pre-registered; hosts providing
/// extra native modules register their signatures before compiling.
pub struct Compiler {
    natives: Vec<NativeFunction>,
}

impl Compiler {
    pub fn new() -> Self {
        let natives = clover_core::CORE_NATIVES
            .iter()
            .map(|sig| NativeFunction {
                name: sig.name.to_string(),
                id: sig.id,
                ret: sig.ret,
                params: sig
                    .params
                    .iter()
                    .map(|(n, t)| (n.to_string(), *t))
                    .collect(),
            })
            .collect();
        Self { natives }
    }

    /// Register a host native function.
    pub fn add_native(
        &mut self,
        name: &str,
        id: u8,
        ret: Type,
        params: &[(&str, Type)],
    ) -> &mut Self {
        self.natives.push(NativeFunction {
            name: name.to_string(),
            id,
            ret,
            params: params
                .iter()
                .map(|(n, t)| (n.to_string(), *t))
                .collect(),
        });
        self
    }

    /// Compile Clover source to an executable image.
    pub fn compile(&self, source: &str) -> Result<CompileOutput, CompilerDiagnostic> {
        let mut parser = parser::Parser::new(source, &self.natives);
        if let Err(e) = parser.program() {
            return Err(parser.diagnostic(e));
        }
        let annotations = parser.take_annotations();
        match image::emit_image(
            &parser.pool,
            parser.global_size,
            parser.local_high_water,
            &parser.commands,
            parser.out.as_slice(),
        ) {
            Ok(executable) => Ok(CompileOutput {
                executable,
                annotations,
            }),
            Err(e) => Err(parser.diagnostic(e)),
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile with the default (Core-only) native set.
pub fn compile(source: &str) -> Result<CompileOutput, CompilerDiagnostic> {
    Compiler::new().compile(source)
}
