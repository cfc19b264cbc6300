//! The Clover toolchain.
//!
//! Clover is a small C-like imperative language compiled to a compact
//! byte-addressed executable (the `'arly'` format) and executed by the
//! Arly virtual machine on resource-constrained targets. This crate
//! re-exports the compiler, the VM and the decompiler behind one front
//! door; the pieces also work standalone.
//!
//! A host typically compiles once, stores the image (flash, EEPROM), and
//! then drives it:
//!
//! ```
//! use clover::{compile, Host, Interpreter};
//!
//! struct Rom(Vec<u8>);
//!
//! impl Host for Rom {
//!     fn rom(&self, addr: u16) -> u8 {
//!         self.0.get(addr as usize).copied().unwrap_or(0)
//!     }
//!     fn log(&self, msg: &str) {
//!         println!("{msg}");
//!     }
//! }
//!
//! let out = compile(
//!     "command hello 0 init loop;
//!      function init() { }
//!      function int loop() { return 100; }",
//! )
//! .unwrap();
//!
//! let rom = Rom(out.executable);
//! let mut vm = Interpreter::new(&rom);
//! assert!(vm.init("hello", &[]));
//! assert_eq!(vm.run_loop(), 100);
//! ```

pub use clover_compiler::{
    compile, decompile, Annotation, CompileError, CompileOutput, Compiler, CompilerDiagnostic,
    DecompileError, NativeFunction,
};
pub use clover_core::{Address, CoreNative, Op, OpParams, Type};
pub use clover_vm::{CoreModule, Host, Interpreter, Machine, NativeModule, VmError};
