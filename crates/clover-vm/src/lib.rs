//! The Arly virtual machine.
//!
//! A byte-at-a-time interpreter for Clover executables. The host supplies
//! the image through the [`Host::rom`] callback and receives diagnostics
//! through [`Host::log`]; everything else (operand stack, globals, frame
//! discipline, native dispatch) lives here.
//!
//! The VM is single-threaded and cooperative: `init` and `run_loop` each
//! run to completion, and `run_loop` returns a delay for the host
//! scheduler. One interpreter instance owns its storage exclusively for
//! the duration of a call; independent instances may run concurrently.

mod core_module;
mod error;
mod interp;
mod machine;
mod native;
mod stack;

pub use core_module::CoreModule;
pub use error::VmError;
pub use interp::Interpreter;
pub use machine::{Host, Machine};
pub use native::NativeModule;
pub use stack::Stack;
