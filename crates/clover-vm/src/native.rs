//! The native-module extension surface.

use crate::machine::Machine;

/// A host extension providing callable native functions.
///
/// On `CallNative` the interpreter scans its modules in registration order
/// and uses the first one that accepts the id. The module reports how many
/// parameters the function takes, the interpreter establishes a frame over
/// them, and `call` runs with direct access to the machine. The returned
/// value is pushed through the normal frame-restore path.
///
/// Modules must be re-entrant across interpreter instances but are never
/// called concurrently on one instance.
pub trait NativeModule {
    /// Does this module provide the given native id?
    fn has_id(&self, id: u8) -> bool;

    /// Number of parameters the function takes.
    fn num_params(&self, id: u8) -> u8;

    /// Run the function. Arguments are frame-relative slots 0..n.
    fn call(&mut self, machine: &mut Machine<'_>, id: u8) -> i32;
}
