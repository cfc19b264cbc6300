//! Expression-stack entries and bake actions.
//!
//! While parsing an expression the compiler keeps a small stack of entries
//! describing what has been recognized but not yet materialized as
//! bytecode. Baking an entry turns it into typed code; the action chosen
//! depends on the syntactic position (right-hand value, assignment target,
//! reference, pointer, array index, struct member).

use clover_core::Type;

/// One entry on the compile-time expression stack.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprEntry {
    /// An identifier not yet resolved.
    Id(String),
    /// An integer literal.
    Int(i32),
    /// A float literal.
    Float(f32),
    /// A reference on the runtime stack; `ptr` marks pointer variables,
    /// whose address is itself the value.
    Ref { ty: Type, ptr: bool },
    /// A function name recognized at a call site, kept while the argument
    /// list is compiled.
    Function(String),
    /// A resolved struct-member index awaiting an `Offset` bake.
    Dot(u8),
    /// A value already on the runtime stack.
    Value(Type),
}

/// What to do with the top entries during baking.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ExprAction {
    /// Materialize the top entry as a value on the runtime stack.
    Right,
    /// Consume a reference plus the value above it and store through it.
    Left,
    /// Ensure the top entry is a reference.
    Ref,
    /// Like `Ref`, then duplicate and dereference for a read-modify-write
    /// assignment.
    LeftRef,
    /// Turn the reference into a pointer value (`&`).
    Ptr,
    /// Index the reference below the just-baked index value.
    Index,
    /// Resolve a member of the struct reference below the top entry.
    Offset,
}
