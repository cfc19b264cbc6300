//! Executable image layout and capacity limits.
//!
//! ```text
//!   off  contents
//!   0    'a' 'r' 'l' 'y'        magic
//!   4    u16 LE                 constant pool size in 4-byte words
//!   6    u16 LE                 global size in 4-byte words
//!   8    u16 LE                 stack size in 4-byte words
//!   10   u32 LE x pool size     constant pool
//!   ...  command entries, 12 bytes each:
//!          7 bytes  command name, zero padded
//!          1 byte   param byte count
//!          2 bytes  init entry offset, LE, relative to the code base
//!          2 bytes  loop entry offset, LE, relative to the code base
//!        terminated by a single 0x00 byte in the name position
//!   ...  code bytes to end of image
//! ```
//!
//! The code base is the byte after the command-table terminator; all code
//! addresses (including `Call` targets) are relative to it.

/// Image signature.
pub const MAGIC: [u8; 4] = *b"arly";

/// Byte offset of the constant pool.
pub const CONST_OFFSET: u16 = 10;

/// Size of one command-table entry in bytes.
pub const COMMAND_ENTRY_SIZE: usize = 12;

/// Significant bytes of a command name.
pub const COMMAND_NAME_LEN: usize = 7;

/// Constant-pool capacity in words; ids 0x00..=0x7f.
pub const MAX_CONSTS: usize = 128;

/// Global memory capacity in words; ids 0x80..=0xbf.
pub const MAX_GLOBALS: usize = 64;

/// Per-frame local capacity in words; ids 0xc0..=0xff.
pub const MAX_LOCALS: usize = 64;

/// Operand-stack capacity in slots.
pub const MAX_STACK_SIZE: u16 = 128;

/// Slots reserved above the local-variable high-water mark.
pub const STACK_OVERHEAD: u16 = 64;

/// Command parameter buffer size in bytes.
pub const PARAMS_SIZE: usize = 16;

/// Largest code segment a `Call` target can reach (12-bit address).
pub const MAX_CODE_SIZE: usize = 0x0fff;
