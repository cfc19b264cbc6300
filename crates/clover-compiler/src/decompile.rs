//! Decompiler: recovers an assembly-level listing from an executable.
//!
//! The listing walks the same layout the VM loads: header, constant pool,
//! command table, then one line per instruction. When the compiler's
//! per-line annotations are supplied, each source line is printed ahead of
//! the first instruction emitted for it.

use std::fmt::Write as _;

use thiserror::Error;

use clover_core::{Op, OpParams, CONST_OFFSET, EXT_OPCODE_START, MAGIC};

use crate::scanner::Annotation;

/// Failures while walking an image.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
pub enum DecompileError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid opcode")]
    InvalidOp,
    #[error("premature end of image")]
    PrematureEOF,
}

/// Produce a listing for `image`. `annotations` may be empty.
pub fn decompile(image: &[u8], annotations: &[Annotation]) -> Result<String, DecompileError> {
    Decompiler {
        image,
        pos: 0,
        out: String::new(),
        annotations,
        annotation_index: 0,
        code_offset: 0,
    }
    .run()
}

struct Decompiler<'a> {
    image: &'a [u8],
    pos: usize,
    out: String,
    annotations: &'a [Annotation],
    annotation_index: usize,
    code_offset: usize,
}

impl<'a> Decompiler<'a> {
    fn get_u8(&mut self) -> Result<u8, DecompileError> {
        let b = self
            .image
            .get(self.pos)
            .copied()
            .ok_or(DecompileError::PrematureEOF)?;
        self.pos += 1;
        Ok(b)
    }

    fn get_u16(&mut self) -> Result<u16, DecompileError> {
        let lo = self.get_u8()?;
        let hi = self.get_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn get_u32(&mut self) -> Result<u32, DecompileError> {
        let mut bytes = [0u8; 4];
        for b in &mut bytes {
            *b = self.get_u8()?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    fn run(mut self) -> Result<String, DecompileError> {
        let mut magic = [0u8; 4];
        for b in &mut magic {
            *b = self.get_u8()?;
        }
        if magic != MAGIC {
            return Err(DecompileError::InvalidSignature);
        }

        let const_words = self.get_u16()?;
        let global_size = self.get_u16()?;
        let stack_size = self.get_u16()?;
        let _ = writeln!(
            self.out,
            "globals {global_size} stack {stack_size}\nconstants"
        );

        debug_assert_eq!(self.pos, CONST_OFFSET as usize);
        for i in 0..const_words {
            let w = self.get_u32()?;
            let _ = writeln!(self.out, "    [{i}] = 0x{w:08x}");
        }

        self.out.push_str("commands\n");
        let mut entries = Vec::new();
        loop {
            let first = self.get_u8()?;
            if first == 0 {
                break;
            }
            let mut name = vec![first];
            for _ in 0..6 {
                name.push(self.get_u8()?);
            }
            let count = self.get_u8()?;
            let init = self.get_u16()?;
            let loop_ = self.get_u16()?;
            entries.push((name, count, init, loop_));
        }
        for (name, count, init, loop_) in &entries {
            let name: String = name
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| b as char)
                .collect();
            let _ = writeln!(
                self.out,
                "    {name} params {count} init [{init}] loop [{loop_}]"
            );
        }

        self.code_offset = self.pos;
        self.out.push_str("code\n");
        while self.pos < self.image.len() {
            self.statement()?;
        }
        Ok(self.out)
    }

    /// Print source lines recorded at or before `addr`.
    fn flush_annotations(&mut self, addr: i32) {
        while self.annotation_index < self.annotations.len() {
            let a = &self.annotations[self.annotation_index];
            if a.first_offset != -1 && a.first_offset > addr {
                break;
            }
            let _ = writeln!(self.out, "//    {}", a.text.trim_end());
            self.annotation_index += 1;
        }
    }

    fn statement(&mut self) -> Result<(), DecompileError> {
        let addr = (self.pos - self.code_offset) as i32;
        self.flush_annotations(addr);

        let byte = self.get_u8()?;
        let index = if byte >= EXT_OPCODE_START {
            byte & 0x0f
        } else {
            0
        };
        let op = Op::from_byte(byte).ok_or(DecompileError::InvalidOp)?;

        let _ = write!(self.out, "[{addr}] {}", op.mnemonic());
        match op.params() {
            OpParams::None => {}
            OpParams::Id => {
                let id = self.get_u8()?;
                let _ = write!(self.out, " [{id}]");
            }
            OpParams::I => {
                let v = self.get_u8()? & 0x0f;
                let _ = write!(self.out, " {v}");
            }
            OpParams::Index => {
                let _ = write!(self.out, " {index}");
            }
            OpParams::Const => {
                let v = self.get_u8()?;
                let _ = write!(self.out, " {v}");
            }
            OpParams::AbsTarg => {
                let targ = (u16::from(index) << 8) | u16::from(self.get_u8()?);
                let _ = write!(self.out, " [{targ}]");
            }
            OpParams::RelTarg => {
                let raw = (u16::from(index) << 8) | u16::from(self.get_u8()?);
                let offset = if raw & 0x800 != 0 {
                    i32::from(raw) - 0x1000
                } else {
                    i32::from(raw)
                };
                let target = (self.pos - self.code_offset) as i32 + offset;
                let _ = write!(self.out, " {offset} -> [{target}]");
            }
            OpParams::PL => {
                let locals = self.get_u8()?;
                let _ = write!(self.out, " {index} {locals}");
            }
            OpParams::IdxLenS => {
                let len = self.get_u8()?;
                let _ = write!(self.out, " {index} \"");
                for _ in 0..len {
                    let c = self.get_u8()?;
                    if c == b'\n' {
                        self.out.push_str("\\n");
                    } else if c >= 0x20 && c < 0x7f {
                        self.out.push(c as char);
                    } else {
                        let _ = write!(self.out, "\\x{c:02x}");
                    }
                }
                self.out.push('"');
            }
        }
        self.out.push('\n');
        Ok(())
    }
}
