//! Executable image serializer.

use clover_core::{
    COMMAND_NAME_LEN, MAGIC, MAX_CODE_SIZE, MAX_CONSTS, MAX_STACK_SIZE, STACK_OVERHEAD,
};

use crate::error::CompileError;
use crate::symbols::CommandDef;

/// Serialize header, constant pool, command table and code into the final
/// executable bytes.
pub(crate) fn emit_image(
    pool: &[u32],
    global_size: u16,
    local_high_water: u16,
    commands: &[CommandDef],
    code: &[u8],
) -> Result<Vec<u8>, CompileError> {
    // The stack gets the local high-water mark plus headroom for operands
    // and frame bookkeeping.
    let stack_size = local_high_water + STACK_OVERHEAD;
    if stack_size > MAX_STACK_SIZE {
        return Err(CompileError::StackTooBig);
    }
    if pool.len() > MAX_CONSTS {
        return Err(CompileError::TooManyConstants);
    }
    if code.len() > MAX_CODE_SIZE {
        return Err(CompileError::ExecutableTooBig);
    }

    let mut out = MAGIC.to_vec();
    out.extend((pool.len() as u16).to_le_bytes());
    out.extend(global_size.to_le_bytes());
    out.extend(stack_size.to_le_bytes());

    for word in pool {
        out.extend(word.to_le_bytes());
    }

    for cmd in commands {
        let mut name = [0u8; COMMAND_NAME_LEN];
        for (dst, &src) in name
            .iter_mut()
            .zip(cmd.name.as_bytes().iter().take(COMMAND_NAME_LEN))
        {
            *dst = src;
        }
        out.extend_from_slice(&name);
        out.push(cmd.count);
        out.extend(cmd.init_addr.to_le_bytes());
        out.extend(cmd.loop_addr.to_le_bytes());
    }
    out.push(0);

    out.extend_from_slice(code);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clover_core::CONST_OFFSET;

    #[test]
    fn layout_round_trip() {
        let commands = [CommandDef {
            name: "blink".to_string(),
            count: 2,
            init_addr: 0,
            loop_addr: 4,
        }];
        let image = emit_image(&[7, 0x0102_0304], 3, 10, &commands, &[0xc0, 0x00, 0x0b]).unwrap();

        assert_eq!(&image[0..4], b"arly");
        assert_eq!(u16::from_le_bytes([image[4], image[5]]), 2); // pool words
        assert_eq!(u16::from_le_bytes([image[6], image[7]]), 3); // globals
        assert_eq!(u16::from_le_bytes([image[8], image[9]]), 10 + 64); // stack

        let pool_at = CONST_OFFSET as usize;
        assert_eq!(
            u32::from_le_bytes(image[pool_at..pool_at + 4].try_into().unwrap()),
            7
        );

        let cmd_at = pool_at + 8;
        assert_eq!(&image[cmd_at..cmd_at + 7], b"blink\0\0");
        assert_eq!(image[cmd_at + 7], 2);
        // Terminator then code.
        assert_eq!(image[cmd_at + 12], 0);
        assert_eq!(&image[cmd_at + 13..], &[0xc0, 0x00, 0x0b]);
    }

    #[test]
    fn stack_high_water_limit() {
        let err = emit_image(&[], 0, 65, &[], &[]).unwrap_err();
        assert_eq!(err, CompileError::StackTooBig);
        assert!(emit_image(&[], 0, 64, &[], &[]).is_ok());
    }

    #[test]
    fn oversized_code_rejected() {
        let code = vec![0u8; 0x1000];
        assert_eq!(
            emit_image(&[], 0, 0, &[], &code).unwrap_err(),
            CompileError::ExecutableTooBig
        );
    }
}
