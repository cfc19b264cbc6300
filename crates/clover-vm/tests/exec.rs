//! Dispatch-loop tests against hand-assembled images.

use std::cell::RefCell;

use clover_vm::{Host, Interpreter, VmError};

struct RamHost {
    image: Vec<u8>,
    logs: RefCell<Vec<String>>,
}

impl RamHost {
    fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            logs: RefCell::new(Vec::new()),
        }
    }
}

impl Host for RamHost {
    fn rom(&self, addr: u16) -> u8 {
        self.image.get(addr as usize).copied().unwrap_or(0)
    }
    fn log(&self, msg: &str) {
        self.logs.borrow_mut().push(msg.to_string());
    }
}

/// Assemble an image: header, pool, command table, code.
fn image(
    consts: &[u32],
    global_size: u16,
    stack_size: u16,
    commands: &[(&str, u8, u16, u16)],
    code: &[u8],
) -> Vec<u8> {
    let mut v = b"arly".to_vec();
    v.extend((consts.len() as u16).to_le_bytes());
    v.extend(global_size.to_le_bytes());
    v.extend(stack_size.to_le_bytes());
    for c in consts {
        v.extend(c.to_le_bytes());
    }
    for &(name, count, init, loop_) in commands {
        let mut entry = [0u8; 7];
        entry[..name.len()].copy_from_slice(name.as_bytes());
        v.extend_from_slice(&entry);
        v.push(count);
        v.extend(init.to_le_bytes());
        v.extend(loop_.to_le_bytes());
    }
    v.push(0);
    v.extend_from_slice(code);
    v
}

/// `function init() {}` / `function int loop() { return 100; }`
fn minimal_image() -> Vec<u8> {
    let code = [
        0xc0, 0x00, // SetFrame 0 0
        0xa0, // PushIntConstS 0
        0x0b, // Return
        0xc0, 0x00, // SetFrame 0 0
        0x01, 100, // PushIntConst 100
        0x0b, // Return
    ];
    image(&[], 0, 32, &[("hello", 0, 0, 4)], &code)
}

#[test]
fn minimal_command_runs() {
    let host = RamHost::new(minimal_image());
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("hello", &[]));
    assert_eq!(interp.error(), None);
    assert_eq!(interp.run_loop(), 100);
}

#[test]
fn stack_depth_restored_after_init() {
    let host = RamHost::new(minimal_image());
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("hello", &[]));
    assert_eq!(interp.stack_depth(), 0);
}

#[test]
fn command_not_found() {
    let host = RamHost::new(minimal_image());
    let mut interp = Interpreter::new(&host);
    assert!(!interp.init("nope", &[]));
    assert_eq!(interp.error(), Some(VmError::CmdNotFound));
}

#[test]
fn wrong_number_of_args() {
    let host = RamHost::new(minimal_image());
    let mut interp = Interpreter::new(&host);
    assert!(!interp.init("hello", &[1]));
    assert_eq!(interp.error(), Some(VmError::WrongNumberOfArgs));
}

#[test]
fn missing_set_frame_rejected() {
    let code = [
        0xa0, // PushIntConstS 0 - not SetFrame
        0x0b, // Return
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("x", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(!interp.init("x", &[]));
    assert_eq!(interp.error(), Some(VmError::ExpectedSetFrame));
}

#[test]
fn int_arithmetic() {
    // return 2 + 3 * 4
    let code = [
        0xc0, 0x00, // SetFrame 0 0
        0xa2, // PushIntConstS 2
        0xa3, // PushIntConstS 3
        0xa4, // PushIntConstS 4
        0x27, // MulInt
        0x23, // AddInt
        0x0b, // Return
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[]));
    assert_eq!(interp.run_loop(), 14);
}

#[test]
fn division_by_zero_does_not_trap() {
    let code = [
        0xc0, 0x00, // SetFrame 0 0
        0xa7, // PushIntConstS 7
        0xa0, // PushIntConstS 0
        0x29, // DivInt
        0x0b, // Return
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[]));
    interp.run_loop();
    assert_eq!(interp.error(), None);
}

#[test]
fn user_function_call() {
    // f(x) = x + 1; loop() = f(5)
    let code = [
        0xc1, 0x00, // SetFrame 1 0      (f at offset 0)
        0x50, 0xc0, // Push local 0
        0xa1, // PushIntConstS 1
        0x23, // AddInt
        0x0b, // Return
        0xc0, 0x00, // SetFrame 0 0      (loop at offset 7)
        0xa5, // PushIntConstS 5
        0x70, 0x00, // Call 0
        0x0b, // Return
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 7, 7)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[]));
    assert_eq!(interp.run_loop(), 6);
}

#[test]
fn backward_jump_loop_counts_to_ten() {
    // int i = 0; while (i < 10) { ++i; } return i;
    let code = [
        0xc0, 0x01, // 0: SetFrame 0 1
        0xa0, // 2: PushIntConstS 0
        0x60, 0xc0, // 3: Pop local 0
        0x50, 0xc0, // 5: Push local 0
        0xaa, // 7: PushIntConstS 10
        0x17, // 8: LTInt
        0xe0, 0x06, // 9: If +6 -> 17
        0x40, 0xc0, // 11: PushRef local 0
        0x2d, // 13: PreIncInt
        0x05, // 14: Drop
        0xdf, 0xf4, // 15: Jump -12 -> 5
        0x50, 0xc0, // 17: Push local 0
        0x0b, // 19: Return
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[]));
    assert_eq!(interp.run_loop(), 10);
    assert_eq!(interp.error(), None);
}

#[test]
fn set_frame_without_args_fails() {
    let code = [
        0xc5, 0x00, // SetFrame 5 0 but no args were pushed
        0x0b,
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(!interp.init("f", &[]));
    assert_eq!(interp.error(), Some(VmError::NotEnoughArgs));
}

#[test]
fn call_native_unknown_id_fails() {
    let code = [
        0xc0, 0x00, // SetFrame 0 0 (init)
        0xa0, // PushIntConstS 0
        0x0b, // Return
        0xc0, 0x00, // SetFrame 0 0 (loop at 4)
        0x0a, 0x55, // CallNative 0x55
        0x0b,
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 0, 4)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[]));
    assert_eq!(interp.run_loop(), -1);
    assert_eq!(interp.error(), Some(VmError::InvalidNativeFunction));
    assert!(interp.error_addr() >= 0);
}

#[test]
fn core_min_int_returns_smaller() {
    let code = [
        0xc0, 0x00, // SetFrame 0 0
        0xa3, // PushIntConstS 3
        0xa7, // PushIntConstS 7
        0x0a, 0x0a, // CallNative MinInt
        0x0b,
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[]));
    assert_eq!(interp.run_loop(), 3);
}

#[test]
fn core_param_reads_command_parameters() {
    let code = [
        0xc0, 0x00, // SetFrame 0 0
        0xa1, // PushIntConstS 1
        0x0a, 0x01, // CallNative Param
        0x0b,
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 2, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[10, 77]));
    assert_eq!(interp.run_loop(), 77);
}

#[test]
fn constant_pool_load() {
    let code = [
        0xc0, 0x00, // SetFrame 0 0
        0x50, 0x01, // Push const 1
        0x0b,
    ];
    let host = RamHost::new(image(&[111, 42424], 0, 32, &[("f", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[]));
    assert_eq!(interp.run_loop(), 42424);
}

#[test]
fn globals_persist_between_init_and_loop() {
    // init: global0 = 9; loop: return global0
    let code = [
        0xc0, 0x00, // SetFrame 0 0
        0xa9, // PushIntConstS 9
        0x60, 0x80, // Pop global 0
        0xa0, // PushIntConstS 0
        0x0b, // Return
        0xc0, 0x00, // SetFrame 0 0 (loop at 7)
        0x50, 0x80, // Push global 0
        0x0b,
    ];
    let host = RamHost::new(image(&[], 1, 32, &[("f", 0, 0, 7)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[]));
    assert_eq!(interp.run_loop(), 9);
}

#[test]
fn push_ref_bakes_local_and_derefs() {
    // local0 = 5 via ref; return *(&local0)
    let code = [
        0xc0, 0x01, // SetFrame 0 1
        0x40, 0xc0, // PushRef local 0
        0xa5, // PushIntConstS 5
        0x03, // PopDeref
        0x40, 0xc0, // PushRef local 0
        0x02, // PushDeref
        0x0b,
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[]));
    assert_eq!(interp.run_loop(), 5);
}

#[test]
fn log_writes_to_host() {
    let code = [
        0xc0, 0x00, // SetFrame 0 0
        0xa7, // PushIntConstS 7
        0xb1, 0x04, b'v', b'=', b'%', b'i', // Log 1 arg, "v=%i"
        0xa0, // PushIntConstS 0
        0x0b,
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(interp.init("f", &[]));
    interp.run_loop();
    assert_eq!(host.logs.borrow().as_slice(), ["v=7"]);
}

#[test]
fn stack_underrun_reports_error_addr() {
    let code = [
        0xc0, 0x00, // SetFrame 0 0
        0x05, // Drop
        0x05, // Drop
        0x05, // Drop: underruns past the frame bookkeeping
        0x05, 0x05, 0x0b,
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(!interp.init("f", &[]));
    assert_eq!(interp.error(), Some(VmError::StackUnderrun));
}

#[test]
fn invalid_opcode_stops_execution() {
    let code = [
        0xc0, 0x00, // SetFrame 0 0
        0x3f, // not an opcode
        0x0b,
    ];
    let host = RamHost::new(image(&[], 0, 32, &[("f", 0, 0, 0)], &code));
    let mut interp = Interpreter::new(&host);
    assert!(!interp.init("f", &[]));
    assert_eq!(interp.error(), Some(VmError::InvalidOp));
}
