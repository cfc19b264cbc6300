//! The interpreter: image loading, command lookup and the dispatch loop.

use clover_core::{float_to_int, int_to_float, Address, Op, CONST_OFFSET, EXT_OPCODE_START};

use crate::core_module::CoreModule;
use crate::error::VmError;
use crate::machine::{Host, Machine};
use crate::native::NativeModule;

/// A single-threaded, cooperative interpreter for one executable image.
///
/// `init` locates a command and runs its init routine; `run_loop` runs the
/// loop routine and returns its value (intended as a milliseconds delay for
/// the host scheduler). The Core native module is always installed first;
/// host modules follow in registration order.
pub struct Interpreter<'h> {
    machine: Machine<'h>,
    modules: Vec<Box<dyn NativeModule>>,
    num_params: u8,
    init_start: u16,
    loop_start: u16,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h dyn Host) -> Self {
        Self::with_modules(host, Vec::new())
    }

    pub fn with_modules(host: &'h dyn Host, extra: Vec<Box<dyn NativeModule>>) -> Self {
        let mut modules: Vec<Box<dyn NativeModule>> = vec![Box::new(CoreModule)];
        modules.extend(extra);
        Self {
            machine: Machine::new(host),
            modules,
            num_params: 0,
            init_start: 0,
            loop_start: 0,
        }
    }

    /// Locate `cmd` in the image, allocate memory per the header, verify
    /// the parameter count and run the command's init routine.
    pub fn init(&mut self, cmd: &str, params: &[u8]) -> bool {
        let const_words = self.machine.read_rom16(4);
        let global_size = self.machine.read_rom16(6);
        let stack_size = self.machine.read_rom16(8);
        self.machine.reset(params, global_size, stack_size);

        let mut offset = CONST_OFFSET.wrapping_add(const_words.wrapping_mul(4));
        let mut wanted = [0u8; 7];
        for (dst, &src) in wanted.iter_mut().zip(cmd.as_bytes().iter().take(7)) {
            *dst = src;
        }

        // Scan the whole table: the code base is the byte after it.
        let mut found = false;
        loop {
            if self.machine.read_rom8(offset) == 0 {
                offset = offset.wrapping_add(1);
                break;
            }
            let mut name = [0u8; 7];
            for (i, slot) in name.iter_mut().enumerate() {
                *slot = self.machine.read_rom8(offset.wrapping_add(i as u16));
            }
            if name == wanted {
                self.num_params = self.machine.read_rom8(offset.wrapping_add(7));
                self.init_start = self.machine.read_rom16(offset.wrapping_add(8));
                self.loop_start = self.machine.read_rom16(offset.wrapping_add(10));
                found = true;
            }
            offset = offset.wrapping_add(12);
        }
        self.machine.code_offset = offset;

        if !found {
            self.machine.set_error(VmError::CmdNotFound);
            return false;
        }

        self.init_start = self.init_start.wrapping_add(offset);
        self.loop_start = self.loop_start.wrapping_add(offset);

        if self.num_params as usize != params.len() {
            self.machine.set_error(VmError::WrongNumberOfArgs);
            return false;
        }

        if !self.next_op_is_set_frame(self.init_start) {
            self.machine.set_error(VmError::ExpectedSetFrame);
            return false;
        }

        // Sentinel return PC for the top-level return.
        self.machine.stack.push(u32::MAX);
        self.execute(self.init_start);
        if self.machine.error().is_none() {
            if let Some(e) = self.machine.stack.error() {
                self.machine.set_error(e);
            }
        }
        self.machine.error().is_none()
    }

    /// Run the loop routine once. Returns its integer result, or -1 with
    /// `error()` set.
    pub fn run_loop(&mut self) -> i32 {
        if !self.next_op_is_set_frame(self.loop_start) {
            self.machine.set_error(VmError::ExpectedSetFrame);
            return -1;
        }
        self.machine.stack.push(u32::MAX);
        self.execute(self.loop_start)
    }

    pub fn error(&self) -> Option<VmError> {
        self.machine.error().or(self.machine.stack.error())
    }

    /// PC of the failing opcode, or -1 if the error was not tied to one.
    pub fn error_addr(&self) -> i16 {
        self.machine.error_addr()
    }

    /// Seed the interpreter's pseudo-random generator.
    pub fn set_seed(&mut self, seed: u32) {
        self.machine.set_seed(seed);
    }

    /// Current operand-stack depth (diagnostics).
    pub fn stack_depth(&self) -> usize {
        self.machine.stack.depth()
    }

    fn next_op_is_set_frame(&self, addr: u16) -> bool {
        self.machine.read_rom8(addr) & 0xf0 == Op::SetFrame as u8
    }

    /// Read the operand byte of a 12-bit relative target and sign-extend.
    fn fetch_rel_targ(&mut self, index: u8) -> i32 {
        let lo = self.machine.fetch8();
        let t = (u16::from(index) << 8) | u16::from(lo);
        if t & 0x800 != 0 {
            i32::from(t) - 0x1000
        } else {
            i32::from(t)
        }
    }

    /// The fetch/decode/execute loop. Runs until a top-level return or the
    /// first error; every error terminates with `error_addr = pc - 1`.
    fn execute(&mut self, addr: u16) -> i32 {
        self.machine.pc = i32::from(addr);

        loop {
            if self.machine.error().is_none() {
                if let Some(e) = self.machine.stack.error() {
                    self.machine.set_error(e);
                }
            }
            if self.machine.error().is_some() {
                let addr = (self.machine.pc - 1) as i16;
                self.machine.set_error_addr(addr);
                return -1;
            }

            let byte = self.machine.fetch8();
            let index = if byte >= EXT_OPCODE_START {
                byte & 0x0f
            } else {
                0
            };
            let Some(op) = Op::from_byte(byte) else {
                self.machine.set_error(VmError::InvalidOp);
                continue;
            };

            match op {
                Op::None => self.machine.set_error(VmError::InvalidOp),

                Op::Push => {
                    let id = self.machine.fetch8();
                    let v = self.machine.load_int(Address::from_id(id), 0);
                    self.machine.stack.push(v);
                }
                Op::Pop => {
                    let id = self.machine.fetch8();
                    let v = self.machine.stack.pop();
                    self.machine.store_int(Address::from_id(id), 0, v);
                }
                Op::PushRef => {
                    // A frame-relative id is baked to an absolute stack
                    // position so the reference stays valid across frames.
                    let id = self.machine.fetch8();
                    let addr = match Address::from_id(id) {
                        Address::LocalRel(off) => {
                            Address::LocalAbs(self.machine.stack.local_to_abs(u16::from(off)))
                        }
                        other => other,
                    };
                    self.machine.stack.push(addr.to_var());
                }
                Op::PushIntConst => {
                    let v = self.machine.fetch8();
                    self.machine.stack.push(u32::from(v));
                }
                Op::PushIntConstS => {
                    self.machine.stack.push(u32::from(index));
                }
                Op::PushDeref => match self.machine.stack.pop_addr() {
                    Some(a) => {
                        let v = self.machine.load_int(a, 0);
                        self.machine.stack.push(v);
                    }
                    None => self.machine.set_error(VmError::AddressOutOfRange),
                },
                Op::PopDeref => {
                    let v = self.machine.stack.pop();
                    match self.machine.stack.pop_addr() {
                        Some(a) => self.machine.store_int(a, 0, v),
                        None => self.machine.set_error(VmError::AddressOutOfRange),
                    }
                }

                Op::Offset => {
                    let t = self.machine.stack.top(0);
                    self.machine.stack.set_top(t.wrapping_add(u32::from(index)));
                }
                Op::Index => {
                    let v = self.machine.stack.pop();
                    let t = self.machine.stack.top(0);
                    self.machine
                        .stack
                        .set_top(t.wrapping_add(v.wrapping_mul(u32::from(index))));
                }

                Op::Dup => {
                    let t = self.machine.stack.top(0);
                    self.machine.stack.push(t);
                }
                Op::Drop => {
                    self.machine.stack.pop();
                }
                Op::Swap => self.machine.stack.swap(),

                Op::If => {
                    let rel = self.fetch_rel_targ(index);
                    if self.machine.stack.pop() == 0 {
                        self.machine.pc += rel;
                    }
                }
                Op::Jump => {
                    let rel = self.fetch_rel_targ(index);
                    self.machine.pc += rel;
                }

                Op::Log => {
                    let len = self.machine.fetch8();
                    let mut fmt = Vec::with_capacity(len as usize);
                    for _ in 0..len {
                        fmt.push(self.machine.fetch8());
                    }
                    self.machine.log_formatted(&fmt, index);
                }

                Op::Call => {
                    let lo = self.machine.fetch8();
                    let targ = (u16::from(index) << 8) | u16::from(lo);
                    self.machine.stack.push(self.machine.pc as u32);
                    self.machine.pc = i32::from(targ.wrapping_add(self.machine.code_offset));
                    if !self.next_op_is_set_frame(self.machine.pc as u16) {
                        self.machine.set_error(VmError::ExpectedSetFrame);
                    }
                }
                Op::CallNative => {
                    let id = self.machine.fetch8();
                    let mut found = false;
                    for module in self.modules.iter_mut() {
                        if !module.has_id(id) {
                            continue;
                        }
                        found = true;
                        // Save the PC so the frame looks like a call.
                        self.machine.stack.push(self.machine.pc as u32);
                        if self
                            .machine
                            .stack
                            .set_frame(module.num_params(id), 0)
                            .is_ok()
                        {
                            let ret = module.call(&mut self.machine, id);
                            self.machine.pc = self.machine.stack.restore_frame(ret as u32);
                        }
                        break;
                    }
                    if !found {
                        self.machine.set_error(VmError::InvalidNativeFunction);
                    }
                }
                Op::Return => {
                    let ret = if self.machine.stack.is_empty() {
                        0
                    } else {
                        self.machine.stack.pop()
                    };
                    if self.machine.stack.is_empty() {
                        // Returning from the top level with nothing below.
                        return 0;
                    }
                    let pc = self.machine.stack.restore_frame(ret);
                    self.machine.pc = pc;
                    if pc < 0 {
                        // Sentinel: the value was re-pushed by the frame
                        // restore, discard it and hand it to the caller.
                        self.machine.stack.pop();
                        return ret as i32;
                    }
                }
                Op::SetFrame => {
                    let locals = self.machine.fetch8();
                    // Failures land in the stack's deferred error.
                    let _ = self.machine.stack.set_frame(index, locals);
                }

                Op::Or => {
                    let b = self.machine.stack.pop();
                    let t = self.machine.stack.top(0);
                    self.machine.stack.set_top(t | b);
                }
                Op::Xor => {
                    let b = self.machine.stack.pop();
                    let t = self.machine.stack.top(0);
                    self.machine.stack.set_top(t ^ b);
                }
                Op::And => {
                    let b = self.machine.stack.pop();
                    let t = self.machine.stack.top(0);
                    self.machine.stack.set_top(t & b);
                }
                Op::Not => {
                    let t = self.machine.stack.top(0);
                    self.machine.stack.set_top(!t);
                }
                Op::LNot => {
                    let t = self.machine.stack.top(0);
                    self.machine.stack.set_top(u32::from(t == 0));
                }
                Op::LOr => {
                    let b = self.machine.stack.pop() != 0;
                    let a = self.machine.stack.pop() != 0;
                    self.machine.stack.push(u32::from(a || b));
                }
                Op::LAnd => {
                    let b = self.machine.stack.pop() != 0;
                    let a = self.machine.stack.pop() != 0;
                    self.machine.stack.push(u32::from(a && b));
                }

                Op::LTInt => self.int_compare(|a, b| a < b),
                Op::LEInt => self.int_compare(|a, b| a <= b),
                Op::EQInt => self.int_compare(|a, b| a == b),
                Op::NEInt => self.int_compare(|a, b| a != b),
                Op::GEInt => self.int_compare(|a, b| a >= b),
                Op::GTInt => self.int_compare(|a, b| a > b),
                Op::LTFloat => self.float_compare(|a, b| a < b),
                Op::LEFloat => self.float_compare(|a, b| a <= b),
                Op::EQFloat => self.float_compare(|a, b| a == b),
                Op::NEFloat => self.float_compare(|a, b| a != b),
                Op::GEFloat => self.float_compare(|a, b| a >= b),
                Op::GTFloat => self.float_compare(|a, b| a > b),

                Op::AddInt => self.int_binop(i32::wrapping_add),
                Op::SubInt => self.int_binop(i32::wrapping_sub),
                Op::MulInt => self.int_binop(i32::wrapping_mul),
                Op::DivInt => self.int_binop(|a, b| if b == 0 { 0 } else { a.wrapping_div(b) }),
                Op::AddFloat => self.float_binop(|a, b| a + b),
                Op::SubFloat => self.float_binop(|a, b| a - b),
                Op::MulFloat => self.float_binop(|a, b| a * b),
                Op::DivFloat => self.float_binop(|a, b| a / b),

                Op::NegInt => {
                    let t = self.machine.stack.top(0) as i32;
                    self.machine.stack.set_top(t.wrapping_neg() as u32);
                }
                Op::NegFloat => {
                    let t = int_to_float(self.machine.stack.top(0));
                    self.machine.stack.set_top(float_to_int(-t));
                }

                Op::PreIncInt | Op::PreDecInt | Op::PostIncInt | Op::PostDecInt => {
                    let Some(a) = self.machine.stack.pop_addr() else {
                        self.machine.set_error(VmError::AddressOutOfRange);
                        continue;
                    };
                    let value = self.machine.load_int(a, 0) as i32;
                    let after = if matches!(op, Op::PreIncInt | Op::PostIncInt) {
                        value.wrapping_add(1)
                    } else {
                        value.wrapping_sub(1)
                    };
                    self.machine.store_int(a, 0, after as u32);
                    let result = if matches!(op, Op::PreIncInt | Op::PreDecInt) {
                        after
                    } else {
                        value
                    };
                    self.machine.stack.push(result as u32);
                }
                Op::PreIncFloat | Op::PreDecFloat | Op::PostIncFloat | Op::PostDecFloat => {
                    let Some(a) = self.machine.stack.pop_addr() else {
                        self.machine.set_error(VmError::AddressOutOfRange);
                        continue;
                    };
                    let value = self.machine.load_float(a, 0);
                    let after = if matches!(op, Op::PreIncFloat | Op::PostIncFloat) {
                        value + 1.0
                    } else {
                        value - 1.0
                    };
                    self.machine.store_float(a, 0, after);
                    let result = if matches!(op, Op::PreIncFloat | Op::PreDecFloat) {
                        after
                    } else {
                        value
                    };
                    self.machine.stack.push(float_to_int(result));
                }
            }
        }
    }

    fn int_binop(&mut self, f: impl Fn(i32, i32) -> i32) {
        let b = self.machine.stack.pop() as i32;
        let a = self.machine.stack.top(0) as i32;
        self.machine.stack.set_top(f(a, b) as u32);
    }

    fn float_binop(&mut self, f: impl Fn(f32, f32) -> f32) {
        let b = int_to_float(self.machine.stack.pop());
        let a = int_to_float(self.machine.stack.top(0));
        self.machine.stack.set_top(float_to_int(f(a, b)));
    }

    fn int_compare(&mut self, f: impl Fn(i32, i32) -> bool) {
        let b = self.machine.stack.pop() as i32;
        let a = self.machine.stack.top(0) as i32;
        self.machine.stack.set_top(u32::from(f(a, b)));
    }

    fn float_compare(&mut self, f: impl Fn(f32, f32) -> bool) {
        let b = int_to_float(self.machine.stack.pop());
        let a = int_to_float(self.machine.stack.top(0));
        self.machine.stack.set_top(u32::from(f(a, b)));
    }
}
