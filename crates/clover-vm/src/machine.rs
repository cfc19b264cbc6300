//! Interpreter state shared with native modules.
//!
//! The [`Machine`] owns everything a native function may touch: the operand
//! stack, global memory, the parameter buffer, and the ROM/log host
//! callbacks. The dispatch loop lives in [`crate::interp`]; splitting the
//! two lets modules receive `&mut Machine` while the interpreter keeps its
//! module list separate.

use clover_core::{float_to_int, int_to_float, Address, CONST_OFFSET, PARAMS_SIZE};

use crate::error::VmError;
use crate::stack::Stack;

/// Host callbacks the VM consumes.
///
/// `rom` reads a byte of the executable image; `log` writes one diagnostic
/// line produced by the `Log` instruction.
pub trait Host {
    fn rom(&self, addr: u16) -> u8;
    fn log(&self, msg: &str);
}

/// VM state: registers, memories and the host connection.
pub struct Machine<'h> {
    host: &'h dyn Host,
    params: [u8; PARAMS_SIZE],
    params_len: u8,
    globals: Vec<u32>,
    pub(crate) stack: Stack,
    pub(crate) pc: i32,
    pub(crate) code_offset: u16,
    error: Option<VmError>,
    error_addr: i16,
    rng: u32,
}

impl<'h> Machine<'h> {
    pub(crate) fn new(host: &'h dyn Host) -> Self {
        Self {
            host,
            params: [0; PARAMS_SIZE],
            params_len: 0,
            globals: Vec::new(),
            stack: Stack::default(),
            pc: 0,
            code_offset: 0,
            error: None,
            error_addr: -1,
            rng: 0x2545_f491,
        }
    }

    pub(crate) fn reset(&mut self, params: &[u8], global_size: u16, stack_size: u16) {
        let n = params.len().min(PARAMS_SIZE);
        self.params[..n].copy_from_slice(&params[..n]);
        self.params_len = n as u8;
        self.globals = vec![0; global_size as usize];
        self.stack.alloc(stack_size);
        self.error = None;
        self.error_addr = -1;
    }

    /// Record an error; the first one recorded wins.
    pub fn set_error(&mut self, e: VmError) {
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    pub(crate) fn error(&self) -> Option<VmError> {
        self.error
    }

    pub(crate) fn set_error_addr(&mut self, addr: i16) {
        self.error_addr = addr;
    }

    pub(crate) fn error_addr(&self) -> i16 {
        self.error_addr
    }

    // ROM access, little endian.

    pub(crate) fn read_rom8(&self, addr: u16) -> u8 {
        self.host.rom(addr)
    }

    pub(crate) fn read_rom16(&self, addr: u16) -> u16 {
        u16::from(self.read_rom8(addr)) | (u16::from(self.read_rom8(addr.wrapping_add(1))) << 8)
    }

    /// Fetch the next code byte and advance the PC.
    pub(crate) fn fetch8(&mut self) -> u8 {
        let b = self.read_rom8(self.pc as u16);
        self.pc += 1;
        b
    }

    // Typed loads and stores through the address model.

    pub(crate) fn load_int(&mut self, addr: Address, index: u8) -> u32 {
        match addr {
            Address::Const(off) => {
                let a = CONST_OFFSET.wrapping_add((off as u16 + index as u16) * 4);
                u32::from(self.read_rom8(a))
                    | (u32::from(self.read_rom8(a.wrapping_add(1))) << 8)
                    | (u32::from(self.read_rom8(a.wrapping_add(2))) << 16)
                    | (u32::from(self.read_rom8(a.wrapping_add(3))) << 24)
            }
            Address::Global(off) => {
                let i = off as usize + index as usize;
                match self.globals.get(i) {
                    Some(&v) => v,
                    None => {
                        self.set_error(VmError::AddressOutOfRange);
                        0
                    }
                }
            }
            Address::LocalRel(off) => self.stack.local(off as u16 + index as u16),
            Address::LocalAbs(off) => self.stack.absolute(off as u16 + index as u16),
        }
    }

    pub(crate) fn store_int(&mut self, addr: Address, index: u8, v: u32) {
        match addr {
            // Constants are read-only; a store through a const address is
            // silently dropped, matching the reference runtime.
            Address::Const(_) => {}
            Address::Global(off) => {
                let i = off as usize + index as usize;
                match self.globals.get_mut(i) {
                    Some(slot) => *slot = v,
                    None => self.set_error(VmError::AddressOutOfRange),
                }
            }
            Address::LocalRel(off) => self.stack.set_local(off as u16 + index as u16, v),
            Address::LocalAbs(off) => self.stack.set_absolute(off as u16 + index as u16, v),
        }
    }

    pub(crate) fn load_float(&mut self, addr: Address, index: u8) -> f32 {
        int_to_float(self.load_int(addr, index))
    }

    pub(crate) fn store_float(&mut self, addr: Address, index: u8, v: f32) {
        self.store_int(addr, index, float_to_int(v));
    }

    // Services used by native modules.

    /// Read a frame-relative stack slot (native argument access).
    pub fn stack_local(&mut self, offset: u16) -> u32 {
        self.stack.local(offset)
    }

    /// Push a value onto the operand stack.
    pub fn stack_push(&mut self, v: u32) {
        self.stack.push(v);
    }

    /// Byte `i` of the command's parameter buffer, or 0 if out of range.
    pub fn param(&self, i: u32) -> u8 {
        if i >= self.params_len as u32 {
            0
        } else {
            self.params[i as usize]
        }
    }

    /// Advance an `{cur, inc, min, max}` float quadruple at `var` (a baked
    /// address). Returns 1 when the value just clamped at `max` and
    /// reversed, -1 at `min`, else 0.
    pub fn animate(&mut self, var: u32) -> i32 {
        let addr = match Address::from_var(var) {
            Some(a) => a,
            None => {
                self.set_error(VmError::AddressOutOfRange);
                return 0;
            }
        };
        let mut cur = self.load_float(addr, 0);
        let inc = self.load_float(addr, 1);
        let min = self.load_float(addr, 2);
        let max = self.load_float(addr, 3);

        cur += inc;
        self.store_float(addr, 0, cur);

        if inc > 0.0 {
            if cur >= max {
                self.store_float(addr, 0, max);
                self.store_float(addr, 1, -inc);
                return 1;
            }
        } else if cur <= min {
            self.store_float(addr, 0, min);
            self.store_float(addr, 1, -inc);
            return -1;
        }
        0
    }

    /// Fill `count` slots starting at the baked address `var` with `value`.
    /// Only global and local addresses are writable.
    pub fn init_array(&mut self, var: u32, value: u32, count: u32) {
        let addr = match Address::from_var(var) {
            Some(a @ (Address::Global(_) | Address::LocalRel(_) | Address::LocalAbs(_))) => a,
            _ => {
                self.set_error(VmError::OnlyMemAddressesAllowed);
                return;
            }
        };
        for i in 0..count {
            if i > u32::from(u8::MAX) {
                self.set_error(VmError::AddressOutOfRange);
                return;
            }
            self.store_int(addr, i as u8, value);
            if self.error.is_some() {
                return;
            }
        }
    }

    /// Seed the pseudo-random generator.
    pub fn set_seed(&mut self, seed: u32) {
        self.rng = if seed == 0 { 1 } else { seed };
    }

    fn next_random(&mut self) -> u32 {
        // xorshift32
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }

    /// Uniform pseudo-random integer in `[min, max)`; returns `max` when
    /// the range is empty.
    pub fn random_int(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return max;
        }
        let range = (max as i64) - (min as i64);
        let r = (self.next_random() as i64) % range;
        (r + min as i64) as i32
    }

    /// Uniform pseudo-random float; scales by 1000 through the integer
    /// path, so the effective range is about +/-2,000,000.
    pub fn random_float(&mut self, min: f32, max: f32) -> f32 {
        self.random_int((min * 1000.0) as i32, (max * 1000.0) as i32) as f32 / 1000.0
    }

    /// Render a `Log` format string and hand it to the host. Recognizes
    /// `%i`, `%f` and `%%`; an unknown directive stops the rendering. The
    /// argument slots are popped in every case.
    pub(crate) fn log_formatted(&mut self, fmt: &[u8], num_args: u8) {
        let mut out = String::new();
        let mut arg = num_args as usize;
        let mut i = 0;
        while i < fmt.len() {
            let c = fmt[i];
            i += 1;
            if c != b'%' {
                out.push(c as char);
                continue;
            }
            if i >= fmt.len() {
                break;
            }
            let d = fmt[i];
            i += 1;
            match d {
                b'%' => out.push('%'),
                b'i' => {
                    if arg == 0 {
                        break;
                    }
                    let v = self.stack.top(arg - 1) as i32;
                    arg -= 1;
                    out.push_str(&v.to_string());
                }
                b'f' => {
                    if arg == 0 {
                        break;
                    }
                    let v = int_to_float(self.stack.top(arg - 1));
                    arg -= 1;
                    out.push_str(&v.to_string());
                }
                _ => break,
            }
        }
        self.stack.drop_n(num_args as usize);
        self.host.log(&out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct TestHost {
        rom: Vec<u8>,
        logs: RefCell<Vec<String>>,
    }

    impl Host for TestHost {
        fn rom(&self, addr: u16) -> u8 {
            self.rom.get(addr as usize).copied().unwrap_or(0)
        }
        fn log(&self, msg: &str) {
            self.logs.borrow_mut().push(msg.to_string());
        }
    }

    fn host_with_consts(consts: &[u32]) -> TestHost {
        let mut rom = vec![0u8; CONST_OFFSET as usize];
        for c in consts {
            rom.extend_from_slice(&c.to_le_bytes());
        }
        TestHost {
            rom,
            logs: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn const_loads_are_little_endian() {
        let host = host_with_consts(&[0x1234_5678, float_to_int(2.5)]);
        let mut m = Machine::new(&host);
        m.reset(&[], 0, 16);
        assert_eq!(m.load_int(Address::Const(0), 0), 0x1234_5678);
        assert_eq!(m.load_float(Address::Const(0), 1), 2.5);
    }

    #[test]
    fn const_stores_are_dropped() {
        let host = host_with_consts(&[7]);
        let mut m = Machine::new(&host);
        m.reset(&[], 0, 16);
        m.store_int(Address::Const(0), 0, 99);
        assert_eq!(m.load_int(Address::Const(0), 0), 7);
        assert_eq!(m.error(), None);
    }

    #[test]
    fn global_bounds_checked() {
        let host = host_with_consts(&[]);
        let mut m = Machine::new(&host);
        m.reset(&[], 2, 16);
        m.store_int(Address::Global(0), 0, 5);
        assert_eq!(m.load_int(Address::Global(0), 0), 5);
        m.load_int(Address::Global(2), 0);
        assert_eq!(m.error(), Some(VmError::AddressOutOfRange));
    }

    #[test]
    fn params_out_of_range_read_zero() {
        let host = host_with_consts(&[]);
        let mut m = Machine::new(&host);
        m.reset(&[9, 8], 0, 16);
        assert_eq!(m.param(0), 9);
        assert_eq!(m.param(1), 8);
        assert_eq!(m.param(2), 0);
        assert_eq!(m.param(1000), 0);
    }

    #[test]
    fn init_array_fills_globals() {
        let host = host_with_consts(&[]);
        let mut m = Machine::new(&host);
        m.reset(&[], 4, 16);
        m.init_array(Address::Global(0).to_var(), 9, 4);
        for i in 0..4 {
            assert_eq!(m.load_int(Address::Global(i), 0), 9);
        }
    }

    #[test]
    fn init_array_rejects_const_address() {
        let host = host_with_consts(&[1]);
        let mut m = Machine::new(&host);
        m.reset(&[], 0, 16);
        m.init_array(Address::Const(0).to_var(), 9, 1);
        assert_eq!(m.error(), Some(VmError::OnlyMemAddressesAllowed));
    }

    #[test]
    fn animate_reverses_at_max() {
        let host = host_with_consts(&[]);
        let mut m = Machine::new(&host);
        m.reset(&[], 4, 16);
        // {cur, inc, min, max} = {0.9, 0.2, 0.0, 1.0}
        m.store_float(Address::Global(0), 0, 0.9);
        m.store_float(Address::Global(0), 1, 0.2);
        m.store_float(Address::Global(0), 2, 0.0);
        m.store_float(Address::Global(0), 3, 1.0);

        assert_eq!(m.animate(Address::Global(0).to_var()), 1);
        assert_eq!(m.load_float(Address::Global(0), 0), 1.0);
        assert_eq!(m.load_float(Address::Global(0), 1), -0.2);
    }

    #[test]
    fn animate_reverses_at_min() {
        let host = host_with_consts(&[]);
        let mut m = Machine::new(&host);
        m.reset(&[], 4, 16);
        m.store_float(Address::Global(0), 0, 0.1);
        m.store_float(Address::Global(0), 1, -0.2);
        m.store_float(Address::Global(0), 2, 0.0);
        m.store_float(Address::Global(0), 3, 1.0);

        assert_eq!(m.animate(Address::Global(0).to_var()), -1);
        assert_eq!(m.load_float(Address::Global(0), 0), 0.0);
        assert_eq!(m.load_float(Address::Global(0), 1), 0.2);
    }

    #[test]
    fn random_int_stays_in_range() {
        let host = host_with_consts(&[]);
        let mut m = Machine::new(&host);
        m.reset(&[], 0, 16);
        m.set_seed(12345);
        for _ in 0..1000 {
            let v = m.random_int(-5, 5);
            assert!((-5..5).contains(&v));
        }
        // Empty range returns max.
        assert_eq!(m.random_int(3, 3), 3);
    }

    #[test]
    fn log_formats_int_and_float_args() {
        let host = host_with_consts(&[]);
        let mut m = Machine::new(&host);
        m.reset(&[], 0, 16);
        m.stack.push(42);
        m.stack.push(float_to_int(1.5));
        m.log_formatted(b"i=%i f=%f 100%%", 2);
        assert_eq!(host.logs.borrow().as_slice(), ["i=42 f=1.5 100%"]);
        assert_eq!(m.stack.depth(), 0);
    }

    #[test]
    fn log_pops_args_on_bad_directive() {
        let host = host_with_consts(&[]);
        let mut m = Machine::new(&host);
        m.reset(&[], 0, 16);
        m.stack.push(1);
        m.log_formatted(b"%q", 1);
        assert_eq!(m.stack.depth(), 0);
    }
}
