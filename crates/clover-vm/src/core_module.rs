//! The Core native module, always installed first.

use clover_core::{float_to_int, int_to_float, CoreNative};

use crate::machine::Machine;
use crate::native::NativeModule;

/// Built-in natives: Animate, Param, numeric conversions, random numbers,
/// InitArray and the Min/Max reductions.
pub struct CoreModule;

impl NativeModule for CoreModule {
    fn has_id(&self, id: u8) -> bool {
        CoreNative::from_id(id).is_some()
    }

    fn num_params(&self, id: u8) -> u8 {
        clover_core::CORE_NATIVES
            .iter()
            .find(|sig| sig.id == id)
            .map(|sig| sig.params.len() as u8)
            .unwrap_or(0)
    }

    fn call(&mut self, m: &mut Machine<'_>, id: u8) -> i32 {
        let Some(native) = CoreNative::from_id(id) else {
            return 0;
        };
        match native {
            CoreNative::Animate => {
                let var = m.stack_local(0);
                m.animate(var)
            }
            CoreNative::Param => {
                let i = m.stack_local(0);
                m.param(i) as i32
            }
            CoreNative::Float => {
                let v = m.stack_local(0) as i32;
                float_to_int(v as f32) as i32
            }
            CoreNative::Int => {
                let v = int_to_float(m.stack_local(0));
                v as i32
            }
            CoreNative::RandomInt => {
                let min = m.stack_local(0) as i32;
                let max = m.stack_local(1) as i32;
                m.random_int(min, max)
            }
            CoreNative::RandomFloat => {
                let min = int_to_float(m.stack_local(0));
                let max = int_to_float(m.stack_local(1));
                float_to_int(m.random_float(min, max)) as i32
            }
            CoreNative::InitArray => {
                let dst = m.stack_local(0);
                let v = m.stack_local(1);
                let n = m.stack_local(2);
                m.init_array(dst, v, n);
                0
            }
            CoreNative::MinInt => {
                let a = m.stack_local(0) as i32;
                let b = m.stack_local(1) as i32;
                a.min(b)
            }
            CoreNative::MinFloat => {
                let a = int_to_float(m.stack_local(0));
                let b = int_to_float(m.stack_local(1));
                float_to_int(a.min(b)) as i32
            }
            CoreNative::MaxInt => {
                let a = m.stack_local(0) as i32;
                let b = m.stack_local(1) as i32;
                a.max(b)
            }
            CoreNative::MaxFloat => {
                let a = int_to_float(m.stack_local(0));
                let b = int_to_float(m.stack_local(1));
                float_to_int(a.max(b)) as i32
            }
        }
    }
}
