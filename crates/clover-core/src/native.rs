//! The Core native-function catalogue.
//!
//! Native ids are part of the binary contract: the compiler resolves names
//! to ids and the VM resolves ids back to behavior. Both read this table.

use crate::types::Type;

/// Ids of the Core module's native functions.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum CoreNative {
    Animate = 0x00,
    Param = 0x01,
    Float = 0x02,
    Int = 0x03,
    RandomInt = 0x07,
    RandomFloat = 0x08,
    InitArray = 0x09,
    MinInt = 0x0a,
    MinFloat = 0x0b,
    MaxInt = 0x0c,
    MaxFloat = 0x0d,
}

impl CoreNative {
    /// Decode a native id belonging to the Core module.
    pub fn from_id(id: u8) -> Option<CoreNative> {
        Some(match id {
            0x00 => CoreNative::Animate,
            0x01 => CoreNative::Param,
            0x02 => CoreNative::Float,
            0x03 => CoreNative::Int,
            0x07 => CoreNative::RandomInt,
            0x08 => CoreNative::RandomFloat,
            0x09 => CoreNative::InitArray,
            0x0a => CoreNative::MinInt,
            0x0b => CoreNative::MinFloat,
            0x0c => CoreNative::MaxInt,
            0x0d => CoreNative::MaxFloat,
            _ => return None,
        })
    }
}

/// Signature of a native function, as the compiler needs it.
#[derive(Copy, Clone, Debug)]
pub struct NativeSig {
    pub name: &'static str,
    pub id: u8,
    pub ret: Type,
    pub params: &'static [(&'static str, Type)],
}

/// Signatures of the Core module's functions, in id order.
pub const CORE_NATIVES: &[NativeSig] = &[
    NativeSig {
        name: "Animate",
        id: CoreNative::Animate as u8,
        ret: Type::Int,
        params: &[("p", Type::Ptr)],
    },
    NativeSig {
        name: "Param",
        id: CoreNative::Param as u8,
        ret: Type::Int,
        params: &[("p", Type::Int)],
    },
    NativeSig {
        name: "Float",
        id: CoreNative::Float as u8,
        ret: Type::Float,
        params: &[("v", Type::Int)],
    },
    NativeSig {
        name: "Int",
        id: CoreNative::Int as u8,
        ret: Type::Int,
        params: &[("v", Type::Float)],
    },
    NativeSig {
        name: "RandomInt",
        id: CoreNative::RandomInt as u8,
        ret: Type::Int,
        params: &[("min", Type::Int), ("max", Type::Int)],
    },
    NativeSig {
        name: "RandomFloat",
        id: CoreNative::RandomFloat as u8,
        ret: Type::Float,
        params: &[("min", Type::Float), ("max", Type::Float)],
    },
    NativeSig {
        name: "InitArray",
        id: CoreNative::InitArray as u8,
        ret: Type::None,
        params: &[("dst", Type::Ptr), ("v", Type::Int), ("n", Type::Int)],
    },
    NativeSig {
        name: "MinInt",
        id: CoreNative::MinInt as u8,
        ret: Type::Int,
        params: &[("a", Type::Int), ("b", Type::Int)],
    },
    NativeSig {
        name: "MinFloat",
        id: CoreNative::MinFloat as u8,
        ret: Type::Float,
        params: &[("a", Type::Float), ("b", Type::Float)],
    },
    NativeSig {
        name: "MaxInt",
        id: CoreNative::MaxInt as u8,
        ret: Type::Int,
        params: &[("a", Type::Int), ("b", Type::Int)],
    },
    NativeSig {
        name: "MaxFloat",
        id: CoreNative::MaxFloat as u8,
        ret: Type::Float,
        params: &[("a", Type::Float), ("b", Type::Float)],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_matches_ids() {
        for sig in CORE_NATIVES {
            assert_eq!(CoreNative::from_id(sig.id).map(|n| n as u8), Some(sig.id));
        }
    }

    #[test]
    fn unknown_ids_rejected() {
        assert_eq!(CoreNative::from_id(0x04), None);
        assert_eq!(CoreNative::from_id(0x0e), None);
        assert_eq!(CoreNative::from_id(0xff), None);
    }

    #[test]
    fn param_counts() {
        let by_name = |n: &str| CORE_NATIVES.iter().find(|s| s.name == n).unwrap();
        assert_eq!(by_name("Animate").params.len(), 1);
        assert_eq!(by_name("RandomFloat").params.len(), 2);
        assert_eq!(by_name("InitArray").params.len(), 3);
    }
}
