//! The symbol model: variables, functions, structs, defs and commands.
//!
//! Globals and constants live in a flat module-wide table; locals are
//! attached to their function with parameters first. Cross references use
//! table indices, never pointers.

use clover_core::{Type, CONST_START, GLOBAL_START, LOCAL_START};

/// Where a symbol's storage lives.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Storage {
    Const,
    Global,
    Local,
}

/// A named variable or constant.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    /// Zero-based offset within the storage area.
    pub addr: u8,
    pub ty: Type,
    pub ptr: bool,
    pub storage: Storage,
    /// Allocation size in words (element count times element size).
    pub size: u8,
}

impl Symbol {
    /// The 8-bit id that addresses this symbol in an opcode.
    pub fn id(&self) -> u8 {
        match self.storage {
            Storage::Const => CONST_START | self.addr,
            Storage::Global => GLOBAL_START | self.addr,
            Storage::Local => LOCAL_START | self.addr,
        }
    }
}

/// A function: user-defined with a code address, or native with an id.
#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    /// Code offset for user functions, native id for natives.
    pub addr: u16,
    pub ty: Type,
    /// Parameters first, then locals, in declaration order.
    pub locals: Vec<Symbol>,
    /// Number of parameters.
    pub args: u8,
    pub native: bool,
    /// Next free local offset in words (monotonic; pruning a block does
    /// not reuse slots).
    next_addr: u16,
}

impl FunctionDef {
    pub fn new(name: String, addr: u16, ty: Type) -> Self {
        Self {
            name,
            addr,
            ty,
            locals: Vec::new(),
            args: 0,
            native: false,
            next_addr: 0,
        }
    }

    pub fn native(name: &str, id: u8, ty: Type, params: &[(String, Type)]) -> Self {
        let mut f = Self {
            name: name.to_string(),
            addr: u16::from(id),
            ty,
            locals: Vec::new(),
            args: params.len() as u8,
            native: true,
            next_addr: 0,
        };
        for (i, (pname, pty)) in params.iter().enumerate() {
            f.locals.push(Symbol {
                name: pname.clone(),
                addr: i as u8,
                ty: *pty,
                ptr: false,
                storage: Storage::Local,
                size: 1,
            });
            f.next_addr += 1;
        }
        f
    }

    pub fn native_id(&self) -> u8 {
        self.addr as u8
    }

    fn has_local(&self, name: &str) -> bool {
        self.locals.iter().any(|s| s.name == name)
    }

    /// Add a formal parameter (one word each). False on a duplicate name.
    pub fn add_arg(&mut self, name: String, ty: Type, ptr: bool) -> bool {
        if self.has_local(&name) {
            return false;
        }
        self.locals.push(Symbol {
            name,
            addr: self.next_addr as u8,
            ty,
            ptr,
            storage: Storage::Local,
            size: 1,
        });
        self.next_addr += 1;
        self.args += 1;
        true
    }

    /// Add a local variable of `size` words. False on a duplicate name.
    pub fn add_local(&mut self, name: String, ty: Type, ptr: bool, size: u8) -> bool {
        if self.has_local(&name) {
            return false;
        }
        self.locals.push(Symbol {
            name,
            addr: self.next_addr as u8,
            ty,
            ptr,
            storage: Storage::Local,
            size,
        });
        self.next_addr += u16::from(size);
        true
    }

    pub fn find_local(&self, name: &str) -> Option<&Symbol> {
        self.locals.iter().find(|s| s.name == name)
    }

    pub fn num_locals(&self) -> usize {
        self.locals.len()
    }

    /// Drop name bindings added after `keep`, leaving allocation intact.
    pub fn prune_locals(&mut self, keep: usize) {
        self.locals.truncate(keep.max(self.args as usize));
    }

    /// Words of non-parameter locals; this is the `SetFrame` locals byte.
    pub fn local_words(&self) -> u16 {
        self.next_addr - u16::from(self.args)
    }

    /// Total local allocation in words, for the stack high-water mark.
    pub fn frame_words(&self) -> u16 {
        self.next_addr
    }
}

/// A struct definition: up to 15 one-word members.
#[derive(Clone, Debug, Default)]
pub struct StructDef {
    pub name: String,
    pub entries: Vec<(String, Type)>,
}

impl StructDef {
    pub fn new(name: String) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    /// False when the member limit is exceeded.
    pub fn add_entry(&mut self, name: String, ty: Type) -> bool {
        if self.entries.len() >= 15 {
            return false;
        }
        self.entries.push((name, ty));
        true
    }

    pub fn size(&self) -> u8 {
        self.entries.len() as u8
    }

    pub fn find_entry(&self, name: &str) -> Option<(u8, Type)> {
        self.entries
            .iter()
            .position(|(n, _)| n == name)
            .map(|i| (i as u8, self.entries[i].1))
    }
}

/// A compile-time named integer constant in 0..=255.
#[derive(Clone, Debug)]
pub struct Def {
    pub name: String,
    pub value: u8,
}

/// A command-table entry under construction.
#[derive(Clone, Debug)]
pub struct CommandDef {
    pub name: String,
    pub count: u8,
    pub init_addr: u16,
    pub loop_addr: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_ids_by_storage() {
        let sym = |storage, addr| Symbol {
            name: "s".into(),
            addr,
            ty: Type::Int,
            ptr: false,
            storage,
            size: 1,
        };
        assert_eq!(sym(Storage::Const, 5).id(), 0x05);
        assert_eq!(sym(Storage::Global, 5).id(), 0x85);
        assert_eq!(sym(Storage::Local, 5).id(), 0xc5);
    }

    #[test]
    fn function_locals_follow_params() {
        let mut f = FunctionDef::new("f".into(), 0, Type::Int);
        assert!(f.add_arg("a".into(), Type::Int, false));
        assert!(f.add_arg("b".into(), Type::Float, false));
        assert!(f.add_local("x".into(), Type::Int, false, 4));
        assert!(f.add_local("y".into(), Type::Int, false, 1));

        assert_eq!(f.args, 2);
        assert_eq!(f.find_local("a").unwrap().addr, 0);
        assert_eq!(f.find_local("x").unwrap().addr, 2);
        assert_eq!(f.find_local("y").unwrap().addr, 6);
        assert_eq!(f.local_words(), 5);
        assert_eq!(f.frame_words(), 7);
    }

    #[test]
    fn duplicate_locals_rejected() {
        let mut f = FunctionDef::new("f".into(), 0, Type::None);
        assert!(f.add_local("x".into(), Type::Int, false, 1));
        assert!(!f.add_local("x".into(), Type::Int, false, 1));
        assert!(!f.add_arg("x".into(), Type::Int, false));
    }

    #[test]
    fn prune_keeps_allocation() {
        let mut f = FunctionDef::new("f".into(), 0, Type::None);
        f.add_local("x".into(), Type::Int, false, 1);
        let before = f.num_locals();
        f.add_local("y".into(), Type::Int, false, 1);
        f.prune_locals(before);
        assert!(f.find_local("y").is_none());
        assert_eq!(f.local_words(), 2);
    }

    #[test]
    fn struct_member_lookup() {
        let mut s = StructDef::new("P".into());
        assert!(s.add_entry("x".into(), Type::Int));
        assert!(s.add_entry("y".into(), Type::Float));
        assert_eq!(s.size(), 2);
        assert_eq!(s.find_entry("y"), Some((1, Type::Float)));
        assert_eq!(s.find_entry("z"), None);
    }

    #[test]
    fn struct_member_limit() {
        let mut s = StructDef::new("Big".into());
        for i in 0..15 {
            assert!(s.add_entry(format!("m{i}"), Type::Int));
        }
        assert!(!s.add_entry("one_too_many".into(), Type::Int));
    }

    #[test]
    fn native_function_shape() {
        let f = FunctionDef::native(
            "Min",
            0x0a,
            Type::Int,
            &[("a".into(), Type::Int), ("b".into(), Type::Int)],
        );
        assert!(f.native);
        assert_eq!(f.native_id(), 0x0a);
        assert_eq!(f.args, 2);
    }
}
