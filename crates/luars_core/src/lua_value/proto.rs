use crate::gc::{ProtoId, StringId};
use crate::lua_value::LuaValue;

/// Upvalue descriptor of a prototype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    /// Debug name
    pub name: Option<StringId>,
    /// Captures a register of the enclosing function (true) or one of
    /// its upvalues (false)
    pub in_stack: bool,
    /// Register or upvalue index in the enclosing function
    pub idx: u8,
}

/// Local variable debug record, active over `[start_pc, end_pc)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocVar {
    pub varname: Option<StringId>,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// Function prototype: shared, immutable once built
#[derive(Debug, Default)]
pub struct Proto {
    pub code: Vec<u32>,
    pub constants: Vec<LuaValue>,
    /// Prototypes of nested functions
    pub protos: Vec<ProtoId>,
    pub upvalues: Vec<UpvalueDesc>,
    /// Source line per instruction (debug)
    pub lineinfo: Vec<i32>,
    pub locvars: Vec<LocVar>,
    pub source: Option<StringId>,
    pub linedefined: i32,
    pub lastlinedefined: i32,
    pub numparams: u8,
    pub is_vararg: bool,
    /// Number of registers needed
    pub maxstacksize: u8,
}

impl Proto {
    /// Name of the `local_number`-th local active at `pc` (1-based).
    ///
    /// Locals are sorted by `start_pc`, so the scan stops at the first one
    /// that starts after `pc`.
    pub fn get_local_name(&self, local_number: usize, pc: u32) -> Option<StringId> {
        if local_number == 0 {
            return None;
        }
        let mut n = local_number;
        for var in self.locvars.iter().take_while(|v| v.start_pc <= pc) {
            if pc < var.end_pc {
                n -= 1;
                if n == 0 {
                    return var.varname;
                }
            }
        }
        None
    }

    /// Approximate bytes charged for a prototype with these arrays
    pub fn byte_size(&self) -> usize {
        std::mem::size_of::<Proto>()
            + self.code.len() * std::mem::size_of::<u32>()
            + self.constants.len() * std::mem::size_of::<LuaValue>()
            + self.protos.len() * std::mem::size_of::<ProtoId>()
            + self.upvalues.len() * std::mem::size_of::<UpvalueDesc>()
            + self.lineinfo.len() * std::mem::size_of::<i32>()
            + self.locvars.len() * std::mem::size_of::<LocVar>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(id: u32, start_pc: u32, end_pc: u32) -> LocVar {
        LocVar {
            varname: Some(StringId(id)),
            start_pc,
            end_pc,
        }
    }

    #[test]
    fn test_local_name_counts_only_active() {
        let p = Proto {
            locvars: vec![var(1, 0, 3), var(2, 1, 20), var(3, 4, 20), var(4, 30, 40)],
            ..Default::default()
        };
        // at pc 5 local 1 is dead; active are 2 and 3
        assert_eq!(p.get_local_name(1, 5), Some(StringId(2)));
        assert_eq!(p.get_local_name(2, 5), Some(StringId(3)));
        assert_eq!(p.get_local_name(3, 5), None);
        assert_eq!(p.get_local_name(1, 0), Some(StringId(1)));
    }

    #[test]
    fn test_local_name_zero_index() {
        let p = Proto {
            locvars: vec![var(1, 0, 10)],
            ..Default::default()
        };
        assert_eq!(p.get_local_name(0, 5), None);
    }
}
