// Closures and upvalues
//
// A Lua closure holds counted references to upvalue objects; a C closure
// owns its captured values inline. An upvalue is open while it aliases a
// live stack slot of some coroutine and closed once it owns the value.

use crate::gc::{ProtoId, ThreadId, UpvalueId};
use crate::lua_value::LuaValue;
use crate::lua_vm::CFunction;

/// Interpreted closure: shared prototype plus upvalue references.
/// Slots start empty and are filled before the closure is published.
#[derive(Debug)]
pub struct LuaClosure {
    pub proto: ProtoId,
    pub upvals: Vec<Option<UpvalueId>>,
}

impl LuaClosure {
    #[inline(always)]
    pub fn nupvalues(&self) -> usize {
        self.upvals.len()
    }
}

/// Native closure: function pointer plus inline captured values
#[derive(Debug)]
pub struct CClosure {
    pub f: CFunction,
    pub upvalues: Vec<LuaValue>,
}

impl CClosure {
    pub fn new(f: CFunction, nupvalues: usize) -> Self {
        Self {
            f,
            upvalues: vec![LuaValue::Nil; nupvalues],
        }
    }

    #[inline(always)]
    pub fn nupvalues(&self) -> usize {
        self.upvalues.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalState {
    /// Aliases `stack[index]` of `thread`
    Open { thread: ThreadId, index: usize },
    /// Owns its value
    Closed(LuaValue),
}

#[derive(Debug)]
pub struct Upvalue {
    pub state: UpvalState,
    /// Number of closures holding this upvalue
    pub refcount: u32,
}

impl Upvalue {
    pub fn new_open(thread: ThreadId, index: usize) -> Self {
        Self {
            state: UpvalState::Open { thread, index },
            refcount: 0,
        }
    }

    pub fn new_closed(value: LuaValue) -> Self {
        Self {
            state: UpvalState::Closed(value),
            refcount: 0,
        }
    }

    #[inline(always)]
    pub fn is_open(&self) -> bool {
        matches!(self.state, UpvalState::Open { .. })
    }

    /// Stack slot aliased while open
    #[inline(always)]
    pub fn stack_index(&self) -> Option<usize> {
        match self.state {
            UpvalState::Open { index, .. } => Some(index),
            UpvalState::Closed(_) => None,
        }
    }

    /// Enter the closed state with `value`; never reopens
    #[inline]
    pub fn close(&mut self, value: LuaValue) {
        debug_assert!(self.is_open(), "upvalue closed twice");
        self.state = UpvalState::Closed(value);
    }
}
