// CallInfo - one node of a coroutine's call chain (lstate.h)
//
// Nodes live in a per-thread arena and are linked by index. A node is
// reused by the next call at the same depth, so the chain only grows when
// the call stack reaches a new maximum depth.

use crate::lua_vm::{KFunction, LUA_MULTRET};

/// Call status flags (CIST_*)
pub mod call_status {
    /// Original value of 'allowhook'
    pub const CIST_OAH: u16 = 1 << 0;
    /// Call is running a Lua function
    pub const CIST_LUA: u16 = 1 << 1;
    /// Call is running a debug hook
    pub const CIST_HOOKED: u16 = 1 << 2;
    /// Call is running on a fresh invocation of the interpreter loop
    pub const CIST_FRESH: u16 = 1 << 3;
    /// Call is a yieldable protected call
    pub const CIST_YPCALL: u16 = 1 << 4;
    /// Call was tail called
    pub const CIST_TAIL: u16 = 1 << 5;
    /// Last hook called yielded
    pub const CIST_HOOKYIELD: u16 = 1 << 6;
    /// Using __lt for __le
    pub const CIST_LEQ: u16 = 1 << 7;
    /// Call is running a finalizer
    pub const CIST_FIN: u16 = 1 << 8;
}

/// Function-kind specific part of a call frame
#[derive(Debug, Clone, Copy)]
pub enum Frame {
    Lua {
        /// Base register of the function
        base: usize,
        /// Resume point in the function's code
        saved_pc: u32,
    },
    C {
        /// Continuation in case of yields
        k: Option<KFunction>,
        old_errfunc: usize,
        /// Context passed to the continuation
        ctx: isize,
    },
}

#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Stack index of the called function
    pub func: usize,
    /// Top for this function
    pub top: usize,
    pub previous: Option<usize>,
    pub next: Option<usize>,
    pub frame: Frame,
    /// Saved offset, used by yields and hooks
    pub extra: usize,
    /// Expected number of results from this function
    pub nresults: i16,
    pub call_status: u16,
}

impl CallInfo {
    /// Base node of a coroutine: a C frame with no function
    pub fn new_base(top: usize) -> Self {
        Self {
            func: 0,
            top,
            previous: None,
            next: None,
            frame: Frame::C {
                k: None,
                old_errfunc: 0,
                ctx: 0,
            },
            extra: 0,
            nresults: LUA_MULTRET,
            call_status: 0,
        }
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        self.call_status & call_status::CIST_LUA != 0
    }

    #[inline(always)]
    pub fn is_tail(&self) -> bool {
        self.call_status & call_status::CIST_TAIL != 0
    }

    #[inline(always)]
    pub fn set_tail(&mut self) {
        self.call_status |= call_status::CIST_TAIL;
    }

    /// Base register; C frames start right after their function slot
    #[inline]
    pub fn base(&self) -> usize {
        match self.frame {
            Frame::Lua { base, .. } => base,
            Frame::C { .. } => self.func + 1,
        }
    }

    #[inline]
    pub fn saved_pc(&self) -> Option<u32> {
        match self.frame {
            Frame::Lua { saved_pc, .. } => Some(saved_pc),
            Frame::C { .. } => None,
        }
    }

    #[inline]
    pub fn set_saved_pc(&mut self, pc: u32) {
        if let Frame::Lua { saved_pc, .. } = &mut self.frame {
            *saved_pc = pc;
        }
    }
}
