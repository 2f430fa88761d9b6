// LuaState - per-coroutine execution state
//
// Owns the value stack, the call-info chain and the list of upvalues
// still open on this stack. Everything shared between coroutines lives
// in LuaVM.

use crate::gc::UpvalueId;
use crate::lua_value::LuaValue;
use crate::lua_vm::call_info::{CallInfo, Frame};
use crate::lua_vm::lua_limits::{BASIC_STACK_SIZE, EXTRA_STACK, LUA_MINSTACK};
use crate::lua_vm::{LuaError, LuaResult};

/// Coroutine status codes (lua.h)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadStatus {
    #[default]
    Ok = 0,
    Yield = 1,
    ErrRun = 2,
    ErrSyntax = 3,
    ErrMem = 4,
    ErrGcMm = 5,
    ErrErr = 6,
}

/// Entry of the open-upvalue list: the aliased stack slot and the upvalue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenUpval {
    pub level: usize,
    pub id: UpvalueId,
}

pub struct LuaState {
    stack: Vec<LuaValue>,
    /// First free slot
    pub top: usize,
    ci_list: Vec<CallInfo>,
    /// Index of the running call
    ci: usize,
    /// Upvalues open on this stack, sorted by descending level
    open_upval: Vec<OpenUpval>,
    pub status: ThreadStatus,
    /// Number of non-yieldable calls in the stack
    pub nny: u16,
    /// Number of nested C calls
    pub n_ccalls: u16,
    /// Stack index of the current error handling function (0 = none)
    pub errfunc: usize,
    pub allowhook: bool,
    pub hookmask: u8,
    /// Set while this is the coroutine being run
    pub(crate) is_current: bool,
    max_stack_size: usize,
    max_ci: usize,
}

impl LuaState {
    /// Fresh coroutine with a basic stack and the base call-info
    /// (stack_init)
    pub fn new(max_stack_size: usize, max_ci: usize) -> Self {
        let size = BASIC_STACK_SIZE + EXTRA_STACK;
        Self {
            stack: vec![LuaValue::Nil; size],
            top: 1,
            ci_list: vec![CallInfo::new_base(1 + LUA_MINSTACK)],
            ci: 0,
            open_upval: Vec::new(),
            status: ThreadStatus::Ok,
            nny: 1,
            n_ccalls: 0,
            errfunc: 0,
            allowhook: true,
            hookmask: 0,
            is_current: false,
            max_stack_size,
            max_ci,
        }
    }

    // ============ Stack ============

    #[inline(always)]
    pub fn stack(&self) -> &[LuaValue] {
        &self.stack
    }

    #[inline(always)]
    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Slots past the allocated stack read as nil
    #[inline(always)]
    pub fn stack_get(&self, index: usize) -> LuaValue {
        self.stack.get(index).copied().unwrap_or_default()
    }

    #[inline(always)]
    pub(crate) fn stack_set(&mut self, index: usize, value: LuaValue) {
        self.stack[index] = value;
    }

    pub(crate) fn push(&mut self, value: LuaValue) -> LuaResult<()> {
        self.check_stack(1)?;
        self.stack[self.top] = value;
        self.top += 1;
        Ok(())
    }

    /// Ensure `n` free slots above top (luaD_checkstack)
    pub fn check_stack(&mut self, n: usize) -> LuaResult<()> {
        if self.stack.len() - self.top <= n + EXTRA_STACK {
            self.grow_stack(n)
        } else {
            Ok(())
        }
    }

    /// Grow to at least `top + n` usable slots (luaD_growstack)
    pub fn grow_stack(&mut self, n: usize) -> LuaResult<()> {
        let size = self.stack.len();
        let needed = self.top + n + EXTRA_STACK;
        if size > self.max_stack_size || needed > self.max_stack_size + EXTRA_STACK {
            return Err(LuaError::StackOverflow);
        }
        let new_size = (2 * size).max(needed).min(self.max_stack_size + EXTRA_STACK);
        self.stack.resize(new_size, LuaValue::Nil);
        Ok(())
    }

    /// Slots in use by active frames
    pub fn stack_in_use(&self) -> usize {
        let mut lim = self.top;
        let mut ci = Some(self.ci);
        while let Some(i) = ci {
            lim = lim.max(self.ci_list[i].top);
            ci = self.ci_list[i].previous;
        }
        lim + 1
    }

    /// Give back stack and call-info space no longer needed
    /// (luaD_shrinkstack)
    pub fn shrink_stack(&mut self) {
        let in_use = self.stack_in_use();
        let good_size = in_use + in_use / 8 + 2 * EXTRA_STACK;
        if self.stack.len() <= self.max_stack_size {
            self.shrink_ci();
        }
        if in_use <= self.max_stack_size && good_size < self.stack.len() {
            self.stack.truncate(good_size.max(BASIC_STACK_SIZE + EXTRA_STACK));
            self.stack.shrink_to_fit();
        }
    }

    // ============ Call infos ============

    #[inline(always)]
    pub fn ci(&self) -> &CallInfo {
        &self.ci_list[self.ci]
    }

    #[inline(always)]
    pub fn ci_mut(&mut self) -> &mut CallInfo {
        &mut self.ci_list[self.ci]
    }

    #[inline(always)]
    pub fn ci_index(&self) -> usize {
        self.ci
    }

    #[inline(always)]
    pub fn call_info(&self, idx: usize) -> &CallInfo {
        &self.ci_list[idx]
    }

    /// Call-info nodes allocated beyond the base one
    #[inline(always)]
    pub fn nci(&self) -> usize {
        self.ci_list.len() - 1
    }

    /// Move to the next call-info node, reusing a free one when the chain
    /// already has it (next_ci / luaE_extendCI)
    pub fn extend_ci(&mut self) -> LuaResult<usize> {
        if let Some(next) = self.ci_list[self.ci].next {
            self.ci = next;
            return Ok(next);
        }
        if self.nci() >= self.max_ci {
            return Err(LuaError::StackOverflow);
        }
        let idx = self.ci_list.len();
        let mut node = CallInfo::new_base(0);
        node.previous = Some(self.ci);
        self.ci_list.push(node);
        self.ci_list[self.ci].next = Some(idx);
        self.ci = idx;
        Ok(idx)
    }

    /// Enter a new call frame
    pub fn push_ci(
        &mut self,
        func: usize,
        top: usize,
        nresults: i16,
        frame: Frame,
        call_status: u16,
    ) -> LuaResult<usize> {
        let idx = self.extend_ci()?;
        let ci = &mut self.ci_list[idx];
        ci.func = func;
        ci.top = top;
        ci.frame = frame;
        ci.extra = 0;
        ci.nresults = nresults;
        ci.call_status = call_status;
        Ok(idx)
    }

    /// Return to the caller's frame; the node stays for reuse
    pub fn pop_ci(&mut self) {
        if let Some(prev) = self.ci_list[self.ci].previous {
            self.ci = prev;
        }
    }

    /// Free every node after the current one (luaE_freeCI)
    pub fn free_ci(&mut self) {
        self.ci_list.truncate(self.ci + 1);
        self.ci_list[self.ci].next = None;
    }

    /// Free half of the unused nodes (luaE_shrinkCI)
    pub fn shrink_ci(&mut self) {
        let unused = self.ci_list.len() - (self.ci + 1);
        let keep = unused - unused / 2;
        self.ci_list.truncate(self.ci + 1 + keep);
        if let Some(last) = self.ci_list.last_mut() {
            last.next = None;
        }
    }

    // ============ Open upvalues ============

    pub fn open_upvalues(&self) -> &[OpenUpval] {
        &self.open_upval
    }

    pub fn has_open_upvalues(&self) -> bool {
        !self.open_upval.is_empty()
    }

    /// Look for the open upvalue aliasing `level`. On a miss, returns the
    /// position that keeps the list in descending order.
    pub fn search_open_upval(&self, level: usize) -> Result<UpvalueId, usize> {
        for (pos, uv) in self.open_upval.iter().enumerate() {
            if uv.level < level {
                return Err(pos);
            }
            if uv.level == level {
                return Ok(uv.id);
            }
        }
        Err(self.open_upval.len())
    }

    pub(crate) fn insert_open_upval(&mut self, pos: usize, level: usize, id: UpvalueId) {
        debug_assert!(pos == 0 || self.open_upval[pos - 1].level > level);
        debug_assert!(pos == self.open_upval.len() || self.open_upval[pos].level < level);
        self.open_upval.insert(pos, OpenUpval { level, id });
    }

    /// Detach every open upvalue at or above `level`, deepest first
    pub(crate) fn take_open_upvals_from(&mut self, level: usize) -> Vec<OpenUpval> {
        let count = self
            .open_upval
            .iter()
            .take_while(|uv| uv.level >= level)
            .count();
        self.open_upval.drain(..count).collect()
    }

    /// Detach one open upvalue wherever it sits in the list
    pub(crate) fn remove_open_upval(&mut self, id: UpvalueId) {
        self.open_upval.retain(|uv| uv.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_stack_keeps_extra_slack() {
        let mut l = LuaState::new(1000, 10);
        l.top = l.stack_size() - EXTRA_STACK - 1;
        l.check_stack(1).unwrap();
        assert!(l.stack_size() - l.top > 1 + EXTRA_STACK);
    }
}
