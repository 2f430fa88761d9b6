// Closure creation and upvalue management (lfunc.c)
//
// Upvalues are counted by the closures holding them. An open upvalue
// aliases a slot of its coroutine's stack; `close_upvals` turns it into
// an owning cell when the slot's scope ends, or frees it outright when
// no closure holds it.

use tracing::trace;

use crate::gc::{CClosureId, GcRef, LClosureId, ProtoId, ThreadId, UpvalueId};
use crate::lua_value::{LuaValue, UpvalState, Upvalue};
use crate::lua_vm::{CFunction, LuaResult, LuaVM};

impl LuaVM {
    /// Native closure with `n` captured values, all nil (luaF_newCclosure)
    pub fn new_c_closure(&mut self, f: CFunction, n: usize) -> LuaResult<CClosureId> {
        let r = self.object_allocator.create_c_closure(&mut self.gc, f, n);
        r.map_err(|e| self.alloc_error(e))
    }

    /// Interpreted closure with `n` empty upvalue slots (luaF_newLclosure)
    pub fn new_lua_closure(&mut self, proto: ProtoId, n: usize) -> LuaResult<LClosureId> {
        let r = self
            .object_allocator
            .create_lua_closure(&mut self.gc, proto, vec![None; n]);
        r.map_err(|e| self.alloc_error(e))
    }

    /// Fill every slot of a closure with a fresh closed nil upvalue
    /// (luaF_initupvals)
    pub fn init_upvals(&mut self, cl: LClosureId) -> LuaResult<()> {
        let n = self.gc.pool.lua_closure(cl).nupvalues();
        for i in 0..n {
            let uv = self
                .object_allocator
                .create_upvalue(&mut self.gc, UpvalState::Closed(LuaValue::Nil));
            let uv = uv.map_err(|e| self.alloc_error(e))?;
            self.gc.pool.upvalue_mut(uv).refcount = 1;
            self.gc.pool.lua_closure_mut(cl).upvals[i] = Some(uv);
        }
        Ok(())
    }

    /// Open upvalue aliasing `thread`'s stack slot `level`, shared with any
    /// closure that already captured it (luaF_findupval). A new upvalue
    /// starts with a zero count; the caller that stores it bumps it.
    pub fn find_upval(&mut self, thread: ThreadId, level: usize) -> LuaResult<UpvalueId> {
        let pos = match self.gc.pool.thread(thread).search_open_upval(level) {
            Ok(found) => return Ok(found),
            Err(pos) => pos,
        };
        let uv = self
            .object_allocator
            .create_upvalue(&mut self.gc, UpvalState::Open { thread, index: level });
        let uv = uv.map_err(|e| self.alloc_error(e))?;
        self.gc
            .pool
            .thread_mut(thread)
            .insert_open_upval(pos, level, uv);
        self.register_twups(thread);
        Ok(uv)
    }

    /// Close every open upvalue of `thread` at or above `level`, deepest
    /// first (luaF_close). Unreferenced ones are freed instead.
    pub fn close_upvals(&mut self, thread: ThreadId, level: usize) {
        let closing = self
            .gc
            .pool
            .thread_mut(thread)
            .take_open_upvals_from(level);
        if closing.is_empty() {
            return;
        }
        trace!(thread = thread.0, level, count = closing.len(), "closing upvalues");
        for open in closing {
            if self.gc.pool.upvalue(open.id).refcount == 0 {
                self.gc.free(open.id.gc_ref());
            } else {
                let value = self.gc.pool.thread(thread).stack_get(open.level);
                self.gc.pool.upvalue_mut(open.id).close(value);
                self.gc.upvalue_barrier(&value);
            }
        }
    }

    /// Instantiate `proto` as a closure running in `thread` with registers
    /// starting at `base` (OP_CLOSURE). In-stack descriptors capture the
    /// enclosing frame's registers; the others reuse the enclosing
    /// closure's upvalues. The closure is only created once every upvalue
    /// is resolved.
    pub fn push_closure(
        &mut self,
        thread: ThreadId,
        proto: ProtoId,
        base: usize,
        enclosing: Option<LClosureId>,
    ) -> LuaResult<LClosureId> {
        let descs = self.gc.pool.proto(proto).upvalues.clone();
        let mut upvals = Vec::with_capacity(descs.len());
        for desc in &descs {
            let uv = if desc.in_stack {
                self.find_upval(thread, base + desc.idx as usize)?
            } else {
                let Some(parent) = enclosing else {
                    return Err(self.error(format!(
                        "upvalue {} needs an enclosing closure",
                        desc.idx
                    )));
                };
                let inherited = self.gc.pool.lua_closure(parent).upvals.get(desc.idx as usize);
                match inherited.copied().flatten() {
                    Some(uv) => uv,
                    None => {
                        return Err(self.error(format!(
                            "enclosing closure has no upvalue {}",
                            desc.idx
                        )));
                    }
                }
            };
            upvals.push(Some(uv));
        }
        let cl = self
            .object_allocator
            .create_lua_closure(&mut self.gc, proto, upvals.clone());
        let cl = cl.map_err(|e| self.alloc_error(e))?;
        for uv in upvals.into_iter().flatten() {
            self.gc.pool.upvalue_mut(uv).refcount += 1;
        }
        Ok(cl)
    }

    pub fn upvalue(&self, id: UpvalueId) -> &Upvalue {
        self.gc.pool.upvalue(id)
    }

    /// Current value seen through an upvalue
    pub fn get_upvalue(&self, id: UpvalueId) -> LuaValue {
        match self.gc.pool.upvalue(id).state {
            UpvalState::Open { thread, index } => self.gc.pool.thread(thread).stack_get(index),
            UpvalState::Closed(v) => v,
        }
    }

    /// Write through an upvalue (OP_SETUPVAL)
    pub fn set_upvalue(&mut self, id: UpvalueId, value: LuaValue) {
        debug_assert!(self.check_liveness(&value));
        match self.gc.pool.upvalue(id).state {
            UpvalState::Open { thread, index } => {
                self.gc.pool.thread_mut(thread).stack_set(index, value);
            }
            UpvalState::Closed(_) => {
                self.gc.pool.upvalue_mut(id).state = UpvalState::Closed(value);
                self.gc.upvalue_barrier(&value);
            }
        }
    }

    /// Upvalue handle in slot `n` of a Lua closure
    pub fn closure_upvalue(&self, cl: LClosureId, n: usize) -> Option<UpvalueId> {
        self.gc.pool.lua_closure(cl).upvals.get(n).copied().flatten()
    }

    pub fn get_c_upvalue(&self, cl: CClosureId, n: usize) -> LuaValue {
        self.gc
            .pool
            .c_closure(cl)
            .upvalues
            .get(n)
            .copied()
            .unwrap_or_default()
    }

    /// Store a captured value of a native closure (lua_setupvalue).
    /// Returns false, storing nothing, when `n` is out of range.
    pub fn set_c_upvalue(&mut self, cl: CClosureId, n: usize, value: LuaValue) -> bool {
        debug_assert!(self.check_liveness(&value));
        let Some(slot) = self.gc.pool.c_closure_mut(cl).upvalues.get_mut(n) else {
            return false;
        };
        *slot = value;
        if let Some(v) = value.gc_id() {
            self.gc.barrier(cl.gc_ref(), v.gc_ref());
        }
        true
    }

    /// Drop a Lua closure's references; closed upvalues nobody holds any
    /// more are freed (freeLclosure / luaC_upvdeccount)
    pub(crate) fn release_closure_upvalues(&mut self, r: GcRef) {
        let upvals = std::mem::take(&mut self.gc.pool.lua_closure_mut(LClosureId(r.0)).upvals);
        for uv in upvals.into_iter().flatten() {
            let upvalue = self.gc.pool.upvalue_mut(uv);
            debug_assert!(upvalue.refcount > 0);
            upvalue.refcount -= 1;
            if upvalue.refcount == 0 && !upvalue.is_open() {
                self.gc.free(uv.gc_ref());
            }
        }
    }

    /// An upvalue freed directly must leave its coroutine's open list
    pub(crate) fn detach_upvalue(&mut self, r: GcRef) {
        let id = UpvalueId(r.0);
        if let UpvalState::Open { thread, .. } = self.gc.pool.upvalue(id).state {
            self.gc.pool.thread_mut(thread).remove_open_upval(id);
        }
    }
}
