// Garbage collector object graph
//
// Owns the object arena and the four intrusive owning lists. The
// mark/sweep scheduling lives outside this crate; what is here is the
// object lifecycle it relies on: allocation painted with the current
// white, O(1) unlink on free, list transitions, and the write barriers.
mod gc_id;
mod gc_object;
mod object_allocator;
mod object_pool;
mod string_interner;

pub use gc_id::*;
pub use gc_object::*;
pub use object_allocator::{CreateResult, ObjectAllocator};
pub use object_pool::ObjectPool;
pub use string_interner::{RESERVED_WORDS, StringInterner, lua_hash, string_size};

use tracing::trace;

use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaResult};

/// Allocation hook: receives (bytes in use, bytes requested) and may decline.
pub type AllocHook = Box<dyn FnMut(isize, usize) -> bool>;

/// Collector phase (lgc.h GCS* states)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    Propagate = 0,
    Atomic = 1,
    SwpAllGc = 2,
    SwpFinObj = 3,
    SwpToBeFnz = 4,
    SwpEnd = 5,
    CallFin = 6,
    Pause = 7,
}

impl GcState {
    pub fn is_sweep_phase(self) -> bool {
        matches!(
            self,
            GcState::SwpAllGc | GcState::SwpFinObj | GcState::SwpToBeFnz | GcState::SwpEnd
        )
    }

    /// Black objects must not point to white ones while this holds
    pub fn keep_invariant(self) -> bool {
        (self as u8) <= (GcState::Atomic as u8)
    }
}

pub struct GC {
    pub(crate) pool: ObjectPool,
    heads: [Option<GcRef>; 4],
    counts: [usize; 4],
    pub current_white: u8,
    pub gc_state: GcState,
    /// Bytes currently charged to live objects
    pub total_bytes: isize,
    /// Bytes allocated since the collector last paid its debt
    pub gc_debt: isize,
    /// Objects waiting to be traversed
    pub gray: Vec<GcRef>,
    max_memory: isize,
    alloc_hook: Option<AllocHook>,
}

impl GC {
    pub fn new(max_memory: isize) -> Self {
        Self {
            pool: ObjectPool::new(),
            heads: [None; 4],
            counts: [0; 4],
            current_white: 0,
            gc_state: GcState::Pause,
            total_bytes: 0,
            gc_debt: 0,
            gray: Vec::new(),
            max_memory,
            alloc_hook: None,
        }
    }

    pub fn set_alloc_hook(&mut self, hook: Option<AllocHook>) {
        self.alloc_hook = hook;
    }

    pub fn pool(&self) -> &ObjectPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ObjectPool {
        &mut self.pool
    }

    /// Ask the limit and the hook whether `size` more bytes may be used
    pub fn check_alloc(&mut self, size: usize) -> LuaResult<()> {
        let room = self.max_memory.saturating_sub(self.total_bytes).max(0) as usize;
        if size > room {
            return Err(LuaError::OutOfMemory);
        }
        if let Some(hook) = self.alloc_hook.as_mut()
            && !hook(self.total_bytes, size)
        {
            return Err(LuaError::OutOfMemory);
        }
        Ok(())
    }

    /// Create an object of `size` bytes, painted current white and linked
    /// at the head of the all-objects list (luaC_newobj)
    pub fn allocate(&mut self, body: GcBody, size: usize) -> LuaResult<GcRef> {
        self.allocate_with(size, || body)
    }

    /// Like `allocate`, but the payload is only built once the memory
    /// check passed
    pub fn allocate_with(
        &mut self,
        size: usize,
        build: impl FnOnce() -> GcBody,
    ) -> LuaResult<GcRef> {
        self.try_allocate_with(size, || Ok(build()))
    }

    /// Like `allocate_with`, for payloads whose own buffers may fail to
    /// allocate
    pub fn try_allocate_with(
        &mut self,
        size: usize,
        build: impl FnOnce() -> LuaResult<GcBody>,
    ) -> LuaResult<GcRef> {
        self.check_alloc(size)?;
        let body = build()?;
        let r = self.pool.alloc(GcObject {
            header: GcHeader::with_white(self.current_white, size),
            list: GcList::AllGc,
            prev: None,
            next: None,
            body,
        });
        self.link(r, GcList::AllGc);
        self.total_bytes += size as isize;
        self.gc_debt += size as isize;
        Ok(r)
    }

    /// Unlink from its list and release the slot. Callers guarantee no
    /// references remain.
    pub fn free(&mut self, r: GcRef) -> GcObject {
        self.unlink(r);
        let object = self.pool.release(r);
        self.total_bytes -= object.header.size as isize;
        self.gc_debt -= object.header.size as isize;
        trace!(object = r.0, kind = ?object.body.gc_type(), "object freed");
        object
    }

    /// Move an object to another owning list
    pub fn move_to_list(&mut self, r: GcRef, list: GcList) {
        self.unlink(r);
        self.link(r, list);
    }

    /// Make an object permanent (luaC_fix): gray, old, on the fixed list
    pub fn fix_object(&mut self, r: GcRef) {
        let header = &mut self.pool.get_mut(r).header;
        debug_assert!(header.is_white(), "only fresh objects can be fixed");
        header.set_fixed();
        self.move_to_list(r, GcList::Fixed);
    }

    fn link(&mut self, r: GcRef, list: GcList) {
        let head = self.heads[list as usize];
        if let Some(h) = head {
            self.pool.get_mut(h).prev = Some(r);
        }
        let object = self.pool.get_mut(r);
        object.list = list;
        object.prev = None;
        object.next = head;
        self.heads[list as usize] = Some(r);
        self.counts[list as usize] += 1;
    }

    fn unlink(&mut self, r: GcRef) {
        let object = self.pool.get_mut(r);
        let (prev, next, list) = (object.prev.take(), object.next.take(), object.list);
        match prev {
            Some(p) => self.pool.get_mut(p).next = next,
            None => self.heads[list as usize] = next,
        }
        if let Some(n) = next {
            self.pool.get_mut(n).prev = prev;
        }
        self.counts[list as usize] -= 1;
    }

    #[inline(always)]
    pub fn header(&self, r: GcRef) -> &GcHeader {
        &self.pool.get(r).header
    }

    #[inline(always)]
    pub fn header_mut(&mut self, r: GcRef) -> &mut GcHeader {
        &mut self.pool.get_mut(r).header
    }

    #[inline(always)]
    pub fn list_of(&self, r: GcRef) -> GcList {
        self.pool.get(r).list
    }

    #[inline(always)]
    pub fn list_head(&self, list: GcList) -> Option<GcRef> {
        self.heads[list as usize]
    }

    #[inline(always)]
    pub fn list_len(&self, list: GcList) -> usize {
        self.counts[list as usize]
    }

    /// Walk a list from its head
    pub fn iter_list(&self, list: GcList) -> impl Iterator<Item = GcRef> + '_ {
        std::iter::successors(self.heads[list as usize], |r| self.pool.get(*r).next)
    }

    #[inline(always)]
    pub fn other_white(&self) -> u8 {
        GcHeader::otherwhite(self.current_white)
    }

    /// Painted with the non-current white: unreachable, awaiting sweep
    #[inline(always)]
    pub fn is_dead(&self, r: GcRef) -> bool {
        self.header(r).is_dead(self.other_white())
    }

    /// Switch the current white, as the atomic phase does. Every object that
    /// was white before becomes collectible.
    pub fn flip_white(&mut self) {
        self.current_white = GcHeader::otherwhite(self.current_white);
    }

    /// Mark a white object: strings have nothing to traverse and go black,
    /// everything else goes gray onto the gray list
    fn mark_object(&mut self, r: GcRef) {
        let object = self.pool.get_mut(r);
        if !object.header.is_white() {
            return;
        }
        if matches!(object.body, GcBody::String(_)) {
            object.header.make_black();
        } else {
            object.header.make_gray();
            self.gray.push(r);
        }
    }

    /// Forward barrier (luaC_barrier_): black `o` now points to white `v`
    pub fn barrier(&mut self, o: GcRef, v: GcRef) {
        if !(self.header(o).is_black() && self.header(v).is_white()) {
            return;
        }
        if self.gc_state.keep_invariant() {
            self.mark_object(v);
        } else if self.gc_state.is_sweep_phase() {
            // sweep will reach `o` anyway; avoid repeated barriers
            let white = self.current_white;
            self.header_mut(o).make_white(white);
        }
    }

    /// Backward barrier (luaC_barrierback_): re-gray a black container
    pub fn barrier_back(&mut self, o: GcRef) {
        let header = self.header_mut(o);
        if !header.is_black() {
            return;
        }
        header.make_gray();
        self.gray.push(o);
    }

    /// Barrier for a value that just moved into a closed upvalue
    /// (luaC_upvalbarrier_)
    pub fn upvalue_barrier(&mut self, v: &LuaValue) {
        if let Some(id) = v.gc_id()
            && self.gc_state.keep_invariant()
        {
            self.mark_object(id.gc_ref());
        }
    }
}
