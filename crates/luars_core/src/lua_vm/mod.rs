// Lua Virtual Machine - process-wide state shared by every coroutine
//
// One LuaVM is one Lua universe (global_State): the object arena and its
// lists, the string table, per-type metatables, the registry of
// coroutines with open upvalues, and the coroutine currently running.
// It is passed explicitly to every operation; nothing here is global.
pub mod call_info;
mod closure_handler;
pub mod lua_error;
pub mod lua_limits;
mod lua_state;
mod safe_option;

use ahash::RandomState;
use indexmap::IndexSet;
use std::hash::BuildHasher;
use tracing::debug;

use crate::gc::{
    AllocHook, GC, GcBody, GcId, GcList, GcRef, GcType, ObjectAllocator, ProtoId, StringId,
    StringInterner, TableId, ThreadId, UserdataId,
};
use crate::lua_value::{LuaString, LuaValue, Proto, withvariant};
pub use call_info::{CallInfo, Frame, call_status};
pub use lua_error::{LuaError, LuaResult};
use lua_limits::{LUA_NUMTAGS, MEMERRMSG, MINSTRTABSIZE};
pub use lua_state::{LuaState, OpenUpval, ThreadStatus};
pub use safe_option::SafeOption;

/// Native function: receives the VM, returns the number of results
pub type CFunction = fn(&mut LuaVM) -> LuaResult<usize>;

/// Continuation of a native function after a yield
pub type KFunction = fn(&mut LuaVM, i32, isize) -> LuaResult<usize>;

/// Option for multiple returns
pub const LUA_MULTRET: i16 = -1;

pub struct LuaVM {
    pub(crate) gc: GC,
    pub(crate) object_allocator: ObjectAllocator,
    /// Metatables for basic types
    mt: [Option<TableId>; LUA_NUMTAGS],
    /// Coroutines with open upvalues
    twups: IndexSet<ThreadId, RandomState>,
    main_thread: ThreadId,
    current_thread: ThreadId,
    /// Message of the last error (lightweight error handling)
    pub(crate) error_message: String,
    pub(crate) safe_option: SafeOption,
}

/// Per-VM random seed (luai_makeseed)
fn make_seed() -> u32 {
    let local = 0u8;
    let h = RandomState::new().hash_one((&local as *const u8 as usize, make_seed as usize));
    (h ^ (h >> 32)) as u32
}

impl LuaVM {
    pub fn new(option: SafeOption) -> LuaResult<Self> {
        let seed = option.hash_seed.unwrap_or_else(make_seed);
        let mut gc = GC::new(option.max_memory_limit);
        let mut object_allocator = ObjectAllocator::new(option.string_table_size, seed);

        let mut main = LuaState::new(option.max_stack_size, option.max_call_depth);
        main.is_current = true;
        let main_thread = object_allocator.create_thread(&mut gc, main)?;
        gc.fix_object(main_thread.gc_ref());
        object_allocator.strings.init(&mut gc)?;

        debug!(seed, strings = object_allocator.strings.nuse(), "lua state created");
        Ok(Self {
            gc,
            object_allocator,
            mt: [None; LUA_NUMTAGS],
            twups: IndexSet::with_hasher(RandomState::new()),
            main_thread,
            current_thread: main_thread,
            error_message: String::new(),
            safe_option: option,
        })
    }

    pub fn gc(&self) -> &GC {
        &self.gc
    }

    pub fn gc_mut(&mut self) -> &mut GC {
        &mut self.gc
    }

    pub fn strings(&self) -> &StringInterner {
        self.object_allocator.strings()
    }

    pub fn set_alloc_hook(&mut self, hook: Option<AllocHook>) {
        self.gc.set_alloc_hook(hook);
    }

    // ============ Errors ============

    /// Record a runtime error message
    pub fn error(&mut self, msg: impl Into<String>) -> LuaError {
        self.error_message = msg.into();
        LuaError::RuntimeError
    }

    /// Attach the standard message to an allocation failure
    pub(crate) fn alloc_error(&mut self, e: LuaError) -> LuaError {
        match e {
            LuaError::OutOfMemory => self.error_message = MEMERRMSG.to_string(),
            LuaError::SizeExceeded => {
                self.error_message = "memory allocation error: block too big".to_string()
            }
            _ => {}
        }
        e
    }

    pub fn get_error_msg(&self, e: LuaError) -> String {
        match e {
            LuaError::StackOverflow if self.error_message.is_empty() => "stack overflow".into(),
            _ if self.error_message.is_empty() => e.to_string(),
            _ => self.error_message.clone(),
        }
    }

    // ============ Liveness ============

    /// A collectable value must reference a live object whose stored tag
    /// matches the value's tag (checkliveness)
    pub fn check_liveness(&self, v: &LuaValue) -> bool {
        match v.gc_id() {
            None => true,
            Some(id) => match self.gc.pool.try_get(id.gc_ref()) {
                Some(object) => {
                    object.body.tt() == withvariant(v.tt()) && !self.gc.is_dead(id.gc_ref())
                }
                None => false,
            },
        }
    }

    // ============ Strings ============

    pub fn create_string(&mut self, bytes: &[u8]) -> LuaResult<LuaValue> {
        let r = self.object_allocator.create_string(&mut self.gc, bytes);
        r.map_err(|e| self.alloc_error(e))
    }

    pub fn create_str(&mut self, s: &str) -> LuaResult<LuaValue> {
        self.create_string(s.as_bytes())
    }

    /// Create a string from a static literal, memoized per call site
    pub fn create_literal(&mut self, s: &'static str) -> LuaResult<LuaValue> {
        let r = self
            .object_allocator
            .strings
            .create_literal(&mut self.gc, s);
        r.map_err(|e| self.alloc_error(e))
    }

    pub fn string(&self, id: StringId) -> &LuaString {
        self.gc.pool.string(id)
    }

    pub fn string_bytes(&self, id: StringId) -> &[u8] {
        self.gc.pool.string(id).as_bytes()
    }

    /// Hash of any string; long strings are hashed on first use
    pub fn string_hash(&mut self, id: StringId) -> u32 {
        if self.gc.pool.string(id).is_short() {
            self.gc.pool.string(id).hash()
        } else {
            StringInterner::hash_long_string(&mut self.gc, id)
        }
    }

    /// Content equality of two long strings (luaS_eqlngstr)
    pub fn eq_long_string(&self, a: StringId, b: StringId) -> bool {
        let (sa, sb) = (self.gc.pool.string(a), self.gc.pool.string(b));
        debug_assert!(!sa.is_short() && !sb.is_short());
        a == b || (sa.len() == sb.len() && sa.as_bytes() == sb.as_bytes())
    }

    /// Equality of any two strings: identity for short ones
    pub fn strings_equal(&self, a: StringId, b: StringId) -> bool {
        let (sa, sb) = (self.gc.pool.string(a), self.gc.pool.string(b));
        match (sa.is_short(), sb.is_short()) {
            (true, true) => a == b,
            (false, false) => self.eq_long_string(a, b),
            _ => false,
        }
    }

    /// Raw equality of two values, comparing long strings by content
    pub fn raw_equal(&self, a: &LuaValue, b: &LuaValue) -> bool {
        match (*a, *b) {
            (LuaValue::LongString(x), LuaValue::LongString(y)) => self.eq_long_string(x, y),
            _ => a == b,
        }
    }

    /// Collector hook: drop literal-cache entries about to be swept
    pub fn clear_string_cache(&mut self) {
        self.object_allocator.strings.clear_cache(&self.gc);
    }

    /// Rehash the string table into `new_size` buckets, rounded up to a
    /// power of 2 no smaller than MINSTRTABSIZE
    pub fn resize_string_table(&mut self, new_size: usize) {
        let new_size = new_size.max(MINSTRTABSIZE).next_power_of_two();
        self.object_allocator.strings.resize(&mut self.gc, new_size);
    }

    /// Collector hook: shrink the string table when mostly empty
    pub fn check_string_table_size(&mut self) {
        self.object_allocator.strings.check_size(&mut self.gc);
    }

    // ============ Other objects ============

    pub fn create_table(&mut self, narr: usize) -> LuaResult<TableId> {
        let r = self.object_allocator.create_table(&mut self.gc, narr);
        r.map_err(|e| self.alloc_error(e))
    }

    /// Raw integer store into a table, with the backward barrier
    pub fn table_set_int(&mut self, t: TableId, key: i64, value: LuaValue) -> bool {
        debug_assert!(self.check_liveness(&value));
        let stored = self.gc.pool.table_mut(t).set_int(key, value);
        if stored && value.is_collectable() {
            self.gc.barrier_back(t.gc_ref());
        }
        stored
    }

    pub fn table_get_int(&self, t: TableId, key: i64) -> LuaValue {
        self.gc.pool.table(t).get_int(key)
    }

    pub fn create_userdata(&mut self, size: usize) -> LuaResult<UserdataId> {
        let r = self.object_allocator.create_userdata(&mut self.gc, size);
        r.map_err(|e| self.alloc_error(e))
    }

    /// Allocate a prototype with all arrays empty (luaF_newproto)
    pub fn new_proto(&mut self) -> LuaResult<ProtoId> {
        self.create_proto(Proto::default())
    }

    /// Store a prototype built by a compiler or loader
    pub fn create_proto(&mut self, proto: Proto) -> LuaResult<ProtoId> {
        let r = self.object_allocator.create_proto(&mut self.gc, proto);
        r.map_err(|e| self.alloc_error(e))
    }

    pub fn proto(&self, id: ProtoId) -> &Proto {
        self.gc.pool.proto(id)
    }

    pub fn proto_mut(&mut self, id: ProtoId) -> &mut Proto {
        self.gc.pool.proto_mut(id)
    }

    /// Release a prototype (luaF_freeproto)
    pub fn free_proto(&mut self, id: ProtoId) {
        self.free_object(id.gc_ref());
    }

    /// Name of the `local_number`-th active local at `pc` (luaF_getlocalname)
    pub fn get_local_name(&self, proto: ProtoId, local_number: usize, pc: u32) -> Option<StringId> {
        self.proto(proto).get_local_name(local_number, pc)
    }

    pub fn local_name_bytes(&self, proto: ProtoId, local_number: usize, pc: u32) -> Option<&[u8]> {
        self.get_local_name(proto, local_number, pc)
            .map(|id| self.string_bytes(id))
    }

    /// Pin an object so the collector never reclaims it
    pub fn fix_object(&mut self, id: GcId) {
        self.gc.fix_object(id.gc_ref());
    }

    /// Reclaim one object (the collector's freeobj). Strings leave the
    /// string table, Lua closures release their upvalues, threads close
    /// theirs first.
    pub fn free_object(&mut self, r: GcRef) {
        match self.gc.pool.get(r).body.gc_type() {
            GcType::String => {
                let id = StringId(r.0);
                if self.gc.pool.string(id).is_short() {
                    self.object_allocator.strings.remove(&mut self.gc, id);
                }
            }
            GcType::LuaClosure => self.release_closure_upvalues(r),
            GcType::Thread => {
                let id = ThreadId(r.0);
                debug_assert!(id != self.current_thread, "freeing the running coroutine");
                self.close_upvals(id, 0);
                self.twups.shift_remove(&id);
            }
            GcType::Upvalue => self.detach_upvalue(r),
            GcType::Userdata | GcType::Table | GcType::Proto | GcType::CClosure => {}
        }
        self.gc.free(r);
    }

    // ============ Metatables ============

    pub fn get_type_metatable(&self, basic_type: u8) -> Option<TableId> {
        self.mt.get(basic_type as usize).copied().flatten()
    }

    pub fn set_type_metatable(&mut self, basic_type: u8, mt: Option<TableId>) {
        if let Some(slot) = self.mt.get_mut(basic_type as usize) {
            *slot = mt;
        }
    }

    // ============ Coroutines ============

    /// Create a coroutine (lua_newthread). It inherits the hook settings of
    /// the running one.
    pub fn new_thread(&mut self) -> LuaResult<ThreadId> {
        let mut state = LuaState::new(
            self.safe_option.max_stack_size,
            self.safe_option.max_call_depth,
        );
        let parent = self.gc.pool.thread(self.current_thread);
        state.hookmask = parent.hookmask;
        let r = self.object_allocator.create_thread(&mut self.gc, state);
        r.map_err(|e| self.alloc_error(e))
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    pub fn current_thread(&self) -> ThreadId {
        self.current_thread
    }

    pub fn thread(&self, id: ThreadId) -> &LuaState {
        self.gc.pool.thread(id)
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> &mut LuaState {
        self.gc.pool.thread_mut(id)
    }

    /// Switch the running coroutine (resume / yield boundary)
    pub fn set_current_thread(&mut self, id: ThreadId) {
        self.gc.pool.thread_mut(self.current_thread).is_current = false;
        self.gc.pool.thread_mut(id).is_current = true;
        self.current_thread = id;
        debug_assert!(self.current_thread_count() == 1);
    }

    /// Number of coroutines flagged as running; always 1
    pub fn current_thread_count(&self) -> usize {
        GcList::ALL
            .iter()
            .flat_map(|&list| self.gc.iter_list(list))
            .filter(|&r| match &self.gc.pool.get(r).body {
                GcBody::Thread(state) => state.is_current,
                _ => false,
            })
            .count()
    }

    /// Write a stack slot of a coroutine
    pub fn set_stack(&mut self, thread: ThreadId, index: usize, value: LuaValue) {
        debug_assert!(self.check_liveness(&value));
        self.gc.pool.thread_mut(thread).stack_set(index, value);
    }

    pub fn get_stack(&self, thread: ThreadId, index: usize) -> LuaValue {
        self.gc.pool.thread(thread).stack_get(index)
    }

    /// Push onto a coroutine's stack, growing it when needed
    pub fn push(&mut self, thread: ThreadId, value: LuaValue) -> LuaResult<()> {
        debug_assert!(self.check_liveness(&value));
        self.gc.pool.thread_mut(thread).push(value)
    }

    /// Coroutines currently registered with open upvalues
    pub fn threads_with_open_upvalues(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.twups.iter().copied()
    }

    pub(crate) fn register_twups(&mut self, thread: ThreadId) {
        if !self.twups.contains(&thread) {
            self.twups.insert(thread);
        }
    }

    /// Collector hook: forget coroutines whose open list became empty
    /// (remarkupvals)
    pub fn prune_twups(&mut self) {
        let pool = &self.gc.pool;
        self.twups
            .retain(|&t| pool.is_valid(t.gc_ref()) && pool.thread(t).has_open_upvalues());
    }
}
