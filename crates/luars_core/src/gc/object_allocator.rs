// Object creation
//
// Every constructor computes the byte size charged for the object and goes
// through GC::allocate, so each new object is painted with the current
// white and linked into the all-objects list before anyone can see it.

use std::mem::size_of;

use crate::gc::{
    CClosureId, GC, GcBody, LClosureId, ProtoId, StringInterner, TableId, ThreadId, UpvalueId,
    UserdataId,
};
use crate::lua_value::{
    CClosure, LuaClosure, LuaTable, LuaUserdata, LuaValue, Proto, UpvalState, Upvalue,
};
use crate::lua_vm::lua_limits::{MAX_SIZE, MAXUPVAL};
use crate::lua_vm::{CFunction, LuaError, LuaResult, LuaState};

pub type CreateResult = LuaResult<LuaValue>;

pub struct ObjectAllocator {
    pub(crate) strings: StringInterner,
}

impl ObjectAllocator {
    pub fn new(string_table_size: usize, seed: u32) -> Self {
        Self {
            strings: StringInterner::new(string_table_size, seed),
        }
    }

    pub fn strings(&self) -> &StringInterner {
        &self.strings
    }

    pub fn create_string(&mut self, gc: &mut GC, bytes: &[u8]) -> CreateResult {
        self.strings.new_string(gc, bytes)
    }

    pub fn create_table(&mut self, gc: &mut GC, narr: usize) -> LuaResult<TableId> {
        let size = size_of::<LuaTable>() + narr * size_of::<LuaValue>();
        let r = gc.allocate(GcBody::Table(LuaTable::new(narr)), size)?;
        Ok(TableId(r.0))
    }

    /// Full userdata with a zeroed block of `size` bytes (luaS_newudata)
    pub fn create_userdata(&mut self, gc: &mut GC, size: usize) -> LuaResult<UserdataId> {
        if size > MAX_SIZE - size_of::<LuaUserdata>() {
            return Err(LuaError::SizeExceeded);
        }
        let r = gc.try_allocate_with(size_of::<LuaUserdata>() + size, || {
            LuaUserdata::try_new(size).map(GcBody::Userdata)
        })?;
        Ok(UserdataId(r.0))
    }

    /// Store a fully built prototype (luaF_newproto + filling by the caller)
    pub fn create_proto(&mut self, gc: &mut GC, proto: Proto) -> LuaResult<ProtoId> {
        let size = proto.byte_size();
        let r = gc.allocate(GcBody::Proto(Box::new(proto)), size)?;
        Ok(ProtoId(r.0))
    }

    /// Native closure with `n` nil captured values (luaF_newCclosure)
    pub fn create_c_closure(&mut self, gc: &mut GC, f: CFunction, n: usize) -> LuaResult<CClosureId> {
        debug_assert!(n <= MAXUPVAL);
        let size = size_of::<CClosure>() + n * size_of::<LuaValue>();
        let r = gc.allocate(GcBody::CClosure(CClosure::new(f, n)), size)?;
        Ok(CClosureId(r.0))
    }

    /// Interpreted closure with `n` empty upvalue slots (luaF_newLclosure)
    pub fn create_lua_closure(
        &mut self,
        gc: &mut GC,
        proto: ProtoId,
        upvals: Vec<Option<UpvalueId>>,
    ) -> LuaResult<LClosureId> {
        debug_assert!(upvals.len() <= MAXUPVAL);
        let size = size_of::<LuaClosure>() + upvals.len() * size_of::<Option<UpvalueId>>();
        let r = gc.allocate(GcBody::LuaClosure(LuaClosure { proto, upvals }), size)?;
        Ok(LClosureId(r.0))
    }

    pub fn create_upvalue(&mut self, gc: &mut GC, state: UpvalState) -> LuaResult<UpvalueId> {
        let upvalue = match state {
            UpvalState::Open { thread, index } => Upvalue::new_open(thread, index),
            UpvalState::Closed(v) => Upvalue::new_closed(v),
        };
        let r = gc.allocate(GcBody::Upvalue(upvalue), size_of::<Upvalue>())?;
        Ok(UpvalueId(r.0))
    }

    pub fn create_thread(&mut self, gc: &mut GC, state: LuaState) -> LuaResult<ThreadId> {
        let size = size_of::<LuaState>() + state.stack_size() * size_of::<LuaValue>();
        let r = gc.allocate(GcBody::Thread(Box::new(state)), size)?;
        Ok(ThreadId(r.0))
    }
}
