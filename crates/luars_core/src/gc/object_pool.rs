// Object Pool - single arena for every collectible object
//
// - Values store typed IDs (slot indices), never pointers
// - Slots are Vec<Option<GcObject>>; None marks a free slot
// - Free list gives O(1) slot reuse
// - Typed accessors are checked downcasts: asking for the wrong kind is a
//   core bug and panics

use crate::gc::{
    CClosureId, GcBody, GcObject, GcRef, LClosureId, ProtoId, StringId, TableId, ThreadId,
    UpvalueId, UserdataId,
};
use crate::lua_value::{
    CClosure, LuaClosure, LuaString, LuaTable, LuaUserdata, Proto, Upvalue,
};
use crate::lua_vm::LuaState;

pub struct ObjectPool {
    slots: Vec<Option<GcObject>>,
    free_list: Vec<u32>,
    count: usize,
}

macro_rules! downcast {
    ($get:ident, $get_mut:ident, $id:ty, $variant:ident, $target:ty) => {
        #[inline]
        pub fn $get(&self, id: $id) -> &$target {
            match &self.get(id.gc_ref()).body {
                GcBody::$variant(v) => v,
                other => panic!(
                    "object {:?} is {:?}, not {}",
                    id,
                    other.gc_type(),
                    stringify!($variant)
                ),
            }
        }

        #[inline]
        pub fn $get_mut(&mut self, id: $id) -> &mut $target {
            match &mut self.get_mut(id.gc_ref()).body {
                GcBody::$variant(v) => v,
                other => panic!(
                    "object {:?} is {:?}, not {}",
                    id,
                    other.gc_type(),
                    stringify!($variant)
                ),
            }
        }
    };
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectPool {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(256),
            free_list: Vec::new(),
            count: 0,
        }
    }

    /// Store an object and return its handle
    #[inline]
    pub fn alloc(&mut self, object: GcObject) -> GcRef {
        self.count += 1;
        if let Some(free_id) = self.free_list.pop() {
            self.slots[free_id as usize] = Some(object);
            GcRef(free_id)
        } else {
            let id = self.slots.len() as u32;
            self.slots.push(Some(object));
            GcRef(id)
        }
    }

    /// Release a slot, returning the object that lived there
    #[inline]
    pub fn release(&mut self, r: GcRef) -> GcObject {
        match self.slots.get_mut(r.index()).and_then(Option::take) {
            Some(object) => {
                self.free_list.push(r.0);
                self.count -= 1;
                object
            }
            None => panic!("double free of object {:?}", r),
        }
    }

    #[inline(always)]
    pub fn try_get(&self, r: GcRef) -> Option<&GcObject> {
        self.slots.get(r.index()).and_then(Option::as_ref)
    }

    #[inline(always)]
    pub fn get(&self, r: GcRef) -> &GcObject {
        match self.try_get(r) {
            Some(object) => object,
            None => panic!("use of freed object {:?}", r),
        }
    }

    #[inline(always)]
    pub fn get_mut(&mut self, r: GcRef) -> &mut GcObject {
        match self.slots.get_mut(r.index()).and_then(Option::as_mut) {
            Some(object) => object,
            None => panic!("use of freed object {:?}", r),
        }
    }

    #[inline(always)]
    pub fn is_valid(&self, r: GcRef) -> bool {
        self.try_get(r).is_some()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    downcast!(string, string_mut, StringId, String, LuaString);
    downcast!(userdata, userdata_mut, UserdataId, Userdata, LuaUserdata);
    downcast!(table, table_mut, TableId, Table, LuaTable);
    downcast!(proto, proto_mut, ProtoId, Proto, Box<Proto>);
    downcast!(lua_closure, lua_closure_mut, LClosureId, LuaClosure, LuaClosure);
    downcast!(c_closure, c_closure_mut, CClosureId, CClosure, CClosure);
    downcast!(thread, thread_mut, ThreadId, Thread, Box<LuaState>);
    downcast!(upvalue, upvalue_mut, UpvalueId, Upvalue, Upvalue);
}
