// Lua value types and the heap object payloads they reference
mod chunk_serializer;
mod lua_function;
mod lua_table;
#[allow(clippy::module_inception)]
mod lua_value;
mod proto;

pub use chunk_serializer::{
    LUAC_DATA, LUAC_FORMAT, LUAC_INT, LUAC_NUM, LUAC_VERSION, LUA_SIGNATURE, chunk_name,
};
pub use lua_function::{CClosure, LuaClosure, UpvalState, Upvalue};
pub use lua_table::LuaTable;
pub use lua_value::*;
pub use proto::{LocVar, Proto, UpvalueDesc};

use crate::gc::{StringId, TableId};
use crate::lua_vm::{LuaError, LuaResult};

/// Interned (short) or standalone (long) string payload.
///
/// `extra` has two meanings: for short strings it is the reserved-word
/// index + 1 (0 for ordinary strings); for long strings it is 1 once the
/// hash has been computed.
#[derive(Debug)]
pub struct LuaString {
    data: Box<[u8]>,
    pub(crate) hash: u32,
    pub(crate) extra: u8,
    is_short: bool,
    /// Next entry in the same string-table chain
    pub(crate) hnext: Option<StringId>,
}

impl LuaString {
    pub(crate) fn new_short(data: &[u8], hash: u32) -> Self {
        Self {
            data: data.into(),
            hash,
            extra: 0,
            is_short: true,
            hnext: None,
        }
    }

    /// A long string stores the seed in `hash` until it is hashed lazily
    pub(crate) fn new_long(data: &[u8], seed: u32) -> Self {
        Self {
            data: data.into(),
            hash: seed,
            extra: 0,
            is_short: false,
            hnext: None,
        }
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline(always)]
    pub fn is_short(&self) -> bool {
        self.is_short
    }

    /// Cached hash. For a long string this is only meaningful once
    /// `has_hash` is true.
    #[inline(always)]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    #[inline(always)]
    pub fn has_hash(&self) -> bool {
        self.is_short || self.extra != 0
    }

    /// Index (0-based) in the reserved-word list, if this is a reserved word
    #[inline]
    pub fn reserved_index(&self) -> Option<usize> {
        if self.is_short && self.extra > 0 {
            Some(self.extra as usize - 1)
        } else {
            None
        }
    }
}

/// Full userdata: an owned byte block plus metatable and user value
pub struct LuaUserdata {
    data: Box<[u8]>,
    pub metatable: Option<TableId>,
    pub user_value: LuaValue,
}

impl LuaUserdata {
    /// Zeroed block of `size` bytes; fails instead of aborting when the
    /// system allocator cannot provide it
    pub fn try_new(size: usize) -> LuaResult<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| LuaError::OutOfMemory)?;
        data.resize(size, 0u8);
        Ok(Self {
            data: data.into_boxed_slice(),
            metatable: None,
            user_value: LuaValue::Nil,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
