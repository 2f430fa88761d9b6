// LuaValue - Lua 5.3 TValue in Rust
//
// Lua's TValue is a union payload plus a one-byte tag:
// - Bits 0-3: basic type (LUA_TNIL, LUA_TBOOLEAN, LUA_TNUMBER, ...)
// - Bits 4-5: variant bits (integer/float, short/long string, closure kinds)
// - Bit 6: BIT_ISCOLLECTABLE (payload is a GC object)
//
// Here the union is a closed enum: every variant carries exactly its
// payload, and the tag byte is computed from the variant instead of
// being stored. "Collectable" is derived the same way, so a value can
// never claim a GC payload it does not have.
use crate::gc::{
    CClosureId, GcId, LClosureId, StringId, TableId, ThreadId, UserdataId,
};
use crate::lua_vm::CFunction;

// ============ Basic type tags (bits 0-3) ============
// From lua.h
pub const LUA_TNONE: i8 = -1;
pub const LUA_TNIL: u8 = 0;
pub const LUA_TBOOLEAN: u8 = 1;
pub const LUA_TLIGHTUSERDATA: u8 = 2;
pub const LUA_TNUMBER: u8 = 3;
pub const LUA_TSTRING: u8 = 4;
pub const LUA_TTABLE: u8 = 5;
pub const LUA_TFUNCTION: u8 = 6;
pub const LUA_TUSERDATA: u8 = 7;
pub const LUA_TTHREAD: u8 = 8;

// Internal-only types (lobject.h)
pub const LUA_TPROTO: u8 = 9;
pub const LUA_TUPVAL: u8 = 10;

// ============ Variant tags (with bits 4-5) ============
macro_rules! makevariant {
    ($base:expr, $variant:expr) => {
        $base | ($variant << 4)
    };
}

// Function variants
pub const LUA_TLCL: u8 = makevariant!(LUA_TFUNCTION, 0); // Lua closure
pub const LUA_TLCF: u8 = makevariant!(LUA_TFUNCTION, 1); // light C function
pub const LUA_TCCL: u8 = makevariant!(LUA_TFUNCTION, 2); // C closure

// String variants
pub const LUA_TSHRSTR: u8 = makevariant!(LUA_TSTRING, 0);
pub const LUA_TLNGSTR: u8 = makevariant!(LUA_TSTRING, 1);

// Number variants
pub const LUA_TNUMFLT: u8 = makevariant!(LUA_TNUMBER, 0);
pub const LUA_TNUMINT: u8 = makevariant!(LUA_TNUMBER, 1);

/// Bit mark for collectable types
pub const BIT_ISCOLLECTABLE: u8 = 1 << 6;

/// Mark a tag as collectable
#[inline(always)]
pub const fn ctb(t: u8) -> u8 {
    t | BIT_ISCOLLECTABLE
}

/// Tag without variant bits (bits 0-3)
#[inline(always)]
pub const fn novariant(tt: u8) -> u8 {
    tt & 0x0F
}

/// Tag with variant bits (bits 0-5)
#[inline(always)]
pub const fn withvariant(tt: u8) -> u8 {
    tt & 0x3F
}

/// A Lua value. 16 bytes, `Copy`, never owns heap memory by itself.
#[derive(Clone, Copy, Debug, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    LightUserdata(usize),
    Integer(i64),
    Float(f64),
    LightCFunction(CFunction),
    ShortString(StringId),
    LongString(StringId),
    Table(TableId),
    LuaClosure(LClosureId),
    CClosure(CClosureId),
    Userdata(UserdataId),
    Thread(ThreadId),
}

impl LuaValue {
    #[inline(always)]
    pub fn nil() -> Self {
        LuaValue::Nil
    }

    #[inline(always)]
    pub fn boolean(b: bool) -> Self {
        LuaValue::Boolean(b)
    }

    #[inline(always)]
    pub fn integer(i: i64) -> Self {
        LuaValue::Integer(i)
    }

    #[inline(always)]
    pub fn float(n: f64) -> Self {
        LuaValue::Float(n)
    }

    /// Full tag byte: basic type, variant and collectable bit.
    #[inline]
    pub fn tt(&self) -> u8 {
        match self {
            LuaValue::Nil => LUA_TNIL,
            LuaValue::Boolean(_) => LUA_TBOOLEAN,
            LuaValue::LightUserdata(_) => LUA_TLIGHTUSERDATA,
            LuaValue::Integer(_) => LUA_TNUMINT,
            LuaValue::Float(_) => LUA_TNUMFLT,
            LuaValue::LightCFunction(_) => LUA_TLCF,
            LuaValue::ShortString(_) => ctb(LUA_TSHRSTR),
            LuaValue::LongString(_) => ctb(LUA_TLNGSTR),
            LuaValue::Table(_) => ctb(LUA_TTABLE),
            LuaValue::LuaClosure(_) => ctb(LUA_TLCL),
            LuaValue::CClosure(_) => ctb(LUA_TCCL),
            LuaValue::Userdata(_) => ctb(LUA_TUSERDATA),
            LuaValue::Thread(_) => ctb(LUA_TTHREAD),
        }
    }

    /// Basic type (lua_type)
    #[inline(always)]
    pub fn ttype(&self) -> u8 {
        novariant(self.tt())
    }

    #[inline(always)]
    pub fn is_collectable(&self) -> bool {
        self.gc_id().is_some()
    }

    /// The GC object this value references, if any.
    #[inline]
    pub fn gc_id(&self) -> Option<GcId> {
        match *self {
            LuaValue::ShortString(id) | LuaValue::LongString(id) => Some(GcId::StringId(id)),
            LuaValue::Table(id) => Some(GcId::TableId(id)),
            LuaValue::LuaClosure(id) => Some(GcId::LClosureId(id)),
            LuaValue::CClosure(id) => Some(GcId::CClosureId(id)),
            LuaValue::Userdata(id) => Some(GcId::UserdataId(id)),
            LuaValue::Thread(id) => Some(GcId::ThreadId(id)),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// nil and false are falsy; everything else is truthy
    #[inline(always)]
    pub fn is_falsy(&self) -> bool {
        matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    #[inline(always)]
    pub fn is_number(&self) -> bool {
        self.ttype() == LUA_TNUMBER
    }

    #[inline(always)]
    pub fn is_string(&self) -> bool {
        self.ttype() == LUA_TSTRING
    }

    #[inline(always)]
    pub fn is_function(&self) -> bool {
        self.ttype() == LUA_TFUNCTION
    }

    #[inline(always)]
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            LuaValue::Integer(i) => Some(i),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            LuaValue::Float(n) => Some(n),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_boolean(&self) -> Option<bool> {
        match *self {
            LuaValue::Boolean(b) => Some(b),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_string_id(&self) -> Option<StringId> {
        match *self {
            LuaValue::ShortString(id) | LuaValue::LongString(id) => Some(id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_lua_closure(&self) -> Option<LClosureId> {
        match *self {
            LuaValue::LuaClosure(id) => Some(id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_c_closure(&self) -> Option<CClosureId> {
        match *self {
            LuaValue::CClosure(id) => Some(id),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.ttype() {
            LUA_TNIL => "nil",
            LUA_TBOOLEAN => "boolean",
            LUA_TLIGHTUSERDATA | LUA_TUSERDATA => "userdata",
            LUA_TNUMBER => "number",
            LUA_TSTRING => "string",
            LUA_TTABLE => "table",
            LUA_TFUNCTION => "function",
            _ => "thread",
        }
    }
}

/// Raw equality of two cells (no metamethods, no string content compare).
///
/// Short strings are interned, so handle identity is content identity.
/// Long strings compare by handle here; `LuaVM::raw_equal` compares their
/// bytes.
impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::LightUserdata(a), LuaValue::LightUserdata(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
            (LuaValue::Float(a), LuaValue::Float(b)) => a == b,
            (LuaValue::LightCFunction(a), LuaValue::LightCFunction(b)) => {
                a as usize == b as usize
            }
            (LuaValue::ShortString(a), LuaValue::ShortString(b))
            | (LuaValue::LongString(a), LuaValue::LongString(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => a == b,
            (LuaValue::LuaClosure(a), LuaValue::LuaClosure(b)) => a == b,
            (LuaValue::CClosure(a), LuaValue::CClosure(b)) => a == b,
            (LuaValue::Userdata(a), LuaValue::Userdata(b)) => a == b,
            (LuaValue::Thread(a), LuaValue::Thread(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_layout() {
        assert_eq!(LUA_TNUMINT, 0x13);
        assert_eq!(LUA_TLNGSTR, 0x14);
        assert_eq!(LUA_TCCL, 0x26);
        assert_eq!(ctb(LUA_TSHRSTR), 0x44);
        assert_eq!(novariant(ctb(LUA_TLNGSTR)), LUA_TSTRING);
        assert_eq!(withvariant(ctb(LUA_TLNGSTR)), LUA_TLNGSTR);
    }

    #[test]
    fn test_value_size() {
        assert_eq!(std::mem::size_of::<LuaValue>(), 16);
    }
}
