// ============ GC Header ============

use crate::gc::GcRef;
use crate::lua_value::{
    CClosure, LuaClosure, LuaString, LuaTable, LuaUserdata, Proto, Upvalue, LUA_TCCL, LUA_TLCL,
    LUA_TLNGSTR, LUA_TPROTO, LUA_TSHRSTR, LUA_TTABLE, LUA_TTHREAD, LUA_TUPVAL, LUA_TUSERDATA,
};
use crate::lua_vm::LuaState;

use super::GcType;

// ============ GC Constants (lgc.h) ============
// Object ages for generational GC, bits 0-2 of the marked field
pub const G_NEW: u8 = 0; // Created in current cycle
pub const G_SURVIVAL: u8 = 1; // Created in previous cycle
pub const G_OLD0: u8 = 2; // Marked old by forward barrier in this cycle
pub const G_OLD1: u8 = 3; // First full cycle as old
pub const G_OLD: u8 = 4; // Really old object
pub const G_TOUCHED1: u8 = 5; // Old object touched this cycle
pub const G_TOUCHED2: u8 = 6; // Old object touched in previous cycle

// Color bit positions in marked field
pub const WHITE0BIT: u8 = 3;
pub const WHITE1BIT: u8 = 4;
pub const BLACKBIT: u8 = 5;
pub const FINALIZEDBIT: u8 = 6;

// Bit masks
pub const WHITEBITS: u8 = (1 << WHITE0BIT) | (1 << WHITE1BIT);
pub const AGEBITS: u8 = 0x07;
pub const MASKCOLORS: u8 = (1 << BLACKBIT) | WHITEBITS;

/// GC object header - embedded in every arena slot
///
/// Bit layout of `marked` field:
/// - Bits 0-2: Age (G_NEW .. G_TOUCHED2)
/// - Bit 3: WHITE0
/// - Bit 4: WHITE1
/// - Bit 5: BLACK
/// - Bit 6: FINALIZEDBIT
///
/// Gray is implicit: no white bits and no black bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcHeader {
    pub marked: u8,
    /// Bytes charged to the allocator for this object
    pub size: usize,
}

impl GcHeader {
    /// New header painted with the current white and age G_NEW
    #[inline(always)]
    pub fn with_white(current_white: u8, size: usize) -> Self {
        debug_assert!(
            current_white == 0 || current_white == 1,
            "current_white must be 0 or 1"
        );
        GcHeader {
            marked: (1 << (WHITE0BIT + current_white)) | G_NEW,
            size,
        }
    }

    #[inline(always)]
    pub fn age(&self) -> u8 {
        self.marked & AGEBITS
    }

    #[inline(always)]
    pub fn set_age(&mut self, age: u8) {
        debug_assert!(age <= G_TOUCHED2, "Invalid age value");
        self.marked = (self.marked & !AGEBITS) | (age & AGEBITS);
    }

    #[inline(always)]
    pub fn is_old(&self) -> bool {
        self.age() > G_SURVIVAL
    }

    #[inline(always)]
    pub fn is_white(&self) -> bool {
        (self.marked & WHITEBITS) != 0
    }

    #[inline(always)]
    pub fn is_black(&self) -> bool {
        (self.marked & (1 << BLACKBIT)) != 0
    }

    #[inline(always)]
    pub fn is_gray(&self) -> bool {
        (self.marked & MASKCOLORS) == 0
    }

    #[inline(always)]
    pub fn to_finalize(&self) -> bool {
        (self.marked & (1 << FINALIZEDBIT)) != 0
    }

    #[inline(always)]
    pub fn set_finalized(&mut self) {
        self.marked |= 1 << FINALIZEDBIT;
    }

    /// Fixed objects stay gray and old forever (luaC_fix)
    #[inline(always)]
    pub fn is_fixed(&self) -> bool {
        self.age() == G_OLD && self.is_gray()
    }

    #[inline(always)]
    pub fn set_fixed(&mut self) {
        self.make_gray();
        self.set_age(G_OLD);
    }

    /// Paint with the given white, keeping age bits (makewhite)
    #[inline(always)]
    pub fn make_white(&mut self, current_white: u8) {
        debug_assert!(
            current_white == 0 || current_white == 1,
            "current_white must be 0 or 1"
        );
        self.marked = (self.marked & !MASKCOLORS) | (1 << (WHITE0BIT + current_white));
    }

    #[inline(always)]
    pub fn make_gray(&mut self) {
        self.marked &= !MASKCOLORS;
    }

    #[inline(always)]
    pub fn make_black(&mut self) {
        self.marked = (self.marked & !WHITEBITS) | (1 << BLACKBIT);
    }

    /// Dead means painted with the white that is not current (isdeadm)
    #[inline(always)]
    pub fn is_dead(&self, other_white: u8) -> bool {
        debug_assert!(
            other_white == 0 || other_white == 1,
            "other_white must be 0 or 1"
        );
        (self.marked & (1 << (WHITE0BIT + other_white))) != 0
    }

    #[inline(always)]
    pub fn otherwhite(current_white: u8) -> u8 {
        current_white ^ 1
    }

    /// Flip between WHITE0 and WHITE1 (changewhite)
    #[inline(always)]
    pub fn change_white(&mut self) {
        self.marked ^= WHITEBITS;
    }
}

/// Owning list an object currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcList {
    /// All ordinary objects (allgc)
    AllGc = 0,
    /// Objects with a finalizer not yet separated (finobj)
    FinObj = 1,
    /// Objects separated for finalization (tobefnz)
    ToBeFnz = 2,
    /// Objects never collected (fixedgc)
    Fixed = 3,
}

impl GcList {
    pub const ALL: [GcList; 4] = [GcList::AllGc, GcList::FinObj, GcList::ToBeFnz, GcList::Fixed];
}

/// Payload of an arena slot.
pub enum GcBody {
    String(LuaString),
    Userdata(LuaUserdata),
    Table(LuaTable),
    Proto(Box<Proto>),
    LuaClosure(LuaClosure),
    CClosure(CClosure),
    Thread(Box<LuaState>),
    Upvalue(Upvalue),
}

impl GcBody {
    pub fn gc_type(&self) -> GcType {
        match self {
            GcBody::String(_) => GcType::String,
            GcBody::Userdata(_) => GcType::Userdata,
            GcBody::Table(_) => GcType::Table,
            GcBody::Proto(_) => GcType::Proto,
            GcBody::LuaClosure(_) => GcType::LuaClosure,
            GcBody::CClosure(_) => GcType::CClosure,
            GcBody::Thread(_) => GcType::Thread,
            GcBody::Upvalue(_) => GcType::Upvalue,
        }
    }

    /// Stored type tag (base + variant bits), compared against a value's tag
    /// by the liveness check.
    pub fn tt(&self) -> u8 {
        match self {
            GcBody::String(s) if s.is_short() => LUA_TSHRSTR,
            GcBody::String(_) => LUA_TLNGSTR,
            GcBody::Userdata(_) => LUA_TUSERDATA,
            GcBody::Table(_) => LUA_TTABLE,
            GcBody::Proto(_) => LUA_TPROTO,
            GcBody::LuaClosure(_) => LUA_TLCL,
            GcBody::CClosure(_) => LUA_TCCL,
            GcBody::Thread(_) => LUA_TTHREAD,
            GcBody::Upvalue(_) => LUA_TUPVAL,
        }
    }
}

/// One arena slot: header, intrusive links of its owning list, payload.
pub struct GcObject {
    pub header: GcHeader,
    pub list: GcList,
    pub(crate) prev: Option<GcRef>,
    pub(crate) next: Option<GcRef>,
    pub body: GcBody,
}
