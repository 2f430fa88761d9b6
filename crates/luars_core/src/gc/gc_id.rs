// ============ Object IDs ============
// All IDs are u32 slot indices into the single object arena.
// A typed ID only promises what kind of object the slot held when the
// ID was minted; the arena checks it again on every downcast.

/// Untyped handle to an arena slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
#[repr(transparent)]
pub struct GcRef(pub u32);

impl GcRef {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

macro_rules! typed_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
            #[repr(transparent)]
            pub struct $name(pub u32);

            impl $name {
                #[inline(always)]
                pub fn gc_ref(self) -> GcRef {
                    GcRef(self.0)
                }
            }

            impl From<$name> for GcRef {
                #[inline(always)]
                fn from(id: $name) -> GcRef {
                    GcRef(id.0)
                }
            }
        )*
    };
}

typed_id!(
    /// Short or long string
    StringId,
    UserdataId,
    TableId,
    /// Function prototype
    ProtoId,
    /// Interpreted (Lua) closure
    LClosureId,
    /// Native closure with inline captured values
    CClosureId,
    ThreadId,
    UpvalueId,
);

/// Object type tags stored in the arena.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcType {
    String = 0,
    Userdata = 1,
    Table = 2,
    Proto = 3,
    LuaClosure = 4,
    CClosure = 5,
    Thread = 6,
    Upvalue = 7,
}

/// Unified GC object identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcId {
    StringId(StringId),
    UserdataId(UserdataId),
    TableId(TableId),
    ProtoId(ProtoId),
    LClosureId(LClosureId),
    CClosureId(CClosureId),
    ThreadId(ThreadId),
    UpvalueId(UpvalueId),
}

impl GcId {
    #[inline(always)]
    pub fn gc_type(self) -> GcType {
        match self {
            GcId::StringId(_) => GcType::String,
            GcId::UserdataId(_) => GcType::Userdata,
            GcId::TableId(_) => GcType::Table,
            GcId::ProtoId(_) => GcType::Proto,
            GcId::LClosureId(_) => GcType::LuaClosure,
            GcId::CClosureId(_) => GcType::CClosure,
            GcId::ThreadId(_) => GcType::Thread,
            GcId::UpvalueId(_) => GcType::Upvalue,
        }
    }

    #[inline(always)]
    pub fn gc_ref(self) -> GcRef {
        match self {
            GcId::StringId(StringId(id))
            | GcId::UserdataId(UserdataId(id))
            | GcId::TableId(TableId(id))
            | GcId::ProtoId(ProtoId(id))
            | GcId::LClosureId(LClosureId(id))
            | GcId::CClosureId(CClosureId(id))
            | GcId::ThreadId(ThreadId(id))
            | GcId::UpvalueId(UpvalueId(id)) => GcRef(id),
        }
    }

    #[inline(always)]
    pub fn index(self) -> u32 {
        self.gc_ref().0
    }
}
