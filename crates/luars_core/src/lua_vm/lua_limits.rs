//! Centralized Lua VM limits and configuration constants.
//!
//! Mirrors Lua 5.3's `luaconf.h` / `llimits.h`. All magic numbers that
//! control object sizes, stack growth and string handling live here.

// ===== Stack =====

/// Extra stack slots above the frame top for temporaries.
/// Matches Lua 5.3's EXTRA_STACK (5).
pub const EXTRA_STACK: usize = 5;

/// Minimum guaranteed stack slots available to C functions.
pub const LUA_MINSTACK: usize = 20;

/// Initial stack capacity for new Lua states (2 × LUA_MINSTACK).
pub const BASIC_STACK_SIZE: usize = 2 * LUA_MINSTACK;

/// Default maximum stack size (number of slots).
pub const LUAI_MAXSTACK: usize = 1_000_000;

/// Default maximum nesting of C calls and call-info nodes.
/// Matches Lua 5.3's LUAI_MAXCCALLS.
pub const LUAI_MAXCCALLS: usize = 200;

// ===== Sizes =====

/// Largest object size representable by the allocator (Lua's MAX_SIZE).
pub const MAX_SIZE: usize = if (usize::MAX as u128) < (i64::MAX as u128) {
    usize::MAX
} else {
    i64::MAX as usize
};

/// Largest value of a C `int`, bounds the string table growth.
pub const MAX_INT: usize = i32::MAX as usize;

// ===== Strings =====

/// Maximum length for "short" strings (interned in the string table).
pub const LUAI_MAXSHORTLEN: usize = 40;

/// log2 of the number of bytes the string hash samples at most.
/// A string of length `l` is hashed with a stride of `(l >> LUAI_HASHLIMIT) + 1`.
pub const LUAI_HASHLIMIT: u32 = 5;

/// Minimum size of the string table (must be a power of 2).
pub const MINSTRTABSIZE: usize = 128;

/// Rows of the API literal cache.
pub const STRCACHE_N: usize = 53;

/// Entries per row of the API literal cache.
pub const STRCACHE_M: usize = 2;

/// Message used for memory errors. Pre-created so it never needs allocating.
pub const MEMERRMSG: &str = "not enough memory";

/// Fixed-size header cost of a string object, used for size accounting and
/// the long-string size check.
pub const STRING_HEADER_SIZE: usize = 24;

// ===== Functions =====

/// Maximum number of upvalues in a closure (both C and Lua).
/// Matches Lua 5.3's MAXUPVAL.
pub const MAXUPVAL: usize = 255;

// ===== Metatables =====

/// Number of basic types that carry a per-type metatable (LUA_NUMTAGS).
pub const LUA_NUMTAGS: usize = 9;
