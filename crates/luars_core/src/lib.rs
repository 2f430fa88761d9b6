// Lua Runtime Core
// Value model, GC object graph, string interning, closures and
// coroutine state for a Lua 5.3 VM

#[cfg(test)]
mod test;

pub mod gc;
pub mod lua_value;
pub mod lua_vm;

pub use gc::*;
pub use lua_value::{LuaString, LuaValue, Proto};
pub use lua_vm::{CFunction, LuaError, LuaResult, LuaState, LuaVM, SafeOption};
