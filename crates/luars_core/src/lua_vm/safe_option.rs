use crate::lua_vm::lua_limits::{LUAI_MAXCCALLS, LUAI_MAXSTACK, MINSTRTABSIZE};

#[derive(Debug, Clone)]
pub struct SafeOption {
    pub max_stack_size: usize,
    /// Maximum number of call-info nodes a single coroutine may chain.
    pub max_call_depth: usize,
    /// Maximum memory limit in bytes
    pub max_memory_limit: isize,
    /// Initial bucket count of the string table (power of 2).
    pub string_table_size: usize,
    /// Fixed hash seed. `None` draws a random one per VM.
    pub hash_seed: Option<u32>,
}

impl Default for SafeOption {
    fn default() -> Self {
        Self {
            max_stack_size: LUAI_MAXSTACK,
            max_call_depth: LUAI_MAXCCALLS,
            max_memory_limit: isize::MAX,
            string_table_size: MINSTRTABSIZE,
            hash_seed: None,
        }
    }
}
