pub mod test_closures;
pub mod test_string;
pub mod test_value;

use crate::lua_vm::{LuaVM, SafeOption};

/// VM with a fixed hash seed so runs are reproducible
pub(crate) fn new_vm() -> LuaVM {
    let option = SafeOption {
        hash_seed: Some(0x2545_f491),
        ..SafeOption::default()
    };
    LuaVM::new(option).unwrap()
}
