use crate::gc::TableId;
use crate::lua_value::LuaValue;

/// Tables only take part here as GC objects: they can own values,
/// carry a metatable, and act as barrier targets.
#[derive(Default)]
pub struct LuaTable {
    array: Vec<LuaValue>,
    pub metatable: Option<TableId>,
}

impl LuaTable {
    pub fn new(array_size: usize) -> Self {
        Self {
            array: vec![LuaValue::Nil; array_size],
            metatable: None,
        }
    }

    /// 1-based raw read of the array part
    pub fn get_int(&self, key: i64) -> LuaValue {
        if key >= 1 {
            self.array.get(key as usize - 1).copied().unwrap_or_default()
        } else {
            LuaValue::Nil
        }
    }

    /// 1-based raw write; grows the array part by one at the border
    pub fn set_int(&mut self, key: i64, value: LuaValue) -> bool {
        if key < 1 {
            return false;
        }
        let idx = key as usize - 1;
        if idx < self.array.len() {
            self.array[idx] = value;
            true
        } else if idx == self.array.len() {
            self.array.push(value);
            true
        } else {
            false
        }
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &LuaValue> {
        self.array.iter()
    }
}
