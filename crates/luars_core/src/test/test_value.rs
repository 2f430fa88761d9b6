// Tagged value model and liveness checks
use crate::gc::{GcId, StringId};
use crate::lua_value::*;
use crate::lua_vm::{CFunction, LuaResult, LuaVM};
use crate::test::new_vm;

fn noop(_: &mut LuaVM) -> LuaResult<usize> {
    Ok(0)
}

#[test]
fn test_tags_follow_variants() {
    assert_eq!(LuaValue::Integer(1).tt(), LUA_TNUMINT);
    assert_eq!(LuaValue::Float(1.0).tt(), LUA_TNUMFLT);
    assert_eq!(LuaValue::LightCFunction(noop).tt(), LUA_TLCF);
    assert_eq!(LuaValue::ShortString(StringId(0)).tt(), ctb(LUA_TSHRSTR));
    assert_eq!(LuaValue::LongString(StringId(0)).ttype(), LUA_TSTRING);
    assert_eq!(LuaValue::Boolean(false).ttype(), LUA_TBOOLEAN);
}

#[test]
fn test_collectable_is_derived() {
    assert!(!LuaValue::Nil.is_collectable());
    assert!(!LuaValue::LightUserdata(0xdead).is_collectable());
    assert!(!LuaValue::LightCFunction(noop).is_collectable());
    let s = LuaValue::ShortString(StringId(3));
    assert!(s.is_collectable());
    assert_eq!(s.tt() & BIT_ISCOLLECTABLE, BIT_ISCOLLECTABLE);
    assert_eq!(s.gc_id(), Some(GcId::StringId(StringId(3))));
    assert_eq!(LuaValue::Integer(3).tt() & BIT_ISCOLLECTABLE, 0);
}

#[test]
fn test_raw_equality() {
    assert_eq!(LuaValue::Integer(3), LuaValue::Integer(3));
    assert_ne!(LuaValue::Integer(3), LuaValue::Float(3.0));
    assert_ne!(LuaValue::Float(f64::NAN), LuaValue::Float(f64::NAN));
    let f: CFunction = noop;
    assert_eq!(LuaValue::LightCFunction(f), LuaValue::LightCFunction(f));
    assert_ne!(LuaValue::Nil, LuaValue::Boolean(false));
}

#[test]
fn test_falsy() {
    assert!(LuaValue::Nil.is_falsy());
    assert!(LuaValue::Boolean(false).is_falsy());
    assert!(!LuaValue::Integer(0).is_falsy());
    assert!(!LuaValue::Boolean(true).is_falsy());
}

#[test]
fn test_liveness_of_fresh_objects() {
    let mut vm = new_vm();
    let s = vm.create_str("alive").unwrap();
    let t = LuaValue::Table(vm.create_table(0).unwrap());
    assert!(vm.check_liveness(&s));
    assert!(vm.check_liveness(&t));
    assert!(vm.check_liveness(&LuaValue::Integer(1)));
}

#[test]
fn test_liveness_rejects_wrong_tag() {
    let mut vm = new_vm();
    let id = vm.create_str("short").unwrap().as_string_id().unwrap();
    assert!(!vm.check_liveness(&LuaValue::LongString(id)));
}

#[test]
fn test_liveness_rejects_dead_and_freed() {
    let mut vm = new_vm();
    let s = vm.create_str("doomed").unwrap();
    vm.gc_mut().flip_white();
    assert!(!vm.check_liveness(&s));

    let t = vm.create_table(0).unwrap();
    vm.free_object(t.gc_ref());
    assert!(!vm.check_liveness(&LuaValue::Table(t)));
}
