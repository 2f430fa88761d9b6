// Closures, upvalue sharing and closing
use crate::gc::{GcList, GcState, ProtoId, ThreadId};
use crate::lua_value::{LuaValue, Proto, UpvalueDesc};
use crate::lua_vm::{LuaError, LuaResult, LuaVM};
use crate::test::new_vm;

fn native(_: &mut LuaVM) -> LuaResult<usize> {
    Ok(0)
}

fn proto_with(vm: &mut LuaVM, descs: &[(bool, u8)]) -> ProtoId {
    let upvalues = descs
        .iter()
        .map(|&(in_stack, idx)| UpvalueDesc {
            name: None,
            in_stack,
            idx,
        })
        .collect();
    vm.create_proto(Proto {
        upvalues,
        ..Default::default()
    })
    .unwrap()
}

fn open_frame(vm: &mut LuaVM, th: ThreadId, top: usize) {
    vm.thread_mut(th).top = top;
}

#[test]
fn test_closures_share_open_upvalue() {
    let mut vm = new_vm();
    let th = vm.main_thread();
    open_frame(&mut vm, th, 10);
    vm.set_stack(th, 3, LuaValue::Integer(1));
    let p = proto_with(&mut vm, &[(true, 2)]);

    let c1 = vm.push_closure(th, p, 1, None).unwrap();
    let c2 = vm.push_closure(th, p, 1, None).unwrap();
    let uv = vm.closure_upvalue(c1, 0).unwrap();
    assert_eq!(vm.closure_upvalue(c2, 0), Some(uv));
    assert_eq!(vm.upvalue(uv).refcount, 2);
    assert_eq!(vm.upvalue(uv).stack_index(), Some(3));

    // write through one closure, read through the other and the stack
    vm.set_upvalue(uv, LuaValue::Integer(42));
    assert_eq!(vm.get_stack(th, 3), LuaValue::Integer(42));
    let seen = vm.closure_upvalue(c2, 0).unwrap();
    assert_eq!(vm.get_upvalue(seen), LuaValue::Integer(42));

    // and a write to the slot is seen by both
    vm.set_stack(th, 3, LuaValue::Integer(7));
    assert_eq!(vm.get_upvalue(uv), LuaValue::Integer(7));
}

#[test]
fn test_close_keeps_last_value() {
    let mut vm = new_vm();
    let th = vm.main_thread();
    open_frame(&mut vm, th, 10);
    let p = proto_with(&mut vm, &[(true, 2)]);
    let c1 = vm.push_closure(th, p, 1, None).unwrap();
    let c2 = vm.push_closure(th, p, 1, None).unwrap();
    let uv = vm.closure_upvalue(c1, 0).unwrap();
    vm.set_upvalue(uv, LuaValue::Integer(99));

    vm.close_upvals(th, 1);
    assert!(!vm.upvalue(uv).is_open());
    assert_eq!(vm.upvalue(uv).stack_index(), None);
    assert!(vm.thread(th).open_upvalues().is_empty());

    // the old slot is reused; the closed cell is not affected
    vm.set_stack(th, 3, LuaValue::Boolean(false));
    assert_eq!(vm.get_upvalue(uv), LuaValue::Integer(99));
    assert_eq!(vm.get_upvalue(vm.closure_upvalue(c2, 0).unwrap()), LuaValue::Integer(99));

    // closed cell is still shared
    vm.set_upvalue(uv, LuaValue::Integer(100));
    assert_eq!(vm.get_upvalue(vm.closure_upvalue(c2, 0).unwrap()), LuaValue::Integer(100));

    // capturing the same slot again makes a new upvalue
    let c3 = vm.push_closure(th, p, 1, None).unwrap();
    assert_ne!(vm.closure_upvalue(c3, 0), Some(uv));
}

#[test]
fn test_open_list_is_descending() {
    let mut vm = new_vm();
    let th = vm.main_thread();
    open_frame(&mut vm, th, 20);
    for level in [4, 9, 2, 6] {
        vm.find_upval(th, level).unwrap();
    }
    let levels: Vec<_> = vm
        .thread(th)
        .open_upvalues()
        .iter()
        .map(|uv| uv.level)
        .collect();
    assert_eq!(levels, vec![9, 6, 4, 2]);
}

#[test]
fn test_close_inner_scope_before_outer() {
    let mut vm = new_vm();
    let th = vm.main_thread();
    open_frame(&mut vm, th, 20);
    // outer scope A at level 2, inner scope B at level 5
    let p = proto_with(&mut vm, &[(true, 0), (true, 3)]);
    let cl = vm.push_closure(th, p, 2, None).unwrap();
    let a = vm.closure_upvalue(cl, 0).unwrap();
    let b = vm.closure_upvalue(cl, 1).unwrap();
    vm.set_stack(th, 2, LuaValue::Integer(1));
    vm.set_stack(th, 5, LuaValue::Integer(2));

    let order: Vec<_> = vm
        .thread_mut(th)
        .take_open_upvals_from(0)
        .iter()
        .map(|uv| uv.id)
        .collect();
    assert_eq!(order, vec![b, a]);
}

#[test]
fn test_close_stops_below_level() {
    let mut vm = new_vm();
    let th = vm.main_thread();
    open_frame(&mut vm, th, 20);
    let p = proto_with(&mut vm, &[(true, 0), (true, 3)]);
    let cl = vm.push_closure(th, p, 2, None).unwrap();
    let a = vm.closure_upvalue(cl, 0).unwrap();
    let b = vm.closure_upvalue(cl, 1).unwrap();
    vm.set_stack(th, 5, LuaValue::Integer(2));

    vm.close_upvals(th, 3);
    assert!(!vm.upvalue(b).is_open());
    assert!(vm.upvalue(a).is_open());
    assert_eq!(vm.get_upvalue(b), LuaValue::Integer(2));

    vm.close_upvals(th, 2);
    assert!(!vm.upvalue(a).is_open());
}

#[test]
fn test_unreferenced_upvalue_is_freed_on_close() {
    let mut vm = new_vm();
    let th = vm.main_thread();
    open_frame(&mut vm, th, 10);
    let uv = vm.find_upval(th, 7).unwrap();
    assert_eq!(vm.find_upval(th, 7).unwrap(), uv);
    assert_eq!(vm.upvalue(uv).refcount, 0);

    vm.close_upvals(th, 0);
    assert!(!vm.gc().pool().is_valid(uv.gc_ref()));
}

#[test]
fn test_init_upvals_creates_closed_cells() {
    let mut vm = new_vm();
    let p = vm.new_proto().unwrap();
    let cl = vm.new_lua_closure(p, 2).unwrap();
    assert_eq!(vm.closure_upvalue(cl, 0), None);

    vm.init_upvals(cl).unwrap();
    let u0 = vm.closure_upvalue(cl, 0).unwrap();
    let u1 = vm.closure_upvalue(cl, 1).unwrap();
    assert_ne!(u0, u1);
    for uv in [u0, u1] {
        assert!(!vm.upvalue(uv).is_open());
        assert_eq!(vm.upvalue(uv).refcount, 1);
        assert_eq!(vm.get_upvalue(uv), LuaValue::Nil);
    }
}

#[test]
fn test_nested_closure_reuses_enclosing_upvalue() {
    let mut vm = new_vm();
    let th = vm.main_thread();
    open_frame(&mut vm, th, 10);
    let outer = proto_with(&mut vm, &[(true, 1)]);
    let inner = proto_with(&mut vm, &[(false, 0), (true, 0)]);

    let c1 = vm.push_closure(th, outer, 1, None).unwrap();
    let shared = vm.closure_upvalue(c1, 0).unwrap();
    let c2 = vm.push_closure(th, inner, 4, Some(c1)).unwrap();
    assert_eq!(vm.closure_upvalue(c2, 0), Some(shared));
    assert_eq!(vm.upvalue(shared).refcount, 2);
    assert_eq!(vm.upvalue(vm.closure_upvalue(c2, 1).unwrap()).stack_index(), Some(4));
}

#[test]
fn test_freeing_closure_releases_upvalues() {
    let mut vm = new_vm();
    let th = vm.main_thread();
    open_frame(&mut vm, th, 10);

    // closed upvalue whose count drops to zero goes with the closure
    let p = vm.new_proto().unwrap();
    let top_level = vm.new_lua_closure(p, 1).unwrap();
    vm.init_upvals(top_level).unwrap();
    let closed = vm.closure_upvalue(top_level, 0).unwrap();
    vm.free_object(top_level.gc_ref());
    assert!(!vm.gc().pool().is_valid(closed.gc_ref()));

    // an open one stays until its scope closes
    let q = proto_with(&mut vm, &[(true, 0)]);
    let cl = vm.push_closure(th, q, 2, None).unwrap();
    let open = vm.closure_upvalue(cl, 0).unwrap();
    vm.free_object(cl.gc_ref());
    assert!(vm.gc().pool().is_valid(open.gc_ref()));
    assert_eq!(vm.upvalue(open).refcount, 0);
    vm.close_upvals(th, 2);
    assert!(!vm.gc().pool().is_valid(open.gc_ref()));
}

#[test]
fn test_c_closure_upvalues() {
    let mut vm = new_vm();
    let cl = vm.new_c_closure(native, 2).unwrap();
    assert_eq!(vm.get_c_upvalue(cl, 0), LuaValue::Nil);
    let s = vm.create_str("captured").unwrap();
    assert!(vm.set_c_upvalue(cl, 1, s));
    assert_eq!(vm.get_c_upvalue(cl, 1), s);
    assert_eq!(vm.gc().pool().c_closure(cl).nupvalues(), 2);
    assert_eq!(vm.get_c_upvalue(cl, 5), LuaValue::Nil);

    // out of range slots are left alone
    assert!(!vm.set_c_upvalue(cl, 2, LuaValue::Integer(1)));
    assert_eq!(vm.gc().pool().c_closure(cl).nupvalues(), 2);
    assert_eq!(vm.get_c_upvalue(cl, 2), LuaValue::Nil);
}

#[test]
fn test_inherited_upvalue_needs_enclosing_closure() {
    let mut vm = new_vm();
    let th = vm.main_thread();
    open_frame(&mut vm, th, 10);
    let inner = proto_with(&mut vm, &[(false, 0)]);
    let before = vm.gc().pool().len();

    let e = vm.push_closure(th, inner, 1, None).unwrap_err();
    assert_eq!(e, LuaError::RuntimeError);
    assert_eq!(vm.get_error_msg(e), "upvalue 0 needs an enclosing closure");

    // the enclosing closure exists but has fewer upvalues
    let outer = proto_with(&mut vm, &[(true, 0)]);
    let parent = vm.push_closure(th, outer, 1, None).unwrap();
    let deeper = proto_with(&mut vm, &[(false, 3)]);
    let count = vm.gc().pool().len();
    let e = vm.push_closure(th, deeper, 4, Some(parent)).unwrap_err();
    assert_eq!(vm.get_error_msg(e), "enclosing closure has no upvalue 3");
    assert_eq!(vm.gc().pool().len(), count);
    assert!(before < count);
}

#[test]
fn test_close_runs_upvalue_barrier() {
    let mut vm = new_vm();
    let th = vm.main_thread();
    open_frame(&mut vm, th, 10);
    let t = vm.create_table(0).unwrap();
    let p = proto_with(&mut vm, &[(true, 0)]);
    let _cl = vm.push_closure(th, p, 3, None).unwrap();
    vm.set_stack(th, 3, LuaValue::Table(t));

    vm.gc_mut().gc_state = GcState::Propagate;
    vm.close_upvals(th, 3);
    assert!(vm.gc().header(t.gc_ref()).is_gray());
    assert_eq!(vm.gc().gray, vec![t.gc_ref()]);
}

#[test]
fn test_open_upvalue_registry() {
    let mut vm = new_vm();
    let co = vm.new_thread().unwrap();
    open_frame(&mut vm, co, 10);
    assert_eq!(vm.threads_with_open_upvalues().count(), 0);

    vm.find_upval(co, 3).unwrap();
    vm.find_upval(co, 4).unwrap();
    assert_eq!(vm.threads_with_open_upvalues().collect::<Vec<_>>(), vec![co]);

    vm.close_upvals(co, 0);
    vm.prune_twups();
    assert_eq!(vm.threads_with_open_upvalues().count(), 0);
}

#[test]
fn test_freeing_thread_closes_its_upvalues() {
    let mut vm = new_vm();
    let co = vm.new_thread().unwrap();
    open_frame(&mut vm, co, 10);
    let p = proto_with(&mut vm, &[(true, 0)]);
    let cl = vm.push_closure(co, p, 5, None).unwrap();
    let uv = vm.closure_upvalue(cl, 0).unwrap();
    vm.set_stack(co, 5, LuaValue::Integer(55));
    assert_eq!(vm.gc().list_of(co.gc_ref()), GcList::AllGc);

    vm.free_object(co.gc_ref());
    assert!(!vm.upvalue(uv).is_open());
    assert_eq!(vm.get_upvalue(uv), LuaValue::Integer(55));
    assert_eq!(vm.threads_with_open_upvalues().count(), 0);
}
