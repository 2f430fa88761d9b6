// String interning table
use proptest::prelude::*;

use crate::gc::{RESERVED_WORDS, StringInterner};
use crate::lua_value::LuaValue;
use crate::lua_vm::lua_limits::{LUAI_MAXSHORTLEN, MINSTRTABSIZE};
use crate::lua_vm::{LuaError, LuaVM, SafeOption};
use crate::test::new_vm;

const LONG_LITERAL: &str = "a literal that is clearly longer than the short string limit";

fn id_of(v: LuaValue) -> crate::gc::StringId {
    v.as_string_id().unwrap()
}

#[test]
fn test_short_strings_are_interned() {
    let mut vm = new_vm();
    let a = vm.create_str("hello").unwrap();
    let b = vm.create_string(b"hello").unwrap();
    assert!(matches!(a, LuaValue::ShortString(_)));
    assert_eq!(a, b);
    assert_ne!(a, vm.create_str("hellO").unwrap());
}

#[test]
fn test_threshold_between_short_and_long() {
    let mut vm = new_vm();
    let at_limit = vec![b'x'; LUAI_MAXSHORTLEN];
    let over = vec![b'x'; LUAI_MAXSHORTLEN + 1];
    assert!(matches!(vm.create_string(&at_limit).unwrap(), LuaValue::ShortString(_)));
    assert!(matches!(vm.create_string(&over).unwrap(), LuaValue::LongString(_)));
}

#[test]
fn test_long_strings_compare_by_content() {
    let mut vm = new_vm();
    let text = "x".repeat(100);
    let a = vm.create_str(&text).unwrap();
    let b = vm.create_str(&text).unwrap();
    let c = vm.create_str(&"y".repeat(100)).unwrap();
    let d = vm.create_str(&"x".repeat(101)).unwrap();
    assert_ne!(id_of(a), id_of(b));
    assert!(vm.eq_long_string(id_of(a), id_of(b)));
    assert!(vm.raw_equal(&a, &b));
    assert!(!vm.raw_equal(&a, &c));
    assert!(!vm.raw_equal(&a, &d));
    assert!(!vm.strings_equal(id_of(a), id_of(c)));
}

#[test]
fn test_long_string_hash_is_lazy() {
    let mut vm = new_vm();
    let a = id_of(vm.create_str(&"h".repeat(64)).unwrap());
    let b = id_of(vm.create_str(&"h".repeat(64)).unwrap());
    assert!(!vm.string(a).has_hash());
    let h = vm.string_hash(a);
    assert!(vm.string(a).has_hash());
    assert!(!vm.string(b).has_hash());
    assert_eq!(vm.string_hash(b), h);
    assert_eq!(vm.string_hash(a), h);
}

#[test]
fn test_table_grows_when_full() {
    let mut vm = new_vm();
    assert_eq!(vm.strings().size(), MINSTRTABSIZE);
    let base = vm.strings().nuse();
    let ids: Vec<_> = (0..200)
        .map(|i| vm.create_str(&format!("s{}", i)).unwrap())
        .collect();
    assert_eq!(vm.strings().nuse(), base + 200);
    assert_eq!(vm.strings().size(), 2 * MINSTRTABSIZE);
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(vm.create_str(&format!("s{}", i)).unwrap(), *id);
    }
}

#[test]
fn test_dead_string_is_resurrected() {
    let mut vm = new_vm();
    let a = vm.create_str("phoenix").unwrap();
    let r = id_of(a).gc_ref();
    vm.gc_mut().flip_white();
    assert!(vm.gc().is_dead(r));
    let b = vm.create_str("phoenix").unwrap();
    assert_eq!(a, b);
    assert!(!vm.gc().is_dead(r));
    assert!(vm.check_liveness(&b));
}

#[test]
fn test_remove_on_free() {
    let mut vm = new_vm();
    let a = vm.create_str("transient").unwrap();
    let nuse = vm.strings().nuse();
    vm.free_object(id_of(a).gc_ref());
    assert_eq!(vm.strings().nuse(), nuse - 1);
    let all = vm.strings().iter(vm.gc());
    assert!(all.iter().all(|&id| vm.string_bytes(id) != b"transient"));

    let b = vm.create_str("transient").unwrap();
    assert!(vm.check_liveness(&b));
    assert_eq!(vm.strings().nuse(), nuse);
}

#[test]
fn test_reserved_words() {
    let mut vm = new_vm();
    for (i, word) in RESERVED_WORDS.iter().enumerate() {
        let id = id_of(vm.create_str(word).unwrap());
        assert_eq!(vm.string(id).reserved_index(), Some(i));
        assert!(vm.gc().header(id.gc_ref()).is_fixed());
    }
    let id = id_of(vm.create_str("print").unwrap());
    assert_eq!(vm.string(id).reserved_index(), None);
}

#[test]
fn test_memory_message_is_pinned() {
    let mut vm = new_vm();
    let msg = vm.strings().memerrmsg().unwrap();
    assert_eq!(vm.string_bytes(msg), b"not enough memory");
    vm.gc_mut().flip_white();
    assert!(!vm.gc().is_dead(msg.gc_ref()));
    assert_eq!(id_of(vm.create_str("not enough memory").unwrap()), msg);
}

#[test]
fn test_literal_cache_memoizes_long_literals() {
    let mut vm = new_vm();
    let a = vm.create_literal(LONG_LITERAL).unwrap();
    let b = vm.create_literal(LONG_LITERAL).unwrap();
    assert!(matches!(a, LuaValue::LongString(_)));
    assert_eq!(a, b);
    assert!(vm.strings().cached_literals().any(|id| Some(id) == a.as_string_id()));

    let c = vm.create_str(LONG_LITERAL).unwrap();
    assert_ne!(a, c);
    assert!(vm.raw_equal(&a, &c));
}

#[test]
fn test_clear_cache_drops_white_entries() {
    let mut vm = new_vm();
    let a = vm.create_literal(LONG_LITERAL).unwrap();
    vm.clear_string_cache();
    let msg = vm.strings().memerrmsg().unwrap();
    assert!(vm.strings().cached_literals().all(|id| id == msg));
    let b = vm.create_literal(LONG_LITERAL).unwrap();
    assert_ne!(a, b);
}

#[test]
fn test_clear_cache_keeps_marked_entries() {
    let mut vm = new_vm();
    let a = vm.create_literal(LONG_LITERAL).unwrap();
    vm.gc_mut().header_mut(id_of(a).gc_ref()).make_black();
    vm.clear_string_cache();
    assert_eq!(vm.create_literal(LONG_LITERAL).unwrap(), a);
}

#[test]
fn test_short_literal_matches_interned() {
    let mut vm = new_vm();
    let a = vm.create_literal("__index").unwrap();
    assert_eq!(a, vm.create_str("__index").unwrap());
}

#[test]
fn test_resize_rounds_to_valid_size() {
    let mut vm = new_vm();
    let words = vm.strings().nuse();
    vm.resize_string_table(0);
    assert_eq!(vm.strings().size(), MINSTRTABSIZE);
    vm.resize_string_table(300);
    assert_eq!(vm.strings().size(), 512);
    assert_eq!(vm.strings().nuse(), words);
    assert_eq!(
        vm.create_literal("while").unwrap().as_string_id(),
        vm.create_str("while").unwrap().as_string_id()
    );
}

#[test]
fn test_check_size_shrinks_sparse_table() {
    let option = SafeOption {
        string_table_size: 1024,
        hash_seed: Some(1),
        ..SafeOption::default()
    };
    let mut vm = LuaVM::new(option).unwrap();
    let before = vm.strings().iter(vm.gc());
    vm.check_string_table_size();
    assert_eq!(vm.strings().size(), 512);
    vm.check_string_table_size();
    vm.check_string_table_size();
    assert_eq!(vm.strings().size(), MINSTRTABSIZE);
    vm.check_string_table_size();
    assert_eq!(vm.strings().size(), MINSTRTABSIZE);
    let mut after = vm.strings().iter(vm.gc());
    let mut before = before;
    before.sort_by_key(|id| id.0);
    after.sort_by_key(|id| id.0);
    assert_eq!(before, after);
}

#[test]
fn test_size_limit() {
    assert_eq!(
        StringInterner::check_long_len(usize::MAX),
        Err(LuaError::SizeExceeded)
    );
    assert!(StringInterner::check_long_len(1 << 20).is_ok());
}

proptest! {
    #[test]
    fn prop_intern_identity(bytes in proptest::collection::vec(any::<u8>(), 0..=LUAI_MAXSHORTLEN)) {
        let mut vm = new_vm();
        let a = vm.create_string(&bytes).unwrap();
        let b = vm.create_string(&bytes).unwrap();
        prop_assert!(matches!(a, LuaValue::ShortString(_)));
        prop_assert_eq!(a, b);
        prop_assert_eq!(vm.string_bytes(id_of(a)), &bytes[..]);
    }

    #[test]
    fn prop_resize_round_trip(keys in proptest::collection::hash_set("[a-z0-9]{1,16}", 1..300)) {
        let mut vm = new_vm();
        let ids: Vec<_> = keys
            .iter()
            .map(|k| (k.clone(), vm.create_str(k).unwrap()))
            .collect();
        let nuse = vm.strings().nuse();

        vm.resize_string_table(4096);
        prop_assert_eq!(vm.strings().size(), 4096);
        vm.resize_string_table(MINSTRTABSIZE);
        prop_assert_eq!(vm.strings().size(), MINSTRTABSIZE);

        prop_assert_eq!(vm.strings().nuse(), nuse);
        prop_assert_eq!(vm.strings().iter(vm.gc()).len(), nuse);
        for (k, id) in ids {
            prop_assert_eq!(vm.create_str(&k).unwrap(), id);
        }
        prop_assert_eq!(vm.strings().nuse(), nuse);
    }
}
