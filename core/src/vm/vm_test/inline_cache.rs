use super::*;

/// f(obj) = obj.x, through one compiled get_field site.
fn getter_fun() -> Obj {
    let entry = block(vec![
        get_local(0),
        push(s("x")),
        instr("get_field"),
        instr("ret"),
    ]);
    fun(1, 2, &entry)
}

#[test]
fn test_field_ic_hits_on_stable_layout() {
    let f = getter_fun();
    let obj = Obj::new();
    obj.set_field("x", int(1));

    let mut interp = Interp::new();
    assert_eq!(interp.call_fun(&f, &[Val::Obj(obj.clone())]).unwrap(), int(1));
    obj.set_field("x", int(9));
    assert_eq!(interp.call_fun(&f, &[Val::Obj(obj)]).unwrap(), int(9));
}

#[test]
fn test_field_ic_recovers_across_layouts() {
    // Same site, two objects whose "x" lives in different slots: the cache
    // must miss and rescan, not serve the stale slot.
    let f = getter_fun();

    let a = Obj::new();
    a.set_field("x", int(1));

    let b = Obj::new();
    b.set_field("filler", int(9));
    b.set_field("x", int(2));

    let mut interp = Interp::new();
    assert_eq!(interp.call_fun(&f, &[Val::Obj(a.clone())]).unwrap(), int(1));
    assert_eq!(interp.call_fun(&f, &[Val::Obj(b)]).unwrap(), int(2));
    // And back again.
    assert_eq!(interp.call_fun(&f, &[Val::Obj(a)]).unwrap(), int(1));
}

#[test]
fn test_call_ic_rebinds_when_callee_changes() {
    // caller(f) = f(), one call site fed two different functions.
    let after = block(vec![instr("ret")]);
    let entry = block(vec![get_local(0), call(0, &after)]);
    let caller = fun(1, 2, &entry);

    let f1 = fun(0, 1, &block(vec![push(int(11)), instr("ret")]));
    let f2 = fun(0, 1, &block(vec![push(int(22)), instr("ret")]));

    let mut interp = Interp::new();
    assert_eq!(interp.call_fun(&caller, &[Val::Obj(f1.clone())]).unwrap(), int(11));
    assert_eq!(interp.call_fun(&caller, &[Val::Obj(f2)]).unwrap(), int(22));
    assert_eq!(interp.call_fun(&caller, &[Val::Obj(f1)]).unwrap(), int(11));
}

#[test]
fn test_call_ic_does_not_recompile_warm_callee() {
    let after = block(vec![instr("ret")]);
    let entry = block(vec![get_local(0), call(0, &after)]);
    let caller = fun(1, 2, &entry);
    let callee = fun(0, 1, &block(vec![push(int(5)), instr("ret")]));

    let mut interp = Interp::new();
    assert_eq!(
        interp.call_fun(&caller, &[Val::Obj(callee.clone())]).unwrap(),
        int(5)
    );
    let size = interp.code_size();
    for _ in 0..3 {
        assert_eq!(
            interp.call_fun(&caller, &[Val::Obj(callee.clone())]).unwrap(),
            int(5)
        );
    }
    assert_eq!(interp.code_size(), size);
}

#[test]
fn test_single_char_strings_are_interned() {
    let via_get_char = || {
        vec![
            push(s("A")),
            push(int(0)),
            instr("get_char"),
            instr("ret"),
        ]
    };

    let mut interp = Interp::new();
    let f = fun(0, 1, &block(via_get_char()));
    let first = interp.call_fun(&f, &[]).unwrap();
    let second = interp.call_fun(&f, &[]).unwrap();

    let g = fun(
        0,
        1,
        &block(vec![push(int(65)), instr("char_to_str"), instr("ret")]),
    );
    let third = interp.call_fun(&g, &[]).unwrap();

    match (first, second, third) {
        (Val::Str(a), Val::Str(b), Val::Str(c)) => {
            assert_eq!(a, Str::from("A"));
            assert!(a.ptr_eq(&b));
            assert!(a.ptr_eq(&c));
        }
        other => panic!("expected strings, got {:?}", other),
    }
}

#[test]
fn test_named_field_ics_tolerate_differing_function_layouts() {
    // Function objects with their recognized fields in different slot
    // orders; the per-name compile-time caches must rescan on miss.
    let e1 = block(vec![push(int(1)), instr("ret")]);
    let f1 = Obj::new();
    f1.set_field("entry", Val::Obj(e1));
    f1.set_field("params", Val::Arr(Arr::new(0)));
    f1.set_field("num_locals", int(1));

    let e2 = block(vec![push(int(2)), instr("ret")]);
    let f2 = Obj::new();
    f2.set_field("num_locals", int(1));
    f2.set_field("doc", s("reordered layout"));
    f2.set_field("params", Val::Arr(Arr::new(0)));
    f2.set_field("entry", Val::Obj(e2));

    let mut interp = Interp::new();
    assert_eq!(interp.call_fun(&f1, &[]).unwrap(), int(1));
    assert_eq!(interp.call_fun(&f2, &[]).unwrap(), int(2));
    assert_eq!(interp.call_fun(&f1, &[]).unwrap(), int(1));
}
