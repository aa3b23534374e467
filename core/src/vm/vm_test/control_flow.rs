use super::*;

/// Counter loop: local 1 counts down from `n` to 0.
fn countdown_fun(n: i32) -> Obj {
    let entry = bb();
    let head = bb();
    let body = bb();
    let done = bb();

    set_instrs(&entry, vec![push(int(n)), set_local(1), jump(&head)]);
    set_instrs(
        &head,
        vec![get_local(1), push(int(0)), instr("gt_i32"), if_true(&body, &done)],
    );
    set_instrs(
        &body,
        vec![
            get_local(1),
            push(int(1)),
            instr("sub_i32"),
            set_local(1),
            jump(&head),
        ],
    );
    set_instrs(&done, vec![get_local(1), instr("ret")]);

    fun(0, 2, &entry)
}

#[test]
fn test_counting_loop_returns_zero() {
    let f = countdown_fun(10);
    let mut interp = Interp::new();
    assert_eq!(interp.call_fun(&f, &[]).unwrap(), int(0));
}

#[test]
fn test_loop_back_edge_compiles_each_block_once() {
    // The back edge re-executes its branch records on every iteration; once
    // all four blocks are compiled the heap must stop growing.
    let f = countdown_fun(100);
    let mut interp = Interp::new();
    assert_eq!(interp.call_fun(&f, &[]).unwrap(), int(0));
    let size_after_first = interp.code_size();

    assert_eq!(interp.call_fun(&f, &[]).unwrap(), int(0));
    assert_eq!(interp.call_fun(&f, &[]).unwrap(), int(0));
    assert_eq!(interp.code_size(), size_after_first);
}

#[test]
fn test_if_true_takes_both_branches() {
    // f(x) = x > 0 ? 1 : 2, exercised both ways through one compiled site.
    let then_bb = block(vec![push(int(1)), instr("ret")]);
    let else_bb = block(vec![push(int(2)), instr("ret")]);
    let entry = block(vec![
        get_local(0),
        push(int(0)),
        instr("gt_i32"),
        if_true(&then_bb, &else_bb),
    ]);
    let f = fun(1, 2, &entry);

    let mut interp = Interp::new();
    assert_eq!(interp.call_fun(&f, &[int(5)]).unwrap(), int(1));
    assert_eq!(interp.call_fun(&f, &[int(-5)]).unwrap(), int(2));

    // Both targets patched; re-running recompiles nothing.
    let size = interp.code_size();
    assert_eq!(interp.call_fun(&f, &[int(7)]).unwrap(), int(1));
    assert_eq!(interp.call_fun(&f, &[int(-7)]).unwrap(), int(2));
    assert_eq!(interp.code_size(), size);
}

#[test]
fn test_if_true_non_bool_condition_selects_else() {
    let then_bb = block(vec![push(int(1)), instr("ret")]);
    let else_bb = block(vec![push(int(2)), instr("ret")]);
    let entry = block(vec![push(int(42)), if_true(&then_bb, &else_bb)]);
    let f = fun(0, 1, &entry);
    assert_eq!(Interp::new().call_fun(&f, &[]).unwrap(), int(2));
}

#[test]
fn test_iterative_fibonacci_reaches_377() {
    // Locals: 1 = a, 2 = b, 3 = remaining iterations.
    let entry = bb();
    let head = bb();
    let body = bb();
    let done = bb();

    set_instrs(
        &entry,
        vec![
            push(int(0)),
            set_local(1),
            push(int(1)),
            set_local(2),
            push(int(14)),
            set_local(3),
            jump(&head),
        ],
    );
    set_instrs(
        &head,
        vec![get_local(3), push(int(0)), instr("gt_i32"), if_true(&body, &done)],
    );
    set_instrs(
        &body,
        vec![
            get_local(2),
            get_local(1),
            get_local(2),
            instr("add_i32"),
            set_local(2),
            set_local(1),
            get_local(3),
            push(int(1)),
            instr("sub_i32"),
            set_local(3),
            jump(&head),
        ],
    );
    set_instrs(&done, vec![get_local(1), instr("ret")]);

    let f = fun(0, 4, &entry);
    assert_eq!(Interp::new().call_fun(&f, &[]).unwrap(), int(377));
}

#[test]
fn test_diamond_merges_through_shared_block() {
    // Both arms jump to one merge block; the second arm to execute must
    // reuse the merge block's already-compiled version.
    let merge = block(vec![instr("ret")]);
    let then_bb = block(vec![push(int(10)), jump(&merge)]);
    let else_bb = block(vec![push(int(20)), jump(&merge)]);
    let entry = block(vec![get_local(0), if_true(&then_bb, &else_bb)]);
    let f = fun(1, 2, &entry);

    let mut interp = Interp::new();
    assert_eq!(interp.call_fun(&f, &[Val::Bool(true)]).unwrap(), int(10));
    let size = interp.code_size();
    assert_eq!(interp.call_fun(&f, &[Val::Bool(false)]).unwrap(), int(20));
    // Only the else arm was new; the merge block must not be recompiled.
    assert!(interp.code_size() > size);
    let size = interp.code_size();
    assert_eq!(interp.call_fun(&f, &[Val::Bool(false)]).unwrap(), int(20));
    assert_eq!(interp.code_size(), size);
}
