//! End-to-end typing of small routines.
use tyflow::bound::{BinaryOp, Expr, ExprKind, Param, RoutineDecl, Stmt};
use tyflow::{
    AnalysisConfig, DiagnosticKind, Program, RoutineId, SpecializerKinds, TypeHint, TypeKind,
    TypeRefMask,
};

fn config() -> AnalysisConfig {
    AnalysisConfig::sequential().with_specializers(SpecializerKinds::none())
}

fn assign(v: &str, e: Expr) -> Stmt {
    Stmt::expr(Expr::assign(Expr::var(v), e))
}

fn analyze(decls: Vec<RoutineDecl>) -> (Program, Vec<RoutineId>) {
    let mut p = Program::new();
    let ids = decls
        .into_iter()
        .map(|d| p.add_routine(d).unwrap())
        .collect();
    let outcome = p.analyze(config()).unwrap();
    assert!(outcome.is_converged(), "{:?}", outcome);
    (p, ids)
}

fn returns(e: Expr) -> TypeRefMask {
    let (p, ids) = analyze(vec![RoutineDecl::new("f")
        .param(Param::new("a"))
        .param(Param::new("b"))
        .body(vec![Stmt::ret(Some(e))])]);
    p.results().unwrap().return_type(ids[0])
}

fn add(l: Expr, r: Expr) -> Expr {
    Expr::binary(BinaryOp::Add, l, r)
}

#[test]
fn guarded_increments_stay_integers() {
    let (p, ids) = analyze(vec![RoutineDecl::new("count").body(vec![
        assign("i", Expr::long(0)),
        Stmt::while_(
            Expr::binary(BinaryOp::Lt, Expr::var("i"), Expr::long(9223372036854775806)),
            vec![Stmt::expr(Expr::post_inc(Expr::var("i")))],
        ),
        Stmt::ret(Some(Expr::var("i"))),
    ])]);
    let r = p.results().unwrap();
    assert_eq!(r.var_type(ids[0], "i"), Some(TypeRefMask::LONG));
    assert_eq!(r.return_type(ids[0]), TypeRefMask::LONG);

    // Without the guard the counter may overflow.
    let (p, ids) = analyze(vec![RoutineDecl::new("count")
        .param(Param::new("c"))
        .body(vec![
            assign("i", Expr::long(0)),
            Stmt::while_(
                Expr::var("c"),
                vec![Stmt::expr(Expr::post_inc(Expr::var("i")))],
            ),
            Stmt::ret(Some(Expr::var("i"))),
        ])]);
    assert_eq!(p.results().unwrap().return_type(ids[0]), TypeRefMask::NUMBERS);
}

#[test]
fn floats_increment_to_floats() {
    let (p, ids) = analyze(vec![RoutineDecl::new("f").body(vec![
        assign("x", Expr::double(0.5)),
        Stmt::expr(Expr::post_inc(Expr::var("x"))),
        Stmt::ret(Some(Expr::var("x"))),
    ])]);
    assert_eq!(p.results().unwrap().return_type(ids[0]), TypeRefMask::DOUBLE);
}

#[test]
fn addition_on_arrays_and_numbers() {
    let ints = |xs: &[i64]| Expr::array(xs.iter().map(|x| (None, Expr::long(*x))).collect());
    let (p, ids) = analyze(vec![RoutineDecl::new("f")
        .body(vec![Stmt::ret(Some(add(ints(&[1]), ints(&[2, 3]))))])]);
    let t = p.results().unwrap().return_type(ids[0]);
    assert!(p.types().is_kind(t, TypeKind::Array));
    assert_eq!(p.types().element_type_of(t), TypeRefMask::LONG);

    assert_eq!(returns(add(Expr::long(1), Expr::long(2))), TypeRefMask::NUMBERS);
    assert_eq!(returns(add(Expr::double(1.0), Expr::double(2.0))), TypeRefMask::DOUBLE);
    assert_eq!(returns(add(Expr::long(1), Expr::double(2.0))), TypeRefMask::DOUBLE);
    assert_eq!(
        returns(add(Expr::string("1"), Expr::long(2))),
        TypeRefMask::NUMBERS
    );
    // Untyped operands may be arrays.
    assert_eq!(
        returns(add(Expr::var("a"), Expr::var("b"))),
        TypeRefMask::NUMBERS | TypeRefMask::ARRAY
    );
}

#[test]
fn comparisons_are_booleans() {
    for op in [
        BinaryOp::Eq,
        BinaryOp::NotIdentical,
        BinaryOp::Lt,
        BinaryOp::Ge,
    ]
    .iter()
    .cloned()
    {
        assert_eq!(
            returns(Expr::binary(op, Expr::var("a"), Expr::var("b"))),
            TypeRefMask::BOOL
        );
    }
}

/// The type stored by the assignment to `var` in routine `id`: what `$var` was given where it
/// was assigned, before any later join.
fn assigned(p: &Program, id: RoutineId, var: &str) -> TypeRefMask {
    let e = p
        .routine(id)
        .cfg()
        .exprs()
        .into_iter()
        .find(|e| match &e.kind {
            ExprKind::Assign(target, _) => target.as_variable().map_or(false, |n| &**n == var),
            _ => false,
        })
        .unwrap()
        .id;
    p.results().unwrap().expr_type(id, e)
}

/// `f(bool $a, ?int $x) { if (<cond>) { $t = $y; } else { $e = $y; } }`: the type `$y` had in
/// each branch, and whether reading it there was reported as maybe uninitialized.
fn short_circuit(cond: Expr) -> ((TypeRefMask, bool), (TypeRefMask, bool)) {
    let mut p = Program::new();
    let f = p
        .add_routine(
            RoutineDecl::new("f")
                .param(Param::new("a").hint(TypeHint::Bool))
                .param(Param::new("x").hint(TypeHint::Nullable(Box::new(TypeHint::Int))))
                .body(vec![Stmt::if_(
                    cond,
                    vec![assign("t", Expr::var("y"))],
                    vec![assign("e", Expr::var("y"))],
                )]),
        )
        .unwrap();
    p.analyze(config()).unwrap();
    // Reads of `$y` come in source order: the then-branch first.
    let mut reports: Vec<_> = p
        .diagnostics()
        .iter()
        .filter(|d| d.kind == DiagnosticKind::MaybeUninitializedVariable("y".into()))
        .filter_map(|d| d.expr)
        .collect();
    reports.sort();
    let reads: Vec<_> = p
        .routine(f)
        .read_sites()
        .filter(|(_, site)| p.routine(f).flow().name(site.var).map(|n| &**n == "y").unwrap_or(false))
        .map(|(e, _)| e)
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    assert_eq!(reads.len(), 2, "{:?}", reads);
    let reported = |e| reports.contains(&e);
    (
        (assigned(&p, f, "t"), reported(reads[0])),
        (assigned(&p, f, "e"), reported(reads[1])),
    )
}

fn assign_y() -> Expr {
    Expr::assign(Expr::var("y"), Expr::var("x"))
}

const INT_OR_NULL: TypeRefMask =
    TypeRefMask::from_bits(TypeRefMask::LONG.bits() | TypeRefMask::NULL.bits());

#[test]
fn and_runs_the_right_operand_only_when_the_left_is_true() {
    let (then, els) = short_circuit(Expr::and(Expr::var("a"), assign_y()));
    // true: `$a` held and `$y = $x` was truthy
    assert_eq!(then, (TypeRefMask::LONG, false));
    // false: `$a` failed and `$y` was never assigned, or `$y` is falsy
    assert_eq!(els, (INT_OR_NULL, true));
}

#[test]
fn or_runs_the_right_operand_only_when_the_left_is_false() {
    let (then, els) = short_circuit(Expr::or(Expr::var("a"), assign_y()));
    // true: `$a` held on its own, or `$y` was assigned something truthy
    assert_eq!(then, (INT_OR_NULL, true));
    // false: both operands ran and failed
    assert_eq!(els, (INT_OR_NULL, false));
}

#[test]
fn negated_operands_narrow_the_other_way() {
    let (then, els) = short_circuit(Expr::or(
        Expr::not(Expr::var("x")),
        Expr::not(assign_y()),
    ));
    // true: `$x` was falsy and `$y` never assigned, or `$y = $x` stored a falsy integer
    assert_eq!(then, (INT_OR_NULL, true));
    // false: `$x` was truthy, so `$y = $x` stored a truthy integer
    assert_eq!(els, (TypeRefMask::LONG, false));
}

#[test]
fn short_circuit_as_a_value() {
    let ops: [fn(Expr, Expr) -> Expr; 2] = [Expr::and, Expr::or];
    for op in ops.iter() {
        let (p, ids) = analyze(vec![RoutineDecl::new("f")
            .param(Param::new("a").hint(TypeHint::Bool))
            .param(Param::new("x").hint(TypeHint::Nullable(Box::new(TypeHint::Int))))
            .body(vec![
                assign("z", op(Expr::var("a"), assign_y())),
                Stmt::ret(Some(Expr::var("y"))),
            ])]);
        let r = p.results().unwrap();
        assert_eq!(r.var_type(ids[0], "z"), Some(TypeRefMask::BOOL));
        // either way `$a` alone may decide, leaving `$y` unassigned
        assert_eq!(r.return_type(ids[0]), INT_OR_NULL);
        assert_eq!(
            p.diagnostics()
                .iter()
                .map(|d| d.kind.clone())
                .collect::<Vec<_>>(),
            vec![DiagnosticKind::MaybeUninitializedVariable("y".into())]
        );
    }
}

#[test]
fn variables_set_on_one_path_may_be_null() {
    let (p, ids) = analyze(vec![RoutineDecl::new("f").param(Param::new("c")).body(vec![
        Stmt::if_(Expr::var("c"), vec![assign("y", Expr::long(1))], vec![]),
        Stmt::ret(Some(Expr::var("y"))),
    ])]);
    let f = ids[0];
    assert_eq!(p.results().unwrap().return_type(f), INT_OR_NULL);
    let kinds: Vec<_> = p.diagnostics().iter().map(|d| d.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![DiagnosticKind::MaybeUninitializedVariable("y".into())]
    );
    assert_eq!(p.diagnostics()[0].routine, Some(f));

    let (p, _) = analyze(vec![RoutineDecl::new("f").body(vec![Stmt::ret(Some(Expr::var(
        "never"
    )))])]);
    let kinds: Vec<_> = p.diagnostics().iter().map(|d| d.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![DiagnosticKind::UninitializedVariable("never".into())]
    );
}

#[test]
fn static_variables_see_later_assignments() {
    let (p, ids) = analyze(vec![RoutineDecl::new("f").body(vec![
        Stmt::static_("n", Some(Expr::long(0))),
        assign("r", Expr::var("n")),
        assign("n", Expr::string("s")),
        Stmt::ret(Some(Expr::var("r"))),
    ])]);
    let r = p.results().unwrap();
    assert_eq!(r.return_type(ids[0]), TypeRefMask::LONG | TypeRefMask::STRING);
    assert_eq!(
        r.var_type(ids[0], "r"),
        Some(TypeRefMask::LONG | TypeRefMask::STRING)
    );
    assert!(r.var_type(ids[0], "n").unwrap().is_ref());
}

#[test]
fn returns_flow_back_through_internal_calls() {
    let id = |x: &str| {
        RoutineDecl::new(x)
            .param(Param::new("v"))
            .body(vec![Stmt::ret(Some(Expr::var("v")))])
            .internal()
    };
    let (p, ids) = analyze(vec![
        id("inner"),
        RoutineDecl::new("outer")
            .param(Param::new("v"))
            .body(vec![Stmt::ret(Some(Expr::call("inner", vec![Expr::var("v")])))])
            .internal(),
        RoutineDecl::new("ints").body(vec![Stmt::ret(Some(Expr::call(
            "outer",
            vec![Expr::long(1)],
        )))]),
        RoutineDecl::new("strings").body(vec![Stmt::ret(Some(Expr::call(
            "outer",
            vec![Expr::string("s")],
        )))]),
    ]);
    let r = p.results().unwrap();
    let both = TypeRefMask::LONG | TypeRefMask::STRING;
    assert_eq!(r.return_type(ids[0]), both);
    assert_eq!(r.return_type(ids[1]), both);
    // Without specialization every caller sees the union.
    assert_eq!(r.return_type(ids[2]), both);
    assert_eq!(r.return_type(ids[3]), both);
}
