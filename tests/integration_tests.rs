//! Integration tests for the ClassAd engine
//!
//! These tests drive the public API from source text to values.

use classad::{
    AbsTime, Arena, ClassAdError, EvalConfig, EvalFailure, ExprId, Flattened, MatchClassAd,
    Unparser, Value,
};
use pretty_assertions::assert_eq;

/// Evaluate `expr` inside an empty record
fn eval(expr: &str) -> Value {
    eval_in("[]", expr)
}

fn eval_in(ad: &str, expr: &str) -> Value {
    let mut arena = Arena::new();
    let ad = classad::parse_classad(&mut arena, ad).unwrap();
    let expr = classad::parse_expr(&mut arena, expr).unwrap();
    arena.evaluate_expr(ad, expr).unwrap()
}

fn unparse(source: &str) -> String {
    let mut arena = Arena::new();
    let id = classad::parse_expr(&mut arena, source).unwrap();
    Unparser::new(&arena).expr(id)
}

// ===== Round trips =====

const SOURCES: &[&str] = &[
    "1 + 2 * 3",
    "(a + b) * c",
    "other.Memory >= 4K && Disk > 1.5G",
    ".root_attr =?= undefined",
    "x isnt error",
    "c ? { 1, 2 } : [ a = 1; b = { \"s\", 2.5 } ]",
    "strcat(\"a\\\"b\", toUpper(name))[0]",
    "~mask & 0xff | flags << 2 >>> 1",
    "!(x < y) || -z % 3 != 0",
    "a - (b - c) - d",
    "[ inner = [ v = 1; w = v + 1 ]; u = inner.w ]",
];

#[test]
fn test_copy_is_same_as_original() {
    let mut arena = Arena::new();
    for source in SOURCES {
        let id = classad::parse_expr(&mut arena, source).unwrap();
        let copy = arena.copy(id);
        assert_ne!(id, copy);
        assert!(arena.same_as(id, copy), "{}", source);
        assert!(arena.free(copy));
        assert!(arena.free(id));
    }
    assert_eq!(arena.live_nodes(), 0);
}

#[test]
fn test_unparse_parse_unparse_is_stable() {
    for source in SOURCES {
        let once = unparse(source);
        let twice = unparse(&once);
        assert_eq!(twice, once, "{}", source);
    }
}

#[test]
fn test_parsed_copy_compares_equal_to_reparse() {
    let mut arena = Arena::new();
    for source in SOURCES {
        let id = classad::parse_expr(&mut arena, source).unwrap();
        let text = Unparser::new(&arena).expr(id);
        let again = classad::parse_expr(&mut arena, &text).unwrap();
        assert!(arena.same_as(id, again), "{}", source);
    }
}

// ===== Scope resolution =====

/// `A = [a = 1; B = [b = 2; C = [c = 3]]]`, returned as (arena, A, B, C)
fn nested() -> (Arena, ExprId, ExprId, ExprId) {
    let mut arena = Arena::new();
    let a = classad::parse_classad(&mut arena, "[a = 1; B = [b = 2; C = [c = 3]]]").unwrap();
    let b = arena.lookup(a, "B").unwrap();
    let c = arena.lookup(b, "C").unwrap();
    (arena, a, b, c)
}

#[test]
fn test_outer_attribute_visible_from_innermost() {
    let (arena, a, _, c) = nested();
    let (expr, owner) = arena.lookup_in_scope(c, "a").unwrap();
    assert_eq!(owner, a);
    assert_eq!(Some(expr), arena.lookup(a, "a"));
    assert_eq!(arena.evaluate_attr(c, "a"), Ok(Value::Integer(1)));
    assert_eq!(arena.evaluate_attr(c, "b"), Ok(Value::Integer(2)));
}

#[test]
fn test_parent_and_root() {
    let (arena, a, b, c) = nested();
    assert_eq!(arena.lookup_in_scope(c, "parent").map(|(e, _)| e), Some(b));
    assert_eq!(arena.lookup_in_scope(b, "parent").map(|(e, _)| e), Some(a));
    assert_eq!(arena.lookup_in_scope(a, "parent"), None);
    for start in [a, b, c] {
        assert_eq!(arena.lookup_in_scope(start, "root").map(|(e, _)| e), Some(a));
        assert_eq!(arena.lookup_in_scope(start, "TopLevel").map(|(e, _)| e), Some(a));
    }
    assert_eq!(arena.evaluate_attr(c, "parent"), Ok(Value::ClassAd(b)));
    assert_eq!(arena.evaluate_attr(c, "self"), Ok(Value::ClassAd(c)));
}

#[test]
fn test_local_binding_shadows_outer() {
    let mut arena = Arena::new();
    let ad = classad::parse_classad(&mut arena, "[x = 1; inner = [x = 2; y = x]; z = inner.y]").unwrap();
    assert_eq!(arena.evaluate_attr(ad, "z"), Ok(Value::Integer(2)));
}

#[test]
fn test_absolute_reference_starts_at_root() {
    let v = eval_in("[x = 1; inner = [x = 2; y = .x]; z = inner.y]", "z");
    assert_eq!(v, Value::Integer(1));
}

#[test]
fn test_super_redirects_the_walk() {
    let v = eval_in(
        "[base = [limit = 10]; child = [super = base; v = limit * 2]; r = child.v]",
        "r",
    );
    assert_eq!(v, Value::Integer(20));
}

// ===== Cycle safety =====

#[test]
fn test_mutual_recursion_is_undefined() {
    assert_eq!(eval_in("[x = y; y = x]", "x"), Value::Undefined);
    assert_eq!(eval_in("[x = x + 1]", "x"), Value::Undefined);
    assert_eq!(eval_in("[x = y; y = x; z = 3]", "z"), Value::Integer(3));
}

#[test]
fn test_depth_limit_is_a_failure() {
    let mut arena = Arena::with_config(EvalConfig { max_depth: 8 });
    // a0 = a1; a1 = a2; ... a15 = 1
    let chain: Vec<String> = (0..15).map(|i| format!("a{} = a{}", i, i + 1)).collect();
    let source = format!("[{}; a15 = 1]", chain.join("; "));
    let ad = classad::parse_classad(&mut arena, &source).unwrap();
    assert!(matches!(
        arena.evaluate_attr(ad, "a0"),
        Err(EvalFailure::DepthExceeded { limit: 8 })
    ));
    arena.set_eval_config(EvalConfig::default());
    assert_eq!(arena.evaluate_attr(ad, "a0"), Ok(Value::Integer(1)));
}

// ===== Operators =====

const STRICT_BINARY: &[&str] = &[
    "+", "-", "*", "/", "%", "<", "<=", ">", ">=", "==", "!=", "&", "|", "^", "<<", ">>", ">>>",
];

#[test]
fn test_strict_propagation() {
    for op in STRICT_BINARY {
        assert_eq!(eval(&format!("error {} 1", op)), Value::Error, "error {} 1", op);
        assert_eq!(eval(&format!("1 {} error", op)), Value::Error, "1 {} error", op);
        assert_eq!(eval(&format!("undefined {} 1", op)), Value::Undefined, "undefined {} 1", op);
        assert_eq!(eval(&format!("1 {} undefined", op)), Value::Undefined, "1 {} undefined", op);
        assert_eq!(eval(&format!("undefined {} error", op)), Value::Error, "undefined {} error", op);
        assert_eq!(eval(&format!("error {} undefined", op)), Value::Error, "error {} undefined", op);
    }
    for unary in ["-", "+", "!", "~"] {
        assert_eq!(eval(&format!("{}error", unary)), Value::Error);
        assert_eq!(eval(&format!("{}undefined", unary)), Value::Undefined);
    }
}

#[test]
fn test_meta_equality() {
    assert_eq!(eval("undefined =?= undefined"), Value::Boolean(true));
    assert_eq!(eval("error =?= error"), Value::Boolean(true));
    assert_eq!(eval("1 =?= \"1\""), Value::Boolean(false));
    assert_eq!(eval("1 =!= \"1\""), Value::Boolean(true));
    assert_eq!(eval("1 =?= 1.0"), Value::Boolean(false));
    assert_eq!(eval("\"a\" =?= \"A\""), Value::Boolean(false));
    assert_eq!(eval("\"a\" == \"A\""), Value::Boolean(true));
    assert_eq!(eval("missing is undefined"), Value::Boolean(true));
}

#[test]
fn test_arithmetic() {
    assert_eq!(eval("5 / 0"), Value::Error);
    assert_eq!(eval("5 % 0"), Value::Error);
    assert_eq!(eval("1 + 2.0"), Value::Real(3.0));
    assert_eq!(eval("\"a\" + 1"), Value::Error);
    assert_eq!(eval("7 / 2"), Value::Integer(3));
    assert_eq!(eval("-7 % 3"), Value::Integer(-1));
    assert_eq!(eval("2K"), Value::Integer(2048));
    assert_eq!(eval("9223372036854775807 + 1"), Value::Error);
}

#[test]
fn test_logic_short_circuits_both_ways() {
    assert_eq!(eval("false && error"), Value::Boolean(false));
    assert_eq!(eval("error && false"), Value::Boolean(false));
    assert_eq!(eval("true || undefined"), Value::Boolean(true));
    assert_eq!(eval("undefined || true"), Value::Boolean(true));
    assert_eq!(eval("undefined && true"), Value::Undefined);
    assert_eq!(eval("\"s\" || false"), Value::Error);
}

#[test]
fn test_ternary() {
    assert_eq!(eval("undefined ? 1 : 2"), Value::Undefined);
    assert_eq!(eval("0 ? 1 : 2"), Value::Integer(2));
    assert_eq!(eval("2.5 ? 1 : 2"), Value::Integer(1));
    assert_eq!(eval("\"x\" ? 1 : 2"), Value::Error);
    assert_eq!(eval("true ? 1 : 1 / 0"), Value::Integer(1));
}

#[test]
fn test_subscript() {
    let ad = "[l = {1, 2, 3}]";
    assert_eq!(eval_in(ad, "l[5]"), Value::Undefined);
    assert_eq!(eval_in(ad, "l[-1]"), Value::Undefined);
    assert_eq!(eval_in(ad, "l[1]"), Value::Integer(2));
    assert_eq!(eval_in(ad, "l[\"x\"]"), Value::Error);
    assert_eq!(eval_in("[r = [k = 4]]", "r[\"K\"]"), Value::Integer(4));
    assert_eq!(eval_in("[r = [k = 4]]", "r[\"missing\"]"), Value::Undefined);
}

#[test]
fn test_boolean_ordering() {
    assert_eq!(eval("false < true"), Value::Boolean(true));
    assert_eq!(eval("true <= false"), Value::Boolean(false));
    assert_eq!(eval("true >= true"), Value::Boolean(true));
    assert_eq!(eval("true > 0"), Value::Boolean(true));
}

#[test]
fn test_time_arithmetic() {
    let start = "absTime(\"2024-01-01T00:00:00+00:00\")";
    assert_eq!(
        eval(&format!("{} + relTime(\"1+00:00:00\")", start)),
        Value::AbsTime(AbsTime::new(1_704_153_600, 0))
    );
    assert_eq!(
        eval(&format!("({} + 90) - {}", start, start)),
        Value::Error
    );
    assert_eq!(eval("relTime(\"01:00:00\") * 2"), Value::RelTime(7200));
    assert_eq!(eval("getHours(relTime(\"1+02:03:04\"))"), Value::Integer(2));
    assert_eq!(eval(&format!("getYear({})", start)), Value::Integer(2024));
}

// ===== Built-in functions =====

#[test]
fn test_builtins() {
    assert_eq!(eval("member(2, {1, 2, 3})"), Value::Boolean(true));
    assert_eq!(eval("identicalMember(2.0, {1, 2, 3})"), Value::Boolean(false));
    assert_eq!(eval("strcat(\"a\", 1, true)"), Value::from("a1true"));
    assert_eq!(eval("size({1, 2})"), Value::Integer(2));
    assert_eq!(eval("regexp(\"^a.c$\", \"ABC\", \"i\")"), Value::Boolean(true));
    assert_eq!(eval("ifThenElse(true, 1, 1 / 0)"), Value::Integer(1));
    assert_eq!(eval("isUndefined(nothing)"), Value::Boolean(true));
    assert_eq!(eval("int(\"42\") + floor(2.7)"), Value::Integer(44));
    assert_eq!(eval("SUBSTR(\"hello\", -3, 2)"), Value::from("ll"));
    assert_eq!(eval("noSuchFunction(1)"), Value::Error);
    assert_eq!(eval("anyCompare(\">\", {1, 5}, 4)"), Value::Boolean(true));
    assert_eq!(eval("join(\"+\", {1, 2})"), Value::from("1+2"));
    assert_eq!(eval("versionLT(\"8.9.2\", \"8.10.0\")"), Value::Boolean(true));
    assert_eq!(eval("replaceAll(\"a\", \"banana\", \"o\")"), Value::from("bonono"));
    assert_eq!(eval("quantize(5, 4)"), Value::Integer(8));
    assert_eq!(eval("interval(3661)"), Value::from("1:01:01"));
    assert_eq!(eval_in("[req = other.mem > 4]", "unparse(req)"), Value::from("other.mem > 4"));
    assert_eq!(eval_in("[req = other.mem > 4]", "unresolved(req)"), Value::from("other.mem"));
}

// ===== Partial evaluation =====

#[test]
fn test_flatten_concrete_expression_is_idempotent() {
    let mut arena = Arena::new();
    let ad = classad::parse_classad(&mut arena, "[x = 3]").unwrap();
    let expr = classad::parse_expr(&mut arena, "x * 2 + 1").unwrap();
    let first = arena.flatten(ad, expr).unwrap();
    assert_eq!(first, Flattened::Value(Value::Integer(7)));

    let before = arena.live_nodes();
    let literal = classad::parse_expr(&mut arena, "7").unwrap();
    let again = arena.flatten(ad, literal).unwrap();
    assert_eq!(again, first);
    assert_eq!(arena.live_nodes(), before + 1, "no residual tree was allocated");
}

#[test]
fn test_flatten_folds_concrete_lists() {
    let mut arena = Arena::new();
    let ad = classad::parse_classad(&mut arena, "[l = {4, 5}]").unwrap();
    let expr = classad::parse_expr(&mut arena, "{1, 2, 3}[1] + size(l)").unwrap();
    assert_eq!(arena.flatten(ad, expr).unwrap(), Flattened::Value(Value::Integer(4)));

    let expr = classad::parse_expr(&mut arena, "member(other.x, l)").unwrap();
    let residual = arena.flatten(ad, expr).unwrap().residual().unwrap();
    assert_eq!(Unparser::new(&arena).expr(residual), "member(other.x, { 4, 5 })");
}

#[test]
fn test_flatten_leaves_match_partner_references() {
    let mut arena = Arena::new();
    let ad = classad::parse_classad(&mut arena, "[mem = 8; disk = 100]").unwrap();
    let expr = classad::parse_expr(&mut arena, "other.mem >= mem / 2 && disk > 50").unwrap();
    let residual = arena.flatten(ad, expr).unwrap().residual().unwrap();
    assert_eq!(Unparser::new(&arena).expr(residual), "other.mem >= 4 && true");
}

#[test]
fn test_witness_names_the_deciding_operand() {
    let mut arena = Arena::new();
    let ad = classad::parse_classad(&mut arena, "[mem = 2; cpus = 8]").unwrap();
    let expr = classad::parse_expr(&mut arena, "cpus > 4 && mem >= 4").unwrap();
    let (value, witness) = arena.evaluate_with_witness(ad, expr).unwrap();
    assert_eq!(value, Value::Boolean(false));
    assert_eq!(Unparser::new(&arena).expr(witness), "mem >= 4");
    assert!(arena.free(witness));
}

#[test]
fn test_references() {
    let mut arena = Arena::new();
    let ad = classad::parse_classad(&mut arena, "[mem = 8; want = mem / 2]").unwrap();
    let expr = classad::parse_expr(&mut arena, "other.mem >= want && other.arch == arch").unwrap();
    let external: Vec<String> = arena.external_references(ad, expr).unwrap().into_iter().collect();
    let internal: Vec<String> = arena.internal_references(ad, expr).unwrap().into_iter().collect();
    assert_eq!(external, ["arch", "other.arch", "other.mem"]);
    assert_eq!(internal, ["mem", "want"]);
}

// ===== End-to-end =====

#[test]
fn test_end_to_end_scenario() {
    let mut arena = Arena::new();
    let a = classad::parse_classad(&mut arena, "[x = 3; y = x + 2]").unwrap();
    assert_eq!(arena.evaluate_attr(a, "y"), Ok(Value::Integer(5)));
    assert_eq!(arena.evaluate_attr_int(a, "y"), Some(5));

    let b = classad::parse_classad(&mut arena, "[requirements = other.mem >= 4]").unwrap();
    let c = classad::parse_classad(&mut arena, "[mem = 8]").unwrap();
    let ctx = MatchClassAd::new(&mut arena, Some(b), Some(c)).unwrap();
    assert_eq!(arena.evaluate_attr(b, "requirements"), Ok(Value::Boolean(true)));
    assert!(ctx.right_matches_left(&arena));
    // C has no requirements, so the other direction is undefined
    assert!(!ctx.left_matches_right(&arena));
    assert!(!ctx.symmetric_match(&arena));
}

#[test]
fn test_matchmaking_with_rank() {
    let mut arena = Arena::new();
    let job = classad::parse_classad(
        &mut arena,
        "[owner = \"ann\"; requirements = target.arch == \"x86_64\" && target.mem >= 2G; rank = target.mem / 1G]",
    )
    .unwrap();
    let machine = classad::parse_classad(
        &mut arena,
        "[arch = \"X86_64\"; mem = 8G; requirements = other.owner != \"bob\"]",
    )
    .unwrap();
    let ctx = MatchClassAd::new(&mut arena, Some(job), Some(machine)).unwrap();
    assert!(ctx.symmetric_match(&arena));
    assert_eq!(ctx.left_rank(&arena), Some(8.0));

    let (left, right) = ctx.release(&mut arena);
    assert_eq!((left, right), (Some(job), Some(machine)));
}

// ===== Construction errors =====

#[test]
fn test_construction_errors_carry_codes() {
    let mut arena = Arena::new();
    let ad = arena.classad();
    let expr = arena.literal(Value::Integer(1));
    let err = arena.insert(ad, "not valid", expr).unwrap_err();
    assert_eq!(err.error_code().to_string(), "E0202");
    let err = classad::parse_expr(&mut arena, "1 +").unwrap_err();
    assert!(matches!(err, ClassAdError::UnexpectedToken { .. }));
    assert_eq!(err.error_code().to_string(), "E0101");
}
