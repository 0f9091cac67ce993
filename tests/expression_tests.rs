//! Expression parsing, renaming and evaluation as the rewrite relies on them

use std::collections::HashMap;

use eagg_core::expr::{is_function_named, BinOp, Expr, UnaryOp};
use eagg_core::types::Scalar;

#[test]
fn test_parse_qualified_columns() {
    let expr = Expr::parse("o.amount > 100").unwrap();
    match expr {
        Expr::BinaryOp { op, left, right } => {
            assert_eq!(op, BinOp::Gt);
            assert!(matches!(*left, Expr::Column(ref name) if name == "o.amount"));
            assert!(matches!(*right, Expr::Literal(Scalar::I32(100))));
        }
        _ => panic!("Expected BinaryOp"),
    }
}

#[test]
fn test_parse_multi_if() {
    let expr = Expr::parse("multiIf(a > 1, b, a > 0, c, NULL)").unwrap();
    let Expr::Function { name, args } = &expr else {
        panic!("Expected Function");
    };
    assert!(is_function_named(name, "multiif"));
    assert_eq!(args.len(), 5);
    assert!(matches!(args[4], Expr::Literal(Scalar::Null)));
    let symbols: Vec<String> = expr.symbols().into_iter().collect();
    assert_eq!(symbols, vec!["a", "b", "c"]);
}

#[test]
fn test_rename_rewrites_only_mapped_columns() {
    let expr = Expr::parse("multiIf(o.amount > 100, c.region, NULL)").unwrap();
    let map: HashMap<String, String> = [("c.region".to_string(), "inter#c.region".to_string())].into();
    assert_eq!(
        expr.rename(&map).to_string(),
        "multiIf((o.amount > 100), inter#c.region, NULL)"
    );
}

#[test]
fn test_evaluate_multi_if_branches() {
    let expr = Expr::parse("multiIf(x > 10, 'big', x > 0, 'small', NULL)").unwrap();
    let eval = |x: Scalar| {
        let row: HashMap<String, Scalar> = [("x".to_string(), x)].into();
        expr.evaluate(&row).unwrap()
    };
    assert_eq!(eval(Scalar::I64(20)), Scalar::Str("big".into()));
    assert_eq!(eval(Scalar::I64(5)), Scalar::Str("small".into()));
    assert_eq!(eval(Scalar::I64(-1)), Scalar::Null);
    assert_eq!(eval(Scalar::Null), Scalar::Null);
}

#[test]
fn test_parse_rejects_unbalanced_input() {
    assert!(Expr::parse("f(a, b").is_err());
    assert!(Expr::parse("a > ").is_err());
}

#[test]
fn test_operator_parsing() {
    assert_eq!(BinOp::parse("=").unwrap(), BinOp::Eq);
    assert_eq!(BinOp::parse("<>").unwrap(), BinOp::Ne);
    assert_eq!(BinOp::parse("and").unwrap(), BinOp::And);
    assert!(BinOp::parse("invalid").is_err());
    assert_eq!(UnaryOp::parse("is not null").unwrap(), UnaryOp::IsNotNull);
    assert!(UnaryOp::parse("invalid").is_err());
}
