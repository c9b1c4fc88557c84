mod common;

use common::num;
use sieve::types::{DataType, Expr, Value};
use sieve::{CleanOptions, Cleaner, Validator};

fn validator() -> Validator {
    Validator::new(common::schema())
}

#[test]
fn test_valid_expression_passes() {
    let e = Expr::op(
        "tasks",
        "and",
        vec![
            Expr::field("tasks", "done"),
            Expr::op("tasks", ">", vec![Expr::field("tasks", "estimate"), num(3)]),
        ],
    );
    assert_eq!(validator().validate(Some(&e), &CleanOptions::for_table("tasks")), None);
    assert_eq!(validator().validate(None, &CleanOptions::for_table("tasks")), None);
}

#[test]
fn test_unknown_column_is_diagnosed() {
    let e = Expr::field("tasks", "gone");
    let diag = validator()
        .validate(Some(&e), &CleanOptions::for_table("tasks"))
        .unwrap();
    assert!(diag.contains("unknown column"), "{}", diag);
}

#[test]
fn test_table_mismatch_is_diagnosed() {
    let e = Expr::field("projects", "title");
    let diag = validator()
        .validate(Some(&e), &CleanOptions::for_table("tasks"))
        .unwrap();
    assert!(diag.contains("table mismatch"), "{}", diag);
}

#[test]
fn test_missing_operand_is_diagnosed() {
    let e = Expr::Op {
        table: "tasks".into(),
        op: "=".into(),
        exprs: vec![Some(Expr::field("tasks", "estimate")), None],
    };
    let diag = validator()
        .validate(Some(&e), &CleanOptions::for_table("tasks"))
        .unwrap();
    assert!(diag.contains("missing operand"), "{}", diag);
}

#[test]
fn test_missing_aggregation_is_diagnosed() {
    let e = Expr::Scalar {
        table: "projects".into(),
        joins: vec!["tasks".into()],
        expr: Some(Box::new(Expr::field("tasks", "estimate"))),
        aggr: None,
        where_clause: None,
    };
    let diag = validator()
        .validate(Some(&e), &CleanOptions::for_table("projects"))
        .unwrap();
    assert!(diag.contains("aggregation required"), "{}", diag);
}

#[test]
fn test_aggregation_on_to_one_chain_is_diagnosed() {
    let e = Expr::Scalar {
        table: "tasks".into(),
        joins: vec!["project".into()],
        expr: Some(Box::new(Expr::field("projects", "budget"))),
        aggr: Some("sum".into()),
        where_clause: None,
    };
    let diag = validator()
        .validate(Some(&e), &CleanOptions::for_table("tasks"))
        .unwrap();
    assert!(diag.contains("to-one"), "{}", diag);
}

#[test]
fn test_circular_computed_columns_hit_the_depth_cap() {
    let e = Expr::field("loops", "a");
    let diag = validator()
        .validate(Some(&e), &CleanOptions::for_table("loops"))
        .unwrap();
    assert!(diag.contains("circular reference"), "{}", diag);
}

#[test]
fn test_retired_enum_value_is_diagnosed() {
    let e = Expr::op(
        "tasks",
        "=",
        vec![
            Expr::field("tasks", "status"),
            Expr::literal(DataType::Enum, Value::Text("cancelled".into())),
        ],
    );
    let diag = validator()
        .validate(Some(&e), &CleanOptions::for_table("tasks"))
        .unwrap();
    assert!(diag.contains("enum value not allowed"), "{}", diag);
}

#[test]
fn test_unknown_variable_is_diagnosed() {
    let e = Expr::Variable {
        variable_id: "nobody".into(),
        table: None,
    };
    let diag = validator()
        .validate(Some(&e), &CleanOptions::for_table("tasks"))
        .unwrap();
    assert!(diag.contains("unknown variable"), "{}", diag);
}

// Whatever the cleaner produces must validate under the same options.
#[test]
fn test_cleaned_expressions_always_validate() {
    let schema = common::schema();
    let cleaner = Cleaner::new(schema.clone());
    let validator = Validator::new(schema);

    let cases: Vec<(Expr, CleanOptions)> = vec![
        (
            Expr::op(
                "t1",
                "and",
                vec![Expr::field("t1", "flag"), Expr::field("t1", "gone")],
            ),
            CleanOptions::for_table("t1"),
        ),
        (
            Expr::Scalar {
                table: "projects".into(),
                joins: vec!["tasks".into()],
                expr: Some(Box::new(Expr::field("tasks", "estimate"))),
                aggr: Some("bogus".into()),
                where_clause: Some(Box::new(Expr::field("tasks", "done"))),
            },
            CleanOptions::for_table("projects"),
        ),
        (
            Expr::op(
                "tasks",
                "contains",
                vec![
                    Expr::field("tasks", "tags"),
                    Expr::literal(
                        DataType::EnumSet,
                        Value::List(vec![
                            Value::Text("red".into()),
                            Value::Text("purple".into()),
                        ]),
                    ),
                ],
            ),
            CleanOptions::for_table("tasks"),
        ),
        (
            Expr::Comparison {
                lhs: Some(Box::new(Expr::field("t1", "flag"))),
                op: "=".into(),
                rhs: Some(Box::new(Expr::bool_literal(false))),
            },
            CleanOptions::for_table("t1"),
        ),
        // A circular computed column cleans to None, which vacuously
        // validates; keeping it would have been diagnosed.
        (
            Expr::field("loops", "a"),
            CleanOptions::for_table("loops"),
        ),
    ];

    for (e, opts) in cases {
        let cleaned = cleaner.clean(Some(&e), &opts);
        assert_eq!(validator.validate(cleaned.as_ref(), &opts), None);
    }
}
