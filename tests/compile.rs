mod common;

use chrono::NaiveDate;
use common::num;
use sieve::planning::{Direction, Ir, JoinKind};
use sieve::types::{DataType, Expr, Value};
use sieve::{Compiler, Error};
use std::collections::HashMap;

fn compiler() -> Compiler {
    Compiler::new(common::schema())
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

fn field(alias: &str, column: &str) -> Ir {
    Ir::Field {
        table_alias: alias.into(),
        column: column.into(),
    }
}

#[test]
fn test_field_compiles_to_aliased_reference() {
    let ir = compiler()
        .compile(Some(&Expr::field("t1", "name")), "main")
        .unwrap();
    assert_eq!(ir, Some(field("main", "name")));
}

#[test]
fn test_unknown_column_is_a_distinguished_error() {
    let err = compiler()
        .compile(Some(&Expr::field("t1", "gone")), "main")
        .unwrap_err();
    assert!(matches!(err, Error::ColumnNotFound(_)), "{:?}", err);
}

#[test]
fn test_unknown_operator_is_unsupported() {
    let e = Expr::op("t1", "frobnicate", vec![num(1)]);
    let err = compiler().compile(Some(&e), "main").unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{:?}", err);
}

#[test]
fn test_id_compiles_to_primary_key() {
    let ir = compiler()
        .compile(Some(&Expr::Id { table: "tasks".into() }), "main")
        .unwrap();
    assert_eq!(ir, Some(field("main", "id")));
}

#[test]
fn test_single_join_scalar_becomes_correlated_subquery() {
    let e = Expr::Scalar {
        table: "tasks".into(),
        joins: vec!["project".into()],
        expr: Some(Box::new(Expr::field("projects", "title"))),
        aggr: None,
        where_clause: None,
    };
    let ir = compiler().compile(Some(&e), "main").unwrap();
    assert_eq!(
        ir,
        Some(Ir::Scalar {
            expr: Some(Box::new(field("t1", "title"))),
            from: Some(Box::new(Ir::Table {
                table: "projects".into(),
                alias: "t1".into(),
            })),
            where_clause: Some(Box::new(Ir::Op {
                op: "=".into(),
                exprs: vec![field("main", "project_id"), field("t1", "id")],
                modifier: None,
            })),
            order_by: None,
            limit: None,
        })
    );
}

#[test]
fn test_multi_hop_chains_left_joins() {
    let e = Expr::Scalar {
        table: "projects".into(),
        joins: vec!["tasks".into(), "project".into()],
        expr: Some(Box::new(Expr::field("projects", "budget"))),
        aggr: Some("sum".into()),
        where_clause: None,
    };
    let ir = compiler().compile(Some(&e), "main").unwrap();
    match ir {
        Some(Ir::Scalar { expr, from, where_clause, .. }) => {
            assert_eq!(
                expr,
                Some(Box::new(Ir::Op {
                    op: "sum".into(),
                    exprs: vec![field("t2", "budget")],
                    modifier: None,
                }))
            );
            // First hop correlates through the where clause, the second
            // chains as a left join.
            assert_eq!(
                where_clause,
                Some(Box::new(Ir::Op {
                    op: "=".into(),
                    exprs: vec![field("main", "id"), field("t1", "project_id")],
                    modifier: None,
                }))
            );
            match from.as_deref() {
                Some(Ir::Join { kind, on, .. }) => {
                    assert_eq!(*kind, JoinKind::Left);
                    assert_eq!(
                        on.as_ref(),
                        &Ir::Op {
                            op: "=".into(),
                            exprs: vec![field("t1", "project_id"), field("t2", "id")],
                            modifier: None,
                        }
                    );
                }
                other => panic!("expected join, got {:?}", other),
            }
        }
        other => panic!("expected scalar, got {:?}", other),
    }
}

#[test]
fn test_scalar_where_combines_with_join_condition() {
    let e = Expr::Scalar {
        table: "projects".into(),
        joins: vec!["tasks".into()],
        expr: None,
        aggr: Some("count".into()),
        where_clause: Some(Box::new(Expr::field("tasks", "done"))),
    };
    let ir = compiler().compile(Some(&e), "main").unwrap();
    match ir {
        Some(Ir::Scalar { expr, where_clause, .. }) => {
            assert_eq!(
                expr,
                Some(Box::new(Ir::Op {
                    op: "count".into(),
                    exprs: vec![],
                    modifier: None,
                }))
            );
            match where_clause.as_deref() {
                Some(Ir::Op { op, exprs, .. }) => {
                    assert_eq!(op, "and");
                    assert_eq!(exprs[1], field("t1", "done"));
                }
                other => panic!("expected and, got {:?}", other),
            }
        }
        other => panic!("expected scalar, got {:?}", other),
    }
}

#[test]
fn test_last_lowers_to_ordered_limited_subquery() {
    let e = Expr::Scalar {
        table: "projects".into(),
        joins: vec!["tasks".into()],
        expr: Some(Box::new(Expr::field("tasks", "estimate"))),
        aggr: Some("last".into()),
        where_clause: None,
    };
    let ir = compiler().compile(Some(&e), "main").unwrap();
    match ir {
        Some(Ir::Scalar { order_by, limit, .. }) => {
            let order_by = order_by.unwrap();
            assert_eq!(order_by.expr.as_ref(), &field("t1", "created"));
            assert_eq!(order_by.dir, Direction::Descending);
            assert_eq!(limit, Some(1));
        }
        other => panic!("expected scalar, got {:?}", other),
    }
}

#[test]
fn test_last_without_ordering_column_is_a_configuration_error() {
    let e = Expr::Scalar {
        table: "projects".into(),
        joins: vec!["members".into()],
        expr: Some(Box::new(Expr::field("users", "name"))),
        aggr: Some("last".into()),
        where_clause: None,
    };
    let err = compiler().compile(Some(&e), "main").unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{:?}", err);
}

#[test]
fn test_zero_join_scalar_degenerates_to_inner() {
    let e = Expr::Scalar {
        table: "tasks".into(),
        joins: vec![],
        expr: Some(Box::new(Expr::field("tasks", "estimate"))),
        aggr: None,
        where_clause: None,
    };
    let ir = compiler().compile(Some(&e), "main").unwrap();
    assert_eq!(ir, Some(field("main", "estimate")));
}

#[test]
fn test_any_against_empty_collection_is_no_filter() {
    let e = Expr::op(
        "t1",
        "= any",
        vec![
            Expr::field("t1", "name"),
            Expr::literal(DataType::TextList, Value::List(vec![])),
        ],
    );
    assert_eq!(compiler().compile(Some(&e), "main").unwrap(), None);
}

#[test]
fn test_passthrough_drops_null_operands() {
    let e = Expr::Op {
        table: "t1".into(),
        op: "and".into(),
        exprs: vec![None, Some(Expr::field("t1", "flag")), None],
    };
    let ir = compiler().compile(Some(&e), "main").unwrap();
    assert_eq!(ir, Some(field("main", "flag")));

    let empty = Expr::Op {
        table: "t1".into(),
        op: "and".into(),
        exprs: vec![None],
    };
    assert_eq!(compiler().compile(Some(&empty), "main").unwrap(), None);
}

#[test]
fn test_strict_op_with_null_operand_compiles_to_null() {
    let e = Expr::Op {
        table: "tasks".into(),
        op: ">".into(),
        exprs: vec![Some(Expr::field("tasks", "estimate")), None],
    };
    assert_eq!(compiler().compile(Some(&e), "main").unwrap(), None);
}

#[test]
fn test_between_degrades_to_one_sided_comparison() {
    let e = Expr::Op {
        table: "tasks".into(),
        op: "between".into(),
        exprs: vec![Some(Expr::field("tasks", "estimate")), None, Some(num(10))],
    };
    let ir = compiler().compile(Some(&e), "main").unwrap();
    assert_eq!(
        ir,
        Some(Ir::Op {
            op: "<=".into(),
            exprs: vec![
                field("main", "estimate"),
                Ir::Literal { value: Value::Number(10.into()) },
            ],
            modifier: None,
        })
    );
}

#[test]
fn test_legacy_range_comparison_with_untyped_lhs_is_fatal() {
    // "+" over text and number resolves to no type, so neither date nor
    // datetime bounds can be chosen for the range.
    let e = Expr::Comparison {
        lhs: Some(Box::new(Expr::op(
            "tasks",
            "+",
            vec![common::text("x"), num(1)],
        ))),
        op: "between".into(),
        rhs: Some(Box::new(Expr::literal(
            DataType::DateRange,
            Value::List(vec![
                Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
                Value::Date(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()),
            ]),
        ))),
    };
    let err = compiler().compile(Some(&e), "main").unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)), "{:?}", err);
}

#[test]
fn test_date_window_lowers_to_pinned_boundary_comparisons() {
    let e = Expr::op("tasks", "thismonth", vec![Expr::field("tasks", "created")]);
    let ir = compiler().compile_as_of(Some(&e), "main", today()).unwrap();
    let bound = |d: u32| Ir::Literal {
        value: Value::Date(NaiveDate::from_ymd_opt(2024, 3, d).unwrap()),
    };
    assert_eq!(
        ir,
        Some(Ir::Op {
            op: "and".into(),
            exprs: vec![
                Ir::Op {
                    op: ">=".into(),
                    exprs: vec![field("main", "created"), bound(1)],
                    modifier: None,
                },
                Ir::Op {
                    op: "<=".into(),
                    exprs: vec![field("main", "created"), bound(31)],
                    modifier: None,
                },
            ],
            modifier: None,
        })
    );
}

#[test]
fn test_datetime_window_widens_bounds_to_whole_days() {
    let e = Expr::op("tasks", "today", vec![Expr::field("tasks", "due")]);
    let ir = compiler().compile_as_of(Some(&e), "main", today()).unwrap();
    match ir {
        Some(Ir::Op { exprs, .. }) => {
            let lo = NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            let hi = NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(23, 59, 59)
                .unwrap();
            assert_eq!(
                exprs[0],
                Ir::Op {
                    op: ">=".into(),
                    exprs: vec![
                        field("main", "due"),
                        Ir::Literal { value: Value::DateTime(lo) },
                    ],
                    modifier: None,
                }
            );
            match &exprs[1] {
                Ir::Op { exprs, .. } => {
                    assert_eq!(exprs[1], Ir::Literal { value: Value::DateTime(hi) });
                }
                other => panic!("expected op, got {:?}", other),
            }
        }
        other => panic!("expected op, got {:?}", other),
    }
}

#[test]
fn test_set_containment_carries_cast_modifier() {
    let e = Expr::op(
        "tasks",
        "contains",
        vec![
            Expr::field("tasks", "tags"),
            Expr::literal(
                DataType::EnumSet,
                Value::List(vec![Value::Text("red".into())]),
            ),
        ],
    );
    let ir = compiler().compile(Some(&e), "main").unwrap();
    match ir {
        Some(Ir::Op { op, modifier, .. }) => {
            assert_eq!(op, "contains");
            assert_eq!(modifier.as_deref(), Some("jsonb"));
        }
        other => panic!("expected op, got {:?}", other),
    }

    // Substring containment over text stays uncast.
    let e = Expr::op(
        "tasks",
        "contains",
        vec![Expr::field("tasks", "name"), common::text("x")],
    );
    match compiler().compile(Some(&e), "main").unwrap() {
        Some(Ir::Op { modifier, .. }) => assert_eq!(modifier, None),
        other => panic!("expected op, got {:?}", other),
    }
}

#[test]
fn test_bound_variable_compiles_to_literal() {
    let bindings = HashMap::from([("threshold".to_string(), Value::Number(5.into()))]);
    let c = Compiler::with_variables(common::schema(), bindings);

    let bound = Expr::Variable {
        variable_id: "threshold".into(),
        table: None,
    };
    assert_eq!(
        c.compile(Some(&bound), "main").unwrap(),
        Some(Ir::Literal { value: Value::Number(5.into()) })
    );

    let unbound = Expr::Variable {
        variable_id: "me".into(),
        table: None,
    };
    assert_eq!(c.compile(Some(&unbound), "main").unwrap(), None);
}

#[test]
fn test_legacy_count_compiles_to_count_op() {
    let e = Expr::Count { table: "tasks".into() };
    assert_eq!(
        compiler().compile(Some(&e), "main").unwrap(),
        Some(Ir::Op {
            op: "count".into(),
            exprs: vec![],
            modifier: None,
        })
    );
}

#[test]
fn test_case_drops_branches_whose_condition_vanished() {
    let e = Expr::Case {
        cases: vec![
            sieve::types::CaseBranch {
                when: None,
                then: Some(num(1)),
            },
            sieve::types::CaseBranch {
                when: Some(Expr::field("tasks", "done")),
                then: Some(num(2)),
            },
        ],
        otherwise: Some(Box::new(num(0))),
    };
    let ir = compiler().compile(Some(&e), "main").unwrap();
    match ir {
        Some(Ir::Case { cases, otherwise }) => {
            assert_eq!(cases.len(), 1);
            assert_eq!(cases[0].when, field("main", "done"));
            assert_eq!(
                otherwise,
                Some(Box::new(Ir::Literal { value: Value::Number(0.into()) }))
            );
        }
        other => panic!("expected case, got {:?}", other),
    }
}

#[test]
fn test_score_has_no_server_side_lowering() {
    let e = Expr::Score {
        input: Some(Box::new(Expr::field("tasks", "status"))),
        scores: [("open".to_string(), num(1))].into_iter().collect(),
    };
    assert_eq!(compiler().compile(Some(&e), "main").unwrap(), None);
}
