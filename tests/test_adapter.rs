use sqlex::adapter::{lower_statement, parse_sql};
use sqlex::error::LineageErrorKind;
use sqlex::ir;

fn lower_one(sql: &str) -> Option<ir::Statement> {
    let statements = parse_sql(sql).expect("valid sql");
    assert_eq!(statements.len(), 1);
    lower_statement(&statements[0], 0).expect("lowering should succeed")
}

fn first_select(statement: &ir::Statement) -> &ir::Select {
    let ir::Statement::Query(query) = statement else {
        panic!("expected a query statement");
    };
    let ir::QueryBody::Select(select) = &query.body else {
        panic!("expected a plain select body");
    };
    select
}

#[test]
fn test_compound_identifier_splits_qualifier() {
    let statement = lower_one("select db.t.a from db.t").unwrap();
    let select = first_select(&statement);

    let ir::SelectItem::Expr { expr, alias: None } = &select.projection[0] else {
        panic!("expected an unaliased expression item");
    };
    let ir::Expr::Column(column) = expr else {
        panic!("expected a column expression");
    };
    assert_eq!(column.qualifier.as_deref(), Some("db.t"));
    assert_eq!(column.name, "a");
}

#[test]
fn test_quoted_table_name_is_unquoted() {
    let statement = lower_one(r#"select a from "My Table""#).unwrap();
    let select = first_select(&statement);

    let ir::Relation::Table { name, alias } = &select.from[0].relation else {
        panic!("expected a plain table relation");
    };
    assert_eq!(name, "My Table");
    assert!(alias.is_none());
}

#[test]
fn test_cast_lowers_to_function_call() {
    let statement = lower_one("select cast(a as int) from t").unwrap();
    let select = first_select(&statement);

    let ir::SelectItem::Expr { expr, .. } = &select.projection[0] else {
        panic!("expected an expression item");
    };
    let ir::Expr::FunctionCall(call) = expr else {
        panic!("expected a function call");
    };
    assert_eq!(call.name, "cast");
    assert_eq!(call.args.len(), 1);
    assert!(matches!(call.args[0], ir::Expr::Column(_)));
}

#[test]
fn test_case_keeps_all_branches() {
    let statement =
        lower_one("select case when a > 0 then b when a < 0 then c else d end from t").unwrap();
    let select = first_select(&statement);

    let ir::SelectItem::Expr { expr, .. } = &select.projection[0] else {
        panic!("expected an expression item");
    };
    let ir::Expr::Case(case) = expr else {
        panic!("expected a case expression");
    };
    assert!(case.operand.is_none());
    assert_eq!(case.when_thens.len(), 2);
    assert!(case.else_expr.is_some());
}

#[test]
fn test_windowed_aggregate_keeps_clauses() {
    let statement = lower_one("select sum(a) over (partition by g order by ts) from t").unwrap();
    let select = first_select(&statement);

    let ir::SelectItem::Expr { expr, .. } = &select.projection[0] else {
        panic!("expected an expression item");
    };
    let ir::Expr::Window(window) = expr else {
        panic!("expected a window expression");
    };
    assert_eq!(window.name, "sum");
    assert_eq!(window.args.len(), 1);
    assert_eq!(window.partition_by.len(), 1);
    assert_eq!(window.order_by.len(), 1);
}

#[test]
fn test_using_join_lowers_column_list() {
    let statement = lower_one("select a.id from a join b using (id)").unwrap();
    let select = first_select(&statement);

    let joins = &select.from[0].joins;
    assert_eq!(joins.len(), 1);
    let ir::JoinConstraint::Using(columns) = &joins[0].constraint else {
        panic!("expected a USING constraint");
    };
    assert_eq!(columns, &vec!["id".to_owned()]);
}

#[test]
fn test_lineage_free_statements_are_skipped() {
    for sql in ["drop table t", "truncate table t", "commit"] {
        assert!(lower_one(sql).is_none(), "expected {sql:?} to be skipped");
    }
}

#[test]
fn test_unsupported_statement_is_rejected() {
    let statements = parse_sql("create index idx on t(a)").expect("valid sql");
    let err = lower_statement(&statements[0], 3).unwrap_err();
    assert_eq!(
        LineageErrorKind::from(&err).to_string(),
        "unsupported_expression"
    );
    assert!(err.to_string().starts_with("statement 3:"), "err was: {err}");
}

#[test]
fn test_parse_error_surfaces() {
    assert!(parse_sql("select 1 +").is_err());
}
