use sqlparser::ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::ParserError;

use crate::error::LineageError;
use crate::ir;

/// Parses SQL text with the external parser collaborator.
pub fn parse_sql(sql: &str) -> Result<Vec<ast::Statement>, ParserError> {
    sqlparser::parser::Parser::parse_sql(&GenericDialect {}, sql)
}

/// Lowers one parsed statement into the engine's IR.
///
/// Returns `Ok(None)` for recognized statements that carry no column lineage
/// (DROP, TRUNCATE, SET, transaction control, UPDATE/DELETE). Anything the
/// closed IR cannot represent is rejected with `UnsupportedExpression`:
/// silently dropping a dependency would corrupt the lineage, so unknown
/// constructs fail loudly instead.
pub fn lower_statement(
    statement: &ast::Statement,
    id: u32,
) -> Result<Option<ir::Statement>, LineageError> {
    Lowerer { statement: id }.lower_statement(statement)
}

struct Lowerer {
    statement: u32,
}

impl Lowerer {
    fn unsupported<T>(&self, what: &str, display: impl ToString) -> Result<T, LineageError> {
        let mut detail = display.to_string();
        if detail.len() > 120 {
            detail.truncate(117);
            detail.push_str("...");
        }
        Err(LineageError::UnsupportedExpression {
            statement: self.statement,
            detail: format!("{}: {}", what, detail),
        })
    }

    fn lower_statement(
        &self,
        statement: &ast::Statement,
    ) -> Result<Option<ir::Statement>, LineageError> {
        match statement {
            ast::Statement::Query(query) => {
                Ok(Some(ir::Statement::Query(self.lower_query(query)?)))
            }
            ast::Statement::CreateView {
                name,
                columns,
                query,
                ..
            } => Ok(Some(ir::Statement::CreateView(ir::CreateView {
                name: object_name(name),
                columns: columns.iter().map(|col| col.name.value.clone()).collect(),
                query: self.lower_query(query)?,
            }))),
            ast::Statement::CreateTable(create) => {
                Ok(Some(ir::Statement::CreateTable(ir::CreateTable {
                    name: object_name(&create.name),
                    columns: create
                        .columns
                        .iter()
                        .map(|col| col.name.value.clone())
                        .collect(),
                    query: match &create.query {
                        Some(query) => Some(self.lower_query(query)?),
                        None => None,
                    },
                })))
            }
            ast::Statement::Insert(insert) => {
                let table = match &insert.table {
                    ast::TableObject::TableName(name) => object_name(name),
                    other => return self.unsupported("insert target", other),
                };
                Ok(Some(ir::Statement::Insert(ir::Insert {
                    table,
                    columns: insert.columns.iter().map(|col| col.value.clone()).collect(),
                    source: match &insert.source {
                        Some(query) => Some(self.lower_query(query)?),
                        None => None,
                    },
                })))
            }
            ast::Statement::Drop { .. }
            | ast::Statement::Truncate { .. }
            | ast::Statement::Set { .. }
            | ast::Statement::StartTransaction { .. }
            | ast::Statement::Commit { .. }
            | ast::Statement::Rollback { .. }
            | ast::Statement::Update { .. }
            | ast::Statement::Delete { .. } => {
                log::debug!(
                    "[{}] skipping statement without column lineage: {}",
                    self.statement,
                    statement_summary(statement)
                );
                Ok(None)
            }
            other => self.unsupported("statement", other),
        }
    }

    fn lower_query(&self, query: &ast::Query) -> Result<ir::Query, LineageError> {
        let mut ctes = vec![];
        let mut recursive = false;
        if let Some(with) = &query.with {
            recursive = with.recursive;
            for cte in &with.cte_tables {
                ctes.push(ir::Cte {
                    name: cte.alias.name.value.clone(),
                    columns: cte
                        .alias
                        .columns
                        .iter()
                        .map(|col| col.name.value.clone())
                        .collect(),
                    query: self.lower_query(&cte.query)?,
                });
            }
        }
        Ok(ir::Query {
            ctes,
            recursive,
            body: self.lower_set_expr(&query.body)?,
        })
    }

    fn lower_set_expr(&self, body: &ast::SetExpr) -> Result<ir::QueryBody, LineageError> {
        match body {
            ast::SetExpr::Select(select) => Ok(ir::QueryBody::Select(Box::new(
                self.lower_select(select)?,
            ))),
            ast::SetExpr::Query(query) => {
                Ok(ir::QueryBody::Query(Box::new(self.lower_query(query)?)))
            }
            ast::SetExpr::SetOperation {
                op, left, right, ..
            } => Ok(ir::QueryBody::SetOp(ir::SetOpExpr {
                op: match op {
                    ast::SetOperator::Union => ir::SetOpKind::Union,
                    ast::SetOperator::Intersect => ir::SetOpKind::Intersect,
                    _ => ir::SetOpKind::Except,
                },
                left: Box::new(self.lower_set_expr(left)?),
                right: Box::new(self.lower_set_expr(right)?),
            })),
            ast::SetExpr::Values(values) => {
                let mut rows = vec![];
                for row in &values.rows {
                    let mut lowered = vec![];
                    for expr in row {
                        lowered.push(self.lower_expr(expr)?);
                    }
                    rows.push(lowered);
                }
                Ok(ir::QueryBody::Values(rows))
            }
            other => self.unsupported("query body", other),
        }
    }

    fn lower_select(&self, select: &ast::Select) -> Result<ir::Select, LineageError> {
        let mut projection = vec![];
        for item in &select.projection {
            projection.push(self.lower_select_item(item)?);
        }

        let mut from = vec![];
        for table in &select.from {
            from.push(self.lower_table_with_joins(table)?);
        }

        let group_by = match &select.group_by {
            ast::GroupByExpr::Expressions(exprs, _) => {
                let mut lowered = vec![];
                for expr in exprs {
                    lowered.push(self.lower_expr(expr)?);
                }
                lowered
            }
            ast::GroupByExpr::All(_) => vec![],
        };

        Ok(ir::Select {
            projection,
            from,
            selection: self.lower_opt_expr(&select.selection)?,
            group_by,
            having: self.lower_opt_expr(&select.having)?,
            qualify: self.lower_opt_expr(&select.qualify)?,
        })
    }

    fn lower_opt_expr(&self, expr: &Option<ast::Expr>) -> Result<Option<ir::Expr>, LineageError> {
        match expr {
            Some(expr) => Ok(Some(self.lower_expr(expr)?)),
            None => Ok(None),
        }
    }

    fn lower_select_item(&self, item: &ast::SelectItem) -> Result<ir::SelectItem, LineageError> {
        match item {
            ast::SelectItem::UnnamedExpr(expr) => Ok(ir::SelectItem::Expr {
                expr: self.lower_expr(expr)?,
                alias: None,
            }),
            ast::SelectItem::ExprWithAlias { expr, alias } => Ok(ir::SelectItem::Expr {
                expr: self.lower_expr(expr)?,
                alias: Some(alias.value.clone()),
            }),
            ast::SelectItem::Wildcard(_) => Ok(ir::SelectItem::Wildcard),
            ast::SelectItem::QualifiedWildcard(kind, _) => match kind {
                ast::SelectItemQualifiedWildcardKind::ObjectName(name) => {
                    Ok(ir::SelectItem::QualifiedWildcard(object_name(name)))
                }
                other => self.unsupported("qualified wildcard", other),
            },
        }
    }

    fn lower_table_with_joins(
        &self,
        table: &ast::TableWithJoins,
    ) -> Result<ir::TableWithJoins, LineageError> {
        let (relation, mut joins) = self.lower_table_factor(&table.relation)?;
        for join in &table.joins {
            let (joined, nested) = self.lower_table_factor(&join.relation)?;
            joins.push(ir::Join {
                relation: joined,
                constraint: self.lower_join_constraint(&join.join_operator)?,
            });
            joins.extend(nested);
        }
        Ok(ir::TableWithJoins { relation, joins })
    }

    /// Lowers a table factor; parenthesized join trees flatten into the
    /// returned join list.
    fn lower_table_factor(
        &self,
        factor: &ast::TableFactor,
    ) -> Result<(ir::Relation, Vec<ir::Join>), LineageError> {
        match factor {
            ast::TableFactor::Table { name, alias, .. } => Ok((
                ir::Relation::Table {
                    name: object_name(name),
                    alias: alias.as_ref().map(|a| a.name.value.clone()),
                },
                vec![],
            )),
            ast::TableFactor::Derived {
                subquery, alias, ..
            } => Ok((
                ir::Relation::Derived {
                    query: Box::new(self.lower_query(subquery)?),
                    alias: alias.as_ref().map(|a| a.name.value.clone()),
                },
                vec![],
            )),
            ast::TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                let inner = self.lower_table_with_joins(table_with_joins)?;
                Ok((inner.relation, inner.joins))
            }
            other => self.unsupported("table factor", other),
        }
    }

    fn lower_join_constraint(
        &self,
        operator: &ast::JoinOperator,
    ) -> Result<ir::JoinConstraint, LineageError> {
        use ast::JoinOperator::*;
        let constraint = match operator {
            Join(c) | Inner(c) | Left(c) | LeftOuter(c) | Right(c) | RightOuter(c)
            | FullOuter(c) | Semi(c) | LeftSemi(c) | RightSemi(c) | Anti(c) | LeftAnti(c)
            | RightAnti(c) | StraightJoin(c) => c,
            _ => return Ok(ir::JoinConstraint::None),
        };
        Ok(match constraint {
            ast::JoinConstraint::On(expr) => ir::JoinConstraint::On(self.lower_expr(expr)?),
            ast::JoinConstraint::Using(columns) => ir::JoinConstraint::Using(
                columns.iter().map(|col| unquote(&col.to_string())).collect(),
            ),
            ast::JoinConstraint::Natural => ir::JoinConstraint::Natural,
            ast::JoinConstraint::None => ir::JoinConstraint::None,
        })
    }

    fn lower_expr(&self, expr: &ast::Expr) -> Result<ir::Expr, LineageError> {
        match expr {
            ast::Expr::Identifier(ident) => Ok(ir::Expr::Column(ir::ColumnExpr {
                qualifier: None,
                name: ident.value.clone(),
            })),
            ast::Expr::CompoundIdentifier(parts) => {
                let Some((name, qualifier)) = parts.split_last() else {
                    return self.unsupported("expression", expr);
                };
                Ok(ir::Expr::Column(ir::ColumnExpr {
                    qualifier: Some(
                        qualifier
                            .iter()
                            .map(|part| part.value.clone())
                            .collect::<Vec<_>>()
                            .join("."),
                    ),
                    name: name.value.clone(),
                }))
            }
            ast::Expr::Value(value) => Ok(ir::Expr::Literal(lower_value(&value.value))),
            ast::Expr::TypedString { .. } => {
                Ok(ir::Expr::Literal(ir::Literal::String(expr.to_string())))
            }
            ast::Expr::BinaryOp { left, op, right } => Ok(ir::Expr::BinaryOp(ir::BinaryOpExpr {
                left: Box::new(self.lower_expr(left)?),
                op: op.to_string(),
                right: Box::new(self.lower_expr(right)?),
            })),
            ast::Expr::UnaryOp { expr, .. } => {
                Ok(ir::Expr::UnaryOp(Box::new(self.lower_expr(expr)?)))
            }
            ast::Expr::Nested(inner) => self.lower_expr(inner),
            ast::Expr::Function(function) => self.lower_function(function),
            ast::Expr::Case {
                operand,
                conditions,
                else_result,
                ..
            } => {
                let mut when_thens = vec![];
                for when in conditions {
                    when_thens.push((
                        self.lower_expr(&when.condition)?,
                        self.lower_expr(&when.result)?,
                    ));
                }
                Ok(ir::Expr::Case(ir::CaseExpr {
                    operand: match operand {
                        Some(operand) => Some(Box::new(self.lower_expr(operand)?)),
                        None => None,
                    },
                    when_thens,
                    else_expr: match else_result {
                        Some(else_result) => Some(Box::new(self.lower_expr(else_result)?)),
                        None => None,
                    },
                }))
            }
            ast::Expr::Cast { expr, .. } => Ok(ir::Expr::FunctionCall(ir::FunctionCallExpr {
                name: "cast".to_owned(),
                args: vec![self.lower_expr(expr)?],
            })),
            ast::Expr::Subquery(query) => {
                Ok(ir::Expr::Subquery(Box::new(self.lower_query(query)?)))
            }
            ast::Expr::Exists { subquery, .. } => {
                Ok(ir::Expr::Subquery(Box::new(self.lower_query(subquery)?)))
            }
            ast::Expr::InSubquery { expr, subquery, .. } => Ok(ir::Expr::Tuple(vec![
                self.lower_expr(expr)?,
                ir::Expr::Subquery(Box::new(self.lower_query(subquery)?)),
            ])),
            ast::Expr::InList { expr, list, .. } => {
                let mut items = vec![self.lower_expr(expr)?];
                for item in list {
                    items.push(self.lower_expr(item)?);
                }
                Ok(ir::Expr::Tuple(items))
            }
            ast::Expr::Between {
                expr, low, high, ..
            } => Ok(ir::Expr::Tuple(vec![
                self.lower_expr(expr)?,
                self.lower_expr(low)?,
                self.lower_expr(high)?,
            ])),
            ast::Expr::IsNull(inner)
            | ast::Expr::IsNotNull(inner)
            | ast::Expr::IsTrue(inner)
            | ast::Expr::IsNotTrue(inner)
            | ast::Expr::IsFalse(inner)
            | ast::Expr::IsNotFalse(inner)
            | ast::Expr::IsUnknown(inner)
            | ast::Expr::IsNotUnknown(inner) => {
                Ok(ir::Expr::UnaryOp(Box::new(self.lower_expr(inner)?)))
            }
            ast::Expr::IsDistinctFrom(left, right)
            | ast::Expr::IsNotDistinctFrom(left, right) => Ok(ir::Expr::Tuple(vec![
                self.lower_expr(left)?,
                self.lower_expr(right)?,
            ])),
            ast::Expr::Like { expr, pattern, .. }
            | ast::Expr::ILike { expr, pattern, .. }
            | ast::Expr::SimilarTo { expr, pattern, .. } => Ok(ir::Expr::Tuple(vec![
                self.lower_expr(expr)?,
                self.lower_expr(pattern)?,
            ])),
            ast::Expr::AnyOp { left, right, .. } | ast::Expr::AllOp { left, right, .. } => {
                Ok(ir::Expr::Tuple(vec![
                    self.lower_expr(left)?,
                    self.lower_expr(right)?,
                ]))
            }
            ast::Expr::Tuple(exprs) => {
                let mut items = vec![];
                for expr in exprs {
                    items.push(self.lower_expr(expr)?);
                }
                Ok(ir::Expr::Tuple(items))
            }
            ast::Expr::Extract { expr, .. }
            | ast::Expr::Ceil { expr, .. }
            | ast::Expr::Floor { expr, .. }
            | ast::Expr::Collate { expr, .. } => {
                Ok(ir::Expr::UnaryOp(Box::new(self.lower_expr(expr)?)))
            }
            ast::Expr::Position { expr, r#in } => Ok(ir::Expr::Tuple(vec![
                self.lower_expr(expr)?,
                self.lower_expr(r#in)?,
            ])),
            ast::Expr::Substring {
                expr,
                substring_from,
                substring_for,
                ..
            } => {
                let mut items = vec![self.lower_expr(expr)?];
                if let Some(from) = substring_from {
                    items.push(self.lower_expr(from)?);
                }
                if let Some(length) = substring_for {
                    items.push(self.lower_expr(length)?);
                }
                Ok(ir::Expr::Tuple(items))
            }
            ast::Expr::Trim {
                expr, trim_what, ..
            } => {
                let mut items = vec![self.lower_expr(expr)?];
                if let Some(what) = trim_what {
                    items.push(self.lower_expr(what)?);
                }
                Ok(ir::Expr::Tuple(items))
            }
            ast::Expr::Interval(interval) => {
                Ok(ir::Expr::UnaryOp(Box::new(self.lower_expr(&interval.value)?)))
            }
            ast::Expr::Wildcard { .. } | ast::Expr::QualifiedWildcard { .. } => Ok(ir::Expr::Star),
            other => self.unsupported("expression", other),
        }
    }

    fn lower_function(&self, function: &ast::Function) -> Result<ir::Expr, LineageError> {
        let name = unquote(&function.name.to_string()).to_lowercase();

        let mut args = vec![];
        match &function.args {
            ast::FunctionArguments::None => {}
            ast::FunctionArguments::Subquery(query) => {
                args.push(ir::Expr::Subquery(Box::new(self.lower_query(query)?)));
            }
            ast::FunctionArguments::List(list) => {
                for arg in &list.args {
                    let arg_expr = match arg {
                        ast::FunctionArg::Named { arg, .. }
                        | ast::FunctionArg::ExprNamed { arg, .. }
                        | ast::FunctionArg::Unnamed(arg) => arg,
                    };
                    match arg_expr {
                        ast::FunctionArgExpr::Expr(expr) => args.push(self.lower_expr(expr)?),
                        ast::FunctionArgExpr::Wildcard
                        | ast::FunctionArgExpr::QualifiedWildcard(_) => args.push(ir::Expr::Star),
                    }
                }
            }
        }
        if let Some(filter) = &function.filter {
            args.push(self.lower_expr(filter)?);
        }

        match &function.over {
            None => Ok(ir::Expr::FunctionCall(ir::FunctionCallExpr { name, args })),
            Some(ast::WindowType::NamedWindow(_)) => Ok(ir::Expr::Window(ir::WindowExpr {
                name,
                args,
                partition_by: vec![],
                order_by: vec![],
            })),
            Some(ast::WindowType::WindowSpec(spec)) => {
                let mut partition_by = vec![];
                for expr in &spec.partition_by {
                    partition_by.push(self.lower_expr(expr)?);
                }
                let mut order_by = vec![];
                for order in &spec.order_by {
                    order_by.push(self.lower_expr(&order.expr)?);
                }
                Ok(ir::Expr::Window(ir::WindowExpr {
                    name,
                    args,
                    partition_by,
                    order_by,
                }))
            }
        }
    }
}

fn lower_value(value: &ast::Value) -> ir::Literal {
    match value {
        ast::Value::Number(number, _) => ir::Literal::Number(number.clone()),
        ast::Value::Boolean(flag) => ir::Literal::Bool(*flag),
        ast::Value::Null => ir::Literal::Null,
        other => ir::Literal::String(other.to_string()),
    }
}

fn object_name(name: &ast::ObjectName) -> String {
    name.0
        .iter()
        .map(|part| unquote(&part.to_string()))
        .collect::<Vec<_>>()
        .join(".")
}

/// Strips one layer of identifier quoting.
fn unquote(identifier: &str) -> String {
    let trimmed = identifier.trim();
    for quote in ['"', '`'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_owned();
        }
    }
    trimmed.to_owned()
}

fn statement_summary(statement: &ast::Statement) -> String {
    let text = statement.to_string();
    match text.split_whitespace().take(3).collect::<Vec<_>>().join(" ") {
        summary if summary.is_empty() => text,
        summary => summary,
    }
}
