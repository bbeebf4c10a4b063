use indexmap::IndexMap;

use crate::catalog::Catalog;
use crate::error::LineageError;
use crate::graph::{ColumnRef, Dep, StatementLineage, TransformationKind};
use crate::ir::{
    self, Expr, JoinConstraint, QueryBody, Relation, Select, SelectItem, SetOpExpr, WindowExpr,
};
use crate::scope::{Scope, Source, SourceBinding};

/// Functions whose result collapses many input rows into one; their argument
/// columns contribute as `aggregated`.
const AGGREGATE_FUNCTIONS: &[&str] = &[
    "any_value",
    "approx_count_distinct",
    "approx_quantiles",
    "approx_top_count",
    "approx_top_sum",
    "array_agg",
    "avg",
    "bit_and",
    "bit_or",
    "bit_xor",
    "bool_and",
    "bool_or",
    "corr",
    "count",
    "countif",
    "covar_pop",
    "covar_samp",
    "grouping",
    "logical_and",
    "logical_or",
    "max",
    "max_by",
    "min",
    "min_by",
    "percentile_cont",
    "percentile_disc",
    "stddev",
    "stddev_pop",
    "stddev_samp",
    "string_agg",
    "sum",
    "var_pop",
    "var_samp",
    "variance",
];

pub(crate) fn is_aggregate(name: &str) -> bool {
    AGGREGATE_FUNCTIONS.contains(&name)
}

/// An entity a statement defines for the rest of the run (view, created
/// table, or insert target not present in the catalog).
#[derive(Debug, Clone)]
pub struct SessionEntity {
    pub name: String,
    pub columns: Vec<String>,
}

/// One output column of a traced query, with the inputs it depends on.
#[derive(Debug, Clone)]
pub struct OutputColumn {
    pub name: String,
    pub deps: Vec<Dep>,
}

#[derive(Debug, Clone)]
struct CteEntry {
    columns: Option<Vec<String>>,
    /// Still being defined; references to it are recursive.
    open: bool,
}

/// Walks one statement's IR and produces its [`StatementLineage`].
///
/// Holds no state shared with other statements: the catalog and the session
/// entity map are read-only, so independent statements can be traced in
/// parallel.
pub struct Tracer<'a> {
    catalog: &'a Catalog,
    session: &'a IndexMap<String, Vec<String>>,
    statement: u32,
    cte_frames: Vec<IndexMap<String, CteEntry>>,
    /// Edges for named intermediates (CTEs), folded into the statement
    /// lineage alongside the statement's own outputs.
    emitted: Vec<(ColumnRef, Vec<Dep>)>,
    derived_counter: usize,
}

impl<'a> Tracer<'a> {
    pub fn new(
        catalog: &'a Catalog,
        session: &'a IndexMap<String, Vec<String>>,
        statement: u32,
    ) -> Self {
        Self {
            catalog,
            session,
            statement,
            cte_frames: vec![],
            emitted: vec![],
            derived_counter: 0,
        }
    }

    /// Entry point: traces a lowered statement into the edges it contributes
    /// and the entity it defines, if any.
    pub fn trace_statement(
        mut self,
        statement: &ir::Statement,
    ) -> Result<(StatementLineage, Option<SessionEntity>), LineageError> {
        let (outputs, defines) = match statement {
            ir::Statement::Query(query) => {
                let outputs = self.trace_query(query, None)?;
                let targets = outputs
                    .into_iter()
                    .map(|out| {
                        (
                            ColumnRef::scoped("query", &out.name, self.statement),
                            out.deps,
                        )
                    })
                    .collect();
                (targets, None)
            }
            ir::Statement::CreateView(view) => {
                let outputs = self.trace_query(&view.query, None)?;
                let named = rename_outputs(outputs, &view.columns, self.statement);
                self.entity_outputs(&view.name, named)
            }
            ir::Statement::CreateTable(table) => match &table.query {
                Some(query) => {
                    let outputs = self.trace_query(query, None)?;
                    let named = rename_outputs(outputs, &table.columns, self.statement);
                    self.entity_outputs(&table.name, named)
                }
                None => {
                    let named = table
                        .columns
                        .iter()
                        .map(|col| OutputColumn {
                            name: col.to_lowercase(),
                            deps: vec![],
                        })
                        .collect();
                    self.entity_outputs(&table.name, named)
                }
            },
            ir::Statement::Insert(insert) => {
                let outputs = match &insert.source {
                    Some(query) => self.trace_query(query, None)?,
                    None => vec![],
                };
                let table = insert.table.to_lowercase();
                let target_columns = if !insert.columns.is_empty() {
                    insert.columns.iter().map(|c| c.to_lowercase()).collect()
                } else if let Some(columns) = self
                    .session
                    .get(&table)
                    .cloned()
                    .or_else(|| self.catalog.columns_of(&table))
                {
                    columns
                } else {
                    outputs.iter().map(|out| out.name.clone()).collect()
                };
                if target_columns.len() != outputs.len() {
                    log::warn!(
                        "[{}] insert into `{}`: {} target columns but {} traced outputs",
                        self.statement,
                        table,
                        target_columns.len(),
                        outputs.len()
                    );
                }
                let named = target_columns
                    .into_iter()
                    .zip(outputs)
                    .map(|(name, out)| OutputColumn {
                        name,
                        deps: out.deps,
                    })
                    .collect();
                self.entity_outputs(&insert.table, named)
            }
        };

        let mut lineage = StatementLineage {
            statement: self.statement,
            outputs: self.emitted,
        };
        lineage.outputs.extend(outputs);
        Ok((lineage, defines))
    }

    /// Maps traced outputs onto a persistent entity's columns and decides
    /// whether the statement defines a new session entity.
    fn entity_outputs(
        &self,
        entity: &str,
        outputs: Vec<OutputColumn>,
    ) -> (Vec<(ColumnRef, Vec<Dep>)>, Option<SessionEntity>) {
        let entity = entity.to_lowercase();
        let columns: Vec<String> = outputs.iter().map(|out| out.name.clone()).collect();
        let targets = outputs
            .into_iter()
            .map(|out| (ColumnRef::physical(&entity, &out.name), out.deps))
            .collect();
        let defines = if self.session.contains_key(&entity) || self.catalog.contains(&entity) {
            None
        } else {
            Some(SessionEntity {
                name: entity,
                columns,
            })
        };
        (targets, defines)
    }

    fn trace_query(
        &mut self,
        query: &ir::Query,
        parent: Option<&Scope<'_>>,
    ) -> Result<Vec<OutputColumn>, LineageError> {
        let mut frame = IndexMap::new();
        for cte in &query.ctes {
            let name = cte.name.to_lowercase();
            if query.recursive {
                // A recursive CTE sees itself while its body is traced;
                // its columns stay unknown until the body is done, so
                // self-references bind opaquely.
                frame.insert(
                    name.clone(),
                    CteEntry {
                        columns: declared_columns(&cte.columns),
                        open: true,
                    },
                );
            }
            self.cte_frames.push(frame.clone());
            let outputs = self.trace_query(&cte.query, None);
            self.cte_frames.pop();
            frame.insert(name, self.close_cte(cte, outputs?));
        }

        self.cte_frames.push(frame);
        let outputs = self.trace_body(&query.body, parent);
        self.cte_frames.pop();
        outputs
    }

    /// Seals a traced CTE: emits its edges and records its final columns.
    fn close_cte(&mut self, cte: &ir::Cte, outputs: Vec<OutputColumn>) -> CteEntry {
        let named = rename_outputs(outputs, &cte.columns, self.statement);
        let columns: Vec<String> = named.iter().map(|out| out.name.clone()).collect();
        for out in named {
            self.emitted.push((
                ColumnRef::scoped(&cte.name, &out.name, self.statement),
                out.deps,
            ));
        }
        CteEntry {
            columns: Some(columns),
            open: false,
        }
    }

    fn trace_body(
        &mut self,
        body: &QueryBody,
        parent: Option<&Scope<'_>>,
    ) -> Result<Vec<OutputColumn>, LineageError> {
        match body {
            QueryBody::Select(select) => self.trace_select(select, parent),
            QueryBody::Query(query) => self.trace_query(query, parent),
            QueryBody::SetOp(SetOpExpr { left, right, .. }) => {
                let left_outputs = self.trace_body(left, parent)?;
                let right_outputs = self.trace_body(right, parent)?;
                if left_outputs.len() != right_outputs.len() {
                    log::warn!(
                        "[{}] set operation branches project {} and {} columns",
                        self.statement,
                        left_outputs.len(),
                        right_outputs.len()
                    );
                }
                // Branch outputs merge positionally; the left branch names
                // the result columns.
                Ok(left_outputs
                    .into_iter()
                    .zip(right_outputs)
                    .map(|(mut left, right)| {
                        left.deps.extend(right.deps);
                        left
                    })
                    .collect())
            }
            QueryBody::Values(rows) => {
                let width = rows.first().map_or(0, |row| row.len());
                let scope = match parent {
                    Some(parent) => Scope::nested(self.statement, parent),
                    None => Scope::new(self.statement),
                };
                let mut outputs: Vec<OutputColumn> = (0..width)
                    .map(|i| OutputColumn {
                        name: format!("f{}_", i),
                        deps: vec![],
                    })
                    .collect();
                for row in rows {
                    for (i, expr) in row.iter().enumerate().take(width) {
                        let deps = self.trace_expr(expr, &scope)?;
                        outputs[i].deps.extend(deps);
                    }
                }
                Ok(outputs)
            }
        }
    }

    fn trace_select(
        &mut self,
        select: &Select,
        parent: Option<&Scope<'_>>,
    ) -> Result<Vec<OutputColumn>, LineageError> {
        let mut scope = match parent {
            Some(parent) => Scope::nested(self.statement, parent),
            None => Scope::new(self.statement),
        };

        // Sources first, then join constraints: a constraint may reference
        // any table introduced before it.
        let mut constraints = vec![];
        for table in &select.from {
            let source = self.make_source(&table.relation)?;
            scope.add_source(source)?;
            for join in &table.joins {
                let source = self.make_source(&join.relation)?;
                let joined_name = source.name.clone();
                scope.add_source(source)?;
                constraints.push((joined_name, &join.constraint));
            }
        }

        let mut side_deps: Vec<Dep> = vec![];
        for (joined_name, constraint) in constraints {
            match constraint {
                JoinConstraint::On(expr) => {
                    side_deps.extend(self.trace_expr(expr, &scope)?);
                }
                JoinConstraint::Using(columns) => {
                    for column in columns {
                        scope.mark_shared(column);
                        side_deps.extend(scope.resolve(None, column)?);
                    }
                }
                JoinConstraint::Natural => {
                    for column in self.natural_join_columns(&scope, &joined_name)? {
                        scope.mark_shared(&column);
                        side_deps.extend(scope.resolve(None, &column)?);
                    }
                }
                JoinConstraint::None => {}
            }
        }

        for expr in select
            .selection
            .iter()
            .chain(&select.group_by)
            .chain(&select.having)
            .chain(&select.qualify)
        {
            side_deps.extend(self.trace_expr(expr, &scope)?);
        }
        // Predicate and grouping columns shape the result without flowing
        // into it: everything they touch contributes as filtered.
        for dep in &mut side_deps {
            dep.kind = TransformationKind::Filtered;
        }

        let mut outputs = vec![];
        for (idx, item) in select.projection.iter().enumerate() {
            match item {
                SelectItem::Expr { expr, alias } => {
                    let deps = self.trace_expr(expr, &scope)?;
                    let name = match alias {
                        Some(alias) => alias.to_lowercase(),
                        None => match expr {
                            Expr::Column(col) => col.name.to_lowercase(),
                            _ => format!("f{}_", idx),
                        },
                    };
                    outputs.push(OutputColumn { name, deps });
                }
                SelectItem::Wildcard => {
                    for (name, deps) in scope.expand_star(None)? {
                        outputs.push(OutputColumn { name, deps });
                    }
                }
                SelectItem::QualifiedWildcard(qualifier) => {
                    for (name, deps) in scope.expand_star(Some(qualifier))? {
                        outputs.push(OutputColumn { name, deps });
                    }
                }
            }
        }

        for output in &mut outputs {
            output.deps.extend(side_deps.iter().cloned());
            dedup_deps(&mut output.deps);
        }
        Ok(outputs)
    }

    /// Columns a NATURAL join merges: names the joined source shares with
    /// any source added before it. Opaque sources contribute nothing.
    fn natural_join_columns(
        &self,
        scope: &Scope<'_>,
        joined_name: &str,
    ) -> Result<Vec<String>, LineageError> {
        let mut shared = vec![];
        let joined = scope.find_source(joined_name)?;
        if let SourceBinding::Entity {
            columns: Some(columns),
            ..
        } = &joined.binding
        {
            for column in columns {
                match scope.resolve(None, column) {
                    Err(LineageError::AmbiguousReference { .. }) => shared.push(column.clone()),
                    _ => {}
                }
            }
        }
        Ok(shared)
    }

    fn make_source(&mut self, relation: &Relation) -> Result<Source, LineageError> {
        match relation {
            Relation::Table { name, alias } => {
                let entity = name.to_lowercase();
                let visible = alias
                    .as_deref()
                    .map(str::to_lowercase)
                    .unwrap_or_else(|| entity.clone());

                // Resolution order: CTEs in scope, then entities defined by
                // earlier statements, then the catalog, then opaque.
                for frame in self.cte_frames.iter().rev() {
                    if let Some(entry) = frame.get(&entity) {
                        return Ok(Source {
                            name: visible,
                            binding: SourceBinding::Entity {
                                entity,
                                statement: Some(self.statement),
                                recursive: entry.open,
                                columns: entry.columns.clone(),
                            },
                        });
                    }
                }
                let columns = self
                    .session
                    .get(&entity)
                    .cloned()
                    .or_else(|| self.catalog.columns_of(&entity));
                if columns.is_none() {
                    log::debug!(
                        "[{}] `{}` not in catalog, treated as opaque source",
                        self.statement,
                        entity
                    );
                }
                Ok(Source {
                    name: visible,
                    binding: SourceBinding::Entity {
                        entity,
                        statement: None,
                        recursive: false,
                        columns,
                    },
                })
            }
            Relation::Derived { query, alias } => {
                let outputs = self.trace_query(query, None)?;
                let name = match alias {
                    Some(alias) => alias.to_lowercase(),
                    None => {
                        self.derived_counter += 1;
                        format!("_derived{}", self.derived_counter)
                    }
                };
                let mut columns = IndexMap::new();
                for out in outputs {
                    columns.insert(out.name, out.deps);
                }
                Ok(Source {
                    name,
                    binding: SourceBinding::Derived { columns },
                })
            }
        }
    }

    /// Recursive descent over one expression, collecting every column it
    /// transitively depends on. Unknown expression kinds never get here:
    /// the adapter rejects them at lowering time.
    fn trace_expr(&mut self, expr: &Expr, scope: &Scope<'_>) -> Result<Vec<Dep>, LineageError> {
        match expr {
            Expr::Column(column) => scope.resolve(column.qualifier.as_deref(), &column.name),
            Expr::Literal(_) => Ok(vec![]),
            // `count(*)` and friends depend on row presence, not on any
            // particular column.
            Expr::Star => Ok(vec![]),
            Expr::FunctionCall(call) => {
                let mut deps = vec![];
                for arg in &call.args {
                    deps.extend(self.trace_expr(arg, scope)?);
                }
                let kind = if is_aggregate(&call.name) {
                    TransformationKind::Aggregated
                } else {
                    TransformationKind::Derived
                };
                for dep in &mut deps {
                    dep.kind = match kind {
                        TransformationKind::Aggregated => TransformationKind::Aggregated,
                        _ => dep.kind.derived(),
                    };
                }
                Ok(deps)
            }
            Expr::BinaryOp(binary) => {
                let mut deps = self.trace_expr(&binary.left, scope)?;
                deps.extend(self.trace_expr(&binary.right, scope)?);
                Ok(derive_all(deps))
            }
            Expr::UnaryOp(inner) => Ok(derive_all(self.trace_expr(inner, scope)?)),
            Expr::Case(case) => {
                let mut deps = vec![];
                if let Some(operand) = &case.operand {
                    deps.extend(self.trace_expr(operand, scope)?);
                }
                for (when, then) in &case.when_thens {
                    deps.extend(self.trace_expr(when, scope)?);
                    deps.extend(self.trace_expr(then, scope)?);
                }
                if let Some(else_expr) = &case.else_expr {
                    deps.extend(self.trace_expr(else_expr, scope)?);
                }
                Ok(derive_all(deps))
            }
            Expr::Window(window) => self.trace_window(window, scope),
            Expr::Subquery(query) => {
                // Nested pipeline run; the subquery's output columns act as
                // sources and keep the kinds they were produced with.
                let outputs = self.trace_query(query, Some(scope))?;
                Ok(outputs.into_iter().flat_map(|out| out.deps).collect())
            }
            Expr::Tuple(exprs) => {
                let mut deps = vec![];
                for expr in exprs {
                    deps.extend(self.trace_expr(expr, scope)?);
                }
                Ok(derive_all(deps))
            }
        }
    }

    fn trace_window(
        &mut self,
        window: &WindowExpr,
        scope: &Scope<'_>,
    ) -> Result<Vec<Dep>, LineageError> {
        let mut deps = vec![];
        for arg in &window.args {
            deps.extend(self.trace_expr(arg, scope)?);
        }
        if is_aggregate(&window.name) {
            for dep in &mut deps {
                dep.kind = TransformationKind::Aggregated;
            }
        } else {
            deps = derive_all(deps);
        }
        let mut clause_deps = vec![];
        for expr in window.partition_by.iter().chain(&window.order_by) {
            clause_deps.extend(self.trace_expr(expr, scope)?);
        }
        deps.extend(derive_all(clause_deps));
        Ok(deps)
    }
}

fn derive_all(mut deps: Vec<Dep>) -> Vec<Dep> {
    for dep in &mut deps {
        dep.kind = dep.kind.derived();
    }
    deps
}

fn dedup_deps(deps: &mut Vec<Dep>) {
    let mut seen = std::collections::HashSet::new();
    deps.retain(|dep| seen.insert(dep.clone()));
}

fn declared_columns(columns: &[String]) -> Option<Vec<String>> {
    if columns.is_empty() {
        None
    } else {
        Some(columns.iter().map(|c| c.to_lowercase()).collect())
    }
}

/// Applies a declared column list over traced output names; declared names
/// win positionally, extra traced outputs keep their own names.
fn rename_outputs(
    outputs: Vec<OutputColumn>,
    declared: &[String],
    statement: u32,
) -> Vec<OutputColumn> {
    if declared.len() > outputs.len() {
        log::warn!(
            "[{}] {} declared columns but only {} traced outputs",
            statement,
            declared.len(),
            outputs.len()
        );
    }
    outputs
        .into_iter()
        .enumerate()
        .map(|(idx, mut out)| {
            if let Some(name) = declared.get(idx) {
                out.name = name.to_lowercase();
            }
            out
        })
        .collect()
}
