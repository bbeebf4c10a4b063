use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::{LineageError, ReferenceKind};
use crate::graph::{ColumnRef, Dep, TransformationKind};

/// How a visible source yields dependencies for the columns bound to it.
#[derive(Debug, Clone)]
pub enum SourceBinding {
    /// A named entity: physical table/view, session-defined view, or CTE.
    /// `columns` is `None` for opaque tables missing from the catalog, whose
    /// columns materialize on demand from qualified references.
    Entity {
        entity: String,
        statement: Option<u32>,
        /// The entity is currently being defined (recursive CTE body);
        /// dependencies on it close a cycle.
        recursive: bool,
        columns: Option<Vec<String>>,
    },
    /// A derived table; its output columns carry already-traced dependency
    /// sets, so binding flattens through it.
    Derived { columns: IndexMap<String, Vec<Dep>> },
}

/// One table/alias/CTE visible in a statement's FROM clause.
#[derive(Debug, Clone)]
pub struct Source {
    /// The name the source is visible under (alias, or the entity name).
    pub name: String,
    pub binding: SourceBinding,
}

impl Source {
    /// `None` means the source is opaque and may contain any column.
    fn has_column(&self, column: &str) -> Option<bool> {
        match &self.binding {
            SourceBinding::Entity { columns, .. } => columns
                .as_ref()
                .map(|cols| cols.iter().any(|c| c == column)),
            SourceBinding::Derived { columns } => Some(columns.contains_key(column)),
        }
    }

    fn deps_for(&self, column: &str) -> Vec<Dep> {
        match &self.binding {
            SourceBinding::Entity {
                entity,
                statement,
                recursive,
                ..
            } => {
                vec![Dep {
                    source: ColumnRef {
                        entity: entity.clone(),
                        column: column.to_owned(),
                        statement: *statement,
                    },
                    kind: TransformationKind::Direct,
                    recursive: *recursive,
                }]
            }
            SourceBinding::Derived { columns } => columns.get(column).cloned().unwrap_or_default(),
        }
    }

    fn column_names(&self) -> Option<Vec<String>> {
        match &self.binding {
            SourceBinding::Entity { columns, .. } => columns.clone(),
            SourceBinding::Derived { columns } => Some(columns.keys().cloned().collect()),
        }
    }
}

/// Name resolution environment for one statement level.
///
/// Subquery scopes chain to their enclosing scope read-only, so correlated
/// references resolve outward only after every local source has been ruled
/// out. Construction and resolution are pure over the IR plus the enclosing
/// scope; scopes are discarded once the statement is traced.
#[derive(Debug)]
pub struct Scope<'a> {
    statement: u32,
    sources: Vec<Source>,
    /// Columns merged by USING/NATURAL joins: resolving them unqualified
    /// binds every side instead of being ambiguous.
    shared_columns: HashSet<String>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new(statement: u32) -> Self {
        Self {
            statement,
            sources: vec![],
            shared_columns: HashSet::new(),
            parent: None,
        }
    }

    pub fn nested(statement: u32, parent: &'a Scope<'a>) -> Self {
        Self {
            statement,
            sources: vec![],
            shared_columns: HashSet::new(),
            parent: Some(parent),
        }
    }

    pub fn statement(&self) -> u32 {
        self.statement
    }

    pub fn add_source(&mut self, source: Source) -> Result<(), LineageError> {
        if self.sources.iter().any(|s| s.name == source.name) {
            return Err(LineageError::AmbiguousReference {
                statement: self.statement,
                name: source.name,
                candidates: vec![],
            });
        }
        log::debug!("[{}] scope source `{}`", self.statement, source.name);
        self.sources.push(source);
        Ok(())
    }

    pub fn mark_shared(&mut self, column: &str) {
        self.shared_columns.insert(column.to_lowercase());
    }

    /// Finds the source a qualifier refers to, in this scope or an enclosing
    /// one. A qualifier matches a source's visible name exactly, or the last
    /// segment of a dotted entity name when that is unambiguous.
    pub fn find_source(&self, qualifier: &str) -> Result<&Source, LineageError> {
        if let Some(source) = self.sources.iter().find(|s| s.name == qualifier) {
            return Ok(source);
        }
        let by_tail: Vec<&Source> = self
            .sources
            .iter()
            .filter(|s| s.name.rsplit('.').next() == Some(qualifier))
            .collect();
        match by_tail.len() {
            1 => return Ok(by_tail[0]),
            0 => {}
            _ => {
                return Err(LineageError::AmbiguousReference {
                    statement: self.statement,
                    name: qualifier.to_owned(),
                    candidates: by_tail.iter().map(|s| s.name.clone()).collect(),
                });
            }
        }
        if let Some(parent) = self.parent {
            return parent.find_source(qualifier);
        }
        Err(LineageError::UnresolvedReference {
            statement: self.statement,
            kind: ReferenceKind::Table,
            name: qualifier.to_owned(),
        })
    }

    /// Binds a column reference to its dependency set.
    pub fn resolve(&self, qualifier: Option<&str>, column: &str) -> Result<Vec<Dep>, LineageError> {
        let column = column.to_lowercase();
        if let Some(qualifier) = qualifier {
            let qualifier = qualifier.to_lowercase();
            let source = self.find_source(&qualifier)?;
            if source.has_column(&column) == Some(false) {
                return Err(LineageError::UnresolvedReference {
                    statement: self.statement,
                    kind: ReferenceKind::Column,
                    name: format!("{}.{}", qualifier, column),
                });
            }
            return Ok(source.deps_for(&column));
        }

        if self.shared_columns.contains(&column) {
            // Merged join column: every side carries it, including opaque
            // sources whose membership the join constraint itself proves.
            let deps: Vec<Dep> = self
                .sources
                .iter()
                .filter(|s| s.has_column(&column) != Some(false))
                .flat_map(|s| s.deps_for(&column))
                .collect();
            if !deps.is_empty() {
                return Ok(deps);
            }
        }

        let known: Vec<&Source> = self
            .sources
            .iter()
            .filter(|s| s.has_column(&column) == Some(true))
            .collect();
        match known.len() {
            1 => return Ok(known[0].deps_for(&column)),
            0 => {}
            _ => {
                return Err(LineageError::AmbiguousReference {
                    statement: self.statement,
                    name: column,
                    candidates: known.iter().map(|s| s.name.clone()).collect(),
                });
            }
        }

        let opaque: Vec<&Source> = self
            .sources
            .iter()
            .filter(|s| s.has_column(&column).is_none())
            .collect();
        match opaque.len() {
            1 => Ok(opaque[0].deps_for(&column)),
            0 => {
                if let Some(parent) = self.parent {
                    return parent.resolve(None, &column);
                }
                Err(LineageError::UnresolvedReference {
                    statement: self.statement,
                    kind: ReferenceKind::Column,
                    name: column,
                })
            }
            _ => Err(LineageError::AmbiguousReference {
                statement: self.statement,
                name: column,
                candidates: opaque.iter().map(|s| s.name.clone()).collect(),
            }),
        }
    }

    /// Expands `*` or `alias.*` into named outputs with their dependencies.
    /// Columns merged by USING/NATURAL joins appear once, fed by all sides.
    pub fn expand_star(
        &self,
        qualifier: Option<&str>,
    ) -> Result<Vec<(String, Vec<Dep>)>, LineageError> {
        let sources: Vec<&Source> = match qualifier {
            Some(qualifier) => vec![self.find_source(&qualifier.to_lowercase())?],
            None => self.sources.iter().collect(),
        };

        let mut expanded: Vec<(String, Vec<Dep>)> = vec![];
        let mut seen_shared: HashSet<String> = HashSet::new();
        for source in sources {
            let Some(columns) = source.column_names() else {
                return Err(LineageError::UnresolvedReference {
                    statement: self.statement,
                    kind: ReferenceKind::Column,
                    name: match qualifier {
                        Some(q) => format!("{}.*", q),
                        None => "*".to_owned(),
                    },
                });
            };
            for column in columns {
                if self.shared_columns.contains(&column) && qualifier.is_none() {
                    if !seen_shared.insert(column.clone()) {
                        continue;
                    }
                    // Resolve through the scope so every joined side feeds it.
                    expanded.push((column.clone(), self.resolve(None, &column)?));
                } else {
                    expanded.push((column.clone(), source.deps_for(&column)));
                }
            }
        }
        Ok(expanded)
    }
}
