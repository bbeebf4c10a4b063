use std::fmt::Display;

use serde::Serialize;
use strum_macros::EnumDiscriminants;
use thiserror::Error;

/// What a failed name lookup was trying to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ReferenceKind {
    #[strum(serialize = "table or alias")]
    Table,
    #[strum(serialize = "column")]
    Column,
}

/// Errors raised while resolving scopes and tracing expressions.
///
/// Every variant carries the id of the statement it was raised for, so a
/// multi-statement run can report all failures at once. Extraction of the
/// other statements keeps going; a failed statement contributes nothing to
/// the graph.
#[derive(Debug, Clone, Error, EnumDiscriminants)]
#[strum_discriminants(
    name(LineageErrorKind),
    derive(strum_macros::Display),
    strum(serialize_all = "snake_case")
)]
pub enum LineageError {
    #[error("statement {statement}: unresolved {kind} `{name}`")]
    UnresolvedReference {
        statement: u32,
        kind: ReferenceKind,
        name: String,
    },
    #[error("statement {statement}: ambiguous column `{name}`, candidates: {candidates:?}")]
    AmbiguousReference {
        statement: u32,
        name: String,
        candidates: Vec<String>,
    },
    #[error("statement {statement}: unsupported expression `{detail}`")]
    UnsupportedExpression { statement: u32, detail: String },
}

impl LineageError {
    pub fn statement(&self) -> u32 {
        match self {
            LineageError::UnresolvedReference { statement, .. }
            | LineageError::AmbiguousReference { statement, .. }
            | LineageError::UnsupportedExpression { statement, .. } => *statement,
        }
    }
}

/// Non-fatal findings collected during graph merging.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageWarning {
    /// A merged edge closed a cycle, e.g. a recursive CTE self-reference or
    /// a table that feeds an insert into itself. The edge is kept in the
    /// graph and tagged recursive.
    CyclicLineage {
        statement: u32,
        source: String,
        target: String,
    },
}

impl Display for LineageWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineageWarning::CyclicLineage {
                statement,
                source,
                target,
            } => {
                write!(
                    f,
                    "statement {}: edge {} -> {} closes a cycle, tagged recursive",
                    statement, source, target
                )
            }
        }
    }
}
