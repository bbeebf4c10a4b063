use indexmap::IndexMap;
use rayon::prelude::*;
use sqlparser::ast;

use crate::adapter::lower_statement;
use crate::catalog::Catalog;
use crate::error::{LineageError, LineageWarning};
use crate::graph::{LineageGraph, StatementLineage};
use crate::trace::Tracer;

/// Result of an extraction run: the accumulated graph plus everything that
/// went wrong along the way. A statement that failed contributes an error
/// and no edges; the remaining statements are still processed.
#[derive(Debug, Default)]
pub struct ExtractedLineage {
    pub graph: LineageGraph,
    pub errors: Vec<LineageError>,
    pub warnings: Vec<LineageWarning>,
}

/// Extracts column-level lineage from one or more scripts of parsed
/// statements against an optional catalog.
///
/// Statements are numbered globally in caller order, and that order is the
/// tie-break for competing producers of the same column. Within a script,
/// statements run sequentially so later ones see the views and tables
/// earlier ones define.
///
/// With `parallel` set, scripts are traced concurrently over a rayon pool
/// and merged in script order; entity definitions then do not cross script
/// boundaries, so use sequential mode when one file builds views another
/// file reads.
pub fn extract_lineage(
    scripts: &[Vec<ast::Statement>],
    catalog: &Catalog,
    parallel: bool,
) -> ExtractedLineage {
    let mut offsets = Vec::with_capacity(scripts.len());
    let mut next_id = 0u32;
    for script in scripts {
        offsets.push(next_id);
        next_id += script.len() as u32;
    }

    let script_results: Vec<ScriptLineage> = if parallel {
        scripts
            .par_iter()
            .zip(offsets)
            .map(|(script, first_id)| {
                let mut session = IndexMap::new();
                extract_script(script, catalog, first_id, &mut session)
            })
            .collect()
    } else {
        let mut session = IndexMap::new();
        scripts
            .iter()
            .zip(offsets)
            .map(|(script, first_id)| extract_script(script, catalog, first_id, &mut session))
            .collect()
    };

    let mut extracted = ExtractedLineage::default();
    for script in script_results {
        for statement in script.statements {
            let warnings = extracted.graph.merge(statement);
            extracted.warnings.extend(warnings);
        }
        extracted.errors.extend(script.errors);
    }
    extracted
}

struct ScriptLineage {
    statements: Vec<StatementLineage>,
    errors: Vec<LineageError>,
}

fn extract_script(
    script: &[ast::Statement],
    catalog: &Catalog,
    first_id: u32,
    session: &mut IndexMap<String, Vec<String>>,
) -> ScriptLineage {
    let mut lineage = ScriptLineage {
        statements: vec![],
        errors: vec![],
    };
    for (idx, statement) in script.iter().enumerate() {
        let id = first_id + idx as u32;
        let lowered = match lower_statement(statement, id) {
            Ok(Some(lowered)) => lowered,
            Ok(None) => continue,
            Err(err) => {
                lineage.errors.push(err);
                continue;
            }
        };
        let traced = Tracer::new(catalog, session, id).trace_statement(&lowered);
        match traced {
            Ok((traced, defines)) => {
                lineage.statements.push(traced);
                if let Some(entity) = defines {
                    log::debug!(
                        "[{}] defines `{}` with columns {:?}",
                        id,
                        entity.name,
                        entity.columns
                    );
                    session.insert(entity.name, entity.columns);
                }
            }
            Err(err) => lineage.errors.push(err),
        }
    }
    lineage
}
