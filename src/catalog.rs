use serde::{Deserialize, Serialize};

/// A column of a cataloged table or view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
}

/// A physical entity known ahead of extraction.
///
/// `name` is the fully qualified identifier used in queries
/// (e.g. `db.schema.users` or just `users`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaObject {
    pub name: String,
    pub kind: SchemaObjectKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaObjectKind {
    Table { columns: Vec<Column> },
    View { columns: Vec<Column> },
}

/// The optional schema catalog supplied by the caller.
///
/// Tables absent from the catalog are still valid lineage sources: qualified
/// references bind to them on demand. The catalog is what makes `SELECT *`
/// expansion and unqualified-column disambiguation possible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub schema_objects: Vec<SchemaObject>,
}

impl Catalog {
    /// Column names of `name`, lowercased, in declaration order.
    /// Lookup is case-insensitive on the object name.
    pub fn columns_of(&self, name: &str) -> Option<Vec<String>> {
        self.schema_objects
            .iter()
            .find(|obj| obj.name.eq_ignore_ascii_case(name))
            .map(|obj| match &obj.kind {
                SchemaObjectKind::Table { columns } | SchemaObjectKind::View { columns } => {
                    columns.iter().map(|col| col.name.to_lowercase()).collect()
                }
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schema_objects
            .iter()
            .any(|obj| obj.name.eq_ignore_ascii_case(name))
    }
}
