//! # sqlex
//!
//! A library for explaining SQL queries: it walks parsed SQL statements and
//! extracts a column-level provenance graph.
//!
//! # Features
//!
//! - Consume `sqlparser` ASTs and lower them into a small dialect-neutral IR.
//! - Resolve tables, aliases, CTEs and subqueries into per-statement scopes.
//! - Trace every output column to the input columns it depends on, classified
//!   as direct copy, derived, aggregated or filtered.
//! - Chain lineage across statements: views and tables defined earlier in a
//!   run feed the statements that read them.
//! - Keep recursive CTE cycles in the graph, tagged instead of rejected.
//! - Query the graph upstream and downstream with depth-bounded, cycle-safe
//!   traversals, and serialize it to a graph-exchange JSON document.
//!
//! # Example
//!
//! ```rust,no_run
//! use sqlex::{
//!     adapter::parse_sql,
//!     catalog::{Catalog, Column, SchemaObject, SchemaObjectKind},
//!     graph::ColumnRef,
//!     lineage::extract_lineage,
//! };
//!
//! fn column(name: &str) -> Column {
//!     Column {
//!         name: name.to_owned(),
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     env_logger::init();
//!
//!     let sql = r#"
//!         create view active_users as
//!         select id, upper(name) as display_name
//!         from users
//!         where active;
//!
//!         select display_name from active_users;
//!     "#;
//!
//!     let catalog = Catalog {
//!         schema_objects: vec![SchemaObject {
//!             name: "users".to_owned(),
//!             kind: SchemaObjectKind::Table {
//!                 columns: vec![column("id"), column("name"), column("active")],
//!             },
//!         }],
//!     };
//!
//!     let statements = parse_sql(sql)?;
//!     let extracted = extract_lineage(&[statements], &catalog, false);
//!     for err in &extracted.errors {
//!         eprintln!("{err}");
//!     }
//!
//!     let target = ColumnRef::scoped("query", "display_name", 1);
//!     for node in extracted.graph.upstream(&target, 16) {
//!         println!("{}", extracted.graph.node(node));
//!     }
//!     Ok(())
//! }
//! ```
pub mod adapter;
pub mod catalog;
pub mod error;
pub mod graph;
pub mod ir;
pub mod lineage;
pub mod scope;
pub mod trace;
pub mod traverse;
