use sqlex::adapter::parse_sql;
use sqlex::catalog::{Catalog, Column, SchemaObject, SchemaObjectKind};
use sqlex::graph::{ColumnRef, GraphDoc, LineageGraph, TransformationKind};
use sqlex::lineage::{ExtractedLineage, extract_lineage};

fn table(name: &str, columns: &[&str]) -> SchemaObject {
    SchemaObject {
        name: name.to_owned(),
        kind: SchemaObjectKind::Table {
            columns: columns
                .iter()
                .map(|col| Column {
                    name: (*col).to_owned(),
                })
                .collect(),
        },
    }
}

fn extract(sql: &str, catalog: &Catalog) -> ExtractedLineage {
    let statements = parse_sql(sql).expect("valid sql");
    let extracted = extract_lineage(&[statements], catalog, false);
    assert!(
        extracted.errors.is_empty(),
        "unexpected errors: {:?}",
        extracted.errors
    );
    extracted
}

/// Three chained views over a base table: base.v -> v1.v -> v2.v -> v3.v.
fn chained_graph() -> LineageGraph {
    let catalog = Catalog {
        schema_objects: vec![table("base", &["v"])],
    };
    let sql = "\
        create view v1 as select v from base;\n\
        create view v2 as select v from v1;\n\
        create view v3 as select v from v2;";
    extract(sql, &catalog).graph
}

#[test]
fn test_doc_round_trip_is_isomorphic() {
    let graph = chained_graph();
    let doc = graph.to_doc();
    let json = serde_json::to_string(&doc).unwrap();
    let parsed: GraphDoc = serde_json::from_str(&json).unwrap();
    let rebuilt = LineageGraph::from_doc(parsed).unwrap();

    assert_eq!(
        serde_json::to_value(graph.to_doc()).unwrap(),
        serde_json::to_value(rebuilt.to_doc()).unwrap()
    );
}

#[test]
fn test_from_doc_rejects_dangling_edges() {
    let graph = chained_graph();
    let mut doc = graph.to_doc();
    doc.edges[0].target = doc.nodes.len() + 7;
    let err = LineageGraph::from_doc(doc).unwrap_err();
    assert!(err.to_string().contains("unknown node index"));
}

#[test]
fn test_upstream_is_depth_bounded() {
    let graph = chained_graph();
    let v3 = ColumnRef::physical("v3", "v");

    let one_hop: Vec<String> = graph
        .upstream(&v3, 1)
        .map(|node| graph.node(node).to_string())
        .collect();
    assert_eq!(one_hop, vec!["v2.v".to_owned()]);

    let all: Vec<String> = graph
        .upstream(&v3, 100)
        .map(|node| graph.node(node).to_string())
        .collect();
    assert_eq!(
        all,
        vec!["v2.v".to_owned(), "v1.v".to_owned(), "base.v".to_owned()]
    );
}

#[test]
fn test_upstream_of_unknown_column_is_empty() {
    let graph = chained_graph();
    let missing = ColumnRef::physical("nowhere", "v");
    assert_eq!(graph.upstream(&missing, 10).count(), 0);
}

#[test]
fn test_impact_of_is_full_downstream_closure() {
    let graph = chained_graph();
    let base = ColumnRef::physical("base", "v");
    let impacted: Vec<String> = graph
        .impact_of(&base)
        .into_iter()
        .map(|node| graph.node(node).to_string())
        .collect();
    assert_eq!(
        impacted,
        vec!["v1.v".to_owned(), "v2.v".to_owned(), "v3.v".to_owned()]
    );
}

#[test]
fn test_self_feeding_insert_is_tagged_recursive() {
    let catalog = Catalog {
        schema_objects: vec![table("t", &["a"])],
    };
    let extracted = extract("insert into t select a + 1 from t", &catalog);

    let recursive: Vec<_> = extracted
        .graph
        .edges()
        .iter()
        .filter(|edge| edge.recursive)
        .collect();
    assert_eq!(recursive.len(), 1);
    assert_eq!(recursive[0].kind, TransformationKind::Derived);
    assert_eq!(extracted.warnings.len(), 1);

    // Traversal over the cycle still terminates.
    let a = ColumnRef::physical("t", "a");
    assert_eq!(extracted.graph.upstream(&a, 50).count(), 0);
}

#[test]
fn test_later_producer_wins_primary() {
    let catalog = Catalog {
        schema_objects: vec![
            table("out", &["x"]),
            table("t1", &["a"]),
            table("t2", &["b"]),
        ],
    };
    let sql = "\
        insert into out select a from t1;\n\
        insert into out select b from t2;";
    let extracted = extract(sql, &catalog);

    let by_statement = |statement: u32| {
        extracted
            .graph
            .edges()
            .iter()
            .find(|edge| edge.statement == statement)
            .expect("edge for statement")
    };
    assert!(!by_statement(0).primary);
    assert!(by_statement(1).primary);
}

#[test]
fn test_parallel_extraction_merges_in_script_order() {
    let catalog = Catalog {
        schema_objects: vec![table("base", &["v"]), table("other", &["w"])],
    };
    let scripts: Vec<_> = ["select v from base", "select w from other"]
        .iter()
        .map(|sql| parse_sql(sql).unwrap())
        .collect();
    let extracted = extract_lineage(&scripts, &catalog, true);
    assert!(extracted.errors.is_empty());

    let edges: Vec<(String, u32)> = extracted
        .graph
        .edges()
        .iter()
        .map(|edge| {
            (
                extracted.graph.node(edge.source).to_string(),
                edge.statement,
            )
        })
        .collect();
    assert_eq!(
        edges,
        vec![("base.v".to_owned(), 0), ("other.w".to_owned(), 1)]
    );
}
