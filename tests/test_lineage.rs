use serde::Deserialize;
use sqlex::catalog::{Catalog, SchemaObject};
use sqlex::error::LineageErrorKind;
use sqlex::lineage::extract_lineage;

const LINEAGE_TESTS_FILE: &str = "tests/lineage_tests.toml";

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Debug)]
struct ExpectedEdge {
    source: String,
    target: String,
    kind: String,
    #[serde(default)]
    recursive: bool,
    #[serde(default = "default_true")]
    primary: bool,
}

#[derive(Deserialize, Debug)]
struct UpstreamCheck {
    column: String,
    max_depth: usize,
    expect: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct LineageTest {
    sql: String,
    #[serde(default)]
    schema_objects: Vec<SchemaObject>,
    #[serde(default)]
    edges: Vec<ExpectedEdge>,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    warnings: usize,
    upstream: Option<UpstreamCheck>,
}

#[derive(Deserialize, Debug)]
struct LineageTestData {
    tests: Vec<LineageTest>,
}

#[test]
fn test_lineage() {
    use sqlex::adapter::parse_sql;

    let lineage_data_file =
        std::fs::read_to_string(LINEAGE_TESTS_FILE).expect("Cannot open lineage test cases");
    let test_lineage_data: LineageTestData =
        toml::from_str(&lineage_data_file).expect("Cannot parse test cases defined in toml");

    for test in test_lineage_data.tests {
        println!("Testing lineage for SQL: {}", &test.sql);
        let statements = parse_sql(&test.sql)
            .unwrap_or_else(|err| panic!("Could not parse sql due to: {:?}", &err));

        let extracted = extract_lineage(
            &[statements],
            &Catalog {
                schema_objects: test.schema_objects,
            },
            false,
        );

        let actual_errors: Vec<String> = extracted
            .errors
            .iter()
            .map(|err| LineageErrorKind::from(err).to_string())
            .collect();
        assert_eq!(
            actual_errors, test.errors,
            "error mismatch for SQL: {} ({:?})",
            &test.sql, extracted.errors
        );

        let graph = &extracted.graph;
        let mut actual_edges: Vec<(String, String, String, bool, bool)> = graph
            .edges()
            .iter()
            .map(|edge| {
                (
                    graph.node(edge.source).to_string(),
                    graph.node(edge.target).to_string(),
                    edge.kind.to_string(),
                    edge.recursive,
                    edge.primary,
                )
            })
            .collect();
        let mut expected_edges: Vec<(String, String, String, bool, bool)> = test
            .edges
            .iter()
            .map(|edge| {
                (
                    edge.source.clone(),
                    edge.target.clone(),
                    edge.kind.clone(),
                    edge.recursive,
                    edge.primary,
                )
            })
            .collect();
        actual_edges.sort();
        expected_edges.sort();
        assert_eq!(
            actual_edges, expected_edges,
            "edge mismatch for SQL: {}",
            &test.sql
        );

        assert_eq!(
            extracted.warnings.len(),
            test.warnings,
            "warning mismatch for SQL: {} ({:?})",
            &test.sql,
            extracted.warnings
        );

        if let Some(upstream) = &test.upstream {
            let (entity, column) = upstream
                .column
                .rsplit_once('.')
                .expect("upstream column must be entity.column");
            let start = graph
                .find_column(entity, column)
                .unwrap_or_else(|| panic!("column {} not in graph", upstream.column));
            let start_ref = graph.node(start).clone();
            let mut reached: Vec<String> = graph
                .upstream(&start_ref, upstream.max_depth)
                .map(|node| graph.node(node).to_string())
                .collect();
            let mut expected = upstream.expect.clone();
            reached.sort();
            expected.sort();
            assert_eq!(
                reached, expected,
                "upstream mismatch for SQL: {}",
                &test.sql
            );
        }
    }
}
