use std::path::PathBuf;
use std::time::Instant;

use anyhow::anyhow;
use clap::{Parser, Subcommand, ValueEnum};
use sqlex::catalog::Catalog;
use sqlex::lineage::{ExtractedLineage, extract_lineage};
use sqlex::traverse::Direction;

#[derive(Parser)]
#[command(name = "sqlex")]
#[command(about = "SQL lineage explainer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a lineage graph from one or more SQL files.
    ExtractLineage(ExtractCommand),
    /// Extract lineage, then walk the graph from one column.
    Trace(TraceCommand),
}

#[derive(clap::Args)]
struct ExtractCommand {
    #[command(flatten)]
    input: InputArgs,
    /// Output serialization for the lineage graph.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(clap::Args)]
struct TraceCommand {
    #[command(flatten)]
    input: InputArgs,
    /// Column to start from, written as `entity.column`.
    #[arg(long)]
    column: String,
    #[arg(long, value_enum, default_value_t = TraceDirection::Up)]
    direction: TraceDirection,
    /// Bound on traversal depth, guards unbounded recursive walks.
    #[arg(long, default_value_t = 100)]
    max_depth: usize,
}

#[derive(clap::Args)]
struct InputArgs {
    /// Path to a JSON schema catalog; omit to resolve without one.
    #[arg(short, long)]
    schema: Option<PathBuf>,
    /// Process files concurrently. Entity definitions then do not carry
    /// across files, so only use this when the files are independent.
    #[arg(long)]
    parallel: bool,
    /// Path to the SQL file or directory containing SQL files.
    #[arg(value_name = "SQL_[FILE|DIR]")]
    sql: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    JsonPretty,
    Table,
}

#[derive(Clone, Copy, ValueEnum)]
enum TraceDirection {
    Up,
    Down,
}

fn sql_files(path: &PathBuf) -> anyhow::Result<Vec<PathBuf>> {
    if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|res| res.ok())
            .map(|entry| entry.path())
            .filter(|file| file.extension().is_some_and(|ext| ext == "sql"))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no .sql files in directory {}", path.display()));
        }
        Ok(files)
    } else {
        Ok(vec![path.clone()])
    }
}

fn load_catalog(path: &Option<PathBuf>) -> anyhow::Result<Catalog> {
    let Some(path) = path else {
        return Ok(Catalog::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|_| anyhow!("Failed to read catalog file: {}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| {
        anyhow!(
            "Failed to parse JSON catalog in file {} due to error: {}",
            path.display(),
            err
        )
    })
}

fn run_extraction(input: &InputArgs) -> anyhow::Result<ExtractedLineage> {
    let catalog = load_catalog(&input.schema)?;
    let mut scripts = vec![];
    for file in sql_files(&input.sql)? {
        let sql = std::fs::read_to_string(&file)
            .map_err(|_| anyhow!("Failed to read sql file {}", file.display()))?;
        let statements = sqlex::adapter::parse_sql(&sql)
            .map_err(|err| anyhow!("Failed to parse {}: {}", file.display(), err))?;
        scripts.push(statements);
    }
    Ok(extract_lineage(&scripts, &catalog, input.parallel))
}

fn report(extracted: &ExtractedLineage) -> bool {
    for warning in &extracted.warnings {
        log::warn!("{warning}");
    }
    for err in &extracted.errors {
        eprintln!("error: {err}");
    }
    extracted.errors.is_empty()
}

fn main() -> anyhow::Result<()> {
    let now = Instant::now();

    env_logger::init();
    let cli = Cli::parse();

    let ok = match &cli.command {
        Commands::ExtractLineage(cmd) => {
            let extracted = run_extraction(&cmd.input)?;
            let doc = extracted.graph.to_doc();
            match cmd.format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&doc)?),
                OutputFormat::JsonPretty => {
                    println!("{}", serde_json::to_string_pretty(&doc)?)
                }
                OutputFormat::Table => {
                    for edge in extracted.graph.edges() {
                        println!(
                            "{}\t-{}->\t{}{}{}",
                            extracted.graph.node(edge.source),
                            edge.kind,
                            extracted.graph.node(edge.target),
                            if edge.recursive { "\t[recursive]" } else { "" },
                            if edge.primary { "" } else { "\t[secondary]" },
                        );
                    }
                }
            }
            report(&extracted)
        }
        Commands::Trace(cmd) => {
            let extracted = run_extraction(&cmd.input)?;
            let (entity, column) = cmd
                .column
                .rsplit_once('.')
                .ok_or_else(|| anyhow!("--column must be written as entity.column"))?;
            let start = extracted
                .graph
                .find_column(entity, column)
                .ok_or_else(|| anyhow!("column `{}` not found in lineage graph", cmd.column))?;
            let direction = match cmd.direction {
                TraceDirection::Up => Direction::Upstream,
                TraceDirection::Down => Direction::Downstream,
            };
            for node in extracted.graph.walk_from(start, direction, cmd.max_depth) {
                println!("{}", extracted.graph.node(node));
            }
            report(&extracted)
        }
    };

    let elapsed = now.elapsed();
    log::info!("Elapsed: {:.2?}", elapsed);

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
