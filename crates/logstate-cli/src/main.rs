//! logstate command-line tool.
//!
//! Provides the `logstate` binary for building log models from trace files,
//! generalizing them with an externally computed merge order, and matching
//! new traces against stored models.
//!
//! Reads configuration from environment variables:
//! - `LOGSTATE_DB_PATH`: SQLite database file path (default: "logstate.db")
//! - `LOGSTATE_SEED`: seed for random tie-breaking (default: 5)
//! - `LOGSTATE_LOG`: tracing filter directives (default: "info")

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use logstate_core::{
    apply_dendrogram, build_prefix_tree, seeded_rng, ExactResolver, Graph, IngestConfig,
    MatchMode, MatchOptions, StateSummary, TemplateResolver, TemplateTable, DEFAULT_SEED,
};
use logstate_storage::{fingerprint, ModelId, ModelStore, SqliteStore, StorageError};

/// Builds, generalizes and queries behavioural models of log output.
#[derive(Parser)]
#[command(name = "logstate", about = "Log model construction and trace matching")]
struct Cli {
    /// Path to the model database (default: $LOGSTATE_DB_PATH or logstate.db).
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Build a prefix tree from a directory of trace files and store it.
    Build {
        /// Directory holding one trace per file, one log line per line.
        #[arg(short, long)]
        traces: PathBuf,

        /// Name of the new model.
        #[arg(short, long)]
        name: String,

        /// JSON object mapping raw lines to template ids (default: each line
        /// is its own template).
        #[arg(long)]
        templates: Option<PathBuf>,

        /// Collapse repeated consecutive templates into self-loops.
        #[arg(long)]
        collapse_loops: bool,

        /// End every trace in a terminal end state.
        #[arg(long)]
        end_state: bool,
    },

    /// Apply a dendrogram (JSON list of `[keep, absorb, ...]` rows) to a model.
    ///
    /// Leaves are state handles as printed by `show`; `slot_count + k` names
    /// the cluster built by row `k`.
    Generalize {
        /// Model ID to generalize.
        #[arg(short, long)]
        model: i64,

        /// Path to the dendrogram JSON file.
        #[arg(short, long)]
        dendrogram: PathBuf,

        /// Store the result as a new model instead of overwriting.
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Match a trace file against a model.
    Match {
        /// Model ID to match against.
        #[arg(short, long)]
        model: i64,

        /// Trace file, one log line per line.
        #[arg(short, long)]
        trace: PathBuf,

        /// JSON object mapping raw lines to template ids.
        #[arg(long)]
        templates: Option<PathBuf>,

        /// How ambiguous steps are resolved.
        #[arg(long, value_enum, default_value_t = ModeArg::Random)]
        mode: ModeArg,

        /// Seed for random mode (default: $LOGSTATE_SEED or 5).
        #[arg(long)]
        seed: Option<u64>,

        /// Give up after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print a stored model as JSON.
    Show {
        /// Model ID to print.
        #[arg(short, long)]
        model: i64,
    },

    /// List stored models.
    List,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Random,
    First,
    All,
}

fn main() {
    let filter = EnvFilter::try_from_env("LOGSTATE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = cli
        .db
        .or_else(|| std::env::var("LOGSTATE_DB_PATH").ok())
        .unwrap_or_else(|| "logstate.db".to_string());

    let exit_code = match cli.command {
        Commands::Build {
            traces,
            name,
            templates,
            collapse_loops,
            end_state,
        } => {
            let config = IngestConfig {
                end_state,
                collapse_trivial_loops: collapse_loops,
            };
            run_build(&db_path, &traces, &name, templates.as_deref(), &config)
        }
        Commands::Generalize {
            model,
            dendrogram,
            name,
        } => run_generalize(&db_path, ModelId(model), &dendrogram, name.as_deref()),
        Commands::Match {
            model,
            trace,
            templates,
            mode,
            seed,
            timeout_ms,
        } => {
            let seed = seed
                .or_else(|| std::env::var("LOGSTATE_SEED").ok()?.parse().ok())
                .unwrap_or(DEFAULT_SEED);
            run_match(
                &db_path,
                ModelId(model),
                &trace,
                templates.as_deref(),
                mode,
                seed,
                timeout_ms.map(Duration::from_millis),
            )
        }
        Commands::Show { model } => run_show(&db_path, ModelId(model)),
        Commands::List => run_list(&db_path),
    };
    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ModelReport {
    model: i64,
    states: usize,
    edges: usize,
    fingerprint: String,
}

impl ModelReport {
    fn new(id: ModelId, graph: &Graph) -> Self {
        ModelReport {
            model: id.0,
            states: graph.size(),
            edges: graph.edge_count(),
            fingerprint: fingerprint(graph).to_hex().to_string(),
        }
    }
}

#[derive(Serialize)]
struct StateView {
    id: u32,
    #[serde(flatten)]
    summary: StateSummary,
}

#[derive(Serialize)]
struct EdgeView {
    source: u32,
    target: u32,
    passes: u64,
}

#[derive(Serialize)]
struct ShowReport {
    model: i64,
    start: Option<u32>,
    states: Vec<StateView>,
    edges: Vec<EdgeView>,
}

fn print_json<T: Serialize>(value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e));
    println!("{}", json);
}

// ---------------------------------------------------------------------------
// Input files
// ---------------------------------------------------------------------------

/// Reads a trace file: one log line per line, blank lines skipped.
fn read_trace(path: &Path) -> std::io::Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Reads every regular file in `dir` as a trace, in file name order.
fn read_trace_dir(dir: &Path) -> std::io::Result<Vec<Vec<String>>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();
    paths.iter().map(|path| read_trace(path)).collect()
}

/// Parses dendrogram rows. Each row starts with the two cluster references;
/// trailing columns (distance, size) are ignored.
fn parse_dendrogram(json: &str) -> Result<Vec<(usize, usize)>, String> {
    let rows: Vec<Vec<f64>> =
        serde_json::from_str(json).map_err(|e| format!("invalid dendrogram JSON: {}", e))?;
    let as_ref = |value: f64, row: usize| -> Result<usize, String> {
        if value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
            Ok(value as usize)
        } else {
            Err(format!("row {}: '{}' is not a cluster reference", row, value))
        }
    };
    rows.iter()
        .enumerate()
        .map(|(i, row)| match row.as_slice() {
            [keep, absorb, ..] => Ok((as_ref(*keep, i)?, as_ref(*absorb, i)?)),
            _ => Err(format!("row {}: expected at least two columns", i)),
        })
        .collect()
}

/// Line resolver: a template table if given, exact lines otherwise.
enum Resolver {
    Exact(ExactResolver),
    Table(TemplateTable),
}

impl TemplateResolver for Resolver {
    fn resolve<'a>(&'a self, line: &'a str) -> Option<Cow<'a, str>> {
        match self {
            Resolver::Exact(exact) => exact.resolve(line),
            Resolver::Table(table) => table.resolve(line),
        }
    }
}

/// Loads the resolver. Errors carry the exit code to use.
fn load_resolver(templates: Option<&Path>) -> Result<Resolver, i32> {
    let Some(path) = templates else {
        return Ok(Resolver::Exact(ExactResolver));
    };
    let json = fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: failed to read templates '{}': {}", path.display(), e);
        3
    })?;
    let table: TemplateTable = serde_json::from_str(&json).map_err(|e| {
        eprintln!("Error: invalid templates file '{}': {}", path.display(), e);
        1
    })?;
    Ok(Resolver::Table(table))
}

fn open_store(db_path: &str) -> Result<SqliteStore, i32> {
    SqliteStore::new(db_path).map_err(|e| {
        eprintln!("Error: failed to open database '{}': {}", db_path, e);
        3
    })
}

fn load(store: &SqliteStore, id: ModelId) -> Result<Graph, i32> {
    store.load_model(id).map_err(|e| {
        eprintln!("Error: failed to load model {}: {}", id.0, e);
        match e {
            StorageError::ModelNotFound(_) => 1,
            _ => 3,
        }
    })
}

fn save(store: &mut SqliteStore, id: ModelId, graph: &Graph) -> Result<(), i32> {
    store.save_model(id, graph).map_err(|e| {
        eprintln!("Error: failed to save model {}: {}", id.0, e);
        3
    })
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

/// Execute the build subcommand.
///
/// Returns exit code: 0 = success, 1 = unresolvable input, 3 = I/O error.
fn run_build(
    db_path: &str,
    traces_dir: &Path,
    name: &str,
    templates: Option<&Path>,
    config: &IngestConfig,
) -> i32 {
    let resolver = match load_resolver(templates) {
        Ok(r) => r,
        Err(code) => return code,
    };
    let traces = match read_trace_dir(traces_dir) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: failed to read traces '{}': {}", traces_dir.display(), e);
            return 3;
        }
    };
    let tree = match build_prefix_tree(&traces, &resolver, config) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let graph = tree.into_graph();

    let mut store = match open_store(db_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let id = match store.create_model(name) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: failed to create model '{}': {}", name, e);
            return 3;
        }
    };
    if let Err(code) = save(&mut store, id, &graph) {
        return code;
    }

    info!(model = id.0, traces = traces.len(), states = graph.size(), "stored prefix tree");
    print_json(&ModelReport::new(id, &graph));
    0
}

/// Execute the generalize subcommand.
///
/// Returns exit code: 0 = success, 1 = invalid dendrogram or unknown model,
/// 3 = I/O error.
fn run_generalize(db_path: &str, id: ModelId, dendrogram: &Path, name: Option<&str>) -> i32 {
    let pairs = match fs::read_to_string(dendrogram) {
        Ok(json) => match parse_dendrogram(&json) {
            Ok(pairs) => pairs,
            Err(msg) => {
                eprintln!("Error: {}", msg);
                return 1;
            }
        },
        Err(e) => {
            eprintln!("Error: failed to read dendrogram '{}': {}", dendrogram.display(), e);
            return 3;
        }
    };

    let mut store = match open_store(db_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut graph = match load(&store, id) {
        Ok(g) => g,
        Err(code) => return code,
    };
    if let Err(e) = apply_dendrogram(&mut graph, &pairs) {
        eprintln!("Error: {}", e);
        return 1;
    }

    let target = match name {
        Some(name) => match store.create_model(name) {
            Ok(new_id) => new_id,
            Err(e) => {
                eprintln!("Error: failed to create model '{}': {}", name, e);
                return 3;
            }
        },
        None => id,
    };
    if let Err(code) = save(&mut store, target, &graph) {
        return code;
    }

    info!(source = id.0, target = target.0, merges = pairs.len(), "generalized model");
    print_json(&ModelReport::new(target, &graph));
    0
}

/// Execute the match subcommand.
///
/// Returns exit code: 0 = accepted, 1 = rejected or unknown model,
/// 3 = I/O error.
fn run_match(
    db_path: &str,
    id: ModelId,
    trace_path: &Path,
    templates: Option<&Path>,
    mode: ModeArg,
    seed: u64,
    timeout: Option<Duration>,
) -> i32 {
    let resolver = match load_resolver(templates) {
        Ok(r) => r,
        Err(code) => return code,
    };
    let trace = match read_trace(trace_path) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: failed to read trace '{}': {}", trace_path.display(), e);
            return 3;
        }
    };
    let store = match open_store(db_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let graph = match load(&store, id) {
        Ok(g) => g,
        Err(code) => return code,
    };
    let deadline = timeout.map(|t| Instant::now() + t);

    let mode = match mode {
        ModeArg::All => {
            let all = graph.match_trace_all(&trace, &resolver, deadline);
            print_json(&all);
            return if all.paths.is_empty() { 1 } else { 0 };
        }
        ModeArg::Random => MatchMode::Random,
        ModeArg::First => MatchMode::First,
    };
    let options = MatchOptions { mode, deadline };
    let mut rng = seeded_rng(seed);
    let outcome = graph.match_trace(&trace, &resolver, &mut rng, &options);
    print_json(&outcome);
    match outcome.rejection() {
        None => 0,
        Some(rejection) => {
            eprintln!("{}", rejection);
            1
        }
    }
}

/// Execute the show subcommand.
fn run_show(db_path: &str, id: ModelId) -> i32 {
    let store = match open_store(db_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let graph = match load(&store, id) {
        Ok(g) => g,
        Err(code) => return code,
    };

    let states = graph
        .state_ids()
        .map(|state| StateView {
            id: state.0,
            summary: StateSummary {
                templates: graph.templates(state).map(|t| t.to_vec()).unwrap_or_default(),
                is_terminal: graph.is_terminal(state).unwrap_or(false),
            },
        })
        .collect();
    let edges = graph
        .adjacency_list(false)
        .into_iter()
        .map(|(source, target)| EdgeView {
            source: source.0,
            target: target.0,
            passes: graph.edge(source, target).map(|e| e.passes).unwrap_or(1),
        })
        .collect();

    print_json(&ShowReport {
        model: id.0,
        start: graph.start().map(|s| s.0),
        states,
        edges,
    });
    0
}

/// Execute the list subcommand.
fn run_list(db_path: &str) -> i32 {
    let store = match open_store(db_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match store.list_models() {
        Ok(models) => {
            print_json(&models);
            0
        }
        Err(e) => {
            eprintln!("Error: failed to list models: {}", e);
            3
        }
    }
}
