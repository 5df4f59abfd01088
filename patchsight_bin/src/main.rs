use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand};
use patchsight::{
    PatchSight, PatchSightConfig, PatchSightError,
    modification::ModificationRequest,
    ollama_registry,
    project_manager::ProjectManager,
};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "patchsight", about = "Summarise a source tree and apply model-proposed changes")]
struct Cli {
    /// Directory holding per-project state.
    #[arg(long, default_value = "projects")]
    storage: PathBuf,

    #[arg(long, short)]
    project: String,

    /// Source root; required the first time a project is used.
    #[arg(long)]
    root: Option<PathBuf>,

    #[arg(long, default_value = "http://localhost")]
    host: String,

    #[arg(long, default_value_t = 11434)]
    port: u16,

    /// Model used for every task.
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    fallback_model: Option<String>,

    /// Hours an unfinished modification session is kept.
    #[arg(long, default_value_t = 24)]
    session_ttl_hours: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the project storage and selection tree.
    Init,
    /// Show the project record.
    Info,
    /// Refresh and print the file selection tree.
    Tree,
    /// Check exactly these files; none means every file.
    Select { paths: Vec<String> },
    /// List files that changed since the last scan.
    Scan,
    Status,
    Summarize {
        #[arg(long)]
        full: bool,
        #[arg(long)]
        client: Option<String>,
    },
    Query {
        text: String,
        #[arg(long)]
        client: Option<String>,
    },
    Queries,
    DeleteQuery { query_id: String },
    Prepare {
        query_id: String,
        #[arg(long)]
        client: Option<String>,
    },
    Generate { session_id: String },
    /// Apply the stored preview, or the JSON list of `{file_path, new_code}` in `--changes`.
    Apply {
        session_id: String,
        #[arg(long)]
        changes: Option<PathBuf>,
    },
    Cancel { session_id: String },
    Revert {
        modification_id: String,
        file_path: String,
    },
    History,
    Sweep,
}

#[tokio::main]
async fn main() {
    patchsight::init_logging();
    let cli = Cli::parse();

    if let Err(why) = run(cli).await {
        tracing::error!(error = %why, "command failed");
        if let Some(raw) = why.raw_response() {
            eprintln!("Model response:\n{raw}");
        }
        eprintln!("Error: {why}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), PatchSightError> {
    let mut config = PatchSightConfig::default();
    config.ollama.host = cli.host;
    config.ollama.port = cli.port;
    if let Some(model) = cli.model {
        config.ollama = config.ollama.with_model(model);
    }
    config.fallback_model = cli.fallback_model;
    config.session_ttl = Duration::from_secs(cli.session_ttl_hours * 60 * 60);

    let manager = ProjectManager::new(cli.storage);
    let ctx = match cli.root {
        Some(root) => manager.new_project(cli.project, root),
        None => manager.open_project(cli.project)?,
    };
    let registry = ollama_registry(&config);
    let app = PatchSight::new(config, ctx, registry);

    match cli.command {
        Command::Init => print(&app.init()?),
        Command::Info => print(&app.record()?),
        Command::Tree => print(&app.file_tree()?),
        Command::Select { paths } => {
            let selected: BTreeSet<String> = paths.into_iter().collect();
            print(&app.select_files(&selected)?)
        }
        Command::Scan => print(&app.detect_changes()?),
        Command::Status => print(&app.summary_status()?),
        Command::Summarize { full, client } => print(&app.summarize(client.as_deref(), full).await?),
        Command::Query { text, client } => print(&app.query(&text, client.as_deref()).await?),
        Command::Queries => print(&app.queries()?),
        Command::DeleteQuery { query_id } => {
            app.delete_query(&query_id)?;
            print(&query_id)
        }
        Command::Prepare { query_id, client } => print(&app.prepare(&query_id, client.as_deref())?),
        Command::Generate { session_id } => print(&app.generate(&session_id).await?),
        Command::Apply {
            session_id,
            changes,
        } => {
            let requests = changes.map(|path| read_requests(&path)).transpose()?;
            print(&app.apply(&session_id, requests)?)
        }
        Command::Cancel { session_id } => print(&app.cancel(&session_id)?),
        Command::Revert {
            modification_id,
            file_path,
        } => {
            app.revert(&modification_id, &file_path)?;
            print(&file_path)
        }
        Command::History => print(&app.modifications()?),
        Command::Sweep => print(&app.sweep_expired_sessions()?),
    }
}

fn read_requests(path: &Path) -> Result<Vec<ModificationRequest>, PatchSightError> {
    let content = fs::read_to_string(path)
        .map_err(|e| PatchSightError::io(format!("reading changes '{}'", path.display()), e))?;
    serde_json::from_str(&content)
        .map_err(|e| PatchSightError::json(format!("parsing changes '{}'", path.display()), e))
}

fn print<T: Serialize + ?Sized>(value: &T) -> Result<(), PatchSightError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| PatchSightError::json("serializing output", e))?;
    println!("{out}");
    Ok(())
}
