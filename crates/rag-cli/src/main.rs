//! rag - command-line interface for the rag-chat service.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ulid::Ulid;

use rag_chat::IngestRequest;
use rag_core::{Metadata, ProviderCredentials, RagConfig, RagError, Result};
use rag_server::AppState;
use rag_store::SqliteStore;

/// rag - chat with your documents, grounded in what they actually say
#[derive(Parser)]
#[command(name = "rag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: $CONFIG_DIR/rag-chat/config.toml, then ./rag-chat.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Keep all data in memory for this run
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Bind address, overriding the config file
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Write a default config file and create the database
    Init,

    /// Ingest a file or directory of text files
    Ingest {
        /// Path to file or directory to ingest
        path: PathBuf,

        /// Recursively process directories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Ask a single question without conversation memory
    Ask {
        /// The question
        question: String,
    },

    /// Interactive chat on stdin
    Chat {
        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rag-chat")
        .join("config.toml")
}

fn load_config(path: Option<&Path>, database: Option<&Path>) -> Result<RagConfig> {
    let mut config = match path {
        Some(path) => RagConfig::load(path)?,
        None => RagConfig::load_default()?,
    };
    if let Some(database) = database {
        config.database.path = database.to_path_buf();
    }
    Ok(config)
}

fn open_state(config: RagConfig, ephemeral: bool) -> Result<AppState> {
    let credentials = ProviderCredentials::from_env();
    if ephemeral {
        AppState::ephemeral(config, &credentials)
    } else {
        AppState::open(config, &credentials)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    let database = cli.database.as_deref();

    match cli.command {
        Commands::Init => init(config_path, database),
        Commands::Serve { bind } => {
            let mut config = load_config(config_path, database)?;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            let state = open_state(config, cli.ephemeral)?;
            rag_server::serve(state).await
        }
        Commands::Ingest { path, recursive } => {
            let state = open_state(load_config(config_path, database)?, cli.ephemeral)?;
            ingest(&state, &path, recursive).await
        }
        Commands::Ask { question } => {
            let state = open_state(load_config(config_path, database)?, cli.ephemeral)?;
            let reply = state.orchestrator.ask(&question).await?;
            if reply.fallback {
                warn!("The model was unavailable; showing retrieved sources instead");
            }
            println!("{}", reply.content);
            Ok(())
        }
        Commands::Chat { conversation } => {
            let state = open_state(load_config(config_path, database)?, cli.ephemeral)?;
            chat(&state, conversation.as_deref()).await
        }
    }
}

fn init(config_path: Option<&Path>, database: Option<&Path>) -> Result<()> {
    let target = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if target.exists() {
        println!("Config already exists at: {}", target.display());
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(&RagConfig::default())
            .map_err(|e| RagError::config(format!("Failed to render config: {}", e)))?;
        fs::write(&target, rendered)?;
        println!("Wrote default config to: {}", target.display());
    }

    let config = load_config(Some(target.as_path()), database)?;
    SqliteStore::open(&config.database, config.embedding.dimension)?;
    println!("Initialized database at: {}", config.database.path.display());
    Ok(())
}

async fn ingest(state: &AppState, path: &Path, recursive: bool) -> Result<()> {
    let files = collect_files(path, recursive)?;

    if files.is_empty() {
        println!("No supported files found at: {}", path.display());
        return Ok(());
    }

    println!("Ingesting {} file(s)...", files.len());

    let mut success_count = 0;
    let mut error_count = 0;

    for file_path in files {
        let text = match fs::read_to_string(&file_path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("  Error reading {}: {}", file_path.display(), e);
                error_count += 1;
                continue;
            }
        };

        let mut metadata = Metadata::new();
        let source = file_path.canonicalize().unwrap_or_else(|_| file_path.clone());
        metadata.insert(
            "source".to_string(),
            serde_json::Value::String(format!("file://{}", source.display())),
        );

        let request = IngestRequest {
            text,
            title: file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            content_type: Some(detect_content_type(&file_path).to_string()),
            metadata: Some(metadata),
        };

        match state.orchestrator.ingest(request).await {
            Ok(doc) => {
                println!(
                    "  {} - OK ({} notes, id {})",
                    file_path.display(),
                    doc.chunk_count,
                    doc.id
                );
                success_count += 1;
            }
            Err(e) => {
                eprintln!("  {} - Error: {}", file_path.display(), e);
                error_count += 1;
            }
        }
    }

    println!(
        "\nComplete: {} succeeded, {} failed",
        success_count, error_count
    );

    Ok(())
}

async fn chat(state: &AppState, conversation: Option<&str>) -> Result<()> {
    let id = match conversation {
        Some(raw) => {
            let id = raw
                .parse::<Ulid>()
                .map_err(|_| RagError::ConversationNotFound { id: raw.to_string() })?;
            let history = state.orchestrator.conversation_messages(id).await?;
            info!("Resuming conversation {} ({} messages)", id, history.len());
            id
        }
        None => state.orchestrator.create_conversation().await?.id,
    };
    eprintln!("Conversation {} - type /quit to leave", id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        match state.orchestrator.send_message(id, line).await {
            Ok(reply) => println!("\n{}\n", reply.content),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

fn collect_files(path: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if path.is_file() {
        if is_supported_file(path) {
            files.push(path.to_path_buf());
        }
    } else if path.is_dir() {
        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        entries.sort();

        for entry_path in entries {
            if entry_path.is_file() && is_supported_file(&entry_path) {
                files.push(entry_path);
            } else if entry_path.is_dir() && recursive {
                files.extend(collect_files(&entry_path, recursive)?);
            }
        }
    }

    Ok(files)
}

fn is_supported_file(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    matches!(
        ext,
        "txt" | "md" | "markdown" | "rst" | "csv" | "json" | "yaml" | "yml" | "toml" | "html"
            | "htm" | "xml"
    )
}

fn detect_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        _ => "text/plain",
    }
}
