mod coordinator;
mod errors;
mod executors;
mod flow;
mod gateway;
mod limits;
mod loader;
mod page;
mod protocol;
mod retry;
mod sessions;
mod storage;
mod telemetry;
mod validation;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};

use coordinator::CoordinatorHandle;
use flow::catalog::FlowCatalog;
use gateway::{LineSink, StdioGateway};
use limits::CoordinatorLimits;
use protocol::InboundMessage;
use sessions::SessionRegistry;
use storage::{JsonFileStore, MemoryStore, SessionStore};
use telemetry::TelemetryConfig;
use validation::FlowError;

#[derive(Parser)]
#[command(name = "flow-runner")]
#[command(about = "Action flow runner and execution coordinator", long_about = None)]
struct Cli {
    /// Logs em nível debug (RUST_LOG tem precedência)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validates a flow file and prints its canonical form
    Validate {
        /// Path to the flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Path to write the validation report to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Runs the coordinator over newline-delimited JSON on stdin/stdout
    Serve {
        /// JSON file where sessions are persisted (in memory if omitted)
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Directory of <flowId>.json definitions to preload
        #[arg(long)]
        flows: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    if let Err(e) = telemetry::init_telemetry(TelemetryConfig::from_env().with_log_level(level)) {
        eprintln!("⚠️  Telemetry unavailable: {}", e);
    }

    let result = match cli.command {
        Commands::Validate { file, output } => validate(&file, output.as_deref()),
        Commands::Serve { state_file, flows } => serve(state_file, flows).await,
    };

    telemetry::shutdown_telemetry();

    if let Err(e) = result {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// VALIDATE
// ============================================================================

fn validate(file: &Path, output: Option<&Path>) -> Result<()> {
    let report = match loader::load_flow_from_file(file) {
        Ok(definition) => json!({
            "valid": true,
            "stepCount": definition.step_count,
            "definition": definition,
        }),
        Err(e) => {
            let flow_error = e.downcast_ref::<FlowError>();
            json!({
                "valid": false,
                "code": flow_error.map(FlowError::code),
                "path": flow_error.and_then(FlowError::path),
                "message": format!("{:#}", e),
            })
        }
    };

    let rendered = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    match output {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("Failed to write report {:?}", path))?;
            eprintln!("📄 Report saved to: {:?}", path);
        }
        None => println!("{}", rendered),
    }

    if report["valid"] == true {
        Ok(())
    } else {
        bail!("Invalid flow {:?}", file)
    }
}

// ============================================================================
// SERVE
// ============================================================================

async fn serve(state_file: Option<PathBuf>, flows: Option<PathBuf>) -> Result<()> {
    let limits = CoordinatorLimits::from_env();

    let catalog = match &flows {
        Some(dir) => loader::load_catalog_dir(dir)?,
        None => FlowCatalog::new(),
    };
    if !catalog.is_empty() {
        info!(flows = catalog.len(), "Catálogo de fluxos carregado");
    }

    let store: Arc<dyn SessionStore> = match &state_file {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };
    let (persist, persist_task) =
        storage::spawn_write_behind(store.clone(), limits.persist_debounce);
    let sessions = SessionRegistry::new(store, persist.clone());
    let mut updates = sessions.subscribe();

    let (sink, writer_task) = gateway::spawn_line_writer(tokio::io::stdout());
    let gateway = Arc::new(StdioGateway::new(sink.clone()));
    let (handle, coordinator_task) = coordinator::spawn(sessions, catalog, gateway, limits);

    info!(
        state_file = ?state_file,
        flows = ?flows,
        "Coordenador pronto, aguardando mensagens no stdin"
    );

    let update_sink = sink.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(session) => {
                    let line = json!({ "type": "SESSION_UPDATE", "session": session });
                    if update_sink.emit(&line).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SESSION_UPDATE descartados por atraso do leitor")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        handle_line(&handle, &sink, &line).await?;
    }

    info!("stdin encerrado, desligando");
    handle.shutdown();
    coordinator_task.await.context("Coordinator task panicked")?;
    persist.shutdown();
    persist_task.await.context("Persist task panicked")?;
    forwarder.await.context("Update forwarder panicked")?;
    drop(sink);
    writer_task.await.context("Writer task panicked")?;
    Ok(())
}

async fn handle_line(handle: &CoordinatorHandle, sink: &LineSink, line: &str) -> Result<()> {
    let (request_id, parsed) = parse_line(line);

    let response = match parsed {
        // Sem requestId ninguém espera resposta.
        Ok(message) if request_id.is_none() => return handle.notify(message),
        Ok(message) => {
            let reply = handle.request(message).await?;
            let body = if reply.is_ok() { "data" } else { "error" };
            let mut response = json!({
                "type": "RESPONSE",
                "requestId": request_id,
                "ok": reply.is_ok(),
            });
            response[body] = reply.to_json();
            response
        }
        Err(e) => {
            warn!(error = %e, "Mensagem inválida recebida");
            json!({
                "type": "RESPONSE",
                "requestId": request_id,
                "ok": false,
                "error": { "code": "INVALID_MESSAGE", "message": e.to_string() },
            })
        }
    };

    sink.emit(&response).context("Output channel closed")?;
    Ok(())
}

/// Separa o `requestId` (mesmo de linhas inválidas) da mensagem.
fn parse_line(line: &str) -> (Option<Value>, serde_json::Result<InboundMessage>) {
    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => return (None, Err(e)),
    };
    let request_id = raw.get("requestId").cloned().filter(|id| !id.is_null());
    // Campos extras (o próprio requestId) são ignorados pelas mensagens.
    let parsed = serde_json::from_value::<InboundMessage>(raw);
    (request_id, parsed)
}
