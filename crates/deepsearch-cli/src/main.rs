use std::path::{Path, PathBuf};
use std::process::{ExitCode, Stdio};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use deepsearch_core::{
    ConfigLoader, DEFAULT_USER_ID, READY_TIMEOUT, ResearchEngine, RunPayload, RunRequest,
    RunnerClient, TelemetryOptions, TraceRecorder, build_model, init_metrics_from_env,
    init_telemetry, load_sources, resolve, session_id_for,
};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::runtime::Runtime;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "deepsearch",
    version,
    about = "Run DeepSearch domain research pipelines"
)]
struct Cli {
    /// Path to a TOML config file (defaults to $DEEPSEARCH_CONFIG or ./config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a phase to its agent and invoke it on a runner server.
    Route(RouteArgs),
    /// Run one pipeline in-process and print the final output.
    Run(RunArgs),
    /// Invoke several agents of a project one after another over SSE.
    RunAll(RunAllArgs),
    /// Inspect or prune recorded traces.
    Traces {
        #[command(subcommand)]
        command: TracesCommand,
    },
}

#[derive(Args, Debug)]
struct Target {
    /// Phase code such as p7a..p7e, or a short alias (risk, reg, mech, ...).
    #[arg(long)]
    phase: Option<String>,

    /// Agent name; wins over --phase when recognised.
    #[arg(long)]
    agent: Option<String>,
}

#[derive(Args, Debug)]
struct RouteArgs {
    #[command(flatten)]
    target: Target,

    /// Project identifier; used for the session id and the default state directory.
    #[arg(long)]
    project: String,

    /// Directory with artifacts from earlier phases (default: projects/<project>/05_artifacts).
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// JSON document sent as the user message.
    #[arg(long)]
    sources: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_USER_ID)]
    user: String,

    /// Runner base URL.
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    base_url: String,

    /// Start a local API server for the duration of the call.
    #[arg(long, default_value_t = false)]
    launch_server: bool,

    /// Server binary to launch (defaults to `deepsearch-api` next to this executable).
    #[arg(long)]
    server_bin: Option<PathBuf>,

    #[arg(long, default_value_t = 8000)]
    port: u16,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    target: Target,

    /// Free-text request; ignored when --sources is given.
    #[arg(long, default_value = "Assess prior art for a silicon-anode lithium battery")]
    input: String,

    /// JSON document sent as the user message.
    #[arg(long)]
    sources: Option<PathBuf>,

    #[arg(long)]
    session: Option<String>,

    #[arg(long, default_value = DEFAULT_USER_ID)]
    user: String,
}

#[derive(Args, Debug)]
struct RunAllArgs {
    #[arg(long)]
    project: String,

    /// Agent names or phase codes, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    agents: Vec<String>,

    #[arg(long)]
    sources: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_USER_ID)]
    user: String,

    #[arg(long, default_value = "http://127.0.0.1:8000")]
    base_url: String,
}

#[derive(Subcommand, Debug)]
enum TracesCommand {
    /// List recent event traces, newest first.
    List {
        #[arg(long)]
        session: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print one event trace.
    Show { trace_id: String },
    /// Print one session snapshot.
    Snapshot { snapshot_id: String },
    /// Delete local event traces older than the given age.
    Cleanup {
        #[arg(long, default_value_t = 30)]
        max_age_days: u64,
    },
}

fn main() -> Result<ExitCode> {
    init_telemetry(TelemetryOptions {
        with_target: false,
        ..TelemetryOptions::default()
    })?;
    init_metrics_from_env("deepsearch-cli");

    let cli = Cli::parse();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Route(args) => route_command(args).await,
            Command::Run(args) => run_command(cli.config, args).await,
            Command::RunAll(args) => run_all_command(args).await,
            Command::Traces { command } => traces_command(cli.config, command).await,
        }
    })
}

fn message_text(sources: Option<&Path>, fallback: &str) -> String {
    match sources {
        Some(path) => load_sources(path),
        None => fallback.to_string(),
    }
}

fn default_state_dir(project: &str) -> PathBuf {
    Path::new("projects").join(project).join("05_artifacts")
}

fn default_server_bin() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate current executable")?;
    let dir = exe
        .parent()
        .context("current executable has no parent directory")?;
    Ok(dir.join(format!("deepsearch-api{}", std::env::consts::EXE_SUFFIX)))
}

async fn route_command(args: RouteArgs) -> Result<ExitCode> {
    let selection = resolve(args.target.phase.as_deref(), args.target.agent.as_deref());
    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| default_state_dir(&args.project));
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;
    info!(
        pipeline = %selection.pipeline,
        app = selection.app_name,
        state_dir = %state_dir.display(),
        "routing phase"
    );

    let (base_url, server) = if args.launch_server {
        let bin = match args.server_bin.clone() {
            Some(bin) => bin,
            None => default_server_bin()?,
        };
        let child = launch_server(&bin, args.port, &state_dir)?;
        (format!("http://127.0.0.1:{}", args.port), Some(child))
    } else {
        (args.base_url.clone(), None)
    };

    let outcome = invoke_route(
        &args,
        &base_url,
        selection.pipeline.as_str(),
        selection.app_name,
    )
    .await;
    if let Some(mut child) = server {
        if let Err(err) = child.kill().await {
            warn!(error = %err, "failed to stop runner server");
        }
    }

    let body = outcome?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(ExitCode::SUCCESS)
}

fn launch_server(bin: &Path, port: u16, state_dir: &Path) -> Result<Child> {
    info!(bin = %bin.display(), port, "launching runner server");
    ProcessCommand::new(bin)
        .arg("--port")
        .arg(port.to_string())
        .env("ADK_STATE_DIR", state_dir)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to launch {}", bin.display()))
}

async fn invoke_route(
    args: &RouteArgs,
    base_url: &str,
    agent: &str,
    app_name: &str,
) -> Result<serde_json::Value> {
    let client = RunnerClient::new(base_url)?;
    if !client.wait_ready(READY_TIMEOUT).await {
        bail!("runner at {base_url} did not become ready");
    }
    let session_id = session_id_for(&args.project, agent);
    client.create_session(app_name, &args.user, &session_id).await;
    let payload = RunPayload::new(
        app_name,
        &args.user,
        session_id,
        message_text(args.sources.as_deref(), "{}"),
    );
    Ok(client.run(&payload).await?)
}

async fn run_command(config_path: Option<PathBuf>, args: RunArgs) -> Result<ExitCode> {
    let config = ConfigLoader::load(config_path)?;
    let model = build_model(&config.models)?;
    let engine = ResearchEngine::new(config, model)?;
    let selection = resolve(args.target.phase.as_deref(), args.target.agent.as_deref());

    let session = engine
        .create_session(selection.app_name, &args.user, args.session)
        .await;
    let text = message_text(args.sources.as_deref(), &args.input);
    let response = engine
        .run(RunRequest::new(
            selection.app_name,
            &args.user,
            session.session_id,
            text,
        ))
        .await?;

    info!(
        session_id = %response.session_id,
        pipeline = %response.pipeline,
        events = response.events.len(),
        "run complete"
    );
    println!("{}", response.final_text.unwrap_or_default());
    Ok(ExitCode::SUCCESS)
}

async fn run_all_command(args: RunAllArgs) -> Result<ExitCode> {
    let client = RunnerClient::new(&args.base_url)?;
    let text = message_text(args.sources.as_deref(), "{}");
    let mut failed = Vec::new();

    for agent in &args.agents {
        let selection = resolve(Some(agent.as_str()), Some(agent.as_str()));
        let session_id = session_id_for(&args.project, agent);
        client
            .create_session(selection.app_name, &args.user, &session_id)
            .await;
        let payload = RunPayload::new(selection.app_name, &args.user, &session_id, text.clone());
        match client.run_sse(&payload).await {
            Ok(events) => info!(%agent, events = events.len(), "agent run finished"),
            Err(err) => {
                error!(%agent, error = %err, "agent run failed");
                failed.push(agent.clone());
            }
        }
    }

    if failed.is_empty() {
        info!(agents = args.agents.len(), "all agent runs succeeded");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(failed = ?failed, "some agent runs failed");
        Ok(ExitCode::from(1))
    }
}

async fn traces_command(config_path: Option<PathBuf>, command: TracesCommand) -> Result<ExitCode> {
    let config = ConfigLoader::load(config_path)?;
    let recorder = TraceRecorder::from_config(&config.traces)?;

    match command {
        TracesCommand::List { session, limit } => {
            for listing in recorder.list_traces(session.as_deref(), limit).await {
                println!(
                    "{}  {}  {:<28} {}",
                    listing.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    listing.trace_id,
                    listing.agent_name,
                    listing.session_id
                );
            }
        }
        TracesCommand::Show { trace_id } => match recorder.load_event(&trace_id).await {
            Some(trace) => println!("{}", serde_json::to_string_pretty(&trace)?),
            None => {
                warn!(%trace_id, "trace not found");
                return Ok(ExitCode::from(1));
            }
        },
        TracesCommand::Snapshot { snapshot_id } => match recorder.load_snapshot(&snapshot_id).await {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => {
                warn!(%snapshot_id, "snapshot not found");
                return Ok(ExitCode::from(1));
            }
        },
        TracesCommand::Cleanup { max_age_days } => {
            let deleted = recorder.cleanup(max_age_days).await;
            println!("deleted {deleted} trace file(s)");
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_dir_defaults_under_project() {
        assert_eq!(
            default_state_dir("demo"),
            PathBuf::from("projects/demo/05_artifacts")
        );
    }

    #[test]
    fn run_all_accepts_comma_separated_agents() {
        let cli = Cli::parse_from([
            "deepsearch",
            "run-all",
            "--project",
            "demo",
            "--agents",
            "risk,commercial,mech",
        ]);
        match cli.command {
            Command::RunAll(args) => assert_eq!(args.agents, vec!["risk", "commercial", "mech"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn message_text_prefers_sources_file() {
        assert_eq!(message_text(None, "fallback"), "fallback");
        assert_eq!(
            message_text(Some(Path::new("/definitely/missing.json")), "fallback"),
            "{}"
        );
    }
}
