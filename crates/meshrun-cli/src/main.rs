use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use meshrun_engine::{
    AlwaysUp, CachedStates, DEFAULT_POLL_INTERVAL, EventSink, Monitor, MonitorEvent, RunParams,
    RunnerDeps, RunnerEvent, SIMULATOR_POLL_INTERVAL, ServerConfig, event_channel, runner_factory,
    serverinfos_factory,
};
use meshrun_model::{Case, CaseSpec, Engine, ExecMode, StateOptions};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "meshrun")]
#[command(about = "Drives simulation cases through a compute backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run(RunArgs),
    Servers(ServersArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Path to a case description in JSON form.
    #[arg(long)]
    case: PathBuf,
    #[arg(long, value_enum)]
    engine: Option<EngineArg>,
    #[arg(long, default_value = "localhost")]
    server: String,
    #[arg(long = "solver-version", default_value = "stable")]
    solver_version: String,
    #[arg(long, value_enum, default_value_t = ModeArg::Batch)]
    mode: ModeArg,
    #[arg(long, default_value_t = 2048)]
    memory_mb: u64,
    #[arg(long, default_value_t = 3600)]
    time_limit_s: u64,
    #[arg(long)]
    nodes: Option<u32>,
    #[arg(long)]
    cpus: Option<u32>,
    #[arg(long)]
    threads: Option<u32>,
    #[arg(long = "no-stream-events", action = ArgAction::SetTrue)]
    no_stream_events: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    event_json: bool,
}

#[derive(clap::Args, Debug)]
struct ServersArgs {
    #[arg(long, value_enum)]
    engine: Option<EngineArg>,
    /// Server names to probe; defaults to localhost.
    #[arg(long = "server")]
    servers: Vec<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    refresh: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineArg {
    Simulator,
    Batch,
    Cluster,
}

impl From<EngineArg> for Engine {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Simulator => Engine::Simulator,
            EngineArg::Batch => Engine::Batch,
            EngineArg::Cluster => Engine::Cluster,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Batch,
    Interactive,
}

impl From<ModeArg> for ExecMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Batch => ExecMode::Batch,
            ModeArg::Interactive => ExecMode::Interactive,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Servers(args) => servers_command(args),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_command(args: RunArgs) -> Result<ExitCode, String> {
    let text = std::fs::read_to_string(&args.case)
        .map_err(|e| format!("failed reading case file '{}': {e}", args.case.display()))?;
    let spec = CaseSpec::from_json(&text).map_err(|e| format!("failed parsing case file: {e}"))?;
    let case = Arc::new(spec.build());

    let engine = args.engine.map(Engine::from).unwrap_or_else(Engine::from_env);
    if engine != Engine::Simulator {
        return Err(format!(
            "engine '{engine}' needs scheduler clients wired by an embedding application; \
             rerun with --engine simulator"
        ));
    }

    let stream = !args.no_stream_events;
    let (runner_sink, runner_task) = event_stream(stream, args.event_json, print_runner_event);
    let (monitor_sink, monitor_task) = event_stream(stream, args.event_json, print_monitor_event);

    let deps = RunnerDeps {
        events: runner_sink,
        ..RunnerDeps::default()
    };
    let mut runner = runner_factory(engine, case.clone(), deps)
        .await
        .map_err(|e| e.to_string())?;
    let mut monitor = Monitor::new(Arc::new(CachedStates), monitor_sink).for_engine(engine);
    monitor.track(case.clone());

    let params = RunParams {
        server: Some(args.server),
        version: Some(args.solver_version),
        mode: Some(args.mode.into()),
        memory_mb: Some(args.memory_mb),
        time_limit_s: Some(args.time_limit_s),
        nodes: args.nodes,
        cpus: args.cpus,
        threads: args.threads,
        ..RunParams::default()
    };
    runner.start(params).await.map_err(|e| e.to_string())?;

    let poll = match engine {
        Engine::Simulator => SIMULATOR_POLL_INTERVAL,
        Engine::Batch | Engine::Cluster => DEFAULT_POLL_INTERVAL,
    };
    while monitor.is_active() {
        runner.refresh().await.map_err(|e| e.to_string())?;
        monitor.tick();
        if monitor.is_active() {
            tokio::time::sleep(poll).await;
        }
    }

    // Dropping the sinks ends the streaming tasks.
    drop(runner);
    drop(monitor);
    if let Some(task) = runner_task {
        task.await.map_err(|e| e.to_string())?;
    }
    if let Some(task) = monitor_task {
        task.await.map_err(|e| e.to_string())?;
    }

    print_case_summary(&case);
    Ok(exit_code_for_case(&case))
}

fn servers_command(args: ServersArgs) -> Result<ExitCode, String> {
    let engine = args.engine.map(Engine::from).unwrap_or_else(Engine::from_env);
    let configs = if args.servers.is_empty() {
        vec![ServerConfig::localhost()]
    } else {
        args.servers
            .iter()
            .map(|name| ServerConfig::new(name.clone(), name.clone()))
            .collect()
    };
    let infos = serverinfos_factory(engine, configs, Box::new(AlwaysUp));
    for name in infos.server_names() {
        let reachable = infos.refresh_one(&name, args.refresh).unwrap_or(false);
        println!("{name}: {}", if reachable { "up" } else { "unreachable" });
    }
    Ok(ExitCode::SUCCESS)
}

fn event_stream<E, F>(
    stream_events: bool,
    event_json: bool,
    print_text: F,
) -> (EventSink<E>, Option<tokio::task::JoinHandle<()>>)
where
    E: Clone + Serialize + Send + 'static,
    F: Fn(&E) + Send + 'static,
{
    if !stream_events {
        return (EventSink::default(), None);
    }

    let (tx, mut rx) = event_channel();
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if event_json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(_) => print_text(&event),
                }
            } else {
                print_text(&event);
            }
        }
    });
    (EventSink::with_sender(tx), Some(task))
}

fn print_runner_event(event: &RunnerEvent) {
    match event {
        RunnerEvent::Submitted { case, stage, jobid } => {
            println!("[run] {case}/{stage} submitted as job {jobid}");
        }
        RunnerEvent::StageFinished { case, stage, state } => {
            println!("[run] {case}/{stage} finished: {state}");
        }
        RunnerEvent::Failed {
            case,
            stage,
            reason,
        } => {
            println!("[run] {case}/{stage} failed: {reason}");
        }
        RunnerEvent::Finished { case } => println!("[run] {case} queue drained"),
    }
}

fn print_monitor_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::Started => println!("[monitor] started"),
        MonitorEvent::Stopped => println!("[monitor] stopped"),
        MonitorEvent::Finished => println!("[monitor] all cases settled"),
        MonitorEvent::CaseCompleted { case } => println!("[monitor] case {case} completed"),
        MonitorEvent::StageChanged { case, stage, state } => {
            println!("[monitor] {case}/{stage} -> {state}");
        }
    }
}

fn print_case_summary(case: &Case) {
    println!("case: {}", case.name);
    for stage in case.stages() {
        println!("  {}: {}", stage.name, stage.state());
    }
}

fn exit_code_for_case(case: &Case) -> ExitCode {
    let failed = case
        .stages()
        .iter()
        .any(|stage| stage.state().contains(StateOptions::ERROR));
    if failed {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
