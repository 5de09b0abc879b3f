//! `hermitflow` CLI — run a declarative mobile UI test flow, or a whole
//! suite of them, against a WebDriver-shaped automation server.

use std::path::Path;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info, warn};

use hermitflow::config::Config;
use hermitflow::executor::Executor;
use hermitflow::flow_file::FlowFile;
use hermitflow::session::{Capabilities, Session};
use hermitflow::step::{
    AggregateStatus, CommandResult, FlowResult, HookResults, Step, StepResult, StepStatus,
    SuiteResult,
};
use hermitflow::transport::{Dialer, Transport};

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

#[derive(Parser)]
#[command(name = "hermitflow", version, about = "Declarative mobile UI test flow runner")]
struct Cli {
    #[arg(short, long, default_value_t = default_config_path())]
    config: String,
    #[arg(long, help = "Resolve and log steps but don't execute device commands")]
    dry_run: bool,
    #[command(subcommand)]
    command: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Run a single flow file
    Run {
        /// Path to a *.flow.yaml or *.flow.json file
        flow_file: String,
    },
    /// Run every flow file in a directory
    Suite {
        /// Directory containing *.flow.yaml / *.flow.json files
        dir: String,
    },
    /// Check connectivity to the automation server and device
    Doctor,
}

/// Look in cwd, then `~/.hermitflow/config.toml`.
fn default_config_path() -> String {
    if Path::new("config.toml").exists() {
        return "config.toml".to_string();
    }
    if let Ok(home) = std::env::var("HOME") {
        let installed = format!("{}/.hermitflow/config.toml", home);
        if Path::new(&installed).exists() {
            return installed;
        }
    }
    "config.toml".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hermitflow=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = Path::new(&cli.config);
    let config = if config_path.exists() {
        Config::load(config_path)?
    } else {
        warn!("no config file at {}; using defaults", cli.config);
        Config::default()
    };

    match &cli.command {
        SubCommand::Doctor => run_doctor(&config).await,
        SubCommand::Run { flow_file } => {
            let flow = FlowFile::load(Path::new(flow_file))?;
            let result = run_single_flow(&config, &flow, cli.dry_run).await?;
            print_flow_summary(&flow.name, &result);
            if !result.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
        SubCommand::Suite { dir } => {
            let dir = Path::new(dir);
            let paths = FlowFile::discover(dir)?;
            if paths.is_empty() {
                println!("{YELLOW}no *.flow.yaml/*.flow.json files found in {}{RESET}", dir.display());
                return Ok(());
            }

            let mut suite = SuiteResult::default();
            for path in &paths {
                let flow = match FlowFile::load(path) {
                    Ok(flow) => flow,
                    Err(e) => {
                        error!("skipping {}: {}", path.display(), e);
                        continue;
                    }
                };
                let result = run_single_flow(&config, &flow, cli.dry_run).await?;
                print_flow_summary(&flow.name, &result);
                suite.flows.push((flow.name.clone(), result));
            }

            print_suite_summary(&suite);
            write_report(&config, &suite)?;

            if !suite.success() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Connect, run `on_flow_start` + `steps` + `on_flow_complete`, and always
/// disconnect — including on failure.
async fn run_single_flow(config: &Config, flow: &FlowFile, dry_run: bool) -> anyhow::Result<FlowResult> {
    println!("\n{CYAN}{BOLD}▶ {}{RESET}", flow.name);
    if let Some(desc) = &flow.description {
        println!("  {DIM}{}{RESET}", desc);
    }
    if dry_run {
        println!("  {YELLOW}dry run — steps resolved but device commands are not sent{RESET}");
    }

    let dialer = match &config.transport.unix_socket_path {
        Some(path) => Dialer::UnixSocket { path: path.clone() },
        None => Dialer::Tcp { base_url: config.transport.base_url.clone() },
    };
    let transport = Transport::new(dialer, std::time::Duration::from_millis(config.transport.timeout_ms));
    let mut session = Session::new(transport, config.session.clone());

    let app_id = flow.app_id.clone().or_else(|| config.session.app_id.clone());
    let caps = Capabilities::for_platform(&config.session.platform, config.session.device_id.as_deref(), app_id.as_deref());

    let connect_result = session.connect(caps).await;
    let mut result = FlowResult::default();
    if let Err(e) = connect_result {
        error!(error = %e, "failed to connect session");
        result.on_flow_start.steps.push(StepResult::from_command_result(
            0,
            "connect",
            StepStatus::Errored,
            Some(e.category()),
            CommandResult::fail(e.to_string()),
        ));
        return Ok(result);
    }

    info!(run_id = session.run_id(), flow = %flow.name, "running flow");
    let executor = Executor::new(config.executor.clone());

    result.on_flow_start = run_steps(&session, &executor, &flow.on_flow_start, dry_run).await;
    if !result.on_flow_start.has_failure() {
        result.steps = run_step_results(&session, &executor, &flow.steps, dry_run).await;
    }
    result.on_flow_complete = run_steps(&session, &executor, &flow.on_flow_complete, dry_run).await;

    if let Err(e) = session.disconnect().await {
        warn!(error = %e, "error disconnecting session");
    }

    Ok(result)
}

async fn run_steps(session: &Session, executor: &Executor, steps: &[Step], dry_run: bool) -> HookResults {
    HookResults {
        steps: run_step_results(session, executor, steps, dry_run).await,
    }
}

async fn run_step_results(session: &Session, executor: &Executor, steps: &[Step], dry_run: bool) -> Vec<StepResult> {
    let mut results = Vec::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        let start = Instant::now();
        let command = step.command_tag();

        let result = if dry_run {
            CommandResult::ok_with_message(format!("{} (dry run)", command))
        } else {
            executor.run(session, step).await
        };

        let elapsed = start.elapsed().as_millis();
        let status = if result.success { StepStatus::Passed } else { StepStatus::Failed };

        if result.success {
            println!("  [{}/{}] {GREEN}▸{RESET} {} {DIM}({}ms){RESET}", i + 1, steps.len(), command, elapsed);
        } else {
            println!(
                "  [{}/{}] {RED}✗{RESET} {} — {} {DIM}({}ms){RESET}",
                i + 1,
                steps.len(),
                command,
                result.error.as_deref().unwrap_or("failed"),
                elapsed
            );
        }

        let category = if result.success { None } else { Some(hermitflow::error::Category::Assertion) };
        results.push(StepResult::from_command_result(i, command, status, category, result));
    }
    results
}

fn print_flow_summary(name: &str, result: &FlowResult) {
    let summary = result.summary();
    let (icon, color) = match result.aggregate_status() {
        AggregateStatus::Passed => ("✓", GREEN),
        AggregateStatus::Warned => ("!", YELLOW),
        AggregateStatus::Failed => ("✗", RED),
    };
    println!(
        "  {color}{BOLD}{icon} {}{RESET} — {} passed, {} failed, {} skipped, {} warned\n",
        name, summary.passed, summary.failed, summary.skipped, summary.warned
    );
}

fn print_suite_summary(suite: &SuiteResult) {
    let passed = suite.passed_flow_count();
    let total = suite.flows.len();
    let color = if suite.success() { GREEN } else { RED };
    println!("{BOLD}Suite:{RESET} {color}{}/{} flows passed{RESET}\n", passed, total);
}

fn write_report(config: &Config, suite: &SuiteResult) -> anyhow::Result<()> {
    let Some(output_path) = &config.suite.output_path else {
        return Ok(());
    };
    let stamped = SuiteResult {
        flows: suite.flows.clone(),
        generated_at: Some(chrono::Utc::now()),
    };
    let serialized = if config.suite.report_format == "yaml" {
        serde_yaml::to_string(&stamped)?
    } else {
        serde_json::to_string_pretty(&stamped)?
    };
    std::fs::write(output_path, serialized)?;
    info!(path = output_path, "wrote suite report");
    Ok(())
}

async fn run_doctor(config: &Config) -> anyhow::Result<()> {
    println!("{BOLD}hermitflow doctor{RESET}\n");

    let dialer = match &config.transport.unix_socket_path {
        Some(path) => Dialer::UnixSocket { path: path.clone() },
        None => Dialer::Tcp { base_url: config.transport.base_url.clone() },
    };
    println!("  Transport: {:?}", dialer);

    let transport = Transport::new(dialer, std::time::Duration::from_millis(config.transport.timeout_ms));
    let session = Session::new(transport, config.session.clone());

    if session.health_check().await {
        println!("  {GREEN}✓{RESET} automation server reachable");
    } else {
        println!("  {RED}✗{RESET} automation server not reachable at {}", config.transport.base_url);
    }

    println!("  Platform: {}", config.session.platform);
    if let Some(device_id) = &config.session.device_id {
        println!("  Device: {}", device_id);
    } else {
        println!("  {YELLOW}Device: not pinned (capabilities omit appium:udid){RESET}");
    }

    Ok(())
}
