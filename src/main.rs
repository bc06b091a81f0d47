//! FlowRunner CLI Entry Point
//!
//! Registers flow files with an engine, runs each of them once and reports
//! how every run ended.
//!
//! # Usage
//!
//! ```bash
//! # Run a flow against an in-memory engine
//! flowrunner hello_flow.yaml
//!
//! # Use an engine configuration file
//! flowrunner --config engine.yaml nightly.yaml cleanup.yaml
//!
//! # Give up waiting after 10 minutes
//! flowrunner --timeout 600 nightly.yaml
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use log::{error, info, warn};
use serde::Deserialize;

use flowrunner::{
    Engine, EngineConfig, ExecutionStatus, FlowDefinition, JobDefinition, APP_NAME, VERSION,
};

/// Default wait for the engine to go idle, in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    config_path: Option<PathBuf>,
    flow_paths: Vec<PathBuf>,
    timeout: Duration,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: None,
            flow_paths: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            verbose: false,
        }
    }
}

/// A flow file: the flow's settings plus its jobs.
#[derive(Debug, Deserialize)]
struct FlowFile {
    flow: FlowDefinition,
    #[serde(default)]
    jobs: Vec<JobDefinition>,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Workflow Execution Engine");
    println!();
}

fn print_usage() {
    println!("Usage: flowrunner [OPTIONS] <FLOW_FILE>...");
    println!();
    println!("Arguments:");
    println!("  <FLOW_FILE>...      Flow definitions (YAML) to register and run once");
    println!();
    println!("Options:");
    println!("  --config PATH       Engine configuration file (default: in-memory engine)");
    println!(
        "  --timeout SECS      Maximum time to wait for all runs (default: {})",
        DEFAULT_TIMEOUT_SECS
    );
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  flowrunner hello_flow.yaml");
    println!("  flowrunner --config engine.yaml nightly.yaml --timeout 600");
}

fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a path argument".to_string());
                }
                config.config_path = Some(PathBuf::from(&args[i]));
            }
            "--timeout" => {
                i += 1;
                if i >= args.len() {
                    return Err("--timeout requires a number of seconds".to_string());
                }
                let secs: u64 = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid timeout value: {}", args[i]))?;
                config.timeout = Duration::from_secs(secs);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => config.flow_paths.push(PathBuf::from(arg)),
        }
        i += 1;
    }

    if config.flow_paths.is_empty() {
        return Err("At least one flow file is required".to_string());
    }
    Ok(config)
}

fn load_flow_file(path: &Path) -> Result<FlowFile, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Could not read flow file '{}': {}", path.display(), e))?;
    let file: FlowFile = serde_yaml::from_str(&content)
        .map_err(|e| format!("Could not parse flow file '{}': {}", path.display(), e))?;
    Ok(file)
}

fn status_label(status: ExecutionStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        ExecutionStatus::Success => text.green().bold(),
        ExecutionStatus::Waiting | ExecutionStatus::Running => text.yellow(),
        _ => text.red().bold(),
    }
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let engine_config = match &config.config_path {
        Some(path) => {
            info!("Loading engine configuration: {}", path.display());
            EngineConfig::from_file(path)?
        }
        None => EngineConfig::in_memory(),
    };
    let engine = Engine::new(engine_config)?;

    let mut started = Vec::new();
    for path in &config.flow_paths {
        let file = load_flow_file(path)?;
        let name = file.flow.name.clone();

        let Some(flow_id) = engine.add_flow(&file.flow, &file.jobs) else {
            return Err(format!("Flow '{}' from {} was not added", name, path.display()).into());
        };
        info!("Flow '{}' registered with {} jobs", name, file.jobs.len());

        let execution_id = engine.start_process(flow_id)?;
        started.push((name, execution_id));
    }

    if !engine.wait_idle(config.timeout) {
        warn!(
            "Runs still active after {} seconds",
            config.timeout.as_secs()
        );
    }

    println!();
    println!("{}", "Summary".bold());
    let mut all_succeeded = true;
    for (name, execution_id) in &started {
        let status = engine.get_execution(*execution_id)?.status;
        if status != ExecutionStatus::Success {
            all_succeeded = false;
            for entry in engine.execution_logs(*execution_id)? {
                if entry.level == flowrunner::model::LogLevel::Error {
                    error!("{}: {}", name, entry.message);
                }
            }
        }
        println!("  {:<32} #{:<6} {}", name, execution_id, status_label(status));
    }
    println!();

    engine.shutdown();
    Ok(all_succeeded)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
