use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use futures::StreamExt;
use log::{LevelFilter, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod cli;

use actloop::action::{ActionFormat, ParseOptions, parse_action_text};
use actloop::config::Config;
use actloop::coordinator::{RunCoordinator, RunOptions};
use actloop::events::{Event, EventKind, read_jsonl, write_jsonl};
use actloop::llm::ScriptedProvider;
use actloop::operator::dispatch::plan_commands;
use actloop::operator::{DryRunOperator, Operator, ScreenContext};
use actloop::runner::SessionStatus;
use actloop::tools::{ToolRegistry, current_time_tool, list_directory_tool, read_file_tool};
use cli::Cli;
use cli::commands::Commands;

const SCRIPTED_PROVIDER: &str = "scripted";

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("actloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("actloop.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // Filter wide open here; the max level below decides until config is loaded.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .target(env_logger::Target::Pipe(target))
        .init();
    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Apply `log_level` from config unless RUST_LOG already decides.
fn apply_log_level(config: &Config, verbose: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let level = if verbose {
        LevelFilter::Debug
    } else {
        config
            .log_level
            .as_deref()
            .and_then(|l| l.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::Info)
    };
    log::set_max_level(level);
}

async fn run_application(cli: &Cli, config: Config) -> Result<()> {
    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Parse {
            text,
            width,
            height,
            mode,
        } => handle_parse_command(text, width.zip(*height), *mode, &config),
        Commands::Plan {
            text,
            screen_width,
            screen_height,
            scale,
        } => handle_plan_command(text, *screen_width, *screen_height, *scale, &config),
        Commands::Simulate {
            script,
            input,
            events_out,
            screen_width,
            screen_height,
            no_operator,
        } => {
            let operator = if *no_operator {
                None
            } else {
                Some((*screen_width, *screen_height))
            };
            handle_simulate_command(script, input, events_out.as_deref(), operator, config, cli.is_verbose()).await
        }
        Commands::Replay { file } => handle_replay_command(file),
        Commands::Config => handle_config_command(&config),
    }
}

fn handle_parse_command(
    text: &str,
    factors: Option<(f64, f64)>,
    mode: Option<ActionFormat>,
    config: &Config,
) -> Result<()> {
    let defaults = config.operator.parse_options();
    let options = ParseOptions {
        factors: factors.or(defaults.factors),
        mode: mode.unwrap_or(defaults.mode),
    };
    let actions = parse_action_text(text, &options);
    info!("Parsed {} action(s)", actions.len());
    println!("{}", serde_json::to_string_pretty(&actions)?);
    Ok(())
}

fn handle_plan_command(text: &str, width: u32, height: u32, scale: f64, config: &Config) -> Result<()> {
    let ctx = ScreenContext::new(width, height, scale);
    let dispatch = config.operator.dispatch();
    for action in parse_action_text(text, &config.operator.parse_options()) {
        if action.is_degraded() {
            println!("{} no action found", "skip:".yellow());
            continue;
        }
        println!("{} {}", "action:".cyan(), action.action_type.bold());
        match plan_commands(&action, &ctx, &dispatch) {
            Ok(plan) => {
                for command in &plan.commands {
                    println!("  {}", serde_json::to_string(command)?);
                }
                if let actloop::operator::ExecuteOutcome::Stop(signal) = plan.outcome {
                    println!("  {} {}", "stop:".green(), serde_json::to_string(&signal)?);
                }
            }
            Err(e) => println!("  {} {}", "invalid:".red(), e),
        }
    }
    Ok(())
}

async fn handle_simulate_command(
    script: &Path,
    input: &str,
    events_out: Option<&Path>,
    screen: Option<(u32, u32)>,
    mut config: Config,
    verbose: bool,
) -> Result<()> {
    let yaml = fs::read_to_string(script).context(format!("Failed to read script {}", script.display()))?;
    let provider = ScriptedProvider::from_yaml(SCRIPTED_PROVIDER, &yaml)
        .context(format!("Failed to parse script {}", script.display()))?;
    info!("Loaded {} scripted turn(s) from {}", provider.remaining(), script.display());

    config.model.provider = SCRIPTED_PROVIDER.to_string();
    if config.model.name.is_empty() {
        config.model.name = "scripted-model".to_string();
    }

    let operator: Option<Box<dyn Operator>> = screen.map(|(w, h)| {
        Box::new(DryRunOperator::new(w, h, 1.0, config.operator.dispatch())) as Box<dyn Operator>
    });
    let tools = ToolRegistry::new()
        .with(read_file_tool())
        .with(list_directory_tool())
        .with(current_time_tool());

    let coordinator = RunCoordinator::new(config).with_provider(SCRIPTED_PROVIDER, Arc::new(provider));
    let mut handle = coordinator.run_streaming(input, RunOptions::default(), tools, operator)?;

    println!("{} {}", "session:".cyan(), handle.session_id);
    while let Some(event) = handle.events.next().await {
        if event.kind == EventKind::StreamDelta && !verbose {
            continue;
        }
        print_event(&event);
    }

    let result = handle.join().await?;
    if let Some(path) = events_out {
        write_jsonl(path, &result.events).context(format!("Failed to write {}", path.display()))?;
        println!("{} {}", "events written to".cyan(), path.display());
    }

    let status = match result.status {
        SessionStatus::Done => result.status.to_string().green(),
        SessionStatus::Aborted => result.status.to_string().yellow(),
        _ => result.status.to_string().red(),
    };
    println!("{} {} after {} iteration(s)", "status:".cyan(), status, result.iterations);
    Ok(())
}

fn handle_replay_command(file: &Path) -> Result<()> {
    let events = read_jsonl(file).context(format!("Failed to read {}", file.display()))?;
    info!("Replaying {} event(s) from {}", events.len(), file.display());
    for event in &events {
        print_event(event);
    }
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn print_event(event: &Event) {
    let label = format!("[{:>3}] {:<18}", event.id, event.kind.as_str());
    let label = match event.kind {
        EventKind::UserInput => label.blue(),
        EventKind::AssistantMessage => label.green(),
        EventKind::ToolCallRequest | EventKind::ToolCallResult => label.magenta(),
        EventKind::Action | EventKind::Screenshot => label.cyan(),
        EventKind::StreamDelta | EventKind::System => label.dimmed(),
        EventKind::Aborted => label.yellow(),
        EventKind::Error => label.red(),
    };
    let body = match event.content() {
        Some(text) => text.to_string(),
        None => event.payload.to_string(),
    };
    println!("{} {}", label, body);
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    apply_log_level(&config, cli.is_verbose());

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
