//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - parse: parse model text into actions
//! - plan: show the device commands for model text
//! - simulate: run a scripted loop against a dry-run operator
//! - replay: print a saved event log
//! - config: print the resolved configuration

use actloop::action::ActionFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Actloop - drive a model-in-the-loop agent from the command line
#[derive(Parser, Debug)]
#[command(name = "actloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse model output into structured actions (printed as JSON)
    Parse {
        /// Raw model text, e.g. "Thought: ...\nAction: click(start_box='(100,200)')"
        text: String,

        /// Width of the coordinate grid the model used
        #[arg(long, requires = "height", value_parser = positive_factor)]
        width: Option<f64>,

        /// Height of the coordinate grid the model used
        #[arg(long, requires = "width", value_parser = positive_factor)]
        height: Option<f64>,

        /// Output format of the model (bc, o1)
        #[arg(short, long)]
        mode: Option<ActionFormat>,
    },

    /// Show the device commands an operator would issue for model text
    Plan {
        text: String,

        #[arg(long)]
        screen_width: u32,

        #[arg(long)]
        screen_height: u32,

        /// Device pixel ratio of the screen
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
    },

    /// Run a full loop against scripted model turns and a dry-run operator
    Simulate {
        /// YAML list of scripted model turns
        script: PathBuf,

        /// User input for the run
        #[arg(short, long)]
        input: String,

        /// Write the event log to this JSONL file
        #[arg(long)]
        events_out: Option<PathBuf>,

        #[arg(long, default_value_t = 1280)]
        screen_width: u32,

        #[arg(long, default_value_t = 800)]
        screen_height: u32,

        /// Run without an operator (tool calls and plain answers only)
        #[arg(long)]
        no_operator: bool,
    },

    /// Print a saved JSONL event log
    Replay { file: PathBuf },

    /// Print the resolved configuration as YAML
    Config,
}

/// Grid sizes divide coordinates, so they must be finite and above zero
fn positive_factor(value: &str) -> Result<f64, String> {
    let factor: f64 = value.parse().map_err(|e| format!("{}", e))?;
    if factor.is_finite() && factor > 0.0 {
        Ok(factor)
    } else {
        Err(format!("must be a positive number, got {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_command() {
        let cli = Cli::parse_from(["actloop", "parse", "Action: wait()", "--mode", "o1"]);
        match cli.command {
            Commands::Parse { text, width, mode, .. } => {
                assert_eq!(text, "Action: wait()");
                assert_eq!(width, None);
                assert_eq!(mode, Some(ActionFormat::O1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_factors_require_both() {
        assert!(Cli::try_parse_from(["actloop", "parse", "x", "--width", "1366"]).is_err());
        assert!(Cli::try_parse_from(["actloop", "parse", "x", "--width", "1366", "--height", "768"]).is_ok());
    }

    #[test]
    fn test_parse_factors_must_be_positive() {
        assert!(Cli::try_parse_from(["actloop", "parse", "x", "--width", "0", "--height", "0"]).is_err());
        assert!(Cli::try_parse_from(["actloop", "parse", "x", "--width", "-5", "--height", "768"]).is_err());
        assert!(Cli::try_parse_from(["actloop", "parse", "x", "--width", "inf", "--height", "768"]).is_err());
        assert_eq!(positive_factor("1366"), Ok(1366.0));
    }

    #[test]
    fn test_plan_command() {
        let cli = Cli::parse_from([
            "actloop",
            "plan",
            "Action: click(start_box='(500,500)')",
            "--screen-width",
            "1920",
            "--screen-height",
            "1080",
        ]);
        match cli.command {
            Commands::Plan { screen_width, scale, .. } => {
                assert_eq!(screen_width, 1920);
                assert_eq!(scale, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_simulate_command_with_globals() {
        let cli = Cli::parse_from([
            "actloop",
            "simulate",
            "turns.yml",
            "--input",
            "open settings",
            "--verbose",
            "--config",
            "custom.yml",
        ]);
        assert!(cli.is_verbose());
        assert_eq!(cli.config, Some(PathBuf::from("custom.yml")));
        match cli.command {
            Commands::Simulate {
                script,
                input,
                events_out,
                no_operator,
                ..
            } => {
                assert_eq!(script, PathBuf::from("turns.yml"));
                assert_eq!(input, "open settings");
                assert!(events_out.is_none());
                assert!(!no_operator);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["actloop"]).is_err());
    }
}
