//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use serde_json::Value;

use conformance_engine::models::SuiteOption;

/// Resumable conformance suite runner
#[derive(Parser, Debug)]
#[command(name = "conformance-engine")]
#[command(author = "hephaex@gmail.com")]
#[command(version = "0.1.0")]
#[command(about = "Run hierarchical conformance suites that can pause and resume")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List suites, groups and tests
    List(ListArgs),

    /// Start a test run
    Run(RunArgs),

    /// Deliver the event a waiting run is parked on
    Resume(ResumeArgs),

    /// Cancel a test run
    Cancel(CancelArgs),

    /// Cancel waiting runs whose deadline has passed
    Expire(ReportArgs),

    /// Show persisted results of a run
    Results(ResultsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show inputs, outputs and flags of every node
    #[arg(short, long)]
    pub detailed: bool,

    /// Suite option used to filter conditional groups (id=value)
    #[arg(long = "option", value_parser = parse_option)]
    pub options: Vec<SuiteOption>,
}

/// Output flags shared by commands that print a run
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Save the report to a file
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Suite to open a session against
    #[arg(short, long, default_value = "capability")]
    pub suite: String,

    /// Existing session to run in instead of opening a new one
    #[arg(long)]
    pub session: Option<String>,

    /// Runnable to execute (defaults to the whole suite)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Input value saved to the session before the run (name=value)
    #[arg(short, long = "input", value_parser = parse_input)]
    pub inputs: Vec<(String, Value)>,

    /// Suite option for a new session (id=value)
    #[arg(long = "option", value_parser = parse_option)]
    pub options: Vec<SuiteOption>,

    #[command(flatten)]
    pub report: ReportArgs,
}

/// Arguments for resume command
#[derive(Parser, Debug)]
pub struct ResumeArgs {
    /// Correlation identifier the run is waiting for
    #[arg(short, long)]
    pub identifier: String,

    /// Outcome of the waiting test (pass, fail)
    #[arg(short, long, default_value = "pass")]
    pub result: String,

    /// Failure message
    #[arg(short, long)]
    pub message: Option<String>,

    #[command(flatten)]
    pub report: ReportArgs,
}

/// Arguments for cancel command
#[derive(Parser, Debug)]
pub struct CancelArgs {
    /// Run to cancel
    #[arg(short, long)]
    pub run: String,

    #[command(flatten)]
    pub report: ReportArgs,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    /// Run to show
    #[arg(short, long, conflicts_with = "session")]
    pub run: Option<String>,

    /// Show the current result of every node in a session
    #[arg(long)]
    pub session: Option<String>,

    #[command(flatten)]
    pub report: ReportArgs,
}

/// Arguments for config management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Create a configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "./conformance-engine.yaml")]
        output: String,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Show environment variables instead
        #[arg(short, long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        file: Option<String>,
    },
}

fn parse_option(s: &str) -> Result<SuiteOption, String> {
    SuiteOption::parse(s).ok_or_else(|| format!("expected id=value, got `{s}`"))
}

/// `name=value`; the value is JSON when it parses, text otherwise
fn parse_input(s: &str) -> Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{s}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing input name in `{s}`"));
    }

    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) if !value.is_string() => value,
        _ => Value::String(raw.to_string()),
    };
    Ok((name.to_string(), value))
}
