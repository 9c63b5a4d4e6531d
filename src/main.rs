//! Conformance Engine - resumable conformance suite runner
//!
//! Runs the built-in suites against a system under test and keeps every run's
//! results so that runs parked on an external event can be resumed later.
//!
//! ## Usage
//!
//! ```bash
//! # Show the runnable tree
//! conformance-engine list --detailed
//!
//! # Run the whole capability suite
//! conformance-engine run --input url=http://localhost:8080/fhir
//!
//! # Run one group with the EHR launch option
//! conformance-engine run --option launch=ehr --target capability-launch
//!
//! # Deliver the launch callback and continue
//! conformance-engine resume --identifier <state>
//! ```
//!
//! Resuming, cancelling and re-reading results across invocations need a
//! `data_dir` in the configuration.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;
use conformance_engine::config::{print_env_help, AppConfig, ConfigFile, ConfigFormat, EnvConfig};
use conformance_engine::executor::{ResumeOutcome, TestRunService};
use conformance_engine::jobs::Jobs;
use conformance_engine::models::{RunStatus, RunnableKind, RunnableTree};
use conformance_engine::output::{
    write_summary_to_file, OutputFormat, ResultFormatter, RunSummary,
};
use conformance_engine::repository::Repositories;
use conformance_engine::suites;
use conformance_engine::utils::logger::init_logger;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, config_path) = AppConfig::resolve(args.config.as_deref().map(Path::new))?;
    init_logger(config.log_level().raised_by(args.verbose));
    match &config_path {
        Some(path) => debug!("Loaded configuration from {}", path.display()),
        None => debug!("No configuration file found, using defaults"),
    }

    match args.command {
        cli::Command::List(list_args) => {
            let tree = load_tree(&config)?;
            list_runnables(&tree, list_args);
        }
        cli::Command::Run(run_args) => {
            let service = build_service(&config)?;
            start_run(&service, run_args).await?;
        }
        cli::Command::Resume(resume_args) => {
            let service = build_service(&config)?;
            resume_run(&service, resume_args).await?;
        }
        cli::Command::Cancel(cancel_args) => {
            let service = build_service(&config)?;
            let run = service.cancel(&cancel_args.run).await?;
            finish_jobs(&service).await?;
            print_run(&service, &run.id, &cancel_args.report)?;
        }
        cli::Command::Expire(report) => {
            let service = build_service(&config)?;
            let expired = service.expire_waiting_runs(Utc::now()).await?;
            finish_jobs(&service).await?;
            if expired.is_empty() {
                println!("No waiting runs have expired.");
            }
            for run in expired {
                print_run(&service, &run.id, &report)?;
            }
        }
        cli::Command::Results(results_args) => {
            let service = build_service(&config)?;
            show_results(&service, results_args)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, &config)?;
        }
    }

    Ok(())
}

fn load_tree(config: &AppConfig) -> Result<RunnableTree> {
    suites::load_tree_with_timeout(config.http_timeout_secs).context("Failed to load built-in suites")
}

fn build_service(config: &AppConfig) -> Result<TestRunService> {
    let tree = Arc::new(load_tree(config)?);

    let repos = match &config.data_dir {
        Some(dir) => Repositories::file(dir)
            .with_context(|| format!("Failed to open data directory: {dir}"))?,
        None => {
            debug!("No data_dir configured, results are kept in memory");
            Repositories::in_memory()
        }
    };

    let mut jobs = Jobs::new(tree.clone(), repos.clone())
        .with_default_wait_timeout(config.default_wait_timeout());
    if config.async_jobs {
        jobs = jobs.with_async(config.max_workers);
    }

    Ok(TestRunService::new(tree, repos, Arc::new(jobs)))
}

/// Let queued jobs finish before reporting
async fn finish_jobs(service: &TestRunService) -> Result<()> {
    if service.jobs().is_async() {
        service
            .jobs()
            .shutdown()
            .await
            .context("Failed to drain job queue")?;
    }
    Ok(())
}

fn list_runnables(tree: &RunnableTree, args: cli::ListArgs) {
    for suite in tree.suites() {
        println!("\n{} ({})", suite.title, suite.id);
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        for (depth, runnable) in tree.walk(&suite.id, &args.options).into_iter().skip(1) {
            let indent = "  ".repeat(depth);
            let marker = match runnable.kind {
                RunnableKind::Group => "▸",
                _ => "-",
            };
            let mut flags = Vec::new();
            if !runnable.is_required() {
                flags.push("optional");
            }
            if !runnable.user_runnable {
                flags.push("runs with group");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };

            println!("{indent}{marker} {:45} {}{flags}", runnable.id.as_str(), runnable.title);

            if args.detailed {
                let inputs: Vec<&str> = runnable.inputs.iter().map(|i| i.name.as_str()).collect();
                let outputs: Vec<&str> = runnable.outputs.iter().map(|o| o.name.as_str()).collect();
                if !inputs.is_empty() {
                    println!("{indent}    inputs:  {}", inputs.join(", "));
                }
                if !outputs.is_empty() {
                    println!("{indent}    outputs: {}", outputs.join(", "));
                }
            }
        }
    }
    println!();
}

async fn start_run(service: &TestRunService, args: cli::RunArgs) -> Result<()> {
    let session = match &args.session {
        Some(id) => service.find_session(id)?,
        None => service.create_session(&args.suite, args.options.clone())?,
    };
    if args.session.is_some() && !args.options.is_empty() {
        warn!("--option is ignored when reusing session {}", session.id);
    }

    let target = args
        .target
        .clone()
        .unwrap_or_else(|| session.suite_id.to_string());
    let inputs: BTreeMap<_, _> = args.inputs.into_iter().collect();

    info!("Running {} in session {}", target, session.id);
    let run = service.create_run(&session.id, &target, inputs).await?;
    finish_jobs(service).await?;

    print_run(service, &run.id, &args.report)
}

async fn resume_run(service: &TestRunService, args: cli::ResumeArgs) -> Result<()> {
    let outcome = ResumeOutcome::from_str(&args.result, args.message)
        .ok_or_else(|| anyhow!("Unknown result `{}`; expected pass or fail", args.result))?;

    let run = service.resume(&args.identifier, outcome).await?;
    finish_jobs(service).await?;

    print_run(service, &run.id, &args.report)
}

fn show_results(service: &TestRunService, args: cli::ResultsArgs) -> Result<()> {
    match (&args.run, &args.session) {
        (Some(run_id), _) => print_run(service, run_id, &args.report),
        (None, Some(session_id)) => {
            let formatter = formatter_for(&args.report)?;
            let results = service.session_results(session_id)?;
            if results.is_empty() {
                println!("No results recorded for session {session_id}");
            }
            for result in &results {
                println!("{}", formatter.format_result(result));
            }
            Ok(())
        }
        (None, None) => bail!("Pass --run <id> or --session <id>"),
    }
}

fn formatter_for(report: &cli::ReportArgs) -> Result<ResultFormatter> {
    let format = OutputFormat::from_str(&report.format)
        .ok_or_else(|| anyhow!("Unknown output format: {}", report.format))?;
    Ok(ResultFormatter::new(format))
}

fn print_run(service: &TestRunService, run_id: &str, report: &cli::ReportArgs) -> Result<()> {
    let run = service.find_run(run_id)?;
    let session = service.find_session(&run.test_session_id)?;
    let results = service.results(&run.id)?;
    let summary = RunSummary::new(service.tree(), &session.suite_options, &run, results);

    let formatter = formatter_for(report)?;
    println!("{}", formatter.format_summary(&summary));

    if let Some(path) = &report.output {
        let format = OutputFormat::from_str(&report.format).unwrap_or(OutputFormat::Table);
        write_summary_to_file(path, &summary, format)
            .with_context(|| format!("Failed to write report: {path}"))?;
        println!("Report saved to {path}");
    }

    match run.status {
        RunStatus::Waiting => {
            let identifier = run.identifier.as_deref().unwrap_or_default();
            println!("Run {} is waiting for `{identifier}`.", run.id);
            println!("Resume with: conformance-engine resume --identifier {identifier}");
        }
        RunStatus::Done => {}
        status => println!("Run {} is {status}.", run.id),
    }
    Ok(())
}

fn manage_config(args: cli::ConfigArgs, effective: &AppConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                bail!("Configuration file already exists: {output}. Use --force to overwrite.");
            }

            ConfigFile::example().save(path)?;
            println!("✓ Configuration file created: {output}");
        }

        cli::ConfigAction::Show { env, format } => {
            if env {
                EnvConfig::load().print_summary();
                println!();
                print_env_help();
            } else {
                let config = ConfigFile {
                    app: effective.clone(),
                    ..ConfigFile::default()
                };
                let format = ConfigFormat::from_str(&format)
                    .ok_or_else(|| anyhow!("Unknown config format: {format}"))?;
                println!("{}", config.render(format)?);
            }
        }

        cli::ConfigAction::Validate { file } => {
            let path = match file {
                Some(file) => file,
                None => ConfigFile::find()
                    .map(|p| p.to_string_lossy().to_string())
                    .ok_or_else(|| anyhow!("No configuration file found"))?,
            };

            match ConfigFile::load(&path) {
                Ok(_) => println!("✓ Configuration file is valid: {path}"),
                Err(e) => {
                    println!("✗ Configuration file is invalid: {path}");
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}
