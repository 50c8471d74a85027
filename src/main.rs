use anyhow::{Context, Result};
use rowflow::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use rowflow::cli::output::*;
use rowflow::cli::{Cli, Command};
use rowflow::core::config::PipelineConfig;
use rowflow::core::ExecutionStatus;
use rowflow::execution::{ExecutionEngine, PipelineResult};
use rowflow::persistence::{ExecutionSummary, PersistenceBackend};
use rowflow::steps::StepRegistry;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const EXIT_FAILED: i32 = 1;
const EXIT_STOPPED: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging, RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    let code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Box<dyn PersistenceBackend>> {
    Ok(Box::new(
        rowflow::persistence::SqliteExecutionStore::with_default_path().await?,
    ))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Box<dyn PersistenceBackend>> {
    warn!("Built without the sqlite feature, run history is not kept");
    Ok(Box::new(rowflow::persistence::InMemoryPersistence::new()))
}

fn exit_code(result: &PipelineResult) -> i32 {
    if result.success {
        0
    } else if result.stopped {
        EXIT_STOPPED
    } else {
        EXIT_FAILED
    }
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let mut pipeline = config.to_pipeline();

    let quiet = cmd.json;
    if !quiet {
        println!("{} Loaded pipeline: {}", INFO, style(&pipeline.name).bold());
    }

    // Apply overrides
    for (key, value) in &cmd.params {
        pipeline.variables.insert(key.clone(), value.clone());
        if !quiet {
            println!(
                "{} Parameter: {} = {}",
                INFO,
                style(key).cyan(),
                style(value).dim()
            );
        }
    }
    if let Some(size) = cmd.row_set_size {
        pipeline.settings.row_set_size = size;
    }

    let engine = ExecutionEngine::new(StepRegistry::with_builtins());
    engine
        .validate(&pipeline)
        .context("Pipeline validation failed")?;

    // Set up event handler for console output
    let spinner = if quiet {
        indicatif::ProgressBar::hidden()
    } else {
        create_spinner()
    };
    let printer = spinner.clone();
    engine.add_event_handler(move |event| {
        printer.println(format_execution_event(&event));
    });

    let mut execution = engine.prepare(&pipeline)?;
    let stop = execution.stop_handle();
    let progress = execution.progress();

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping pipeline");
            stop.stop();
        }
    });

    // Step copies run on their own threads, wait for them off the runtime
    let mut run = tokio::task::spawn_blocking(move || {
        if let Err(err) = execution.start() {
            error!("{}", err);
        }
        execution.wait_until_finished()
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let result = loop {
        tokio::select! {
            joined = &mut run => break joined.context("Pipeline run panicked")?,
            _ = ticker.tick() => spinner.set_message(format_progress(&progress)),
        }
    };
    ctrl_c.abort();
    spinner.finish_and_clear();

    // Save to history
    if !cmd.no_history {
        let store = open_history().await?;
        let summary = ExecutionSummary::from_result(&result);
        store.save_execution(&summary).await?;
        if !quiet {
            println!(
                "{} Execution saved to history (ID: {})",
                INFO,
                style(&summary.execution_id.to_string()[..8]).dim()
            );
        }
    }

    if quiet {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(exit_code(&result));
    }

    println!();
    for line in format_step_results(&result.steps) {
        println!("  {}", line);
    }
    println!();

    // Print final status
    match result.status {
        ExecutionStatus::Completed => println!(
            "{} {} completed {} in {}",
            CHECK,
            style(&result.pipeline_name).bold(),
            style("successfully").green(),
            format_duration(Duration::from_millis(result.duration_ms().max(0) as u64))
        ),
        ExecutionStatus::Stopped => println!(
            "{} {} {}",
            STOP,
            style(&result.pipeline_name).bold(),
            style("stopped").yellow()
        ),
        _ => {
            println!(
                "{} {} {}",
                CROSS,
                style(&result.pipeline_name).bold(),
                style("failed").red()
            );
            for failure in result.failures() {
                println!("  {}", style(failure).red());
            }
        }
    }

    Ok(exit_code(&result))
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    if !cmd.json {
        println!("{} Validating pipeline...", INFO);
    }

    let checked = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        let engine = ExecutionEngine::new(StepRegistry::with_builtins());
        engine.validate(&config.to_pipeline())?;
        Ok(config)
    });

    match checked {
        Ok(config) if cmd.json => {
            let data = serde_json::json!({ "valid": true, "pipeline": config });
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(0)
        }
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            println!("  Hops: {}", style(config.hops.len()).cyan());
            println!("  Variables: {}", style(config.variables().len()).cyan());
            Ok(0)
        }
        Err(e) if cmd.json => {
            let data = serde_json::json!({ "valid": false, "error": format!("{:#}", e) });
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(EXIT_FAILED)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(EXIT_FAILED)
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<i32> {
    let store = open_history().await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let executions = store.list_executions(pipeline, usize::MAX).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "execution_count": executions.len()
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(0);
    }

    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let executions = store.list_executions(pipeline_name, usize::MAX).await?;
            let count = |status| executions.iter().filter(|e| e.status == status).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed, {} stopped)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(count(ExecutionStatus::Completed)).green(),
                style(count(ExecutionStatus::Failed)).red(),
                style(count(ExecutionStatus::Stopped)).yellow()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(0)
}

async fn show_history(cmd: &HistoryCommand) -> Result<i32> {
    let store = open_history().await?;

    // If specific execution ID is requested
    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id =
            uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;

        return match store.load_execution(exec_id).await? {
            Some(summary) if cmd.json => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                Ok(0)
            }
            Some(summary) => {
                print_execution_details(&summary);
                Ok(0)
            }
            None => {
                println!("{} Execution not found", WARN);
                Ok(EXIT_FAILED)
            }
        };
    }

    let executions = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name, cmd.limit).await?,
        None => store.recent_executions(cmd.limit).await?,
    };

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(0);
    }

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(0);
    }

    println!("{} Execution history (showing latest {}):", INFO, cmd.limit);
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
        if cmd.verbose {
            for line in format_step_results(&summary.steps) {
                println!("      {}", line);
            }
        }
    }

    Ok(0)
}

fn print_execution_details(summary: &ExecutionSummary) {
    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    println!("  Finished: {}", style(summary.finished_at.to_rfc3339()).dim());
    println!(
        "  Duration: {}",
        style(format_duration(Duration::from_millis(
            summary.duration_ms().max(0) as u64
        )))
        .dim()
    );
    println!(
        "  Errors: {}, error rows: {}",
        summary.errors, summary.error_rows
    );
    println!();
    for line in format_step_results(&summary.steps) {
        println!("  {}", line);
    }
}
