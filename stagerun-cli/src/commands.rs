//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::ModeArgs;
use stagerun_core::config::{ExperimentConfig, load_config};
use stagerun_core::workflow::parser::load_pipeline;
use stagerun_core::workflow::{CallbackResult, StepHook};
use stagerun_core::{
    Callback, ComputeEngine, Experiment, ExperimentContext, RunOptions, RunStatus,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            mode,
            pipeline,
            records,
            results,
        } => handle_run(mode, pipeline, records, results, workspace).await,
        Commands::Plan { mode } => handle_plan(mode, workspace).await,
        Commands::Checkpoints => handle_checkpoints(workspace).await,
        Commands::Validate { file } => handle_validate(&file).await,
        Commands::Config { action } => handle_config(action, workspace).await,
    }
}

impl ModeArgs {
    /// Layer the command-line mode flags over the configured run options.
    fn apply(&self, run: &mut RunOptions) {
        if let Some(label) = &self.resume_from {
            run.resume_from = Some(label.clone());
        }
        run.create_only |= self.create_only;
        run.infer_only |= self.infer_only;
        run.checkpoint |= self.checkpoint;
        run.test_mode |= self.test_mode;
    }
}

fn load(workspace: &Path) -> anyhow::Result<ExperimentConfig> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.resolve_paths(workspace);
    Ok(config)
}

/// Pauses the experiment once Ctrl-C has been pressed.
struct InterruptHook {
    flag: Arc<AtomicBool>,
}

impl StepHook for InterruptHook {
    fn name(&self) -> &str {
        "interrupt"
    }

    fn invoke(&mut self, ctx: &mut ExperimentContext<'_>, _iteration: Option<u64>) -> CallbackResult {
        if self.flag.load(Ordering::SeqCst) {
            ctx.pause();
        }
        Ok(())
    }
}

/// Keep running through pipeline pauses until done or interrupted.
fn drive<E: ComputeEngine>(
    experiment: &mut Experiment<E>,
    interrupted: &AtomicBool,
) -> stagerun_core::Result<RunStatus> {
    loop {
        let status = experiment.run()?;
        if status == RunStatus::Done || interrupted.load(Ordering::SeqCst) {
            return Ok(status);
        }
        info!(position = %experiment.position(), "paused by pipeline hook, continuing");
    }
}

async fn handle_run(
    mode: ModeArgs,
    pipeline: Option<PathBuf>,
    records: Option<PathBuf>,
    results: Option<PathBuf>,
    workspace: &Path,
) -> anyhow::Result<()> {
    let mut config = load(workspace)?;
    mode.apply(&mut config.run);
    if pipeline.is_some() {
        config.pipeline.file = pipeline;
    }
    if records.is_some() {
        config.engine.records = records;
    }
    if results.is_some() {
        config.output.results_path = results;
    }

    let options = config.experiment_options()?;
    let interrupted = Arc::new(AtomicBool::new(false));
    let pipeline = config.pipeline.load()?.with_iteration_hook(|| {
        Callback::hook(InterruptHook {
            flag: interrupted.clone(),
        })
    });
    let engine = config.engine.open_engine()?;

    let signal_flag = interrupted.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, pausing after the current iteration");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let mut experiment = Experiment::new(engine, pipeline, options)?;
        let status = drive(&mut experiment, &interrupted)?;
        Ok((
            status,
            *experiment.position(),
            experiment.checkpoint(),
            experiment.results().clone(),
        ))
    })
    .await;
    watcher.abort();
    let (status, position, checkpoint, results) = outcome??;

    if let Some(path) = &config.output.results_path {
        results.save(path)?;
        println!("Results written to {}", path.display());
    }

    if status != RunStatus::Done {
        let hint = checkpoint
            .map(|c| format!("; resume with --resume-from {c}"))
            .unwrap_or_default();
        anyhow::bail!("Experiment interrupted at {position}{hint}");
    }

    println!("Experiment complete ({} iterations)", results.total_iterations);
    for phase in &results.phases {
        println!("  {:<18} {:>10.3}s", phase.phase.as_str(), phase.elapsed_secs);
    }
    if !results.values.is_empty() {
        println!("Recorded values:");
        for (key, value) in &results.values {
            println!("  {key} = {value}");
        }
    }
    Ok(())
}

async fn handle_plan(mode: ModeArgs, workspace: &Path) -> anyhow::Result<()> {
    let mut config = load(workspace)?;
    mode.apply(&mut config.run);
    let options = config.experiment_options()?;
    let plan = options.plan();
    let pipeline = config.pipeline.load()?;

    println!("Mode: {:?}", options.mode);
    match plan.checkpoint {
        Some(checkpoint) => println!("Start: load {checkpoint}"),
        None => println!("Start: build network"),
    }
    println!("Phases:");
    for kind in plan.phase_kinds() {
        let saves = kind.checkpoint().filter(|_| {
            options.checkpoint_enabled
                || options.mode == stagerun_core::RunMode::CreateOnly
        });
        let suffix = saves.map(|c| format!(" -> {c}")).unwrap_or_default();
        println!("  {}{}", kind, suffix);
        for step in pipeline.steps(kind) {
            let budget = match options.iteration_cap {
                Some(cap) => step.budget.capped(cap),
                None => step.budget,
            };
            println!("    - {} ({})", step.name, budget);
        }
    }
    Ok(())
}

async fn handle_checkpoints(workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let store = config.engine.checkpoint_store();
    let entries = store.list()?;
    if entries.is_empty() {
        println!("No checkpoints in {}", store.base_dir().display());
        return Ok(());
    }
    println!("Checkpoints ({}):", entries.len());
    for entry in &entries {
        println!(
            "  {:<26} {}  {:>8} bytes  {}",
            entry.label,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.size_bytes,
            &entry.hash[..entry.hash.len().min(12)]
        );
    }
    Ok(())
}

async fn handle_validate(file: &Path) -> anyhow::Result<()> {
    let def = load_pipeline(file)?;
    let steps: usize = def.phases.iter().map(|p| p.steps.len()).sum();
    println!(
        "Pipeline '{}' is valid ({} phases, {} steps)",
        def.name,
        def.phases.len(),
        steps
    );
    Ok(())
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".stagerun");
            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!("Configuration already exists at {}", config_path.display());
                return Ok(());
            }
            std::fs::create_dir_all(&config_dir)?;
            let content = toml::to_string_pretty(&ExperimentConfig::default())?;
            std::fs::write(&config_path, content)?;
            println!("Created {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
