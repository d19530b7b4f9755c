use anyhow::{bail, Context, Result};
use autofix_pipeline::{
    agent::CommandAgentClient,
    cli::{
        commands::{
            FixCommand, HistoryCommand, ReviseCommand, RunCommand, SeedCommand, ShowCommand,
            ValidateCommand,
        },
        output::*,
        Cli, Command,
    },
    core::{config::StoreKind, ExecutionStatus, PipelineConfig},
    execution::{AgentCorrector, AgentStep, Corrector, ExecutionEngine, ExecutionEvent},
    registry::{ConfigurationStore, FileStore, InMemoryStore, Origin, RevisionDraft},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await,
        Command::Validate(cmd) => validate_pipeline(cmd),
        Command::Seed(cmd) => seed_step(cmd).await,
        Command::Show(cmd) => show_step(cmd).await,
        Command::History(cmd) => show_history(cmd).await,
        Command::Revise(cmd) => revise_step(cmd).await,
        Command::Fix(cmd) => fix_step(cmd).await,
    }
}

fn load_config(file: &str) -> Result<PipelineConfig> {
    PipelineConfig::from_file(file)
        .with_context(|| format!("Failed to load pipeline config {}", file))
}

/// Open the configuration store selected by the pipeline file
async fn open_store(config: &PipelineConfig) -> Result<Arc<dyn ConfigurationStore>> {
    let path = config.store_path();
    let store: Arc<dyn ConfigurationStore> = match config.store.kind {
        StoreKind::File => Arc::new(
            FileStore::open(&path)
                .await
                .with_context(|| format!("Failed to open prompt store at {}", path.display()))?,
        ),
        #[cfg(feature = "sqlite")]
        StoreKind::Sqlite => Arc::new(
            autofix_pipeline::registry::SqliteStore::new(&path)
                .await
                .with_context(|| format!("Failed to open registry database {}", path.display()))?,
        ),
        #[cfg(not(feature = "sqlite"))]
        StoreKind::Sqlite => bail!("This build does not include the sqlite store"),
        StoreKind::Memory => Arc::new(InMemoryStore::new()),
    };
    Ok(store)
}

fn build_corrector(config: &PipelineConfig) -> Arc<dyn Corrector> {
    let agent = CommandAgentClient::from_config(config.corrector_agent());
    Arc::new(AgentCorrector::new(agent))
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let mut config = load_config(&cmd.file)?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    // Apply overrides
    for (key, value) in &cmd.var {
        config.variables.insert(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }
    if let Some(max_retries) = cmd.max_retries {
        config.max_retries = Some(max_retries);
        for step in &mut config.steps {
            step.max_retries = None;
        }
    }

    let store = open_store(&config).await?;
    for step in &config.steps {
        if let Some(ref prompt) = step.prompt {
            if store.seed(&step.id, prompt).await? {
                info!("Seeded initial prompt for {}", step.id);
            }
        }
    }

    let mut engine = ExecutionEngine::new(store, build_corrector(&config), config.default_policy())
        .with_legacy_sentinel(config.legacy_error_sentinel)
        .with_variables(config.variables.clone());

    let agent = Arc::new(CommandAgentClient::from_config(&config.agent));
    for step in &config.steps {
        let work = AgentStep::new(agent.clone()).with_task(step.task.clone());
        engine.register_with_policy(step.id.clone(), Arc::new(work), config.policy_for(step));
    }

    // Progress bar advances once per finished step
    let progress = create_progress_bar(config.steps.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        bar.println(format_execution_event(event));
        match event {
            ExecutionEvent::StepStarted { step_id, .. } => bar.set_message(step_id.clone()),
            ExecutionEvent::StepSucceeded { .. } | ExecutionEvent::StepExhausted { .. } => {
                bar.inc(1)
            }
            _ => {}
        }
    });

    // Ctrl-C cancels the run
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            trigger.cancel();
        }
    });

    let step_ids = config.step_ids();
    let result = engine.run_with_cancel(step_ids.as_slice(), cancel).await;
    progress.finish_and_clear();
    let state = result.context("Pipeline could not start")?;

    println!("\n{}", format_state_summary(&state));

    if let Some(ref path) = cmd.output {
        let json = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write state to {}", path.display()))?;
        println!("{} State written to {}", INFO, style(path.display()).dim());
    }

    match state.status {
        ExecutionStatus::Completed => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&config.name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        status => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&config.name).bold(),
                format_status(status)
            );
            std::process::exit(1);
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            println!("  Variables: {}", style(config.variables.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

async fn seed_step(cmd: &SeedCommand) -> Result<()> {
    let config = load_config(&cmd.file)?;
    let content = std::fs::read_to_string(&cmd.from)
        .with_context(|| format!("Failed to read {}", cmd.from.display()))?;

    let store = open_store(&config).await?;
    if store.seed(&cmd.step, &content).await? {
        println!("{} Seeded prompt for {}", CHECK, style(&cmd.step).cyan());
    } else {
        println!(
            "{} {} already has a prompt; use `revise` to change it",
            WARN,
            style(&cmd.step).cyan()
        );
    }
    Ok(())
}

async fn show_step(cmd: &ShowCommand) -> Result<()> {
    let config = load_config(&cmd.file)?;
    let store = open_store(&config).await?;

    let current = store.read(&cmd.step).await?;
    let version = current
        .version
        .map(|v| format!("v{}", v))
        .unwrap_or_else(|| "seed".to_string());
    println!("{} {} ({})", INFO, style(&cmd.step).cyan(), style(version).dim());
    println!("{}", current.content);
    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let config = load_config(&cmd.file)?;
    let store = open_store(&config).await?;

    let mut revisions = match cmd.step {
        Some(ref step) => store.history(step).await?,
        None => store.log().await?,
    };
    let skip = revisions.len().saturating_sub(cmd.limit);
    revisions.drain(..skip);

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&revisions)?);
        return Ok(());
    }

    if revisions.is_empty() {
        println!("{} No revisions found", INFO);
        return Ok(());
    }

    println!("{} Revision history (showing latest {}):", INFO, revisions.len());
    for revision in &revisions {
        println!("  {}", format_revision(revision));
    }
    Ok(())
}

async fn revise_step(cmd: &ReviseCommand) -> Result<()> {
    let config = load_config(&cmd.file)?;
    let content = std::fs::read_to_string(&cmd.from)
        .with_context(|| format!("Failed to read {}", cmd.from.display()))?;

    let store = open_store(&config).await?;
    let draft = RevisionDraft::new(content, Origin::Manual).with_score(cmd.score);
    let revision = store.append(&cmd.step, draft).await?;

    println!(
        "{} {} is now at {}",
        CHECK,
        style(&cmd.step).cyan(),
        style(revision.label()).bold()
    );
    Ok(())
}

async fn fix_step(cmd: &FixCommand) -> Result<()> {
    let config = load_config(&cmd.file)?;
    let store = open_store(&config).await?;
    let current = store.read(&cmd.step).await?;

    println!("{} Asking for a revised prompt for {}", WRENCH, style(&cmd.step).cyan());
    let corrector = build_corrector(&config);
    let content = corrector
        .propose(&cmd.step, &current.content, &cmd.error)
        .await
        .context("Corrector failed")?;

    if content.trim().is_empty() {
        bail!("Corrector returned an empty prompt");
    }

    let revision = store
        .write(&cmd.step, &content, Origin::FixByAgent, Some(&cmd.error))
        .await?;
    println!(
        "{} {} is now at {}",
        CHECK,
        style(&cmd.step).cyan(),
        style(revision.label()).bold()
    );
    println!("{}", content);
    Ok(())
}
