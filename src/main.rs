//! AutoSCAD - LLM-driven OpenSCAD refinement
//!
//! Command-line front end: runs the refinement loop and inspects the project
//! store and configuration.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod console;

use crate::console::ConsoleSink;
use autoscad::config::{AutoscadConfig, ConfigLoader, ConfigValidator};
use autoscad::events::{JsonlSink, MultiSink, TracingSink};
use autoscad::refine::{validate_inputs, RefinementLoop, RunOptions, Termination};
use autoscad::render::{OpenScadRenderer, ViewPreset};
use autoscad::store::{IterationRecord, ProjectStore};
use autoscad::AutoscadError;

/// Exit code for a run that used its whole budget without being fulfilled.
const EXIT_MAX_ITERATIONS: i32 = 3;
/// Exit code for an aborted run.
const EXIT_ABORTED: i32 = 4;

#[derive(Parser)]
#[command(name = "autoscad")]
#[command(version)]
#[command(about = "Refine OpenSCAD models with a vision LLM until they match a description", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Working directory holding `.autoscad/` (defaults to current directory)
    #[arg(short = 'C', long = "dir", global = true, default_value = ".")]
    dir: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refine a model until it matches a specification
    Run {
        /// Specification: a file path, `-` for stdin, or literal text
        #[arg(short, long)]
        spec: String,

        /// Initial OpenSCAD source file (defaults to the project's latest
        /// stored source, or an empty model)
        #[arg(long)]
        source: Option<PathBuf>,

        /// Store the run under this project (created if it does not exist)
        #[arg(short, long)]
        project: Option<String>,

        /// Planning and codegen cycles
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Camera views sent to the model: single or standard
        #[arg(long)]
        views: Option<ViewPreset>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Append progress events as JSON lines to this file
        #[arg(long, value_name = "FILE")]
        events: Option<PathBuf>,

        /// Keep rendered images in this directory
        #[arg(long, value_name = "DIR")]
        render_dir: Option<PathBuf>,

        /// Write the final source here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// No progress output
        #[arg(short, long)]
        quiet: bool,
    },

    /// Check that the renderer and API key are available
    Check,

    /// Show or validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage projects
    Projects {
        #[command(subcommand)]
        action: ProjectsAction,
    },

    /// List stored runs of a project, newest first
    Iterations {
        /// Project id or name
        project: String,

        /// Print the source of the most recent run only
        #[arg(long)]
        latest: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the merged configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration files
    Validate,
}

#[derive(Subcommand)]
enum ProjectsAction {
    /// List projects, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a project
    Create {
        /// Project name (generated if omitted)
        name: Option<String>,
    },

    /// Rename a project
    Rename {
        /// Project id or name
        project: String,

        /// New name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            e.downcast_ref::<AutoscadError>()
                .map_or(1, AutoscadError::exit_code)
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "autoscad=debug,info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn execute(cli: Cli) -> anyhow::Result<i32> {
    let dir = cli.dir.canonicalize().unwrap_or(cli.dir.clone());
    if !dir.is_dir() {
        anyhow::bail!("Directory does not exist: {}", dir.display());
    }

    match cli.command {
        Commands::Run {
            spec,
            source,
            project,
            max_iterations,
            views,
            model,
            events,
            render_dir,
            out,
            quiet,
        } => {
            let mut config = AutoscadConfig::load(&dir)?;
            if let Some(n) = max_iterations {
                config.refine.max_iterations = n;
            }
            if let Some(views) = views {
                config.refine.views = views;
            }
            if let Some(model) = model {
                config.llm.model = model;
            }

            let request = RunRequest {
                specification: read_specification(&spec)?,
                source,
                project,
                events,
                render_dir,
                out,
                quiet,
            };
            run_refinement(&dir, config, request).await
        }

        Commands::Check => check_environment(&dir).await,

        Commands::Config { action } => match action {
            ConfigAction::Show { json } => {
                let (config, chain) = ConfigLoader::new().load_with_chain(&dir)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                } else {
                    println!("\n{} AutoSCAD Configuration", "Config:".cyan().bold());
                    println!("{}", "─".repeat(40));
                    println!("   Model: {}", config.llm.model);
                    println!("   Endpoint: {}", config.llm.base_url);
                    println!("   API key variable: {}", config.llm.api_key_env);
                    println!("   Vision: {}", config.llm.vision);
                    println!(
                        "   Renderer: {} ({}x{})",
                        config.render.binary, config.render.width, config.render.height
                    );
                    println!("   Max iterations: {}", config.refine.max_iterations);
                    println!(
                        "   Max render attempts: {}",
                        config.refine.max_render_attempts
                    );
                    println!("   Views: {}", config.refine.views);
                    println!("   Store: {}", config.store_root(&dir).display());
                    println!("\n{}", chain.describe());
                }
                Ok(0)
            }

            ConfigAction::Validate => {
                let report = ConfigValidator::new(&dir).validate();
                if cli.verbose || !report.is_valid() || !report.warnings.is_empty() {
                    println!("{}", report.verbose_report());
                } else {
                    println!("{} {}", "OK".green(), report.summary());
                }
                Ok(report.exit_code())
            }
        },

        Commands::Projects { action } => {
            let store = open_store(&dir)?;
            match action {
                ProjectsAction::List { json } => {
                    let projects = store.list_projects()?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&projects)?);
                    } else if projects.is_empty() {
                        println!("{} No projects yet", "Info:".blue());
                    } else {
                        for project in &projects {
                            println!(
                                "{}  {}  {}",
                                project.id.dimmed(),
                                project.created_at.format("%Y-%m-%d %H:%M"),
                                project.name.bold()
                            );
                        }
                    }
                }
                ProjectsAction::Create { name } => {
                    let project = store.create_project(name.as_deref())?;
                    println!("{} Created {} ({})", "OK".green().bold(), project.name, project.id);
                }
                ProjectsAction::Rename { project, name } => {
                    let found = store.find_project(&project)?;
                    let renamed = store.rename_project(&found.id, &name)?;
                    println!("{} Renamed to {}", "OK".green().bold(), renamed.name);
                }
            }
            Ok(0)
        }

        Commands::Iterations {
            project,
            latest,
            json,
        } => {
            let store = open_store(&dir)?;
            let project = store.find_project(&project)?;

            if latest {
                match store.latest_iteration(&project.id)? {
                    Some(record) => print!("{}", record.model_source),
                    None => eprintln!("{} No runs stored for {}", "Info:".blue(), project.name),
                }
                return Ok(0);
            }

            let records = store.list_iterations(&project.id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("{} No runs stored for {}", "Info:".blue(), project.name);
            } else {
                println!("\n{} {}", "Project:".cyan().bold(), project.name);
                for record in &records {
                    let status = match record.termination {
                        Termination::Fulfilled => record.termination.label().green(),
                        Termination::MaxIterationsReached => record.termination.label().yellow(),
                        Termination::Aborted { .. } => record.termination.label().red(),
                    };
                    println!(
                        "  {}  {}  {} iteration(s)  {}  [{}]",
                        record.id.dimmed(),
                        record.created_at.format("%Y-%m-%d %H:%M"),
                        record.iterations_run,
                        status,
                        record.source_digest
                    );
                }
            }
            Ok(0)
        }
    }
}

/// Arguments of `autoscad run` after configuration overrides are applied.
struct RunRequest {
    specification: String,
    source: Option<PathBuf>,
    project: Option<String>,
    events: Option<PathBuf>,
    render_dir: Option<PathBuf>,
    out: Option<PathBuf>,
    quiet: bool,
}

async fn run_refinement(dir: &Path, config: AutoscadConfig, request: RunRequest) -> anyhow::Result<i32> {
    let store = open_store(dir)?;
    let existing = match request.project.as_deref() {
        Some(name) => match store.find_project(name) {
            Ok(project) => Some(project),
            Err(AutoscadError::ProjectNotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };

    let initial_source = match (&request.source, &existing) {
        (Some(path), _) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?,
        (None, Some(project)) => store
            .latest_iteration(&project.id)?
            .map(|record| record.model_source)
            .unwrap_or_default(),
        (None, None) => String::new(),
    };

    let max_iterations = config.refine.max_iterations;
    validate_inputs(
        &request.specification,
        &initial_source,
        max_iterations,
        &config.limits,
    )?;
    config.validate()?;

    let renderer = OpenScadRenderer::new(config.render.clone());
    renderer.locate()?;
    let llm = autoscad::llm::create_llm_client(&config.llm)?;
    debug!(model = llm.model_name(), "LLM client ready");

    let project = match (existing, request.project.as_deref()) {
        (Some(project), _) => Some(project),
        (None, Some(name)) => Some(store.create_project(Some(name))?),
        (None, None) => None,
    };

    let refinement = RefinementLoop::new(Arc::new(renderer), Arc::from(llm))
        .with_config(config.refine_config());

    let mut options = RunOptions::new(max_iterations);
    if let Some(ref render_dir) = request.render_dir {
        options = options.with_render_archive(render_dir.clone());
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let mut sink = MultiSink::new()
        .with(TracingSink)
        .with(ConsoleSink::new(request.quiet));
    if let Some(ref path) = request.events {
        sink.push(Box::new(JsonlSink::new(path.clone(), run_id.clone())));
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let outcome = refinement
        .run(
            &request.specification,
            &initial_source,
            &options,
            &sink,
            &cancel,
        )
        .await?;

    if let Some(ref project) = project {
        let record = IterationRecord::from_outcome(&project.id, &request.specification, &outcome);
        store.save_iteration(&record)?;
        debug!(run_id = %run_id, iteration = %record.id, "run stored");
    }

    match request.out {
        Some(ref path) => std::fs::write(path, &outcome.final_source)?,
        None => print!("{}", outcome.final_source),
    }

    Ok(match outcome.termination {
        Termination::Fulfilled => 0,
        Termination::MaxIterationsReached => EXIT_MAX_ITERATIONS,
        Termination::Aborted { .. } => EXIT_ABORTED,
    })
}

async fn check_environment(dir: &Path) -> anyhow::Result<i32> {
    let config = AutoscadConfig::load(dir)?;
    let mut code = 0;

    let renderer = OpenScadRenderer::new(config.render.clone());
    match renderer.locate() {
        Ok(path) => {
            let version = renderer
                .version()
                .await
                .unwrap_or_else(|e| format!("unknown version ({})", e));
            println!("{} {} at {}: {}", "OK".green(), config.render.binary, path.display(), version);
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            code = e.exit_code();
        }
    }

    match config.llm.api_key() {
        Ok(_) => println!("{} {} is set", "OK".green(), config.llm.api_key_env),
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            code = e.exit_code();
        }
    }

    let problems = config.problems();
    if problems.is_empty() {
        println!("{} configuration is valid", "OK".green());
    } else {
        for problem in &problems {
            println!("{} {}", "✗".red(), problem);
        }
        if code == 0 {
            code = 7;
        }
    }

    Ok(code)
}

fn open_store(dir: &Path) -> anyhow::Result<ProjectStore> {
    let config = AutoscadConfig::load(dir)?;
    Ok(ProjectStore::new(config.store_root(dir)))
}

/// `-` reads stdin; an existing file is read; anything else is the text itself.
fn read_specification(arg: &str) -> anyhow::Result<String> {
    if arg == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    let path = Path::new(arg);
    if path.is_file() {
        return Ok(std::fs::read_to_string(path)?);
    }
    Ok(arg.to_string())
}
