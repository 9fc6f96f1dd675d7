use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use storyflow_core::{
    api::{ExportOptions, ProjectQuery, ProjectsApi},
    config::Config,
    model::{DonePayload, ProgressPayload, Stage, StageUpdatePayload, TokenPayload},
    sse::{ConnectOptions, EventFrame, SessionHooks, StageSession},
    stream::StreamEvent,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "storyflow pipeline CLI", long_about = None)]
struct Cli {
    /// JSON or TOML config file; STORYFLOW_* env vars override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Projects {
        #[command(subcommand)]
        action: ProjectCmd,
    },
    /// Follow a project's progress stream until it finishes
    Watch {
        #[arg(long)]
        project: String,
        /// Only this stage (all stages when omitted)
        #[arg(long)]
        stage: Option<Stage>,
        #[arg(long)]
        auto_reconnect: bool,
    },
    /// Queue a stage for execution
    RunStage {
        #[arg(long)]
        project: String,
        #[arg(long)]
        stage: Stage,
        /// JSON object passed as the stage input
        #[arg(long, default_value = "{}")]
        input: String,
        /// Stream the stage output while it runs
        #[arg(long)]
        watch: bool,
    },
    /// Retry a failed stage
    Retry {
        #[arg(long)]
        project: String,
        #[arg(long)]
        stage: Stage,
    },
    /// Roll a project back to a stage
    Rollback {
        #[arg(long)]
        project: String,
        #[arg(long)]
        stage: Stage,
    },
    Pause {
        #[arg(long)]
        project: String,
    },
    Resume {
        #[arg(long)]
        project: String,
    },
    /// Run every unfinished stage in order
    RunPipeline {
        #[arg(long)]
        project: String,
    },
    /// List a project's stages
    Stages {
        #[arg(long)]
        project: String,
    },
}

#[derive(Subcommand)]
enum ProjectCmd {
    List {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        page_size: Option<u32>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        search: Option<String>,
        /// Sort field, prefix with '-' for descending
        #[arg(long)]
        ordering: Option<String>,
    },
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Story topic the pipeline starts from
        #[arg(long)]
        topic: Option<String>,
        /// Prompt template set id
        #[arg(long)]
        template_set: Option<String>,
    },
    Show {
        #[arg(long)]
        project: String,
    },
    /// Patch project fields with a JSON object
    Update {
        #[arg(long)]
        project: String,
        #[arg(long)]
        changes: String,
    },
    Delete {
        #[arg(long)]
        project: String,
    },
    /// Render the final video
    Export {
        #[arg(long)]
        project: String,
        #[arg(long)]
        no_subtitles: bool,
        #[arg(long, default_value = "mp4")]
        format: String,
    },
}

/// Renders stream frames on the terminal: tokens to stdout, status to stderr.
struct PrintHooks;

impl SessionHooks for PrintHooks {
    fn on_open(&self) {
        eprintln!("[connected]");
    }

    fn on_token(&self, frame: &EventFrame) {
        if let Ok(t) = frame.decode::<TokenPayload>() {
            print!("{}", t.content);
            io::stdout().flush().ok();
        }
    }

    fn on_stage_update(&self, frame: &EventFrame) {
        if let Ok(u) = frame.decode::<StageUpdatePayload>() {
            let stage = u.stage.as_deref().unwrap_or("-");
            match u.progress {
                Some(p) => eprintln!("[{stage}: {} {p}%]", u.status),
                None => eprintln!("[{stage}: {}]", u.status),
            }
        }
    }

    fn on_progress(&self, frame: &EventFrame) {
        if let Ok(p) = frame.decode::<ProgressPayload>() {
            let item = p.item_name.as_deref().unwrap_or("");
            eprintln!("[{}/{} {}%] {item}", p.current, p.total, p.progress);
        }
    }

    fn on_done(&self, frame: &EventFrame) {
        println!();
        match frame.decode::<DonePayload>() {
            Ok(d) => eprintln!("[done: {}]", d.stage.as_deref().unwrap_or("pipeline")),
            Err(_) => eprintln!("[done]"),
        }
    }

    fn on_error(&self, event: &StreamEvent) {
        match event.error() {
            Some(err) => eprintln!("[stream error: {err}]"),
            None => eprintln!(
                "[stage error: {}]",
                event
                    .as_frame()
                    .and_then(|f| f.get("error"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
            ),
        }
    }

    fn on_close(&self) {
        eprintln!("[closed]");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    }
    .with_env();

    match cli.command {
        Commands::Projects { action } => {
            projects(&ProjectsApi::from_config(&cfg)?, action).await?;
        }
        Commands::Watch {
            project,
            stage,
            auto_reconnect,
        } => {
            let options = ConnectOptions {
                auto_reconnect: auto_reconnect || cfg.stream.auto_reconnect,
            };
            watch(&cfg, &project, stage, options).await?;
        }
        Commands::RunStage {
            project,
            stage,
            input,
            watch: follow,
        } => {
            let input: serde_json::Value = serde_json::from_str(&input)?;
            let api = ProjectsApi::from_config(&cfg)?;
            if follow {
                // subscribe first so no early frame is missed
                let mut session = StageSession::from_config(&cfg, PrintHooks)?;
                let options = ConnectOptions {
                    auto_reconnect: cfg.stream.auto_reconnect,
                };
                session.open(&project, Some(stage), options)?;
                let accepted = api.execute_stage(&project, stage, &input, false).await?;
                eprintln!("[queued task {}]", accepted.task_id);
                follow_session(&session).await?;
            } else {
                let accepted = api.execute_stage(&project, stage, &input, false).await?;
                println!("{}", serde_json::to_string_pretty(&accepted)?);
            }
        }
        Commands::Retry { project, stage } => {
            let api = ProjectsApi::from_config(&cfg)?;
            print_json(&api.retry_stage(&project, stage).await?)?;
        }
        Commands::Rollback { project, stage } => {
            let api = ProjectsApi::from_config(&cfg)?;
            print_json(&api.rollback_stage(&project, stage).await?)?;
        }
        Commands::Pause { project } => {
            print_json(&ProjectsApi::from_config(&cfg)?.pause(&project).await?)?;
        }
        Commands::Resume { project } => {
            print_json(&ProjectsApi::from_config(&cfg)?.resume(&project).await?)?;
        }
        Commands::RunPipeline { project } => {
            print_json(&ProjectsApi::from_config(&cfg)?.run_pipeline(&project).await?)?;
        }
        Commands::Stages { project } => {
            print_json(&ProjectsApi::from_config(&cfg)?.list_stages(&project).await?)?;
        }
    }

    Ok(())
}

async fn projects(api: &ProjectsApi, action: ProjectCmd) -> anyhow::Result<()> {
    match action {
        ProjectCmd::List {
            page,
            page_size,
            status,
            search,
            ordering,
        } => {
            let query = ProjectQuery {
                page,
                page_size,
                status,
                search,
                ordering,
            };
            print_json(&api.list_projects(&query).await?)
        }
        ProjectCmd::Create {
            name,
            description,
            topic,
            template_set,
        } => {
            let mut data = serde_json::json!({ "name": name });
            let optional = [
                ("description", description),
                ("original_topic", topic),
                ("prompt_template_set", template_set),
            ];
            for (key, value) in optional {
                if let Some(v) = value {
                    data[key] = serde_json::Value::String(v);
                }
            }
            print_json(&api.create_project(&data).await?)
        }
        ProjectCmd::Show { project } => print_json(&api.get_project(&project).await?),
        ProjectCmd::Update { project, changes } => {
            let changes: serde_json::Value = serde_json::from_str(&changes)?;
            print_json(&api.update_project(&project, &changes).await?)
        }
        ProjectCmd::Delete { project } => {
            api.delete_project(&project).await?;
            eprintln!("[deleted {project}]");
            Ok(())
        }
        ProjectCmd::Export {
            project,
            no_subtitles,
            format,
        } => {
            let options = ExportOptions {
                include_subtitles: !no_subtitles,
                video_format: format,
            };
            print_json(&api.export_project(&project, &options).await?)
        }
    }
}

async fn watch(
    cfg: &Config,
    project: &str,
    stage: Option<Stage>,
    options: ConnectOptions,
) -> anyhow::Result<()> {
    let mut session = StageSession::from_config(cfg, PrintHooks)?;
    session.open(project, stage, options)?;
    follow_session(&session).await
}

/// Wait until the stream finishes on its own or the user interrupts.
async fn follow_session(session: &StageSession) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if !session.is_active() {
                    break;
                }
            }
        }
    }
    match session.last_error() {
        Some(err) => anyhow::bail!("stream ended with error: {err}"),
        None => Ok(()),
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
