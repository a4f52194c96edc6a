use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use studiochat_lib::models::SystemInstruction;
use studiochat_lib::{commands, AppConfig, AppState, OfflineCompletionService};

#[derive(Parser)]
#[command(name = "studiochat")]
#[command(about = "Inspect, back up and restore a studiochat workspace", long_about = None)]
struct Cli {
    /// Workspace directory (defaults to STUDIOCHAT_DATA_DIR or the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions, newest first
    List,
    /// Write a backup bundle
    Export {
        /// Target directory
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Replace the workspace with a backup bundle
    Import { file: PathBuf },
    /// Manage system instructions
    Instructions {
        #[command(subcommand)]
        action: InstructionAction,
    },
}

#[derive(Subcommand)]
enum InstructionAction {
    List,
    Add {
        title: String,
        /// Instruction text
        content: String,
    },
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    let state = AppState::open(config, Arc::new(OfflineCompletionService)).await?;

    let outcome = run(&state, cli.command).await;
    state.shutdown().await;
    outcome
}

async fn run(state: &AppState, command: Commands) -> Result<()> {
    match command {
        Commands::List => {
            let active = commands::active_session_id(state).await;
            for session in commands::list_sessions(state).await {
                let marker = if Some(session.id) == active { "*" } else { " " };
                println!(
                    "{} {}  {:<40} {:>3} messages  {}",
                    marker,
                    session.id,
                    session.title,
                    session.messages.len(),
                    session.config.model.display_name()
                );
            }
        }
        Commands::Export { out } => {
            let path = commands::export_workspace_to(state, &out).await?;
            println!("{}", path.display());
        }
        Commands::Import { file } => {
            commands::import_workspace_from(state, &file).await?;
            let sessions = commands::list_sessions(state).await;
            println!("Restored {} sessions", sessions.len());
        }
        Commands::Instructions { action } => match action {
            InstructionAction::List => {
                for instruction in commands::list_instructions(state).await {
                    println!("{}  {}", instruction.id, instruction.title);
                }
            }
            InstructionAction::Add { title, content } => {
                let created = commands::create_instruction(state, false).await?;
                let id = created.id;
                commands::update_instruction(
                    state,
                    SystemInstruction {
                        title,
                        content,
                        ..created
                    },
                )
                .await;
                println!("{}", id);
            }
            InstructionAction::Remove { id } => commands::delete_instruction(state, &id).await?,
        },
    }
    Ok(())
}
