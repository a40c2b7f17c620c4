use anyhow::Context;
use clap::{Parser, Subcommand};
use sshdeck::shell::commands::open_terminal;
use sshdeck::shell::renderer::StdoutRenderer;
use sshdeck::shell::{sentinel, AttachOptions};
use sshdeck::ssh::Role;
use sshdeck::{config, runner, sftp, AppState};
use std::path::PathBuf;
use std::sync::mpsc::{self, TryRecvError};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "sshdeck",
    version,
    about = "Browse, transfer, run commands and Git over a persistent SSH session",
    after_help = "EXAMPLES:\n  List the home directory:   sshdeck ls pi\n  Run a command:             sshdeck exec pi -- df -h\n  Interactive shell:         sshdeck shell pi --cd /srv/app\n  Show Git branches:         sshdeck branches pi /srv/app --remote"
)]
struct Cli {
    #[arg(long, env = config::CONFIG_DIR_ENV, help = "Configuration directory")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run a one-shot command and print its output")]
    Exec {
        #[arg(help = "Profile id or name")]
        profile: String,
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    #[command(about = "List a remote directory")]
    Ls {
        profile: String,
        #[arg(help = "Remote path [default: home directory]")]
        path: Option<String>,
    },

    #[command(about = "Open an interactive shell; input is sent line by line")]
    Shell {
        profile: String,
        #[arg(long, help = "Working directory to change into")]
        cd: Option<String>,
        #[arg(long, help = "Run this command and exit when it finishes")]
        run: Option<String>,
    },

    #[command(about = "List Git branches of a remote repository")]
    Branches {
        profile: String,
        repo: String,
        #[arg(long, help = "List remote-tracking branches")]
        remote: bool,
    },

    #[command(about = "Print the remote shell history")]
    History { profile: String },

    #[command(subcommand, about = "Manage connection profiles")]
    Profiles(ProfileCommands),
}

#[derive(Subcommand, Debug)]
enum ProfileCommands {
    #[command(about = "List saved profiles")]
    List,
    #[command(about = "Import hosts from an OpenSSH config file")]
    Import {
        #[arg(help = "Config file [default: ~/.ssh/config]")]
        path: Option<PathBuf>,
    },
    #[command(about = "Print profiles in OpenSSH config format")]
    Export,
    #[command(about = "Delete a profile")]
    Remove { profile: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sshdeck=info,warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => config::get_config_dir()?,
    };
    let state = sshdeck::init_state(config_dir)?;

    let exit_status = run(&state, cli.command).await;
    if let Err(e) = sshdeck::ssh::commands::ssh_disconnect_all(&state).await {
        tracing::warn!("Disconnect failed: {}", e);
    }

    match exit_status? {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

async fn run(state: &AppState, command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Exec { profile, command } => {
            state.connect_profile(&profile, Role::Files).await?;
            let output = runner::commands::execute(state, command.join(" ")).await?;
            print!("{}", output.stdout);
            Ok(output.exit_status)
        }
        Commands::Ls { profile, path } => {
            state.connect_profile(&profile, Role::Files).await?;
            let listing = sftp::commands::sftp_list(state, path.unwrap_or_default()).await?;
            println!("{}:", listing.current_path);
            for entry in listing.entries {
                let modified = chrono::DateTime::from_timestamp(entry.modified, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let suffix = if entry.is_dir { "/" } else { "" };
                println!(
                    "{} {:>10} {} {}{}",
                    entry.permissions, entry.size, modified, entry.filename, suffix
                );
            }
            Ok(0)
        }
        Commands::Shell { profile, cd, run } => {
            state.connect_profile(&profile, Role::Shell).await?;
            let options = AttachOptions {
                working_dir: cd,
                deferred_command: run.map(|cmd| sentinel::one_shot(&cmd)),
            };
            interactive(state, options).await?;
            Ok(0)
        }
        Commands::Branches { profile, repo, remote } => {
            state.connect_profile(&profile, Role::Files).await?;
            if remote {
                for branch in runner::commands::git_remote_branches(state, repo).await? {
                    println!("  {}", branch);
                }
            } else {
                let branches = runner::commands::git_branches(state, repo).await?;
                for name in &branches.names {
                    let marker = if branches.current.as_ref() == Some(name) { '*' } else { ' ' };
                    println!("{} {}", marker, name);
                }
            }
            Ok(0)
        }
        Commands::History { profile } => {
            state.connect_profile(&profile, Role::Files).await?;
            let history = runner::commands::fetch_history(state).await?;
            for (i, command) in history.commands().iter().enumerate() {
                println!("{:>5}  {}", i + 1, command);
            }
            Ok(0)
        }
        Commands::Profiles(cmd) => profiles(state, cmd).await,
    }
}

async fn profiles(state: &AppState, command: ProfileCommands) -> anyhow::Result<i32> {
    match command {
        ProfileCommands::List => {
            for profile in config::commands::list_profiles(state).await? {
                println!("{:<36}  {:<24}  {}", profile.id, profile.display_name(), profile.identity());
            }
        }
        ProfileCommands::Import { path } => {
            let path = match path {
                Some(path) => path,
                None => dirs::home_dir()
                    .context("Could not find home directory")?
                    .join(".ssh")
                    .join("config"),
            };
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let imported = config::commands::import_ssh_config(state, content).await?;
            println!("Imported {} profiles", imported.len());
        }
        ProfileCommands::Export => {
            print!("{}", config::commands::export_ssh_config(state).await?);
        }
        ProfileCommands::Remove { profile } => {
            let found = config::commands::get_profile(state, profile).await?;
            config::commands::delete_profile(state, found.id.clone()).await?;
            println!("Removed {}", found.display_name());
        }
    }
    Ok(0)
}

/// Drive the shell from stdin until the channel or the one-shot command closes
async fn interactive(state: &AppState, options: AttachOptions) -> anyhow::Result<()> {
    let mut driver = open_terminal(state, StdoutRenderer::new(), options).await?;

    let (tx, rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let reason = tokio::task::spawn_blocking(move || loop {
        loop {
            match rx.try_recv() {
                Ok(line) => driver.insert_text(&format!("{}\n", line)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    driver.close();
                    break;
                }
            }
        }
        if let Some(reason) = driver.poll() {
            return reason;
        }
        std::thread::sleep(Duration::from_millis(15));
    })
    .await?;

    tracing::info!("Shell closed: {:?}", reason);
    Ok(())
}
