//! SealShare CLI - interactive shell for an encrypted vault with sharing.
//!
//! The shell talks to a directory-backed server, so several shells on one
//! machine pointed at the same `--server-dir` can share files with each other.

mod command;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

use command::{Command, HELP};
use sealshare_common::{Error, FileId, Username};
use sealshare_remote::{LocalServer, RemoteServices};
use sealshare_sharing::{PollerHandle, SharePoller, SharingOrchestrator};
use sealshare_vault::{ClientConfig, VaultClient};

#[derive(Parser)]
#[command(name = "sealshare")]
#[command(about = "SealShare - Encrypted file vault with secure sharing")]
#[command(version)]
struct Cli {
    /// Client configuration file (created with defaults if missing).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the server state and blobs.
    #[arg(short, long)]
    server_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.unwrap_or_else(ClientConfig::default_path);
    let config = load_config(&config_path)?;

    let server_dir = cli.server_dir.unwrap_or_else(default_server_dir);
    let server = LocalServer::open(&server_dir)
        .with_context(|| format!("Failed to open server at {}", server_dir.display()))?;
    pin_trust_anchor(&config, &server)?;

    let remote: Arc<dyn RemoteServices> = Arc::new(server);
    let client =
        Arc::new(VaultClient::from_config(config, remote).context("Failed to create client")?);

    let mut shell = Shell::new(client);
    let result = shell.run().await;
    shell.shutdown().await?;
    result
}

fn default_server_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sealshare")
        .join("server")
}

/// Load the configuration, writing defaults on first run.
fn load_config(path: &Path) -> Result<ClientConfig> {
    if path.exists() {
        return ClientConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }
    let config = ClientConfig::default();
    config
        .save(path)
        .with_context(|| format!("Failed to write config {}", path.display()))?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(config)
}

/// Pin the server's root key if no trust anchor is configured yet.
fn pin_trust_anchor(config: &ClientConfig, server: &LocalServer) -> Result<()> {
    if config.trust_anchor.exists() {
        return Ok(());
    }
    if let Some(parent) = config.trust_anchor.parent() {
        std::fs::create_dir_all(parent).context("Failed to create trust anchor directory")?;
    }
    server
        .trust_anchor()
        .save(&config.trust_anchor)
        .context("Failed to write trust anchor")?;
    warn!(
        path = %config.trust_anchor.display(),
        "No trust anchor configured; pinned the server's root key"
    );
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

struct Shell {
    client: Arc<VaultClient>,
    orchestrator: SharingOrchestrator,
    poller: Arc<SharePoller>,
    poll_handle: Option<PollerHandle>,
}

impl Shell {
    fn new(client: Arc<VaultClient>) -> Self {
        Self {
            orchestrator: SharingOrchestrator::new(client.clone()),
            poller: Arc::new(SharePoller::new(client.clone())),
            client,
            poll_handle: None,
        }
    }

    /// Read commands until `exit`, end of input or a termination signal.
    async fn run(&mut self) -> Result<()> {
        println!("SealShare shell. Type 'help' for commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            print!("sealshare> ");
            std::io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line.context("Failed to read input")?,
                _ = &mut shutdown => {
                    println!();
                    info!("Interrupted, closing open files");
                    return Ok(());
                }
            };
            let Some(line) = line else {
                println!();
                return Ok(());
            };

            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            };
            if command == Command::Exit {
                return Ok(());
            }
            if let Err(e) = self.execute(command).await {
                report(&e);
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Signup(user) => {
                let username = Username::new(user)?;
                let password = prompt_password("Choose password: ")?;
                let confirm = prompt_password("Confirm password: ")?;
                if password != confirm {
                    anyhow::bail!("Passwords do not match");
                }
                self.client
                    .signup(username.clone(), password)
                    .await
                    .context("Signup failed")?;
                self.start_poller();
                println!("Signed up and logged in as {}", username);
            }

            Command::Login(user) => {
                let username = Username::new(user)?;
                let password = prompt_password("Password: ")?;
                self.client
                    .login(username.clone(), password)
                    .await
                    .context("Login failed")?;
                self.start_poller();
                println!("Logged in as {}", username);
            }

            Command::Logout => {
                self.stop_poller().await;
                self.client.logout().await.context("Logout incomplete")?;
                println!("Logged out");
            }

            Command::Add { source, name } => {
                let name = match name {
                    Some(name) => name,
                    None => source
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(str::to_string)
                        .context("Source path has no file name")?,
                };
                let file = self
                    .client
                    .add_file(&source, &name)
                    .await
                    .context("Failed to add file")?;
                println!("Added {}", file);
            }

            Command::Open(arg) => {
                let file = self.file_id(&arg).await?;
                let path = self.client.open(&file).await.context("Failed to open file")?;
                println!("{} is open at {}", file, path.display());
            }

            Command::Close(arg) => {
                let file = self.file_id(&arg).await?;
                self.client.close(&file).await.context("Failed to close file")?;
                println!("Closed {}", file);
            }

            Command::Push(arg) => {
                let file = self.file_id(&arg).await?;
                self.client.push(&file).await.context("Failed to push file")?;
                println!("Pushed {}", file);
            }

            Command::Share { file, recipient } => {
                let file = self.file_id(&file).await?;
                let recipient = Username::new(recipient)?;
                self.orchestrator
                    .share(&file, &recipient)
                    .await
                    .context("Share failed")?;
                println!("Shared {} with {}", file, recipient);
            }

            Command::Unshare { file, recipient } => {
                let file = self.file_id(&file).await?;
                let recipient = Username::new(recipient)?;
                self.orchestrator
                    .unshare(&file, &recipient)
                    .await
                    .context("Unshare failed")?;
                println!("Unshared {} with {}", file, recipient);
            }

            Command::List => {
                let files = self.client.list().await;
                if files.is_empty() {
                    println!("No files in the vault.");
                }
                for status in files {
                    let state = if status.open { "OPEN  " } else { "CLOSED" };
                    println!(
                        "  [{}] {} ({}) {}",
                        state,
                        status.file,
                        status.namespace,
                        status.path.display()
                    );
                }
            }

            Command::Poll => {
                let accepted = self.poller.poll_once().await.context("Poll failed")?;
                if accepted.is_empty() {
                    println!("No pending shares.");
                }
                for file in accepted {
                    println!("Accepted share of {}", file);
                }
            }

            Command::Help => println!("{}", HELP),

            Command::Exit => {}
        }
        Ok(())
    }

    /// `owner/filename`, or a bare filename owned by the current user.
    async fn file_id(&self, arg: &str) -> Result<FileId> {
        let (owner, filename) = match arg.split_once('/') {
            Some((owner, filename)) => (Username::new(owner)?, filename),
            None => {
                let active = self.client.session().current().await?;
                (active.username().clone(), arg)
            }
        };
        Ok(FileId::new(filename, owner)?)
    }

    fn start_poller(&mut self) {
        if self.poll_handle.is_none() {
            let period = self.client.config().poll_interval();
            self.poll_handle = Some(self.poller.clone().spawn(period));
        }
    }

    async fn stop_poller(&mut self) {
        if let Some(handle) = self.poll_handle.take() {
            handle.shutdown().await;
        }
    }

    /// Stop polling and close every open file.
    async fn shutdown(&mut self) -> Result<()> {
        self.stop_poller().await;
        self.client
            .shutdown()
            .await
            .context("Some files could not be closed")
    }
}

fn report(error: &anyhow::Error) {
    match error.downcast_ref::<Error>() {
        Some(e) if e.is_integrity() => {
            println!("INTEGRITY FAILURE: {:#}", error);
            println!("The file may have been tampered with; it was left encrypted.");
        }
        _ => println!("Error: {:#}", error),
    }
}
