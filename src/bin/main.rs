use std::path::PathBuf;
use std::process;

use buildlink::config::{self, ClientSettings};
use buildlink::{BuildServerClient, PendingRequest, SessionEvent};
use clap::{Parser, Subcommand};

/// Command-line client for a remote build server
#[derive(Parser)]
#[command(name = "buildlink")]
#[command(version)]
#[command(about = "Send build requests to a remote build server")]
struct Cli {
    /// Build server host (overrides the config file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Build server port (overrides the config file)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Config file to use instead of the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for the request to finish
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the given modules of a project
    Make {
        /// Project identifier
        project: String,
        /// Modules to build (all when omitted)
        modules: Vec<String>,
    },
    /// Rebuild the given modules of a project from scratch
    Rebuild {
        /// Project identifier
        project: String,
        /// Modules to rebuild (all when omitted)
        modules: Vec<String>,
    },
    /// Ask the build server to shut down
    Shutdown {
        /// Do not wait for running builds to finish
        #[arg(long)]
        forced: bool,
    },
}

fn load_settings(cli: &Cli) -> ClientSettings {
    let loaded = match &cli.config {
        Some(path) => config::load_config_file(path).map(Some),
        None => config::load_user_config(),
    };

    let mut settings = match loaded {
        Ok(settings) => settings.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Some(host) = &cli.host {
        settings.host = host.clone();
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(timeout) = cli.timeout {
        settings.request_timeout_secs = timeout;
    }
    settings
}

/// Print every response as a JSON line until the session resolves.
///
/// Returns false if the session was terminated or timed out.
async fn print_responses(mut pending: PendingRequest, settings: &ClientSettings) -> bool {
    let deadline = tokio::time::Instant::now() + settings.request_timeout();

    loop {
        match tokio::time::timeout_at(deadline, pending.next_event()).await {
            Ok(Some(SessionEvent::Response(response))) => {
                println!("{}", response.payload());
            }
            Ok(Some(SessionEvent::Terminated(reason))) => {
                eprintln!("Error: request terminated: {}", reason);
                return false;
            }
            Ok(None) => return true,
            Err(_) => {
                eprintln!(
                    "Error: no completion from build server within {:?}",
                    settings.request_timeout()
                );
                return false;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = load_settings(&cli);

    let client = match BuildServerClient::with_settings(settings.clone()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = client.connect_configured().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let pending = match cli.command {
        Commands::Make { project, modules } => client.send_make(project, modules).await,
        Commands::Rebuild { project, modules } => client.send_rebuild(project, modules).await,
        Commands::Shutdown { forced } => client.send_shutdown_request(forced).await,
    };

    let succeeded = match pending {
        Some(pending) => print_responses(pending, &settings).await,
        None => {
            eprintln!("Error: connection to build server was lost before sending");
            false
        }
    };

    if let Err(e) = client.disconnect().await {
        log::warn!(target: "buildlink::client", "Error while disconnecting: {}", e);
    }

    if !succeeded {
        process::exit(1);
    }
}
