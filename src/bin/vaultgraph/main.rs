//! vaultgraph CLI tool
//!
//! Command-line interface for inspecting and watching a vault of markdown
//! documents with vaultgraph-core.
//!
//! ## Commands
//!
//! - `scan <path>`: One-shot scan, prints the resulting graph as JSON
//! - `watch <path>`: Continuous watching, prints the event stream
//! - `root [path]`: Show or set the remembered vault root

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::mpsc::channel;
use std::time::Duration;
use vaultgraph_core::config::{TomlConfigProvider, VaultConfigProvider, VAULT_DIR};
use vaultgraph_core::event::Event;
use vaultgraph_core::sync::{Publisher, SyncOrchestrator};
use vaultgraph_core::watch::WatchService;

#[derive(Parser)]
#[command(name = "vaultgraph")]
#[command(author, version, about = "A filesystem-synchronized markdown document graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a vault once and print the resulting graph as JSON
    Scan {
        /// Path to the vault root
        path: PathBuf,

        /// Pretty-print the JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Watch a vault for changes and print the event stream
    Watch {
        /// Path to the vault root
        path: PathBuf,

        /// Print full event payloads instead of one-line summaries
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show the remembered vault root, or remember a new one
    Root {
        /// New root to remember; omit to print the current one
        path: Option<PathBuf>,
    },
}

fn config_provider() -> TomlConfigProvider {
    let base = dirs_config_base();
    TomlConfigProvider::new(base.join("vaultgraph").join("config.toml"))
}

fn dirs_config_base() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { path, pretty } => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;

            let files = runtime.block_on(async {
                let mut files = Vec::new();
                for entry in walkdir::WalkDir::new(&path)
                    .max_depth(vaultgraph_core::watch::MAX_SCAN_DEPTH)
                    .into_iter()
                    .filter_map(Result::ok)
                {
                    if !entry.file_type().is_file()
                        || !vaultgraph_core::paths::is_document_file(entry.path())
                        || vaultgraph_core::paths::has_ignored_ancestor(entry.path(), &path)
                    {
                        continue;
                    }
                    // One unreadable file drops out of the scan; it does not
                    // abort the siblings.
                    let content = match tokio::fs::read_to_string(entry.path()).await {
                        Ok(content) => content,
                        Err(e) => {
                            tracing::warn!("Skipping unreadable {:?}: {e}", entry.path());
                            continue;
                        }
                    };
                    files.push(vaultgraph_core::event::FileRecord::from_content(
                        entry.into_path(),
                        &path,
                        content,
                    ));
                }
                files
            });

            let mut orchestrator = SyncOrchestrator::new(path, Publisher::new());
            orchestrator.apply_bulk(&files);

            let json = if pretty {
                serde_json::to_string_pretty(orchestrator.graph())?
            } else {
                serde_json::to_string(orchestrator.graph())?
            };
            println!("{json}");
            Ok(())
        }

        Commands::Watch { path, verbose } => {
            let service = WatchService::new()?;
            let mut subscription = service.subscribe();

            // Bridge the async subscription onto a plain thread so the event
            // printer outlives any single runtime context.
            let (tx, rx) = channel::<Event>();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    if verbose {
                        match serde_json::to_string(&event) {
                            Ok(json) => println!("{json}"),
                            Err(_) => println!("{event}"),
                        }
                    } else {
                        println!("{event}");
                    }
                }
            });
            std::thread::spawn(move || {
                while let Ok(event) = subscription.blocking_recv() {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            });

            service.start_watching(&path)?;

            if let Err(e) = config_provider().set_root(&path) {
                tracing::warn!("Could not remember vault root: {e}");
            }

            println!(
                "Watching {} for changes. Press Ctrl-C to stop.",
                path.display()
            );

            let running = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
            let r = running.clone();
            ctrlc::set_handler(move || {
                println!("\nShutting down...");
                r.store(false, std::sync::atomic::Ordering::SeqCst);
            })?;

            while running.load(std::sync::atomic::Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
            }

            service.stop_watching(&path)?;
            drop(service);
            drop(printer);

            println!("Shutdown complete");
            Ok(())
        }

        Commands::Root { path } => {
            let provider = config_provider();
            match path {
                Some(path) => {
                    let path = path.canonicalize()?;
                    provider.set_root(&path)?;
                    println!("Vault root set to {}", path.display());
                }
                None => match provider.get_root()? {
                    Some(root) => println!("{}", root.display()),
                    None => println!("No vault root remembered (metadata dir: {VAULT_DIR})"),
                },
            }
            Ok(())
        }
    }
}
