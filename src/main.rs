//! chainvm CLI entry point.
//!
//! Loads a runtime from disk and queries it through the Runtime API.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chainvm_api::RuntimeApi;
use chainvm_common::{Backend, ConfigFile};
use chainvm_core::{Context, Instance, RuntimeCode};
use chainvm_host::{InMemoryStorage, host_functions};

#[derive(Parser)]
#[command(
    name = "chainvm",
    version,
    about = "Run blockchain runtimes on a WebAssembly host"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true, env = "CHAINVM_CONFIG")]
    config: Option<PathBuf>,

    /// Runtime WebAssembly blob (overrides `node.runtime_path`)
    #[arg(long, global = true, env = "CHAINVM_RUNTIME")]
    runtime: Option<PathBuf>,

    /// Engine backend: wasmtime or wasmi (overrides `runtime.engine.backend`)
    #[arg(long, global = true)]
    backend: Option<Backend>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the runtime version
    Version {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the size of the runtime metadata
    Metadata {
        /// Write the raw metadata to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the host functions offered to runtimes
    HostFunctions,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chainvm=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Version { json } => {
            let version = load(&cli)?.version()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&version)?);
                return Ok(());
            }

            println!("spec_name:          {}", version.spec_name);
            println!("impl_name:          {}", version.impl_name);
            println!("authoring_version:  {}", version.authoring_version);
            println!("spec_version:       {}", version.spec_version);
            println!("impl_version:       {}", version.impl_version);
            if let Some(transaction_version) = version.transaction_version {
                println!("transaction_version: {transaction_version}");
            }
            println!("apis:");
            for api in &version.apis {
                println!("  0x{} v{}", hex::encode(api.id), api.version);
            }
        }
        Commands::Metadata { output } => {
            let metadata = load(&cli)?.metadata()?;
            println!("metadata: {} bytes", metadata.len());

            if let Some(path) = output {
                std::fs::write(path, &metadata)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(path = %path.display(), "Metadata written");
            }
        }
        Commands::HostFunctions => {
            let functions = host_functions();
            for function in functions.iter() {
                let marker = if function.is_stub() { " (stub)" } else { "" };
                println!("{}{marker}", function.name);
            }
            println!(
                "{} functions, {} stubs",
                functions.len(),
                functions.stubs().len()
            );
        }
    }

    Ok(())
}

/// Build a Runtime API from the config file and command line overrides.
fn load(cli: &Cli) -> anyhow::Result<RuntimeApi> {
    let file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)?,
        None => ConfigFile::default(),
    };

    let mut config = file.runtime;
    if let Some(backend) = cli.backend {
        config.engine.backend = backend;
    }

    let path = cli
        .runtime
        .clone()
        .or_else(|| file.node.runtime_path.map(PathBuf::from))
        .context("No runtime given. Pass --runtime or set node.runtime_path")?;

    let code = RuntimeCode::from_file(&path)
        .with_context(|| format!("Failed to load runtime from {}", path.display()))?;
    let context = Context::new(config.host.clone()).with_validator(file.node.validator);

    let instance = Instance::from_code(&code, &config, &host_functions(), context)?;
    instance.set_context(InMemoryStorage::new())?;

    info!(
        path = %path.display(),
        backend = %config.engine.backend,
        content_hash = code.content_hash(),
        "Runtime loaded"
    );

    Ok(RuntimeApi::new(instance))
}
