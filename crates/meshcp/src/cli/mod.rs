mod catalog;
mod run;

pub use catalog::CatalogCommand;
pub use run::RunCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// meshcp - mesh control plane
#[derive(Parser)]
#[command(name = "meshcp")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a control-plane instance.
    Run(RunCommand),

    /// Print the current instance catalog as JSON.
    Catalog(CatalogCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Catalog(cmd) => cmd.execute().await,
        }
    }
}

/// Load a config file, failing with a readable message if it is missing.
fn load_config(path: &str) -> Result<meshcp_core::MeshConfig> {
    if !std::path::Path::new(path).exists() {
        anyhow::bail!("Configuration file not found: {}", path);
    }
    Ok(meshcp_core::MeshConfig::from_file(path)?)
}
