use anyhow::Result;
use clap::Parser;

use meshcp::connect_store;
use meshcp_runtime::catalog::{Catalog, CatalogDocument, ConfigCatalog};

use super::load_config;

/// Print the current instance catalog as JSON.
#[derive(Parser)]
pub struct CatalogCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "meshcp.toml")]
    pub config: String,
}

impl CatalogCommand {
    /// Execute the catalog command.
    pub async fn execute(self) -> Result<()> {
        dotenvy::dotenv().ok();
        let config = load_config(&self.config)?;

        let (store, pg_store) = connect_store(&config.store).await?;
        let catalog = ConfigCatalog::new(store, config.store.resource_name.clone());
        let instances = catalog.instances().await?;

        println!(
            "{}",
            serde_json::to_string_pretty(&CatalogDocument::new(instances))?
        );

        if let Some(pg_store) = pg_store {
            pg_store.close().await;
        }
        Ok(())
    }
}
