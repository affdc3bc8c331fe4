use anyhow::Result;
use clap::Parser;
use console::style;

use meshcp::{init_tracing, MeshCp};

use super::load_config;

/// Run a control-plane instance.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "meshcp.toml")]
    pub config: String,

    /// Inter-CP port to listen on (overrides config).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Instance id (overrides config).
    #[arg(long)]
    pub instance_id: Option<String>,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self) -> Result<()> {
        dotenvy::dotenv().ok();

        let mut config = load_config(&self.config)?;
        if let Some(port) = self.port {
            config.intercp.server.port = port;
        }
        if let Some(id) = self.instance_id {
            config.instance.id = Some(id);
        }

        init_tracing(&config.observability);

        let mesh = MeshCp::builder().config(config).build()?;

        println!();
        println!(
            "  {} v{}",
            style("meshcp").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        println!(
            "  Instance {} listening on port {}",
            style(&mesh.instance().id).cyan(),
            mesh.config().intercp.server.port
        );
        println!();

        mesh.run().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_defaults() {
        let cmd = RunCommand::try_parse_from(["run"]).unwrap();
        assert_eq!(cmd.config, "meshcp.toml");
        assert!(cmd.port.is_none());
        assert!(cmd.instance_id.is_none());
    }

    #[test]
    fn test_run_command_with_overrides() {
        let cmd = RunCommand::try_parse_from([
            "run",
            "--config",
            "custom.toml",
            "--port",
            "7000",
            "--instance-id",
            "cp-1",
        ])
        .unwrap();
        assert_eq!(cmd.config, "custom.toml");
        assert_eq!(cmd.port, Some(7000));
        assert_eq!(cmd.instance_id.as_deref(), Some("cp-1"));
    }
}
