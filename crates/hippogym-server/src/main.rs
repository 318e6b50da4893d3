//! hippogym: WebSocket server running one isolated trial per participant.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use hippogym_core::bucket;
use hippogym_server::config::ServerConfig;
use hippogym_server::experiments::BuiltinExperiments;

mod cli;

fn init_tracing() {
    let filter = std::env::var("HIPPOGYM_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let command = args
        .command
        .unwrap_or_else(|| cli::Command::Serve(cli::ServeOpts::default()));

    match command {
        cli::Command::Serve(opts) => {
            init_tracing();
            let mut config = ServerConfig::load(args.config.as_deref())
                .context("failed to load configuration")?;
            if let Some(host) = opts.host {
                config.server.host = host;
            }
            if let Some(port) = opts.port {
                config.server.port = port;
            }
            if let Some(dir) = opts.record_dir {
                config.recording.dir = Some(dir);
            }
            hippogym_server::server::run(config, Arc::new(BuiltinExperiments)).await?;
        }
        cli::Command::Bucket(opts) => {
            let group = bucket(&opts.user_id, opts.groups)?;
            println!("{group}");
        }
        cli::Command::CheckConfig => {
            let config = ServerConfig::load(args.config.as_deref())
                .context("failed to load configuration")?;
            let trial_config = config.check(&BuiltinExperiments)?;
            let addr = config.addr()?;
            println!(
                "ok: {} arm(s), listening on {addr}, recording {}",
                trial_config.arm_count(),
                config
                    .recording
                    .dir
                    .as_ref()
                    .map_or_else(|| "disabled".to_string(), |d| d.display().to_string())
            );
        }
    }

    Ok(())
}
