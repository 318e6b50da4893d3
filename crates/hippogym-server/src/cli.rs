//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hippogym", about = "Real-time human-in-the-loop experiment server")]
pub struct Cli {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(long, short = 'c', global = true, env = "HIPPOGYM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the WebSocket server (default when no subcommand given)
    Serve(ServeOpts),
    /// Print the group a user id is assigned to
    Bucket(BucketOpts),
    /// Validate the configuration and exit
    CheckConfig,
}

#[derive(clap::Args, Default)]
pub struct ServeOpts {
    /// Listen host, overrides `[server].host`
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port, overrides `[server].port`
    #[arg(long)]
    pub port: Option<u16>,

    /// Recording directory, overrides `[recording].dir`
    #[arg(long)]
    pub record_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct BucketOpts {
    pub user_id: String,

    /// Number of groups
    #[arg(long, short = 'n', default_value_t = 2)]
    pub groups: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_parses() {
        let cli = Cli::try_parse_from(["hippogym"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn serve_overrides_parse() {
        let cli = Cli::try_parse_from(["hippogym", "serve", "--port", "9000", "--host", "0.0.0.0"])
            .unwrap();
        let Some(Command::Serve(opts)) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(opts.port, Some(9000));
        assert_eq!(opts.host.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["hippogym", "check-config", "--config", "x.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Some(Command::CheckConfig)));
    }

    #[test]
    fn bucket_defaults_to_two_groups() {
        let cli = Cli::try_parse_from(["hippogym", "bucket", "alice"]).unwrap();
        let Some(Command::Bucket(opts)) = cli.command else {
            panic!("expected bucket");
        };
        assert_eq!(opts.groups, 2);
        assert_eq!(opts.user_id, "alice");
    }
}
