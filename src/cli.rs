use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use ledger::Environment;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mqdeploy")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Deploy MQSC configuration to queue managers, only when it changed", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Deploy settings file
    #[arg(long, global = true, env = "MQDEPLOY_CONFIG", default_value = "mqdeploy.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy an environment's configuration if it changed
    Deploy(DeployArgs),

    /// Show file digests, the fingerprint and lint warnings
    Hash(HashArgs),

    /// List recorded deployments
    History(HistoryArgs),

    /// Compare the configuration tree with the last deployment
    Status(EnvArgs),

    /// Inspect or clear the per-environment deployment lease
    #[command(subcommand)]
    Lease(LeaseCommand),

    /// Apply retention to snapshots, execution units and audit records
    Prune(PruneArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct EnvArgs {
    /// Target environment (dev, test, prod)
    #[arg(short, long, default_value = "dev")]
    pub env: Environment,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Target environment (dev, test, prod)
    #[arg(short, long, default_value = "dev")]
    pub env: Environment,

    /// Run the guard and render the unit without submitting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Deploy even if this configuration is already live
    #[arg(long)]
    pub force: bool,

    /// Skip the production confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Who triggered the deployment
    #[arg(long, env = "MQDEPLOY_ACTOR")]
    pub actor: Option<String>,

    /// Source revision being deployed (defaults to `git rev-parse HEAD`)
    #[arg(long, env = "GITHUB_SHA")]
    pub revision: Option<String>,

    /// Run number used in the attempt id (defaults to the process id)
    #[arg(long, env = "GITHUB_RUN_NUMBER")]
    pub run_number: Option<u64>,
}

#[derive(Args, Debug)]
pub struct HashArgs {
    /// Target environment (dev, test, prod)
    #[arg(short, long, default_value = "dev")]
    pub env: Environment,

    /// Print only the fingerprint
    #[arg(long)]
    pub short: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Target environment (dev, test, prod)
    #[arg(short, long, default_value = "dev")]
    pub env: Environment,

    /// Maximum number of records to show
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum LeaseCommand {
    /// Show the current lease
    Show(EnvArgs),

    /// Remove the lease regardless of owner
    Release(EnvArgs),
}

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Target environment (dev, test, prod)
    #[arg(short, long, default_value = "dev")]
    pub env: Environment,

    /// Show what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_defaults() {
        let cli = Cli::try_parse_from(["mqdeploy", "deploy"]).unwrap();
        match cli.command {
            Command::Deploy(args) => {
                assert_eq!(args.env, Environment::Dev);
                assert!(!args.dry_run && !args.force && !args.yes);
            }
            _ => panic!("Expected deploy"),
        }
    }

    #[test]
    fn test_deploy_flags() {
        let cli = Cli::try_parse_from([
            "mqdeploy", "-vv", "deploy", "--env", "prod", "--dry-run", "--force", "--yes",
            "--run-number", "42",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Deploy(args) => {
                assert_eq!(args.env, Environment::Prod);
                assert!(args.dry_run && args.force && args.yes);
                assert_eq!(args.run_number, Some(42));
            }
            _ => panic!("Expected deploy"),
        }
    }

    #[test]
    fn test_unknown_environment_rejected() {
        assert!(Cli::try_parse_from(["mqdeploy", "deploy", "--env", "staging"]).is_err());
    }

    #[test]
    fn test_lease_release() {
        let cli = Cli::try_parse_from(["mqdeploy", "lease", "release", "-e", "test"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Lease(LeaseCommand::Release(EnvArgs { env: Environment::Test }))
        ));
    }
}
