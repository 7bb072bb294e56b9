use clap::{Args, Parser, Subcommand};
use mediajobs::jobs::JobType;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mediajobs")]
#[command(about = "Media job worker and queue tooling", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $MEDIAJOBS_CONFIG or config/mediajobs.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Own the broker and ledger data and serve them to the other commands
    Broker(BrokerArgs),
    /// Poll the job queue and run media jobs
    Worker(WorkerArgs),
    /// Apply the status updater to the notification queue
    Updater,
    /// Create or refresh the job and notification queue pairs
    Provision,
    /// Record an operation and enqueue its job
    Submit(SubmitArgs),
    /// Show one operation
    Status(StatusArgs),
    /// List operations, newest first
    Operations(OperationsArgs),
    /// Inspect the job queue's dead-letter queue
    Dlq(LimitArgs),
    /// Move dead-lettered jobs back onto the job queue
    Redrive(LimitArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug)]
pub struct BrokerArgs {
    /// Listen address (overrides `broker.listen`)
    #[arg(long)]
    pub listen: Option<SocketAddr>,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Health server address (overrides `worker.health_addr`)
    #[arg(long)]
    pub health_addr: Option<SocketAddr>,

    /// Also apply notifications to the operation ledger in this process
    #[arg(long)]
    pub with_updater: bool,
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Job type, e.g. EXTRACT or DOWNLOAD_YOUTUBE
    #[arg(long = "type")]
    pub job_type: JobType,

    /// Job params as a JSON object
    #[arg(long)]
    pub params: String,

    #[arg(long, default_value = "cli")]
    pub user: String,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    pub operation_id: String,
}

#[derive(Args, Debug)]
pub struct OperationsArgs {
    /// Only operations of this user
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct LimitArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from([
            "mediajobs",
            "--config",
            "custom.toml",
            "submit",
            "--type",
            "EXTRACT",
            "--params",
            "{}",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        let Commands::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(args.job_type, JobType::Extract);
        assert_eq!(args.user, "cli");
    }

    #[test]
    fn test_unknown_job_type_rejected() {
        let result = Cli::try_parse_from(["mediajobs", "submit", "--type", "RENDER", "--params", "{}"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_worker_flags() {
        let cli = Cli::try_parse_from([
            "mediajobs",
            "worker",
            "--health-addr",
            "127.0.0.1:9200",
            "--with-updater",
        ])
        .unwrap();

        let Commands::Worker(args) = cli.command else {
            panic!("expected worker");
        };
        assert_eq!(args.health_addr, Some("127.0.0.1:9200".parse().unwrap()));
        assert!(args.with_updater);
    }

    #[test]
    fn test_broker_listen_override() {
        let cli = Cli::try_parse_from(["mediajobs", "broker", "--listen", "0.0.0.0:7500"]).unwrap();

        let Commands::Broker(args) = cli.command else {
            panic!("expected broker");
        };
        assert_eq!(args.listen, Some("0.0.0.0:7500".parse().unwrap()));
    }
}
