//! Argument parsing and command dispatch for the `replica` binary.

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use replica_config::{LogStyle, ReplicaConfig};
use replica_core::OwnerRequest;
use replica_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, init_logging};
use uuid::Uuid;

use crate::commands::{copy, inspect};
use crate::context::{AppContext, CliError, CliResult};

/// Parses CLI arguments, executes the requested command, and returns the
/// process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let command_name = command_label(&cli.command);

    let config = match ReplicaConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            let err = CliError::from(err);
            eprintln!("error: {}", err.display_message());
            return err.exit_code();
        }
    };
    let logging = LoggingConfig {
        level: &config.logging.level,
        format: log_format(config.logging.style),
        ..LoggingConfig::default()
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("warning: logging disabled: {err}");
    }
    let _context = GlobalContextGuard::new(command_name);

    let result = match AppContext::connect(config).await {
        Ok(ctx) => dispatch(cli, &ctx).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli, ctx: &AppContext) -> CliResult<()> {
    match cli.command {
        Command::Start(args) => copy::handle_start(ctx, args, cli.output).await,
        Command::Retry(args) => copy::handle_retry(ctx, args, cli.output).await,
        Command::Worker(args) => copy::handle_worker(ctx, args).await,
        Command::Status(args) => inspect::handle_status(ctx, args, cli.output).await,
        Command::History(args) => inspect::handle_history(ctx, args, cli.output).await,
        Command::Sent(args) => inspect::handle_sent(ctx, args, cli.output).await,
        Command::Received(args) => inspect::handle_received(ctx, args, cli.output).await,
    }
}

const fn log_format(style: Option<LogStyle>) -> LogFormat {
    match style {
        Some(LogStyle::Json) => LogFormat::Json,
        Some(LogStyle::Pretty) => LogFormat::Pretty,
        None => LogFormat::infer(),
    }
}

const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Start(_) => "start",
        Command::Retry(_) => "retry",
        Command::Worker(_) => "worker",
        Command::Status(_) => "status",
        Command::History(_) => "history",
        Command::Sent(_) => "sent",
        Command::Received(_) => "received",
    }
}

#[derive(Parser)]
#[command(name = "replica", about = "Replicate training pipelines between owners")]
pub(crate) struct Cli {
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    pub(crate) output: OutputFormat,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Plan and register a copy of a training pipeline.
    Start(StartArgs),
    /// Resume a failed copy at its first incomplete entity.
    Retry(RetryArgs),
    /// Drain pending and stale copies with a worker pool.
    Worker(WorkerArgs),
    /// Show an operation and its entity mappings.
    Status(OperationArgs),
    /// Show the audit trail of an operation.
    History(OperationArgs),
    /// List copies started by a user.
    Sent(SentArgs),
    /// List copies received by a user or group.
    Received(OwnerArgs),
}

#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("owner").required(true).args(["to_user", "to_group"])))]
pub(crate) struct StartArgs {
    /// Source training anchoring the pipeline.
    #[arg(long)]
    pub(crate) training: i64,
    /// Username receiving the copy.
    #[arg(long)]
    pub(crate) to_user: Option<String>,
    /// Group receiving the copy.
    #[arg(long)]
    pub(crate) to_group: Option<i64>,
    /// User requesting the copy.
    #[arg(long, env = "REPLICA_ACTOR")]
    pub(crate) initiated_by: Uuid,
    /// Note stored on the operation.
    #[arg(long)]
    pub(crate) comment: Option<String>,
    /// Run the copy in this process instead of leaving it for a worker.
    #[arg(long)]
    pub(crate) run: bool,
}

impl StartArgs {
    pub(crate) fn owner(&self) -> CliResult<OwnerRequest> {
        owner_request(self.to_user.as_deref(), self.to_group)
    }
}

#[derive(Args, Debug, Clone)]
pub(crate) struct RetryArgs {
    /// Operation to resume.
    pub(crate) operation_id: Uuid,
    /// User requesting the retry.
    #[arg(long, env = "REPLICA_ACTOR")]
    pub(crate) actor: Uuid,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct WorkerArgs {
    /// Maximum number of operations to queue.
    #[arg(long, default_value_t = 100)]
    pub(crate) limit: i64,
    /// Worker count; defaults to `REPLICA_WORKERS`.
    #[arg(long)]
    pub(crate) workers: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct OperationArgs {
    /// Operation identifier.
    pub(crate) operation_id: Uuid,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct SentArgs {
    /// User who started the copies.
    #[arg(long, env = "REPLICA_ACTOR")]
    pub(crate) user: Uuid,
}

#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("owner").required(true).args(["user", "group"])))]
pub(crate) struct OwnerArgs {
    /// Receiving username.
    #[arg(long)]
    pub(crate) user: Option<String>,
    /// Receiving group.
    #[arg(long)]
    pub(crate) group: Option<i64>,
}

impl OwnerArgs {
    pub(crate) fn owner(&self) -> CliResult<OwnerRequest> {
        owner_request(self.user.as_deref(), self.group)
    }
}

fn owner_request(user: Option<&str>, group: Option<i64>) -> CliResult<OwnerRequest> {
    match (user, group) {
        (Some(username), None) => {
            let username = username.trim();
            if username.is_empty() {
                return Err(CliError::validation("username must not be empty"));
            }
            Ok(OwnerRequest::Username(username.to_string()))
        }
        (None, Some(group)) => Ok(OwnerRequest::Group(group)),
        _ => Err(CliError::validation(
            "exactly one of a user or a group must be given",
        )),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}
