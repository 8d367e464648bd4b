//! Read-only commands over operations and their history.

use crate::cli::{OperationArgs, OutputFormat, OwnerArgs, SentArgs};
use crate::context::{AppContext, CliResult};
use crate::output::{render_history, render_operations, render_report};

pub(crate) async fn handle_status(
    ctx: &AppContext,
    args: OperationArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let report = ctx.orchestrator.status(args.operation_id).await?;
    render_report(&report, format)
}

pub(crate) async fn handle_history(
    ctx: &AppContext,
    args: OperationArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let history = ctx.orchestrator.history(args.operation_id).await?;
    render_history(&history, format)
}

pub(crate) async fn handle_sent(
    ctx: &AppContext,
    args: SentArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let operations = ctx.orchestrator.list_initiated_by(args.user).await?;
    render_operations(&operations, format)
}

pub(crate) async fn handle_received(
    ctx: &AppContext,
    args: OwnerArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let owner = args.owner()?;
    let operations = ctx.orchestrator.list_received_by(&owner).await?;
    render_operations(&operations, format)
}
