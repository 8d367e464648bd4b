//! Commands that create or advance copy operations.

use std::sync::Arc;

use replica_engine::{CopyOperationHandle, CopyWorkerPool, StartCopyRequest};
use tracing::{debug, info, warn};

use crate::cli::{OutputFormat, RetryArgs, StartArgs, WorkerArgs};
use crate::context::{AppContext, CliError, CliResult};
use crate::output::render_handle;

pub(crate) async fn handle_start(
    ctx: &AppContext,
    args: StartArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let target = args.owner()?;
    let mut handle = ctx
        .orchestrator
        .start_copy(StartCopyRequest {
            source_training_id: args.training,
            target,
            initiated_by: args.initiated_by,
            comment: args.comment,
        })
        .await?;
    if args.run {
        let status = ctx.orchestrator.run(handle.operation_id).await?;
        handle = CopyOperationHandle {
            operation_id: handle.operation_id,
            status,
        };
    }
    render_handle(&handle, format)
}

pub(crate) async fn handle_retry(
    ctx: &AppContext,
    args: RetryArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let handle = ctx
        .orchestrator
        .retry(args.operation_id, args.actor)
        .await?;
    render_handle(&handle, format)
}

pub(crate) async fn handle_worker(ctx: &AppContext, args: WorkerArgs) -> CliResult<()> {
    if args.limit < 1 {
        return Err(CliError::validation("--limit must be at least 1"));
    }
    let workers = args.workers.unwrap_or(ctx.config.engine.workers);
    if workers == 0 {
        return Err(CliError::validation("--workers must be at least 1"));
    }
    let pool = CopyWorkerPool::spawn(
        Arc::clone(&ctx.orchestrator),
        workers,
        ctx.config.engine.queue_depth,
    );
    let queued = pool.enqueue_claimable(args.limit).await;
    pool.shutdown().await;
    let queued = queued?;

    let snapshot = ctx.orchestrator.metrics().snapshot();
    info!(
        queued,
        completed = snapshot.operations_completed,
        failed = snapshot.operations_failed,
        "worker drain finished"
    );
    match ctx.orchestrator.metrics().render() {
        Ok(exposition) => debug!(metrics = %exposition, "copy metrics"),
        Err(err) => warn!(error = %err, "failed to render copy metrics"),
    }
    println!(
        "queued: {queued}\ncompleted: {}\nfailed: {}",
        snapshot.operations_completed, snapshot.operations_failed
    );
    Ok(())
}
