//! Precondition checks

use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::command::check_command;
use crate::runner::task::Task;
use crate::ui::Logger;
use colored::Color;
use tokio_util::sync::CancellationToken;

/// Run a task's preconditions in order
///
/// The first failing predicate logs its message and yields
/// `PreconditionNotMet`. Cancellation is passed through without logging.
pub async fn are_preconditions_met(
    ctx: &CancellationToken,
    task: &Task,
    logger: &Logger,
) -> ExecutionResult<bool> {
    for precondition in &task.preconditions {
        match check_command(ctx, &precondition.sh, &task.dir, &task.env).await {
            Ok(true) => {}
            Ok(false) => {
                logger.errf(Color::Magenta, &format!("task: {}\n", precondition.msg));
                return Err(ExecutionError::PreconditionNotMet);
            }
            Err(ExecutionError::Cancelled) => return Err(ExecutionError::Cancelled),
            Err(e) => {
                logger.errf(Color::Magenta, &format!("task: {}\n", precondition.msg));
                tracing::debug!(task = %task.name(), error = %e, "precondition could not run");
                return Err(ExecutionError::PreconditionNotMet);
            }
        }
    }

    Ok(true)
}
