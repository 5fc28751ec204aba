//! Status predicates
//!
//! A failing status command is a cache miss, not an error.

use crate::error::ExecutionResult;
use crate::runner::command::check_command;
use crate::runner::task::Task;
use crate::ui::Logger;
use colored::Color;
use tokio_util::sync::CancellationToken;

pub struct StatusChecker<'a> {
    logger: Option<&'a Logger>,
}

impl<'a> StatusChecker<'a> {
    pub fn new(logger: Option<&'a Logger>) -> Self {
        StatusChecker { logger }
    }

    /// True when every status command exits zero
    ///
    /// Only cancellation and spawn failures are errors.
    pub async fn is_up_to_date(&self, ctx: &CancellationToken, task: &Task) -> ExecutionResult<bool> {
        for status in &task.status {
            let ok = check_command(ctx, status, &task.dir, &task.env).await?;
            if let Some(logger) = self.logger {
                let outcome = if ok { "exited zero" } else { "exited non-zero" };
                logger.verbose_outf(
                    Color::Yellow,
                    &format!("task: status command {} {}\n", status, outcome),
                );
            }
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
