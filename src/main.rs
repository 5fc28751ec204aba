use std::process;
use taskweave::TaskError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TASKWEAVE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = taskweave::cli::run().await {
        if let Some(err) = e.downcast_ref::<clap::Error>() {
            err.exit();
        }

        let task_error = e.downcast_ref::<TaskError>();
        if task_error.is_some_and(TaskError::is_cancellation) {
            process::exit(130);
        }

        eprintln!("{}", e);
        process::exit(task_error.and_then(TaskError::exit_code).unwrap_or(1));
    }
}
