//! The hidden `worker` subcommand: the in-process worker entry point.
//!
//! The controller spawns `ocrbatch worker` per task. The job config arrives
//! on stdin, NDJSON events leave on stdout. All of the work is synchronous,
//! so it runs on a blocking thread.

use crate::worker;

pub async fn cmd_worker() -> anyhow::Result<()> {
    tokio::task::spawn_blocking(worker::run_from_stdin).await?
}
