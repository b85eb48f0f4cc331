//! Worker process launch and supervision.
//!
//! The scheduler talks to workers only through the [`WorkerLauncher`] and
//! [`WorkerHandle`] traits, so the process mechanism stays swappable and
//! tests can script worker behavior. The production launcher re-invokes the
//! current executable with the hidden `worker` subcommand, hands the job
//! configuration over stdin, and pumps the NDJSON event stream from the
//! worker's stdout into a bounded per-task channel.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::PriorityMode;
use crate::ipc::{JobConfig, WorkerEvent};

/// Events buffered per worker before log lines start being dropped.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Grace period after SIGTERM before escalating to a kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Wait after the kill before giving up on reaping.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Failures while bringing a worker process up.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("cannot locate worker executable: {0}")]
    Executable(std::io::Error),
    #[error("failed to spawn worker process: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode job config: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("worker process pipes were not available")]
    Wiring,
}

/// A live (or recently exited) worker process owned by the scheduler.
#[async_trait]
pub trait WorkerHandle: Send {
    /// OS process id, while one is known.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking read of the next pending event.
    fn try_next_event(&mut self) -> Option<WorkerEvent>;

    /// Whether the process has not yet exited.
    fn is_alive(&mut self) -> bool;

    /// Terminate the process: polite signal, then a forced kill after the
    /// grace window. Returns once the process is confirmed dead.
    async fn terminate(&mut self);

    /// Reap an exited (or exiting) process, escalating like [`terminate`]
    /// if it lingers.
    ///
    /// [`terminate`]: WorkerHandle::terminate
    async fn release(&mut self);
}

/// Starts worker processes for admitted tasks.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(
        &self,
        config: &JobConfig,
        priority: PriorityMode,
    ) -> Result<Box<dyn WorkerHandle>, SpawnError>;
}

/// Production launcher: spawns `<current_exe> worker` per task.
#[derive(Debug, Default)]
pub struct ProcessWorkerLauncher;

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn launch(
        &self,
        config: &JobConfig,
        priority: PriorityMode,
    ) -> Result<Box<dyn WorkerHandle>, SpawnError> {
        let exe = std::env::current_exe().map_err(SpawnError::Executable)?;
        let mut child = Command::new(exe)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(pid) = child.id() {
            apply_priority(pid, priority);
        }

        let payload = serde_json::to_string(config)?;
        let mut stdin = child.stdin.take().ok_or(SpawnError::Wiring)?;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.shutdown().await?;
        drop(stdin);

        let stdout = child.stdout.take().ok_or(SpawnError::Wiring)?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(pump_events(
            BufReader::new(stdout),
            config.task_id.clone(),
            tx,
        ));

        Ok(Box::new(ProcessHandle { child, events: rx }))
    }
}

/// Forward a worker's stdout stream into the controller-side channel.
///
/// Log events use `try_send`: when the channel is saturated they are dropped
/// rather than stalling the pump. Status and done events are rare and
/// critical, so they get blocking sends. Unparseable lines are tool noise
/// and are wrapped as raw log events.
async fn pump_events<R>(reader: R, task_id: String, tx: mpsc::Sender<WorkerEvent>)
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match serde_json::from_str::<WorkerEvent>(&line) {
            Ok(event @ WorkerEvent::Log { .. }) => {
                let _ = tx.try_send(event);
            }
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(_) => {
                let _ = tx.try_send(WorkerEvent::Log {
                    task_id: task_id.clone(),
                    message: line,
                });
            }
        }
    }
}

/// Lower a freshly spawned worker's scheduling priority. Best-effort; a
/// worker that keeps normal priority still works.
fn apply_priority(pid: u32, priority: PriorityMode) {
    #[cfg(unix)]
    {
        let nice = priority.nice_level();
        if nice != 0 {
            unsafe {
                libc::setpriority(libc::PRIO_PROCESS, pid as _, nice);
            }
        }
        #[cfg(target_os = "linux")]
        if priority == PriorityMode::Background {
            tokio::spawn(async move {
                let _ = Command::new("ionice")
                    .args(["-c", "3", "-p", &pid.to_string()])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
            });
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, priority);
    }
}

/// Handle over a spawned worker process and its event channel.
pub struct ProcessHandle {
    child: Child,
    events: mpsc::Receiver<WorkerEvent>,
}

impl ProcessHandle {
    #[cfg(test)]
    pub(crate) fn from_parts(child: Child, events: mpsc::Receiver<WorkerEvent>) -> Self {
        Self { child, events }
    }
}

#[async_trait]
impl WorkerHandle for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_next_event(&mut self) -> Option<WorkerEvent> {
        self.events.try_recv().ok()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) {
        if !self.is_alive() {
            return;
        }
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
        if timeout(TERMINATE_GRACE, self.child.wait()).await.is_ok() {
            return;
        }
        let _ = self.child.start_kill();
        let _ = timeout(KILL_GRACE, self.child.wait()).await;
    }

    async fn release(&mut self) {
        if timeout(TERMINATE_GRACE, self.child.wait()).await.is_ok() {
            return;
        }
        let _ = self.child.start_kill();
        let _ = timeout(KILL_GRACE, self.child.wait()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_command(program: &str) -> Command {
        let mut command = Command::new(program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_stops_live_process() {
        let child = quiet_command("sleep").arg("30").spawn().expect("spawn");
        let (_tx, rx) = mpsc::channel(4);
        let mut handle = ProcessHandle::from_parts(child, rx);

        assert!(handle.is_alive());
        handle.terminate().await;
        assert!(!handle.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_release_reaps_exited_process() {
        let child = quiet_command("true").spawn().expect("spawn");
        let (_tx, rx) = mpsc::channel(4);
        let mut handle = ProcessHandle::from_parts(child, rx);

        handle.release().await;
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_pump_forwards_tagged_events() {
        let lines = concat!(
            "{\"type\":\"log\",\"task_id\":\"abc\",\"message\":\"one\"}\n",
            "not json at all\n",
            "{\"type\":\"status\",\"task_id\":\"abc\",\"status\":\"Running\"}\n",
            "{\"type\":\"done\",\"task_id\":\"abc\",\"success\":true}\n",
        );
        let (tx, mut rx) = mpsc::channel(16);
        pump_events(BufReader::new(lines.as_bytes()), "abc".to_string(), tx).await;

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            received.push(event);
        }
        assert_eq!(received.len(), 4);
        match &received[1] {
            WorkerEvent::Log { message, .. } => assert_eq!(message, "not json at all"),
            other => panic!("expected raw log relay, got {:?}", other),
        }
        assert!(matches!(received[3], WorkerEvent::Done { .. }));
    }

    #[tokio::test]
    async fn test_pump_drops_logs_when_saturated_but_keeps_done() {
        // Capacity 1 and no concurrent reader: extra log lines are dropped,
        // the done event still lands once the channel drains.
        let lines = concat!(
            "{\"type\":\"log\",\"task_id\":\"abc\",\"message\":\"a\"}\n",
            "{\"type\":\"log\",\"task_id\":\"abc\",\"message\":\"b\"}\n",
            "{\"type\":\"log\",\"task_id\":\"abc\",\"message\":\"c\"}\n",
            "{\"type\":\"done\",\"task_id\":\"abc\",\"success\":true}\n",
        );
        let (tx, mut rx) = mpsc::channel(1);
        let pump = tokio::spawn(pump_events(
            BufReader::new(lines.as_bytes()),
            "abc".to_string(),
            tx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut logs = 0;
        let mut done = false;
        loop {
            match rx.recv().await {
                Some(WorkerEvent::Log { .. }) => logs += 1,
                Some(WorkerEvent::Done { .. }) => done = true,
                Some(_) => {}
                None => break,
            }
        }
        pump.await.expect("pump");
        assert!(done);
        assert!(logs < 3, "saturated channel must shed log events");
    }
}
