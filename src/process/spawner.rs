//! The OS process capability.
//!
//! The supervisor never touches processes directly. It asks a [`Spawner`] to
//! start a [`CommandSpec`] and hands it a [`ProcessSink`]; the spawner reports
//! output lines and the final exit through the sink, from whatever thread it
//! likes. The sink queues everything into the runtime's inbox, and the
//! supervisor sees it as ordinary callbacks at the next tick boundary.

use crate::error::SpawnError;
use crate::process::{CommandSpec, InstanceId, Pid, ProcessOutput};
use crate::runtime::queue::{Envelope, Inbox, SinkId};

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

/// Starts and signals external commands.
pub trait Spawner {
    /// Launches one instance of `command`.
    ///
    /// The spawner must eventually call [`ProcessSink::exited`] exactly once
    /// for every instance it launched successfully.
    ///
    /// # Errors
    /// Returns [`SpawnError`] when the instance could not be started.
    fn spawn(&self, command: &CommandSpec, sink: ProcessSink) -> Result<Pid, SpawnError>;

    /// Forcibly terminates a running instance.
    ///
    /// # Errors
    /// Returns [`SpawnError::Kill`] when the signal could not be delivered.
    fn kill(&self, pid: Pid) -> Result<(), SpawnError>;
}

struct SinkInner {
    inbox: Arc<Inbox>,
    target: SinkId,
    instance: InstanceId,
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        self.inbox.close_source();
    }
}

/// Thread-safe reporting endpoint for one process instance.
///
/// While any clone of a sink is alive the runtime counts the instance as an
/// open source and does not consider itself idle.
#[derive(Clone)]
pub struct ProcessSink {
    inner: Arc<SinkInner>,
}

impl ProcessSink {
    pub(crate) fn open(inbox: Arc<Inbox>, target: SinkId, instance: InstanceId) -> Self {
        inbox.open_source();
        Self {
            inner: Arc::new(SinkInner {
                inbox,
                target,
                instance,
            }),
        }
    }

    /// The instance this sink reports for.
    pub fn instance(&self) -> InstanceId {
        self.inner.instance
    }

    fn send(&self, output: ProcessOutput) {
        self.inner.inbox.push(Envelope {
            target: self.inner.target,
            instance: self.inner.instance,
            output,
        });
    }

    /// Reports one line written to stdout.
    pub fn stdout(&self, line: impl Into<String>) {
        self.send(ProcessOutput::Stdout(line.into()));
    }

    /// Reports one line written to stderr.
    pub fn stderr(&self, line: impl Into<String>) {
        self.send(ProcessOutput::Stderr(line.into()));
    }

    /// Reports that the instance exited; `code` is `None` when it was killed
    /// by a signal.
    pub fn exited(&self, code: Option<i32>) {
        self.send(ProcessOutput::Exited(code));
    }
}

impl std::fmt::Debug for ProcessSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSink")
            .field("instance", &self.inner.instance)
            .finish()
    }
}

/// [`Spawner`] backed by `std::process`.
///
/// Each instance gets one reader thread per output stream and one waiter
/// thread. The waiter reports the exit after the child has been reaped and
/// both streams are drained, so every output line is normally delivered
/// before the exit. A descendant that inherited the pipes can keep them open
/// past the child's exit; the waiter then gives up on the drain after
/// [`OUTPUT_DRAIN_GRACE`] and reports the exit anyway. Lines read after that
/// still reach the sink but arrive after the exit.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsSpawner;

/// How long the waiter lets the output readers drain after the child exits.
pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

impl OsSpawner {
    pub fn new() -> Self {
        Self
    }
}

fn forward_lines<R, F>(stream: R, forward: F)
where
    R: Read,
    F: Fn(String),
{
    for line in BufReader::new(stream).lines() {
        match line {
            Ok(line) => forward(line),
            Err(error) => {
                trace!(%error, "stopped reading process output");
                break;
            }
        }
    }
}

fn lock_child(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn kill_and_reap(child: &mut Child) {
    let pid = child.id();
    if let Err(error) = child.kill() {
        warn!(pid, %error, "failed to kill abandoned process");
    }
    if let Err(error) = child.wait() {
        warn!(pid, %error, "failed to reap abandoned process");
    }
}

impl Spawner for OsSpawner {
    fn spawn(&self, command: &CommandSpec, sink: ProcessSink) -> Result<Pid, SpawnError> {
        let launch_error = |source| SpawnError::Launch {
            command: command.to_string(),
            source,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(launch_error)?;

        let pid = child.id();
        let (drained_tx, drained) = mpsc::channel::<()>();
        let mut readers = 0;

        if let Some(stream) = child.stdout.take() {
            let (sink, done) = (sink.clone(), drained_tx.clone());
            readers += 1;
            thread::spawn(move || {
                forward_lines(stream, |line| sink.stdout(line));
                let _ = done.send(());
            });
        }
        if let Some(stream) = child.stderr.take() {
            let (sink, done) = (sink.clone(), drained_tx.clone());
            readers += 1;
            thread::spawn(move || {
                forward_lines(stream, |line| sink.stderr(line));
                let _ = done.send(());
            });
        }
        drop(drained_tx);

        let child = Arc::new(Mutex::new(child));
        let waited = child.clone();

        let waiter = thread::Builder::new()
            .name(format!("tickloop-wait-{pid}"))
            .spawn(move || {
                let code = match lock_child(&waited).wait() {
                    Ok(status) => status.code(),
                    Err(error) => {
                        warn!(pid, %error, "failed to reap supervised process");
                        None
                    }
                };

                let deadline = Instant::now() + OUTPUT_DRAIN_GRACE;
                for _ in 0..readers {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if drained.recv_timeout(left).is_err() {
                        debug!(pid, "output still open after exit; reporting exit");
                        break;
                    }
                }

                sink.exited(code);
            });

        if let Err(source) = waiter {
            // Nobody would reap or report this child.
            kill_and_reap(&mut lock_child(&child));
            return Err(launch_error(source));
        }

        Ok(pid)
    }

    fn kill(&self, pid: Pid) -> Result<(), SpawnError> {
        let pid_t = libc::pid_t::try_from(pid).map_err(|_| SpawnError::Kill {
            pid,
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        })?;

        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid_t, libc::SIGKILL) };
        if rc != 0 {
            return Err(SpawnError::Kill {
                pid,
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(())
    }
}
