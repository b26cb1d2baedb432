//! Supervised external processes.
//!
//! - [`Supervisor`]: keeps a configured number of instances of each command
//!   running, respawning on exit until its [`ShutdownToken`] is set.
//! - [`Spawner`]: the OS capability the supervisor drives; [`OsSpawner`] is
//!   the `std::process` implementation.
//! - [`ShutdownToken`]: the shared flag read by every exit handler.

mod shutdown;
mod spawner;
mod supervisor;

pub use shutdown::ShutdownToken;
pub use spawner::{OUTPUT_DRAIN_GRACE, OsSpawner, ProcessSink, Spawner};
pub use supervisor::{Supervisor, SupervisorConfig};

use std::fmt;

/// OS process id.
pub type Pid = u32;

/// Identifies one launched instance within a supervisor.
///
/// Unlike a pid it is never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}

/// Raw report from a running instance, as sent through a [`ProcessSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutput {
    Stdout(String),
    Stderr(String),
    /// Exit code, or `None` when terminated by a signal.
    Exited(Option<i32>),
}

/// One command line to keep running, and how many copies of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Desired number of live instances.
    pub count: usize,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I, count: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            count,
        }
    }

    /// Runs `line` through `sh -c`.
    pub fn shell(line: impl Into<String>, count: usize) -> Self {
        Self::new("sh", ["-c".to_owned(), line.into()], count)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What happened to an instance, as published on
/// [`Supervisor::events`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessEventKind {
    Spawned,
    Stdout(String),
    Stderr(String),
    Exited(Option<i32>),
}

impl ProcessEventKind {
    /// Event name the supervisor emits this kind under.
    pub fn name(&self) -> &'static str {
        match self {
            ProcessEventKind::Spawned => "spawn",
            ProcessEventKind::Stdout(_) => "stdout",
            ProcessEventKind::Stderr(_) => "stderr",
            ProcessEventKind::Exited(_) => "exit",
        }
    }
}

/// Lifecycle event of a supervised instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessEvent {
    /// Display form of the command.
    pub command: String,
    pub instance: InstanceId,
    pub pid: Pid,
    pub kind: ProcessEventKind,
}
