//! Keeps a fixed number of instances of each command alive.
//!
//! ## Lifecycle
//! ```text
//! start() ──► spawn `count` instances per command
//!
//! on every exit (delivered at a tick boundary):
//!   ├─► drop the instance from its slot, publish "exit"
//!   ├─► token shut down?  ─► yes: slot stays at the reduced count
//!   └─► no: respawn now, or after `respawn_delay`
//!            (the token is read again when that timer fires)
//! ```
//!
//! The respawn loop lives here, in one place, instead of in a chain of exit
//! callbacks that each capture the next restart.

use crate::error::SpawnError;
use crate::event::EventEmitter;
use crate::process::{
    CommandSpec, InstanceId, Pid, ProcessEvent, ProcessEventKind, ProcessOutput, ShutdownToken,
    Spawner,
};
use crate::runtime::Handle;
use crate::runtime::queue::SinkId;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

/// Shortest wait before retrying a spawn that failed.
const SPAWN_RETRY_FLOOR: Duration = Duration::from_millis(100);

/// What to supervise.
///
/// ## Field semantics
/// - `commands`: every command with its desired instance count.
/// - `respawn_delay`: wait between an exit and its replacement (`0s` = same tick).
#[derive(Clone, Debug, Default)]
pub struct SupervisorConfig {
    pub commands: Vec<CommandSpec>,
    pub respawn_delay: Duration,
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a command to supervise.
    pub fn command(mut self, command: CommandSpec) -> Self {
        self.commands.push(command);
        self
    }

    pub fn respawn_delay(mut self, delay: Duration) -> Self {
        self.respawn_delay = delay;
        self
    }
}

struct Slot {
    command: CommandSpec,
    label: String,
    live: BTreeMap<InstanceId, Pid>,
}

struct Inner {
    handle: Handle,
    spawner: Box<dyn Spawner>,
    token: ShutdownToken,
    respawn_delay: Duration,
    sink: SinkId,
    slots: RefCell<Vec<Slot>>,
    instances: RefCell<HashMap<InstanceId, usize>>,
    events: EventEmitter<ProcessEvent>,
    restarts: Cell<u64>,
    next_instance: Cell<u64>,
}

/// Process supervisor.
///
/// # Example
/// ```no_run
/// use tickloop::{CommandSpec, OsSpawner, Runtime, Supervisor, SupervisorConfig};
///
/// let mut rt = Runtime::new();
/// let config = SupervisorConfig::new().command(CommandSpec::new("./prxy", Vec::<String>::new(), 4));
/// let supervisor = Supervisor::new(&rt.handle(), config, OsSpawner::new());
///
/// supervisor.start().unwrap();
/// rt.run();
/// ```
pub struct Supervisor {
    inner: Rc<Inner>,
}

impl Supervisor {
    /// Creates a supervisor that stops respawning when the runtime's shutdown
    /// token is set.
    pub fn new<S>(handle: &Handle, config: SupervisorConfig, spawner: S) -> Self
    where
        S: Spawner + 'static,
    {
        Self::with_token(handle, config, spawner, handle.shutdown_token())
    }

    /// Creates a supervisor governed by its own `token`.
    pub fn with_token<S>(
        handle: &Handle,
        config: SupervisorConfig,
        spawner: S,
        token: ShutdownToken,
    ) -> Self
    where
        S: Spawner + 'static,
    {
        let slots = config
            .commands
            .into_iter()
            .map(|command| Slot {
                label: command.to_string(),
                command,
                live: BTreeMap::new(),
            })
            .collect();

        let inner = Rc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let sink = handle.register_sink(Rc::new(move |instance: InstanceId, output: ProcessOutput| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_output(instance, output);
                }
            }));

            Inner {
                handle: handle.clone(),
                spawner: Box::new(spawner),
                token,
                respawn_delay: config.respawn_delay,
                sink,
                slots: RefCell::new(slots),
                instances: RefCell::new(HashMap::new()),
                events: EventEmitter::new(),
                restarts: Cell::new(0),
                next_instance: Cell::new(0),
            }
        });

        Self { inner }
    }

    /// Launches the desired number of instances of every command.
    ///
    /// # Errors
    /// Stops at, and returns, the first launch failure. Instances started
    /// before it stay supervised.
    pub fn start(&self) -> Result<(), SpawnError> {
        let slots = self.inner.slots.borrow().len();

        for slot in 0..slots {
            let desired = self.inner.slots.borrow()[slot].command.count;
            for _ in 0..desired {
                self.inner.spawn_instance(slot)?;
            }
        }

        info!(commands = slots, "supervisor started");
        Ok(())
    }

    /// Lifecycle events of every instance, emitted under `"spawn"`,
    /// `"stdout"`, `"stderr"` and `"exit"`.
    pub fn events(&self) -> EventEmitter<ProcessEvent> {
        self.inner.events.clone()
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.inner.token.clone()
    }

    /// Stops future respawns. Running instances are left alone.
    pub fn shutdown(&self) -> bool {
        self.inner.token.shutdown()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.token.is_shutdown()
    }

    /// Live instances of the command whose display form is `command`.
    pub fn live_count(&self, command: &str) -> usize {
        self.inner
            .slots
            .borrow()
            .iter()
            .filter(|slot| slot.label == command)
            .map(|slot| slot.live.len())
            .sum()
    }

    /// Pids of the live instances of `command`, oldest first.
    pub fn live_instances(&self, command: &str) -> Vec<Pid> {
        self.inner
            .slots
            .borrow()
            .iter()
            .filter(|slot| slot.label == command)
            .flat_map(|slot| slot.live.values().copied())
            .collect()
    }

    /// Live instances across all commands.
    pub fn total_live(&self) -> usize {
        self.inner.instances.borrow().len()
    }

    /// Number of replacement instances launched after an exit.
    pub fn restarts(&self) -> u64 {
        self.inner.restarts.get()
    }

    /// Forcibly terminates an instance through the spawner. Its exit is
    /// handled like any other.
    ///
    /// # Errors
    /// Propagates the spawner's [`SpawnError`].
    pub fn kill(&self, pid: Pid) -> Result<(), SpawnError> {
        self.inner.spawner.kill(pid)
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("live", &self.total_live())
            .field("restarts", &self.restarts())
            .field("shutdown", &self.is_shutting_down())
            .finish()
    }
}

impl Inner {
    fn spawn_instance(self: &Rc<Self>, slot: usize) -> Result<Pid, SpawnError> {
        let instance = InstanceId(self.next_instance.get());
        self.next_instance.set(instance.0 + 1);

        let (command, label) = {
            let slots = self.slots.borrow();
            (slots[slot].command.clone(), slots[slot].label.clone())
        };

        let sink = self.handle.open_sink(self.sink, instance);
        let pid = self.spawner.spawn(&command, sink)?;

        self.slots.borrow_mut()[slot].live.insert(instance, pid);
        self.instances.borrow_mut().insert(instance, slot);

        info!(command = %label, pid, %instance, "process started");
        self.publish(label, instance, pid, ProcessEventKind::Spawned);

        Ok(pid)
    }

    fn on_output(self: &Rc<Self>, instance: InstanceId, output: ProcessOutput) {
        let slot = self.instances.borrow().get(&instance).copied();
        let Some(slot) = slot else {
            trace!(%instance, "output from an instance no longer supervised");
            return;
        };

        let (label, pid) = {
            let slots = self.slots.borrow();
            let slot = &slots[slot];
            (
                slot.label.clone(),
                slot.live.get(&instance).copied().unwrap_or_default(),
            )
        };

        match output {
            ProcessOutput::Stdout(line) => {
                info!(command = %label, pid, "{line}");
                self.publish(label, instance, pid, ProcessEventKind::Stdout(line));
            }
            ProcessOutput::Stderr(line) => {
                warn!(command = %label, pid, "{line}");
                self.publish(label, instance, pid, ProcessEventKind::Stderr(line));
            }
            ProcessOutput::Exited(code) => self.on_exit(slot, instance, pid, label, code),
        }
    }

    fn on_exit(
        self: &Rc<Self>,
        slot: usize,
        instance: InstanceId,
        pid: Pid,
        label: String,
        code: Option<i32>,
    ) {
        self.instances.borrow_mut().remove(&instance);
        self.slots.borrow_mut()[slot].live.remove(&instance);

        info!(command = %label, pid, ?code, "process closed");
        self.publish(label.clone(), instance, pid, ProcessEventKind::Exited(code));

        // Read at exit time, not spawn time: an exit racing a shutdown is
        // decided by whichever was observed first here.
        if self.token.is_shutdown() {
            debug!(command = %label, "shutting down; slot left at reduced count");
            return;
        }

        if self.respawn_delay.is_zero() {
            self.try_spawn(slot);
        } else {
            self.respawn_later(slot, self.respawn_delay);
        }
    }

    fn try_spawn(self: &Rc<Self>, slot: usize) {
        match self.spawn_instance(slot) {
            Ok(_) => self.restarts.set(self.restarts.get() + 1),
            Err(error) => {
                warn!(label = error.as_label(), %error, "respawn failed; retrying");
                self.respawn_later(slot, self.respawn_delay.max(SPAWN_RETRY_FLOOR));
            }
        }
    }

    fn respawn_later(self: &Rc<Self>, slot: usize, delay: Duration) {
        let weak = Rc::downgrade(self);

        self.handle.schedule(delay, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.token.is_shutdown() {
                return;
            }
            inner.try_spawn(slot);
        });
    }

    fn publish(&self, command: String, instance: InstanceId, pid: Pid, kind: ProcessEventKind) {
        let name = kind.name();
        let event = ProcessEvent {
            command,
            instance,
            pid,
            kind,
        };
        self.events.emit(name, &event);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.handle.unregister_sink(self.sink);
    }
}
