mod common;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tickloop::{
    CommandSpec, Pid, ProcessEvent, ProcessEventKind, ProcessSink, Runtime, SpawnError, Spawner,
    Supervisor, SupervisorConfig,
};

#[derive(Default)]
struct Script {
    next_pid: Pid,
    running: HashMap<Pid, ProcessSink>,
    spawned: Vec<Pid>,
    fail_next: usize,
}

/// In-memory spawner: instances live until killed.
#[derive(Clone, Default)]
struct ScriptedSpawner {
    script: Rc<RefCell<Script>>,
}

impl ScriptedSpawner {
    fn spawned(&self) -> usize {
        self.script.borrow().spawned.len()
    }

    fn fail_next(&self, times: usize) {
        self.script.borrow_mut().fail_next = times;
    }

    fn output(&self, pid: Pid, line: &str) {
        self.script.borrow().running[&pid].stdout(line);
    }

    /// Exits every instance still running, without going through the
    /// supervisor.
    fn exit_all(&self) {
        let running: Vec<_> = self.script.borrow_mut().running.drain().collect();
        for (_, sink) in running {
            sink.exited(Some(0));
        }
    }
}

impl Spawner for ScriptedSpawner {
    fn spawn(&self, command: &CommandSpec, sink: ProcessSink) -> Result<Pid, SpawnError> {
        let mut script = self.script.borrow_mut();
        if script.fail_next > 0 {
            script.fail_next -= 1;
            return Err(SpawnError::Rejected {
                command: command.to_string(),
                reason: "scripted failure".into(),
            });
        }

        script.next_pid += 1;
        let pid = 1000 + script.next_pid;
        script.running.insert(pid, sink);
        script.spawned.push(pid);
        Ok(pid)
    }

    fn kill(&self, pid: Pid) -> Result<(), SpawnError> {
        let sink = self.script.borrow_mut().running.remove(&pid);
        match sink {
            Some(sink) => {
                sink.exited(None);
                Ok(())
            }
            None => Err(SpawnError::Kill {
                pid,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }
}

fn proxy(count: usize) -> CommandSpec {
    CommandSpec::new("./prxy", ["--port", "8080"], count)
}

const PROXY: &str = "./prxy --port 8080";

fn supervised(rt: &Runtime, config: SupervisorConfig) -> (Supervisor, ScriptedSpawner) {
    let spawner = ScriptedSpawner::default();
    let supervisor = Supervisor::new(&rt.handle(), config, spawner.clone());
    (supervisor, spawner)
}

#[test]
fn test_start_launches_desired_count() {
    common::init_test_logging();
    let rt = Runtime::new();
    let (supervisor, spawner) = supervised(&rt, SupervisorConfig::new().command(proxy(3)));

    supervisor.start().unwrap();

    assert_eq!(supervisor.live_count(PROXY), 3);
    assert_eq!(supervisor.live_instances(PROXY).len(), 3);
    assert_eq!(spawner.spawned(), 3);
    spawner.exit_all();
}

#[test]
fn test_kill_is_replaced_within_one_tick() {
    let mut rt = Runtime::new();
    let (supervisor, spawner) = supervised(&rt, SupervisorConfig::new().command(proxy(3)));
    supervisor.start().unwrap();

    let victim = supervisor.live_instances(PROXY)[0];
    supervisor.kill(victim).unwrap();
    assert_eq!(supervisor.live_count(PROXY), 3, "exit is only seen at a tick");

    let report = rt.tick();

    assert_eq!(report.external, 1);
    assert_eq!(supervisor.live_count(PROXY), 3);
    assert!(!supervisor.live_instances(PROXY).contains(&victim));
    assert_eq!(spawner.spawned(), 4, "exactly one replacement");
    assert_eq!(supervisor.restarts(), 1);
    spawner.exit_all();
}

#[test]
fn test_no_respawn_after_shutdown() {
    let mut rt = Runtime::new();
    let (supervisor, spawner) = supervised(&rt, SupervisorConfig::new().command(proxy(3)));
    supervisor.start().unwrap();

    assert!(supervisor.shutdown());
    assert!(!supervisor.shutdown());

    let victim = supervisor.live_instances(PROXY)[1];
    supervisor.kill(victim).unwrap();
    rt.tick();
    rt.tick();

    assert_eq!(supervisor.live_count(PROXY), 2);
    assert_eq!(spawner.spawned(), 3);
    assert_eq!(supervisor.restarts(), 0);
    spawner.exit_all();
}

#[test]
fn test_exit_queued_before_shutdown_is_not_replaced() {
    let mut rt = Runtime::new();
    let (supervisor, spawner) = supervised(&rt, SupervisorConfig::new().command(proxy(2)));
    supervisor.start().unwrap();

    // The exit is already in flight when the flag flips; the flag wins because
    // it is read when the exit is handled.
    let victim = supervisor.live_instances(PROXY)[0];
    supervisor.kill(victim).unwrap();
    rt.shutdown_token().shutdown();
    rt.tick();

    assert_eq!(supervisor.live_count(PROXY), 1);
    assert!(supervisor.is_shutting_down());
    spawner.exit_all();
}

#[test]
fn test_all_instances_exit_after_shutdown_leaves_runtime_idle() {
    let mut rt = Runtime::new();
    let (supervisor, spawner) = supervised(&rt, SupervisorConfig::new().command(proxy(2)));
    supervisor.start().unwrap();
    assert!(!rt.is_idle(), "live instances keep the runtime busy");

    supervisor.shutdown();
    spawner.exit_all();
    rt.run();

    assert_eq!(supervisor.total_live(), 0);
    assert!(rt.is_idle());
}

#[test]
fn test_respawn_waits_for_delay() {
    let mut rt = Runtime::new();
    let config = SupervisorConfig::new()
        .command(proxy(1))
        .respawn_delay(Duration::from_millis(30));
    let (supervisor, spawner) = supervised(&rt, config);
    supervisor.start().unwrap();

    let victim = supervisor.live_instances(PROXY)[0];
    supervisor.kill(victim).unwrap();
    rt.tick();

    assert_eq!(supervisor.live_count(PROXY), 0);
    assert_eq!(rt.handle().pending_timers(), 1);
    assert_eq!(supervisor.restarts(), 0, "counted once the replacement runs");

    assert!(rt.run_until(|| supervisor.live_count(PROXY) == 1));
    assert_eq!(spawner.spawned(), 2);
    assert_eq!(supervisor.restarts(), 1);
    spawner.exit_all();
}

#[test]
fn test_shutdown_during_respawn_delay_cancels_respawn() {
    let mut rt = Runtime::new();
    let config = SupervisorConfig::new()
        .command(proxy(1))
        .respawn_delay(Duration::from_millis(10));
    let (supervisor, spawner) = supervised(&rt, config);
    supervisor.start().unwrap();

    let victim = supervisor.live_instances(PROXY)[0];
    supervisor.kill(victim).unwrap();
    rt.tick();
    supervisor.shutdown();
    rt.run();

    assert_eq!(supervisor.live_count(PROXY), 0);
    assert_eq!(spawner.spawned(), 1);
    assert_eq!(supervisor.restarts(), 0, "cancelled respawn is not a restart");
}

#[test]
fn test_failed_respawn_is_retried() {
    let mut rt = Runtime::new();
    let (supervisor, spawner) = supervised(&rt, SupervisorConfig::new().command(proxy(1)));
    supervisor.start().unwrap();

    spawner.fail_next(1);
    let victim = supervisor.live_instances(PROXY)[0];
    supervisor.kill(victim).unwrap();
    rt.tick();

    assert_eq!(supervisor.live_count(PROXY), 0);
    assert_eq!(rt.handle().pending_timers(), 1, "retry is armed on the wheel");
    assert_eq!(supervisor.restarts(), 0);

    assert!(rt.run_until(|| supervisor.live_count(PROXY) == 1));
    assert_eq!(supervisor.restarts(), 1);
    spawner.exit_all();
}

#[test]
fn test_start_reports_launch_failure() {
    let rt = Runtime::new();
    let (supervisor, spawner) = supervised(&rt, SupervisorConfig::new().command(proxy(3)));
    spawner.fail_next(1);

    let err = supervisor.start().unwrap_err();

    assert_eq!(err.as_label(), "spawn_rejected");
    assert_eq!(supervisor.live_count(PROXY), 0);
}

#[test]
fn test_commands_are_supervised_independently() {
    let mut rt = Runtime::new();
    let config = SupervisorConfig::new()
        .command(proxy(2))
        .command(CommandSpec::new("./worker", Vec::<String>::new(), 1));
    let (supervisor, spawner) = supervised(&rt, config);
    supervisor.start().unwrap();

    let victim = supervisor.live_instances("./worker")[0];
    supervisor.kill(victim).unwrap();
    rt.tick();

    assert_eq!(supervisor.live_count(PROXY), 2);
    assert_eq!(supervisor.live_count("./worker"), 1);
    assert_eq!(supervisor.total_live(), 3);
    spawner.exit_all();
}

#[test]
fn test_lifecycle_events_are_published() {
    let mut rt = Runtime::new();
    let (supervisor, spawner) = supervised(&rt, SupervisorConfig::new().command(proxy(1)));
    let seen: Rc<RefCell<Vec<ProcessEvent>>> = Rc::new(RefCell::new(Vec::new()));

    let events = supervisor.events();
    for name in ["spawn", "stdout", "exit"] {
        let seen = seen.clone();
        events.on(name, move |event| seen.borrow_mut().push(event.clone()));
    }

    supervisor.start().unwrap();
    let pid = supervisor.live_instances(PROXY)[0];
    spawner.output(pid, "listening");
    supervisor.kill(pid).unwrap();
    supervisor.shutdown();
    rt.tick();

    let kinds: Vec<_> = seen.borrow().iter().map(|e| e.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            ProcessEventKind::Spawned,
            ProcessEventKind::Stdout("listening".into()),
            ProcessEventKind::Exited(None),
        ]
    );
    assert!(seen.borrow().iter().all(|e| e.pid == pid && e.command == PROXY));
}

#[test]
fn test_dropped_supervisor_ignores_late_exits() {
    let mut rt = Runtime::new();
    let (supervisor, spawner) = supervised(&rt, SupervisorConfig::new().command(proxy(1)));
    supervisor.start().unwrap();
    drop(supervisor);

    spawner.exit_all();
    let report = rt.tick();

    assert_eq!(report.external, 1);
    assert_eq!(spawner.spawned(), 1);
}

#[cfg(unix)]
#[test]
fn test_os_processes_are_respawned_until_shutdown() {
    use tickloop::OsSpawner;

    common::init_test_logging();
    let mut rt = Runtime::new();
    let command = CommandSpec::new("sleep", ["30"], 2);
    let label = command.to_string();
    let supervisor = Supervisor::new(
        &rt.handle(),
        SupervisorConfig::new().command(command),
        OsSpawner::new(),
    );
    supervisor.start().unwrap();
    assert_eq!(supervisor.live_count(&label), 2);

    let victim = supervisor.live_instances(&label)[0];
    supervisor.kill(victim).unwrap();
    assert!(rt.run_until(|| supervisor.restarts() == 1));
    assert_eq!(supervisor.live_count(&label), 2);
    assert!(!supervisor.live_instances(&label).contains(&victim));

    supervisor.shutdown();
    for pid in supervisor.live_instances(&label) {
        supervisor.kill(pid).unwrap();
    }
    rt.run();

    assert_eq!(supervisor.live_count(&label), 0);
}

#[cfg(unix)]
#[test]
fn test_os_output_precedes_exit() {
    use tickloop::OsSpawner;

    let mut rt = Runtime::new();
    let command = CommandSpec::shell("echo one; echo two >&2; exit 3", 1);
    let supervisor = Supervisor::new(
        &rt.handle(),
        SupervisorConfig::new().command(command),
        OsSpawner::new(),
    );
    let seen = Rc::new(RefCell::new(Vec::new()));

    let events = supervisor.events();
    for name in ["stdout", "stderr", "exit"] {
        let seen = seen.clone();
        events.on(name, move |event: &ProcessEvent| seen.borrow_mut().push(event.kind.clone()));
    }

    supervisor.shutdown();
    supervisor.start().unwrap();
    rt.run();

    let seen = seen.borrow();
    assert_eq!(seen.last(), Some(&ProcessEventKind::Exited(Some(3))));
    assert!(seen.contains(&ProcessEventKind::Stdout("one".into())));
    assert!(seen.contains(&ProcessEventKind::Stderr("two".into())));
}

#[cfg(unix)]
#[test]
fn test_exit_is_reported_while_a_descendant_holds_the_pipes() {
    use std::time::Instant;
    use tickloop::OsSpawner;

    let mut rt = Runtime::new();
    let command = CommandSpec::shell("sleep 3 & exit 0", 1);
    let supervisor = Supervisor::new(
        &rt.handle(),
        SupervisorConfig::new().command(command),
        OsSpawner::new(),
    );
    let exits = Rc::new(RefCell::new(Vec::new()));

    let e = exits.clone();
    supervisor
        .events()
        .on("exit", move |event: &ProcessEvent| e.borrow_mut().push(event.kind.clone()));

    let start = Instant::now();
    supervisor.start().unwrap();
    assert!(rt.run_until(|| supervisor.restarts() >= 1));

    assert!(
        start.elapsed() < Duration::from_secs(2),
        "exit waited for the background sleep"
    );
    assert_eq!(exits.borrow().first(), Some(&ProcessEventKind::Exited(Some(0))));
    supervisor.shutdown();
}
