use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::config::model::{Auth, HostSpec};
use crate::context::Context;
use crate::detector;
use crate::event::channel::EventPublisher;
use crate::event::event::{Event, LogStream};
use crate::logsink::{Level, LogSink};
use crate::metrics::sampler::Sampler;
use crate::metrics::store::MetricsStore;
use crate::ssh::session::{wrap_supervised_command, Session, SessionLike};
use crate::supervisor::backoff::Backoff;
use crate::supervisor::error::SupervisorError;
use crate::supervisor::health::HealthEvaluator;
use crate::supervisor::state::{HostState, Status};

const TICK_INTERVAL: Duration = Duration::from_millis(100);
const PID_RETRY_INTERVAL_S: u64 = 5;
const METRICS_INTERVAL: Duration = Duration::from_secs(1);
const EXTERNAL_POLL_INTERVAL: Duration = Duration::from_secs(2);
const GRACE_PERIOD: Duration = Duration::from_secs(1);
const FORCE_RESTART_RELEASE_WAIT: Duration = Duration::from_secs(2);

/// Signals the Fleet Manager (or a Ctrl+C handler) can raise against a
/// running Supervisor, checked at every interruptible sleep boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    #[default]
    None,
    Stop,
    Restart,
    ForceRestart,
}

fn now_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// One per host. Owns the SSH Session, the command channel, the lifecycle
/// state machine and the health-check evaluator; drives them from a single
/// background thread and publishes every transition to the shared bus.
pub struct Supervisor {
    spec: HostSpec,
    state: Arc<Mutex<HostState>>,
    control: Context<ControlSignal>,
    manual_stop_requested: Arc<AtomicBool>,
    shutdown_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn spawn(
        spec: HostSpec,
        events: EventPublisher,
        store: Arc<MetricsStore>,
        log_dir: PathBuf,
    ) -> Self {
        let state = Arc::new(Mutex::new(HostState::new(spec.name.clone())));
        let control: Context<ControlSignal> = Context::new();
        let manual_stop_requested = Arc::new(AtomicBool::new(!spec.enabled));
        let shutdown_requested = Arc::new(AtomicBool::new(false));

        let worker_spec = spec.clone();
        let worker_state = state.clone();
        let worker_control = control.clone();
        let worker_manual_stop = manual_stop_requested.clone();
        let worker_shutdown = shutdown_requested.clone();

        let handle = thread::Builder::new()
            .name(format!("supervisor-{}", spec.name))
            .spawn(move || {
                run_loop(
                    worker_spec,
                    worker_state,
                    worker_control,
                    worker_manual_stop,
                    worker_shutdown,
                    events,
                    store,
                    log_dir,
                )
            })
            .expect("failed to spawn supervisor thread");

        Self {
            spec,
            state,
            control,
            manual_stop_requested,
            shutdown_requested,
            handle: Some(handle),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &HostSpec {
        &self.spec
    }

    pub fn snapshot(&self) -> HostState {
        self.state.lock().unwrap().clone()
    }

    pub fn start(&self) {
        self.manual_stop_requested.store(false, Ordering::SeqCst);
        let _ = self.control.cancel_all(ControlSignal::Restart);
    }

    pub fn stop(&self) {
        self.manual_stop_requested.store(true, Ordering::SeqCst);
        let _ = self.control.cancel_all(ControlSignal::Stop);
    }

    pub fn restart(&self) {
        self.manual_stop_requested.store(false, Ordering::SeqCst);
        let _ = self.control.cancel_all(ControlSignal::Restart);
    }

    pub fn force_restart(&self) {
        self.manual_stop_requested.store(false, Ordering::SeqCst);
        let _ = self.control.cancel_all(ControlSignal::ForceRestart);
    }

    /// Signals, then joins, the worker thread. Unlike `stop()`, this is
    /// final: the thread exits its loop entirely rather than idling in
    /// `Stopped`, since disabled hosts otherwise have no other way to ever
    /// stop idling.
    pub fn shutdown(mut self) {
        self.manual_stop_requested.store(true, Ordering::SeqCst);
        self.shutdown_requested.store(true, Ordering::SeqCst);
        let _ = self.control.cancel_all(ControlSignal::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn publish_state(events: &EventPublisher, state: &Arc<Mutex<HostState>>) {
    let snapshot = state.lock().unwrap().clone();
    events.publish(Event::StateChanged {
        host_name: snapshot.host_name.clone(),
        state: snapshot,
    });
}

fn set_status(
    state: &Arc<Mutex<HostState>>,
    events: &EventPublisher,
    status: Status,
    last_error: Option<String>,
) {
    {
        let mut guard = state.lock().unwrap();
        guard.set_status(status);
        guard.last_error = last_error;
    }
    publish_state(events, state);
}

/// Transitions to Disconnected and syncs `backoff_s` onto the snapshot in the
/// same publish, so observers see the reconnect delay that is about to apply.
fn set_disconnected(
    state: &Arc<Mutex<HostState>>,
    events: &EventPublisher,
    backoff: &Backoff,
    last_error: Option<String>,
) {
    {
        let mut guard = state.lock().unwrap();
        guard.set_status(Status::Disconnected);
        guard.last_error = last_error;
        guard.backoff_s = backoff.current_secs();
    }
    publish_state(events, state);
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    spec: HostSpec,
    state: Arc<Mutex<HostState>>,
    control: Context<ControlSignal>,
    manual_stop_requested: Arc<AtomicBool>,
    shutdown_requested: Arc<AtomicBool>,
    events: EventPublisher,
    store: Arc<MetricsStore>,
    log_dir: PathBuf,
) {
    let regex = match spec.compiled_process_regex() {
        Ok(r) => r,
        Err(e) => {
            let err = SupervisorError::PreconditionError(format!(
                "invalid process_match_regex: {e}"
            ));
            error!(host = %spec.name, error = %err, "supervisor cannot start");
            set_status(&state, &events, Status::Error, Some(err.to_string()));
            return;
        }
    };

    let mut backoff = Backoff::new();
    let mut health = HealthEvaluator::new();
    let mut sampler = Sampler::new(spec.name.clone());
    let today = chrono::Local::now().format("%Y%m%d").to_string();
    let log_sink = match LogSink::for_host(&log_dir, &spec.name, &today) {
        Ok(sink) => sink,
        Err(e) => {
            error!(host = %spec.name, error = %e, "failed to open log sink");
            return;
        }
    };

    let mut session = Session::new(&spec.host, spec.port, &spec.username, spec.auth.clone());
    let mut phase = Phase::Reconnect;

    loop {
        if shutdown_requested.load(Ordering::SeqCst) {
            break;
        }

        if manual_stop_requested.load(Ordering::SeqCst) {
            let reason = if spec.enabled { "Manually stopped" } else { "Disabled" };
            set_status(&state, &events, Status::Stopped, Some(reason.to_string()));
            idle_while_stopped(&control, &manual_stop_requested, &shutdown_requested);
            phase = Phase::Reconnect;
            continue;
        }

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match phase {
            Phase::Reconnect => run_reconnect_cycle(
                &spec,
                &regex,
                &state,
                &control,
                &manual_stop_requested,
                &events,
                &store,
                &log_sink,
                &mut session,
                &mut backoff,
                &mut health,
                &mut sampler,
            ),
            Phase::RestartDelay => run_restart_delay_cycle(
                &spec,
                &state,
                &control,
                &manual_stop_requested,
                &events,
                &store,
                &log_sink,
                &mut session,
                &mut health,
                &mut sampler,
            ),
        }));

        match outcome {
            Ok(next) => phase = next,
            Err(_) => {
                error!(host = %spec.name, "unexpected panic in supervisor tick, recovering");
                set_status(
                    &state,
                    &events,
                    Status::Error,
                    Some("internal error".to_string()),
                );
                control.wait_timeout_cancelled(Duration::from_secs(backoff.current_secs()));
                phase = Phase::Reconnect;
            }
        }
    }
}

/// Which path the next loop iteration should take to bring the managed
/// process back up: a full reconnect (fresh backoff + connect + detect) or
/// the fixed `restart_delay_seconds` wait over an already-live SSH session.
#[derive(Clone, Copy)]
enum Phase {
    Reconnect,
    RestartDelay,
}

/// Sleeps in 1 s increments until `manual_stop_requested` is cleared (by
/// `start()`/`restart()`/`force_restart()`) or shutdown is requested.
fn idle_while_stopped(
    control: &Context<ControlSignal>,
    manual_stop_requested: &Arc<AtomicBool>,
    shutdown_requested: &Arc<AtomicBool>,
) {
    loop {
        if shutdown_requested.load(Ordering::SeqCst) {
            return;
        }
        if !manual_stop_requested.load(Ordering::SeqCst) {
            return;
        }
        if control.wait_timeout_cancelled(Duration::from_secs(1)) {
            control.take();
            if !manual_stop_requested.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_reconnect_cycle<S: SessionLike>(
    spec: &HostSpec,
    regex: &regex::Regex,
    state: &Arc<Mutex<HostState>>,
    control: &Context<ControlSignal>,
    manual_stop_requested: &Arc<AtomicBool>,
    events: &EventPublisher,
    store: &Arc<MetricsStore>,
    log_sink: &LogSink,
    session: &mut S,
    backoff: &mut Backoff,
    health: &mut HealthEvaluator,
    sampler: &mut Sampler,
) -> Phase {
    set_disconnected(state, events, backoff, None);

    if control.wait_timeout_cancelled(Duration::from_secs(backoff.current_secs())) {
        control.take();
        if manual_stop_requested.load(Ordering::SeqCst) {
            return Phase::Reconnect;
        }
    }

    if let Err(e) = session.connect() {
        let msg = e.to_string();
        warn!(host = %spec.name, error = %msg, "connect failed");
        backoff.advance();
        set_disconnected(state, events, backoff, Some(msg));
        return Phase::Reconnect;
    }
    backoff.reset();

    set_status(state, events, Status::Connecting, None);

    match detector::detect(session, &regex.to_string()) {
        Ok(Some((pid, _cmd))) => {
            {
                let mut guard = state.lock().unwrap();
                guard.set_status(Status::External);
                guard.pid = Some(pid);
            }
            publish_state(events, state);
            run_external(
                spec,
                regex,
                state,
                control,
                manual_stop_requested,
                events,
                session,
            )
        }
        _ => start_process(
            spec, state, control, events, store, log_sink, session, health, sampler,
        ),
    }
}

/// Over an SSH session assumed still connected, waits `restart_delay_seconds`
/// (interruptible) and re-launches the managed process directly, without
/// re-running the connect/detect dance. Falls back to a full reconnect if the
/// session dropped while idle.
#[allow(clippy::too_many_arguments)]
fn run_restart_delay_cycle<S: SessionLike>(
    spec: &HostSpec,
    state: &Arc<Mutex<HostState>>,
    control: &Context<ControlSignal>,
    manual_stop_requested: &Arc<AtomicBool>,
    events: &EventPublisher,
    store: &Arc<MetricsStore>,
    log_sink: &LogSink,
    session: &mut S,
    health: &mut HealthEvaluator,
    sampler: &mut Sampler,
) -> Phase {
    if control.wait_timeout_cancelled(Duration::from_secs(spec.restart_delay_seconds.max(1))) {
        control.take();
        if manual_stop_requested.load(Ordering::SeqCst) {
            return Phase::Reconnect;
        }
    }

    if !session.is_connected() {
        return Phase::Reconnect;
    }

    start_process(
        spec, state, control, events, store, log_sink, session, health, sampler,
    )
}

#[allow(clippy::too_many_arguments)]
fn start_process<S: SessionLike>(
    spec: &HostSpec,
    state: &Arc<Mutex<HostState>>,
    control: &Context<ControlSignal>,
    events: &EventPublisher,
    store: &Arc<MetricsStore>,
    log_sink: &LogSink,
    session: &mut S,
    health: &mut HealthEvaluator,
    sampler: &mut Sampler,
) -> Phase {
    if let Some(script) = spec.script_path() {
        let check = format!("test -f {script} && echo OK || echo MISSING");
        match session.run_short(&check, Duration::from_secs(5)) {
            Ok((_, stdout, _)) if stdout.trim() == "OK" => {}
            _ => {
                let err = SupervisorError::PreconditionError(format!("script not found: {script}"));
                warn!(host = %spec.name, error = %err, "supervisor cannot start process");
                set_status(state, events, Status::Error, Some(err.to_string()));
                return Phase::RestartDelay;
            }
        }
    }

    let full_cmd = wrap_supervised_command(spec);
    let mut channel = match session.start_stream(&full_cmd) {
        Ok(c) => c,
        Err(e) => {
            set_status(state, events, Status::Error, Some(e.to_string()));
            return Phase::RestartDelay;
        }
    };

    sampler.reset();
    health.reset();
    {
        let mut guard = state.lock().unwrap();
        guard.restarts_count += 1;
        guard.last_restart_time = Some(now_s());
        guard.last_error = None;
        guard.set_status(Status::Running);
    }
    publish_state(events, state);

    control.wait_timeout_cancelled(GRACE_PERIOD);
    if let Ok(Some((pid, _))) = detector::detect(session, &spec.effective_process_regex()) {
        state.lock().unwrap().pid = Some(pid);
        publish_state(events, state);
    }

    run_running(spec, state, control, events, store, log_sink, &mut channel, health, sampler, session)
}

#[allow(clippy::too_many_arguments)]
fn run_running<S: SessionLike>(
    spec: &HostSpec,
    state: &Arc<Mutex<HostState>>,
    control: &Context<ControlSignal>,
    events: &EventPublisher,
    store: &Arc<MetricsStore>,
    log_sink: &LogSink,
    channel: &mut S::Channel,
    health: &mut HealthEvaluator,
    sampler: &mut Sampler,
    session: &S,
) -> Phase {
    let start = now_s();
    let mut last_pid_retry = start;
    let mut last_metrics = start;

    loop {
        if control.is_cancelled() {
            let signal = control.take();
            match signal {
                ControlSignal::Stop => {
                    let _ = session.run_short(&spec.stop_command, Duration::from_secs(5));
                    set_status(state, events, Status::Stopped, Some("Manually stopped".to_string()));
                    return Phase::Reconnect;
                }
                ControlSignal::Restart | ControlSignal::ForceRestart => {
                    let _ = session.run_short(&spec.stop_command, Duration::from_secs(5));
                    if signal == ControlSignal::ForceRestart {
                        control.wait_timeout_cancelled(FORCE_RESTART_RELEASE_WAIT);
                    }
                    set_status(state, events, Status::Stopped, Some("Restarting...".to_string()));
                    return Phase::RestartDelay;
                }
                ControlSignal::None => {}
            }
        }

        {
            let mut guard = state.lock().unwrap();
            guard.uptime_s = (now_s() - start).max(0) as u64;
        }

        let now = now_s();
        if now - last_pid_retry >= PID_RETRY_INTERVAL_S as i64 {
            last_pid_retry = now;
            let pid_missing = state.lock().unwrap().pid.is_none();
            if pid_missing {
                if let Ok(Some((pid, _))) = detector::detect(session, &spec.effective_process_regex()) {
                    state.lock().unwrap().pid = Some(pid);
                    publish_state(events, state);
                }
            }
        }

        for (stream, read_result) in [
            (LogStream::Stdout, channel.try_read_stdout()),
            (LogStream::Stderr, channel.try_read_stderr()),
        ] {
            if let Ok(Some(chunk)) = read_result {
                for line in chunk.lines() {
                    let level = match stream {
                        LogStream::Stdout => crate::logsink::Level::Info,
                        LogStream::Stderr => crate::logsink::Level::Warn,
                    };
                    let _ = log_sink.write_line(level, line);
                    events.publish(Event::LogLine {
                        host_name: spec.name.clone(),
                        timestamp: now_s(),
                        line: line.to_string(),
                        stream,
                    });
                }
            }
        }

        if let Some(exit_code) = channel.try_exit_status() {
            if exit_code == 0 {
                set_status(state, events, Status::Stopped, None);
            } else {
                set_status(
                    state,
                    events,
                    Status::Error,
                    Some(format!("Exited with code {exit_code}")),
                );
            }
            return Phase::RestartDelay;
        }

        if now - last_metrics >= METRICS_INTERVAL.as_secs() as i64 {
            last_metrics = now;
            let sample = sampler.sample(session, now);
            if let Err(e) = store.insert(&sample) {
                warn!(host = %spec.name, error = %e, "metrics insert failed");
            }
            events.publish(Event::Metrics {
                host_name: spec.name.clone(),
                sample: sample.clone(),
            });

            if let Some(violation) = health.evaluate(&spec.health_check, &sample, now) {
                info!(host = %spec.name, reason = violation.reason(), "health check forcing restart");
                let _ = session.run_short(&spec.stop_command, Duration::from_secs(5));
                control.wait_timeout_cancelled(FORCE_RESTART_RELEASE_WAIT);
                set_status(
                    state,
                    events,
                    Status::Stopped,
                    Some(format!("Health check: {}", violation.reason())),
                );
                return Phase::RestartDelay;
            }
        }

        if !session.is_connected() {
            set_status(
                state,
                events,
                Status::Disconnected,
                Some("Connection lost".to_string()),
            );
            return Phase::Reconnect;
        }

        control.wait_timeout_cancelled(TICK_INTERVAL);
    }
}

fn run_external<S: SessionLike>(
    spec: &HostSpec,
    regex: &regex::Regex,
    state: &Arc<Mutex<HostState>>,
    control: &Context<ControlSignal>,
    manual_stop_requested: &Arc<AtomicBool>,
    events: &EventPublisher,
    session: &S,
) -> Phase {
    loop {
        if control.wait_timeout_cancelled(EXTERNAL_POLL_INTERVAL) {
            let signal = control.take();
            if signal == ControlSignal::Stop && manual_stop_requested.load(Ordering::SeqCst) {
                set_status(state, events, Status::Stopped, Some("Manually stopped".to_string()));
                return Phase::Reconnect;
            }
            if signal == ControlSignal::ForceRestart {
                let _ = session.run_short(&spec.stop_command, Duration::from_secs(5));
                control.wait_timeout_cancelled(FORCE_RESTART_RELEASE_WAIT);
                set_status(state, events, Status::Stopped, Some("Restarting...".to_string()));
                return Phase::RestartDelay;
            }
        }

        match detector::detect(session, &regex.to_string()) {
            Ok(Some((pid, _))) => {
                let changed = state.lock().unwrap().pid != Some(pid);
                if changed {
                    state.lock().unwrap().pid = Some(pid);
                    publish_state(events, state);
                }
            }
            _ => {
                set_status(
                    state,
                    events,
                    Status::Stopped,
                    Some("External process ended".to_string()),
                );
                return Phase::RestartDelay;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    use crate::config::model::HealthCheckConfig;
    use crate::event::channel::bounded;
    use crate::ssh::channel::ChannelLike;
    use crate::ssh::error::SshError;

    #[test]
    fn control_signal_defaults_to_none() {
        let ctx: Context<ControlSignal> = Context::new();
        assert!(!ctx.is_cancelled());
        ctx.cancel_all(ControlSignal::Stop).unwrap();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn new_host_state_starts_disconnected() {
        let state = HostState::new("h1");
        assert_eq!(state.status, Status::Disconnected);
        assert_eq!(state.restarts_count, 0);
    }

    fn _unused(_: Auth) {}

    // --- Literal end-to-end scenarios from the component design, driven
    // against a fake SSH session/channel rather than a live host. ---

    fn spec_named(name: &str, restart_delay_seconds: u64) -> HostSpec {
        HostSpec {
            name: name.to_string(),
            host: "10.0.0.1".to_string(),
            port: 22,
            username: "root".to_string(),
            auth: Auth::Password {
                password: "x".to_string(),
            },
            command: "python3 worker.py".to_string(),
            working_dir: "/home/v13".to_string(),
            env: Default::default(),
            pre_command: String::new(),
            stop_command: "true".to_string(),
            process_match_regex: None,
            restart_delay_seconds,
            enabled: true,
            health_check: HealthCheckConfig::default(),
        }
    }

    /// Unblocks a Supervisor cycle's initial Disconnected backoff sleep after
    /// a few milliseconds, standing in for the 5-60s real backoff so tests
    /// don't have to wait it out. `manual_stop_requested` stays clear, so the
    /// cycle proceeds to attempt the connection exactly as it would once the
    /// real timer elapsed.
    fn skip_disconnected_backoff(control: &Context<ControlSignal>) {
        let ctl = control.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let _ = ctl.cancel_all(ControlSignal::Restart);
        });
    }

    /// Scripted, non-blocking stand-in for [`crate::ssh::channel::Channel`]:
    /// reports no output and exits with `exit_code` once `exit_after` has
    /// elapsed since it was constructed.
    struct FakeChannel {
        created: Instant,
        exit_after: Duration,
        exit_code: i32,
    }

    impl FakeChannel {
        fn exits_after(exit_code: i32, exit_after: Duration) -> Self {
            Self {
                created: Instant::now(),
                exit_after,
                exit_code,
            }
        }

        fn never_exits() -> Self {
            Self {
                created: Instant::now(),
                exit_after: Duration::from_secs(3600),
                exit_code: 0,
            }
        }
    }

    impl ChannelLike for FakeChannel {
        fn try_read_stdout(&mut self) -> Result<Option<String>, SshError> {
            Ok(None)
        }

        fn try_read_stderr(&mut self) -> Result<Option<String>, SshError> {
            Ok(None)
        }

        fn try_exit_status(&mut self) -> Option<i32> {
            (self.created.elapsed() >= self.exit_after).then_some(self.exit_code)
        }
    }

    /// Scripted stand-in for [`crate::ssh::session::Session`]. `run_short`
    /// recognizes the handful of commands the Supervisor actually issues
    /// (`pgrep -af`, the script-existence probe, `/proc/stat`,
    /// `/proc/meminfo`, `nvidia-smi`) and answers each from its own script;
    /// anything else (the `stop_command`) succeeds trivially.
    struct FakeSession {
        connected: Arc<AtomicBool>,
        connect_error: Option<String>,
        detect_script: Arc<Mutex<VecDeque<Option<(u32, String)>>>>,
        process_started_pid: Arc<Mutex<Option<(u32, String)>>>,
        next_pid: Arc<AtomicU32>,
        channels: Arc<Mutex<VecDeque<FakeChannel>>>,
    }

    impl FakeSession {
        fn new() -> Self {
            Self {
                connected: Arc::new(AtomicBool::new(false)),
                connect_error: None,
                detect_script: Arc::new(Mutex::new(VecDeque::new())),
                process_started_pid: Arc::new(Mutex::new(None)),
                next_pid: Arc::new(AtomicU32::new(9000)),
                channels: Arc::new(Mutex::new(VecDeque::new())),
            }
        }

        /// Every `connect()` call fails with `PreconditionError`-flavored
        /// `SshError::KeyError(msg)`, matching the bad-credentials scenario.
        fn always_fail_connect(mut self, msg: impl Into<String>) -> Self {
            self.connect_error = Some(msg.into());
            self
        }

        /// Queues one scripted `pgrep -af` answer, consumed in order. Once
        /// the queue is empty, `run_short` falls back to whatever PID the
        /// most recent `start_stream` assigned (the managed process the
        /// Supervisor itself launched).
        fn push_detect(&self, response: Option<(u32, String)>) {
            self.detect_script.lock().unwrap().push_back(response);
        }

        fn push_channel(&self, channel: FakeChannel) {
            self.channels.lock().unwrap().push_back(channel);
        }
    }

    impl SessionLike for FakeSession {
        type Channel = FakeChannel;

        fn connect(&mut self) -> Result<(), SshError> {
            if let Some(msg) = &self.connect_error {
                return Err(SshError::KeyError(msg.clone()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn run_short(&self, cmd: &str, _timeout: Duration) -> Result<(i32, String, String), SshError> {
            if cmd.starts_with("pgrep -af") {
                let scripted = self.detect_script.lock().unwrap().pop_front();
                let response = match scripted {
                    Some(r) => r,
                    None => self.process_started_pid.lock().unwrap().clone(),
                };
                return Ok(match response {
                    Some((pid, cmdline)) => (0, format!("{pid} {cmdline}\n"), String::new()),
                    None => (1, String::new(), String::new()),
                });
            }
            if cmd.starts_with("test -f") {
                return Ok((0, "OK\n".to_string(), String::new()));
            }
            if cmd.contains("/proc/stat") {
                return Ok((0, "cpu  100 0 0 900 0 0 0 0 0 0\n".to_string(), String::new()));
            }
            if cmd.contains("/proc/meminfo") {
                return Ok((
                    0,
                    "MemTotal: 1000000 kB\nMemAvailable: 500000 kB\n".to_string(),
                    String::new(),
                ));
            }
            if cmd.contains("nvidia-smi") {
                return Err(SshError::ProtocolError("nvidia-smi not found".to_string()));
            }
            Ok((0, String::new(), String::new()))
        }

        fn start_stream(&self, _full_cmd: &str) -> Result<FakeChannel, SshError> {
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            *self.process_started_pid.lock().unwrap() = Some((pid, "python3 worker.py".to_string()));
            let mut channels = self.channels.lock().unwrap();
            Ok(channels.pop_front().unwrap_or_else(FakeChannel::never_exits))
        }
    }

    fn test_harness(
        spec: &HostSpec,
    ) -> (
        Arc<Mutex<HostState>>,
        Context<ControlSignal>,
        Arc<AtomicBool>,
        EventPublisher,
        crate::event::channel::EventConsumer,
        Arc<MetricsStore>,
        LogSink,
        tempfile::TempDir,
    ) {
        let state = Arc::new(Mutex::new(HostState::new(spec.name.clone())));
        let control: Context<ControlSignal> = Context::new();
        let manual_stop = Arc::new(AtomicBool::new(false));
        let (events, consumer) = bounded(64);
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetricsStore::open(dir.path().join("m.db")).unwrap());
        let log_sink = LogSink::for_host(dir.path(), &spec.name, "20260101").unwrap();
        (state, control, manual_stop, events, consumer, store, log_sink, dir)
    }

    /// Scenario: crash recovery. A command that exits with code 9 is
    /// restarted after `restart_delay_seconds`, without an intervening
    /// reconnect, and `restarts_count` increments by exactly one per launch.
    #[test]
    fn crash_recovery_relaunches_and_increments_restart_count() {
        let spec = spec_named("h1", 1);
        let regex = spec.compiled_process_regex().unwrap();
        let (state, control, manual_stop, events, consumer, store, log_sink, _dir) =
            test_harness(&spec);

        let mut session = FakeSession::new();
        session.push_channel(FakeChannel::exits_after(9, Duration::from_millis(50)));
        session.push_channel(FakeChannel::exits_after(0, Duration::from_millis(50)));

        let mut backoff = Backoff::new();
        let mut health = HealthEvaluator::new();
        let mut sampler = Sampler::new(spec.name.clone());

        skip_disconnected_backoff(&control);
        let phase = run_reconnect_cycle(
            &spec, &regex, &state, &control, &manual_stop, &events, &store, &log_sink,
            &mut session, &mut backoff, &mut health, &mut sampler,
        );
        assert!(matches!(phase, Phase::RestartDelay));

        let after_crash = state.lock().unwrap().clone();
        assert_eq!(after_crash.restarts_count, 1);
        assert_eq!(after_crash.status, Status::Error);
        assert_eq!(after_crash.last_error.as_deref(), Some("Exited with code 9"));

        let phase2 = run_restart_delay_cycle(
            &spec, &state, &control, &manual_stop, &events, &store, &log_sink,
            &mut session, &mut health, &mut sampler,
        );
        assert!(matches!(phase2, Phase::RestartDelay));

        let after_restart = state.lock().unwrap().clone();
        assert_eq!(after_restart.restarts_count, 2);

        let statuses: Vec<Status> = consumer
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                Event::StateChanged { state, .. } => Some(state.status),
                _ => None,
            })
            .collect();
        assert!(statuses.contains(&Status::Disconnected));
        assert!(statuses.contains(&Status::Connecting));
        assert_eq!(statuses.iter().filter(|s| **s == Status::Running).count(), 2);
        assert_eq!(statuses.iter().filter(|s| **s == Status::Error).count(), 1);
    }

    /// Scenario: external takeover. A process already matching the regex is
    /// adopted as External; once it disappears, the Supervisor reports it
    /// Stopped and relaunches its own managed process on the restart-delay
    /// path.
    #[test]
    fn external_process_is_adopted_then_replaced_once_it_ends() {
        let spec = spec_named("h2", 1);
        let regex = spec.compiled_process_regex().unwrap();
        let (state, control, manual_stop, events, consumer, store, log_sink, _dir) =
            test_harness(&spec);

        let mut session = FakeSession::new();
        session.push_detect(Some((4711, "python3 worker.py".to_string())));
        session.push_detect(None);
        session.push_channel(FakeChannel::exits_after(0, Duration::from_millis(50)));

        let mut backoff = Backoff::new();
        let mut health = HealthEvaluator::new();
        let mut sampler = Sampler::new(spec.name.clone());

        skip_disconnected_backoff(&control);
        let phase = run_reconnect_cycle(
            &spec, &regex, &state, &control, &manual_stop, &events, &store, &log_sink,
            &mut session, &mut backoff, &mut health, &mut sampler,
        );
        assert!(matches!(phase, Phase::RestartDelay));

        let phase2 = run_restart_delay_cycle(
            &spec, &state, &control, &manual_stop, &events, &store, &log_sink,
            &mut session, &mut health, &mut sampler,
        );
        assert!(matches!(phase2, Phase::RestartDelay));

        let snapshots: Vec<HostState> = consumer
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                Event::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();

        assert!(snapshots
            .iter()
            .any(|s| s.status == Status::External && s.pid == Some(4711)));
        assert!(snapshots.iter().any(
            |s| s.status == Status::Stopped && s.last_error.as_deref() == Some("External process ended")
        ));
        assert!(snapshots
            .iter()
            .any(|s| s.status == Status::Running && s.pid.is_some()));
    }

    /// Scenario: backoff on bad credentials. Every connect attempt fails
    /// with a `PreconditionError`-flavored error; the reconnect backoff
    /// still advances 5 -> 10 -> 20 -> 40 -> 60 -> 60, and Running is never
    /// reached.
    #[test]
    fn bad_credentials_advance_backoff_without_ever_running() {
        let spec = spec_named("h3", 1);
        let regex = spec.compiled_process_regex().unwrap();
        let (state, control, manual_stop, events, consumer, store, log_sink, _dir) =
            test_harness(&spec);

        let mut session =
            FakeSession::new().always_fail_connect("Private key not found: /missing/id_ed25519");

        let mut backoff = Backoff::new();
        let mut health = HealthEvaluator::new();
        let mut sampler = Sampler::new(spec.name.clone());
        assert_eq!(backoff.current_secs(), 5);

        for expected_next in [10u64, 20, 40, 60, 60] {
            skip_disconnected_backoff(&control);
            let phase = run_reconnect_cycle(
                &spec, &regex, &state, &control, &manual_stop, &events, &store, &log_sink,
                &mut session, &mut backoff, &mut health, &mut sampler,
            );
            assert!(matches!(phase, Phase::Reconnect));
            assert_eq!(backoff.current_secs(), expected_next);
        }

        let snapshot = state.lock().unwrap().clone();
        assert_eq!(snapshot.status, Status::Disconnected);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("Private key not found: /missing/id_ed25519")
        );

        let ever_running = consumer.drain().into_iter().any(|e| {
            matches!(e, Event::StateChanged { state, .. } if state.status == Status::Running)
        });
        assert!(!ever_running);
    }
}
