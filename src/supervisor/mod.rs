//! Process supervisor: owns at most one worker process.
//!
//! Lifecycle: `Idle --start--> Running --stop--> Idle`. Start and stop are
//! single-flight (the `lifecycle` mutex); the child handle, pid, listen
//! address and the system-proxy flag live in one `State` behind the `state`
//! mutex. Lock order is always `lifecycle` then `state`; the exit monitor
//! only ever takes `state`.
//!
//! Whenever the phase drops to Idle, for any reason, the system proxy is
//! disabled first (best-effort) and the flag is cleared.
mod args;
mod locate;

pub use args::{launch_args, preview};
pub use locate::{default_worker_name, find_executable, SearchPaths, WORKER_BASENAME};

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::errors::ControlError;
use crate::profile::Profile;
use crate::relay::{LineSink, Relay};
use crate::sysproxy::SystemProxy;

/// How often the exit monitor re-checks a worker whose pipes are still open.
const MONITOR_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Explicit `stop()` or shutdown.
    Requested,
    /// Worker exited on its own; carries the exit code when there is one.
    Exited(Option<i32>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Started { pid: u32 },
    Stopped { reason: StopReason },
    SystemProxyChanged(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
}

/// Point-in-time view for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub phase: Phase,
    pub pid: Option<u32>,
    pub system_proxy_enabled: bool,
    pub listen_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Executable name (searched) or absolute path.
    pub worker: String,
    pub search: SearchPaths,
    /// Grace interval after the termination request before the hard kill.
    pub stop_timeout: Duration,
}

impl SupervisorOptions {
    pub fn from_env() -> Self {
        SupervisorOptions {
            worker: crate::config::worker_name(),
            search: SearchPaths::from_env(),
            stop_timeout: crate::config::stop_timeout(),
        }
    }

    /// Options for a worker at a known path.
    pub fn with_worker(worker: impl Into<PathBuf>) -> Self {
        SupervisorOptions {
            worker: worker.into().to_string_lossy().into_owned(),
            search: SearchPaths::default(),
            stop_timeout: crate::config::DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Resolve the worker executable without starting it.
    pub fn resolve(&self) -> Result<PathBuf, ControlError> {
        find_executable(&self.worker, &self.search)
    }
}

struct RunSlot {
    child: Child,
    pid: u32,
    listen_address: String,
}

struct State {
    phase: Phase,
    run: Option<RunSlot>,
    /// Bumped on every start and stop so a stale exit monitor stands down.
    generation: u64,
    system_proxy_enabled: bool,
}

struct Shared {
    lifecycle: Mutex<()>,
    state: Mutex<State>,
    subscribers: Mutex<Vec<Sender<SupervisorEvent>>>,
    proxy: Arc<dyn SystemProxy>,
    sink: Arc<dyn LineSink>,
    options: SupervisorOptions,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn emit(&self, ev: SupervisorEvent) {
        let mut subs = lock(&self.subscribers);
        subs.retain(|tx| tx.send(ev.clone()).is_ok());
    }

    /// Best-effort proxy disable used on every path into Idle.
    fn force_proxy_off(&self, state: &mut State) {
        if !state.system_proxy_enabled {
            return;
        }
        if let Err(e) = self.proxy.disable() {
            warn!("system proxy disable failed during stop: {e}");
        }
        state.system_proxy_enabled = false;
        self.emit(SupervisorEvent::SystemProxyChanged(false));
    }
}

/// Owner of the worker process and the system-proxy toggle.
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn new(
        options: SupervisorOptions,
        proxy: Arc<dyn SystemProxy>,
        sink: Arc<dyn LineSink>,
    ) -> Self {
        Supervisor {
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(()),
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    run: None,
                    generation: 0,
                    system_proxy_enabled: false,
                }),
                subscribers: Mutex::new(Vec::new()),
                proxy,
                sink,
                options,
            }),
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.shared.options
    }

    pub fn phase(&self) -> Phase {
        lock(&self.shared.state).phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    pub fn status(&self) -> SupervisorStatus {
        let state = lock(&self.shared.state);
        SupervisorStatus {
            phase: state.phase,
            pid: state.run.as_ref().map(|r| r.pid),
            system_proxy_enabled: state.system_proxy_enabled,
            listen_address: state.run.as_ref().map(|r| r.listen_address.clone()),
        }
    }

    /// Receive every subsequent lifecycle event.
    pub fn subscribe(&self) -> Receiver<SupervisorEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Launch the worker for `profile`. A second start while running is a
    /// no-op that reports the live pid.
    pub fn start(&self, profile: &Profile) -> Result<StartOutcome, ControlError> {
        let _flight = lock(&self.shared.lifecycle);
        if let Some(run) = lock(&self.shared.state).run.as_ref() {
            debug!(pid = run.pid, "start ignored: already running");
            return Ok(StartOutcome::AlreadyRunning { pid: run.pid });
        }

        let exe = self.shared.options.resolve()?;
        let args = launch_args(profile);
        info!(
            "starting worker: {}",
            preview(&exe.display().to_string(), &args)
        );

        let mut cmd = Command::new(&exe);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        crate::util::exec::hide_console_window(&mut cmd);

        // Hold the state lock across spawn and relay wiring so the exit
        // monitor cannot observe a half-registered run.
        let mut state = lock(&self.shared.state);
        let mut child = cmd
            .spawn()
            .map_err(|e| ControlError::SpawnFailed(format!("{}: {e}", exe.display())))?;
        let pid = child.id();

        let relay = match Relay::attach(
            child.stdout.take(),
            child.stderr.take(),
            self.shared.sink.clone(),
        ) {
            Ok(r) => r,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ControlError::SpawnFailed(format!(
                    "cannot start output readers: {e}"
                )));
            }
        };

        state.generation += 1;
        let generation = state.generation;
        state.phase = Phase::Running;
        state.system_proxy_enabled = false;
        state.run = Some(RunSlot {
            child,
            pid,
            listen_address: profile.listen_address.trim().to_string(),
        });
        self.shared.emit(SupervisorEvent::Started { pid });
        drop(state);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("echw-exit-monitor".to_string())
            .spawn(move || monitor_exit(shared, generation, relay));
        if let Err(e) = spawned {
            warn!("exit monitor unavailable, unexpected exits will be noticed on stop: {e}");
        }
        info!(pid, "worker started");
        Ok(StartOutcome::Started { pid })
    }

    /// Stop the worker: proxy off, terminate, bounded wait, hard kill.
    /// Returns true when a live worker was stopped. Safe to call repeatedly.
    pub fn stop(&self) -> bool {
        let _flight = lock(&self.shared.lifecycle);
        let run = {
            let mut state = lock(&self.shared.state);
            self.shared.force_proxy_off(&mut state);
            state.generation += 1;
            state.run.take()
        };

        let stopped = match run {
            Some(mut run) => {
                terminate(&mut run.child, run.pid, self.shared.options.stop_timeout);
                true
            }
            None => false,
        };

        let mut state = lock(&self.shared.state);
        if state.phase == Phase::Running {
            state.phase = Phase::Idle;
            self.shared.emit(SupervisorEvent::Stopped {
                reason: StopReason::Requested,
            });
            info!("worker stopped");
        }
        stopped
    }

    /// Route OS traffic through the running worker's listen address.
    pub fn enable_system_proxy(&self) -> Result<(), ControlError> {
        let _flight = lock(&self.shared.lifecycle);
        let mut state = lock(&self.shared.state);
        let addr = match state.run.as_ref() {
            Some(run) => run.listen_address.clone(),
            None => return Err(ControlError::NotRunning),
        };
        if state.system_proxy_enabled {
            return Ok(());
        }
        if addr.is_empty() {
            return Err(ControlError::ProxySettingFailed(
                "the active profile has no listen address".to_string(),
            ));
        }
        self.shared.proxy.enable(&addr)?;
        state.system_proxy_enabled = true;
        self.shared.emit(SupervisorEvent::SystemProxyChanged(true));
        info!(listen = %addr, "system proxy enabled");
        Ok(())
    }

    /// Restore the unproxied state. A no-op when the proxy is not enabled.
    /// On failure the flag stays set so the caller can retry.
    pub fn disable_system_proxy(&self) -> Result<(), ControlError> {
        let _flight = lock(&self.shared.lifecycle);
        let mut state = lock(&self.shared.state);
        if !state.system_proxy_enabled {
            return Ok(());
        }
        self.shared.proxy.disable()?;
        state.system_proxy_enabled = false;
        self.shared.emit(SupervisorEvent::SystemProxyChanged(false));
        info!("system proxy disabled");
        Ok(())
    }

    /// Flip the system proxy; returns the new value.
    pub fn toggle_system_proxy(&self) -> Result<bool, ControlError> {
        if self.status().system_proxy_enabled {
            self.disable_system_proxy().map(|_| false)
        } else {
            self.enable_system_proxy().map(|_| true)
        }
    }

    /// Application shutdown: proxy off and worker stopped.
    pub fn shutdown(&self) {
        self.stop();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Politely ask the worker to exit, then kill it after `grace`.
fn terminate(child: &mut Child, pid: u32, grace: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(pid, %status, "worker already exited");
        return;
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, "SIGTERM failed: {e}");
        }
    }
    #[cfg(not(unix))]
    {
        // No polite request exists for a console-less child on Windows.
        let _ = child.kill();
    }

    match child.wait_timeout(grace) {
        Ok(Some(status)) => {
            debug!(pid, %status, "worker exited");
            return;
        }
        Ok(None) => warn!(pid, "worker did not exit within {grace:?}; killing"),
        Err(e) => warn!(pid, "waiting for worker failed: {e}; killing"),
    }
    let _ = child.kill();
    match child.wait_timeout(grace) {
        Ok(Some(_)) => {}
        _ => warn!(pid, "worker still not reaped; giving up waiting"),
    }
}

/// Watch one run: wake on end-of-stream (or periodically) and, once the
/// process is gone, drive the same transition to Idle as an explicit stop.
fn monitor_exit(shared: Arc<Shared>, generation: u64, mut relay: Relay) {
    loop {
        let closed = relay.wait_closed(MONITOR_POLL);
        if relay.open_streams() == 0 && closed.is_none() {
            // Both pipes closed already; keep polling the process itself.
            thread::sleep(MONITOR_POLL);
        }

        let mut state = lock(&shared.state);
        if state.generation != generation {
            return;
        }
        let Some(run) = state.run.as_mut() else {
            return;
        };
        let exit = match run.child.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => continue,
            Err(e) => {
                warn!(pid = run.pid, "cannot poll worker: {e}");
                continue;
            }
        };

        let pid = run.pid;
        state.run = None;
        state.generation += 1;
        shared.force_proxy_off(&mut state);
        state.phase = Phase::Idle;
        warn!(pid, %exit, "worker exited unexpectedly");
        shared.emit(SupervisorEvent::Stopped {
            reason: StopReason::Exited(exit.code()),
        });
        return;
    }
}
