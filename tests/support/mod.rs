/*!
Test support helpers shared across integration tests.

- worker_script(dir, name, body): write an executable `/bin/sh` stand-in for the worker
- supervisor_with(worker, proxy): supervisor wired to a channel sink and a given proxy backend
- wait_until(timeout, cond): poll a condition with a deadline
- collect_lines(rx, timeout, want): gather relayed lines until `want` arrive or time runs out

These helpers never print skip messages themselves so tests keep their own
"skipping: ..." outputs.
*/

use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ech_workers_client::{
    channel_sink, MemorySystemProxy, OutputLine, Supervisor, SupervisorOptions, SystemProxy,
};

/// Write an executable shell script named `name` into `dir`.
#[cfg(unix)]
#[allow(dead_code)]
pub fn worker_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let p = dir.join(name);
    std::fs::write(&p, format!("#!/bin/sh\n{body}\n")).expect("write worker script");
    std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o755)).expect("chmod worker");
    p
}

/// A worker that echoes its arguments, writes one stderr line and then waits
/// until terminated.
#[cfg(unix)]
#[allow(dead_code)]
pub fn long_running_worker(dir: &Path) -> PathBuf {
    worker_script(
        dir,
        "ech-workers",
        "echo \"args: $*\"\necho \"ready\" 1>&2\nwhile true; do sleep 0.05; done",
    )
}

/// Supervisor over `worker` with a short stop grace, relaying into a channel.
#[allow(dead_code)]
pub fn supervisor_with(
    worker: &Path,
    proxy: Arc<dyn SystemProxy>,
) -> (Supervisor, Receiver<OutputLine>) {
    let (sink, rx) = channel_sink();
    let options = SupervisorOptions::with_worker(worker).stop_timeout(Duration::from_millis(500));
    (Supervisor::new(options, proxy, sink), rx)
}

#[allow(dead_code)]
pub fn memory_proxy() -> Arc<MemorySystemProxy> {
    Arc::new(MemorySystemProxy::new())
}

/// Poll `cond` every 20ms until it holds or `timeout` elapses.
#[allow(dead_code)]
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Receive lines until `want` have arrived or `timeout` elapses.
#[allow(dead_code)]
pub fn collect_lines(rx: &Receiver<OutputLine>, timeout: Duration, want: usize) -> Vec<OutputLine> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while out.len() < want {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        match rx.recv_timeout(left) {
            Ok(line) => out.push(line),
            Err(_) => break,
        }
    }
    out
}

/// Fresh config path inside a temp dir (the file itself does not exist yet).
#[allow(dead_code)]
pub fn temp_config() -> (tempfile::TempDir, PathBuf) {
    let td = tempfile::tempdir().expect("tmpdir");
    let p = td.path().join("ech-workers-client").join("config.json");
    (td, p)
}
