//! Bounded execution of short-lived OS tools (reg.exe, gsettings, networksetup).
use std::ffi::OsString;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use wait_timeout::ChildExt;

/// Default upper bound for a single settings tool invocation.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct ToolRequest {
    program: OsString,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl ToolRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run and capture output regardless of the exit status.
    pub fn output(self) -> Result<ToolOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        hide_console_window(&mut cmd);

        let mut child = cmd.spawn().with_context(|| {
            format!("failed to spawn {:?} with args {:?}", self.program, self.args)
        })?;

        // Drain both pipes concurrently so a chatty tool cannot fill a pipe and stall.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let timeout = self.timeout.unwrap_or(TOOL_TIMEOUT);
        let started = Instant::now();
        let status = match child
            .wait_timeout(timeout)
            .context("failed to wait with timeout")?
        {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(
                    "command {:?} timed out after {:?}",
                    self.program,
                    timeout
                ));
            }
        };

        let collect = |h: Option<thread::JoinHandle<String>>| {
            h.and_then(|h| h.join().ok()).unwrap_or_default()
        };
        Ok(ToolOutput {
            status,
            duration: started.elapsed(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }

    /// Run and fail unless the tool exits successfully.
    pub fn run(self) -> Result<ToolOutput> {
        let program = self.program.clone();
        let out = self.output()?;
        if !out.status.success() {
            let detail = out.stderr.trim();
            let detail = if detail.is_empty() {
                out.stdout.trim()
            } else {
                detail
            };
            bail!("{:?} exited with {}: {}", program, out.status, detail);
        }
        Ok(out)
    }
}

fn drain<R: Read + Send + 'static>(mut r: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = r.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

/// True when `e` comes from the tool binary itself being absent.
pub fn is_tool_missing(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
    })
}

/// Keep console tools and the worker from flashing a console window on Windows.
pub fn hide_console_window(cmd: &mut Command) {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(windows))]
    {
        let _ = cmd;
    }
}
