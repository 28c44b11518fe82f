//! Local subprocess backend: soft isolation only, so the analyzer in front of it is mandatory.
//!
//! The program goes to a throwaway `.py` file that is removed when the
//! `NamedTempFile` guard drops, on every path. The interpreter runs in isolated
//! mode with a cleared environment, in its own process group on unix, with a
//! cap on the processes it may start. Once the interpreter exits or exceeds the
//! wall-clock limit the whole group is killed, so nothing it started outlives
//! the run. Each output stream keeps at most `output_limit_bytes`.

use std::io::Write;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use super::ExecutionBackend;
use crate::config::LocalSettings;
use crate::domain::{SandboxFailure, VerificationResult};

/// How long output readers get to finish once the process group is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Raw outcome of one interpreter run.
#[derive(Debug)]
pub struct ProcessRun {
    pub pid: Option<u32>,
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ProcessRun {
    fn output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

#[derive(Clone, Debug)]
pub struct LocalSubprocess {
    settings: LocalSettings,
}

impl LocalSubprocess {
    pub fn new(settings: LocalSettings) -> Self {
        Self { settings }
    }

    fn scratch_file(&self, program: &str) -> std::io::Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("challenge-").suffix(".py");
        let mut file = match &self.settings.work_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(program.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    fn command(&self, script: &std::path::Path) -> Command {
        let path_env = std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string());
        let mut cmd = Command::new(&self.settings.python);
        cmd.arg("-I")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .env("PATH", path_env)
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let max_processes = self.settings.max_processes;
            cmd.process_group(0);
            // SAFETY: only async-signal-safe libc calls run between fork and exec.
            unsafe {
                cmd.pre_exec(move || limit_processes(max_processes));
            }
        }
        cmd
    }

    /// Run `program` to completion or until the time limit, whichever comes first.
    #[instrument(level = "debug", skip_all, fields(program_len = program.len(), limit_ms = self.settings.timeout.as_millis() as u64))]
    pub async fn execute(&self, program: &str) -> std::io::Result<ProcessRun> {
        let script = self.scratch_file(program)?;

        let start = Instant::now();
        let mut child = self.command(script.path()).spawn()?;
        let pid = child.id();

        let limit = self.settings.output_limit_bytes;
        let stdout = child.stdout.take().map(|r| drain(r, limit));
        let stderr = child.stderr.take().map(|r| drain(r, limit));

        let waited = tokio::time::timeout(self.settings.timeout, child.wait()).await;
        let (status, timed_out) = match waited {
            Ok(status) => {
                let status = status?;
                // The interpreter is reaped; anything it left behind in its group goes too.
                kill_group(pid);
                (Some(status), false)
            }
            Err(_) => {
                warn!(target: "sandbox", ?pid, "Time limit exceeded; killing interpreter group");
                terminate(&mut child, pid).await;
                (None, true)
            }
        };

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;

        drop(script);
        let run = ProcessRun { pid, status, stdout, stderr, timed_out, elapsed: start.elapsed() };
        debug!(
            target: "sandbox",
            status = ?run.status,
            timed_out = run.timed_out,
            elapsed_ms = run.elapsed.as_millis() as u64,
            "Interpreter finished"
        );
        Ok(run)
    }
}

/// Kill the interpreter's process group, falling back to the child alone, then reap it.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if kill_group(pid) {
        if let Err(e) = child.wait().await {
            error!(target: "sandbox", ?pid, error = %e, "Failed to reap killed interpreter");
        }
    } else if let Err(e) = child.kill().await {
        error!(target: "sandbox", ?pid, error = %e, "Failed to kill timed-out interpreter");
    }
}

/// SIGKILL every process in the group led by `pid`. Returns whether the signal was sent.
#[cfg(unix)]
fn kill_group(pid: Option<u32>) -> bool {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return false;
    };
    // SAFETY: plain syscall; a negative pid addresses the process group.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(target: "sandbox", pgid, error = %err, "Process group kill failed");
        }
        return false;
    }
    true
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) -> bool {
    false
}

/// Cap RLIMIT_NPROC for the interpreter, never above the inherited hard limit.
#[cfg(unix)]
fn limit_processes(max: u64) -> std::io::Result<()> {
    let mut current = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    // SAFETY: getrlimit/setrlimit only read and write the struct passed in.
    unsafe {
        if libc::getrlimit(libc::RLIMIT_NPROC, &mut current) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let cap = (max as libc::rlim_t).min(current.rlim_max);
        let limit = libc::rlimit { rlim_cur: cap, rlim_max: cap };
        if libc::setrlimit(libc::RLIMIT_NPROC, &limit) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Keep the first `limit` bytes of a stream and discard the rest, so a chatty
/// program neither blocks on a full pipe nor grows the buffer.
fn drain<R>(reader: R, limit: u64) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let mut head = reader.take(limit);
        let _ = head.read_to_end(&mut buf).await;
        let mut rest = head.into_inner();
        let dropped = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await.unwrap_or(0);
        let mut text = String::from_utf8_lossy(&buf).into_owned();
        if dropped > 0 {
            text.push_str(&format!("\n[output truncated: {dropped} more bytes]"));
        }
        text
    })
}

async fn collect(handle: Option<JoinHandle<String>>) -> String {
    let Some(mut h) = handle else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_GRACE, &mut h).await {
        Ok(text) => text.unwrap_or_default(),
        Err(_) => {
            // A process outside the group still holds the pipe.
            h.abort();
            String::new()
        }
    }
}

#[async_trait]
impl ExecutionBackend for LocalSubprocess {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, program: &str) -> VerificationResult {
        match self.execute(program).await {
            Ok(run) if run.timed_out => {
                VerificationResult::failed(run.output(), SandboxFailure::Timeout { limit: self.settings.timeout })
            }
            Ok(run) if run.status.map_or(false, |s| s.success()) => VerificationResult::passed(run.output()),
            Ok(run) => VerificationResult::failed(run.output(), SandboxFailure::TestsFailed),
            Err(e) => {
                error!(target: "sandbox", python = %self.settings.python, error = %e, "Could not start interpreter");
                VerificationResult::failed(
                    "",
                    SandboxFailure::Backend { backend: "Subprocess".into(), detail: format!("({e})") },
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SecuritySettings, DEFAULT_MAX_PROCESSES, DEFAULT_OUTPUT_LIMIT_BYTES};
    use crate::sandbox::{Sandbox, Verifier};
    use crate::security::SecurityAnalyzer;
    use std::path::Path;
    use std::sync::Arc;

    fn python_available() -> bool {
        let ok = std::process::Command::new("python3")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if !ok {
            eprintln!("python3 not found; skipping local sandbox test");
        }
        ok
    }

    fn backend(timeout: Duration, dir: &Path) -> LocalSubprocess {
        LocalSubprocess::new(LocalSettings {
            python: "python3".into(),
            timeout,
            work_dir: Some(dir.to_path_buf()),
            max_processes: DEFAULT_MAX_PROCESSES,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        })
    }

    fn sandbox(backend: LocalSubprocess) -> Sandbox {
        Sandbox::new(SecurityAnalyzer::new(&SecuritySettings::default()), Arc::new(backend))
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn passing_check_with_scope() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let sb = sandbox(backend(Duration::from_secs(5), dir.path()));
        let result = sb.verify("x = 1", "def check(scope): assert scope['x'] == 1").await;
        assert!(result.passed, "{result:?}");
        assert_eq!(result.error, None);
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn failing_assertion_is_tests_failed() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let sb = sandbox(backend(Duration::from_secs(5), dir.path()));
        let result = sb.verify("x = 1", "def check(scope): assert scope['x'] == 2").await;
        assert!(!result.passed);
        assert_eq!(result.error_message().as_deref(), Some("Tests Failed"));
        assert!(result.output.contains("AssertionError"));
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn printed_success_text_does_not_pass() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let sb = sandbox(backend(Duration::from_secs(5), dir.path()));
        let result = sb
            .verify("print('All tests passed')", "def check(scope):\n    raise ValueError('nope')")
            .await;
        assert!(!result.passed);
        assert!(result.output.contains("All tests passed"));
    }

    /// Live (non-zombie) processes whose process group is `pgid`.
    #[cfg(target_os = "linux")]
    fn group_members(pgid: u32) -> Vec<u32> {
        let mut members = Vec::new();
        for entry in std::fs::read_dir("/proc").unwrap().flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else { continue };
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else { continue };
            let Some(close) = stat.rfind(')') else { continue };
            let fields: Vec<&str> = stat[close + 1..].split_whitespace().collect();
            let alive = !matches!(fields.first(), Some(&"Z") | Some(&"X"));
            if alive && fields.get(2) == Some(&pgid.to_string().as_str()) {
                members.push(pid);
            }
        }
        members
    }

    #[cfg(target_os = "linux")]
    async fn settled_group_members(pgid: u32) -> Vec<u32> {
        for _ in 0..40 {
            if group_members(pgid).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        group_members(pgid)
    }

    const FORK_THEN_SPIN: &str = "import os\nprint('started', flush=True)\ntry:\n    os.fork()\nexcept OSError:\n    pass\nwhile True:\n    pass\n";

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn infinite_loop_times_out_and_leaves_no_process() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let limit = Duration::from_secs(1);
        let local = backend(limit, dir.path());

        let started = Instant::now();
        let run = local.execute(FORK_THEN_SPIN).await.unwrap();
        assert!(run.timed_out);
        assert!(started.elapsed() < limit + Duration::from_secs(3));
        let pid = run.pid.expect("child pid");
        assert!(!Path::new(&format!("/proc/{pid}")).exists(), "process {pid} still present");
        assert_eq!(settled_group_members(pid).await, Vec::<u32>::new());
        assert!(dir_is_empty(dir.path()));

        let result = sandbox(backend(limit, dir.path())).verify("while True:\n    pass", "").await;
        assert!(!result.passed);
        assert_eq!(result.error_message().as_deref(), Some("Timeout (1s limit)"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn background_children_die_with_a_finished_run() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let local = backend(Duration::from_secs(5), dir.path());
        let program = "import os, time\ntry:\n    if os.fork() == 0:\n        time.sleep(30)\nexcept OSError:\n    pass\n";

        let started = Instant::now();
        let run = local.execute(program).await.unwrap();
        assert!(!run.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(settled_group_members(run.pid.expect("child pid")).await, Vec::<u32>::new());
    }

    #[tokio::test]
    async fn timed_out_run_keeps_partial_output() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let run = backend(Duration::from_secs(1), dir.path()).execute(FORK_THEN_SPIN).await.unwrap();
        assert!(run.timed_out);
        assert!(run.stdout.contains("started"), "{run:?}");
    }

    #[tokio::test]
    async fn output_is_capped_per_stream() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let local = LocalSubprocess::new(LocalSettings {
            output_limit_bytes: 1024,
            ..backend(Duration::from_secs(5), dir.path()).settings
        });
        let run = local.execute("print('x' * 100000)").await.unwrap();
        assert!(run.status.map_or(false, |s| s.success()));
        assert!(run.stdout.starts_with(&"x".repeat(1024)));
        assert!(run.stdout.len() < 2048, "kept {} bytes", run.stdout.len());
        assert!(run.stdout.contains("[output truncated: 98977 more bytes]"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_an_infrastructure_failure() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalSubprocess::new(LocalSettings {
            python: "/nonexistent/python-for-tests".into(),
            timeout: Duration::from_secs(1),
            work_dir: Some(dir.path().to_path_buf()),
            max_processes: DEFAULT_MAX_PROCESSES,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        });
        let result = local.run("print(1)").await;
        assert!(result.is_infrastructure_failure());
        assert!(result.error_message().unwrap().starts_with("Subprocess Error"));
        assert!(dir_is_empty(dir.path()));
    }
}
