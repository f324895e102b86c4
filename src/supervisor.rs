//! Process supervision.
//!
//! A `Supervisor` owns the runtime state of one service: the child spawned
//! under the located shell, the reader task draining its output, and the
//! service's output buffer. A run ends when the child exits, even if a
//! background descendant still holds its output open. `start` and `stop`
//! never wait for the child; they must be called from within a Tokio runtime
//! because they spawn tasks.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SupervisorError;
use crate::output::{decode_line, OutputBuffer, OutputLine, OutputSource, DEFAULT_MAX_LINES};
use crate::probe::LivenessProber;
use crate::registry::ServiceDefinition;
use crate::shell::{ShellLocation, ShellLocator};
use crate::translate::normalize_command;

// How often a reader checks whether its child has exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
// Once the child has exited, pipes held open by its descendants are read
// until they stay quiet this long.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Settings shared by the supervisors of one registry.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Output lines kept per service.
    pub max_lines: usize,
    /// Where to look for the shell on first use.
    pub locator: ShellLocator,
    /// Pre-resolved shell location; skips the locator when set.
    pub shell: Option<ShellLocation>,
    /// Fallback liveness check for untracked processes.
    pub prober: LivenessProber,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            locator: ShellLocator::default(),
            shell: None,
            prober: LivenessProber::default(),
        }
    }
}

/// Runtime state of one service. Cloning yields another handle to the same
/// service.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    definition: ServiceDefinition,
    locator: ShellLocator,
    shell: OnceLock<ShellLocation>,
    prober: LivenessProber,
    run: Mutex<RunState>,
    output: Mutex<OutputBuffer>,
}

// `tracked_running` implies `child` is set. `generation` identifies the
// current run so a reader from an earlier run cannot touch a newer one.
#[derive(Default)]
struct RunState {
    child: Option<Child>,
    tracked_running: bool,
    generation: u64,
    reader: Option<JoinHandle<()>>,
}

impl RunState {
    // The tracked child counts as alive until it is observed to exit.
    fn is_alive(&mut self) -> bool {
        if !self.tracked_running {
            return false;
        }
        matches!(self.child.as_mut().map(Child::try_wait), Some(Ok(None)))
    }
}

enum ExitPoll {
    Running,
    Exited(ExitStatus),
    // Stopped, or replaced by a newer run.
    Detached,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.name())
            .field("tracked_running", &lock(&self.inner.run).tracked_running)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(definition: ServiceDefinition, options: &SupervisorOptions) -> Self {
        let shell = OnceLock::new();
        if let Some(location) = options.shell.clone() {
            let _ = shell.set(location);
        }
        Self {
            inner: Arc::new(Inner {
                definition,
                locator: options.locator.clone(),
                shell,
                prober: options.prober.clone(),
                run: Mutex::new(RunState::default()),
                output: Mutex::new(OutputBuffer::new(options.max_lines)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.definition.name()
    }

    pub fn definition(&self) -> &ServiceDefinition {
        &self.inner.definition
    }

    /// Resolves the shell on first use and memoizes the result.
    pub fn shell(&self) -> &ShellLocation {
        self.inner.shell.get_or_init(|| {
            let location = self.inner.locator.locate();
            debug!(service = %self.name(), ?location, "resolved shell");
            location
        })
    }

    /// Process id of the tracked child, if any.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.inner.run).child.as_ref().and_then(Child::id)
    }

    /// Spawns the start command unless a tracked run is already alive.
    ///
    /// A missing shell or a spawn failure is written to the output buffer.
    pub fn start(&self) {
        let mut run = lock(&self.inner.run);
        if run.is_alive() {
            debug!(service = %self.name(), "already running, start ignored");
            return;
        }
        let Some(shell) = self.shell_path() else {
            return;
        };
        let command = normalize_command(self.inner.definition.start_command());
        let mut child = match spawn_service(&shell, &command) {
            Ok(child) => child,
            Err(source) => {
                self.diagnose(&SupervisorError::Spawn {
                    name: self.name().to_string(),
                    source,
                });
                return;
            }
        };
        info!(service = %self.name(), pid = child.id(), %command, "service started");

        let output = MergedOutput::new(&mut child);
        run.generation += 1;
        run.child = Some(child);
        run.tracked_running = true;
        if let Some(stale) = run.reader.take() {
            stale.abort();
        }
        let generation = run.generation;
        run.reader = Some(tokio::spawn(
            self.clone().read_output(generation, output),
        ));
    }

    /// Stops the service without waiting for it.
    ///
    /// The configured stop command runs on its own task; its handle is
    /// returned for callers that need to await completion. A tracked child is
    /// asked to terminate and tracking ends immediately.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let shell = self.shell_path()?;
        let stop_task = self.inner.definition.stop_command().map(|stop_command| {
            let command = normalize_command(stop_command);
            let supervisor = self.clone();
            tokio::spawn(async move { supervisor.run_stop_command(&shell, &command).await })
        });

        let child = {
            let mut run = lock(&self.inner.run);
            run.tracked_running = false;
            run.child.take()
        };
        if let Some(child) = child {
            self.terminate(child);
        }
        stop_task
    }

    /// Returns `true` if the tracked child is alive, or else if the host
    /// process table shows a process running the start command's executable.
    pub async fn is_running(&self) -> bool {
        if self.is_tracked_alive() {
            return true;
        }
        let supervisor = self.clone();
        tokio::task::spawn_blocking(move || {
            let inner = &supervisor.inner;
            inner
                .prober
                .is_running_by_command(inner.definition.start_command())
        })
        .await
        .unwrap_or(false)
    }

    /// Returns `true` while this supervisor tracks a child that has not been
    /// observed to exit.
    pub fn is_tracked_alive(&self) -> bool {
        lock(&self.inner.run).is_alive()
    }

    /// Retained output as newline-terminated text.
    pub fn output_text(&self) -> String {
        lock(&self.inner.output).text()
    }

    /// Retained output lines numbered `since` or later.
    pub fn output_since(&self, since: u64) -> Vec<OutputLine> {
        lock(&self.inner.output).since(since)
    }

    fn append(&self, text: impl Into<String>, source: OutputSource) {
        lock(&self.inner.output).push(text, source);
    }

    fn diagnose(&self, err: &SupervisorError) {
        warn!(service = %self.name(), error = %err, "service operation failed");
        self.append(err.diagnostic(), OutputSource::Supervisor);
    }

    fn shell_path(&self) -> Option<PathBuf> {
        match self.shell() {
            ShellLocation::Found(path) => Some(path.clone()),
            ShellLocation::NotFound => {
                self.diagnose(&SupervisorError::ShellNotFound {
                    searched: self.inner.locator.candidates().to_vec(),
                });
                None
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let run = lock(&self.inner.run);
        run.generation == generation && run.tracked_running
    }

    // Drains both child streams into the buffer, one whole line per append,
    // until the child has exited and its pipes are closed or quiet.
    async fn read_output(self, generation: u64, mut output: MergedOutput) {
        let mut exit_poll = tokio::time::interval(EXIT_POLL_INTERVAL);
        let mut exited: Option<ExitStatus> = None;
        let mut drain_until: Option<Instant> = None;

        loop {
            if exited.is_some() && output.is_closed() {
                break;
            }
            tokio::select! {
                (line, source) = output.next() => {
                    if !self.is_current(generation) {
                        debug!(service = %self.name(), "run no longer tracked, reader exiting");
                        return;
                    }
                    self.append(line, source);
                    if exited.is_some() {
                        drain_until = Some(Instant::now() + DRAIN_GRACE);
                    }
                }
                _ = exit_poll.tick(), if exited.is_none() => match self.poll_exit(generation) {
                    ExitPoll::Running => {}
                    ExitPoll::Exited(status) => {
                        exited = Some(status);
                        drain_until = Some(Instant::now() + DRAIN_GRACE);
                    }
                    ExitPoll::Detached => return,
                },
                _ = sleep_until(drain_until) => {
                    debug!(service = %self.name(), "output still held open after exit, detaching");
                    break;
                }
            }
        }
        if let Some(status) = exited {
            self.finish_run(generation, status);
        }
    }

    fn poll_exit(&self, generation: u64) -> ExitPoll {
        let mut run = lock(&self.inner.run);
        if run.generation != generation || !run.tracked_running {
            return ExitPoll::Detached;
        }
        match run.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => ExitPoll::Running,
            Some(Ok(Some(status))) => ExitPoll::Exited(status),
            Some(Err(err)) => {
                warn!(service = %self.name(), error = %err, "failed to poll service exit");
                ExitPoll::Detached
            }
            None => ExitPoll::Detached,
        }
    }

    fn finish_run(&self, generation: u64, status: ExitStatus) {
        {
            let mut run = lock(&self.inner.run);
            if run.generation != generation || !run.tracked_running {
                return;
            }
            run.tracked_running = false;
            run.reader = None;
            run.child = None;
        }
        info!(service = %self.name(), %status, "service exited");
        self.append(exit_note(status), OutputSource::Supervisor);
    }

    fn terminate(&self, mut child: Child) {
        if let Ok(Some(status)) = child.try_wait() {
            debug!(service = %self.name(), %status, "service already exited");
            return;
        }
        info!(service = %self.name(), pid = child.id(), "requesting termination");
        request_termination(&mut child);
        let name = self.name().to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(service = %name, %status, "terminated service reaped"),
                Err(err) => warn!(service = %name, error = %err, "failed to reap terminated service"),
            }
        });
    }

    // Stderr is folded into stdout by the shell so lines keep the order in
    // which the command wrote them.
    async fn run_stop_command(&self, shell: &Path, command: &str) {
        info!(service = %self.name(), %command, "running stop command");
        let mut stop = shell_command(shell, &format!("exec 2>&1\n{}", command));
        stop.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = match stop.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.diagnose(&SupervisorError::stop_command(err.to_string()));
                return;
            }
        };

        let mut output = MergedOutput::new(&mut child);
        let mut exited: Option<ExitStatus> = None;
        let mut drain_until: Option<Instant> = None;
        loop {
            if exited.is_some() && output.is_closed() {
                break;
            }
            tokio::select! {
                (line, _) = output.next() => {
                    self.append(line, OutputSource::StopCommand);
                    if exited.is_some() {
                        drain_until = Some(Instant::now() + DRAIN_GRACE);
                    }
                }
                status = child.wait(), if exited.is_none() => match status {
                    Ok(status) => {
                        exited = Some(status);
                        drain_until = Some(Instant::now() + DRAIN_GRACE);
                    }
                    Err(err) => {
                        self.diagnose(&SupervisorError::stop_command(err.to_string()));
                        return;
                    }
                },
                _ = sleep_until(drain_until) => break,
            }
        }

        if let Some(status) = exited.filter(|status| !status.success()) {
            self.diagnose(&SupervisorError::stop_command(format!(
                "command exited with {}",
                status
            )));
        }
    }
}

// Both pipes of a child read as one stream of whole lines.
struct MergedOutput {
    stdout: Option<Split<BufReader<ChildStdout>>>,
    stderr: Option<Split<BufReader<ChildStderr>>>,
}

impl MergedOutput {
    fn new(child: &mut Child) -> Self {
        Self {
            stdout: child.stdout.take().map(|stream| BufReader::new(stream).split(b'\n')),
            stderr: child.stderr.take().map(|stream| BufReader::new(stream).split(b'\n')),
        }
    }

    fn is_closed(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none()
    }

    // Pending forever once both pipes are closed. Cancel-safe.
    async fn next(&mut self) -> (String, OutputSource) {
        loop {
            tokio::select! {
                line = next_line(&mut self.stdout) => match line {
                    Some(line) => return (line, OutputSource::Stdout),
                    None => self.stdout = None,
                },
                line = next_line(&mut self.stderr) => match line {
                    Some(line) => return (line, OutputSource::Stderr),
                    None => self.stderr = None,
                },
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn exit_note(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("[svcman] process exited with code {}", code),
        None => "[svcman] process terminated by signal".to_string(),
    }
}

async fn next_line<R>(stream: &mut Option<Split<R>>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let Some(split) = stream.as_mut() else {
        return std::future::pending().await;
    };
    match split.next_segment().await {
        Ok(Some(bytes)) => Some(decode_line(&bytes)),
        Ok(None) => None,
        Err(err) => {
            debug!(error = %err, "output stream read failed");
            None
        }
    }
}

fn shell_command(shell: &Path, command: &str) -> Command {
    let mut cmd = Command::new(shell);
    cmd.arg("-c").arg(command).stdin(Stdio::null());
    cmd
}

fn spawn_service(shell: &Path, command: &str) -> std::io::Result<Child> {
    let mut cmd = shell_command(shell, command);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            let _ = libc::setpgid(0, 0);
            Ok(())
        });
    }

    cmd.spawn()
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let pid = pid as libc::pid_t;
    unsafe {
        let _ = libc::kill(-pid, libc::SIGTERM);
        let _ = libc::kill(pid, libc::SIGTERM);
    }
}

#[cfg(windows)]
fn request_termination(child: &mut Child) {
    use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
    let Some(pid) = child.id() else {
        return;
    };
    // Windows has no SIGTERM; CTRL_BREAK is the closest console signal we can emit.
    let delivered = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) } != 0;
    if !delivered {
        let _ = child.start_kill();
    }
}

#[cfg(not(any(unix, windows)))]
fn request_termination(child: &mut Child) {
    let _ = child.start_kill();
}
