//! Liveness detection through the host process table.
//!
//! A supervisor's own child handle is not enough to tell whether a service is
//! up: the command may fork and exit, or an instance may have been started
//! before svcman ran. The prober extracts the executable a command refers to
//! and asks the host whether any process runs it.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

use crate::error::SupervisorError;
use crate::translate::{is_drive_rooted, to_native_path};

/// What to look for in the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessQuery {
    /// A process whose executable image is exactly this file.
    ExecutablePath(PathBuf),
    /// A process whose program name, without extension, is this.
    Name(String),
}

/// Read access to the host's live process list.
pub trait ProcessTable: Send + Sync {
    /// Returns `true` if at least one live process satisfies `query`.
    fn any_match(&self, query: &ProcessQuery) -> Result<bool, SupervisorError>;
}

/// Selects the process table implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeBackend {
    /// Enumerate processes in-process.
    Sysinfo,
    /// Ask PowerShell's `Get-Process`.
    #[serde(rename = "powershell")]
    PowerShell,
}

impl ProbeBackend {
    pub fn host_default() -> Self {
        if cfg!(windows) {
            ProbeBackend::PowerShell
        } else {
            ProbeBackend::Sysinfo
        }
    }

    pub fn table(self) -> Arc<dyn ProcessTable> {
        match self {
            ProbeBackend::Sysinfo => Arc::new(SysinfoTable),
            ProbeBackend::PowerShell => Arc::new(PowerShellTable::default()),
        }
    }
}

/// Process table backed by the `sysinfo` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoTable;

impl ProcessTable for SysinfoTable {
    fn any_match(&self, query: &ProcessQuery) -> Result<bool, SupervisorError> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );
        Ok(system
            .processes()
            .values()
            .any(|process| process_matches(query, process.name(), process.exe())))
    }
}

/// Process table backed by a PowerShell `Get-Process` query.
#[derive(Debug, Clone)]
pub struct PowerShellTable {
    program: String,
}

impl Default for PowerShellTable {
    fn default() -> Self {
        let program = if cfg!(windows) { "powershell" } else { "pwsh" };
        Self::new(program)
    }
}

impl PowerShellTable {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Builds the script for `query`, with every embedded value escaped.
    pub fn script(query: &ProcessQuery) -> String {
        match query {
            ProcessQuery::ExecutablePath(path) => {
                let path = escape_powershell_literal(&path.to_string_lossy());
                format!(
                    "Get-Process | Where-Object {{ $_.Path -eq '{}' }} | Select-Object -First 1",
                    path
                )
            }
            ProcessQuery::Name(name) => {
                let name = escape_powershell_literal(&escape_wildcards(name));
                format!(
                    "Get-Process -Name '{}' -ErrorAction SilentlyContinue | Select-Object -First 1",
                    name
                )
            }
        }
    }
}

impl ProcessTable for PowerShellTable {
    fn any_match(&self, query: &ProcessQuery) -> Result<bool, SupervisorError> {
        let mut command = std::process::Command::new(&self.program);
        command
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(Self::script(query))
            .stdin(std::process::Stdio::null());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            use windows_sys::Win32::System::Threading::CREATE_NO_WINDOW;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let output = command
            .output()
            .map_err(|err| SupervisorError::probe(format!("{}: {}", self.program, err)))?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }
}

/// Escapes a value for use inside a single-quoted PowerShell string.
///
/// PowerShell also treats the typographic single quotes as delimiters, so
/// those are doubled as well.
pub fn escape_powershell_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
            escaped.push(c);
        }
        escaped.push(c);
    }
    escaped
}

// `Get-Process -Name` takes a wildcard pattern.
fn escape_wildcards(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '`') {
            escaped.push('`');
        }
        escaped.push(c);
    }
    escaped
}

/// Resolves a service command to a process table query.
#[derive(Clone)]
pub struct LivenessProber {
    table: Arc<dyn ProcessTable>,
    drive_paths: bool,
}

impl Default for LivenessProber {
    fn default() -> Self {
        Self::new(ProbeBackend::host_default().table())
    }
}

impl std::fmt::Debug for LivenessProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessProber")
            .field("drive_paths", &self.drive_paths)
            .finish_non_exhaustive()
    }
}

impl LivenessProber {
    /// Creates a prober over `table`. Shell paths are converted to native
    /// form only on hosts with drive-rooted paths.
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self {
            table,
            drive_paths: cfg!(windows),
        }
    }

    pub fn with_drive_paths(mut self, drive_paths: bool) -> Self {
        self.drive_paths = drive_paths;
        self
    }

    /// Returns the query that identifies `cmd` in the process table.
    pub fn query_for(&self, cmd: &str) -> Option<ProcessQuery> {
        let exe = extract_executable(cmd, self.drive_paths)?;
        let path = Path::new(&exe);
        if path.is_absolute() && path.exists() {
            return Some(ProcessQuery::ExecutablePath(path.to_path_buf()));
        }
        bare_program_name(&exe).map(ProcessQuery::Name)
    }

    /// Returns `true` if a process running the executable of `cmd` exists.
    ///
    /// Query failures are logged and treated as "not running".
    pub fn is_running_by_command(&self, cmd: &str) -> bool {
        let Some(query) = self.query_for(cmd) else {
            return false;
        };
        match self.table.any_match(&query) {
            Ok(found) => found,
            Err(err) => {
                debug!(error = %err, ?query, "liveness probe failed");
                false
            }
        }
    }
}

/// Extracts the executable reference (first argument) from a command line.
///
/// Quoting is honoured; a command with unbalanced quotes falls back to plain
/// whitespace splitting. With `drive_paths` set, `/c/...` references are
/// converted to `C:\...`.
pub fn extract_executable(cmd: &str, drive_paths: bool) -> Option<String> {
    // Unquoted native paths carry backslashes that shell quoting would eat.
    let first = match cmd.split_whitespace().next() {
        Some(token) if is_drive_rooted(token) => token.to_string(),
        _ => match shell_words::split(cmd) {
            Ok(parts) => parts.into_iter().next(),
            Err(_) => cmd.split_whitespace().next().map(str::to_string),
        }?,
    };
    if first.is_empty() {
        return None;
    }
    if first.starts_with('/') {
        if drive_paths {
            return Some(to_native_path(&first));
        }
        return Some(first);
    }
    if is_drive_rooted(&first) {
        return Some(first.replace('/', "\\"));
    }
    Some(first)
}

/// Strips directories and extension from an executable reference.
pub fn bare_program_name(reference: &str) -> Option<String> {
    let base = reference
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(reference);
    let name = strip_extension(base);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

fn names_equal(a: &str, b: &str) -> bool {
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    if cfg!(windows) {
        a.to_string_lossy()
            .eq_ignore_ascii_case(&b.to_string_lossy())
    } else {
        a == b
    }
}

fn process_matches(query: &ProcessQuery, name: &OsStr, exe: Option<&Path>) -> bool {
    match query {
        ProcessQuery::ExecutablePath(path) => exe.is_some_and(|exe| paths_equal(exe, path)),
        ProcessQuery::Name(bare) => {
            let name = name.to_string_lossy();
            if names_equal(&name, bare) || names_equal(strip_extension(&name), bare) {
                return true;
            }
            exe.and_then(Path::file_stem)
                .is_some_and(|stem| names_equal(&stem.to_string_lossy(), bare))
        }
    }
}
