//! Line-oriented rendering of supervisor state for the `run` loop.

use svcman::output::sanitize_text;
use svcman::Supervisor;

/// Remembers what has already been printed for each supervisor.
pub struct ConsoleView {
    entries: Vec<ViewEntry>,
    name_width: usize,
    strip_ansi: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct ViewEntry {
    running: Option<bool>,
    next_seq: u64,
}

impl ConsoleView {
    pub fn new(supervisors: &[Supervisor], strip_ansi: bool) -> Self {
        Self {
            entries: vec![ViewEntry::default(); supervisors.len()],
            name_width: name_width(supervisors),
            strip_ansi,
        }
    }

    /// Collects output appended since the last poll and status changes.
    pub async fn poll(&mut self, supervisors: &[Supervisor]) -> Vec<String> {
        let mut lines = Vec::new();
        for (entry, supervisor) in self.entries.iter_mut().zip(supervisors) {
            let name = supervisor.name();
            let pending = supervisor.output_since(entry.next_seq);
            if let Some(first) = pending.first() {
                if first.seq > entry.next_seq {
                    let dropped = first.seq - entry.next_seq;
                    lines.push(format_tool_message(&format!(
                        "{}: {} lines dropped",
                        name, dropped
                    )));
                }
            }
            for line in pending {
                entry.next_seq = line.seq + 1;
                lines.push(format_output_line(
                    name,
                    &line.text,
                    self.name_width,
                    self.strip_ansi,
                ));
            }

            let running = supervisor.is_running().await;
            if entry.running != Some(running) {
                entry.running = Some(running);
                lines.push(format_status_line(name, running));
            }
        }
        lines
    }

    /// Prints the retained output of one service.
    pub fn dump(&self, supervisor: &Supervisor) -> Vec<String> {
        supervisor
            .output_text()
            .lines()
            .map(|line| format_output_line(supervisor.name(), line, self.name_width, self.strip_ansi))
            .collect()
    }
}

pub async fn status_table(supervisors: &[Supervisor]) -> Vec<String> {
    let width = name_width(supervisors);
    let mut lines = Vec::with_capacity(supervisors.len());
    for supervisor in supervisors {
        let running = supervisor.is_running().await;
        lines.push(format!(
            "{:<width$}  {}",
            supervisor.name(),
            status_label(running),
            width = width
        ));
    }
    lines
}

pub fn status_label(running: bool) -> &'static str {
    if running {
        "Running"
    } else {
        "Stopped"
    }
}

pub fn format_status_line(name: &str, running: bool) -> String {
    format_tool_message(&format!("{}: {}", name, status_label(running)))
}

pub fn format_output_line(name: &str, text: &str, width: usize, strip_ansi: bool) -> String {
    format!(
        "[{:<width$}] {}",
        name,
        sanitize_text(text, strip_ansi),
        width = width
    )
}

pub fn format_tool_message(text: &str) -> String {
    format!("[svcman] {}", text)
}

fn name_width(supervisors: &[Supervisor]) -> usize {
    supervisors
        .iter()
        .map(|s| s.name().chars().count())
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use svcman::error::SupervisorError;
    use svcman::probe::{LivenessProber, ProcessQuery, ProcessTable};
    use svcman::shell::ShellLocation;
    use svcman::{ServiceDefinition, SupervisorOptions};

    struct EmptyTable;

    impl ProcessTable for EmptyTable {
        fn any_match(&self, _query: &ProcessQuery) -> Result<bool, SupervisorError> {
            Ok(false)
        }
    }

    fn supervisor(name: &str) -> Supervisor {
        let options = SupervisorOptions {
            shell: Some(ShellLocation::NotFound),
            prober: LivenessProber::new(Arc::new(EmptyTable)),
            ..SupervisorOptions::default()
        };
        Supervisor::new(ServiceDefinition::new(name, "sleep 5"), &options)
    }

    #[test]
    fn pads_output_prefix() {
        assert_eq!(format_output_line("db", "ready", 5, false), "[db   ] ready");
        assert_eq!(
            format_output_line("db", "\x1b[32mok\x1b[0m", 2, true),
            "[db] ok"
        );
        assert_eq!(format_status_line("web", true), "[svcman] web: Running");
    }

    #[tokio::test]
    async fn poll_reports_changes_once() {
        let supervisors = vec![supervisor("api"), supervisor("worker")];
        let mut view = ConsoleView::new(&supervisors, false);

        let first = view.poll(&supervisors).await;
        assert_eq!(
            first,
            vec!["[svcman] api: Stopped", "[svcman] worker: Stopped"]
        );

        supervisors[0].start();
        let second = view.poll(&supervisors).await;
        assert_eq!(second.len(), 1);
        assert!(second[0].starts_with("[api   ] [ERROR] POSIX shell not found"));

        assert!(view.poll(&supervisors).await.is_empty());
    }

    #[tokio::test]
    async fn status_table_aligns_names() {
        let supervisors = vec![supervisor("a"), supervisor("longer")];
        let lines = status_table(&supervisors).await;
        assert_eq!(lines, vec!["a       Stopped", "longer  Stopped"]);
    }
}
