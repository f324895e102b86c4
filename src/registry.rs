//! Service definitions and the line-oriented definition file.
//!
//! ```text
//! # name;command
//! mysql;C:\Workdir\bin\mysql_start --port 3306
//! _mysql;C:\Workdir\bin\mysql_stop
//! ```
//!
//! Blank lines and `#` comments are ignored. Each entry is split at the first
//! `;`. In the stop-aware dialect a leading `_` marks the stop command of the
//! service named by the rest of the entry name.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

const STOP_PREFIX: char = '_';

/// How entry names are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// `_name` entries set the stop command of `name`.
    #[default]
    StopAware,
    /// Every entry is a start command.
    Plain,
}

/// An immutable service record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    name: String,
    start_command: String,
    stop_command: Option<String>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, start_command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_command: start_command.into(),
            stop_command: None,
        }
    }

    pub fn with_stop_command(mut self, stop_command: impl Into<String>) -> Self {
        self.stop_command = Some(stop_command.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_command(&self) -> &str {
        &self.start_command
    }

    pub fn stop_command(&self) -> Option<&str> {
        self.stop_command.as_deref()
    }
}

/// Ordered collection of service definitions, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRegistry {
    services: Vec<ServiceDefinition>,
}

impl ServiceRegistry {
    /// Parses definition text.
    ///
    /// Duplicate names keep their first position and take the last command.
    /// Stop commands naming an unknown service are dropped.
    pub fn parse(text: &str, dialect: Dialect) -> Self {
        let mut services: Vec<ServiceDefinition> = Vec::new();
        let mut stop_commands: Vec<(String, String)> = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let Some((name, cmd)) = parse_entry(line) else {
                continue;
            };
            let stop_target = match dialect {
                Dialect::StopAware => name.strip_prefix(STOP_PREFIX).map(str::trim),
                Dialect::Plain => None,
            };
            if let Some(target) = stop_target {
                if target.is_empty() {
                    warn!(line = line_no + 1, "stop command without a service name");
                    continue;
                }
                match stop_commands.iter_mut().find(|(n, _)| n == target) {
                    Some(entry) => entry.1 = cmd.to_string(),
                    None => stop_commands.push((target.to_string(), cmd.to_string())),
                }
                continue;
            }
            match services.iter_mut().find(|s| s.name == name) {
                Some(existing) => existing.start_command = cmd.to_string(),
                None => services.push(ServiceDefinition::new(name, cmd)),
            }
        }

        for (target, cmd) in stop_commands {
            match services.iter_mut().find(|s| s.name == target) {
                Some(service) => service.stop_command = Some(cmd),
                None => warn!(service = %target, "stop command for unknown service ignored"),
            }
        }

        Self { services }
    }

    /// Reads and parses a definition file. A missing file yields an empty
    /// registry.
    pub fn load(path: &Path, dialect: Dialect) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "service definition file not found");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read service definitions {}", path.display()))?;
        Ok(Self::parse(&raw, dialect))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.iter()
    }
}

impl IntoIterator for ServiceRegistry {
    type Item = ServiceDefinition;
    type IntoIter = std::vec::IntoIter<ServiceDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.services.into_iter()
    }
}

// Returns the trimmed (name, command) pair of a definition line.
fn parse_entry(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (name, cmd) = line.split_once(';')?;
    let (name, cmd) = (name.trim(), cmd.trim());
    if name.is_empty() || cmd.is_empty() {
        return None;
    }
    Some((name, cmd))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITIONS: &str = r"
# databases
mysql ; C:\Workdir\bin\mysql_start --port 3306
_mysql;C:\Workdir\bin\mysql_stop

redis;redis-server --save ''
no separator here
;missing name
empty;
web;npm run dev; echo done
";

    #[test]
    fn parses_services_and_stop_commands() {
        let registry = ServiceRegistry::parse(DEFINITIONS, Dialect::StopAware);
        let names = registry.iter().map(|s| s.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["mysql", "redis", "web"]);

        let mysql = registry.get("mysql").unwrap();
        assert_eq!(mysql.start_command(), r"C:\Workdir\bin\mysql_start --port 3306");
        assert_eq!(mysql.stop_command(), Some(r"C:\Workdir\bin\mysql_stop"));
        assert_eq!(registry.get("redis").unwrap().stop_command(), None);
        assert_eq!(registry.get("web").unwrap().start_command(), "npm run dev; echo done");
    }

    #[test]
    fn plain_dialect_treats_every_entry_as_a_service() {
        let registry = ServiceRegistry::parse(DEFINITIONS, Dialect::Plain);
        assert_eq!(registry.len(), 4);
        assert_eq!(
            registry.get("_mysql").unwrap().start_command(),
            r"C:\Workdir\bin\mysql_stop"
        );
        assert!(registry.iter().all(|s| s.stop_command().is_none()));
    }

    #[test]
    fn stop_command_may_precede_its_service() {
        let registry = ServiceRegistry::parse("_ api ;kill-api\napi;run-api\n_ghost;noop\n_;x", Dialect::StopAware);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("api").unwrap().stop_command(), Some("kill-api"));
    }

    #[test]
    fn duplicates_keep_position_and_take_last_command() {
        let registry = ServiceRegistry::parse("a;one\nb;two\na;three", Dialect::StopAware);
        let pairs = registry
            .iter()
            .map(|s| (s.name(), s.start_command()))
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![("a", "three"), ("b", "two")]);
    }

    #[test]
    fn load_reads_file_and_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.txt");
        assert!(ServiceRegistry::load(&path, Dialect::StopAware).unwrap().is_empty());

        std::fs::write(&path, "svc;sleep 1\n").unwrap();
        let registry = ServiceRegistry::load(&path, Dialect::StopAware).unwrap();
        assert_eq!(registry.get("svc").unwrap().start_command(), "sleep 1");
    }
}
