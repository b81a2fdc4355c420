//! Command usage statistics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::interpreter::context::ActorId;

/// Usage counters for one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStats {
    /// Completed runs, successful or not
    pub invocations: u64,
    /// Runs whose script failed
    pub failures: u64,
    /// When the command last ran
    pub last_used: Option<DateTime<Utc>>,
    /// Who ran it last
    pub last_actor: Option<ActorId>,
}

/// Counters for every command that has run.
#[derive(Debug, Default)]
pub struct UsageStats {
    commands: Mutex<HashMap<String, CommandStats>>,
}

impl UsageStats {
    /// Empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed run.
    pub fn record(&self, command: &str, actor: &ActorId, success: bool) {
        let mut commands = self.commands.lock();
        let stats = commands.entry(command.to_string()).or_default();
        stats.invocations += 1;
        if !success {
            stats.failures += 1;
        }
        stats.last_used = Some(Utc::now());
        stats.last_actor = Some(actor.clone());
    }

    /// Counters for one command.
    pub fn get(&self, command: &str) -> Option<CommandStats> {
        self.commands.lock().get(command).cloned()
    }

    /// All counters, sorted by command name.
    pub fn snapshot(&self) -> BTreeMap<String, CommandStats> {
        self.commands
            .lock()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_runs_and_failures() {
        let stats = UsageStats::new();
        stats.record("ping", &ActorId::new("a"), true);
        stats.record("ping", &ActorId::new("b"), false);

        let ping = stats.get("ping").unwrap();
        assert_eq!(ping.invocations, 2);
        assert_eq!(ping.failures, 1);
        assert_eq!(ping.last_actor, Some(ActorId::new("b")));
        assert!(ping.last_used.is_some());
        assert!(stats.get("pong").is_none());
        assert_eq!(stats.snapshot().len(), 1);
    }
}
