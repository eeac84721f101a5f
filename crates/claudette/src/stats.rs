//! Usage statistics per model.
//!
//! The response loop only knows the [`StatsStore`] interface; the embedding
//! application decides where the numbers end up.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// One completed backend pass
#[derive(Debug, Clone, PartialEq)]
pub struct StatsEvent {
    pub model: String,
    pub thinking_tokens: u64,
    pub response_tokens: u64,
    pub elapsed: Duration,
    /// The pass rewrote a user message instead of answering it
    pub reprompting: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelStats {
    pub total_thinking_tokens: u64,
    pub total_response_tokens: u64,
    pub total_time_seconds: f64,
    pub total_requests: u64,
    pub reprompting_tokens: u64,
    pub reprompting_requests: u64,
    pub reprompting_time_seconds: f64,
}

impl ModelStats {
    pub fn apply(&mut self, event: &StatsEvent) {
        let seconds = event.elapsed.as_secs_f64();
        self.total_thinking_tokens += event.thinking_tokens;
        self.total_response_tokens += event.response_tokens;
        self.total_time_seconds += seconds;
        self.total_requests += 1;
        if event.reprompting {
            self.reprompting_tokens += event.response_tokens;
            self.reprompting_requests += 1;
            self.reprompting_time_seconds += seconds;
        }
    }

    /// Generated tokens per second over all requests
    pub fn tokens_per_second(&self) -> f64 {
        if self.total_time_seconds <= 0.0 {
            return 0.0;
        }
        (self.total_thinking_tokens + self.total_response_tokens) as f64 / self.total_time_seconds
    }
}

pub type StatsSnapshot = BTreeMap<String, ModelStats>;

pub trait StatsStore: Send + Sync {
    fn record(&self, event: &StatsEvent);

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot::new()
    }

    /// Forget one model, or everything when `model` is `None`
    fn reset(&self, _model: Option<&str>) {}
}

/// Discards everything
pub struct NoopStats;

impl StatsStore for NoopStats {
    fn record(&self, _event: &StatsEvent) {}
}

#[derive(Default)]
pub struct MemoryStatsStore {
    stats: Mutex<StatsSnapshot>,
}

impl MemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsStore for MemoryStatsStore {
    fn record(&self, event: &StatsEvent) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.entry(event.model.clone()).or_default().apply(event);
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn reset(&self, model: Option<&str>) {
        if let Ok(mut stats) = self.stats.lock() {
            match model {
                Some(model) => {
                    stats.remove(model);
                }
                None => stats.clear(),
            }
        }
    }
}

/// Aggregates kept in a YAML file keyed by model name, rewritten on every event
pub struct YamlStatsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl YamlStatsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StatsSnapshot> {
        if !self.path.exists() {
            return Ok(StatsSnapshot::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(StatsSnapshot::new());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    fn write(&self, stats: &StatsSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_yaml::to_string(stats)?)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn update<F: FnOnce(&mut StatsSnapshot)>(&self, change: F) {
        let _guard = self.lock.lock();
        let mut stats = match self.read() {
            Ok(stats) => stats,
            Err(error) => {
                tracing::warn!(%error, "stats file is unreadable, starting over");
                StatsSnapshot::new()
            }
        };
        change(&mut stats);
        if let Err(error) = self.write(&stats) {
            tracing::warn!(%error, "failed to write stats");
        }
    }
}

impl StatsStore for YamlStatsStore {
    fn record(&self, event: &StatsEvent) {
        self.update(|stats| stats.entry(event.model.clone()).or_default().apply(event));
    }

    fn snapshot(&self) -> StatsSnapshot {
        let _guard = self.lock.lock();
        self.read().unwrap_or_default()
    }

    fn reset(&self, model: Option<&str>) {
        self.update(|stats| match model {
            Some(model) => {
                stats.remove(model);
            }
            None => stats.clear(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(model: &str, reprompting: bool) -> StatsEvent {
        StatsEvent {
            model: model.to_string(),
            thinking_tokens: 10,
            response_tokens: 20,
            elapsed: Duration::from_millis(1500),
            reprompting,
        }
    }

    #[test]
    fn test_aggregation() {
        let store = MemoryStatsStore::new();
        store.record(&event("llama3.1", false));
        store.record(&event("llama3.1", true));

        let stats = &store.snapshot()["llama3.1"];
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_thinking_tokens, 20);
        assert_eq!(stats.total_response_tokens, 40);
        assert_eq!(stats.total_time_seconds, 3.0);
        assert_eq!(stats.reprompting_requests, 1);
        assert_eq!(stats.reprompting_tokens, 20);
        assert_eq!(stats.tokens_per_second(), 20.0);
    }

    #[test]
    fn test_yaml_store_persists_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/stats.yaml");

        let store = YamlStatsStore::new(&path);
        store.record(&event("llama3.1", false));
        store.record(&event("qwen3:8b", false));

        let reopened = YamlStatsStore::new(&path);
        let snapshot = reopened.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["qwen3:8b"].total_response_tokens, 20);

        reopened.reset(Some("qwen3:8b"));
        assert_eq!(store.snapshot().keys().collect::<Vec<_>>(), vec!["llama3.1"]);

        reopened.reset(None);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_yaml_store_reads_older_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.yaml");
        std::fs::write(
            &path,
            "llama3.1:\n  total_thinking_tokens: 5\n  total_response_tokens: 7\n  total_time_seconds: 1.5\n  total_requests: 1\n",
        )
        .unwrap();

        let store = YamlStatsStore::new(&path);
        store.record(&event("llama3.1", true));
        let stats = &store.snapshot()["llama3.1"];
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.reprompting_requests, 1);
    }
}
