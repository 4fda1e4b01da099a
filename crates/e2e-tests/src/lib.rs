//! End-to-end test harness for memory-mesh.
//!
//! Builds a full engine over temporary storage with test-friendly
//! timings (short publish timeout, small channels) and registers a
//! default set of agents.

use std::sync::Arc;

use tempfile::TempDir;

use memory_engine::MemoryEngine;
use memory_sync::AgentProfile;
use memory_types::{Category, PublisherConfig, Settings};

/// A fully wired engine over temp storage.
///
/// The temp directory is owned by the harness; storage lives until the
/// harness is dropped.
pub struct TestHarness {
    pub engine: Arc<MemoryEngine>,
    pub settings: Settings,
    _temp: TempDir,
}

impl TestHarness {
    /// Engine with test timings and the default agents (claude, copilot,
    /// gemini) registered. claude and copilot declare interest in facts;
    /// gemini in decisions.
    pub fn new() -> Self {
        let settings = Settings {
            publisher: PublisherConfig {
                channel_capacity: 8,
                publish_timeout_ms: 5,
            },
            ..Default::default()
        };
        Self::with_settings(settings)
    }

    /// Engine over temp storage with the given settings.
    pub fn with_settings(mut settings: Settings) -> Self {
        let temp = TempDir::new().unwrap();
        settings.db_path = temp.path().to_string_lossy().to_string();

        let engine = Arc::new(MemoryEngine::open(&settings).unwrap());
        engine.register_agent(AgentProfile::new("claude", vec![Category::Facts]));
        engine.register_agent(AgentProfile::new("copilot", vec![Category::Facts]));
        engine.register_agent(AgentProfile::new("gemini", vec![Category::Decisions]));

        Self {
            engine,
            settings,
            _temp: temp,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until `predicate` holds or the deadline passes.
///
/// Event delivery and view reconciliation are asynchronous; tests poll
/// rather than sleeping a fixed amount.
pub async fn wait_for<F>(mut predicate: F, deadline_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(deadline_ms);
    loop {
        if predicate() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
