//! Agent registry.
//!
//! An explicit value object handed to the components that need it; there
//! is no ambient global agent map anywhere in the system.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use memory_types::Category;

/// One registered agent and the categories it declares interest in.
///
/// Interest drives `CategoryShared` visibility: an agent sees
/// category-shared memories only for categories it registered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub agent_id: String,
    pub categories: Vec<Category>,
}

impl AgentProfile {
    pub fn new(agent_id: &str, categories: Vec<Category>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            categories,
        }
    }
}

/// Registry of known agents.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentProfile>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing any existing profile with the same id.
    pub fn register(&self, profile: AgentProfile) {
        info!(agent_id = %profile.agent_id, categories = profile.categories.len(), "Agent registered");
        self.agents
            .write()
            .unwrap()
            .insert(profile.agent_id.clone(), profile);
    }

    /// Remove an agent. Returns false if it was not registered.
    pub fn deregister(&self, agent_id: &str) -> bool {
        let removed = self.agents.write().unwrap().remove(agent_id).is_some();
        if removed {
            info!(agent_id, "Agent deregistered");
        }
        removed
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.read().unwrap().contains_key(agent_id)
    }

    /// Whether an agent declared interest in a category.
    pub fn is_interested(&self, agent_id: &str, category: Category) -> bool {
        self.agents
            .read()
            .unwrap()
            .get(agent_id)
            .is_some_and(|p| p.categories.contains(&category))
    }

    /// Ids of every registered agent.
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().unwrap().is_empty()
    }
}
