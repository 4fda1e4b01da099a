//! Memory record and sharing policy types.
//!
//! A memory is exclusively owned by its creating agent unless its sharing
//! policy grants wider access. The `memory_id` is immutable once assigned;
//! content changes always go through the engine's mutation paths so the
//! undo ledger can capture before/after state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::Category;

/// Access-control rule governing which agents may see a memory.
///
/// The default is `Private`. Widening transitions are explicit operations
/// and are logged by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SharingPolicy {
    /// Visible to the owning agent only (default)
    #[default]
    Private,
    /// Visible to every registered agent
    Shared,
    /// Visible to registered agents interested in the memory's category
    CategoryShared,
    /// Visible to the owner plus an explicit allow-list
    Custom { agent_ids: Vec<String> },
}

impl SharingPolicy {
    /// Evaluate whether `viewer` may see a memory owned by `owner`.
    ///
    /// Registry facts (`viewer_registered`, `viewer_interested`) are
    /// supplied by the caller so this stays a pure function; the agent
    /// registry itself lives in memory-sync.
    pub fn allows(
        &self,
        owner: &str,
        viewer: &str,
        viewer_registered: bool,
        viewer_interested: bool,
    ) -> bool {
        if viewer == owner {
            return true;
        }
        match self {
            SharingPolicy::Private => false,
            SharingPolicy::Shared => viewer_registered,
            SharingPolicy::CategoryShared => viewer_registered && viewer_interested,
            SharingPolicy::Custom { agent_ids } => agent_ids.iter().any(|id| id == viewer),
        }
    }

    /// Whether switching from `previous` to `self` grants access to agents
    /// that did not have it before. Used to decide which transitions must
    /// be logged as widenings.
    pub fn widens(&self, previous: &SharingPolicy) -> bool {
        fn rank(policy: &SharingPolicy) -> u8 {
            match policy {
                SharingPolicy::Private => 0,
                SharingPolicy::Custom { .. } => 1,
                SharingPolicy::CategoryShared => 2,
                SharingPolicy::Shared => 3,
            }
        }

        match (previous, self) {
            // A grown allow-list widens even though the rank is unchanged.
            (SharingPolicy::Custom { agent_ids: old }, SharingPolicy::Custom { agent_ids: new }) => {
                new.iter().any(|id| !old.contains(id))
            }
            _ => rank(self) > rank(previous),
        }
    }
}

/// Content appended to a memory by a merge decision.
///
/// Merges never rewrite the target's own content; the incoming near-duplicate
/// is kept verbatim alongside its source agent and merge time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedContent {
    /// The merged-in content, verbatim
    pub content: String,
    /// Agent that submitted the near-duplicate
    pub agent_id: String,
    /// When the merge was applied
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub merged_at: DateTime<Utc>,
}

/// A stored unit of content with metadata, owned by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier (ULID string), immutable once assigned
    pub memory_id: String,

    /// Owning agent
    pub agent_id: String,

    /// Free-text content
    pub content: String,

    /// Optional vector embedding supplied by the caller
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,

    /// Validated category tag
    pub category: Category,

    /// Free-form concept tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Access-control rule (default: private)
    #[serde(default)]
    pub sharing: SharingPolicy,

    /// Memory ids this record was flagged as related to (near-duplicates
    /// below the merge threshold)
    #[serde(default)]
    pub related_to: Vec<String>,

    /// Append-only annex of merged-in near-duplicates
    #[serde(default)]
    pub merges: Vec<MergedContent>,

    /// Creation time
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// Last mutation time
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,

    /// Optional expiry; expired memories are removed by the TTL sweep
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// Create a new memory with the given identity and content.
    pub fn new(
        memory_id: String,
        agent_id: String,
        content: String,
        category: Category,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            memory_id,
            agent_id,
            content,
            embedding: None,
            category,
            tags: Vec::new(),
            sharing: SharingPolicy::default(),
            related_to: Vec::new(),
            merges: Vec::new(),
            created_at,
            updated_at: created_at,
            expires_at: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_sharing(mut self, sharing: SharingPolicy) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether this memory has passed its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
