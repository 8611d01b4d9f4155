//! Destination for learnings.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{NudgeError, NudgeResult};
use crate::learning::Learning;

/// External store that keeps an agent's learnings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LearningStore: Send + Sync {
    /// Persist one learning for an agent.
    async fn add_learning(&self, agent_id: &str, learning: Learning) -> NudgeResult<()>;
}

/// Learning store that keeps everything in memory.
#[derive(Default)]
pub struct InMemoryLearningStore {
    learnings: RwLock<HashMap<String, Vec<Learning>>>,
}

impl InMemoryLearningStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learnings of one agent, oldest first.
    pub async fn learnings(&self, agent_id: &str) -> Vec<Learning> {
        self.learnings
            .read()
            .await
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.learnings.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl LearningStore for InMemoryLearningStore {
    async fn add_learning(&self, agent_id: &str, learning: Learning) -> NudgeResult<()> {
        if agent_id.trim().is_empty() {
            return Err(NudgeError::missing_field("agent_id"));
        }
        debug!(
            agent_id,
            outcome_type = %learning.outcome_type,
            confidence = learning.confidence,
            "Storing learning"
        );
        self.learnings
            .write()
            .await
            .entry(agent_id.to_string())
            .or_default()
            .push(learning);
        Ok(())
    }
}
