//! Durable storage for session groups.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use cohort_core::db::DatabaseError;
use cohort_core::group::SessionGroup;

/// Persistence for [`SessionGroup`]s. The stored group is the source of truth
/// whenever a run (re)starts or resumes.
#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// Insert or replace the group, including all of its sessions.
    async fn save(&self, group: &SessionGroup) -> Result<(), DatabaseError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<SessionGroup>, DatabaseError>;

    /// All groups, oldest first.
    async fn list(&self) -> Result<Vec<SessionGroup>, DatabaseError>;

    /// Returns `true` when a group was removed.
    async fn delete(&self, id: &str) -> Result<bool, DatabaseError>;
}

/// Process-local repository, mainly for tests and dry runs.
#[derive(Default)]
pub struct InMemoryGroupRepository {
    groups: RwLock<HashMap<String, SessionGroup>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn save(&self, group: &SessionGroup) -> Result<(), DatabaseError> {
        self.groups
            .write()
            .await
            .insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SessionGroup>, DatabaseError> {
        Ok(self.groups.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionGroup>, DatabaseError> {
        let mut groups: Vec<SessionGroup> = self.groups.read().await.values().cloned().collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        Ok(self.groups.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use cohort_core::group::{GroupConfig, GroupSession};

    #[tokio::test]
    async fn save_find_delete() {
        let repo = InMemoryGroupRepository::new();
        let mut group = SessionGroup::new("g-1", "G", "g", GroupConfig::default());
        group
            .sessions
            .push(GroupSession::new("a", "/tmp", "p", vec![]));
        repo.save(&group).await.unwrap();

        let found = repo.find_by_id("g-1").await.unwrap().unwrap();
        assert_eq!(found, group);
        assert!(repo.find_by_id("missing").await.unwrap().is_none());

        assert!(repo.delete("g-1").await.unwrap());
        assert!(!repo.delete("g-1").await.unwrap());
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let repo = InMemoryGroupRepository::new();
        let mut older = SessionGroup::new("b", "B", "b", GroupConfig::default());
        older.created_at = 1;
        let mut newer = SessionGroup::new("a", "A", "a", GroupConfig::default());
        newer.created_at = 2;
        repo.save(&newer).await.unwrap();
        repo.save(&older).await.unwrap();

        let ids: Vec<String> = repo.list().await.unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
