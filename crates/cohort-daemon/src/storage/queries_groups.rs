//! Session group queries.

use async_trait::async_trait;

use cohort_core::group::SessionGroup;

use super::db::{Database, DatabaseError};
use super::models::{GroupRow, GroupSessionRow};
use crate::orchestration::GroupRepository;

const UPSERT_GROUP_SQL: &str = r"
    INSERT INTO session_groups
        (id, name, slug, status, config, pause_reason, error, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        slug = excluded.slug,
        status = excluded.status,
        config = excluded.config,
        pause_reason = excluded.pause_reason,
        error = excluded.error,
        updated_at = excluded.updated_at
";

const INSERT_SESSION_SQL: &str = r"
    INSERT INTO group_sessions
        (group_id, id, position, project_path, prompt, depends_on, status,
         claude_session_id, cost_usd, error, created_at, started_at, completed_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

impl Database {
    async fn sessions_for_group(
        &self,
        group_id: &str,
    ) -> Result<Vec<GroupSessionRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, GroupSessionRow>(
            "SELECT * FROM group_sessions WHERE group_id = ? ORDER BY position ASC",
        )
        .bind(group_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl GroupRepository for Database {
    /// Upsert the group row and rewrite its sessions in one transaction.
    async fn save(&self, group: &SessionGroup) -> Result<(), DatabaseError> {
        let row = GroupRow::from_group(group)?;
        let sessions = group
            .sessions
            .iter()
            .enumerate()
            .map(|(position, session)| GroupSessionRow::from_session(&group.id, position, session))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool().begin().await?;

        sqlx::query(UPSERT_GROUP_SQL)
            .bind(&row.id)
            .bind(&row.name)
            .bind(&row.slug)
            .bind(&row.status)
            .bind(&row.config)
            .bind(&row.pause_reason)
            .bind(&row.error)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM group_sessions WHERE group_id = ?")
            .bind(&row.id)
            .execute(&mut *tx)
            .await?;

        for session in &sessions {
            sqlx::query(INSERT_SESSION_SQL)
                .bind(&session.group_id)
                .bind(&session.id)
                .bind(session.position)
                .bind(&session.project_path)
                .bind(&session.prompt)
                .bind(&session.depends_on)
                .bind(&session.status)
                .bind(&session.claude_session_id)
                .bind(session.cost_usd)
                .bind(&session.error)
                .bind(session.created_at)
                .bind(session.started_at)
                .bind(session.completed_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SessionGroup>, DatabaseError> {
        let Some(row) = sqlx::query_as::<_, GroupRow>("SELECT * FROM session_groups WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
        else {
            return Ok(None);
        };
        let sessions = self.sessions_for_group(&row.id).await?;
        row.into_group(sessions).map(Some)
    }

    async fn list(&self) -> Result<Vec<SessionGroup>, DatabaseError> {
        let rows = sqlx::query_as::<_, GroupRow>(
            "SELECT * FROM session_groups ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(self.pool())
        .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let sessions = self.sessions_for_group(&row.id).await?;
            groups.push(row.into_group(sessions)?);
        }
        Ok(groups)
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM session_groups WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use cohort_core::group::{
        BudgetAction, GroupConfig, GroupSession, GroupStatus, PauseReason, SessionStatus,
    };

    fn group(id: &str, slug: &str) -> SessionGroup {
        let mut group = SessionGroup::new(id, "Refactor", slug, GroupConfig::default());
        // Deliberately not alphabetical
        group.sessions = vec![
            GroupSession::new("zeta", "/repo", "first", vec![]),
            GroupSession::new("alpha", "/repo", "second", vec!["zeta".to_string()]),
            GroupSession::new(
                "mid",
                "/repo",
                "third",
                vec!["zeta".to_string(), "alpha".to_string()],
            ),
        ];
        group
    }

    #[tokio::test]
    async fn save_and_load_preserves_session_order() {
        let db = Database::open_in_memory().await.unwrap();
        let group = group("g1", "refactor");
        db.save(&group).await.unwrap();

        let loaded = db.find_by_id("g1").await.unwrap().unwrap();
        let ids: Vec<&str> = loaded.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
        assert_eq!(loaded.sessions[2].depends_on, vec!["zeta", "alpha"]);
        assert_eq!(loaded, group);
    }

    #[tokio::test]
    async fn save_overwrites_state() {
        let db = Database::open_in_memory().await.unwrap();
        let mut group = group("g1", "refactor");
        db.save(&group).await.unwrap();

        group.status = GroupStatus::Paused;
        group.pause_reason = Some(PauseReason::BudgetExceeded);
        group.config.budget.max_budget_usd = Some(2.0);
        group.config.budget.on_budget_exceeded = BudgetAction::Stop;
        group.sessions[0].status = SessionStatus::Completed;
        group.sessions[0].cost_usd = 1.25;
        group.sessions[0].claude_session_id = Some("c-1".to_string());
        group.sessions.pop();
        db.save(&group).await.unwrap();

        let loaded = db.find_by_id("g1").await.unwrap().unwrap();
        assert_eq!(loaded.status, GroupStatus::Paused);
        assert_eq!(loaded.pause_reason, Some(PauseReason::BudgetExceeded));
        assert_eq!(loaded.config.budget.on_budget_exceeded, BudgetAction::Stop);
        assert_eq!(loaded.sessions.len(), 2);
        assert_eq!(loaded.sessions[0].status, SessionStatus::Completed);
        assert!((loaded.sessions[0].cost_usd - 1.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn missing_group_is_none() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(db.find_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cascades_to_sessions() {
        let db = Database::open_in_memory().await.unwrap();
        db.save(&group("g1", "one")).await.unwrap();
        db.save(&group("g2", "two")).await.unwrap();

        assert!(db.delete("g1").await.unwrap());
        assert!(!db.delete("g1").await.unwrap());

        let remaining: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM group_sessions WHERE group_id = 'g1'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(remaining.0, 0);
        assert_eq!(db.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_is_oldest_first() {
        let db = Database::open_in_memory().await.unwrap();
        let mut newer = group("b", "newer");
        newer.created_at = 200;
        let mut older = group("a", "older");
        older.created_at = 100;
        db.save(&newer).await.unwrap();
        db.save(&older).await.unwrap();

        let ids: Vec<String> = db.list().await.unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
