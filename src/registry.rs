//! Task registry: durable work id ↔ {task id, tag} mapping.
//!
//! Records are written once when the scheduler accepts a job and read by
//! the event multiplexer and every status query, including after a cold
//! start.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::{Database, WorkRecord};

/// Caller-visible identity of a piece of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub task_id: Option<String>,
    pub tag: Option<String>,
}

/// Durable mapping from scheduler work ids to caller task ids and tags.
#[derive(Clone)]
pub struct TaskRegistry {
    store: Arc<dyn Database>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self { store }
    }

    /// Upsert the record for `work_id`, replacing any previous one.
    pub async fn record_task(
        &self,
        work_id: Uuid,
        task_id: &str,
        tag: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.store.record_task(work_id, task_id, tag).await
    }

    /// `None` when neither a task id nor a tag is known for `work_id`.
    pub async fn lookup_by_work_id(&self, work_id: Uuid) -> Result<Option<TaskInfo>, DatabaseError> {
        let task_id = self.store.get_task_id(work_id).await?;
        let tag = self.store.get_task_tag(work_id).await?;
        if task_id.is_none() && tag.is_none() {
            return Ok(None);
        }
        Ok(Some(TaskInfo { task_id, tag }))
    }

    pub async fn lookup_task_id(&self, work_id: Uuid) -> Result<Option<String>, DatabaseError> {
        self.store.get_task_id(work_id).await
    }

    /// Most recently recorded work id for `task_id`.
    pub async fn lookup_work_id(&self, task_id: &str) -> Result<Option<Uuid>, DatabaseError> {
        self.store.find_latest_work_id(task_id).await
    }

    /// Drop the record for `work_id`.
    pub async fn forget(&self, work_id: Uuid) -> Result<bool, DatabaseError> {
        self.store.forget_task(work_id).await
    }

    /// Every record in insertion order.
    pub async fn records(&self) -> Result<Vec<WorkRecord>, DatabaseError> {
        self.store.list_task_records().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn registry() -> TaskRegistry {
        TaskRegistry::new(Arc::new(LibSqlBackend::new_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn lookup_after_record() {
        let reg = registry().await;
        let w = Uuid::new_v4();
        reg.record_task(w, "t1", Some("tagA")).await.unwrap();

        assert_eq!(
            reg.lookup_by_work_id(w).await.unwrap(),
            Some(TaskInfo {
                task_id: Some("t1".into()),
                tag: Some("tagA".into())
            })
        );
        assert_eq!(reg.lookup_task_id(w).await.unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn unknown_work_is_absent() {
        let reg = registry().await;
        assert!(reg.lookup_by_work_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resubmission_resolves_to_later_work_id() {
        let reg = registry().await;
        let earlier = Uuid::new_v4();
        let later = Uuid::new_v4();
        reg.record_task(earlier, "t1", None).await.unwrap();
        reg.record_task(later, "t1", None).await.unwrap();

        assert_eq!(reg.lookup_work_id("t1").await.unwrap(), Some(later));
        let records = reg.records().await.unwrap();
        assert_eq!(records[0].work_id, earlier);
        assert_eq!(records[1].work_id, later);
    }

    #[tokio::test]
    async fn forget_makes_work_unattributable() {
        let reg = registry().await;
        let w = Uuid::new_v4();
        reg.record_task(w, "t1", None).await.unwrap();
        assert!(reg.forget(w).await.unwrap());
        assert!(reg.lookup_by_work_id(w).await.unwrap().is_none());
    }
}
