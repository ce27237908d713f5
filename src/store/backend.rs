//! Backend abstraction
//!
//! The one seam every view talks through. Rows cross it as JSON objects;
//! [`BackendExt`] layers typed helpers on top for any [`Record`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::error::{StoreError, StoreResult};
use crate::model::{Filter, Notification, Query, Record, Table};
use crate::realtime::ChangeFeed;

/// Payload of the `create-notification` function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    /// Single recipient; absent means every staff member with a login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<String>,
}

impl NotificationRequest {
    pub fn broadcast(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn to_user(
        user_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::broadcast(title, message)
        }
    }

    pub fn related(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.related_entity_type = Some(entity_type.into());
        self.related_entity_id = Some(entity_id.into());
        self
    }
}

/// Result of the `create-notification` function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub success: bool,
    /// The created row, for single-recipient requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Notification>,
    /// Number of recipients, for broadcast requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

/// Row store with a change feed
#[async_trait]
pub trait Backend: Send + Sync {
    /// Rows matching the query, ordered and limited
    async fn select(&self, table: Table, query: &Query) -> StoreResult<Vec<Value>>;

    /// Insert rows, returning them with ids and timestamps filled in
    async fn insert(&self, table: Table, rows: Vec<Value>) -> StoreResult<Vec<Value>>;

    /// Merge `patch` into every row matching all filters; returns the new rows
    async fn update(&self, table: Table, filters: &[Filter], patch: Value)
        -> StoreResult<Vec<Value>>;

    /// Delete every row matching all filters; returns the removed rows
    async fn delete(&self, table: Table, filters: &[Filter]) -> StoreResult<Vec<Value>>;

    /// Invoke the notification fan-out function
    async fn create_notification(
        &self,
        request: NotificationRequest,
    ) -> StoreResult<NotificationOutcome>;

    /// Feed carrying this backend's row changes
    fn feed(&self) -> Arc<ChangeFeed>;
}

/// Typed helpers over any [`Backend`]
#[async_trait]
pub trait BackendExt: Backend {
    async fn fetch<T: Record>(&self, query: &Query) -> StoreResult<Vec<T>> {
        let rows = self.select(T::TABLE, query).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(StoreError::from))
            .collect()
    }

    async fn fetch_one<T: Record>(&self, id: &str) -> StoreResult<Option<T>> {
        let query = Query::new().eq("id", id).limit(1);
        let mut rows = self.fetch::<T>(&query).await?;
        Ok(rows.pop())
    }

    async fn insert_row<T: Record>(&self, row: &T) -> StoreResult<T> {
        let value = serde_json::to_value(row)?;
        let inserted = self.insert(T::TABLE, vec![value]).await?;
        let first = inserted
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidRequest("insert returned no rows".to_string()))?;
        Ok(serde_json::from_value(first)?)
    }

    async fn update_by_id<T: Record>(&self, id: &str, patch: Value) -> StoreResult<T> {
        let updated = self
            .update(T::TABLE, &[Filter::eq("id", id)], patch)
            .await?;
        let first = updated.into_iter().next().ok_or_else(|| StoreError::NotFound {
            table: T::TABLE,
            id: id.to_string(),
        })?;
        Ok(serde_json::from_value(first)?)
    }

    async fn delete_by_id<T: Record>(&self, id: &str) -> StoreResult<()> {
        self.delete(T::TABLE, &[Filter::eq("id", id)]).await?;
        Ok(())
    }
}

impl<B: Backend + ?Sized> BackendExt for B {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_request_wire_names() {
        let req = NotificationRequest::to_user("u1", "Bed ready", "Bed A1 is clean")
            .related("bed", "b1");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["relatedEntityType"], "bed");
        assert_eq!(json["relatedEntityId"], "b1");

        let parsed: NotificationRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert!(parsed.title.is_empty());
        assert!(parsed.user_id.is_none());
    }

    #[test]
    fn test_outcome_omits_absent_fields() {
        let outcome = NotificationOutcome {
            success: true,
            data: None,
            count: Some(3),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"success":true,"count":3}"#);
    }
}
