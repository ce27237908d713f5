//! Notification fan-out
//!
//! Server-side body of the `create-notification` function. A request with
//! a `userId` creates one notification and returns it; a request without
//! one notifies every staff member that has a login, in sequential
//! batches. A failed batch is logged and skipped so one bad batch never
//! blocks the rest.

use serde_json::Value;

use crate::model::{Filter, Notification, Query, Staff, Table};
use crate::store::{
    Backend, BackendExt, NotificationOutcome, NotificationRequest, StoreError, StoreResult,
};

/// Rows per insert when broadcasting
pub const BATCH_SIZE: usize = 10;

fn build(request: &NotificationRequest, user_id: &str) -> Notification {
    let mut notification = Notification::new(user_id, &request.title, &request.message);
    notification.related_entity_type = request.related_entity_type.clone();
    notification.related_entity_id = request.related_entity_id.clone();
    notification
}

pub async fn fan_out<B: Backend + ?Sized>(
    backend: &B,
    request: NotificationRequest,
) -> StoreResult<NotificationOutcome> {
    if request.title.trim().is_empty() || request.message.trim().is_empty() {
        return Err(StoreError::InvalidRequest(
            "Missing required fields".to_string(),
        ));
    }

    if let Some(user_id) = request.user_id.as_deref().filter(|u| !u.is_empty()) {
        let created = backend.insert_row(&build(&request, user_id)).await?;
        tracing::info!(user_id = %user_id, notification_id = %created.id, "Notification created");
        return Ok(NotificationOutcome {
            success: true,
            data: Some(created),
            count: None,
        });
    }

    let staff: Vec<Staff> = backend
        .fetch(&Query::new().filter(Filter::not_null("user_id")))
        .await?;
    let recipients: Vec<&str> = staff.iter().filter_map(|s| s.user_id.as_deref()).collect();

    for (index, batch) in recipients.chunks(BATCH_SIZE).enumerate() {
        let rows = batch
            .iter()
            .map(|user_id| serde_json::to_value(build(&request, user_id)))
            .collect::<Result<Vec<Value>, _>>()?;

        if let Err(e) = backend.insert(Table::Notifications, rows).await {
            tracing::error!(batch = index, size = batch.len(), error = %e, "Notification batch failed");
        }
    }

    tracing::info!(recipients = recipients.len(), "Broadcast notification created");
    Ok(NotificationOutcome {
        success: true,
        data: None,
        count: Some(recipients.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StaffRole;
    use crate::realtime::ChangeFeed;
    use crate::store::SqliteStore;
    use std::sync::Arc;

    async fn store_with_staff(with_login: usize, without_login: usize) -> SqliteStore {
        let store = SqliteStore::in_memory(Arc::new(ChangeFeed::default())).unwrap();
        for i in 0..with_login {
            store
                .insert_row(&Staff::new(format!("Nurse {}", i), StaffRole::Nurse).user(format!("u{}", i)))
                .await
                .unwrap();
        }
        for i in 0..without_login {
            store
                .insert_row(&Staff::new(format!("Porter {}", i), StaffRole::Other))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_missing_title_rejected() {
        let store = store_with_staff(1, 0).await;
        let err = store
            .create_notification(NotificationRequest::broadcast("", "body"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)));
        assert_eq!(store.count(Table::Notifications).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_single_recipient_returns_row() {
        let store = store_with_staff(0, 0).await;
        let outcome = store
            .create_notification(
                NotificationRequest::to_user("u9", "Bed ready", "A1 is clean").related("bed", "b1"),
            )
            .await
            .unwrap();

        let created = outcome.data.unwrap();
        assert_eq!(created.user_id, "u9");
        assert!(!created.is_read);
        assert_eq!(created.related_entity_id.as_deref(), Some("b1"));
        assert!(outcome.count.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_counts_only_staff_with_login() {
        let store = store_with_staff(23, 4).await;
        let outcome = store
            .create_notification(NotificationRequest::broadcast("Drill", "Fire drill at 3pm"))
            .await
            .unwrap();

        assert_eq!(outcome.count, Some(23));
        assert_eq!(store.count(Table::Notifications).await.unwrap(), 23);
    }
}
