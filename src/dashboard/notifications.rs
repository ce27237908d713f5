//! Notification inbox for the signed-in user

use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, RwLock};

use super::feedback::{ViewError, ViewResult};
use crate::auth::{AuthContext, AuthError};
use crate::model::{Filter, Notification, Query, Table};
use crate::sync::{SyncContext, SyncStrategy, SyncedView};

/// Notifications shown in the inbox
pub const INBOX_SIZE: usize = 10;

pub struct NotificationInbox {
    ctx: SyncContext,
    auth: Arc<AuthContext>,
    view: RwLock<Option<Arc<SyncedView<Notification>>>>,
}

impl NotificationInbox {
    pub fn new(ctx: &SyncContext, auth: Arc<AuthContext>) -> Self {
        Self {
            ctx: ctx.clone(),
            auth,
            view: RwLock::new(None),
        }
    }

    /// Open the inbox of whoever is signed in now
    pub async fn mount(&self) -> ViewResult<()> {
        let user_id = self
            .auth
            .state()
            .user_id()
            .map(str::to_string)
            .ok_or(AuthError::NotSignedIn)?;

        let query = Query::new()
            .eq("user_id", user_id.as_str())
            .desc("created_at")
            .limit(INBOX_SIZE);
        let view = Arc::new(self.ctx.view::<Notification>(
            format!("notifications-{}", user_id),
            query,
            SyncStrategy::Reload,
        ));

        let previous = self.view.write().ok().and_then(|mut v| v.replace(Arc::clone(&view)));
        if let Some(previous) = previous {
            previous.unmount();
        }
        view.mount().await;
        Ok(())
    }

    pub fn unmount(&self) {
        let view = self.view.write().ok().and_then(|mut v| v.take());
        if let Some(view) = view {
            view.unmount();
        }
    }

    fn current(&self) -> Option<Arc<SyncedView<Notification>>> {
        self.view.read().ok().and_then(|v| v.clone())
    }

    /// Newest first
    pub fn notifications(&self) -> Vec<Notification> {
        self.current().map(|v| v.rows()).unwrap_or_default()
    }

    pub fn unread_count(&self) -> usize {
        self.notifications().iter().filter(|n| !n.is_read).count()
    }

    /// Wait until the inbox satisfies `f`
    pub async fn wait_for<F>(&self, f: F)
    where
        F: FnMut(&[Notification]) -> bool,
    {
        if let Some(view) = self.current() {
            view.wait_for(f).await;
        }
    }

    pub async fn mark_read(&self, id: &str) -> ViewResult<()> {
        let view = self.current().ok_or(AuthError::NotSignedIn)?;
        view.backend()
            .update(
                Table::Notifications,
                &[Filter::eq("id", id)],
                json!({ "is_read": true, "updated_at": Utc::now() }),
            )
            .await
            .map_err(ViewError::store("mark notification as read"))?;

        view.patch_local(id, |n| n.is_read = true);
        Ok(())
    }

    pub async fn mark_all_read(&self) -> ViewResult<()> {
        let view = self.current().ok_or(AuthError::NotSignedIn)?;
        let user_id = self
            .auth
            .state()
            .user_id()
            .map(str::to_string)
            .ok_or(AuthError::NotSignedIn)?;

        view.backend()
            .update(
                Table::Notifications,
                &[
                    Filter::eq("user_id", user_id.as_str()),
                    Filter::eq("is_read", false),
                ],
                json!({ "is_read": true, "updated_at": Utc::now() }),
            )
            .await
            .map_err(ViewError::store("mark notifications as read"))?;

        for n in view.rows().into_iter().filter(|n| !n.is_read) {
            view.patch_local(&n.id, |n| n.is_read = true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::testing;
    use crate::fixtures::{DOCTOR_USER, NURSE_USER};
    use crate::store::BackendExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_inbox_shows_latest_for_user() {
        let (store, ctx) = testing::hospital().await;
        for i in 0..12 {
            store
                .insert_row(&Notification::new(NURSE_USER, format!("n{}", i), "body"))
                .await
                .unwrap();
        }
        store
            .insert_row(&Notification::new(DOCTOR_USER, "other", "body"))
            .await
            .unwrap();

        let inbox = NotificationInbox::new(&ctx, testing::signed_in(&store, NURSE_USER).await);
        inbox.mount().await.unwrap();

        let rows = inbox.notifications();
        assert_eq!(rows.len(), INBOX_SIZE);
        assert_eq!(rows[0].title, "n11");
        assert!(rows.iter().all(|n| n.user_id == NURSE_USER));
        assert_eq!(inbox.unread_count(), 10);

        store
            .insert_row(&Notification::new(NURSE_USER, "fresh", "body"))
            .await
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            inbox.wait_for(|rows| rows.first().is_some_and(|n| n.title == "fresh")),
        )
        .await
        .unwrap();

        inbox.unmount();
        assert_eq!(ctx.feed().open_channels(), 0);
    }

    #[tokio::test]
    async fn test_mark_read() {
        let (store, ctx) = testing::hospital().await;
        let first = store
            .insert_row(&Notification::new(NURSE_USER, "a", "body"))
            .await
            .unwrap();
        store
            .insert_row(&Notification::new(NURSE_USER, "b", "body"))
            .await
            .unwrap();

        let inbox = NotificationInbox::new(&ctx, testing::signed_in(&store, NURSE_USER).await);
        inbox.mount().await.unwrap();
        assert_eq!(inbox.unread_count(), 2);

        inbox.mark_read(&first.id).await.unwrap();
        assert_eq!(inbox.unread_count(), 1);
        let stored: Notification = store.fetch_one(&first.id).await.unwrap().unwrap();
        assert!(stored.is_read);

        inbox.mark_all_read().await.unwrap();
        assert_eq!(inbox.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_mount_requires_user() {
        let (store, ctx) = testing::hospital().await;
        let inbox = NotificationInbox::new(&ctx, testing::signed_out(&store).await);
        assert!(inbox.mount().await.is_err());
        assert!(inbox.notifications().is_empty());
    }
}
