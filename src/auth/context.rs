//! Auth context
//!
//! An explicit provider object: construct it, call [`AuthContext::init`]
//! to start following session changes, and [`AuthContext::teardown`] when
//! the dashboard closes. Consumers read [`AuthState`] snapshots or watch
//! for changes; nothing is global.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::role::{Capabilities, Role};
use crate::model::{Filter, Query, Staff, Table};
use crate::store::{Backend, BackendExt, StoreError};

/// Errors from auth-dependent operations
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("No staff profile for user {0}")]
    NoProfile(String),

    #[error("{action} requires {required} role")]
    Forbidden { action: String, required: Role },

    #[error("{0}")]
    Invalid(String),

    #[error("Profile lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Identity as reported by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

impl AuthUser {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }
}

/// Application profile joined from the staff table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub role: Role,
    pub full_name: String,
    pub staff_id: String,
}

/// Snapshot of who is signed in
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    pub user: Option<AuthUser>,
    pub profile: Option<UserProfile>,
    /// True until the first session has been resolved
    pub loading: bool,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            user: None,
            profile: None,
            loading: true,
        }
    }
}

impl AuthState {
    pub fn role(&self) -> Option<Role> {
        self.profile.as_ref().map(|p| p.role)
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::for_role(self.role())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// Name to show for the user: profile name, else email
    pub fn display_name(&self) -> Option<&str> {
        self.profile
            .as_ref()
            .map(|p| p.full_name.as_str())
            .filter(|n| !n.is_empty())
            .or_else(|| self.user.as_ref().map(|u| u.email.as_str()))
    }

    /// Role of a signed-in user with a staff profile
    pub fn require_role(&self) -> Result<Role, AuthError> {
        let user = self.user.as_ref().ok_or(AuthError::NotSignedIn)?;
        self.role()
            .ok_or_else(|| AuthError::NoProfile(user.id.clone()))
    }

    /// Fail unless signed in as an administrator
    pub fn require_admin(&self, action: &str) -> Result<(), AuthError> {
        if self.require_role()? != Role::Admin {
            return Err(AuthError::Forbidden {
                action: action.to_string(),
                required: Role::Admin,
            });
        }
        Ok(())
    }
}

/// Session source standing in for the identity provider
#[derive(Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<Option<AuthUser>>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn signed_in(user: AuthUser) -> Self {
        let handle = Self::new();
        handle.sign_in(user);
        handle
    }

    pub fn sign_in(&self, user: AuthUser) {
        tracing::info!(user_id = %user.id, "Session started");
        self.tx.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        if self.tx.send_replace(None).is_some() {
            tracing::info!("Session ended");
        }
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.tx.subscribe()
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Current user, profile and role for the dashboard
pub struct AuthContext {
    backend: Arc<dyn Backend>,
    session: SessionHandle,
    state: watch::Sender<AuthState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AuthContext {
    pub fn new(backend: Arc<dyn Backend>, session: SessionHandle) -> Arc<Self> {
        let (state, _) = watch::channel(AuthState::default());
        Arc::new(Self {
            backend,
            session,
            state,
            task: Mutex::new(None),
        })
    }

    /// Resolve the current session and follow later changes
    pub fn init(self: &Arc<Self>) {
        let mut guard = match self.task.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if guard.is_some() {
            return;
        }

        let mut sessions = self.session.subscribe();
        let weak = Arc::downgrade(self);
        *guard = Some(tokio::spawn(async move {
            loop {
                let user = sessions.borrow_and_update().clone();
                let Some(ctx) = weak.upgrade() else {
                    break;
                };
                ctx.apply_session(user).await;
                drop(ctx);
                if sessions.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop following session changes; safe to call more than once
    pub fn teardown(&self) {
        if let Ok(mut guard) = self.task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
                tracing::debug!("Auth context torn down");
            }
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn role(&self) -> Option<Role> {
        self.state.borrow().role()
    }

    /// Wait until the first session has been resolved
    pub async fn ready(&self) -> AuthState {
        let mut rx = self.state.subscribe();
        let resolved = rx.wait_for(|s| !s.loading).await.map(|state| state.clone());
        resolved.unwrap_or_else(|_| self.state())
    }

    /// Re-read the staff profile for the current user
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let user = self.state.borrow().user.clone().ok_or(AuthError::NotSignedIn)?;
        let profile = self.fetch_profile(&user.id).await?;
        self.state.send_modify(|s| s.profile = profile);
        Ok(())
    }

    /// Rename the signed-in user's staff row, then re-read the profile
    pub async fn update_profile(&self, full_name: &str) -> Result<UserProfile, AuthError> {
        let user = self.state.borrow().user.clone().ok_or(AuthError::NotSignedIn)?;
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(AuthError::Invalid("Full name is required".to_string()));
        }

        let updated = self
            .backend
            .update(
                Table::Staff,
                &[Filter::eq("user_id", user.id.as_str())],
                json!({ "full_name": full_name }),
            )
            .await?;
        if updated.is_empty() {
            return Err(AuthError::NoProfile(user.id));
        }

        self.refresh().await?;
        tracing::info!(user_id = %user.id, "Profile updated");
        let profile = self.state.borrow().profile.clone();
        profile.ok_or(AuthError::NoProfile(user.id))
    }

    pub fn sign_out(&self) {
        self.session.sign_out();
        self.state.send_modify(|s| s.profile = None);
    }

    async fn apply_session(&self, user: Option<AuthUser>) {
        let profile = match &user {
            Some(u) => match self.fetch_profile(&u.id).await {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::error!(user_id = %u.id, error = %e, "Error fetching staff data");
                    self.shown_profile_of(&u.id)
                }
            },
            None => None,
        };

        self.state.send_modify(|s| {
            s.user = user;
            s.profile = profile;
            s.loading = false;
        });
    }

    /// The profile currently shown, if it belongs to `user_id`
    fn shown_profile_of(&self, user_id: &str) -> Option<UserProfile> {
        let state = self.state.borrow();
        let shown = match state.user_id() {
            Some(id) if id == user_id => state.profile.clone(),
            _ => None,
        };
        shown
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>, AuthError> {
        let query = Query::new().eq("user_id", user_id).limit(1);
        let staff: Vec<Staff> = self.backend.fetch(&query).await?;

        Ok(staff.into_iter().next().map(|s| UserProfile {
            role: Role::from_staff_role(s.role),
            full_name: s.full_name,
            staff_id: s.id,
        }))
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::model::StaffRole;
    use crate::realtime::ChangeFeed;
    use crate::store::testing::FlakyBackend;
    use crate::store::SqliteStore;

    async fn backend() -> Arc<dyn Backend> {
        let store = SqliteStore::in_memory(Arc::new(ChangeFeed::default())).unwrap();
        store
            .insert_row(&Staff::new("Dana Admin", StaffRole::Admin).user("u-admin"))
            .await
            .unwrap();
        store
            .insert_row(&Staff::new("Nico Nurse", StaffRole::Nurse).user("u-nurse"))
            .await
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_init_resolves_profile() {
        let session = SessionHandle::signed_in(AuthUser::new("u-nurse", "nico@ward.test"));
        let ctx = AuthContext::new(backend().await, session);
        assert!(ctx.state().loading);

        ctx.init();
        let state = ctx.ready().await;
        assert_eq!(state.role(), Some(Role::MedicalStaff));
        assert_eq!(state.display_name(), Some("Nico Nurse"));
        assert!(state.require_admin("Delete equipment").is_err());

        ctx.teardown();
        ctx.teardown();
    }

    #[tokio::test]
    async fn test_session_changes_are_followed() {
        let session = SessionHandle::new();
        let ctx = AuthContext::new(backend().await, session.clone());
        ctx.init();

        let state = ctx.ready().await;
        assert!(state.user.is_none());

        let mut rx = ctx.subscribe();
        session.sign_in(AuthUser::new("u-admin", "dana@ward.test"));
        let state = rx
            .wait_for(|s| s.role().is_some())
            .await
            .unwrap()
            .clone();
        assert!(state.is_admin());
        assert!(state.require_admin("Delete equipment").is_ok());

        ctx.sign_out();
        let state = rx.wait_for(|s| s.user.is_none()).await.unwrap().clone();
        assert!(state.profile.is_none());
    }

    #[tokio::test]
    async fn test_user_without_staff_row_has_no_role() {
        let session = SessionHandle::signed_in(AuthUser::new("u-stranger", "x@ward.test"));
        let ctx = AuthContext::new(backend().await, session);
        ctx.init();

        let state = ctx.ready().await;
        assert!(state.user.is_some());
        assert_eq!(state.role(), None);
        assert_eq!(state.display_name(), Some("x@ward.test"));
        assert!(matches!(state.require_role(), Err(AuthError::NoProfile(id)) if id == "u-stranger"));
    }

    #[tokio::test]
    async fn test_failed_lookup_does_not_carry_profile_to_another_user() {
        let store = Arc::new(SqliteStore::in_memory(Arc::new(ChangeFeed::default())).unwrap());
        fixtures::seed(store.as_ref()).await.unwrap();
        let flaky = FlakyBackend::new(store);
        let session = SessionHandle::signed_in(AuthUser::new(fixtures::ADMIN_USER, "admin@hospital.com"));
        let ctx = AuthContext::new(flaky.clone(), session.clone());
        ctx.init();
        assert!(ctx.ready().await.is_admin());

        flaky.set_failing(true);
        let mut rx = ctx.subscribe();
        session.sign_in(AuthUser::new(fixtures::RECEPTION_USER, "reception@hospital.com"));
        let state = rx
            .wait_for(|s| s.user_id() == Some(fixtures::RECEPTION_USER))
            .await
            .unwrap()
            .clone();
        assert_eq!(state.role(), None);
        assert!(!state.capabilities().manage_equipment);

        // The same user keeps what was already shown
        flaky.set_failing(false);
        ctx.refresh().await.unwrap();
        assert_eq!(ctx.role(), Some(Role::Reception));
        flaky.set_failing(true);
        let mut rx = ctx.subscribe();
        rx.borrow_and_update();
        session.sign_in(AuthUser::new(fixtures::RECEPTION_USER, "reception@hospital.com"));
        rx.changed().await.unwrap();
        assert_eq!(ctx.role(), Some(Role::Reception));
    }

    #[tokio::test]
    async fn test_update_profile_renames_staff_row() {
        let backend = backend().await;
        let session = SessionHandle::signed_in(AuthUser::new("u-nurse", "nico@ward.test"));
        let ctx = AuthContext::new(backend.clone(), session);
        ctx.init();
        ctx.ready().await;

        let profile = ctx.update_profile("  Nicola Nurse ").await.unwrap();
        assert_eq!(profile.full_name, "Nicola Nurse");
        assert_eq!(ctx.state().display_name(), Some("Nicola Nurse"));

        let staff: Vec<Staff> = backend
            .fetch(&Query::new().eq("user_id", "u-nurse"))
            .await
            .unwrap();
        assert_eq!(staff[0].full_name, "Nicola Nurse");

        assert!(matches!(ctx.update_profile("").await, Err(AuthError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_update_profile_without_staff_row() {
        let session = SessionHandle::signed_in(AuthUser::new("u-stranger", "x@ward.test"));
        let ctx = AuthContext::new(backend().await, session);
        ctx.init();
        ctx.ready().await;
        assert!(matches!(
            ctx.update_profile("Someone").await,
            Err(AuthError::NoProfile(id)) if id == "u-stranger"
        ));
    }

    #[tokio::test]
    async fn test_refresh_requires_user() {
        let ctx = AuthContext::new(backend().await, SessionHandle::new());
        assert!(matches!(ctx.refresh().await, Err(AuthError::NotSignedIn)));
    }
}
