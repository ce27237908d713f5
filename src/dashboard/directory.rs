//! Team directory
//!
//! Search input is debounced: the filter only sees the last term typed
//! within the debounce window. Must be constructed inside a Tokio runtime.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

use super::department_name;
use super::feedback::{Toast, ViewError, ViewResult};
use crate::auth::AuthContext;
use crate::model::{Department, Notification, Query, Staff, StaffRole};
use crate::store::BackendExt;
use crate::sync::{Debouncer, SyncContext, SyncStrategy, SyncedView};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryFilters {
    pub department: Option<String>,
    pub role: Option<StaffRole>,
    /// Applied (debounced) search term
    pub search: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryEntry {
    pub staff: Staff,
    pub department: String,
    /// Offered only for members with a login
    pub can_message: bool,
}

struct SearchState {
    filters: RwLock<DirectoryFilters>,
    evaluations: AtomicU64,
    applied: watch::Sender<u64>,
}

pub struct TeamDirectory {
    auth: Arc<AuthContext>,
    staff: SyncedView<Staff>,
    departments: SyncedView<Department>,
    state: Arc<SearchState>,
    debouncer: Debouncer<String>,
}

impl TeamDirectory {
    pub fn new(ctx: &SyncContext, auth: Arc<AuthContext>) -> Self {
        let (applied, _) = watch::channel(0);
        let state = Arc::new(SearchState {
            filters: RwLock::new(DirectoryFilters::default()),
            evaluations: AtomicU64::new(0),
            applied,
        });

        let sink = Arc::clone(&state);
        let debouncer = Debouncer::new(ctx.sync_options().search_debounce, move |term: String| {
            if let Ok(mut filters) = sink.filters.write() {
                filters.search = term;
            }
            let n = sink.evaluations.fetch_add(1, Ordering::SeqCst) + 1;
            sink.applied.send_replace(n);
        });

        Self {
            auth,
            staff: ctx.view("staff-directory", Query::new().asc("full_name"), SyncStrategy::Reload),
            departments: ctx.view("departments", Query::new().asc("name"), SyncStrategy::Reload),
            state,
            debouncer,
        }
    }

    pub async fn mount(&self) {
        self.departments.load().await;
        self.staff.mount().await;
    }

    pub fn unmount(&self) {
        self.staff.unmount();
        self.departments.unmount();
        self.debouncer.close();
    }

    pub async fn refresh(&self) {
        self.staff.load().await;
    }

    pub fn staff(&self) -> &SyncedView<Staff> {
        &self.staff
    }

    /// Feed one keystroke's worth of search text
    pub fn search_input(&self, text: impl Into<String>) {
        self.debouncer.push(text.into());
    }

    /// Number of times a search term has been applied
    pub fn search_evaluations(&self) -> u64 {
        self.state.evaluations.load(Ordering::SeqCst)
    }

    /// Receiver bumped each time a search term is applied
    pub fn search_applied(&self) -> watch::Receiver<u64> {
        self.state.applied.subscribe()
    }

    pub fn filters(&self) -> DirectoryFilters {
        self.state.filters.read().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn filter_role(&self, role: Option<StaffRole>) {
        if let Ok(mut filters) = self.state.filters.write() {
            filters.role = role;
        }
    }

    pub fn filter_department(&self, department: Option<String>) {
        if let Ok(mut filters) = self.state.filters.write() {
            filters.department = department;
        }
    }

    /// "Unassigned", "Unknown Department" or the department's name
    pub fn department_name(&self, department_id: Option<&str>) -> String {
        department_name(&self.departments.rows(), department_id)
    }

    fn entry(&self, staff: Staff, departments: &[Department], may_message: bool) -> DirectoryEntry {
        DirectoryEntry {
            department: department_name(departments, staff.department_id.as_deref()),
            can_message: may_message && staff.user_id.is_some(),
            staff,
        }
    }

    pub fn members(&self) -> Vec<DirectoryEntry> {
        let filters = self.filters();
        let departments = self.departments.rows();
        let may_message = self.auth.state().capabilities().send_messages;
        let search = filters.search.to_lowercase();

        self.staff
            .rows()
            .into_iter()
            .filter(|s| {
                search.is_empty()
                    || s.full_name.to_lowercase().contains(&search)
                    || s.email
                        .as_deref()
                        .is_some_and(|e| e.to_lowercase().contains(&search))
            })
            .filter(|s| filters.role.map_or(true, |r| s.role == r))
            .filter(|s| {
                filters
                    .department
                    .as_deref()
                    .map_or(true, |d| s.department_id.as_deref() == Some(d))
            })
            .map(|s| self.entry(s, &departments, may_message))
            .collect()
    }

    /// Other members of the signed-in user's department
    pub fn colleagues(&self) -> Vec<DirectoryEntry> {
        let state = self.auth.state();
        let Some(me) = state.profile.as_ref().map(|p| p.staff_id.clone()) else {
            return Vec::new();
        };
        let staff = self.staff.rows();
        let Some(department) = staff
            .iter()
            .find(|s| s.id == me)
            .and_then(|s| s.department_id.clone())
        else {
            return Vec::new();
        };

        let departments = self.departments.rows();
        let may_message = state.capabilities().send_messages;
        staff
            .into_iter()
            .filter(|s| s.id != me && s.department_id.as_deref() == Some(department.as_str()))
            .map(|s| self.entry(s, &departments, may_message))
            .collect()
    }

    /// Send `text` to a staff member's inbox
    pub async fn send_message(&self, staff_id: &str, text: &str) -> ViewResult<Toast> {
        let state = self.auth.state();
        state.require_role()?;
        if text.trim().is_empty() {
            return Err(ViewError::validation("Missing information", "Please enter a message."));
        }

        let member = self
            .staff
            .get(staff_id)
            .ok_or_else(|| ViewError::NotFound(format!("Staff member {}", staff_id)))?;
        let Some(user_id) = member.user_id.as_deref() else {
            return Err(ViewError::validation(
                "Cannot send message",
                "This staff member doesn't have a user account in the system.",
            ));
        };

        let sender = state.display_name().unwrap_or_default();
        let notification =
            Notification::new(user_id, format!("Message from {}", sender), text).kind("message");
        self.staff
            .backend()
            .insert_row(&notification)
            .await
            .map_err(ViewError::store("send message"))?;

        tracing::info!(recipient = %user_id, "Message sent");
        Ok(Toast::success(
            "Message sent",
            format!("Your message has been sent to {}", member.full_name),
        ))
    }
}
