//! Patient queue
//!
//! Queue items are patch-synced: each change event is applied to the local
//! copy and re-sorted by priority, then arrival time.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, RwLock};

use super::department_name;
use super::feedback::{Toast, ViewError, ViewResult};
use crate::auth::AuthContext;
use crate::model::{Department, Patient, Priority, Query, QueueItem, QueueStatus};
use crate::store::BackendExt;
use crate::sync::{SyncContext, SyncStrategy, SyncedView};

/// Minutes assumed for a newly queued patient
pub const DEFAULT_WAIT_MINUTES: u32 = 30;

/// "45 min", "1h 30m", or "Unknown"
pub fn format_wait(minutes: Option<u32>) -> String {
    match minutes {
        None => "Unknown".to_string(),
        Some(m) if m < 60 => format!("{} min", m),
        Some(m) => format!("{}h {}m", m / 60, m % 60),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilters {
    pub department: Option<String>,
    pub status: Option<QueueStatus>,
    /// Case-insensitive patient name fragment
    pub search: String,
}

/// A queue item joined with display data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub item: QueueItem,
    pub patient_name: String,
    pub department: String,
    pub priority_label: &'static str,
    pub wait: String,
    pub actions: Vec<QueueStatus>,
}

/// Form input for `add_to_queue`
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueEntry {
    pub patient_name: String,
    pub contact_number: Option<String>,
    pub priority: Priority,
    pub notes: Option<String>,
}

impl NewQueueEntry {
    pub fn new(patient_name: impl Into<String>, priority: Priority) -> Self {
        Self {
            patient_name: patient_name.into(),
            contact_number: None,
            priority,
            notes: None,
        }
    }
}

fn next_statuses(status: QueueStatus) -> Vec<QueueStatus> {
    match status {
        QueueStatus::Waiting => vec![QueueStatus::InProgress, QueueStatus::Cancelled],
        QueueStatus::InProgress => vec![QueueStatus::Completed, QueueStatus::Cancelled],
        QueueStatus::Completed | QueueStatus::Cancelled => Vec::new(),
    }
}

pub struct PatientQueue {
    auth: Arc<AuthContext>,
    items: SyncedView<QueueItem>,
    patients: SyncedView<Patient>,
    departments: SyncedView<Department>,
    filters: RwLock<QueueFilters>,
}

impl PatientQueue {
    pub fn new(ctx: &SyncContext, auth: Arc<AuthContext>) -> Self {
        Self {
            auth,
            items: ctx.view(
                "queue-changes",
                Query::new().asc("priority").asc("created_at"),
                SyncStrategy::Patch,
            ),
            patients: ctx.view(
                "patients-changes",
                Query::new().asc("full_name"),
                SyncStrategy::Reload,
            ),
            departments: ctx.view("departments", Query::new().asc("name"), SyncStrategy::Reload),
            filters: RwLock::new(QueueFilters::default()),
        }
    }

    pub async fn mount(&self) {
        self.departments.load().await;
        if let Ok(mut filters) = self.filters.write() {
            if filters.department.is_none() {
                filters.department = self.departments.rows().into_iter().next().map(|d| d.id);
            }
        }
        self.patients.mount().await;
        self.items.mount().await;
    }

    pub fn unmount(&self) {
        self.items.unmount();
        self.patients.unmount();
        self.departments.unmount();
    }

    pub async fn refresh(&self) {
        self.departments.load().await;
        self.items.load().await;
        self.patients.load().await;
    }

    pub fn items(&self) -> &SyncedView<QueueItem> {
        &self.items
    }

    pub fn patients(&self) -> &SyncedView<Patient> {
        &self.patients
    }

    pub fn filters(&self) -> QueueFilters {
        self.filters.read().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn set_filters(&self, filters: QueueFilters) {
        if let Ok(mut current) = self.filters.write() {
            *current = filters;
        }
    }

    pub fn select_department(&self, department: Option<String>) {
        if let Ok(mut filters) = self.filters.write() {
            filters.department = department;
        }
    }

    /// Filtered queue in service order
    pub fn entries(&self) -> Vec<QueueEntry> {
        let filters = self.filters();
        let patients = self.patients.rows();
        let departments = self.departments.rows();
        let editable = self.auth.state().capabilities().manage_queue;
        let search = filters.search.to_lowercase();

        self.items
            .rows()
            .into_iter()
            .filter(|i| filters.department.as_deref().map_or(true, |d| i.department_id == d))
            .filter(|i| filters.status.map_or(true, |s| i.status == s))
            .filter_map(|item| {
                let patient_name = patients
                    .iter()
                    .find(|p| p.id == item.patient_id)
                    .map(|p| p.full_name.clone())
                    .unwrap_or_else(|| "Unknown Patient".to_string());
                if !search.is_empty() && !patient_name.to_lowercase().contains(&search) {
                    return None;
                }
                Some(QueueEntry {
                    patient_name,
                    department: department_name(&departments, Some(&item.department_id)),
                    priority_label: item.priority.label(),
                    wait: format_wait(item.estimated_wait_time),
                    actions: if editable {
                        next_statuses(item.status)
                    } else {
                        Vec::new()
                    },
                    item,
                })
            })
            .collect()
    }

    /// Queue a patient in the selected department
    ///
    /// An existing patient with the same name (ignoring case) is reused;
    /// otherwise one is created first. The two writes are independent: a
    /// failed queue insert leaves the new patient in place.
    pub async fn add_to_queue(&self, input: NewQueueEntry) -> ViewResult<(QueueItem, Toast)> {
        self.auth.state().require_role()?;
        let name = input.patient_name.trim();
        let department = self.filters().department;
        let Some(department) = department.filter(|_| !name.is_empty()) else {
            return Err(ViewError::validation(
                "Missing information",
                "Please select a department and enter the patient's name",
            ));
        };

        let backend = self.items.backend();
        let existing = self
            .patients
            .rows()
            .into_iter()
            .find(|p| p.full_name.to_lowercase() == name.to_lowercase());

        let patient = match existing {
            Some(patient) => patient,
            None => {
                let mut patient = Patient::new(name);
                patient.contact_number = input.contact_number.filter(|c| !c.is_empty());
                let created = backend
                    .insert_row(&patient)
                    .await
                    .map_err(ViewError::store("add patient"))?;
                tracing::info!(patient_id = %created.id, "Patient created");
                created
            }
        };

        let mut item = QueueItem::new(department, &patient.id, input.priority);
        item.estimated_wait_time = Some(DEFAULT_WAIT_MINUTES);
        item.notes = input.notes.filter(|n| !n.is_empty());
        let item = backend
            .insert_row(&item)
            .await
            .map_err(ViewError::store("add patient to queue"))?;

        self.patients.load().await;
        let toast = Toast::success(
            "Patient added",
            format!("{} has been added to the queue", patient.full_name),
        );
        Ok((item, toast))
    }

    pub async fn update_status(&self, item_id: &str, status: QueueStatus) -> ViewResult<Toast> {
        self.auth.state().require_role()?;
        let patch = json!({ "status": status, "updated_at": Utc::now() });
        let write = self.items.backend().update_by_id::<QueueItem>(item_id, patch);
        self.items
            .mutate(item_id, |i| i.status = status, write)
            .await
            .map_err(ViewError::store("update queue status"))?;

        Ok(Toast::success(
            "Queue updated",
            format!("Status changed to {}", status.label()),
        ))
    }
}
