//! Bed management board

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, RwLock};

use super::department_name;
use super::feedback::{Toast, ViewError, ViewResult};
use crate::auth::AuthContext;
use crate::model::{Bed, BedStatus, Department, Query};
use crate::store::BackendExt;
use crate::sync::{SyncContext, SyncStrategy, SyncedView};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BedFilters {
    /// `None` shows every department
    pub department: Option<String>,
    pub status: Option<BedStatus>,
    /// Case-insensitive bed number fragment
    pub search: String,
}

/// One bed as drawn on the board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BedCard {
    pub bed: Bed,
    pub department: String,
    /// Status transitions offered; empty when the user may not edit beds
    pub actions: Vec<BedStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BedCounts {
    pub total: usize,
    pub available: usize,
    pub occupied: usize,
    pub reserved: usize,
    pub cleaning: usize,
}

pub struct BedBoard {
    auth: Arc<AuthContext>,
    beds: SyncedView<Bed>,
    departments: SyncedView<Department>,
    filters: RwLock<BedFilters>,
}

impl BedBoard {
    pub fn new(ctx: &SyncContext, auth: Arc<AuthContext>) -> Self {
        Self {
            auth,
            beds: ctx.view("beds-changes", Query::new().asc("bed_number"), SyncStrategy::Reload),
            departments: ctx.view("departments", Query::new().asc("name"), SyncStrategy::Reload),
            filters: RwLock::new(BedFilters::default()),
        }
    }

    pub async fn mount(&self) {
        self.departments.load().await;
        self.select_first_department();
        self.beds.mount().await;
    }

    pub fn unmount(&self) {
        self.beds.unmount();
        self.departments.unmount();
    }

    pub async fn refresh(&self) {
        self.departments.load().await;
        self.select_first_department();
        self.beds.load().await;
    }

    fn select_first_department(&self) {
        let first = self.departments.rows().into_iter().next().map(|d| d.id);
        if let Ok(mut filters) = self.filters.write() {
            if filters.department.is_none() {
                filters.department = first;
            }
        }
    }

    pub fn beds(&self) -> &SyncedView<Bed> {
        &self.beds
    }

    pub fn departments(&self) -> Vec<Department> {
        self.departments.rows()
    }

    pub fn filters(&self) -> BedFilters {
        self.filters.read().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn select_department(&self, department: Option<String>) {
        if let Ok(mut filters) = self.filters.write() {
            filters.department = department;
        }
    }

    pub fn filter_status(&self, status: Option<BedStatus>) {
        if let Ok(mut filters) = self.filters.write() {
            filters.status = status;
        }
    }

    pub fn search(&self, text: impl Into<String>) {
        if let Ok(mut filters) = self.filters.write() {
            filters.search = text.into();
        }
    }

    /// Beds passing the current filters, in bed number order
    pub fn cards(&self) -> Vec<BedCard> {
        let filters = self.filters();
        let departments = self.departments.rows();
        let editable = self.auth.state().capabilities().update_beds;
        let search = filters.search.to_lowercase();

        self.beds
            .rows()
            .into_iter()
            .filter(|b| {
                filters
                    .department
                    .as_deref()
                    .map_or(true, |d| b.department_id == d)
            })
            .filter(|b| filters.status.map_or(true, |s| b.status == s))
            .filter(|b| search.is_empty() || b.bed_number.to_lowercase().contains(&search))
            .map(|bed| BedCard {
                department: department_name(&departments, Some(&bed.department_id)),
                actions: if editable {
                    BedStatus::ALL
                        .iter()
                        .copied()
                        .filter(|s| *s != bed.status)
                        .collect()
                } else {
                    Vec::new()
                },
                bed,
            })
            .collect()
    }

    /// Status totals for the selected department
    pub fn counts(&self) -> BedCounts {
        let department = self.filters().department;
        self.beds
            .rows()
            .iter()
            .filter(|b| department.as_deref().map_or(true, |d| b.department_id == d))
            .fold(BedCounts::default(), |mut c, b| {
                c.total += 1;
                match b.status {
                    BedStatus::Available => c.available += 1,
                    BedStatus::Occupied => c.occupied += 1,
                    BedStatus::Reserved => c.reserved += 1,
                    BedStatus::Cleaning => c.cleaning += 1,
                }
                c
            })
    }

    /// Optimistically move a bed to `status`
    pub async fn set_status(&self, bed_id: &str, status: BedStatus) -> ViewResult<Toast> {
        self.auth.state().require_role()?;
        let bed = self
            .beds
            .get(bed_id)
            .ok_or_else(|| ViewError::NotFound(format!("Bed {}", bed_id)))?;

        let patch = json!({ "status": status, "updated_at": Utc::now() });
        let write = self.beds.backend().update_by_id::<Bed>(bed_id, patch);
        self.beds
            .mutate(bed_id, |b| b.status = status, write)
            .await
            .map_err(ViewError::store("update bed status"))?;

        Ok(Toast::success(
            "Bed status updated",
            format!("Bed {} is now {}", bed.bed_number, status.label()),
        ))
    }

    /// Add an available bed; bed numbers are unique within a department
    pub async fn add_bed(&self, department_id: &str, bed_number: &str) -> ViewResult<(Bed, Toast)> {
        self.auth.state().require_admin("Add bed")?;
        let bed_number = bed_number.trim();
        if bed_number.is_empty() || department_id.is_empty() {
            return Err(ViewError::validation(
                "Missing information",
                "Please provide both bed number and department.",
            ));
        }

        let backend = self.beds.backend();
        let query = Query::new()
            .eq("bed_number", bed_number)
            .eq("department_id", department_id)
            .limit(1);
        let existing: Vec<Bed> = backend
            .fetch(&query)
            .await
            .map_err(ViewError::store("add bed"))?;
        if !existing.is_empty() {
            return Err(ViewError::validation(
                "Bed already exists",
                format!("Bed {} already exists in this department.", bed_number),
            ));
        }

        let bed = backend
            .insert_row(&Bed::new(department_id, bed_number))
            .await
            .map_err(ViewError::store("add bed"))?;
        self.beds.upsert_local(bed.clone());
        tracing::info!(bed_id = %bed.id, department_id, "Bed added");

        let toast = Toast::success(
            "Bed added",
            format!("Bed {} has been added successfully.", bed.bed_number),
        );
        Ok((bed, toast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::testing;
    use crate::auth::AuthError;
    use crate::fixtures::{ADMIN_USER, NURSE_USER, RECEPTION_USER};
    use std::time::Duration;

    #[tokio::test]
    async fn test_board_defaults_to_first_department() {
        let (store, ctx) = testing::hospital().await;
        let board = BedBoard::new(&ctx, testing::signed_in(&store, NURSE_USER).await);
        board.mount().await;

        // Cardiology sorts first by name
        assert_eq!(board.filters().department.as_deref(), Some("dept-2"));
        let cards = board.cards();
        assert_eq!(cards.len(), 4);
        assert!(cards.iter().all(|c| c.department == "Cardiology"));
        assert!(cards.windows(2).all(|w| w[0].bed.bed_number <= w[1].bed.bed_number));
        assert!(cards.iter().all(|c| c.actions.len() == 3 && !c.actions.contains(&c.bed.status)));

        let counts = board.counts();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.available + counts.occupied + counts.reserved + counts.cleaning, 4);

        board.select_department(None);
        board.filter_status(Some(BedStatus::Available));
        assert_eq!(board.cards().len(), 5);
        board.search("er-");
        assert_eq!(board.cards().len(), 1);
    }

    #[tokio::test]
    async fn test_set_status_follows_store() {
        let (store, ctx) = testing::hospital().await;
        let board = BedBoard::new(&ctx, testing::signed_in(&store, RECEPTION_USER).await);
        board.mount().await;

        let toast = board.set_status("bed-2-1", BedStatus::Cleaning).await.unwrap();
        assert_eq!(toast.description, "Bed CA-01 is now Cleaning");
        assert_eq!(board.beds().get("bed-2-1").unwrap().status, BedStatus::Cleaning);

        let stored: Option<Bed> = store.fetch_one("bed-2-1").await.unwrap();
        assert_eq!(stored.unwrap().status, BedStatus::Cleaning);

        tokio::time::timeout(
            Duration::from_secs(5),
            board.beds().wait_for(|rows| rows.len() == 20),
        )
        .await
        .unwrap();
        assert!(board.set_status("bed-missing", BedStatus::Occupied).await.is_err());
        board.unmount();
        assert_eq!(ctx.feed().open_channels(), 0);
    }

    #[tokio::test]
    async fn test_add_bed_rejects_duplicates_in_department() {
        let (store, ctx) = testing::hospital().await;
        let board = BedBoard::new(&ctx, testing::signed_in(&store, ADMIN_USER).await);
        board.mount().await;

        let (bed, toast) = board.add_bed("dept-1", "ER-05").await.unwrap();
        assert_eq!(bed.status, BedStatus::Available);
        assert_eq!(toast.description, "Bed ER-05 has been added successfully.");
        assert!(board.beds().get(&bed.id).is_some());

        let err = board.add_bed("dept-1", "ER-01").await.unwrap_err();
        assert_eq!(err.toast().title, "Bed already exists");
        // Same number in another department is fine
        assert!(board.add_bed("dept-2", "ER-01").await.is_ok());
        assert!(board.add_bed("dept-2", "  ").await.is_err());

        let beds: Vec<Bed> = store.fetch(&Query::new()).await.unwrap();
        assert_eq!(beds.len(), 22);
    }

    #[tokio::test]
    async fn test_add_bed_requires_admin() {
        let (store, ctx) = testing::hospital().await;
        let board = BedBoard::new(&ctx, testing::signed_in(&store, NURSE_USER).await);
        board.mount().await;

        assert!(matches!(
            board.add_bed("dept-1", "ER-09").await,
            Err(ViewError::Auth(AuthError::Forbidden { .. }))
        ));
    }

    #[tokio::test]
    async fn test_signed_out_user_gets_no_actions() {
        let (store, ctx) = testing::hospital().await;
        let board = BedBoard::new(&ctx, testing::signed_out(&store).await);
        board.mount().await;

        assert!(board.cards().iter().all(|c| c.actions.is_empty()));
        let err = board.set_status("bed-1-1", BedStatus::Occupied).await.unwrap_err();
        assert!(err.toast().is_destructive());
    }
}
