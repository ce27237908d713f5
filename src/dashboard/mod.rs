//! Dashboard view models
//!
//! One view model per widget. Each owns its [`crate::sync::SyncedView`]s,
//! exposes `mount`/`unmount`, and produces exactly the data a renderer
//! draws, including which controls exist for the signed-in role.
//!
//! - **beds**: Bed board with status transitions
//! - **queue**: Patient queue in service order
//! - **resources**: Staff and equipment allocation (admin editing)
//! - **directory**: Team directory with debounced search and messaging
//! - **notifications**: Inbox for the signed-in user
//! - **stats**: Summary cards and recent alerts
//! - **schedule**: In-memory calendar
//! - **feedback**: Toasts and view errors

pub mod beds;
pub mod directory;
pub mod feedback;
pub mod notifications;
pub mod queue;
pub mod resources;
pub mod schedule;
pub mod stats;

pub use beds::{BedBoard, BedCard, BedCounts, BedFilters};
pub use directory::{DirectoryEntry, DirectoryFilters, TeamDirectory};
pub use feedback::{Toast, ToastVariant, ViewError, ViewResult};
pub use notifications::NotificationInbox;
pub use queue::{format_wait, NewQueueEntry, PatientQueue, QueueEntry, QueueFilters};
pub use resources::{
    DepartmentGroup, EquipmentCard, EquipmentControls, NewEquipment, ResourceAllocation,
    ResourceControls, ResourceFilters, StaffCard,
};
pub use schedule::{CalendarEvent, EventKind, NewEvent, Schedule};
pub use stats::{Alert, DashboardStats, DashboardSummary};

use crate::model::Department;

/// Display name for a department reference
pub fn department_name(departments: &[Department], id: Option<&str>) -> String {
    match id {
        None => "Unassigned".to_string(),
        Some(id) => departments
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| "Unknown Department".to_string()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_department_name() {
        let departments = vec![{
            let mut d = Department::new("Emergency", 1);
            d.id = "d1".to_string();
            d
        }];
        assert_eq!(department_name(&departments, Some("d1")), "Emergency");
        assert_eq!(department_name(&departments, Some("d9")), "Unknown Department");
        assert_eq!(department_name(&departments, None), "Unassigned");
    }
}
