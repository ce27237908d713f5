//! Staff provisioning for new accounts
//!
//! A freshly registered user gets a staff row matching the role picked at
//! sign-up. Administrators and reception are placed in the
//! [`ADMIN_DEPARTMENT`] (created on first use) and told so by notification.

use serde::{Deserialize, Serialize};

use super::context::AuthError;
use super::role::Role;
use crate::model::{Department, Notification, Query, Staff, StaffRole};
use crate::store::{Backend, BackendExt};

pub const ADMIN_DEPARTMENT: &str = "Administration";

/// Details collected at sign-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffSignup {
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Onboarded {
    pub staff: Staff,
    /// Set for roles placed in the administration department
    pub department: Option<Department>,
    pub notified: bool,
}

impl Role {
    /// Staff role recorded for a new account with this role
    pub fn staff_role(&self) -> StaffRole {
        match self {
            Role::Admin => StaffRole::Admin,
            Role::MedicalStaff => StaffRole::Doctor,
            Role::Reception => StaffRole::Other,
        }
    }
}

/// Create the staff row for a new account
pub async fn onboard<B: Backend + ?Sized>(
    backend: &B,
    signup: StaffSignup,
) -> Result<Onboarded, AuthError> {
    let full_name = signup.full_name.trim();
    if signup.user_id.is_empty() || full_name.is_empty() || signup.email.trim().is_empty() {
        return Err(AuthError::Invalid(
            "Please fill in all required fields".to_string(),
        ));
    }

    let existing: Vec<Staff> = backend
        .fetch(&Query::new().eq("user_id", signup.user_id.as_str()).limit(1))
        .await?;
    if !existing.is_empty() {
        return Err(AuthError::Invalid(format!(
            "User {} already has a staff profile",
            signup.user_id
        )));
    }

    let department = match signup.role {
        Role::Admin | Role::Reception => admin_department(backend).await,
        Role::MedicalStaff => None,
    };

    let mut row = Staff::new(full_name, signup.role.staff_role())
        .user(signup.user_id.as_str())
        .email(signup.email.trim());
    if let Some(dept) = &department {
        row = row.department(dept.id.as_str());
    }
    let staff = backend.insert_row(&row).await?;
    tracing::info!(user_id = %signup.user_id, staff_id = %staff.id, role = %signup.role, "Staff onboarded");

    let mut notified = false;
    if let Some(dept) = &department {
        let notification = Notification::new(
            signup.user_id.as_str(),
            "Department Assignment",
            format!("You have been assigned to the {} department", dept.name),
        )
        .kind("info");
        match backend.insert_row(&notification).await {
            Ok(_) => notified = true,
            Err(e) => {
                tracing::warn!(user_id = %signup.user_id, error = %e, "Department notification failed")
            }
        }
    }

    Ok(Onboarded {
        staff,
        department,
        notified,
    })
}

/// Get or create the administration department, falling back to any
/// department when it can be neither read nor created
async fn admin_department<B: Backend + ?Sized>(backend: &B) -> Option<Department> {
    let query = Query::new().eq("name", ADMIN_DEPARTMENT).limit(1);
    match backend.fetch::<Department>(&query).await {
        Ok(found) => {
            if let Some(dept) = found.into_iter().next() {
                return Some(dept);
            }
        }
        Err(e) => tracing::error!(error = %e, "Error checking admin department"),
    }

    match backend.insert_row(&Department::new(ADMIN_DEPARTMENT, 1)).await {
        Ok(dept) => return Some(dept),
        Err(e) => tracing::error!(error = %e, "Error creating admin department"),
    }

    backend
        .fetch::<Department>(&Query::new().limit(1))
        .await
        .ok()
        .and_then(|d| d.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Table;
    use crate::realtime::ChangeFeed;
    use crate::store::SqliteStore;
    use std::sync::Arc;

    fn store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::in_memory(Arc::new(ChangeFeed::default())).unwrap())
    }

    fn signup(user_id: &str, role: Role) -> StaffSignup {
        StaffSignup {
            user_id: user_id.to_string(),
            full_name: format!("New {}", user_id),
            email: format!("{}@hospital.com", user_id),
            role,
        }
    }

    #[tokio::test]
    async fn test_admin_gets_administration_department_once() {
        let store = store();

        let first = onboard(store.as_ref(), signup("u-a", Role::Admin)).await.unwrap();
        let dept = first.department.clone().unwrap();
        assert_eq!(dept.name, ADMIN_DEPARTMENT);
        assert_eq!(first.staff.role, StaffRole::Admin);
        assert_eq!(first.staff.department_id.as_deref(), Some(dept.id.as_str()));
        assert!(first.notified);

        let second = onboard(store.as_ref(), signup("u-r", Role::Reception)).await.unwrap();
        assert_eq!(second.department.unwrap().id, dept.id);
        assert_eq!(Role::from_staff_role(second.staff.role), Role::Reception);
        assert_eq!(store.count(Table::Departments).await.unwrap(), 1);

        let inbox: Vec<Notification> = store
            .fetch(&Query::new().eq("user_id", "u-r"))
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].title, "Department Assignment");
        assert_eq!(
            inbox[0].message,
            "You have been assigned to the Administration department"
        );
    }

    #[tokio::test]
    async fn test_medical_staff_stay_unassigned() {
        let store = store();
        let done = onboard(store.as_ref(), signup("u-d", Role::MedicalStaff)).await.unwrap();
        assert_eq!(done.staff.role, StaffRole::Doctor);
        assert!(done.staff.department_id.is_none());
        assert!(done.department.is_none());
        assert!(!done.notified);
        assert_eq!(store.count(Table::Departments).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_incomplete_or_repeated_signup() {
        let store = store();
        let mut blank = signup("u-x", Role::Admin);
        blank.full_name = "  ".to_string();
        assert!(matches!(onboard(store.as_ref(), blank).await, Err(AuthError::Invalid(_))));

        onboard(store.as_ref(), signup("u-x", Role::MedicalStaff)).await.unwrap();
        assert!(matches!(
            onboard(store.as_ref(), signup("u-x", Role::MedicalStaff)).await,
            Err(AuthError::Invalid(_))
        ));
    }
}
