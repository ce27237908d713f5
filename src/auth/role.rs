//! Application roles and what they unlock

use serde::{Deserialize, Serialize};
use std::fmt;

use super::context::AuthState;
use crate::model::StaffRole;

/// Role derived from the signed-in user's staff row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    MedicalStaff,
    Reception,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::MedicalStaff, Role::Reception];

    pub fn from_staff_role(role: StaffRole) -> Self {
        match role {
            StaffRole::Admin => Role::Admin,
            StaffRole::Doctor | StaffRole::Nurse => Role::MedicalStaff,
            StaffRole::Other => Role::Reception,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::MedicalStaff => "medical_staff",
            Role::Reception => "reception",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Admin => "Administrator",
            Role::MedicalStaff => "Medical Staff",
            Role::Reception => "Reception",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::for_role(Some(*self))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controls a role may be offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    /// Add, edit and delete equipment
    pub manage_equipment: bool,
    /// Assign staff or equipment to departments
    pub assign_resources: bool,
    pub update_equipment_status: bool,
    pub update_beds: bool,
    pub manage_queue: bool,
    pub send_messages: bool,
    pub admin_panel: bool,
}

impl Capabilities {
    pub fn for_role(role: Option<Role>) -> Self {
        match role {
            Some(Role::Admin) => Self {
                manage_equipment: true,
                assign_resources: true,
                update_equipment_status: true,
                update_beds: true,
                manage_queue: true,
                send_messages: true,
                admin_panel: true,
            },
            Some(Role::MedicalStaff) | Some(Role::Reception) => Self {
                update_beds: true,
                manage_queue: true,
                send_messages: true,
                ..Self::default()
            },
            None => Self::default(),
        }
    }
}

/// Outcome of guarding a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Session not resolved yet; show a spinner
    Loading,
    RedirectLogin,
    RedirectUnauthorized,
    Allow,
}

pub fn guard(state: &AuthState, allowed: &[Role]) -> RouteDecision {
    if state.loading {
        return RouteDecision::Loading;
    }
    if state.user.is_none() {
        return RouteDecision::RedirectLogin;
    }
    match state.role() {
        Some(role) if allowed.contains(&role) => RouteDecision::Allow,
        _ => RouteDecision::RedirectUnauthorized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthUser, UserProfile};

    fn signed_in(role: Option<Role>) -> AuthState {
        AuthState {
            user: Some(AuthUser::new("u1", "a@ward.test")),
            profile: role.map(|role| UserProfile {
                role,
                full_name: "A".to_string(),
                staff_id: "s1".to_string(),
            }),
            loading: false,
        }
    }

    #[test]
    fn test_staff_role_mapping() {
        assert_eq!(Role::from_staff_role(StaffRole::Admin), Role::Admin);
        assert_eq!(Role::from_staff_role(StaffRole::Doctor), Role::MedicalStaff);
        assert_eq!(Role::from_staff_role(StaffRole::Nurse), Role::MedicalStaff);
        assert_eq!(Role::from_staff_role(StaffRole::Other), Role::Reception);
    }

    #[test]
    fn test_only_admin_manages_equipment() {
        for role in Role::ALL {
            let caps = role.capabilities();
            assert_eq!(caps.manage_equipment, role == Role::Admin);
            assert_eq!(caps.assign_resources, role == Role::Admin);
            assert!(caps.update_beds);
        }
        assert_eq!(Capabilities::for_role(None), Capabilities::default());
    }

    #[test]
    fn test_guard_decisions() {
        let loading = AuthState::default();
        assert_eq!(guard(&loading, &Role::ALL), RouteDecision::Loading);

        let signed_out = AuthState {
            loading: false,
            ..AuthState::default()
        };
        assert_eq!(guard(&signed_out, &Role::ALL), RouteDecision::RedirectLogin);

        assert_eq!(
            guard(&signed_in(None), &Role::ALL),
            RouteDecision::RedirectUnauthorized
        );
        assert_eq!(
            guard(&signed_in(Some(Role::Reception)), &[Role::Admin]),
            RouteDecision::RedirectUnauthorized
        );
        assert_eq!(
            guard(&signed_in(Some(Role::Admin)), &[Role::Admin]),
            RouteDecision::Allow
        );
    }
}
