//! Authentication context and role gating
//!
//! - **context**: Session following, profile lookup and update, `AuthState`
//! - **role**: Application roles, capabilities and the route guard
//! - **onboarding**: Staff row provisioning for new accounts

mod context;
mod onboarding;
mod role;

pub use context::{AuthContext, AuthError, AuthState, AuthUser, SessionHandle, UserProfile};
pub use onboarding::{onboard, Onboarded, StaffSignup, ADMIN_DEPARTMENT};
pub use role::{guard, Capabilities, Role, RouteDecision};
