//! API Routes
//!
//! Route handlers organized by functionality.

pub mod functions;
pub mod health;
pub mod tables;
