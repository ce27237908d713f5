//! Data Transfer Objects
//!
//! Response types for the API endpoints that are not plain rows.

use serde::{Deserialize, Serialize};

/// Full health status
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy"
    pub status: String,
    /// "ok" or "error"
    pub storage: String,
    pub realtime_connections: usize,
    pub presence: usize,
    pub uptime_seconds: u64,
    pub version: String,
}
