//! Hospital data model
//!
//! - **types**: One struct per table plus the status/role enums
//! - **query**: Filters, ordering and limits for selects
//!
//! Rows travel between the store, the API and the views as JSON objects;
//! the [`Record`] trait binds a typed row to the table it lives in so the
//! typed helpers can convert in both directions.

pub mod query;
pub mod types;

pub use query::{Filter, FilterOp, Order, Query};
pub use types::{
    Bed, BedStatus, Department, Equipment, EquipmentStatus, InvalidPriority, Notification,
    Patient, Priority, QueueItem, QueueStatus, Staff, StaffRole,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The tables owned by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Departments,
    Beds,
    Patients,
    PatientQueue,
    Staff,
    Equipment,
    Notifications,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Departments,
        Table::Beds,
        Table::Patients,
        Table::PatientQueue,
        Table::Staff,
        Table::Equipment,
        Table::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Departments => "departments",
            Table::Beds => "beds",
            Table::Patients => "patients",
            Table::PatientQueue => "patient_queue",
            Table::Staff => "staff",
            Table::Equipment => "equipment",
            Table::Notifications => "notifications",
        }
    }

    /// Check a JSON row against this table's schema and return it in
    /// canonical form: defaults filled in, unknown columns dropped
    pub fn normalize(&self, row: &serde_json::Value) -> Result<serde_json::Value, String> {
        fn canonical<T: Record>(row: &serde_json::Value) -> Result<serde_json::Value, String> {
            let typed = T::deserialize(row).map_err(|e| e.to_string())?;
            serde_json::to_value(typed).map_err(|e| e.to_string())
        }

        match self {
            Table::Departments => canonical::<Department>(row),
            Table::Beds => canonical::<Bed>(row),
            Table::Patients => canonical::<Patient>(row),
            Table::PatientQueue => canonical::<QueueItem>(row),
            Table::Staff => canonical::<Staff>(row),
            Table::Equipment => canonical::<Equipment>(row),
            Table::Notifications => canonical::<Notification>(row),
        }
    }

    /// Check that a JSON row satisfies this table's schema
    pub fn validate(&self, row: &serde_json::Value) -> Result<(), String> {
        self.normalize(row).map(|_| ())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown table name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown table '{0}'")]
pub struct UnknownTable(pub String);

impl FromStr for Table {
    type Err = UnknownTable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTable(s.to_string()))
    }
}

/// A typed row stored in a known table
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: Table;

    fn id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_names() {
        for table in Table::ALL {
            assert_eq!(table.as_str().parse::<Table>().unwrap(), table);
        }
        assert!("wards".parse::<Table>().is_err());
        assert_eq!(Table::PatientQueue.to_string(), "patient_queue");
    }

    #[test]
    fn test_validate_rejects_bad_enum() {
        let bed = json!({"department_id": "d1", "bed_number": "A1", "status": "broken"});
        assert!(Table::Beds.validate(&bed).is_err());

        let bed = json!({"department_id": "d1", "bed_number": "A1", "status": "cleaning"});
        assert!(Table::Beds.validate(&bed).is_ok());
    }

    #[test]
    fn test_normalize_fills_defaults() {
        let row = json!({"id": "n1", "user_id": "u1", "title": "t", "message": "m", "extra": 1});
        let normalized = Table::Notifications.normalize(&row).unwrap();
        assert_eq!(normalized["is_read"], false);
        assert!(normalized.get("extra").is_none());
        assert_eq!(normalized["id"], "n1");
    }
}
