//! Row types for the hospital tables
//!
//! Each struct mirrors one table. Ids and timestamps are assigned by the
//! store on insert, so a freshly built row carries an empty id and no
//! timestamps until it has been written.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Record, Table};

// ============================================
// DEPARTMENTS
// ============================================

/// A hospital department
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    pub floor: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Department {
    pub fn new(name: impl Into<String>, floor: i32) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            floor,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Record for Department {
    const TABLE: Table = Table::Departments;

    fn id(&self) -> &str {
        &self.id
    }
}

// ============================================
// BEDS
// ============================================

/// Occupancy state of a bed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BedStatus {
    Available,
    Occupied,
    Reserved,
    Cleaning,
}

impl BedStatus {
    pub const ALL: [BedStatus; 4] = [
        BedStatus::Available,
        BedStatus::Occupied,
        BedStatus::Reserved,
        BedStatus::Cleaning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BedStatus::Available => "available",
            BedStatus::Occupied => "occupied",
            BedStatus::Reserved => "reserved",
            BedStatus::Cleaning => "cleaning",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BedStatus::Available => "Available",
            BedStatus::Occupied => "Occupied",
            BedStatus::Reserved => "Reserved",
            BedStatus::Cleaning => "Cleaning",
        }
    }
}

/// A bed in a department
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bed {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub department_id: String,
    pub bed_number: String,
    pub status: BedStatus,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Bed {
    pub fn new(department_id: impl Into<String>, bed_number: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            department_id: department_id.into(),
            bed_number: bed_number.into(),
            status: BedStatus::Available,
            patient_id: None,
            notes: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn status(mut self, status: BedStatus) -> Self {
        self.status = status;
        self
    }
}

impl Record for Bed {
    const TABLE: Table = Table::Beds;

    fn id(&self) -> &str {
        &self.id
    }
}

// ============================================
// PATIENTS
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Patient {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            full_name: full_name.into(),
            date_of_birth: None,
            contact_number: None,
            email: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn contact(mut self, contact_number: impl Into<String>) -> Self {
        self.contact_number = Some(contact_number.into());
        self
    }
}

impl Record for Patient {
    const TABLE: Table = Table::Patients;

    fn id(&self) -> &str {
        &self.id
    }
}

// ============================================
// PATIENT QUEUE
// ============================================

/// Triage priority, 1 (Emergency) through 5 (Scheduled)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const EMERGENCY: Priority = Priority(1);
    pub const URGENT: Priority = Priority(2);
    pub const STANDARD: Priority = Priority(3);
    pub const NON_URGENT: Priority = Priority(4);
    pub const SCHEDULED: Priority = Priority(5);

    pub fn new(level: u8) -> Result<Self, InvalidPriority> {
        Self::try_from(level)
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    pub fn label(&self) -> &'static str {
        match self.0 {
            1 => "Emergency",
            2 => "Urgent",
            3 => "Standard",
            4 => "Non-urgent",
            _ => "Scheduled",
        }
    }

    /// Emergency and urgent items count as high priority
    pub fn is_high(&self) -> bool {
        self.0 <= 2
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::STANDARD
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidPriority;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        if (1..=5).contains(&level) {
            Ok(Priority(level))
        } else {
            Err(InvalidPriority(level))
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.0
    }
}

/// Priority outside 1-5
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("priority must be between 1 and 5, got {0}")]
pub struct InvalidPriority(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    InProgress,
    Completed,
    Cancelled,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 4] = [
        QueueStatus::Waiting,
        QueueStatus::InProgress,
        QueueStatus::Completed,
        QueueStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Completed => "completed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "Waiting",
            QueueStatus::InProgress => "In Progress",
            QueueStatus::Completed => "Completed",
            QueueStatus::Cancelled => "Cancelled",
        }
    }
}

/// A patient waiting for a department
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub department_id: String,
    pub patient_id: String,
    #[serde(default)]
    pub priority: Priority,
    /// Minutes
    #[serde(default)]
    pub estimated_wait_time: Option<u32>,
    pub status: QueueStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(
        department_id: impl Into<String>,
        patient_id: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: String::new(),
            department_id: department_id.into(),
            patient_id: patient_id.into(),
            priority,
            estimated_wait_time: None,
            status: QueueStatus::Waiting,
            notes: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Record for QueueItem {
    const TABLE: Table = Table::PatientQueue;

    fn id(&self) -> &str {
        &self.id
    }
}

// ============================================
// STAFF
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Doctor,
    Nurse,
    Admin,
    Other,
}

impl StaffRole {
    pub const ALL: [StaffRole; 4] = [
        StaffRole::Doctor,
        StaffRole::Nurse,
        StaffRole::Admin,
        StaffRole::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Doctor => "doctor",
            StaffRole::Nurse => "nurse",
            StaffRole::Admin => "admin",
            StaffRole::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Staff {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Auth identity, absent for staff without a login
    #[serde(default)]
    pub user_id: Option<String>,
    pub full_name: String,
    pub role: StaffRole,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Staff {
    pub fn new(full_name: impl Into<String>, role: StaffRole) -> Self {
        Self {
            id: String::new(),
            user_id: None,
            full_name: full_name.into(),
            role,
            department_id: None,
            contact_number: None,
            email: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl Record for Staff {
    const TABLE: Table = Table::Staff;

    fn id(&self) -> &str {
        &self.id
    }
}

// ============================================
// EQUIPMENT
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    Available,
    InUse,
    Maintenance,
    OutOfOrder,
}

impl EquipmentStatus {
    pub const ALL: [EquipmentStatus; 4] = [
        EquipmentStatus::Available,
        EquipmentStatus::InUse,
        EquipmentStatus::Maintenance,
        EquipmentStatus::OutOfOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentStatus::Available => "available",
            EquipmentStatus::InUse => "in_use",
            EquipmentStatus::Maintenance => "maintenance",
            EquipmentStatus::OutOfOrder => "out_of_order",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EquipmentStatus::Available => "Available",
            EquipmentStatus::InUse => "In Use",
            EquipmentStatus::Maintenance => "Maintenance",
            EquipmentStatus::OutOfOrder => "Out Of Order",
        }
    }

    /// Not usable for patient care
    pub fn is_down(&self) -> bool {
        matches!(self, EquipmentStatus::Maintenance | EquipmentStatus::OutOfOrder)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Equipment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: EquipmentStatus,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub last_maintenance_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Equipment {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            kind: kind.into(),
            status: EquipmentStatus::Available,
            department_id: None,
            last_maintenance_date: None,
            notes: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn status(mut self, status: EquipmentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }
}

impl Record for Equipment {
    const TABLE: Table = Table::Equipment;

    fn id(&self) -> &str {
        &self.id
    }
}

// ============================================
// NOTIFICATIONS
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    /// Alert style: info, warning, message, ...
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub related_entity_type: Option<String>,
    #[serde(default)]
    pub related_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            user_id: user_id.into(),
            title: title.into(),
            message: message.into(),
            is_read: false,
            kind: None,
            related_entity_type: None,
            related_entity_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

impl Record for Notification {
    const TABLE: Table = Table::Notifications;

    fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.label())
    }
}
