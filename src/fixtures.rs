//! Test and demo data
//!
//! The one place sample rows are defined. Widgets never carry their own
//! mock data; tests, `wardwatch --seed` and the calendar all draw from
//! here. Ids are fixed so tests can refer to rows by name.

use chrono::{Duration, NaiveDate, NaiveTime};
use serde_json::Value;

use crate::dashboard::{CalendarEvent, EventKind};
use crate::model::{
    Bed, BedStatus, Department, Equipment, EquipmentStatus, Patient, Priority, QueueItem, Query,
    Record, Staff, StaffRole, Table,
};
use crate::store::{Backend, StoreResult};

pub const ADMIN_USER: &str = "user-admin";
pub const DOCTOR_USER: &str = "user1";
pub const NURSE_USER: &str = "user2";
pub const RECEPTION_USER: &str = "user-reception";

/// A small hospital
#[derive(Debug, Clone)]
pub struct Hospital {
    pub departments: Vec<Department>,
    pub staff: Vec<Staff>,
    pub equipment: Vec<Equipment>,
    pub beds: Vec<Bed>,
    pub patients: Vec<Patient>,
    pub queue: Vec<QueueItem>,
}

impl Hospital {
    /// Rows per table, in insert order
    pub fn rows(&self) -> StoreResult<Vec<(Table, Vec<Value>)>> {
        fn values<T: Record>(rows: &[T]) -> StoreResult<(Table, Vec<Value>)> {
            let values = rows
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok((T::TABLE, values))
        }

        Ok(vec![
            values(&self.departments)?,
            values(&self.staff)?,
            values(&self.equipment)?,
            values(&self.beds)?,
            values(&self.patients)?,
            values(&self.queue)?,
        ])
    }
}

fn with_id<T>(id: &str, mut row: T, set: impl FnOnce(&mut T, String)) -> T {
    set(&mut row, id.to_string());
    row
}

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

pub fn hospital() -> Hospital {
    let departments = [
        ("dept-1", "Emergency", 1),
        ("dept-2", "Cardiology", 2),
        ("dept-3", "General Practice", 1),
        ("dept-4", "Pediatrics", 3),
        ("dept-5", "Maternity", 2),
    ]
    .into_iter()
    .map(|(id, name, floor)| with_id(id, Department::new(name, floor), |d, id| d.id = id))
    .collect();

    let mut staff: Vec<Staff> = [
        ("staff-1", DOCTOR_USER, "Dr. John Smith", StaffRole::Doctor, "dept-1", "john.smith"),
        ("staff-2", NURSE_USER, "Nurse Maria Garcia", StaffRole::Nurse, "dept-1", "maria.garcia"),
        ("staff-3", "user3", "Dr. Robert Johnson", StaffRole::Doctor, "dept-2", "robert.johnson"),
        ("staff-4", "user4", "Nurse Sarah Williams", StaffRole::Nurse, "dept-2", "sarah.williams"),
        ("staff-5", "user5", "Dr. David Brown", StaffRole::Doctor, "dept-3", "david.brown"),
        ("staff-6", "user6", "Nurse Emily Davis", StaffRole::Nurse, "dept-3", "emily.davis"),
        ("staff-7", "user7", "Dr. Michael Wilson", StaffRole::Doctor, "dept-4", "michael.wilson"),
        ("staff-8", "user8", "Nurse Jessica Taylor", StaffRole::Nurse, "dept-4", "jessica.taylor"),
        ("staff-9", "user9", "Dr. Thomas Anderson", StaffRole::Doctor, "dept-5", "thomas.anderson"),
        ("staff-10", "user10", "Nurse Jennifer Martin", StaffRole::Nurse, "dept-5", "jennifer.martin"),
        ("staff-13", ADMIN_USER, "Admin Wilson", StaffRole::Admin, "dept-1", "admin.wilson"),
        ("staff-14", RECEPTION_USER, "Rita Front", StaffRole::Other, "dept-3", "rita.front"),
    ]
    .into_iter()
    .map(|(id, user, name, role, dept, mail)| {
        with_id(
            id,
            Staff::new(name, role)
                .user(user)
                .department(dept)
                .email(format!("{}@hospital.com", mail)),
            |s, id| s.id = id,
        )
    })
    .collect();

    // Staff without a login or a department
    staff.push(with_id(
        "staff-11",
        Staff::new("Dr. Lisa Rodriguez", StaffRole::Doctor).email("lisa.rodriguez@hospital.com"),
        |s, id| s.id = id,
    ));
    staff.push(with_id(
        "staff-12",
        Staff::new("Nurse Kevin Lee", StaffRole::Nurse).email("kevin.lee@hospital.com"),
        |s, id| s.id = id,
    ));

    let equipment = [
        ("equip-1", "Ventilator A", "respiratory", EquipmentStatus::InUse, Some("dept-1"), date(2023, 12, 15)),
        ("equip-2", "MRI Machine", "imaging", EquipmentStatus::Available, Some("dept-2"), date(2024, 1, 10)),
        ("equip-3", "Ultrasound Scanner", "imaging", EquipmentStatus::InUse, Some("dept-5"), date(2023, 11, 20)),
        ("equip-4", "Defibrillator B", "emergency", EquipmentStatus::Available, Some("dept-1"), date(2024, 2, 5)),
        ("equip-5", "X-Ray Machine", "imaging", EquipmentStatus::Maintenance, Some("dept-3"), date(2024, 3, 1)),
        ("equip-6", "Patient Monitor C", "monitoring", EquipmentStatus::InUse, Some("dept-4"), date(2024, 1, 25)),
        ("equip-7", "Infusion Pump D", "medication", EquipmentStatus::Available, Some("dept-2"), date(2023, 12, 10)),
        ("equip-8", "Surgical Robot", "surgical", EquipmentStatus::InUse, Some("dept-2"), date(2024, 2, 15)),
        ("equip-9", "Anesthesia Machine", "surgical", EquipmentStatus::Available, Some("dept-2"), date(2024, 1, 5)),
        ("equip-10", "ECG Machine", "monitoring", EquipmentStatus::Available, None, date(2023, 11, 30)),
        ("equip-11", "Portable X-Ray", "imaging", EquipmentStatus::Available, None, date(2024, 2, 20)),
        ("equip-12", "Ventilator B", "respiratory", EquipmentStatus::Maintenance, None, date(2024, 3, 5)),
    ]
    .into_iter()
    .map(|(id, name, kind, status, dept, serviced)| {
        let mut e = Equipment::new(name, kind).status(status);
        e.id = id.to_string();
        e.department_id = dept.map(str::to_string);
        e.last_maintenance_date = serviced;
        e
    })
    .collect();

    let mut beds = Vec::new();
    for (d, code) in ["ER", "CA", "GP", "PE", "MA"].iter().enumerate() {
        for n in 0..4 {
            let status = BedStatus::ALL[(d + n) % BedStatus::ALL.len()];
            let mut bed = Bed::new(format!("dept-{}", d + 1), format!("{}-{:02}", code, n + 1))
                .status(status);
            bed.id = format!("bed-{}-{}", d + 1, n + 1);
            beds.push(bed);
        }
    }

    let patients: Vec<Patient> = [
        ("patient-1", "John Doe", "555-100-2000"),
        ("patient-2", "Jane Roe", "555-100-2001"),
        ("patient-3", "Alex Kim", "555-100-2002"),
        ("patient-4", "Priya Patel", "555-100-2003"),
        ("patient-5", "Omar Haddad", "555-100-2004"),
    ]
    .into_iter()
    .map(|(id, name, phone)| with_id(id, Patient::new(name).contact(phone), |p, id| p.id = id))
    .collect();

    let queue = [
        ("queue-1", "dept-1", "patient-1", Priority::EMERGENCY, Some(10)),
        ("queue-2", "dept-1", "patient-2", Priority::STANDARD, Some(45)),
        ("queue-3", "dept-1", "patient-3", Priority::URGENT, Some(20)),
        ("queue-4", "dept-2", "patient-4", Priority::NON_URGENT, Some(90)),
        ("queue-5", "dept-3", "patient-5", Priority::SCHEDULED, None),
    ]
    .into_iter()
    .map(|(id, dept, patient, priority, wait)| {
        let mut item = QueueItem::new(dept, patient, priority);
        item.id = id.to_string();
        item.estimated_wait_time = wait;
        item
    })
    .collect();

    Hospital {
        departments,
        staff,
        equipment,
        beds,
        patients,
        queue,
    }
}

/// Insert the sample hospital unless departments already exist
///
/// Returns the number of rows written.
pub async fn seed<B: Backend + ?Sized>(backend: &B) -> StoreResult<usize> {
    let existing = backend
        .select(Table::Departments, &Query::new().limit(1))
        .await?;
    if !existing.is_empty() {
        tracing::info!("Store already has data, skipping seed");
        return Ok(0);
    }

    let mut written = 0;
    for (table, rows) in hospital().rows()? {
        let count = backend.insert(table, rows).await?.len();
        tracing::debug!(table = %table, rows = count, "Seeded table");
        written += count;
    }

    tracing::info!(rows = written, "Seeded sample hospital");
    Ok(written)
}

fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Calendar events around `today`
pub fn calendar_events(today: NaiveDate) -> Vec<CalendarEvent> {
    let event = |id: &str, title: &str, offset: i64, start, end, kind| CalendarEvent {
        id: id.to_string(),
        title: title.to_string(),
        date: today + Duration::days(offset),
        start_time: start,
        end_time: end,
        kind,
        description: None,
        participants: Vec::new(),
        location: None,
    };

    let mut morning = event("event-1", "Morning Shift", -2, at(7, 0), at(15, 0), EventKind::Shift);
    morning.location = Some("Emergency Department".to_string());

    let mut meeting = event("event-2", "Staff Meeting", 0, at(10, 0), at(11, 30), EventKind::Meeting);
    meeting.description = Some("Weekly staff meeting to discuss department updates".to_string());
    meeting.participants = vec![
        "Dr. Smith".to_string(),
        "Nurse Johnson".to_string(),
        "Admin Wilson".to_string(),
    ];
    meeting.location = Some("Conference Room A".to_string());

    let mut maintenance = event(
        "event-3",
        "Equipment Maintenance",
        0,
        at(14, 0),
        at(16, 0),
        EventKind::Maintenance,
    );
    maintenance.description = Some("Scheduled maintenance for MRI machine".to_string());
    maintenance.location = Some("Radiology Department".to_string());

    let mut appointment = event(
        "event-4",
        "Patient Appointment",
        1,
        at(9, 30),
        at(10, 0),
        EventKind::Appointment,
    );
    appointment.description = Some("Follow-up appointment with John Doe".to_string());
    appointment.location = Some("Examination Room 3".to_string());

    let mut night = event("event-5", "Night Shift", 2, at(23, 0), at(7, 0), EventKind::Shift);
    night.location = Some("Intensive Care Unit".to_string());

    vec![morning, meeting, maintenance, appointment, night]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::ChangeFeed;
    use crate::store::SqliteStore;
    use std::sync::Arc;

    #[test]
    fn test_hospital_rows_validate() {
        for (table, rows) in hospital().rows().unwrap() {
            for row in &rows {
                assert!(table.validate(row).is_ok(), "{} row invalid: {}", table, row);
            }
        }
    }

    #[tokio::test]
    async fn test_seed_is_skipped_when_data_exists() {
        let store = SqliteStore::in_memory(Arc::new(ChangeFeed::default())).unwrap();
        let written = seed(&store).await.unwrap();
        let h = hospital();
        assert_eq!(
            written,
            h.departments.len() + h.staff.len() + h.equipment.len() + h.beds.len()
                + h.patients.len() + h.queue.len()
        );
        assert_eq!(store.count(Table::Beds).await.unwrap(), 20);

        assert_eq!(seed(&store).await.unwrap(), 0);
    }
}
