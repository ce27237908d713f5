//! Resource allocation
//!
//! Staff and equipment per department. Every editing control is admin-only;
//! for other roles the controls are left out of the cards entirely and a
//! read-only notice is shown instead.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, RwLock};

use super::department_name;
use super::feedback::{Toast, ViewError, ViewResult};
use crate::auth::{AuthContext, Role};
use crate::model::{Department, Equipment, EquipmentStatus, Query, Staff, StaffRole};
use crate::store::BackendExt;
use crate::sync::{SyncContext, SyncStrategy, SyncedView};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFilters {
    pub department: Option<String>,
    pub role: Option<StaffRole>,
    pub equipment_status: Option<EquipmentStatus>,
}

/// Page-level controls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceControls {
    pub add_equipment: bool,
    /// Shown to everyone who cannot edit
    pub read_only_notice: Option<String>,
}

/// Controls on one equipment card (admins only)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquipmentControls {
    pub statuses: Vec<EquipmentStatus>,
    pub assign_to: Vec<String>,
    pub can_unassign: bool,
    pub edit: bool,
    pub delete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquipmentCard {
    pub equipment: Equipment,
    pub department: String,
    pub status_label: &'static str,
    pub controls: Option<EquipmentControls>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaffCard {
    pub staff: Staff,
    pub department: String,
    /// Departments the member can be moved to (admins only)
    pub assign_to: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentGroup {
    /// `None` for the unassigned pool
    pub department: Option<Department>,
    pub staff: Vec<Staff>,
    pub equipment: Vec<Equipment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEquipment {
    pub name: String,
    pub kind: String,
    pub department_id: Option<String>,
}

fn missing_fields() -> ViewError {
    ViewError::validation(
        "Missing information",
        "Please provide both name and type for the equipment.",
    )
}

pub struct ResourceAllocation {
    auth: Arc<AuthContext>,
    staff: SyncedView<Staff>,
    equipment: SyncedView<Equipment>,
    departments: SyncedView<Department>,
    filters: RwLock<ResourceFilters>,
}

impl ResourceAllocation {
    pub fn new(ctx: &SyncContext, auth: Arc<AuthContext>) -> Self {
        Self {
            auth,
            staff: ctx.view("staff-changes", Query::new().asc("full_name"), SyncStrategy::Reload),
            equipment: ctx.view("equipment-changes", Query::new().asc("name"), SyncStrategy::Reload),
            departments: ctx.view("departments", Query::new().asc("name"), SyncStrategy::Reload),
            filters: RwLock::new(ResourceFilters::default()),
        }
    }

    pub async fn mount(&self) {
        self.departments.load().await;
        self.staff.mount().await;
        self.equipment.mount().await;
    }

    pub fn unmount(&self) {
        self.staff.unmount();
        self.equipment.unmount();
        self.departments.unmount();
    }

    pub fn staff(&self) -> &SyncedView<Staff> {
        &self.staff
    }

    pub fn equipment(&self) -> &SyncedView<Equipment> {
        &self.equipment
    }

    pub fn filters(&self) -> ResourceFilters {
        self.filters.read().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn set_filters(&self, filters: ResourceFilters) {
        if let Ok(mut current) = self.filters.write() {
            *current = filters;
        }
    }

    fn is_admin(&self) -> bool {
        self.auth.state().capabilities().manage_equipment
    }

    pub fn controls(&self) -> ResourceControls {
        let state = self.auth.state();
        if state.is_admin() {
            return ResourceControls {
                add_equipment: true,
                read_only_notice: None,
            };
        }
        let mode = match state.role() {
            Some(Role::MedicalStaff) => Role::MedicalStaff.label(),
            _ => Role::Reception.label(),
        };
        ResourceControls {
            add_equipment: false,
            read_only_notice: Some(format!(
                "You are viewing in {} mode. Only administrators can edit resources.",
                mode
            )),
        }
    }

    pub fn staff_cards(&self) -> Vec<StaffCard> {
        let filters = self.filters();
        let departments = self.departments.rows();
        let admin = self.is_admin();

        self.staff
            .rows()
            .into_iter()
            .filter(|s| {
                filters
                    .department
                    .as_deref()
                    .map_or(true, |d| s.department_id.as_deref() == Some(d))
            })
            .filter(|s| filters.role.map_or(true, |r| s.role == r))
            .map(|staff| StaffCard {
                department: department_name(&departments, staff.department_id.as_deref()),
                assign_to: admin.then(|| {
                    departments
                        .iter()
                        .filter(|d| staff.department_id.as_deref() != Some(d.id.as_str()))
                        .map(|d| d.id.clone())
                        .collect()
                }),
                staff,
            })
            .collect()
    }

    pub fn equipment_cards(&self) -> Vec<EquipmentCard> {
        let filters = self.filters();
        let departments = self.departments.rows();
        let admin = self.is_admin();

        self.equipment
            .rows()
            .into_iter()
            .filter(|e| {
                filters
                    .department
                    .as_deref()
                    .map_or(true, |d| e.department_id.as_deref() == Some(d))
            })
            .filter(|e| filters.equipment_status.map_or(true, |s| e.status == s))
            .map(|equipment| EquipmentCard {
                department: department_name(&departments, equipment.department_id.as_deref()),
                status_label: equipment.status.label(),
                controls: admin.then(|| EquipmentControls {
                    statuses: EquipmentStatus::ALL
                        .iter()
                        .copied()
                        .filter(|s| *s != equipment.status)
                        .collect(),
                    assign_to: departments
                        .iter()
                        .filter(|d| equipment.department_id.as_deref() != Some(d.id.as_str()))
                        .map(|d| d.id.clone())
                        .collect(),
                    can_unassign: equipment.department_id.is_some(),
                    edit: true,
                    delete: true,
                }),
                equipment,
            })
            .collect()
    }

    /// Staff and equipment per department, then the unassigned pool
    pub fn groups(&self) -> Vec<DepartmentGroup> {
        let staff = self.staff.rows();
        let equipment = self.equipment.rows();

        let group = |department: Option<&Department>| {
            let id = department.map(|d| d.id.as_str());
            DepartmentGroup {
                department: department.cloned(),
                staff: staff
                    .iter()
                    .filter(|s| s.department_id.as_deref() == id)
                    .cloned()
                    .collect(),
                equipment: equipment
                    .iter()
                    .filter(|e| e.department_id.as_deref() == id)
                    .cloned()
                    .collect(),
            }
        };

        let departments = self.departments.rows();
        let mut groups: Vec<_> = departments.iter().map(|d| group(Some(d))).collect();
        groups.push(group(None));
        groups
    }

    fn department_label(&self, department_id: Option<&str>) -> String {
        department_name(&self.departments.rows(), department_id)
    }

    fn assignment_text(&self, name: &str, department_id: Option<&str>) -> String {
        match department_id {
            Some(_) => format!(
                "{} has been assigned to {}",
                name,
                self.department_label(department_id)
            ),
            None => format!("{} has been unassigned", name),
        }
    }

    pub async fn assign_staff(
        &self,
        staff_id: &str,
        department_id: Option<&str>,
    ) -> ViewResult<Toast> {
        self.auth.state().require_admin("Assign staff")?;
        let member = self
            .staff
            .get(staff_id)
            .ok_or_else(|| ViewError::NotFound(format!("Staff member {}", staff_id)))?;

        let patch = json!({ "department_id": department_id, "updated_at": Utc::now() });
        let write = self.staff.backend().update_by_id::<Staff>(staff_id, patch);
        self.staff
            .mutate(
                staff_id,
                |s| s.department_id = department_id.map(str::to_string),
                write,
            )
            .await
            .map_err(ViewError::store("assign staff"))?;

        tracing::info!(staff_id = %staff_id, department_id = ?department_id, "Staff reassigned");
        Ok(Toast::success(
            "Staff Assignment Updated",
            self.assignment_text(&member.full_name, department_id),
        ))
    }

    pub async fn assign_equipment(
        &self,
        equipment_id: &str,
        department_id: Option<&str>,
    ) -> ViewResult<Toast> {
        self.auth.state().require_admin("Assign equipment")?;
        let item = self.find_equipment(equipment_id)?;

        let patch = json!({ "department_id": department_id, "updated_at": Utc::now() });
        let write = self.equipment.backend().update_by_id::<Equipment>(equipment_id, patch);
        self.equipment
            .mutate(
                equipment_id,
                |e| e.department_id = department_id.map(str::to_string),
                write,
            )
            .await
            .map_err(ViewError::store("assign equipment"))?;

        Ok(Toast::success(
            "Equipment Assignment Updated",
            self.assignment_text(&item.name, department_id),
        ))
    }

    pub async fn update_equipment_status(
        &self,
        equipment_id: &str,
        status: EquipmentStatus,
    ) -> ViewResult<Toast> {
        self.auth.state().require_admin("Update equipment status")?;
        let item = self.find_equipment(equipment_id)?;

        let patch = json!({ "status": status, "updated_at": Utc::now() });
        let write = self.equipment.backend().update_by_id::<Equipment>(equipment_id, patch);
        self.equipment
            .mutate(equipment_id, |e| e.status = status, write)
            .await
            .map_err(ViewError::store("update equipment status"))?;

        Ok(Toast::success(
            "Equipment Status Updated",
            format!("{} is now {}", item.name, status.label()),
        ))
    }

    pub async fn add_equipment(&self, input: NewEquipment) -> ViewResult<(Equipment, Toast)> {
        self.auth.state().require_admin("Add equipment")?;
        if input.name.trim().is_empty() || input.kind.trim().is_empty() {
            return Err(missing_fields());
        }

        let mut equipment = Equipment::new(input.name.trim(), input.kind.trim());
        equipment.department_id = input.department_id;
        equipment.last_maintenance_date = Some(Utc::now().date_naive());

        let created = self
            .equipment
            .backend()
            .insert_row(&equipment)
            .await
            .map_err(ViewError::store("add equipment"))?;
        self.equipment.upsert_local(created.clone());

        Ok((
            created,
            Toast::success("Equipment added", "The equipment has been added successfully."),
        ))
    }

    pub async fn edit_equipment(&self, edited: Equipment) -> ViewResult<Toast> {
        self.auth.state().require_admin("Edit equipment")?;
        if edited.name.trim().is_empty() || edited.kind.trim().is_empty() {
            return Err(missing_fields());
        }
        self.find_equipment(&edited.id)?;

        let patch = json!({
            "name": edited.name,
            "type": edited.kind,
            "status": edited.status,
            "department_id": edited.department_id,
            "last_maintenance_date": edited.last_maintenance_date,
            "notes": edited.notes,
            "updated_at": Utc::now(),
        });
        let id = edited.id.clone();
        let write = self.equipment.backend().update_by_id::<Equipment>(&id, patch);
        self.equipment
            .mutate(&id, |e| *e = edited, write)
            .await
            .map_err(ViewError::store("update equipment"))?;

        Ok(Toast::success(
            "Equipment updated",
            "The equipment has been updated successfully.",
        ))
    }

    pub async fn delete_equipment(&self, equipment_id: &str) -> ViewResult<Toast> {
        self.auth.state().require_admin("Delete equipment")?;
        self.find_equipment(equipment_id)?;

        self.equipment
            .backend()
            .delete_by_id::<Equipment>(equipment_id)
            .await
            .map_err(ViewError::store("delete equipment"))?;
        self.equipment.remove_local(equipment_id);

        Ok(Toast::success(
            "Equipment deleted",
            "The equipment has been deleted successfully.",
        ))
    }

    fn find_equipment(&self, equipment_id: &str) -> ViewResult<Equipment> {
        self.equipment
            .get(equipment_id)
            .ok_or_else(|| ViewError::NotFound(format!("Equipment {}", equipment_id)))
    }
}
