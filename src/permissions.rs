use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use crate::ipc::error::{ActionError, ActionResult};

/// Closed set of flags a staff role may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    ManageClasses,
    ManageDepartments,
    ManageEmployees,
    ManageStudents,
    ManageParents,
    ManageRoles,
    ManageInventory,
    IssueInventory,
    SellInventory,
    ManageAwards,
    ManagePostal,
    ManageSalary,
    MarkAttendance,
    ManageAssignments,
    ViewHistory,
    ManageTrash,
}

impl Permission {
    pub const ALL: [Permission; 16] = [
        Self::ManageClasses,
        Self::ManageDepartments,
        Self::ManageEmployees,
        Self::ManageStudents,
        Self::ManageParents,
        Self::ManageRoles,
        Self::ManageInventory,
        Self::IssueInventory,
        Self::SellInventory,
        Self::ManageAwards,
        Self::ManagePostal,
        Self::ManageSalary,
        Self::MarkAttendance,
        Self::ManageAssignments,
        Self::ViewHistory,
        Self::ManageTrash,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManageClasses => "manageClasses",
            Self::ManageDepartments => "manageDepartments",
            Self::ManageEmployees => "manageEmployees",
            Self::ManageStudents => "manageStudents",
            Self::ManageParents => "manageParents",
            Self::ManageRoles => "manageRoles",
            Self::ManageInventory => "manageInventory",
            Self::IssueInventory => "issueInventory",
            Self::SellInventory => "sellInventory",
            Self::ManageAwards => "manageAwards",
            Self::ManagePostal => "managePostal",
            Self::ManageSalary => "manageSalary",
            Self::MarkAttendance => "markAttendance",
            Self::ManageAssignments => "manageAssignments",
            Self::ViewHistory => "viewHistory",
            Self::ManageTrash => "manageTrash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// Build from a `{flag: bool}` object. Missing flags are off.
    pub fn from_flags(flags: &Value) -> ActionResult<Self> {
        let mut set = Self::default();
        set.apply_flags(flags)?;
        Ok(set)
    }

    /// Overlay a partial `{flag: bool}` object onto the current set.
    pub fn apply_flags(&mut self, flags: &Value) -> ActionResult<()> {
        let obj = flags
            .as_object()
            .ok_or_else(|| ActionError::bad_params("permissions must be an object"))?;
        for (key, value) in obj {
            let Some(permission) = Permission::parse(key) else {
                return Err(ActionError::bad_params_with(
                    "unknown permission flag",
                    json!({ "flag": key }),
                ));
            };
            let Some(enabled) = value.as_bool() else {
                return Err(ActionError::bad_params_with(
                    "permission flags must be boolean",
                    json!({ "flag": key }),
                ));
            };
            if enabled {
                self.0.insert(permission);
            } else {
                self.0.remove(&permission);
            }
        }
        Ok(())
    }

    /// Every known flag, explicitly true or false.
    pub fn to_flags(&self) -> Value {
        let mut out = Map::new();
        for p in Permission::ALL {
            out.insert(p.as_str().to_string(), Value::Bool(self.contains(p)));
        }
        Value::Object(out)
    }

    /// Decode the stored column. A corrupt value grants nothing.
    pub fn from_stored(raw: &str) -> Self {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| Self::from_flags(&v).ok())
            .unwrap_or_default()
    }
}
