use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::ipc::error::{ActionError, ActionResult};
use crate::permissions::{Permission, PermissionSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRole {
    Admin,
    Staff { role_id: String },
}

/// The authenticated caller. Every entity query is scoped by `school_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub school_id: String,
    pub user_id: String,
    pub role: SessionRole,
}

impl Session {
    pub fn from_params(params: &Value) -> ActionResult<Self> {
        let school_id = required_trimmed(params, "schoolId")?;
        let user_id = required_trimmed(params, "userId")?;
        let role = match params.get("role") {
            Some(Value::String(s)) if s == "admin" => SessionRole::Admin,
            Some(Value::Object(obj)) => {
                let role_id = obj
                    .get("roleId")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| ActionError::bad_params("role.roleId must be a string"))?;
                SessionRole::Staff {
                    role_id: role_id.to_string(),
                }
            }
            _ => {
                return Err(ActionError::bad_params(
                    "role must be \"admin\" or {\"roleId\": ...}",
                ))
            }
        };
        Ok(Self {
            school_id,
            user_id,
            role,
        })
    }

    pub fn to_json(&self) -> Value {
        let role = match &self.role {
            SessionRole::Admin => json!("admin"),
            SessionRole::Staff { role_id } => json!({ "roleId": role_id }),
        };
        json!({
            "schoolId": self.school_id,
            "userId": self.user_id,
            "role": role,
        })
    }

    /// Check a permission flag. Admins pass; staff are checked against their
    /// live role in this school, and a missing role grants nothing.
    pub fn require(&self, conn: &Connection, permission: Permission) -> ActionResult<()> {
        let role_id = match &self.role {
            SessionRole::Admin => return Ok(()),
            SessionRole::Staff { role_id } => role_id,
        };
        let stored: Option<String> = conn
            .query_row(
                "SELECT permissions FROM roles WHERE id = ? AND school_id = ? AND del_flag = 0",
                (role_id, &self.school_id),
                |r| r.get(0),
            )
            .optional()?;
        let granted = stored
            .map(|raw| PermissionSet::from_stored(&raw).contains(permission))
            .unwrap_or(false);
        if granted {
            Ok(())
        } else {
            Err(ActionError::Forbidden(permission.as_str()))
        }
    }
}

fn required_trimmed(params: &Value, key: &str) -> ActionResult<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ActionError::bad_params(format!("missing {}", key)))
}
