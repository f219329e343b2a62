//! Polymorphic "who" references: an award, issue or sale points at a
//! student, employee or parent, selected by a sibling `role` column.

use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::collection::Collection;
use crate::ipc::error::{ActionError, ActionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartyRole {
    Student,
    Employee,
    Parent,
}

impl PartyRole {
    pub const ALL: [PartyRole; 3] = [Self::Student, Self::Employee, Self::Parent];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "Student",
            Self::Employee => "Employee",
            Self::Parent => "Parent",
        }
    }

    /// Unknown discriminators are rejected here, before any lookup happens.
    pub fn parse(s: &str) -> ActionResult<Self> {
        match s {
            "Student" => Ok(Self::Student),
            "Employee" => Ok(Self::Employee),
            "Parent" => Ok(Self::Parent),
            other => Err(ActionError::bad_params_with(
                "role must be one of: Student, Employee, Parent",
                json!({ "role": other }),
            )),
        }
    }

    pub fn collection(self) -> Collection {
        match self {
            Self::Student => Collection::Student,
            Self::Employee => Collection::Employee,
            Self::Parent => Collection::Parent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub role: PartyRole,
    pub id: String,
    pub display_name: String,
}

impl Party {
    pub fn to_json(&self) -> Value {
        json!({
            "role": self.role.as_str(),
            "id": self.id,
            "displayName": self.display_name,
        })
    }
}

fn display_name(last: &str, first: &str) -> String {
    format!("{}, {}", last, first)
}

/// Resolve one reference within a school. Soft-deleted targets count as
/// missing.
pub fn resolve(conn: &Connection, school_id: &str, role: PartyRole, id: &str) -> ActionResult<Party> {
    let sql = format!(
        "SELECT last_name, first_name FROM {} WHERE id = ? AND school_id = ? AND del_flag = 0",
        role.collection().table()
    );
    let names: Option<(String, String)> = conn
        .query_row(&sql, (id, school_id), |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?;
    let (last, first) = names.ok_or_else(|| {
        ActionError::NotFound {
            entity: role.collection().entity_type(),
            details: Some(json!({ "role": role.as_str(), "id": id })),
        }
    })?;
    Ok(Party {
        role,
        id: id.to_string(),
        display_name: display_name(&last, &first),
    })
}

/// Resolve many references with one query per role. The output lines up
/// with `refs`; a missing target or a failed lookup only affects its own
/// slots.
pub fn resolve_many(
    conn: &Connection,
    school_id: &str,
    refs: &[(PartyRole, String)],
) -> Vec<ActionResult<Party>> {
    let mut found: HashMap<PartyRole, Result<HashMap<String, String>, String>> = HashMap::new();
    for role in PartyRole::ALL {
        let ids: Vec<&str> = refs
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, id)| id.as_str())
            .collect();
        if ids.is_empty() {
            continue;
        }
        let names = load_names(conn, school_id, role, &ids).map_err(|e| e.to_string());
        if let Err(e) = &names {
            tracing::warn!(role = role.as_str(), error = %e, "bulk party lookup failed");
        }
        found.insert(role, names);
    }

    refs.iter()
        .map(|(role, id)| match found.get(role) {
            Some(Ok(names)) => match names.get(id) {
                Some(name) => Ok(Party {
                    role: *role,
                    id: id.clone(),
                    display_name: name.clone(),
                }),
                None => Err(ActionError::NotFound {
                    entity: role.collection().entity_type(),
                    details: Some(json!({ "role": role.as_str(), "id": id })),
                }),
            },
            Some(Err(message)) => Err(ActionError::Storage(message.clone())),
            None => Err(ActionError::not_found_id(role.collection().entity_type(), id)),
        })
        .collect()
}

fn load_names(
    conn: &Connection,
    school_id: &str,
    role: PartyRole,
    ids: &[&str],
) -> ActionResult<HashMap<String, String>> {
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT id, last_name, first_name FROM {}
         WHERE school_id = ? AND del_flag = 0 AND id IN ({})",
        role.collection().table(),
        placeholders
    );
    let mut bind: Vec<SqlValue> = vec![SqlValue::Text(school_id.to_string())];
    bind.extend(ids.iter().map(|id| SqlValue::Text(id.to_string())));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            let id: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok((id, display_name(&last, &first)))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

/// `{ <key>: party }` on success or `{ <key>Error: error }` on failure, for
/// embedding in list rows.
pub fn attach(row: &mut Value, key: &str, resolved: ActionResult<Party>) {
    match resolved {
        Ok(p) => row[key] = p.to_json(),
        Err(e) => {
            row[key] = Value::Null;
            row[format!("{}Error", key)] = e.to_json();
        }
    }
}

/// Pull the `(role, id)` pair out of each stored row. A row whose role no
/// longer parses still gets a slot so results line up with `rows`.
pub fn row_refs(rows: &[Value], id_key: &str) -> Vec<ActionResult<(PartyRole, String)>> {
    rows.iter()
        .map(|row| {
            let role = PartyRole::parse(row["role"].as_str().unwrap_or_default())?;
            let id = row[id_key].as_str().unwrap_or_default().to_string();
            Ok((role, id))
        })
        .collect()
}

/// Resolve the recipient of every row in bulk and `attach` it under `key`.
pub fn attach_all(conn: &Connection, school_id: &str, rows: &mut [Value], id_key: &str, key: &str) {
    let refs = row_refs(rows, id_key);
    let valid: Vec<(PartyRole, String)> = refs
        .iter()
        .filter_map(|r| r.as_ref().ok().cloned())
        .collect();
    let mut resolved = resolve_many(conn, school_id, &valid).into_iter();
    for (row, r) in rows.iter_mut().zip(refs) {
        let outcome = match r {
            Ok(_) => match resolved.next() {
                Some(p) => p,
                None => continue,
            },
            Err(e) => Err(e),
        };
        attach(row, key, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for table in ["students", "employees", "parents"] {
            conn.execute(
                &format!(
                    "CREATE TABLE {}(id TEXT PRIMARY KEY, school_id TEXT, last_name TEXT, first_name TEXT, del_flag INTEGER NOT NULL DEFAULT 0)",
                    table
                ),
                [],
            )
            .unwrap();
        }
        conn.execute_batch(
            "INSERT INTO students(id, school_id, last_name, first_name) VALUES('st1', 's1', 'Lovelace', 'Ada');
             INSERT INTO employees(id, school_id, last_name, first_name) VALUES('e1', 's1', 'Turing', 'Alan');
             INSERT INTO parents(id, school_id, last_name, first_name) VALUES('p1', 's1', 'Byron', 'Anne');
             INSERT INTO students(id, school_id, last_name, first_name, del_flag) VALUES('st9', 's1', 'Gone', 'Gary', 1);
             INSERT INTO students(id, school_id, last_name, first_name) VALUES('st2', 's2', 'Hopper', 'Grace');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn every_role_resolves() {
        let conn = db();
        let cases = [
            (PartyRole::Student, "st1", "Lovelace, Ada"),
            (PartyRole::Employee, "e1", "Turing, Alan"),
            (PartyRole::Parent, "p1", "Byron, Anne"),
        ];
        for (role, id, name) in cases {
            let p = resolve(&conn, "s1", role, id).unwrap();
            assert_eq!(p.display_name, name);
            assert_eq!(p.role, role);
        }
    }

    #[test]
    fn unknown_discriminator_fails_deterministically() {
        for _ in 0..3 {
            let e = PartyRole::parse("Alumnus").unwrap_err();
            assert_eq!(e.code(), "bad_params");
        }
        assert!(PartyRole::parse("student").is_err());
    }

    #[test]
    fn id_in_wrong_collection_is_not_found() {
        let conn = db();
        let e = resolve(&conn, "s1", PartyRole::Employee, "st1").unwrap_err();
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn other_school_and_deleted_targets_are_missing() {
        let conn = db();
        assert!(resolve(&conn, "s1", PartyRole::Student, "st2").is_err());
        assert!(resolve(&conn, "s1", PartyRole::Student, "st9").is_err());
    }

    #[test]
    fn bulk_resolution_is_partial_success_in_input_order() {
        let conn = db();
        let refs = vec![
            (PartyRole::Parent, "p1".to_string()),
            (PartyRole::Student, "missing".to_string()),
            (PartyRole::Student, "st1".to_string()),
            (PartyRole::Employee, "e1".to_string()),
            (PartyRole::Student, "st1".to_string()),
        ];
        let out = resolve_many(&conn, "s1", &refs);
        assert_eq!(out.len(), refs.len());
        assert_eq!(out[0].as_ref().unwrap().display_name, "Byron, Anne");
        assert_eq!(out[1].as_ref().unwrap_err().code(), "not_found");
        assert_eq!(out[2].as_ref().unwrap().id, "st1");
        assert_eq!(out[3].as_ref().unwrap().role, PartyRole::Employee);
        assert_eq!(out[4].as_ref().unwrap().display_name, "Lovelace, Ada");
    }

    #[test]
    fn attach_marks_failures_inline() {
        let mut row = json!({ "id": "i1" });
        attach(&mut row, "issueTo", Err(ActionError::not_found_id("student", "st9")));
        assert!(row["issueTo"].is_null());
        assert_eq!(row["issueToError"]["code"], json!("not_found"));
    }

    #[test]
    fn rows_with_bad_roles_keep_their_slot() {
        let conn = db();
        let mut rows = vec![
            json!({ "role": "Student", "awardToId": "st1" }),
            json!({ "role": "Janitor", "awardToId": "x" }),
            json!({ "role": "Parent", "awardToId": "p1" }),
            json!({ "role": "Student", "awardToId": "st9" }),
        ];
        attach_all(&conn, "s1", &mut rows, "awardToId", "awardTo");
        assert_eq!(rows[0]["awardTo"]["displayName"], json!("Lovelace, Ada"));
        assert_eq!(rows[1]["awardToError"]["code"], json!("bad_params"));
        assert_eq!(rows[2]["awardTo"]["id"], json!("p1"));
        assert_eq!(rows[3]["awardToError"]["code"], json!("not_found"));
    }
}
