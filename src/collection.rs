//! Registry of tenant-scoped entity tables and the row operations they share.
//!
//! Table and column names reaching the SQL built here always come from
//! `'static` strings in this crate, never from request params.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::ipc::error::{ActionError, ActionResult};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Class,
    Department,
    Employee,
    Student,
    Parent,
    Role,
    Assignment,
    Postal,
    Award,
    InventoryProduct,
    InventoryIssue,
    InventorySale,
    SalaryPayment,
}

impl Collection {
    pub const ALL: [Collection; 13] = [
        Self::Class,
        Self::Department,
        Self::Employee,
        Self::Student,
        Self::Parent,
        Self::Role,
        Self::Assignment,
        Self::Postal,
        Self::Award,
        Self::InventoryProduct,
        Self::InventoryIssue,
        Self::InventorySale,
        Self::SalaryPayment,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Self::Class => "classes",
            Self::Department => "departments",
            Self::Employee => "employees",
            Self::Student => "students",
            Self::Parent => "parents",
            Self::Role => "roles",
            Self::Assignment => "assignments",
            Self::Postal => "postal_records",
            Self::Award => "awards",
            Self::InventoryProduct => "inventory_products",
            Self::InventoryIssue => "inventory_issues",
            Self::InventorySale => "inventory_sales",
            Self::SalaryPayment => "salary_payments",
        }
    }

    /// Name recorded in history and trash entries.
    pub fn entity_type(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Department => "department",
            Self::Employee => "employee",
            Self::Student => "student",
            Self::Parent => "parent",
            Self::Role => "role",
            Self::Assignment => "assignment",
            Self::Postal => "postal",
            Self::Award => "award",
            Self::InventoryProduct => "inventoryProduct",
            Self::InventoryIssue => "inventoryIssue",
            Self::InventorySale => "inventorySale",
            Self::SalaryPayment => "salaryPayment",
        }
    }

    pub fn parse(entity_type: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.entity_type() == entity_type)
    }

    /// Dashboard route whose cached render goes stale on mutation.
    pub fn route(self) -> &'static str {
        match self {
            Self::Class => "/dashboard/classes",
            Self::Department => "/dashboard/departments",
            Self::Employee => "/dashboard/employees",
            Self::Student => "/dashboard/students",
            Self::Parent => "/dashboard/parents",
            Self::Role => "/dashboard/roles",
            Self::Assignment => "/dashboard/assignments",
            Self::Postal => "/dashboard/postal",
            Self::Award => "/dashboard/awards",
            Self::InventoryProduct | Self::InventoryIssue | Self::InventorySale => {
                "/dashboard/inventory"
            }
            Self::SalaryPayment => "/dashboard/salary",
        }
    }

    /// Columns whose combined value must be unique among live rows of a
    /// school. NULL never collides.
    pub fn natural_key(self) -> &'static [&'static str] {
        match self {
            Self::Class => &["name"],
            Self::Department => &["name"],
            Self::Employee => &["email"],
            Self::Student => &["admission_no"],
            Self::Role => &["name"],
            Self::Postal => &["direction", "reference_no"],
            Self::InventoryProduct => &["name"],
            Self::SalaryPayment => &["employee_id", "month"],
            Self::Parent | Self::Assignment | Self::Award | Self::InventoryIssue
            | Self::InventorySale => &[],
        }
    }

    /// Foreign-key columns and the collection each points into. A row may
    /// only be live while every non-null reference is live too.
    pub fn references(self) -> &'static [(&'static str, Collection)] {
        match self {
            Self::Class => &[("class_teacher_id", Self::Employee)],
            Self::Employee => &[("department_id", Self::Department)],
            Self::Student => &[("class_id", Self::Class), ("parent_id", Self::Parent)],
            Self::Assignment => &[("class_id", Self::Class), ("assigned_by", Self::Employee)],
            Self::InventoryIssue | Self::InventorySale => &[("product_id", Self::InventoryProduct)],
            Self::SalaryPayment => &[("employee_id", Self::Employee)],
            Self::Department | Self::Parent | Self::Role | Self::Postal | Self::Award
            | Self::InventoryProduct => &[],
        }
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn exists_live(
    conn: &Connection,
    school_id: &str,
    coll: Collection,
    id: &str,
) -> ActionResult<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE id = ? AND school_id = ? AND del_flag = 0",
        coll.table()
    );
    let found: Option<i64> = conn
        .query_row(&sql, (id, school_id), |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn require_live(
    conn: &Connection,
    school_id: &str,
    coll: Collection,
    id: &str,
) -> ActionResult<()> {
    if exists_live(conn, school_id, coll, id)? {
        Ok(())
    } else {
        Err(ActionError::not_found_id(coll.entity_type(), id))
    }
}

/// Fail with `conflict` when another live row already holds this natural
/// key. `values` must line up with `coll.natural_key()`.
pub fn ensure_unique(
    conn: &Connection,
    school_id: &str,
    coll: Collection,
    values: &[SqlValue],
    exclude_id: Option<&str>,
) -> ActionResult<()> {
    let columns = coll.natural_key();
    if columns.is_empty() || values.iter().any(|v| matches!(v, SqlValue::Null)) {
        return Ok(());
    }
    let mut sql = format!(
        "SELECT id FROM {} WHERE school_id = ? AND del_flag = 0",
        coll.table()
    );
    for c in columns {
        sql.push_str(&format!(" AND {} = ?", c));
    }
    let mut bind: Vec<SqlValue> = vec![SqlValue::Text(school_id.to_string())];
    bind.extend(values.iter().cloned());
    if let Some(id) = exclude_id {
        sql.push_str(" AND id <> ?");
        bind.push(SqlValue::Text(id.to_string()));
    }
    sql.push_str(" LIMIT 1");
    let taken: Option<String> = conn
        .query_row(&sql, params_from_iter(bind), |r| r.get(0))
        .optional()?;
    match taken {
        Some(_) => Err(ActionError::Conflict(format!(
            "{} with this {} already exists",
            coll.entity_type(),
            columns.join("/")
        ))),
        None => Ok(()),
    }
}

/// Current natural-key values of a stored row, in `natural_key()` order.
pub fn natural_key_values(
    conn: &Connection,
    school_id: &str,
    coll: Collection,
    id: &str,
) -> ActionResult<Vec<SqlValue>> {
    let columns = coll.natural_key();
    if columns.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ? AND school_id = ?",
        columns.join(", "),
        coll.table()
    );
    conn.query_row(&sql, (id, school_id), |r| {
        (0..columns.len())
            .map(|i| r.get::<_, SqlValue>(i))
            .collect::<Result<Vec<_>, _>>()
    })
    .optional()?
    .ok_or_else(|| ActionError::not_found_id(coll.entity_type(), id))
}

/// The first reference of a stored row whose target is not live, as
/// `(column, target collection, target id)`.
pub fn dead_reference(
    conn: &Connection,
    school_id: &str,
    coll: Collection,
    id: &str,
) -> ActionResult<Option<(&'static str, Collection, String)>> {
    for &(column, target) in coll.references() {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ? AND school_id = ?",
            column,
            coll.table()
        );
        let target_id: Option<String> = conn
            .query_row(&sql, (id, school_id), |r| r.get(0))
            .optional()?
            .flatten();
        if let Some(target_id) = target_id {
            if !exists_live(conn, school_id, target, &target_id)? {
                return Ok(Some((column, target, target_id)));
            }
        }
    }
    Ok(None)
}

/// Insert a row stamped with tenant and creation audit columns.
pub fn insert(
    conn: &Connection,
    session: &Session,
    coll: Collection,
    fields: Vec<(&'static str, SqlValue)>,
) -> ActionResult<String> {
    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let mut columns: Vec<&str> = vec![
        "id",
        "school_id",
        "created_by",
        "action_type",
        "created_at",
        "updated_at",
    ];
    let mut bind: Vec<SqlValue> = vec![
        SqlValue::Text(id.clone()),
        SqlValue::Text(session.school_id.clone()),
        SqlValue::Text(session.user_id.clone()),
        SqlValue::Text("create".to_string()),
        SqlValue::Text(now.clone()),
        SqlValue::Text(now),
    ];
    for (c, v) in fields {
        columns.push(c);
        bind.push(v);
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        coll.table(),
        columns.join(", "),
        placeholders
    );
    conn.execute(&sql, params_from_iter(bind))?;
    Ok(id)
}

/// Apply a set of column changes to a live row, stamping the update audit
/// columns. An empty change set still records the modification.
pub fn update(
    conn: &Connection,
    session: &Session,
    coll: Collection,
    id: &str,
    fields: Vec<(&'static str, SqlValue)>,
) -> ActionResult<()> {
    let mut sets: Vec<String> = Vec::with_capacity(fields.len() + 4);
    let mut bind: Vec<SqlValue> = Vec::with_capacity(fields.len() + 6);
    for (c, v) in fields {
        sets.push(format!("{} = ?", c));
        bind.push(v);
    }
    sets.push("modified_by = ?".to_string());
    bind.push(SqlValue::Text(session.user_id.clone()));
    sets.push("mod_flag = 1".to_string());
    sets.push("action_type = 'update'".to_string());
    sets.push("updated_at = ?".to_string());
    bind.push(SqlValue::Text(now_rfc3339()));
    bind.push(SqlValue::Text(id.to_string()));
    bind.push(SqlValue::Text(session.school_id.clone()));

    let sql = format!(
        "UPDATE {} SET {} WHERE id = ? AND school_id = ? AND del_flag = 0",
        coll.table(),
        sets.join(", ")
    );
    let changed = conn.execute(&sql, params_from_iter(bind))?;
    if changed == 0 {
        return Err(ActionError::not_found_id(coll.entity_type(), id));
    }
    Ok(())
}

/// Flag a live row deleted. Returns false when there was nothing to delete.
pub fn mark_deleted(
    conn: &Connection,
    session: &Session,
    coll: Collection,
    id: &str,
) -> ActionResult<bool> {
    let sql = format!(
        "UPDATE {} SET del_flag = 1, deleted_by = ?, action_type = 'delete', updated_at = ?
         WHERE id = ? AND school_id = ? AND del_flag = 0",
        coll.table()
    );
    let changed = conn.execute(
        &sql,
        (&session.user_id, now_rfc3339(), id, &session.school_id),
    )?;
    Ok(changed > 0)
}

/// Whole row as a camelCase JSON object, whatever the table's columns are.
pub fn snapshot(
    conn: &Connection,
    school_id: &str,
    coll: Collection,
    id: &str,
) -> ActionResult<Option<Value>> {
    let sql = format!(
        "SELECT * FROM {} WHERE id = ? AND school_id = ?",
        coll.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let snap = stmt
        .query_row((id, school_id), |r| row_to_json(r, &names))
        .optional()?;
    Ok(snap)
}

/// A live row, or `not_found` when it is missing, deleted, or in another
/// school.
pub fn get_live(conn: &Connection, school_id: &str, coll: Collection, id: &str) -> ActionResult<Value> {
    let sql = format!(
        "SELECT * FROM {} WHERE id = ? AND school_id = ? AND del_flag = 0",
        coll.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let row = stmt
        .query_row((id, school_id), |r| row_to_json(r, &names))
        .optional()?;
    row.ok_or_else(|| ActionError::not_found_id(coll.entity_type(), id))
}

/// Live rows of a school matching every `column = value` filter.
pub fn list_live(
    conn: &Connection,
    school_id: &str,
    coll: Collection,
    filters: &[(&'static str, SqlValue)],
    order_by: &'static str,
) -> ActionResult<Vec<Value>> {
    let mut sql = format!(
        "SELECT * FROM {} WHERE school_id = ? AND del_flag = 0",
        coll.table()
    );
    let mut bind: Vec<SqlValue> = vec![SqlValue::Text(school_id.to_string())];
    for (column, value) in filters {
        sql.push_str(&format!(" AND {} = ?", column));
        bind.push(value.clone());
    }
    sql.push_str(&format!(" ORDER BY {}", order_by));

    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt
        .query_map(params_from_iter(bind), |r| row_to_json(r, &names))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_json(row: &Row<'_>, names: &[String]) -> rusqlite::Result<Value> {
    let mut out = Map::new();
    for (i, name) in names.iter().enumerate() {
        let v = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => json!(n),
            ValueRef::Real(f) => json!(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => json!(b.len()),
        };
        out.insert(camel_case(name), v);
    }
    Ok(Value::Object(out))
}

pub fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    let mut upper = false;
    for ch in snake.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.extend(ch.to_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}
