//! Soft deletion. A deleted row keeps its place in its own table with
//! `del_flag = 1` and a snapshot lands in `trash`, from where it can be
//! restored or purged for good.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::collection::{self, now_rfc3339, Collection};
use crate::ipc::error::{ActionError, ActionResult};
use crate::session::Session;
use crate::stock;

#[derive(Debug, Clone)]
pub struct TrashEntry {
    pub id: String,
    pub collection: Collection,
    pub entity_id: String,
}

/// Flag a live row deleted and file its snapshot. Runs on whatever
/// transaction the caller holds; returns the trash entry id.
pub fn trash_row(
    conn: &Connection,
    session: &Session,
    coll: Collection,
    id: &str,
) -> ActionResult<String> {
    if !collection::mark_deleted(conn, session, coll, id)? {
        return Err(ActionError::not_found_id(coll.entity_type(), id));
    }
    let snapshot = collection::snapshot(conn, &session.school_id, coll, id)?
        .ok_or_else(|| ActionError::not_found_id(coll.entity_type(), id))?;
    let trash_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO trash(id, school_id, entity_type, entity_id, snapshot, deleted_by, deleted_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &trash_id,
            &session.school_id,
            coll.entity_type(),
            id,
            snapshot.to_string(),
            &session.user_id,
            now_rfc3339(),
        ),
    )?;
    Ok(trash_id)
}

/// `trash_row` in its own transaction.
pub fn move_to_trash(
    conn: &Connection,
    session: &Session,
    coll: Collection,
    id: &str,
) -> ActionResult<String> {
    let tx = conn.unchecked_transaction()?;
    let trash_id = trash_row(&tx, session, coll, id)?;
    tx.commit()?;
    Ok(trash_id)
}

pub fn list(conn: &Connection, school_id: &str, entity_type: Option<&str>) -> ActionResult<Vec<Value>> {
    let mut sql = String::from(
        "SELECT id, entity_type, entity_id, snapshot, deleted_by, deleted_at
         FROM trash
         WHERE school_id = ?",
    );
    let mut bind = vec![SqlValue::Text(school_id.to_string())];
    if let Some(t) = entity_type {
        sql.push_str(" AND entity_type = ?");
        bind.push(SqlValue::Text(t.to_string()));
    }
    sql.push_str(" ORDER BY deleted_at DESC, rowid DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            let snapshot: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "entityType": r.get::<_, String>(1)?,
                "entityId": r.get::<_, String>(2)?,
                "snapshot": serde_json::from_str::<Value>(&snapshot).unwrap_or(Value::Null),
                "deletedBy": r.get::<_, String>(4)?,
                "deletedAt": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_entry(conn: &Connection, school_id: &str, trash_id: &str) -> ActionResult<TrashEntry> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT entity_type, entity_id FROM trash WHERE id = ? AND school_id = ?",
            (trash_id, school_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (entity_type, entity_id) =
        row.ok_or_else(|| ActionError::not_found_id("trash entry", trash_id))?;
    let collection = Collection::parse(&entity_type).ok_or_else(|| {
        ActionError::Storage(format!("trash entry has unknown entity type {}", entity_type))
    })?;
    Ok(TrashEntry {
        id: trash_id.to_string(),
        collection,
        entity_id,
    })
}

/// Bring a trashed row back. Fails with `conflict` when a live row has
/// taken its natural key in the meantime, when a row it references is no
/// longer live, or when stock it would consume is no longer there.
pub fn restore(conn: &Connection, session: &Session, trash_id: &str) -> ActionResult<TrashEntry> {
    let tx = conn.unchecked_transaction()?;
    let entry = load_entry(&tx, &session.school_id, trash_id)?;
    let coll = entry.collection;

    let key = collection::natural_key_values(&tx, &session.school_id, coll, &entry.entity_id)?;
    collection::ensure_unique(&tx, &session.school_id, coll, &key, Some(&entry.entity_id))?;

    if let Some((column, target, target_id)) =
        collection::dead_reference(&tx, &session.school_id, coll, &entry.entity_id)?
    {
        return Err(ActionError::Conflict(format!(
            "cannot restore {} {}: {} {} in {} is deleted",
            coll.entity_type(),
            entry.entity_id,
            target.entity_type(),
            target_id,
            column
        )));
    }

    reapply_stock(&tx, session, &entry)?;

    let sql = format!(
        "UPDATE {} SET del_flag = 0, deleted_by = NULL, modified_by = ?, mod_flag = 1,
             action_type = 'restore', updated_at = ?
         WHERE id = ? AND school_id = ? AND del_flag = 1",
        coll.table()
    );
    let changed = tx.execute(
        &sql,
        (&session.user_id, now_rfc3339(), &entry.entity_id, &session.school_id),
    )?;
    if changed == 0 {
        return Err(ActionError::Conflict(format!(
            "{} {} is not deleted",
            coll.entity_type(),
            entry.entity_id
        )));
    }
    tx.execute("DELETE FROM trash WHERE id = ?", [&entry.id])?;
    tx.commit()?;
    Ok(entry)
}

/// Stock that was credited back when an issue or sale was deleted must be
/// taken out again on restore.
fn reapply_stock(conn: &Connection, session: &Session, entry: &TrashEntry) -> ActionResult<()> {
    let sql = match entry.collection {
        Collection::InventoryIssue => {
            "SELECT product_id, quantity FROM inventory_issues
             WHERE id = ? AND school_id = ? AND returned_on IS NULL"
        }
        Collection::InventorySale => {
            "SELECT product_id, quantity FROM inventory_sales WHERE id = ? AND school_id = ?"
        }
        _ => return Ok(()),
    };
    let row: Option<(String, i64)> = conn
        .query_row(sql, (&entry.entity_id, &session.school_id), |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .optional()?;
    if let Some((product_id, quantity)) = row {
        match stock::deduct(conn, &session.school_id, &product_id, quantity) {
            Ok(_) => {}
            Err(ActionError::InsufficientQuantity {
                requested,
                available,
            }) => {
                return Err(ActionError::Conflict(format!(
                    "cannot restore: needs {} in stock, {} available",
                    requested, available
                )))
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove a trashed row and its trash entry permanently.
pub fn purge(conn: &Connection, session: &Session, trash_id: &str) -> ActionResult<TrashEntry> {
    let tx = conn.unchecked_transaction()?;
    let entry = load_entry(&tx, &session.school_id, trash_id)?;
    let sql = format!(
        "DELETE FROM {} WHERE id = ? AND school_id = ? AND del_flag = 1",
        entry.collection.table()
    );
    match tx.execute(&sql, (&entry.entity_id, &session.school_id)) {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(f, _)) if f.code == ErrorCode::ConstraintViolation => {
            return Err(ActionError::Conflict(format!(
                "{} {} is still referenced by other records",
                entry.collection.entity_type(),
                entry.entity_id
            )));
        }
        Err(e) => return Err(e.into()),
    }
    tx.execute("DELETE FROM trash WHERE id = ?", [&entry.id])?;
    tx.commit()?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_schema;
    use crate::session::SessionRole;

    fn setup() -> (Connection, Session) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        create_schema(&conn).unwrap();
        let session = Session {
            school_id: "s1".into(),
            user_id: "u1".into(),
            role: SessionRole::Admin,
        };
        (conn, session)
    }

    fn department(conn: &Connection, s: &Session, name: &str) -> String {
        collection::insert(
            conn,
            s,
            Collection::Department,
            vec![("name", SqlValue::Text(name.into()))],
        )
        .unwrap()
    }

    #[test]
    fn restore_brings_the_row_back_once() {
        let (conn, s) = setup();
        let id = department(&conn, &s, "Music");
        let trash_id = move_to_trash(&conn, &s, Collection::Department, &id).unwrap();
        assert!(!collection::exists_live(&conn, "s1", Collection::Department, &id).unwrap());

        let listed = list(&conn, "s1", Some("department")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["snapshot"]["name"], json!("Music"));
        assert!(list(&conn, "s2", None).unwrap().is_empty());

        let entry = restore(&conn, &s, &trash_id).unwrap();
        assert_eq!(entry.entity_id, id);
        assert!(collection::exists_live(&conn, "s1", Collection::Department, &id).unwrap());
        assert_eq!(restore(&conn, &s, &trash_id).unwrap_err().code(), "not_found");
    }

    #[test]
    fn restore_refuses_a_taken_natural_key() {
        let (conn, s) = setup();
        let id = department(&conn, &s, "Music");
        let trash_id = move_to_trash(&conn, &s, Collection::Department, &id).unwrap();
        department(&conn, &s, "Music");
        assert_eq!(restore(&conn, &s, &trash_id).unwrap_err().code(), "conflict");
        assert_eq!(list(&conn, "s1", None).unwrap().len(), 1);
    }

    #[test]
    fn restoring_a_sale_takes_its_stock_again() {
        let (conn, s) = setup();
        let product = collection::insert(
            &conn,
            &s,
            Collection::InventoryProduct,
            vec![
                ("name", SqlValue::Text("Ruler".into())),
                ("quantity", SqlValue::Integer(5)),
            ],
        )
        .unwrap();
        let sale = collection::insert(
            &conn,
            &s,
            Collection::InventorySale,
            vec![
                ("product_id", SqlValue::Text(product.clone())),
                ("quantity", SqlValue::Integer(4)),
                ("unit_price", SqlValue::Real(1.0)),
                ("total", SqlValue::Real(4.0)),
                ("role", SqlValue::Text("Student".into())),
                ("sale_to_id", SqlValue::Text("st1".into())),
                ("sold_on", SqlValue::Text("2024-01-01".into())),
            ],
        )
        .unwrap();
        let trash_id = move_to_trash(&conn, &s, Collection::InventorySale, &sale).unwrap();

        stock::deduct(&conn, "s1", &product, 2).unwrap();
        assert_eq!(restore(&conn, &s, &trash_id).unwrap_err().code(), "conflict");
        assert_eq!(stock::on_hand(&conn, "s1", &product).unwrap(), Some(3));

        stock::credit(&conn, "s1", &product, 1).unwrap();
        restore(&conn, &s, &trash_id).unwrap();
        assert_eq!(stock::on_hand(&conn, "s1", &product).unwrap(), Some(0));
    }

    #[test]
    fn restore_refuses_a_row_whose_parent_is_trashed() {
        let (conn, s) = setup();
        let dep = department(&conn, &s, "Labs");
        let emp = collection::insert(
            &conn,
            &s,
            Collection::Employee,
            vec![
                ("first_name", SqlValue::Text("Marie".into())),
                ("last_name", SqlValue::Text("Curie".into())),
                ("department_id", SqlValue::Text(dep.clone())),
            ],
        )
        .unwrap();
        let emp_trash = move_to_trash(&conn, &s, Collection::Employee, &emp).unwrap();
        let dep_trash = move_to_trash(&conn, &s, Collection::Department, &dep).unwrap();

        assert_eq!(restore(&conn, &s, &emp_trash).unwrap_err().code(), "conflict");
        assert!(!collection::exists_live(&conn, "s1", Collection::Employee, &emp).unwrap());

        restore(&conn, &s, &dep_trash).unwrap();
        restore(&conn, &s, &emp_trash).unwrap();
        assert!(collection::exists_live(&conn, "s1", Collection::Employee, &emp).unwrap());
    }

    #[test]
    fn purge_of_a_referenced_row_is_a_conflict() {
        let (conn, s) = setup();
        let dep = department(&conn, &s, "Labs");
        collection::insert(
            &conn,
            &s,
            Collection::Employee,
            vec![
                ("first_name", SqlValue::Text("Rosalind".into())),
                ("last_name", SqlValue::Text("Franklin".into())),
                ("department_id", SqlValue::Text(dep.clone())),
            ],
        )
        .unwrap();
        let trash_id = move_to_trash(&conn, &s, Collection::Department, &dep).unwrap();
        assert_eq!(purge(&conn, &s, &trash_id).unwrap_err().code(), "conflict");
        assert_eq!(list(&conn, "s1", None).unwrap().len(), 1);
    }
}
