//! On-hand quantity changes for inventory products.

use rusqlite::{Connection, OptionalExtension};

use crate::collection::now_rfc3339;
use crate::ipc::error::{ActionError, ActionResult};

/// Take `quantity` units out of stock.
///
/// The check and the decrement are one conditional UPDATE, so two callers
/// racing for the last units cannot both succeed and stock never goes
/// negative.
pub fn deduct(conn: &Connection, school_id: &str, product_id: &str, quantity: i64) -> ActionResult<i64> {
    if quantity <= 0 {
        return Err(ActionError::bad_params("quantity must be > 0"));
    }
    let changed = conn.execute(
        "UPDATE inventory_products
         SET quantity = quantity - ?, updated_at = ?
         WHERE id = ? AND school_id = ? AND del_flag = 0 AND quantity >= ?",
        (quantity, now_rfc3339(), product_id, school_id, quantity),
    )?;
    if changed == 0 {
        return match on_hand(conn, school_id, product_id)? {
            None => Err(ActionError::not_found_id("inventoryProduct", product_id)),
            Some(available) => Err(ActionError::InsufficientQuantity {
                requested: quantity,
                available,
            }),
        };
    }
    on_hand(conn, school_id, product_id)?
        .ok_or_else(|| ActionError::not_found_id("inventoryProduct", product_id))
}

/// Put `quantity` units back. A soft-deleted product still takes returns so
/// its count stays truthful if it is restored later.
pub fn credit(conn: &Connection, school_id: &str, product_id: &str, quantity: i64) -> ActionResult<i64> {
    if quantity <= 0 {
        return Err(ActionError::bad_params("quantity must be > 0"));
    }
    let changed = conn.execute(
        "UPDATE inventory_products
         SET quantity = quantity + ?, updated_at = ?
         WHERE id = ? AND school_id = ?",
        (quantity, now_rfc3339(), product_id, school_id),
    )?;
    if changed == 0 {
        return Err(ActionError::not_found_id("inventoryProduct", product_id));
    }
    let q: i64 = conn.query_row(
        "SELECT quantity FROM inventory_products WHERE id = ? AND school_id = ?",
        (product_id, school_id),
        |r| r.get(0),
    )?;
    Ok(q)
}

pub fn on_hand(conn: &Connection, school_id: &str, product_id: &str) -> ActionResult<Option<i64>> {
    let q = conn
        .query_row(
            "SELECT quantity FROM inventory_products WHERE id = ? AND school_id = ? AND del_flag = 0",
            (product_id, school_id),
            |r| r.get(0),
        )
        .optional()?;
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    const SCHEMA: &str = "CREATE TABLE inventory_products(
        id TEXT PRIMARY KEY,
        school_id TEXT NOT NULL,
        quantity INTEGER NOT NULL CHECK(quantity >= 0),
        del_flag INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT
    );";

    fn seeded(conn: &Connection, quantity: i64) {
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO inventory_products(id, school_id, quantity) VALUES('pen', 's1', ?)",
            [quantity],
        )
        .unwrap();
    }

    #[test]
    fn over_issue_fails_and_leaves_stock_untouched() {
        let conn = Connection::open_in_memory().unwrap();
        seeded(&conn, 4);
        let e = deduct(&conn, "s1", "pen", 5).unwrap_err();
        match e {
            ActionError::InsufficientQuantity {
                requested,
                available,
            } => {
                assert_eq!(requested, 5);
                assert_eq!(available, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(on_hand(&conn, "s1", "pen").unwrap(), Some(4));
        assert_eq!(deduct(&conn, "s1", "pen", 4).unwrap(), 0);
        assert_eq!(credit(&conn, "s1", "pen", 2).unwrap(), 2);
    }

    #[test]
    fn other_school_cannot_touch_stock() {
        let conn = Connection::open_in_memory().unwrap();
        seeded(&conn, 4);
        assert_eq!(deduct(&conn, "s2", "pen", 1).unwrap_err().code(), "not_found");
        assert_eq!(credit(&conn, "s2", "pen", 1).unwrap_err().code(), "not_found");
    }

    #[test]
    fn concurrent_issuance_never_oversells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stock.sqlite3");
        {
            let conn = Connection::open(&path).unwrap();
            seeded(&conn, 5);
        }

        let workers = 12;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let conn = Connection::open(&path).unwrap();
                    conn.busy_timeout(Duration::from_secs(10)).unwrap();
                    barrier.wait();
                    deduct(&conn, "s1", "pen", 1)
                })
            })
            .collect();

        let mut succeeded = 0;
        let mut insufficient = 0;
        for h in handles {
            match h.join().unwrap() {
                Ok(_) => succeeded += 1,
                Err(ActionError::InsufficientQuantity { .. }) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(succeeded, 5);
        assert_eq!(insufficient, workers - 5);

        let conn = Connection::open(&path).unwrap();
        assert_eq!(on_hand(&conn, "s1", "pen").unwrap(), Some(0));
    }
}
