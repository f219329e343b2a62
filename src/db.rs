use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use crate::collection::Collection;

pub const DB_FILE: &str = "school.sqlite3";

/// Audit columns shared by every tenant entity table.
const AUDIT_COLUMNS: &str = "
            created_by TEXT NOT NULL,
            modified_by TEXT,
            deleted_by TEXT,
            mod_flag INTEGER NOT NULL DEFAULT 0,
            del_flag INTEGER NOT NULL DEFAULT 0,
            action_type TEXT NOT NULL DEFAULT 'create',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL";

/// (column, definition) pairs that older workspaces may lack.
const AUDIT_COLUMN_DEFS: [(&str, &str); 5] = [
    ("modified_by", "TEXT"),
    ("deleted_by", "TEXT"),
    ("mod_flag", "INTEGER NOT NULL DEFAULT 0"),
    ("del_flag", "INTEGER NOT NULL DEFAULT 0"),
    ("action_type", "TEXT NOT NULL DEFAULT 'create'"),
];

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    Ok(conn)
}

pub fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    create_entity_table(
        conn,
        "roles",
        "name TEXT NOT NULL,
            permissions TEXT NOT NULL",
    )?;

    create_entity_table(
        conn,
        "departments",
        "name TEXT NOT NULL,
            description TEXT",
    )?;

    create_entity_table(
        conn,
        "employees",
        "first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            department_id TEXT,
            designation TEXT,
            salary REAL NOT NULL DEFAULT 0 CHECK(salary >= 0),
            joined_on TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(department_id) REFERENCES departments(id)",
    )?;

    create_entity_table(
        conn,
        "classes",
        "name TEXT NOT NULL,
            section TEXT,
            class_teacher_id TEXT,
            FOREIGN KEY(class_teacher_id) REFERENCES employees(id)",
    )?;

    create_entity_table(
        conn,
        "parents",
        "first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT",
    )?;

    create_entity_table(
        conn,
        "students",
        "first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            admission_no TEXT NOT NULL,
            class_id TEXT NOT NULL,
            parent_id TEXT,
            birth_date TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(parent_id) REFERENCES parents(id)",
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(school_id, class_id)",
        [],
    )?;

    create_entity_table(
        conn,
        "assignments",
        "class_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            due_date TEXT,
            assigned_by TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(assigned_by) REFERENCES employees(id)",
    )?;

    create_entity_table(
        conn,
        "postal_records",
        "direction TEXT NOT NULL CHECK(direction IN ('receive', 'dispatch')),
            reference_no TEXT NOT NULL,
            title TEXT NOT NULL,
            from_title TEXT,
            to_title TEXT,
            date TEXT NOT NULL,
            note TEXT",
    )?;

    // role + *_to_id form a polymorphic reference; no FK is possible.
    create_entity_table(
        conn,
        "awards",
        "name TEXT NOT NULL,
            role TEXT NOT NULL,
            award_to_id TEXT NOT NULL,
            awarded_on TEXT NOT NULL,
            gift TEXT,
            cash_price REAL CHECK(cash_price IS NULL OR cash_price >= 0)",
    )?;

    create_entity_table(
        conn,
        "inventory_products",
        "name TEXT NOT NULL,
            category TEXT,
            quantity INTEGER NOT NULL DEFAULT 0 CHECK(quantity >= 0),
            unit_price REAL NOT NULL DEFAULT 0 CHECK(unit_price >= 0)",
    )?;

    create_entity_table(
        conn,
        "inventory_issues",
        "product_id TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK(quantity > 0),
            role TEXT NOT NULL,
            issue_to_id TEXT NOT NULL,
            issued_on TEXT NOT NULL,
            returned_on TEXT,
            note TEXT,
            FOREIGN KEY(product_id) REFERENCES inventory_products(id)",
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_inventory_issues_product ON inventory_issues(product_id)",
        [],
    )?;

    create_entity_table(
        conn,
        "inventory_sales",
        "product_id TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK(quantity > 0),
            unit_price REAL NOT NULL,
            total REAL NOT NULL,
            role TEXT NOT NULL,
            sale_to_id TEXT NOT NULL,
            sold_on TEXT NOT NULL,
            FOREIGN KEY(product_id) REFERENCES inventory_products(id)",
    )?;

    create_entity_table(
        conn,
        "salary_payments",
        "employee_id TEXT NOT NULL,
            month TEXT NOT NULL,
            amount REAL NOT NULL CHECK(amount >= 0),
            status TEXT NOT NULL CHECK(status IN ('pending', 'paid')),
            paid_on TEXT,
            FOREIGN KEY(employee_id) REFERENCES employees(id)",
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_salary_payments_month ON salary_payments(school_id, month)",
        [],
    )?;

    // Attendance is a fact table keyed by (student, date); it is overwritten
    // by re-marking rather than soft-deleted.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            school_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('present', 'absent', 'late', 'excused')),
            marked_by TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(school_id, student_id, date),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date ON attendance(school_id, class_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS history(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            message TEXT NOT NULL,
            performed_by TEXT NOT NULL,
            entity_id TEXT,
            entity_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_school ON history(school_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trash(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            deleted_by TEXT NOT NULL,
            deleted_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trash_school ON trash(school_id, entity_type)",
        [],
    )?;

    for coll in Collection::ALL {
        ensure_audit_columns(conn, coll.table())?;
    }

    Ok(())
}

fn create_entity_table(conn: &Connection, table: &str, body: &str) -> anyhow::Result<()> {
    // FOREIGN KEY clauses must trail every column definition, so the shared
    // columns go first.
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {table}(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,{AUDIT_COLUMNS},
            {body}
        )"
    );
    conn.execute(&sql, [])?;
    conn.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_school ON {table}(school_id, del_flag)"
        ),
        [],
    )?;
    Ok(())
}

/// Workspaces created before soft delete existed lack some audit columns.
fn ensure_audit_columns(conn: &Connection, table: &str) -> anyhow::Result<()> {
    for (column, definition) in AUDIT_COLUMN_DEFS {
        if !table_has_column(conn, table, column)? {
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
                [],
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        create_schema(&conn).unwrap();
        for coll in Collection::ALL {
            for column in ["school_id", "created_by", "del_flag", "mod_flag", "action_type"] {
                assert!(
                    table_has_column(&conn, coll.table(), column).unwrap(),
                    "{}.{} missing",
                    coll.table(),
                    column
                );
            }
        }
    }

    #[test]
    fn older_tables_gain_audit_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE parents(
                id TEXT PRIMARY KEY,
                school_id TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT,
                phone TEXT
            )",
            [],
        )
        .unwrap();
        create_schema(&conn).unwrap();
        assert!(table_has_column(&conn, "parents", "del_flag").unwrap());
        assert!(table_has_column(&conn, "parents", "deleted_by").unwrap());
    }

    #[test]
    fn negative_stock_is_rejected_by_the_schema() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        let res = conn.execute(
            "INSERT INTO inventory_products(id, school_id, created_by, created_at, updated_at, name, quantity)
             VALUES('p', 's', 'u', 't', 't', 'Pens', -1)",
            [],
        );
        assert!(res.is_err());
    }
}
