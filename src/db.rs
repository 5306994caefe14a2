use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "campusd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS campuses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT,
            phone TEXT,
            principal TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            campus_id TEXT NOT NULL,
            name TEXT NOT NULL,
            capacity INTEGER NOT NULL,
            location TEXT,
            FOREIGN KEY(campus_id) REFERENCES campuses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classrooms_campus ON classrooms(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            campus_id TEXT NOT NULL,
            name TEXT NOT NULL,
            phone TEXT NOT NULL,
            role TEXT NOT NULL,
            subjects_json TEXT NOT NULL DEFAULT '[]',
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(campus_id) REFERENCES campuses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_campus ON staff(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cashiers(
            id TEXT PRIMARY KEY,
            campus_id TEXT NOT NULL,
            name TEXT NOT NULL,
            account TEXT NOT NULL,
            password_digest TEXT NOT NULL,
            phone TEXT NOT NULL,
            id_number TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(campus_id) REFERENCES campuses(id),
            UNIQUE(campus_id, account)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            campus_id TEXT NOT NULL,
            name TEXT NOT NULL,
            gender TEXT NOT NULL DEFAULT 'unknown',
            phone TEXT NOT NULL,
            guardian_name TEXT,
            guardian_phone TEXT,
            id_number TEXT,
            birth_date TEXT,
            grade TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(campus_id) REFERENCES campuses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_campus_sort ON students(campus_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            campus_id TEXT NOT NULL,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            teacher_id TEXT,
            classroom_id TEXT,
            price REAL NOT NULL,
            capacity INTEGER NOT NULL,
            total_lessons INTEGER NOT NULL,
            description TEXT,
            status TEXT NOT NULL,
            cover_url TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(campus_id) REFERENCES campuses(id),
            FOREIGN KEY(teacher_id) REFERENCES staff(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_campus ON courses(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            course_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            PRIMARY KEY(course_id, student_id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS time_slots(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            campus_id TEXT NOT NULL,
            teacher_id TEXT,
            classroom_id TEXT,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            student_count INTEGER NOT NULL DEFAULT 0,
            note TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(campus_id) REFERENCES campuses(id),
            FOREIGN KEY(teacher_id) REFERENCES staff(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_time_slots_campus_date ON time_slots(campus_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_time_slots_course ON time_slots(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS products(
            id TEXT PRIMARY KEY,
            campus_id TEXT,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            price REAL NOT NULL,
            original_price REAL,
            rating REAL NOT NULL DEFAULT 0,
            stock INTEGER NOT NULL DEFAULT 0,
            image_url TEXT,
            description TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    // Older workspaces predate manual "featured" ordering.
    ensure_column(
        &conn,
        "products",
        "sort_order",
        "ALTER TABLE products ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0",
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS orders(
            id TEXT PRIMARY KEY,
            order_no TEXT NOT NULL UNIQUE,
            campus_id TEXT,
            student_id TEXT,
            cashier_id TEXT,
            total REAL NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    ensure_column(
        &conn,
        "orders",
        "payment_method",
        "ALTER TABLE orders ADD COLUMN payment_method TEXT",
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS order_items(
            order_id TEXT NOT NULL,
            line_no INTEGER NOT NULL,
            product_id TEXT NOT NULL,
            name TEXT NOT NULL,
            price REAL NOT NULL,
            quantity INTEGER NOT NULL,
            PRIMARY KEY(order_id, line_no),
            FOREIGN KEY(order_id) REFERENCES orders(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_order_items_product ON order_items(product_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_plans(
            id TEXT PRIMARY KEY,
            course_id TEXT,
            title TEXT NOT NULL,
            objective TEXT,
            warm_up TEXT NOT NULL,
            gathering TEXT NOT NULL,
            actions_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_plan_scores(
            plan_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            scores_json TEXT NOT NULL,
            submitted INTEGER NOT NULL DEFAULT 0,
            submitted_at TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(plan_id, student_id),
            FOREIGN KEY(plan_id) REFERENCES lesson_plans(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_student_months(
            course_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            month TEXT NOT NULL,
            day_codes TEXT NOT NULL,
            PRIMARY KEY(course_id, student_id, month),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student_months_student ON attendance_student_months(student_id)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn settings_set(conn: &Connection, key: &str, value_json: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value_json),
    )?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    match settings_get(conn, key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    settings_set(conn, key, &serde_json::to_string(value)?)
}

fn ensure_column(conn: &Connection, table: &str, column: &str, ddl: &str) -> anyhow::Result<()> {
    if table_has_column(conn, table, column)? {
        return Ok(());
    }
    conn.execute(ddl, [])?;
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

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn reopening_is_idempotent_and_keeps_settings() {
        let ws = temp_workspace("campusd-db");
        {
            let conn = open_db(&ws).expect("open");
            settings_set_json(&conn, "setup.mall", &serde_json::json!({ "pageSize": 12 }))
                .expect("set");
        }
        let conn = open_db(&ws).expect("reopen");
        let v = settings_get_json(&conn, "setup.mall").expect("get");
        assert_eq!(v, Some(serde_json::json!({ "pageSize": 12 })));
        assert!(table_has_column(&conn, "products", "sort_order").expect("pragma"));
        assert!(table_has_column(&conn, "orders", "payment_method").expect("pragma"));
        let _ = std::fs::remove_dir_all(ws);
    }
}
