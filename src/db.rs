use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::password;

pub const DB_FILE: &str = "labdesk.sqlite3";
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin1234";

pub fn now_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            user_type TEXT NOT NULL,
            account_status TEXT NOT NULL DEFAULT 'active',
            is_active INTEGER NOT NULL DEFAULT 1,
            account_lock INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_type ON users(user_type)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_profiles(
            user_id INTEGER PRIMARY KEY,
            first_name TEXT,
            middle_name TEXT,
            last_name TEXT,
            gender TEXT,
            employee_number TEXT,
            student_number TEXT,
            email TEXT,
            contact_number TEXT,
            department_code TEXT,
            year_level TEXT,
            section TEXT,
            profile_photo BLOB,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_profiles_email ON user_profiles(email)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            department_code TEXT PRIMARY KEY,
            department_name TEXT NOT NULL,
            description TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            subject_code TEXT PRIMARY KEY,
            subject_name TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_code TEXT NOT NULL,
            teacher_user_id INTEGER NOT NULL,
            edp_code TEXT,
            schedule TEXT,
            room TEXT,
            year_level TEXT,
            section TEXT,
            semester TEXT,
            school_year TEXT,
            descriptive_title TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_archived INTEGER NOT NULL DEFAULT 0,
            created_by_user_id INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY(subject_code) REFERENCES subjects(subject_code),
            FOREIGN KEY(teacher_user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_edp ON classes(edp_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classlist(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_id INTEGER NOT NULL,
            student_user_id INTEGER NOT NULL,
            enrolled_by INTEGER,
            enrollment_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            UNIQUE(class_id, student_user_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classlist_student ON classlist(student_user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            class_id INTEGER NOT NULL,
            student_user_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            time_in TEXT,
            time_out TEXT,
            pc_number TEXT,
            status TEXT NOT NULL DEFAULT 'absent',
            remarks TEXT,
            recorded_by INTEGER,
            is_archived INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(class_id, student_user_id, date),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_user_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sheets(
            class_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            created_by INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(class_id, date),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS login_logs(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            user_type TEXT,
            pc_number TEXT,
            login_time TEXT NOT NULL,
            logout_time TEXT,
            logout_reason TEXT,
            login_status TEXT NOT NULL DEFAULT 'success',
            is_archived INTEGER NOT NULL DEFAULT 0,
            archived_at TEXT,
            archived_by_user_id INTEGER,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_login_logs_user ON login_logs(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_login_logs_time ON login_logs(login_time)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS feedback(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_user_id INTEGER NOT NULL,
            pc_number TEXT NOT NULL,
            equipment_condition TEXT NOT NULL,
            monitor_condition TEXT NOT NULL,
            keyboard_condition TEXT NOT NULL,
            mouse_condition TEXT NOT NULL,
            comments TEXT,
            date_submitted TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            forwarded_by_user_id INTEGER,
            forwarded_at TEXT,
            working_student_notes TEXT,
            FOREIGN KEY(student_user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_feedback_status ON feedback(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS registration_approvals(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            approved_by_user_id INTEGER,
            rejection_reason TEXT,
            submitted_at TEXT NOT NULL,
            processed_at TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    Ok(conn)
}

/// Fresh workspaces get one admin account so someone can sign in.
/// Returns true when the account was created.
pub fn seed_default_admin(conn: &Connection) -> anyhow::Result<bool> {
    let any_admin: Option<i64> = conn
        .query_row(
            "SELECT id FROM users WHERE user_type = 'admin' LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?;
    if any_admin.is_some() {
        return Ok(false);
    }

    let salt = password::new_salt();
    let hash = password::hash_password(&salt, DEFAULT_ADMIN_PASSWORD);
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO users(username, password_hash, password_salt, user_type, created_at)
         VALUES(?, ?, ?, 'admin', ?)",
        (DEFAULT_ADMIN_USERNAME, &hash, &salt, now_stamp()),
    )?;
    let user_id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO user_profiles(user_id, first_name, last_name, employee_number)
         VALUES(?, 'System', 'Administrator', ?)",
        (user_id, DEFAULT_ADMIN_USERNAME),
    )?;
    tx.commit()?;
    Ok(true)
}
