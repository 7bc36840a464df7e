use super::{class_exists, get_required_str, with_db};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn classes_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    // Correlated subqueries keep the dashboard counts join-free.
    // totalClassDays counts distinct attendance dates, not rows.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.description,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count,
               (SELECT COUNT(DISTINCT a.date) FROM attendance a WHERE a.class_id = c.id) AS class_days
             FROM classes c
             ORDER BY c.name",
        )
        .map_err(HandlerErr::query)?;

    let classes = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let description: String = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let class_days: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "description": description,
                "studentCount": student_count,
                "totalClassDays": class_days
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "classes": classes }))
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let description = params
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, description) VALUES(?, ?, ?)",
        (&class_id, &name, &description),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", e, "classes"))?;

    Ok(json!({ "classId": class_id, "name": name, "description": description }))
}

fn classes_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let description = params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    if name.is_none() && description.is_none() {
        return Err(HandlerErr::bad_params("nothing to update"));
    }
    if matches!(name.as_deref(), Some("")) {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }

    if let Some(name) = &name {
        conn.execute(
            "UPDATE classes SET name = ? WHERE id = ?",
            (name, &class_id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", e, "classes"))?;
    }
    if let Some(description) = &description {
        conn.execute(
            "UPDATE classes SET description = ? WHERE id = ?",
            (description, &class_id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", e, "classes"))?;
    }

    Ok(json!({ "classId": class_id }))
}

fn classes_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    // Explicit deletes in dependency order (no ON DELETE CASCADE).
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM attendance WHERE class_id = ?", [&class_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", e, "attendance"))?;
    tx.execute("DELETE FROM students WHERE class_id = ?", [&class_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", e, "students"))?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&class_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", e, "classes"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(with_db(state, req, |conn, _| classes_list(conn))),
        "classes.create" => Some(with_db(state, req, classes_create)),
        "classes.update" => Some(with_db(state, req, classes_update)),
        "classes.delete" => Some(with_db(state, req, classes_delete)),
        _ => None,
    }
}
