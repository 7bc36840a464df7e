use super::{class_exists, get_required_str, with_db};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::roll::{self, DayStatus, RawRow, RosterStudent};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn load_roster(conn: &Connection, class_id: &str) -> Result<Vec<RosterStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, email
             FROM students
             WHERE class_id = ?
             ORDER BY name, id",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([class_id], |row| {
        Ok(RosterStudent {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn load_rows_for_day(
    conn: &Connection,
    class_id: &str,
    day: NaiveDate,
) -> Result<Vec<RawRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, date, status
             FROM attendance
             WHERE class_id = ? AND date = ?
             ORDER BY rowid",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map((class_id, day.format("%Y-%m-%d").to_string()), |row| {
        Ok(RawRow {
            id: row.get(0)?,
            student_id: row.get(1)?,
            date: row.get(2)?,
            present: row.get::<_, i64>(3)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn load_rows_for_range(
    conn: &Connection,
    class_id: &str,
    first: NaiveDate,
    last: NaiveDate,
) -> Result<Vec<RawRow>, HandlerErr> {
    // Stored dates are canonical YYYY-MM-DD, so lexicographic range
    // comparison matches calendar order.
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, date, status
             FROM attendance
             WHERE class_id = ? AND date >= ? AND date <= ?
             ORDER BY rowid",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map(
        (
            class_id,
            first.format("%Y-%m-%d").to_string(),
            last.format("%Y-%m-%d").to_string(),
        ),
        |row| {
            Ok(RawRow {
                id: row.get(0)?,
                student_id: row.get(1)?,
                date: row.get(2)?,
                present: row.get::<_, i64>(3)? != 0,
            })
        },
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn required_day(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, "date")?;
    roll::day_key(&raw).ok_or_else(|| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

fn required_status(params: &serde_json::Value) -> Result<DayStatus, HandlerErr> {
    match get_required_str(params, "status")?.as_str() {
        "present" => Ok(DayStatus::Present),
        "absent" => Ok(DayStatus::Absent),
        "unmarked" => Ok(DayStatus::Unmarked),
        _ => Err(HandlerErr::bad_params(
            "status must be present, absent or unmarked",
        )),
    }
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let day = required_day(params)?;
    let status = required_status(params)?;
    let date = day.format("%Y-%m-%d").to_string();

    let student_in_class = conn
        .query_row(
            "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
            (&class_id, &student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !student_in_class {
        return Err(HandlerErr::not_found("student not found"));
    }

    // Unmarked means "no row": drop whatever is stored for the day.
    if status == DayStatus::Unmarked {
        conn.execute(
            "DELETE FROM attendance WHERE class_id = ? AND student_id = ? AND date = ?",
            (&class_id, &student_id, &date),
        )
        .map_err(|e| HandlerErr::write("db_delete_failed", e, "attendance"))?;
        return Ok(json!({
            "studentId": student_id,
            "date": date,
            "status": status.as_str(),
            "rowId": null
        }));
    }

    let present = status == DayStatus::Present;
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance
             WHERE class_id = ? AND student_id = ? AND date = ?
             ORDER BY rowid LIMIT 1",
            (&class_id, &student_id, &date),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let row_id = match existing {
        Some(row_id) => {
            conn.execute(
                "UPDATE attendance SET status = ? WHERE id = ?",
                (present as i64, &row_id),
            )
            .map_err(|e| HandlerErr::write("db_update_failed", e, "attendance"))?;
            row_id
        }
        None => {
            let row_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO attendance(id, class_id, student_id, date, status)
                 VALUES(?, ?, ?, ?, ?)",
                (&row_id, &class_id, &student_id, &date, present as i64),
            )
            .map_err(|e| HandlerErr::write("db_insert_failed", e, "attendance"))?;
            row_id
        }
    };

    Ok(json!({
        "studentId": student_id,
        "date": date,
        "status": status.as_str(),
        "rowId": row_id
    }))
}

fn attendance_day_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let day = required_day(params)?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let roster = load_roster(conn, &class_id)?;
    let rows = load_rows_for_day(conn, &class_id, day)?;
    let reconciled = roll::reconcile_day(&roster, &rows, day);

    Ok(json!({
        "date": reconciled.date,
        "recorded": reconciled.recorded(),
        "presentCount": reconciled.present_count(),
        "absentCount": reconciled.absent_count(),
        "unmarkedCount": reconciled.unmarked_count(),
        "entries": reconciled.entries,
        "duplicateRows": reconciled.duplicate_rows,
        "orphanRows": reconciled.orphan_rows,
        "malformedRows": reconciled.malformed_rows
    }))
}

fn attendance_month_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing year"))? as i32;
    // Months are 1-based, matching the stored YYYY-MM-DD keys.
    let month = params
        .get("month")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("missing month"))? as u32;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }
    let Some((first, last)) = roll::month_bounds(year, month) else {
        return Err(HandlerErr::bad_params("month out of range"));
    };

    let roster = load_roster(conn, &class_id)?;
    let rows = load_rows_for_range(conn, &class_id, first, last)?;
    let summary = roll::summarize_month(&roster, &rows, year, month)
        .ok_or_else(|| HandlerErr::bad_params("month out of range"))?;

    let summaries: Vec<serde_json::Value> = summary
        .summaries
        .iter()
        .map(|s| {
            json!({
                "studentId": s.student_id,
                "name": s.name,
                "email": s.email,
                "present": s.present,
                "absent": s.absent,
                "total": s.total,
                "percentage": s.percentage,
                "band": s.band().as_str()
            })
        })
        .collect();

    Ok(json!({
        "year": summary.year,
        "month": summary.month,
        "firstDay": first.format("%Y-%m-%d").to_string(),
        "lastDay": last.format("%Y-%m-%d").to_string(),
        "summaries": summaries,
        "orphanRows": summary.orphan_rows,
        "malformedRows": summary.malformed_rows
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_db(state, req, attendance_mark)),
        "attendance.dayOpen" => Some(with_db(state, req, attendance_day_open)),
        "attendance.monthSummary" => Some(with_db(state, req, attendance_month_summary)),
        _ => None,
    }
}
