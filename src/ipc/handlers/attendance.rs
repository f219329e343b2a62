use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, now_rfc3339, Collection};
use crate::ipc::error::{ActionError, ActionResult};
use crate::ipc::helpers::{mutate, parse_date, query, required_date, required_str, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

const ROUTE: &str = "/dashboard/attendance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Status {
    Present,
    Absent,
    Late,
    Excused,
}

impl Status {
    const ALL: [Status; 4] = [Self::Present, Self::Absent, Self::Late, Self::Excused];

    fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Excused => "excused",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Tally {
    counts: HashMap<Status, i64>,
}

impl Tally {
    fn add(&mut self, status: Status, n: i64) {
        *self.counts.entry(status).or_insert(0) += n;
    }

    fn get(&self, status: Status) -> i64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    fn total(&self) -> i64 {
        self.counts.values().sum()
    }

    /// Present and late both count as attended; no marks means no rate.
    fn rate(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| (self.get(Status::Present) + self.get(Status::Late)) as f64 / total as f64)
    }

    fn to_json(&self) -> Value {
        json!({
            "present": self.get(Status::Present),
            "absent": self.get(Status::Absent),
            "late": self.get(Status::Late),
            "excused": self.get(Status::Excused),
            "total": self.total(),
            "attendanceRate": self.rate(),
        })
    }
}

struct RosterEntry {
    id: String,
    display_name: String,
}

fn class_roster(conn: &Connection, school_id: &str, class_id: &str) -> ActionResult<Vec<RosterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name FROM students
         WHERE school_id = ? AND class_id = ? AND del_flag = 0
         ORDER BY last_name, first_name",
    )?;
    let rows = stmt
        .query_map((school_id, class_id), |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok(RosterEntry {
                id: r.get(0)?,
                display_name: format!("{}, {}", last, first),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn parse_entries(params: &Value) -> ActionResult<Vec<(String, Status)>> {
    let raw = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ActionError::bad_params("entries must be an array"))?;
    if raw.is_empty() {
        return Err(ActionError::bad_params("entries must not be empty"));
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let student_id = required_str(entry.get("studentId"), "studentId")?;
        let status_raw = required_str(entry.get("status"), "status")?;
        let status = Status::parse(&status_raw).ok_or_else(|| {
            ActionError::bad_params_with(
                "status must be one of: present, absent, late, excused",
                json!({ "index": i, "status": status_raw }),
            )
        })?;
        if !seen.insert(student_id.clone()) {
            return Err(ActionError::bad_params_with(
                "student listed twice",
                json!({ "studentId": student_id }),
            ));
        }
        out.push((student_id, status));
    }
    Ok(out)
}

fn attendance_mark(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::MarkAttendance)?;
    let class_id = required_str(params.get("classId"), "classId")?;
    let date = required_date(params.get("date"), "date")?;
    let entries = parse_entries(params)?;
    collection::require_live(ctx.conn, ctx.school(), Collection::Class, &class_id)?;

    let roster: HashSet<String> = class_roster(ctx.conn, ctx.school(), &class_id)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let outsiders: Vec<&str> = entries
        .iter()
        .filter(|(id, _)| !roster.contains(id))
        .map(|(id, _)| id.as_str())
        .collect();
    if !outsiders.is_empty() {
        return Err(ActionError::bad_params_with(
            "students are not in this class",
            json!({ "studentIds": outsiders }),
        ));
    }

    let now = now_rfc3339();
    let tx = ctx.conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO attendance(school_id, class_id, student_id, date, status, marked_by, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(school_id, student_id, date) DO UPDATE SET
               class_id = excluded.class_id,
               status = excluded.status,
               marked_by = excluded.marked_by,
               updated_at = excluded.updated_at",
        )?;
        for (student_id, status) in &entries {
            stmt.execute((
                ctx.school(),
                &class_id,
                student_id,
                &date,
                status.as_str(),
                &ctx.session.user_id,
                &now,
            ))?;
        }
    }
    tx.commit()?;

    ctx.audit(AuditEntry {
        action_type: ActionType::Mark,
        message: format!("marked {} students for {}", entries.len(), date),
        entity_type: "attendance",
        entity_id: Some(class_id.clone()),
    });
    Ok(json!({ "classId": class_id, "date": date, "marked": entries.len() }))
}

fn attendance_day(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let class_id = required_str(params.get("classId"), "classId")?;
    let date = required_date(params.get("date"), "date")?;
    collection::require_live(ctx.conn, ctx.school(), Collection::Class, &class_id)?;

    let mut stmt = ctx.conn.prepare(
        "SELECT student_id, status FROM attendance
         WHERE school_id = ? AND class_id = ? AND date = ?",
    )?;
    let marks: HashMap<String, String> = stmt
        .query_map((ctx.school(), &class_id, &date), |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let students: Vec<Value> = class_roster(ctx.conn, ctx.school(), &class_id)?
        .into_iter()
        .map(|s| {
            json!({
                "studentId": s.id,
                "displayName": s.display_name,
                "status": marks.get(&s.id),
            })
        })
        .collect();
    Ok(json!({ "classId": class_id, "date": date, "students": students }))
}

fn attendance_summary(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let class_id = required_str(params.get("classId"), "classId")?;
    let from = required_date(params.get("from"), "from")?;
    let to = required_date(params.get("to"), "to")?;
    if parse_date(&from, "from")? > parse_date(&to, "to")? {
        return Err(ActionError::bad_params_with(
            "from must not be after to",
            json!({ "from": from, "to": to }),
        ));
    }
    collection::require_live(ctx.conn, ctx.school(), Collection::Class, &class_id)?;

    let mut stmt = ctx.conn.prepare(
        "SELECT student_id, status, COUNT(*) FROM attendance
         WHERE school_id = ? AND class_id = ? AND date >= ? AND date <= ?
         GROUP BY student_id, status",
    )?;
    let rows = stmt
        .query_map((ctx.school(), &class_id, &from, &to), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut per_student: HashMap<String, Tally> = HashMap::new();
    let mut class_tally = Tally::default();
    for (student_id, status, n) in rows {
        let Some(status) = Status::parse(&status) else {
            continue;
        };
        per_student.entry(student_id).or_default().add(status, n);
    }

    let students: Vec<Value> = class_roster(ctx.conn, ctx.school(), &class_id)?
        .into_iter()
        .map(|s| {
            let tally = per_student.remove(&s.id).unwrap_or_default();
            for status in Status::ALL {
                class_tally.add(status, tally.get(status));
            }
            let mut row = tally.to_json();
            row["studentId"] = json!(s.id);
            row["displayName"] = json!(s.display_name);
            row
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "from": from,
        "to": to,
        "students": students,
        "class": class_tally.to_json(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(mutate(state, req, ROUTE, attendance_mark)),
        "attendance.day" => Some(query(state, req, attendance_day)),
        "attendance.summary" => Some(query(state, req, attendance_summary)),
        _ => None,
    }
}
