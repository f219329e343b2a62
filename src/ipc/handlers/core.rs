use crate::collection::now_rfc3339;
use crate::ipc::error::{err, ok, ActionError, ActionResult};
use crate::ipc::helpers::{required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::session::Session;
use rusqlite::{ErrorCode, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "sessionActive": state.session.is_some()
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match state.open_workspace(&path) {
        Ok(()) => {
            // A session belongs to the database it was opened against.
            state.session = None;
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = ?e, "workspace open failed");
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

fn session_set(state: &mut AppState, params: &serde_json::Value) -> ActionResult<serde_json::Value> {
    let conn = state.db.as_ref().ok_or(ActionError::NoWorkspace)?;
    let session = Session::from_params(params)?;
    let school: Option<String> = conn
        .query_row(
            "SELECT name FROM schools WHERE id = ?",
            [&session.school_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(school_name) = school else {
        return Err(ActionError::not_found_id("school", &session.school_id));
    };
    tracing::info!(school_id = %session.school_id, user_id = %session.user_id, "session set");
    let mut out = session.to_json();
    out["schoolName"] = json!(school_name);
    state.session = Some(session);
    Ok(out)
}

fn schools_create(state: &mut AppState, params: &serde_json::Value) -> ActionResult<serde_json::Value> {
    let conn = state.db.as_ref().ok_or(ActionError::NoWorkspace)?;
    let name = required_str(params.get("name"), "name")?;
    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO schools(id, name, created_at) VALUES(?, ?, ?)",
        (&id, &name, now_rfc3339()),
    ) {
        Ok(_) => Ok(json!({ "schoolId": id, "name": name })),
        Err(rusqlite::Error::SqliteFailure(f, _)) if f.code == ErrorCode::ConstraintViolation => {
            Err(ActionError::Conflict("school name already exists".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn schools_list(state: &mut AppState) -> ActionResult<serde_json::Value> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "schools": [] }));
    };
    let mut stmt = conn.prepare("SELECT id, name, created_at FROM schools ORDER BY name")?;
    let schools = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "schools": schools }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.set" => Some(respond(req, session_set(state, &req.params))),
        "session.get" => Some(ok(
            &req.id,
            json!({ "session": state.session.as_ref().map(Session::to_json) }),
        )),
        "session.clear" => {
            state.session = None;
            Some(ok(&req.id, json!({ "ok": true })))
        }
        "schools.create" => Some(respond(req, schools_create(state, &req.params))),
        "schools.list" => Some(respond(req, schools_list(state))),
        _ => None,
    }
}
