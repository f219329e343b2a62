use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, Collection};
use crate::ipc::error::{ActionError, ActionResult};
use crate::ipc::helpers::{id_param, mutate, optional_str, query, required_str, text, Ctx, Patch};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

const COLL: Collection = Collection::Department;

fn departments_list(ctx: &Ctx, _params: &Value) -> ActionResult<Value> {
    let departments = collection::list_live(ctx.conn, ctx.school(), COLL, &[], "name")?;
    Ok(json!({ "departments": departments }))
}

fn departments_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let department = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "department": department }))
}

fn departments_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageDepartments)?;
    let name = required_str(params.get("name"), "name")?;
    let description = optional_str(params.get("description"), "description")?;
    collection::ensure_unique(
        ctx.conn,
        ctx.school(),
        COLL,
        &[SqlValue::Text(name.clone())],
        None,
    )?;
    let id = collection::insert(
        ctx.conn,
        ctx.session,
        COLL,
        vec![
            ("name", SqlValue::Text(name.clone())),
            ("description", text(description)),
        ],
    )?;
    ctx.audit(AuditEntry::new(
        ActionType::Create,
        COLL,
        &id,
        format!("created department {}", name),
    ));
    Ok(json!({ "departmentId": id, "name": name }))
}

fn departments_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageDepartments)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(params, &["name", "description"])?;
    collection::require_live(ctx.conn, ctx.school(), COLL, &id)?;

    let mut fields = Vec::new();
    if patch.has("name") {
        let name = required_str(patch.get("name"), "name")?;
        collection::ensure_unique(
            ctx.conn,
            ctx.school(),
            COLL,
            &[SqlValue::Text(name.clone())],
            Some(&id),
        )?;
        fields.push(("name", SqlValue::Text(name)));
    }
    if patch.has("description") {
        fields.push((
            "description",
            text(optional_str(patch.get("description"), "description")?),
        ));
    }
    collection::update(ctx.conn, ctx.session, COLL, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, COLL, &id, "updated department"));
    let department = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "department": department }))
}

fn departments_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageDepartments)?;
    let id = id_param(params)?;
    collection::require_live(ctx.conn, ctx.school(), COLL, &id)?;
    let staffed: i64 = ctx.conn.query_row(
        "SELECT COUNT(*) FROM employees WHERE school_id = ? AND department_id = ? AND del_flag = 0",
        (ctx.school(), &id),
        |r| r.get(0),
    )?;
    if staffed > 0 {
        return Err(ActionError::Conflict(format!(
            "department still has {} employees",
            staffed
        )));
    }
    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, COLL, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, COLL, &id, "deleted department"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = COLL.route();
    match req.method.as_str() {
        "departments.list" => Some(query(state, req, departments_list)),
        "departments.get" => Some(query(state, req, departments_get)),
        "departments.create" => Some(mutate(state, req, route, departments_create)),
        "departments.update" => Some(mutate(state, req, route, departments_update)),
        "departments.delete" => Some(mutate(state, req, route, departments_delete)),
        _ => None,
    }
}
