use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, Collection};
use crate::ipc::error::ActionResult;
use crate::ipc::helpers::{
    id_param, mutate, optional_date, optional_str, query, required_str, text, Ctx, Patch,
};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

const COLL: Collection = Collection::Assignment;

fn check_assigner(ctx: &Ctx, employee_id: &Option<String>) -> ActionResult<()> {
    match employee_id {
        Some(id) => collection::require_live(ctx.conn, ctx.school(), Collection::Employee, id),
        None => Ok(()),
    }
}

fn assignments_list(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let mut filters = Vec::new();
    if let Some(class_id) = optional_str(params.get("classId"), "classId")? {
        filters.push(("class_id", SqlValue::Text(class_id)));
    }
    let assignments = collection::list_live(
        ctx.conn,
        ctx.school(),
        COLL,
        &filters,
        "due_date IS NULL, due_date, title",
    )?;
    Ok(json!({ "assignments": assignments }))
}

fn assignments_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let assignment = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "assignment": assignment }))
}

fn assignments_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageAssignments)?;
    let class_id = required_str(params.get("classId"), "classId")?;
    let title = required_str(params.get("title"), "title")?;
    let description = optional_str(params.get("description"), "description")?;
    let due_date = optional_date(params.get("dueDate"), "dueDate")?;
    let assigned_by = optional_str(params.get("assignedBy"), "assignedBy")?;

    collection::require_live(ctx.conn, ctx.school(), Collection::Class, &class_id)?;
    check_assigner(ctx, &assigned_by)?;

    let id = collection::insert(
        ctx.conn,
        ctx.session,
        COLL,
        vec![
            ("class_id", SqlValue::Text(class_id)),
            ("title", SqlValue::Text(title.clone())),
            ("description", text(description)),
            ("due_date", text(due_date)),
            ("assigned_by", text(assigned_by)),
        ],
    )?;
    ctx.audit(AuditEntry::new(
        ActionType::Create,
        COLL,
        &id,
        format!("set assignment {}", title),
    ));
    Ok(json!({ "assignmentId": id }))
}

fn assignments_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageAssignments)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(
        params,
        &["classId", "title", "description", "dueDate", "assignedBy"],
    )?;
    collection::require_live(ctx.conn, ctx.school(), COLL, &id)?;

    let mut fields = Vec::new();
    if patch.has("classId") {
        let class_id = required_str(patch.get("classId"), "classId")?;
        collection::require_live(ctx.conn, ctx.school(), Collection::Class, &class_id)?;
        fields.push(("class_id", SqlValue::Text(class_id)));
    }
    if patch.has("title") {
        fields.push(("title", SqlValue::Text(required_str(patch.get("title"), "title")?)));
    }
    if patch.has("description") {
        fields.push((
            "description",
            text(optional_str(patch.get("description"), "description")?),
        ));
    }
    if patch.has("dueDate") {
        fields.push(("due_date", text(optional_date(patch.get("dueDate"), "dueDate")?)));
    }
    if patch.has("assignedBy") {
        let assigned_by = optional_str(patch.get("assignedBy"), "assignedBy")?;
        check_assigner(ctx, &assigned_by)?;
        fields.push(("assigned_by", text(assigned_by)));
    }

    collection::update(ctx.conn, ctx.session, COLL, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, COLL, &id, "updated assignment"));
    let assignment = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "assignment": assignment }))
}

fn assignments_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageAssignments)?;
    let id = id_param(params)?;
    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, COLL, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, COLL, &id, "deleted assignment"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = COLL.route();
    match req.method.as_str() {
        "assignments.list" => Some(query(state, req, assignments_list)),
        "assignments.get" => Some(query(state, req, assignments_get)),
        "assignments.create" => Some(mutate(state, req, route, assignments_create)),
        "assignments.update" => Some(mutate(state, req, route, assignments_update)),
        "assignments.delete" => Some(mutate(state, req, route, assignments_delete)),
        _ => None,
    }
}
