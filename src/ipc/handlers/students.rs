use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, Collection};
use crate::ipc::error::ActionResult;
use crate::ipc::helpers::{
    flag, id_param, mutate, optional_bool, optional_date, optional_str, query, required_str, text,
    Ctx, Patch,
};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

const COLL: Collection = Collection::Student;

fn check_parent(ctx: &Ctx, parent_id: &Option<String>) -> ActionResult<()> {
    match parent_id {
        Some(id) => collection::require_live(ctx.conn, ctx.school(), Collection::Parent, id),
        None => Ok(()),
    }
}

fn students_list(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let mut filters = Vec::new();
    if let Some(class_id) = optional_str(params.get("classId"), "classId")? {
        filters.push(("class_id", SqlValue::Text(class_id)));
    }
    let students =
        collection::list_live(ctx.conn, ctx.school(), COLL, &filters, "last_name, first_name")?;
    Ok(json!({ "students": students }))
}

fn students_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let student = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "student": student }))
}

fn students_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageStudents)?;
    let first = required_str(params.get("firstName"), "firstName")?;
    let last = required_str(params.get("lastName"), "lastName")?;
    let admission_no = required_str(params.get("admissionNo"), "admissionNo")?;
    let class_id = required_str(params.get("classId"), "classId")?;
    let parent_id = optional_str(params.get("parentId"), "parentId")?;
    let birth_date = optional_date(params.get("birthDate"), "birthDate")?;
    let active = optional_bool(params.get("active"), "active")?.unwrap_or(true);

    collection::ensure_unique(
        ctx.conn,
        ctx.school(),
        COLL,
        &[SqlValue::Text(admission_no.clone())],
        None,
    )?;
    collection::require_live(ctx.conn, ctx.school(), Collection::Class, &class_id)?;
    check_parent(ctx, &parent_id)?;

    let id = collection::insert(
        ctx.conn,
        ctx.session,
        COLL,
        vec![
            ("first_name", SqlValue::Text(first.clone())),
            ("last_name", SqlValue::Text(last.clone())),
            ("admission_no", SqlValue::Text(admission_no)),
            ("class_id", SqlValue::Text(class_id)),
            ("parent_id", text(parent_id)),
            ("birth_date", text(birth_date)),
            ("active", flag(active)),
        ],
    )?;
    ctx.audit(AuditEntry::new(
        ActionType::Create,
        COLL,
        &id,
        format!("admitted student {}, {}", last, first),
    ));
    Ok(json!({ "studentId": id }))
}

fn students_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageStudents)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(
        params,
        &[
            "firstName",
            "lastName",
            "admissionNo",
            "classId",
            "parentId",
            "birthDate",
            "active",
        ],
    )?;
    collection::require_live(ctx.conn, ctx.school(), COLL, &id)?;

    let mut fields = Vec::new();
    if patch.has("firstName") {
        fields.push((
            "first_name",
            SqlValue::Text(required_str(patch.get("firstName"), "firstName")?),
        ));
    }
    if patch.has("lastName") {
        fields.push((
            "last_name",
            SqlValue::Text(required_str(patch.get("lastName"), "lastName")?),
        ));
    }
    if patch.has("admissionNo") {
        let admission_no = required_str(patch.get("admissionNo"), "admissionNo")?;
        collection::ensure_unique(
            ctx.conn,
            ctx.school(),
            COLL,
            &[SqlValue::Text(admission_no.clone())],
            Some(&id),
        )?;
        fields.push(("admission_no", SqlValue::Text(admission_no)));
    }
    if patch.has("classId") {
        let class_id = required_str(patch.get("classId"), "classId")?;
        collection::require_live(ctx.conn, ctx.school(), Collection::Class, &class_id)?;
        fields.push(("class_id", SqlValue::Text(class_id)));
    }
    if patch.has("parentId") {
        let parent_id = optional_str(patch.get("parentId"), "parentId")?;
        check_parent(ctx, &parent_id)?;
        fields.push(("parent_id", text(parent_id)));
    }
    if patch.has("birthDate") {
        fields.push((
            "birth_date",
            text(optional_date(patch.get("birthDate"), "birthDate")?),
        ));
    }
    if let Some(active) = optional_bool(patch.get("active"), "active")? {
        fields.push(("active", flag(active)));
    }

    collection::update(ctx.conn, ctx.session, COLL, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, COLL, &id, "updated student"));
    let student = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "student": student }))
}

fn students_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageStudents)?;
    let id = id_param(params)?;
    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, COLL, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, COLL, &id, "deleted student"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = COLL.route();
    match req.method.as_str() {
        "students.list" => Some(query(state, req, students_list)),
        "students.get" => Some(query(state, req, students_get)),
        "students.create" => Some(mutate(state, req, route, students_create)),
        "students.update" => Some(mutate(state, req, route, students_update)),
        "students.delete" => Some(mutate(state, req, route, students_delete)),
        _ => None,
    }
}
