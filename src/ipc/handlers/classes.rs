use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, Collection};
use crate::ipc::error::{ActionError, ActionResult};
use crate::ipc::helpers::{id_param, mutate, optional_str, query, required_str, text, Ctx, Patch};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};
use std::collections::HashMap;

const COLL: Collection = Collection::Class;

fn check_teacher(ctx: &Ctx, teacher_id: &Option<String>) -> ActionResult<()> {
    match teacher_id {
        Some(id) => collection::require_live(ctx.conn, ctx.school(), Collection::Employee, id),
        None => Ok(()),
    }
}

fn classes_list(ctx: &Ctx, _params: &Value) -> ActionResult<Value> {
    let mut classes = collection::list_live(ctx.conn, ctx.school(), COLL, &[], "name")?;

    // One grouped count instead of a subquery per row.
    let mut stmt = ctx.conn.prepare(
        "SELECT class_id, COUNT(*) FROM students
         WHERE school_id = ? AND del_flag = 0
         GROUP BY class_id",
    )?;
    let counts: HashMap<String, i64> = stmt
        .query_map([ctx.school()], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;

    for class in classes.iter_mut() {
        let n = class["id"]
            .as_str()
            .and_then(|id| counts.get(id))
            .copied()
            .unwrap_or(0);
        class["studentCount"] = json!(n);
    }
    Ok(json!({ "classes": classes }))
}

fn classes_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let class = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "class": class }))
}

fn classes_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageClasses)?;
    let name = required_str(params.get("name"), "name")?;
    let section = optional_str(params.get("section"), "section")?;
    let teacher = optional_str(params.get("classTeacherId"), "classTeacherId")?;

    collection::ensure_unique(
        ctx.conn,
        ctx.school(),
        COLL,
        &[SqlValue::Text(name.clone())],
        None,
    )?;
    check_teacher(ctx, &teacher)?;

    let id = collection::insert(
        ctx.conn,
        ctx.session,
        COLL,
        vec![
            ("name", SqlValue::Text(name.clone())),
            ("section", text(section)),
            ("class_teacher_id", text(teacher)),
        ],
    )?;
    ctx.audit(AuditEntry::new(
        ActionType::Create,
        COLL,
        &id,
        format!("created class {}", name),
    ));
    Ok(json!({ "classId": id, "name": name }))
}

fn classes_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageClasses)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(params, &["name", "section", "classTeacherId"])?;
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
    if patch.has("section") {
        fields.push(("section", text(optional_str(patch.get("section"), "section")?)));
    }
    if patch.has("classTeacherId") {
        let teacher = optional_str(patch.get("classTeacherId"), "classTeacherId")?;
        check_teacher(ctx, &teacher)?;
        fields.push(("class_teacher_id", text(teacher)));
    }

    collection::update(ctx.conn, ctx.session, COLL, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, COLL, &id, "updated class"));
    let class = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "class": class }))
}

fn classes_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageClasses)?;
    let id = id_param(params)?;
    collection::require_live(ctx.conn, ctx.school(), COLL, &id)?;

    let enrolled: i64 = ctx.conn.query_row(
        "SELECT COUNT(*) FROM students WHERE school_id = ? AND class_id = ? AND del_flag = 0",
        (ctx.school(), &id),
        |r| r.get(0),
    )?;
    if enrolled > 0 {
        return Err(ActionError::Conflict(format!(
            "class still has {} enrolled students",
            enrolled
        )));
    }

    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, COLL, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, COLL, &id, "deleted class"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = COLL.route();
    match req.method.as_str() {
        "classes.list" => Some(query(state, req, classes_list)),
        "classes.get" => Some(query(state, req, classes_get)),
        "classes.create" => Some(mutate(state, req, route, classes_create)),
        "classes.update" => Some(mutate(state, req, route, classes_update)),
        "classes.delete" => Some(mutate(state, req, route, classes_delete)),
        _ => None,
    }
}
