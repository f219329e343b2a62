use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, Collection};
use crate::ipc::error::ActionResult;
use crate::ipc::helpers::{id_param, mutate, optional_str, query, required_str, text, Ctx, Patch};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

const COLL: Collection = Collection::Parent;

fn parents_list(ctx: &Ctx, _params: &Value) -> ActionResult<Value> {
    let parents =
        collection::list_live(ctx.conn, ctx.school(), COLL, &[], "last_name, first_name")?;
    Ok(json!({ "parents": parents }))
}

fn parents_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let parent = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    let children = collection::list_live(
        ctx.conn,
        ctx.school(),
        Collection::Student,
        &[("parent_id", SqlValue::Text(id))],
        "last_name, first_name",
    )?;
    Ok(json!({ "parent": parent, "children": children }))
}

fn parents_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageParents)?;
    let first = required_str(params.get("firstName"), "firstName")?;
    let last = required_str(params.get("lastName"), "lastName")?;
    let email = optional_str(params.get("email"), "email")?;
    let phone = optional_str(params.get("phone"), "phone")?;
    let id = collection::insert(
        ctx.conn,
        ctx.session,
        COLL,
        vec![
            ("first_name", SqlValue::Text(first.clone())),
            ("last_name", SqlValue::Text(last.clone())),
            ("email", text(email)),
            ("phone", text(phone)),
        ],
    )?;
    ctx.audit(AuditEntry::new(
        ActionType::Create,
        COLL,
        &id,
        format!("added parent {}, {}", last, first),
    ));
    Ok(json!({ "parentId": id }))
}

fn parents_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageParents)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(params, &["firstName", "lastName", "email", "phone"])?;
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
    if patch.has("email") {
        fields.push(("email", text(optional_str(patch.get("email"), "email")?)));
    }
    if patch.has("phone") {
        fields.push(("phone", text(optional_str(patch.get("phone"), "phone")?)));
    }
    collection::update(ctx.conn, ctx.session, COLL, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, COLL, &id, "updated parent"));
    let parent = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "parent": parent }))
}

fn parents_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageParents)?;
    let id = id_param(params)?;
    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, COLL, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, COLL, &id, "deleted parent"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = COLL.route();
    match req.method.as_str() {
        "parents.list" => Some(query(state, req, parents_list)),
        "parents.get" => Some(query(state, req, parents_get)),
        "parents.create" => Some(mutate(state, req, route, parents_create)),
        "parents.update" => Some(mutate(state, req, route, parents_update)),
        "parents.delete" => Some(mutate(state, req, route, parents_delete)),
        _ => None,
    }
}
