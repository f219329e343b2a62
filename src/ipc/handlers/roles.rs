use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, Collection};
use crate::ipc::error::{ActionError, ActionResult};
use crate::ipc::helpers::{id_param, mutate, query, required_str, Ctx, Patch};
use crate::ipc::types::{AppState, Request};
use crate::permissions::{Permission, PermissionSet};
use crate::session::SessionRole;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

const COLL: Collection = Collection::Role;

/// Stored permissions come back as the full flag object, not the raw column.
fn expand_permissions(mut role: Value) -> Value {
    let set = role["permissions"]
        .as_str()
        .map(PermissionSet::from_stored)
        .unwrap_or_default();
    role["permissions"] = set.to_flags();
    role
}

fn roles_list(ctx: &Ctx, _params: &Value) -> ActionResult<Value> {
    let roles: Vec<Value> = collection::list_live(ctx.conn, ctx.school(), COLL, &[], "name")?
        .into_iter()
        .map(expand_permissions)
        .collect();
    Ok(json!({ "roles": roles }))
}

fn roles_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let role = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "role": expand_permissions(role) }))
}

fn roles_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageRoles)?;
    let name = required_str(params.get("name"), "name")?;
    let set = match params.get("permissions") {
        None | Some(Value::Null) => PermissionSet::default(),
        Some(flags) => PermissionSet::from_flags(flags)?,
    };
    collection::ensure_unique(
        ctx.conn,
        ctx.school(),
        COLL,
        &[SqlValue::Text(name.clone())],
        None,
    )?;
    let flags = set.to_flags();
    let id = collection::insert(
        ctx.conn,
        ctx.session,
        COLL,
        vec![
            ("name", SqlValue::Text(name.clone())),
            ("permissions", SqlValue::Text(flags.to_string())),
        ],
    )?;
    ctx.audit(AuditEntry::new(
        ActionType::Create,
        COLL,
        &id,
        format!("created role {}", name),
    ));
    Ok(json!({ "roleId": id, "name": name, "permissions": flags }))
}

fn roles_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageRoles)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(params, &["name", "permissions"])?;
    let current = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;

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
    if let Some(flags) = patch.get("permissions") {
        let mut set = current["permissions"]
            .as_str()
            .map(PermissionSet::from_stored)
            .unwrap_or_default();
        set.apply_flags(flags)?;
        fields.push(("permissions", SqlValue::Text(set.to_flags().to_string())));
    }

    collection::update(ctx.conn, ctx.session, COLL, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, COLL, &id, "updated role"));
    let role = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "role": expand_permissions(role) }))
}

fn roles_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageRoles)?;
    let id = id_param(params)?;
    if let SessionRole::Staff { role_id } = &ctx.session.role {
        if *role_id == id {
            return Err(ActionError::Conflict(
                "cannot delete the role of the current session".into(),
            ));
        }
    }
    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, COLL, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, COLL, &id, "deleted role"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = COLL.route();
    match req.method.as_str() {
        "roles.list" => Some(query(state, req, roles_list)),
        "roles.get" => Some(query(state, req, roles_get)),
        "roles.create" => Some(mutate(state, req, route, roles_create)),
        "roles.update" => Some(mutate(state, req, route, roles_update)),
        "roles.delete" => Some(mutate(state, req, route, roles_delete)),
        _ => None,
    }
}
