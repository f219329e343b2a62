use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, Collection};
use crate::ipc::error::ActionResult;
use crate::ipc::helpers::{
    id_param, mutate, optional_f64_min, optional_str, query, real, required_date, required_str,
    text, Ctx, Patch,
};
use crate::ipc::types::{AppState, Request};
use crate::party::{self, PartyRole};
use crate::permissions::Permission;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

const COLL: Collection = Collection::Award;

fn attach_recipients(ctx: &Ctx, rows: &mut [Value]) {
    party::attach_all(ctx.conn, ctx.school(), rows, "awardToId", "awardTo");
}

fn awards_list(ctx: &Ctx, _params: &Value) -> ActionResult<Value> {
    let mut awards =
        collection::list_live(ctx.conn, ctx.school(), COLL, &[], "awarded_on DESC, name")?;
    attach_recipients(ctx, &mut awards);
    Ok(json!({ "awards": awards }))
}

fn awards_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let mut award = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    attach_recipients(ctx, std::slice::from_mut(&mut award));
    Ok(json!({ "award": award }))
}

fn awards_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageAwards)?;
    let name = required_str(params.get("name"), "name")?;
    let role = PartyRole::parse(&required_str(params.get("role"), "role")?)?;
    let award_to = required_str(params.get("awardToId"), "awardToId")?;
    let awarded_on = required_date(params.get("awardedOn"), "awardedOn")?;
    let gift = optional_str(params.get("gift"), "gift")?;
    let cash_price = optional_f64_min(params.get("cashPrice"), "cashPrice", 0.0)?;

    let recipient = party::resolve(ctx.conn, ctx.school(), role, &award_to)?;

    let id = collection::insert(
        ctx.conn,
        ctx.session,
        COLL,
        vec![
            ("name", SqlValue::Text(name.clone())),
            ("role", SqlValue::Text(role.as_str().into())),
            ("award_to_id", SqlValue::Text(award_to)),
            ("awarded_on", SqlValue::Text(awarded_on)),
            ("gift", text(gift)),
            ("cash_price", real(cash_price)),
        ],
    )?;
    ctx.audit(AuditEntry::new(
        ActionType::Create,
        COLL,
        &id,
        format!("awarded {} to {}", name, recipient.display_name),
    ));
    Ok(json!({ "awardId": id, "awardTo": recipient.to_json() }))
}

fn awards_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageAwards)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(
        params,
        &["name", "role", "awardToId", "awardedOn", "gift", "cashPrice"],
    )?;
    let current = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;

    let mut fields = Vec::new();
    if patch.has("name") {
        fields.push(("name", SqlValue::Text(required_str(patch.get("name"), "name")?)));
    }
    // Role and target move together: re-resolve whenever either changes.
    if patch.has("role") || patch.has("awardToId") {
        let role = match patch.get("role") {
            Some(v) => PartyRole::parse(&required_str(Some(v), "role")?)?,
            None => PartyRole::parse(current["role"].as_str().unwrap_or_default())?,
        };
        let award_to = match patch.get("awardToId") {
            Some(v) => required_str(Some(v), "awardToId")?,
            None => current["awardToId"].as_str().unwrap_or_default().to_string(),
        };
        party::resolve(ctx.conn, ctx.school(), role, &award_to)?;
        fields.push(("role", SqlValue::Text(role.as_str().into())));
        fields.push(("award_to_id", SqlValue::Text(award_to)));
    }
    if patch.has("awardedOn") {
        fields.push((
            "awarded_on",
            SqlValue::Text(required_date(patch.get("awardedOn"), "awardedOn")?),
        ));
    }
    if patch.has("gift") {
        fields.push(("gift", text(optional_str(patch.get("gift"), "gift")?)));
    }
    if patch.has("cashPrice") {
        fields.push((
            "cash_price",
            real(optional_f64_min(patch.get("cashPrice"), "cashPrice", 0.0)?),
        ));
    }

    collection::update(ctx.conn, ctx.session, COLL, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, COLL, &id, "updated award"));
    let mut award = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    attach_recipients(ctx, std::slice::from_mut(&mut award));
    Ok(json!({ "award": award }))
}

fn awards_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageAwards)?;
    let id = id_param(params)?;
    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, COLL, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, COLL, &id, "deleted award"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = COLL.route();
    match req.method.as_str() {
        "awards.list" => Some(query(state, req, awards_list)),
        "awards.get" => Some(query(state, req, awards_get)),
        "awards.create" => Some(mutate(state, req, route, awards_create)),
        "awards.update" => Some(mutate(state, req, route, awards_update)),
        "awards.delete" => Some(mutate(state, req, route, awards_delete)),
        _ => None,
    }
}
