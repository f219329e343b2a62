use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, Collection};
use crate::ipc::error::{ActionError, ActionResult};
use crate::ipc::helpers::{
    id_param, mutate, optional_str, query, required_date, required_str, text, Ctx, Patch,
};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

const COLL: Collection = Collection::Postal;

fn parse_direction(raw: &str) -> ActionResult<&'static str> {
    match raw {
        "receive" => Ok("receive"),
        "dispatch" => Ok("dispatch"),
        other => Err(ActionError::bad_params_with(
            "direction must be receive or dispatch",
            json!({ "direction": other }),
        )),
    }
}

fn postal_list(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let mut filters = Vec::new();
    if let Some(raw) = optional_str(params.get("direction"), "direction")? {
        filters.push(("direction", SqlValue::Text(parse_direction(&raw)?.into())));
    }
    let records =
        collection::list_live(ctx.conn, ctx.school(), COLL, &filters, "date DESC, reference_no")?;
    Ok(json!({ "records": records }))
}

fn postal_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let record = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "record": record }))
}

fn postal_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManagePostal)?;
    let direction = parse_direction(&required_str(params.get("direction"), "direction")?)?;
    let reference_no = required_str(params.get("referenceNo"), "referenceNo")?;
    let title = required_str(params.get("title"), "title")?;
    let from_title = optional_str(params.get("fromTitle"), "fromTitle")?;
    let to_title = optional_str(params.get("toTitle"), "toTitle")?;
    let date = required_date(params.get("date"), "date")?;
    let note = optional_str(params.get("note"), "note")?;

    collection::ensure_unique(
        ctx.conn,
        ctx.school(),
        COLL,
        &[
            SqlValue::Text(direction.into()),
            SqlValue::Text(reference_no.clone()),
        ],
        None,
    )?;

    let id = collection::insert(
        ctx.conn,
        ctx.session,
        COLL,
        vec![
            ("direction", SqlValue::Text(direction.into())),
            ("reference_no", SqlValue::Text(reference_no.clone())),
            ("title", SqlValue::Text(title)),
            ("from_title", text(from_title)),
            ("to_title", text(to_title)),
            ("date", SqlValue::Text(date)),
            ("note", text(note)),
        ],
    )?;
    ctx.audit(AuditEntry::new(
        ActionType::Create,
        COLL,
        &id,
        format!("logged {} {}", direction, reference_no),
    ));
    Ok(json!({ "recordId": id }))
}

fn postal_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManagePostal)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(
        params,
        &[
            "direction",
            "referenceNo",
            "title",
            "fromTitle",
            "toTitle",
            "date",
            "note",
        ],
    )?;
    let current = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;

    let mut fields = Vec::new();
    let mut direction = current["direction"].as_str().unwrap_or_default().to_string();
    let mut reference_no = current["referenceNo"].as_str().unwrap_or_default().to_string();
    if patch.has("direction") {
        direction = parse_direction(&required_str(patch.get("direction"), "direction")?)?.into();
        fields.push(("direction", SqlValue::Text(direction.clone())));
    }
    if patch.has("referenceNo") {
        reference_no = required_str(patch.get("referenceNo"), "referenceNo")?;
        fields.push(("reference_no", SqlValue::Text(reference_no.clone())));
    }
    if patch.has("direction") || patch.has("referenceNo") {
        collection::ensure_unique(
            ctx.conn,
            ctx.school(),
            COLL,
            &[SqlValue::Text(direction), SqlValue::Text(reference_no)],
            Some(&id),
        )?;
    }
    if patch.has("title") {
        fields.push(("title", SqlValue::Text(required_str(patch.get("title"), "title")?)));
    }
    if patch.has("fromTitle") {
        fields.push(("from_title", text(optional_str(patch.get("fromTitle"), "fromTitle")?)));
    }
    if patch.has("toTitle") {
        fields.push(("to_title", text(optional_str(patch.get("toTitle"), "toTitle")?)));
    }
    if patch.has("date") {
        fields.push(("date", SqlValue::Text(required_date(patch.get("date"), "date")?)));
    }
    if patch.has("note") {
        fields.push(("note", text(optional_str(patch.get("note"), "note")?)));
    }

    collection::update(ctx.conn, ctx.session, COLL, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, COLL, &id, "updated postal record"));
    let record = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "record": record }))
}

fn postal_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManagePostal)?;
    let id = id_param(params)?;
    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, COLL, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, COLL, &id, "deleted postal record"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = COLL.route();
    match req.method.as_str() {
        "postal.list" => Some(query(state, req, postal_list)),
        "postal.get" => Some(query(state, req, postal_get)),
        "postal.create" => Some(mutate(state, req, route, postal_create)),
        "postal.update" => Some(mutate(state, req, route, postal_update)),
        "postal.delete" => Some(mutate(state, req, route, postal_delete)),
        _ => None,
    }
}
