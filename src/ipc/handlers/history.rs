use crate::audit::{self, ActionType, AuditEntry, HistoryFilter};
use crate::collection::Collection;
use crate::ipc::error::{ActionError, ActionResult};
use crate::ipc::helpers::{id_param, optional_i64_min, optional_str, query, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use crate::session::Session;
use crate::trash::{self, TrashEntry};
use rusqlite::Connection;
use serde_json::{json, Value};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

fn entity_type_param(params: &Value) -> ActionResult<Option<String>> {
    let Some(raw) = optional_str(params.get("entityType"), "entityType")? else {
        return Ok(None);
    };
    if raw != "attendance" && Collection::parse(&raw).is_none() {
        return Err(ActionError::bad_params_with(
            "unknown entityType",
            json!({ "entityType": raw }),
        ));
    }
    Ok(Some(raw))
}

fn history_list(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ViewHistory)?;
    let filter = HistoryFilter {
        entity_type: entity_type_param(params)?,
        entity_id: optional_str(params.get("entityId"), "entityId")?,
        limit: optional_i64_min(params.get("limit"), "limit", 1)?
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT),
    };
    let entries = audit::list(ctx.conn, ctx.school(), &filter)?;
    Ok(json!({ "entries": entries }))
}

fn trash_list(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageTrash)?;
    let entity_type = entity_type_param(params)?;
    let entries = trash::list(ctx.conn, ctx.school(), entity_type.as_deref())?;
    Ok(json!({ "entries": entries }))
}

/// Restore and purge touch whichever collection the entry came from, so the
/// route to revalidate is only known afterwards.
fn trash_mutation(
    state: &AppState,
    req: &Request,
    action: ActionType,
    apply: fn(&Connection, &Session, &str) -> ActionResult<TrashEntry>,
) -> Value {
    let mut route = None;
    let mut res = query(state, req, |ctx, params| {
        ctx.require(Permission::ManageTrash)?;
        let trash_id = id_param(params)?;
        let entry = apply(ctx.conn, ctx.session, &trash_id)?;
        let coll = entry.collection;
        ctx.audit(AuditEntry::new(
            action,
            coll,
            &entry.entity_id,
            format!("{} {} from trash", action.as_str(), coll.entity_type()),
        ));
        route = Some(coll.route());
        Ok(json!({
            "ok": true,
            "entityType": coll.entity_type(),
            "entityId": entry.entity_id,
        }))
    });
    if let Some(path) = route {
        res["revalidate"] = json!(path);
    }
    res
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "history.list" => Some(query(state, req, history_list)),
        "trash.list" => Some(query(state, req, trash_list)),
        "trash.restore" => Some(trash_mutation(state, req, ActionType::Restore, trash::restore)),
        "trash.purge" => Some(trash_mutation(state, req, ActionType::Purge, trash::purge)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_must_be_known() {
        assert_eq!(entity_type_param(&json!({})).unwrap(), None);
        assert_eq!(
            entity_type_param(&json!({ "entityType": "inventoryIssue" })).unwrap(),
            Some("inventoryIssue".to_string())
        );
        assert_eq!(
            entity_type_param(&json!({ "entityType": "attendance" })).unwrap(),
            Some("attendance".to_string())
        );
        let e = entity_type_param(&json!({ "entityType": "spaceship" })).unwrap_err();
        assert_eq!(e.code(), "bad_params");
    }
}
