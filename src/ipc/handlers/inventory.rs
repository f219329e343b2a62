use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, now_rfc3339, Collection};
use crate::ipc::error::{ActionError, ActionResult};
use crate::ipc::helpers::{
    id_param, mutate, optional_date, optional_f64_min, optional_i64_min, optional_str, query,
    required_f64_min, required_i64_min, required_positive_i64, required_str, text, today, Ctx,
    Patch,
};
use crate::ipc::types::{AppState, Request};
use crate::party::{self, PartyRole};
use crate::permissions::Permission;
use crate::stock;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use rusqlite::OptionalExtension;
use serde_json::{json, Value};

const PRODUCTS: Collection = Collection::InventoryProduct;
const ISSUES: Collection = Collection::InventoryIssue;
const SALES: Collection = Collection::InventorySale;

fn product_filter(params: &Value) -> ActionResult<Vec<(&'static str, SqlValue)>> {
    let mut filters = Vec::new();
    if let Some(product_id) = optional_str(params.get("productId"), "productId")? {
        filters.push(("product_id", SqlValue::Text(product_id)));
    }
    Ok(filters)
}

fn products_list(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let mut filters = Vec::new();
    if let Some(category) = optional_str(params.get("category"), "category")? {
        filters.push(("category", SqlValue::Text(category)));
    }
    let products = collection::list_live(ctx.conn, ctx.school(), PRODUCTS, &filters, "name")?;
    Ok(json!({ "products": products }))
}

fn products_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let product = collection::get_live(ctx.conn, ctx.school(), PRODUCTS, &id)?;
    Ok(json!({ "product": product }))
}

fn products_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageInventory)?;
    let name = required_str(params.get("name"), "name")?;
    let category = optional_str(params.get("category"), "category")?;
    let quantity = optional_i64_min(params.get("quantity"), "quantity", 0)?.unwrap_or(0);
    let unit_price = optional_f64_min(params.get("unitPrice"), "unitPrice", 0.0)?.unwrap_or(0.0);

    collection::ensure_unique(
        ctx.conn,
        ctx.school(),
        PRODUCTS,
        &[SqlValue::Text(name.clone())],
        None,
    )?;
    let id = collection::insert(
        ctx.conn,
        ctx.session,
        PRODUCTS,
        vec![
            ("name", SqlValue::Text(name.clone())),
            ("category", text(category)),
            ("quantity", SqlValue::Integer(quantity)),
            ("unit_price", SqlValue::Real(unit_price)),
        ],
    )?;
    ctx.audit(AuditEntry::new(
        ActionType::Create,
        PRODUCTS,
        &id,
        format!("added product {} ({} in stock)", name, quantity),
    ));
    Ok(json!({ "productId": id }))
}

fn products_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageInventory)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(params, &["name", "category", "quantity", "unitPrice"])?;
    collection::require_live(ctx.conn, ctx.school(), PRODUCTS, &id)?;

    let mut fields = Vec::new();
    if patch.has("name") {
        let name = required_str(patch.get("name"), "name")?;
        collection::ensure_unique(
            ctx.conn,
            ctx.school(),
            PRODUCTS,
            &[SqlValue::Text(name.clone())],
            Some(&id),
        )?;
        fields.push(("name", SqlValue::Text(name)));
    }
    if patch.has("category") {
        fields.push(("category", text(optional_str(patch.get("category"), "category")?)));
    }
    if patch.has("quantity") {
        let quantity = required_i64_min(patch.get("quantity"), "quantity", 0)?;
        fields.push(("quantity", SqlValue::Integer(quantity)));
    }
    if patch.has("unitPrice") {
        let price = required_f64_min(patch.get("unitPrice"), "unitPrice", 0.0)?;
        fields.push(("unit_price", SqlValue::Real(price)));
    }

    collection::update(ctx.conn, ctx.session, PRODUCTS, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, PRODUCTS, &id, "updated product"));
    let product = collection::get_live(ctx.conn, ctx.school(), PRODUCTS, &id)?;
    Ok(json!({ "product": product }))
}

fn products_restock(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageInventory)?;
    let id = id_param(params)?;
    let quantity = required_positive_i64(params.get("quantity"), "quantity")?;
    collection::require_live(ctx.conn, ctx.school(), PRODUCTS, &id)?;
    let on_hand = stock::credit(ctx.conn, ctx.school(), &id, quantity)?;
    ctx.audit(AuditEntry::new(
        ActionType::Restock,
        PRODUCTS,
        &id,
        format!("restocked {} units", quantity),
    ));
    Ok(json!({ "productId": id, "quantity": on_hand }))
}

fn products_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageInventory)?;
    let id = id_param(params)?;
    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, PRODUCTS, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, PRODUCTS, &id, "deleted product"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

fn issues_list(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let filters = product_filter(params)?;
    let mut issues =
        collection::list_live(ctx.conn, ctx.school(), ISSUES, &filters, "issued_on DESC")?;
    party::attach_all(ctx.conn, ctx.school(), &mut issues, "issueToId", "issueTo");
    Ok(json!({ "issues": issues }))
}

fn issues_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let mut issue = collection::get_live(ctx.conn, ctx.school(), ISSUES, &id)?;
    party::attach_all(
        ctx.conn,
        ctx.school(),
        std::slice::from_mut(&mut issue),
        "issueToId",
        "issueTo",
    );
    Ok(json!({ "issue": issue }))
}

fn issues_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::IssueInventory)?;
    let product_id = required_str(params.get("productId"), "productId")?;
    let quantity = required_positive_i64(params.get("quantity"), "quantity")?;
    let role = PartyRole::parse(&required_str(params.get("role"), "role")?)?;
    let issue_to = required_str(params.get("issueToId"), "issueToId")?;
    let issued_on = optional_date(params.get("issuedOn"), "issuedOn")?.unwrap_or_else(today);
    let note = optional_str(params.get("note"), "note")?;

    let recipient = party::resolve(ctx.conn, ctx.school(), role, &issue_to)?;

    let tx = ctx.conn.unchecked_transaction()?;
    let remaining = stock::deduct(&tx, ctx.school(), &product_id, quantity)?;
    let id = collection::insert(
        &tx,
        ctx.session,
        ISSUES,
        vec![
            ("product_id", SqlValue::Text(product_id)),
            ("quantity", SqlValue::Integer(quantity)),
            ("role", SqlValue::Text(role.as_str().into())),
            ("issue_to_id", SqlValue::Text(issue_to)),
            ("issued_on", SqlValue::Text(issued_on)),
            ("note", text(note)),
        ],
    )?;
    tx.commit()?;

    ctx.audit(AuditEntry::new(
        ActionType::Issue,
        ISSUES,
        &id,
        format!("issued {} units to {}", quantity, recipient.display_name),
    ));
    Ok(json!({
        "issueId": id,
        "remaining": remaining,
        "issueTo": recipient.to_json(),
    }))
}

fn issues_return(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::IssueInventory)?;
    let id = id_param(params)?;
    let returned_on = optional_date(params.get("returnedOn"), "returnedOn")?.unwrap_or_else(today);

    let tx = ctx.conn.unchecked_transaction()?;
    let issue: Option<(String, i64, Option<String>)> = tx
        .query_row(
            "SELECT product_id, quantity, returned_on FROM inventory_issues
             WHERE id = ? AND school_id = ? AND del_flag = 0",
            (&id, ctx.school()),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let (product_id, quantity, _) = match issue {
        None => return Err(ActionError::not_found_id(ISSUES.entity_type(), &id)),
        Some((_, _, Some(on))) => {
            return Err(ActionError::Conflict(format!("issue already returned on {}", on)))
        }
        Some(row) => row,
    };

    // Guarded on returned_on so a concurrent return cannot credit twice.
    let changed = tx.execute(
        "UPDATE inventory_issues
         SET returned_on = ?, modified_by = ?, mod_flag = 1, action_type = 'return', updated_at = ?
         WHERE id = ? AND school_id = ? AND del_flag = 0 AND returned_on IS NULL",
        (
            &returned_on,
            &ctx.session.user_id,
            now_rfc3339(),
            &id,
            ctx.school(),
        ),
    )?;
    if changed == 0 {
        return Err(ActionError::Conflict("issue already returned".into()));
    }
    let on_hand = stock::credit(&tx, ctx.school(), &product_id, quantity)?;
    tx.commit()?;

    ctx.audit(AuditEntry::new(
        ActionType::Return,
        ISSUES,
        &id,
        format!("returned {} units", quantity),
    ));
    Ok(json!({ "issueId": id, "returnedOn": returned_on, "quantity": on_hand }))
}

fn issues_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::IssueInventory)?;
    let id = id_param(params)?;

    let tx = ctx.conn.unchecked_transaction()?;
    let open: Option<(String, i64)> = tx
        .query_row(
            "SELECT product_id, quantity FROM inventory_issues
             WHERE id = ? AND school_id = ? AND del_flag = 0 AND returned_on IS NULL",
            (&id, ctx.school()),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let trash_id = trash::trash_row(&tx, ctx.session, ISSUES, &id)?;
    if let Some((product_id, quantity)) = &open {
        stock::credit(&tx, ctx.school(), product_id, *quantity)?;
    }
    tx.commit()?;

    ctx.audit(AuditEntry::new(ActionType::Delete, ISSUES, &id, "deleted issue"));
    Ok(json!({
        "ok": true,
        "trashId": trash_id,
        "restocked": open.map(|(_, q)| q).unwrap_or(0),
    }))
}

fn sales_list(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let filters = product_filter(params)?;
    let mut sales = collection::list_live(ctx.conn, ctx.school(), SALES, &filters, "sold_on DESC")?;
    party::attach_all(ctx.conn, ctx.school(), &mut sales, "saleToId", "saleTo");
    Ok(json!({ "sales": sales }))
}

fn sales_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let mut sale = collection::get_live(ctx.conn, ctx.school(), SALES, &id)?;
    party::attach_all(
        ctx.conn,
        ctx.school(),
        std::slice::from_mut(&mut sale),
        "saleToId",
        "saleTo",
    );
    Ok(json!({ "sale": sale }))
}

fn sales_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::SellInventory)?;
    let product_id = required_str(params.get("productId"), "productId")?;
    let quantity = required_positive_i64(params.get("quantity"), "quantity")?;
    let role = PartyRole::parse(&required_str(params.get("role"), "role")?)?;
    let sale_to = required_str(params.get("saleToId"), "saleToId")?;
    let unit_price = optional_f64_min(params.get("unitPrice"), "unitPrice", 0.0)?;
    let sold_on = optional_date(params.get("soldOn"), "soldOn")?.unwrap_or_else(today);

    let recipient = party::resolve(ctx.conn, ctx.school(), role, &sale_to)?;

    let tx = ctx.conn.unchecked_transaction()?;
    let listed: Option<f64> = tx
        .query_row(
            "SELECT unit_price FROM inventory_products WHERE id = ? AND school_id = ? AND del_flag = 0",
            (&product_id, ctx.school()),
            |r| r.get(0),
        )
        .optional()?;
    let listed = listed.ok_or_else(|| ActionError::not_found_id(PRODUCTS.entity_type(), &product_id))?;
    let unit_price = unit_price.unwrap_or(listed);
    let total = unit_price * quantity as f64;

    let remaining = stock::deduct(&tx, ctx.school(), &product_id, quantity)?;
    let id = collection::insert(
        &tx,
        ctx.session,
        SALES,
        vec![
            ("product_id", SqlValue::Text(product_id)),
            ("quantity", SqlValue::Integer(quantity)),
            ("unit_price", SqlValue::Real(unit_price)),
            ("total", SqlValue::Real(total)),
            ("role", SqlValue::Text(role.as_str().into())),
            ("sale_to_id", SqlValue::Text(sale_to)),
            ("sold_on", SqlValue::Text(sold_on)),
        ],
    )?;
    tx.commit()?;

    ctx.audit(AuditEntry::new(
        ActionType::Sale,
        SALES,
        &id,
        format!("sold {} units to {} for {:.2}", quantity, recipient.display_name, total),
    ));
    Ok(json!({
        "saleId": id,
        "unitPrice": unit_price,
        "total": total,
        "remaining": remaining,
        "saleTo": recipient.to_json(),
    }))
}

fn sales_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::SellInventory)?;
    let id = id_param(params)?;

    let tx = ctx.conn.unchecked_transaction()?;
    let sold: Option<(String, i64)> = tx
        .query_row(
            "SELECT product_id, quantity FROM inventory_sales
             WHERE id = ? AND school_id = ? AND del_flag = 0",
            (&id, ctx.school()),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (product_id, quantity) =
        sold.ok_or_else(|| ActionError::not_found_id(SALES.entity_type(), &id))?;
    let trash_id = trash::trash_row(&tx, ctx.session, SALES, &id)?;
    stock::credit(&tx, ctx.school(), &product_id, quantity)?;
    tx.commit()?;

    ctx.audit(AuditEntry::new(ActionType::Delete, SALES, &id, "deleted sale"));
    Ok(json!({ "ok": true, "trashId": trash_id, "restocked": quantity }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = PRODUCTS.route();
    match req.method.as_str() {
        "inventory.products.list" => Some(query(state, req, products_list)),
        "inventory.products.get" => Some(query(state, req, products_get)),
        "inventory.products.create" => Some(mutate(state, req, route, products_create)),
        "inventory.products.update" => Some(mutate(state, req, route, products_update)),
        "inventory.products.restock" => Some(mutate(state, req, route, products_restock)),
        "inventory.products.delete" => Some(mutate(state, req, route, products_delete)),
        "inventory.issues.list" => Some(query(state, req, issues_list)),
        "inventory.issues.get" => Some(query(state, req, issues_get)),
        "inventory.issues.create" => Some(mutate(state, req, route, issues_create)),
        "inventory.issues.return" => Some(mutate(state, req, route, issues_return)),
        "inventory.issues.delete" => Some(mutate(state, req, route, issues_delete)),
        "inventory.sales.list" => Some(query(state, req, sales_list)),
        "inventory.sales.get" => Some(query(state, req, sales_get)),
        "inventory.sales.create" => Some(mutate(state, req, route, sales_create)),
        "inventory.sales.delete" => Some(mutate(state, req, route, sales_delete)),
        _ => None,
    }
}
