use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, now_rfc3339, Collection};
use crate::ipc::error::{ActionError, ActionResult};
use crate::ipc::helpers::{
    id_param, mutate, optional_date, query, required_f64_min, required_month, today, Ctx, Patch,
};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use rusqlite::OptionalExtension;
use serde_json::{json, Value};

const COLL: Collection = Collection::SalaryPayment;

fn salary_list(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let mut filters = Vec::new();
    if params.get("month").is_some_and(|v| !v.is_null()) {
        filters.push(("month", SqlValue::Text(required_month(params.get("month"), "month")?)));
    }
    let payments =
        collection::list_live(ctx.conn, ctx.school(), COLL, &filters, "month DESC, employee_id")?;
    Ok(json!({ "payments": payments }))
}

fn salary_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let payment = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "payment": payment }))
}

/// One pending payment per live, active employee for `month`. Employees who
/// already have a live payment that month are skipped, so running it twice
/// creates nothing new.
fn salary_generate(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageSalary)?;
    let month = required_month(params.get("month"), "month")?;

    let tx = ctx.conn.unchecked_transaction()?;
    let due: Vec<(String, f64)> = {
        let mut stmt = tx.prepare(
            "SELECT e.id, e.salary FROM employees e
             WHERE e.school_id = ? AND e.del_flag = 0 AND e.active = 1
               AND NOT EXISTS (
                 SELECT 1 FROM salary_payments p
                 WHERE p.school_id = e.school_id AND p.employee_id = e.id
                   AND p.month = ? AND p.del_flag = 0
               )
             ORDER BY e.last_name, e.first_name",
        )?;
        let rows = stmt
            .query_map((ctx.school(), &month), |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let active: i64 = tx.query_row(
        "SELECT COUNT(*) FROM employees WHERE school_id = ? AND del_flag = 0 AND active = 1",
        [ctx.school()],
        |r| r.get(0),
    )?;

    let mut created = Vec::with_capacity(due.len());
    for (employee_id, amount) in due {
        let id = collection::insert(
            &tx,
            ctx.session,
            COLL,
            vec![
                ("employee_id", SqlValue::Text(employee_id)),
                ("month", SqlValue::Text(month.clone())),
                ("amount", SqlValue::Real(amount)),
                ("status", SqlValue::Text("pending".into())),
            ],
        )?;
        created.push(id);
    }
    tx.commit()?;

    let skipped = active - created.len() as i64;
    for id in &created {
        ctx.audit(AuditEntry::new(
            ActionType::Generate,
            COLL,
            id,
            format!("generated salary for {}", month),
        ));
    }
    Ok(json!({ "month": month, "created": created, "skipped": skipped }))
}

fn salary_pay(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageSalary)?;
    let id = id_param(params)?;
    let paid_on = optional_date(params.get("paidOn"), "paidOn")?.unwrap_or_else(today);

    let changed = ctx.conn.execute(
        "UPDATE salary_payments
         SET status = 'paid', paid_on = ?, modified_by = ?, mod_flag = 1, action_type = 'pay', updated_at = ?
         WHERE id = ? AND school_id = ? AND del_flag = 0 AND status = 'pending'",
        (&paid_on, &ctx.session.user_id, now_rfc3339(), &id, ctx.school()),
    )?;
    if changed == 0 {
        collection::require_live(ctx.conn, ctx.school(), COLL, &id)?;
        return Err(ActionError::Conflict("salary already paid".into()));
    }
    ctx.audit(AuditEntry::new(
        ActionType::Pay,
        COLL,
        &id,
        format!("paid salary on {}", paid_on),
    ));
    let payment = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "payment": payment }))
}

fn salary_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageSalary)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(params, &["amount"])?;
    let status: Option<String> = ctx
        .conn
        .query_row(
            "SELECT status FROM salary_payments WHERE id = ? AND school_id = ? AND del_flag = 0",
            (&id, ctx.school()),
            |r| r.get(0),
        )
        .optional()?;
    match status.as_deref() {
        None => return Err(ActionError::not_found_id(COLL.entity_type(), &id)),
        Some("pending") => {}
        Some(_) => return Err(ActionError::Conflict("paid salary cannot be changed".into())),
    }

    let mut fields = Vec::new();
    if patch.has("amount") {
        let amount = required_f64_min(patch.get("amount"), "amount", 0.0)?;
        fields.push(("amount", SqlValue::Real(amount)));
    }
    collection::update(ctx.conn, ctx.session, COLL, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, COLL, &id, "adjusted salary"));
    let payment = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "payment": payment }))
}

fn salary_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageSalary)?;
    let id = id_param(params)?;
    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, COLL, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, COLL, &id, "deleted salary payment"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = COLL.route();
    match req.method.as_str() {
        "salary.list" => Some(query(state, req, salary_list)),
        "salary.get" => Some(query(state, req, salary_get)),
        "salary.generate" => Some(mutate(state, req, route, salary_generate)),
        "salary.pay" => Some(mutate(state, req, route, salary_pay)),
        "salary.update" => Some(mutate(state, req, route, salary_update)),
        "salary.delete" => Some(mutate(state, req, route, salary_delete)),
        _ => None,
    }
}
