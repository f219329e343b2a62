use crate::audit::{ActionType, AuditEntry};
use crate::collection::{self, Collection};
use crate::ipc::error::ActionResult;
use crate::ipc::helpers::{
    flag, id_param, mutate, optional_bool, optional_date, optional_f64_min, optional_str, query,
    required_f64_min, required_str, text, Ctx, Patch,
};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use crate::trash;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

const COLL: Collection = Collection::Employee;

const PATCHABLE: [&str; 9] = [
    "firstName",
    "lastName",
    "email",
    "phone",
    "departmentId",
    "designation",
    "salary",
    "joinedOn",
    "active",
];

fn check_department(ctx: &Ctx, department_id: &Option<String>) -> ActionResult<()> {
    match department_id {
        Some(id) => collection::require_live(ctx.conn, ctx.school(), Collection::Department, id),
        None => Ok(()),
    }
}

fn employees_list(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let mut filters = Vec::new();
    if let Some(dep) = optional_str(params.get("departmentId"), "departmentId")? {
        filters.push(("department_id", SqlValue::Text(dep)));
    }
    let employees =
        collection::list_live(ctx.conn, ctx.school(), COLL, &filters, "last_name, first_name")?;
    Ok(json!({ "employees": employees }))
}

fn employees_get(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    let id = id_param(params)?;
    let employee = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "employee": employee }))
}

fn employees_create(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageEmployees)?;
    let first = required_str(params.get("firstName"), "firstName")?;
    let last = required_str(params.get("lastName"), "lastName")?;
    let email = optional_str(params.get("email"), "email")?.map(|e| e.to_ascii_lowercase());
    let phone = optional_str(params.get("phone"), "phone")?;
    let department = optional_str(params.get("departmentId"), "departmentId")?;
    let designation = optional_str(params.get("designation"), "designation")?;
    let salary = optional_f64_min(params.get("salary"), "salary", 0.0)?.unwrap_or(0.0);
    let joined_on = optional_date(params.get("joinedOn"), "joinedOn")?;
    let active = optional_bool(params.get("active"), "active")?.unwrap_or(true);

    collection::ensure_unique(ctx.conn, ctx.school(), COLL, &[text(email.clone())], None)?;
    check_department(ctx, &department)?;

    let id = collection::insert(
        ctx.conn,
        ctx.session,
        COLL,
        vec![
            ("first_name", SqlValue::Text(first.clone())),
            ("last_name", SqlValue::Text(last.clone())),
            ("email", text(email)),
            ("phone", text(phone)),
            ("department_id", text(department)),
            ("designation", text(designation)),
            ("salary", SqlValue::Real(salary)),
            ("joined_on", text(joined_on)),
            ("active", flag(active)),
        ],
    )?;
    ctx.audit(AuditEntry::new(
        ActionType::Create,
        COLL,
        &id,
        format!("added employee {}, {}", last, first),
    ));
    Ok(json!({ "employeeId": id }))
}

fn employees_update(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageEmployees)?;
    let id = id_param(params)?;
    let patch = Patch::from_params(params, &PATCHABLE)?;
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
        let email = optional_str(patch.get("email"), "email")?.map(|e| e.to_ascii_lowercase());
        collection::ensure_unique(ctx.conn, ctx.school(), COLL, &[text(email.clone())], Some(&id))?;
        fields.push(("email", text(email)));
    }
    if patch.has("phone") {
        fields.push(("phone", text(optional_str(patch.get("phone"), "phone")?)));
    }
    if patch.has("departmentId") {
        let department = optional_str(patch.get("departmentId"), "departmentId")?;
        check_department(ctx, &department)?;
        fields.push(("department_id", text(department)));
    }
    if patch.has("designation") {
        fields.push((
            "designation",
            text(optional_str(patch.get("designation"), "designation")?),
        ));
    }
    if patch.has("salary") {
        let salary = required_f64_min(patch.get("salary"), "salary", 0.0)?;
        fields.push(("salary", SqlValue::Real(salary)));
    }
    if patch.has("joinedOn") {
        fields.push(("joined_on", text(optional_date(patch.get("joinedOn"), "joinedOn")?)));
    }
    if let Some(active) = optional_bool(patch.get("active"), "active")? {
        fields.push(("active", flag(active)));
    }

    collection::update(ctx.conn, ctx.session, COLL, &id, fields)?;
    ctx.audit(AuditEntry::new(ActionType::Update, COLL, &id, "updated employee"));
    let employee = collection::get_live(ctx.conn, ctx.school(), COLL, &id)?;
    Ok(json!({ "employee": employee }))
}

fn employees_delete(ctx: &Ctx, params: &Value) -> ActionResult<Value> {
    ctx.require(Permission::ManageEmployees)?;
    let id = id_param(params)?;
    let trash_id = trash::move_to_trash(ctx.conn, ctx.session, COLL, &id)?;
    ctx.audit(AuditEntry::new(ActionType::Delete, COLL, &id, "deleted employee"));
    Ok(json!({ "ok": true, "trashId": trash_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let route = COLL.route();
    match req.method.as_str() {
        "employees.list" => Some(query(state, req, employees_list)),
        "employees.get" => Some(query(state, req, employees_get)),
        "employees.create" => Some(mutate(state, req, route, employees_create)),
        "employees.update" => Some(mutate(state, req, route, employees_update)),
        "employees.delete" => Some(mutate(state, req, route, employees_delete)),
        _ => None,
    }
}
