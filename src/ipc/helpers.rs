use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

use crate::audit::{self, AuditEntry, DisabledAudit, SqliteAudit};
use crate::ipc::error::{ok, ok_revalidate, ActionError, ActionResult};
use crate::ipc::types::{AppState, Request};
use crate::permissions::Permission;
use crate::session::Session;

/// Everything an entity action needs: the store, the caller, and where
/// history goes.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub session: &'a Session,
    audit_enabled: bool,
}

impl<'a> Ctx<'a> {
    pub fn school(&self) -> &str {
        &self.session.school_id
    }

    pub fn require(&self, permission: Permission) -> ActionResult<()> {
        self.session.require(self.conn, permission)
    }

    pub fn audit(&self, entry: AuditEntry) {
        if self.audit_enabled {
            audit::record(&SqliteAudit { conn: self.conn }, self.session, entry);
        } else {
            audit::record(&DisabledAudit, self.session, entry);
        }
    }
}

fn with_ctx(
    state: &AppState,
    f: impl FnOnce(&Ctx) -> ActionResult<Value>,
) -> ActionResult<Value> {
    let conn = state.db.as_ref().ok_or(ActionError::NoWorkspace)?;
    let session = state.session.as_ref().ok_or(ActionError::Unauthenticated)?;
    let ctx = Ctx {
        conn,
        session,
        audit_enabled: state.config.audit_enabled,
    };
    f(&ctx)
}

fn fail(req: &Request, e: ActionError) -> Value {
    tracing::warn!(method = %req.method, code = e.code(), error = %e, "action failed");
    e.response(&req.id)
}

/// Run a read action.
pub fn query(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Ctx, &Value) -> ActionResult<Value>,
) -> Value {
    match with_ctx(state, |ctx| f(ctx, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(e) => fail(req, e),
    }
}

/// Run a mutating action; success invalidates `route`.
pub fn mutate(
    state: &AppState,
    req: &Request,
    route: &'static str,
    f: impl FnOnce(&Ctx, &Value) -> ActionResult<Value>,
) -> Value {
    match with_ctx(state, |ctx| f(ctx, &req.params)) {
        Ok(result) => ok_revalidate(&req.id, result, route),
        Err(e) => fail(req, e),
    }
}

/// Run a plain action that manages its own preconditions.
pub fn respond(req: &Request, res: ActionResult<Value>) -> Value {
    match res {
        Ok(result) => ok(&req.id, result),
        Err(e) => fail(req, e),
    }
}

/// A partial update: `params.patch` restricted to a known set of keys.
pub struct Patch<'a> {
    obj: &'a Map<String, Value>,
}

impl<'a> Patch<'a> {
    pub fn from_params(params: &'a Value, allowed: &[&str]) -> ActionResult<Self> {
        let obj = params
            .get("patch")
            .and_then(|v| v.as_object())
            .ok_or_else(|| ActionError::bad_params("missing patch"))?;
        if let Some(unknown) = obj.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(ActionError::bad_params_with(
                "unknown patch field",
                json!({ "field": unknown, "allowed": allowed }),
            ));
        }
        Ok(Self { obj })
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.obj.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.obj.contains_key(key)
    }
}

pub fn required_str(v: Option<&Value>, key: &str) -> ActionResult<String> {
    match v {
        None | Some(Value::Null) => Err(ActionError::bad_params(format!("missing {}", key))),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                Err(ActionError::bad_params(format!("{} must not be empty", key)))
            } else {
                Ok(t.to_string())
            }
        }
        Some(_) => Err(ActionError::bad_params(format!("{} must be a string", key))),
    }
}

/// Missing, null and blank all read as None.
pub fn optional_str(v: Option<&Value>, key: &str) -> ActionResult<Option<String>> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let t = s.trim();
            Ok((!t.is_empty()).then(|| t.to_string()))
        }
        Some(_) => Err(ActionError::bad_params(format!("{} must be a string", key))),
    }
}

pub fn parse_date(raw: &str, key: &str) -> ActionResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ActionError::bad_params_with(
            format!("{} must be YYYY-MM-DD", key),
            json!({ key: raw }),
        )
    })
}

pub fn required_date(v: Option<&Value>, key: &str) -> ActionResult<String> {
    let raw = required_str(v, key)?;
    Ok(parse_date(&raw, key)?.format("%Y-%m-%d").to_string())
}

pub fn optional_date(v: Option<&Value>, key: &str) -> ActionResult<Option<String>> {
    optional_str(v, key)?
        .map(|raw| parse_date(&raw, key).map(|d| d.format("%Y-%m-%d").to_string()))
        .transpose()
}

/// `YYYY-MM`, normalized to two-digit month.
pub fn required_month(v: Option<&Value>, key: &str) -> ActionResult<String> {
    let raw = required_str(v, key)?;
    let bad = || ActionError::bad_params_with(format!("{} must be YYYY-MM", key), json!({ key: raw }));
    let (y, m) = raw.split_once('-').ok_or_else(bad)?;
    let year = y.parse::<i32>().map_err(|_| bad())?;
    let month = m.parse::<u32>().map_err(|_| bad())?;
    if !(1..=12).contains(&month) || !(1900..=9999).contains(&year) {
        return Err(bad());
    }
    Ok(format!("{:04}-{:02}", year, month))
}

pub fn optional_f64_min(v: Option<&Value>, key: &str, min: f64) -> ActionResult<Option<f64>> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(n) => {
            let f = n
                .as_f64()
                .ok_or_else(|| ActionError::bad_params(format!("{} must be a number", key)))?;
            if !f.is_finite() || f < min {
                return Err(ActionError::bad_params_with(
                    format!("{} must be >= {}", key, min),
                    json!({ key: f }),
                ));
            }
            Ok(Some(f))
        }
    }
}

/// A number that may be omitted from a create but, once named in a patch,
/// must not be `null`.
pub fn required_f64_min(v: Option<&Value>, key: &str, min: f64) -> ActionResult<f64> {
    optional_f64_min(v, key, min)?
        .ok_or_else(|| ActionError::bad_params(format!("{} must not be null", key)))
}

pub fn required_positive_i64(v: Option<&Value>, key: &str) -> ActionResult<i64> {
    let n = v
        .and_then(|n| n.as_i64())
        .ok_or_else(|| ActionError::bad_params(format!("{} must be an integer", key)))?;
    if n <= 0 {
        return Err(ActionError::bad_params_with(
            format!("{} must be > 0", key),
            json!({ key: n }),
        ));
    }
    Ok(n)
}

pub fn optional_i64_min(v: Option<&Value>, key: &str, min: i64) -> ActionResult<Option<i64>> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(n) => {
            let i = n
                .as_i64()
                .ok_or_else(|| ActionError::bad_params(format!("{} must be an integer", key)))?;
            if i < min {
                return Err(ActionError::bad_params_with(
                    format!("{} must be >= {}", key, min),
                    json!({ key: i }),
                ));
            }
            Ok(Some(i))
        }
    }
}

pub fn required_i64_min(v: Option<&Value>, key: &str, min: i64) -> ActionResult<i64> {
    optional_i64_min(v, key, min)?
        .ok_or_else(|| ActionError::bad_params(format!("{} must not be null", key)))
}

pub fn optional_bool(v: Option<&Value>, key: &str) -> ActionResult<Option<bool>> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ActionError::bad_params(format!("{} must be boolean", key))),
    }
}

/// Today's date in UTC, as stored in date columns.
pub fn today() -> String {
    chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

pub fn text(v: Option<String>) -> SqlValue {
    v.map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

pub fn real(v: Option<f64>) -> SqlValue {
    v.map(SqlValue::Real).unwrap_or(SqlValue::Null)
}

pub fn flag(b: bool) -> SqlValue {
    SqlValue::Integer(i64::from(b))
}

pub fn id_param(params: &Value) -> ActionResult<String> {
    required_str(params.get("id"), "id")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_strings_are_missing() {
        assert!(required_str(Some(&json!("   ")), "name").is_err());
        assert_eq!(optional_str(Some(&json!("  ")), "x").unwrap(), None);
        assert_eq!(
            optional_str(Some(&json!(" 7A ")), "x").unwrap(),
            Some("7A".to_string())
        );
        assert!(optional_str(Some(&json!(3)), "x").is_err());
    }

    #[test]
    fn dates_and_months_are_validated() {
        assert_eq!(
            required_date(Some(&json!("2024-02-29")), "d").unwrap(),
            "2024-02-29"
        );
        assert!(required_date(Some(&json!("2023-02-29")), "d").is_err());
        assert_eq!(required_month(Some(&json!("2024-3")), "m").unwrap(), "2024-03");
        assert!(required_month(Some(&json!("2024-13")), "m").is_err());
        assert!(required_month(Some(&json!("March")), "m").is_err());
    }

    #[test]
    fn numbers_respect_bounds() {
        assert_eq!(
            optional_f64_min(Some(&json!(0)), "salary", 0.0).unwrap(),
            Some(0.0)
        );
        assert!(optional_f64_min(Some(&json!(-1.5)), "salary", 0.0).is_err());
        assert!(required_positive_i64(Some(&json!(0)), "quantity").is_err());
        assert!(required_positive_i64(Some(&json!(2.5)), "quantity").is_err());
        assert_eq!(required_positive_i64(Some(&json!(3)), "quantity").unwrap(), 3);
        assert_eq!(optional_i64_min(Some(&json!(0)), "quantity", 0).unwrap(), Some(0));
        assert!(optional_i64_min(Some(&json!(-2)), "quantity", 0).is_err());
    }

    #[test]
    fn patched_numbers_reject_null() {
        let e = required_f64_min(Some(&Value::Null), "salary", 0.0).unwrap_err();
        assert_eq!(e.code(), "bad_params");
        assert_eq!(required_f64_min(Some(&json!(12.5)), "salary", 0.0).unwrap(), 12.5);
        assert!(required_i64_min(Some(&Value::Null), "quantity", 0).is_err());
        assert!(required_i64_min(None, "quantity", 0).is_err());
        assert_eq!(required_i64_min(Some(&json!(4)), "quantity", 0).unwrap(), 4);
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let params = json!({ "patch": { "name": "x", "schoolId": "evil" } });
        let e = Patch::from_params(&params, &["name"]).err().unwrap();
        assert_eq!(e.code(), "bad_params");
        let params = json!({ "patch": { "name": "x" } });
        let p = Patch::from_params(&params, &["name", "section"]).unwrap();
        assert!(p.has("name"));
        assert!(!p.has("section"));
    }
}
