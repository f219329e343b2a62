use serde_json::json;

/// Failure of a single action, carrying the wire code the caller switches on.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("select a workspace first")]
    NoWorkspace,
    #[error("no active session")]
    Unauthenticated,
    #[error("missing permission: {0}")]
    Forbidden(&'static str),
    #[error("{message}")]
    BadParams {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{entity} not found")]
    NotFound {
        entity: &'static str,
        details: Option<serde_json::Value>,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("insufficient quantity: requested {requested}, available {available}")]
    InsufficientQuantity { requested: i64, available: i64 },
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    /// A storage failure whose original error could not be kept, e.g. one
    /// shared by several rows of a bulk result.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ActionError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::BadParams {
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::BadParams {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found_id(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            details: Some(json!({ "id": id })),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NoWorkspace => "no_workspace",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::BadParams { .. } => "bad_params",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InsufficientQuantity { .. } => "insufficient_quantity",
            Self::Db(_) | Self::Storage(_) => "db_error",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::BadParams { details, .. } | Self::NotFound { details, .. } => details.clone(),
            Self::Forbidden(permission) => Some(json!({ "permission": permission })),
            Self::InsufficientQuantity {
                requested,
                available,
            } => Some(json!({ "requested": requested, "available": available })),
            _ => None,
        }
    }

    /// The `{code, message}` object used on the wire and in partial-success lists.
    pub fn to_json(&self) -> serde_json::Value {
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(d) = self.details() {
            error["details"] = d;
        }
        error
    }

    pub fn response(&self, id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "ok": false,
            "error": self.to_json(),
        })
    }
}

pub type ActionResult<T> = Result<T, ActionError>;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// Success envelope for mutations: carries the route path whose cached view
/// is now stale.
pub fn ok_revalidate(id: &str, result: serde_json::Value, path: &str) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result,
        "revalidate": path
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}
