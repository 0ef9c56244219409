//! Request and response shapes of the session channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;
use crate::handle::SessionParams;
use crate::session::{SessionId, SessionInfo};
use crate::supervisor::Created;

/// Request to create a session.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequest {
    /// Caller-chosen ID; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub params: SessionParams,
}

/// A request from the renderer, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    Create(CreateRequest),
    Write {
        id: String,
        data: String,
    },
    Resize {
        id: String,
        cols: u16,
        rows: u16,
    },
    Interrupt {
        id: String,
    },
    Close {
        id: String,
    },
    List,
    /// One-shot backend action.
    Action {
        action: String,
        #[serde(default)]
        args: Value,
        #[serde(default, rename = "windowId")]
        window_id: Option<String>,
    },
}

impl Request {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Create(_) => "create",
            Request::Write { .. } => "write",
            Request::Resize { .. } => "resize",
            Request::Interrupt { .. } => "interrupt",
            Request::Close { .. } => "close",
            Request::List => "list",
            Request::Action { .. } => "action",
        }
    }
}

/// Reply to a request.
///
/// Expected failures are reported with `success: false` and never as
/// transport errors.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<SessionInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error: &SessionError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            code: Some(error.code().to_string()),
            ..Self::default()
        }
    }

    pub fn created(created: Created) -> Self {
        Self {
            success: true,
            session_id: Some(created.session_id),
            reused: Some(created.reused),
            warning: created.warning,
            ..Self::default()
        }
    }

    pub fn session(id: SessionId) -> Self {
        Self {
            session_id: Some(id),
            ..Self::ok()
        }
    }

    pub fn sessions(sessions: Vec<SessionInfo>) -> Self {
        Self {
            sessions: Some(sessions),
            ..Self::ok()
        }
    }

    /// Wrap a backend reply, carrying over its failure if it reports one.
    pub fn backend(reply: Value) -> Self {
        if reply.get("success") == Some(&Value::Bool(false)) {
            let error = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("backend request failed")
                .to_string();
            return Self {
                success: false,
                error: Some(error),
                code: Some("BACKEND_ERROR".to_string()),
                result: Some(reply),
                ..Self::default()
            };
        }
        Self {
            result: Some(reply),
            ..Self::ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_parse() {
        let request: Request = serde_json::from_value(json!({
            "type": "create",
            "id": "t1",
            "kind": "interactive-shell",
            "cols": 100,
            "rows": 30
        }))
        .unwrap();
        let Request::Create(create) = request else {
            panic!("expected create");
        };
        assert_eq!(create.id.as_deref(), Some("t1"));
        let SessionParams::InteractiveShell(shell) = create.params else {
            panic!("expected shell params");
        };
        assert_eq!(shell.cols, Some(100));
    }

    #[test]
    fn test_other_requests_parse() {
        let write: Request =
            serde_json::from_value(json!({"type": "write", "id": "t1", "data": "ls\n"})).unwrap();
        assert_eq!(write.name(), "write");

        let list: Request = serde_json::from_value(json!({"type": "list"})).unwrap();
        assert!(matches!(list, Request::List));

        let action: Request = serde_json::from_value(json!({
            "type": "action",
            "action": "open_pane",
            "windowId": "w2"
        }))
        .unwrap();
        let Request::Action { window_id, args, .. } = action else {
            panic!("expected action");
        };
        assert_eq!(window_id.as_deref(), Some("w2"));
        assert!(args.is_null());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_value::<Request>(json!({"type": "explode"})).is_err());
        assert!(serde_json::from_value::<Request>(json!({"type": "resize", "id": "t1"})).is_err());
    }

    #[test]
    fn test_failure_shape() {
        let response = Response::failure(&SessionError::NotFound("t9".into()));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "success": false,
                "error": "session 't9' not found",
                "code": "SESSION_NOT_FOUND"
            })
        );
    }

    #[test]
    fn test_backend_failure_carried() {
        let response = Response::backend(json!({"success": false, "error": "HTTP 500: boom"}));
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("HTTP 500: boom"));
        assert_eq!(response.code.as_deref(), Some("BACKEND_ERROR"));

        let response = Response::backend(json!({"panes": 3}));
        assert!(response.success);
        assert_eq!(response.result, Some(json!({"panes": 3})));
    }
}
