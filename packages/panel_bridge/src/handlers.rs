use axum::{
    Json,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fence_stream::Selection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::AppState;
use crate::panel;
use crate::workspace::WorkspaceError;

/// Health check
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Upgrade to a panel session
pub async fn panel_ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| panel::handle_panel_ws(socket, state))
}

#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    pub chunk: String,
}

#[derive(Debug, Serialize)]
pub struct StreamEmitted {
    pub emitted: String,
}

/// Feed model output into the active document
pub async fn push_stream_handler(
    State(state): State<AppState>,
    Json(body): Json<StreamChunk>,
) -> Json<StreamEmitted> {
    let emitted = state.workspace.lock().await.push_chunk(&body.chunk);
    Json(StreamEmitted { emitted })
}

pub async fn close_stream_handler(State(state): State<AppState>) -> StatusCode {
    state.workspace.lock().await.close_stream();
    StatusCode::NO_CONTENT
}

/// Move the editor selection; non-empty selections are pushed to every panel
pub async fn set_selection_handler(
    State(state): State<AppState>,
    Json(selection): Json<Selection>,
) -> StatusCode {
    let highlighted = state.workspace.lock().await.set_selection(selection);
    if let Some(code) = highlighted {
        for message in code.into_messages() {
            // No panel connected is fine
            if state.notices.send(message).is_err() {
                debug!("no panel listening for selection changes");
                break;
            }
        }
    }
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub path: Option<String>,
    pub text: String,
}

pub async fn get_document_handler(State(state): State<AppState>) -> Response {
    let ws = state.workspace.lock().await;
    Json(DocumentResponse {
        path: ws.active_path().map(|p| p.display().to_string()),
        text: ws.document_text(),
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    pub path: String,
}

/// Load a file as the active document
pub async fn open_document_handler(
    State(state): State<AppState>,
    Json(body): Json<OpenRequest>,
) -> Response {
    if body.path.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "empty_path" })),
        )
            .into_response();
    }

    let mut ws = state.workspace.lock().await;
    match ws.open_file(&body.path).await {
        Ok(path) => Json(DocumentResponse {
            path: Some(path.display().to_string()),
            text: ws.document_text(),
        })
        .into_response(),
        Err(e) => {
            let status = match e {
                WorkspaceError::NotFound(_) => StatusCode::NOT_FOUND,
                WorkspaceError::Read { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(serde_json::json!({ "error": e.error_code(), "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UiOutbound;
    use crate::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = crate::build_router(test_state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn stream_then_read_document() {
        let state = test_state();
        let app = crate::build_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/stream",
                serde_json::json!({"chunk": "Sure:\n```py\nprint(1)\n```"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["emitted"], "print(1)\n");

        let response = app
            .clone()
            .oneshot(Request::get("/api/document").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let doc = body_json(response).await;
        assert_eq!(doc["text"], "print(1)\n");
        assert!(doc["path"].is_null());

        let response = app
            .oneshot(
                Request::post("/api/stream/close")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn selection_is_broadcast() {
        let state = test_state();
        let mut notices = state.notices.subscribe();
        state.workspace.lock().await.push_chunk("```\nhello\n```");
        let app = crate::build_router(state);

        let response = app
            .oneshot(post_json(
                "/api/selection",
                serde_json::json!({
                    "anchor": {"line": 0, "character": 0},
                    "active": {"line": 0, "character": 5},
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        assert!(matches!(
            notices.try_recv().unwrap(),
            UiOutbound::HighlightedCode { .. }
        ));
        assert!(matches!(
            notices.try_recv().unwrap(),
            UiOutbound::WorkspacePath { .. }
        ));
    }

    #[tokio::test]
    async fn empty_selection_is_not_broadcast() {
        let state = test_state();
        let mut notices = state.notices.subscribe();
        let app = crate::build_router(state);

        let response = app
            .oneshot(post_json(
                "/api/selection",
                serde_json::json!({
                    "anchor": {"line": 0, "character": 0},
                    "active": {"line": 0, "character": 0},
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn open_document_by_path() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.rs"), "fn a() {}").unwrap();
        let state = test_state();
        let app = crate::build_router(state);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/document/open",
                serde_json::json!({"path": tmp.path().join("a.rs")}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["text"], "fn a() {}");

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/document/open",
                serde_json::json!({"path": tmp.path().join("missing.rs")}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "not_found");

        let response = app
            .oneshot(post_json("/api/document/open", serde_json::json!({"path": " "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_chunk_is_rejected() {
        let app = crate::build_router(test_state());
        let response = app
            .oneshot(post_json("/api/stream", serde_json::json!({"text": 1})))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
