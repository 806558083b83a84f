//! `HttpAssessmentClient` against an in-process backend.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use physio_core::{
    AssessmentApi, ChatAction, HttpAssessmentClient, QuestionAction, RemoteError, RomRange, SessionId,
    SessionProfile, Turn,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Seen = Arc<Mutex<Vec<(String, Value)>>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn backend(seen: Seen) -> Router {
    let create_seen = seen.clone();
    let chat_seen = seen.clone();
    let questionnaire_seen = seen.clone();
    let rom_seen = seen;
    Router::new()
        .route(
            "/assessments",
            post(move |Json(body): Json<Value>| async move {
                create_seen.lock().unwrap().push(("create".into(), body));
                Json(json!({ "success": true, "data": { "assessmentId": 41 } }))
            }),
        )
        .route(
            "/assessments/:id/chat",
            post(move |Path(id): Path<String>, Json(body): Json<Value>| async move {
                chat_seen.lock().unwrap().push((format!("chat:{}", id), body));
                Json(json!({
                    "success": true,
                    "data": { "response": "Please show me on camera", "action": "camera_on" }
                }))
            }),
        )
        .route(
            "/assessments/:id/questionnaires",
            post(move |Path(id): Path<String>, Json(body): Json<Value>| async move {
                questionnaire_seen
                    .lock()
                    .unwrap()
                    .push((format!("questionnaire:{}", id), body));
                Json(json!({
                    "success": true,
                    "data": {
                        "question": "How bad is the pain?",
                        "options": ["Mild", "Severe"],
                        "action": "none",
                        "timestamp": "2025-03-01T10:00:00Z"
                    }
                }))
            }),
        )
        .route(
            "/assessments/:id/rom",
            post(move |Path(id): Path<String>, Json(body): Json<Value>| async move {
                rom_seen.lock().unwrap().push((format!("rom:{}", id), body));
                Json(json!({ "success": true, "data": null }))
            }),
        )
        .route(
            "/assessments/:id/dashboard",
            get(|Path(id): Path<String>| async move {
                Json(json!({ "success": true, "data": { "assessmentId": id, "painScore": 6 } }))
            }),
        )
}

fn profile() -> SessionProfile {
    SessionProfile {
        subject_id: 1,
        anatomy_region_id: 3,
        assessment_kind: "PAIN".to_string(),
    }
}

#[tokio::test]
async fn test_full_backend_round() {
    let seen: Seen = Arc::default();
    let base = serve(backend(seen.clone())).await;
    let client = HttpAssessmentClient::new(format!("{}/", base), Duration::from_secs(5)).unwrap();

    let id = client.create_session(&profile()).await.unwrap();
    assert_eq!(id.as_str(), "41");

    let transcript = vec![Turn::exchange("Hello", "Hi there"), Turn::user("my knee")];
    let reply = client.chat_turn(&id, &transcript, None).await.unwrap();
    assert_eq!(reply.utterance, "Please show me on camera");
    assert_eq!(reply.action, ChatAction::CameraOn);

    client.chat_turn(&id, &transcript[..1], Some("dmlkZW8=")).await.unwrap();

    let question = client.questionnaire_turn(&id, &transcript).await.unwrap();
    assert_eq!(question.text, "How bad is the pain?");
    assert_eq!(question.match_option("severe"), Some("Severe"));
    assert_eq!(question.action, QuestionAction::None);
    assert_eq!(question.issued_at.to_rfc3339(), "2025-03-01T10:00:00+00:00");

    client.save_rom(&id, RomRange::new(12.0, 70.5)).await.unwrap();
    let dashboard = client.fetch_dashboard(&id).await.unwrap();
    assert_eq!(dashboard["painScore"], 6);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen[0],
        ("create".to_string(), json!({ "userId": 1, "anatomyId": 3, "assessmentType": "PAIN" }))
    );
    assert_eq!(seen[1].0, "chat:41");
    assert_eq!(
        seen[1].1,
        json!({ "chat_history": [
            { "user": "Hello", "response": "Hi there" },
            { "user": "my knee", "response": "" }
        ] })
    );
    assert_eq!(seen[2].1["video"], "dmlkZW8=");
    assert_eq!(seen[3].0, "questionnaire:41");
    assert_eq!(seen[3].1["chat_history"][0], json!({ "user": "Hello", "assistant": "Hi there" }));
    assert_eq!(
        seen[4],
        (
            "rom:41".to_string(),
            json!({ "rangeOfMotion": { "minimum": 12.0, "maximum": 70.5 } })
        )
    );
}

#[tokio::test]
async fn test_error_status_and_rejection() {
    let app = Router::new()
        .route(
            "/assessments",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database offline") }),
        )
        .route(
            "/assessments/:id/chat",
            post(|| async { Json(json!({ "success": false, "message": "assessment closed" })) }),
        )
        .route(
            "/assessments/:id/questionnaires",
            post(|| async { Json(json!({ "success": true, "data": {} })) }),
        );
    let base = serve(app).await;
    let client = HttpAssessmentClient::new(base, Duration::from_secs(5)).unwrap();

    match client.create_session(&profile()).await {
        Err(RemoteError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "database offline");
        }
        other => panic!("expected status error, got {:?}", other),
    }

    let id = SessionId::new("9");
    match client.chat_turn(&id, &[], None).await {
        Err(RemoteError::Rejected(reason)) => assert_eq!(reason, "assessment closed"),
        other => panic!("expected rejection, got {:?}", other),
    }

    // An empty question still yields something to show.
    let question = client.questionnaire_turn(&id, &[]).await.unwrap();
    assert_eq!(question.text, "Please continue...");
    assert_eq!(question.options, None);
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpAssessmentClient::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();
    let err = client.create_session(&profile()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Transport(_)));
}
