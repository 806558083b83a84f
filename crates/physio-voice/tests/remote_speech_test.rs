//! Remote STT/TTS against an in-process backend.

use axum::body::Bytes;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use physio_voice::{AudioClip, RemoteStt, RemoteTts, SttBackend, TtsBackend};
use serde_json::{json, Value};
use std::time::Duration;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_remote_stt_uploads_wav() {
    let app = Router::new().route(
        "/api/speech-to-text",
        post(|body: Bytes| async move {
            let has_wav = body.windows(4).any(|w| w == b"RIFF");
            let text = if has_wav { "it hurts when I bend" } else { "" };
            Json(json!({ "success": true, "data": { "transcript": text } }))
        }),
    );
    let base = serve(app).await;
    let stt = RemoteStt::new(base, Duration::from_secs(5)).unwrap();
    let clip = AudioClip::new(vec![0.1; 1600], 16000);
    assert_eq!(stt.transcribe(&clip).await.unwrap(), "it hurts when I bend");
}

#[tokio::test]
async fn test_remote_stt_error_status() {
    let app = Router::new().route(
        "/api/speech-to-text",
        post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
    );
    let base = serve(app).await;
    let stt = RemoteStt::new(base, Duration::from_secs(5)).unwrap();
    let err = stt.transcribe(&AudioClip::new(vec![0.0; 10], 16000)).await.unwrap_err();
    assert!(err.to_string().contains("502"));
}

#[tokio::test]
async fn test_remote_tts_accepts_raw_and_json_audio() {
    let app = Router::new()
        .route(
            "/api/text-to-speech",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["text"], "Hello there");
                ([(header::CONTENT_TYPE, "audio/mpeg")], b"ID3raw".to_vec()).into_response()
            }),
        );
    let base = serve(app).await;
    let tts = RemoteTts::new(base, Duration::from_secs(5)).unwrap();
    assert_eq!(tts.synthesize("Hello there").await.unwrap(), b"ID3raw");

    let encoded = base64::engine::general_purpose::STANDARD.encode(b"ID3json");
    let app = Router::new().route(
        "/api/text-to-speech",
        post(move || {
            let encoded = encoded.clone();
            async move { Json(json!({ "success": true, "data": { "audioContent": encoded } })) }
        }),
    );
    let base = serve(app).await;
    let tts = RemoteTts::new(base, Duration::from_secs(5)).unwrap();
    assert_eq!(tts.synthesize("Hello there").await.unwrap(), b"ID3json");
    assert!(tts.synthesize("  ").await.unwrap().is_empty());
}
