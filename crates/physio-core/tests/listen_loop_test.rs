//! The microphone loop feeding transcripts into the session.

mod support;

use physio_core::{run_listen_loop, SessionEvent};
use std::sync::atomic::Ordering;
use std::time::Duration;
use support::{harness, question, reply};

#[tokio::test(start_paused = true)]
async fn spoken_reply_is_routed_to_chat() {
    let h = harness();
    h.api.push_chat(Ok(reply("How can I help?", "none")));
    h.voice.push_transcript("my knee hurts when I climb stairs");
    h.api.push_chat(Ok(reply("Since when?", "none")));

    let listener = tokio::spawn(run_listen_loop(h.session.clone(), h.listen_rx));
    h.session.start_assessment().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let calls = h.api.chat_calls.lock().unwrap().clone();
    assert!(calls.len() >= 2);
    assert_eq!(calls[1].0.last().unwrap().user, "my knee hurts when I climb stairs");
    assert_eq!(
        h.session.snapshot().chat_transcript[1].assistant,
        "Since when?"
    );
    listener.abort();
}

#[tokio::test(start_paused = true)]
async fn questionnaire_answer_by_voice() {
    let h = harness();
    h.voice.push_transcript("about two weeks");
    h.into_questionnaire(question("How long has it hurt?", "none")).await;
    h.api.push_question(Ok(question("Does it hurt at night?", "none")));

    let listener = tokio::spawn(run_listen_loop(h.session.clone(), h.listen_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.api.questionnaire_count(), 2);
    assert_eq!(
        h.api.last_questionnaire_transcript().last().unwrap().user,
        "about two weeks"
    );
    listener.abort();
}

#[tokio::test(start_paused = true)]
async fn missing_microphone_disables_voice_once() {
    let mut h = harness();
    h.voice.remove_device();
    h.session.start_assessment().await.unwrap();

    let listen_rx = std::mem::replace(&mut h.listen_rx, tokio::sync::mpsc::unbounded_channel().1);
    let listener = tokio::spawn(run_listen_loop(h.session.clone(), listen_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snap = h.session.snapshot();
    assert!(snap.voice_disabled);
    let disabled = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::VoiceDisabled(_)))
        .count();
    assert_eq!(disabled, 1);
    assert!(!h.session.request_listen());

    // Typed input keeps working.
    h.api.push_chat(Ok(reply("Got it", "none")));
    h.session.handle_transcript("typed answer").await.unwrap();
    assert_eq!(h.api.chat_count(), 2);

    // Voice stays off across a reset.
    h.session.reset();
    assert!(h.session.snapshot().voice_disabled);
    listener.abort();
}

#[tokio::test(start_paused = true)]
async fn muted_session_never_captures() {
    let h = harness();
    h.session.set_muted(true);
    h.voice.push_transcript("should not be heard");

    let listener = tokio::spawn(run_listen_loop(h.session.clone(), h.listen_rx));
    h.session.start_assessment().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.voice.captures.load(Ordering::SeqCst), 0);
    assert_eq!(h.api.chat_count(), 1);
    listener.abort();
}

#[tokio::test(start_paused = true)]
async fn requests_from_before_a_reset_are_dropped() {
    let h = harness();
    h.session.start_assessment().await.unwrap();
    h.session.reset();
    h.voice.push_transcript("stale words");

    let listener = tokio::spawn(run_listen_loop(h.session.clone(), h.listen_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.voice.captures.load(Ordering::SeqCst), 0);
    assert_eq!(h.api.chat_count(), 1);
    listener.abort();
}
