//! # Engine Tests: ProcessEngine
//!
//! Validates the newline-delimited JSON protocol with a child process: the
//! flags line, both pump directions, and tolerance of malformed lines.
#![cfg(unix)]

use bridge_core::{bridge, ConnectionId, Envelope, ProcessEngine, ServerConfig, Tag};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()]
}

/// The first line the engine reads is the flags object.
#[tokio::test]
async fn test_engine_receives_flags_first() {
    let t = Instant::now();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("flags.json");
    let config = ServerConfig::from_toml_str("action_timeout_ms = 750").unwrap();
    let (_effect_side, engine_side) = bridge::channel(8);

    let engine = ProcessEngine::spawn(
        &sh(&format!("head -n 1 > '{}'", out.display())),
        &config.engine_flags(),
        engine_side,
    )
    .await
    .unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), engine.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());

    let flags: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(flags, json!({ "secret": "secret", "jsActionTimeout": 750, "jsActionCheckInterval": 1000 }));

    let overhead = t.elapsed();
    println!("test_engine_receives_flags_first: Testing Overhead = {:?}", overhead);
}

/// Lines printed by the engine arrive as envelopes; malformed ones are
/// skipped.
#[tokio::test]
async fn test_engine_output_becomes_requests() {
    let t = Instant::now();

    let script = r#"echo 'not json'; echo; echo '{"tag":"HashPassword","connectionId":4096,"payload":"pw","actionId":3}'; sleep 1"#;
    let (effect_side, engine_side) = bridge::channel(8);
    let (_to_engine, mut from_engine) = effect_side.split();

    let _engine = ProcessEngine::spawn(&sh(script), &ServerConfig::default().engine_flags(), engine_side)
        .await
        .unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(5), from_engine.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.known_tag(), Some(Tag::HashPassword));
    assert_eq!(envelope.connection_id, ConnectionId::from_raw(4096));
    assert_eq!(envelope.correlation.get("actionId"), Some(&json!(3)));

    let overhead = t.elapsed();
    println!("test_engine_output_becomes_requests: Testing Overhead = {:?}", overhead);
}

/// Envelopes sent towards the engine are written one per line after the
/// flags; an engine echoing its input turns them back into requests.
#[tokio::test]
async fn test_engine_round_trip_through_cat() {
    let t = Instant::now();

    let (effect_side, engine_side) = bridge::channel(8);
    let (to_engine, mut from_engine) = effect_side.split();

    let _engine = ProcessEngine::spawn(
        &sh("read flags; exec cat"),
        &ServerConfig::default().engine_flags(),
        engine_side,
    )
    .await
    .unwrap();

    let id = ConnectionId::from_parts(77, 1);
    to_engine
        .emit(Envelope::new(Tag::SqlQuery, id, json!({ "sql": "SELECT 1" })))
        .await
        .unwrap();

    let echoed = tokio::time::timeout(Duration::from_secs(5), from_engine.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed.connection_id, id);
    assert_eq!(echoed.payload["sql"], "SELECT 1");

    let overhead = t.elapsed();
    println!("test_engine_round_trip_through_cat: Testing Overhead = {:?}", overhead);
}

/// An empty command is a configuration error.
#[tokio::test]
async fn test_empty_engine_command_rejected() {
    let t = Instant::now();

    let (_effect_side, engine_side) = bridge::channel(8);
    let result = ProcessEngine::spawn(&[], &ServerConfig::default().engine_flags(), engine_side).await;
    assert!(result.is_err());

    let overhead = t.elapsed();
    println!("test_empty_engine_command_rejected: Testing Overhead = {:?}", overhead);
}
