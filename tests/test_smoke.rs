//! Cross-crate smoke checks: wire shapes, codec, store, client basics.

mod common;

use serde_json::json;

use common::TestBus;
use surf::types::protocol::{ToolRequest, WireMessage};

#[test]
fn request_encoding_round_trips() {
    let req = ToolRequest::new("a1", "navigate", json!({"url": "https://example.org"}))
        .with_tab(surf::types::TabId(3));
    let encoded = serde_json::to_string(&WireMessage::ToolRequest(req)).unwrap();
    let decoded: WireMessage = serde_json::from_str(&encoded).unwrap();
    let re_encoded = serde_json::to_string(&decoded).unwrap();
    assert_eq!(encoded, re_encoded);
}

#[tokio::test]
async fn codec_round_trips_a_request_frame() {
    let (mut a, mut b) = tokio::io::duplex(64 * 1024);
    let req = ToolRequest::new("f1", "page.text", json!({}));
    surf::codec::write_json(&mut a, &WireMessage::ToolRequest(req))
        .await
        .unwrap();
    let back: WireMessage = surf::codec::read_json(&mut b).await.unwrap().unwrap();
    let WireMessage::ToolRequest(req) = back else {
        panic!("expected a request");
    };
    assert_eq!(req.id, "f1");
}

#[tokio::test]
async fn client_executes_against_the_bus() {
    let bus = TestBus::start().await;
    let mut client = bus.client().await;

    let resp = client.execute("page.text", json!({})).await.unwrap();
    assert!(!resp.is_error());
    assert_eq!(resp.first_text(), Some("hello from the page"));

    // Unknown tools still produce exactly one reply (the scripted router
    // answers everything; the classification tests live in surf-router).
    let resp = client.execute("tab.list", json!({})).await.unwrap();
    assert!(!resp.is_error());
}

#[test]
fn store_smoke() {
    let dir = tempfile::tempdir().unwrap();
    let store = surf::netlog::NetworkStore::open(dir.path()).unwrap();
    let entry = surf::netlog::NetworkEntry::new("https://example.org/api", "GET", 200);
    store.append(&entry).unwrap();
    let all = store.query(&surf::netlog::NetworkFilter::new()).unwrap();
    assert_eq!(all.len(), 1);

    let stats = store.stats().unwrap();
    assert_eq!(stats.entries, 1);
}

#[test]
fn error_kinds_round_trip_the_wire_text() {
    let err = surf::types::BridgeError::capability("debugger attach refused");
    let parsed = surf::types::BridgeError::parse(&err.to_string()).unwrap();
    assert_eq!(parsed.kind, surf::types::ErrorKind::Capability);
}
