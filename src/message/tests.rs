use super::*;
use chrono::Utc;

fn make_record(url: &str) -> SourceRecord {
    SourceRecord {
        title: "Release notes".to_string(),
        url: url.to_string(),
        published_at: Utc::now(),
        body: "Great release".to_string(),
        author: Some("team".to_string()),
    }
}

#[test]
fn test_envelope_rejects_empty_recipient() {
    let result = Envelope::new("dispatcher", "  ", 1u32, "abc");
    assert_eq!(result.unwrap_err(), EnvelopeError::EmptyRecipient);
}

#[test]
fn test_envelope_rejects_empty_correlation() {
    let result = Envelope::new("dispatcher", "worker1", 1u32, "");
    assert_eq!(result.unwrap_err(), EnvelopeError::EmptyCorrelation);
}

#[test]
fn test_reply_preserves_trace_and_correlation() {
    let inbound = Envelope::traced(
        "dispatcher",
        "worker1",
        "work",
        Some("trace-1".to_string()),
        "corr-1",
    )
    .unwrap();

    let reply = inbound.reply("worker1", "validation", 42u32).unwrap();

    assert_eq!(reply.from(), "worker1");
    assert_eq!(reply.to(), "validation");
    assert_eq!(reply.trace_id(), Some("trace-1"));
    assert_eq!(reply.correlation_id(), "corr-1");
    assert_eq!(*reply.payload(), 42);
    assert!(reply.created_at() >= inbound.created_at());
}

#[test]
fn test_deserialized_envelope_is_validated() {
    let json = r#"{"from":"x","to":"","payload":1,"correlation_id":"c","created_at":"2024-01-01T00:00:00Z"}"#;
    let envelope: Envelope<u32> = serde_json::from_str(json).unwrap();
    assert_eq!(envelope.validate(), Err(EnvelopeError::EmptyRecipient));
}

#[test]
fn test_correlation_id_is_deterministic() {
    let a = make_record("https://example.com/post/1");
    let b = make_record("https://example.com/post/1");
    let c = make_record("https://example.com/post/2");

    assert_eq!(a.correlation_id(), b.correlation_id());
    assert_ne!(a.correlation_id(), c.correlation_id());
    assert_eq!(a.correlation_id().len(), 32);
}

#[test]
fn test_correlation_id_falls_back_to_title() {
    let mut record = make_record("");
    let by_title = record.correlation_id();
    record.title = "Another title".to_string();
    assert_ne!(by_title, record.correlation_id());
}

#[test]
fn test_payload_is_tagged_on_the_wire() {
    let payload = Payload::WorkItem(WorkItem::new(make_record("https://e.com/1"), "worker1"));
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["kind"], "work_item");
    assert_eq!(json["body"]["processor"], "worker1");
}

#[test]
fn test_work_item_without_record_deserializes() {
    let json = r#"{"kind":"work_item","body":{"processor":"worker2","dispatched_at":"2024-01-01T00:00:00Z"}}"#;
    let payload: Payload = serde_json::from_str(json).unwrap();
    match payload {
        Payload::WorkItem(item) => {
            assert!(item.record.is_none());
            assert_eq!(item.processor, "worker2");
        }
        other => panic!("unexpected payload {}", other.kind()),
    }
}
