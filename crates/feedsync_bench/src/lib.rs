//! Benchmark fixtures.

use feedsync_protocol::StreamMessage;
use serde_json::{json, Value};

/// A task-like record of roughly `payload` bytes.
pub fn task_record(id: usize, payload: usize) -> Value {
    json!({
        "id": id,
        "title": format!("Task {id}"),
        "status": if id % 3 == 0 { "done" } else { "open" },
        "team_id": id % 17,
        "notes": "x".repeat(payload),
        "deleted_at": null,
    })
}

/// A feed of `count` task upserts with a checkpoint every `checkpoint_every`
/// events, terminated by `done`.
pub fn task_feed(count: usize, payload: usize, checkpoint_every: usize) -> Vec<StreamMessage> {
    let mut feed = Vec::with_capacity(count + count / checkpoint_every.max(1) + 1);
    for i in 0..count {
        feed.push(StreamMessage::upsert(
            "wh_tasks",
            i.to_string(),
            task_record(i, payload),
        ));
        if checkpoint_every > 0 && (i + 1) % checkpoint_every == 0 {
            feed.push(StreamMessage::Checkpoint {
                cursor: format!("c{i}"),
            });
        }
    }
    feed.push(StreamMessage::done("end"));
    feed
}

/// Encodes a feed as NDJSON bytes.
pub fn encode_feed(feed: &[StreamMessage]) -> Vec<u8> {
    feed.iter()
        .map(StreamMessage::to_line)
        .collect::<String>()
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_shape() {
        let feed = task_feed(10, 8, 4);
        assert_eq!(feed.len(), 10 + 2 + 1);
        assert_eq!(feed.last(), Some(&StreamMessage::done("end")));
        assert!(encode_feed(&feed).ends_with(b"\n"));
    }
}
