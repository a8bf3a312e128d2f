//! Property-based tests for the wire format.
//!
//! Uses proptest to verify:
//! 1. The SSE decoder yields the same frames no matter how the byte stream
//!    is split into chunks.
//! 2. Random bytes never cause a panic in the SSE decoder or the JSON codec.
//! 3. Message text survives being embedded as a JSON string payload.

use proptest::prelude::*;
use livechat_proto::codec;
use livechat_proto::entry::{ConversationEntry, EntryType, Sender, message_payload};
use livechat_proto::sse::{SseDecoder, SseFrame};

/// Strategy for a single-line SSE field value (no CR/LF).
fn arb_field_value() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 {}:\",_-]{0,40}"
}

/// Strategy for a complete frame that the decoder will dispatch.
fn arb_frame() -> impl Strategy<Value = SseFrame> {
    (
        proptest::option::of("[A-Z_]{1,40}"),
        proptest::option::of("[0-9]{1,10}"),
        prop::collection::vec(arb_field_value(), 1..4),
    )
        .prop_map(|(event, id, data)| SseFrame {
            event,
            id,
            data: data.join("\n"),
        })
}

fn render(frames: &[SseFrame]) -> Vec<u8> {
    let mut out = String::new();
    for frame in frames {
        if let Some(ref event) = frame.event {
            out.push_str(&format!("event: {event}\n"));
        }
        if let Some(ref id) = frame.id {
            out.push_str(&format!("id: {id}\n"));
        }
        for line in frame.data.split('\n') {
            out.push_str(&format!("data: {line}\n"));
        }
        out.push('\n');
    }
    out.into_bytes()
}

proptest! {
    #[test]
    fn sse_decoding_is_independent_of_chunking(
        frames in prop::collection::vec(arb_frame(), 1..6),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let bytes = render(&frames);

        let mut whole = SseDecoder::new();
        let expected = whole.push(&bytes);
        prop_assert_eq!(&expected, &frames);

        let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len())).collect();
        offsets.sort_unstable();
        offsets.dedup();

        let mut chunked = SseDecoder::new();
        let mut got = Vec::new();
        let mut start = 0;
        for offset in offsets {
            got.extend(chunked.push(&bytes[start..offset]));
            start = offset;
        }
        got.extend(chunked.push(&bytes[start..]));
        prop_assert_eq!(got, frames);
    }

    #[test]
    fn sse_decoder_never_panics(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 0..8)) {
        let mut decoder = SseDecoder::new();
        for chunk in &chunks {
            let _ = decoder.push(chunk);
        }
        let _ = decoder.finish();
    }

    #[test]
    fn random_bytes_never_panic_in_decode(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode::<ConversationEntry>(&bytes);
    }

    #[test]
    fn embedded_payload_text_is_preserved(text in "[^\x00]{0,256}") {
        let entry = ConversationEntry {
            identifier: "m".into(),
            entry_type: EntryType::Message,
            sender: Sender::default(),
            sender_display_name: None,
            entry_payload: serde_json::Value::String(message_payload(&text).to_string()),
            client_timestamp: None,
        };
        prop_assert_eq!(entry.text().unwrap(), Some(text));
    }
}
