//! Validation of group-read replies
//!
//! A single-stream, single-entry `XREADGROUP` reply has the shape
//!
//! ```text
//! [ [ stream_key, [ [ entry_id, [ field, value, ... ] ] ] ] ]
//! ```
//!
//! Every deviation is reported as [`MessagingError::MessageShape`].

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::message::Message;
use crate::messaging::traits::DATA_FIELD;
use redis::Value;

/// Decode a group-read reply for `stream_key` into a message
pub fn decode_reply(stream_key: &str, reply: &Value) -> MessagingResult<Message> {
    let streams = as_array(reply, "reply")?;

    let entries = streams
        .iter()
        .map(|stream| {
            let pair = as_array(stream, "stream element")?;
            match pair {
                [key, entries] => Ok((as_text(key, "stream key")?, entries)),
                _ => Err(shape(format!(
                    "stream element has {} items, expected 2",
                    pair.len()
                ))),
            }
        })
        .collect::<MessagingResult<Vec<_>>>()?
        .into_iter()
        .find(|(key, _)| key == stream_key)
        .map(|(_, entries)| entries)
        .ok_or_else(|| shape(format!("stream '{}' missing from reply", stream_key)))?;

    let entry = match as_array(entries, "entry list")? {
        [entry] => entry,
        other => {
            return Err(shape(format!(
                "expected exactly one entry, got {}",
                other.len()
            )))
        }
    };

    let (id, fields) = match as_array(entry, "entry")? {
        [id, fields] => (as_text(id, "entry id")?, as_array(fields, "field list")?),
        other => {
            return Err(shape(format!(
                "entry has {} items, expected 2",
                other.len()
            )))
        }
    };

    if id.is_empty() {
        return Err(shape("entry id is empty"));
    }

    if fields.len() % 2 != 0 {
        return Err(shape(format!("odd field list length {}", fields.len())));
    }

    for pair in fields.chunks_exact(2) {
        if as_text(&pair[0], "field name")? == DATA_FIELD {
            return Ok(Message {
                id,
                data: as_bytes(&pair[1], "field value")?,
            });
        }
    }

    Err(shape(format!("field '{}' missing from entry {}", DATA_FIELD, id)))
}

fn shape(msg: impl Into<String>) -> MessagingError {
    MessagingError::MessageShape(msg.into())
}

fn as_array<'a>(value: &'a Value, what: &str) -> MessagingResult<&'a [Value]> {
    match value {
        Value::Bulk(items) => Ok(items.as_slice()),
        Value::Nil => Err(shape(format!("{} is nil", what))),
        other => Err(shape(format!("{} is not an array: {:?}", what, other))),
    }
}

fn as_bytes(value: &Value, what: &str) -> MessagingResult<Vec<u8>> {
    match value {
        Value::Data(bytes) => Ok(bytes.clone()),
        Value::Status(text) => Ok(text.clone().into_bytes()),
        other => Err(shape(format!("{} is not a string: {:?}", what, other))),
    }
}

fn as_text(value: &Value, what: &str) -> MessagingResult<String> {
    String::from_utf8(as_bytes(value, what)?)
        .map_err(|_| shape(format!("{} is not valid UTF-8", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    fn reply(stream: &str, entries: Vec<Value>) -> Value {
        Value::Bulk(vec![Value::Bulk(vec![data(stream), Value::Bulk(entries)])])
    }

    fn entry(id: &str, fields: Vec<Value>) -> Value {
        Value::Bulk(vec![data(id), Value::Bulk(fields)])
    }

    #[test]
    fn test_decode_single_entry() {
        let value = reply("events", vec![entry("1-0", vec![data("data"), data("x")])]);

        let message = decode_reply("events", &value).unwrap();
        assert_eq!(message.id, "1-0");
        assert_eq!(message.data, b"x".to_vec());
    }

    #[test]
    fn test_decode_finds_data_among_other_fields() {
        let value = reply(
            "events",
            vec![entry(
                "7-3",
                vec![data("source"), data("cli"), data("data"), data("payload")],
            )],
        );

        let message = decode_reply("events", &value).unwrap();
        assert_eq!(message.id, "7-3");
        assert_eq!(message.data_as_str(), "payload");
    }

    #[test]
    fn test_nil_reply() {
        let err = decode_reply("events", &Value::Nil).unwrap_err();
        assert!(matches!(err, MessagingError::MessageShape(_)));
    }

    #[test]
    fn test_wrong_top_level_shape() {
        assert!(matches!(
            decode_reply("events", &Value::Int(3)),
            Err(MessagingError::MessageShape(_))
        ));
        assert!(matches!(
            decode_reply("events", &Value::Okay),
            Err(MessagingError::MessageShape(_))
        ));
    }

    #[test]
    fn test_missing_stream_key() {
        let value = reply("other", vec![entry("1-0", vec![data("data"), data("x")])]);
        let err = decode_reply("events", &value).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_wrong_field_name() {
        let value = reply("events", vec![entry("1-0", vec![data("body"), data("x")])]);
        assert!(matches!(
            decode_reply("events", &value),
            Err(MessagingError::MessageShape(_))
        ));
    }

    #[test]
    fn test_wrong_arity() {
        let odd = reply("events", vec![entry("1-0", vec![data("data")])]);
        assert!(decode_reply("events", &odd).is_err());

        let two_entries = reply(
            "events",
            vec![
                entry("1-0", vec![data("data"), data("x")]),
                entry("2-0", vec![data("data"), data("y")]),
            ],
        );
        assert!(decode_reply("events", &two_entries).is_err());

        let no_entries = reply("events", vec![]);
        assert!(decode_reply("events", &no_entries).is_err());

        let short_entry = reply("events", vec![Value::Bulk(vec![data("1-0")])]);
        assert!(decode_reply("events", &short_entry).is_err());
    }

    #[test]
    fn test_non_string_payload() {
        let value = reply("events", vec![entry("1-0", vec![data("data"), Value::Int(1)])]);
        assert!(matches!(
            decode_reply("events", &value),
            Err(MessagingError::MessageShape(_))
        ));
    }

    #[test]
    fn test_binary_payload_kept_verbatim() {
        let value = reply(
            "events",
            vec![entry("1-0", vec![data("data"), Value::Data(vec![0xff, 0x00, 0x7f])])],
        );
        let message = decode_reply("events", &value).unwrap();
        assert_eq!(message.data, vec![0xff, 0x00, 0x7f]);
    }
}
