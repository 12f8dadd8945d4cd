//! In-process broker with stream and consumer-group semantics
//!
//! Mirrors the Redis behaviour the producer and consumer rely on: monotonic
//! `<ms>-<seq>` IDs, explicit-ID validation, `MAXLEN` trimming, groups with a
//! delivery cursor and a pending-entry list, and reads that block until an
//! entry arrives or the broker is closed. Test hooks allow injecting read and
//! acknowledge failures as well as raw replies.

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{StreamBroker, DATA_FIELD};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// Broker operation, recorded in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Append { stream: String },
    EnsureGroup { stream: String, group: String },
    ReadGroup { stream: String, group: String, consumer: String },
    Acknowledge { stream: String, group: String, id: String },
    Close,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    fn parse(raw: &str) -> Option<Self> {
        match raw.split_once('-') {
            Some((ms, seq)) => Some(Self {
                ms: ms.parse().ok()?,
                seq: seq.parse().ok()?,
            }),
            None => Some(Self {
                ms: raw.parse().ok()?,
                seq: 0,
            }),
        }
    }

    /// Smallest ID above `last`, or `None` once the ID space is exhausted
    fn next_after(last: EntryId) -> Option<Self> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        if now_ms > last.ms {
            return Some(Self { ms: now_ms, seq: 0 });
        }

        match last.seq.checked_add(1) {
            Some(seq) => Some(Self { ms: last.ms, seq }),
            None => last.ms.checked_add(1).map(|ms| Self { ms, seq: 0 }),
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    // entry id -> owning consumer
    pending: BTreeMap<EntryId, String>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: VecDeque<(EntryId, Vec<u8>)>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug)]
enum ScriptedRead {
    Fail(String),
    Raw(Value),
}

#[derive(Debug, Default)]
struct State {
    streams: HashMap<String, StreamState>,
    closed: bool,
    scripted_reads: VecDeque<ScriptedRead>,
    ack_failures: usize,
    acked: Vec<String>,
    calls: Vec<BrokerCall>,
}

/// In-memory stream broker
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
    wakeup: Notify,
}

impl InMemoryBroker {
    /// Create a new empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` group reads fail
    pub fn fail_next_reads(&self, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state
                .scripted_reads
                .push_back(ScriptedRead::Fail("injected read failure".to_string()));
        }
        drop(state);
        self.wakeup.notify_waiters();
    }

    /// Deliver `reply` verbatim on a future group read
    pub fn push_raw_reply(&self, reply: Value) {
        self.state
            .lock()
            .scripted_reads
            .push_back(ScriptedRead::Raw(reply));
        self.wakeup.notify_waiters();
    }

    /// Make the next `count` acknowledgements fail
    pub fn fail_next_acks(&self, count: usize) {
        self.state.lock().ack_failures += count;
    }

    /// IDs currently in `stream`, oldest first
    pub fn entry_ids(&self, stream: &str) -> Vec<String> {
        self.state
            .lock()
            .streams
            .get(stream)
            .map(|s| s.entries.iter().map(|(id, _)| id.to_string()).collect())
            .unwrap_or_default()
    }

    /// Number of entries in `stream`
    pub fn len(&self, stream: &str) -> usize {
        self.state
            .lock()
            .streams
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    /// Whether `group` exists on `stream`
    pub fn group_exists(&self, stream: &str, group: &str) -> bool {
        self.state
            .lock()
            .streams
            .get(stream)
            .is_some_and(|s| s.groups.contains_key(group))
    }

    /// Delivered but unacknowledged entry IDs of `group`
    pub fn pending(&self, stream: &str, group: &str) -> Vec<String> {
        self.state
            .lock()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.keys().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    /// Every ID passed to a successful acknowledge, in call order
    pub fn acked(&self) -> Vec<String> {
        self.state.lock().acked.clone()
    }

    /// Every broker operation, in call order
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.state.lock().calls.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn entry_reply(stream: &str, id: EntryId, payload: &[u8]) -> Value {
        let fields = Value::Bulk(vec![
            Value::Data(DATA_FIELD.as_bytes().to_vec()),
            Value::Data(payload.to_vec()),
        ]);
        let entry = Value::Bulk(vec![Value::Data(id.to_string().into_bytes()), fields]);

        Value::Bulk(vec![Value::Bulk(vec![
            Value::Data(stream.as_bytes().to_vec()),
            Value::Bulk(vec![entry]),
        ])])
    }

    fn try_deliver(
        state: &mut State,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> MessagingResult<Option<Value>> {
        if state.closed {
            return Err(MessagingError::ConnectionClosed);
        }

        if let Some(scripted) = state.scripted_reads.pop_front() {
            return match scripted {
                ScriptedRead::Fail(msg) => Err(MessagingError::BrokerCommunication(msg)),
                ScriptedRead::Raw(value) => Ok(Some(value)),
            };
        }

        let no_group = || {
            MessagingError::BrokerCommunication(format!(
                "NOGROUP No such key '{}' or consumer group '{}'",
                stream, group
            ))
        };

        let StreamState {
            entries, groups, ..
        } = state.streams.get_mut(stream).ok_or_else(no_group)?;
        let group_state = groups.get_mut(group).ok_or_else(no_group)?;

        let next = entries
            .iter()
            .find(|(id, _)| *id > group_state.last_delivered);

        Ok(next.map(|(id, payload)| {
            group_state.last_delivered = *id;
            group_state.pending.insert(*id, consumer.to_string());
            Self::entry_reply(stream, *id, payload)
        }))
    }
}

#[async_trait]
impl StreamBroker for InMemoryBroker {
    async fn append(
        &self,
        stream: &str,
        max_len: usize,
        id: Option<&str>,
        payload: &[u8],
    ) -> MessagingResult<String> {
        let mut state = self.state.lock();
        state.calls.push(BrokerCall::Append {
            stream: stream.to_string(),
        });
        if state.closed {
            return Err(MessagingError::ConnectionClosed);
        }

        let stream_state = state.streams.entry(stream.to_string()).or_default();

        let entry_id = match id {
            None => EntryId::next_after(stream_state.last_id).ok_or_else(|| {
                MessagingError::BrokerCommunication(
                    "ERR The stream has exhausted the last possible ID, unable to add more items"
                        .to_string(),
                )
            })?,
            Some(raw) => {
                let parsed = EntryId::parse(raw).ok_or_else(|| {
                    MessagingError::BrokerCommunication(
                        "ERR Invalid stream ID specified as stream command argument".to_string(),
                    )
                })?;
                if parsed == EntryId::default() || parsed <= stream_state.last_id {
                    return Err(MessagingError::BrokerCommunication(
                        "ERR The ID specified in XADD is equal or smaller than the target stream top item"
                            .to_string(),
                    ));
                }
                parsed
            }
        };

        stream_state.last_id = entry_id;
        stream_state.entries.push_back((entry_id, payload.to_vec()));
        while stream_state.entries.len() > max_len {
            stream_state.entries.pop_front();
        }

        drop(state);
        self.wakeup.notify_waiters();

        Ok(entry_id.to_string())
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> MessagingResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BrokerCall::EnsureGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        });
        if state.closed {
            return Err(MessagingError::ConnectionClosed);
        }

        state
            .streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();

        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> MessagingResult<Value> {
        self.state.lock().calls.push(BrokerCall::ReadGroup {
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
        });

        loop {
            let wakeup = self.wakeup.notified();
            {
                let mut state = self.state.lock();
                if let Some(reply) = Self::try_deliver(&mut state, stream, group, consumer)? {
                    return Ok(reply);
                }
            }
            wakeup.await;
        }
    }

    async fn acknowledge(&self, stream: &str, group: &str, id: &str) -> MessagingResult<i64> {
        let mut state = self.state.lock();
        state.calls.push(BrokerCall::Acknowledge {
            stream: stream.to_string(),
            group: group.to_string(),
            id: id.to_string(),
        });
        if state.closed {
            return Err(MessagingError::ConnectionClosed);
        }
        if state.ack_failures > 0 {
            state.ack_failures -= 1;
            return Err(MessagingError::BrokerCommunication(
                "injected ack failure".to_string(),
            ));
        }

        let entry_id = EntryId::parse(id).ok_or_else(|| {
            MessagingError::BrokerCommunication("ERR Invalid stream ID".to_string())
        })?;

        let removed = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .and_then(|g| g.pending.remove(&entry_id))
            .is_some();

        state.acked.push(id.to_string());

        Ok(i64::from(removed))
    }

    async fn close(&self) -> MessagingResult<()> {
        let mut state = self.state.lock();
        state.calls.push(BrokerCall::Close);
        state.closed = true;
        drop(state);
        self.wakeup.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::decode::decode_reply;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_auto_ids_are_increasing() {
        let broker = InMemoryBroker::new();
        let mut previous = EntryId::default();

        for _ in 0..50 {
            let id = broker.append("s", 100, None, b"x").await.unwrap();
            let parsed = EntryId::parse(&id).unwrap();
            assert!(parsed > previous);
            previous = parsed;
        }
    }

    #[tokio::test]
    async fn test_explicit_ids() {
        let broker = InMemoryBroker::new();

        assert!(broker.append("s", 10, Some("0-0"), b"x").await.is_err());
        assert_eq!(broker.append("s", 10, Some("5"), b"x").await.unwrap(), "5-0");
        assert!(broker.append("s", 10, Some("5-0"), b"x").await.is_err());
        assert!(broker.append("s", 10, Some("garbage"), b"x").await.is_err());
        assert_eq!(broker.append("s", 10, Some("5-1"), b"x").await.unwrap(), "5-1");

        let auto = broker.append("s", 10, None, b"x").await.unwrap();
        assert!(EntryId::parse(&auto).unwrap() > EntryId { ms: 5, seq: 1 });
    }

    #[tokio::test]
    async fn test_exhausted_id_space() {
        let broker = InMemoryBroker::new();
        let top = format!("{}-{}", u64::MAX, u64::MAX);
        assert_eq!(
            broker.append("s", 10, Some(top.as_str()), b"x").await.unwrap(),
            top
        );

        let err = broker.append("s", 10, None, b"y").await.unwrap_err();
        assert!(matches!(err, MessagingError::BrokerCommunication(_)));
        assert!(err.to_string().contains("exhausted"));
        assert_eq!(broker.entry_ids("s"), vec![top]);

        // the broker is still usable after the rejection
        broker.append("t", 10, None, b"z").await.unwrap();
    }

    #[test]
    fn test_next_after_rolls_over_sequence() {
        let last = EntryId {
            ms: u64::MAX - 1,
            seq: u64::MAX,
        };
        assert_eq!(
            EntryId::next_after(last),
            Some(EntryId {
                ms: u64::MAX,
                seq: 0
            })
        );
    }

    #[tokio::test]
    async fn test_ensure_group_twice() {
        let broker = InMemoryBroker::new();
        broker.ensure_group("s", "g").await.unwrap();
        broker.ensure_group("s", "g").await.unwrap();
        assert!(broker.group_exists("s", "g"));
        assert_eq!(broker.len("s"), 0);
    }

    #[tokio::test]
    async fn test_read_without_group_fails() {
        let broker = InMemoryBroker::new();
        broker.append("s", 10, None, b"x").await.unwrap();
        let err = broker.read_group("s", "g", "c").await.unwrap_err();
        assert!(err.to_string().contains("NOGROUP"));
    }

    #[tokio::test]
    async fn test_group_delivers_each_entry_once() {
        let broker = InMemoryBroker::new();
        broker.ensure_group("s", "g").await.unwrap();
        let first = broker.append("s", 10, None, b"a").await.unwrap();
        let second = broker.append("s", 10, None, b"b").await.unwrap();

        let reply = broker.read_group("s", "g", "c1").await.unwrap();
        assert_eq!(decode_reply("s", &reply).unwrap().id, first);
        let reply = broker.read_group("s", "g", "c2").await.unwrap();
        assert_eq!(decode_reply("s", &reply).unwrap().id, second);

        assert_eq!(broker.pending("s", "g"), vec![first.clone(), second]);
        assert_eq!(broker.acknowledge("s", "g", &first).await.unwrap(), 1);
        assert_eq!(broker.acknowledge("s", "g", &first).await.unwrap(), 0);
        assert_eq!(broker.pending("s", "g").len(), 1);
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.ensure_group("s", "g").await.unwrap();

        let reader = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.read_group("s", "g", "c").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        let id = broker.append("s", 10, None, b"late").await.unwrap();
        let reply = reader.await.unwrap().unwrap();
        assert_eq!(decode_reply("s", &reply).unwrap().id, id);
    }

    #[tokio::test]
    async fn test_close_interrupts_blocking_read() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.ensure_group("s", "g").await.unwrap();

        let reader = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.read_group("s", "g", "c").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close().await.unwrap();

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(MessagingError::ConnectionClosed)));
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let broker = InMemoryBroker::new();
        broker.ensure_group("s", "g").await.unwrap();
        broker.fail_next_reads(1);
        broker.push_raw_reply(Value::Nil);
        broker.fail_next_acks(1);

        assert!(broker.read_group("s", "g", "c").await.is_err());
        assert_eq!(broker.read_group("s", "g", "c").await.unwrap(), Value::Nil);
        assert!(broker.acknowledge("s", "g", "1-0").await.is_err());
        assert!(broker.acked().is_empty());
    }

    #[tokio::test]
    async fn test_trim_keeps_newest() {
        let broker = InMemoryBroker::new();
        for i in 1..=5u64 {
            broker
                .append("s", 2, Some(format!("{}-0", i).as_str()), b"x")
                .await
                .unwrap();
        }
        assert_eq!(broker.entry_ids("s"), vec!["4-0".to_string(), "5-0".to_string()]);
    }
}
