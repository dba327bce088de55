//! In-process broker used for tests and dry runs (`--engine mock`).
//!
//! Keeps one retained log; a consumer group is only a committed position in
//! that log, so a group whose subscriber went away costs nothing while traffic
//! continues. Live subscriptions are woken over bounded flume channels.
//! Failure injection goes through connect params: `fail_connect=true`,
//! `fail_flush=true`, `fail_publishers=N` (the first N publishers created fail
//! every flush).
use crate::time_sync::now_unix_ms;
use crate::transport::{
    ConnectOptions, OffsetReset, Publisher, SubscribeOptions, Transport, TransportError,
    TransportMessage, TransportStream,
};
use bytes::Bytes;
use flume::TrySendError;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

pub async fn connect(opts: ConnectOptions) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(MockTransport::from_options(&opts)?))
}

#[derive(Default)]
struct BrokerState {
    log: Vec<TransportMessage>,
    groups: HashMap<String, Group>,
    // One per live subscription; pruned once the subscription is dropped
    wakers: Vec<flume::Sender<()>>,
    closed: bool,
}

struct Group {
    topics: Vec<String>,
    /// Index of the next log entry the group has not consumed
    position: usize,
}

impl Group {
    fn next_message(&mut self, log: &[TransportMessage]) -> Option<TransportMessage> {
        let found = log
            .iter()
            .enumerate()
            .skip(self.position)
            .find(|(_, m)| self.topics.contains(&m.topic))
            .map(|(i, m)| (i, m.clone()));
        match found {
            Some((i, msg)) => {
                self.position = i + 1;
                Some(msg)
            }
            None => {
                self.position = log.len();
                None
            }
        }
    }

    fn lag(&self, log: &[TransportMessage]) -> usize {
        log.iter()
            .skip(self.position)
            .filter(|m| self.topics.contains(&m.topic))
            .count()
    }
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<BrokerState>>,
    failing_publishers: usize,
    created_publishers: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            failing_publishers: 0,
            created_publishers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_options(opts: &ConnectOptions) -> Result<Self, TransportError> {
        if opts.flag("fail_connect") {
            return Err(TransportError::Connect(format!(
                "broker unreachable at {}",
                opts.broker()
            )));
        }
        let failing = if opts.flag("fail_flush") {
            usize::MAX
        } else {
            opts.params
                .get("fail_publishers")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        Ok(Self::new().with_failing_publishers(failing))
    }

    /// The first `n` publishers handed out fail on every flush
    pub fn with_failing_publishers(mut self, n: usize) -> Self {
        self.failing_publishers = n;
        self
    }

    /// Everything delivered so far, in delivery order
    pub async fn published(&self) -> Vec<TransportMessage> {
        self.state.lock().await.log.clone()
    }

    /// Retained messages on the group's topics that it has not consumed yet
    pub async fn lag(&self, group_id: &str) -> Option<usize> {
        let state = self.state.lock().await;
        state.groups.get(group_id).map(|g| g.lag(&state.log))
    }

    /// Append a message directly to the log, as if flushed by some producer
    pub async fn inject(&self, topic: &str, payload: Bytes) {
        let mut state = self.state.lock().await;
        deliver(&mut state, topic.to_string(), payload);
        wake(&mut state);
    }

    /// Stop live delivery: open subscriptions end once they drain, new ones
    /// only replay what is retained and publishers can no longer flush.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.wakers.clear();
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(state: &mut BrokerState, topic: String, payload: Bytes) {
    state.log.push(TransportMessage {
        topic,
        payload,
        timestamp_ms: Some(now_unix_ms()),
    });
}

fn wake(state: &mut BrokerState) {
    // A full channel already holds a pending wake-up
    state
        .wakers
        .retain(|w| !matches!(w.try_send(()), Err(TrySendError::Disconnected(_))));
}

struct Subscription {
    state: Arc<Mutex<BrokerState>>,
    group_id: String,
    wake: flume::Receiver<()>,
}

impl Subscription {
    async fn next_message(&self) -> Option<TransportMessage> {
        loop {
            {
                let mut guard = self.state.lock().await;
                let state = &mut *guard;
                let group = state.groups.get_mut(&self.group_id)?;
                if let Some(msg) = group.next_message(&state.log) {
                    return Some(msg);
                }
                if state.closed {
                    return None;
                }
            }
            // Disconnected means the broker closed; drain once more, then end
            if self.wake.recv_async().await.is_err() {
                let mut guard = self.state.lock().await;
                let state = &mut *guard;
                return state
                    .groups
                    .get_mut(&self.group_id)?
                    .next_message(&state.log);
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn create_publisher(&self) -> Result<Box<dyn Publisher>, TransportError> {
        let index = self.created_publishers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPublisher {
            state: self.state.clone(),
            pending: Mutex::new(Vec::new()),
            fail_flush: index < self.failing_publishers,
        }))
    }

    async fn subscribe(&self, opts: &SubscribeOptions) -> Result<TransportStream, TransportError> {
        if opts.topics.is_empty() {
            return Err(TransportError::Subscribe("no topics given".into()));
        }
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let log_end = state.log.len();
        let group = state
            .groups
            .entry(opts.group_id.clone())
            .or_insert_with(|| Group {
                topics: Vec::new(),
                position: match opts.offset_reset {
                    OffsetReset::Earliest => 0,
                    OffsetReset::Latest => log_end,
                },
            });
        for t in &opts.topics {
            if !group.topics.contains(t) {
                group.topics.push(t.clone());
            }
        }

        let (tx, rx) = flume::bounded(1);
        if !state.closed {
            state.wakers.push(tx);
        }
        let sub = Subscription {
            state: self.state.clone(),
            group_id: opts.group_id.clone(),
            wake: rx,
        };
        let stream = futures::stream::unfold(sub, |sub| async move {
            let msg = sub.next_message().await?;
            Some((Ok::<_, TransportError>(msg), sub))
        });
        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.close().await;
        Ok(())
    }
}

struct MockPublisher {
    state: Arc<Mutex<BrokerState>>,
    pending: Mutex<Vec<(String, Bytes)>>,
    fail_flush: bool,
}

#[async_trait::async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.pending.lock().await.push((topic.to_string(), payload));
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        let batch: Vec<_> = self.pending.lock().await.drain(..).collect();
        if self.fail_flush {
            return Err(TransportError::Flush(format!(
                "broker rejected {} buffered messages",
                batch.len()
            )));
        }
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TransportError::Disconnected);
        }
        for (topic, payload) in batch {
            deliver(&mut state, topic, payload);
        }
        wake(&mut state);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if self.pending.lock().await.is_empty() {
            return Ok(());
        }
        self.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn opts(group: &str, reset: OffsetReset) -> SubscribeOptions {
        SubscribeOptions {
            group_id: group.into(),
            topics: vec!["patients".into(), "medicines".into()],
            offset_reset: reset,
        }
    }

    #[tokio::test]
    async fn nothing_delivered_before_flush() {
        let t = MockTransport::new();
        let p = t.create_publisher().await.unwrap();
        p.publish("patients", Bytes::from_static(b"{}")).await.unwrap();
        assert!(t.published().await.is_empty());
        p.flush().await.unwrap();
        assert_eq!(t.published().await.len(), 1);
    }

    #[tokio::test]
    async fn earliest_replays_and_latest_skips() {
        let t = MockTransport::new();
        t.inject("patients", Bytes::from_static(b"1")).await;
        t.inject("appointments", Bytes::from_static(b"x")).await;

        let early = t.subscribe(&opts("g-early", OffsetReset::Earliest)).await.unwrap();
        let late = t.subscribe(&opts("g-late", OffsetReset::Latest)).await.unwrap();
        t.inject("medicines", Bytes::from_static(b"2")).await;
        t.close().await;

        let early: Vec<_> = early.map(|m| m.unwrap().payload).collect().await;
        let late: Vec<_> = late.map(|m| m.unwrap().payload).collect().await;
        assert_eq!(early, vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]);
        assert_eq!(late, vec![Bytes::from_static(b"2")]);
    }

    #[tokio::test]
    async fn injected_failures() {
        let mut kv = ConnectOptions::default();
        kv.params.insert("fail_connect".into(), "true".into());
        assert!(matches!(
            MockTransport::from_options(&kv),
            Err(TransportError::Connect(_))
        ));

        let t = MockTransport::new().with_failing_publishers(1);
        let bad = t.create_publisher().await.unwrap();
        let good = t.create_publisher().await.unwrap();
        bad.publish("patients", Bytes::new()).await.unwrap();
        assert!(matches!(bad.flush().await, Err(TransportError::Flush(_))));
        good.publish("patients", Bytes::new()).await.unwrap();
        good.flush().await.unwrap();
        assert_eq!(t.published().await.len(), 1);
    }

    #[tokio::test]
    async fn abandoned_group_keeps_only_its_position() {
        let t = MockTransport::new();
        let sub = t.subscribe(&opts("g-gone", OffsetReset::Latest)).await.unwrap();
        drop(sub);
        let p = t.create_publisher().await.unwrap();
        for _ in 0..1_000 {
            p.publish("patients", Bytes::from_static(b"{}")).await.unwrap();
        }
        p.flush().await.unwrap();

        let state = t.state.lock().await;
        assert!(state.wakers.is_empty());
        assert_eq!(state.groups["g-gone"].position, 0);
        assert_eq!(state.log.len(), 1_000);
        drop(state);
        assert_eq!(t.lag("g-gone").await, Some(1_000));
        assert_eq!(t.lag("never-joined").await, None);
    }

    #[tokio::test]
    async fn live_subscription_sees_later_flushes() {
        let t = MockTransport::new();
        let mut sub = t.subscribe(&opts("g-live", OffsetReset::Latest)).await.unwrap();
        let p = t.create_publisher().await.unwrap();
        let reader = tokio::spawn(async move { sub.next().await.map(|m| m.unwrap().payload) });
        tokio::task::yield_now().await;
        p.publish("medicines", Bytes::from_static(b"m")).await.unwrap();
        p.flush().await.unwrap();
        assert_eq!(reader.await.unwrap(), Some(Bytes::from_static(b"m")));
        assert_eq!(t.lag("g-live").await, Some(0));
    }

    #[tokio::test]
    async fn shutdown_delivers_buffered_sends() {
        let t = MockTransport::new();
        let p = t.create_publisher().await.unwrap();
        p.publish("patients", Bytes::from_static(b"{}")).await.unwrap();
        p.shutdown().await.unwrap();
        assert_eq!(t.published().await.len(), 1);
        p.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn flush_after_close_is_disconnected() {
        let t = MockTransport::new();
        let p = t.create_publisher().await.unwrap();
        t.close().await;
        p.publish("patients", Bytes::new()).await.unwrap();
        assert!(matches!(p.flush().await, Err(TransportError::Disconnected)));
        assert!(t.published().await.is_empty());
    }
}
