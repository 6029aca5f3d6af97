//! Per-request progress streams
//!
//! The orchestration flow publishes lifecycle events under a request id; the
//! SSE endpoint drains them with [`ProgressHub::event_stream`]. Whichever side
//! arrives first creates the queue, so events emitted before the client
//! subscribes are buffered rather than lost. The queue is removed when its
//! stream ends or is dropped, and later events for that request id are
//! discarded until the id ages out in [`ProgressHub::purge_stale`].

pub mod events;

pub use events::{preview, EventType, ProgressEvent, PREVIEW_CHARS};

use crate::telemetry::Telemetry;
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Idle window before a heartbeat frame is sent
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);
/// Consecutive heartbeats before the stream gives up (10 minutes at the default window)
pub const DEFAULT_MAX_IDLE_HEARTBEATS: u32 = 20;

struct RequestQueue {
    sender: mpsc::UnboundedSender<ProgressEvent>,
    /// Taken by the single subscriber
    receiver: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
    created_at: Instant,
}

impl RequestQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
            created_at: Instant::now(),
        }
    }
}

/// Removes the request's queue when the consuming stream goes away and
/// marks the id closed
struct QueueGuard {
    queues: Arc<DashMap<String, RequestQueue>>,
    closed: Arc<DashMap<String, Instant>>,
    request_id: String,
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.closed.insert(self.request_id.clone(), Instant::now());
        if self.queues.remove(&self.request_id).is_some() {
            log::debug!("[PROGRESS] Removed queue for request {}", self.request_id);
        }
    }
}

struct Subscription {
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
    _guard: QueueGuard,
    heartbeat: Duration,
    max_idle_heartbeats: u32,
    idle_heartbeats: u32,
    finished: bool,
}

#[derive(Clone)]
pub struct ProgressHub {
    queues: Arc<DashMap<String, RequestQueue>>,
    /// Request ids whose stream already ended, with the time it ended
    closed: Arc<DashMap<String, Instant>>,
    heartbeat: Duration,
    max_idle_heartbeats: u32,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT, DEFAULT_MAX_IDLE_HEARTBEATS)
    }
}

impl ProgressHub {
    pub fn new(heartbeat: Duration, max_idle_heartbeats: u32) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            closed: Arc::new(DashMap::new()),
            heartbeat,
            max_idle_heartbeats: max_idle_heartbeats.max(1),
        }
    }

    /// Push an event onto the request's queue, creating it if needed.
    /// Events for a request whose stream already ended are dropped.
    pub fn emit(&self, request_id: &str, event: ProgressEvent) {
        if self.closed.contains_key(request_id) {
            log::debug!("[PROGRESS] Stream for {} already closed, dropping {}", request_id, event.event_type);
            return;
        }
        log::debug!("[PROGRESS] {} -> {}", request_id, event.event_type);
        let queue = self
            .queues
            .entry(request_id.to_string())
            .or_insert_with(RequestQueue::new);
        if queue.sender.send(event).is_err() {
            log::debug!("[PROGRESS] Subscriber for {} is gone, dropping event", request_id);
        }
    }

    pub fn emit_flow_start(&self, request_id: &str, prompt: &str) {
        self.emit(request_id, ProgressEvent::flow_start(prompt));
    }

    pub fn emit_subtask_dispatch(&self, request_id: &str, index: usize, subtask: &str, agents: &[String]) {
        self.emit(request_id, ProgressEvent::subtask_dispatch(index, subtask, agents));
    }

    pub fn emit_subtask_result(
        &self,
        request_id: &str,
        index: usize,
        subtask: &str,
        output: &str,
        telemetry: &Telemetry,
    ) {
        self.emit(request_id, ProgressEvent::subtask_result(index, subtask, output, telemetry));
    }

    pub fn emit_synthesis_start(&self, request_id: &str, subtask_count: usize) {
        self.emit(request_id, ProgressEvent::synthesis_start(subtask_count));
    }

    pub fn emit_synthesis_complete(&self, request_id: &str, final_answer: &str) {
        self.emit(request_id, ProgressEvent::synthesis_complete(final_answer));
    }

    /// Final answer, immediately followed by the terminal `stream_complete`
    pub fn emit_final_complete(&self, request_id: &str, final_answer: &str, error_message: Option<&str>) {
        self.emit(request_id, ProgressEvent::final_complete(final_answer, error_message));
        self.emit_stream_complete(request_id, "completed");
    }

    pub fn emit_stream_complete(&self, request_id: &str, reason: &str) {
        self.emit(request_id, ProgressEvent::stream_complete(reason));
    }

    /// SSE frames for one request, ending with `stream_complete`.
    ///
    /// A heartbeat frame is yielded after each idle window; after
    /// `max_idle_heartbeats` of them in a row a synthetic `stream_complete`
    /// with reason `idle_timeout` ends the stream. Only one subscriber per
    /// request is served at a time; subscribing again after a stream ended
    /// reopens the id.
    pub fn event_stream(&self, request_id: &str) -> BoxStream<'static, String> {
        self.closed.remove(request_id);
        let receiver = self
            .queues
            .entry(request_id.to_string())
            .or_insert_with(RequestQueue::new)
            .receiver
            .take();

        let Some(receiver) = receiver else {
            log::warn!("[PROGRESS] Request {} already has a subscriber", request_id);
            let frame = ProgressEvent::stream_complete("already_subscribed").to_sse_frame();
            return stream::iter(vec![frame]).boxed();
        };

        log::info!("[PROGRESS] Subscriber attached to request {}", request_id);
        let subscription = Subscription {
            receiver,
            _guard: QueueGuard {
                queues: self.queues.clone(),
                closed: self.closed.clone(),
                request_id: request_id.to_string(),
            },
            heartbeat: self.heartbeat,
            max_idle_heartbeats: self.max_idle_heartbeats,
            idle_heartbeats: 0,
            finished: false,
        };

        stream::unfold(subscription, |mut sub| async move {
            if sub.finished {
                return None;
            }

            let event = match tokio::time::timeout(sub.heartbeat, sub.receiver.recv()).await {
                Ok(Some(event)) => {
                    sub.idle_heartbeats = 0;
                    event
                }
                Ok(None) => ProgressEvent::stream_complete("closed"),
                Err(_) => {
                    sub.idle_heartbeats += 1;
                    if sub.idle_heartbeats >= sub.max_idle_heartbeats {
                        log::warn!("[PROGRESS] Stream idle for {} heartbeats, closing", sub.idle_heartbeats);
                        ProgressEvent::stream_complete("idle_timeout")
                    } else {
                        ProgressEvent::heartbeat()
                    }
                }
            };

            if event.is_terminal() {
                sub.finished = true;
            }
            Some((event.to_sse_frame(), sub))
        })
        .boxed()
    }

    /// Drop queues nobody subscribed to within `max_age` and forget request
    /// ids closed longer ago than that; returns how many queues were removed
    pub fn purge_stale(&self, max_age: Duration) -> usize {
        self.closed.retain(|_, closed_at| closed_at.elapsed() < max_age);
        let before = self.queues.len();
        self.queues
            .retain(|_, queue| queue.receiver.is_none() || queue.created_at.elapsed() < max_age);
        let removed = before.saturating_sub(self.queues.len());
        if removed > 0 {
            log::info!("[PROGRESS] Purged {} stale queues", removed);
        }
        removed
    }

    /// Number of live request queues
    pub fn active_streams(&self) -> usize {
        self.queues.len()
    }

    pub fn has_queue(&self, request_id: &str) -> bool {
        self.queues.contains_key(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parse(frame: &str) -> ProgressEvent {
        serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap()
    }

    #[tokio::test]
    async fn test_stream_ends_on_stream_complete_and_cleans_up() {
        let hub = ProgressHub::default();
        hub.emit_flow_start("req-1", "price of btc");
        hub.emit_subtask_dispatch("req-1", 0, "Get BTC price", &["crypto_data".to_string()]);
        hub.emit_final_complete("req-1", "BTC is $64k", None);
        assert!(hub.has_queue("req-1"));

        let frames: Vec<String> = hub.event_stream("req-1").collect().await;
        let types: Vec<EventType> = frames.iter().map(|f| parse(f).event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::FlowStart,
                EventType::SubtaskDispatch,
                EventType::FinalComplete,
                EventType::StreamComplete
            ]
        );
        assert!(!hub.has_queue("req-1"));
        assert_eq!(hub.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_before_producer() {
        let hub = ProgressHub::default();
        let stream = hub.event_stream("req-2");

        let producer = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.emit_synthesis_start("req-2", 2);
            producer.emit_stream_complete("req-2", "completed");
        });

        let frames: Vec<String> = stream.collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(parse(&frames[0]).event_type, EventType::SynthesisStart);
        assert!(!hub.has_queue("req-2"));
    }

    #[tokio::test]
    async fn test_idle_stream_heartbeats_then_times_out() {
        let hub = ProgressHub::new(Duration::from_millis(10), 3);
        let frames: Vec<String> = hub.event_stream("req-3").collect().await;

        let events: Vec<ProgressEvent> = frames.iter().map(|f| parse(f)).collect();
        assert_eq!(events.len(), 3);
        assert!(events[0].is_heartbeat());
        assert!(events[1].is_heartbeat());
        assert_eq!(events[2].event_type, EventType::StreamComplete);
        assert_eq!(events[2].data["reason"], Value::from("idle_timeout"));
        assert!(!hub.has_queue("req-3"));
    }

    #[tokio::test]
    async fn test_dropping_stream_early_removes_queue() {
        let hub = ProgressHub::default();
        hub.emit_flow_start("req-4", "hi");
        let mut stream = hub.event_stream("req-4");
        let first = stream.next().await.unwrap();
        assert_eq!(parse(&first).event_type, EventType::FlowStart);
        assert!(hub.has_queue("req-4"));

        drop(stream);
        assert!(!hub.has_queue("req-4"));
    }

    #[tokio::test]
    async fn test_events_after_disconnect_are_discarded() {
        let hub = ProgressHub::default();
        hub.emit_flow_start("req-6", "hi");
        let mut stream = hub.event_stream("req-6");
        stream.next().await.unwrap();
        drop(stream);

        hub.emit_subtask_dispatch("req-6", 0, "Get BTC price", &["crypto_data".to_string()]);
        hub.emit_final_complete("req-6", "BTC is $64k", None);
        assert!(!hub.has_queue("req-6"));
        assert_eq!(hub.active_streams(), 0);

        assert_eq!(hub.purge_stale(Duration::ZERO), 0);
        hub.emit_flow_start("req-6", "again");
        assert!(hub.has_queue("req-6"));
    }

    #[tokio::test]
    async fn test_resubscribing_reopens_closed_request() {
        let hub = ProgressHub::default();
        hub.emit_final_complete("req-7", "done", None);
        let frames: Vec<String> = hub.event_stream("req-7").collect().await;
        assert_eq!(frames.len(), 2);

        let stream = hub.event_stream("req-7");
        hub.emit_final_complete("req-7", "done again", None);
        let frames: Vec<String> = stream.collect().await;
        assert_eq!(parse(&frames[0]).data["final_answer"], Value::from("done again"));
    }

    #[tokio::test]
    async fn test_second_subscriber_is_turned_away() {
        let hub = ProgressHub::default();
        let _first = hub.event_stream("req-5");
        let frames: Vec<String> = hub.event_stream("req-5").collect().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(parse(&frames[0]).data["reason"], Value::from("already_subscribed"));
        assert!(hub.has_queue("req-5"));
    }

    #[test]
    fn test_purge_stale_only_drops_unsubscribed() {
        let hub = ProgressHub::default();
        hub.emit_flow_start("orphan", "hi");
        let _live = hub.event_stream("live");

        assert_eq!(hub.purge_stale(Duration::ZERO), 1);
        assert!(!hub.has_queue("orphan"));
        assert!(hub.has_queue("live"));
    }
}
