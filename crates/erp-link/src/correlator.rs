//! Request/response correlation with per-request deadlines.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::Error;
use crate::types::Frame;

pub(crate) type Reply = oneshot::Sender<Result<Frame, Error>>;

struct PendingRequest {
    reply: Reply,
    deadline: Instant,
    timeout: Duration,
    created_at: Instant,
}

/// Pending requests keyed by request id.
///
/// Each entry is removed exactly once, by a matching response or by its
/// deadline, so a caller is resolved or rejected at most once. Responses that
/// arrive after removal are handed back to the caller of
/// [`resolve_or_route`](Correlator::resolve_or_route) for generic routing.
#[derive(Default)]
pub(crate) struct Correlator {
    pending: HashMap<String, PendingRequest>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a pending request. Returns the reply sender back if `request_id`
    /// is already pending.
    pub(crate) fn register(
        &mut self,
        request_id: String,
        reply: Reply,
        timeout: Duration,
    ) -> Result<(), Reply> {
        if self.pending.contains_key(&request_id) {
            return Err(reply);
        }
        let now = Instant::now();
        let _ = self.pending.insert(
            request_id,
            PendingRequest {
                reply,
                deadline: now + timeout,
                timeout,
                created_at: now,
            },
        );
        Ok(())
    }

    /// Resolve the pending request matching `frame.request_id`.
    ///
    /// Returns `None` when the frame was consumed, or gives the frame back when
    /// nothing was waiting for it.
    pub(crate) fn resolve_or_route(&mut self, frame: Frame) -> Option<Frame> {
        let Some(pending) = frame
            .request_id
            .as_ref()
            .and_then(|id| self.pending.remove(id))
        else {
            return Some(frame);
        };
        tracing::debug!(
            request_id = ?frame.request_id,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            "Request resolved",
        );
        // The caller may have stopped waiting; the entry is consumed either way.
        let _ = pending.reply.send(Ok(frame));
        None
    }

    /// Earliest deadline among pending requests.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Reject every request whose deadline is at or before `now`.
    pub(crate) fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in &expired {
            if let Some(pending) = self.pending.remove(request_id) {
                tracing::warn!(request_id = %request_id, "Request timed out");
                let _ = pending.reply.send(Err(Error::Timeout {
                    request_id: request_id.clone(),
                    timeout: pending.timeout,
                }));
            }
        }
        expired.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.pending.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: &str) -> Frame {
        Frame {
            request_id: Some(id.to_string()),
            success: Some(true),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn matching_response_resolves_once() {
        let mut correlator = Correlator::new();
        let (tx, rx) = oneshot::channel();
        assert!(
            correlator
                .register("r1".into(), tx, Duration::from_secs(1))
                .is_ok()
        );

        assert!(correlator.resolve_or_route(response("r1")).is_none());
        assert!(!correlator.contains("r1"));
        let resolved = rx.await.unwrap().unwrap();
        assert_eq!(resolved.request_id.as_deref(), Some("r1"));

        // A late duplicate is routed instead of resolving again.
        let routed = correlator.resolve_or_route(response("r1"));
        assert_eq!(routed.unwrap().request_id.as_deref(), Some("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn unmatched_frames_are_routed() {
        let mut correlator = Correlator::new();
        assert!(correlator.resolve_or_route(Frame::new("push")).is_some());
        assert!(correlator.resolve_or_route(response("nobody")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_rejects_with_timeout() {
        let mut correlator = Correlator::new();
        let (tx, rx) = oneshot::channel();
        let _ = correlator.register("slow".into(), tx, Duration::from_millis(50));
        let (tx2, _rx2) = oneshot::channel();
        let _ = correlator.register("later".into(), tx2, Duration::from_secs(5));

        assert_eq!(
            correlator.next_deadline(),
            Some(Instant::now() + Duration::from_millis(50))
        );
        assert_eq!(correlator.expire(Instant::now()), 0);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(correlator.expire(Instant::now()), 1);
        assert_eq!(correlator.ids(), vec!["later".to_string()]);

        match rx.await.unwrap() {
            Err(Error::Timeout { request_id, timeout }) => {
                assert_eq!(request_id, "slow");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        // The late response no longer matches.
        assert!(correlator.resolve_or_route(response("slow")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_id_is_refused() {
        let mut correlator = Correlator::new();
        let (tx, _rx) = oneshot::channel();
        let (dup, _dup_rx) = oneshot::channel();
        assert!(correlator.register("r1".into(), tx, Duration::from_secs(1)).is_ok());
        assert!(correlator.register("r1".into(), dup, Duration::from_secs(1)).is_err());
        assert_eq!(correlator.ids().len(), 1);
    }
}
