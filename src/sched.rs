//! Outbound send scheduling and flood control.
//!
//! All writes to the connection flow through a single writer task, which owns
//! the socket's write half. Throttled sends go through the scheduler task
//! first: it computes a per-target delay ladder and releases messages to the
//! writer in due-time order, with submission order preserved per target.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use shrike_proto::{IStr, Message, TransportWriter};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::ClientError;

/// Flood-control policy. The delay for the n-th consecutive message to a
/// target is `min(n * unit_delay, max_delay)`; the counter resets after
/// `idle_reset` without a send to that target.
#[derive(Debug, Clone)]
pub struct FloodPolicy {
    /// Per-consecutive-message delay step.
    pub unit_delay: Duration,
    /// Upper bound for a single message's delay.
    pub max_delay: Duration,
    /// Idle time after which a target's consecutive counter resets.
    pub idle_reset: Duration,
}

impl Default for FloodPolicy {
    fn default() -> Self {
        FloodPolicy {
            unit_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1500),
            idle_reset: Duration::from_secs(5),
        }
    }
}

/// A delayed outbound message, ordered by due time with an insertion
/// sequence number as the deterministic tie-breaker.
struct Entry {
    due: Instant,
    seq: u64,
    message: Message,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Handle for submitting messages to the connection's send path.
///
/// Cloneable and cheap; every part of the system that wants to write to the
/// socket goes through one of these, which is what keeps outbound ordering
/// coherent.
#[derive(Clone)]
pub struct Outbox {
    raw_tx: mpsc::UnboundedSender<Message>,
    sched_tx: Option<mpsc::UnboundedSender<(IStr, Message)>>,
}

impl Outbox {
    /// Build an outbox over the writer channel and optional scheduler.
    #[must_use]
    pub fn new(
        raw_tx: mpsc::UnboundedSender<Message>,
        sched_tx: Option<mpsc::UnboundedSender<(IStr, Message)>>,
    ) -> Self {
        Outbox { raw_tx, sched_tx }
    }

    /// Send a message directly, bypassing flood control.
    ///
    /// Validation failures surface here, before any bytes move.
    pub fn send_raw(&self, message: Message) -> Result<(), ClientError> {
        message.validate()?;
        self.raw_tx
            .send(message)
            .map_err(|_| ClientError::Closed)
    }

    /// Send a message through the flood-control path.
    ///
    /// Falls back to a direct send when flood control is disabled.
    pub fn send_scheduled(&self, target: IStr, message: Message) -> Result<(), ClientError> {
        message.validate()?;
        match &self.sched_tx {
            Some(tx) => tx
                .send((target, message))
                .map_err(|_| ClientError::Closed),
            None => self
                .raw_tx
                .send(message)
                .map_err(|_| ClientError::Closed),
        }
    }
}

/// Spawn the writer task that owns the write half of the connection.
///
/// The task drains its queue until every sender is dropped or a write fails.
pub fn spawn_writer(mut writer: TransportWriter) -> mpsc::UnboundedSender<Message> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            trace!(%message, "writing");
            if let Err(e) = writer.write_message(message).await {
                debug!(error = %e, "writer task ending");
                break;
            }
        }
    });
    tx
}

/// Spawn the scheduler control loop.
///
/// The loop wakes on new submissions or on the earliest due time, whichever
/// comes first, and exits when every submitter or the writer goes away.
pub fn spawn_scheduler(
    policy: FloodPolicy,
    out: mpsc::UnboundedSender<Message>,
) -> mpsc::UnboundedSender<(IStr, Message)> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(scheduler_loop(policy, rx, out));
    tx
}

async fn scheduler_loop(
    policy: FloodPolicy,
    mut rx: mpsc::UnboundedReceiver<(IStr, Message)>,
    out: mpsc::UnboundedSender<Message>,
) {
    let mut queue: BinaryHeap<Reverse<Entry>> = BinaryHeap::new();
    // target -> (time of the most recently scheduled send, consecutive count)
    let mut throttle: HashMap<IStr, (Instant, u32)> = HashMap::new();
    let mut seq: u64 = 0;

    loop {
        let wake = queue.peek().map(|Reverse(e)| e.due);
        // The fallback instant is never awaited: the branch is disabled
        // whenever the queue is empty.
        let fallback = Instant::now() + Duration::from_secs(3600);

        tokio::select! {
            submission = rx.recv() => {
                let Some((target, message)) = submission else {
                    break;
                };
                let now = Instant::now();
                let (base, consecutive) = match throttle.get(&target) {
                    Some(&(last, count)) => {
                        let count = if now.duration_since(last) >= policy.idle_reset {
                            0
                        } else {
                            count
                        };
                        (last.max(now), count)
                    }
                    None => (now, 0),
                };
                let delay = (policy.unit_delay * consecutive).min(policy.max_delay);
                let due = base + delay;
                throttle.insert(target, (due, consecutive + 1));
                queue.push(Reverse(Entry { due, seq, message }));
                seq += 1;
            }
            _ = time::sleep_until(wake.unwrap_or(fallback)), if wake.is_some() => {
                if let Some(Reverse(entry)) = queue.pop() {
                    if out.send(entry.message).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(tx: &mpsc::UnboundedSender<(IStr, Message)>, target: &str, text: &str) {
        tx.send((IStr::from(target), Message::privmsg(target, text)))
            .unwrap();
    }

    async fn collect(
        rx: &mut mpsc::UnboundedReceiver<Message>,
        n: usize,
        start: Instant,
    ) -> Vec<(Duration, String)> {
        let mut seen = Vec::new();
        for _ in 0..n {
            let msg = rx.recv().await.unwrap();
            seen.push((start.elapsed(), msg.args[1].clone()));
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_delay_ladder() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let tx = spawn_scheduler(FloodPolicy::default(), out_tx);
        let start = Instant::now();

        for i in 0..5 {
            submit(&tx, "#chan", &format!("m{i}"));
        }

        let seen = collect(&mut out_rx, 5, start).await;

        // Submission order is preserved.
        let texts: Vec<&str> = seen.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);

        // Due times accumulate deltas of 0, 0.1, 0.2, 0.3, 0.4 seconds.
        let expected = [0u64, 100, 300, 600, 1000];
        for ((elapsed, _), want_ms) in seen.iter().zip(expected) {
            let want = Duration::from_millis(want_ms);
            assert!(
                *elapsed >= want && *elapsed < want + Duration::from_millis(50),
                "elapsed {elapsed:?}, wanted about {want:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_caps_at_max() {
        let policy = FloodPolicy::default();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let tx = spawn_scheduler(policy.clone(), out_tx);
        let start = Instant::now();

        for i in 0..20 {
            submit(&tx, "#chan", &format!("m{i}"));
        }

        let seen = collect(&mut out_rx, 20, start).await;
        let mut prev = Duration::ZERO;
        for (elapsed, _) in &seen {
            let gap = elapsed.saturating_sub(prev);
            assert!(
                gap <= policy.max_delay + Duration::from_millis(50),
                "gap {gap:?} exceeds cap"
            );
            prev = *elapsed;
        }
        // The 16th message onward is fully capped; total time reflects it.
        assert!(seen.last().unwrap().0 >= Duration::from_millis(100 * (1..15).sum::<u64>()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_resets_consecutive_count() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let tx = spawn_scheduler(FloodPolicy::default(), out_tx);

        for i in 0..3 {
            submit(&tx, "#chan", &format!("a{i}"));
        }
        let _ = collect(&mut out_rx, 3, Instant::now()).await;

        // Wait past the idle threshold, then the ladder starts over.
        time::sleep(Duration::from_secs(6)).await;
        let start = Instant::now();
        submit(&tx, "#chan", "fresh");
        let seen = collect(&mut out_rx, 1, start).await;
        assert!(seen[0].0 < Duration::from_millis(50), "got {:?}", seen[0].0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_target_isolation_and_tie_break() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let tx = spawn_scheduler(FloodPolicy::default(), out_tx);
        let start = Instant::now();

        // First submission per target is undelayed; equal due times fall
        // back to insertion order.
        submit(&tx, "#a", "first");
        submit(&tx, "#b", "second");
        submit(&tx, "#a", "third");

        let seen = collect(&mut out_rx, 3, start).await;
        let texts: Vec<&str> = seen.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        // Only the second #a message is delayed.
        assert!(seen[1].0 < Duration::from_millis(50));
        assert!(seen[2].0 >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbox_falls_back_without_scheduler() {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(raw_tx, None);

        outbox
            .send_scheduled(IStr::from("#c"), Message::privmsg("#c", "hi"))
            .unwrap();
        let msg = raw_rx.recv().await.unwrap();
        assert_eq!(msg.args, vec!["#c", "hi"]);
    }

    #[tokio::test]
    async fn test_outbox_rejects_invalid_before_sending() {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(raw_tx, None);

        let bad = Message::new("PRIVMSG", vec!["#c".into(), "a\nb".into()]);
        assert!(matches!(
            outbox.send_raw(bad),
            Err(ClientError::InvalidOutbound(_))
        ));
        assert!(raw_rx.try_recv().is_err());
    }
}
