use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::metrics::PROCTORING_VIOLATIONS_TOTAL;
use crate::models::{ViolationEvent, ViolationKind, ViolationSummary};
use crate::utils::clock::Clock;

/// Append-only record of integrity events for one session.
///
/// Cloning shares the underlying ledger. Counters are atomics so `summarize`
/// never waits on a concurrent `record`. Sequence numbers are assigned under
/// the event lock, so they match insertion order.
#[derive(Clone)]
pub struct ViolationLedger {
    inner: Arc<LedgerInner>,
}

struct LedgerInner {
    clock: Arc<dyn Clock>,
    capacity: Option<usize>,
    events: Mutex<LedgerEvents>,
    frozen: AtomicBool,
    total: AtomicU64,
    absent_subject: AtomicU64,
    multiple_subjects: AtomicU64,
    audio_anomaly: AtomicU64,
    dropped: AtomicU64,
}

struct LedgerEvents {
    next_sequence: u64,
    retained: Vec<ViolationEvent>,
}

impl ViolationLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity_limit(clock, None)
    }

    /// With a limit, the oldest `capacity` events are retained and later ones
    /// are only counted.
    pub fn with_capacity_limit(clock: Arc<dyn Clock>, capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                clock,
                capacity,
                events: Mutex::new(LedgerEvents {
                    next_sequence: 0,
                    retained: Vec::new(),
                }),
                frozen: AtomicBool::new(false),
                total: AtomicU64::new(0),
                absent_subject: AtomicU64::new(0),
                multiple_subjects: AtomicU64::new(0),
                audio_anomaly: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Appends an event stamped with the current time. Returns `None` once the
    /// ledger has been frozen.
    pub fn record(&self, kind: ViolationKind) -> Option<ViolationEvent> {
        if self.inner.frozen.load(Ordering::Acquire) {
            tracing::debug!(kind = kind.as_str(), "ledger frozen, violation ignored");
            return None;
        }

        let event = {
            let mut events = self
                .inner
                .events
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let event = ViolationEvent {
                kind,
                occurred_at: self.inner.clock.now(),
                frame_sequence: events.next_sequence,
            };
            events.next_sequence += 1;

            let keep = self
                .inner
                .capacity
                .map_or(true, |cap| events.retained.len() < cap);
            if keep {
                events.retained.push(event.clone());
            } else {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
            event
        };

        self.counter(kind).fetch_add(1, Ordering::Relaxed);
        self.inner.total.fetch_add(1, Ordering::Release);
        PROCTORING_VIOLATIONS_TOTAL
            .with_label_values(&[kind.as_str()])
            .inc();

        tracing::warn!(
            kind = kind.as_str(),
            sequence = event.frame_sequence,
            "proctoring violation recorded"
        );

        Some(event)
    }

    pub fn summarize(&self) -> ViolationSummary {
        ViolationSummary {
            total: self.inner.total.load(Ordering::Acquire),
            absent_subject: self.inner.absent_subject.load(Ordering::Relaxed),
            multiple_subjects: self.inner.multiple_subjects.load(Ordering::Relaxed),
            audio_anomaly: self.inner.audio_anomaly.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    /// Copy of the retained events in arrival order.
    pub fn events(&self) -> Vec<ViolationEvent> {
        self.inner
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retained
            .clone()
    }

    pub fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    fn counter(&self, kind: ViolationKind) -> &AtomicU64 {
        match kind {
            ViolationKind::AbsentSubject => &self.inner.absent_subject,
            ViolationKind::MultipleSubjects => &self.inner.multiple_subjects,
            ViolationKind::AudioAnomaly => &self.inner.audio_anomaly,
        }
    }
}

impl std::fmt::Debug for ViolationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViolationLedger")
            .field("summary", &self.summarize())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}
