use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use simkernel::{Notification, NotificationKind, Payload};

use crate::Time;

/// Time-weighted average of a piecewise constant signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWeighted {
    origin: f64,
    last_time: f64,
    value: f64,
    area: f64,
}

impl TimeWeighted {
    /// Starts observing at `time` with the signal at `value`.
    #[must_use]
    pub fn new(time: f64, value: f64) -> Self {
        Self {
            origin: time,
            last_time: time,
            value,
            area: 0.0,
        }
    }

    /// Records that the signal changed to `value` at `time`.
    pub fn update(&mut self, time: f64, value: f64) {
        self.area += self.value * (time - self.last_time);
        self.last_time = time;
        self.value = value;
    }

    /// Forgets the history, keeping the current value, as if observation started at `time`.
    pub fn reset(&mut self, time: f64) {
        self.origin = time;
        self.last_time = time;
        self.area = 0.0;
    }

    /// Current value of the signal.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Average over `[origin, until]`, or `None` if the window is empty.
    #[must_use]
    pub fn mean(&self, until: f64) -> Option<f64> {
        let span = until - self.origin;
        if span > 0.0 {
            Some((self.area + self.value * (until - self.last_time)) / span)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ResourceStats {
    utilization: TimeWeighted,
    queue: TimeWeighted,
    max_queue: usize,
}

impl ResourceStats {
    fn new(time: f64) -> Self {
        Self {
            utilization: TimeWeighted::new(time, 0.0),
            queue: TimeWeighted::new(time, 0.0),
            max_queue: 0,
        }
    }

    fn reset(&mut self, time: f64) {
        self.utilization.reset(time);
        self.queue.reset(time);
        // Queue length can only be a whole number of requests.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            self.max_queue = self.queue.value() as usize;
        }
    }
}

/// Summary of a resource over the observation window.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSummary {
    /// Resource name.
    pub resource: String,
    /// Mean fraction of capacity claimed.
    pub utilization: Option<f64>,
    /// Mean number of waiting requests.
    pub mean_queue_length: Option<f64>,
    /// Maximum number of waiting requests.
    pub max_queue_length: usize,
}

/// Collects resource statistics from simulator notifications.
///
/// Everything collected so far is discarded when the `WARMUP` notification arrives.
#[derive(Debug, Default)]
pub struct Statistics {
    resources: Mutex<BTreeMap<Arc<str>, ResourceStats>>,
}

impl Statistics {
    fn resources(&self) -> MutexGuard<'_, BTreeMap<Arc<str>, ResourceStats>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts observing an idle resource at `time`.
    pub fn track(&self, resource: &str, time: Time) {
        self.resources()
            .insert(Arc::from(resource), ResourceStats::new(time.into_inner()));
    }

    /// Notification kinds [`Statistics::record`] reacts to.
    #[must_use]
    pub fn kinds() -> [NotificationKind; 3] {
        [
            NotificationKind::ResourceUtilizationChanged,
            NotificationKind::QueueLengthChanged,
            NotificationKind::Warmup,
        ]
    }

    /// Updates the statistics.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&self, notification: &Notification<Time>) {
        let time = notification.time.into_inner();
        let mut resources = self.resources();
        match &notification.payload {
            Payload::Utilization {
                resource,
                claimed,
                capacity,
            } => {
                let utilization = if *capacity > 0.0 { claimed / capacity } else { 0.0 };
                resources
                    .entry(Arc::clone(resource))
                    .or_insert_with(|| ResourceStats::new(time))
                    .utilization
                    .update(time, utilization);
            }
            Payload::QueueLength { resource, length } => {
                let stats = resources
                    .entry(Arc::clone(resource))
                    .or_insert_with(|| ResourceStats::new(time));
                stats.queue.update(time, *length as f64);
                stats.max_queue = stats.max_queue.max(*length);
            }
            _ if notification.kind == NotificationKind::Warmup => {
                for stats in resources.values_mut() {
                    stats.reset(time);
                }
            }
            _ => {}
        }
    }

    /// Summaries of all observed resources, with the window closed at `until`.
    #[must_use]
    pub fn summary(&self, until: Time) -> Vec<ResourceSummary> {
        let until = until.into_inner();
        self.resources()
            .iter()
            .map(|(name, stats)| ResourceSummary {
                resource: name.to_string(),
                utilization: stats.utilization.mean(until),
                mean_queue_length: stats.queue.mean(until),
                max_queue_length: stats.max_queue,
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::approx_eq;
    use ordered_float::OrderedFloat;

    fn notification(kind: NotificationKind, time: f64, payload: Payload) -> Notification<Time> {
        Notification {
            kind,
            time: OrderedFloat(time),
            payload,
        }
    }

    fn utilization(time: f64, claimed: f64) -> Notification<Time> {
        notification(
            NotificationKind::ResourceUtilizationChanged,
            time,
            Payload::Utilization {
                resource: Arc::from("server"),
                claimed,
                capacity: 2.0,
            },
        )
    }

    fn queue(time: f64, length: usize) -> Notification<Time> {
        notification(
            NotificationKind::QueueLengthChanged,
            time,
            Payload::QueueLength {
                resource: Arc::from("server"),
                length,
            },
        )
    }

    #[test]
    fn test_time_weighted() {
        let mut signal = TimeWeighted::new(0.0, 0.0);
        assert_eq!(signal.mean(0.0), None);
        signal.update(1.0, 2.0);
        signal.update(3.0, 1.0);
        assert!(approx_eq!(f64, signal.mean(4.0).unwrap(), 5.0 / 4.0));
        signal.reset(4.0);
        assert_eq!(signal.value(), 1.0);
        assert!(approx_eq!(f64, signal.mean(6.0).unwrap(), 1.0));
    }

    #[test]
    fn test_statistics() {
        let stats = Statistics::default();
        stats.track("server", OrderedFloat(0.0));
        stats.track("idle", OrderedFloat(0.0));
        stats.record(&utilization(1.0, 1.0));
        stats.record(&utilization(2.0, 2.0));
        stats.record(&queue(2.0, 1));
        stats.record(&queue(2.5, 2));
        stats.record(&queue(3.0, 0));
        stats.record(&notification(NotificationKind::TimeChanged, 3.5, Payload::None));
        let summary = stats.summary(OrderedFloat(4.0));
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].resource, "idle");
        assert_eq!(summary[0].utilization, Some(0.0));
        let server = &summary[1];
        assert!(approx_eq!(f64, server.utilization.unwrap(), (0.5 + 2.0) / 4.0));
        assert!(approx_eq!(f64, server.mean_queue_length.unwrap(), (0.5 + 1.0) / 4.0));
        assert_eq!(server.max_queue_length, 2);
    }

    #[test]
    fn test_warmup_resets() {
        let stats = Statistics::default();
        stats.track("server", OrderedFloat(0.0));
        stats.record(&utilization(0.0, 2.0));
        stats.record(&queue(1.0, 3));
        stats.record(&notification(NotificationKind::Warmup, 2.0, Payload::None));
        stats.record(&queue(3.0, 1));
        let server = &stats.summary(OrderedFloat(4.0))[0];
        assert!(approx_eq!(f64, server.utilization.unwrap(), 1.0));
        assert!(approx_eq!(f64, server.mean_queue_length.unwrap(), (3.0 + 1.0) / 2.0));
        assert_eq!(server.max_queue_length, 3);
    }
}
