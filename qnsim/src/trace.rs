use std::io;
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;

use serde::Serialize;
use simkernel::{Notification, NotificationKind, Payload};

use crate::Time;

/// A notification, flattened into a row of the trace file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    /// Replication that published the notification.
    pub replication: usize,
    /// Simulation time.
    pub time: f64,
    /// Notification kind.
    pub kind: NotificationKind,
    /// Human-readable payload.
    pub detail: String,
}

impl TraceRecord {
    /// Flattens `notification` published in the given replication.
    #[must_use]
    pub fn new(replication: usize, notification: &Notification<Time>) -> Self {
        let detail = match &notification.payload {
            Payload::None => String::new(),
            Payload::State(state) => state.to_string(),
            Payload::Utilization {
                resource,
                claimed,
                capacity,
            } => format!("{} {}/{}", resource, claimed, capacity),
            Payload::QueueLength { resource, length } => format!("{} {}", resource, length),
            Payload::Failure {
                event,
                action,
                message,
            } => format!("event {} ({}): {}", event, action, message),
        };
        Self {
            replication,
            time: notification.time.into_inner(),
            kind: notification.kind,
            detail,
        }
    }
}

/// Writes records received from `receiver` to `writer` as CSV on a separate thread.
///
/// The thread finishes once all senders are dropped, and returns the writer.
pub fn write_from_channel<W>(writer: W, receiver: Receiver<TraceRecord>) -> JoinHandle<eyre::Result<W>>
where
    W: io::Write + Send + 'static,
{
    std::thread::spawn(move || {
        let mut writer = csv::Writer::from_writer(writer);
        while let Ok(record) = receiver.recv() {
            writer.serialize(record)?;
        }
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|err| eyre::eyre!("unable to flush trace: {}", err.error()))
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use ordered_float::OrderedFloat;
    use std::sync::mpsc::channel;
    use std::sync::Arc;

    #[test]
    fn test_write_from_channel() -> eyre::Result<()> {
        let (sender, receiver) = channel();
        let handle = write_from_channel(Vec::new(), receiver);
        sender.send(TraceRecord::new(
            0,
            &Notification {
                kind: NotificationKind::QueueLengthChanged,
                time: OrderedFloat(1.5),
                payload: Payload::QueueLength {
                    resource: Arc::from("desk"),
                    length: 2,
                },
            },
        ))?;
        sender.send(TraceRecord::new(
            1,
            &Notification {
                kind: NotificationKind::Warmup,
                time: OrderedFloat(2.0),
                payload: Payload::None,
            },
        ))?;
        drop(sender);
        let written = handle
            .join()
            .map_err(|_| eyre::eyre!("trace writer panicked"))??;
        assert_eq!(
            String::from_utf8(written)?,
            "replication,time,kind,detail\n\
             0,1.5,QUEUE_LENGTH_CHANGED,desk 2\n\
             1,2.0,WARMUP,\n"
        );
        Ok(())
    }
}
