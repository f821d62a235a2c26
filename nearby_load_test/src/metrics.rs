use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;

use crate::utils::epoch_seconds;

pub const LABEL_REGISTER: &str = "register";
pub const LABEL_POSSIBLE_FRIENDS: &str = "possible-friends";
pub const LABEL_FRIENDSHIP: &str = "friendship";
pub const LABEL_ECHO: &str = "ws/echo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Send,
    Recv,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsEvent {
    pub kind: EventKind,
    pub label: &'static str,
    pub latency_micros: u64,
    pub payload_size: usize,
    /// Seconds since the unix epoch at event creation
    pub timestamp: f64,
}

impl MetricsEvent {
    pub fn new(kind: EventKind, label: &'static str, latency: Duration, payload_size: usize) -> Self {
        let latency_micros = latency.as_micros().try_into().unwrap_or(u64::MAX);

        Self::with_latency_micros(kind, label, latency_micros, payload_size)
    }

    pub fn with_latency_micros(
        kind: EventKind,
        label: &'static str,
        latency_micros: u64,
        payload_size: usize,
    ) -> Self {
        Self {
            kind,
            label,
            latency_micros,
            payload_size,
            timestamp: epoch_seconds(SystemTime::now()),
        }
    }
}

/// Destination of events produced by virtual users. Firing never blocks
/// and never fails from the point of view of the caller.
pub trait MetricsSink: Send + Sync {
    fn fire(&self, event: MetricsEvent);
}

/// Forwards events to [`run_event_collector`] running on its own thread
#[derive(Clone)]
pub struct ChannelSink {
    sender: Sender<MetricsEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<MetricsEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();

        (Self { sender }, receiver)
    }
}

impl MetricsSink for ChannelSink {
    fn fire(&self, event: MetricsEvent) {
        if let Err(err) = self.sender.send(event) {
            ::log::debug!("event collector gone, dropping {:?}", err.into_inner());
        }
    }
}

/// Keeps every event in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<MetricsEvent>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<MetricsEvent> {
        self.events.lock().clone()
    }

    pub fn events_with(&self, kind: EventKind, label: &str) -> Vec<MetricsEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind && event.label == label)
            .cloned()
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn fire(&self, event: MetricsEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Default)]
pub struct Statistics {
    pub sent: AtomicUsize,
    pub received: AtomicUsize,
    pub successes: AtomicUsize,
    pub failures: AtomicUsize,
}

impl Statistics {
    fn record(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::Send => &self.sent,
            EventKind::Recv => &self.received,
            EventKind::Success => &self.successes,
            EventKind::Failure => &self.failures,
        };

        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Count events and optionally append them to a file, one JSON object per
/// line. Returns when every sender is dropped.
pub fn run_event_collector(
    receiver: Receiver<MetricsEvent>,
    statistics: &Statistics,
    events_file: Option<&Path>,
) -> anyhow::Result<()> {
    let mut writer = match events_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Couldn't create events file {}", path.display()))?;

            Some(BufWriter::new(file))
        }
        None => None,
    };

    for event in receiver.iter() {
        statistics.record(event.kind);

        if let Some(writer) = writer.as_mut() {
            ::serde_json::to_writer(&mut *writer, &event).context("Couldn't serialize event")?;
            writer.write_all(b"\n").context("Couldn't write event")?;
        }
    }

    if let Some(mut writer) = writer {
        writer.flush().context("Couldn't flush events file")?;
    }

    Ok(())
}
