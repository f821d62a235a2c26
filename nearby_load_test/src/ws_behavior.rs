use std::sync::Arc;
use std::time::{Instant, SystemTime};

use anyhow::Context;
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use hashbrown::HashMap;
use nearby_protocol::EchoMessage;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::metrics::*;
use crate::scheduler::TaskOutcome;
use crate::utils::{epoch_seconds, round_trip_micros};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Echo messages tracked per session before the oldest are given up on
pub const MAX_OUTSTANDING: usize = 1024;

/// Local send instants of echo messages not yet seen coming back, keyed by
/// [`EchoMessage::correlation_key`]
#[derive(Debug, Default)]
pub struct OutstandingTable {
    sent_at: HashMap<u64, Instant>,
}

impl OutstandingTable {
    /// Track a sent message. When the table is full the message sent
    /// longest ago is evicted first.
    pub fn insert(&mut self, key: u64, sent_at: Instant) {
        if self.sent_at.len() >= MAX_OUTSTANDING && !self.sent_at.contains_key(&key) {
            let oldest = self
                .sent_at
                .iter()
                .min_by_key(|(_, sent_at)| **sent_at)
                .map(|(key, _)| *key);

            if let Some(oldest) = oldest {
                self.sent_at.remove(&oldest);

                ::log::debug!("echo {} never came back, evicted", oldest);
            }
        }

        self.sent_at.insert(key, sent_at);
    }

    pub fn remove(&mut self, key: u64) -> Option<Instant> {
        self.sent_at.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.sent_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent_at.is_empty()
    }

    pub fn clear(&mut self) {
        self.sent_at.clear();
    }
}

pub type OutstandingMessages = Arc<Mutex<OutstandingTable>>;

/// Persistent connection to the echo endpoint. Messages are sent from the
/// task loop while a separate task receives the echoes.
pub struct WsSession {
    user_id: String,
    message: String,
    writer: Option<SplitSink<WsStream, Message>>,
    receiver: Option<JoinHandle<()>>,
    outstanding: OutstandingMessages,
    sink: Arc<dyn MetricsSink>,
}

impl WsSession {
    /// Connect and start receiving
    pub async fn open(
        url: &str,
        user_id: String,
        message: String,
        sink: Arc<dyn MetricsSink>,
    ) -> anyhow::Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("Couldn't connect to {}", url))?;

        let (writer, reader) = stream.split();
        let outstanding = OutstandingMessages::default();

        let receiver = tokio::spawn(run_receive_loop(
            reader,
            outstanding.clone(),
            sink.clone(),
        ));

        ::log::debug!("websocket session for {} open", user_id);

        Ok(Self {
            user_id,
            message,
            writer: Some(writer),
            receiver: Some(receiver),
            outstanding,
            sink,
        })
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn num_outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    /// Send one echo message stamped with the current time. Does not wait
    /// for the echo.
    ///
    /// Returns `Stop` once the session is closed. A failed send closes it.
    pub async fn send_echo(&mut self) -> TaskOutcome {
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return TaskOutcome::Stop,
        };

        let start = Instant::now();

        let echo = EchoMessage {
            message: self.message.clone(),
            user_id: self.user_id.clone(),
            start_at: epoch_seconds(SystemTime::now()),
        };

        let ws_message = match echo.to_ws_message() {
            Ok(ws_message) => ws_message,
            Err(err) => {
                ::log::error!("{:#}", err);

                return TaskOutcome::Continue;
            }
        };

        let key = echo.correlation_key();
        let payload_size = ws_message.len();

        self.outstanding.lock().insert(key, start);

        if let Err(err) = writer.send(ws_message).await {
            ::log::warn!("websocket send for {} failed: {:#}", self.user_id, err);

            self.outstanding.lock().remove(key);
            self.close().await;

            return TaskOutcome::Stop;
        }

        self.sink.fire(MetricsEvent::new(
            EventKind::Send,
            LABEL_ECHO,
            start.elapsed(),
            payload_size,
        ));

        TaskOutcome::Continue
    }

    /// Close the connection and stop receiving. Calling it again does
    /// nothing.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.close().await {
                ::log::debug!("websocket close for {}: {:#}", self.user_id, err);
            }

            ::log::debug!("websocket session for {} closed", self.user_id);
        }
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }

        self.outstanding.lock().clear();
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}

/// Report round-trip latency of every echo frame until the connection
/// closes. Frames that can't be decoded are skipped.
pub async fn run_receive_loop<S>(
    mut reader: S,
    outstanding: OutstandingMessages,
    sink: Arc<dyn MetricsSink>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = reader.next().await {
        let received_at = SystemTime::now();

        let frame = match frame {
            Ok(Message::Close(_)) => break,
            Ok(frame @ (Message::Text(_) | Message::Binary(_))) => frame,
            Ok(_) => continue,
            Err(err) => {
                ::log::warn!("websocket receive failed: {:#}", err);

                break;
            }
        };

        let echo = match EchoMessage::from_ws_message(&frame) {
            Ok(echo) => echo,
            Err(err) => {
                ::log::warn!("skipping echo frame: {:#}", err);

                continue;
            }
        };

        let sent_at = outstanding.lock().remove(echo.correlation_key());

        match sent_at {
            Some(sent_at) => ::log::trace!(
                "echo for {} back after {:?} by local clock",
                echo.user_id,
                sent_at.elapsed()
            ),
            None => ::log::debug!("echo for {} matches no outstanding message", echo.user_id),
        }

        sink.fire(MetricsEvent::with_latency_micros(
            EventKind::Recv,
            LABEL_ECHO,
            round_trip_micros(echo.start_at, received_at),
            frame.len(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;

    use super::*;

    fn echo_frame(start_at: f64) -> Message {
        EchoMessage {
            message: "hello, world".into(),
            user_id: "7".into(),
            start_at,
        }
        .to_ws_message()
        .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_latency_from_embedded_timestamp() {
        let sink = Arc::new(MemorySink::default());
        let outstanding = OutstandingMessages::default();

        let sent_at = SystemTime::now() - Duration::from_millis(250);
        let start_at = epoch_seconds(sent_at);
        let frame = echo_frame(start_at);
        let frame_len = frame.len();

        outstanding
            .lock()
            .insert(start_at.to_bits(), Instant::now());

        run_receive_loop(
            stream::iter(vec![Ok(frame)]),
            outstanding.clone(),
            sink.clone(),
        )
        .await;

        let events = sink.events_with(EventKind::Recv, LABEL_ECHO);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload_size, frame_len);

        let latency = events[0].latency_micros;

        assert!(
            (250_000..300_000).contains(&latency),
            "latency {} outside tolerance",
            latency
        );
        assert!(outstanding.lock().is_empty());
    }

    #[test]
    fn test_outstanding_table_evicts_oldest() {
        let mut table = OutstandingTable::default();
        let start = Instant::now();

        for i in 0..MAX_OUTSTANDING as u64 {
            table.insert(i, start + Duration::from_millis(i));
        }

        assert_eq!(table.len(), MAX_OUTSTANDING);

        // Replacing a tracked key evicts nothing
        table.insert(5, start + Duration::from_millis(5));

        assert_eq!(table.len(), MAX_OUTSTANDING);

        table.insert(u64::MAX, start + Duration::from_secs(60));

        assert_eq!(table.len(), MAX_OUTSTANDING);
        assert_eq!(table.remove(0), None);
        assert!(table.remove(1).is_some());
        assert!(table.remove(u64::MAX).is_some());
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_end_loop() {
        let sink = Arc::new(MemorySink::default());
        let start_at = epoch_seconds(SystemTime::now());

        let frames = vec![
            Ok(Message::Text("not json".into())),
            Ok(Message::Ping(vec![1, 2, 3])),
            Ok(Message::Text(r#"{"message": "no timestamp"}"#.into())),
            Ok(echo_frame(start_at)),
        ];

        run_receive_loop(
            stream::iter(frames),
            OutstandingMessages::default(),
            sink.clone(),
        )
        .await;

        let events = sink.events();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Recv);
        assert!(events[0].latency_micros < 1_000_000);
    }

    #[tokio::test]
    async fn test_loop_ends_on_close_frame() {
        let sink = Arc::new(MemorySink::default());
        let start_at = epoch_seconds(SystemTime::now());

        let frames = vec![
            Ok(echo_frame(start_at)),
            Ok(Message::Close(None)),
            Ok(echo_frame(start_at + 1.0)),
        ];

        run_receive_loop(
            stream::iter(frames),
            OutstandingMessages::default(),
            sink.clone(),
        )
        .await;

        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_loop_ends_on_transport_error() {
        let sink = Arc::new(MemorySink::default());
        let start_at = epoch_seconds(SystemTime::now());

        let frames = vec![
            Err(tungstenite::Error::ConnectionClosed),
            Ok(echo_frame(start_at)),
        ];

        run_receive_loop(
            stream::iter(frames),
            OutstandingMessages::default(),
            sink.clone(),
        )
        .await;

        assert!(sink.events().is_empty());
    }
}
