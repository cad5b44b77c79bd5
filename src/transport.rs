use crate::connection::{Channel, ChannelError, ChannelEvent, ChannelId, Connector, Endpoint, TaggedEvent};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// One line on the wire: `["<event>", "<payload>"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFrame(pub String, pub String);

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: impl Into<String>) -> Self {
        Self(event.into(), payload.into())
    }

    pub fn event(&self) -> &str {
        &self.0
    }

    pub fn payload(&self) -> &str {
        &self.1
    }

    /// Serialized frame without the trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Opens [`TcpChannel`]s on the current tokio runtime. Each channel's task
/// reconnects on its own and reports on the shared `events` sender under its
/// own channel id.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    events: mpsc::UnboundedSender<TaggedEvent>,
    reconnect_interval: Duration,
}

impl TcpConnector {
    pub fn new(events: mpsc::UnboundedSender<TaggedEvent>, reconnect_interval: Duration) -> Self {
        Self {
            events,
            reconnect_interval,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self, endpoint: &Endpoint, channel: ChannelId) -> Result<Box<dyn Channel>, ChannelError> {
        if endpoint.host.trim().is_empty() || endpoint.port == 0 {
            return Err(ChannelError::Unavailable(format!("invalid endpoint '{endpoint}'")));
        }
        let handle = Handle::try_current()
            .map_err(|_| ChannelError::Unavailable("no async runtime available".to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = handle.spawn(run_connection(
            endpoint.clone(),
            EventSink {
                channel,
                events: self.events.clone(),
            },
            outbound_rx,
            self.reconnect_interval,
        ));

        Ok(Box::new(TcpChannel {
            outbound: outbound_tx,
            task,
        }))
    }
}

pub struct TcpChannel {
    outbound: mpsc::UnboundedSender<EventFrame>,
    task: JoinHandle<()>,
}

impl Channel for TcpChannel {
    fn emit(&mut self, event: &str, payload: &str) -> Result<(), ChannelError> {
        self.outbound
            .send(EventFrame::new(event, payload))
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self) {
        self.task.abort();
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Stamps everything a connection task reports with its channel id.
struct EventSink {
    channel: ChannelId,
    events: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    /// Returns `false` once nobody is listening.
    fn report(&self, event: ChannelEvent) -> bool {
        self.events.send(TaggedEvent::new(self.channel, event)).is_ok()
    }
}

enum PumpExit {
    /// Socket closed or failed; try again.
    Disconnected,
    /// Nobody is listening any more.
    Finished,
}

async fn run_connection(
    endpoint: Endpoint,
    sink: EventSink,
    mut outbound: mpsc::UnboundedReceiver<EventFrame>,
    reconnect_interval: Duration,
) {
    loop {
        match TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await {
            Ok(stream) => {
                info!(endpoint = %endpoint, channel = sink.channel, "TCP connection established");

                // Frames queued while the socket was down are stale.
                let mut dropped = 0u32;
                while outbound.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    debug!(dropped, "Discarded frames queued while disconnected");
                }

                if !sink.report(ChannelEvent::Connected) {
                    return;
                }
                match pump(stream, &sink, &mut outbound).await {
                    PumpExit::Disconnected => {
                        if !sink.report(ChannelEvent::Closed) {
                            return;
                        }
                    }
                    PumpExit::Finished => return,
                }
            }
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "TCP connect failed");
                if !sink.report(ChannelEvent::ConnectError(e.to_string())) {
                    return;
                }
            }
        }

        sleep(reconnect_interval).await;
    }
}

async fn pump(
    stream: TcpStream,
    sink: &EventSink,
    outbound: &mut mpsc::UnboundedReceiver<EventFrame>,
) -> PumpExit {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match EventFrame::from_line(&line) {
                        Ok(EventFrame(event, payload)) => {
                            if !sink.report(ChannelEvent::Message { event, payload }) {
                                return PumpExit::Finished;
                            }
                        }
                        Err(e) => warn!(error = %e, "Dropping unreadable frame"),
                    }
                }
                Ok(None) => {
                    info!("TCP connection closed by peer");
                    return PumpExit::Disconnected;
                }
                Err(e) => {
                    warn!(error = %e, "TCP read failed");
                    return PumpExit::Disconnected;
                }
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let mut line = match frame.to_line() {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(error = %e, "Unable to serialize frame");
                            continue;
                        }
                    };
                    line.push('\n');
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        warn!(error = %e, "TCP write failed");
                        return PumpExit::Disconnected;
                    }
                }
                None => return PumpExit::Finished,
            },
        }
    }
}
