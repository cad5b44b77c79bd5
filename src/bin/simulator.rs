use clap::{App, Arg};
use pypilot_bridge::protocol::{
    parse_assignment, KEY_ENABLED, KEY_HEADING, KEY_HEADING_COMMAND, KEY_MODE, KEY_SERVO_COMMAND,
    KEY_TACK_DIRECTION, MAX_TARGET_DEGREES, MIN_TARGET_DEGREES, UPDATE_EVENT, VALUES_EVENT,
};
use pypilot_bridge::transport::EventFrame;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: &str = "8000";
const UPDATE_BROADCAST_BUFFER_SIZE: usize = 256;
const HEADING_INTERVAL_MS: u64 = 1000;
const TACK_ANGLE_DEGREES: f64 = 100.0;
const MODES: [&str; 4] = ["compass", "gps", "wind", "true wind"];

/// What the simulated daemon knows about its autopilot.
#[derive(Debug)]
struct DaemonState {
    heading: f64,
    heading_command: Option<f64>,
    enabled: bool,
    mode: String,
    servo_command: i64,
}

impl DaemonState {
    fn new() -> Self {
        Self {
            heading: 180.0,
            heading_command: None,
            enabled: false,
            mode: MODES[0].to_string(),
            servo_command: 0,
        }
    }

    fn value_of(&self, key: &str) -> Option<Value> {
        match key {
            KEY_HEADING => Some(json!(self.heading)),
            KEY_HEADING_COMMAND => Some(self.heading_command.map_or(Value::Bool(false), Value::from)),
            KEY_ENABLED => Some(json!(self.enabled)),
            KEY_MODE => Some(json!(self.mode)),
            _ => None,
        }
    }

    /// Apply a `key=value` set, returning the values that changed.
    fn apply(&mut self, key: &str, value: &Value) -> Vec<(String, Value)> {
        let mut changed = Vec::new();

        match (key, value) {
            (KEY_ENABLED, Value::Bool(enabled)) => {
                if *enabled && self.heading_command.is_none() {
                    self.heading_command = Some(self.heading.round());
                    changed.push((KEY_HEADING_COMMAND.to_string(), json!(self.heading.round())));
                }
                if self.enabled != *enabled {
                    self.enabled = *enabled;
                    changed.push((KEY_ENABLED.to_string(), json!(enabled)));
                }
            }
            (KEY_MODE, Value::String(mode)) if MODES.contains(&mode.as_str()) => {
                if self.mode != *mode {
                    self.mode = mode.clone();
                    changed.push((KEY_MODE.to_string(), json!(mode)));
                }
            }
            (KEY_HEADING_COMMAND, Value::Number(n)) => {
                if let Some(target) = n.as_f64() {
                    let target = target.clamp(MIN_TARGET_DEGREES, MAX_TARGET_DEGREES);
                    self.heading_command = Some(target);
                    changed.push((KEY_HEADING_COMMAND.to_string(), json!(target)));
                }
            }
            (KEY_TACK_DIRECTION, Value::String(direction)) => {
                info!("⛵ Tack to {}", direction);
                if let Some(target) = self.heading_command {
                    let turn = if direction == "port" { -TACK_ANGLE_DEGREES } else { TACK_ANGLE_DEGREES };
                    let target = (target + turn).rem_euclid(360.0);
                    self.heading_command = Some(target);
                    changed.push((KEY_HEADING_COMMAND.to_string(), json!(target)));
                }
            }
            (KEY_SERVO_COMMAND, Value::Number(n)) => {
                self.servo_command = n.as_i64().unwrap_or_default();
                info!("⚙️  Servo command {}", self.servo_command);
            }
            _ => warn!("Ignoring {}={}", key, value),
        }

        changed
    }

    /// Steer a little toward the target, or wander when disengaged.
    fn drift(&mut self) -> f64 {
        let step = match (self.enabled, self.heading_command) {
            (true, Some(target)) => ((target - self.heading + 540.0).rem_euclid(360.0) - 180.0).clamp(-3.0, 3.0),
            _ => 0.5,
        };
        self.heading = ((self.heading + step + f64::from(self.servo_command as i32) * 2.0).rem_euclid(360.0) * 10.0).round() / 10.0;
        self.heading
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("pypilot-simulator")
        .version("0.1.0")
        .author("Marine Systems Engineering Team")
        .about("🧭 Mock pypilot daemon speaking the bridge's line-framed protocol")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port to listen on")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;

    println!("🧭 Mock PyPilot Daemon");
    println!("======================");

    let daemon = Arc::new(Mutex::new(DaemonState::new()));
    let (update_tx, _) = broadcast::channel(UPDATE_BROADCAST_BUFFER_SIZE);

    let tcp_daemon = Arc::clone(&daemon);
    let tcp_update_tx = update_tx.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(port, tcp_daemon, tcp_update_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let mut interval = time::interval(Duration::from_millis(HEADING_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let heading = daemon.lock().await.drift();
                // No receivers is fine: nobody is connected yet.
                let _ = update_tx.send((KEY_HEADING.to_string(), json!(heading)));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tcp_server.abort();
    println!("🧭 Mock PyPilot daemon stopped");

    Ok(())
}

async fn start_tcp_server(
    port: u16,
    daemon: Arc<Mutex<DaemonState>>,
    update_tx: broadcast::Sender<(String, Value)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("🌐 Listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 Bridge connected: {}", addr);
                let client_daemon = Arc::clone(&daemon);
                let client_update_tx = update_tx.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_daemon, client_update_tx).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("🔌 Bridge {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn write_frame(
    writer: &Mutex<OwnedWriteHalf>,
    event: &str,
    payload: &Value,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut line = EventFrame::new(event, payload.to_string()).to_line()?;
    line.push('\n');
    writer.lock().await.write_all(line.as_bytes()).await?;
    Ok(())
}

fn update_payload(key: &str, value: Value) -> Value {
    let mut fields = Map::new();
    fields.insert(key.to_string(), value);
    Value::Object(fields)
}

async fn handle_client(
    stream: TcpStream,
    daemon: Arc<Mutex<DaemonState>>,
    update_tx: broadcast::Sender<(String, Value)>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let writer = Arc::new(Mutex::new(writer));
    let watched: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let announcement = json!({
        KEY_MODE: { "choices": MODES },
        KEY_ENABLED: { "type": "BooleanProperty" },
        KEY_HEADING_COMMAND: { "type": "HeadingProperty", "min_value": MIN_TARGET_DEGREES, "max_value": MAX_TARGET_DEGREES },
    });
    write_frame(&writer, VALUES_EVENT, &announcement).await?;

    // Forward changes to the values this client watches
    let mut update_rx = update_tx.subscribe();
    let update_writer = Arc::clone(&writer);
    let update_watched = Arc::clone(&watched);
    let update_task = tokio::spawn(async move {
        loop {
            let (key, value) = match update_rx.recv().await {
                Ok(update) => update,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Update stream lagged by {}", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !update_watched.lock().await.contains(&key) {
                continue;
            }
            if let Err(e) = write_frame(&update_writer, UPDATE_EVENT, &update_payload(&key, value)).await {
                warn!("Failed to send update: {}", e);
                break;
            }
        }
    });

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let frame = match EventFrame::from_line(&line) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to parse frame: {}", e);
                continue;
            }
        };
        if frame.event() != UPDATE_EVENT {
            debug!("Ignoring event {}", frame.event());
            continue;
        }

        let (key, value) = match parse_assignment(frame.payload()) {
            Ok(assignment) => assignment,
            Err(e) => {
                error!("Failed to parse assignment: {}", e);
                continue;
            }
        };
        info!("📨 {}={}", key, value);

        if key == "watch" {
            let Value::Object(keys) = value else { continue };
            for watch_key in keys.keys() {
                watched.lock().await.insert(watch_key.clone());
                let current = daemon.lock().await.value_of(watch_key);
                if let Some(current) = current {
                    write_frame(&writer, UPDATE_EVENT, &update_payload(watch_key, current)).await?;
                }
            }
            continue;
        }

        let changed = daemon.lock().await.apply(key, &value);
        for update in changed {
            let _ = update_tx.send(update);
        }
    }

    update_task.abort();
    Ok(())
}
