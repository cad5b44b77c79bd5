use crate::agent::{AutopilotAgent, AutopilotError, AutopilotReply, AutopilotRequest};
use crate::connection::TaggedEvent;
use crate::host::{Host, DEVICE_ID, REGISTRATION};
use crate::protocol::TackDirection;
use crate::scheduler::DodgeHandle;
use crate::state::AutopilotSnapshot;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

const CONTROL_CHANNEL_CAPACITY: usize = 32;

type Reply = Result<AutopilotReply, AutopilotError>;

#[derive(Debug)]
enum Control {
    Request {
        device: String,
        request: AutopilotRequest,
        reply: oneshot::Sender<Reply>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone)]
pub struct AgentHandle {
    control_tx: mpsc::Sender<Control>,
}

impl AgentHandle {
    /// Route a request to `device`. Only the registered device id is served.
    pub async fn request(&self, device: &str, request: AutopilotRequest) -> Reply {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(Control::Request {
                device: device.to_string(),
                request,
                reply,
            })
            .await
            .map_err(|_| AutopilotError::AgentStopped)?;

        rx.await.map_err(|_| AutopilotError::AgentStopped)?
    }

    pub async fn get_data(&self) -> Result<AutopilotSnapshot, AutopilotError> {
        self.request(DEVICE_ID, AutopilotRequest::GetData).await?.into_data()
    }

    pub async fn engage(&self) -> Result<(), AutopilotError> {
        self.dispatch(AutopilotRequest::Engage).await
    }

    pub async fn disengage(&self) -> Result<(), AutopilotError> {
        self.dispatch(AutopilotRequest::Disengage).await
    }

    pub async fn set_state(&self, name: &str) -> Result<(), AutopilotError> {
        self.dispatch(AutopilotRequest::SetState(name.to_string())).await
    }

    pub async fn set_mode(&self, name: &str) -> Result<(), AutopilotError> {
        self.dispatch(AutopilotRequest::SetMode(name.to_string())).await
    }

    pub async fn set_target(&self, radians: f64) -> Result<(), AutopilotError> {
        self.dispatch(AutopilotRequest::SetTarget(radians)).await
    }

    pub async fn adjust_target(&self, delta: f64) -> Result<(), AutopilotError> {
        self.dispatch(AutopilotRequest::AdjustTarget(delta)).await
    }

    pub async fn tack(&self, direction: TackDirection) -> Result<(), AutopilotError> {
        self.dispatch(AutopilotRequest::Tack(direction)).await
    }

    pub async fn gybe(&self, direction: TackDirection) -> Result<(), AutopilotError> {
        self.dispatch(AutopilotRequest::Gybe(direction)).await
    }

    pub async fn dodge(&self, value: Option<f64>) -> Result<Option<DodgeHandle>, AutopilotError> {
        self.request(DEVICE_ID, AutopilotRequest::Dodge(value))
            .await?
            .into_dodge_started()
    }

    pub async fn cancel_dodge(&self) -> Result<bool, AutopilotError> {
        self.request(DEVICE_ID, AutopilotRequest::CancelDodge)
            .await?
            .into_dodge_cancelled()
    }

    /// Stop the runtime; resolves once the agent has shut its channel.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.control_tx.send(Control::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn dispatch(&self, request: AutopilotRequest) -> Result<(), AutopilotError> {
        self.request(DEVICE_ID, request).await.map(|_| ())
    }
}

pub struct AgentRuntime<H: Host> {
    agent: AutopilotAgent<H>,
    events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    control_rx: mpsc::Receiver<Control>,
}

impl<H: Host> AgentRuntime<H> {
    pub fn new(agent: AutopilotAgent<H>, events_rx: mpsc::UnboundedReceiver<TaggedEvent>) -> (Self, AgentHandle) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

        let runtime = Self {
            agent,
            events_rx,
            control_rx,
        };

        (runtime, AgentHandle { control_tx })
    }

    /// Run until shut down (or every handle is dropped), then hand the agent
    /// back.
    pub async fn run(mut self) -> AutopilotAgent<H> {
        info!("Autopilot runtime started");
        let mut events_open = true;

        loop {
            let deadline = self.agent.next_deadline();

            // Due timers first, then daemon events, so a request sees every
            // report queued before it and a busy daemon cannot hold back a dodge.
            tokio::select! {
                biased;
                () = wait_until(deadline) => self.agent.poll_timers(),
                event = self.events_rx.recv(), if events_open => match event {
                    Some(event) => self.agent.handle_tagged_event(event),
                    None => {
                        warn!("Channel event stream ended");
                        events_open = false;
                    }
                },
                control = self.control_rx.recv() => match control {
                    Some(Control::Request { device, request, reply }) => {
                        let result = if REGISTRATION.handles(&device) {
                            self.agent.execute(request)
                        } else {
                            Err(AutopilotError::UnknownDevice(device))
                        };
                        if reply.send(result).is_err() {
                            debug!("Requester went away before the reply");
                        }
                    }
                    Some(Control::Shutdown { done }) => {
                        self.agent.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.agent.shutdown();
                        break;
                    }
                },
            }
        }

        info!("Autopilot runtime stopped");
        self.agent
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
