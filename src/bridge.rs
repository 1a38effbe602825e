use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::congestion::ThresholdSet;
use crate::protocol::{MessageKind, ProtocolError, Reply, ReplyBody, Request, RequestBody};
use crate::transport::{FramedStream, TransportError};

pub const HOST_ENV: &str = "VEINS_GYM_HOST";
pub const PORT_ENV: &str = "VEINS_GYM_PORT";

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge host not configured, set bridge.host or VEINS_GYM_HOST")]
    HostUnresolved,
    #[error("Bridge port not configured, set bridge.port or VEINS_GYM_PORT")]
    PortUnresolved,
    #[error("Invalid bridge port '{0}'")]
    InvalidPort(String),
    #[error("Failed to connect to agent at {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Agent did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Agent sent {0} action values, expected 4")]
    ActionLength(usize),
    #[error("Expected {expected:?} reply, got {got:?}")]
    UnexpectedReply {
        expected: MessageKind,
        got: MessageKind,
    },
    #[error("Reply id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: u64 },
}

/// Resolves the agent endpoint from config, falling back to the environment.
pub fn resolve_endpoint(
    config: &BridgeConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(String, u16), BridgeError> {
    let host = match config.host.as_deref() {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => env(HOST_ENV)
            .filter(|h| !h.is_empty())
            .ok_or(BridgeError::HostUnresolved)?,
    };
    let port = match config.port {
        Some(p) => p,
        None => {
            let raw = env(PORT_ENV).ok_or(BridgeError::PortUnresolved)?;
            raw.trim()
                .parse::<u16>()
                .map_err(|_| BridgeError::InvalidPort(raw))?
        }
    };
    Ok((host, port))
}

/// The single connection to the external agent for one simulation run.
///
/// Owns the thresholds publisher; every node holds a receiver obtained from
/// [`BridgeSession::subscribe`] and reads the latest set on each tick.
pub struct BridgeSession {
    connection: Option<FramedStream>,
    observation_space: String,
    action_space: String,
    timeout: Option<Duration>,
    next_id: u64,
    // Sent but not yet answered; set when an exchange is dropped mid-flight
    in_flight: Option<u64>,
    thresholds: watch::Sender<ThresholdSet>,
    steps: u64,
    shut_down: bool,
}

impl BridgeSession {
    /// A session that never talks to anyone; `initial` stays in force.
    pub fn disabled(initial: ThresholdSet) -> Self {
        let (thresholds, _) = watch::channel(initial);
        Self {
            connection: None,
            observation_space: String::new(),
            action_space: String::new(),
            timeout: None,
            next_id: 0,
            in_flight: None,
            thresholds,
            steps: 0,
            shut_down: false,
        }
    }

    pub async fn connect(
        config: &BridgeConfig,
        initial: ThresholdSet,
    ) -> Result<Self, BridgeError> {
        if !config.enable {
            info!("Control bridge disabled, using local thresholds");
            return Ok(Self::disabled(initial));
        }

        let (host, port) = resolve_endpoint(config, |key| std::env::var(key).ok())?;
        info!("Connecting to agent at tcp://{}:{}", host, port);
        let connection = FramedStream::connect(&host, port)
            .await
            .map_err(|source| BridgeError::Connect {
                addr: format!("{}:{}", host, port),
                source,
            })?;

        let mut session = Self::disabled(initial);
        session.connection = Some(connection);
        session.observation_space = config.observation_space.clone();
        session.action_space = config.action_space.clone();
        session.timeout = (!config.timeout.is_zero()).then_some(config.timeout);
        Ok(session)
    }

    pub fn is_enabled(&self) -> bool {
        self.connection.is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThresholdSet> {
        self.thresholds.subscribe()
    }

    pub fn thresholds(&self) -> ThresholdSet {
        *self.thresholds.borrow()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Init exchange followed by the first Step, which must yield a full
    /// threshold set before the run can start.
    pub async fn init(&mut self, observation: Vec<f64>, reward: Vec<f64>) -> Result<(), BridgeError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let body = RequestBody::Init {
            observation_space: self.observation_space.clone(),
            action_space: self.action_space.clone(),
        };
        // reply carries nothing of interest
        self.communicate(body).await?;

        info!("Asking the agent for the initial thresholds");
        match self.step(observation, reward).await? {
            Some(set) => {
                info!("Agent sent initial thresholds {:?}", set.to_action());
                Ok(())
            }
            None => Err(BridgeError::UnexpectedReply {
                expected: MessageKind::Step,
                got: MessageKind::Empty,
            }),
        }
    }

    /// One Step exchange. Publishes and returns the new thresholds; `None`
    /// when the bridge is disabled.
    pub async fn step(
        &mut self,
        observation: Vec<f64>,
        reward: Vec<f64>,
    ) -> Result<Option<ThresholdSet>, BridgeError> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let reply = self
            .communicate(RequestBody::Step {
                observation,
                reward,
            })
            .await?;
        let action = match reply.body {
            ReplyBody::Step { action } => action,
            _ => {
                return Err(BridgeError::UnexpectedReply {
                    expected: MessageKind::Step,
                    got: reply.kind(),
                });
            }
        };
        let set = ThresholdSet::from_action(&action)
            .ok_or(BridgeError::ActionLength(action.len()))?;

        self.thresholds.send_replace(set);
        self.steps += 1;
        debug!("Agent step {} thresholds {:?}", self.steps, action);
        Ok(Some(set))
    }

    /// Sends Shutdown once; whatever comes back is discarded.
    pub async fn shutdown(&mut self) -> Result<(), BridgeError> {
        if !self.is_enabled() || self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        info!("Sending shutdown to agent");
        match self.communicate(RequestBody::Shutdown).await {
            Ok(_) => Ok(()),
            Err(BridgeError::Transport(TransportError::Closed)) => {
                debug!("Agent closed the connection on shutdown");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// One blocking request/response round trip. A disabled bridge answers
    /// with an empty reply without touching the network.
    ///
    /// Dropping the returned future after the request went out leaves its
    /// reply on the wire; the next call reads and discards it first.
    pub async fn communicate(&mut self, body: RequestBody) -> Result<Reply, BridgeError> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(Reply::empty());
        };
        let limit = self.timeout;

        if let Some(pending) = self.in_flight {
            let stale = within(limit, receive(connection)).await?;
            self.in_flight = None;
            if stale.id != pending {
                return Err(BridgeError::IdMismatch {
                    expected: pending,
                    got: stale.id,
                });
            }
            warn!(
                "Discarded late {:?} reply to abandoned request {}",
                stale.kind(),
                pending
            );
        }

        let request = Request {
            id: self.next_id,
            body,
        };
        self.next_id += 1;

        let packet = request.encode();
        within(limit, async {
            connection.send(&packet).await.map_err(BridgeError::from)
        })
        .await?;
        self.in_flight = Some(request.id);
        let reply = within(limit, receive(connection)).await?;
        self.in_flight = None;

        if reply.id != request.id {
            return Err(BridgeError::IdMismatch {
                expected: request.id,
                got: reply.id,
            });
        }
        if reply.kind() != request.kind() {
            warn!(
                "Agent answered {:?} request with {:?}",
                request.kind(),
                reply.kind()
            );
        }
        Ok(reply)
    }
}

async fn receive(connection: &mut FramedStream) -> Result<Reply, BridgeError> {
    let packet = connection.recv().await?;
    Ok(Reply::decode(packet)?)
}

/// Applies the optional round-trip limit; expiry is fatal.
async fn within<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T, BridgeError>>,
) -> Result<T, BridgeError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| BridgeError::Timeout(limit))?,
        None => fut.await,
    }
}
