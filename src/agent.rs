use rand::Rng;
use rand::rngs::StdRng;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::congestion::ThresholdSet;
use crate::protocol::{Reply, ReplyBody, Request, RequestBody};
use crate::transport::{FramedStream, TransportError};

/// How the trivial agent picks its actions.
pub enum Policy {
    Fixed([f64; ThresholdSet::LEN]),
    /// Uniform samples from `[0, 1)` for every threshold.
    Random(StdRng),
}

impl Policy {
    pub fn action(&mut self) -> Vec<f64> {
        match self {
            Policy::Fixed(values) => values.to_vec(),
            Policy::Random(rng) => (0..ThresholdSet::LEN).map(|_| rng.gen::<f64>()).collect(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionSummary {
    pub steps: u64,
    pub last_id: Option<u64>,
    pub last_observation: Vec<f64>,
    pub last_reward: Vec<f64>,
    pub shut_down: bool,
}

/// Answers requests on one connection until Shutdown or until the node hangs up.
pub async fn serve_session(
    mut conn: FramedStream,
    policy: &mut Policy,
) -> Result<SessionSummary, TransportError> {
    let mut summary = SessionSummary::default();
    loop {
        let packet = match conn.recv().await {
            Ok(p) => p,
            Err(TransportError::Closed) => {
                info!("Node {} disconnected", conn.peer_addr());
                return Ok(summary);
            }
            Err(e) => return Err(e),
        };
        let request = Request::decode(packet)?;
        summary.last_id = Some(request.id);

        let body = match request.body {
            RequestBody::Init {
                observation_space,
                action_space,
            } => {
                info!(
                    "Init from {}: observation space {}, action space {}",
                    conn.peer_addr(),
                    observation_space,
                    action_space
                );
                ReplyBody::Init
            }
            RequestBody::Step {
                observation,
                reward,
            } => {
                let action = policy.action();
                debug!(
                    "Step {}: observation {:?} reward {:?} -> action {:?}",
                    request.id, observation, reward, action
                );
                summary.steps += 1;
                summary.last_observation = observation;
                summary.last_reward = reward;
                ReplyBody::Step { action }
            }
            RequestBody::Shutdown => ReplyBody::Shutdown,
        };

        let shutdown = body == ReplyBody::Shutdown;
        conn.send(&Reply {
            id: request.id,
            body,
        }
        .encode())
        .await?;

        if shutdown {
            info!("Shutdown after {} steps", summary.steps);
            summary.shut_down = true;
            return Ok(summary);
        }
    }
}

/// Serves one simulation run after another.
pub async fn run(listener: TcpListener, mut policy: Policy) -> anyhow::Result<()> {
    info!("Agent listening on {}", listener.local_addr()?);
    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Accepted node connection from {}", addr);
        let conn = FramedStream::new(stream)?;
        match serve_session(conn, &mut policy).await {
            Ok(summary) => info!("Session with {} ended after {} steps", addr, summary.steps),
            Err(e) => error!("Session with {} failed: {}", addr, e),
        }
    }
}
