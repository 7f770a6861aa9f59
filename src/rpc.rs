//! The admission RPC surface.
//!
//! Requests are single JSON lines over TCP with a `method` discriminator and
//! method-specific `params`; responses are single JSON lines carrying a
//! status code (plus the admission verdict for `AddClients`). The payloads of
//! `AddClients` and `AddQueue` are themselves JSON strings, so callers can
//! forward configs verbatim.
//!
//! The server is deliberately serial: connections are accepted and drained
//! one at a time, so request effects (committed admissions, removals,
//! enforcer pushes) happen in arrival order and the controller needs no
//! interior locking.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::admission::{AdmissionDecision, Controller};
use crate::enforcer::Enforcer;
use crate::error::Result;
use crate::graph::{ClientConfig, QueueConfig};

/// Status codes returned on the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Operation applied.
    Success,
    /// A required field was absent.
    MissingArgument,
    /// Malformed payload or out-of-range scalar.
    InvalidArgument,
    /// Client name already taken, in the batch or the live graph.
    ClientNameInUse,
    /// Flow name already taken, in the batch or the live graph.
    FlowNameInUse,
    /// Queue name already taken.
    QueueNameInUse,
    /// Reference to an unknown client.
    ClientNameNonexistent,
    /// Reference to an unknown queue.
    QueueNameNonexistent,
    /// DelQueue against a queue still traversed by flows.
    QueueHasActiveFlows,
}

/// A decoded RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    /// Liveness probe.
    Null,
    /// Admission check over a JSON array of client configs.
    AddClients {
        /// JSON-encoded array of client configs.
        #[serde(rename = "clientInfos")]
        client_infos: String,
    },
    /// Remove a client by name.
    DelClient {
        /// Name of the client to remove.
        name: String,
    },
    /// Register a queue from a JSON config.
    AddQueue {
        /// JSON-encoded queue config.
        #[serde(rename = "queueInfo")]
        queue_info: String,
    },
    /// Remove a queue by name.
    DelQueue {
        /// Name of the queue to remove.
        name: String,
    },
}

/// Response carrying only a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Outcome of the operation.
    pub status: Status,
}

fn encode<T: Serialize>(response: &T) -> String {
    serde_json::to_string(response).expect("response serialization cannot fail")
}

/// Handles one raw request line and produces the response line.
pub fn dispatch<E: Enforcer>(controller: &mut Controller<E>, line: &str) -> String {
    let request = match serde_json::from_str::<Request>(line) {
        Ok(request) => request,
        Err(err) => {
            debug!(%err, "failed to decode request");
            return encode(&StatusResponse {
                status: Status::InvalidArgument,
            });
        }
    };
    match request {
        Request::Null => encode(&StatusResponse {
            status: Status::Success,
        }),
        Request::AddClients { client_infos } => {
            let decision = match serde_json::from_str::<Vec<ClientConfig>>(&client_infos) {
                Ok(configs) => controller.add_clients(&configs),
                Err(err) => {
                    debug!(%err, "failed to decode client configs");
                    AdmissionDecision {
                        admitted: false,
                        status: Status::InvalidArgument,
                    }
                }
            };
            encode(&decision)
        }
        Request::DelClient { name } => encode(&StatusResponse {
            status: controller.del_client(&name),
        }),
        Request::AddQueue { queue_info } => {
            let status = match serde_json::from_str::<QueueConfig>(&queue_info) {
                Ok(config) => controller.add_queue(&config),
                Err(err) => {
                    debug!(%err, "failed to decode queue config");
                    Status::InvalidArgument
                }
            };
            encode(&StatusResponse { status })
        }
        Request::DelQueue { name } => encode(&StatusResponse {
            status: controller.del_queue(&name),
        }),
    }
}

async fn handle_connection<E: Enforcer>(
    stream: TcpStream,
    controller: &mut Controller<E>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatch(controller, &line);
        write_half.write_all(response.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
    }
    Ok(())
}

/// Serves admission requests until `shutdown` resolves.
///
/// Connections are handled serially, preserving request order across the
/// whole server.
pub async fn serve<E: Enforcer>(
    listener: TcpListener,
    controller: &mut Controller<E>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    info!(addr = %listener.local_addr()?, "admission server listening");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested, closing listener");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "accepted connection");
                if let Err(err) = handle_connection(stream, controller).await {
                    warn!(%peer, %err, "connection failed");
                }
            }
        }
    }
}
