//! Priority enforcement sinks.
//!
//! Once a batch of clients is admitted, each flow that carries an enforcer
//! triple (`enforcerAddr`, `dstAddr`, `srcAddr`) has its assigned priority
//! pushed to the traffic shaper on the enforcer host; removing a client
//! retracts it. Enforcement is best-effort by design: admission has already
//! committed by the time the push happens, so transport failures are logged
//! and ignored. A dead enforcer never blocks or rolls back an admission.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Destination of priority updates for admitted flows.
pub trait Enforcer {
    /// Installs (or refreshes) the priority for traffic from `src` to `dst`,
    /// enforced by `enforcer`.
    fn update_client(&mut self, enforcer: &str, dst: &str, src: &str, priority: u32);
    /// Removes the priority classification for traffic from `src` to `dst`.
    fn remove_client(&mut self, enforcer: &str, dst: &str, src: &str);
}

/// One priority installation, as carried on the enforcer wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientUpdate {
    /// Destination address to match.
    pub dst: String,
    /// Source address to match.
    pub src: String,
    /// Priority class to install.
    pub priority: u32,
}

/// One priority removal, as carried on the enforcer wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMatch {
    /// Destination address to match.
    pub dst: String,
    /// Source address to match.
    pub src: String,
}

/// Requests consumed by the enforcer endpoint. Both calls are idempotent
/// from the controller's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum EnforcerRequest {
    /// Install priorities for the listed client pairs.
    UpdateClients(Vec<ClientUpdate>),
    /// Retract the listed client pairs.
    RemoveClients(Vec<ClientMatch>),
}

/// Default TCP port an enforcer listens on.
pub const DEFAULT_ENFORCER_PORT: u16 = 4571;

/// Pushes priorities to enforcer hosts over one-shot TCP connections.
///
/// The enforcer hostname is resolved through the system resolver on each
/// call; requests are single JSON lines.
#[derive(Debug, Clone)]
pub struct NetEnforcer {
    port: u16,
    connect_timeout: Duration,
}

impl NetEnforcer {
    /// A sink connecting to `port` on each enforcer host.
    pub fn new(port: u16, connect_timeout: Duration) -> Self {
        Self {
            port,
            connect_timeout,
        }
    }

    fn send(&self, enforcer: &str, request: &EnforcerRequest) {
        let addrs = match (enforcer, self.port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(err) => {
                warn!(enforcer, %err, "failed to resolve enforcer host");
                return;
            }
        };
        let line = match serde_json::to_string(request) {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "failed to encode enforcer request");
                return;
            }
        };
        for addr in addrs {
            let mut stream = match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(enforcer, %addr, %err, "failed to connect to enforcer");
                    continue;
                }
            };
            stream.set_write_timeout(Some(self.connect_timeout)).ok();
            match stream.write_all(format!("{line}\n").as_bytes()) {
                Ok(()) => {
                    debug!(enforcer, %addr, "pushed enforcer request");
                }
                Err(err) => {
                    warn!(enforcer, %addr, %err, "failed to send enforcer request");
                }
            }
            return;
        }
    }
}

impl Default for NetEnforcer {
    fn default() -> Self {
        Self::new(DEFAULT_ENFORCER_PORT, Duration::from_secs(2))
    }
}

impl Enforcer for NetEnforcer {
    fn update_client(&mut self, enforcer: &str, dst: &str, src: &str, priority: u32) {
        self.send(
            enforcer,
            &EnforcerRequest::UpdateClients(vec![ClientUpdate {
                dst: dst.to_string(),
                src: src.to_string(),
                priority,
            }]),
        );
    }

    fn remove_client(&mut self, enforcer: &str, dst: &str, src: &str) {
        self.send(
            enforcer,
            &EnforcerRequest::RemoveClients(vec![ClientMatch {
                dst: dst.to_string(),
                src: src.to_string(),
            }]),
        );
    }
}

/// One operation observed by a [`RecordingEnforcer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcerOp {
    /// A priority installation.
    Update {
        /// Enforcer host the call targeted.
        enforcer: String,
        /// Destination address.
        dst: String,
        /// Source address.
        src: String,
        /// Installed priority.
        priority: u32,
    },
    /// A priority removal.
    Remove {
        /// Enforcer host the call targeted.
        enforcer: String,
        /// Destination address.
        dst: String,
        /// Source address.
        src: String,
    },
}

/// Pure in-memory sink recording every call, for tests.
#[derive(Debug, Default)]
pub struct RecordingEnforcer {
    /// Calls in the order they were issued.
    pub ops: Vec<EnforcerOp>,
}

impl Enforcer for RecordingEnforcer {
    fn update_client(&mut self, enforcer: &str, dst: &str, src: &str, priority: u32) {
        self.ops.push(EnforcerOp::Update {
            enforcer: enforcer.to_string(),
            dst: dst.to_string(),
            src: src.to_string(),
            priority,
        });
    }

    fn remove_client(&mut self, enforcer: &str, dst: &str, src: &str) {
        self.ops.push(EnforcerOp::Remove {
            enforcer: enforcer.to_string(),
            dst: dst.to_string(),
            src: src.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn test_recording_enforcer_keeps_order() {
        let mut sink = RecordingEnforcer::default();
        sink.update_client("enf0", "10.0.0.2", "10.0.0.1", 3);
        sink.remove_client("enf0", "10.0.0.2", "10.0.0.1");
        assert_eq!(
            sink.ops,
            vec![
                EnforcerOp::Update {
                    enforcer: "enf0".to_string(),
                    dst: "10.0.0.2".to_string(),
                    src: "10.0.0.1".to_string(),
                    priority: 3,
                },
                EnforcerOp::Remove {
                    enforcer: "enf0".to_string(),
                    dst: "10.0.0.2".to_string(),
                    src: "10.0.0.1".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_net_enforcer_sends_json_line() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).expect("read");
            line
        });
        let mut sink = NetEnforcer::new(port, Duration::from_secs(2));
        sink.update_client("127.0.0.1", "10.0.0.2", "10.0.0.1", 1);
        let line = server.join().expect("server thread");
        let request: EnforcerRequest = serde_json::from_str(line.trim()).expect("decode");
        match request {
            EnforcerRequest::UpdateClients(updates) => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].dst, "10.0.0.2");
                assert_eq!(updates[0].src, "10.0.0.1");
                assert_eq!(updates[0].priority, 1);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_dead_enforcer_is_nonfatal() {
        let mut sink = NetEnforcer::new(1, Duration::from_millis(50));
        // Unresolvable host: the call logs and returns.
        sink.update_client("host.invalid.", "10.0.0.2", "10.0.0.1", 1);
        sink.remove_client("host.invalid.", "10.0.0.2", "10.0.0.1");
    }
}
