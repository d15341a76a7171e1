//! UDP Gossip Transport
//!
//! Implements GossipTransport over a single UDP socket. Message handling is
//! delegated to the Sans-IO functions in `protocol`; this module only does I/O.

use crate::domain::ports::{GossipError, GossipTransport, PeerEvent};
use crate::gossip::config::GossipConfig;
use crate::gossip::protocol::{
    self, alive_addrs, check_member_failures, GossipAction, GossipEvent, Member, Members,
};
use crate::gossip::types::{EventEnvelope, GossipMessage};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type PendingJoins = Arc<Mutex<HashMap<SocketAddr, oneshot::Sender<()>>>>;

struct Running {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct UdpGossipTransport {
    config: GossipConfig,
    members: Arc<Members>,
    pending_joins: PendingJoins,
    running: Mutex<Option<Running>>,
    incarnation: u64,
}

impl UdpGossipTransport {
    pub fn new(config: GossipConfig) -> Self {
        Self {
            config,
            members: Arc::new(RwLock::new(HashMap::new())),
            pending_joins: Arc::new(Mutex::new(HashMap::new())),
            running: Mutex::new(None),
            incarnation: 0,
        }
    }

    /// Advertised address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    pub fn members(&self) -> Vec<Member> {
        self.members.read().values().cloned().collect()
    }

    fn socket(&self) -> Result<(Arc<UdpSocket>, SocketAddr), GossipError> {
        self.running
            .lock()
            .as_ref()
            .map(|r| (r.socket.clone(), r.local_addr))
            .ok_or(GossipError::NotStarted)
    }

    async fn send(socket: &UdpSocket, message: &GossipMessage, to: SocketAddr) {
        match message.encode() {
            Ok(data) => {
                if let Err(e) = socket.send_to(&data, to).await {
                    tracing::debug!("gossip send to {} failed: {}", to, e);
                }
            }
            Err(e) => tracing::error!("gossip encode failed: {}", e),
        }
    }

    /// Execute gossip actions (Sans-IO pattern).
    async fn execute_actions(
        actions: Vec<GossipAction>,
        socket: &UdpSocket,
        event_tx: &mpsc::Sender<PeerEvent>,
        pending_joins: &PendingJoins,
    ) {
        for action in actions {
            match action {
                GossipAction::Send { to, message } => Self::send(socket, &message, to).await,
                GossipAction::Deliver(event) => {
                    let _ = event_tx.send(event).await;
                }
                GossipAction::JoinAcknowledged(from) => {
                    if let Some(waiter) = pending_joins.lock().remove(&from) {
                        let _ = waiter.send(());
                    }
                }
                GossipAction::Emit(GossipEvent::MemberJoined(member)) => {
                    tracing::info!("gossip member joined: {} at {}", member.node_id, member.addr);
                }
                GossipAction::Emit(GossipEvent::MemberLeft(node_id)) => {
                    tracing::info!("gossip member left: {}", node_id);
                }
                GossipAction::None => {}
            }
        }
    }
}

#[async_trait]
impl GossipTransport for UdpGossipTransport {
    async fn start(&self, local: SocketAddr) -> Result<mpsc::Receiver<PeerEvent>, GossipError> {
        if self.running.lock().is_some() {
            return Err(GossipError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "gossip transport already started",
            )));
        }

        if self.config.gossip_interval.is_zero() || (self.config.failure_timeout / 3).is_zero() {
            return Err(GossipError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "gossip timers need a non-zero interval",
            )));
        }

        let bind = self.config.bind_addr.unwrap_or(local);
        let socket = Arc::new(UdpSocket::bind(bind).await?);
        let bound = socket.local_addr()?;
        let local_addr = if local.port() == 0 {
            SocketAddr::new(local.ip(), bound.port())
        } else {
            local
        };
        tracing::info!("gossip listening on {} (advertised {})", bound, local_addr);

        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let members = self.members.clone();
        let pending_joins = self.pending_joins.clone();
        let recv_socket = socket.clone();
        let node_id = self.config.node_id.clone();
        let incarnation = self.incarnation;
        let gossip_interval = self.config.gossip_interval;
        let failure_timeout = self.config.failure_timeout;

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            let mut gossip_timer = tokio::time::interval(gossip_interval);
            let mut failure_timer = tokio::time::interval(failure_timeout / 3);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        tracing::info!("gossip transport shutting down");
                        break;
                    }

                    result = recv_socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, src)) => match GossipMessage::decode(&buf[..len]) {
                                Ok(msg) => {
                                    let result = protocol::process_message(
                                        &msg, src, &members, &node_id, local_addr, incarnation,
                                    );
                                    Self::execute_actions(result.actions, &recv_socket, &event_tx, &pending_joins).await;
                                }
                                Err(e) => tracing::debug!("dropping undecodable datagram from {}: {}", src, e),
                            },
                            Err(e) => tracing::error!("gossip recv error: {:?}", e),
                        }
                    }

                    _ = gossip_timer.tick() => {
                        if let Some(target) = protocol::select_ping_target(&members) {
                            let ping = protocol::create_ping(&node_id, local_addr, incarnation);
                            Self::send(&recv_socket, &ping, target).await;
                        }
                    }

                    _ = failure_timer.tick() => {
                        let actions = check_member_failures(&members, failure_timeout);
                        Self::execute_actions(actions, &recv_socket, &event_tx, &pending_joins).await;
                    }
                }
            }
        });

        *self.running.lock() = Some(Running {
            socket,
            local_addr,
            stop_tx,
            task,
        });
        Ok(event_rx)
    }

    async fn join(&self, addr: SocketAddr) -> Result<(), GossipError> {
        let (socket, local_addr) = self.socket()?;
        let (tx, rx) = oneshot::channel();
        self.pending_joins.lock().insert(addr, tx);

        let join = protocol::create_join(&self.config.node_id, local_addr);
        Self::send(&socket, &join, addr).await;

        match tokio::time::timeout(self.config.join_timeout, rx).await {
            Ok(Ok(())) => {
                tracing::info!("joined gossip cluster through {}", addr);
                Ok(())
            }
            _ => {
                self.pending_joins.lock().remove(&addr);
                Err(GossipError::JoinTimeout(addr))
            }
        }
    }

    async fn leave(&self) {
        let running = match self.running.lock().take() {
            Some(running) => running,
            None => return,
        };

        let leave = GossipMessage::Leave {
            node_id: self.config.node_id.clone(),
        };
        for addr in alive_addrs(&self.members) {
            Self::send(&running.socket, &leave, addr).await;
        }

        let _ = running.stop_tx.send(());
        if let Err(e) = running.task.await {
            tracing::warn!("gossip task ended abnormally: {}", e);
        }
        self.members.write().clear();
        tracing::info!("left gossip cluster");
    }

    async fn broadcast(&self, event: &PeerEvent) -> Result<(), GossipError> {
        let (socket, _) = self.socket()?;
        let message = GossipMessage::Event(EventEnvelope::new(event.clone()));
        let data = message.encode()?;

        for addr in alive_addrs(&self.members) {
            if let Err(e) = socket.send_to(&data, addr).await {
                tracing::debug!("broadcast to {} failed: {}", addr, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn transport(node: &str) -> UdpGossipTransport {
        UdpGossipTransport::new(GossipConfig::new(node).join_timeout(Duration::from_millis(200)))
    }

    #[tokio::test]
    async fn test_calls_before_start_fail() {
        let t = transport("node-a");
        assert!(matches!(
            t.join("127.0.0.1:1".parse().unwrap()).await,
            Err(GossipError::NotStarted)
        ));
        t.leave().await;
        assert!(t.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_start_reports_bound_port() {
        let t = transport("node-a");
        let _rx = t.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = t.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        assert!(t.start("127.0.0.1:0".parse().unwrap()).await.is_err());
        t.leave().await;
        assert!(t.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_zero_interval() {
        let t = UdpGossipTransport::new(GossipConfig::new("node-a").gossip_interval(Duration::ZERO));
        let err = t.start("127.0.0.1:0".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, GossipError::Io(ref e) if e.kind() == std::io::ErrorKind::InvalidInput));
        assert!(t.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_join_unanswered_times_out() {
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let t = transport("node-a");
        let _rx = t.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let target = silent.local_addr().unwrap();
        let err = t.join(target).await.unwrap_err();
        assert!(matches!(err, GossipError::JoinTimeout(a) if a == target));
        t.leave().await;
    }
}
