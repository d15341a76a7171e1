//! Gossip membership runtime.
//!
//! Owns the join gate and the background task that forwards local endpoint
//! changes to the cluster and applies changes received from peers. The task
//! is the only consumer of the notification queue.

use crate::domain::entities::{Endpoint, Network, NotifyAction, NotifyEvent};
use crate::domain::errors::DriverError;
use crate::domain::ports::{GossipTransport, PeerEvent};
use crate::gossip::config::GossipConfig;
use crate::gossip::join_gate::{JoinGate, JoinState};
use crate::gossip::notify::NotifyQueue;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Receiver of endpoint changes made on other hosts.
#[async_trait]
pub trait PeerEventHandler: Send + Sync {
    async fn handle_peer_event(&self, event: PeerEvent);

    /// Endpoints owned by this host, announced after the first join.
    fn owned_endpoints(&self) -> Vec<(Arc<Network>, Endpoint)>;
}

type ExitSender = mpsc::Sender<oneshot::Sender<()>>;

pub struct GossipMembership {
    config: GossipConfig,
    transport: Arc<dyn GossipTransport>,
    handler: Arc<dyn PeerEventHandler>,
    notify: NotifyQueue,
    notify_rx: Mutex<Option<mpsc::Receiver<NotifyEvent>>>,
    gate: JoinGate,
    self_addr: Mutex<Option<SocketAddr>>,
    neighbor: Mutex<Option<SocketAddr>>,
    /// Set on an invalid self address; gossip never starts afterwards.
    disabled: AtomicBool,
    exit_tx: Mutex<Option<ExitSender>>,
}

impl GossipMembership {
    pub fn new(
        config: GossipConfig,
        transport: Arc<dyn GossipTransport>,
        handler: Arc<dyn PeerEventHandler>,
        notify: NotifyQueue,
        notify_rx: mpsc::Receiver<NotifyEvent>,
    ) -> Self {
        Self {
            config,
            transport,
            handler,
            notify,
            notify_rx: Mutex::new(Some(notify_rx)),
            gate: JoinGate::new(),
            self_addr: Mutex::new(None),
            neighbor: Mutex::new(None),
            disabled: AtomicBool::new(false),
            exit_tx: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn join_state(&self) -> JoinState {
        self.gate.state()
    }

    pub fn is_running(&self) -> bool {
        self.exit_tx.lock().is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Handle discovery of this host's own address.
    ///
    /// The advertised address, and `bind` when given, must belong to a local
    /// interface. If not, gossip is disabled for the life of the process and
    /// the driver stays local-only. A transport that fails to start leaves
    /// the self address unknown so a later discovery can try again.
    pub async fn discover_self(&self, advertise: IpAddr, bind: Option<IpAddr>) -> Result<(), DriverError> {
        if self.is_disabled() {
            return Err(DriverError::Discovery(
                "gossip disabled by an earlier invalid self address".to_string(),
            ));
        }

        let checked = std::iter::once(advertise).chain(bind);
        for ip in checked {
            if let Err(e) = validate_local_address(ip) {
                self.disabled.store(true, Ordering::SeqCst);
                tracing::error!("invalid self address, gossip disabled: {}", e);
                return Err(e);
            }
        }

        let local = SocketAddr::new(advertise, self.config.gossip_port);
        {
            let mut self_addr = self.self_addr.lock();
            if self_addr.is_some() {
                tracing::debug!("self address already known, ignoring {}", advertise);
                return Ok(());
            }
            *self_addr = Some(local);
        }

        if let Err(e) = self.start(local).await {
            *self.self_addr.lock() = None;
            tracing::warn!("gossip did not start on {}, waiting for next discovery: {}", local, e);
            return Err(e);
        }
        self.try_join().await;
        Ok(())
    }

    /// Handle discovery of a neighbor. Joins once this host's own address is known.
    pub async fn discover_neighbor(&self, addr: IpAddr) {
        let neighbor = SocketAddr::new(addr, self.config.gossip_port);
        *self.neighbor.lock() = Some(neighbor);
        tracing::debug!("neighbor discovered at {}", neighbor);
        self.try_join().await;
    }

    /// Join through the last discovered neighbor, unless a join is already
    /// in flight or done. Failures are logged and leave the gate open for a
    /// later discovery.
    pub async fn try_join(&self) {
        if self.is_disabled() || !self.is_running() {
            return;
        }
        let neighbor = match *self.neighbor.lock() {
            Some(addr) => addr,
            None => return,
        };
        if !self.gate.try_begin() {
            tracing::debug!("join already {:?}, ignoring discovery of {}", self.gate.state(), neighbor);
            return;
        }

        match self.transport.join(neighbor).await {
            Ok(()) => {
                self.gate.complete();
                tracing::info!("joined overlay cluster through {}", neighbor);
                self.push_local_db().await;
            }
            Err(e) => {
                self.gate.fail();
                tracing::warn!("failed to join cluster through {}: {}", neighbor, e);
            }
        }
    }

    /// Announce every locally owned endpoint.
    async fn push_local_db(&self) {
        let owned = self.handler.owned_endpoints();
        tracing::debug!("announcing {} local endpoints", owned.len());
        for (network, endpoint) in owned {
            self.notify
                .push(NotifyEvent {
                    action: NotifyAction::Join,
                    network,
                    endpoint,
                })
                .await;
        }
    }

    async fn start(&self, local: SocketAddr) -> Result<(), DriverError> {
        if self.is_running() {
            return Ok(());
        }

        let peer_rx = self
            .transport
            .start(local)
            .await
            .map_err(|e| DriverError::Discovery(format!("gossip start on {}: {}", local, e)))?;

        // Taken only once the transport runs, so a failed start can be retried.
        let notify_rx = match self.notify_rx.lock().take() {
            Some(rx) => rx,
            None => {
                tracing::warn!("notification queue already consumed, leaving gossip on {}", local);
                self.transport.leave().await;
                return Ok(());
            }
        };

        let (exit_tx, exit_rx) = mpsc::channel(1);
        tokio::spawn(run(
            self.config.node_id.clone(),
            self.transport.clone(),
            self.handler.clone(),
            notify_rx,
            peer_rx,
            exit_rx,
        ));

        *self.exit_tx.lock() = Some(exit_tx);
        self.notify.activate();
        tracing::info!("gossip started on {} as {}", local, self.config.node_id);
        Ok(())
    }

    /// Stop the gossip task and wait until it has left the cluster.
    pub async fn shutdown(&self) {
        self.notify.deactivate();
        let exit_tx = match self.exit_tx.lock().take() {
            Some(tx) => tx,
            None => return,
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if exit_tx.send(ack_tx).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
        tracing::info!("gossip stopped");
    }
}

async fn run(
    node_id: String,
    transport: Arc<dyn GossipTransport>,
    handler: Arc<dyn PeerEventHandler>,
    mut notify_rx: mpsc::Receiver<NotifyEvent>,
    mut peer_rx: mpsc::Receiver<PeerEvent>,
    mut exit_rx: mpsc::Receiver<oneshot::Sender<()>>,
) {
    loop {
        tokio::select! {
            biased;

            Some(ack) = exit_rx.recv() => {
                transport.leave().await;
                let _ = ack.send(());
                break;
            }

            Some(event) = notify_rx.recv() => {
                let peer_event = PeerEvent::from_notify(&event, &node_id);
                if let Err(e) = transport.broadcast(&peer_event).await {
                    tracing::warn!(
                        "failed to announce {} of endpoint {}: {}",
                        event.action.as_str(),
                        event.endpoint.id,
                        e
                    );
                }
            }

            Some(event) = peer_rx.recv() => {
                if event.origin != node_id {
                    handler.handle_peer_event(event).await;
                }
            }

            else => break,
        }
    }
}

fn validate_local_address(ip: IpAddr) -> Result<(), DriverError> {
    if ip.is_unspecified() {
        return Err(DriverError::Discovery(format!("address {} is unspecified", ip)));
    }
    std::net::UdpSocket::bind((ip, 0))
        .map(|_| ())
        .map_err(|e| {
            DriverError::Discovery(format!("address {} is not bound to a local interface: {}", ip, e))
        })
}
