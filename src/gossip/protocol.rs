//! Gossip Protocol (SWIM-like)
//!
//! Membership, failure detection and event dissemination between hosts.
//!
//! Uses Sans-IO pattern: message processing is separated from I/O for testability.

use crate::domain::ports::PeerEvent;
use crate::gossip::types::{GossipMessage, NodeId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// State of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Alive,
    Dead,
}

/// Information about a cluster member.
#[derive(Debug, Clone)]
pub struct Member {
    pub node_id: NodeId,
    pub addr: SocketAddr,
    pub state: MemberState,
    pub last_seen: Instant,
    pub incarnation: u64,
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        // last_seen is time-based and left out
        self.node_id == other.node_id
            && self.addr == other.addr
            && self.state == other.state
            && self.incarnation == other.incarnation
    }
}

pub type Members = RwLock<HashMap<String, Member>>;

/// Membership changes observed while processing.
#[derive(Debug, Clone, PartialEq)]
pub enum GossipEvent {
    MemberJoined(Member),
    MemberLeft(NodeId),
}

/// Output action from message processing (Sans-IO pattern).
#[derive(Debug, Clone, PartialEq)]
pub enum GossipAction {
    /// Send a message to a specific address
    Send { to: SocketAddr, message: GossipMessage },
    /// Hand a peer's endpoint change to the driver
    Deliver(PeerEvent),
    /// The node at this address answered our join
    JoinAcknowledged(SocketAddr),
    /// Emit a membership event
    Emit(GossipEvent),
    /// No action needed
    None,
}

/// Result of processing a gossip message (Sans-IO pattern).
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub actions: Vec<GossipAction>,
    pub member_discovered: bool,
}

impl ProcessResult {
    pub fn empty() -> Self {
        Self {
            actions: Vec::new(),
            member_discovered: false,
        }
    }

    pub fn send(to: SocketAddr, message: GossipMessage) -> Self {
        Self {
            actions: vec![GossipAction::Send { to, message }],
            member_discovered: false,
        }
    }

    pub fn with_action(mut self, action: GossipAction) -> Self {
        self.actions.push(action);
        self
    }

    fn with_joined(mut self, joined: Option<Member>) -> Self {
        if let Some(member) = joined {
            self.member_discovered = true;
            self.actions.push(GossipAction::Emit(GossipEvent::MemberJoined(member)));
        }
        self
    }
}

/// Record `id` as alive at `addr`. Returns the member if it was not known
/// (or was dead) before.
fn upsert(members: &Members, id: &str, addr: SocketAddr, incarnation: u64) -> Option<Member> {
    let member = Member {
        node_id: NodeId::new(id),
        addr,
        state: MemberState::Alive,
        last_seen: Instant::now(),
        incarnation,
    };

    let mut guard = members.write();
    let was_alive = guard
        .get(id)
        .map(|m| m.state == MemberState::Alive)
        .unwrap_or(false);
    guard.insert(id.to_string(), member.clone());

    if was_alive {
        None
    } else {
        Some(member)
    }
}

/// Pure function to process a gossip message (Sans-IO pattern).
pub fn process_message(
    msg: &GossipMessage,
    src: SocketAddr,
    members: &Members,
    local_node_id: &str,
    local_addr: SocketAddr,
    local_incarnation: u64,
) -> ProcessResult {
    match msg {
        GossipMessage::Ping { sender_id, sender_addr, incarnation } => {
            if sender_id == local_node_id {
                return ProcessResult::empty();
            }
            let joined = upsert(members, sender_id, *sender_addr, *incarnation);
            let ack = GossipMessage::Ack {
                sender_id: local_node_id.to_string(),
                sender_addr: local_addr,
                incarnation: local_incarnation,
            };
            ProcessResult::send(src, ack).with_joined(joined)
        }

        GossipMessage::Ack { sender_id, sender_addr, incarnation } => {
            if sender_id == local_node_id {
                return ProcessResult::empty();
            }
            let joined = upsert(members, sender_id, *sender_addr, *incarnation);
            ProcessResult::empty().with_joined(joined)
        }

        GossipMessage::Join { node_id, addr } => {
            if node_id == local_node_id {
                return ProcessResult::empty();
            }
            let joined = upsert(members, node_id, *addr, 0);

            let mut list: Vec<(String, SocketAddr, u64)> = members
                .read()
                .values()
                .filter(|m| m.state == MemberState::Alive)
                .map(|m| (m.node_id.0.clone(), m.addr, m.incarnation))
                .collect();
            list.push((local_node_id.to_string(), local_addr, local_incarnation));

            ProcessResult::send(src, GossipMessage::MemberList { members: list }).with_joined(joined)
        }

        GossipMessage::MemberList { members: list } => {
            let mut result = ProcessResult::empty().with_action(GossipAction::JoinAcknowledged(src));
            for (id, addr, incarnation) in list {
                if id == local_node_id {
                    continue;
                }
                result = result.with_joined(upsert(members, id, *addr, *incarnation));
            }
            result
        }

        GossipMessage::Leave { node_id } => {
            let removed = members.write().remove(node_id).is_some();
            if removed {
                ProcessResult::empty().with_action(GossipAction::Emit(GossipEvent::MemberLeft(
                    NodeId::new(node_id),
                )))
            } else {
                ProcessResult::empty()
            }
        }

        GossipMessage::Event(envelope) => {
            if !envelope.verify() {
                tracing::warn!("dropping event from {} with bad checksum", src);
                return ProcessResult::empty();
            }
            if envelope.event.origin == local_node_id {
                return ProcessResult::empty();
            }
            ProcessResult::empty().with_action(GossipAction::Deliver(envelope.event.clone()))
        }
    }
}

/// Mark members silent for longer than `timeout` as dead (Sans-IO pattern).
pub fn check_member_failures(members: &Members, timeout: Duration) -> Vec<GossipAction> {
    let now = Instant::now();
    let mut dead = Vec::new();

    {
        let mut guard = members.write();
        for (id, member) in guard.iter_mut() {
            if member.state == MemberState::Alive && now.duration_since(member.last_seen) > timeout {
                member.state = MemberState::Dead;
                dead.push(id.clone());
            }
        }
    }

    dead.into_iter()
        .map(|id| GossipAction::Emit(GossipEvent::MemberLeft(NodeId::new(id))))
        .collect()
}

/// Addresses of every alive member.
pub fn alive_addrs(members: &Members) -> Vec<SocketAddr> {
    members
        .read()
        .values()
        .filter(|m| m.state == MemberState::Alive)
        .map(|m| m.addr)
        .collect()
}

/// Select random alive member for ping (Sans-IO pattern).
pub fn select_ping_target(members: &Members) -> Option<SocketAddr> {
    let addrs = alive_addrs(members);
    if addrs.is_empty() {
        return None;
    }
    let idx = rand::random::<usize>() % addrs.len();
    Some(addrs[idx])
}

pub fn create_ping(node_id: &str, addr: SocketAddr, incarnation: u64) -> GossipMessage {
    GossipMessage::Ping {
        sender_id: node_id.to_string(),
        sender_addr: addr,
        incarnation,
    }
}

pub fn create_join(node_id: &str, addr: SocketAddr) -> GossipMessage {
    GossipMessage::Join {
        node_id: node_id.to_string(),
        addr,
    }
}
