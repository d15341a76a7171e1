//! Join gate: at most one cluster join in flight.

use std::sync::atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const JOINING: u8 = 1;
const JOINED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Idle,
    Joining,
    Joined,
}

#[derive(Debug, Default)]
pub struct JoinGate {
    state: AtomicU8,
}

impl JoinGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn state(&self) -> JoinState {
        match self.state.load(Ordering::SeqCst) {
            JOINING => JoinState::Joining,
            JOINED => JoinState::Joined,
            _ => JoinState::Idle,
        }
    }

    /// Claim the gate. Only one caller wins while a join is in flight or done.
    pub fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(IDLE, JOINING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Mark the claimed join successful.
    pub fn complete(&self) {
        let _ = self
            .state
            .compare_exchange(JOINING, JOINED, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Release the claimed join so a later discovery can retry.
    pub fn fail(&self) {
        let _ = self
            .state
            .compare_exchange(JOINING, IDLE, Ordering::SeqCst, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_transitions() {
        let gate = JoinGate::new();
        assert_eq!(gate.state(), JoinState::Idle);

        assert!(gate.try_begin());
        assert_eq!(gate.state(), JoinState::Joining);
        assert!(!gate.try_begin());

        gate.fail();
        assert_eq!(gate.state(), JoinState::Idle);

        assert!(gate.try_begin());
        gate.complete();
        assert_eq!(gate.state(), JoinState::Joined);
        assert!(!gate.try_begin());

        // No effect outside Joining.
        gate.fail();
        assert_eq!(gate.state(), JoinState::Joined);
    }

    #[test]
    fn test_single_winner_across_threads() {
        let gate = Arc::new(JoinGate::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.try_begin())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
