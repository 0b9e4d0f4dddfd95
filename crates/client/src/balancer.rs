//! Subchannel selection for the two supported policies.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use conduit_rpc::{Connection, Status};
use parking_lot::Mutex;

use crate::options::Policy;
use crate::subchannel::{ConnectivityState, Subchannel};

/// Outcome of one pick.
pub enum Pick {
    /// Send the call on this transport.
    Ready(Arc<Connection>),
    /// Nothing is ready yet; wait for a connectivity change.
    Queue,
    /// Every subchannel is failing; fail the call.
    Fail(Status),
}

pub struct Balancer {
    policy: Policy,
    subchannels: Vec<Arc<Subchannel>>,
    next: AtomicUsize,
    selected: Mutex<Option<usize>>,
}

impl Balancer {
    pub const fn new(policy: Policy, subchannels: Vec<Arc<Subchannel>>) -> Self {
        Self {
            policy,
            subchannels,
            next: AtomicUsize::new(0),
            selected: Mutex::new(None),
        }
    }

    pub const fn policy(&self) -> Policy {
        self.policy
    }

    pub fn subchannels(&self) -> &[Arc<Subchannel>] {
        &self.subchannels
    }

    pub fn pick(&self) -> Pick {
        match self.policy {
            Policy::RoundRobin => self.pick_round_robin(),
            Policy::PickFirst => self.pick_first(),
        }
    }

    pub fn reset_backoff(&self) {
        for subchannel in &self.subchannels {
            subchannel.reset_backoff();
        }
    }

    pub fn shutdown(&self) {
        for subchannel in &self.subchannels {
            subchannel.shutdown();
        }
    }

    // Every subchannel is kept connected; calls rotate over the ready ones
    // in address order.
    fn pick_round_robin(&self) -> Pick {
        let mut ready = Vec::with_capacity(self.subchannels.len());
        for subchannel in &self.subchannels {
            match subchannel.ready_connection() {
                Some(connection) => ready.push(connection),
                None => subchannel.request_connection(),
            }
        }

        if ready.is_empty() {
            return self.queue_or_fail();
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % ready.len();
        Pick::Ready(ready.swap_remove(index))
    }

    fn pick_first(&self) -> Pick {
        let mut selected = self.selected.lock();

        if let Some(index) = *selected {
            if let Some(connection) = self.subchannels[index].ready_connection() {
                return Pick::Ready(connection);
            }
            *selected = None;
        }

        for (index, subchannel) in self.subchannels.iter().enumerate() {
            if let Some(connection) = subchannel.ready_connection() {
                *selected = Some(index);
                return Pick::Ready(connection);
            }
            match subchannel.connectivity() {
                ConnectivityState::TransientFailure => {}
                ConnectivityState::Idle => {
                    subchannel.request_connection();
                    return Pick::Queue;
                }
                ConnectivityState::Connecting | ConnectivityState::Ready => return Pick::Queue,
            }
        }

        self.queue_or_fail()
    }

    fn queue_or_fail(&self) -> Pick {
        let all_failing = self
            .subchannels
            .iter()
            .all(|subchannel| subchannel.connectivity() == ConnectivityState::TransientFailure);

        if !all_failing {
            return Pick::Queue;
        }

        let last_error = self
            .subchannels
            .iter()
            .rev()
            .find_map(|subchannel| subchannel.last_error())
            .unwrap_or_else(|| "no address reachable".to_string());
        Pick::Fail(Status::unavailable(format!(
            "all {} subchannels are in transient failure, last error: {}",
            self.subchannels.len(),
            last_error
        )))
    }
}
