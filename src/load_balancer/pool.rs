//! Destination pool shared by every balancing strategy.
//!
//! # Responsibilities
//! - Own the destinations of one route
//! - Spawn one health-check task per destination
//! - Stop those tasks exactly once, on demand or when the pool is dropped

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::health::active::HealthChecker;
use crate::load_balancer::destination::Destination;

/// Health-check lifecycle of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Tasks may be running.
    Running,
    /// Tasks have been told to exit; terminal.
    Stopped,
}

/// The destinations of one route and their health-check tasks.
#[derive(Debug)]
pub struct DestinationPool {
    dests: Vec<Arc<Destination>>,
    lifecycle: Mutex<Lifecycle>,
    /// Dropping the sender also ends the tasks.
    stop_tx: watch::Sender<bool>,
}

impl DestinationPool {
    /// Create a pool. Health checks start only if a checker is given.
    pub fn new(dests: Vec<Destination>, checker: Option<&HealthChecker>) -> Self {
        let dests: Vec<Arc<Destination>> = dests.into_iter().map(Arc::new).collect();
        let (stop_tx, _) = watch::channel(false);

        if let Some(checker) = checker {
            for dest in &dests {
                checker.spawn(Arc::clone(dest), stop_tx.subscribe());
            }
        }

        Self {
            dests,
            lifecycle: Mutex::new(Lifecycle::Running),
            stop_tx,
        }
    }

    pub fn dests(&self) -> &[Arc<Destination>] {
        &self.dests
    }

    pub fn len(&self) -> usize {
        self.dests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dests.is_empty()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    /// Stop every health-check task. Returns false if already stopped.
    pub fn stop(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Stopped {
            return false;
        }
        *lifecycle = Lifecycle::Stopped;
        let _ = self.stop_tx.send(true);
        true
    }
}
