//! Simulator port assignments.
//!
//! Every in-flight job binds one simulator world port and one
//! traffic-manager port. Concurrency is bounded by a pool of disjoint
//! assignments: the scheduler acquires a pair before dispatching a job
//! and releases it when the attempt finishes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when building a port pool.
#[derive(Debug, Error)]
pub enum PortPoolError {
    #[error("Port pool of size {size} with stride {stride} overflows the u16 port range")]
    RangeOverflow { size: usize, stride: u16 },

    #[error("Port assignments overlap: {0} appears in more than one pair")]
    Overlap(u16),
}

/// A disjoint (world port, traffic-manager port) pair bound to one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortAssignment {
    pub world: u16,
    pub traffic_manager: u16,
}

impl std::fmt::Display for PortAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "world={} tm={}", self.world, self.traffic_manager)
    }
}

/// Pool of disjoint port assignments.
///
/// Pool size is the admission limit: at most `capacity` jobs run
/// concurrently. The single-simulator baseline is a pool of size 1.
#[derive(Debug)]
pub struct PortPool {
    free: VecDeque<PortAssignment>,
    capacity: usize,
}

impl PortPool {
    /// Builds a pool of `size` pairs starting at the given base ports,
    /// spaced `stride` apart.
    ///
    /// The stride leaves room for the extra consecutive ports the
    /// simulator binds next to its world port.
    pub fn new(
        base_world: u16,
        base_traffic_manager: u16,
        stride: u16,
        size: usize,
    ) -> Result<Self, PortPoolError> {
        let mut free = VecDeque::with_capacity(size);
        let mut seen = std::collections::HashSet::new();

        for i in 0..size {
            let offset = (i as u32) * (stride as u32);
            let world = u32::from(base_world) + offset;
            let traffic_manager = u32::from(base_traffic_manager) + offset;
            if world > u32::from(u16::MAX) || traffic_manager > u32::from(u16::MAX) {
                return Err(PortPoolError::RangeOverflow { size, stride });
            }
            let assignment = PortAssignment {
                world: world as u16,
                traffic_manager: traffic_manager as u16,
            };
            for port in [assignment.world, assignment.traffic_manager] {
                if !seen.insert(port) {
                    return Err(PortPoolError::Overlap(port));
                }
            }
            free.push_back(assignment);
        }

        Ok(Self { free, capacity: size })
    }

    /// Takes an assignment out of the pool, if one is free.
    pub fn acquire(&mut self) -> Option<PortAssignment> {
        self.free.pop_front()
    }

    /// Returns an assignment to the pool after its job finished.
    pub fn release(&mut self, assignment: PortAssignment) {
        self.free.push_back(assignment);
    }

    /// Number of currently free assignments.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Total pool size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
