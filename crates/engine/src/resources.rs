// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource pool bookkeeping: admission, allocation, release.
//!
//! Pools are typed capacity counters. Allocation is all-or-nothing per
//! task and every allocation is bound to (task, session) so a crashed
//! session's holdings can be reclaimed. Release is idempotent.
//!
//! Resource kinds with no configured pool are unmanaged: they never gate
//! admission.

use foreman_core::{IdGen, ResourceKind, SessionId, Task, TaskId, UuidIdGen};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

foreman_core::define_id! {
    /// Unique identifier for a single pool allocation.
    pub struct AllocationId;
}

/// Errors from resource operations
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("insufficient '{kind}': requested {requested}, available {available}")]
    Insufficient {
        kind: ResourceKind,
        requested: u32,
        available: u32,
    },
}

/// One allocation against a pool, bound to the task and session holding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub id: AllocationId,
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub kind: ResourceKind,
    pub units: u32,
}

#[derive(Debug, Clone, Default)]
struct Pool {
    capacity: u32,
    allocated: u32,
    allocations: IndexMap<AllocationId, AllocationRecord>,
}

/// Handle returned by [`ResourceManager::allocate`]; pass back to
/// [`ResourceManager::release`] on every exit path.
#[derive(Debug, Clone)]
pub struct ResourceLease {
    pub task_id: TaskId,
    allocation_ids: Vec<AllocationId>,
}

impl ResourceLease {
    /// A lease holding nothing (task required no managed resources).
    pub fn empty(task_id: TaskId) -> Self {
        Self {
            task_id,
            allocation_ids: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allocation_ids.is_empty()
    }
}

/// Typed pools with capacity bookkeeping.
pub struct ResourceManager<G: IdGen = UuidIdGen> {
    pools: IndexMap<ResourceKind, Pool>,
    ids: G,
}

impl Default for ResourceManager<UuidIdGen> {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceManager<UuidIdGen> {
    pub fn new() -> Self {
        Self::with_ids(UuidIdGen)
    }
}

impl<G: IdGen> ResourceManager<G> {
    pub fn with_ids(ids: G) -> Self {
        Self {
            pools: IndexMap::new(),
            ids,
        }
    }

    /// Create or resize a pool. Shrinking below the current allocation is
    /// allowed; the pool simply admits nothing until holdings drain.
    pub fn set_capacity(&mut self, kind: ResourceKind, capacity: u32) {
        self.pools.entry(kind).or_default().capacity = capacity;
    }

    pub fn capacity(&self, kind: &ResourceKind) -> Option<u32> {
        self.pools.get(kind).map(|p| p.capacity)
    }

    pub fn allocated(&self, kind: &ResourceKind) -> u32 {
        self.pools.get(kind).map(|p| p.allocated).unwrap_or(0)
    }

    pub fn available(&self, kind: &ResourceKind) -> Option<u32> {
        self.pools
            .get(kind)
            .map(|p| p.capacity.saturating_sub(p.allocated))
    }

    /// Whether every managed resource the task requires has room.
    pub fn can_admit(&self, task: &Task) -> bool {
        task.required_resources.iter().all(|spec| {
            match self.pools.get(&spec.kind) {
                Some(pool) => pool.capacity.saturating_sub(pool.allocated) >= spec.units,
                None => true, // unmanaged kind
            }
        })
    }

    /// Allocate every managed resource the task requires, all-or-nothing.
    pub fn allocate(
        &mut self,
        task: &Task,
        session_id: &SessionId,
    ) -> Result<ResourceLease, ResourceError> {
        // Check first so a partial failure never leaves holdings behind
        for spec in &task.required_resources {
            if let Some(pool) = self.pools.get(&spec.kind) {
                let available = pool.capacity.saturating_sub(pool.allocated);
                if available < spec.units {
                    return Err(ResourceError::Insufficient {
                        kind: spec.kind.clone(),
                        requested: spec.units,
                        available,
                    });
                }
            }
        }

        let mut allocation_ids = Vec::new();
        for spec in &task.required_resources {
            if let Some(pool) = self.pools.get_mut(&spec.kind) {
                let id = AllocationId::new(self.ids.next());
                pool.allocated += spec.units;
                pool.allocations.insert(
                    id.clone(),
                    AllocationRecord {
                        id: id.clone(),
                        task_id: task.id.clone(),
                        session_id: session_id.clone(),
                        kind: spec.kind.clone(),
                        units: spec.units,
                    },
                );
                allocation_ids.push(id);
            }
        }

        Ok(ResourceLease {
            task_id: task.id.clone(),
            allocation_ids,
        })
    }

    /// Return a lease's holdings. Idempotent: allocations already released
    /// are skipped.
    pub fn release(&mut self, lease: &ResourceLease) {
        for allocation_id in &lease.allocation_ids {
            for pool in self.pools.values_mut() {
                if let Some(record) = pool.allocations.shift_remove(allocation_id) {
                    pool.allocated = pool.allocated.saturating_sub(record.units);
                }
            }
        }
    }

    /// Release everything held by a session (crash reclamation).
    pub fn release_session(&mut self, session_id: &SessionId) -> usize {
        let mut released = 0;
        for pool in self.pools.values_mut() {
            let held: Vec<AllocationId> = pool
                .allocations
                .values()
                .filter(|r| &r.session_id == session_id)
                .map(|r| r.id.clone())
                .collect();
            for id in held {
                if let Some(record) = pool.allocations.shift_remove(&id) {
                    pool.allocated = pool.allocated.saturating_sub(record.units);
                    released += 1;
                }
            }
        }
        released
    }

    /// Product over the task's managed resources of available/capacity.
    ///
    /// 1.0 when the task needs nothing managed; 0.0 when a pool is fully
    /// allocated.
    pub fn availability_factor(&self, task: &Task) -> f64 {
        let mut factor = 1.0;
        for spec in &task.required_resources {
            if let Some(pool) = self.pools.get(&spec.kind) {
                if pool.capacity == 0 {
                    return 0.0;
                }
                let available = pool.capacity.saturating_sub(pool.allocated) as f64;
                factor *= available / pool.capacity as f64;
            }
        }
        factor
    }

    /// Current utilization per pool (allocated/capacity).
    pub fn utilization(&self) -> Vec<(ResourceKind, f64)> {
        self.pools
            .iter()
            .map(|(kind, pool)| {
                let ratio = if pool.capacity == 0 {
                    0.0
                } else {
                    pool.allocated as f64 / pool.capacity as f64
                };
                (kind.clone(), ratio)
            })
            .collect()
    }

    /// All live allocation records (for snapshots and debugging).
    pub fn allocations(&self) -> Vec<&AllocationRecord> {
        self.pools
            .values()
            .flat_map(|p| p.allocations.values())
            .collect()
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod tests;
