//! In-memory registry of live remote machines, keyed by host address.
//!
//! Only the connect and deallocate pipelines mutate the registry; everything
//! else works on filtered snapshots, so a machine disappearing between a
//! snapshot and its use degrades into a recoverable error rather than a
//! dangling reference.

use super::machine::RemoteMachine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Filter criteria for machine snapshots.
#[derive(Debug, Clone, Default)]
pub struct MachineFilter {
    pub busy: Option<bool>,
    pub platforms: Option<Vec<String>>,
    pub free_since_gt: Option<Duration>,
    /// Sort oldest-idle first instead of newest-idle first.
    pub reverse_sort: bool,
}

#[derive(Default)]
pub struct RemoteMachineRepository {
    data: HashMap<String, Arc<RemoteMachine>>,
}

impl RemoteMachineRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn get(&self, ip: &str) -> Option<Arc<RemoteMachine>> {
        self.data.get(ip).cloned()
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.data.contains_key(ip)
    }

    pub fn add(&mut self, machine: Arc<RemoteMachine>) {
        self.data.insert(machine.hostname().to_string(), machine);
    }

    pub fn remove(&mut self, ip: &str) -> Option<Arc<RemoteMachine>> {
        self.data.remove(ip)
    }

    /// Snapshot of machines matching the filter, sorted by `free_since`.
    /// Machines that never reported a `free_since` sort first.
    pub fn filter(&self, filter: &MachineFilter) -> Vec<Arc<RemoteMachine>> {
        let mut machines: Vec<Arc<RemoteMachine>> = self
            .data
            .values()
            .filter(|m| {
                let meta = m.meta();
                if let Some(busy) = filter.busy {
                    if meta.busy() != Some(busy) {
                        return false;
                    }
                }
                if let Some(platforms) = &filter.platforms {
                    if !m.platforms().iter().any(|p| platforms.contains(p)) {
                        return false;
                    }
                }
                if let Some(delta) = filter.free_since_gt {
                    if !meta.is_free_longer_than(delta) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        machines.sort_by_key(|m| m.meta().free_since());
        if filter.reverse_sort {
            machines.reverse();
        }
        machines
    }

    /// Close and drop the given machines. Entries currently marked busy are
    /// skipped.
    pub async fn disconnect_many(&mut self, ips: &[String]) {
        if ips.is_empty() {
            return;
        }
        info!("Disconnecting from machines: {}", ips.join(", "));
        let mut closing = Vec::new();
        for ip in ips {
            let busy = self
                .data
                .get(ip)
                .map(|m| m.meta().busy() == Some(true))
                .unwrap_or(false);
            if busy {
                continue;
            }
            if let Some(machine) = self.data.remove(ip) {
                closing.push(machine);
            }
        }
        for machine in closing {
            machine.close().await;
        }
    }

    /// Close and drop every machine, busy or not. Used at shutdown.
    pub async fn disconnect_all(&mut self) {
        let machines: Vec<Arc<RemoteMachine>> = self.data.drain().map(|(_, m)| m).collect();
        for machine in machines {
            machine.close().await;
        }
    }
}
