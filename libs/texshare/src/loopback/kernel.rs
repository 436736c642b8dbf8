// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::gpu::MemoryObject;
use super::{LoopbackEvent, LoopbackSemaphore};
use crate::core::{DuplicatedHandle, HandleTransfer, OsHandle, Result, ShareError};

/// First simulated pid. Each process gets the next one.
const FIRST_PID: u32 = 4100;
/// Handle values are multiples of four, like Win32 handle tables.
const HANDLE_STEP: u64 = 4;

/// Anything a handle can refer to.
#[derive(Debug, Clone)]
pub(crate) enum KernelObject {
    Memory(Arc<MemoryObject>),
    Semaphore(LoopbackSemaphore),
}

impl KernelObject {
    fn describe(&self) -> &'static str {
        match self {
            KernelObject::Memory(_) => "memory",
            KernelObject::Semaphore(_) => "semaphore",
        }
    }
}

#[derive(Debug, Default)]
struct HandleTable {
    entries: HashMap<u64, KernelObject>,
    next_slot: u64,
}

#[derive(Debug, Default)]
struct KernelState {
    tables: HashMap<u32, HandleTable>,
    events: HashMap<String, LoopbackEvent>,
    next_pid: u32,
}

/// Shared kernel: per-process handle tables and the named-event directory.
#[derive(Debug, Clone, Default)]
pub struct LoopbackKernel {
    state: Arc<Mutex<KernelState>>,
}

impl LoopbackKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new process with an empty handle table.
    pub fn spawn_process(&self) -> LoopbackProcess {
        let mut state = self.state.lock();
        let pid = FIRST_PID + state.next_pid;
        state.next_pid += 1;
        state.tables.insert(pid, HandleTable::default());
        tracing::debug!("LoopbackKernel: spawned pid {}", pid);
        LoopbackProcess {
            kernel: self.clone(),
            pid,
        }
    }

    pub(crate) fn create_event(&self, name: &str) -> LoopbackEvent {
        self.state
            .lock()
            .events
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub(crate) fn open_event(&self, name: &str) -> Option<LoopbackEvent> {
        self.state.lock().events.get(name).cloned()
    }
}

/// One simulated process and its handle table.
#[derive(Debug, Clone)]
pub struct LoopbackProcess {
    kernel: LoopbackKernel,
    pid: u32,
}

impl LoopbackProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn kernel(&self) -> &LoopbackKernel {
        &self.kernel
    }

    /// Handle values in this process start here; ranges never overlap.
    fn base(&self) -> u64 {
        u64::from(self.pid) << 20
    }

    pub(crate) fn insert(&self, object: KernelObject) -> OsHandle {
        let base = self.base();
        let mut state = self.kernel.state.lock();
        let table = state.tables.entry(self.pid).or_default();
        table.next_slot += 1;
        let value = base + table.next_slot * HANDLE_STEP;
        table.entries.insert(value, object);
        OsHandle::from_raw(value)
    }

    pub(crate) fn resolve(&self, handle: OsHandle) -> Result<KernelObject> {
        let state = self.kernel.state.lock();
        state
            .tables
            .get(&self.pid)
            .and_then(|t| t.entries.get(&handle.raw()))
            .cloned()
            .ok_or_else(|| {
                ShareError::HandleDuplication(format!(
                    "handle {handle} is not valid in pid {}",
                    self.pid
                ))
            })
    }

    pub(crate) fn close(&self, handle: OsHandle) -> bool {
        let mut state = self.kernel.state.lock();
        state
            .tables
            .get_mut(&self.pid)
            .and_then(|t| t.entries.remove(&handle.raw()))
            .is_some()
    }

    /// Open handles in this process.
    pub fn handle_count(&self) -> usize {
        let state = self.kernel.state.lock();
        state.tables.get(&self.pid).map_or(0, |t| t.entries.len())
    }

    /// Whether `handle` resolves in this process.
    pub fn is_valid(&self, handle: OsHandle) -> bool {
        self.resolve(handle).is_ok()
    }

    /// True when both handles refer to the same kernel object.
    pub fn same_object(&self, a: OsHandle, other: &LoopbackProcess, b: OsHandle) -> bool {
        match (self.resolve(a), other.resolve(b)) {
            (Ok(KernelObject::Memory(x)), Ok(KernelObject::Memory(y))) => Arc::ptr_eq(&x, &y),
            (Ok(KernelObject::Semaphore(x)), Ok(KernelObject::Semaphore(y))) => x.same_object(&y),
            _ => false,
        }
    }
}

/// Duplicates handles out of one simulated process.
#[derive(Debug, Clone)]
pub struct LoopbackTransfer {
    source: LoopbackProcess,
}

impl LoopbackTransfer {
    pub fn new(source: &LoopbackProcess) -> Self {
        Self {
            source: source.clone(),
        }
    }
}

impl HandleTransfer for LoopbackTransfer {
    type Process = LoopbackProcess;

    fn duplicate(&self, handle: OsHandle, target: &LoopbackProcess) -> Result<DuplicatedHandle> {
        let object = self.source.resolve(handle)?;
        let kind = object.describe();
        let duplicated = target.insert(object);
        tracing::debug!(
            "LoopbackTransfer: {} {} in pid {} -> {} in pid {}",
            kind,
            handle,
            self.source.pid,
            duplicated,
            target.pid
        );
        Ok(DuplicatedHandle::new(duplicated.raw(), target.pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processes_have_disjoint_handle_values() {
        let kernel = LoopbackKernel::new();
        let a = kernel.spawn_process();
        let b = kernel.spawn_process();
        let ha = a.insert(KernelObject::Semaphore(LoopbackSemaphore::new()));
        let hb = b.insert(KernelObject::Semaphore(LoopbackSemaphore::new()));
        assert_ne!(ha, hb);
        assert!(a.is_valid(ha));
        assert!(!b.is_valid(ha));
        assert!(!a.is_valid(hb));
    }

    #[test]
    fn closed_handles_stop_resolving() {
        let kernel = LoopbackKernel::new();
        let a = kernel.spawn_process();
        let h = a.insert(KernelObject::Semaphore(LoopbackSemaphore::new()));
        assert!(a.close(h));
        assert!(!a.is_valid(h));
        assert!(!a.close(h));
    }
}
