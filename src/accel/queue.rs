// accel/queue.rs — Event-ordered command queue.
//
// Every operation takes a wait-list of events and returns its own event.
// Nothing runs at enqueue time: the queue records a node per command and
// submits the pending graph at `flush()` (or `finish()` / a download) in a
// topological order. Which ready node goes next is a `SchedulePolicy`, so
// two commands with no path between them really can run in either order.
//
// ORDERING DISCIPLINE
// ───────────────────
// Each node declares the storage regions (slice ranges of one allocation)
// it reads and writes. At enqueue time the queue checks:
//
//   - every pending writer of a region it reads,
//   - every pending reader or writer of a region it writes,
//
// is an ancestor of the new node through its wait-list. Otherwise the
// command could observe a value that depends on submission order, and
// enqueue fails with `Error::UnorderedAccess`. Submitted nodes no longer
// count: batches execute in submission order.
//
// SERIALIZED MODE
// ───────────────
// `CommandQueue::serialized()` makes each node wait on the previous one.
// The graph degenerates to a chain, which is the reference ordering for
// "concurrency does not change values".
//
// NEW RUST CONCEPTS:
// - `HashMap<Event, usize>` + explicit stack for the ancestor walk — no
//   recursion, so deep graphs cannot overflow.
// - A process-wide `AtomicU64` tags every queue, so an event carries the
//   queue that issued it and cannot be mistaken for a local one.
// - `Option::take()` on a `Vec<Option<Node>>` to move commands out in an
//   arbitrary order without cloning.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use crate::accel::{Allocation, Backend, Command, Launch, StorageId};
use crate::config::DtcwtConfig;
use crate::error::{Error, Result};

/// Opaque completion token, only valid on the queue that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Event {
    queue: u64,
    id: u64,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event {}.{}", self.queue, self.id)
    }
}

fn next_queue_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Order among commands whose dependencies are all satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// Oldest ready command first.
    #[default]
    Fifo,
    /// Newest ready command first.
    Lifo,
}

/// A slice range of one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub storage: StorageId,
    pub first: usize,
    pub end: usize,
}

impl Region {
    pub fn new(storage: StorageId, first: usize, end: usize) -> Self {
        Region { storage, first, end }
    }

    #[inline]
    pub fn overlaps(&self, other: &Region) -> bool {
        self.storage == other.storage && self.first < other.end && other.first < self.end
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage {} slices {}..{}", self.storage, self.first, self.end)
    }
}

/// Regions a command reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Access {
    pub reads: Vec<Region>,
    pub writes: Vec<Region>,
}

impl Access {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, region: Region) -> Self {
        self.reads.push(region);
        self
    }

    pub fn write(mut self, region: Region) -> Self {
        self.writes.push(region);
        self
    }
}

struct Node<B: Backend> {
    event: Event,
    label: String,
    waits: Vec<Event>,
    command: Option<Command<B>>,
    access: Access,
}

/// Records commands with their dependencies and submits them in
/// dependency order.
pub struct CommandQueue<'d, B: Backend> {
    backend: &'d B,
    id: u64,
    policy: SchedulePolicy,
    serialized: bool,
    pending: Vec<Node<B>>,
    next_event: u64,
    last_event: Option<Event>,
    submitted: usize,
}

impl<'d, B: Backend> CommandQueue<'d, B> {
    pub fn new(backend: &'d B, policy: SchedulePolicy) -> Self {
        CommandQueue {
            backend,
            id: next_queue_id(),
            policy,
            serialized: false,
            pending: Vec::new(),
            next_event: 0,
            last_event: None,
            submitted: 0,
        }
    }

    /// A queue in which every command waits on its predecessor.
    pub fn serialized(backend: &'d B) -> Self {
        let mut queue = Self::new(backend, SchedulePolicy::Fifo);
        queue.serialized = true;
        queue
    }

    pub fn from_config(backend: &'d B, config: &DtcwtConfig) -> Self {
        let mut queue = Self::new(backend, config.schedule);
        queue.serialized = config.serialize;
        queue
    }

    #[inline]
    pub fn backend(&self) -> &'d B {
        self.backend
    }

    #[inline]
    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    #[inline]
    pub fn is_serialized(&self) -> bool {
        self.serialized
    }

    /// Commands recorded but not yet submitted.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Commands submitted to the backend so far.
    #[inline]
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Record a host-to-device copy. `data` is owned by the queue from here.
    pub fn write(
        &mut self,
        target: &Arc<Allocation<B::Storage>>,
        offset: usize,
        data: Vec<f32>,
        region: Region,
        wait: &[Event],
    ) -> Result<Event> {
        if offset + data.len() > target.words() {
            return Err(Error::Execution(format!(
                "write of {} words at {offset} overruns `{}` ({} words)",
                data.len(),
                target.label(),
                target.words()
            )));
        }
        let label = format!("write `{}`", target.label());
        let command = Command::Write { target: Arc::clone(target), offset, data };
        self.enqueue(label, Some(command), Access::new().write(region), wait)
    }

    /// Record a kernel launch.
    pub fn launch(
        &mut self,
        label: &str,
        launch: Launch<B>,
        access: Access,
        wait: &[Event],
    ) -> Result<Event> {
        self.enqueue(label.to_string(), Some(Command::Launch(launch)), access, wait)
    }

    /// An event that completes once everything in `wait` has completed.
    pub fn marker(&mut self, wait: &[Event]) -> Result<Event> {
        self.enqueue("marker".to_string(), None, Access::new(), wait)
    }

    /// Labels of the pending commands in the order `flush` would submit
    /// them. Markers are omitted.
    pub fn planned_order(&self) -> Vec<String> {
        self.schedule()
            .into_iter()
            .filter(|&i| self.pending[i].command.is_some())
            .map(|i| self.pending[i].label.clone())
            .collect()
    }

    /// Submit every pending command to the backend.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let order = self.schedule();
        let mut slots: Vec<Option<Node<B>>> = self.pending.drain(..).map(Some).collect();

        let mut commands = Vec::with_capacity(order.len());
        for i in order {
            let Some(node) = slots[i].take() else { continue };
            if let Some(command) = node.command {
                log::trace!("submit {} `{}`: {}", node.event, node.label, command.describe());
                commands.push(command);
            }
        }

        log::debug!(
            "flushing {} commands to {} ({:?}{})",
            commands.len(),
            self.backend.name(),
            self.policy,
            if self.serialized { ", serialized" } else { "" },
        );
        self.submitted += commands.len();
        self.backend.execute(&commands)
    }

    /// Flush and block until the device is idle.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        self.backend.wait_idle()
    }

    fn enqueue(
        &mut self,
        label: String,
        command: Option<Command<B>>,
        access: Access,
        wait: &[Event],
    ) -> Result<Event> {
        let index = self.index();
        let mut waits = Vec::with_capacity(wait.len() + 1);
        for &e in wait {
            if e.queue != self.id {
                return Err(Error::Execution(format!(
                    "`{label}` waits on {e} from another queue"
                )));
            }
            if e.id >= self.next_event {
                return Err(Error::Execution(format!("`{label}` waits on unknown {e}")));
            }
            // Already submitted events are ordered before anything new.
            if index.contains_key(&e) && !waits.contains(&e) {
                waits.push(e);
            }
        }
        if self.serialized {
            if let Some(last) = self.last_event.filter(|e| index.contains_key(e)) {
                if !waits.contains(&last) {
                    waits.push(last);
                }
            }
        }

        let ancestors = self.ancestors(&waits, &index);
        for node in &self.pending {
            if ancestors.contains(&node.event) {
                continue;
            }
            let hazard = access.reads.iter().chain(&access.writes).find(|r| {
                node.access.writes.iter().any(|w| w.overlaps(r))
            });
            let hazard = hazard.or_else(|| {
                access.writes.iter().find(|w| node.access.reads.iter().any(|r| r.overlaps(w)))
            });
            if let Some(region) = hazard {
                return Err(Error::UnorderedAccess {
                    region: format!("{region} (from `{label}`)"),
                    conflict: format!("{} `{}`", node.event, node.label),
                });
            }
        }

        let event = Event { queue: self.id, id: self.next_event };
        self.next_event += 1;
        self.last_event = Some(event);
        log::trace!("enqueue {event} `{label}` after {waits:?}");
        self.pending.push(Node { event, label, waits, command, access });
        Ok(event)
    }

    fn index(&self) -> HashMap<Event, usize> {
        self.pending.iter().enumerate().map(|(i, n)| (n.event, i)).collect()
    }

    /// Pending events reachable backwards from `waits`, inclusive.
    fn ancestors(&self, waits: &[Event], index: &HashMap<Event, usize>) -> HashSet<Event> {
        let mut seen = HashSet::new();
        let mut stack: Vec<Event> = waits.to_vec();
        while let Some(e) = stack.pop() {
            if !seen.insert(e) {
                continue;
            }
            if let Some(&i) = index.get(&e) {
                stack.extend(self.pending[i].waits.iter().copied());
            }
        }
        seen
    }

    /// Kahn's algorithm over the pending nodes. Returns indices into
    /// `self.pending`.
    fn schedule(&self) -> Vec<usize> {
        let index = self.index();
        let n = self.pending.len();
        let mut indegree = vec![0usize; n];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, node) in self.pending.iter().enumerate() {
            for e in &node.waits {
                if let Some(&parent) = index.get(e) {
                    indegree[i] += 1;
                    children[parent].push(i);
                }
            }
        }

        let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = match self.policy {
            SchedulePolicy::Fifo => ready.pop_front(),
            SchedulePolicy::Lifo => ready.pop_back(),
        } {
            order.push(i);
            for &c in &children[i] {
                indegree[c] -= 1;
                if indegree[c] == 0 {
                    ready.push_back(c);
                }
            }
        }
        order
    }
}

impl<B: Backend> Drop for CommandQueue<'_, B> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            log::warn!("dropping command queue with {} unsubmitted commands", self.pending.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::host::HostBackend;

    fn alloc(backend: &HostBackend, words: usize, label: &str) -> Arc<Allocation<<HostBackend as Backend>::Storage>> {
        Allocation::new(backend.allocate(words, label).unwrap(), words, label)
    }

    fn whole(a: &Arc<Allocation<<HostBackend as Backend>::Storage>>) -> Region {
        Region::new(a.id(), 0, 1)
    }

    #[test]
    fn test_region_overlap() {
        let a = StorageId(1);
        let b = StorageId(2);
        assert!(Region::new(a, 0, 3).overlaps(&Region::new(a, 2, 4)));
        assert!(!Region::new(a, 0, 2).overlaps(&Region::new(a, 2, 4)));
        assert!(!Region::new(a, 0, 3).overlaps(&Region::new(b, 0, 3)));
    }

    #[test]
    fn test_unordered_write_after_write_rejected() {
        let backend = HostBackend::new();
        let mut q = CommandQueue::new(&backend, SchedulePolicy::Fifo);
        let a = alloc(&backend, 4, "a");
        q.write(&a, 0, vec![1.0; 4], whole(&a), &[]).unwrap();
        let err = q.write(&a, 0, vec![2.0; 4], whole(&a), &[]).unwrap_err();
        assert!(matches!(err, Error::UnorderedAccess { .. }), "{err}");
        q.flush().unwrap();
    }

    #[test]
    fn test_ordered_writes_apply_in_dependency_order() {
        let backend = HostBackend::new();
        for policy in [SchedulePolicy::Fifo, SchedulePolicy::Lifo] {
            let mut q = CommandQueue::new(&backend, policy);
            let a = alloc(&backend, 2, "a");
            let first = q.write(&a, 0, vec![1.0, 1.0], whole(&a), &[]).unwrap();
            q.write(&a, 0, vec![2.0, 2.0], whole(&a), &[first]).unwrap();
            q.finish().unwrap();
            assert_eq!(backend.read(a.raw(), 0, 2).unwrap(), vec![2.0, 2.0]);
        }
    }

    #[test]
    fn test_flushed_events_do_not_constrain() {
        let backend = HostBackend::new();
        let mut q = CommandQueue::new(&backend, SchedulePolicy::Fifo);
        let a = alloc(&backend, 1, "a");
        q.write(&a, 0, vec![1.0], whole(&a), &[]).unwrap();
        q.flush().unwrap();
        // No wait needed: the first write is already submitted.
        q.write(&a, 0, vec![3.0], whole(&a), &[]).unwrap();
        q.finish().unwrap();
        assert_eq!(backend.read(a.raw(), 0, 1).unwrap(), vec![3.0]);
    }

    #[test]
    fn test_disjoint_slices_are_independent() {
        let backend = HostBackend::new();
        let mut q = CommandQueue::new(&backend, SchedulePolicy::Fifo);
        let a = alloc(&backend, 4, "a");
        q.write(&a, 0, vec![1.0; 2], Region::new(a.id(), 0, 1), &[]).unwrap();
        q.write(&a, 2, vec![2.0; 2], Region::new(a.id(), 1, 2), &[]).unwrap();
        q.finish().unwrap();
        assert_eq!(backend.read(a.raw(), 0, 4).unwrap(), vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_transitive_ancestor_through_marker() {
        let backend = HostBackend::new();
        let mut q = CommandQueue::new(&backend, SchedulePolicy::Lifo);
        let a = alloc(&backend, 1, "a");
        let b = alloc(&backend, 1, "b");
        let wa = q.write(&a, 0, vec![1.0], whole(&a), &[]).unwrap();
        let wb = q.write(&b, 0, vec![2.0], whole(&b), &[]).unwrap();
        let joined = q.marker(&[wa, wb]).unwrap();
        q.write(&a, 0, vec![5.0], whole(&a), &[joined]).unwrap();
        q.finish().unwrap();
        assert_eq!(backend.read(a.raw(), 0, 1).unwrap(), vec![5.0]);
    }

    #[test]
    fn test_lifo_reorders_independent_work() {
        let backend = HostBackend::new();
        let a = alloc(&backend, 1, "a");
        let b = alloc(&backend, 1, "b");

        let mut fifo = CommandQueue::new(&backend, SchedulePolicy::Fifo);
        fifo.write(&a, 0, vec![1.0], whole(&a), &[]).unwrap();
        fifo.write(&b, 0, vec![1.0], whole(&b), &[]).unwrap();
        assert_eq!(fifo.planned_order(), vec!["write `a`", "write `b`"]);
        fifo.flush().unwrap();

        let mut lifo = CommandQueue::new(&backend, SchedulePolicy::Lifo);
        lifo.write(&a, 0, vec![1.0], whole(&a), &[]).unwrap();
        lifo.write(&b, 0, vec![1.0], whole(&b), &[]).unwrap();
        assert_eq!(lifo.planned_order(), vec!["write `b`", "write `a`"]);
        lifo.flush().unwrap();
    }

    #[test]
    fn test_serialized_chains_everything() {
        let backend = HostBackend::new();
        let mut q = CommandQueue::serialized(&backend);
        let a = alloc(&backend, 1, "a");
        // No explicit waits, yet no hazard: serialization orders them.
        q.write(&a, 0, vec![1.0], whole(&a), &[]).unwrap();
        q.write(&a, 0, vec![7.0], whole(&a), &[]).unwrap();
        q.finish().unwrap();
        assert_eq!(backend.read(a.raw(), 0, 1).unwrap(), vec![7.0]);
        assert_eq!(q.submitted(), 2);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let backend = HostBackend::new();
        let mut q = CommandQueue::new(&backend, SchedulePolicy::Fifo);
        let future = Event { queue: q.id, id: 42 };
        assert!(matches!(q.marker(&[future]), Err(Error::Execution(_))));
    }

    #[test]
    fn test_event_from_other_queue_rejected() {
        let backend = HostBackend::new();
        let mut other = CommandQueue::new(&backend, SchedulePolicy::Fifo);
        let foreign = other.marker(&[]).unwrap();

        let mut q = CommandQueue::new(&backend, SchedulePolicy::Fifo);
        q.marker(&[]).unwrap();
        q.marker(&[]).unwrap();
        // Same local id as a live event here, still rejected.
        assert_eq!(foreign.id, 0);
        let err = q.marker(&[foreign]).unwrap_err();
        assert!(matches!(err, Error::Execution(_)), "{err}");
        assert!(err.to_string().contains("another queue"), "{err}");
    }

    #[test]
    fn test_write_overrun_rejected() {
        let backend = HostBackend::new();
        let mut q = CommandQueue::new(&backend, SchedulePolicy::Fifo);
        let a = alloc(&backend, 2, "a");
        assert!(q.write(&a, 1, vec![0.0; 2], whole(&a), &[]).is_err());
    }
}
