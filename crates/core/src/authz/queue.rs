//! Priority queue of pending permission sync requests.
//!
//! Requests are unique per (type, id). Enqueuing an entity that is already
//! waiting updates the waiting entry instead of adding a second one: the
//! higher priority wins, an unset `next_sync_at` beats any concrete time, an
//! earlier time beats a later one, and `no_perms` is sticky.
//!
//! Ordering, highest precedence first:
//! 1. not acquired before acquired
//! 2. higher priority
//! 3. unset `next_sync_at`, then earlier `next_sync_at`
//! 4. earlier enqueue
//!
//! The heap array and the key-to-slot index live behind one lock that is
//! only held for heap operations. A [`Notify`] permit signals enqueues so the
//! executor can sleep instead of polling.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use permsync_domain::constants::DEBUG_DUMP_NAME;
use permsync_domain::{RequestMeta, RequestType};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct QueueKey {
    request_type: RequestType,
    id: i32,
}

impl QueueKey {
    const fn of(meta: &RequestMeta) -> Self {
        Self { request_type: meta.request_type, id: meta.id }
    }
}

/// A queued sync request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// What to sync and when
    pub meta: RequestMeta,
    /// Whether an executor is currently processing the request
    pub acquired: bool,
    index: usize,
    sequence: u64,
}

impl SyncRequest {
    /// Slot of the request in the heap at the time it was read
    pub const fn queue_index(&self) -> usize {
        self.index
    }
}

fn precedence(a: &SyncRequest, b: &SyncRequest) -> Ordering {
    a.acquired
        .cmp(&b.acquired)
        .then_with(|| b.meta.priority.cmp(&a.meta.priority))
        // `None < Some(_)`, so unset sorts first.
        .then_with(|| a.meta.next_sync_at.cmp(&b.meta.next_sync_at))
        .then_with(|| a.sequence.cmp(&b.sequence))
}

#[derive(Debug, Default)]
struct RequestHeap {
    entries: Vec<SyncRequest>,
    index: HashMap<QueueKey, usize>,
    next_sequence: u64,
}

impl RequestHeap {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn less(&self, i: usize, j: usize) -> bool {
        precedence(&self.entries[i], &self.entries[j]) == Ordering::Less
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.entries.swap(i, j);
        for slot in [i, j] {
            let entry = &mut self.entries[slot];
            entry.index = slot;
            self.index.insert(QueueKey::of(&entry.meta), slot);
        }
    }

    fn up(&mut self, mut j: usize) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !self.less(j, parent) {
                break;
            }
            self.swap(parent, j);
            j = parent;
        }
    }

    /// Sift down within the first `n` entries; returns whether it moved.
    fn down(&mut self, start: usize, n: usize) -> bool {
        let mut i = start;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                child = right;
            }
            if !self.less(child, i) {
                break;
            }
            self.swap(i, child);
            i = child;
        }
        i > start
    }

    fn fix(&mut self, i: usize) {
        if !self.down(i, self.len()) {
            self.up(i);
        }
    }

    fn push(&mut self, meta: RequestMeta) {
        let slot = self.len();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.index.insert(QueueKey::of(&meta), slot);
        self.entries.push(SyncRequest { meta, acquired: false, index: slot, sequence });
        self.up(slot);
    }

    fn remove(&mut self, i: usize) -> Option<SyncRequest> {
        let last = self.len().checked_sub(1)?;
        if i != last {
            self.swap(i, last);
            if !self.down(i, last) {
                self.up(i);
            }
        }
        let removed = self.entries.pop()?;
        self.index.remove(&QueueKey::of(&removed.meta));
        Some(removed)
    }

    fn slot(&self, request_type: RequestType, id: i32) -> Option<usize> {
        self.index.get(&QueueKey { request_type, id }).copied()
    }
}

/// Outcome of [`RequestQueue::acquire_next`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Nothing is waiting, or every request is already being processed
    Empty,
    /// The top request is not due yet; it stays queued and unacquired
    NotDue {
        /// The deferred request
        request: SyncRequest,
        /// Time left until it becomes due
        wait: Duration,
    },
    /// The request is now acquired by the caller
    Ready(SyncRequest),
}

/// One queue entry in a debug dump
///
/// Carries the full [`RequestMeta`], including `no_perms`, so a dump shows
/// which queued requests are first syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedRequestInfo {
    /// Request metadata
    pub meta: RequestMeta,
    /// Whether the request is being processed
    pub acquired: bool,
}

/// Snapshot of the queue for observability endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueDump {
    /// Name of the queue
    pub name: String,
    /// Number of queued requests
    pub size: usize,
    /// Requests in processing order
    pub queue: Vec<QueuedRequestInfo>,
}

/// Thread-safe priority queue of sync requests
#[derive(Debug, Default)]
pub struct RequestQueue {
    heap: RwLock<RequestHeap>,
    notify_enqueue: Notify,
}

impl RequestQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request or merge it into the waiting request for the same entity.
    ///
    /// Returns `true` when an existing entry was modified. Entries that are
    /// being processed are left untouched and `false` is returned.
    pub fn enqueue(&self, meta: RequestMeta) -> bool {
        let mut heap = self.heap.write();

        let Some(slot) = heap.slot(meta.request_type, meta.id) else {
            debug!(request_type = %meta.request_type, id = meta.id, priority = ?meta.priority, "Enqueued sync request");
            heap.push(meta);
            drop(heap);
            self.notify_enqueue.notify_one();
            return false;
        };

        let existing = &mut heap.entries[slot];
        if existing.acquired {
            return false;
        }

        let mut updated = false;
        if meta.priority > existing.meta.priority {
            existing.meta.priority = meta.priority;
            updated = true;
        }
        match (meta.next_sync_at, existing.meta.next_sync_at) {
            (None, Some(_)) => {
                existing.meta.next_sync_at = None;
                updated = true;
            }
            (Some(requested), Some(current)) if requested < current => {
                existing.meta.next_sync_at = Some(requested);
                updated = true;
            }
            _ => {}
        }
        if meta.no_perms && !existing.meta.no_perms {
            existing.meta.no_perms = true;
            updated = true;
        }

        if updated {
            heap.fix(slot);
            drop(heap);
            debug!(request_type = %meta.request_type, id = meta.id, "Updated queued sync request");
            self.notify_enqueue.notify_one();
        }
        updated
    }

    /// Acquire the request with the highest precedence.
    ///
    /// A request whose `next_sync_at` is after `now` is released again and
    /// reported as [`Acquisition::NotDue`] together with the remaining wait.
    pub fn acquire_next(&self, now: DateTime<Utc>) -> Acquisition {
        let mut heap = self.heap.write();
        let key = match heap.entries.first() {
            Some(top) if !top.acquired => QueueKey::of(&top.meta),
            _ => return Acquisition::Empty,
        };

        heap.entries[0].acquired = true;
        heap.fix(0);
        let Some(slot) = heap.slot(key.request_type, key.id) else {
            return Acquisition::Empty;
        };

        let request = heap.entries[slot].clone();
        if let Some(due) = request.meta.next_sync_at {
            if due > now {
                heap.entries[slot].acquired = false;
                heap.fix(slot);
                let wait = (due - now).to_std().unwrap_or(Duration::ZERO);
                let mut request = request;
                request.acquired = false;
                return Acquisition::NotDue { request, wait };
            }
        }
        Acquisition::Ready(request)
    }

    /// Mark a request as no longer being processed without removing it.
    ///
    /// Returns whether the request was found.
    pub fn release(&self, request_type: RequestType, id: i32) -> bool {
        let mut heap = self.heap.write();
        let Some(slot) = heap.slot(request_type, id) else {
            return false;
        };
        heap.entries[slot].acquired = false;
        heap.fix(slot);
        true
    }

    /// Remove a request, typically after its sync finished.
    ///
    /// With `notify` set, the executor is woken to look at the next request.
    /// Returns whether the request was found.
    pub fn remove(&self, request_type: RequestType, id: i32, notify: bool) -> bool {
        let removed = {
            let mut heap = self.heap.write();
            heap.slot(request_type, id).and_then(|slot| heap.remove(slot)).is_some()
        };
        if removed && notify {
            self.notify_enqueue.notify_one();
        }
        removed
    }

    /// Current state of the request for an entity.
    pub fn get(&self, request_type: RequestType, id: i32) -> Option<SyncRequest> {
        let heap = self.heap.read();
        heap.slot(request_type, id).map(|slot| heap.entries[slot].clone())
    }

    /// Number of queued requests, acquired ones included
    pub fn len(&self) -> usize {
        self.heap.read().len()
    }

    /// Whether the queue holds no requests
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next enqueue signal.
    ///
    /// At most one signal is buffered while nobody is waiting.
    pub async fn notified(&self) {
        self.notify_enqueue.notified().await;
    }

    /// Raise the enqueue signal, e.g. when a deferred request became due.
    pub fn notify(&self) {
        self.notify_enqueue.notify_one();
    }

    /// Requests in processing order.
    pub fn snapshot(&self) -> Vec<QueuedRequestInfo> {
        let mut entries = self.heap.read().entries.clone();
        entries.sort_by(precedence);
        entries
            .into_iter()
            .map(|request| QueuedRequestInfo { meta: request.meta, acquired: request.acquired })
            .collect()
    }

    /// Snapshot wrapped with the queue name and size.
    pub fn dump(&self) -> QueueDump {
        let queue = self.snapshot();
        QueueDump { name: DEBUG_DUMP_NAME.to_string(), size: queue.len(), queue }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use permsync_domain::Priority;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn ready(acquisition: Acquisition) -> SyncRequest {
        match acquisition {
            Acquisition::Ready(request) => request,
            other => panic!("expected ready request, got {other:?}"),
        }
    }

    fn assert_index_consistent(queue: &RequestQueue) {
        let heap = queue.heap.read();
        assert_eq!(heap.entries.len(), heap.index.len());
        for (slot, entry) in heap.entries.iter().enumerate() {
            assert_eq!(entry.index, slot);
            assert_eq!(heap.index.get(&QueueKey::of(&entry.meta)), Some(&slot));
            if slot > 0 {
                let parent = (slot - 1) / 2;
                assert_ne!(precedence(&heap.entries[slot], &heap.entries[parent]), Ordering::Less);
            }
        }
    }

    /// Validates repeated enqueues of one entity collapse into one entry.
    ///
    /// Assertions:
    /// - Confirms the queue holds exactly one request.
    /// - Confirms the priority is the maximum ever requested.
    /// - Confirms `next_sync_at` is the earliest requested time.
    #[test]
    fn enqueue_merges_requests_for_same_entity() {
        let queue = RequestQueue::new();

        assert!(!queue.enqueue(RequestMeta::user(1, Priority::Low).with_next_sync_at(Some(at(30)))));
        assert!(queue.enqueue(RequestMeta::user(1, Priority::High).with_next_sync_at(Some(at(60)))));
        assert!(queue.enqueue(RequestMeta::user(1, Priority::Low).with_next_sync_at(Some(at(10)))));
        assert!(!queue.enqueue(RequestMeta::user(1, Priority::Low).with_next_sync_at(Some(at(20)))));

        assert_eq!(queue.len(), 1);
        let request = queue.get(RequestType::User, 1).unwrap();
        assert_eq!(request.meta.priority, Priority::High);
        assert_eq!(request.meta.next_sync_at, Some(at(10)));
    }

    /// Validates "as soon as possible" beats any concrete time.
    ///
    /// Assertions:
    /// - Confirms an unset `next_sync_at` replaces a concrete one.
    /// - Confirms a later concrete time does not re-set it.
    #[test]
    fn enqueue_unset_time_wins() {
        let queue = RequestQueue::new();
        queue.enqueue(RequestMeta::repo(7, Priority::Low).with_next_sync_at(Some(at(5))));

        assert!(queue.enqueue(RequestMeta::repo(7, Priority::Low)));
        assert!(!queue.enqueue(RequestMeta::repo(7, Priority::Low).with_next_sync_at(Some(at(1)))));

        assert_eq!(queue.get(RequestType::Repo, 7).unwrap().meta.next_sync_at, None);
    }

    #[test]
    fn enqueue_no_perms_is_sticky() {
        let queue = RequestQueue::new();
        queue.enqueue(RequestMeta::user(3, Priority::Low));

        assert!(queue.enqueue(RequestMeta::user(3, Priority::Low).with_no_perms(true)));
        assert!(!queue.enqueue(RequestMeta::user(3, Priority::Low)));
        assert!(queue.get(RequestType::User, 3).unwrap().meta.no_perms);
    }

    #[test]
    fn users_and_repos_with_same_id_are_distinct() {
        let queue = RequestQueue::new();
        queue.enqueue(RequestMeta::user(1, Priority::Low));
        queue.enqueue(RequestMeta::repo(1, Priority::Low));

        assert_eq!(queue.len(), 2);
    }

    /// Validates acquired requests are not modified by later enqueues.
    ///
    /// Assertions:
    /// - Confirms enqueue returns false for an acquired entity.
    /// - Confirms the acquired request keeps its priority.
    /// - Confirms no second entry is created.
    #[test]
    fn enqueue_ignores_acquired_request() {
        let queue = RequestQueue::new();
        queue.enqueue(RequestMeta::user(1, Priority::Low));
        let acquired = ready(queue.acquire_next(at(0)));
        assert!(acquired.acquired);

        assert!(!queue.enqueue(RequestMeta::user(1, Priority::High)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(RequestType::User, 1).unwrap().meta.priority, Priority::Low);
        assert_eq!(queue.acquire_next(at(0)), Acquisition::Empty);
    }

    /// Validates processing order across priority, due time and arrival.
    ///
    /// Assertions:
    /// - Confirms high priority precedes low priority.
    /// - Confirms unset times precede concrete times within a priority.
    /// - Confirms equal requests come out in arrival order.
    #[test]
    fn acquire_next_follows_precedence() {
        let queue = RequestQueue::new();
        queue.enqueue(RequestMeta::user(1, Priority::Low).with_next_sync_at(Some(at(-10))));
        queue.enqueue(RequestMeta::user(2, Priority::Low));
        queue.enqueue(RequestMeta::repo(3, Priority::High).with_next_sync_at(Some(at(-5))));
        queue.enqueue(RequestMeta::user(4, Priority::Low));
        queue.enqueue(RequestMeta::repo(5, Priority::High));

        let order: Vec<i32> =
            (0..5).map(|_| ready(queue.acquire_next(at(0))).meta.id).collect();

        assert_eq!(order, vec![5, 3, 2, 4, 1]);
        assert_eq!(queue.acquire_next(at(0)), Acquisition::Empty);
        assert_eq!(queue.len(), 5);
    }

    /// Validates a request that is not due is handed back with its wait.
    ///
    /// Assertions:
    /// - Confirms `NotDue` carries exactly `next_sync_at - now`.
    /// - Confirms the request stays queued and unacquired.
    /// - Confirms it is handed out once the time has come.
    #[test]
    fn acquire_next_defers_future_requests() {
        let queue = RequestQueue::new();
        queue.enqueue(RequestMeta::repo(9, Priority::Low).with_next_sync_at(Some(at(90))));

        match queue.acquire_next(at(30)) {
            Acquisition::NotDue { request, wait } => {
                assert_eq!(request.meta.id, 9);
                assert!(!request.acquired);
                assert_eq!(wait, Duration::from_secs(60));
            }
            other => panic!("expected deferral, got {other:?}"),
        }
        assert!(!queue.get(RequestType::Repo, 9).unwrap().acquired);

        let request = ready(queue.acquire_next(at(90)));
        assert_eq!(request.meta.id, 9);
    }

    #[test]
    fn release_makes_request_available_again() {
        let queue = RequestQueue::new();
        queue.enqueue(RequestMeta::user(1, Priority::High));
        queue.enqueue(RequestMeta::user(2, Priority::Low));

        assert_eq!(ready(queue.acquire_next(at(0))).meta.id, 1);
        assert!(queue.release(RequestType::User, 1));
        assert_eq!(ready(queue.acquire_next(at(0))).meta.id, 1);
        assert!(!queue.release(RequestType::User, 99));
        assert_index_consistent(&queue);
    }

    #[test]
    fn remove_drops_request_and_index() {
        let queue = RequestQueue::new();
        for id in 0..6 {
            queue.enqueue(RequestMeta::user(id, Priority::Low));
        }

        assert!(queue.remove(RequestType::User, 2, false));
        assert!(!queue.remove(RequestType::User, 2, false));
        assert!(queue.get(RequestType::User, 2).is_none());
        assert_eq!(queue.len(), 5);
        assert_index_consistent(&queue);

        // Re-enqueue after removal creates a fresh entry.
        assert!(!queue.enqueue(RequestMeta::user(2, Priority::High)));
        assert_eq!(ready(queue.acquire_next(at(0))).meta.id, 2);
    }

    /// Validates the heap and its index stay consistent under mixed
    /// operations.
    ///
    /// Assertions:
    /// - Confirms every slot is indexed and satisfies the heap property.
    /// - Confirms draining yields requests in precedence order.
    #[test]
    fn heap_stays_consistent_under_mixed_operations() {
        let queue = RequestQueue::new();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..500 {
            let id = i32::try_from(next() % 40).unwrap();
            let priority = if next() % 3 == 0 { Priority::High } else { Priority::Low };
            let when = match next() % 4 {
                0 => None,
                n => Some(at(i64::try_from(n).unwrap() * -10)),
            };
            match next() % 5 {
                0 => {
                    queue.remove(RequestType::Repo, id, false);
                }
                1 => {
                    queue.release(RequestType::Repo, id);
                }
                2 => {
                    let _ = queue.acquire_next(at(0));
                }
                _ => {
                    queue.enqueue(RequestMeta::repo(id, priority).with_next_sync_at(when));
                }
            }
            assert_index_consistent(&queue);
        }

        let expected: Vec<QueuedRequestInfo> =
            queue.snapshot().into_iter().filter(|info| !info.acquired).collect();
        let mut drained = Vec::new();
        while let Acquisition::Ready(request) = queue.acquire_next(at(0)) {
            drained.push(request.meta);
        }
        assert_eq!(drained, expected.into_iter().map(|info| info.meta).collect::<Vec<_>>());
    }

    #[test]
    fn dump_lists_requests_in_processing_order() {
        let queue = RequestQueue::new();
        queue.enqueue(RequestMeta::user(1, Priority::Low));
        queue.enqueue(RequestMeta::repo(2, Priority::High));
        queue.enqueue(RequestMeta::user(3, Priority::High));
        let _ = queue.acquire_next(at(0));

        let dump = queue.dump();

        assert_eq!(dump.name, "permissions");
        assert_eq!(dump.size, 3);
        let ids: Vec<(i32, bool)> = dump.queue.iter().map(|i| (i.meta.id, i.acquired)).collect();
        assert_eq!(ids, vec![(3, false), (1, false), (2, true)]);
    }

    #[test]
    fn dump_shows_first_sync_requests() {
        let queue = RequestQueue::new();
        queue.enqueue(RequestMeta::user(1, Priority::Low).with_no_perms(true));
        queue.enqueue(RequestMeta::repo(2, Priority::Low));

        let json = serde_json::to_value(queue.dump()).unwrap();

        assert_eq!(json["queue"][0]["meta"]["no_perms"], true);
        assert_eq!(json["queue"][1]["meta"]["no_perms"], false);
    }

    #[tokio::test]
    async fn enqueue_signal_is_buffered_once() {
        let queue = RequestQueue::new();
        queue.enqueue(RequestMeta::user(1, Priority::Low));
        queue.enqueue(RequestMeta::user(2, Priority::Low));

        tokio::time::timeout(Duration::from_millis(100), queue.notified())
            .await
            .expect("buffered signal");
        let second = tokio::time::timeout(Duration::from_millis(20), queue.notified()).await;
        assert!(second.is_err(), "only one signal is buffered");
    }
}
