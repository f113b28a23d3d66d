//! Header request scheduler.
//!
//! Holds the fill tasks of one skeleton: every task covers
//! `max_header_fetch` headers ending in a known skeleton header. Tasks are
//! handed out lowest first, one per peer; a delivery must map cleanly onto
//! its skeleton header or the task goes back to the queue and the peer is
//! remembered as unable to serve it. Completed prefixes are pushed to the
//! processor without waiting.

use crate::{SyncError, SyncResult};
use hsync_chain::Header;
use hsync_network::PeerId;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// One outstanding fill request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Peer the request was sent to.
    pub peer: PeerId,
    /// First header number of the task.
    pub from: u64,
    /// When the request was reserved.
    pub time: Instant,
}

#[derive(Default)]
struct QueueState {
    /// Task start number to the skeleton header closing the task.
    task_pool: HashMap<u64, Header>,
    /// Task start numbers, lowest first.
    task_queue: BinaryHeap<Reverse<u64>>,
    /// Tasks each peer failed to deliver.
    peer_misses: HashMap<PeerId, HashSet<u64>>,
    /// Outstanding requests, at most one per peer.
    pending: HashMap<PeerId, FetchRequest>,
    /// Expired requests per peer across the session.
    timeouts: HashMap<PeerId, usize>,
    /// Filled headers, indexed from `offset`.
    results: Vec<Option<Header>>,
    /// Results already handed to the processor.
    proced: usize,
    offset: u64,
}

/// Scheduler for skeleton fill requests.
pub struct HeaderQueue {
    max_header_fetch: u64,
    state: Mutex<QueueState>,
}

impl HeaderQueue {
    pub fn new(max_header_fetch: u64) -> Self {
        Self {
            max_header_fetch,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Forget all tasks, requests and per-peer history.
    pub fn reset(&self) {
        *self.state.lock() = QueueState::default();
    }

    /// Schedule fill tasks for a skeleton whose first task starts at `from`.
    pub fn schedule_skeleton(&self, from: u64, skeleton: &[Header]) {
        let mut state = self.state.lock();
        state.task_pool.clear();
        state.task_queue.clear();
        state.peer_misses.clear();
        state.pending.clear();
        state.results = vec![None; skeleton.len() * self.max_header_fetch as usize];
        state.proced = 0;
        state.offset = from;

        for (i, header) in skeleton.iter().enumerate() {
            let index = from + i as u64 * self.max_header_fetch;
            state.task_pool.insert(index, header.clone());
            state.task_queue.push(Reverse(index));
        }
        debug!(from, tasks = skeleton.len(), "Scheduled skeleton fill");
    }

    /// Reserve the lowest task this peer has not failed before. Returns
    /// `None` when the peer already has a request out or nothing suits it.
    pub fn reserve_headers(&self, peer: &PeerId) -> Option<FetchRequest> {
        let mut state = self.state.lock();
        if state.pending.contains_key(peer) {
            return None;
        }

        let mut skipped = Vec::new();
        let mut send = None;
        while let Some(Reverse(from)) = state.task_queue.pop() {
            let missed = state
                .peer_misses
                .get(peer)
                .map_or(false, |misses| misses.contains(&from));
            if missed {
                skipped.push(from);
                continue;
            }
            send = Some(from);
            break;
        }
        for from in skipped {
            state.task_queue.push(Reverse(from));
        }

        let request = FetchRequest {
            peer: peer.clone(),
            from: send?,
            time: Instant::now(),
        };
        state.pending.insert(peer.clone(), request.clone());
        Some(request)
    }

    /// Return a reserved task to the queue without penalising the peer.
    pub fn cancel_headers(&self, request: &FetchRequest) {
        let mut state = self.state.lock();
        if state.pending.remove(&request.peer).is_some() {
            state.task_queue.push(Reverse(request.from));
        }
    }

    /// Expire requests older than `ttl`, requeueing their tasks. Returns the
    /// peers that timed out with their running timeout count.
    pub fn expire_headers(&self, ttl: Duration) -> HashMap<PeerId, usize> {
        let mut state = self.state.lock();
        let expired: Vec<FetchRequest> = state
            .pending
            .values()
            .filter(|req| req.time.elapsed() >= ttl)
            .cloned()
            .collect();

        let mut result = HashMap::new();
        for req in expired {
            state.pending.remove(&req.peer);
            state.task_queue.push(Reverse(req.from));
            let count = state.timeouts.entry(req.peer.clone()).or_insert(0);
            *count += 1;
            trace!(peer = %req.peer, from = req.from, timeouts = *count, "Header request expired");
            result.insert(req.peer, *count);
        }
        result
    }

    /// Tasks waiting to be requested.
    pub fn pending_headers(&self) -> usize {
        self.state.lock().task_queue.len()
    }

    /// Whether any request is outstanding.
    pub fn in_flight_headers(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    /// Whether every task of the skeleton has been filled.
    pub fn is_filled(&self) -> bool {
        self.state.lock().task_pool.is_empty()
    }

    /// Match a delivery to the peer's outstanding request.
    ///
    /// The batch must be exactly `max_header_fetch` contiguous headers
    /// starting at the task start and ending in the skeleton header. Any
    /// ready prefix of the results is then offered to `proc_tx`.
    pub fn deliver_headers(
        &self,
        peer: &PeerId,
        headers: Vec<Header>,
        proc_tx: &mpsc::Sender<Vec<Header>>,
    ) -> SyncResult<usize> {
        let mut state = self.state.lock();
        let Some(request) = state.pending.remove(peer) else {
            return Err(SyncError::StaleDelivery);
        };

        let target = state.task_pool.get(&request.from).map(Header::hash);
        let accepted = headers.len() as u64 == self.max_header_fetch
            && headers.first().map(|h| h.number) == Some(request.from)
            && headers.last().map(Header::hash) == target
            && headers.windows(2).all(|pair| {
                pair[1].number == pair[0].number + 1 && pair[1].parent_hash == pair[0].hash()
            });

        if !accepted {
            state
                .peer_misses
                .entry(peer.clone())
                .or_default()
                .insert(request.from);
            state.task_queue.push(Reverse(request.from));
            return Err(SyncError::BadPeer(format!(
                "delivery for task {} not accepted",
                request.from
            )));
        }

        let start = (request.from - state.offset) as usize;
        let count = headers.len();
        for (slot, header) in state.results[start..start + count]
            .iter_mut()
            .zip(headers)
        {
            *slot = Some(header);
        }
        state.task_pool.remove(&request.from);

        let step = self.max_header_fetch as usize;
        let mut ready = 0;
        while state.proced + ready < state.results.len()
            && state.results[state.proced + ready].is_some()
        {
            ready += step;
        }
        if ready > 0 {
            let begin = state.proced;
            let process: Vec<Header> = state.results[begin..begin + ready]
                .iter()
                .flatten()
                .cloned()
                .collect();
            if proc_tx.try_send(process).is_ok() {
                state.proced += ready;
            }
        }

        Ok(count)
    }

    /// Take the filled results and the number already handed over.
    pub fn retrieve_headers(&self) -> (Vec<Header>, usize) {
        let mut state = self.state.lock();
        let results = std::mem::take(&mut state.results);
        let proced = std::mem::replace(&mut state.proced, 0);
        let filled = results.into_iter().map_while(|h| h).collect();
        (filled, proced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsync_chain::BlockHash;

    const FETCH: u64 = 4;

    /// Headers 1..=len chained from a zero parent, unsealed.
    fn chain(len: u64) -> Vec<Header> {
        let mut headers: Vec<Header> = Vec::new();
        let mut parent = BlockHash::ZERO;
        for number in 1..=len {
            let header = Header::new(parent, number, number, 1);
            parent = header.hash();
            headers.push(header);
        }
        headers
    }

    fn slice(headers: &[Header], from: u64) -> Vec<Header> {
        headers[(from - 1) as usize..(from - 1 + FETCH) as usize].to_vec()
    }

    fn skeleton(headers: &[Header], tasks: u64) -> Vec<Header> {
        (1..=tasks)
            .map(|i| headers[(i * FETCH - 1) as usize].clone())
            .collect()
    }

    fn peer(id: u8) -> PeerId {
        PeerId::from_bytes(vec![id])
    }

    #[test]
    fn test_reserve_lowest_first_one_per_peer() {
        let headers = chain(12);
        let queue = HeaderQueue::new(FETCH);
        queue.schedule_skeleton(1, &skeleton(&headers, 3));
        assert_eq!(queue.pending_headers(), 3);

        assert_eq!(queue.reserve_headers(&peer(1)).unwrap().from, 1);
        assert!(queue.reserve_headers(&peer(1)).is_none());
        assert_eq!(queue.reserve_headers(&peer(2)).unwrap().from, 5);
        assert_eq!(queue.pending_headers(), 1);
        assert!(queue.in_flight_headers());
    }

    #[test]
    fn test_deliveries_fill_in_order() {
        let headers = chain(8);
        let queue = HeaderQueue::new(FETCH);
        let (tx, mut rx) = mpsc::channel(4);
        queue.schedule_skeleton(1, &skeleton(&headers, 2));

        queue.reserve_headers(&peer(1)).unwrap();
        queue.reserve_headers(&peer(2)).unwrap();

        // Second task first: nothing ready yet
        assert_eq!(
            queue
                .deliver_headers(&peer(2), slice(&headers, 5), &tx)
                .unwrap(),
            4
        );
        assert!(rx.try_recv().is_err());
        assert!(!queue.is_filled());

        queue
            .deliver_headers(&peer(1), slice(&headers, 1), &tx)
            .unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch, headers);
        assert!(queue.is_filled());

        let (filled, proced) = queue.retrieve_headers();
        assert_eq!(filled.len(), 8);
        assert_eq!(proced, 8);
    }

    #[test]
    fn test_stale_delivery_is_discarded() {
        let headers = chain(4);
        let queue = HeaderQueue::new(FETCH);
        let (tx, _rx) = mpsc::channel(4);
        queue.schedule_skeleton(1, &skeleton(&headers, 1));

        queue.reserve_headers(&peer(1)).unwrap();
        queue
            .deliver_headers(&peer(1), slice(&headers, 1), &tx)
            .unwrap();
        assert!(matches!(
            queue.deliver_headers(&peer(1), slice(&headers, 1), &tx),
            Err(SyncError::StaleDelivery)
        ));
        let (filled, _) = queue.retrieve_headers();
        assert_eq!(filled.len(), 4);
    }

    #[test]
    fn test_bad_delivery_requeues_and_marks_miss() {
        let headers = chain(4);
        let queue = HeaderQueue::new(FETCH);
        let (tx, _rx) = mpsc::channel(4);
        queue.schedule_skeleton(1, &skeleton(&headers, 1));

        queue.reserve_headers(&peer(1)).unwrap();
        let mut forged = slice(&headers, 1);
        forged[3] = Header::new(forged[2].hash(), 4, 99, 1);
        assert!(matches!(
            queue.deliver_headers(&peer(1), forged, &tx),
            Err(SyncError::BadPeer(_))
        ));

        // The liar never gets the task again, others do
        assert_eq!(queue.pending_headers(), 1);
        assert!(queue.reserve_headers(&peer(1)).is_none());
        assert_eq!(queue.pending_headers(), 1);
        assert_eq!(queue.reserve_headers(&peer(2)).unwrap().from, 1);
    }

    #[test]
    fn test_short_delivery_rejected() {
        let headers = chain(4);
        let queue = HeaderQueue::new(FETCH);
        let (tx, _rx) = mpsc::channel(4);
        queue.schedule_skeleton(1, &skeleton(&headers, 1));
        queue.reserve_headers(&peer(1)).unwrap();
        assert!(queue
            .deliver_headers(&peer(1), headers[..3].to_vec(), &tx)
            .is_err());
    }

    #[test]
    fn test_expire_counts_timeouts() {
        let headers = chain(8);
        let queue = HeaderQueue::new(FETCH);
        queue.schedule_skeleton(1, &skeleton(&headers, 2));

        queue.reserve_headers(&peer(1)).unwrap();
        assert!(queue.expire_headers(Duration::from_secs(60)).is_empty());

        let expired = queue.expire_headers(Duration::ZERO);
        assert_eq!(expired.get(&peer(1)), Some(&1));
        assert!(!queue.in_flight_headers());
        assert_eq!(queue.pending_headers(), 2);

        queue.reserve_headers(&peer(1)).unwrap();
        let expired = queue.expire_headers(Duration::ZERO);
        assert_eq!(expired.get(&peer(1)), Some(&2));
    }

    #[test]
    fn test_cancel_returns_task() {
        let headers = chain(4);
        let queue = HeaderQueue::new(FETCH);
        queue.schedule_skeleton(1, &skeleton(&headers, 1));
        let request = queue.reserve_headers(&peer(1)).unwrap();
        assert_eq!(queue.pending_headers(), 0);
        queue.cancel_headers(&request);
        assert_eq!(queue.pending_headers(), 1);
        assert!(!queue.in_flight_headers());
    }

    #[test]
    fn test_full_processor_keeps_results() {
        let headers = chain(4);
        let queue = HeaderQueue::new(FETCH);
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(Vec::new()).unwrap();
        queue.schedule_skeleton(1, &skeleton(&headers, 1));
        queue.reserve_headers(&peer(1)).unwrap();
        queue
            .deliver_headers(&peer(1), slice(&headers, 1), &tx)
            .unwrap();

        let (filled, proced) = queue.retrieve_headers();
        assert_eq!(filled, headers);
        assert_eq!(proced, 0);
    }
}
