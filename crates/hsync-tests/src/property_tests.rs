//! Property-based tests for the scheduling and ranking invariants.

use crate::generators::{chain, shuffled, store};
use hsync_chain::{BlockHash, ChainStore, Header, Weight};
use hsync_network::{Peer, PeerId, PeerRegistry, PROTOCOL_VERSION};
use hsync_sync::{compute_ttl, HeaderQueue};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn registered(id: u16, td: u64) -> Arc<Peer> {
    let (tx, _rx) = mpsc::channel(1);
    Arc::new(Peer::new(
        PeerId::from_bytes(id.to_be_bytes().to_vec()),
        PROTOCOL_VERSION,
        BlockHash::ZERO,
        Weight::from(td),
        tx,
    ))
}

/// Unsealed headers `1..=len` chained from a zero parent.
fn unsealed(len: u64) -> Vec<Header> {
    let mut headers: Vec<Header> = Vec::new();
    let mut parent = BlockHash::ZERO;
    for number in 1..=len {
        let header = Header::new(parent, number, number, 1);
        parent = header.hash();
        headers.push(header);
    }
    headers
}

// ============================================================================
// Peer registry
// ============================================================================

proptest! {
    #[test]
    fn prop_ranked_by_weight_ties_in_registration_order(
        tds in prop::collection::vec(0u64..5, 1..24)
    ) {
        let registry = PeerRegistry::new();
        for (i, td) in tds.iter().enumerate() {
            registry.add(registered(i as u16, *td)).unwrap();
        }

        let ranked: Vec<u16> = registry
            .ranked_ids()
            .into_iter()
            .map(|id| u16::from_be_bytes([id.0[0], id.0[1]]))
            .collect();

        let mut expected: Vec<u16> = (0..tds.len() as u16).collect();
        expected.sort_by(|a, b| tds[*b as usize].cmp(&tds[*a as usize]));
        prop_assert_eq!(ranked, expected);
    }

    #[test]
    fn prop_best_peer_rotates_fairly(
        top in 1usize..6,
        others in 0usize..6,
        rounds in 1usize..5
    ) {
        let registry = PeerRegistry::new();
        for i in 0..others {
            registry.add(registered(100 + i as u16, 10)).unwrap();
        }
        for i in 0..top {
            registry.add(registered(i as u16, 50)).unwrap();
        }

        for _ in 0..top * rounds {
            let best = registry.best_peer().unwrap();
            prop_assert_eq!(best.td(), &Weight::from(50u64));
        }
        for i in 0..top {
            let id = PeerId::from_bytes((i as u16).to_be_bytes().to_vec());
            prop_assert_eq!(registry.times_selected(&id), rounds as u64);
        }
    }
}

// ============================================================================
// Chain store
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_non_contiguous_batch_inserts_nothing(gap in 2usize..30) {
        let headers = chain(32);
        let local = store(&headers[..1]);

        let mut batch = headers[1..].to_vec();
        batch.remove(gap);

        prop_assert!(local.insert_header_chain(&batch, 1).is_err());
        prop_assert_eq!(local.len(), 1);
        prop_assert_eq!(local.current_header(), headers[0].clone());
    }
}

// ============================================================================
// QoS
// ============================================================================

proptest! {
    #[test]
    fn prop_ttl_bounded_and_monotone(
        rtt_ms in 0u64..30_000,
        extra_ms in 0u64..30_000,
        confidence in 0.01f64..1.0,
        less in 0.0f64..1.0
    ) {
        let limit = Duration::from_secs(60);
        let rtt = Duration::from_millis(rtt_ms);
        let ttl = compute_ttl(rtt, confidence, 3, limit);

        prop_assert!(ttl <= limit);
        prop_assert!(compute_ttl(rtt + Duration::from_millis(extra_ms), confidence, 3, limit) >= ttl);
        prop_assert!(compute_ttl(rtt, confidence * less, 3, limit) >= ttl);
    }
}

// ============================================================================
// Header queue
// ============================================================================

proptest! {
    #[test]
    fn prop_fill_in_any_order_yields_ordered_results(
        tasks in 1u64..12,
        seed in any::<u64>()
    ) {
        const FETCH: u64 = 4;
        let headers = unsealed(tasks * FETCH);
        let skeleton: Vec<Header> = (1..=tasks)
            .map(|i| headers[(i * FETCH - 1) as usize].clone())
            .collect();

        let queue = HeaderQueue::new(FETCH);
        queue.schedule_skeleton(1, &skeleton);

        let mut reserved = Vec::new();
        for i in 0..tasks {
            let peer = PeerId::from_bytes(vec![i as u8]);
            let request = queue.reserve_headers(&peer).unwrap();
            reserved.push((peer, request.from));
        }
        prop_assert_eq!(queue.pending_headers(), 0);

        let (proc_tx, mut proc_rx) = mpsc::channel(tasks as usize);
        for (peer, from) in shuffled(&reserved, seed) {
            let start = (from - 1) as usize;
            let batch = headers[start..start + FETCH as usize].to_vec();
            prop_assert_eq!(queue.deliver_headers(&peer, batch, &proc_tx).unwrap(), FETCH as usize);
        }
        prop_assert!(queue.is_filled());

        let mut processed = Vec::new();
        while let Ok(chunk) = proc_rx.try_recv() {
            processed.extend(chunk);
        }
        prop_assert_eq!(processed, headers);
    }
}
