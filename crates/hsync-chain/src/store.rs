//! Header chain storage.
//!
//! The sync engine only depends on the `ChainStore` trait. The in-memory
//! implementation keeps every imported header, the total difficulty of
//! each, and a canonical number to hash index that follows the heaviest
//! known chain.

use crate::{validate_header_chain, BlockHash, ChainError, ChainResult, Header, Weight};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Storage interface consumed by the downloader.
pub trait ChainStore: Send + Sync {
    /// Whether `hash` is the canonical header at height `number`.
    fn has_header(&self, hash: &BlockHash, number: u64) -> bool;

    /// Look up any stored header by hash.
    fn header_by_hash(&self, hash: &BlockHash) -> Option<Header>;

    /// Canonical header at a height.
    fn header_by_number(&self, number: u64) -> Option<Header>;

    /// Head of the canonical chain.
    fn current_header(&self) -> Header;

    /// Total difficulty of a stored header.
    fn total_difficulty(&self, hash: &BlockHash, number: u64) -> Option<Weight>;

    /// Import an ordered batch of headers.
    ///
    /// The batch is validated as a whole first; a contiguity or seal failure
    /// inserts nothing. Returns the number of headers processed.
    fn insert_header_chain(&self, headers: &[Header], check_freq: usize) -> ChainResult<usize>;
}

struct ChainState {
    headers: HashMap<BlockHash, Header>,
    tds: HashMap<BlockHash, Weight>,
    canonical: BTreeMap<u64, BlockHash>,
    head: BlockHash,
}

/// In-memory header chain with total-difficulty fork choice.
pub struct MemoryChainStore {
    state: RwLock<ChainState>,
}

impl MemoryChainStore {
    /// Create a store seeded with a trusted anchor header (genesis or a
    /// checkpoint). The anchor's total difficulty is its own difficulty.
    pub fn new(anchor: Header) -> Self {
        let hash = anchor.hash();
        let mut canonical = BTreeMap::new();
        canonical.insert(anchor.number, hash);
        let mut tds = HashMap::new();
        tds.insert(hash, Weight::from(anchor.difficulty));
        let mut headers = HashMap::new();
        headers.insert(hash, anchor);

        Self {
            state: RwLock::new(ChainState {
                headers,
                tds,
                canonical,
                head: hash,
            }),
        }
    }

    /// Total difficulty of the canonical head.
    pub fn current_td(&self) -> Weight {
        let state = self.state.read();
        state.tds.get(&state.head).cloned().unwrap_or_default()
    }

    /// Number of stored headers, canonical or not.
    pub fn len(&self) -> usize {
        self.state.read().headers.len()
    }

    /// Whether the store only holds its anchor.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl ChainState {
    /// Make `hash` the head, rewriting canonical entries back to the fork point.
    fn set_head(&mut self, hash: BlockHash, number: u64) {
        // Drop entries of the old, now lighter, chain above the new head
        if let Some(above) = number.checked_add(1) {
            let _ = self.canonical.split_off(&above);
        }
        self.canonical.insert(number, hash);

        let mut cursor = self.headers.get(&hash).map(|h| h.parent_hash);
        let mut height = number;
        while let Some(parent) = cursor {
            if height == 0 {
                break;
            }
            height -= 1;
            if self.canonical.get(&height) == Some(&parent) {
                break;
            }
            match self.headers.get(&parent) {
                Some(header) => {
                    self.canonical.insert(height, parent);
                    cursor = Some(header.parent_hash);
                }
                None => break,
            }
        }
        self.head = hash;
    }
}

impl ChainStore for MemoryChainStore {
    fn has_header(&self, hash: &BlockHash, number: u64) -> bool {
        self.state.read().canonical.get(&number) == Some(hash)
    }

    fn header_by_hash(&self, hash: &BlockHash) -> Option<Header> {
        self.state.read().headers.get(hash).cloned()
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        let state = self.state.read();
        state
            .canonical
            .get(&number)
            .and_then(|hash| state.headers.get(hash))
            .cloned()
    }

    fn current_header(&self) -> Header {
        let state = self.state.read();
        // The head always refers to a stored header
        state
            .headers
            .get(&state.head)
            .cloned()
            .unwrap_or_else(|| Header::new(BlockHash::ZERO, 0, 0, 0))
    }

    fn total_difficulty(&self, hash: &BlockHash, number: u64) -> Option<Weight> {
        let state = self.state.read();
        match state.headers.get(hash) {
            Some(header) if header.number == number => state.tds.get(hash).cloned(),
            _ => None,
        }
    }

    fn insert_header_chain(&self, headers: &[Header], check_freq: usize) -> ChainResult<usize> {
        if headers.is_empty() {
            return Ok(0);
        }
        validate_header_chain(headers, check_freq)?;

        let mut state = self.state.write();
        let mut reorgs = 0usize;
        for (index, header) in headers.iter().enumerate() {
            let hash = header.hash();
            if state.headers.contains_key(&hash) {
                continue;
            }
            // The parent must be stored one height below
            let parent_td = match state
                .headers
                .get(&header.parent_hash)
                .filter(|parent| parent.number.checked_add(1) == Some(header.number))
                .and_then(|_| state.tds.get(&header.parent_hash))
            {
                Some(td) => td.clone(),
                None => {
                    return Err(ChainError::UnknownParent {
                        index,
                        number: header.number,
                        parent: header.parent_hash.to_string(),
                    })
                }
            };
            let td = parent_td + Weight::from(header.difficulty);
            let head_td = state.tds.get(&state.head).cloned().unwrap_or_default();

            state.headers.insert(hash, header.clone());
            state.tds.insert(hash, td.clone());

            if td > head_td {
                let extends_head = header.parent_hash == state.head;
                state.set_head(hash, header.number);
                if !extends_head {
                    reorgs += 1;
                }
            }
        }

        let head = state.head;
        let head_number = state.headers.get(&head).map(|h| h.number).unwrap_or(0);
        if reorgs > 0 {
            info!(reorgs, head_number, head = ?head, "Canonical chain reorganised");
        }
        debug!(
            count = headers.len(),
            first = headers[0].number,
            head_number,
            "Imported header chain"
        );
        Ok(headers.len())
    }
}
