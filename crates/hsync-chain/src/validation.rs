//! Header chain validation.

use crate::{verify_seal, ChainError, ChainResult, Header};
use tracing::debug;

/// Validate an ordered batch of headers before import.
///
/// Every consecutive pair must be linked by number and parent hash. The
/// seal of every `check_freq`-th header, and always the last one, must
/// verify. A `check_freq` of zero is treated as one.
pub fn validate_header_chain(headers: &[Header], check_freq: usize) -> ChainResult<()> {
    let hashes: Vec<_> = headers.iter().map(Header::hash).collect();

    for i in 1..headers.len() {
        let (prev, cur) = (&headers[i - 1], &headers[i]);
        if prev.number.checked_add(1) != Some(cur.number) || cur.parent_hash != hashes[i - 1] {
            debug!(
                index = i,
                number = cur.number,
                prev_number = prev.number,
                "Non contiguous header batch"
            );
            return Err(ChainError::NonContiguous {
                index: i,
                number: cur.number,
                hash: hashes[i].to_string(),
                prev_index: i - 1,
                prev_number: prev.number,
                prev_hash: hashes[i - 1].to_string(),
            });
        }
    }

    let freq = check_freq.max(1);
    let last = headers.len().saturating_sub(1);
    for (i, header) in headers.iter().enumerate() {
        if i % freq != 0 && i != last {
            continue;
        }
        if !verify_seal(header) {
            return Err(ChainError::InvalidSeal {
                index: i,
                number: header.number,
                hash: hashes[i].to_string(),
            });
        }
    }

    Ok(())
}
