use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};

use tsif_core::{NetworkRange, Result, TsifError};

/// Forward-only address cursor over a network range.
///
/// Addresses are handed out in increasing order and never reused, even after
/// the guest holding one is gone. The cursor is a compare-and-swap counter,
/// so concurrent callers never receive the same address.
#[derive(Debug)]
pub struct AddressAllocator {
    network: NetworkRange,
    next: AtomicU32,
    last: u32,
}

impl AddressAllocator {
    /// Allocator whose first address follows the range gateway.
    pub fn new(network: NetworkRange) -> Self {
        Self::starting_after(network, network.gateway())
    }

    /// Allocator whose first address is `seed + 1`.
    pub fn starting_after(network: NetworkRange, seed: Ipv4Addr) -> Self {
        Self {
            network,
            next: AtomicU32::new(u32::from(seed).saturating_add(1)),
            last: u32::from(network.last_host()),
        }
    }

    pub fn next(&self) -> Result<Ipv4Addr> {
        let last = self.last;
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current <= last).then(|| current + 1)
            })
            .map(Ipv4Addr::from)
            .map_err(|_| TsifError::AddressSpaceExhausted {
                network: self.network.to_string(),
                last: Ipv4Addr::from(last),
            })
    }

    /// Addresses still available.
    pub fn remaining(&self) -> u32 {
        let next = self.next.load(Ordering::SeqCst);
        if next > self.last {
            0
        } else {
            self.last - next + 1
        }
    }

    pub fn network(&self) -> &NetworkRange {
        &self.network
    }
}
