//! Route queries consumed by the network model.
//!
//! The kernel never inspects how routes are computed; it only asks for the ordered link
//! list and the end-to-end latency between two hosts. The shipped implementation is a
//! full matrix filled from the platform description; smarter zone-based implementations
//! can be plugged in through the [Routing] trait.

use std::collections::BTreeMap;

use crate::platform::{HostId, LinkId};

/// An ordered link path and its accumulated propagation latency.
#[derive(Clone, Debug)]
pub struct RouteEntry {
    pub links: Vec<LinkId>,
    pub latency: f64,
}

/// Answers route queries between hosts.
pub trait Routing {
    fn route(&self, src: HostId, dst: HostId) -> Option<&RouteEntry>;
}

/// Explicit route matrix.
#[derive(Default)]
pub struct FullRouting {
    table: BTreeMap<(HostId, HostId), RouteEntry>,
}

impl FullRouting {
    pub fn new() -> Self {
        FullRouting::default()
    }

    /// Registers a route; with `symmetric` the reversed link list also serves dst→src.
    pub fn add_route(&mut self, src: HostId, dst: HostId, links: Vec<LinkId>, latency: f64, symmetric: bool) {
        if symmetric {
            let mut back = links.clone();
            back.reverse();
            self.table.insert((dst, src), RouteEntry { links: back, latency });
        }
        self.table.insert((src, dst), RouteEntry { links, latency });
    }
}

impl Routing for FullRouting {
    fn route(&self, src: HostId, dst: HostId) -> Option<&RouteEntry> {
        self.table.get(&(src, dst))
    }
}
