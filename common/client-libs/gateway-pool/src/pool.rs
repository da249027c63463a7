// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::error::PoolError;
use crate::host::GatewayHost;
use crate::identity::GatewayId;
use crate::ndf::Universe;
use rand::seq::IteratorRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::trace;

/// Fixed capacity set of gateway connections.
///
/// Hosts are appended until the capacity is reached, after which every addition replaces
/// an existing slot. Slots may hold hosts that have since disconnected; those are never
/// handed out by the selection methods.
pub struct Pool<H> {
    members: HashMap<GatewayId, usize>,
    slots: Vec<Arc<H>>,
    capacity: usize,
}

// manual impl to avoid requiring `H: Clone`
impl<H> Clone for Pool<H> {
    fn clone(&self) -> Self {
        Pool {
            members: self.members.clone(),
            slots: self.slots.clone(),
            capacity: self.capacity,
        }
    }
}

impl<H: GatewayHost> Debug for Pool<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity)
            .field("members", &self.member_ids())
            .finish()
    }
}

impl<H: GatewayHost> Pool<H> {
    pub fn new(capacity: usize) -> Self {
        Pool {
            members: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied slots, connected or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, gateway: &GatewayId) -> Option<Arc<H>> {
        self.members
            .get(gateway)
            .map(|&index| Arc::clone(&self.slots[index]))
    }

    pub fn has(&self, gateway: &GatewayId) -> bool {
        self.members.contains_key(gateway)
    }

    /// Number of members that are currently connected.
    pub fn size(&self) -> usize {
        self.slots.iter().filter(|host| host.is_connected()).count()
    }

    pub fn is_ready(&self) -> Result<(), PoolError> {
        trace!("there are {} hosts in the pool", self.slots.len());
        if self.slots.iter().any(|host| host.is_connected()) {
            Ok(())
        } else {
            Err(PoolError::NotReady)
        }
    }

    /// Identities in slot order.
    pub fn member_ids(&self) -> Vec<GatewayId> {
        self.slots.iter().map(|host| host.identity()).collect()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Arc<H>> {
        self.slots.iter()
    }

    /// Returns up to `n` distinct connected members, none of which is in `excluded`.
    pub fn get_any<R: Rng + ?Sized>(
        &self,
        n: usize,
        excluded: &[GatewayId],
        rng: &mut R,
    ) -> Vec<Arc<H>> {
        let slots = self.slots.len();
        let wanted = n.min(slots);

        let mut checked: HashSet<usize> = excluded
            .iter()
            .filter_map(|gateway| self.members.get(gateway).copied())
            .collect();

        let mut selected = Vec::with_capacity(wanted);
        while selected.len() < wanted && checked.len() < slots {
            let index = rng.gen_range(0..slots);
            if !checked.insert(index) {
                continue;
            }

            let host = &self.slots[index];
            if host.is_connected() {
                selected.push(Arc::clone(host));
            }
        }
        selected
    }

    /// Returns the member for `gateway` as long as it is connected.
    pub fn get_specific(&self, gateway: &GatewayId) -> Option<Arc<H>> {
        let host = self.get(gateway)?;
        if host.is_connected() {
            Some(host)
        } else {
            None
        }
    }

    /// Maps every target onto a connected member: itself if it's in the pool and a random proxy
    /// otherwise. The result keeps the order of `targets`. Targets for which no distinct
    /// proxy is left are omitted.
    pub fn get_preferred<R: Rng + ?Sized>(
        &self,
        targets: &[GatewayId],
        rng: &mut R,
    ) -> Vec<(GatewayId, Arc<H>)> {
        let slots = self.slots.len();
        let mut checked = HashSet::new();

        let mut assigned: Vec<Option<Arc<H>>> = targets
            .iter()
            .map(|target| {
                let host = self.get_specific(target)?;
                checked.insert(*target);
                Some(host)
            })
            .collect();

        for slot in assigned.iter_mut().filter(|slot| slot.is_none()) {
            while checked.len() < slots {
                let candidate = &self.slots[rng.gen_range(0..slots)];
                if !checked.insert(candidate.identity()) {
                    continue;
                }
                if candidate.is_connected() {
                    *slot = Some(Arc::clone(candidate));
                    break;
                }
            }
        }

        targets
            .iter()
            .zip(assigned)
            .filter_map(|(target, host)| host.map(|host| (*target, host)))
            .collect()
    }

    /// Appends the host if there's still space, otherwise it replaces a uniformly chosen slot
    /// and returns the evicted host.
    pub fn add_or_replace<R: Rng + ?Sized>(&mut self, rng: &mut R, host: Arc<H>) -> Option<Arc<H>> {
        if self.slots.len() < self.capacity {
            trace!("appending {} to the pool", host.identity());
            self.members.insert(host.identity(), self.slots.len());
            self.slots.push(host);
            None
        } else if self.slots.is_empty() {
            None
        } else {
            let index = rng.gen_range(0..self.slots.len());
            trace!("replacing slot {index} with {}", host.identity());
            Some(self.replace_at(index, host))
        }
    }

    pub fn replace_specific(
        &mut self,
        gateway: &GatewayId,
        host: Arc<H>,
    ) -> Result<Arc<H>, PoolError> {
        let index = *self
            .members
            .get(gateway)
            .ok_or(PoolError::NotInPool { gateway: *gateway })?;
        Ok(self.replace_at(index, host))
    }

    fn replace_at(&mut self, index: usize, host: Arc<H>) -> Arc<H> {
        let evicted = std::mem::replace(&mut self.slots[index], host);
        self.members.remove(&evicted.identity());
        self.members.insert(self.slots[index].identity(), index);
        evicted
    }

    /// Picks up to `count` gateways from the universe that are neither members nor already being
    /// tested, and marks them as being tested.
    pub fn select_new<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        universe: &Universe,
        in_progress: &mut HashSet<GatewayId>,
        count: usize,
    ) -> Result<Vec<GatewayId>, PoolError> {
        let candidates = universe
            .keys()
            .filter(|gateway| !self.members.contains_key(gateway))
            .filter(|gateway| !in_progress.contains(gateway));

        let selected: Vec<GatewayId> = candidates.copied().choose_multiple(rng, count);
        if selected.is_empty() {
            return Err(PoolError::NoCandidates);
        }

        in_progress.extend(selected.iter().copied());
        Ok(selected)
    }
}
