// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::bucket::OnlineBucket;
use crate::config::{Config, DerivedParams};
use crate::host::{GatewayHost, HostManager};
use crate::host_pool::{
    build_universe, AddRequestReceiver, AddRequestSender, DiscoverySender, NdfReceiver,
    RemoveRequestReceiver,
};
use crate::identity::GatewayId;
use crate::ndf::{GatewayFilter, NetworkDefinition, Universe};
use crate::pool::Pool;
use crate::random::RandomSource;
use crate::storage::host_list::save_host_list;
use crate::storage::PrefixedStore;
use arc_swap::ArcSwap;
use nym_task::{spawn_future, ShutdownToken};
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

pub(crate) type TestBatch<H> = Vec<Arc<H>>;

pub(crate) struct Mailboxes<H> {
    pub(crate) add_rx: AddRequestReceiver,
    pub(crate) remove_rx: RemoveRequestReceiver,
    pub(crate) new_host_rx: mpsc::Receiver<Arc<H>>,
    pub(crate) done_rx: mpsc::Receiver<Vec<GatewayId>>,
    pub(crate) ndf_rx: NdfReceiver,

    // loopback for re-triggering additions
    pub(crate) add_tx: AddRequestSender,
    pub(crate) test_tx: mpsc::Sender<TestBatch<H>>,
}

/// The sole writer of the pool.
pub(crate) struct Runner<M: HostManager> {
    mailboxes: Mailboxes<M::Host>,

    write_pool: Pool<M::Host>,
    read_pool: Arc<ArcSwap<Pool<M::Host>>>,

    ndf: NetworkDefinition,
    universe: Universe,

    in_progress: HashSet<GatewayId>,
    to_remove: VecDeque<GatewayId>,
    online: OnlineBucket,

    manager: Arc<M>,
    filter: Arc<RwLock<GatewayFilter>>,
    random: Arc<dyn RandomSource>,
    store: PrefixedStore,
    discovery: Option<DiscoverySender>,

    config: Config,
    num_nodes_to_test: usize,
}

impl<M: HostManager> Runner<M> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mailboxes: Mailboxes<M::Host>,
        read_pool: Arc<ArcSwap<Pool<M::Host>>>,
        manager: Arc<M>,
        filter: Arc<RwLock<GatewayFilter>>,
        random: Arc<dyn RandomSource>,
        store: PrefixedStore,
        discovery: Option<DiscoverySender>,
        config: Config,
        params: DerivedParams,
        ndf: NetworkDefinition,
        universe: Universe,
    ) -> Self {
        Runner {
            mailboxes,
            write_pool: Pool::new(params.pool_size),
            read_pool,
            ndf,
            universe,
            in_progress: HashSet::new(),
            to_remove: VecDeque::new(),
            online: OnlineBucket::new(params.pool_size, config.offline_detection.clone()),
            manager,
            filter,
            random,
            store,
            discovery,
            config,
            num_nodes_to_test: params.num_nodes_to_test,
        }
    }

    /// Processes events until cancelled. The runner is handed back so that it can be restarted later.
    pub(crate) async fn run(mut self, shutdown: ShutdownToken) -> Self {
        debug!("started the host pool runner");

        loop {
            let updated = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(ndf) = self.mailboxes.ndf_rx.recv() => {
                    self.on_new_ndf(ndf);
                    false
                }
                Some(host) = self.mailboxes.new_host_rx.recv() => self.on_tested_host(host),
                Some(tested) = self.mailboxes.done_rx.recv() => {
                    self.on_testing_done(tested);
                    false
                }
                Some(gateway) = self.mailboxes.remove_rx.recv() => {
                    self.on_remove_request(gateway);
                    false
                }
                Some(request) = self.mailboxes.add_rx.recv() => {
                    self.on_add_request(request);
                    false
                }
            };

            if updated {
                self.publish().await;
            }

            let delay = self.online.delay();
            if !delay.is_zero() {
                debug!("too many gateways have failed recently, we might be offline. pausing for {delay:?}");
                if shutdown
                    .run_until_cancelled(tokio::time::sleep(delay))
                    .await
                    .is_none()
                {
                    break;
                }
            }
        }

        self.requeue_in_progress();
        debug!("host pool runner: exiting");
        self
    }

    fn request_add(&self, gateway: Option<GatewayId>) {
        if let Err(err) = self.mailboxes.add_tx.try_send(gateway) {
            warn!("failed to re-trigger a host pool addition: {err}");
        }
    }

    // any candidates that were still being tested are picked up again on restart
    fn requeue_in_progress(&mut self) {
        for gateway in self.in_progress.drain() {
            if let Err(err) = self.mailboxes.add_tx.try_send(Some(gateway)) {
                warn!("failed to requeue {gateway} for testing: {err}");
            }
        }
    }

    pub(crate) fn on_add_request(&mut self, request: Option<GatewayId>) {
        let mut to_test = Vec::new();

        if let Some(gateway) = request {
            if self.universe.contains_key(&gateway)
                && !self.write_pool.has(&gateway)
                && !self.in_progress.contains(&gateway)
            {
                self.in_progress.insert(gateway);
                to_test.push(gateway);
            }
        }

        if to_test.is_empty() {
            let mut rng = self.random.stream();
            match self.write_pool.select_new(
                rng.as_mut(),
                &self.universe,
                &mut self.in_progress,
                self.num_nodes_to_test,
            ) {
                Ok(selected) => to_test = selected,
                Err(err) => {
                    warn!("failed to select any gateways to test ({err}). this may be the result of being disconnected from the internet, very old network information or a restrictive filter");
                    return;
                }
            }
        }

        let mut batch = Vec::with_capacity(to_test.len());
        for gateway in to_test {
            match self.manager.get_host(&gateway) {
                Some(host) => batch.push(host),
                None => {
                    error!("{gateway} is part of the network but has no host");
                    self.in_progress.remove(&gateway);
                }
            }
        }
        if batch.is_empty() {
            return;
        }

        trace!("sending batch of {} gateways for testing", batch.len());
        if let Err(err) = self.mailboxes.test_tx.try_send(batch) {
            let batch = err.into_inner();
            error!("failed to pass {} gateways for testing", batch.len());
            for host in batch {
                self.in_progress.remove(&host.identity());
            }
        }
    }

    pub(crate) fn on_remove_request(&mut self, gateway: GatewayId) {
        if self.to_remove.contains(&gateway) {
            trace!("{gateway} is already scheduled for removal");
            return;
        }
        if !self.write_pool.has(&gateway) {
            debug!("skipping remove request for {gateway}: it's not in the host pool");
            return;
        }

        self.online.add();
        self.to_remove.push_back(gateway);

        // the removal takes effect once a replacement is ready
        self.request_add(None);
    }

    /// Returns whether the membership has changed.
    pub(crate) fn on_tested_host(&mut self, host: Arc<M::Host>) -> bool {
        let gateway = host.identity();

        // testing is async so the gateway could have left the network in the meantime
        if !self.universe.contains_key(&gateway) {
            warn!("tested gateway {gateway} is no longer part of the network");
            spawn_future(async move { host.disconnect().await });
            self.request_add(None);
            return false;
        }
        if self.write_pool.has(&gateway) {
            debug!("{gateway} is already a member of the host pool");
            return false;
        }

        self.online.reset();

        let mut evicted = None;
        let mut replaced = false;
        while let Some(target) = self.to_remove.pop_front() {
            match self.write_pool.replace_specific(&target, Arc::clone(&host)) {
                Ok(old) => {
                    evicted = Some(old);
                    replaced = true;
                    break;
                }
                Err(err) => debug!("{err}"),
            }
        }

        if !replaced {
            let mut rng = self.random.stream();
            evicted = self.write_pool.add_or_replace(rng.as_mut(), host);
        }

        if let Some(evicted) = evicted {
            let evicted_id = evicted.identity();
            debug!("{gateway} has replaced {evicted_id} in the host pool");
            if !self.in_network(&evicted_id) {
                self.manager.remove_host(&evicted_id);
            }
            spawn_future(async move { evicted.disconnect().await });
        } else {
            debug!("{gateway} has been added to the host pool");
        }

        true
    }

    pub(crate) fn on_testing_done(&mut self, tested: Vec<GatewayId>) {
        for gateway in tested {
            self.in_progress.remove(&gateway);
        }
    }

    pub(crate) fn on_new_ndf(&mut self, ndf: NetworkDefinition) {
        let filter = self.filter.read().clone();
        let universe = build_universe(
            self.manager.as_ref(),
            &ndf,
            &self.config.host_params,
            self.discovery.as_ref(),
            &filter,
        );
        let previous = std::mem::replace(&mut self.universe, universe);
        self.ndf = ndf;

        for member in self.write_pool.member_ids() {
            if !self.universe.contains_key(&member) {
                self.on_remove_request(member);
            }
        }

        for gateway in previous.keys() {
            if !self.write_pool.has(gateway) && !self.in_network(gateway) {
                self.manager.remove_host(gateway);
            }
        }
    }

    fn in_network(&self, gateway: &GatewayId) -> bool {
        self.ndf
            .gateways
            .iter()
            .any(|candidate| &candidate.identity == gateway)
    }

    async fn publish(&mut self) {
        // readers must not wait on the disk
        self.read_pool.store(Arc::new(self.write_pool.clone()));

        let members = self.write_pool.member_ids();
        if let Err(err) = save_host_list(&self.store, &members).await {
            warn!("host list could not be stored, updates will not be available on load: {err}");
        }
    }
}
