// Copyright 2025 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: Apache-2.0

use crate::cert_checker::{CertChecker, CertificateProvider};
use crate::config::{Config, DerivedParams};
use crate::error::GatewayPoolError;
use crate::host::{GatewayHost, HostManager, HostParams};
use crate::identity::GatewayId;
use crate::ndf::{passthrough_filter, GatewayFilter, NetworkDefinition, NetworkGateway, Universe};
use crate::pool::Pool;
use crate::random::RandomSource;
use crate::storage::host_list::{get_host_prepared_list, HOST_POOL_PREFIX};
use crate::storage::{KeyValueStore, PrefixedStore};
use arc_swap::ArcSwap;
use node_tester::NodeTester;
use nym_task::{spawn_named_future, JoinHandle, ShutdownToken};
use parking_lot::{Mutex, RwLock};
use rotation::Rotation;
use runner::{Mailboxes, Runner};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub(crate) mod node_tester;
pub(crate) mod rotation;
pub(crate) mod runner;

pub type AddRequestSender = mpsc::Sender<Option<GatewayId>>;
pub type AddRequestReceiver = mpsc::Receiver<Option<GatewayId>>;
pub type RemoveRequestSender = mpsc::Sender<GatewayId>;
pub type RemoveRequestReceiver = mpsc::Receiver<GatewayId>;
pub type NdfSender = mpsc::Sender<NetworkDefinition>;
pub type NdfReceiver = mpsc::Receiver<NetworkDefinition>;

/// Optional channel on which gateways are announced the first time they're seen in a network definition.
pub type DiscoverySender = mpsc::Sender<NetworkGateway>;

/// Maintains a pool of connections to gateways that are (believed to be) reachable.
///
/// All membership changes go through a single runner task. Readers only ever observe
/// immutable snapshots of the pool, so they never have to wait on pool maintenance.
pub struct HostPool<M: HostManager> {
    inner: Arc<HostPoolInner<M>>,
}

impl<M: HostManager> Clone for HostPool<M> {
    fn clone(&self) -> Self {
        HostPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct HostPoolInner<M: HostManager> {
    read_pool: Arc<ArcSwap<Pool<M::Host>>>,

    add_tx: AddRequestSender,
    remove_tx: RemoveRequestSender,
    ndf_tx: NdfSender,

    filter: Arc<RwLock<GatewayFilter>>,
    manager: Arc<M>,
    random: Arc<dyn RandomSource>,

    config: Config,
    params: DerivedParams,

    // runner is parked here whenever the processes are not running
    runner: Mutex<Option<Runner<M>>>,
    tester: NodeTester<M::Host>,
    rotation: Option<Rotation>,
}

impl<M: HostManager> HostPool<M> {
    /// Creates the pool for the provided network and primes it with the members persisted
    /// during the previous run. Nothing happens until [`start_processes`](Self::start_processes) is called.
    pub async fn new(
        config: Config,
        ndf: NetworkDefinition,
        manager: Arc<M>,
        store: Arc<dyn KeyValueStore>,
        cert_provider: Arc<dyn CertificateProvider<M::Host>>,
        random: Arc<dyn RandomSource>,
        discovery: Option<DiscoverySender>,
    ) -> Result<Self, GatewayPoolError> {
        if ndf.gateways.is_empty() {
            return Err(GatewayPoolError::NoGatewaysAvailable);
        }
        let params = config.derive(ndf.gateways.len())?;
        if params.pool_size == 0 {
            return Err(GatewayPoolError::ZeroPoolCapacity);
        }

        info!(
            "creating host pool of size {} for {} gateways (testing {} at a time, rotation enabled: {})",
            params.pool_size,
            ndf.gateways.len(),
            params.num_nodes_to_test,
            params.rotation_enabled
        );

        let (add_tx, add_rx) = mpsc::channel(params.buffer_len);
        let (remove_tx, remove_rx) = mpsc::channel(params.buffer_len);
        let (ndf_tx, ndf_rx) = mpsc::channel(params.buffer_len);
        let (new_host_tx, new_host_rx) = mpsc::channel(params.buffer_len);
        let (done_tx, done_rx) = mpsc::channel(params.buffer_len);
        let (test_tx, test_rx) = mpsc::channel(params.buffer_len);

        let filter = Arc::new(RwLock::new(passthrough_filter()));
        let universe = build_universe(
            manager.as_ref(),
            &ndf,
            &config.host_params,
            discovery.as_ref(),
            &filter.read().clone(),
        );

        let host_store = PrefixedStore::new(Arc::clone(&store), HOST_POOL_PREFIX);
        let persisted = match get_host_prepared_list(&host_store, params.pool_size).await {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!("failed to load the previously used gateways, starting from scratch: {err}");
                vec![None; params.pool_size]
            }
        };
        for entry in persisted {
            if let Err(err) = add_tx.try_send(entry) {
                warn!("failed to prime the host pool: {err}");
            }
        }

        let read_pool = Arc::new(ArcSwap::from_pointee(Pool::new(params.pool_size)));

        let runner = Runner::new(
            Mailboxes {
                add_rx,
                remove_rx,
                new_host_rx,
                done_rx,
                ndf_rx,
                add_tx: add_tx.clone(),
                test_tx,
            },
            Arc::clone(&read_pool),
            Arc::clone(&manager),
            Arc::clone(&filter),
            Arc::clone(&random),
            host_store,
            discovery,
            config.clone(),
            params,
            ndf,
            universe,
        );

        let cert_checker = Arc::new(CertChecker::new(cert_provider, store));
        let tester = NodeTester::new(
            test_rx,
            new_host_tx,
            done_tx,
            add_tx.clone(),
            cert_checker,
            config.host_params.clone(),
        );

        let rotation = params.rotation_enabled.then(|| {
            Rotation::new(
                add_tx.clone(),
                config.rotation.period,
                config.rotation.variability,
                Arc::clone(&random),
            )
        });

        Ok(HostPool {
            inner: Arc::new(HostPoolInner {
                read_pool,
                add_tx,
                remove_tx,
                ndf_tx,
                filter,
                manager,
                random,
                config,
                params,
                runner: Mutex::new(Some(runner)),
                tester,
                rotation,
            }),
        })
    }

    /// Spawns the runner, the node testers and, if enabled, the rotation task.
    /// They all stop once the shutdown token is cancelled, after which the processes can be started again.
    pub fn start_processes(
        &self,
        shutdown: &ShutdownToken,
    ) -> Result<Vec<JoinHandle<()>>, GatewayPoolError> {
        let runner = self
            .inner
            .runner
            .lock()
            .take()
            .ok_or(GatewayPoolError::AlreadyRunning)?;

        let workers = self.inner.config.connection_workers;
        let mut handles = Vec::with_capacity(workers.saturating_add(2));

        let parking: Weak<HostPoolInner<M>> = Arc::downgrade(&self.inner);
        let runner_shutdown = shutdown.child_token("host-pool-runner");
        handles.push(spawn_named_future(
            async move {
                let runner = runner.run(runner_shutdown).await;
                if let Some(inner) = parking.upgrade() {
                    *inner.runner.lock() = Some(runner);
                }
            },
            "host-pool-runner",
        ));

        for worker in 0..workers {
            let tester = self.inner.tester.clone();
            let tester_shutdown = shutdown.child_token(&format!("node-tester-{worker}"));
            handles.push(spawn_named_future(
                tester.run(tester_shutdown),
                "host-pool-node-tester",
            ));
        }

        if let Some(rotation) = &self.inner.rotation {
            let rotation = rotation.clone();
            let rotation_shutdown = shutdown.child_token("host-pool-rotation");
            handles.push(spawn_named_future(
                rotation.run(rotation_shutdown),
                "host-pool-rotation",
            ));
        } else {
            debug!("host pool rotation is disabled");
        }

        Ok(handles)
    }

    /// Requests a new member: the specified gateway if possible, otherwise a random one.
    pub fn add(&self, gateway: Option<GatewayId>) {
        if let Err(err) = self.inner.add_tx.try_send(gateway) {
            warn!("failed to request the addition of a gateway: {err}");
        }
    }

    /// Disconnects the host and requests its replacement in the pool.
    pub fn remove(&self, host: &Arc<M::Host>) {
        let gateway = host.identity();
        let to_disconnect = Arc::clone(host);
        spawn_named_future(
            async move { to_disconnect.disconnect().await },
            "host-pool-disconnect",
        );

        if let Err(err) = self.inner.remove_tx.try_send(gateway) {
            warn!("failed to request the removal of {gateway}: {err}");
        }
    }

    pub fn update_ndf(&self, ndf: NetworkDefinition) {
        if let Err(err) = self.inner.ndf_tx.try_send(ndf) {
            warn!("failed to pass the new network definition to the host pool: {err}");
        }
    }

    /// Sets the filter applied on every subsequent network definition update.
    pub fn set_gateway_filter(&self, filter: GatewayFilter) {
        *self.inner.filter.write() = filter;
    }

    pub fn get_host_params(&self) -> HostParams {
        self.inner.config.host_params.clone()
    }

    /// The most recently published state of the pool.
    pub fn snapshot(&self) -> Arc<Pool<M::Host>> {
        self.inner.read_pool.load_full()
    }

    pub fn is_ready(&self) -> Result<(), GatewayPoolError> {
        Ok(self.snapshot().is_ready()?)
    }

    /// Number of connected members.
    pub fn pool_size(&self) -> usize {
        self.snapshot().size()
    }

    pub fn capacity(&self) -> usize {
        self.inner.params.pool_size
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn manager(&self) -> &Arc<M> {
        &self.inner.manager
    }

    pub(crate) fn random(&self) -> &dyn RandomSource {
        self.inner.random.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn take_runner(&self) -> Option<Runner<M>> {
        self.inner.runner.lock().take()
    }
}

/// Maps every eligible gateway onto its position in the network definition, making sure
/// the host manager knows about each of them.
pub(crate) fn build_universe<M: HostManager>(
    manager: &M,
    ndf: &NetworkDefinition,
    host_params: &HostParams,
    discovery: Option<&DiscoverySender>,
    filter: &GatewayFilter,
) -> Universe {
    let mut universe = Universe::with_capacity(ndf.gateways.len());

    for (index, gateway) in ndf.gateways.iter().enumerate() {
        if !gateway.is_active() {
            continue;
        }

        match manager.get_host(&gateway.identity) {
            Some(host) => {
                if host.address() != gateway.address {
                    debug!(
                        "address of {} changed to {}",
                        gateway.identity, gateway.address
                    );
                    host.update_address(&gateway.address);
                }
            }
            None => {
                if let Err(err) =
                    manager.add_host(gateway.identity, gateway.host_details(), host_params)
                {
                    warn!(
                        "skipped gateway {index}: {}, host could not be added: {err}",
                        gateway.identity
                    );
                    continue;
                }
                if let Some(discovery) = discovery {
                    if let Err(err) = discovery.try_send(gateway.clone()) {
                        debug!("failed to announce {}: {err}", gateway.identity);
                    }
                }
            }
        }

        universe.insert(gateway.identity, index);
    }

    filter(universe, ndf)
}
