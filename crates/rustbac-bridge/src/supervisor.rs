//! Owns the coordinator's task loops and drives orderly shutdown.

use crate::config::BridgeConfig;
use crate::cov::CovNotification;
use crate::discovery;
use crate::network::NetworkStack;
use crate::poller::run_poller;
use crate::refresh::RefreshSignal;
use crate::registry::DeviceRegistry;
use crate::request::{request_channel, Inbox, RequestSender};
use crate::subscription::{
    run_subscribe_consumer, run_unsubscribe_consumer, SubscriptionManager, TeardownReport,
};
use crate::writer::run_write_serializer;
use crate::BridgeError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// State shared by every loop.
#[derive(Debug)]
pub(crate) struct Shared<N> {
    pub network: N,
    pub registry: Arc<DeviceRegistry>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub refresh: RefreshSignal,
    pub config: BridgeConfig,
}

/// Resolves once shutdown has been requested or the coordinator is gone.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskKind {
    WriteSerializer,
    Poller,
    SubscribeConsumer,
    UnsubscribeConsumer,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WriteSerializer => "write serializer",
            Self::Poller => "poller",
            Self::SubscribeConsumer => "subscribe consumer",
            Self::UnsubscribeConsumer => "unsubscribe consumer",
        };
        f.write_str(name)
    }
}

/// What happened during [`Coordinator::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShutdownReport {
    /// Loops that observed cancellation and returned.
    pub stopped: Vec<TaskKind>,
    /// Loops that had already terminated abnormally (panicked or aborted).
    pub failed_tasks: Vec<TaskKind>,
    pub teardown: TeardownReport,
}

/// The fleet coordinator.
///
/// Built with [`Coordinator::new`], started with [`Coordinator::start`] and
/// stopped with [`Coordinator::shutdown`]. Dropping a started coordinator
/// cancels its loops but skips subscription teardown.
#[derive(Debug)]
pub struct Coordinator<N: NetworkStack> {
    shared: Arc<Shared<N>>,
    requests: RequestSender,
    inbox: Option<Inbox>,
    tasks: Vec<(TaskKind, JoinHandle<()>)>,
    shutdown: watch::Sender<bool>,
    startup: watch::Sender<bool>,
}

impl<N: NetworkStack> Coordinator<N> {
    /// Validates `config` and wires up queues, registry and subscription
    /// manager. Nothing runs until [`Coordinator::start`].
    pub fn new(network: N, config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let refresh = RefreshSignal::new();
        let (requests, inbox) = request_channel(refresh.clone(), config.default_priority);
        let (shutdown, _) = watch::channel(false);
        let (startup, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                network,
                registry: Arc::new(DeviceRegistry::new()),
                subscriptions: Arc::new(SubscriptionManager::new()),
                refresh,
                config,
            }),
            requests,
            inbox: Some(inbox),
            tasks: Vec::new(),
            shutdown,
            startup,
        })
    }

    /// Handle for submitting requests. May be cloned freely.
    pub fn requests(&self) -> RequestSender {
        self.requests.clone()
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.shared.registry)
    }

    pub fn subscriptions(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.shared.subscriptions)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn network(&self) -> &N {
        &self.shared.network
    }

    /// Flips to `true` once every loop is running and startup discovery (if
    /// enabled) has finished.
    pub fn startup_complete(&self) -> watch::Receiver<bool> {
        self.startup.subscribe()
    }

    /// Spawns the four loops, then runs startup discovery when configured.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        let inbox = self.inbox.take().ok_or(BridgeError::AlreadyStarted)?;

        let writer = tokio::spawn(run_write_serializer(
            Arc::clone(&self.shared),
            inbox.writes,
            self.shutdown.subscribe(),
        ));
        let poller = tokio::spawn(run_poller(
            Arc::clone(&self.shared),
            self.shutdown.subscribe(),
        ));
        let subscriber = tokio::spawn(run_subscribe_consumer(
            Arc::clone(&self.shared),
            inbox.subscribes,
            self.shutdown.subscribe(),
        ));
        let unsubscriber = tokio::spawn(run_unsubscribe_consumer(
            Arc::clone(&self.shared),
            inbox.unsubscribes,
            self.shutdown.subscribe(),
        ));
        self.tasks = vec![
            (TaskKind::WriteSerializer, writer),
            (TaskKind::Poller, poller),
            (TaskKind::SubscribeConsumer, subscriber),
            (TaskKind::UnsubscribeConsumer, unsubscriber),
        ];
        log::info!(
            "coordinator started: poll every {}s, default priority {}",
            self.shared.config.poll_interval_seconds,
            self.shared.config.default_priority
        );

        if self.shared.config.discover_on_startup {
            if let Err(err) = self.discover(None).await {
                log::warn!("startup discovery failed: {err}");
            }
        }

        self.startup.send_replace(true);
        Ok(())
    }

    /// Runs a Who-Is and object walk, adding what it finds to the registry.
    pub async fn discover(&self, range: Option<(u32, u32)>) -> Result<Vec<u32>, BridgeError> {
        discovery::discover(&self.shared.network, &self.shared.registry, range).await
    }

    /// Hands a COV notification received by the network stack to the
    /// registry. Returns how many values were applied.
    pub async fn ingest_notification(&self, notification: CovNotification) -> usize {
        self.shared
            .subscriptions
            .apply_notification(&self.shared.registry, notification)
            .await
    }

    /// Loops still running.
    pub fn running_tasks(&self) -> Vec<TaskKind> {
        self.tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Stops every loop, cancels every active subscription and closes the
    /// network stack, in that order.
    pub async fn shutdown(mut self) -> ShutdownReport {
        self.shutdown.send_replace(true);

        let mut report = ShutdownReport::default();
        for (kind, handle) in std::mem::take(&mut self.tasks) {
            match handle.await {
                Ok(()) => report.stopped.push(kind),
                Err(err) if err.is_panic() => {
                    log::error!("{kind} panicked");
                    report.failed_tasks.push(kind);
                }
                Err(err) => {
                    log::error!("{kind} did not stop cleanly: {err}");
                    report.failed_tasks.push(kind);
                }
            }
        }

        report.teardown = self
            .shared
            .subscriptions
            .teardown_all(&self.shared.network)
            .await;
        self.shared.network.close().await;
        log::info!(
            "coordinator shut down: {} loop(s) stopped, {} failed",
            report.stopped.len(),
            report.failed_tasks.len()
        );
        report
    }
}

impl<N: NetworkStack> Drop for Coordinator<N> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
