//! Connectivity tracking for the assistant backend.
//!
//! [`ConnectivityTracker`] is the single source of truth for whether the
//! host network is up and whether the backend answers its health probe.
//! Host connectivity events arrive through [`ConnectivityTracker::report_online`]
//! and [`ConnectivityTracker::report_offline`]; the server side is learned
//! from a periodic `/health` poll and from the outcome of real requests.

use crate::client::config::ClientConfig;
use crate::client::utils::spawn_task;
use crate::traits::HttpNetwork;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connectivity snapshot handed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    pub is_online: bool,
    /// Only ever true while `is_online` is true.
    pub is_connected_to_server: bool,
    pub last_check: DateTime<Utc>,
    /// Consecutive failed probes or connectivity failures.
    pub retry_count: u32,
}

impl NetworkStatus {
    fn initial(is_online: bool) -> Self {
        NetworkStatus {
            is_online,
            is_connected_to_server: false,
            last_check: Utc::now(),
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Init,
    Running,
    Destroyed,
}

type StatusListener = Arc<dyn Fn(&NetworkStatus) + Send + Sync>;

pub struct ConnectivityTracker {
    network: Arc<dyn HttpNetwork>,
    health_url: String,
    health_timeout: Duration,
    check_interval: Duration,
    status: Mutex<NetworkStatus>,
    listeners: Mutex<Vec<(u64, StatusListener)>>,
    next_listener_id: AtomicU64,
    active_requests: AtomicUsize,
    state: Mutex<TrackerState>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityTracker {
    /// Create a tracker; `is_online` is what the host currently reports.
    pub fn new(network: Arc<dyn HttpNetwork>, config: &ClientConfig, is_online: bool) -> Self {
        ConnectivityTracker {
            network,
            health_url: config.health_url(),
            health_timeout: config.health_check_timeout,
            check_interval: config.server_check_interval,
            status: Mutex::new(NetworkStatus::initial(is_online)),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            active_requests: AtomicUsize::new(0),
            state: Mutex::new(TrackerState::Init),
            poll_task: Mutex::new(None),
        }
    }

    pub fn status(&self) -> NetworkStatus {
        self.status.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.lock().is_connected_to_server
    }

    pub fn state(&self) -> TrackerState {
        *self.state.lock()
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Start the health poll loop. The first probe runs immediately.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            match *state {
                TrackerState::Init => *state = TrackerState::Running,
                TrackerState::Running => return,
                TrackerState::Destroyed => {
                    warn!("[Connectivity] start() called on a destroyed tracker");
                    return;
                }
            }
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.check_interval;
        let handle = spawn_task(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(tracker) = weak.upgrade() else { break };
                tracker.poll_once().await;
            }
        });
        *self.poll_task.lock() = Some(handle);
        info!(
            "[Connectivity] Monitoring {} every {:?}",
            self.health_url, self.check_interval
        );
    }

    async fn poll_once(&self) {
        let active = self.active_requests();
        if active > 0 {
            debug!("[Connectivity] Skipping health check, {} requests active", active);
            return;
        }
        self.check_server().await;
    }

    /// Probe `/health` now and return the updated status.
    pub async fn force_check(&self) -> NetworkStatus {
        self.check_server().await;
        self.status()
    }

    async fn check_server(&self) -> bool {
        if !self.status.lock().is_online {
            return false;
        }

        let probe = self.network.get(&self.health_url, Some(self.health_timeout));
        let outcome = match tokio::time::timeout(self.health_timeout, probe).await {
            Ok(Ok(response)) if response.is_success() => Ok(()),
            Ok(Ok(response)) => Err(format!("health returned HTTP {}", response.status)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("health probe timed out after {:?}", self.health_timeout)),
        };

        match outcome {
            Ok(()) => {
                self.update(|s| {
                    s.is_connected_to_server = true;
                    s.retry_count = 0;
                });
                true
            }
            Err(reason) => {
                warn!("[Connectivity] Server unreachable: {}", reason);
                self.update(|s| {
                    s.is_connected_to_server = false;
                    s.retry_count += 1;
                });
                false
            }
        }
    }

    /// Host reports the network came back; probes the server right away.
    pub async fn report_online(&self) -> NetworkStatus {
        info!("[Connectivity] Host reports online");
        self.update(|s| s.is_online = true);
        self.check_server().await;
        self.status()
    }

    /// Host reports the network is gone. No probe needed.
    pub fn report_offline(&self) -> NetworkStatus {
        info!("[Connectivity] Host reports offline");
        self.update(|s| {
            s.is_online = false;
            s.is_connected_to_server = false;
        })
    }

    /// A real request succeeded, which proves both network and server.
    pub fn record_success(&self) {
        let already = {
            let s = self.status.lock();
            s.is_online && s.is_connected_to_server && s.retry_count == 0
        };
        if !already {
            self.update(|s| {
                s.is_online = true;
                s.is_connected_to_server = true;
                s.retry_count = 0;
            });
        }
    }

    /// A real request failed at the network level.
    pub fn record_connectivity_failure(&self) {
        self.update(|s| {
            s.is_connected_to_server = false;
            s.retry_count += 1;
        });
    }

    /// Mark a request as in flight until the guard is dropped.
    pub fn begin_request(self: &Arc<Self>) -> ActiveRequestGuard {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        ActiveRequestGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Register `listener`; it is called right away with the current status
    /// and again after every update.
    #[must_use = "keep the subscription to be able to unsubscribe"]
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> StatusSubscription
    where
        F: Fn(&NetworkStatus) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let listener: StatusListener = Arc::new(listener);
        self.listeners.lock().push((id, Arc::clone(&listener)));
        invoke_listener(id, &listener, &self.status());
        StatusSubscription {
            id,
            tracker: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn update<F>(&self, apply: F) -> NetworkStatus
    where
        F: FnOnce(&mut NetworkStatus),
    {
        let snapshot = {
            let mut status = self.status.lock();
            apply(&mut status);
            if !status.is_online {
                status.is_connected_to_server = false;
            }
            status.last_check = Utc::now();
            status.clone()
        };
        self.notify(&snapshot);
        snapshot
    }

    fn notify(&self, snapshot: &NetworkStatus) {
        let listeners: Vec<(u64, StatusListener)> = self.listeners.lock().clone();
        for (id, listener) in &listeners {
            invoke_listener(*id, listener, snapshot);
        }
    }

    /// Stop polling and drop every listener.
    pub fn destroy(&self) {
        *self.state.lock() = TrackerState::Destroyed;
        if let Some(handle) = self.poll_task.lock().take() {
            handle.abort();
        }
        self.listeners.lock().clear();
        debug!("[Connectivity] Tracker destroyed");
    }
}

impl Drop for ConnectivityTracker {
    fn drop(&mut self) {
        if let Some(handle) = self.poll_task.get_mut().take() {
            handle.abort();
        }
    }
}

fn invoke_listener(id: u64, listener: &StatusListener, snapshot: &NetworkStatus) {
    if catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
        error!("[Connectivity] Status listener {} panicked", id);
    }
}

/// Handle returned by [`ConnectivityTracker::subscribe`].
#[derive(Debug)]
pub struct StatusSubscription {
    id: u64,
    tracker: Weak<ConnectivityTracker>,
}

impl StatusSubscription {
    pub fn unsubscribe(self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.unsubscribe(self.id);
        }
    }
}

/// Counts one in-flight request; health polls are skipped while any exist.
pub struct ActiveRequestGuard {
    tracker: Arc<ConnectivityTracker>,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.tracker.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::FakeNetwork;
    use crate::types::HttpResponse;
    use std::sync::atomic::AtomicBool;

    fn tracker(network: Arc<FakeNetwork>, online: bool) -> Arc<ConnectivityTracker> {
        let config = ClientConfig::new("http://backend.test");
        Arc::new(ConnectivityTracker::new(network, &config, online))
    }

    fn healthy() -> Arc<FakeNetwork> {
        let network = FakeNetwork::new();
        network.route("GET", "/health", |_| Ok(HttpResponse::new(200, "ok")));
        network
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_disconnected() {
        let t = tracker(healthy(), true);
        let status = t.status();
        assert!(status.is_online);
        assert!(!status.is_connected_to_server);
        assert_eq!(status.retry_count, 0);
        assert_eq!(t.state(), TrackerState::Init);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_check_success_and_failure() {
        let up = Arc::new(AtomicBool::new(true));
        let network = FakeNetwork::new();
        let flag = up.clone();
        network.route("GET", "/health", move |_| {
            if flag.load(Ordering::SeqCst) {
                Ok(HttpResponse::new(200, "ok"))
            } else {
                Err(TransportError::Connectivity("connection refused".into()))
            }
        });
        let t = tracker(network, true);

        assert!(t.force_check().await.is_connected_to_server);

        up.store(false, Ordering::SeqCst);
        let status = t.force_check().await;
        assert!(!status.is_connected_to_server);
        assert_eq!(status.retry_count, 1);
        assert_eq!(t.force_check().await.retry_count, 2);

        up.store(true, Ordering::SeqCst);
        let status = t.force_check().await;
        assert!(status.is_connected_to_server);
        assert_eq!(status.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_2xx_health_counts_as_failure() {
        let network = FakeNetwork::new();
        network.route("GET", "/health", |_| Ok(HttpResponse::new(503, "busy")));
        let t = tracker(network, true);
        let status = t.force_check().await;
        assert!(!status.is_connected_to_server);
        assert_eq!(status.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_clears_both_flags_without_probe() {
        let network = healthy();
        let t = tracker(network.clone(), true);
        t.force_check().await;
        assert!(t.is_connected());
        let probes = network.calls_to("/health");

        let status = t.report_offline();
        assert!(!status.is_online);
        assert!(!status.is_connected_to_server);
        assert_eq!(network.calls_to("/health"), probes);

        // Probing while offline is a no-op.
        assert!(!t.force_check().await.is_connected_to_server);
        assert_eq!(network.calls_to("/health"), probes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_triggers_probe() {
        let network = healthy();
        let t = tracker(network.clone(), false);
        let status = t.report_online().await;
        assert!(status.is_online);
        assert!(status.is_connected_to_server);
        assert_eq!(network.calls_to("/health"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_implies_online_for_every_update() {
        let network = healthy();
        let t = tracker(network, true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = t.subscribe(move |s| sink.lock().push(s.clone()));

        t.force_check().await;
        t.report_offline();
        t.record_connectivity_failure();
        t.report_online().await;
        t.report_offline();
        t.record_success();
        t.report_offline();

        let seen = seen.lock();
        assert!(seen.len() >= 8);
        for status in seen.iter() {
            assert!(!status.is_connected_to_server || status.is_online, "{:?}", status);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_gets_current_status_then_updates() {
        let t = tracker(healthy(), true);
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = t.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        t.report_offline();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        sub.unsubscribe();
        t.report_offline();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(t.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_listener_is_isolated() {
        let t = tracker(healthy(), true);
        let _bad = t.subscribe(|s| {
            if !s.is_online {
                panic!("listener bug");
            }
        });
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _good = t.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        t.report_offline();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(!t.status().is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_skips_while_requests_active() {
        let network = healthy();
        let t = tracker(network.clone(), true);
        t.start();
        assert_eq!(t.state(), TrackerState::Running);

        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(network.calls_to("/health"), 1);

        let guard = t.begin_request();
        assert_eq!(t.active_requests(), 1);
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(network.calls_to("/health"), 1);

        drop(guard);
        assert_eq!(t.active_requests(), 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(network.calls_to("/health"), 2);

        t.destroy();
        assert_eq!(t.state(), TrackerState::Destroyed);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(network.calls_to("/health"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out() {
        let network = FakeNetwork::new();
        network.route_with_latency("GET", "/health", Duration::from_secs(60), |_| {
            Ok(HttpResponse::new(200, "ok"))
        });
        let t = tracker(network, true);
        let status = t.force_check().await;
        assert!(!status.is_connected_to_server);
        assert_eq!(status.retry_count, 1);
    }
}
