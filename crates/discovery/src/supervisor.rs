//! Per-source discovery loops.
//!
//! Each source runs at most one worker. A worker collects immediately, then
//! once per interval, until its cancellation token fires. Faults inside a
//! cycle (errors or panics) are logged and leave the previous snapshot in
//! place; the loop keeps ticking.

use crate::collector::{Collector, SourceSnapshot};
use crate::config::ConfigProvider;
use crate::registry::SourceRegistry;
use crate::{DiscoveryError, Result};
use lantern_protocol::{ConnectionTestResult, SourceKind, SourceStatus};
use log::{debug, error, info, warn};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct RunningWorker {
    generation: u64,
    cancel: CancellationToken,
    /// Flips to `true` (or closes) once the worker task has returned.
    exited: watch::Receiver<bool>,
}

#[derive(Debug, Default)]
struct SourceState {
    enabled: bool,
    running: Option<RunningWorker>,
    /// Bumped on every start; lets `stop` tell its worker from a newer one.
    generation: u64,
}

type SharedState = Arc<Mutex<SourceState>>;

fn lock(state: &Mutex<SourceState>) -> MutexGuard<'_, SourceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

async fn wait_exited(mut exited: watch::Receiver<bool>) {
    while !*exited.borrow_and_update() {
        if exited.changed().await.is_err() {
            break;
        }
    }
}

pub struct Supervisor {
    config: Arc<ConfigProvider>,
    registry: Arc<SourceRegistry>,
    collectors: BTreeMap<SourceKind, Arc<dyn Collector>>,
    states: BTreeMap<SourceKind, SharedState>,
    interval_override: Option<Duration>,
}

impl Supervisor {
    pub fn new(
        config: Arc<ConfigProvider>,
        registry: Arc<SourceRegistry>,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Self {
        let collectors = collectors.into_iter().map(|c| (c.source(), c)).collect();
        let states = SourceKind::ALL
            .into_iter()
            .map(|kind| (kind, SharedState::default()))
            .collect();
        Self {
            config,
            registry,
            collectors,
            states,
            interval_override: None,
        }
    }

    /// Fixed tick interval, bypassing the configured (clamped) one.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_override = Some(interval);
        self
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Arc<ConfigProvider> {
        &self.config
    }

    fn collector(&self, kind: SourceKind) -> Result<&Arc<dyn Collector>> {
        self.collectors
            .get(&kind)
            .ok_or_else(|| DiscoveryError::Config(format!("no collector registered for {kind}")))
    }

    fn state(&self, kind: SourceKind) -> Result<&SharedState> {
        self.states
            .get(&kind)
            .ok_or_else(|| DiscoveryError::Config(format!("unknown source {kind}")))
    }

    pub fn is_running(&self, kind: SourceKind) -> bool {
        self.state(kind)
            .map(|state| lock(state).running.is_some())
            .unwrap_or(false)
    }

    /// Starts the loop for `kind`. Returns `false` if it was already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, kind: SourceKind) -> Result<bool> {
        let collector = Arc::clone(self.collector(kind)?);
        let state = Arc::clone(self.state(kind)?);

        let mut guard = lock(&state);
        if guard.running.is_some() {
            return Ok(false);
        }

        let cancel = CancellationToken::new();
        let (exited_tx, exited_rx) = watch::channel(false);
        guard.generation += 1;
        guard.enabled = true;
        guard.running = Some(RunningWorker {
            generation: guard.generation,
            cancel: cancel.clone(),
            exited: exited_rx,
        });
        drop(guard);

        let interval = self
            .interval_override
            .unwrap_or_else(|| self.config.snapshot().interval());
        let worker = Worker {
            kind,
            collector,
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            state,
            cancel,
        };
        tokio::spawn(async move {
            worker.run(interval).await;
            let _ = exited_tx.send(true);
        });
        debug!("{} discovery loop started", kind.display_name());
        Ok(true)
    }

    /// Stops the loop for `kind`, waits for the worker to exit, and clears the
    /// source's snapshot. Safe to call when not running.
    ///
    /// A worker started by a concurrent `start` after this call took its
    /// decision is left alone.
    pub async fn stop(&self, kind: SourceKind) -> Result<()> {
        let state = Arc::clone(self.state(kind)?);

        let target = {
            let mut guard = lock(&state);
            let target = guard
                .running
                .as_ref()
                .map(|r| (r.generation, r.cancel.clone(), r.exited.clone()));
            if target.is_none() {
                guard.enabled = false;
                self.registry.clear(kind);
            }
            target
        };
        let Some((generation, cancel, exited)) = target else {
            return Ok(());
        };

        cancel.cancel();
        wait_exited(exited).await;

        let mut guard = lock(&state);
        if guard
            .running
            .as_ref()
            .is_some_and(|r| r.generation == generation)
        {
            guard.running = None;
            guard.enabled = false;
            self.registry.clear(kind);
            drop(guard);
            debug!("{} discovery loop stopped", kind.display_name());
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        for kind in SourceKind::ALL {
            if self.is_running(kind) {
                if let Err(err) = self.stop(kind).await {
                    warn!("failed to stop {} discovery: {err}", kind.display_name());
                }
            }
        }
    }

    /// Starts every source the configuration enables and can connect to.
    pub fn init_from_config(&self) -> Vec<SourceKind> {
        let config = self.config.snapshot();
        let mut started = Vec::new();
        for kind in SourceKind::ALL {
            if !self.collectors.contains_key(&kind) || !config.should_run(kind) {
                continue;
            }
            match self.start(kind) {
                Ok(_) => {
                    let via = if config.env_forced.contains(&kind) {
                        "environment variable"
                    } else {
                        "config file"
                    };
                    info!("{} discovery enabled (via {via})", kind.display_name());
                    started.push(kind);
                }
                Err(err) => warn!("failed to start {} discovery: {err}", kind.display_name()),
            }
        }
        started
    }

    /// Persists the flag in the configuration and starts or stops the loop.
    pub async fn set_enabled(&self, kind: SourceKind, enabled: bool) -> Result<SourceStatus> {
        if enabled {
            let config = self.config.snapshot();
            if !config.has_connection(kind) {
                return Err(DiscoveryError::Config(format!(
                    "{} connection settings are incomplete",
                    kind.display_name()
                )));
            }
            self.config.update(|cfg| cfg.set_enabled(kind, true));
            self.start(kind)?;
        } else {
            self.config.update(|cfg| {
                cfg.set_enabled(kind, false);
                cfg.env_forced.remove(&kind);
            });
            self.stop(kind).await?;
        }
        self.status(kind)
    }

    pub fn status(&self, kind: SourceKind) -> Result<SourceStatus> {
        let state = self.state(kind)?;
        let (enabled, running) = {
            let guard = lock(state);
            (guard.enabled, guard.running.is_some())
        };
        Ok(SourceStatus {
            source: kind,
            enabled,
            running,
            env_forced: self.config.snapshot().env_forced.contains(&kind),
            apps: self.registry.snapshot(kind).len(),
        })
    }

    pub fn statuses(&self) -> Vec<SourceStatus> {
        SourceKind::ALL
            .into_iter()
            .filter_map(|kind| self.status(kind).ok())
            .collect()
    }

    /// One collection against the current configuration, outside the loop.
    /// The registry is not touched.
    pub async fn test_connection(&self, kind: SourceKind) -> Result<ConnectionTestResult> {
        let collector = Arc::clone(self.collector(kind)?);
        let config = self.config.snapshot();
        let outcome = tokio::spawn(async move { collector.test_connection(&config).await }).await;
        Ok(match outcome {
            Ok(Ok(apps)) => ConnectionTestResult {
                ok: true,
                apps,
                auth_failed: false,
                error: None,
            },
            Ok(Err(err)) => ConnectionTestResult {
                ok: false,
                apps: 0,
                auth_failed: err.is_auth(),
                error: Some(err.to_string()),
            },
            Err(join) => {
                error!("{} connection test failed to complete: {join}", kind.display_name());
                ConnectionTestResult {
                    ok: false,
                    apps: 0,
                    auth_failed: false,
                    error: Some(format!("connection test aborted: {join}")),
                }
            }
        })
    }
}

struct Worker {
    kind: SourceKind,
    collector: Arc<dyn Collector>,
    config: Arc<ConfigProvider>,
    registry: Arc<SourceRegistry>,
    state: SharedState,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.run_cycle().await {
                break;
            }
        }
    }

    /// One collection. Returns `false` if cancellation interrupted it.
    async fn run_cycle(&self) -> bool {
        let name = self.kind.display_name();
        let collector = Arc::clone(&self.collector);
        let config = self.config.snapshot();
        let mut task = tokio::spawn(async move { collector.collect(&config).await });

        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                task.abort();
                let _ = task.await;
                return false;
            }
            joined = &mut task => joined,
        };

        match joined {
            Ok(Ok(snapshot)) => {
                let count = snapshot.len();
                if self.publish(snapshot) {
                    info!("{name} discovery found {count} app(s)");
                }
            }
            Ok(Err(err)) => warn!("{name} discovery error: {err}"),
            Err(err) if err.is_panic() => {
                let payload = err.into_panic();
                error!(
                    "{name} discovery cycle panicked: {}; keeping previous results",
                    panic_message(payload.as_ref())
                );
            }
            Err(err) => warn!("{name} discovery cycle aborted: {err}"),
        }
        true
    }

    /// Stores the snapshot unless the source was stopped meanwhile.
    fn publish(&self, snapshot: SourceSnapshot) -> bool {
        let guard = lock(&self.state);
        if self.cancel.is_cancelled() || !guard.enabled {
            return false;
        }
        self.registry.replace(snapshot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use async_trait::async_trait;
    use lantern_protocol::{AppStatus, DiscoveredApp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    const FAST: Duration = Duration::from_millis(20);

    fn app(url: &str) -> DiscoveredApp {
        DiscoveredApp {
            name: "App".to_string(),
            url: url.to_string(),
            icon: String::new(),
            description: String::new(),
            status: AppStatus::Online,
        }
    }

    /// Reports one app whose URL embeds the call number. Calls listed in
    /// `panic_on` panic instead, those in `fail_on` return an error.
    #[derive(Default)]
    struct ScriptedCollector {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
        panic_on: Vec<usize>,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl Collector for ScriptedCollector {
        fn source(&self) -> SourceKind {
            SourceKind::Docker
        }

        async fn collect(&self, _config: &SystemConfig) -> Result<SourceSnapshot> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic_on.contains(&call) {
                panic!("scripted panic on call {call}");
            }
            if self.fail_on.contains(&call) {
                return Err(DiscoveryError::Backend("scripted failure".to_string()));
            }
            Ok(SourceSnapshot::new(
                SourceKind::Docker,
                vec![app(&format!("http://call-{call}"))],
            ))
        }
    }

    fn supervisor(collector: Arc<ScriptedCollector>, interval: Duration) -> Supervisor {
        Supervisor::new(
            Arc::new(ConfigProvider::new(SystemConfig::default())),
            Arc::new(SourceRegistry::new()),
            vec![collector as Arc<dyn Collector>],
        )
        .with_interval(interval)
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn urls(sup: &Supervisor) -> Vec<String> {
        sup.registry()
            .snapshot(SourceKind::Docker)
            .apps
            .iter()
            .map(|a| a.url.clone())
            .collect()
    }

    #[tokio::test]
    async fn start_is_idempotent_and_collects_immediately() {
        let collector = Arc::new(ScriptedCollector::default());
        let sup = supervisor(collector.clone(), Duration::from_secs(3600));

        assert!(sup.start(SourceKind::Docker).expect("start"));
        assert!(!sup.start(SourceKind::Docker).expect("second start"));
        wait_for(|| urls(&sup) == ["http://call-1"]).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
        sup.stop(SourceKind::Docker).await.expect("stop");
    }

    #[tokio::test]
    async fn stop_clears_snapshot_and_is_idempotent() {
        let collector = Arc::new(ScriptedCollector::default());
        let sup = supervisor(collector.clone(), FAST);

        sup.stop(SourceKind::Docker).await.expect("stop before start");
        sup.start(SourceKind::Docker).expect("start");
        wait_for(|| !urls(&sup).is_empty()).await;

        let (a, b) = tokio::join!(sup.stop(SourceKind::Docker), sup.stop(SourceKind::Docker));
        a.expect("stop a");
        b.expect("stop b");

        assert!(!sup.is_running(SourceKind::Docker));
        assert!(urls(&sup).is_empty());
        let status = sup.status(SourceKind::Docker).expect("status");
        assert!(!status.enabled);

        let calls = collector.calls.load(Ordering::SeqCst);
        tokio::time::sleep(FAST * 4).await;
        assert_eq!(collector.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn stop_during_a_slow_cycle_discards_its_result() {
        let collector = Arc::new(ScriptedCollector {
            delay: Duration::from_millis(200),
            ..ScriptedCollector::default()
        });
        let sup = supervisor(collector.clone(), FAST);

        sup.start(SourceKind::Docker).expect("start");
        wait_for(|| collector.in_flight.load(Ordering::SeqCst) == 1).await;
        sup.stop(SourceKind::Docker).await.expect("stop");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(urls(&sup).is_empty());
    }

    #[tokio::test]
    async fn restart_after_stop_starts_clean() {
        let collector = Arc::new(ScriptedCollector::default());
        let sup = supervisor(collector.clone(), Duration::from_secs(3600));

        sup.start(SourceKind::Docker).expect("start");
        wait_for(|| urls(&sup) == ["http://call-1"]).await;
        sup.stop(SourceKind::Docker).await.expect("stop");
        assert!(urls(&sup).is_empty());

        assert!(sup.start(SourceKind::Docker).expect("restart"));
        wait_for(|| urls(&sup) == ["http://call-2"]).await;
        sup.stop(SourceKind::Docker).await.expect("stop");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_stop_and_start_never_strand_a_silent_worker() {
        let collector = Arc::new(ScriptedCollector::default());
        let sup = Arc::new(supervisor(collector.clone(), Duration::from_secs(3600)));

        for _ in 0..200 {
            let stopper = {
                let sup = Arc::clone(&sup);
                tokio::spawn(async move { sup.stop(SourceKind::Docker).await })
            };
            let starter = {
                let sup = Arc::clone(&sup);
                tokio::spawn(async move { sup.start(SourceKind::Docker) })
            };
            stopper.await.expect("join stop").expect("stop");
            starter.await.expect("join start").expect("start");

            // A live worker must always be allowed to publish.
            let status = sup.status(SourceKind::Docker).expect("status");
            assert!(
                !status.running || status.enabled,
                "worker running while disabled"
            );
            if status.running {
                wait_for(|| !urls(&sup).is_empty()).await;
            }
        }

        sup.stop(SourceKind::Docker).await.expect("final stop");
        assert!(!sup.is_running(SourceKind::Docker));
        assert!(urls(&sup).is_empty());
    }

    #[tokio::test]
    async fn stop_with_nothing_running_leaves_a_fresh_start_usable() {
        let collector = Arc::new(ScriptedCollector::default());
        let sup = supervisor(collector.clone(), Duration::from_secs(3600));

        sup.stop(SourceKind::Docker).await.expect("idle stop");
        assert!(sup.start(SourceKind::Docker).expect("start"));
        wait_for(|| urls(&sup) == ["http://call-1"]).await;
        let status = sup.status(SourceKind::Docker).expect("status");
        assert!(status.enabled && status.running);
        sup.stop(SourceKind::Docker).await.expect("stop");
    }

    #[tokio::test]
    async fn panics_and_errors_keep_previous_snapshot_and_loop_continues() {
        let collector = Arc::new(ScriptedCollector {
            panic_on: vec![2],
            fail_on: vec![3],
            ..ScriptedCollector::default()
        });
        let sup = supervisor(collector.clone(), FAST);

        sup.start(SourceKind::Docker).expect("start");
        wait_for(|| collector.calls.load(Ordering::SeqCst) >= 3).await;
        // Calls 2 and 3 produced nothing, so call 1's result stays visible
        // until a later call lands.
        let current = urls(&sup);
        assert!(
            !current.is_empty() && current != ["http://call-2"] && current != ["http://call-3"],
            "unexpected snapshot {current:?}"
        );

        wait_for(|| collector.calls.load(Ordering::SeqCst) >= 5).await;
        assert!(sup.is_running(SourceKind::Docker));
        wait_for(|| urls(&sup) != ["http://call-1"]).await;
        sup.stop(SourceKind::Docker).await.expect("stop");
    }

    #[tokio::test]
    async fn cycles_for_one_source_never_overlap() {
        let collector = Arc::new(ScriptedCollector {
            delay: Duration::from_millis(60),
            ..ScriptedCollector::default()
        });
        let sup = supervisor(collector.clone(), Duration::from_millis(10));

        sup.start(SourceKind::Docker).expect("start");
        wait_for(|| collector.calls.load(Ordering::SeqCst) >= 4).await;
        sup.stop(SourceKind::Docker).await.expect("stop");
        assert_eq!(collector.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_source_is_an_error() {
        let sup = supervisor(Arc::new(ScriptedCollector::default()), FAST);
        assert!(sup.start(SourceKind::Unraid).is_err());
        assert!(!sup.is_running(SourceKind::Unraid));
    }

    #[tokio::test]
    async fn enabling_requires_connection_settings() {
        let sup = supervisor(Arc::new(ScriptedCollector::default()), FAST);
        let err = sup
            .set_enabled(SourceKind::Docker, true)
            .await
            .expect_err("docker url missing");
        assert!(matches!(err, DiscoveryError::Config(_)));

        sup.config()
            .update(|cfg| cfg.docker.url = "http://docker.lan:2375".to_string());
        let status = sup
            .set_enabled(SourceKind::Docker, true)
            .await
            .expect("enable");
        assert!(status.enabled && status.running);
        assert!(sup.config().snapshot().docker.enabled);

        let status = sup
            .set_enabled(SourceKind::Docker, false)
            .await
            .expect("disable");
        assert!(!status.enabled && !status.running);
        assert!(!sup.config().snapshot().docker.enabled);
    }

    #[tokio::test]
    async fn connection_test_reports_count_without_touching_registry() {
        let sup = supervisor(Arc::new(ScriptedCollector::default()), FAST);
        let result = sup
            .test_connection(SourceKind::Docker)
            .await
            .expect("test");
        assert!(result.ok);
        assert_eq!(result.apps, 1);
        assert!(urls(&sup).is_empty());
    }
}
