//! Supervisor (§4.7): the outer loop that runs the Decision Engine, writes
//! the state snapshot, and checks monitor health every
//! `replication_state_check_interval`, interruptible by a command channel
//! that serialises reload/shutdown/priority-tick events. Drives a
//! background Monitor loop on `db_poll_interval`.

use crate::autofollow;
use crate::config::Config;
use crate::decision::{DecisionEngine, Thresholds};
use crate::model::MemberState;
use crate::monitor::{Monitor, PublishedState};
use crate::node_map;
use crate::pgutil::parse_connection_info;
use crate::publisher;
use crate::statsd::StatsClient;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc, watch};

/// Commands serialised into the Supervisor: config reload, graceful
/// shutdown, and a forced immediate tick (the HTTP `/check` endpoint).
#[derive(Debug)]
pub enum Command {
    Reload,
    Shutdown,
    PriorityTick,
}

/// Runs the daemon until a shutdown signal or command arrives.
///
/// # Errors
///
/// Returns an error if the initial configuration cannot be loaded.
pub async fn run(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path).context("loading initial configuration")?;
    let stats = Arc::new(StatsClient::new(
        config.statsd.host.as_deref(),
        config.statsd.port.unwrap_or(8125),
        config.statsd.tags.clone(),
    ));

    let config = Arc::new(RwLock::new(config));
    let shared_state: Arc<RwLock<PublishedState>> = Arc::new(RwLock::new(PublishedState::default()));
    let lag_is_warning = Arc::new(AtomicBool::new(false));

    let (command_tx, command_rx) = mpsc::channel::<Command>(16);
    let (priority_tx, priority_rx) = mpsc::channel::<()>(1);
    let (tick_complete_tx, tick_complete_rx) = watch::channel(());

    spawn_signal_listener(command_tx.clone());

    let http_task = crate::http::spawn(
        Arc::clone(&config),
        Arc::clone(&shared_state),
        command_tx.clone(),
    )
    .await?;

    let monitor_task = tokio::spawn(monitor_loop(
        Arc::clone(&config),
        Arc::clone(&shared_state),
        Arc::clone(&lag_is_warning),
        priority_rx,
        tick_complete_tx,
    ));

    supervisor_loop(
        &config_path,
        Arc::clone(&config),
        shared_state,
        lag_is_warning,
        &stats,
        command_rx,
        priority_tx,
        tick_complete_rx,
    )
    .await;

    monitor_task.abort();
    http_task.abort();

    Ok(())
}

fn spawn_signal_listener(command_tx: mpsc::Sender<Command>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let Ok(mut sighup) = signal(SignalKind::hangup()) else {
                return;
            };
            let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
                return;
            };
            let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
                return;
            };

            loop {
                tokio::select! {
                    _ = sighup.recv() => {
                        tracing::info!("received SIGHUP, reloading configuration");
                        if command_tx.send(Command::Reload).await.is_err() {
                            return;
                        }
                    }
                    _ = sigint.recv() => {
                        tracing::info!("received SIGINT, shutting down");
                        let _ = command_tx.send(Command::Shutdown).await;
                        return;
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("received SIGTERM, shutting down");
                        let _ = command_tx.send(Command::Shutdown).await;
                        return;
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = command_tx.send(Command::Shutdown).await;
            }
        }
    });
}

/// Drives the Monitor on its own ticker, honoring priority-tick requests.
async fn monitor_loop(
    config: Arc<RwLock<Config>>,
    shared_state: Arc<RwLock<PublishedState>>,
    lag_is_warning: Arc<AtomicBool>,
    mut priority_rx: mpsc::Receiver<()>,
    tick_complete_tx: watch::Sender<()>,
) {
    let mut monitor = Monitor::new();
    loop {
        let poll_interval = Duration::from_secs_f64(config.read().await.db_poll_interval);

        tokio::select! {
            () = tokio::time::sleep(poll_interval) => {}
            _ = priority_rx.recv() => {}
        }

        {
            let cfg = config.read().await;
            monitor.tick(&cfg, lag_is_warning.load(Ordering::Relaxed)).await;
        }

        *shared_state.write().await = monitor.snapshot();
        let _ = tick_complete_tx.send(());
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervisor_loop(
    config_path: &PathBuf,
    config: Arc<RwLock<Config>>,
    shared_state: Arc<RwLock<PublishedState>>,
    lag_is_warning: Arc<AtomicBool>,
    stats: &StatsClient,
    mut command_rx: mpsc::Receiver<Command>,
    priority_tx: mpsc::Sender<()>,
    mut tick_complete_rx: watch::Receiver<()>,
) {
    let mut decision_engine = DecisionEngine::new();
    let start_time = Instant::now();

    loop {
        let check_interval = Duration::from_secs_f64(config.read().await.replication_state_check_interval);

        tokio::select! {
            _ = tick_complete_rx.changed() => {}
            () = tokio::time::sleep(check_interval) => {}
            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Shutdown) | None => return,
                    Some(Command::PriorityTick) => {
                        let _ = priority_tx.send(()).await;
                        continue;
                    }
                    Some(Command::Reload) => {
                        if let Err(error) = reload_config(config_path, &config, &mut decision_engine).await {
                            tracing::error!(%error, "failed to reload configuration, keeping previous config");
                        }
                        continue;
                    }
                }
            }
        }

        run_iteration(&config, &shared_state, &lag_is_warning, stats, &mut decision_engine, start_time).await;
    }
}

async fn reload_config(config_path: &PathBuf, config: &Arc<RwLock<Config>>, decision_engine: &mut DecisionEngine) -> Result<()> {
    let new_config = Config::load(config_path)?;
    let mut guard = config.write().await;
    let node_set_changed = guard.remote_conns.keys().collect::<HashSet<_>>() != new_config.remote_conns.keys().collect::<HashSet<_>>();
    *guard = new_config;
    drop(guard);
    if node_set_changed {
        decision_engine.stamp_cluster_node_set_changed();
    }
    Ok(())
}

async fn run_iteration(
    config: &Arc<RwLock<Config>>,
    shared_state: &Arc<RwLock<PublishedState>>,
    lag_is_warning: &Arc<AtomicBool>,
    stats: &StatsClient,
    decision_engine: &mut DecisionEngine,
    start_time: Instant,
) {
    let config = config.read().await.clone();
    let state = shared_state.read().await.clone();

    let known_members: HashSet<String> = config.remote_conns.keys().cloned().collect();
    let never_promote: HashSet<String> = config.never_promote_these_nodes.iter().cloned().collect();
    let known_gone: HashSet<String> = config.known_gone_nodes.iter().cloned().collect();

    let node_map = node_map::build(
        config.own_db.as_deref(),
        &known_members,
        &state.cluster_state,
        &state.observer_state,
        &config.alert_file_dir,
        Duration::from_secs_f64(config.db_poll_interval),
    );

    decision_engine.observe_master(&node_map);

    let thresholds = Thresholds {
        warning_replication_time_lag: config.warning_replication_time_lag,
        max_failover_replication_time_lag: config.max_failover_replication_time_lag,
        replication_catchup_timeout: Duration::from_secs_f64(config.replication_catchup_timeout),
        missing_master_from_config_timeout: Duration::from_secs_f64(config.missing_master_from_config_timeout),
        failover_sleep_time: Duration::from_secs_f64(config.failover_sleep_time),
        never_promote_these_nodes: &never_promote,
        known_gone_nodes: &known_gone,
        maintenance_mode_file: &config.maintenance_mode_file,
        alert_file_dir: &config.alert_file_dir,
        over_warning_limit_command: config.over_warning_limit_command.as_deref(),
        failover_command: config.failover_command.as_deref(),
        poll_observers_on_warning_only: config.poll_observers_on_warning_only,
    };

    if let Some(own_name) = config.own_db.as_deref() {
        let own_state: MemberState = state.cluster_state.get(own_name).cloned().unwrap_or_default();
        let catching_up = crate::decision::is_catching_up(&own_state, thresholds.replication_catchup_timeout, thresholds.warning_replication_time_lag);
        let own_lag = if catching_up { None } else { own_state.replication_time_lag };

        decision_engine.update_lag_warning(own_lag, &thresholds, stats).await;
        lag_is_warning.store(decision_engine.lag_warning_state == crate::decision::LagWarningState::Warning, Ordering::Relaxed);

        decision_engine.maybe_failover(own_name, &own_state, &node_map, &thresholds).await;
    }

    maybe_autofollow(&config, &node_map).await;

    if let Err(error) = publisher::write(&config.json_state_file_path, &state.cluster_state, &state.observer_state, &decision_engine.current_master) {
        tracing::error!(%error, "failed to write state snapshot");
    }

    check_monitor_health(&config, &state, start_time, stats);
}

async fn maybe_autofollow(config: &Config, node_map: &node_map::NodeMap) {
    if !config.autofollow {
        return;
    }
    let Some(master) = &node_map.master_name else { return };
    if Some(master.as_str()) == config.own_db.as_deref() {
        return;
    }
    let (Some(pg_data_directory), Some(template)) = (&config.pg_data_directory, &config.primary_conninfo_template) else {
        return;
    };
    let Some(master_conninfo) = config.conninfo_for(master) else {
        return;
    };
    let Ok(master_info) = parse_connection_info(master_conninfo) else {
        tracing::error!(master, "failed to parse new master's connection info for autofollow");
        return;
    };

    match autofollow::rewrite(config.own_db.as_deref().unwrap_or("unknown"), pg_data_directory, template, &master_info) {
        Ok(autofollow::Outcome::Rewritten) => {
            tracing::warn!(master, "autofollow rewrote recovery configuration, restarting");
            if let Some(cmd) = &config.pg_stop_command {
                let _ = crate::command::run(cmd).await;
            }
            if let Some(cmd) = &config.pg_start_command {
                let _ = crate::command::run(cmd).await;
            }
        }
        Ok(autofollow::Outcome::Unchanged) => {}
        Err(error) => tracing::error!(%error, "failed to rewrite recovery configuration"),
    }
}

fn check_monitor_health(config: &Config, state: &PublishedState, start_time: Instant, stats: &StatsClient) {
    let timeout_secs = match config.cluster_monitor_health_timeout_seconds {
        Some(None) => return,
        Some(Some(secs)) => secs,
        None => 2.0 * config.replication_state_check_interval,
    };
    let timeout = Duration::from_secs_f64(timeout_secs);

    let last_success = state.last_monitoring_success_time.unwrap_or(start_time);
    let baseline = last_success.max(start_time);

    if baseline.elapsed() >= timeout {
        tracing::error!(elapsed = ?baseline.elapsed(), "cluster monitor health timeout exceeded");
        stats.increment("cluster_monitor_health_timeout", 1, None);
    }
}
