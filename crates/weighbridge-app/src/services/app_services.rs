// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: builds the hub, the print queue and the device
// link from configuration, and wires link pushes into the hub.
//
// All fields are `Arc`-backed, so the struct is cloned into every
// connection task.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use weighbridge_core::AppConfig;
use weighbridge_core::error::Result;
use weighbridge_core::types::LinkState;
use weighbridge_hub::Hub;
use weighbridge_link::{LinkConfig, LinkManager, SerialTransport, SimulatedTransport};
use weighbridge_print::{ExternalCommandRunner, JobQueue, PrintRunner, QueueConfig};

/// How long shutdown waits for queued prints to finish.
const QUEUE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist, and resolve relative paths against `base`.
pub fn load_config(path: &Path, base: &Path) -> Result<AppConfig> {
    let mut config = match AppConfig::load(path)? {
        Some(config) => {
            info!(path = %path.display(), "configuration loaded");
            config
        }
        None => {
            info!(path = %path.display(), "no configuration file, using defaults");
            AppConfig::default()
        }
    };
    config.resolve_paths(base);
    Ok(config)
}

/// The device side: a real serial port or the simulator.
pub enum DeviceLink {
    Serial(LinkManager<SerialTransport>),
    Simulated(LinkManager<SimulatedTransport>),
}

impl DeviceLink {
    pub fn from_config(config: &AppConfig) -> Self {
        let link_config = LinkConfig::from_app(config);
        if config.simulate {
            Self::Simulated(LinkManager::new(
                SimulatedTransport::new(config.simulate_interval()),
                link_config,
            ))
        } else {
            Self::Serial(LinkManager::new(
                SerialTransport::new(config.serial_port.clone(), config.baud_rate),
                link_config,
            ))
        }
    }

    /// Start reading; every push goes to `hub`.
    pub fn start(&self, hub: Hub) {
        let push = move |message: String| {
            hub.broadcast(&message);
        };
        match self {
            Self::Serial(link) => link.start(push),
            Self::Simulated(link) => link.start(push),
        }
    }

    pub async fn stop(&self) {
        match self {
            Self::Serial(link) => link.stop().await,
            Self::Simulated(link) => link.stop().await,
        }
    }

    pub fn state(&self) -> LinkState {
        match self {
            Self::Serial(link) => link.state(),
            Self::Simulated(link) => link.state(),
        }
    }
}

#[derive(Clone)]
pub struct AppServices {
    config: Arc<AppConfig>,
    hub: Hub,
    queue: Arc<JobQueue>,
    link: Arc<DeviceLink>,
}

impl AppServices {
    /// Build every service and start the device link.  Must be called inside
    /// the Tokio runtime.
    pub fn init(config: AppConfig) -> Self {
        let runner = ExternalCommandRunner::new(&config.printer_executable);
        if !runner.executable().exists() {
            warn!(
                path = %runner.executable().display(),
                "print executable not found; print jobs will fail"
            );
        }
        let services = Self::with_runner(config, runner);
        services.link.start(services.hub.clone());
        info!(
            simulate = services.config.simulate,
            port = %services.config.serial_port,
            "app services initialised"
        );
        services
    }

    /// Build the services around `runner` without starting the device link.
    pub fn with_runner<R: PrintRunner>(config: AppConfig, runner: R) -> Self {
        let hub = Hub::new(config.subscriber_queue_capacity);
        let queue = JobQueue::start(
            QueueConfig {
                temp_dir: config.temp_dir.clone(),
                history_dir: config.history_dir.clone(),
            },
            runner,
        );
        let link = DeviceLink::from_config(&config);
        Self {
            config: Arc::new(config),
            hub,
            queue: Arc::new(queue),
            link: Arc::new(link),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Close the device link, then give queued prints a bounded time to
    /// finish.  Works from any clone; connection tasks may still hold others.
    pub async fn shutdown(&self) {
        self.link.stop().await;
        if tokio::time::timeout(QUEUE_DRAIN_TIMEOUT, self.queue.shutdown())
            .await
            .is_err()
        {
            warn!("print queue still busy at shutdown");
        }
        info!("app services stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use weighbridge_core::types::JobStatus;

    #[test]
    fn missing_config_file_gives_defaults_resolved_against_base() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = load_config(&root.path().join("config.json"), root.path()).expect("load");
        assert_eq!(config.websocket_port, 8080);
        assert_eq!(config.history_dir, root.path().join("history"));
        assert!(config.printer_executable.starts_with(root.path()));
    }

    #[test]
    fn malformed_config_file_is_fatal() {
        let root = tempfile::tempdir().expect("tempdir");
        let path = root.path().join("config.json");
        std::fs::write(&path, "{ not json").expect("write");
        let err = load_config(&path, root.path()).unwrap_err();
        assert!(err.is_fatal());
    }

    /// Takes a while per document.
    struct SlowRunner;

    #[async_trait]
    impl PrintRunner for SlowRunner {
        async fn print(&self, _document: &Path, _printer: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_drains_queue_while_clones_are_alive() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = AppConfig {
            simulate: true,
            history_dir: root.path().join("history"),
            temp_dir: root.path().join("tmp"),
            ..AppConfig::default()
        };
        std::fs::create_dir_all(&config.history_dir).expect("mkdir history");
        std::fs::create_dir_all(&config.temp_dir).expect("mkdir tmp");
        let services = AppServices::with_runner(config, SlowRunner);
        // Stands in for a connection task that is still serving a client.
        let connection = services.clone();

        let id = services
            .queue()
            .submit(b"%PDF".to_vec(), "ticket.pdf", "")
            .expect("submit");
        for _ in 0..200 {
            if services.queue().snapshot().running == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        services.shutdown().await;
        let job = connection.queue().status(id).expect("known job");
        assert_eq!(job.status, JobStatus::Completed);
        assert!(!connection.queue().snapshot().worker_running);
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_link_pushes_into_hub() {
        let root = tempfile::tempdir().expect("tempdir");
        let config = AppConfig {
            simulate: true,
            simulate_interval_ms: 50,
            history_dir: root.path().join("history"),
            temp_dir: root.path().join("tmp"),
            ..AppConfig::default()
        };
        let services = AppServices::init(config);

        for _ in 0..200 {
            if services.link_state() == LinkState::Reading {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(services.link_state(), LinkState::Reading);
        assert_eq!(services.hub().subscriber_count(), 0);

        services.shutdown().await;
    }
}
