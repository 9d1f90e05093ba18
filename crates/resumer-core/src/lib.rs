pub mod access;
pub mod address;
pub mod buffer;
pub mod client;
pub mod config;
pub mod directory;
pub mod framing;
pub mod protocol;
pub mod recorder;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod service;

pub use access::StaticAccessGate;
pub use client::{MAX_REDIRECT_HOPS, RecordSession, ReplayStream, ResumerClient};
pub use config::ResumerConfig;
pub use recorder::{Recorder, RecordingStatus, Subscription};
pub use registry::{RecorderRegistry, RecordingHandle, RegistrySettings};
pub use resolver::{RedirectResolver, Route};
pub use server::{ResumerServer, ServerSettings};
pub use service::{CancelOutcome, ReplayOutcome, ResumerService};

use resumer_traits::{AccessGate, OwnershipDirectory, RedirectTarget};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Everything one replica needs, assembled once at startup.
pub struct ReplicaCore {
    pub registry: Arc<RecorderRegistry>,
    pub service: Arc<ResumerService>,
}

impl ReplicaCore {
    /// Build from configuration. `bound` is the listener's local address and
    /// feeds advertised-address resolution.
    pub fn new(config: &ResumerConfig, bound: Option<SocketAddr>) -> anyhow::Result<Self> {
        let directory = directory::from_config(&config.directory)?;
        let advertised = address::resolve_advertised_address(
            config.server.advertised_address.as_deref(),
            bound,
            config.server.port,
        )?;
        let gate = Arc::new(StaticAccessGate::from_config(&config.access));
        Ok(Self::with_parts(config, directory, gate, advertised))
    }

    pub fn with_parts(
        config: &ResumerConfig,
        directory: Arc<dyn OwnershipDirectory>,
        gate: Arc<dyn AccessGate>,
        advertised: RedirectTarget,
    ) -> Self {
        info!(
            advertised = %advertised,
            directory = ?config.directory.kind,
            enabled = config.server.enabled,
            "Initializing response resumer"
        );
        let registry = Arc::new(RecorderRegistry::new(
            directory,
            advertised,
            RegistrySettings::from_config(config),
        ));
        let service = Arc::new(ResumerService::new(
            config.server.enabled,
            registry.clone(),
            gate,
        ));
        Self { registry, service }
    }

    pub fn server(&self, listener: TcpListener, config: &ResumerConfig) -> ResumerServer {
        self.registry
            .spawn_cleanup_task(config.recording.cleanup_interval());
        ResumerServer::new(
            self.service.clone(),
            listener,
            ServerSettings {
                record_idle_timeout: config.recording.record_idle_timeout(),
            },
        )
    }
}
