//! Server lifecycle management.
//!
//! The [`McpLifecycleManager`] is the single writer for the handle map
//! and the capability registry. Every state transition, whether driven
//! by startup, shutdown, an explicit restart, or a connection failure
//! observed during a tool call, goes through here, so the registry
//! invariant holds: a server has registry entries exactly while it is
//! running.

use crate::config::{ConfigStore, ServerConfig};
use crate::error::{McpError, McpResult};
use crate::events::{McpEvent, EVENT_CHANNEL_CAPACITY};
use crate::handle::{ServerHandle, ServerState, ServerStatus};
use crate::registry::CapabilityRegistry;
use crate::transport::{DefaultTransportFactory, TransportFactory};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use relaychat_util::server_span;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

/// How long a graceful stop may take before we give up on the server.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Manages the lifecycle of all configured MCP servers.
pub struct McpLifecycleManager {
    store: Arc<dyn ConfigStore>,
    factory: Arc<dyn TransportFactory>,
    handles: RwLock<HashMap<String, Arc<ServerHandle>>>,
    registry: Arc<RwLock<CapabilityRegistry>>,
    events: broadcast::Sender<McpEvent>,
    shutdown: CancellationToken,
    stop_timeout: Duration,
}

impl McpLifecycleManager {
    /// Create a manager that spawns real transports.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self::with_factory(store, Arc::new(DefaultTransportFactory))
    }

    /// Create a manager with a custom transport factory.
    pub fn with_factory(store: Arc<dyn ConfigStore>, factory: Arc<dyn TransportFactory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            factory,
            handles: RwLock::new(HashMap::new()),
            registry: Arc::new(RwLock::new(CapabilityRegistry::new())),
            events,
            shutdown: CancellationToken::new(),
            stop_timeout: STOP_TIMEOUT,
        }
    }

    /// Override how long a graceful stop may take.
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<McpEvent> {
        self.events.subscribe()
    }

    /// The capability registry, shared with the invocation gateway.
    pub fn registry(&self) -> Arc<RwLock<CapabilityRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Look up the handle for a server, if one exists.
    pub async fn handle(&self, name: &str) -> Option<Arc<ServerHandle>> {
        self.handles.read().await.get(name).cloned()
    }

    /// Status snapshot for one server.
    pub async fn server_status(&self, name: &str) -> Option<ServerStatus> {
        self.handle(name).await.map(|h| h.status())
    }

    /// Status snapshots for all known servers.
    pub async fn statuses(&self) -> Vec<ServerStatus> {
        let mut statuses: Vec<_> = self
            .handles
            .read()
            .await
            .values()
            .map(|h| h.status())
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Start all enabled servers concurrently.
    ///
    /// Individual startup failures are contained: the failing server is
    /// marked failed and the rest come up normally. The only fatal error
    /// is being unable to read the configuration at all.
    pub async fn start_all(&self) -> McpResult<()> {
        let configs = self.store.list_enabled().await.map_err(|e| {
            error!(error = %e, "failed to enumerate server configurations");
            McpError::Config(format!("failed to enumerate servers: {e}"))
        })?;

        let total = configs.len();
        let results =
            futures::future::join_all(configs.into_iter().map(|config| self.start_server(config)))
                .await;

        let started = results.iter().filter(|r| r.is_ok()).count();
        info!(started, total, "MCP server startup complete");
        Ok(())
    }

    /// Start one server: connect its transport, run the handshake, and
    /// register its tools.
    ///
    /// The handle is inserted before the connect attempt so the server is
    /// observable in `Starting` (and later `Failed`) rather than silently
    /// absent. Returns the per-server outcome; callers that want
    /// containment (like [`start_all`](Self::start_all)) ignore the error.
    pub async fn start_server(&self, config: ServerConfig) -> McpResult<()> {
        let name = config.name.clone();

        // Insert already in Starting, inside the write lock, so a
        // concurrent start for the same name hits the guard below
        // instead of racing a second boot against the same slot.
        let handle = {
            let mut handles = self.handles.write().await;
            if let Some(existing) = handles.get(&name) {
                match existing.state() {
                    ServerState::Running | ServerState::Starting => {
                        warn!(server = %name, "server already active, skipping start");
                        return Ok(());
                    }
                    _ => {}
                }
            }
            let handle = Arc::new(ServerHandle::new(config.clone()));
            handle.mark_starting();
            handles.insert(name.clone(), Arc::clone(&handle));
            handle
        };

        match self
            .boot(&handle, &config)
            .instrument(server_span!(&name))
            .await
        {
            Ok(()) => {
                let tools = handle.tools();
                self.registry.write().await.register(&name, &tools);
                info!(server = %name, tools = tools.len(), "MCP server running");
                let _ = self.events.send(McpEvent::ServerStarted {
                    name,
                    tool_count: tools.len(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(server = %name, error = %e, "MCP server failed to start");
                handle.mark_failed(&e);
                // Best effort; the transport may be half-open.
                if let Err(close_err) = handle.close_transport().await {
                    warn!(server = %name, error = %close_err, "cleanup after failed start");
                }
                let _ = self.events.send(McpEvent::ServerFailed {
                    name,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn boot(&self, handle: &Arc<ServerHandle>, config: &ServerConfig) -> McpResult<()> {
        let transport = self.factory.connect(config)?;
        handle.attach_transport(transport);
        handle.handshake().await
    }

    /// Mark a server failed after a connection failure observed outside
    /// the startup path, unregistering its capabilities.
    pub(crate) async fn mark_failed(&self, name: &str, error: &McpError) {
        let Some(handle) = self.handle(name).await else {
            return;
        };
        warn!(server = %name, error = %error, "marking server failed");
        handle.mark_failed(error);
        self.registry.write().await.unregister(name);
        let _ = self.events.send(McpEvent::ServerFailed {
            name: name.to_string(),
            error: error.to_string(),
        });
    }

    /// Gracefully stop one server.
    pub async fn stop_server(&self, name: &str) -> McpResult<()> {
        let handle = self
            .handle(name)
            .await
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;

        self.registry.write().await.unregister(name);

        match timeout(self.stop_timeout, handle.close()).await {
            Ok(result) => result?,
            Err(_) => {
                // The close future is dropped; force the terminal state so
                // status queries agree with the ServerStopped event.
                warn!(server = %name, "stop timed out, abandoning server");
                handle.mark_stopped();
            }
        }

        info!(server = %name, "MCP server stopped");
        let _ = self.events.send(McpEvent::ServerStopped {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Restart a server from its current configuration.
    ///
    /// This is the only way out of `Failed` or `Stopped`: the old handle
    /// is stopped and discarded and a fresh one is started, so any config
    /// change made since the last start takes effect.
    pub async fn restart(&self, name: &str) -> McpResult<()> {
        let config = self
            .store
            .get(name)
            .await?
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;

        if self.handle(name).await.is_some() {
            // Stop failures don't block the restart; the old transport is
            // discarded either way.
            if let Err(e) = self.stop_server(name).await {
                warn!(server = %name, error = %e, "stop before restart failed");
            }
            self.handles.write().await.remove(name);
        }

        self.start_server(config).await
    }

    /// Validate a configuration by performing a full connect-handshake
    /// cycle against a throwaway handle.
    ///
    /// Nothing is registered and the handle map is untouched; the probe
    /// server is always shut down, even on success.
    pub async fn validate_config(&self, config: &ServerConfig) -> McpResult<ServerStatus> {
        let handle = ServerHandle::new(config.clone());

        let outcome = async {
            let transport = self.factory.connect(config)?;
            handle.attach_transport(transport);
            handle.handshake().await
        }
        .await;

        let status = handle.status();
        if let Err(e) = handle.close().await {
            warn!(server = %config.name, error = %e, "probe cleanup failed");
        }

        outcome.map(|()| status)
    }

    /// Stop all servers and release all resources.
    pub async fn shutdown(&self) -> McpResult<()> {
        self.shutdown.cancel();

        let names: Vec<String> = {
            let handles = self.handles.read().await;
            handles
                .iter()
                .filter(|(_, h)| {
                    matches!(h.state(), ServerState::Running | ServerState::Starting)
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        let results =
            futures::future::join_all(names.iter().map(|name| self.stop_server(name))).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!(server = %name, error = %e, "shutdown stop failed");
            }
        }

        self.handles.write().await.clear();
        self.registry.write().await.clear();
        info!("MCP lifecycle manager shut down");
        Ok(())
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
