//! Listener lifecycle manager.
//!
//! Owns zero or more running listener endpoints. Definitions persist
//! independently of running state: `execute` transitions a definition to
//! serving, `kill` stops it, and deleting the definition is a separate,
//! explicit step. At process start, every persisted listener whose stored
//! state is running is re-executed independently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::codec::PacketCodec;
use crate::events::{EventBus, EventSource};
use crate::models::filter::GlobalFilter;
use crate::models::listener::{Listener, ListenerKind, ListenerOptions};
use crate::persistence::db::Database;
use crate::persistence::listener_repo::ListenerRepo;
use crate::registry::SessionRegistry;
use crate::tasking::dispatcher::Dispatcher;
use crate::{AppError, Result};

use super::endpoint::{self, CheckinState};
use super::profile;

struct RunningListener {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Outcome of restarting persisted listeners at process start.
#[derive(Debug, Default)]
pub struct StartupReport {
    /// Listener names that came up.
    pub started: Vec<String>,
    /// Per-listener failure descriptions. Never aborts the batch.
    pub failures: Vec<String>,
}

/// Manager of all listener endpoint processes.
pub struct ListenerManager {
    repo: ListenerRepo,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
    filter: Arc<GlobalFilter>,
    codec: Arc<dyn PacketCodec>,
    defaults: ListenerOptions,
    bus: EventBus,
    running: Mutex<HashMap<String, RunningListener>>,
}

impl ListenerManager {
    /// Create a manager over the shared state.
    ///
    /// `defaults` is the configured option template new listener
    /// definitions start from.
    #[must_use]
    pub fn new(
        db: Database,
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<Dispatcher>,
        filter: Arc<GlobalFilter>,
        codec: Arc<dyn PacketCodec>,
        defaults: ListenerOptions,
        bus: EventBus,
    ) -> Self {
        Self {
            repo: ListenerRepo::new(db),
            registry,
            dispatcher,
            filter,
            codec,
            defaults,
            bus,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Starting option set for a new listener definition, carrying the
    /// configured session cadence defaults. Callers set the kind-specific
    /// options (host, port, redirect target) on top and pass the result to
    /// [`create`](Self::create).
    #[must_use]
    pub fn default_options(&self) -> ListenerOptions {
        self.defaults.clone()
    }

    /// Validate and persist a new listener definition.
    ///
    /// A profile option naming a readable file is resolved to that file's
    /// effective line before validation, so the stored definition always
    /// carries the literal profile.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming every missing required option
    /// for the kind, `AppError::Conflict` for a duplicate name, or the
    /// profile loader's error when a referenced profile file is unusable.
    pub async fn create(
        &self,
        name: impl Into<String>,
        kind: ListenerKind,
        mut options: ListenerOptions,
    ) -> Result<Listener> {
        if let Some(reference) = options.profile.as_deref() {
            if Path::new(reference).is_file() {
                options.profile = Some(profile::load_profile_line(reference)?);
            }
        }
        let listener = Listener::new(name, kind, options)?;
        self.repo.create(&listener).await?;
        self.bus.publish(
            EventSource::Listeners,
            format!("listener {} defined ({})", listener.name, listener.kind.as_str()),
        );
        Ok(listener)
    }

    /// Start the network endpoint for a defined listener.
    ///
    /// The socket is bound before the listener is marked running, so a
    /// bind failure leaves the persisted state untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name,
    /// `AppError::Conflict` if it is already serving, or
    /// `AppError::Transport` when the bind fails.
    pub async fn execute(&self, name: &str) -> Result<SocketAddr> {
        let definition = self.repo.get(name).await?;

        let mut running = self.running.lock().await;
        if running.contains_key(name) {
            return Err(AppError::Conflict(format!("listener '{name}' is already running")));
        }

        let bind_addr = definition.bind_addr()?;
        let socket = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|err| {
                AppError::Transport(format!("listener '{name}' failed to bind {bind_addr}: {err}"))
            })?;
        let local_addr = socket
            .local_addr()
            .map_err(|err| AppError::Transport(format!("listener '{name}': {err}")))?;

        let state = Arc::new(CheckinState {
            listener: definition.clone(),
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            filter: Arc::clone(&self.filter),
            codec: Arc::clone(&self.codec),
        });
        let router = endpoint::router(state);

        let cancel = CancellationToken::new();
        let serve_cancel = cancel.clone();
        let listener_name = definition.name.clone();
        let handle = tokio::spawn(async move {
            let served = axum::serve(
                socket,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
            .await;
            if let Err(err) = served {
                error!(listener = %listener_name, %err, "listener endpoint failed");
            }
        });

        self.repo.set_running(name, true).await?;
        running.insert(
            name.to_owned(),
            RunningListener {
                cancel,
                handle,
                local_addr,
            },
        );
        drop(running);

        info!(listener = name, %local_addr, "listener started");
        self.bus.publish(
            EventSource::Listeners,
            format!("listener {name} started on {local_addr}"),
        );
        Ok(local_addr)
    }

    /// Stop a serving listener. The persisted definition remains; in-flight
    /// check-ins complete before the endpoint goes away.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name, or
    /// `AppError::Conflict` if it is defined but not serving.
    pub async fn kill_one(&self, name: &str) -> Result<()> {
        let entry = self.running.lock().await.remove(name);
        let Some(entry) = entry else {
            // Distinguish "never defined" from "defined but stopped".
            self.repo.get(name).await?;
            return Err(AppError::Conflict(format!("listener '{name}' is not running")));
        };

        entry.cancel.cancel();
        let _ = entry.handle.await;
        self.repo.set_running(name, false).await?;

        info!(listener = name, "listener stopped");
        self.bus
            .publish(EventSource::Listeners, format!("listener {name} stopped"));
        Ok(())
    }

    /// Stop every serving listener. Per-listener failures are collected;
    /// the batch never aborts early.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PartialBatch` when a subset fails to stop.
    pub async fn kill_all(&self) -> Result<()> {
        let names: Vec<String> = self.running.lock().await.keys().cloned().collect();
        let mut failures = Vec::new();
        for name in names {
            if let Err(err) = self.kill_one(&name).await {
                failures.push(format!("listener {name}: {err}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::PartialBatch(failures))
        }
    }

    /// Delete a listener definition, stopping the endpoint first when it is
    /// serving.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name.
    pub async fn delete(&self, name: &str) -> Result<()> {
        if self.is_running(name).await {
            self.kill_one(name).await?;
        }
        if !self.repo.delete(name).await? {
            return Err(AppError::NotFound(format!("listener '{name}' not found")));
        }
        self.bus
            .publish(EventSource::Listeners, format!("listener {name} deleted"));
        Ok(())
    }

    /// Re-execute every persisted listener whose stored state is running.
    ///
    /// Invoked once at process start. Listeners start independently; one
    /// failure is reported and the rest continue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` only if the definitions cannot be read at
    /// all; individual startup failures land in the report.
    pub async fn start_existing(&self) -> Result<StartupReport> {
        let mut report = StartupReport::default();
        for definition in self.repo.list_running().await? {
            match self.execute(&definition.name).await {
                Ok(_) => report.started.push(definition.name),
                Err(err) => {
                    error!(listener = %definition.name, %err, "failed to restart persisted listener");
                    self.bus.publish(
                        EventSource::Listeners,
                        format!("failed to restart listener {}: {err}", definition.name),
                    );
                    report.failures.push(format!("listener {}: {err}", definition.name));
                }
            }
        }
        Ok(report)
    }

    /// Stop all endpoints for process shutdown without touching the
    /// persisted running flags, so `start_existing` restores them on the
    /// next boot.
    pub async fn stop_all_for_shutdown(&self) {
        let entries: Vec<(String, RunningListener)> =
            self.running.lock().await.drain().collect();
        for (name, entry) in entries {
            entry.cancel.cancel();
            let _ = entry.handle.await;
            info!(listener = %name, "listener stopped for shutdown");
        }
    }

    /// Whether a listener is currently serving.
    pub async fn is_running(&self, name: &str) -> bool {
        self.running.lock().await.contains_key(name)
    }

    /// Local bound address of a serving listener, if any.
    pub async fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.running.lock().await.get(name).map(|entry| entry.local_addr)
    }

    /// List all persisted listener definitions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Listener>> {
        self.repo.list().await
    }

    /// Retrieve one persisted listener definition.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name.
    pub async fn get(&self, name: &str) -> Result<Listener> {
        self.repo.get(name).await
    }
}
