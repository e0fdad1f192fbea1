// File: src/app.rs
// Purpose: Startup sequence and the supervisor loop

use crate::channel::{recv_next, ChannelMessage, UpdateChannel};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::files::{resolve_base_path, Files};
use crate::hot_reload::{Coordinator, Shutdown};
use crate::registry::Registry;
use crate::script::{ScriptBindings, ScriptRunner};
use crate::server::{self, AppState};
use crate::worker::{self, RuntimePackage, WorkerHandle, WorkerOptions};
use routekit_parser::TemplateCompiler;
use std::future::IntoFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A started application: files scanned, routes registered, worker running
pub struct App {
    config: Arc<Config>,
    files: Arc<Files>,
    coordinator: Arc<Coordinator>,
    channel: UpdateChannel,
    file_events: broadcast::Receiver<crate::files::FileEvent>,
    messages: broadcast::Receiver<ChannelMessage>,
    worker: WorkerHandle,
}

impl App {
    /// Starts everything except the HTTP listener
    ///
    /// `project` is the project root; the served directory is its `src_dir`
    /// when present. Route conflicts and watcher failures are fatal.
    pub fn start(project: impl AsRef<Path>, config: Config) -> Result<Self> {
        let project = project.as_ref();
        let base = resolve_base_path(project, &config.routing.src_dir)?;
        info!("Serving {}", base.display());

        let files = Files::initialise(&base, &config.routing)?;
        let base = files.base_path().to_path_buf();

        let runner = ScriptRunner::new(&base, config.script.clone(), ScriptBindings::default());
        let registry = Arc::new(Registry::new(&config, runner));
        for event in files.initial_events() {
            registry.add_file(&event.path)?;
        }

        let runtime = RuntimePackage::from_config(&config.runtime, project).map_err(|e| {
            Error::Configuration(format!("cannot load runtime package \"{}\": {}", config.runtime.package, e))
        })?;

        let channel = UpdateChannel::new();
        // Subscribe before anything is posted
        let messages = channel.subscribe();
        let file_events = files.subscribe();

        let worker = worker::spawn(
            WorkerOptions {
                base: base.clone(),
                production: config.production,
                runtime: Arc::new(runtime),
                dependency_dir: config.routing.dependency_dir.clone(),
                compiler: Arc::new(TemplateCompiler),
            },
            channel.clone(),
        )?;

        let coordinator = Arc::new(Coordinator::new(registry.clone(), channel.clone(), config.hot_reload_enabled()));
        for page in registry.page_files() {
            coordinator.request_compile(&page);
        }

        Ok(Self {
            config: Arc::new(config),
            files: Arc::new(files),
            coordinator,
            channel,
            file_events,
            messages,
            worker,
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.coordinator.registry()
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn base_path(&self) -> PathBuf {
        self.files.base_path().to_path_buf()
    }

    pub fn channel(&self) -> &UpdateChannel {
        &self.channel
    }

    /// The HTTP router over this application's state
    pub fn router(&self) -> axum::Router {
        server::router(AppState::new(self.coordinator.clone(), self.config.clone()))
    }

    /// Applies file events and worker messages until something is fatal
    pub async fn supervise(mut self) -> Shutdown {
        let shutdown = loop {
            let outcome = tokio::select! {
                event = self.file_events.recv() => match event {
                    Ok(event) => self.coordinator.on_file_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Supervisor missed {} file events", skipped);
                        Ok(())
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        Err(Shutdown::WatcherClosed)
                    }
                },
                message = recv_next(&mut self.messages, "supervisor") => match message {
                    Some(message) => self.coordinator.on_message(message),
                    None => Err(Shutdown::WorkerStopped("update channel closed".to_string())),
                },
            };

            if let Err(shutdown) = outcome {
                break shutdown;
            }
        };

        self.files.close();
        debug!("Worker finished: {}", self.worker.is_finished());
        shutdown
    }

    /// Binds `host:port` and serves until the supervisor stops
    pub async fn serve(self) -> anyhow::Result<Shutdown> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let router = self.router();
        info!("Listening on http://{}", addr);

        tokio::select! {
            served = axum::serve(listener, router).into_future() => {
                served?;
                anyhow::bail!("HTTP server stopped")
            }
            shutdown = self.supervise() => Ok(shutdown),
        }
    }
}
