// File: src/hot_reload.rs
// Purpose: Decide what connected browsers must do after a recompile

use crate::channel::{ChannelMessage, DependencyGraph, UpdateChannel};
use crate::files::FileEvent;
use crate::registry::{ChangeAction, CompiledRoute, PageState, Registry};
use routekit_router::{extension_of, PAGE_EXTENSION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Message sent over the development socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    /// Full page reload
    Reload,
    /// Replace the contents of `#__style__`
    Css { code: String },
}

/// Compares two compiled versions of a route
///
/// Without a previous version nothing is sent; any change outside the style
/// needs a reload, a style-only change is injected.
pub fn decide(previous: Option<&CompiledRoute>, next: &CompiledRoute) -> Option<Notification> {
    let previous = previous?;
    if previous.script_signature != next.script_signature {
        Some(Notification::Reload)
    } else if previous.style_hash != next.style_hash {
        Some(Notification::Css {
            code: next.style_source.clone(),
        })
    } else {
        None
    }
}

/// Every page that transitively imports `changed`
pub fn affected_pages(graph: &DependencyGraph, changed: &Path) -> BTreeSet<PathBuf> {
    let mut pages = BTreeSet::new();
    let mut seen: HashSet<&Path> = HashSet::new();
    let mut queue: VecDeque<&Path> = VecDeque::from([changed]);

    while let Some(current) = queue.pop_front() {
        let Some(dependents) = graph.get(current) else {
            continue;
        };
        for dependent in dependents {
            if !seen.insert(dependent.as_path()) {
                continue;
            }
            if extension_of(dependent) == PAGE_EXTENSION {
                pages.insert(dependent.clone());
            }
            queue.push_back(dependent.as_path());
        }
    }
    pages
}

/// Why the supervisor must stop
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Shutdown {
    #[error("compilation worker stopped: {0}")]
    WorkerStopped(String),
    #[error("{} changed while running in production", .0.display())]
    ProductionChange(PathBuf),
    #[error("file watcher closed")]
    WatcherClosed,
}

/// Supervisor side of the pipeline: merges payloads, tracks the dependency
/// graph and notifies browsers
pub struct Coordinator {
    registry: Arc<Registry>,
    channel: UpdateChannel,
    notifications: broadcast::Sender<Notification>,
    graph: RwLock<DependencyGraph>,
    /// Pages recompiled because a dependency changed
    pending: Mutex<HashSet<PathBuf>>,
    hot_reload: bool,
}

impl Coordinator {
    pub fn new(registry: Arc<Registry>, channel: UpdateChannel, hot_reload: bool) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            registry,
            channel,
            notifications,
            graph: RwLock::new(DependencyGraph::new()),
            pending: Mutex::new(HashSet::new()),
            hot_reload,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Browser notifications, one receiver per development socket
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn graph(&self) -> DependencyGraph {
        self.graph.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_pending(&self, page: &Path) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(page)
    }

    pub fn request_compile(&self, page: &Path) {
        self.channel.post(ChannelMessage::Compile {
            path: page.to_path_buf(),
        });
    }

    fn notify(&self, notification: Notification) {
        if !self.hot_reload {
            return;
        }
        debug!("Notifying browsers: {:?}", notification);
        // No connected browsers is fine
        let _ = self.notifications.send(notification);
    }

    /// Handles one message from the worker
    pub fn on_message(&self, message: ChannelMessage) -> Result<(), Shutdown> {
        match message {
            ChannelMessage::DependencyMap { graph } => {
                *self.graph.write().unwrap_or_else(PoisonError::into_inner) = graph;
            }
            ChannelMessage::Route(payload) => {
                let source = payload.source_path.clone();
                let Some(outcome) = self.registry.merge(payload) else {
                    return Ok(());
                };
                let was_pending = self
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&source);

                match outcome.current {
                    PageState::Failed { error, .. } => {
                        info!("Compile failed: {}", error);
                        self.notify(Notification::Reload);
                    }
                    PageState::Compiled(route) => {
                        if was_pending {
                            self.notify(Notification::Reload);
                        } else if let Some(notification) = decide(outcome.previous.as_deref(), &route) {
                            self.notify(notification);
                        }
                    }
                    PageState::Pending => {}
                }
            }
            ChannelMessage::WorkerStopped { reason } => return Err(Shutdown::WorkerStopped(reason)),
            ChannelMessage::Compile { .. } => {}
        }
        Ok(())
    }

    /// Handles one file event after the initial scan
    pub fn on_file_event(&self, event: &FileEvent) -> Result<(), Shutdown> {
        match self.registry.on_change(event) {
            ChangeAction::Restart => return Err(Shutdown::ProductionChange(event.path.clone())),
            ChangeAction::Compile(page) => self.request_compile(&page),
            ChangeAction::Dependency(dependency) => {
                // Script modules are linked into handlers, not compiled pages
                let rebuilt = self.registry.invalidate_importers(&dependency);
                let pages = affected_pages(&self.graph(), &dependency);
                if pages.is_empty() && rebuilt.is_empty() {
                    debug!("Nothing depends on {}", dependency.display());
                }
                if rebuilt
                    .iter()
                    .any(|file| extension_of(file) == PAGE_EXTENSION && !pages.contains(file))
                {
                    self.notify(Notification::Reload);
                }
                for page in pages {
                    let inserted = self
                        .pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(page.clone());
                    if inserted {
                        self.request_compile(&page);
                    }
                }
            }
            ChangeAction::Static => self.notify(Notification::Reload),
            ChangeAction::None => {}
        }
        Ok(())
    }
}
