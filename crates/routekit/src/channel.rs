// File: src/channel.rs
// Purpose: The broadcast channel between the supervisor and the compilation worker

use routekit_parser::{CompileError, ServerModule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::warn;

/// Name shared by both endpoints of the channel
pub const CHANNEL_NAME: &str = "loader-and-main-process";

const CHANNEL_CAPACITY: usize = 1024;

/// Reverse dependency edges: dependency → files that import it
pub type DependencyGraph = BTreeMap<PathBuf, BTreeSet<PathBuf>>;

/// Messages carried by the channel
///
/// Fire-and-forget: nothing is acknowledged or retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelMessage {
    /// Full snapshot of the dependency graph
    DependencyMap { graph: DependencyGraph },
    /// Compiled contents (or a compile failure) for one page route
    Route(RoutePayload),
    /// Supervisor → worker: compile this page file
    Compile { path: PathBuf },
    /// The worker hit a fatal error and is terminating
    WorkerStopped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePayload {
    /// Route pattern, e.g. `/about/:id`
    pub route: String,
    pub source_path: PathBuf,
    /// Monotonically increasing per worker
    pub version: u64,
    #[serde(flatten)]
    pub outcome: CompileOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompileOutcome {
    Contents(RouteContents),
    Error(CompileError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteContents {
    pub server_module: ServerModule,
    pub client_hydration_bundle: String,
    pub data_script_source: Option<String>,
    /// Line of the page file on which the data script starts (zero-based)
    pub data_script_line: usize,
    pub style_source: String,
    /// Name of the hydration class exposed by the bundle
    pub class_name: String,
}

/// Named broadcast channel
#[derive(Debug, Clone)]
pub struct UpdateChannel {
    tx: broadcast::Sender<ChannelMessage>,
}

impl UpdateChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn name(&self) -> &'static str {
        CHANNEL_NAME
    }

    /// Posts a message to every current subscriber
    pub fn post(&self, message: ChannelMessage) {
        // No subscribers is fine
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.tx.subscribe()
    }
}

impl Default for UpdateChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives the next message, skipping over lag
///
/// Returns `None` once every sender is gone.
pub async fn recv_next(
    rx: &mut broadcast::Receiver<ChannelMessage>,
    endpoint: &str,
) -> Option<ChannelMessage> {
    loop {
        match rx.recv().await {
            Ok(message) => return Some(message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("{} lagged on {}: {} messages dropped", endpoint, CHANNEL_NAME, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
