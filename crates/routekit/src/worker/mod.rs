// File: src/worker/mod.rs
// Purpose: The compilation worker, an isolated thread that turns page files into route contents

mod bundle;
mod resolve;
mod runtime;

pub use bundle::{assemble_bundle, to_registry_module, ModuleUnit};
pub use resolve::{Origin, ResolveError, Resolved, Resolver, Target};
pub use runtime::RuntimePackage;

use crate::channel::{
    recv_next, ChannelMessage, CompileOutcome, RouteContents, RoutePayload, UpdateChannel,
};
use crate::script;
use bundle::{BuildError, ModuleCache, PageBuild};
use routekit_parser::{extract_data_block, MarkupCompiler};
use routekit_router::{class_name_from_pattern, pattern_from_file_path};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Everything the worker needs, fixed at spawn time
#[derive(Clone)]
pub struct WorkerOptions {
    pub base: PathBuf,
    pub production: bool,
    pub runtime: Arc<RuntimePackage>,
    pub dependency_dir: String,
    pub compiler: Arc<dyn MarkupCompiler>,
}

/// Join handle of the worker thread
#[derive(Debug)]
pub struct WorkerHandle {
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Starts the worker on its own thread with its own runtime
///
/// The worker subscribes before this returns, so compile requests posted
/// right after are never missed.
pub fn spawn(options: WorkerOptions, channel: UpdateChannel) -> std::io::Result<WorkerHandle> {
    let rx = channel.subscribe();

    let thread = std::thread::Builder::new()
        .name("routekit-worker".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Worker runtime failed to start: {}", e);
                    channel.post(ChannelMessage::WorkerStopped {
                        reason: e.to_string(),
                    });
                    return;
                }
            };
            runtime.block_on(Worker::new(options, channel).run(rx));
        })?;

    Ok(WorkerHandle { thread })
}

/// Compiles pages on request and reports results over the channel
pub struct Worker {
    base: PathBuf,
    channel: UpdateChannel,
    resolver: Resolver,
    compiler: Arc<dyn MarkupCompiler>,
    cache: Option<ModuleCache>,
    version: u64,
}

impl Worker {
    pub fn new(options: WorkerOptions, channel: UpdateChannel) -> Self {
        let development = !options.production;
        Self {
            resolver: Resolver::new(&options.base, options.runtime, options.dependency_dir, development),
            base: options.base,
            channel,
            compiler: options.compiler,
            cache: options.production.then(ModuleCache::new),
            version: 0,
        }
    }

    pub async fn run(mut self, mut rx: broadcast::Receiver<ChannelMessage>) {
        info!("Compilation worker listening on {}", self.channel.name());

        while let Some(message) = recv_next(&mut rx, "worker").await {
            let ChannelMessage::Compile { path } = message else {
                continue;
            };

            match self.compile(&path) {
                Ok(Some(payload)) => {
                    if self.resolver.take_graph_changed() {
                        self.channel.post(ChannelMessage::DependencyMap {
                            graph: self.resolver.graph().clone(),
                        });
                    }
                    self.channel.post(ChannelMessage::Route(payload));
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Worker stopping: {}", e);
                    self.channel.post(ChannelMessage::WorkerStopped {
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }
    }

    /// Compiles one page file
    ///
    /// Compile failures become an error payload; only an unresolvable
    /// import is returned as an error. Unreadable files are skipped.
    pub fn compile(&mut self, path: &Path) -> Result<Option<RoutePayload>, ResolveError> {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        let block = extract_data_block(&source);
        let route = pattern_from_file_path(path, &self.base);
        let class_name = class_name_from_pattern(&route);

        if let Some(data_script) = &block.script {
            for specifier in script::import_specifiers(data_script) {
                if let Ok(dependency) = script::resolve_import(&self.base, &specifier) {
                    self.resolver.record_edge(&dependency, path);
                }
            }
        }

        let build = PageBuild::new(&mut self.resolver, self.compiler.as_ref(), self.cache.as_mut());
        let outcome = match build.run(path, &block.markup, &class_name) {
            Ok(output) => CompileOutcome::Contents(RouteContents {
                server_module: output.server_module,
                client_hydration_bundle: output.bundle,
                data_script_source: block.script,
                data_script_line: block.script_line,
                style_source: output.style,
                class_name,
            }),
            Err(BuildError::Compile(e)) => {
                warn!("Compile failed for {}: {}", route, e);
                CompileOutcome::Error(e)
            }
            Err(BuildError::Resolve(e)) => return Err(e),
        };

        self.version += 1;
        debug!("Compiled {} (version {})", route, self.version);

        Ok(Some(RoutePayload {
            route,
            source_path: path.to_path_buf(),
            version: self.version,
            outcome,
        }))
    }
}
