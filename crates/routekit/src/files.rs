// File: src/files.rs
// Purpose: Route inventory and file watcher for the served directory

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use routekit_router::{classify_with_marker, extension_of, Category};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::RoutingConfig;

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("permission denied while reading {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("file watcher failed: {0}")]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WatcherError {
    fn from_io(path: &Path, error: std::io::Error) -> Self {
        match error.kind() {
            ErrorKind::NotFound => WatcherError::NotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => WatcherError::PermissionDenied(path.to_path_buf()),
            _ => WatcherError::Io(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Item {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Change {
    Added,
    Changed,
    Unlinked,
}

/// One observed change in the served directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub item: Item,
    pub change: Change,
    pub category: Category,
    pub path: PathBuf,
}

/// A tracked file and its role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFile {
    pub absolute_path: PathBuf,
    pub extension: String,
    pub category: Category,
}

/// Picks the directory to serve: `<path>/<src_dir>` if present, else `path`
pub fn resolve_base_path(path: impl AsRef<Path>, src_dir: &str) -> Result<PathBuf, WatcherError> {
    let path = path.as_ref();
    let root = path
        .canonicalize()
        .map_err(|error| WatcherError::from_io(path, error))?;

    let src = root.join(src_dir);
    if !src_dir.is_empty() && src.is_dir() {
        Ok(src)
    } else {
        Ok(root)
    }
}

/// Which paths are scanned, watched and how they are classified
#[derive(Debug, Clone)]
struct PathFilter {
    base: PathBuf,
    dependency_dir: String,
    static_marker: String,
}

impl PathFilter {
    /// Dotfiles, dot-directories and the dependency directory are invisible
    fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.base).unwrap_or(path);
        relative.components().any(|component| match component {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                name.starts_with('.') || name == self.dependency_dir.as_str()
            }
            _ => false,
        })
    }

    fn category(&self, path: &Path) -> Category {
        let relative = path.strip_prefix(&self.base).unwrap_or(path);
        classify_with_marker(relative, &self.static_marker)
    }

    fn route_file(&self, path: &Path) -> RouteFile {
        RouteFile {
            absolute_path: path.to_path_buf(),
            extension: extension_of(path),
            category: self.category(path),
        }
    }
}

type Inventory = Arc<RwLock<BTreeMap<PathBuf, RouteFile>>>;

/// Inventory of the served directory plus a live watcher
///
/// The initial scan completes before [`Files::initialise`] returns; that is
/// the "ready" point. Only changes observed after ready are broadcast.
pub struct Files {
    base: PathBuf,
    inventory: Inventory,
    initial: Vec<FileEvent>,
    tx: broadcast::Sender<FileEvent>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl Files {
    /// Scans `base` recursively and starts watching it
    pub fn initialise(base: impl AsRef<Path>, routing: &RoutingConfig) -> Result<Self, WatcherError> {
        let base = base.as_ref();
        let base = base
            .canonicalize()
            .map_err(|error| WatcherError::from_io(base, error))?;
        std::fs::read_dir(&base).map_err(|error| WatcherError::from_io(&base, error))?;

        let filter = PathFilter {
            base: base.clone(),
            dependency_dir: routing.dependency_dir.clone(),
            static_marker: routing.static_dir.clone(),
        };
        let inventory: Inventory = Arc::new(RwLock::new(BTreeMap::new()));
        let ready = Arc::new(AtomicBool::new(false));
        let (tx, _) = broadcast::channel(256);

        // Watch first so nothing changed during the scan is missed; events
        // are dropped until the scan has completed.
        let watcher = {
            let filter = filter.clone();
            let inventory = inventory.clone();
            let ready = ready.clone();
            let tx = tx.clone();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if !ready.load(Ordering::Acquire) {
                            return;
                        }
                        for file_event in translate_event(&event, &filter, &inventory) {
                            debug!(path = ?file_event.path, change = ?file_event.change, "file event");
                            // No receivers is fine
                            let _ = tx.send(file_event);
                        }
                    }
                    Err(e) => error!("Watch error: {:?}", e),
                }
            })?;
            watcher.watch(&base, RecursiveMode::Recursive)?;
            watcher
        };

        let initial = scan(&filter)?;
        {
            let mut inventory = inventory.write().unwrap_or_else(|e| e.into_inner());
            for event in &initial {
                inventory.insert(event.path.clone(), filter.route_file(&event.path));
            }
        }
        ready.store(true, Ordering::Release);
        info!("Watching {} ({} files)", base.display(), initial.len());

        Ok(Self {
            base,
            inventory,
            initial,
            tx,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Subscribe to changes observed after ready
    pub fn subscribe(&self) -> broadcast::Receiver<FileEvent> {
        self.tx.subscribe()
    }

    /// The `Added` events of the initial scan, in path order
    pub fn initial_events(&self) -> &[FileEvent] {
        &self.initial
    }

    /// Snapshot of every tracked file
    pub fn files(&self) -> Vec<RouteFile> {
        self.inventory
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, path: &Path) -> Option<RouteFile> {
        self.inventory
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// Stops watching; no events are broadcast afterwards
    pub fn close(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if watcher.is_some() {
            debug!("Closed watcher for {}", self.base.display());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

fn scan(filter: &PathFilter) -> Result<Vec<FileEvent>, WatcherError> {
    let mut events = Vec::new();
    let walker = WalkDir::new(&filter.base)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !filter.is_ignored(entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                let path = e.path().unwrap_or(&filter.base).to_path_buf();
                return Err(match e.into_io_error() {
                    Some(io) => WatcherError::from_io(&path, io),
                    None => WatcherError::NotFound(path),
                });
            }
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if entry.file_type().is_file() {
            let path = entry.path().to_path_buf();
            events.push(FileEvent {
                item: Item::File,
                change: Change::Added,
                category: filter.category(&path),
                path,
            });
        }
    }

    Ok(events)
}

/// Maps one notify event to file events and applies them to the inventory
fn translate_event(event: &Event, filter: &PathFilter, inventory: &Inventory) -> Vec<FileEvent> {
    let raw: Vec<(PathBuf, Change, Option<Item>)> = match &event.kind {
        EventKind::Create(kind) => {
            let item = match kind {
                CreateKind::Folder => Some(Item::Directory),
                CreateKind::File => Some(Item::File),
                _ => None,
            };
            event.paths.iter().map(|p| (p.clone(), Change::Added, item)).collect()
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
            (RenameMode::Both, [from, to]) => vec![
                (from.clone(), Change::Unlinked, None),
                (to.clone(), Change::Added, None),
            ],
            (RenameMode::From, paths) => paths.iter().map(|p| (p.clone(), Change::Unlinked, None)).collect(),
            (RenameMode::To, paths) => paths.iter().map(|p| (p.clone(), Change::Added, None)).collect(),
            (_, paths) => paths
                .iter()
                .map(|p| {
                    let change = if p.exists() { Change::Added } else { Change::Unlinked };
                    (p.clone(), change, None)
                })
                .collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| (p.clone(), Change::Changed, Some(Item::File)))
            .collect(),
        EventKind::Remove(kind) => {
            let item = match kind {
                RemoveKind::Folder => Some(Item::Directory),
                RemoveKind::File => Some(Item::File),
                _ => None,
            };
            event.paths.iter().map(|p| (p.clone(), Change::Unlinked, item)).collect()
        }
        _ => Vec::new(),
    };

    let mut inventory = inventory.write().unwrap_or_else(|e| e.into_inner());
    raw.into_iter()
        .filter(|(path, _, _)| !filter.is_ignored(path))
        .filter_map(|(path, change, item)| {
            let item = item.unwrap_or_else(|| {
                if path.is_dir() {
                    Item::Directory
                } else if path.exists() || inventory.contains_key(&path) {
                    Item::File
                } else {
                    Item::Directory
                }
            });
            apply_to_inventory(&mut inventory, filter, path, change, item)
        })
        .collect()
}

fn apply_to_inventory(
    inventory: &mut BTreeMap<PathBuf, RouteFile>,
    filter: &PathFilter,
    path: PathBuf,
    change: Change,
    item: Item,
) -> Option<FileEvent> {
    let change = match (item, change) {
        (Item::File, Change::Added) if inventory.contains_key(&path) => Change::Changed,
        (Item::File, Change::Added) => {
            inventory.insert(path.clone(), filter.route_file(&path));
            Change::Added
        }
        (Item::File, Change::Changed) if !inventory.contains_key(&path) => {
            if !path.is_file() {
                return None;
            }
            inventory.insert(path.clone(), filter.route_file(&path));
            Change::Added
        }
        (Item::File, Change::Unlinked) => {
            inventory.remove(&path)?;
            Change::Unlinked
        }
        (Item::Directory, Change::Unlinked) => {
            inventory.retain(|tracked, _| !tracked.starts_with(&path));
            Change::Unlinked
        }
        (_, change) => change,
    };

    Some(FileEvent {
        item,
        change,
        category: filter.category(&path),
        path,
    })
}
