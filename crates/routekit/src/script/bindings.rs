// File: src/script/bindings.rs
// Purpose: The fixed set of host functions data scripts can call

use rhai::{Dynamic, Engine, EvalAltResult, Position};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Key-value storage handle exposed as `db_get` / `db_set` / `db_delete` / `db_keys`
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn delete(&self, key: &str) -> bool;
    /// Keys starting with `prefix`, sorted
    fn keys(&self, prefix: &str) -> Vec<String>;
}

/// In-process store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    fn keys(&self, prefix: &str) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Host capabilities handed to every script engine
///
/// Nothing else is registered: scripts get no file system, environment or
/// process access.
#[derive(Clone)]
pub struct ScriptBindings {
    store: Arc<dyn KeyValueStore>,
    http: reqwest::Client,
}

impl ScriptBindings {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Registers the binding set on `engine`
    pub fn register(&self, engine: &mut Engine) {
        let store = self.store.clone();
        engine.register_fn("db_get", move |key: &str| -> Dynamic {
            store
                .get(key)
                .and_then(|value| rhai::serde::to_dynamic(value).ok())
                .unwrap_or(Dynamic::UNIT)
        });

        let store = self.store.clone();
        engine.register_fn(
            "db_set",
            move |key: &str, value: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let value: Value = rhai::serde::from_dynamic(&value)?;
                store.set(key, value);
                Ok(())
            },
        );

        let store = self.store.clone();
        engine.register_fn("db_delete", move |key: &str| store.delete(key));

        let store = self.store.clone();
        engine.register_fn("db_keys", move |prefix: &str| -> rhai::Array {
            store.keys(prefix).into_iter().map(Dynamic::from).collect()
        });

        engine.register_fn("log", |message: &str| info!(target: "routekit::script", "{}", message));
        engine.register_fn("warn", |message: &str| warn!(target: "routekit::script", "{}", message));
        engine.on_print(|text| info!(target: "routekit::script", "{}", text));
        engine.on_debug(|text, source, position| {
            debug!(target: "routekit::script", "{} {:?} @ {:?}", text, source, position)
        });

        engine.register_fn("now_ms", || chrono::Utc::now().timestamp_millis());

        engine.register_fn("json_encode", |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
            let value: Value = rhai::serde::from_dynamic(&value)?;
            Ok(value.to_string())
        });
        engine.register_fn("json_decode", |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let value: Value = serde_json::from_str(text).map_err(|e| runtime_error(format!("json_decode: {e}")))?;
            rhai::serde::to_dynamic(value)
        });

        let http = self.http.clone();
        engine.register_fn("fetch", move |url: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            fetch(&http, url, HashMap::new())
        });
        let http = self.http.clone();
        engine.register_fn(
            "fetch",
            move |url: &str, headers: rhai::Map| -> Result<Dynamic, Box<EvalAltResult>> {
                let headers = headers
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect();
                fetch(&http, url, headers)
            },
        );
    }
}

impl Default for ScriptBindings {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }
}

/// `GET url` → `#{ status, body }`
///
/// Scripts run on blocking threads, so the request is driven on the
/// ambient tokio runtime.
fn fetch(
    client: &reqwest::Client,
    url: &str,
    headers: HashMap<String, String>,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|_| runtime_error("fetch is only available while serving requests"))?;

    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(name, value);
    }

    let (status, body) = handle
        .block_on(async move {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        })
        .map_err(|e| runtime_error(format!("fetch {url}: {e}")))?;

    let mut map = rhai::Map::new();
    map.insert("status".into(), Dynamic::from(status as i64));
    map.insert("body".into(), Dynamic::from(body));
    Ok(Dynamic::from_map(map))
}

fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(message.into()), Position::NONE))
}
