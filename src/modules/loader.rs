//! Lazy, deduplicated module loading
//!
//! The first `load_tool` for an id spawns a single load task; every caller that
//! arrives while it runs awaits the same shared future. Loads are bounded by a
//! FIFO semaphore and retried with linear backoff. A generation number on each
//! in-flight load lets `unload_tool` and `dispose` cancel loads that finish
//! after the module was removed. A load that panics leaves the slot `Failed`
//! so the next request starts over.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::modules::error::{EngineError, RegistryError};
use crate::modules::interface::ProcessingModule;
use crate::modules::registry::{ModuleDescriptor, ModuleRegistry};
use crate::modules::validator::{SecurityValidator, ValidationScope};
use crate::types::{
    ExecutionRequest, HealthStatus, ModuleError, ModuleHealth, ModuleMetadata, ModuleResult,
    ResultMetadata, DEFAULT_MAX_MEMORY, DEFAULT_TIMEOUT_MS,
};

type LoadResult = Result<Arc<dyn ProcessingModule>, RegistryError>;
type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

enum Slot {
    Loading { generation: u64, future: LoadFuture },
    Loaded(Arc<dyn ProcessingModule>),
    Failed { reason: String },
}

/// Aggregated health of every loaded module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Worst status across modules; healthy when none are loaded
    pub status: HealthStatus,
    pub modules: BTreeMap<String, ModuleHealth>,
}

struct LoaderInner {
    registry: ModuleRegistry,
    config: EngineConfig,
    validator: SecurityValidator,
    slots: Mutex<HashMap<String, Slot>>,
    permits: Arc<Semaphore>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct ModuleLoader {
    inner: Arc<LoaderInner>,
}

impl ModuleLoader {
    pub fn new(registry: ModuleRegistry, config: EngineConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.loader.max_concurrent_loads.max(1)));
        Self {
            inner: Arc::new(LoaderInner {
                registry,
                validator: SecurityValidator::new(&config.security),
                config,
                slots: Mutex::new(HashMap::new()),
                permits,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Built-in modules with the default configuration
    pub fn with_builtin_modules() -> Self {
        Self::new(ModuleRegistry::with_builtin_modules(), EngineConfig::default())
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }

    fn descriptor(&self, id: &str) -> Result<&ModuleDescriptor, RegistryError> {
        self.inner
            .registry
            .get(id)
            .ok_or_else(|| RegistryError::ModuleNotFound {
                id: id.to_string(),
                known: self.inner.registry.ids(),
            })
    }

    /// Load and initialize `id`, or return the cached instance. Concurrent
    /// callers share one in-flight load.
    pub async fn load_tool(&self, id: &str) -> LoadResult {
        let descriptor = self.descriptor(id)?.clone();

        let future = {
            let mut slots = self.inner.slots.lock();
            match slots.get(id) {
                Some(Slot::Loaded(module)) => return Ok(module.clone()),
                Some(Slot::Loading { future, .. }) => future.clone(),
                Some(Slot::Failed { .. }) | None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = self.spawn_load(descriptor, generation);
                    slots.insert(
                        id.to_string(),
                        Slot::Loading {
                            generation,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        future.await
    }

    fn spawn_load(&self, descriptor: ModuleDescriptor, generation: u64) -> LoadFuture {
        let inner = self.inner.clone();
        let id = descriptor.info.id.clone();
        let handle = tokio::spawn(load_task(inner.clone(), descriptor, generation));

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let reason = format!("load task failed: {e}");
                    warn!("Module {} {}", id, reason);
                    mark_failed(&inner, &id, generation, &reason);
                    Err(RegistryError::InitializationFailed {
                        id,
                        attempts: 1,
                        reason,
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Start loading `id` in the background
    pub fn preload_tool(&self, id: &str) -> Result<(), RegistryError> {
        self.descriptor(id)?;
        let loader = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = loader.load_tool(&id).await {
                warn!("Preload of {} failed: {}", id, e);
            }
        });
        Ok(())
    }

    /// Drop the cached instance; returns whether anything was removed. An
    /// in-flight load for `id` is cancelled.
    pub async fn unload_tool(&self, id: &str) -> bool {
        let removed = self.inner.slots.lock().remove(id);
        match removed {
            Some(Slot::Loaded(module)) => {
                module.dispose().await;
                info!("Unloaded module {}", id);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn load_state(&self, id: &str) -> LoadState {
        match self.inner.slots.lock().get(id) {
            None => LoadState::NotLoaded,
            Some(Slot::Loading { .. }) => LoadState::Loading,
            Some(Slot::Loaded(_)) => LoadState::Loaded,
            Some(Slot::Failed { .. }) => LoadState::Failed,
        }
    }

    /// Reason recorded for the last failed load of `id`
    pub fn failure_reason(&self, id: &str) -> Option<String> {
        match self.inner.slots.lock().get(id) {
            Some(Slot::Failed { reason }) => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn loaded_tools(&self) -> Vec<String> {
        let slots = self.inner.slots.lock();
        let mut ids: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Loaded(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn loaded_module(&self, id: &str) -> Option<Arc<dyn ProcessingModule>> {
        match self.inner.slots.lock().get(id) {
            Some(Slot::Loaded(module)) => Some(module.clone()),
            _ => None,
        }
    }

    /// Live metadata when loaded, otherwise the static descriptor view
    pub fn tool_metadata(&self, id: &str) -> Result<ModuleMetadata, RegistryError> {
        let descriptor = self.descriptor(id)?;
        if let Some(module) = self.loaded_module(id) {
            return Ok(module.metadata());
        }
        Ok(ModuleMetadata::from_info(
            &descriptor.info,
            self.inner.config.module_config().limits(),
        ))
    }

    pub fn all_tools_metadata(&self) -> Vec<ModuleMetadata> {
        self.inner
            .registry
            .ids()
            .iter()
            .filter_map(|id| self.tool_metadata(id).ok())
            .collect()
    }

    pub fn tools_by_category(&self, category: &str) -> Vec<ModuleMetadata> {
        self.all_tools_metadata()
            .into_iter()
            .filter(|m| m.category.eq_ignore_ascii_case(category))
            .collect()
    }

    /// Matching modules, best match first
    pub fn search_tools(&self, query: &str) -> Vec<ModuleMetadata> {
        let mut scored: Vec<(u32, ModuleMetadata)> = self
            .all_tools_metadata()
            .into_iter()
            .map(|m| (m.search_score(query), m))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.into_iter().map(|(_, m)| m).collect()
    }

    /// Route `request` to the module owning its language, loading it on demand.
    /// Code bound for a runtime is screened before the language is looked up.
    pub async fn execute(&self, request: ExecutionRequest) -> ModuleResult {
        if request.operation.runs_code() {
            if let Err(e) = self.screen(&request) {
                debug!("Rejected {} request before routing: {}", request.operation, e);
                return failure(e, "", &request);
            }
        }

        let descriptor = self.inner.registry.find_by_language(&request.language);
        match descriptor {
            Some(descriptor) => {
                let id = descriptor.info.id.clone();
                self.execute_with(&id, request).await
            }
            None => failure(
                RegistryError::LanguageNotFound {
                    language: request.language.clone(),
                },
                "",
                &request,
            ),
        }
    }

    /// Run `request` on a specific module
    pub async fn execute_with(&self, id: &str, mut request: ExecutionRequest) -> ModuleResult {
        self.apply_defaults(&mut request);
        match self.load_tool(id).await {
            Ok(module) => module.execute(request).await,
            Err(e) => failure(e, id, &request),
        }
    }

    fn screen(&self, request: &ExecutionRequest) -> Result<(), EngineError> {
        let source = request
            .source()
            .ok_or_else(|| EngineError::validation("code must be a string"))?;
        self.inner
            .validator
            .validate(source, &request.options, ValidationScope::Full)
    }

    /// Options left at their built-in values take the engine's configured defaults
    fn apply_defaults(&self, request: &mut ExecutionRequest) {
        let defaults = &self.inner.config.execution;
        if request.options.timeout == DEFAULT_TIMEOUT_MS {
            request.options.timeout = defaults.timeout_ms;
        }
        if request.options.max_memory == DEFAULT_MAX_MEMORY {
            request.options.max_memory = defaults.max_memory;
        }
    }

    pub fn health_report(&self) -> HealthReport {
        let modules: BTreeMap<String, ModuleHealth> = self
            .loaded_tools()
            .into_iter()
            .filter_map(|id| self.loaded_module(&id).map(|m| (id, m.health())))
            .collect();

        let status = modules
            .values()
            .map(|h| h.status)
            .max_by_key(|status| match status {
                HealthStatus::Healthy => 0,
                HealthStatus::Degraded => 1,
                HealthStatus::Unhealthy => 2,
            })
            .unwrap_or(HealthStatus::Healthy);

        HealthReport { status, modules }
    }

    /// Unload everything and cancel in-flight loads
    pub async fn dispose(&self) {
        let drained: Vec<(String, Slot)> = self.inner.slots.lock().drain().collect();
        for (id, slot) in drained {
            if let Slot::Loaded(module) = slot {
                module.dispose().await;
                debug!("Disposed {} during loader shutdown", id);
            }
        }
        info!("Module loader disposed");
    }
}

fn failure(
    error: impl Into<ModuleError>,
    module_id: &str,
    request: &ExecutionRequest,
) -> ModuleResult {
    ModuleResult::failure(
        error.into(),
        ResultMetadata {
            execution_id: Uuid::new_v4().to_string(),
            module_id: module_id.to_string(),
            operation: request.operation.to_string(),
            ..ResultMetadata::default()
        },
    )
}

/// Record `reason` unless the slot was unloaded or taken by a newer load
fn mark_failed(inner: &LoaderInner, id: &str, generation: u64, reason: &str) {
    let mut slots = inner.slots.lock();
    let owned = matches!(
        slots.get(id),
        Some(Slot::Loading { generation: current, .. }) if *current == generation
    );
    if owned {
        slots.insert(
            id.to_string(),
            Slot::Failed {
                reason: reason.to_string(),
            },
        );
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Whether the slot for `id` still belongs to this load
fn owns_slot(inner: &LoaderInner, id: &str, generation: u64) -> bool {
    matches!(
        inner.slots.lock().get(id),
        Some(Slot::Loading { generation: current, .. }) if *current == generation
    )
}

async fn load_task(inner: Arc<LoaderInner>, descriptor: ModuleDescriptor, generation: u64) -> LoadResult {
    let id = descriptor.info.id.clone();
    let cancelled = || RegistryError::Cancelled { id: id.clone() };

    let _permit = inner
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| cancelled())?;

    let attempts = inner.config.loader.retry_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if !owns_slot(&inner, &id, generation) {
            return Err(cancelled());
        }

        debug!("Loading module {} (attempt {}/{})", id, attempt, attempts);
        let module = descriptor.create();
        let started = AssertUnwindSafe(module.initialize(Some(inner.config.module_config())))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(EngineError::RuntimeInitialization {
                    module: id.clone(),
                    reason: format!("initialization panicked: {}", panic_message(payload)),
                })
            });
        match started {
            Ok(()) => {
                let committed = {
                    let mut slots = inner.slots.lock();
                    let owned = matches!(
                        slots.get(&id),
                        Some(Slot::Loading { generation: current, .. }) if *current == generation
                    );
                    if owned {
                        slots.insert(id.clone(), Slot::Loaded(module.clone()));
                    }
                    owned
                };
                if !committed {
                    module.dispose().await;
                    return Err(cancelled());
                }
                info!("Loaded module {}", id);
                return Ok(module);
            }
            Err(e) => {
                warn!("Module {} failed to initialize (attempt {}): {}", id, attempt, e);
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(inner.config.loader.backoff(attempt)).await;
                }
            }
        }
    }

    mark_failed(&inner, &id, generation, &last_error);
    Err(RegistryError::InitializationFailed {
        id,
        attempts,
        reason: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorCode;

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let loader = ModuleLoader::with_builtin_modules();
        let err = loader.load_tool("unknown-id").await.err().unwrap();
        assert!(matches!(err, RegistryError::ModuleNotFound { .. }));
        assert_eq!(err.code(), ErrorCode::ModuleNotFound);
    }

    #[tokio::test]
    async fn test_load_is_memoized_until_unload() {
        let loader = ModuleLoader::with_builtin_modules();
        assert_eq!(loader.load_state("json"), LoadState::NotLoaded);

        let first = loader.load_tool("json").await.unwrap();
        let second = loader.load_tool("json").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.load_state("json"), LoadState::Loaded);
        assert_eq!(loader.loaded_tools(), vec!["json"]);

        assert!(loader.unload_tool("json").await);
        assert!(!first.is_initialized());
        assert_eq!(loader.load_state("json"), LoadState::NotLoaded);

        let third = loader.load_tool("json").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_metadata_without_loading() {
        let loader = ModuleLoader::with_builtin_modules();
        let metadata = loader.tool_metadata("wat").unwrap();
        assert_eq!(metadata.category, "compiled");
        assert!(metadata.loaded_at.is_none());
        assert_eq!(loader.load_state("wat"), LoadState::NotLoaded);

        assert_eq!(loader.all_tools_metadata().len(), 4);
        assert_eq!(loader.tools_by_category("COMPILED").len(), 2);
        assert_eq!(loader.search_tools("rhai")[0].id, "rhai");
        assert!(loader.search_tools("cobol").is_empty());
    }

    #[tokio::test]
    async fn test_execute_routes_by_language() {
        let loader = ModuleLoader::with_builtin_modules();
        let result = loader
            .execute(ExecutionRequest::new("minify", "yaml", "a: 1\n"))
            .await;
        assert!(result.success);
        assert_eq!(result.metadata.module_id, "json");
        assert_eq!(loader.load_state("json"), LoadState::Loaded);

        let unknown = loader
            .execute(ExecutionRequest::new("format", "cobol", ""))
            .await;
        assert_eq!(unknown.error_code(), Some(ErrorCode::UnsupportedLanguage));
    }

    #[tokio::test]
    async fn test_health_report_covers_loaded_modules() {
        let loader = ModuleLoader::with_builtin_modules();
        assert!(loader.health_report().modules.is_empty());

        loader.load_tool("rhai").await.unwrap();
        let report = loader.health_report();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.modules.contains_key("rhai"));

        loader.dispose().await;
        assert!(loader.loaded_tools().is_empty());
    }
}
