//! Application context for unified dependency injection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::crossref::CycleDetector;
use crate::merge::{StalenessObserver, StrategyRegistry};
use crate::schema::{Schema, parse_schema_toml};
use crate::scope::ScopeRegistry;
use crate::service::ConfigService;
use crate::settings::Settings;
use crate::store::{ConfigurationBackend, FileBackend};

/// Registries and settings shared by every service.
///
/// Frontends build this once at startup and derive services from it.
#[derive(Debug, Clone)]
pub struct AppContext {
    settings: Settings,
    schema: Arc<Schema>,
    strategies: Arc<StrategyRegistry>,
    scopes: Arc<ScopeRegistry>,
}

impl AppContext {
    pub fn new(
        settings: Settings,
        schema: Schema,
        strategies: StrategyRegistry,
        scopes: ScopeRegistry,
    ) -> Self {
        Self {
            settings,
            schema: Arc::new(schema),
            strategies: Arc::new(strategies),
            scopes: Arc::new(scopes),
        }
    }

    /// Load settings and a schema file with the built-in strategies and
    /// the standard scopes.
    pub fn from_files(settings_path: &Path, schema_path: &Path) -> anyhow::Result<Self> {
        let settings = Settings::load(settings_path)?;
        let strategies = StrategyRegistry::with_builtins();
        let schema = parse_schema_toml(schema_path, &strategies)
            .with_context(|| format!("Failed to load schema: {}", schema_path.display()))?;
        Ok(Self::new(settings, schema, strategies, ScopeRegistry::standard()))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    pub fn store_root(&self) -> anyhow::Result<PathBuf> {
        self.settings.store_root()
    }

    /// Get a FileBackend rooted at the configured store directory.
    pub fn file_backend(&self) -> anyhow::Result<FileBackend> {
        Ok(FileBackend::new(self.store_root()?))
    }

    /// Get a ConfigService over `backend`, configured from the settings.
    pub fn config_service(&self, backend: Arc<dyn ConfigurationBackend>) -> ConfigService {
        let service = ConfigService::new(backend, self.schema.clone(), self.strategies.clone())
            .with_cache_capacity(self.settings.cache.capacity)
            .with_scope_registry(self.scopes.clone());
        service.set_cache_enabled(self.settings.cache.enabled);
        service
    }

    /// Same as [`AppContext::config_service`] with a staleness observer.
    pub fn observed_config_service(
        &self,
        backend: Arc<dyn ConfigurationBackend>,
        observer: Arc<dyn StalenessObserver>,
    ) -> ConfigService {
        self.config_service(backend).with_observer(observer)
    }

    pub fn cycle_detector(&self) -> CycleDetector<'_> {
        CycleDetector::new(&self.schema)
    }
}
