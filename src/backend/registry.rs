//! Backend registry - lazily constructed, shared backend instances

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::backend::providers::{
    bfl, gemini, ideogram, openai, replicate, stability, BflBackend, GeminiBackend,
    IdeogramBackend, OpenAiBackend, ProviderContext, ReplicateBackend, StabilityBackend,
};
use crate::backend::traits::{BackendStatus, ImageBackend};

/// Built-in backend names, in default fallback priority order
pub const KNOWN_BACKENDS: &[&str] = &[
    openai::NAME,
    bfl::NAME,
    stability::NAME,
    ideogram::NAME,
    gemini::NAME,
    replicate::NAME,
];

/// Environment keys holding each built-in backend's credential
pub const CREDENTIAL_KEYS: &[&str] = &[
    openai::API_KEY,
    bfl::API_KEY,
    stability::API_KEY,
    ideogram::API_KEY,
    gemini::API_KEY,
    replicate::API_KEY,
];

type Factory = Arc<dyn Fn() -> Arc<dyn ImageBackend> + Send + Sync>;

/// Name to backend map; each backend is built on first lookup and reused.
///
/// Lookups are case-insensitive. Enumeration follows registration order.
#[derive(Default)]
pub struct BackendRegistry {
    factories: RwLock<Vec<(String, Factory)>>,
    instances: RwLock<HashMap<String, Arc<dyn ImageBackend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the six built-in providers
    pub fn with_providers(ctx: ProviderContext) -> Self {
        let registry = Self::new();
        let ctx = Arc::new(ctx);

        macro_rules! provider {
            ($name:expr, $backend:ty) => {{
                let ctx = ctx.clone();
                registry.register($name, move || Arc::new(<$backend>::new(&ctx)) as Arc<dyn ImageBackend>);
            }};
        }

        provider!(openai::NAME, OpenAiBackend);
        provider!(bfl::NAME, BflBackend);
        provider!(stability::NAME, StabilityBackend);
        provider!(ideogram::NAME, IdeogramBackend);
        provider!(gemini::NAME, GeminiBackend);
        provider!(replicate::NAME, ReplicateBackend);
        registry
    }

    /// Register a factory; a later registration under the same name replaces it
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn ImageBackend> + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        let factory: Factory = Arc::new(factory);

        let mut factories = self.factories.write();
        match factories.iter_mut().find(|(n, _)| *n == key) {
            Some(slot) => slot.1 = factory,
            None => factories.push((key.clone(), factory)),
        }
        drop(factories);

        self.instances.write().remove(&key);
        debug!(backend = %key, "Registered backend");
    }

    /// Register an already constructed backend under its own name
    pub fn register_instance(&self, backend: Arc<dyn ImageBackend>) {
        let name = backend.name().to_string();
        self.register(&name, move || backend.clone());
    }

    /// Look up a backend, constructing it on first use
    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageBackend>> {
        let key = name.trim().to_lowercase();
        if let Some(instance) = self.instances.read().get(&key) {
            return Some(instance.clone());
        }

        let factory = self
            .factories
            .read()
            .iter()
            .find(|(n, _)| *n == key)
            .map(|(_, f)| f.clone())?;

        let mut instances = self.instances.write();
        let instance = instances
            .entry(key)
            .or_insert_with(|| {
                let backend = factory();
                debug!(backend = %backend.name(), "Constructed backend");
                backend
            })
            .clone();
        Some(instance)
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = name.trim().to_lowercase();
        self.factories.read().iter().any(|(n, _)| *n == key)
    }

    /// All registered names in registration order
    pub fn names(&self) -> Vec<String> {
        self.factories.read().iter().map(|(n, _)| n.clone()).collect()
    }

    fn filter_names(&self, keep: impl Fn(&dyn ImageBackend) -> bool) -> Vec<String> {
        self.names()
            .into_iter()
            .filter(|name| self.get(name).is_some_and(|backend| keep(backend.as_ref())))
            .collect()
    }

    /// Backends whose credentials are present and plausible
    pub fn configured(&self) -> Vec<String> {
        self.filter_names(|backend| backend.is_configured())
    }

    /// Configured backends that also support edit
    pub fn configured_for_edit(&self) -> Vec<String> {
        self.filter_names(|backend| backend.is_configured() && backend.capabilities().edit)
    }

    pub fn statuses(&self) -> Vec<BackendStatus> {
        self.names()
            .iter()
            .filter_map(|name| self.get(name))
            .map(|backend| backend.status())
            .collect()
    }
}
