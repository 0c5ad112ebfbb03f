// Plugin registry mapping plugin locations to their worker modules

use super::WorkFunction;
use crate::jobs::paths::to_slash;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A plugin capability: look up a work function by job name
pub trait WorkerPlugin: Send + Sync {
    fn work_function(&self, name: &str) -> Option<Arc<dyn WorkFunction>>;
}

/// Worker module exposing a fixed table of named work functions
#[derive(Default, Clone)]
pub struct WorkerModule {
    functions: HashMap<String, Arc<dyn WorkFunction>>,
}

impl WorkerModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a work function under `name`
    pub fn with_function(mut self, name: impl Into<String>, function: impl WorkFunction + 'static) -> Self {
        self.register(name, Arc::new(function));
        self
    }

    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn WorkFunction>) {
        self.functions.insert(name.into(), function);
    }

    /// Names of every exposed work function, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for WorkerModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerModule")
            .field("functions", &self.names())
            .finish()
    }
}

impl WorkerPlugin for WorkerModule {
    fn work_function(&self, name: &str) -> Option<Arc<dyn WorkFunction>> {
        self.functions.get(name).cloned()
    }
}

/// Plugins keyed by the location they were resolved from
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn WorkerPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the worker module of the plugin resolved at `resolve`
    pub fn register(&mut self, resolve: impl AsRef<Path>, plugin: Arc<dyn WorkerPlugin>) {
        self.plugins.insert(to_slash(resolve.as_ref()), plugin);
    }

    pub fn with_plugin(mut self, resolve: impl AsRef<Path>, plugin: impl WorkerPlugin + 'static) -> Self {
        self.register(resolve, Arc::new(plugin));
        self
    }

    /// Worker module of the plugin at `resolve`, if it declares one
    pub fn worker_module(&self, resolve: &str) -> Option<Arc<dyn WorkerPlugin>> {
        self.plugins.get(resolve).cloned()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
