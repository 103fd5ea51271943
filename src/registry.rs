//! Actor function registry for configuration-driven deployment.
//!
//! The registry maps the `function` names used in a platform file's `actors`
//! section to actor bodies.
//!
//! # Example
//!
//! ```
//! use gridlet::registry::ActorRegistry;
//!
//! let mut registry = ActorRegistry::new();
//! registry.register("idle", |ctx| async move { ctx.sleep(1.0).await });
//! assert!(registry.contains("idle"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::actor::{ActorContext, ActorFuture};
use crate::error::SimResult;

/// Type alias for actor factory functions.
pub type ActorFactory = Arc<dyn Fn(ActorContext) -> ActorFuture + Send + Sync>;

/// A registry of actor bodies, keyed by function name.
#[derive(Default, Clone)]
pub struct ActorRegistry {
    factories: HashMap<String, ActorFactory>,
}

impl ActorRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an actor body under `name`.
    ///
    /// # Arguments
    /// * `name` - The function name used in deployment files
    /// * `body` - Builds the actor's future from its context; called once per
    ///   deployed actor
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, body: F)
    where
        F: Fn(ActorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SimResult<()>> + 'static,
    {
        let factory: ActorFactory = Arc::new(move |ctx| Box::pin(body(ctx)));
        self.factories.insert(name.into(), factory);
    }

    /// Returns the factory registered under `name`.
    pub fn get(&self, name: &str) -> Option<&ActorFactory> {
        self.factories.get(name)
    }

    /// Returns true if a function is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Returns the number of registered functions.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no functions are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Returns an iterator over registered function names.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.factories.keys()
    }

    /// Unregisters a function.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }
}

impl std::fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ActorRegistry")
            .field("functions", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, PlatformBuilder};
    use crate::engine::Simulation;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ActorRegistry::new();
        assert!(registry.is_empty());
        registry.register("a", |_ctx| async { Ok(()) });
        registry.register("b", |_ctx| async { Ok(()) });
        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").is_some());
        assert!(registry.unregister("a"));
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_debug_lists_names() {
        let mut registry = ActorRegistry::new();
        registry.register("worker", |_ctx| async { Ok(()) });
        assert!(format!("{:?}", registry).contains("worker"));
    }

    #[test]
    fn test_deploy_passes_args() {
        let config = PlatformBuilder::new()
            .host("h", 1.0, 1)
            .actor("napper", "h", "nap", &["3"])
            .build()
            .unwrap();
        let mut registry = ActorRegistry::new();
        registry.register("nap", |ctx| async move {
            let secs: f64 = ctx.args()[0].parse().unwrap_or(0.0);
            ctx.sleep(secs).await
        });

        let mut sim = Simulation::new(&config).unwrap();
        let ids = sim.deploy(&registry).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(sim.run().unwrap().final_time, 3.0);
    }

    #[test]
    fn test_deploy_unknown_function() {
        let config = PlatformBuilder::new()
            .host("h", 1.0, 1)
            .actor("x", "h", "missing", &[])
            .build()
            .unwrap();
        let mut sim = Simulation::new(&config).unwrap();
        let err = sim.deploy(&ActorRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFunction(name) if name == "missing"));
    }
}
