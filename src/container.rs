use std::any::Any;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

type Service = Arc<dyn Any + Send + Sync>;
type Provider = Arc<dyn Fn(&Container) -> Service + Send + Sync>;

/// Keyed service registry handed to middleware hooks.
///
/// Singletons win over providers; providers are invoked on every resolve and may themselves
/// resolve other services. Registration goes through interior mutability, so a hook may add
/// services while a dispatch is in flight; the lock only covers map access and is never held
/// while a provider runs.
#[derive(Default)]
pub struct Container {
    inner: Mutex<Registrations>,
}

#[derive(Default)]
struct Registrations {
    singletons: FxHashMap<String, Service>,
    providers: FxHashMap<String, Provider>,
}

impl Container {
    pub fn new() -> Container {
        Default::default()
    }

    pub fn singleton(&self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.inner
            .lock()
            .unwrap()
            .singletons
            .insert(key.into(), Arc::new(value));
    }

    pub fn provide(
        &self,
        key: impl Into<String>,
        provider: impl Fn(&Container) -> Service + Send + Sync + 'static,
    ) {
        self.inner
            .lock()
            .unwrap()
            .providers
            .insert(key.into(), Arc::new(provider));
    }

    pub fn resolve(&self, key: &str) -> Result<Service> {
        let provider = {
            let inner = self.inner.lock().unwrap();
            if let Some(singleton) = inner.singletons.get(key) {
                return Ok(singleton.clone());
            }
            match inner.providers.get(key) {
                Some(provider) => provider.clone(),
                None => return Err(Error::NotFound(key.to_string())),
            }
        };
        // the factory runs outside the lock so it may resolve other services
        Ok(provider(self))
    }

    /// typed convenience around [Container::resolve]
    pub fn resolve_as<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        self.resolve(key)?
            .downcast::<T>()
            .map_err(|_| Error::InvalidArgument(format!("service {:?} has a different type", key)))
    }

    pub fn has(&self, key: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.singletons.contains_key(key) || inner.providers.contains_key(key)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_singleton_resolution() {
        let container = Container::new();
        container.singleton("greeting", "hello".to_string());

        let value = container.resolve_as::<String>("greeting").unwrap();
        assert_eq!(*value, "hello");
    }

    #[test]
    fn test_provider_runs_per_resolve() {
        let container = Container::new();
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = counter.clone();
        container.provide("counter", move |_| {
            Arc::new(c.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
        });

        container.resolve("counter").unwrap();
        container.resolve("counter").unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_provider_may_resolve_other_services() {
        let container = Container::new();
        container.singleton("base", 20u32);
        container.provide("derived", |c| {
            Arc::new(*c.resolve_as::<u32>("base").unwrap() + 1)
        });

        assert_eq!(*container.resolve_as::<u32>("derived").unwrap(), 21);
    }

    #[test]
    fn test_singleton_wins_over_provider() {
        let container = Container::new();
        container.provide("key", |_| Arc::new(1u32));
        container.singleton("key", 2u32);

        assert_eq!(*container.resolve_as::<u32>("key").unwrap(), 2);
    }

    #[test]
    fn test_unknown_key() {
        let container = Container::new();
        assert!(matches!(container.resolve("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_wrong_type() {
        let container = Container::new();
        container.singleton("n", 1u32);
        assert!(matches!(
            container.resolve_as::<String>("n"),
            Err(Error::InvalidArgument(_))
        ));
    }
}
