use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::ops::Deref;
use std::sync::Arc;

use futures::future;

use crate::container::injector::{Mode, Resolution};
use crate::container::{ClaimedBy, Injector, InjectorError};
use crate::key::{InjectionKey, Pattern, Target};
use crate::provider::{Factory, Injectable, InjectableFactory, Instance, Overrides};

/// The asynchronous facade of an [`Injector`].
///
/// Where [`Injector`] answers right away or fails with
/// [`InjectorError::AsyncRequired`], [`AsyncInjector`] awaits whatever
/// asynchronous work a resolution needs. It must be used from within a tokio
/// runtime. The synchronous operations stay reachable through `Deref`.
#[derive(Clone)]
pub struct AsyncInjector {
    injector: Injector,
}

impl AsyncInjector {
    pub fn new(injector: Injector) -> Self {
        Self { injector }
    }

    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    /// Constructs a fresh object with `factory`, awaiting asynchronous
    /// dependencies and an asynchronous constructor.
    pub async fn call<F>(&self, factory: F, overrides: Overrides) -> Result<Instance, InjectorError>
    where
        F: Factory,
    {
        self.injector
            .instantiate_async(Arc::new(factory), overrides)
            .await
    }

    pub async fn construct<T>(&self) -> Result<Arc<T>, InjectorError>
    where
        T: Injectable,
    {
        self.construct_with::<T>(Overrides::new()).await
    }

    pub async fn construct_with<T>(&self, overrides: Overrides) -> Result<Arc<T>, InjectorError>
    where
        T: Injectable,
    {
        let instance = self.call(InjectableFactory::<T>::new(), overrides).await?;
        instance
            .downcast::<T>()
            .ok_or_else(|| InjectorError::Unsatisfactory {
                key: T::default_key(),
                provided: instance.type_name().to_owned(),
            })
    }

    /// The suspending analogue of [`Injector::get_instance`].
    pub async fn get_instance_async(
        &self,
        key: &InjectionKey,
    ) -> Result<Option<Instance>, InjectorError> {
        self.get_instance_with(key, true).await
    }

    async fn get_instance_with(
        &self,
        key: &InjectionKey,
        inherited_ready: bool,
    ) -> Result<Option<Instance>, InjectorError> {
        match self.injector.resolve(key, Mode::Async, inherited_ready, None)? {
            Resolution::Ready(instance) => Ok(instance),
            Resolution::Pending(pending) => pending.wait().await.map(Some),
        }
    }

    /// Typed shorthand for [`AsyncInjector::get_instance_async`].
    pub async fn get<T>(&self, key: &InjectionKey) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        let instance = self
            .get_instance_async(key)
            .await?
            .ok_or_else(|| InjectorError::NotFound { key: key.clone() })?;
        instance
            .downcast::<T>()
            .ok_or_else(|| InjectorError::Unsatisfactory {
                key: key.clone(),
                provided: instance.type_name().to_owned(),
            })
    }

    /// Resolves every key [`Injector::filter`] returns concurrently,
    /// skipping keys that resolve to nothing. With `ready` unset, each key
    /// keeps its own readiness flag.
    pub async fn filter_instantiate_async(
        &self,
        target: Option<&Target>,
        pattern: &dyn Pattern,
        stop_at: Option<&Injector>,
        ready: Option<bool>,
    ) -> Result<Vec<(InjectionKey, Instance)>, InjectorError> {
        let keys = self.injector.filter(target, pattern, stop_at)?;
        let resolutions = keys.iter().map(|key| {
            let key = match ready {
                Some(ready) => key.ready(ready),
                None => key.clone(),
            };
            async move {
                let instance = self.get_instance_async(&key).await?;
                Ok::<_, InjectorError>(instance.map(|instance| (key.plain(), instance)))
            }
        });
        let instances = future::try_join_all(resolutions).await?;
        Ok(instances.into_iter().flatten().collect())
    }

    /// See [`Injector::claim`].
    pub fn claim(&self, by: impl Into<ClaimedBy>) -> AsyncInjector {
        AsyncInjector::new(self.injector.claim(by))
    }
}

impl Deref for AsyncInjector {
    type Target = Injector;

    fn deref(&self) -> &Injector {
        &self.injector
    }
}

impl Debug for AsyncInjector {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_tuple("AsyncInjector").field(&self.injector).finish()
    }
}
