use std::error::Error;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, TryFutureExt};

use crate::key::{InjectionKey, Target};
use crate::provider::{Arguments, Dependencies, Instance};

pub type BoxError = Box<dyn Error + Send + Sync>;

/// The outcome of running a constructor: either finished right away or
/// finishing later on the async runtime.
pub enum Construction<T> {
    Done(Result<T, BoxError>),
    Deferred(BoxFuture<'static, Result<T, BoxError>>),
}

impl<T> Construction<T>
where
    T: Send + 'static,
{
    pub fn ready(value: T) -> Self {
        Self::Done(Ok(value))
    }

    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::Done(Err(err.into()))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        Self::Deferred(future.boxed())
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    pub fn map<U, F>(self, f: F) -> Construction<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        match self {
            Self::Done(result) => Construction::Done(result.map(f)),
            Self::Deferred(future) => Construction::Deferred(future.map_ok(f).boxed()),
        }
    }
}

impl<T> Debug for Construction<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Done(Ok(_)) => f.write_str("Construction::Done(Ok(..))"),
            Self::Done(Err(err)) => write!(f, "Construction::Done(Err({err}))"),
            Self::Deferred(_) => f.write_str("Construction::Deferred(..)"),
        }
    }
}

/// A type-erased recipe that declares its dependencies and builds an
/// [`Instance`] from the resolved [`Arguments`].
///
/// Usually you don't implement [`Factory`] yourself: types implementing
/// [`Injectable`] are wrapped by [`InjectableFactory`], and closures by
/// [`FnFactory`].
///
/// [`Injectable`]: crate::provider::Injectable
/// [`InjectableFactory`]: crate::provider::InjectableFactory
pub trait Factory: Send + Sync + 'static {
    /// A human readable name used in logs, errors and claims.
    fn name(&self) -> &'static str;

    fn dependencies(&self) -> Dependencies;

    fn construct(&self, arguments: Arguments) -> Construction<Instance>;

    /// The key used when the factory is registered without an explicit key.
    fn default_key(&self) -> InjectionKey;

    /// Additional keys bound to the same provider when the factory is
    /// registered under `key`.
    fn supplementary_keys(&self, _key: &InjectionKey) -> Vec<InjectionKey> {
        Vec::new()
    }

    fn satisfies(&self, key: &InjectionKey) -> bool {
        key.target().is_named() || key.target() == self.default_key().target()
    }

    /// The type produced by an injectable-type factory. Two providers built
    /// for the same injectable type may be registered cooperatively.
    fn injectable_target(&self) -> Option<Target> {
        None
    }
}

impl<F> Factory for Arc<F>
where
    F: Factory + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn dependencies(&self) -> Dependencies {
        (**self).dependencies()
    }

    fn construct(&self, arguments: Arguments) -> Construction<Instance> {
        (**self).construct(arguments)
    }

    fn default_key(&self) -> InjectionKey {
        (**self).default_key()
    }

    fn supplementary_keys(&self, key: &InjectionKey) -> Vec<InjectionKey> {
        (**self).supplementary_keys(key)
    }

    fn satisfies(&self, key: &InjectionKey) -> bool {
        (**self).satisfies(key)
    }

    fn injectable_target(&self) -> Option<Target> {
        (**self).injectable_target()
    }
}

type ConstructFn = dyn Fn(Arguments) -> Construction<Instance> + Send + Sync;

/// A [`Factory`] backed by a closure with explicitly declared dependencies.
///
/// ```rust
/// # use arbor::prelude::*;
/// let factory = FnFactory::new(
///     "greeting",
///     Dependencies::new().with("name", InjectionKey::named("name")),
///     |arguments| {
///         let greeting = arguments
///             .get::<String>("name")
///             .map(|name| format!("hello, {name}"));
///         Construction::Done(greeting.map(Instance::from_value).map_err(Into::into))
///     },
/// )
/// .producing(InjectionKey::named("greeting"));
///
/// let injector = Injector::new();
/// injector
///     .add_provider(
///         Some(InjectionKey::named("name")),
///         Provider::value(String::from("arbor")),
///         ProviderOptions::default(),
///     )
///     .unwrap();
/// let greeting = injector.call(factory, Overrides::new()).unwrap();
/// assert_eq!(greeting.downcast::<String>().unwrap().as_str(), "hello, arbor");
/// ```
#[derive(Clone)]
pub struct FnFactory {
    name: &'static str,
    dependencies: Dependencies,
    key: InjectionKey,
    construct: Arc<ConstructFn>,
}

impl FnFactory {
    pub fn new<F>(name: &'static str, dependencies: Dependencies, construct: F) -> Self
    where
        F: Fn(Arguments) -> Construction<Instance> + Send + Sync + 'static,
    {
        Self {
            name,
            dependencies,
            key: InjectionKey::named(name),
            construct: Arc::new(construct),
        }
    }

    /// Builds a factory from a synchronous closure returning a typed value.
    pub fn sync<T, F>(name: &'static str, dependencies: Dependencies, construct: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::new(name, dependencies, move |arguments| {
            Construction::Done(construct(arguments).map(Instance::from_value))
        })
        .producing(InjectionKey::of::<T>())
    }

    /// Builds a factory from an asynchronous closure returning a typed value.
    pub fn asynchronous<T, F, Fut>(
        name: &'static str,
        dependencies: Dependencies,
        construct: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        Self::new(name, dependencies, move |arguments| {
            Construction::deferred(construct(arguments).map_ok(Instance::from_value))
        })
        .producing(InjectionKey::of::<T>())
    }

    /// Sets the key the factory registers under by default.
    pub fn producing(mut self, key: InjectionKey) -> Self {
        self.key = key;
        self
    }
}

impl Factory for FnFactory {
    fn name(&self) -> &'static str {
        self.name
    }

    fn dependencies(&self) -> Dependencies {
        self.dependencies.clone()
    }

    fn construct(&self, arguments: Arguments) -> Construction<Instance> {
        (self.construct)(arguments)
    }

    fn default_key(&self) -> InjectionKey {
        self.key.clone()
    }
}

impl Debug for FnFactory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FnFactory")
            .field("name", &self.name)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
