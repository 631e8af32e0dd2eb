use std::any;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::key::{InjectionKey, Target};
use crate::provider::{Arguments, Construction, Dependencies, Factory, Instance};

/// A type with a dedicated constructor for dependency injection.
///
/// Usually, you don't need to implement [`Injectable`] manually, because the
/// [`injectable`] macro derives it from an annotated constructor. In case
/// you really want to write the implementation on your own, take a look at
/// the following snippet:
///
/// ```rust
/// # use std::sync::Arc;
/// # use arbor::prelude::*;
/// struct Settings {
///     port: u16,
/// }
///
/// struct Server {
///     settings: Arc<Settings>,
/// }
///
/// impl Injectable for Server {
///     fn dependencies() -> Dependencies {
///         Dependencies::new().with("settings", InjectionKey::of::<Settings>())
///     }
///
///     fn construct(arguments: Arguments) -> Construction<Self> {
///         match arguments.get::<Settings>("settings") {
///             Ok(settings) => Construction::ready(Server { settings }),
///             Err(err) => Construction::failed(err),
///         }
///     }
/// }
///
/// let injector = Injector::new();
/// injector
///     .add_provider(None, Provider::value(Settings { port: 8080 }), ProviderOptions::default())
///     .unwrap();
/// let server = injector.construct::<Server>().unwrap();
/// assert_eq!(server.settings.port, 8080);
/// ```
///
/// [`injectable`]: crate::injectable
pub trait Injectable: Send + Sync + Sized + 'static {
    fn dependencies() -> Dependencies;

    /// Creates the object from the resolved arguments, either synchronously
    /// or as a deferred computation.
    fn construct(arguments: Arguments) -> Construction<Self>;

    /// Wraps the constructed object, attaching the capability handles it
    /// supports.
    fn into_instance(this: Arc<Self>) -> Instance {
        Instance::new(this)
    }

    /// Other targets this type answers for, in addition to itself.
    fn also_provides() -> Vec<Target> {
        Vec::new()
    }

    fn default_key() -> InjectionKey {
        InjectionKey::of::<Self>()
    }

    /// Keys bound alongside `key` at registration: every target from
    /// [`Injectable::also_provides`], the same targets carrying the
    /// constraints of `key`, and the bare type when `key` is a constrained
    /// key for this very type.
    fn supplementary_keys(key: &InjectionKey) -> Vec<InjectionKey> {
        let mut keys = Vec::new();
        for target in Self::also_provides() {
            if key.has_constraints() {
                keys.push(InjectionKey::constrained(
                    target.clone(),
                    key.constraints()
                        .iter()
                        .map(|(name, value)| (Arc::clone(name), value.clone())),
                ));
            }
            keys.push(InjectionKey::new(target));
        }
        if key.has_constraints() && key.target().is::<Self>() {
            keys.push(Self::default_key());
        }
        keys.retain(|supplementary| supplementary != key);
        keys
    }

    fn satisfies(key: &InjectionKey) -> bool {
        let target = key.target();
        target.is_named()
            || target.is::<Self>()
            || Self::also_provides().iter().any(|also| also == target)
    }
}

/// A [`Factory`] producing instances of an [`Injectable`] type.
pub struct InjectableFactory<T>
where
    T: Injectable,
{
    _marker: PhantomData<fn() -> T>,
}

impl<T> InjectableFactory<T>
where
    T: Injectable,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Debug for InjectableFactory<T>
where
    T: Injectable,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "InjectableFactory<{}>", any::type_name::<T>())
    }
}

impl<T> Factory for InjectableFactory<T>
where
    T: Injectable,
{
    fn name(&self) -> &'static str {
        any::type_name::<T>()
    }

    fn dependencies(&self) -> Dependencies {
        T::dependencies()
    }

    fn construct(&self, arguments: Arguments) -> Construction<Instance> {
        T::construct(arguments).map(|object| T::into_instance(Arc::new(object)))
    }

    fn default_key(&self) -> InjectionKey {
        T::default_key()
    }

    fn supplementary_keys(&self, key: &InjectionKey) -> Vec<InjectionKey> {
        T::supplementary_keys(key)
    }

    fn satisfies(&self, key: &InjectionKey) -> bool {
        T::satisfies(key)
    }

    fn injectable_target(&self) -> Option<Target> {
        Some(Target::of::<T>())
    }
}
