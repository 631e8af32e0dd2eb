mod arguments;
mod factory;
mod injectable;
mod instance;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::container::{AsyncInjector, Injector, InjectorError};
use crate::context::InstantiationContext;
use crate::key::InjectionKey;

pub use arguments::{Arguments, Dependencies, Dependency, Overrides};
pub use factory::{BoxError, Construction, Factory, FnFactory};
pub use injectable::{Injectable, InjectableFactory};
pub use instance::Instance;

pub(crate) type SharedInstance = Shared<BoxFuture<'static, Result<Instance, InjectorError>>>;

/// An instantiation that is still in flight on the async runtime.
///
/// Every clone observes the same computation; awaiting one never starts a
/// second construction.
#[derive(Clone)]
pub struct PendingInstance {
    id: u64,
    key: InjectionKey,
    future: SharedInstance,
}

impl PendingInstance {
    pub(crate) fn new(id: u64, key: InjectionKey, future: SharedInstance) -> Self {
        Self { id, key, future }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &InjectionKey {
        &self.key
    }

    pub async fn wait(&self) -> Result<Instance, InjectorError> {
        self.future.clone().await
    }
}

impl Debug for PendingInstance {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PendingInstance")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// The raw thing bound to a key.
#[derive(Clone)]
pub enum Provider {
    /// A plain object, returned as is (after becoming ready if required).
    Value(Instance),
    /// An object returned verbatim, without any readiness handling or
    /// satisfaction check.
    Quoted(Instance),
    /// A recipe invoked on first resolution.
    Factory(Arc<dyn Factory>),
    /// A construction in flight.
    Pending(PendingInstance),
    /// The injector the key is resolved through.
    Injector,
    /// An asynchronous facade over the injector the key is resolved through.
    AsyncInjector,
}

impl Provider {
    pub fn value<T>(value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::Value(Instance::from_value(value))
    }

    pub fn shared<T>(value: Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::Value(Instance::new(value))
    }

    pub fn quote<T>(value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::Quoted(Instance::from_value(value))
    }

    pub fn injectable<T>() -> Self
    where
        T: Injectable,
    {
        Self::Factory(Arc::new(InjectableFactory::<T>::new()))
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Factory,
    {
        Self::Factory(Arc::new(factory))
    }

    pub fn is_factory(&self) -> bool {
        matches!(self, Self::Factory(_))
    }

    /// Whether an instance produced for this provider must be recorded
    /// rather than returned as the provider itself.
    pub fn needs_quote(&self) -> bool {
        matches!(self, Self::Factory(_) | Self::Pending(_))
    }

    pub fn default_key(&self) -> InjectionKey {
        match self {
            Self::Value(instance) | Self::Quoted(instance) => InjectionKey::new(instance.target()),
            Self::Factory(factory) => factory.default_key(),
            Self::Pending(pending) => pending.key().clone(),
            Self::Injector => InjectionKey::of::<Injector>(),
            Self::AsyncInjector => InjectionKey::of::<AsyncInjector>(),
        }
    }

    pub fn supplementary_keys(&self, key: &InjectionKey) -> Vec<InjectionKey> {
        match self {
            Self::Factory(factory) => factory.supplementary_keys(key),
            _ => Vec::new(),
        }
    }

    /// Whether this provider may stand in for `key`. Quoted objects are
    /// trusted.
    pub fn satisfies(&self, key: &InjectionKey) -> bool {
        match self {
            Self::Value(instance) => instance.satisfies(key),
            Self::Quoted(_) | Self::Pending(_) => true,
            Self::Factory(factory) => factory.satisfies(key),
            Self::Injector => key.target().is_named() || key.target().is::<Injector>(),
            Self::AsyncInjector => key.target().is_named() || key.target().is::<AsyncInjector>(),
        }
    }

    /// Providers for the same injectable type may be registered more than
    /// once without conflict.
    pub(crate) fn cooperates_with(&self, other: &Provider) -> bool {
        match (self, other) {
            (Self::Factory(lhs), Self::Factory(rhs)) => {
                lhs.injectable_target().is_some()
                    && lhs.injectable_target() == rhs.injectable_target()
            }
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Value(instance) => format!("value of {}", instance.type_name()),
            Self::Quoted(instance) => format!("quoted value of {}", instance.type_name()),
            Self::Factory(factory) => format!("factory {}", factory.name()),
            Self::Pending(pending) => format!("pending instantiation of {}", pending.key()),
            Self::Injector => String::from("the injector itself"),
            Self::AsyncInjector => String::from("the async injector itself"),
        }
    }
}

impl Debug for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.describe())
    }
}

impl From<Instance> for Provider {
    fn from(instance: Instance) -> Self {
        Self::Value(instance)
    }
}

impl From<Arc<dyn Factory>> for Provider {
    fn from(factory: Arc<dyn Factory>) -> Self {
        Self::Factory(factory)
    }
}

impl From<Injector> for Provider {
    fn from(injector: Injector) -> Self {
        Self::Value(Instance::from_injector(injector))
    }
}

/// One slot in an injector's provider table, possibly bound under several
/// keys.
pub struct DependencyProvider {
    id: u64,
    provider: Mutex<Provider>,
    allow_multiple: bool,
    close: bool,
    keys: Mutex<Vec<InjectionKey>>,
    contexts: Mutex<Vec<Weak<InstantiationContext>>>,
}

impl DependencyProvider {
    pub(crate) fn new(provider: Provider, allow_multiple: bool, close: bool) -> Arc<Self> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            provider: Mutex::new(provider),
            allow_multiple,
            close,
            keys: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// A snapshot of what the slot currently holds.
    pub fn provider(&self) -> Provider {
        self.provider.lock().clone()
    }

    pub fn is_factory(&self) -> bool {
        self.provider.lock().is_factory()
    }

    pub fn needs_quote(&self) -> bool {
        self.provider.lock().needs_quote()
    }

    pub fn allows_multiple(&self) -> bool {
        self.allow_multiple
    }

    pub fn closes(&self) -> bool {
        self.close
    }

    pub fn keys(&self) -> Vec<InjectionKey> {
        self.keys.lock().clone()
    }

    pub(crate) fn add_key(&self, key: &InjectionKey) {
        let mut keys = self.keys.lock();
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }

    pub(crate) fn set_provider(&self, provider: Provider) {
        *self.provider.lock() = provider;
    }

    pub(crate) fn record_pending(&self, pending: PendingInstance) {
        *self.provider.lock() = Provider::Pending(pending);
    }

    /// Stores the final instance. When `pending` is given, the slot is only
    /// updated if it still holds that in-flight construction.
    pub(crate) fn record_final(&self, instance: Instance, pending: Option<u64>) -> bool {
        let mut slot = self.provider.lock();
        if pending.is_some_and(|id| !Self::holds_pending(&slot, id)) {
            return false;
        }
        *slot = if instance.is_ready() {
            Provider::Quoted(instance)
        } else {
            Provider::Value(instance)
        };
        true
    }

    /// Puts `provider` back after the in-flight construction `pending`
    /// failed, so that a later resolution retries.
    pub(crate) fn restore(&self, provider: Provider, pending: u64) {
        let mut slot = self.provider.lock();
        if Self::holds_pending(&slot, pending) {
            *slot = provider;
        }
    }

    fn holds_pending(slot: &Provider, id: u64) -> bool {
        matches!(slot, Provider::Pending(current) if current.id() == id)
    }

    pub fn instantiation_contexts(&self) -> Vec<Arc<InstantiationContext>> {
        self.contexts
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub(crate) fn attach_context(&self, context: &Arc<InstantiationContext>) {
        let mut contexts = self.contexts.lock();
        contexts.retain(|context| context.strong_count() > 0);
        contexts.push(Arc::downgrade(context));
    }

    pub(crate) fn detach_context(&self, context: &InstantiationContext) {
        self.contexts.lock().retain(|attached| {
            attached
                .upgrade()
                .is_some_and(|attached| attached.id() != context.id())
        });
    }
}

impl Debug for DependencyProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DependencyProvider")
            .field("id", &self.id)
            .field("provider", &*self.provider.lock())
            .field("allow_multiple", &self.allow_multiple)
            .field("close", &self.close)
            .field("keys", &*self.keys.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_default_key_succeeds() {
        assert_eq!(Provider::value(1u8).default_key(), InjectionKey::of::<u8>());
        assert_eq!(Provider::Injector.default_key(), InjectionKey::of::<Injector>());
        let factory = FnFactory::new("sample", Dependencies::new(), |_| {
            Construction::ready(Instance::from_value(()))
        });
        assert_eq!(
            Provider::factory(factory).default_key(),
            InjectionKey::named("sample")
        );
    }

    #[test]
    fn provider_needs_quote_succeeds() {
        assert!(!Provider::value(1u8).needs_quote());
        assert!(!Provider::quote(1u8).needs_quote());
        let factory = FnFactory::sync("one", Dependencies::new(), |_| Ok(1u8));
        assert!(Provider::factory(factory).needs_quote());
    }

    #[test]
    fn dependency_provider_record_final_succeeds() {
        let factory = FnFactory::sync("one", Dependencies::new(), |_| Ok(1u8));
        let provider = DependencyProvider::new(Provider::factory(factory), false, true);
        assert!(provider.is_factory());

        let instance = Instance::from_value(1u8);
        assert!(provider.record_final(instance.clone(), None));
        let Provider::Quoted(recorded) = provider.provider() else {
            panic!("a ready instance should be quoted");
        };
        assert!(Instance::ptr_eq(&recorded, &instance));
        assert!(!provider.needs_quote());
    }

    #[test]
    fn dependency_provider_record_final_succeeds_when_replaced() {
        let provider = DependencyProvider::new(Provider::value(0u8), false, true);
        assert!(!provider.record_final(Instance::from_value(1u8), Some(7)));
        let Provider::Value(current) = provider.provider() else {
            panic!("the slot should be untouched");
        };
        assert_eq!(current.downcast::<u8>().as_deref(), Some(&0));
    }
}
