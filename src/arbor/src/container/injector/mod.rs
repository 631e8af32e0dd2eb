mod close;
mod resolve;

use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::container::{
    AsyncInjector, ClaimedBy, InjectorError, Lifecycle, ProviderEvent, ProviderListener,
    ScopedInjector,
};
use crate::key::{InjectionKey, Pattern, Target};
use crate::provider::{DependencyProvider, Instance, PendingInstance, Provider};

pub use close::shutdown_injector;
pub(crate) use resolve::{Mode, Resolution};

pub type InjectorId = u64;

/// How a provider is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderOptions {
    /// Instantiate the provider separately in every injector it is resolved
    /// through, instead of once in the injector that introduces it.
    pub allow_multiple: bool,
    /// Close the provided object (or cancel its instantiation) when the
    /// injector closes.
    pub close: bool,
    /// Update an existing provider instead of failing.
    pub replace: bool,
}

impl ProviderOptions {
    pub fn allow_multiple(self) -> Self {
        Self {
            allow_multiple: true,
            ..self
        }
    }

    pub fn without_close(self) -> Self {
        Self {
            close: false,
            ..self
        }
    }

    pub fn replacing(self) -> Self {
        Self {
            replace: true,
            ..self
        }
    }
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            allow_multiple: false,
            close: true,
            replace: false,
        }
    }
}

/// A node in the injector hierarchy.
///
/// An [`Injector`] is a cheap handle; clones refer to the same node. Each
/// node holds a provider table and resolves keys it does not know through
/// its parent.
#[derive(Clone)]
pub struct Injector {
    inner: Arc<InjectorInner>,
}

pub(crate) struct InjectorInner {
    id: InjectorId,
    state: Mutex<InjectorState>,
    pending: Mutex<HashMap<u64, PendingTask>>,
    children: Mutex<Vec<Weak<InjectorInner>>>,
    claim: Mutex<Option<ClaimedBy>>,
    listeners: Mutex<Vec<Arc<dyn ProviderListener>>>,
}

struct InjectorState {
    lifecycle: Lifecycle,
    providers: HashMap<InjectionKey, Arc<DependencyProvider>>,
    parent: Option<Injector>,
}

/// An instantiation spawned on behalf of this injector, together with the
/// claimed sub-injectors to close if it gets canceled.
struct PendingTask {
    pending: PendingInstance,
    abort: AbortHandle,
    cascade: Vec<Injector>,
}

#[derive(Clone)]
pub(crate) struct WeakInjector {
    inner: Weak<InjectorInner>,
}

impl WeakInjector {
    pub(crate) fn upgrade(&self) -> Option<Injector> {
        self.inner.upgrade().map(|inner| Injector { inner })
    }
}

impl Injector {
    /// Creates a root injector.
    pub fn new() -> Self {
        Self::create(None)
    }

    /// Creates a child injector resolving unknown keys through `self`. The
    /// child is closed when `self` closes.
    pub fn child(&self) -> Self {
        let child = Self::create(Some(self.clone()));
        let mut children = self.inner.children.lock();
        children.retain(|child| child.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        child
    }

    fn create(parent: Option<Injector>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let parent_id = parent.as_ref().map(Injector::id);

        let mut providers = HashMap::new();
        for (key, provider) in [
            (InjectionKey::of::<Injector>(), Provider::Injector),
            (InjectionKey::of::<AsyncInjector>(), Provider::AsyncInjector),
        ] {
            let slot = DependencyProvider::new(provider, true, false);
            slot.add_key(&key);
            providers.insert(key, slot);
        }

        tracing::trace!(injector = id, parent = ?parent_id, "injector created");
        Self {
            inner: Arc::new(InjectorInner {
                id,
                state: Mutex::new(InjectorState {
                    lifecycle: Lifecycle::Open,
                    providers,
                    parent,
                }),
                pending: Mutex::new(HashMap::new()),
                children: Mutex::new(Vec::new()),
                claim: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> InjectorId {
        self.inner.id
    }

    pub fn parent(&self) -> Option<Injector> {
        self.inner.state.lock().parent.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state.lock().lifecycle
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle() != Lifecycle::Open
    }

    /// Whether both handles refer to the same injector.
    pub fn same(lhs: &Self, rhs: &Self) -> bool {
        Arc::ptr_eq(&lhs.inner, &rhs.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakInjector {
        WeakInjector {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<(), InjectorError> {
        match self.lifecycle() {
            Lifecycle::Open => Ok(()),
            _ => Err(InjectorError::Closed {
                injector: self.id(),
            }),
        }
    }

    /// Returns a facade exposing the asynchronous operations of this
    /// injector.
    pub fn asynchronous(&self) -> AsyncInjector {
        AsyncInjector::new(self.clone())
    }

    /// Ties the lifetime of this injector to the returned guard.
    pub fn scoped(self) -> ScopedInjector {
        ScopedInjector::new(self)
    }

    pub fn subscribe(&self, listener: Arc<dyn ProviderListener>) {
        self.inner.listeners.lock().push(listener);
    }

    /// Binds `provider` under `key`, or under the provider's default key when
    /// no key is given, and under the provider's supplementary keys that are
    /// still free.
    ///
    /// # Errors
    ///
    /// Returns [`InjectorError::ExistingProvider`] if `key` is already bound
    /// locally and `options.replace` is not set, unless both providers are
    /// factories for the same injectable type (the first one is kept).
    /// Returns [`InjectorError::Closed`] once the injector is closing.
    pub fn add_provider(
        &self,
        key: Option<InjectionKey>,
        provider: impl Into<Provider>,
        options: ProviderOptions,
    ) -> Result<InjectionKey, InjectorError> {
        let provider = provider.into();
        let key = key.unwrap_or_else(|| provider.default_key());
        let allow_multiple = options.allow_multiple || key.allows_multiple();

        let (slot, keys) = {
            let mut state = self.inner.state.lock();
            if state.lifecycle != Lifecycle::Open {
                return Err(InjectorError::Closed {
                    injector: self.id(),
                });
            }

            let slot = match state.providers.get(&key) {
                Some(existing) if options.replace => {
                    existing.set_provider(provider.clone());
                    Arc::clone(existing)
                }
                Some(existing) if existing.provider().cooperates_with(&provider) => {
                    tracing::debug!(key = %key, "provider already registered for the same type");
                    return Ok(key);
                }
                Some(existing) => {
                    return Err(InjectorError::ExistingProvider {
                        key,
                        existing: existing.provider().describe(),
                    });
                }
                None => {
                    let slot = DependencyProvider::new(provider.clone(), allow_multiple, options.close);
                    state.providers.insert(key.clone(), Arc::clone(&slot));
                    slot
                }
            };
            slot.add_key(&key);

            for supplementary in provider.supplementary_keys(&key) {
                if !state.providers.contains_key(&supplementary) {
                    slot.add_key(&supplementary);
                    state.providers.insert(supplementary, Arc::clone(&slot));
                }
            }
            let keys = slot_keys(&state.providers, &slot);
            (slot, keys)
        };

        tracing::debug!(
            injector = self.id(),
            key = %key,
            provider = %provider.describe(),
            replace = options.replace,
            "provider added"
        );
        self.emit(ProviderEvent {
            injector: self.id(),
            key: key.clone(),
            provider: slot,
            replace: options.replace,
            close: options.close,
            allow_multiple,
            keys,
        });
        Ok(key)
    }

    /// Shorthand for [`Injector::add_provider`] with `replace` set.
    pub fn replace_provider(
        &self,
        key: Option<InjectionKey>,
        provider: impl Into<Provider>,
        options: ProviderOptions,
    ) -> Result<InjectionKey, InjectorError> {
        self.add_provider(key, provider, options.replacing())
    }

    fn emit(&self, event: ProviderEvent) {
        let mut current = Some(self.clone());
        while let Some(injector) = current {
            let listeners = injector.inner.listeners.lock().clone();
            for listener in listeners {
                listener.provider_added(&event);
            }
            current = injector.parent();
        }
    }

    /// Whether `key` is bound in this injector itself.
    pub fn contains(&self, key: &InjectionKey) -> bool {
        self.inner.state.lock().providers.contains_key(key)
    }

    /// Returns the first injector in the parent chain binding `key`.
    pub fn injector_containing(&self, key: &InjectionKey) -> Option<Injector> {
        self.lookup(key).map(|(_, injector)| injector)
    }

    /// Finds the provider for `key` and the injector introducing it.
    pub(crate) fn lookup(
        &self,
        key: &InjectionKey,
    ) -> Option<(Arc<DependencyProvider>, Injector)> {
        let mut current = Some(self.clone());
        while let Some(injector) = current {
            let parent = {
                let state = injector.inner.state.lock();
                if let Some(provider) = state.providers.get(key) {
                    return Some((Arc::clone(provider), injector.clone()));
                }
                state.parent.clone()
            };
            current = parent;
        }
        None
    }

    /// Returns the local provider for `key`, binding a fresh copy of
    /// `source` there if there is none yet.
    pub(crate) fn memo_slot(
        &self,
        key: &InjectionKey,
        source: &Arc<DependencyProvider>,
    ) -> Arc<DependencyProvider> {
        let mut state = self.inner.state.lock();
        if let Some(existing) = state.providers.get(key) {
            return Arc::clone(existing);
        }
        let slot =
            DependencyProvider::new(source.provider(), source.allows_multiple(), source.closes());
        slot.add_key(key);
        if state.lifecycle == Lifecycle::Open {
            state.providers.insert(key.clone(), Arc::clone(&slot));
        }
        slot
    }

    /// Lists the bound keys and their providers, parents first.
    pub fn inspect(&self, include_parent: bool) -> Vec<(InjectionKey, Arc<DependencyProvider>)> {
        let mut entries = match (include_parent, self.parent()) {
            (true, Some(parent)) => parent.inspect(true),
            _ => Vec::new(),
        };
        let state = self.inner.state.lock();
        let mut local: Vec<_> = state
            .providers
            .iter()
            .map(|(key, provider)| (key.clone(), Arc::clone(provider)))
            .collect();
        local.sort_by(|(lhs, _), (rhs, _)| lhs.to_string().cmp(&rhs.to_string()));
        entries.retain(|(key, _)| !state.providers.contains_key(key));
        entries.extend(local);
        entries
    }

    /// Returns the keys visible from this injector whose target is `target`
    /// (any target when `None`) and which match `pattern`.
    ///
    /// Parents are searched first and keys are not repeated. With `stop_at`,
    /// injectors above `stop_at` are not searched.
    ///
    /// # Errors
    ///
    /// Returns [`InjectorError::NotAncestor`] if `stop_at` is not in the
    /// parent chain.
    pub fn filter(
        &self,
        target: Option<&Target>,
        pattern: &dyn Pattern,
        stop_at: Option<&Injector>,
    ) -> Result<Vec<InjectionKey>, InjectorError> {
        let mut result = match (stop_at, self.parent()) {
            (Some(stop), _) if Self::same(stop, self) => Vec::new(),
            (Some(stop), None) => {
                return Err(InjectorError::NotAncestor {
                    injector: stop.id(),
                })
            }
            (_, Some(parent)) => parent.filter(target, pattern, stop_at)?,
            (None, None) => Vec::new(),
        };

        let mut seen: HashSet<InjectionKey> = result.iter().cloned().collect();
        let state = self.inner.state.lock();
        let mut local: Vec<_> = state
            .providers
            .keys()
            .filter(|key| target.is_none_or(|target| key.target() == target))
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        local.sort_by_key(|key| key.to_string());
        for key in local {
            if seen.insert(key.clone()) {
                result.push(key);
            }
        }
        Ok(result)
    }

    /// Claims this injector for `by`. An injector that is already claimed
    /// hands out a fresh claimed child instead.
    pub fn claim(&self, by: impl Into<ClaimedBy>) -> Injector {
        self.claim_with_origin(by.into()).0
    }

    /// Like [`Injector::claim`], also telling whether a new child was created.
    pub(crate) fn claim_with_origin(&self, by: ClaimedBy) -> (Injector, bool) {
        {
            let mut claim = self.inner.claim.lock();
            if claim.is_none() {
                *claim = Some(by);
                return (self.clone(), false);
            }
        }
        let child = self.child();
        *child.inner.claim.lock() = Some(by);
        (child, true)
    }

    /// Replaces the claimant record, typically once the object that asked
    /// for the injector has been built.
    pub(crate) fn set_claimant(&self, by: ClaimedBy) {
        *self.inner.claim.lock() = Some(by);
    }

    pub fn claimed_by(&self) -> Option<ClaimedBy> {
        self.inner.claim.lock().clone()
    }

    pub fn is_claimed(&self) -> bool {
        self.inner.claim.lock().is_some()
    }
}

fn slot_keys(
    providers: &HashMap<InjectionKey, Arc<DependencyProvider>>,
    slot: &Arc<DependencyProvider>,
) -> Vec<InjectionKey> {
    providers
        .iter()
        .filter(|(_, provider)| Arc::ptr_eq(provider, slot))
        .map(|(key, _)| key.clone())
        .collect()
}

impl Default for Injector {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Injector {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let parent = self.parent().map(|parent| parent.id());
        f.debug_struct("Injector")
            .field("id", &self.id())
            .field("parent", &parent)
            .field("lifecycle", &self.lifecycle())
            .field("claimed_by", &*self.inner.claim.lock())
            .finish()
    }
}

impl From<&Injector> for Instance {
    fn from(injector: &Injector) -> Self {
        Instance::from_injector(injector.clone())
    }
}

#[cfg(test)]
mod tests {
    use crate::container::MockProviderListener;
    use crate::key::{AnyKey, HasConstraints};
    use crate::provider::{Arguments, Construction, Dependencies, Injectable};

    use super::*;

    struct Service;

    impl Injectable for Service {
        fn dependencies() -> Dependencies {
            Dependencies::new()
        }

        fn construct(_arguments: Arguments) -> Construction<Self> {
            Construction::ready(Service)
        }
    }

    #[test]
    fn injector_add_provider_fails_when_key_exists() {
        let injector = Injector::new();
        let key = InjectionKey::named("port");
        injector
            .add_provider(Some(key.clone()), Provider::value(80u16), ProviderOptions::default())
            .unwrap();
        assert!(matches!(
            injector.add_provider(Some(key.clone()), Provider::value(81u16), ProviderOptions::default()),
            Err(InjectorError::ExistingProvider { .. })
        ));

        injector
            .replace_provider(Some(key.clone()), Provider::value(82u16), ProviderOptions::default())
            .unwrap();
        assert_eq!(*injector.get::<u16>(&key).unwrap(), 82);
    }

    #[test]
    fn injector_add_provider_succeeds_when_type_is_repeated() {
        let injector = Injector::new();
        injector
            .add_provider(None, Provider::injectable::<Service>(), ProviderOptions::default())
            .unwrap();
        injector
            .add_provider(None, Provider::injectable::<Service>(), ProviderOptions::default())
            .unwrap();
        assert!(matches!(
            injector.add_provider(
                Some(InjectionKey::of::<Service>()),
                Provider::value(1u8),
                ProviderOptions::default()
            ),
            Err(InjectorError::ExistingProvider { .. })
        ));
    }

    #[test]
    fn injector_add_provider_fails_when_closed() {
        let injector = Injector::new();
        injector.close(None);
        assert!(matches!(
            injector.add_provider(None, Provider::value(1u8), ProviderOptions::default()),
            Err(InjectorError::Closed { .. })
        ));
    }

    #[test]
    fn injector_add_provider_event_succeeds() {
        let root = Injector::new();
        let child = root.child();

        let mut listener = MockProviderListener::new();
        listener
            .expect_provider_added()
            .withf(|event| event.key == InjectionKey::named("sample") && !event.replace)
            .times(1)
            .return_const(());
        root.subscribe(Arc::new(listener));

        child
            .add_provider(
                Some(InjectionKey::named("sample")),
                Provider::value(()),
                ProviderOptions::default(),
            )
            .unwrap();
    }

    #[test]
    fn injector_lookup_succeeds() {
        let root = Injector::new();
        let child = root.child();
        let key = InjectionKey::named("shared");
        root.add_provider(Some(key.clone()), Provider::value(7u8), ProviderOptions::default())
            .unwrap();

        assert!(!child.contains(&key));
        let owner = child.injector_containing(&key).unwrap();
        assert!(Injector::same(&owner, &root));
        assert!(child.injector_containing(&InjectionKey::named("missing")).is_none());
    }

    #[test]
    fn injector_filter_succeeds() {
        let root = Injector::new();
        let child = root.child();
        let target = Target::named("host");
        root.add_provider(
            Some(InjectionKey::new(target.clone()).with("name", "a")),
            Provider::value(1u8),
            ProviderOptions::default(),
        )
        .unwrap();
        child
            .add_provider(
                Some(InjectionKey::new(target.clone()).with("name", "b")),
                Provider::value(2u8),
                ProviderOptions::default(),
            )
            .unwrap();
        child
            .add_provider(
                Some(InjectionKey::new(target.clone()).with("role", "db")),
                Provider::value(3u8),
                ProviderOptions::default(),
            )
            .unwrap();

        let keys = child
            .filter(Some(&target), &HasConstraints::new(["name"]), None)
            .unwrap();
        assert_eq!(
            keys,
            vec![
                InjectionKey::new(target.clone()).with("name", "a"),
                InjectionKey::new(target.clone()).with("name", "b"),
            ]
        );

        let keys = child
            .filter(Some(&target), &HasConstraints::new(["name"]), Some(&child))
            .unwrap();
        assert_eq!(keys, vec![InjectionKey::new(target.clone()).with("name", "b")]);

        assert_eq!(child.filter(Some(&target), &AnyKey, None).unwrap().len(), 3);
    }

    #[test]
    fn injector_filter_fails_when_stop_at_is_not_ancestor() {
        let root = Injector::new();
        let stranger = Injector::new();
        assert!(matches!(
            root.child().filter(None, &AnyKey, Some(&stranger)),
            Err(InjectorError::NotAncestor { .. })
        ));
    }

    #[test]
    fn injector_claim_succeeds() {
        let injector = Injector::new();
        assert!(!injector.is_claimed());

        let claimed = injector.claim("first");
        assert!(Injector::same(&claimed, &injector));
        assert_eq!(injector.claimed_by().unwrap().name(), "first");

        let second = injector.claim("second");
        assert!(!Injector::same(&second, &injector));
        assert!(Injector::same(&second.parent().unwrap(), &injector));
        assert_eq!(second.claimed_by().unwrap().name(), "second");
        assert_eq!(injector.claimed_by().unwrap().name(), "first");
    }

    #[test]
    fn injector_inspect_succeeds() {
        let injector = Injector::new();
        let keys: Vec<_> = injector
            .inspect(false)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert!(keys.contains(&InjectionKey::of::<Injector>()));
        assert!(keys.contains(&InjectionKey::of::<AsyncInjector>()));
    }
}
