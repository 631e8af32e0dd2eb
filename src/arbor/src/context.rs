//! Bookkeeping for in-progress instantiations.
//!
//! Every resolution that reaches a provider opens an
//! [`InstantiationContext`], and so does every run of an object's
//! become-ready hook. Contexts form a chain from the outermost request down
//! to the dependency currently being built; contexts without a parent are
//! registered as roots until they finish.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;

use crate::container::{InjectorError, InjectorId};
use crate::key::InjectionKey;
use crate::provider::DependencyProvider;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static ROOTS: LazyLock<Mutex<BTreeMap<u64, Arc<InstantiationContext>>>> =
    LazyLock::new(|| Mutex::new(BTreeMap::new()));

/// Returns the root contexts of every instantiation currently in progress.
pub fn instantiation_roots() -> Vec<Arc<InstantiationContext>> {
    ROOTS.lock().values().cloned().collect()
}

/// Returns the contexts reachable from [`instantiation_roots`] that are not
/// waiting on anything else, i.e. the work every in-progress instantiation is
/// ultimately stuck behind.
pub fn instantiation_leaves() -> Vec<Arc<InstantiationContext>> {
    let mut seen = HashSet::new();
    let mut leaves = Vec::new();
    let mut to_consider = instantiation_roots();
    while !to_consider.is_empty() {
        let mut next = Vec::new();
        for context in to_consider {
            seen.insert(context.id);
            let waiting: Vec<_> = context
                .waiting_on()
                .into_iter()
                .filter(|dependency| !seen.contains(&dependency.id))
                .collect();
            if waiting.is_empty() {
                leaves.push(context);
            } else {
                next.extend(waiting);
            }
        }
        next.sort_by_key(|context| context.id);
        next.dedup_by_key(|context| context.id);
        to_consider = next;
    }
    leaves
}

/// What a context is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPhase {
    /// Building an object from its provider.
    Instantiate,
    /// Running an object's become-ready hook.
    BecomeReady { type_name: &'static str },
}

pub struct InstantiationContext {
    id: u64,
    phase: ContextPhase,
    key: InjectionKey,
    injector: InjectorId,
    requested_by: InjectorId,
    ready: bool,
    parent: Option<Arc<InstantiationContext>>,
    provider: Weak<DependencyProvider>,
    done: AtomicBool,
    state: Mutex<ContextState>,
}

#[derive(Default)]
struct ContextState {
    waiting: HashMap<InjectionKey, Weak<InstantiationContext>>,
    failure: Option<String>,
}

impl InstantiationContext {
    pub(crate) fn begin(
        key: InjectionKey,
        injector: InjectorId,
        requested_by: InjectorId,
        provider: &Arc<DependencyProvider>,
        ready: bool,
        parent: Option<Arc<InstantiationContext>>,
    ) -> Arc<Self> {
        let is_root = parent.is_none();
        let context = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            phase: ContextPhase::Instantiate,
            key,
            injector,
            requested_by,
            ready,
            parent,
            provider: Arc::downgrade(provider),
            done: AtomicBool::new(false),
            state: Mutex::new(ContextState::default()),
        });
        provider.attach_context(&context);
        if is_root {
            ROOTS.lock().insert(context.id, Arc::clone(&context));
        }
        context
    }

    /// Opens the context of an object becoming ready. Outside of any
    /// resolution the context is a root; it inherits the injectors of its
    /// parent otherwise.
    pub(crate) fn begin_ready(
        key: InjectionKey,
        type_name: &'static str,
        parent: Option<Arc<InstantiationContext>>,
    ) -> Arc<Self> {
        let (injector, requested_by) = parent
            .as_ref()
            .map_or((0, 0), |parent| (parent.injector, parent.requested_by));
        let context = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            phase: ContextPhase::BecomeReady { type_name },
            key,
            injector,
            requested_by,
            ready: true,
            provider: Weak::new(),
            done: AtomicBool::new(false),
            state: Mutex::new(ContextState::default()),
            parent,
        });
        if context.parent.is_none() {
            ROOTS.lock().insert(context.id, Arc::clone(&context));
        }
        context
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> ContextPhase {
        self.phase
    }

    pub fn key(&self) -> &InjectionKey {
        &self.key
    }

    /// The injector the result is memoized in. Zero for a become-ready
    /// context opened outside of any resolution.
    pub fn injector(&self) -> InjectorId {
        self.injector
    }

    /// The injector the resolution started from.
    pub fn requested_by(&self) -> InjectorId {
        self.requested_by
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn parent(&self) -> Option<&Arc<InstantiationContext>> {
        self.parent.as_ref()
    }

    pub fn provider(&self) -> Option<Arc<DependencyProvider>> {
        self.provider.upgrade()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    /// Dependencies that went asynchronous and have not finished yet.
    pub fn waiting_on(&self) -> Vec<Arc<InstantiationContext>> {
        self.state
            .lock()
            .waiting
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Keys from the outermost request down to this one.
    pub fn key_path(&self) -> Vec<InjectionKey> {
        let mut path = Vec::new();
        let mut current = Some(self);
        while let Some(context) = current {
            path.push(context.key.clone());
            current = context.parent.as_deref();
        }
        path.reverse();
        path
    }

    /// Whether resolving `key` at `injector` below this context would
    /// re-enter an instantiation that is still running.
    pub(crate) fn would_cycle(&self, key: &InjectionKey, injector: InjectorId) -> bool {
        let mut current = Some(self);
        while let Some(context) = current {
            if context.injector == injector && &context.key == key && !context.is_done() {
                return true;
            }
            current = context.parent.as_deref();
        }
        false
    }

    /// Reports that this instantiation went asynchronous.
    pub(crate) fn progress(self: &Arc<Self>) {
        if let Some(parent) = &self.parent {
            parent
                .state
                .lock()
                .waiting
                .insert(self.key.clone(), Arc::downgrade(self));
        }
    }

    /// Reports that this instantiation produced its final value.
    pub(crate) fn finish(&self) {
        if let Some(parent) = &self.parent {
            parent.state.lock().waiting.remove(&self.key);
        }
    }

    pub(crate) fn fail(&self, err: &InjectorError) {
        self.state.lock().failure = Some(err.to_string());
    }

    /// Marks the context done. Only the first call has any effect.
    pub(crate) fn done(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.parent.is_none() {
            ROOTS.lock().remove(&self.id);
        }
        if let Some(provider) = self.provider.upgrade() {
            provider.detach_context(self);
        }
    }
}

impl Display for InstantiationContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if let Some(parent) = &self.parent {
            write!(f, "{parent} -> ")?;
        }
        match self.phase {
            ContextPhase::Instantiate => write!(f, "{}", self.key),
            ContextPhase::BecomeReady { type_name } => {
                write!(f, "{} (bringing {type_name} to ready)", self.key)
            }
        }
    }
}

impl std::fmt::Debug for InstantiationContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("InstantiationContext")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("chain", &format_args!("{self}"))
            .field("injector", &self.injector)
            .field("ready", &self.ready)
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

/// Marks a context done when dropped, unless ownership of the context was
/// handed over to an asynchronous continuation.
pub(crate) struct ContextGuard {
    context: Option<Arc<InstantiationContext>>,
}

impl ContextGuard {
    pub(crate) fn new(context: Arc<InstantiationContext>) -> Self {
        Self {
            context: Some(context),
        }
    }

    pub(crate) fn context(&self) -> Option<&Arc<InstantiationContext>> {
        self.context.as_ref()
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            context.done();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::provider::Provider;

    use super::*;

    fn provider() -> Arc<DependencyProvider> {
        DependencyProvider::new(Provider::value(()), false, true)
    }

    #[test]
    fn instantiation_context_roots_succeeds() {
        let provider = provider();
        let root = InstantiationContext::begin(
            InjectionKey::named("context-root"),
            1,
            1,
            &provider,
            true,
            None,
        );
        let child = InstantiationContext::begin(
            InjectionKey::named("context-child"),
            1,
            1,
            &provider,
            true,
            Some(Arc::clone(&root)),
        );

        let roots = instantiation_roots();
        assert!(roots.iter().any(|context| context.id() == root.id()));
        assert!(!roots.iter().any(|context| context.id() == child.id()));
        assert_eq!(provider.instantiation_contexts().len(), 2);

        child.done();
        root.done();
        root.done();
        assert!(!instantiation_roots()
            .iter()
            .any(|context| context.id() == root.id()));
        assert!(provider.instantiation_contexts().is_empty());
    }

    #[test]
    fn instantiation_context_display_succeeds() {
        let provider = provider();
        let root =
            InstantiationContext::begin(InjectionKey::named("site"), 1, 1, &provider, true, None);
        let child = InstantiationContext::begin(
            InjectionKey::named("database"),
            1,
            1,
            &provider,
            true,
            Some(Arc::clone(&root)),
        );
        assert_eq!(
            child.to_string(),
            "InjectionKey(\"site\") -> InjectionKey(\"database\")"
        );
        assert_eq!(
            child.key_path(),
            vec![InjectionKey::named("site"), InjectionKey::named("database")]
        );
        root.done();
    }

    #[test]
    fn instantiation_context_waiting_bookkeeping_succeeds() {
        let provider = provider();
        let root =
            InstantiationContext::begin(InjectionKey::named("outer"), 1, 1, &provider, true, None);
        let child = InstantiationContext::begin(
            InjectionKey::named("inner"),
            1,
            1,
            &provider,
            true,
            Some(Arc::clone(&root)),
        );

        child.progress();
        assert_eq!(root.waiting_on().len(), 1);
        assert!(child.would_cycle(&InjectionKey::named("outer"), 1));
        assert!(!child.would_cycle(&InjectionKey::named("outer"), 2));

        child.finish();
        assert!(root.waiting_on().is_empty());
        root.done();
        assert!(!child.would_cycle(&InjectionKey::named("outer"), 1));
    }

    #[test]
    fn instantiation_leaves_succeeds() {
        let provider = provider();
        let root = InstantiationContext::begin(
            InjectionKey::named("leaves-root"),
            1,
            1,
            &provider,
            true,
            None,
        );
        let child = InstantiationContext::begin(
            InjectionKey::named("leaves-child"),
            1,
            1,
            &provider,
            true,
            Some(Arc::clone(&root)),
        );
        let ready = InstantiationContext::begin_ready(
            InjectionKey::named("leaves-ready"),
            "Pool",
            Some(Arc::clone(&child)),
        );
        child.progress();
        ready.progress();

        let leaves = instantiation_leaves();
        assert!(leaves.iter().any(|context| context.id() == ready.id()));
        assert!(!leaves
            .iter()
            .any(|context| context.id() == root.id() || context.id() == child.id()));
        assert_eq!(ready.phase(), ContextPhase::BecomeReady { type_name: "Pool" });
        assert_eq!(ready.injector(), 1);
        assert_eq!(
            ready.to_string(),
            "InjectionKey(\"leaves-root\") -> InjectionKey(\"leaves-child\") -> InjectionKey(\"leaves-ready\") (bringing Pool to ready)"
        );

        ready.finish();
        ready.done();
        assert!(instantiation_leaves()
            .iter()
            .any(|context| context.id() == child.id()));
        root.done();
    }

    #[test]
    fn instantiation_context_begin_ready_succeeds() {
        let context = InstantiationContext::begin_ready(InjectionKey::named("pool"), "Pool", None);
        assert!(instantiation_roots()
            .iter()
            .any(|root| root.id() == context.id()));
        assert!(context.provider().is_none());
        assert_eq!(context.injector(), 0);

        drop(ContextGuard::new(Arc::clone(&context)));
        assert!(!instantiation_roots()
            .iter()
            .any(|root| root.id() == context.id()));
    }

    #[test]
    fn context_guard_drop_succeeds() {
        let provider = provider();
        let context =
            InstantiationContext::begin(InjectionKey::named("guarded"), 1, 1, &provider, true, None);
        let guard = ContextGuard::new(Arc::clone(&context));
        assert!(!context.is_done());
        assert!(guard.context().is_some());
        drop(guard);
        assert!(context.is_done());
    }
}
