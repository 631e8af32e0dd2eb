//! The asynchronous readiness protocol.
//!
//! An object taking part in the protocol moves through
//! `NotReady -> Resolved -> ReadyPending -> Ready`. Resolving may replace
//! the object by another one; becoming ready first makes the object's
//! exposed dependencies ready, then runs the object's own hook. The
//! become-ready work runs at most once at a time per object and is shared by
//! every concurrent caller.

use std::collections::HashSet;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::container::InjectorError;
use crate::context::{ContextGuard, InstantiationContext};
use crate::key::InjectionKey;
use crate::provider::{Arguments, BoxError, Instance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    NotReady,
    Resolved,
    ReadyPending,
    Ready,
}

/// Which hooks an object overrides. Objects without a resolve hook start out
/// resolved; objects without either hook start out ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadyHooks {
    pub resolve: bool,
    pub become_ready: bool,
}

impl ReadyHooks {
    pub const NONE: Self = Self {
        resolve: false,
        become_ready: false,
    };

    pub const RESOLVE: Self = Self {
        resolve: true,
        become_ready: false,
    };

    pub const BECOME_READY: Self = Self {
        resolve: false,
        become_ready: true,
    };

    pub const BOTH: Self = Self {
        resolve: true,
        become_ready: true,
    };

    pub fn initial_state(self) -> ReadyState {
        if self.resolve {
            ReadyState::NotReady
        } else if self.become_ready {
            ReadyState::Resolved
        } else {
            ReadyState::Ready
        }
    }
}

type SharedReady = Shared<BoxFuture<'static, Result<(), InjectorError>>>;
type SharedResolve = Shared<BoxFuture<'static, Result<Option<Instance>, InjectorError>>>;

enum Phase {
    NotReady,
    Resolved,
    Pending { attempt: u64, shared: SharedReady },
    Ready,
}

fn next_attempt() -> u64 {
    static NEXT_ATTEMPT: AtomicU64 = AtomicU64::new(1);
    NEXT_ATTEMPT.fetch_add(1, Ordering::Relaxed)
}

/// The per-object readiness state, embedded in every
/// [`AsyncInjectable`] object.
pub struct Readiness {
    phase: Mutex<Phase>,
    /// The run of the resolve hook. A successful run stays here so that later
    /// callers get the same outcome without running the hook again.
    resolving: Mutex<Option<(u64, SharedResolve)>>,
}

impl Readiness {
    pub fn new(hooks: ReadyHooks) -> Self {
        let phase = match hooks.initial_state() {
            ReadyState::NotReady => Phase::NotReady,
            ReadyState::Resolved => Phase::Resolved,
            _ => Phase::Ready,
        };
        Self {
            phase: Mutex::new(phase),
            resolving: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ReadyState {
        match &*self.phase.lock() {
            Phase::NotReady => ReadyState::NotReady,
            Phase::Resolved => ReadyState::Resolved,
            Phase::Pending { .. } => ReadyState::ReadyPending,
            Phase::Ready => ReadyState::Ready,
        }
    }

    fn mark_resolved(&self) {
        let mut phase = self.phase.lock();
        if matches!(*phase, Phase::NotReady) {
            *phase = Phase::Resolved;
        }
    }

    /// Rolls a become-ready `attempt` that did not succeed back to
    /// `Resolved`. Later attempts are left alone.
    fn reset_pending(&self, attempt: u64) {
        let mut phase = self.phase.lock();
        if matches!(*phase, Phase::Pending { attempt: current, .. } if current == attempt) {
            *phase = Phase::Resolved;
        }
    }

    /// Forgets the resolve hook run `attempt` after it failed.
    fn forget_resolve(&self, attempt: u64) {
        let mut resolving = self.resolving.lock();
        if resolving.as_ref().is_some_and(|(current, _)| *current == attempt) {
            *resolving = None;
        }
    }
}

impl Debug for Readiness {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_tuple("Readiness").field(&self.state()).finish()
    }
}

/// An object whose construction finishes asynchronously.
///
/// ```rust
/// # use std::sync::Arc;
/// # use arbor::prelude::*;
/// # use arbor::readiness::{async_become_ready, ReadyHooks, ReadyState};
/// struct Pool {
///     readiness: Readiness,
/// }
///
/// #[async_trait::async_trait]
/// impl AsyncInjectable for Pool {
///     fn readiness(&self) -> &Readiness {
///         &self.readiness
///     }
///
///     async fn async_ready(self: Arc<Self>) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let pool = Instance::async_injectable(Arc::new(Pool {
///     readiness: Readiness::new(ReadyHooks::BECOME_READY),
/// }));
/// assert_eq!(pool.ready_state(), ReadyState::Resolved);
/// async_become_ready(&pool).await.unwrap();
/// assert!(pool.is_ready());
/// # });
/// ```
#[async_trait]
pub trait AsyncInjectable: Send + Sync + 'static {
    fn readiness(&self) -> &Readiness;

    /// The arguments the object was constructed with. Their exposed
    /// dependencies become ready before the object itself does.
    fn injected(&self) -> Option<&Arguments> {
        None
    }

    /// Finishes resolution. Returning an instance replaces this object by
    /// that one.
    async fn async_resolve(self: Arc<Self>) -> Result<Option<Instance>, BoxError> {
        Ok(None)
    }

    /// Makes the object ready for use.
    async fn async_ready(self: Arc<Self>) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Runs the resolve hook of a `NotReady` object.
///
/// Returns the object that should stand in for `instance`: either
/// `instance` itself, now resolved, or the replacement the hook produced.
/// The hook runs once per object; concurrent and later callers share its
/// outcome. A failed run is forgotten so that the next call retries.
///
/// # Errors
///
/// Returns [`InjectorError::RuntimeRequired`] when the hook has to run but
/// no tokio runtime is running, or the failure of the hook.
pub async fn async_resolve(instance: Instance) -> Result<Instance, InjectorError> {
    let Some(handle) = instance.readiness_handle().cloned() else {
        return Ok(instance);
    };
    let type_name = instance.type_name();

    let shared = {
        let mut resolving = handle.readiness().resolving.lock();
        match &*resolving {
            Some((_, shared)) => shared.clone(),
            None if handle.readiness().state() != ReadyState::NotReady => return Ok(instance),
            None => {
                let runtime = current_runtime(type_name)?;
                let attempt = next_attempt();
                let task = runtime.spawn(run_resolve(Arc::clone(&handle), type_name));
                let waiting = joined(type_name, task);
                let owner = Arc::clone(&handle);
                let shared = async move {
                    let result = waiting.await;
                    if result.is_err() {
                        owner.readiness().forget_resolve(attempt);
                    }
                    result
                }
                .boxed()
                .shared();
                *resolving = Some((attempt, shared.clone()));
                shared
            }
        }
    };

    match shared.await? {
        Some(replacement) if !Instance::ptr_eq(&replacement, &instance) => Ok(replacement),
        _ => {
            handle.readiness().mark_resolved();
            Ok(instance)
        }
    }
}

async fn run_resolve(
    handle: Arc<dyn AsyncInjectable>,
    type_name: &'static str,
) -> Result<Option<Instance>, InjectorError> {
    let replacement = Arc::clone(&handle)
        .async_resolve()
        .await
        .map_err(|source| InjectorError::BecomeReadyFailed {
            type_name,
            source: Arc::from(source),
        })?;

    match replacement {
        Some(replacement)
            if !replacement
                .readiness_handle()
                .is_some_and(|other| address_of(other) == address_of(&handle)) =>
        {
            tracing::debug!(
                original = type_name,
                replacement = replacement.type_name(),
                "object replaced itself while resolving"
            );
            Ok(Some(replacement))
        }
        _ => {
            handle.readiness().mark_resolved();
            Ok(None)
        }
    }
}

/// Makes `instance` ready, waiting on an in-flight attempt if there is one.
///
/// # Errors
///
/// Returns [`InjectorError::NotResolved`] if the object is still
/// `NotReady`, [`InjectorError::RuntimeRequired`] if the hook has to run
/// outside of a tokio runtime, or the failure of the object's or a
/// dependency's hook. A failed attempt, including one whose hook panicked,
/// leaves the object `Resolved` so it can be retried.
pub async fn async_become_ready(instance: &Instance) -> Result<(), InjectorError> {
    become_ready_within(instance, None).await
}

/// Starts making `instance` ready as part of the work tracked by `parent`.
pub(crate) fn become_ready_within(
    instance: &Instance,
    parent: Option<Arc<InstantiationContext>>,
) -> BoxFuture<'static, Result<(), InjectorError>> {
    let Some(handle) = instance.readiness_handle() else {
        return future::ok(()).boxed();
    };
    let key = parent
        .as_ref()
        .map_or_else(|| InjectionKey::new(instance.target()), |parent| parent.key().clone());
    become_ready(
        Arc::clone(handle),
        instance.type_name(),
        key,
        parent,
        CycleGuard::default(),
    )
}

/// Resolves `instance` (following replacements) and, if `to_ready`, makes
/// the final object ready.
pub(crate) async fn settle(
    mut instance: Instance,
    to_ready: bool,
    parent: Option<Arc<InstantiationContext>>,
) -> Result<Instance, InjectorError> {
    while instance.ready_state() == ReadyState::NotReady {
        instance = async_resolve(instance).await?;
    }
    if to_ready && !instance.is_ready() {
        become_ready_within(&instance, parent).await?;
    }
    Ok(instance)
}

fn current_runtime(type_name: &'static str) -> Result<Handle, InjectorError> {
    Handle::try_current().map_err(|_| InjectorError::RuntimeRequired { type_name })
}

/// Waits for a spawned hook run. A run that panicked or got aborted counts
/// as a failed one.
fn joined<T>(
    type_name: &'static str,
    task: JoinHandle<Result<T, InjectorError>>,
) -> BoxFuture<'static, Result<T, InjectorError>>
where
    T: Send + 'static,
{
    async move {
        match task.await {
            Ok(result) => result,
            Err(err) => Err(InjectorError::BecomeReadyFailed {
                type_name,
                source: Arc::new(err),
            }),
        }
    }
    .boxed()
}

/// Rolls a become-ready attempt back when its run ends without the object
/// being ready, whether it failed, panicked or got aborted.
struct ResetPending {
    handle: Arc<dyn AsyncInjectable>,
    attempt: u64,
}

impl Drop for ResetPending {
    fn drop(&mut self) {
        self.handle.readiness().reset_pending(self.attempt);
    }
}

/// Identities already visited by one become-ready traversal.
#[derive(Clone, Default)]
struct CycleGuard {
    seen: Arc<Mutex<HashSet<usize>>>,
}

impl CycleGuard {
    fn enter(&self, address: usize) -> bool {
        self.seen.lock().insert(address)
    }
}

fn address_of(handle: &Arc<dyn AsyncInjectable>) -> usize {
    Arc::as_ptr(handle).cast::<()>() as usize
}

fn become_ready(
    handle: Arc<dyn AsyncInjectable>,
    type_name: &'static str,
    key: InjectionKey,
    parent: Option<Arc<InstantiationContext>>,
    guard: CycleGuard,
) -> BoxFuture<'static, Result<(), InjectorError>> {
    let mut phase = handle.readiness().phase.lock();
    match &*phase {
        Phase::Ready => future::ok(()).boxed(),
        Phase::NotReady => future::err(InjectorError::NotResolved { type_name }).boxed(),
        Phase::Pending { shared, .. } => shared.clone().boxed(),
        Phase::Resolved => {
            let runtime = match current_runtime(type_name) {
                Ok(runtime) => runtime,
                Err(err) => return future::err(err).boxed(),
            };
            guard.enter(address_of(&handle));
            let attempt = next_attempt();
            let context = InstantiationContext::begin_ready(key, type_name, parent);
            context.progress();
            let task = runtime.spawn(drive(
                Arc::clone(&handle),
                type_name,
                attempt,
                guard,
                ContextGuard::new(context),
            ));

            let waiting = joined(type_name, task);
            let owner = Arc::clone(&handle);
            let shared = async move {
                let result = waiting.await;
                if result.is_err() {
                    owner.readiness().reset_pending(attempt);
                }
                result
            }
            .boxed()
            .shared();
            *phase = Phase::Pending {
                attempt,
                shared: shared.clone(),
            };
            shared.boxed()
        }
    }
}

async fn drive(
    handle: Arc<dyn AsyncInjectable>,
    type_name: &'static str,
    attempt: u64,
    guard: CycleGuard,
    context: ContextGuard,
) -> Result<(), InjectorError> {
    let _reset = ResetPending {
        handle: Arc::clone(&handle),
        attempt,
    };
    let current = context.context().cloned();
    let result = match ready_dependencies(&handle, type_name, current, &guard).await {
        Ok(()) => Arc::clone(&handle).async_ready().await.map_err(|source| {
            InjectorError::BecomeReadyFailed {
                type_name,
                source: Arc::from(source),
            }
        }),
        Err(err) => Err(err),
    };

    match &result {
        Ok(()) => {
            *handle.readiness().phase.lock() = Phase::Ready;
            if let Some(context) = context.context() {
                context.finish();
            }
        }
        Err(err) => {
            tracing::debug!(object = type_name, error = %err, "object failed to become ready");
            if let Some(context) = context.context() {
                context.fail(err);
            }
        }
    }
    result
}

async fn ready_dependencies(
    handle: &Arc<dyn AsyncInjectable>,
    type_name: &'static str,
    current: Option<Arc<InstantiationContext>>,
    guard: &CycleGuard,
) -> Result<(), InjectorError> {
    let Some(arguments) = handle.injected() else {
        return Ok(());
    };

    let mut pending = Vec::new();
    for (dependency, instance) in arguments.exposed() {
        if dependency.key().ready_override() == Some(false) || instance.is_ready() {
            continue;
        }
        let Some(dependency_handle) = instance.readiness_handle() else {
            continue;
        };
        if !guard.enter(address_of(dependency_handle)) {
            tracing::warn!(
                object = type_name,
                dependency = %dependency.key(),
                "dependency cycle while becoming ready, skipping the edge"
            );
            continue;
        }

        let key = dependency.key().clone();
        let readying = become_ready(
            Arc::clone(dependency_handle),
            instance.type_name(),
            key.clone(),
            current.clone(),
            guard.clone(),
        );
        pending.push(async move {
            readying
                .await
                .map_err(|err| InjectorError::InjectionFailed {
                    key,
                    path: Vec::new(),
                    source: Arc::new(err),
                })
        });
    }

    future::try_join_all(pending).await.map(|_| ())
}
