use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use tokio::runtime::Handle;

use super::{Injector, PendingTask, ProviderOptions, WeakInjector};
use crate::container::{AsyncInjector, ClaimedBy, InjectorError};
use crate::context::{ContextGuard, InstantiationContext};
use crate::key::{InjectionKey, Pattern, Target};
use crate::provider::{
    Arguments, BoxError, Construction, DependencyProvider, Factory, Injectable,
    InjectableFactory, Instance, Overrides, PendingInstance, Provider,
};
use crate::readiness::{self, ReadyState};

type InstanceFuture = BoxFuture<'static, Result<Instance, InjectorError>>;

/// Whether a resolution may hand back work that finishes later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Sync,
    Async,
}

pub(crate) enum Resolution {
    Ready(Option<Instance>),
    Pending(PendingInstance),
}

enum Outcome {
    Ready(Instance),
    Deferred {
        future: InstanceFuture,
        /// Sub-injectors claimed while resolving the dependencies. They are
        /// closed if the construction gets canceled.
        acquired: Vec<Injector>,
    },
}

fn next_pending_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Whether `instance` cannot be handed out before running the readiness
/// protocol.
fn needs_async(instance: &Instance, to_ready: bool) -> bool {
    match instance.ready_state() {
        ReadyState::Ready => false,
        ReadyState::NotReady => true,
        _ => to_ready,
    }
}

/// Where a failure happened, used to wrap it into
/// [`InjectorError::InjectionFailed`].
#[derive(Clone)]
struct Failure {
    key: InjectionKey,
    path: Vec<InjectionKey>,
}

impl Failure {
    fn new(key: &InjectionKey, context: Option<&Arc<InstantiationContext>>) -> Self {
        Self {
            key: key.clone(),
            path: context.map_or_else(|| vec![key.clone()], |context| context.key_path()),
        }
    }

    fn wrap(&self, err: InjectorError) -> InjectorError {
        if err.passes_through() {
            return err;
        }
        self.wrap_source(Arc::new(err))
    }

    fn wrap_boxed(&self, source: BoxError) -> InjectorError {
        match InjectorError::recover(source) {
            Ok(err) => self.wrap(err),
            Err(source) => self.wrap_source(Arc::from(source)),
        }
    }

    fn wrap_source(&self, source: Arc<dyn Error + Send + Sync>) -> InjectorError {
        tracing::error!(key = %self.key, error = %source, "error resolving dependency");
        InjectorError::InjectionFailed {
            key: self.key.clone(),
            path: self.path.clone(),
            source,
        }
    }
}

impl Injector {
    /// Returns an object for `key`, made ready unless the key says otherwise.
    ///
    /// Returns `Ok(None)` for an optional key nobody provides.
    ///
    /// # Errors
    ///
    /// Returns [`InjectorError::AsyncRequired`] if producing the object needs
    /// the async runtime; use [`AsyncInjector::get_instance_async`] then.
    pub fn get_instance(&self, key: &InjectionKey) -> Result<Option<Instance>, InjectorError> {
        match self.resolve(key, Mode::Sync, true, None)? {
            Resolution::Ready(instance) => Ok(instance),
            Resolution::Pending(_) => Err(InjectorError::AsyncRequired {
                key: key.clone(),
                reason: "the instantiation is in flight",
            }),
        }
    }

    /// Typed shorthand for [`Injector::get_instance`].
    pub fn get<T>(&self, key: &InjectionKey) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        let instance = self
            .get_instance(key)?
            .ok_or_else(|| InjectorError::NotFound { key: key.clone() })?;
        downcast(key, &instance)
    }

    /// Constructs a fresh object with `factory`, resolving its dependencies
    /// through this injector. The result is not memoized.
    ///
    /// Overrides naming a declared dependency are bound in a private
    /// sub-injector for the duration of the construction.
    pub fn call<F>(&self, factory: F, overrides: Overrides) -> Result<Instance, InjectorError>
    where
        F: Factory,
    {
        let factory: Arc<dyn Factory> = Arc::new(factory);
        let key = factory.default_key();
        match self.instantiate(&key, &factory, overrides, Mode::Sync, true, None)? {
            Outcome::Ready(instance) => Ok(instance),
            Outcome::Deferred { .. } => Err(InjectorError::AsyncRequired {
                key,
                reason: "the constructor is asynchronous",
            }),
        }
    }

    pub(crate) async fn instantiate_async(
        &self,
        factory: Arc<dyn Factory>,
        overrides: Overrides,
    ) -> Result<Instance, InjectorError> {
        let key = factory.default_key();
        match self.instantiate(&key, &factory, overrides, Mode::Async, true, None)? {
            Outcome::Ready(instance) => Ok(instance),
            Outcome::Deferred { future, .. } => future.await,
        }
    }

    /// Constructs a fresh `T`.
    pub fn construct<T>(&self) -> Result<Arc<T>, InjectorError>
    where
        T: Injectable,
    {
        self.construct_with::<T>(Overrides::new())
    }

    pub fn construct_with<T>(&self, overrides: Overrides) -> Result<Arc<T>, InjectorError>
    where
        T: Injectable,
    {
        let instance = self.call(InjectableFactory::<T>::new(), overrides)?;
        downcast(&T::default_key(), &instance)
    }

    /// Resolves every key [`Injector::filter`] returns, skipping keys that
    /// resolve to nothing. `ready` replaces the readiness flag of each key.
    pub fn filter_instantiate(
        &self,
        target: Option<&Target>,
        pattern: &dyn Pattern,
        stop_at: Option<&Injector>,
        ready: bool,
    ) -> Result<Vec<(InjectionKey, Instance)>, InjectorError> {
        let mut result = Vec::new();
        for key in self.filter(target, pattern, stop_at)? {
            if let Some(instance) = self.get_instance(&key.ready(ready))? {
                result.push((key, instance));
            }
        }
        Ok(result)
    }

    /// The resolution algorithm shared by the synchronous and asynchronous
    /// entry points.
    pub(crate) fn resolve(
        &self,
        key: &InjectionKey,
        mode: Mode,
        inherited_ready: bool,
        parent: Option<&Arc<InstantiationContext>>,
    ) -> Result<Resolution, InjectorError> {
        tracing::trace!(injector = self.id(), key = %key, "looking up provider");
        let Some((found, introducer)) = self.lookup(key) else {
            self.ensure_open()?;
            if key.is_optional() {
                return Ok(Resolution::Ready(None));
            }
            return Err(InjectorError::NotFound { key: key.clone() });
        };

        let owner = if found.allows_multiple() {
            self.clone()
        } else {
            introducer.clone()
        };
        let to_ready = key.ready_override().unwrap_or(inherited_ready);

        let provider = found.provider();
        match provider {
            Provider::Quoted(instance) => return Ok(Resolution::Ready(Some(instance))),
            Provider::Injector => {
                return Ok(Resolution::Ready(Some(Instance::from_injector(introducer))))
            }
            Provider::AsyncInjector => {
                let facade = AsyncInjector::new(owner);
                return Ok(Resolution::Ready(Some(Instance::from_async_injector(facade))));
            }
            Provider::Value(instance) => {
                return self.resolve_value(&introducer, &found, key, instance, mode, to_ready, parent)
            }
            Provider::Pending(pending) => {
                return Self::follow_pending(&introducer, key, pending, mode, to_ready)
            }
            Provider::Factory(_) => {}
        }

        if parent.is_some_and(|parent| parent.would_cycle(key, owner.id())) {
            return Err(InjectorError::CyclicDependency { key: key.clone() });
        }
        let slot = if Injector::same(&owner, &introducer) {
            found
        } else {
            owner.memo_slot(key, &found)
        };
        // The memo slot may already hold the result of an earlier resolution.
        let factory = match slot.provider() {
            Provider::Factory(factory) => factory,
            Provider::Quoted(instance) => return Ok(Resolution::Ready(Some(instance))),
            Provider::Value(instance) => {
                return self.resolve_value(&owner, &slot, key, instance, mode, to_ready, parent)
            }
            Provider::Pending(pending) => {
                return Self::follow_pending(&owner, key, pending, mode, to_ready)
            }
            Provider::Injector | Provider::AsyncInjector => {
                return Err(InjectorError::Unsatisfactory {
                    key: key.clone(),
                    provided: slot.provider().describe(),
                })
            }
        };

        let context = InstantiationContext::begin(
            key.clone(),
            owner.id(),
            self.id(),
            &slot,
            to_ready,
            parent.cloned(),
        );
        let guard = ContextGuard::new(Arc::clone(&context));
        let outcome = owner.instantiate(
            key,
            &factory,
            Overrides::new(),
            mode,
            to_ready,
            Some(&context),
        );

        match outcome {
            Ok(Outcome::Ready(instance)) => {
                slot.record_final(instance.clone(), None);
                tracing::debug!(key = %key, injector = owner.id(), "instance memoized");
                context.finish();
                Ok(Resolution::Ready(Some(instance)))
            }
            Ok(Outcome::Deferred { future, acquired }) => {
                let id = next_pending_id();
                let recording = record_when_done(
                    id,
                    owner.downgrade(),
                    Arc::clone(&slot),
                    Provider::Factory(factory),
                    guard,
                    future,
                );
                let pending = owner.spawn_pending(id, key.clone(), &slot, recording, acquired)?;
                context.progress();
                Ok(Resolution::Pending(pending))
            }
            Err(err) => {
                context.fail(&err);
                Err(err)
            }
        }
    }

    /// Hands out the object bound by a value provider in `slot`, owned by
    /// `owner`. An object that still has to run its readiness hooks is
    /// settled on the runtime, and the settled object replaces the value in
    /// the slot so that the hooks are not run again.
    #[allow(clippy::too_many_arguments)]
    fn resolve_value(
        &self,
        owner: &Injector,
        slot: &Arc<DependencyProvider>,
        key: &InjectionKey,
        instance: Instance,
        mode: Mode,
        to_ready: bool,
        parent: Option<&Arc<InstantiationContext>>,
    ) -> Result<Resolution, InjectorError> {
        if !needs_async(&instance, to_ready) {
            return Ok(Resolution::Ready(Some(instance)));
        }
        if mode == Mode::Sync {
            return Err(InjectorError::AsyncRequired {
                key: key.clone(),
                reason: "the provided object is not ready yet",
            });
        }

        let context = InstantiationContext::begin(
            key.clone(),
            owner.id(),
            self.id(),
            slot,
            to_ready,
            parent.cloned(),
        );
        let guard = ContextGuard::new(Arc::clone(&context));
        let failure = Failure::new(key, Some(&context));
        let settling = {
            let context = Arc::clone(&context);
            let instance = instance.clone();
            async move {
                readiness::settle(instance, to_ready, Some(context))
                    .await
                    .map_err(|err| failure.wrap(err))
            }
            .boxed()
        };

        let id = next_pending_id();
        let recording = record_when_done(
            id,
            owner.downgrade(),
            Arc::clone(slot),
            Provider::Value(instance),
            guard,
            settling,
        );
        let pending = owner.spawn_pending(id, key.clone(), slot, recording, Vec::new())?;
        context.progress();
        Ok(Resolution::Pending(pending))
    }

    /// Follows the in-flight instantiation `pending` held by a slot of
    /// `holder`. When the finished object still has to become ready, the key
    /// is resolved again through `holder`, which settles the object recorded
    /// in the slot.
    fn follow_pending(
        holder: &Injector,
        key: &InjectionKey,
        pending: PendingInstance,
        mode: Mode,
        to_ready: bool,
    ) -> Result<Resolution, InjectorError> {
        if mode == Mode::Sync {
            return Err(InjectorError::AsyncRequired {
                key: key.clone(),
                reason: "the instantiation is in flight",
            });
        }
        if !to_ready {
            return Ok(Resolution::Pending(pending));
        }

        let id = pending.id();
        let holder = holder.downgrade();
        let resolving = key.clone();
        let future = async move {
            let instance = pending.wait().await?;
            if !needs_async(&instance, true) {
                return Ok(instance);
            }
            let Some(holder) = holder.upgrade() else {
                return readiness::settle(instance, true, None).await;
            };
            match holder.resolve(&resolving, Mode::Async, true, None)? {
                Resolution::Ready(Some(settled)) => Ok(settled),
                Resolution::Pending(next) if next.id() != id => next.wait().await,
                _ => readiness::settle(instance, true, None).await,
            }
        }
        .boxed()
        .shared();
        Ok(Resolution::Pending(PendingInstance::new(id, key.clone(), future)))
    }

    /// Builds an object with `factory`, resolving its declared dependencies
    /// through this injector (or through an override sub-injector).
    fn instantiate(
        &self,
        key: &InjectionKey,
        factory: &Arc<dyn Factory>,
        overrides: Overrides,
        mode: Mode,
        to_ready: bool,
        context: Option<&Arc<InstantiationContext>>,
    ) -> Result<Outcome, InjectorError> {
        self.ensure_open()?;
        let failure = Failure::new(key, context);
        let dependencies = factory.dependencies();

        let mut arguments = Arguments::new();
        let mut declared = Vec::new();
        for (name, provider) in overrides.into_entries() {
            match (dependencies.get(name), provider) {
                (Some(dependency), provider) => declared.push((dependency.clone(), provider)),
                (None, Provider::Value(instance) | Provider::Quoted(instance)) => {
                    arguments.insert(name, None, Some(instance));
                }
                (None, provider) => {
                    return Err(InjectorError::Unsatisfactory {
                        key: InjectionKey::named(name),
                        provided: provider.describe(),
                    })
                }
            }
        }

        let injector = if declared.is_empty() {
            self.clone()
        } else {
            let sub_injector = self.child();
            for (dependency, provider) in declared {
                if !provider.satisfies(dependency.key()) {
                    return Err(InjectorError::Unsatisfactory {
                        key: dependency.key().clone(),
                        provided: provider.describe(),
                    });
                }
                sub_injector.add_provider(
                    Some(dependency.key().clone()),
                    provider,
                    ProviderOptions::default().without_close(),
                )?;
            }
            sub_injector
        };

        let mut claimed = Vec::new();
        let mut acquired = Vec::new();
        let mut waiting = Vec::new();
        for dependency in dependencies.iter() {
            let resolution = injector
                .resolve(dependency.key(), mode, to_ready, context)
                .map_err(|err| failure.wrap(err))?;
            let value = match resolution {
                Resolution::Ready(Some(instance)) => {
                    Some(claim_dependency(instance, factory.name(), &mut claimed, &mut acquired))
                }
                Resolution::Ready(None) => None,
                Resolution::Pending(pending) => {
                    waiting.push((dependency.name(), pending));
                    None
                }
            };
            arguments.insert(dependency.name(), Some(dependency.clone()), value);
        }

        if waiting.is_empty() {
            let outcome = construct(factory, arguments, mode, to_ready, &failure, context)?;
            return Ok(claimed_by_result(outcome, claimed, acquired));
        }
        if mode == Mode::Sync {
            return Err(InjectorError::AsyncRequired {
                key: key.clone(),
                reason: "a dependency is instantiated asynchronously",
            });
        }

        let factory = Arc::clone(factory);
        let context = context.cloned();
        let future = async move {
            let instances = future::try_join_all(waiting.iter().map(|(_, pending)| pending.wait()))
                .await
                .map_err(|err| failure.wrap(err))?;
            for ((name, _), instance) in waiting.iter().zip(instances) {
                arguments.replace_value(name, instance);
            }
            let outcome = construct(
                &factory,
                arguments,
                Mode::Async,
                to_ready,
                &failure,
                context.as_ref(),
            )?;
            match outcome {
                Outcome::Ready(instance) => Ok(instance),
                Outcome::Deferred { future, .. } => future.await,
            }
        }
        .boxed();
        Ok(claimed_by_result(
            Outcome::Deferred {
                future,
                acquired: Vec::new(),
            },
            claimed,
            acquired,
        ))
    }

    /// Spawns `future` on the runtime as an in-flight instantiation owned by
    /// this injector, and marks `slot` as holding it.
    ///
    /// The pending table stays locked until the slot is marked, which keeps
    /// the task from recording its result first.
    fn spawn_pending(
        &self,
        id: u64,
        key: InjectionKey,
        slot: &DependencyProvider,
        future: InstanceFuture,
        cascade: Vec<Injector>,
    ) -> Result<PendingInstance, InjectorError> {
        if Handle::try_current().is_err() {
            return Err(InjectorError::AsyncRequired {
                key,
                reason: "no async runtime is running",
            });
        }

        let mut table = self.inner.pending.lock();
        let task = tokio::spawn(future);
        let abort = task.abort_handle();

        let task_key = key.clone();
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(InjectorError::Canceled { key: task_key }),
                Err(err) => Err(InjectorError::InjectionFailed {
                    key: task_key,
                    path: Vec::new(),
                    source: Arc::new(err),
                }),
            }
        }
        .boxed()
        .shared();
        let pending = PendingInstance::new(id, key, future);
        table.insert(
            id,
            PendingTask {
                pending: pending.clone(),
                abort,
                cascade,
            },
        );
        slot.record_pending(pending.clone());
        drop(table);
        Ok(pending)
    }
}

/// Runs the deferred `future` and memoizes its result in `slot`. A failure
/// puts `fallback` back so a later resolution retries.
fn record_when_done(
    id: u64,
    owner: WeakInjector,
    slot: Arc<DependencyProvider>,
    fallback: Provider,
    guard: ContextGuard,
    future: InstanceFuture,
) -> InstanceFuture {
    async move {
        let result = future.await;
        let owner = owner.upgrade();
        let mut table = owner.as_ref().map(|owner| owner.inner.pending.lock());
        if let Some(table) = table.as_mut() {
            table.remove(&id);
        }
        let context = guard.context();
        match &result {
            Ok(instance) => {
                slot.record_final(instance.clone(), Some(id));
                if let Some(context) = context {
                    context.finish();
                }
            }
            Err(err) => {
                slot.restore(fallback, id);
                if let Some(context) = context {
                    context.fail(err);
                }
            }
        }
        drop(table);
        drop(guard);
        result
    }
    .boxed()
}

fn construct(
    factory: &Arc<dyn Factory>,
    arguments: Arguments,
    mode: Mode,
    to_ready: bool,
    failure: &Failure,
    context: Option<&Arc<InstantiationContext>>,
) -> Result<Outcome, InjectorError> {
    let future = match factory.construct(arguments) {
        Construction::Done(Ok(instance)) if !needs_async(&instance, to_ready) => {
            return Ok(Outcome::Ready(instance));
        }
        Construction::Done(Err(source)) => return Err(failure.wrap_boxed(source)),
        _ if mode == Mode::Sync => {
            return Err(InjectorError::AsyncRequired {
                key: failure.key.clone(),
                reason: "the constructed object needs asynchronous setup",
            });
        }
        Construction::Done(Ok(instance)) => future::ok::<_, InjectorError>(instance).boxed(),
        Construction::Deferred(future) => {
            let failure = failure.clone();
            async move { future.await.map_err(|source| failure.wrap_boxed(source)) }.boxed()
        }
    };

    let failure = failure.clone();
    let context = context.cloned();
    let settled = async move {
        let instance = future.await?;
        if !needs_async(&instance, to_ready) {
            return Ok(instance);
        }
        readiness::settle(instance, to_ready, context)
            .await
            .map_err(|err| failure.wrap(err))
    };
    Ok(Outcome::Deferred {
        future: settled.boxed(),
        acquired: Vec::new(),
    })
}

/// Claims injector dependencies on behalf of the factory being run.
fn claim_dependency(
    instance: Instance,
    factory: &'static str,
    claimed: &mut Vec<Injector>,
    acquired: &mut Vec<Injector>,
) -> Instance {
    let (injector, facade) = if let Some(injector) = instance.downcast::<Injector>() {
        ((*injector).clone(), false)
    } else if let Some(facade) = instance.downcast::<AsyncInjector>() {
        ((**facade).clone(), true)
    } else {
        return instance;
    };

    let (injector, created) = injector.claim_with_origin(ClaimedBy::from(factory));
    if created {
        acquired.push(injector.clone());
    }
    claimed.push(injector.clone());
    if facade {
        Instance::from_async_injector(AsyncInjector::new(injector))
    } else {
        Instance::from_injector(injector)
    }
}

/// Records the built object as the claimant of the injectors it received.
fn claimed_by_result(outcome: Outcome, claimed: Vec<Injector>, acquired: Vec<Injector>) -> Outcome {
    match outcome {
        Outcome::Ready(instance) => {
            for injector in &claimed {
                injector.set_claimant(instance.claimant());
            }
            Outcome::Ready(instance)
        }
        Outcome::Deferred { future, .. } if claimed.is_empty() => Outcome::Deferred { future, acquired },
        Outcome::Deferred { future, .. } => {
            let future = async move {
                let instance = future.await?;
                for injector in &claimed {
                    injector.set_claimant(instance.claimant());
                }
                Ok(instance)
            }
            .boxed();
            Outcome::Deferred { future, acquired }
        }
    }
}

fn downcast<T>(key: &InjectionKey, instance: &Instance) -> Result<Arc<T>, InjectorError>
where
    T: Send + Sync + 'static,
{
    instance
        .downcast::<T>()
        .ok_or_else(|| InjectorError::Unsatisfactory {
            key: key.clone(),
            provided: instance.type_name().to_owned(),
        })
}
