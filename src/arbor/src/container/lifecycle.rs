use std::any::Any;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::container::{Injector, InjectorId};
use crate::key::InjectionKey;
use crate::provider::{BoxError, PendingInstance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Open,
    Closing,
    Closed,
}

type Completion = Shared<BoxFuture<'static, ()>>;

/// An in-flight instantiation that was aborted by a close.
///
/// Aborting only requests the cancellation. [`CanceledTask::finished`]
/// waits until the task has actually stopped.
#[derive(Clone)]
pub struct CanceledTask {
    pub key: InjectionKey,
    pub injector: InjectorId,
    completion: Option<Completion>,
}

impl CanceledTask {
    pub fn new(key: InjectionKey, injector: InjectorId) -> Self {
        Self {
            key,
            injector,
            completion: None,
        }
    }

    /// Attaches the work to wait for in [`CanceledTask::finished`].
    pub fn with_completion<F>(mut self, completion: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.completion = Some(completion.boxed().shared());
        self
    }

    pub(crate) fn for_pending(injector: InjectorId, pending: &PendingInstance) -> Self {
        let pending = pending.clone();
        Self::new(pending.key().clone(), injector).with_completion(async move {
            let _ = pending.wait().await;
        })
    }

    /// Waits until the canceled work has stopped.
    pub async fn finished(&self) {
        if let Some(completion) = &self.completion {
            completion.clone().await;
        }
    }

    /// Whether the canceled work is known to have stopped.
    pub fn is_finished(&self) -> bool {
        self.completion
            .as_ref()
            .is_none_or(|completion| completion.peek().is_some())
    }
}

impl Debug for CanceledTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CanceledTask")
            .field("key", &self.key)
            .field("injector", &self.injector)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// The teardown hook of a provided object.
///
/// Objects registered with `close` enabled get this hook invoked exactly
/// once when their owning injector closes. Tasks the object cancels should
/// be appended to `canceled` when it is given.
pub trait Close: Send + Sync + 'static {
    fn close(&self, canceled: Option<&mut Vec<CanceledTask>>) -> Result<(), BoxError>;
}

/// Who owns a claimed injector. The object reference is observational only.
#[derive(Clone)]
pub enum ClaimedBy {
    Named(Arc<str>),
    Object {
        type_name: &'static str,
        object: Weak<dyn Any + Send + Sync>,
    },
}

impl ClaimedBy {
    pub fn object<T>(object: &Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        let object: Arc<dyn Any + Send + Sync> = Arc::clone(object) as _;
        Self::Object {
            type_name: std::any::type_name::<T>(),
            object: Arc::downgrade(&object),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Object { type_name, .. } => type_name,
        }
    }
}

impl From<&str> for ClaimedBy {
    fn from(name: &str) -> Self {
        Self::Named(Arc::from(name))
    }
}

impl From<String> for ClaimedBy {
    fn from(name: String) -> Self {
        Self::Named(Arc::from(name))
    }
}

impl Debug for ClaimedBy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Named(name) => write!(f, "ClaimedBy({name})"),
            Self::Object { type_name, object } => {
                let state = if object.strong_count() > 0 { "alive" } else { "dropped" };
                write!(f, "ClaimedBy({type_name}, {state})")
            }
        }
    }
}

/// Closes the wrapped injector when it goes out of scope.
pub struct ScopedInjector {
    injector: Injector,
}

impl ScopedInjector {
    pub(crate) fn new(injector: Injector) -> Self {
        Self { injector }
    }
}

impl Deref for ScopedInjector {
    type Target = Injector;

    fn deref(&self) -> &Injector {
        &self.injector
    }
}

impl Drop for ScopedInjector {
    fn drop(&mut self) {
        self.injector.close(None);
    }
}

impl Debug for ScopedInjector {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_tuple("ScopedInjector").field(&self.injector).finish()
    }
}
