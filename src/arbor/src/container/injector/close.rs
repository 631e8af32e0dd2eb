use std::collections::HashSet;
use std::mem;
use std::time::Duration;

use futures::future;
use tokio::time;

use super::Injector;
use crate::container::{CanceledTask, Close, Lifecycle};
use crate::provider::{BoxError, Provider};

impl Injector {
    /// Closes this injector.
    ///
    /// In-flight instantiations started here are aborted and reported in
    /// `canceled`. The first call then closes the child injectors and runs
    /// the close hook of every local provider registered with `close`
    /// enabled, clears the provider table and drops the parent link. Later
    /// calls only abort instantiations started in between.
    ///
    /// A failing close hook is logged and does not stop the others.
    pub fn close(&self, mut canceled: Option<&mut Vec<CanceledTask>>) {
        self.cancel_pending(canceled.as_deref_mut());

        let providers = {
            let mut state = self.inner.state.lock();
            if state.lifecycle != Lifecycle::Open {
                return;
            }
            state.lifecycle = Lifecycle::Closing;
            let mut seen = HashSet::new();
            state
                .providers
                .values()
                .filter(|provider| seen.insert(provider.id()))
                .cloned()
                .collect::<Vec<_>>()
        };
        tracing::debug!(injector = self.id(), "closing injector");

        let children = mem::take(&mut *self.inner.children.lock());
        for child in children.iter().filter_map(|child| child.upgrade()) {
            Injector { inner: child }.close(canceled.as_deref_mut());
        }

        for provider in providers {
            if !provider.closes() {
                continue;
            }
            let closer = match provider.provider() {
                Provider::Value(instance) | Provider::Quoted(instance) => instance.closer().cloned(),
                _ => None,
            };
            if let Some(closer) = closer {
                if let Err(err) = closer.close(canceled.as_deref_mut()) {
                    tracing::error!(
                        injector = self.id(),
                        provider = ?provider,
                        error = %err,
                        "error closing provider"
                    );
                }
            }
        }

        let parent = {
            let mut state = self.inner.state.lock();
            state.lifecycle = Lifecycle::Closed;
            state.providers.clear();
            state.parent.take()
        };
        drop(parent);
    }

    fn cancel_pending(&self, mut canceled: Option<&mut Vec<CanceledTask>>) {
        let tasks = mem::take(&mut *self.inner.pending.lock());
        for (_, task) in tasks {
            tracing::debug!(
                injector = self.id(),
                key = %task.pending.key(),
                "canceling instantiation"
            );
            task.abort.abort();
            if let Some(canceled) = canceled.as_deref_mut() {
                canceled.push(CanceledTask::for_pending(self.id(), &task.pending));
            }
            for injector in task.cascade {
                injector.close(canceled.as_deref_mut());
            }
        }
    }
}

/// Closes `injector` and waits up to `timeout` for the instantiations the
/// close canceled to stop.
///
/// Returns the canceled tasks that were still running when the timeout
/// expired.
pub async fn shutdown_injector(injector: &Injector, timeout: Duration) -> Vec<CanceledTask> {
    let mut canceled = Vec::new();
    injector.close(Some(&mut canceled));
    if canceled.is_empty() {
        return canceled;
    }

    let stopping = future::join_all(canceled.iter().map(CanceledTask::finished));
    if time::timeout(timeout, stopping).await.is_err() {
        tracing::warn!(
            injector = injector.id(),
            ?timeout,
            "canceled instantiations did not stop in time"
        );
    }
    canceled.retain(|task| !task.is_finished());
    canceled
}

impl Close for Injector {
    fn close(&self, canceled: Option<&mut Vec<CanceledTask>>) -> Result<(), BoxError> {
        Injector::close(self, canceled);
        Ok(())
    }
}
