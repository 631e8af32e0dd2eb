use std::sync::Arc;

use crate::container::InjectorId;
use crate::key::InjectionKey;
use crate::provider::DependencyProvider;

/// Emitted whenever a provider is added to an injector.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub injector: InjectorId,
    pub key: InjectionKey,
    pub provider: Arc<DependencyProvider>,
    pub replace: bool,
    pub close: bool,
    pub allow_multiple: bool,
    /// Every key the provider was bound under, supplementary ones included.
    pub keys: Vec<InjectionKey>,
}

/// Observes provider registrations on an injector and its descendants.
#[cfg_attr(test, mockall::automock)]
pub trait ProviderListener: Send + Sync + 'static {
    fn provider_added(&self, event: &ProviderEvent);
}
