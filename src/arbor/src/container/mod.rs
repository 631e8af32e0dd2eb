mod asynchronous;
mod error;
mod event;
mod injector;
mod lifecycle;
mod xref;

pub use asynchronous::AsyncInjector;
pub use error::InjectorError;
pub use event::{ProviderEvent, ProviderListener};
pub use injector::{shutdown_injector, Injector, InjectorId, ProviderOptions};
pub use lifecycle::{CanceledTask, ClaimedBy, Close, Lifecycle, ScopedInjector};
pub use xref::injector_xref;

#[cfg(test)]
pub(crate) use event::MockProviderListener;
