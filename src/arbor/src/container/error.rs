use std::error::Error;
use std::sync::Arc;

use snafu::prelude::*;

use crate::container::InjectorId;
use crate::key::InjectionKey;
use crate::provider::BoxError;

#[derive(Debug, Clone, Snafu)]
#[non_exhaustive]
pub enum InjectorError {
    #[snafu(display("could not find any provider for {key}"))]
    #[non_exhaustive]
    NotFound { key: InjectionKey },
    #[snafu(display("{key} is already provided by {existing}"))]
    #[non_exhaustive]
    ExistingProvider { key: InjectionKey, existing: String },
    #[snafu(display("{key} can only be produced asynchronously ({reason})"))]
    #[non_exhaustive]
    AsyncRequired {
        key: InjectionKey,
        reason: &'static str,
    },
    #[snafu(display("could not inject {key}: {source}"))]
    #[non_exhaustive]
    InjectionFailed {
        key: InjectionKey,
        path: Vec<InjectionKey>,
        source: Arc<dyn Error + Send + Sync>,
    },
    #[snafu(display("injector #{injector} is closed"))]
    #[non_exhaustive]
    Closed { injector: InjectorId },
    #[snafu(display("{provided} does not satisfy {key}"))]
    #[non_exhaustive]
    Unsatisfactory { key: InjectionKey, provided: String },
    #[snafu(display("could not construct {key} which depends on itself somehow"))]
    #[non_exhaustive]
    CyclicDependency { key: InjectionKey },
    #[snafu(display("the instantiation of {key} was canceled"))]
    #[non_exhaustive]
    Canceled { key: InjectionKey },
    #[snafu(display("{type_name} must be resolved before it can become ready"))]
    #[non_exhaustive]
    NotResolved { type_name: &'static str },
    #[snafu(display("{type_name} failed to become ready: {source}"))]
    #[non_exhaustive]
    BecomeReadyFailed {
        type_name: &'static str,
        source: Arc<dyn Error + Send + Sync>,
    },
    #[snafu(display("{type_name} needs a running tokio runtime to finish its setup"))]
    #[non_exhaustive]
    RuntimeRequired { type_name: &'static str },
    #[snafu(display("argument `{name}` was never declared as a dependency"))]
    #[non_exhaustive]
    UndeclaredArgument { name: &'static str },
    #[snafu(display("injector #{injector} is not in the parent chain"))]
    #[non_exhaustive]
    NotAncestor { injector: InjectorId },
}

impl InjectorError {
    pub fn is_async_required(&self) -> bool {
        matches!(self, Self::AsyncRequired { .. })
    }

    /// Errors that are delivered to the caller untouched instead of being
    /// wrapped into [`InjectorError::InjectionFailed`].
    pub(crate) fn passes_through(&self) -> bool {
        matches!(
            self,
            Self::AsyncRequired { .. } | Self::InjectionFailed { .. } | Self::Canceled { .. }
        )
    }

    /// Recovers an [`InjectorError`] smuggled through a constructor's boxed
    /// error. Foreign errors are handed back.
    pub(crate) fn recover(source: BoxError) -> Result<Self, BoxError> {
        source.downcast::<InjectorError>().map(|err| *err)
    }
}
