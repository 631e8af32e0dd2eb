#![allow(clippy::new_without_default)]

extern crate self as arbor;

pub mod container;
pub mod context;
pub mod key;
pub mod module;
pub mod provider;
pub mod readiness;

pub use arbor_derive::injectable;

pub mod prelude {
    pub use crate::container::{
        injector_xref, shutdown_injector, AsyncInjector, CanceledTask, ClaimedBy, Close, Injector,
        InjectorError, ProviderOptions,
    };
    pub use crate::context::{
        instantiation_leaves, instantiation_roots, ContextPhase, InstantiationContext,
    };
    pub use crate::injectable;
    pub use crate::key::{InjectionKey, Target};
    pub use crate::module::{bind, bind_key, Configuration, Configurer, Module, RegistryError};
    pub use crate::provider::{
        Arguments, BoxError, Construction, Dependencies, Factory, FnFactory, Injectable, Instance,
        Overrides, Provider,
    };
    pub use crate::readiness::{AsyncInjectable, Readiness, ReadyHooks, ReadyState};
}
