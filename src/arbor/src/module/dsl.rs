use std::sync::Arc;

use crate::container::{InjectorError, ProviderOptions};
use crate::key::{Constraint, InjectionKey};
use crate::module::Configurer;
use crate::provider::{Factory, Injectable, Provider};

/// Starts a binding for the type `T`.
pub fn bind<T>() -> MetadataBinding
where
    T: ?Sized + 'static,
{
    bind_key(InjectionKey::of::<T>())
}

/// Starts a binding for an explicit key.
pub fn bind_key(key: InjectionKey) -> MetadataBinding {
    MetadataBinding {
        key,
        options: ProviderOptions::default(),
    }
}

/// A binding whose provider is not chosen yet.
#[derive(Debug, Clone)]
pub struct MetadataBinding {
    key: InjectionKey,
    options: ProviderOptions,
}

impl MetadataBinding {
    pub fn constrained(self, name: &str, value: impl Into<Constraint>) -> Self {
        Self {
            key: self.key.with(name, value),
            ..self
        }
    }

    pub fn allow_multiple(self) -> Self {
        Self {
            options: self.options.allow_multiple(),
            ..self
        }
    }

    pub fn without_close(self) -> Self {
        Self {
            options: self.options.without_close(),
            ..self
        }
    }

    pub fn replacing(self) -> Self {
        Self {
            options: self.options.replacing(),
            ..self
        }
    }

    pub fn to_instance<V>(self, value: V) -> ProviderBinding
    where
        V: Send + Sync + 'static,
    {
        self.to_provider(Provider::value(value))
    }

    pub fn to_shared<V>(self, value: Arc<V>) -> ProviderBinding
    where
        V: Send + Sync + 'static,
    {
        self.to_provider(Provider::shared(value))
    }

    /// Binds a value returned verbatim, skipping the readiness protocol and
    /// the type check.
    pub fn to_quoted<V>(self, value: V) -> ProviderBinding
    where
        V: Send + Sync + 'static,
    {
        self.to_provider(Provider::quote(value))
    }

    pub fn to_injectable<C>(self) -> ProviderBinding
    where
        C: Injectable,
    {
        self.to_provider(Provider::injectable::<C>())
    }

    pub fn to_factory<F>(self, factory: F) -> ProviderBinding
    where
        F: Factory,
    {
        self.to_provider(Provider::factory(factory))
    }

    pub fn to_provider(self, provider: impl Into<Provider>) -> ProviderBinding {
        ProviderBinding {
            key: self.key,
            options: self.options,
            provider: provider.into(),
        }
    }
}

/// A complete binding, ready to be set on a [`Configurer`].
#[derive(Debug, Clone)]
pub struct ProviderBinding {
    key: InjectionKey,
    options: ProviderOptions,
    provider: Provider,
}

impl ProviderBinding {
    pub fn constrained(self, name: &str, value: impl Into<Constraint>) -> Self {
        Self {
            key: self.key.with(name, value),
            ..self
        }
    }

    pub fn allow_multiple(self) -> Self {
        Self {
            options: self.options.allow_multiple(),
            ..self
        }
    }

    pub fn without_close(self) -> Self {
        Self {
            options: self.options.without_close(),
            ..self
        }
    }

    pub fn replacing(self) -> Self {
        Self {
            options: self.options.replacing(),
            ..self
        }
    }

    /// Registers the binding, reporting an
    /// [`InjectorError::Unsatisfactory`] if the provider cannot stand in for
    /// the key.
    pub fn set_on(self, configurer: &mut Configurer) {
        if !self.provider.satisfies(&self.key) {
            configurer.report_error(InjectorError::Unsatisfactory {
                key: self.key,
                provided: self.provider.describe(),
            });
            return;
        }
        configurer.add_provider(Some(self.key), self.provider, self.options);
    }
}

#[cfg(test)]
mod tests {
    use crate::container::Injector;
    use crate::key::Target;
    use crate::module::{Module, RegistryError};
    use crate::provider::{Arguments, BoxError, Construction, Dependencies};

    use super::*;

    struct Pool {
        size: usize,
    }

    impl Injectable for Pool {
        fn dependencies() -> Dependencies {
            Dependencies::new().with("size", InjectionKey::named("pool-size"))
        }

        fn construct(arguments: Arguments) -> Construction<Self> {
            match arguments.get::<usize>("size") {
                Ok(size) => Construction::ready(Pool { size: *size }),
                Err(err) => Construction::failed(err),
            }
        }
    }

    struct DslCompilationTest;

    impl Module for DslCompilationTest {
        fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
            bind_key(InjectionKey::named("pool-size"))
                .to_instance(4usize)
                .set_on(configurer);

            bind::<Pool>().to_injectable::<Pool>().set_on(configurer);

            bind::<Pool>()
                .constrained("role", "replica")
                .to_injectable::<Pool>()
                .allow_multiple()
                .set_on(configurer);

            bind::<u8>()
                .to_shared(Arc::new(7u8))
                .without_close()
                .set_on(configurer);

            bind_key(InjectionKey::new(Target::named("marker")))
                .to_quoted("bootstrap")
                .set_on(configurer);
            Ok(())
        }
    }

    #[test]
    fn dsl_set_on_succeeds() {
        let injector = Injector::new();
        injector.install(DslCompilationTest).unwrap();

        let pool = injector.get::<Pool>(&InjectionKey::of::<Pool>()).unwrap();
        assert_eq!(pool.size, 4);
        let replica = injector
            .get::<Pool>(&InjectionKey::of::<Pool>().with("role", "replica"))
            .unwrap();
        assert!(!Arc::ptr_eq(&pool, &replica));
        assert_eq!(*injector.get::<u8>(&InjectionKey::of::<u8>()).unwrap(), 7);
        assert!(injector.contains(&InjectionKey::named("marker")));
    }

    #[test]
    fn dsl_set_on_fails_when_unsatisfactory() {
        struct Mismatch;

        impl Module for Mismatch {
            fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
                bind::<u16>().to_instance("not a port").set_on(configurer);
                Ok(())
            }
        }

        let RegistryError::Aggregated { errors } = Injector::new().install(Mismatch).unwrap_err()
        else {
            panic!("errors should be aggregated");
        };
        assert!(matches!(
            &errors[0],
            RegistryError::Provider {
                source: InjectorError::Unsatisfactory { .. }
            }
        ));
    }
}
