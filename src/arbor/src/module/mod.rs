mod configurer;
mod dsl;

use std::any;

use crate::container::Injector;
use crate::provider::BoxError;

pub use configurer::{Configurer, RegistryError};
pub use dsl::{bind, bind_key, MetadataBinding, ProviderBinding};

/// A group of provider registrations.
pub trait Module: 'static {
    fn setup(&self, configurer: &mut Configurer) {
        if let Err(err) = self.configure(configurer) {
            configurer.report_module_error(any::type_name::<Self>(), err);
        }
    }

    fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError>;
}

#[derive(Default)]
pub struct Configuration {
    modules: Vec<Box<dyn Module>>,
}

impl Configuration {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with<M: Module>(mut self, module: M) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn compose(mut self, mut other: Configuration) -> Self {
        self.modules.append(&mut other.modules);
        self
    }
}

impl Module for Configuration {
    fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
        self.modules
            .iter()
            .for_each(|module| module.setup(configurer));
        Ok(())
    }
}

impl Injector {
    /// Applies `module` to this injector.
    ///
    /// Registration carries on past failures; every failure is reported in
    /// the returned [`RegistryError::Aggregated`]. Registrations that
    /// succeeded stay in place.
    pub fn install<M: Module>(&self, module: M) -> Result<(), RegistryError> {
        let mut configurer = Configurer::new(self.clone());
        module.setup(&mut configurer);
        configurer.finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::container::InjectorError;
    use crate::key::InjectionKey;

    use super::*;

    struct Settings;

    impl Module for Settings {
        fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
            bind::<u16>().to_instance(8080u16).set_on(configurer);
            bind_key(InjectionKey::named("host"))
                .to_instance(String::from("localhost"))
                .set_on(configurer);
            Ok(())
        }
    }

    struct Broken;

    impl Module for Broken {
        fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
            bind::<u16>().to_instance(1u16).set_on(configurer);
            Err("broken module".into())
        }
    }

    #[test]
    fn injector_install_succeeds() {
        let injector = Injector::new();
        injector
            .install(Configuration::new().with(Settings))
            .unwrap();
        assert_eq!(*injector.get::<u16>(&InjectionKey::of::<u16>()).unwrap(), 8080);
        assert_eq!(
            injector
                .get::<String>(&InjectionKey::named("host"))
                .unwrap()
                .as_str(),
            "localhost"
        );
    }

    #[test]
    fn injector_install_fails_when_bindings_conflict() {
        let injector = Injector::new();
        let err = injector
            .install(Configuration::new().with(Settings).compose(Configuration::new().with(Broken)))
            .unwrap_err();

        let RegistryError::Aggregated { errors } = err else {
            panic!("errors should be aggregated");
        };
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            &errors[0],
            RegistryError::Provider {
                source: InjectorError::ExistingProvider { .. }
            }
        ));
        assert!(matches!(
            &errors[1],
            RegistryError::ModuleInner { module, .. } if module.ends_with("Broken")
        ));
    }
}
