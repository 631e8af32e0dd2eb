use std::fmt::{Display, Formatter, Result as FmtResult};

use snafu::prelude::*;

use crate::container::{Injector, InjectorError, ProviderOptions};
use crate::key::InjectionKey;
use crate::provider::{BoxError, Provider};

/// Collects the registrations of modules into one injector.
///
/// Failures are recorded instead of returned, so that one misconfigured
/// binding does not hide the others.
pub struct Configurer {
    injector: Injector,
    errors: Vec<RegistryError>,
}

impl Configurer {
    pub(crate) fn new(injector: Injector) -> Self {
        Self {
            injector,
            errors: Vec::new(),
        }
    }

    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    /// Registers a provider, see [`Injector::add_provider`].
    pub fn add_provider(
        &mut self,
        key: Option<InjectionKey>,
        provider: impl Into<Provider>,
        options: ProviderOptions,
    ) -> Option<InjectionKey> {
        match self.injector.add_provider(key, provider, options) {
            Ok(key) => Some(key),
            Err(source) => {
                self.report_error(source);
                None
            }
        }
    }

    pub fn report_error(&mut self, source: InjectorError) {
        self.errors.push(RegistryError::Provider { source });
    }

    pub fn report_module_error(&mut self, module: &'static str, err: BoxError) {
        self.errors.push(RegistryError::ModuleInner {
            module,
            source: err,
        });
    }

    pub(crate) fn finish(self) -> Result<(), RegistryError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Aggregated {
                errors: self.errors,
            })
        }
    }
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum RegistryError {
    #[snafu(display("could not register a provider"))]
    #[non_exhaustive]
    Provider { source: InjectorError },
    #[snafu(display("module {module} fails to setup the configuration"))]
    #[non_exhaustive]
    ModuleInner { module: &'static str, source: BoxError },
    #[snafu(display("aggregated registry errors:\n{}", AggregatedDisplayer::new(errors)))]
    Aggregated { errors: Vec<RegistryError> },
}

struct AggregatedDisplayer<'a> {
    errors: &'a [RegistryError],
}

impl<'a> AggregatedDisplayer<'a> {
    fn new(errors: &'a [RegistryError]) -> Self {
        Self { errors }
    }
}

impl Display for AggregatedDisplayer<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, error) in self.errors.iter().enumerate() {
            match error {
                RegistryError::Provider { source } => writeln!(f, "{:4}: {}", i + 1, source)?,
                _ => writeln!(f, "{:4}: {}", i + 1, error)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configurer_add_provider_succeeds() {
        let mut configurer = Configurer::new(Injector::new());
        let key = configurer.add_provider(None, Provider::value(42i32), ProviderOptions::default());
        assert_eq!(key, Some(InjectionKey::of::<i32>()));
        assert!(configurer.injector().contains(&InjectionKey::of::<i32>()));
        configurer.finish().unwrap();
    }

    #[test]
    fn configurer_finish_fails_when_key_is_duplicated() {
        let mut configurer = Configurer::new(Injector::new());
        configurer.add_provider(None, Provider::value(42i32), ProviderOptions::default());
        let key = configurer.add_provider(None, Provider::value(43i32), ProviderOptions::default());
        assert!(key.is_none());

        let err = configurer.finish().unwrap_err();
        assert!(matches!(
            &err,
            RegistryError::Aggregated { errors } if errors.len() == 1
        ));
        assert!(err.to_string().contains("already provided"));
    }

    #[test]
    fn configurer_finish_fails_when_other_error_reported() {
        let mut configurer = Configurer::new(Injector::new());
        configurer.report_module_error("test", "whatever".into());

        let RegistryError::Aggregated { errors } = configurer.finish().unwrap_err() else {
            panic!("errors should be aggregated");
        };
        assert!(matches!(errors.first().unwrap(), RegistryError::ModuleInner { .. }));
    }
}
