use crate::container::{AsyncInjector, Injector, InjectorError};
use crate::key::InjectionKey;
use crate::provider::{Arguments, BoxError, Construction, Dependencies, FnFactory, Instance};

const INJECTABLE: &str = "injectable";

/// Builds a factory that looks `target` up in another injector.
///
/// The other injector is the `injectable` dependency, an [`Injector`] or an
/// [`AsyncInjector`] bound under `injectable` (the resolving injector itself
/// when `None`). `target` is requested without becoming ready there; the
/// injector using the factory drives readiness as for any other object.
///
/// ```rust
/// # use arbor::prelude::*;
/// let root = Injector::new();
/// let inner = Injector::new();
/// inner
///     .add_provider(
///         Some(InjectionKey::named("db")),
///         Provider::value(String::from("postgres")),
///         ProviderOptions::default(),
///     )
///     .unwrap();
/// root.add_provider(Some(InjectionKey::named("inner")), inner, ProviderOptions::default())
///     .unwrap();
/// root.add_provider(
///     Some(InjectionKey::named("db")),
///     Provider::factory(injector_xref(
///         Some(InjectionKey::named("inner")),
///         InjectionKey::named("db"),
///     )),
///     ProviderOptions::default(),
/// )
/// .unwrap();
///
/// let db = root.get::<String>(&InjectionKey::named("db")).unwrap();
/// assert_eq!(db.as_str(), "postgres");
/// ```
pub fn injector_xref(injectable: Option<InjectionKey>, target: InjectionKey) -> FnFactory {
    let injectable = injectable.unwrap_or_else(InjectionKey::of::<Injector>);
    let dependencies = Dependencies::new().with(INJECTABLE, injectable.clone());
    let produced = target.clone();
    let target = target.ready(false);

    FnFactory::new("injector_xref", dependencies, move |arguments| {
        let injector = match referenced(&arguments, &injectable) {
            Ok(injector) => injector,
            Err(err) => return Construction::failed(err),
        };
        match injector.get_instance(&target) {
            Ok(Some(instance)) => Construction::ready(instance),
            Ok(None) => Construction::failed(InjectorError::NotFound {
                key: target.clone(),
            }),
            Err(err) if err.is_async_required() => {
                tracing::trace!(key = %target, "cross reference needs asynchronous lookup");
                let facade = injector.asynchronous();
                let target = target.clone();
                Construction::deferred(async move {
                    match facade.get_instance_async(&target).await {
                        Ok(Some(instance)) => Ok(instance),
                        Ok(None) => Err(BoxError::from(InjectorError::NotFound { key: target })),
                        Err(err) => Err(BoxError::from(err)),
                    }
                })
            }
            Err(err) => Construction::failed(err),
        }
    })
    .producing(produced)
}

fn referenced(arguments: &Arguments, injectable: &InjectionKey) -> Result<Injector, InjectorError> {
    let instance: &Instance = arguments
        .instance(INJECTABLE)
        .ok_or_else(|| InjectorError::NotFound {
            key: injectable.clone(),
        })?;
    if let Some(injector) = instance.downcast::<Injector>() {
        return Ok((*injector).clone());
    }
    if let Some(facade) = instance.downcast::<AsyncInjector>() {
        return Ok(facade.injector().clone());
    }
    Err(InjectorError::Unsatisfactory {
        key: injectable.clone(),
        provided: instance.type_name().to_owned(),
    })
}
