use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use crate::container::{AsyncInjector, Injector, InjectorError};
use crate::key::InjectionKey;
use crate::provider::{Instance, Provider};

/// One declared dependency of a constructor.
#[derive(Debug, Clone)]
pub struct Dependency {
    name: &'static str,
    key: InjectionKey,
    exposed: bool,
}

impl Dependency {
    pub fn new(name: &'static str, key: InjectionKey) -> Self {
        Self {
            name,
            key,
            exposed: true,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key(&self) -> &InjectionKey {
        &self.key
    }

    /// Exposed dependencies are made ready before their dependent becomes
    /// ready. Constructor-only dependencies are not.
    pub fn is_exposed(&self) -> bool {
        self.exposed
    }
}

/// The dependency declaration of a constructor, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    entries: Vec<Dependency>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &'static str, key: impl Into<InjectionKey>) -> Self {
        self.push(Dependency::new(name, key.into()))
    }

    pub fn with_constructor_only(self, name: &'static str, key: impl Into<InjectionKey>) -> Self {
        self.push(Dependency {
            exposed: false,
            ..Dependency::new(name, key.into())
        })
    }

    fn push(mut self, dependency: Dependency) -> Self {
        self.entries.retain(|entry| entry.name != dependency.name);
        self.entries.push(dependency);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Dependency> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone)]
struct Argument {
    name: &'static str,
    dependency: Option<Dependency>,
    value: Option<Instance>,
}

/// The resolved argument record handed to a constructor.
///
/// Declared dependencies are present under their names (absent optional
/// dependencies hold no value); caller-supplied extras are present too.
#[derive(Clone, Default)]
pub struct Arguments {
    entries: Vec<Argument>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an extra, undeclared argument.
    pub fn with(mut self, name: &'static str, value: Instance) -> Self {
        self.insert(name, None, Some(value));
        self
    }

    pub(crate) fn insert(
        &mut self,
        name: &'static str,
        dependency: Option<Dependency>,
        value: Option<Instance>,
    ) {
        let argument = Argument {
            name,
            dependency,
            value,
        };
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => *entry = argument,
            None => self.entries.push(argument),
        }
    }

    pub(crate) fn replace_value(&mut self, name: &str, value: Instance) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.name == name) {
            entry.value = Some(value);
        }
    }

    fn lookup(&self, name: &'static str) -> Result<&Argument, InjectorError> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or(InjectorError::UndeclaredArgument { name })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .and_then(|entry| entry.value.as_ref())
    }

    /// Returns the argument `name` as an `Arc<T>`.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` was never declared, holds no value or holds
    /// a value of another type.
    pub fn get<T>(&self, name: &'static str) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        let argument = self.lookup(name)?;
        match &argument.value {
            Some(value) => Self::downcast(argument, value),
            None => Err(InjectorError::NotFound {
                key: Self::key_of(argument),
            }),
        }
    }

    /// Like [`Arguments::get`], but an absent value is not an error.
    pub fn optional<T>(&self, name: &'static str) -> Result<Option<Arc<T>>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        let argument = self.lookup(name)?;
        argument
            .value
            .as_ref()
            .map(|value| Self::downcast(argument, value))
            .transpose()
    }

    pub fn injector(&self, name: &'static str) -> Result<Injector, InjectorError> {
        self.get::<Injector>(name).map(|injector| (*injector).clone())
    }

    pub fn async_injector(&self, name: &'static str) -> Result<AsyncInjector, InjectorError> {
        self.get::<AsyncInjector>(name)
            .map(|injector| (*injector).clone())
    }

    /// Resolved values of the exposed declared dependencies.
    pub fn exposed(&self) -> impl Iterator<Item = (&Dependency, &Instance)> {
        self.entries.iter().filter_map(|entry| {
            let dependency = entry.dependency.as_ref().filter(|d| d.is_exposed())?;
            Some((dependency, entry.value.as_ref()?))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|entry| entry.name)
    }

    fn key_of(argument: &Argument) -> InjectionKey {
        argument
            .dependency
            .as_ref()
            .map_or_else(|| InjectionKey::named(argument.name), |d| d.key.clone())
    }

    fn downcast<T>(argument: &Argument, value: &Instance) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        value
            .downcast::<T>()
            .ok_or_else(|| InjectorError::Unsatisfactory {
                key: Self::key_of(argument),
                provided: value.type_name().to_owned(),
            })
    }
}

impl Debug for Arguments {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_map()
            .entries(self.entries.iter().map(|entry| (entry.name, &entry.value)))
            .finish()
    }
}

/// Caller-supplied keyword overrides for a single call.
///
/// Overrides naming a declared dependency are bound in a private
/// sub-injector so that they also reach transitive dependencies resolved
/// through it. The others are passed to the constructor as extra arguments.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    entries: Vec<(&'static str, Provider)>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, provider: impl Into<Provider>) -> Self {
        self.entries.retain(|(existing, _)| *existing != name);
        self.entries.push((name, provider.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(&'static str, Provider)> {
        self.entries
    }
}
