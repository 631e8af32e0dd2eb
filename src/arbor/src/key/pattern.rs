use std::sync::Arc;

use crate::key::InjectionKey;

/// A predicate used to select keys, mainly by [`Injector::filter`].
///
/// [`Injector::filter`]: crate::container::Injector::filter
pub trait Pattern {
    /// Tests whether the key matches the pattern.
    fn matches(&self, key: &InjectionKey) -> bool;
}

/// A [`Pattern`] which matches every key.
///
/// # Examples
///
/// ```rust
/// # use arbor::key::{AnyKey, InjectionKey, Pattern};
/// assert!(AnyKey.matches(&InjectionKey::of::<i32>()));
/// assert!(AnyKey.matches(&InjectionKey::named("site").with("role", "web")));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyKey;

impl Pattern for AnyKey {
    fn matches(&self, _key: &InjectionKey) -> bool {
        true
    }
}

/// A [`Pattern`] which matches keys carrying at least the given constraint
/// names, whatever their values are.
///
/// # Examples
///
/// ```rust
/// # use arbor::key::{HasConstraints, InjectionKey, Pattern};
/// let pattern = HasConstraints::new(["host"]);
/// assert!(pattern.matches(&InjectionKey::of::<i32>().with("host", "a").with("port", 1)));
/// assert!(!pattern.matches(&InjectionKey::of::<i32>().with("port", 1)));
/// ```
#[derive(Debug, Clone)]
pub struct HasConstraints {
    names: Vec<Arc<str>>,
}

impl HasConstraints {
    pub fn new<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Arc<str>>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Pattern for HasConstraints {
    fn matches(&self, key: &InjectionKey) -> bool {
        self.names
            .iter()
            .all(|name| key.constraint(name).is_some())
    }
}

/// A [`Pattern`] backed by an arbitrary predicate over keys.
pub struct Matching<F>(pub F)
where
    F: Fn(&InjectionKey) -> bool;

impl<F> Pattern for Matching<F>
where
    F: Fn(&InjectionKey) -> bool,
{
    fn matches(&self, key: &InjectionKey) -> bool {
        (self.0)(key)
    }
}
