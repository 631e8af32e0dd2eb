mod intern;
mod pattern;
mod target;

use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub use pattern::{AnyKey, HasConstraints, Matching, Pattern};
pub use target::{Constraint, Target};

/// Flags carried by a key that never take part in equality or hashing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyFlags {
    pub optional: bool,
    pub ready: Option<bool>,
    pub globally_unique: bool,
    pub allow_multiple: bool,
}

/// An immutable, hashable identifier for a provider slot.
///
/// Two keys are equal when their targets and constraint sets are equal; the
/// order in which constraints were given does not matter and the
/// [`KeyFlags`] are ignored. An unconstrained key without flags is interned,
/// so constructing it twice yields the same object while either copy is
/// alive:
///
/// ```rust
/// # use arbor::key::InjectionKey;
/// let lhs = InjectionKey::of::<u8>();
/// let rhs = InjectionKey::of::<u8>();
/// assert!(InjectionKey::ptr_eq(&lhs, &rhs));
///
/// let optional = lhs.optional();
/// assert_eq!(optional, lhs);
/// assert!(!InjectionKey::ptr_eq(&optional, &lhs));
/// ```
#[derive(Clone)]
pub struct InjectionKey {
    inner: Arc<KeyInner>,
}

pub(crate) struct KeyInner {
    target: Target,
    constraints: BTreeMap<Arc<str>, Constraint>,
    flags: KeyFlags,
}

impl KeyInner {
    fn bare(target: Target) -> Self {
        Self {
            target,
            constraints: BTreeMap::new(),
            flags: KeyFlags::default(),
        }
    }
}

impl InjectionKey {
    pub fn new(target: Target) -> Self {
        Self {
            inner: intern::intern(target),
        }
    }

    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self::new(Target::of::<T>())
    }

    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::new(Target::named(name))
    }

    pub fn constrained<I, N, V>(target: Target, constraints: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Arc<str>>,
        V: Into<Constraint>,
    {
        let constraints = constraints
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        Self::build(target, constraints, KeyFlags::default())
    }

    fn build(
        target: Target,
        constraints: BTreeMap<Arc<str>, Constraint>,
        flags: KeyFlags,
    ) -> Self {
        if constraints.is_empty() && flags == KeyFlags::default() {
            return Self::new(target);
        }
        Self {
            inner: Arc::new(KeyInner {
                target,
                constraints,
                flags,
            }),
        }
    }

    fn with_flags(&self, flags: KeyFlags) -> Self {
        Self::build(
            self.inner.target.clone(),
            self.inner.constraints.clone(),
            flags,
        )
    }

    /// Returns a new key with one more constraint. An existing constraint of
    /// the same name is overwritten.
    pub fn with(&self, name: impl Into<Arc<str>>, value: impl Into<Constraint>) -> Self {
        let mut constraints = self.inner.constraints.clone();
        constraints.insert(name.into(), value.into());
        Self::build(self.inner.target.clone(), constraints, self.inner.flags)
    }

    /// Returns the same key with every flag reset.
    pub fn plain(&self) -> Self {
        self.with_flags(KeyFlags::default())
    }

    /// Returns the same key with every constraint removed.
    pub fn unconstrained(&self) -> Self {
        Self::build(self.inner.target.clone(), BTreeMap::new(), self.inner.flags)
    }

    pub fn optional(&self) -> Self {
        self.with_flags(KeyFlags {
            optional: true,
            ..self.inner.flags
        })
    }

    /// Overrides whether the provided object must be ready when this key is
    /// resolved.
    pub fn ready(&self, ready: bool) -> Self {
        self.with_flags(KeyFlags {
            ready: Some(ready),
            ..self.inner.flags
        })
    }

    pub fn globally_unique(&self) -> Self {
        self.with_flags(KeyFlags {
            globally_unique: true,
            ..self.inner.flags
        })
    }

    pub fn allow_multiple(&self) -> Self {
        self.with_flags(KeyFlags {
            allow_multiple: true,
            ..self.inner.flags
        })
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn constraints(&self) -> &BTreeMap<Arc<str>, Constraint> {
        &self.inner.constraints
    }

    pub fn constraint(&self, name: &str) -> Option<&Constraint> {
        self.inner.constraints.get(name)
    }

    pub fn has_constraints(&self) -> bool {
        !self.inner.constraints.is_empty()
    }

    pub fn flags(&self) -> KeyFlags {
        self.inner.flags
    }

    pub fn is_optional(&self) -> bool {
        self.inner.flags.optional
    }

    pub fn ready_override(&self) -> Option<bool> {
        self.inner.flags.ready
    }

    pub fn is_globally_unique(&self) -> bool {
        self.inner.flags.globally_unique
    }

    pub fn allows_multiple(&self) -> bool {
        self.inner.flags.allow_multiple
    }

    /// Object identity, as opposed to key equality.
    pub fn ptr_eq(lhs: &Self, rhs: &Self) -> bool {
        Arc::ptr_eq(&lhs.inner, &rhs.inner)
    }
}

impl PartialEq for InjectionKey {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
            || (self.inner.target == other.inner.target
                && self.inner.constraints == other.inner.constraints)
    }
}

impl Eq for InjectionKey {}

impl Hash for InjectionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.target.hash(state);
        self.inner.constraints.hash(state);
    }
}

impl From<Target> for InjectionKey {
    fn from(target: Target) -> Self {
        Self::new(target)
    }
}

impl Debug for InjectionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

impl Display for InjectionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "InjectionKey({}", self.inner.target)?;
        for (name, value) in &self.inner.constraints {
            write!(f, ", {name}={value}")?;
        }
        let flags = self.inner.flags;
        if flags.optional {
            write!(f, ", _optional=true")?;
        }
        if let Some(ready) = flags.ready {
            write!(f, ", _ready={ready}")?;
        }
        if flags.globally_unique {
            write!(f, ", _globally_unique=true")?;
        }
        if flags.allow_multiple {
            write!(f, ", _allow_multiple=true")?;
        }
        write!(f, ")")
    }
}
