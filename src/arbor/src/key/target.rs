use std::any::{self, TypeId};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// What an [`InjectionKey`] asks for: a type, or an opaque named sentinel.
///
/// [`InjectionKey`]: crate::key::InjectionKey
#[derive(Clone)]
pub enum Target {
    Type { id: TypeId, name: &'static str },
    Named(Arc<str>),
}

impl Target {
    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self::Type {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }

    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self::Named(name.into())
    }

    pub fn type_id(&self) -> Option<TypeId> {
        match self {
            Self::Type { id, .. } => Some(*id),
            Self::Named(_) => None,
        }
    }

    pub fn is_named(&self) -> bool {
        matches!(self, Self::Named(_))
    }

    pub fn is<T>(&self) -> bool
    where
        T: ?Sized + 'static,
    {
        self.type_id() == Some(TypeId::of::<T>())
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Type { id: lhs, .. }, Self::Type { id: rhs, .. }) => lhs == rhs,
            (Self::Named(lhs), Self::Named(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Type { id, .. } => {
                state.write_u8(0);
                id.hash(state);
            }
            Self::Named(name) => {
                state.write_u8(1);
                name.hash(state);
            }
        }
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Type { id: lhs, .. }, Self::Type { id: rhs, .. }) => lhs.cmp(rhs),
            (Self::Named(lhs), Self::Named(rhs)) => lhs.cmp(rhs),
            (Self::Type { .. }, Self::Named(_)) => Ordering::Less,
            (Self::Named(_), Self::Type { .. }) => Ordering::Greater,
        }
    }
}

impl Debug for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Type { name, .. } => write!(f, "{name}"),
            Self::Named(name) => write!(f, "{name:?}"),
        }
    }
}

/// A constraint value attached to a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Constraint {
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
}

impl Display for Constraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<bool> for Constraint {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Constraint {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Constraint {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Constraint {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for Constraint {
    fn from(value: &str) -> Self {
        Self::Str(Arc::from(value))
    }
}

impl From<String> for Constraint {
    fn from(value: String) -> Self {
        Self::Str(Arc::from(value))
    }
}

impl From<Arc<str>> for Constraint {
    fn from(value: Arc<str>) -> Self {
        Self::Str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_eq_succeeds() {
        assert_eq!(Target::of::<i32>(), Target::of::<i32>());
        assert_ne!(Target::of::<i32>(), Target::of::<i64>());
        assert_eq!(Target::named("db"), Target::named(String::from("db")));
        assert_ne!(Target::named("i32"), Target::of::<i32>());
    }

    #[test]
    fn target_display_succeeds() {
        assert_eq!(Target::of::<i32>().to_string(), "i32");
        assert_eq!(Target::named("site").to_string(), "\"site\"");
    }
}
