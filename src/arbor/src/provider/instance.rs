use std::any::{self, Any, TypeId};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use crate::container::{AsyncInjector, ClaimedBy, Close, Injector};
use crate::key::{InjectionKey, Target};
use crate::readiness::{AsyncInjectable, ReadyState};

/// A type-erased object produced by a provider.
///
/// Besides the value itself an [`Instance`] carries the optional capability
/// handles the engine cares about: the asynchronous readiness protocol and
/// the close hook. Cloning an [`Instance`] never clones the value.
#[derive(Clone)]
pub struct Instance {
    value: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
    readiness: Option<Arc<dyn AsyncInjectable>>,
    closer: Option<Arc<dyn Close>>,
}

impl Instance {
    pub fn new<T>(value: Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self {
            value,
            type_id: TypeId::of::<T>(),
            type_name: any::type_name::<T>(),
            readiness: None,
            closer: None,
        }
    }

    pub fn from_value<T>(value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::new(Arc::new(value))
    }

    /// Wraps an object taking part in the asynchronous readiness protocol.
    pub fn async_injectable<T>(value: Arc<T>) -> Self
    where
        T: AsyncInjectable,
    {
        Self::new(Arc::clone(&value)).with_readiness(value)
    }

    pub fn with_readiness(mut self, handle: Arc<dyn AsyncInjectable>) -> Self {
        self.readiness = Some(handle);
        self
    }

    pub fn with_close(mut self, handle: Arc<dyn Close>) -> Self {
        self.closer = Some(handle);
        self
    }

    pub(crate) fn from_injector(injector: Injector) -> Self {
        let closer = Arc::new(injector.clone());
        Self::from_value(injector).with_close(closer)
    }

    pub(crate) fn from_async_injector(injector: AsyncInjector) -> Self {
        Self::from_value(injector)
    }

    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    pub fn is<T>(&self) -> bool
    where
        T: 'static,
    {
        self.type_id == TypeId::of::<T>()
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn target(&self) -> Target {
        Target::Type {
            id: self.type_id,
            name: self.type_name,
        }
    }

    /// Identity of the underlying value, the analogue of `is`.
    pub fn ptr_eq(lhs: &Self, rhs: &Self) -> bool {
        lhs.address() == rhs.address()
    }

    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.value).cast::<()>() as usize
    }

    /// A weak record of this object, for injectors claimed on its behalf.
    pub(crate) fn claimant(&self) -> ClaimedBy {
        ClaimedBy::Object {
            type_name: self.type_name,
            object: Arc::downgrade(&self.value),
        }
    }

    pub fn readiness_handle(&self) -> Option<&Arc<dyn AsyncInjectable>> {
        self.readiness.as_ref()
    }

    pub(crate) fn closer(&self) -> Option<&Arc<dyn Close>> {
        self.closer.as_ref()
    }

    /// Objects outside the readiness protocol are always ready.
    pub fn ready_state(&self) -> ReadyState {
        self.readiness
            .as_ref()
            .map_or(ReadyState::Ready, |handle| handle.readiness().state())
    }

    pub fn is_ready(&self) -> bool {
        self.ready_state() == ReadyState::Ready
    }

    /// Whether this object may be bound under `key`. Named targets accept
    /// anything; type targets require the exact type.
    pub fn satisfies(&self, key: &InjectionKey) -> bool {
        match key.target() {
            Target::Named(_) => true,
            Target::Type { id, .. } => *id == self.type_id,
        }
    }
}

impl Debug for Instance {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Instance")
            .field("type", &self.type_name)
            .field("address", &format_args!("{:#x}", self.address()))
            .field("state", &self.ready_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_downcast_succeeds() {
        let instance = Instance::from_value(42i32);
        assert_eq!(instance.downcast::<i32>().as_deref(), Some(&42));
        assert!(instance.downcast::<i64>().is_none());
        assert!(instance.is::<i32>());
        assert!(instance.is_ready());
    }

    #[test]
    fn instance_ptr_eq_succeeds() {
        let value = Arc::new(String::from("shared"));
        let lhs = Instance::new(Arc::clone(&value));
        let rhs = Instance::new(value);
        assert!(Instance::ptr_eq(&lhs, &rhs));
        assert!(Instance::ptr_eq(&lhs, &lhs.clone()));
        assert!(!Instance::ptr_eq(&lhs, &Instance::from_value(String::from("shared"))));
    }

    #[test]
    fn instance_satisfies_succeeds() {
        let instance = Instance::from_value(1u8);
        assert!(instance.satisfies(&InjectionKey::of::<u8>()));
        assert!(instance.satisfies(&InjectionKey::named("anything")));
        assert!(!instance.satisfies(&InjectionKey::of::<u16>()));
    }
}
