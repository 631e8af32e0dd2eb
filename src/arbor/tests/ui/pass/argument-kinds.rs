use std::sync::Arc;

use arbor::prelude::*;

pub trait Storage: Send + Sync {}

pub struct Disk;

impl Storage for Disk {}

#[injectable(provides(dyn Storage))]
impl Disk {
    #[inject]
    pub fn new() -> Self {
        Disk
    }
}

pub struct Service {
    pub disk: Arc<Disk>,
}

#[injectable]
impl Service {
    #[inject]
    pub fn new(
        disk: Arc<Disk>,
        #[named("label")] _label: Arc<String>,
        #[key(InjectionKey::of::<u16>().with("role", "port"))] _port: Option<Arc<u16>>,
        #[constructor_only] _injector: Injector,
        _facade: AsyncInjector,
        _arguments: Arguments,
    ) -> Self {
        Service { disk }
    }
}

fn main() {}
