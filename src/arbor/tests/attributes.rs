use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arbor::prelude::*;

pub trait Storage: Send + Sync {
    fn mount(&self) -> &str;
}

pub struct Disk {
    mount: String,
}

impl Storage for Disk {
    fn mount(&self) -> &str {
        &self.mount
    }
}

#[injectable(provides(dyn Storage))]
impl Disk {
    #[inject]
    pub fn new(#[named("mount")] mount: Arc<String>) -> Self {
        Disk {
            mount: (*mount).clone(),
        }
    }
}

pub struct Service {
    pub disk: Arc<Disk>,
    pub port: Option<Arc<u16>>,
    pub injector: Injector,
    pub names: Vec<&'static str>,
}

#[injectable]
impl Service {
    #[inject]
    pub fn new(
        disk: Arc<Disk>,
        #[key(InjectionKey::of::<u16>().with("role", "admin"))] port: Option<Arc<u16>>,
        #[constructor_only] injector: Injector,
        arguments: Arguments,
    ) -> Self {
        Service {
            disk,
            port,
            injector,
            names: arguments.names().collect(),
        }
    }
}

pub struct Pool {
    pub mount: String,
}

#[injectable]
impl Pool {
    #[inject]
    pub async fn connect(disk: Arc<Disk>) -> Result<Self, io::Error> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Pool {
            mount: disk.mount().to_owned(),
        })
    }
}

#[derive(Debug)]
pub struct Broken;

#[injectable]
impl Broken {
    #[inject]
    pub fn new() -> Result<Self, io::Error> {
        Err(io::Error::other("no route to host"))
    }
}

#[derive(Default)]
pub struct Session {
    closed: AtomicBool,
}

#[injectable(close)]
impl Session {
    #[inject]
    pub fn new() -> Self {
        Session::default()
    }
}

impl Close for Session {
    fn close(&self, _canceled: Option<&mut Vec<CanceledTask>>) -> Result<(), BoxError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct StorageModule;

impl Module for StorageModule {
    fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
        bind_key(InjectionKey::named("mount"))
            .to_instance(String::from("/data"))
            .set_on(configurer);
        bind::<Disk>().to_injectable::<Disk>().set_on(configurer);
        bind::<Service>().to_injectable::<Service>().set_on(configurer);
        bind::<Pool>().to_injectable::<Pool>().set_on(configurer);
        bind::<Broken>().to_injectable::<Broken>().set_on(configurer);
        bind::<Session>().to_injectable::<Session>().set_on(configurer);
        Ok(())
    }
}

fn injector() -> Injector {
    let injector = Injector::new();
    injector.install(StorageModule).unwrap();
    injector
}

#[test]
fn injectable_dependencies_succeeds() {
    let dependencies = <Service as Injectable>::dependencies();
    let names: Vec<_> = dependencies.iter().map(|dependency| dependency.name()).collect();
    assert_eq!(names, vec!["disk", "port", "injector"]);

    let port = dependencies.get("port").unwrap();
    assert!(port.key().is_optional());
    assert!(port.is_exposed());
    assert!(!dependencies.get("injector").unwrap().is_exposed());
}

#[test]
fn injectable_construct_succeeds() {
    let injector = injector();
    let service = injector.get::<Service>(&InjectionKey::of::<Service>()).unwrap();

    assert_eq!(service.disk.mount(), "/data");
    assert!(service.port.is_none());
    assert!(service.injector.is_claimed());
    assert!(service.names.contains(&"disk"));
}

#[test]
fn injectable_provides_succeeds() {
    let injector = injector();
    let disk = injector.get::<Disk>(&InjectionKey::of::<Disk>()).unwrap();
    let storage = injector
        .get_instance(&InjectionKey::of::<dyn Storage>())
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&disk, &storage.downcast::<Disk>().unwrap()));
}

#[tokio::test(start_paused = true)]
async fn injectable_async_constructor_succeeds() {
    let injector = injector();
    assert!(matches!(
        injector.get::<Pool>(&InjectionKey::of::<Pool>()),
        Err(InjectorError::AsyncRequired { .. })
    ));

    let facade = injector.asynchronous();
    let pool = facade.get::<Pool>(&InjectionKey::of::<Pool>()).await.unwrap();
    assert_eq!(pool.mount, "/data");
    let again = facade.get::<Pool>(&InjectionKey::of::<Pool>()).await.unwrap();
    assert!(Arc::ptr_eq(&pool, &again));
}

#[test]
fn injectable_construct_fails_when_constructor_fails() {
    let injector = injector();
    let err = injector
        .get::<Broken>(&InjectionKey::of::<Broken>())
        .unwrap_err();
    assert!(matches!(
        &err,
        InjectorError::InjectionFailed { key, .. } if *key == InjectionKey::of::<Broken>()
    ));
}

#[test]
fn injectable_close_succeeds() {
    let injector = injector();
    let session = injector.get::<Session>(&InjectionKey::of::<Session>()).unwrap();
    assert!(!session.closed.load(Ordering::SeqCst));

    injector.close(None);
    assert!(session.closed.load(Ordering::SeqCst));
}

#[test]
fn injectable_override_succeeds() {
    let injector = injector();
    let disk = injector
        .construct_with::<Disk>(
            Overrides::new().with("mount", Provider::value(String::from("/backup"))),
        )
        .unwrap();
    assert_eq!(disk.mount(), "/backup");
}
