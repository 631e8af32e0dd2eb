use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arbor::prelude::*;
use arbor::readiness::async_become_ready;
use async_trait::async_trait;

pub struct Config {
    pub url: &'static str,
}

#[injectable]
impl Config {
    #[inject]
    pub fn new() -> Self {
        Config {
            url: "postgres://localhost/app",
        }
    }
}

static DATABASE_READY_CALLS: AtomicUsize = AtomicUsize::new(0);

pub struct Database {
    pub config: Arc<Config>,
    standby: Option<Arc<Database>>,
    arguments: Arguments,
    readiness: Readiness,
}

#[injectable(async_ready)]
impl Database {
    #[inject]
    pub fn new(
        config: Arc<Config>,
        #[named("standby")] standby: Option<Arc<Database>>,
        arguments: Arguments,
    ) -> Self {
        Database {
            config,
            standby,
            arguments,
            readiness: Readiness::new(ReadyHooks::BOTH),
        }
    }
}

#[async_trait]
impl AsyncInjectable for Database {
    fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    fn injected(&self) -> Option<&Arguments> {
        Some(&self.arguments)
    }

    async fn async_resolve(self: Arc<Self>) -> Result<Option<Instance>, BoxError> {
        // check the connection
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(self.standby.clone().map(Instance::new))
    }

    async fn async_ready(self: Arc<Self>) -> Result<(), BoxError> {
        DATABASE_READY_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Warmup {
    calls: AtomicUsize,
    fail: bool,
    readiness: Readiness,
}

impl Warmup {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Warmup {
            calls: AtomicUsize::new(0),
            fail,
            readiness: Readiness::new(ReadyHooks::BECOME_READY),
        })
    }
}

#[async_trait]
impl AsyncInjectable for Warmup {
    fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    async fn async_ready(self: Arc<Self>) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        if self.fail {
            Err("warmup failed".into())
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct Handle {
    closed: AtomicBool,
}

impl Close for Handle {
    fn close(&self, _canceled: Option<&mut Vec<CanceledTask>>) -> Result<(), BoxError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn hash_of(key: &InjectionKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn with_config(injector: &Injector, options: ProviderOptions) {
    injector
        .add_provider(None, Provider::injectable::<Config>(), options)
        .unwrap();
}

#[test]
fn injector_get_shares_within_injector_succeeds() {
    let first = Injector::new();
    let second = Injector::new();
    with_config(&first, ProviderOptions::default());
    with_config(&second, ProviderOptions::default());

    let key = InjectionKey::of::<Config>();
    let a = first.get::<Config>(&key).unwrap();
    let b = second.get::<Config>(&key).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &first.get::<Config>(&key).unwrap()));
}

#[test]
fn injection_key_identity_succeeds() {
    assert!(InjectionKey::ptr_eq(
        &InjectionKey::of::<Config>(),
        &InjectionKey::of::<Config>()
    ));

    let one = InjectionKey::of::<Config>().with("x", 1);
    let again = InjectionKey::of::<Config>().with("x", 1);
    assert_eq!(one, again);
    assert_eq!(hash_of(&one), hash_of(&again));
    assert_ne!(one, InjectionKey::of::<Config>().with("x", 2));
}

#[test]
fn injector_get_allow_multiple_per_subtree_succeeds() {
    let root = Injector::new();
    with_config(&root, ProviderOptions::default().allow_multiple());
    let left = root.child();
    let right = root.child();

    let key = InjectionKey::of::<Config>();
    let from_left = left.get::<Config>(&key).unwrap();
    let from_right = right.get::<Config>(&key).unwrap();
    assert!(!Arc::ptr_eq(&from_left, &from_right));
    assert!(Arc::ptr_eq(&from_left, &left.get::<Config>(&key).unwrap()));
}

#[test]
fn injector_get_shared_by_children_succeeds() {
    let root = Injector::new();
    with_config(&root, ProviderOptions::default());
    let c1 = root.child();
    let c2 = root.child();

    let key = InjectionKey::of::<Config>();
    let from_c1 = c1.get::<Config>(&key).unwrap();
    let from_c2 = c2.get::<Config>(&key).unwrap();
    let from_root = root.get::<Config>(&key).unwrap();
    assert!(Arc::ptr_eq(&from_c1, &from_c2));
    assert!(Arc::ptr_eq(&from_c2, &from_root));
}

#[test]
fn injector_get_shared_when_root_resolves_first_succeeds() {
    let root = Injector::new();
    with_config(&root, ProviderOptions::default());
    let child = root.child().child();

    let key = InjectionKey::of::<Config>();
    let from_root = root.get::<Config>(&key).unwrap();
    let from_child = child.get::<Config>(&key).unwrap();
    assert!(Arc::ptr_eq(&from_root, &from_child));
}

#[test]
fn injector_get_instance_fails_when_key_is_missing() {
    let injector = Injector::new();
    let key = InjectionKey::of::<Config>();
    assert!(matches!(
        injector.get_instance(&key),
        Err(InjectorError::NotFound { .. })
    ));
    assert!(injector.get_instance(&key.optional()).unwrap().is_none());
}

#[test]
fn readiness_without_hooks_succeeds() {
    struct Plain {
        readiness: Readiness,
    }

    impl AsyncInjectable for Plain {
        fn readiness(&self) -> &Readiness {
            &self.readiness
        }
    }

    let instance = Instance::async_injectable(Arc::new(Plain {
        readiness: Readiness::new(ReadyHooks::NONE),
    }));
    assert_eq!(instance.ready_state(), ReadyState::Ready);

    let injector = Injector::new();
    injector
        .add_provider(
            Some(InjectionKey::named("plain")),
            instance.clone(),
            ProviderOptions::default(),
        )
        .unwrap();
    let resolved = injector
        .get_instance(&InjectionKey::named("plain"))
        .unwrap()
        .unwrap();
    assert!(Instance::ptr_eq(&resolved, &instance));
}

#[tokio::test(start_paused = true)]
async fn async_become_ready_concurrent_succeeds() {
    let warmup = Warmup::new(false);
    let instance = Instance::async_injectable(Arc::clone(&warmup));

    let (first, second) = tokio::join!(async_become_ready(&instance), async_become_ready(&instance));
    first.unwrap();
    second.unwrap();
    assert_eq!(warmup.calls.load(Ordering::SeqCst), 1);
    assert!(instance.is_ready());
}

#[tokio::test(start_paused = true)]
async fn async_become_ready_fails_when_hook_fails() {
    let warmup = Warmup::new(true);
    let instance = Instance::async_injectable(Arc::clone(&warmup));

    let (first, second) = tokio::join!(async_become_ready(&instance), async_become_ready(&instance));
    let (first, second) = (first.unwrap_err(), second.unwrap_err());
    assert!(matches!(first, InjectorError::BecomeReadyFailed { .. }));
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(warmup.calls.load(Ordering::SeqCst), 1);
    assert_eq!(instance.ready_state(), ReadyState::Resolved);
}

#[test]
fn injector_close_cascade_succeeds() {
    let root = Injector::new();
    let child = root.child();
    let handle = Arc::new(Handle::default());
    child
        .add_provider(
            Some(InjectionKey::named("handle")),
            Instance::new(Arc::clone(&handle)).with_close(handle.clone()),
            ProviderOptions::default(),
        )
        .unwrap();

    root.close(None);
    assert!(handle.closed.load(Ordering::SeqCst));
    assert!(child.is_closed());

    root.close(None);
    assert!(root.is_closed());
}

#[test]
fn injector_get_instance_fails_when_not_ready() {
    let injector = Injector::new();
    injector
        .add_provider(
            Some(InjectionKey::named("warmup")),
            Instance::async_injectable(Warmup::new(false)),
            ProviderOptions::default(),
        )
        .unwrap();

    assert!(matches!(
        injector.get_instance(&InjectionKey::named("warmup")),
        Err(InjectorError::AsyncRequired { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn async_injector_get_replaced_while_resolving_succeeds() {
    let injector = Injector::new();
    with_config(&injector, ProviderOptions::default());
    let standby = Arc::new(Database {
        config: Arc::new(Config { url: "standby" }),
        standby: None,
        arguments: Arguments::new(),
        readiness: Readiness::new(ReadyHooks::NONE),
    });
    injector
        .add_provider(
            Some(InjectionKey::named("standby")),
            Provider::shared(Arc::clone(&standby)),
            ProviderOptions::default(),
        )
        .unwrap();
    injector
        .add_provider(None, Provider::injectable::<Database>(), ProviderOptions::default())
        .unwrap();

    let database = injector
        .asynchronous()
        .get::<Database>(&InjectionKey::of::<Database>())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&database, &standby));
    assert_eq!(database.config.url, "standby");
    assert_eq!(DATABASE_READY_CALLS.load(Ordering::SeqCst), 0);
}

#[test]
fn injector_get_allow_multiple_when_root_resolves_first_succeeds() {
    let root = Injector::new();
    with_config(&root, ProviderOptions::default().allow_multiple());
    let child = root.child();

    let key = InjectionKey::of::<Config>();
    let from_root = root.get::<Config>(&key).unwrap();
    let from_child = child.get::<Config>(&key).unwrap();
    assert!(Arc::ptr_eq(&from_root, &from_child));
}

static LAZY_RESOLVE_CALLS: AtomicUsize = AtomicUsize::new(0);

struct Lazy {
    readiness: Readiness,
}

#[async_trait]
impl AsyncInjectable for Lazy {
    fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    async fn async_resolve(self: Arc<Self>) -> Result<Option<Instance>, BoxError> {
        let calls = LAZY_RESOLVE_CALLS.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Some(Instance::from_value(format!("connection {calls}"))))
    }
}

#[tokio::test(start_paused = true)]
async fn async_injector_get_instance_resolves_value_once_succeeds() {
    let injector = Injector::new();
    injector
        .add_provider(
            Some(InjectionKey::named("lazy")),
            Instance::async_injectable(Arc::new(Lazy {
                readiness: Readiness::new(ReadyHooks::RESOLVE),
            })),
            ProviderOptions::default(),
        )
        .unwrap();

    let facade = injector.asynchronous();
    let key = InjectionKey::named("lazy");
    let first = facade.get_instance_async(&key).await.unwrap().unwrap();
    let second = facade.get_instance_async(&key).await.unwrap().unwrap();
    assert_eq!(LAZY_RESOLVE_CALLS.load(Ordering::SeqCst), 1);
    assert!(Instance::ptr_eq(&first, &second));
    assert_eq!(first.downcast::<String>().unwrap().as_str(), "connection 0");

    let synchronous = injector.get_instance(&key).unwrap().unwrap();
    assert!(Instance::ptr_eq(&first, &synchronous));
}
