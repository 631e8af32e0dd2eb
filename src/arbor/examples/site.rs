use std::sync::Arc;
use std::time::Duration;

use arbor::key::HasConstraints;
use arbor::prelude::*;
use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let root = Injector::new();
    root.install(SiteModule::new("arbor demo"))?;

    let request = root.child().scoped();
    let site = request.asynchronous().get::<Site>(&InjectionKey::of::<Site>()).await?;
    site.render()?;

    drop(request);
    root.close(None);
    Ok(())
}

struct SiteModule {
    site_name: &'static str,
}

impl SiteModule {
    fn new(site_name: &'static str) -> Self {
        Self { site_name }
    }
}

impl Module for SiteModule {
    fn configure(&self, configurer: &mut Configurer) -> Result<(), BoxError> {
        bind_key(InjectionKey::named("site_name"))
            .to_instance(self.site_name.to_owned())
            .set_on(configurer);

        for (lang, text) in [("en", "Hello World!"), ("zh", "你好世界!")] {
            bind::<Greeting>()
                .constrained("lang", lang)
                .to_instance(Greeting { text })
                .set_on(configurer);
        }

        bind::<Logger>().to_injectable::<Logger>().set_on(configurer);
        bind::<Cache>().to_injectable::<Cache>().set_on(configurer);
        bind::<Site>()
            .to_injectable::<Site>()
            .allow_multiple()
            .set_on(configurer);

        Ok(())
    }
}

struct Logger {
    site_name: Arc<String>,
}

#[injectable]
impl Logger {
    #[inject]
    fn new(#[named("site_name")] site_name: Arc<String>) -> Self {
        Self { site_name }
    }

    fn log(&self, message: &str) {
        tracing::info!(site = %self.site_name, "{message}");
    }
}

struct Greeting {
    text: &'static str,
}

struct Cache {
    logger: Arc<Logger>,
    arguments: Arguments,
    readiness: Readiness,
}

#[injectable(async_ready)]
impl Cache {
    #[inject]
    fn new(logger: Arc<Logger>, arguments: Arguments) -> Self {
        Self {
            logger,
            arguments,
            readiness: Readiness::new(ReadyHooks::BECOME_READY),
        }
    }
}

#[async_trait]
impl AsyncInjectable for Cache {
    fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    fn injected(&self) -> Option<&Arguments> {
        Some(&self.arguments)
    }

    async fn async_ready(self: Arc<Self>) -> Result<(), BoxError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.logger.log("cache warmed up");
        Ok(())
    }
}

struct Site {
    logger: Arc<Logger>,
    cache: Arc<Cache>,
    injector: Injector,
}

#[injectable]
impl Site {
    #[inject]
    fn new(logger: Arc<Logger>, cache: Arc<Cache>, injector: Injector) -> Self {
        Self {
            logger,
            cache,
            injector,
        }
    }

    fn render(&self) -> Result<(), InjectorError> {
        self.logger.log("rendering greetings from arbor managed objects:");
        let greetings = self.injector.filter_instantiate(
            Some(&Target::of::<Greeting>()),
            &HasConstraints::new(["lang"]),
            None,
            true,
        )?;
        for (key, instance) in greetings {
            if let Some(greeting) = instance.downcast::<Greeting>() {
                self.logger.log(&format!("{key}: {}", greeting.text));
            }
        }
        if self.cache.readiness().state() == ReadyState::Ready {
            self.logger.log("served from a ready cache");
        }
        Ok(())
    }
}
