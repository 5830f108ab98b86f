use std::sync::Arc;

use tracing::{debug, info, warn};

use nexuscrm_core::ModuleKind;
use nexuscrm_events::{DomainEvent, EventTypeRegistry, HandlerError};
use nexuscrm_infra::{
    CrossModuleConfig, InMemoryDeadLetterStore, InMemorySharedCache, SharedCache, ThreadScheduler,
    TransactionManager,
};
use nexuscrm_integration::{
    EventDispatcher, HandlerSet, InMemoryModuleStore, IntegrationService, ModuleWriter,
    OrchestrationService, OwnershipRules, RelationshipService, ValidationCache, WriteStep,
};

pub type AppCache = Arc<dyn SharedCache>;

pub type AppDispatcher = EventDispatcher<
    Arc<IntegrationService>,
    AppCache,
    Arc<ThreadScheduler>,
    Arc<InMemoryDeadLetterStore>,
>;

pub type AppValidation = ValidationCache<AppCache, OwnershipRules<Arc<InMemoryModuleStore>>>;

/// Everything the HTTP handlers reach, wired once at startup.
pub struct AppServices {
    pub store: Arc<InMemoryModuleStore>,
    pub integration: Arc<IntegrationService>,
    pub dispatcher: AppDispatcher,
    pub validation: Arc<AppValidation>,
    pub relationships: RelationshipService<Arc<InMemoryModuleStore>>,
    pub orchestration: OrchestrationService,
}

pub fn build_services(config: &CrossModuleConfig) -> anyhow::Result<AppServices> {
    let store = Arc::new(InMemoryModuleStore::new());
    let cache = shared_cache(config)?;
    let scheduler = Arc::new(ThreadScheduler::spawn("nexuscrm-retry")?);

    let handlers = Arc::new(HandlerSet::new());
    handlers.register_listener("activity.feed", activity_feed(store.clone()));
    handlers.register_listener(
        "analytics.tracker",
        |event: &DomainEvent| -> Result<(), HandlerError> {
            debug!(
                event_id = %event.event_id(),
                event_type = %event.event_type(),
                user_id = %event.user_id(),
                "analytics event tracked"
            );
            Ok(())
        },
    );

    let integration = Arc::new(IntegrationService::new(
        Arc::new(EventTypeRegistry::with_defaults()),
        handlers.clone(),
    ));

    let dispatcher = EventDispatcher::new(
        integration.clone(),
        cache.clone(),
        scheduler,
        Arc::new(InMemoryDeadLetterStore::new()),
        handlers,
        &config.dispatcher,
    );

    let validation = Arc::new(ValidationCache::with_ttl(
        cache,
        OwnershipRules::new(store.clone()),
        config.validation.cache_ttl(),
    ));

    let orchestration = OrchestrationService::new(
        store.clone(),
        store.clone(),
        validation.clone(),
        Arc::new(dispatcher.clone()),
        integration.clone(),
    );

    info!(
        max_retries = config.dispatcher.max_retries,
        retry_delay_secs = config.dispatcher.retry_delay_secs,
        validation_ttl_secs = config.validation.cache_ttl_secs,
        "cross-module services ready"
    );

    Ok(AppServices {
        relationships: RelationshipService::new(store.clone()),
        store,
        integration,
        dispatcher,
        validation,
        orchestration,
    })
}

#[cfg(feature = "redis")]
fn shared_cache(config: &CrossModuleConfig) -> anyhow::Result<AppCache> {
    match &config.redis_url {
        Some(url) => {
            let cache = nexuscrm_infra::RedisSharedCache::new(url, "nexuscrm")?;
            info!("using redis shared cache");
            Ok(Arc::new(cache))
        }
        None => Ok(Arc::new(InMemorySharedCache::new())),
    }
}

#[cfg(not(feature = "redis"))]
fn shared_cache(config: &CrossModuleConfig) -> anyhow::Result<AppCache> {
    if config.redis_url.is_some() {
        warn!("NEXUSCRM_REDIS_URL set but the redis feature is disabled; using in-memory cache");
    }
    Ok(Arc::new(InMemorySharedCache::new()))
}

/// Records one `activities` entry per event, in its own transaction.
fn activity_feed(
    store: Arc<InMemoryModuleStore>,
) -> impl Fn(&DomainEvent) -> Result<(), HandlerError> + Send + Sync + 'static {
    move |event: &DomainEvent| -> Result<(), HandlerError> {
        let step = WriteStep::new("activity", ModuleKind::Activities)
            .user(event.user_id())
            .project(event.project_id())
            .attr("event_type", event.event_type())
            .attr("event_id", event.event_id().to_string());

        let tx = store
            .begin()
            .map_err(|e| HandlerError::retryable(e.to_string()))?;
        if let Err(e) = store.write(&tx, &step) {
            if let Err(rollback) = store.rollback(&tx) {
                warn!(%tx, error = %rollback, "activity rollback failed");
            }
            return Err(HandlerError::failed(format!("{e:#}")));
        }
        store
            .commit(&tx)
            .map_err(|e| HandlerError::retryable(e.to_string()))
    }
}
