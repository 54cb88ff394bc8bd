//! Infrastructure wiring: stores, bus, receive endpoint and background workers.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use content_application::{AppError, CommentAddedEventHandler, Mediator};
use content_events::{CommentAddedEvent, EventBus, InMemoryEventBus};
use content_infra::config::{BusTransport, HostEnvironment, PersistenceProvider};
use content_infra::db::{self, ExecutionStrategy};
use content_infra::messaging::{
    BusMessage, ErrorQueue, FaultPolicy, InMemoryErrorQueue, ReceiveEndpoint, RedeliveryScheduler,
    TokioRedeliveryScheduler,
};
use content_infra::outbox::{OutboxStore, PostgresOutboxStore};
use content_infra::persistence::{InMemoryContentStore, PostgresCommandStore};
use content_infra::read_model::PostgresQueryRepository;
use content_infra::workers::{OutboxDispatcher, WorkerHandle, spawn_receive_endpoint};
use content_infra::{CommandStore, QueryRepositories, Settings};

use crate::app::errors;
use crate::context::RequestCulture;
use crate::localization::Localizer;

/// Shared by every request handler.
pub struct AppServices {
    pub mediator: Mediator,
    pub localizer: Arc<Localizer>,
    pub environment: HostEnvironment,
    pub metrics: PrometheusHandle,
}

impl AppServices {
    /// Whether error responses may carry internal detail.
    pub fn detailed_errors(&self) -> bool {
        self.environment.is_development()
    }

    /// Localized error response for a failed request.
    pub fn error_response(&self, err: AppError, culture: &RequestCulture) -> axum::response::Response {
        errors::app_error_to_response(err, &self.localizer, culture, self.detailed_errors())
    }
}

/// Background tasks started with the services.
pub struct Workers(Vec<WorkerHandle>);

impl Workers {
    /// Stop every worker, waiting for in-flight work.
    pub async fn shutdown(self) {
        for worker in self.0 {
            let name = worker.name();
            worker.shutdown().await;
            info!(worker = name, "worker stopped");
        }
    }
}

struct Stores {
    commands: Arc<dyn CommandStore>,
    outbox: Arc<dyn OutboxStore>,
    queries: QueryRepositories,
}

async fn build_stores(settings: &Settings) -> anyhow::Result<Stores> {
    match settings.database.provider {
        PersistenceProvider::InMemory => {
            let store = Arc::new(InMemoryContentStore::new());
            info!("using in-memory persistence");
            Ok(Stores {
                commands: store.clone(),
                outbox: store.clone(),
                queries: QueryRepositories::from_backend(store),
            })
        }
        PersistenceProvider::Postgres => {
            let pool = db::connect(&settings.database)
                .await
                .context("failed to connect to Postgres")?;
            db::ensure_schema(&pool)
                .await
                .context("failed to create database schema")?;

            let strategy = ExecutionStrategy::from_config(&settings.database);
            info!(max_retry_count = strategy.max_retry_count(), "using Postgres persistence");
            Ok(Stores {
                commands: Arc::new(PostgresCommandStore::new(pool.clone(), strategy)),
                outbox: Arc::new(PostgresOutboxStore::new(pool.clone(), strategy)),
                queries: QueryRepositories::from_backend(Arc::new(PostgresQueryRepository::new(
                    pool, strategy,
                ))),
            })
        }
    }
}

struct Bus {
    transport: Arc<dyn EventBus<BusMessage>>,
    errors: Arc<dyn ErrorQueue>,
    scheduler: Arc<dyn RedeliveryScheduler>,
    /// Redeliveries fed straight to the endpoint by an in-process scheduler.
    redeliveries: UnboundedReceiver<BusMessage>,
}

fn build_bus(settings: &Settings) -> anyhow::Result<Bus> {
    let endpoint = settings.bus.endpoint.as_str();
    match settings.bus.transport {
        BusTransport::InMemory => {
            let (scheduler, redeliveries) = TokioRedeliveryScheduler::channel();
            info!(endpoint, "using in-memory bus");
            Ok(Bus {
                transport: Arc::new(InMemoryEventBus::new()),
                errors: Arc::new(InMemoryErrorQueue::for_endpoint(endpoint)),
                scheduler: Arc::new(scheduler),
                redeliveries,
            })
        }
        #[cfg(feature = "redis")]
        BusTransport::Redis => {
            use content_infra::event_bus::{
                RedisErrorQueue, RedisRedeliveryScheduler, RedisStreamsEventBus,
            };

            let redis = RedisStreamsEventBus::new(&settings.bus.url, endpoint)
                .context("failed to open Redis bus")?
                .with_consumer(&settings.bus.consumer_name);
            redis
                .ensure_consumer_group()
                .context("failed to create Redis consumer group")?;
            let errors = RedisErrorQueue::new(&settings.bus.url, endpoint)
                .context("failed to open Redis error queue")?;
            let scheduler = RedisRedeliveryScheduler::new(&settings.bus.url, endpoint)
                .context("failed to open Redis redelivery set")?;
            info!(endpoint, consumer = redis.consumer(), "using Redis Streams bus");

            // Due redeliveries come back through the stream; this channel stays closed.
            let (_, redeliveries) = tokio::sync::mpsc::unbounded_channel();
            Ok(Bus {
                transport: Arc::new(redis),
                errors: Arc::new(errors),
                scheduler: Arc::new(scheduler),
                redeliveries,
            })
        }
        #[cfg(not(feature = "redis"))]
        BusTransport::Redis => {
            anyhow::bail!("bus transport `redis` requires the `redis` feature")
        }
    }
}

/// Build the services and start the outbox dispatcher and receive endpoint.
pub async fn start(
    settings: &Settings,
    metrics: PrometheusHandle,
) -> anyhow::Result<(Arc<AppServices>, Workers)> {
    let stores = build_stores(settings).await?;
    let bus = build_bus(settings)?;

    let endpoint = ReceiveEndpoint::builder(settings.bus.endpoint.clone())
        .policy(FaultPolicy::from_config(&settings.consumer))
        .consumer::<CommentAddedEvent, _>(Arc::new(CommentAddedEventHandler::new(
            stores.commands.clone(),
        )))
        .build(bus.scheduler, bus.errors);

    // Subscribe before the dispatcher can publish anything.
    let receiver = spawn_receive_endpoint(
        Arc::new(endpoint),
        bus.transport.subscribe(),
        bus.redeliveries,
        settings.bus.prefetch_count,
    );
    let dispatcher = OutboxDispatcher::new(stores.outbox, bus.transport, &settings.outbox).spawn();

    let services = AppServices {
        mediator: Mediator::new(stores.commands, stores.queries),
        localizer: Arc::new(Localizer::from_config(&settings.localization)),
        environment: settings.environment,
        metrics,
    };

    Ok((Arc::new(services), Workers(vec![dispatcher, receiver])))
}
