//! Request dispatch.
//!
//! Every request type has exactly one handler, implemented as
//! `impl RequestHandler<R> for Mediator`, so dispatch is resolved at compile
//! time. [`Mediator::send`] wraps the handler in the validation pipeline.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use content_infra::{CommandScope, CommandStore, QueryRepositories};

use crate::error::{AppError, AppResult};
use crate::validation::Validate;

pub trait Request: Validate + Send + Sync + 'static {
    type Response: Send;

    /// Used in spans and metric labels.
    const NAME: &'static str;
}

#[async_trait]
pub trait RequestHandler<R: Request> {
    async fn handle(&self, request: R) -> AppResult<R::Response>;
}

#[derive(Clone)]
pub struct Mediator {
    commands: Arc<dyn CommandStore>,
    queries: QueryRepositories,
}

impl Mediator {
    pub fn new(commands: Arc<dyn CommandStore>, queries: QueryRepositories) -> Self {
        Self { commands, queries }
    }

    /// A fresh write scope for one command.
    pub(crate) fn scope(&self) -> CommandScope {
        CommandScope::new(self.commands.clone())
    }

    pub(crate) fn queries(&self) -> &QueryRepositories {
        &self.queries
    }

    /// Validate `request`, then hand it to its handler.
    #[instrument(skip_all, fields(request = R::NAME))]
    pub async fn send<R>(&self, request: R) -> AppResult<R::Response>
    where
        R: Request,
        Self: RequestHandler<R>,
    {
        let started = Instant::now();

        let failures = request.validate();
        let result = if failures.is_empty() {
            <Self as RequestHandler<R>>::handle(self, request).await
        } else {
            Err(AppError::Validation(failures))
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        match &result {
            Err(AppError::Persistence(err)) => warn!(error = %err, "request failed"),
            Err(err) => debug!(error = %err, outcome, "request rejected"),
            Ok(_) => debug!("request handled"),
        }

        metrics::counter!("content_mediator_requests_total", "request" => R::NAME, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("content_mediator_request_seconds", "request" => R::NAME)
            .record(started.elapsed().as_secs_f64());

        result
    }
}
