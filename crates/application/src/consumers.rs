//! Integration event consumers registered on the receive endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use content_core::AggregateRoot;
use content_events::{CommentAddedEvent, ConsumeContext, ConsumeError, Consumer};
use content_infra::persistence::CommandRepository;
use content_infra::{CommandScope, CommandStore};
use content_posts::PostId;

/// Bumps the post's comment count when a comment is added.
///
/// The increment and the inbox record commit together, so a redelivered
/// message is acknowledged without counting twice. A concurrent post update
/// surfaces as a conflict and is retried by the endpoint.
pub struct CommentAddedEventHandler {
    commands: Arc<dyn CommandStore>,
}

impl CommentAddedEventHandler {
    pub fn new(commands: Arc<dyn CommandStore>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Consumer<CommentAddedEvent> for CommentAddedEventHandler {
    fn name(&self) -> &'static str {
        "CommentAddedEventHandler"
    }

    #[instrument(
        skip_all,
        fields(
            message_id = %context.message_id(),
            post_id = %context.message().post_id,
            comment_id = %context.message().comment_id
        )
    )]
    async fn consume(&self, context: ConsumeContext<CommentAddedEvent>) -> Result<(), ConsumeError> {
        let scope = CommandScope::new(self.commands.clone());
        if scope
            .has_consumed(context.message_id(), self.name())
            .await
            .map_err(ConsumeError::failed)?
        {
            debug!("duplicate delivery ignored");
            return Ok(());
        }

        let event = context.message();
        let post_id = PostId::from_uuid(event.post_id);
        let posts = scope.posts();
        let mut post = posts
            .get(post_id)
            .await
            .map_err(ConsumeError::failed)?
            .ok_or_else(|| ConsumeError::failed("post.not_found"))?;

        let loaded_version = post.version();
        post.register_comment(event.occurred_at)
            .map_err(ConsumeError::failed)?;
        let comment_count = post.comment_count();

        posts
            .update_state(post, loaded_version)
            .map_err(ConsumeError::failed)?;
        scope.mark_consumed(context.message_id(), self.name());
        scope.unit_of_work().commit().await.map_err(ConsumeError::failed)?;

        info!(comment_count, "comment registered on post");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_events::{EventBus, InMemoryEventBus, IntegrationEvent};
    use content_infra::config::OutboxConfig;
    use content_infra::messaging::{
        BusMessage, DeliveryOutcome, InMemoryErrorQueue, ReceiveEndpoint, TokioRedeliveryScheduler,
    };
    use content_infra::read_model::GetAllPostQuery;
    use content_infra::workers::OutboxDispatcher;
    use uuid::Uuid;

    use crate::categories::CreateCategoryCommand;
    use crate::comments::AddCommentCommand;
    use crate::posts::{CreatePostCommand, GetPostByIdQuery};
    use crate::testing::mediator;
    use crate::Mediator;

    async fn post(mediator: &Mediator) -> PostId {
        let category_id = mediator
            .send(CreateCategoryCommand {
                title: "Rust".to_string(),
                description: None,
                parent_id: None,
            })
            .await
            .unwrap();
        mediator
            .send(CreatePostCommand {
                category_id,
                title: "Lifetimes".to_string(),
                summary: None,
                body: "Body".to_string(),
                author: "Sara".to_string(),
            })
            .await
            .unwrap()
    }

    fn context(message_id: Uuid, post_id: PostId) -> ConsumeContext<CommentAddedEvent> {
        ConsumeContext::new(
            message_id,
            0,
            CommentAddedEvent {
                comment_id: Uuid::now_v7(),
                post_id: post_id.as_uuid(),
                author_name: "Reza".to_string(),
                text: "Nice".to_string(),
                occurred_at: chrono::Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn redelivered_message_is_counted_once() {
        let (mediator, store) = mediator();
        let post_id = post(&mediator).await;
        let handler = CommentAddedEventHandler::new(store.clone());
        let message_id = Uuid::now_v7();

        handler.consume(context(message_id, post_id)).await.unwrap();
        handler.consume(context(message_id, post_id)).await.unwrap();

        let post = mediator.send(GetPostByIdQuery { id: post_id }).await.unwrap();
        assert_eq!(post.post.comment_count, 1);
    }

    #[tokio::test]
    async fn counting_a_comment_publishes_nothing() {
        let (mediator, store) = mediator();
        let post_id = post(&mediator).await;
        let before = store.outbox_messages().len();

        CommentAddedEventHandler::new(store.clone())
            .consume(context(Uuid::now_v7(), post_id))
            .await
            .unwrap();

        assert_eq!(store.outbox_messages().len(), before);
        let post = mediator.send(GetPostByIdQuery { id: post_id }).await.unwrap();
        assert_eq!(post.post.comment_count, 1);
    }

    #[tokio::test]
    async fn missing_post_fails_the_delivery() {
        let (_, store) = mediator();
        let handler = CommentAddedEventHandler::new(store);

        let err = handler
            .consume(context(Uuid::now_v7(), PostId::new()))
            .await
            .unwrap_err();

        assert_eq!(err, ConsumeError::Failed("post.not_found".to_string()));
    }

    #[tokio::test]
    async fn added_comment_reaches_the_post_through_outbox_and_endpoint() {
        let (mediator, store) = mediator();
        let post_id = post(&mediator).await;
        mediator
            .send(AddCommentCommand {
                post_id,
                author_name: "Reza".to_string(),
                text: "Great read".to_string(),
            })
            .await
            .unwrap();

        let bus = Arc::new(InMemoryEventBus::<BusMessage>::new());
        let mut subscription = bus.subscribe();
        let (scheduler, _redeliveries) = TokioRedeliveryScheduler::channel();
        let endpoint = ReceiveEndpoint::builder("ContentService")
            .consumer::<CommentAddedEvent, _>(Arc::new(CommentAddedEventHandler::new(store.clone())))
            .build(
                Arc::new(scheduler),
                Arc::new(InMemoryErrorQueue::for_endpoint("ContentService")),
            );

        let report = OutboxDispatcher::new(store.clone(), bus, &OutboxConfig::default())
            .poll_once()
            .await
            .unwrap();
        assert_eq!(report.published, 3);

        let mut consumed = 0;
        while let Ok(envelope) = subscription.try_recv() {
            let is_comment = envelope.message_type() == CommentAddedEvent::MESSAGE_TYPE;
            let outcome = endpoint.deliver(envelope).await;
            if is_comment {
                assert!(matches!(outcome, DeliveryOutcome::Consumed { attempts: 1 }));
                consumed += 1;
            } else {
                assert_eq!(outcome, DeliveryOutcome::Skipped);
            }
        }
        assert_eq!(consumed, 1);

        let listed = mediator.send(GetAllPostQuery::default()).await.unwrap();
        assert_eq!(listed[0].comment_count, 1);
    }
}
