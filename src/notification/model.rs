use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::channel::ChannelError;
use crate::notification::message::generate_message;

/// What happened to the recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewFollower,
    NewMention,
    NewDirectMessage,
    NewPostComment,
    NewCommentReply,
    NewReactionLike,
    NewReactionDislike,
    NewReactionLove,
    NewReactionLaugh,
    NewReactionAngry,
    NewReactionWow,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::NewFollower => "new_follower",
            NotificationType::NewMention => "new_mention",
            NotificationType::NewDirectMessage => "new_direct_message",
            NotificationType::NewPostComment => "new_post_comment",
            NotificationType::NewCommentReply => "new_comment_reply",
            NotificationType::NewReactionLike => "new_reaction_like",
            NotificationType::NewReactionDislike => "new_reaction_dislike",
            NotificationType::NewReactionLove => "new_reaction_love",
            NotificationType::NewReactionLaugh => "new_reaction_laugh",
            NotificationType::NewReactionAngry => "new_reaction_angry",
            NotificationType::NewReactionWow => "new_reaction_wow",
        }
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_follower" => Ok(NotificationType::NewFollower),
            "new_mention" => Ok(NotificationType::NewMention),
            "new_direct_message" => Ok(NotificationType::NewDirectMessage),
            "new_post_comment" => Ok(NotificationType::NewPostComment),
            "new_comment_reply" => Ok(NotificationType::NewCommentReply),
            "new_reaction_like" => Ok(NotificationType::NewReactionLike),
            "new_reaction_dislike" => Ok(NotificationType::NewReactionDislike),
            "new_reaction_love" => Ok(NotificationType::NewReactionLove),
            "new_reaction_laugh" => Ok(NotificationType::NewReactionLaugh),
            "new_reaction_angry" => Ok(NotificationType::NewReactionAngry),
            "new_reaction_wow" => Ok(NotificationType::NewReactionWow),
            _ => Err(format!("Invalid notification type: {}", s)),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the notification's `entity_id` points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Post,
    Comment,
    Reply,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Post => "post",
            EntityType::Comment => "comment",
            EntityType::Reply => "reply",
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(EntityType::Post),
            "comment" => Ok(EntityType::Comment),
            "reply" => Ok(EntityType::Reply),
            _ => Err(format!("Invalid entity type: {}", s)),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies which notifications may merge with each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub recipient_user_id: i64,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub notification_type: NotificationType,
}

/// A single domain event occurrence, consumed by the aggregation engine
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationRequest {
    /// User who will see the notification
    #[schema(example = "1")]
    pub recipient_user_id: i64,

    /// User whose action triggered this occurrence
    #[schema(example = "7")]
    pub sender_id: i64,

    #[serde(rename = "type")]
    pub notification_type: NotificationType,

    pub entity_type: EntityType,

    /// ID of the post, comment or reply
    #[schema(example = "42")]
    pub entity_id: i64,
}

impl NotificationRequest {
    pub fn validate(&self) -> Result<(), NotificationError> {
        if self.recipient_user_id <= 0 {
            return Err(NotificationError::ValidationError(
                "recipient_user_id must be a positive id".to_string(),
            ));
        }
        if self.sender_id <= 0 {
            return Err(NotificationError::ValidationError(
                "sender_id must be a positive id".to_string(),
            ));
        }
        if self.entity_id <= 0 {
            return Err(NotificationError::ValidationError(
                "entity_id must be a positive id".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            recipient_user_id: self.recipient_user_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            notification_type: self.notification_type,
        }
    }
}

/// The persisted, aggregated notification.
///
/// `actor_ids` and `message` are private: the only way to change the actor list is
/// [`Notification::push_actor`], which regenerates the message in the same step.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Notification {
    #[schema(example = "1")]
    id: Option<i64>,

    #[schema(example = "1")]
    recipient_user_id: i64,

    #[serde(rename = "type")]
    notification_type: NotificationType,

    entity_type: EntityType,

    #[schema(example = "42")]
    entity_id: i64,

    /// Actors in chronological order, most recent last
    #[schema(example = json!([7, 8]))]
    actor_ids: Vec<i64>,

    #[schema(example = "7 and 8 liked your post.")]
    message: String,

    is_read: bool,

    #[schema(value_type = DateTimeWrapper)]
    #[schema(example = "2023-01-01T12:00:00Z")]
    created_at: DateTime<Utc>,
}

impl Notification {
    /// First occurrence of a dedup key within a window
    pub fn new(request: &NotificationRequest, created_at: DateTime<Utc>) -> Self {
        let actor_ids = vec![request.sender_id];
        let message = generate_message(
            request.notification_type,
            request.entity_type,
            &actor_ids,
        );

        Self {
            id: None,
            recipient_user_id: request.recipient_user_id,
            notification_type: request.notification_type,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            actor_ids,
            message,
            is_read: false,
            created_at,
        }
    }

    /// Record another occurrence. Repeats of the same actor are kept.
    pub fn push_actor(&mut self, actor_id: i64) {
        self.actor_ids.push(actor_id);
        self.regenerate_message();
    }

    fn regenerate_message(&mut self) {
        self.message =
            generate_message(self.notification_type, self.entity_type, &self.actor_ids);
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn recipient_user_id(&self) -> i64 {
        self.recipient_user_id
    }

    pub fn notification_type(&self) -> NotificationType {
        self.notification_type
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn entity_id(&self) -> i64 {
        self.entity_id
    }

    pub fn actor_ids(&self) -> &[i64] {
        &self.actor_ids
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_read(&self) -> bool {
        self.is_read
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            recipient_user_id: self.recipient_user_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            notification_type: self.notification_type,
        }
    }

    pub(crate) fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub(crate) fn set_read(&mut self) {
        self.is_read = true;
    }
}

/// Database row for the `notifications` table. The stored message column is not
/// loaded; it is regenerated on conversion.
#[derive(Debug, FromRow)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: i64,
    pub actor_ids: Vec<i64>,
    #[sqlx(rename = "type")]
    pub notification_type: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = NotificationError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let notification_type = row.notification_type.parse::<NotificationType>().map_err(|e| {
            NotificationError::InternalError(format!("Notification {}: {}", row.id, e))
        })?;
        let entity_type = row.entity_type.parse::<EntityType>().map_err(|e| {
            NotificationError::InternalError(format!("Notification {}: {}", row.id, e))
        })?;
        if row.actor_ids.is_empty() {
            return Err(NotificationError::InternalError(format!(
                "Notification {} has no actors",
                row.id
            )));
        }

        let message = generate_message(notification_type, entity_type, &row.actor_ids);
        Ok(Self {
            id: Some(row.id),
            recipient_user_id: row.user_id,
            notification_type,
            entity_type,
            entity_id: row.entity_id,
            actor_ids: row.actor_ids,
            message,
            is_read: row.is_read,
            created_at: row.created_at,
        })
    }
}

/// One page of notifications, unread first
#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationsPageResponse {
    pub data: Vec<Notification>,

    /// Whether more unread notifications exist past this page
    #[serde(rename = "hasMore")]
    #[schema(example = "false")]
    pub has_more: bool,
}

/// Request to mark notifications as read
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct MarkReadRequest {
    #[schema(example = json!([1, 2, 3]))]
    pub notification_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnreadCountResponse {
    /// Unread notifications
    #[schema(example = "3")]
    pub count: i64,

    /// All notifications, read or not
    #[schema(example = "12")]
    pub total: i64,
}

/// Possible notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Notification not found")]
    NotFound,

    #[error("Notification was modified concurrently")]
    Conflict,

    #[error("Delivery error: {0}")]
    DeliveryError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<ChannelError> for NotificationError {
    fn from(err: ChannelError) -> Self {
        NotificationError::DeliveryError(err.to_string())
    }
}

/// Error response for the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NotificationErrorResponse {
    #[schema(example = "Notification not found")]
    pub error: String,

    #[schema(example = "NOT_FOUND")]
    pub code: String,
}
