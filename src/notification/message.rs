use crate::notification::model::{EntityType, NotificationType};

/// Render the human-readable text for a notification.
///
/// This is a pure function of the type, the entity and the current actor list, and
/// is the only place notification text is produced. Callers re-run it whenever the
/// actor list changes and whenever a notification is loaded from storage.
pub fn generate_message(
    notification_type: NotificationType,
    entity_type: EntityType,
    actor_ids: &[i64],
) -> String {
    match notification_type {
        NotificationType::NewFollower => "You have a new follower!".to_string(),
        NotificationType::NewMention => format!("You were mentioned in a {}.", entity_type),
        NotificationType::NewDirectMessage => "You have a new direct message.".to_string(),
        NotificationType::NewPostComment => "Someone commented on your post.".to_string(),
        NotificationType::NewCommentReply => "Someone replied to your comment.".to_string(),
        NotificationType::NewReactionLike
        | NotificationType::NewReactionDislike
        | NotificationType::NewReactionLove
        | NotificationType::NewReactionLaugh
        | NotificationType::NewReactionAngry
        | NotificationType::NewReactionWow => {
            reaction_message(reaction_verb(notification_type), entity_type, actor_ids)
        }
    }
}

fn reaction_verb(notification_type: NotificationType) -> &'static str {
    match notification_type {
        NotificationType::NewReactionLike => "liked",
        NotificationType::NewReactionDislike => "disliked",
        NotificationType::NewReactionLove => "loved",
        NotificationType::NewReactionLaugh => "laughed at",
        NotificationType::NewReactionAngry => "reacted angrily to",
        NotificationType::NewReactionWow => "were amazed by",
        _ => "reacted to",
    }
}

fn reaction_message(verb: &str, entity_type: EntityType, actor_ids: &[i64]) -> String {
    match actor_ids {
        // Not reachable through ingestion, a notification always has an actor
        [] => format!("Someone {} your {}.", verb, entity_type),
        [only] => format!("{} {} your {}.", only, verb, entity_type),
        [first, second] => format!("{} and {} {} your {}.", first, second, verb, entity_type),
        [first, second, rest @ ..] => format!(
            "{}, {} and {} more {} your {}.",
            first,
            second,
            rest.len(),
            verb,
            entity_type
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_messages_ignore_actor_count() {
        assert_eq!(
            generate_message(NotificationType::NewFollower, EntityType::Post, &[1, 2, 3]),
            "You have a new follower!"
        );
        assert_eq!(
            generate_message(NotificationType::NewDirectMessage, EntityType::Post, &[1]),
            "You have a new direct message."
        );
        assert_eq!(
            generate_message(NotificationType::NewPostComment, EntityType::Post, &[1, 2]),
            "Someone commented on your post."
        );
        assert_eq!(
            generate_message(NotificationType::NewCommentReply, EntityType::Comment, &[9]),
            "Someone replied to your comment."
        );
    }

    #[test]
    fn test_mention_names_the_entity() {
        assert_eq!(
            generate_message(NotificationType::NewMention, EntityType::Comment, &[4]),
            "You were mentioned in a comment."
        );
        assert_eq!(
            generate_message(NotificationType::NewMention, EntityType::Reply, &[4]),
            "You were mentioned in a reply."
        );
    }

    #[test]
    fn test_reaction_pluralization() {
        let like = NotificationType::NewReactionLike;

        assert_eq!(
            generate_message(like, EntityType::Post, &[7]),
            "7 liked your post."
        );
        assert_eq!(
            generate_message(like, EntityType::Post, &[7, 8]),
            "7 and 8 liked your post."
        );
        assert_eq!(
            generate_message(like, EntityType::Post, &[7, 8, 9]),
            "7, 8 and 1 more liked your post."
        );
        assert_eq!(
            generate_message(like, EntityType::Comment, &[7, 8, 9, 10, 11]),
            "7, 8 and 3 more liked your comment."
        );
    }

    #[test]
    fn test_reaction_verbs() {
        let cases = [
            (NotificationType::NewReactionDislike, "1 disliked your reply."),
            (NotificationType::NewReactionLove, "1 loved your reply."),
            (NotificationType::NewReactionLaugh, "1 laughed at your reply."),
            (NotificationType::NewReactionAngry, "1 reacted angrily to your reply."),
            (NotificationType::NewReactionWow, "1 were amazed by your reply."),
        ];

        for (notification_type, expected) in cases {
            assert_eq!(
                generate_message(notification_type, EntityType::Reply, &[1]),
                expected
            );
        }
    }

    #[test]
    fn test_reaction_without_actors_falls_back_to_someone() {
        assert_eq!(
            generate_message(NotificationType::NewReactionLove, EntityType::Post, &[]),
            "Someone loved your post."
        );
    }

    #[test]
    fn test_repeated_actor_counts_as_fresh_occurrence() {
        assert_eq!(
            generate_message(NotificationType::NewReactionLike, EntityType::Post, &[5, 5]),
            "5 and 5 liked your post."
        );
    }
}
