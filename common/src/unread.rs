use std::collections::HashSet;

/// Minimal view of a chat message needed for unread counting.
#[derive(Debug, Clone, Copy)]
pub struct MessageView<'a> {
    /// `None` marks a system message.
    pub sender_id: Option<&'a str>,
    /// Position in the chat. Later messages always have a larger `seq`.
    pub seq: i64,
}

/// Counts messages the reader has not seen yet.
///
/// `last_read` is the highest `seq` the reader had seen when they last
/// opened the chat, or `None` if they never did. A message counts when its
/// `seq` is above that mark, it was not sent by the reader, it is not a
/// system message and its sender is not in `blocked`.
pub fn count_unread<'a>(
    messages: impl IntoIterator<Item = MessageView<'a>>,
    reader: &str,
    last_read: Option<i64>,
    blocked: &HashSet<String>,
) -> usize {
    messages
        .into_iter()
        .filter(|m| last_read.is_none_or(|read| m.seq > read))
        .filter(|m| match m.sender_id {
            None => false,
            Some(sender) => sender != reader && !blocked.contains(sender),
        })
        .count()
}
