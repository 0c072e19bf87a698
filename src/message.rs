use serde::{Deserialize, Serialize};

/// A single entry in a thread's conversation log.
///
/// Messages accumulate in [`WorkflowState::messages`](crate::schema::WorkflowState)
/// through the append reducer: nodes contribute new messages, they are never
/// rewritten in place.
///
/// # Examples
///
/// ```
/// use flowloom::message::Message;
///
/// let msg = Message::user("summarize this thread");
/// assert!(msg.has_role(Message::USER));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Role of the sender ("user", "assistant", "system", or custom).
    pub role: String,
    /// Text content.
    pub content: String,
}

impl Message {
    pub const USER: &'static str = "user";
    pub const ASSISTANT: &'static str = "assistant";
    pub const SYSTEM: &'static str = "system";

    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// A message authored by the end user.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// A message produced by a node (typically via the language model).
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// A system instruction seeded into the state.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}
