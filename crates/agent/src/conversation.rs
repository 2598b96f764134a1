use pgchat_core::domain::message::Message;

pub const SYSTEM_PREAMBLE: &str = "\
You are a PostgreSQL assistant for a single operator exploring a database.
- Answer general questions directly.
- When you need to know which tables or columns exist, call `fetch_schema`.
- To answer a question from data, call `run_sql` with exactly one read-only \
statement (SELECT, WITH, VALUES or TABLE). Never modify data or schema.
- Keep answers short and base them only on results you were given.";

/// Ordered message history with a fixed upper bound.
///
/// The system preamble is always the first message and is never evicted;
/// when the bound is exceeded the oldest non-system messages go first.
#[derive(Clone, Debug)]
pub struct ConversationState {
    messages: Vec<Message>,
    max_messages: usize,
    preamble: String,
}

impl ConversationState {
    pub fn new(preamble: impl Into<String>, max_messages: usize) -> Self {
        let preamble = preamble.into();
        Self {
            messages: vec![Message::system(preamble.clone())],
            // Room for the preamble plus one user/assistant pair.
            max_messages: max_messages.max(3),
            preamble,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Appends a completed turn and evicts down to the bound.
    pub fn commit_turn(&mut self, user: Message, assistant: Message) {
        self.messages.push(user);
        self.messages.push(assistant);
        self.evict();
    }

    pub fn clear(&mut self) {
        self.messages = vec![Message::system(self.preamble.clone())];
    }

    fn evict(&mut self) {
        while self.messages.len() > self.max_messages {
            match self.messages.iter().position(|message| !message.is_system()) {
                Some(index) => {
                    self.messages.remove(index);
                }
                None => break,
            }
        }
    }
}
