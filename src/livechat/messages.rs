use crate::livechat::{
    LiveChat,
    accounts::User,
    error::{LiveChatError, Operation, Result},
    message_window::{LoadOlderOutcome, Message, MessagePayload},
};

/// Whether `message` was written by `user`.
///
/// Matches on the stable uid first, then on the stored email, then on the legacy
/// `owner` field written by clients that did not store the uid. Nothing belongs to an
/// absent user.
pub fn is_own_message(message: &Message, user: Option<&User>) -> bool {
    let Some(user) = user else {
        return false;
    };
    let payload = &message.payload;
    if payload.owner_uid.as_deref() == Some(user.uid.as_str()) {
        return true;
    }
    match user.email.as_deref() {
        Some(email) => {
            payload.owner_email.as_deref() == Some(email) || payload.owner == email
        }
        None => false,
    }
}

impl LiveChat {
    /// Sends the text in `draft` as a new message from the signed-in user.
    ///
    /// Whitespace-only drafts and calls without a signed-in user do nothing and leave
    /// the draft as it is. Once a write is attempted the draft is cleared, whether or
    /// not the write succeeds.
    ///
    /// # Arguments
    ///
    /// * `draft` - The input buffer. Its trimmed content becomes the message text.
    ///
    /// # Returns
    ///
    /// The key of the new message, or `None` when nothing was sent.
    pub async fn submit_message(&self, draft: &mut String) -> Result<Option<String>> {
        let Some(user) = self.current_user() else {
            return Ok(None);
        };
        let text = draft.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let Some(email) = user.email.clone() else {
            return Err(LiveChatError::MissingEmail);
        };

        let payload = MessagePayload {
            text: text.to_string(),
            owner: email.clone(),
            owner_uid: Some(user.uid.clone()),
            owner_email: Some(email),
            timestamp: self.clock.now(),
        };

        let result = self.store.push(&self.config.messages_path, payload).await;
        draft.clear();

        let key = result.map_err(|e| LiveChatError::remote(Operation::SendMessage, e))?;
        tracing::debug!(
            target: "livechat::messages::submit_message",
            "User {} sent message {}",
            user.uid,
            key
        );
        Ok(Some(key))
    }

    /// Deletes the message with `key`. The removal reaches the window through the live
    /// subscription.
    ///
    /// Ownership is not checked here: renderers only offer deletion for messages where
    /// [`LiveChat::is_own`] holds, and the store's access rules have the final say.
    pub async fn delete_message(&self, key: &str) -> Result<()> {
        let Some(user) = self.current_user() else {
            return Err(LiveChatError::NotSignedIn);
        };
        if let Some(message) = self.messages().iter().find(|m| m.id == key) {
            if !is_own_message(message, Some(&user)) {
                tracing::warn!(
                    target: "livechat::messages::delete_message",
                    "User {} is deleting message {} they do not own",
                    user.uid,
                    key
                );
            }
        }
        self.store
            .remove(&self.config.messages_path, key)
            .await
            .map_err(|e| LiveChatError::remote(Operation::DeleteMessage, e))
    }

    /// Fetches the page just before the oldest loaded message and merges it into the
    /// window.
    pub async fn load_older(&self) -> Result<LoadOlderOutcome> {
        if self.current_user().is_none() {
            return Ok(LoadOlderOutcome::NoBoundary);
        }
        self.live.load_older().await
    }

    /// Whether the current user wrote `message`
    pub fn is_own(&self, message: &Message) -> bool {
        is_own_message(message, self.current_user().as_ref())
    }

    /// Asks the generation route for a reply to the current window. A non-empty reply
    /// replaces `draft`; an empty one leaves it untouched.
    ///
    /// # Returns
    ///
    /// The suggested reply, or `None` without a signed-in user or when the model had
    /// nothing to say.
    pub async fn suggest_reply(&self, draft: &mut String) -> Result<Option<String>> {
        if self.current_user().is_none() {
            return Ok(None);
        }
        let history = self.messages();
        let reply = self
            .generator
            .generate_reply(&history, self.config.system_prompt.as_deref())
            .await
            .map_err(|e| LiveChatError::remote(Operation::SuggestReply, e))?;

        if reply.is_empty() {
            return Ok(None);
        }
        draft.clone_from(&reply);
        Ok(Some(reply))
    }
}
