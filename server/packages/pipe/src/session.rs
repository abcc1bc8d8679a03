use std::collections::HashMap;

use adk_pipe_agent_client::AgentClient;
use adk_pipe_error::PipeError;
use tokio::sync::Mutex;
use tracing::info;

/// Conversation id → remote session id. A session is created on the remote
/// exactly once per conversation and the id reused for every later turn; no
/// local destruction, remote expiry governs the session's lifetime.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create the remote session backing `conversation_id`.
    ///
    /// The lock is held across the create call so concurrent first turns of
    /// the same conversation cannot race into two remote sessions.
    pub async fn ensure(
        &self,
        client: &AgentClient,
        token: &str,
        user_id: &str,
        conversation_id: &str,
        preferred_language: &str,
    ) -> Result<String, PipeError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session_id) = sessions.get(conversation_id) {
            return Ok(session_id.clone());
        }

        // Remote session ids mirror the host's conversation ids.
        let session_id = conversation_id.to_string();
        client
            .create_session(token, user_id, &session_id, preferred_language)
            .await?;
        info!(session_id = %session_id, user_id = %user_id, "created remote session");
        sessions.insert(conversation_id.to_string(), session_id.clone());
        Ok(session_id)
    }
}
