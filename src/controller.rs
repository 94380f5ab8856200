//! UI-facing controller.
//!
//! Holds the credentials, the thread/assistant lists and the current
//! selection, and keeps exactly one [`StreamingSessionClient`] pointed at
//! that selection. UI layers call into it and observe the session through
//! [`StreamingSessionClient::subscribe`].

use tracing::info;

use crate::api::{ApiClient, AssistantRecord, ThreadRecord, UserRead};
use crate::error::{Error, Result, SendRejected};
use crate::session::{SessionIdentity, SessionSettings, StreamingSessionClient};
use crate::transport::{Connector, NORMAL_CLOSURE};

/// Close reason sent when the user logs out.
pub const LOGOUT_REASON: &str = "logout";

#[derive(Debug)]
pub struct ChatController<C> {
    api: ApiClient,
    session: StreamingSessionClient<C>,
    token: Option<String>,
    user: Option<UserRead>,
    threads: Vec<ThreadRecord>,
    assistants: Vec<AssistantRecord>,
    current_thread: Option<String>,
    current_assistant: Option<String>,
}

impl<C: Connector> ChatController<C> {
    pub fn new(api: ApiClient, connector: C, settings: SessionSettings) -> Self {
        Self {
            api,
            session: StreamingSessionClient::new(connector, settings),
            token: None,
            user: None,
            threads: Vec::new(),
            assistants: Vec::new(),
            current_thread: None,
            current_assistant: None,
        }
    }

    /// Log in, then load the user and both lists. The first assistant
    /// becomes the current one.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<UserRead> {
        let token = self.api.auth().login(email, password).await?;
        self.use_token(token.access_token).await
    }

    /// Adopt an already issued access token.
    pub async fn use_token(&mut self, token: impl Into<String>) -> Result<UserRead> {
        let token = token.into();
        let user = self.api.auth().me(&token).await?;
        info!(name: "controller.authenticated", email = %user.email, "Authenticated");
        self.token = Some(token);
        self.user = Some(user.clone());
        self.refresh_threads().await?;
        self.refresh_assistants().await?;
        Ok(user)
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<UserRead> {
        let user = self.api.auth().register(email, password).await?;
        info!(name: "controller.registered", email = %user.email, "Account registered");
        Ok(user)
    }

    pub async fn refresh_threads(&mut self) -> Result<&[ThreadRecord]> {
        let token = require(self.token.as_deref())?;
        self.threads = self.api.threads().list(token).await?;
        Ok(&self.threads)
    }

    /// Reload assistants; the current assistant falls back to the first one
    /// when unset or no longer listed.
    pub async fn refresh_assistants(&mut self) -> Result<&[AssistantRecord]> {
        let token = require(self.token.as_deref())?;
        self.assistants = self.api.assistants().list(token).await?;
        let still_listed = self.current_assistant.as_ref().is_some_and(|current| {
            self.assistants
                .iter()
                .any(|a| &a.openai_assistant_id == current)
        });
        if !still_listed {
            self.current_assistant = self
                .assistants
                .first()
                .map(|a| a.openai_assistant_id.clone());
        }
        Ok(&self.assistants)
    }

    /// Create a thread, add it to the list and switch to it.
    pub async fn create_thread(&mut self) -> Result<ThreadRecord> {
        let token = require(self.token.as_deref())?;
        let thread = self.api.threads().create(token).await?;
        info!(name: "controller.thread_created", thread_id = %thread.openai_thread_id, "Thread created");
        self.threads.push(thread.clone());
        self.select_thread(thread.openai_thread_id.clone()).await?;
        Ok(thread)
    }

    /// Switch threads. Reopens the session when an assistant is selected;
    /// selecting the current thread again reconnects.
    pub async fn select_thread(&mut self, thread_id: impl Into<String>) -> Result<()> {
        self.current_thread = Some(thread_id.into());
        self.reopen().await
    }

    /// Switch assistants. Reopens the session when a thread is selected.
    pub async fn select_assistant(&mut self, assistant_id: impl Into<String>) -> Result<()> {
        self.current_assistant = Some(assistant_id.into());
        self.reopen().await
    }

    async fn reopen(&mut self) -> Result<()> {
        let token = require(self.token.as_deref())?;
        let (Some(thread_id), Some(assistant_id)) = (&self.current_thread, &self.current_assistant)
        else {
            return Ok(());
        };
        let identity = SessionIdentity::new(thread_id.clone(), assistant_id.clone());
        self.session.open(identity, token).await
    }
}

impl<C> ChatController<C> {
    pub fn send_message(&self, text: &str) -> std::result::Result<(), SendRejected> {
        self.session.send(text)
    }

    /// End the session and forget every credential and list.
    pub fn logout(&mut self) {
        self.session.close_with(Some(NORMAL_CLOSURE), Some(LOGOUT_REASON));
        if let Some(user) = self.user.take() {
            info!(name: "controller.logout", email = %user.email, "Logged out");
        }
        self.token = None;
        self.threads.clear();
        self.assistants.clear();
        self.current_thread = None;
        self.current_assistant = None;
    }

    pub fn session(&self) -> &StreamingSessionClient<C> {
        &self.session
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn user(&self) -> Option<&UserRead> {
        self.user.as_ref()
    }

    pub fn threads(&self) -> &[ThreadRecord] {
        &self.threads
    }

    pub fn assistants(&self) -> &[AssistantRecord] {
        &self.assistants
    }

    pub fn current_thread(&self) -> Option<&str> {
        self.current_thread.as_deref()
    }

    pub fn current_assistant(&self) -> Option<&str> {
        self.current_assistant.as_deref()
    }
}

fn require(token: Option<&str>) -> Result<&str> {
    token.ok_or(Error::NotAuthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionState;
    use crate::transport::{LoopbackAcceptor, LoopbackConnector, OutboundFrame};

    fn controller() -> (ChatController<LoopbackConnector>, LoopbackAcceptor) {
        let (connector, acceptor) = LoopbackConnector::pair();
        // Never contacted by these tests.
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        let controller = ChatController::new(api, connector, SessionSettings::default());
        (controller, acceptor)
    }

    fn authenticated() -> (ChatController<LoopbackConnector>, LoopbackAcceptor) {
        let (mut controller, acceptor) = controller();
        controller.token = Some("jwt".to_string());
        (controller, acceptor)
    }

    #[tokio::test]
    async fn test_selection_requires_token() {
        let (mut controller, _acceptor) = controller();
        let err = controller.select_thread("thread_1").await.unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));
        assert_eq!(controller.session().connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_session_opens_once_both_ids_known() {
        let (mut controller, mut acceptor) = authenticated();

        controller.select_thread("thread_1").await.unwrap();
        assert!(acceptor.try_accept().is_none());

        controller.select_assistant("asst_1").await.unwrap();
        let peer = acceptor.accept().await.unwrap();
        assert_eq!(peer.request().thread_id, "thread_1");
        assert_eq!(peer.request().assistant_id, "asst_1");
        assert_eq!(peer.request().token, "jwt");
        assert!(controller.session().connection_state().is_open());
    }

    #[tokio::test]
    async fn test_switching_thread_replaces_connection() {
        let (mut controller, mut acceptor) = authenticated();
        controller.select_assistant("asst_1").await.unwrap();
        controller.select_thread("thread_1").await.unwrap();
        let mut first = acceptor.accept().await.unwrap();

        controller.send_message("hi").unwrap();
        controller.select_thread("thread_2").await.unwrap();

        assert!(controller.session().transcript().is_empty());
        assert_eq!(first.recv().await, Some(OutboundFrame::Text("hi".to_string())));
        assert!(matches!(first.recv().await, Some(OutboundFrame::Close { .. })));
        let second = acceptor.accept().await.unwrap();
        assert_eq!(second.request().thread_id, "thread_2");
    }

    #[tokio::test]
    async fn test_logout_closes_and_forgets() {
        let (mut controller, mut acceptor) = authenticated();
        controller.select_assistant("asst_1").await.unwrap();
        controller.select_thread("thread_1").await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();

        controller.logout();
        assert_eq!(
            controller.session().connection_state(),
            ConnectionState::Closed {
                code: Some(NORMAL_CLOSURE),
                reason: LOGOUT_REASON.to_string()
            }
        );
        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Close {
                code: NORMAL_CLOSURE,
                reason: LOGOUT_REASON.to_string()
            })
        );
        assert!(!controller.is_authenticated());
        assert_eq!(controller.current_thread(), None);
        assert_eq!(controller.send_message("hello"), Err(SendRejected::NotConnected));
        assert!(matches!(
            controller.select_thread("thread_1").await,
            Err(Error::NotAuthenticated)
        ));
    }
}
