//! IMAP mailbox access for the ingestion worker.
//!
//! One connection per poll: connect, select, fetch unseen, mark seen, logout.

use async_imap::Session;
use async_native_tls::{TlsConnector, TlsStream};
use async_std::net::TcpStream;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::EmailConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_QUERY: &str = "(UID FLAGS ENVELOPE BODYSTRUCTURE BODY.PEEK[])";

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("IMAP connection failed: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IMAP authentication failed: {0}")]
    Auth(String),

    #[error("IMAP error: {0}")]
    Imap(String),
}

/// Raw message as fetched from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: u32,
    pub raw: Vec<u8>,
}

#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Open an authenticated session with the inbox selected read-write.
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

#[async_trait]
pub trait MailboxSession: Send {
    /// Messages without `\Seen`, in ascending UID order. Fetching does not set `\Seen`.
    async fn fetch_unseen(&mut self) -> Result<Vec<FetchedMessage>, MailboxError>;

    /// Single `UID STORE +FLAGS (\Seen)` over all of `uids`.
    async fn mark_seen(&mut self, uids: &[u32]) -> Result<(), MailboxError>;

    async fn logout(self: Box<Self>) -> Result<(), MailboxError>;
}

#[derive(Debug, Clone)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    pub insecure_skip_verify: bool,
    pub folder: String,
}

impl From<&EmailConfig> for ImapSettings {
    fn from(config: &EmailConfig) -> Self {
        Self {
            host: config.imap_host.clone(),
            port: config.imap_port,
            username: config.imap_username.clone(),
            password: config.imap_password.clone(),
            use_tls: config.imap_use_ssl,
            insecure_skip_verify: config.imap_insecure_skip_verify,
            folder: config.imap_inbox_folder.clone(),
        }
    }
}

pub struct ImapConnector {
    settings: ImapSettings,
}

impl ImapConnector {
    #[must_use]
    pub const fn new(settings: ImapSettings) -> Self {
        Self { settings }
    }

    async fn open(&self) -> Result<ImapSession, MailboxError> {
        let s = &self.settings;
        let addr = format!("{}:{}", s.host, s.port);
        debug!("Connecting to IMAP server at {}", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| MailboxError::Connection(format!("Failed to connect to {addr}: {e}")))?;

        let mut session = if s.use_tls {
            let tls = TlsConnector::new()
                .danger_accept_invalid_certs(s.insecure_skip_verify)
                .danger_accept_invalid_hostnames(s.insecure_skip_verify);
            let tls_stream = tls
                .connect(&s.host, stream)
                .await
                .map_err(|e| MailboxError::Tls(format!("TLS handshake failed: {e}")))?;

            let mut client = async_imap::Client::new(tls_stream);
            read_greeting(&mut client).await?;
            let session = client
                .login(&s.username, &s.password)
                .await
                .map_err(|(e, _)| MailboxError::Auth(e.to_string()))?;
            ImapSession::Tls(session)
        } else {
            let mut client = async_imap::Client::new(stream);
            read_greeting(&mut client).await?;
            let session = client
                .login(&s.username, &s.password)
                .await
                .map_err(|(e, _)| MailboxError::Auth(e.to_string()))?;
            ImapSession::Plain(session)
        };

        session.select(&s.folder).await?;
        info!(host = %s.host, folder = %s.folder, tls = s.use_tls, "IMAP session opened");
        Ok(session)
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let session = tokio::time::timeout(CONNECT_TIMEOUT, self.open())
            .await
            .map_err(|_| MailboxError::Connection("Timed out connecting to IMAP server".to_string()))??;
        Ok(Box::new(session))
    }
}

async fn read_greeting<T>(client: &mut async_imap::Client<T>) -> Result<(), MailboxError>
where
    T: futures::io::AsyncRead + futures::io::AsyncWrite + Unpin + std::fmt::Debug + Send,
{
    client
        .read_response()
        .await
        .ok_or_else(|| MailboxError::Imap("No greeting from server".to_string()))?
        .map_err(|e| MailboxError::Imap(format!("IO error reading greeting: {e}")))?;
    Ok(())
}

enum ImapSession {
    Tls(Session<TlsStream<TcpStream>>),
    Plain(Session<TcpStream>),
}

/// Run the same body against either transport.
macro_rules! with_session {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            ImapSession::Tls($s) => $body,
            ImapSession::Plain($s) => $body,
        }
    };
}

impl ImapSession {
    async fn select(&mut self, folder: &str) -> Result<(), MailboxError> {
        let mailbox = with_session!(self, s => s.select(folder).await)
            .map_err(|e| MailboxError::Imap(format!("Failed to select folder '{folder}': {e}")))?;
        debug!("Selected folder '{}' with {} messages", folder, mailbox.exists);
        Ok(())
    }

    async fn search_unseen(&mut self) -> Result<Vec<u32>, MailboxError> {
        let uids = with_session!(self, s => s.uid_search("UNSEEN").await)
            .map_err(|e| MailboxError::Imap(format!("Search failed: {e}")))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl MailboxSession for ImapSession {
    #[instrument(skip(self))]
    async fn fetch_unseen(&mut self) -> Result<Vec<FetchedMessage>, MailboxError> {
        let uids = self.search_unseen().await?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let set = uid_set(&uids);
        let fetches: Vec<_> = with_session!(self, s => {
            s.uid_fetch(&set, FETCH_QUERY)
                .await
                .map_err(|e| MailboxError::Imap(format!("Failed to fetch messages: {e}")))?
                .try_collect()
                .await
                .map_err(|e| MailboxError::Imap(format!("Failed to collect messages: {e}")))?
        });

        let mut messages: Vec<FetchedMessage> = fetches
            .iter()
            .filter_map(|fetch| match (fetch.uid, fetch.body()) {
                (Some(uid), Some(body)) => Some(FetchedMessage {
                    uid,
                    raw: body.to_vec(),
                }),
                _ => None,
            })
            .collect();
        messages.sort_by_key(|m| m.uid);

        debug!("Fetched {} unseen messages", messages.len());
        Ok(messages)
    }

    async fn mark_seen(&mut self, uids: &[u32]) -> Result<(), MailboxError> {
        if uids.is_empty() {
            return Ok(());
        }

        let set = uid_set(uids);
        let _: Vec<_> = with_session!(self, s => {
            s.uid_store(&set, "+FLAGS (\\Seen)")
                .await
                .map_err(|e| MailboxError::Imap(format!("Failed to mark seen: {e}")))?
                .try_collect()
                .await
                .map_err(|e| MailboxError::Imap(format!("Failed to collect store response: {e}")))?
        });

        Ok(())
    }

    async fn logout(self: Box<Self>) -> Result<(), MailboxError> {
        let mut session = *self;
        with_session!(&mut session, s => s.logout().await)
            .map_err(|e| MailboxError::Imap(format!("Logout failed: {e}")))
    }
}
