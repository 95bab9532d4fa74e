//! Runs a [`SessionController`] on its own tokio task.
//!
//! The UI side talks to it through [`SessionHandle`]: commands go in over an
//! mpsc channel and are answered on a oneshot, transport events go in over a
//! second channel, and user-facing [`Notice`]s come back out.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_shared::{Fingerprint, Language, PeerIdentity};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{Notice, SessionEpoch, SessionEvent};
use crate::session::{SessionController, SessionSnapshot};
use crate::transport::{ConnectRequest, Transport};

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

/// Commands sent *to* the session task.
#[derive(Debug)]
pub enum SessionCommand {
    Connect {
        request: ConnectRequest,
        reply: Reply<SessionEpoch>,
    },
    /// Join a freshly generated room.
    CreateRoom {
        server_address: String,
        display_name: String,
        password: String,
        reply: Reply<(String, SessionEpoch)>,
    },
    Send {
        content: String,
        reply: Reply<bool>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    ReplacePin {
        identity: PeerIdentity,
        fingerprint: Fingerprint,
        reply: Reply<Option<Fingerprint>>,
    },
    SetLanguage {
        language: Language,
        reply: Reply<()>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    /// Disconnect and stop the task.
    Shutdown,
}

/// Cloneable front door to a running session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Sender the transport uses to deliver epoch-tagged events.
    pub fn event_sender(&self) -> mpsc::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    pub async fn connect(&self, request: ConnectRequest) -> Result<SessionEpoch, ClientError> {
        self.call(|reply| SessionCommand::Connect { request, reply })
            .await
    }

    pub async fn create_room(
        &self,
        server_address: &str,
        display_name: &str,
        password: &str,
    ) -> Result<(String, SessionEpoch), ClientError> {
        self.call(|reply| SessionCommand::CreateRoom {
            server_address: server_address.to_string(),
            display_name: display_name.to_string(),
            password: password.to_string(),
            reply,
        })
        .await
    }

    pub async fn send_message(&self, content: &str) -> Result<bool, ClientError> {
        self.call(|reply| SessionCommand::Send {
            content: content.to_string(),
            reply,
        })
        .await
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.call(|reply| SessionCommand::Disconnect { reply }).await
    }

    pub async fn replace_pin(
        &self,
        identity: PeerIdentity,
        fingerprint: Fingerprint,
    ) -> Result<Option<Fingerprint>, ClientError> {
        self.call(|reply| SessionCommand::ReplacePin {
            identity,
            fingerprint,
            reply,
        })
        .await
    }

    pub async fn set_language(&self, language: Language) -> Result<(), ClientError> {
        self.call(|reply| SessionCommand::SetLanguage { language, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Snapshot(tx))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown).await;
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }
}

/// Spawn the session task. Returns the handle, the notice stream, and the
/// task's join handle. The task ends on [`SessionCommand::Shutdown`] or once
/// every handle is dropped.
pub fn spawn_session<T: Transport + 'static>(
    controller: SessionController<T>,
    config: &ClientConfig,
) -> (SessionHandle, mpsc::Receiver<Notice>, JoinHandle<()>) {
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (notice_tx, notice_rx) = mpsc::channel(capacity);
    let retry_every = config.store_retry_interval;

    let task = tokio::spawn(async move {
        session_loop(controller, cmd_rx, event_rx, notice_tx, retry_every).await;
    });

    (SessionHandle { cmd_tx, event_tx }, notice_rx, task)
}

async fn session_loop<T: Transport>(
    mut controller: SessionController<T>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    mut event_rx: mpsc::Receiver<SessionEvent>,
    notice_tx: mpsc::Sender<Notice>,
    retry_every: Duration,
) {
    let mut retry = tokio::time::interval(retry_every.max(Duration::from_millis(100)));
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("Session task started");

    loop {
        tokio::select! {
            // Events already delivered are applied before the next command.
            biased;

            Some(event) = event_rx.recv() => {
                for notice in controller.handle(event) {
                    emit(&notice_tx, notice).await;
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("All session handles dropped");
                    break;
                };
                if matches!(cmd, SessionCommand::Shutdown) {
                    break;
                }
                for notice in run_command(&mut controller, cmd) {
                    emit(&notice_tx, notice).await;
                }
            }

            _ = retry.tick() => {
                if let Some(notice) = controller.retry_pending_pins() {
                    emit(&notice_tx, notice).await;
                }
            }
        }
    }

    if let Err(e) = controller.disconnect() {
        warn!(error = %e, "Error while closing session on shutdown");
    }
    info!("Session task stopped");
}

/// Execute one command, answer it, and return the notices it should raise.
fn run_command<T: Transport>(
    controller: &mut SessionController<T>,
    cmd: SessionCommand,
) -> Vec<Notice> {
    let mut notices = Vec::new();

    match cmd {
        SessionCommand::Connect { request, reply } => {
            let result = controller.connect(request);
            if let Err(e) = &result {
                notices.extend(Notice::from_connect_error(e));
            }
            let _ = reply.send(result);
        }
        SessionCommand::CreateRoom {
            server_address,
            display_name,
            password,
            reply,
        } => {
            let result = controller.create_room(&server_address, &display_name, &password);
            if let Err(e) = &result {
                notices.extend(Notice::from_connect_error(e));
            }
            let _ = reply.send(result);
        }
        SessionCommand::Send { content, reply } => {
            let result = controller.send_message(&content);
            if let Err(e) = &result {
                notices.extend(Notice::from_send_error(e));
            }
            let _ = reply.send(result);
        }
        SessionCommand::Disconnect { reply } => {
            let _ = reply.send(controller.disconnect());
        }
        SessionCommand::ReplacePin {
            identity,
            fingerprint,
            reply,
        } => {
            let _ = reply.send(controller.replace_pin(&identity, &fingerprint));
        }
        SessionCommand::SetLanguage { language, reply } => {
            let _ = reply.send(controller.set_language(language));
        }
        SessionCommand::Snapshot(reply) => {
            let _ = reply.send(controller.snapshot());
        }
        SessionCommand::Shutdown => {}
    }

    notices
}

async fn emit(notice_tx: &mpsc::Sender<Notice>, notice: Notice) {
    if notice_tx.send(notice).await.is_err() {
        debug!("Notice receiver dropped");
    }
}
