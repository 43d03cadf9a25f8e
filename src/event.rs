use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::cache::{Request, Response};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::lifecycle::{Lifecycle, LifecycleState};

/// Out-of-band commands from the hosting application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
  /// Activate the waiting version without waiting for clients to close
  ForceActivate,
  /// Delete every namespace regardless of version
  ClearAll,
}

#[derive(Debug, Error)]
pub enum MessageError {
  #[error("malformed control message: {0}")]
  Malformed(#[from] serde_json::Error),
  #[error("unknown control message kind '{0}'")]
  Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
  #[serde(alias = "type")]
  kind: String,
}

impl ControlMessage {
  /// Parse `{ "kind": "force-activate" }` or `{ "kind": "clear-all" }`.
  ///
  /// `type` is accepted in place of `kind`, and `SKIP_WAITING` / `CLEAR_CACHE`
  /// as the legacy names.
  pub fn from_json(json: &str) -> Result<Self, MessageError> {
    let envelope: Envelope = serde_json::from_str(json)?;
    match envelope.kind.as_str() {
      "force-activate" | "SKIP_WAITING" => Ok(Self::ForceActivate),
      "clear-all" | "CLEAR_CACHE" => Ok(Self::ClearAll),
      other => Err(MessageError::Unknown(other.to_string())),
    }
  }

  pub fn kind(self) -> &'static str {
    match self {
      Self::ForceActivate => "force-activate",
      Self::ClearAll => "clear-all",
    }
  }
}

/// Inbound events
#[derive(Debug)]
pub enum Event {
  /// A new version was deployed
  Install(CacheConfig),
  /// A collaborator issued a request
  Fetch(Request),
  /// A client attached to the active version
  ClientOpened,
  /// A client detached
  ClientClosed,
  /// Control channel command
  Message(ControlMessage),
}

/// What handling an event produced
#[derive(Debug)]
pub enum Outcome {
  Lifecycle(LifecycleState),
  Response(Response),
  Clients(usize),
  Ack,
}

/// Maps each event kind to its handler on the lifecycle manager.
#[derive(Clone)]
pub struct Dispatcher {
  lifecycle: Arc<Lifecycle>,
}

impl Dispatcher {
  pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
    Self { lifecycle }
  }

  /// Handle one event.
  ///
  /// Install aborts and control-message failures are absorbed and logged;
  /// only request failures reach the caller.
  pub async fn dispatch(&self, event: Event) -> Result<Outcome, CacheError> {
    match event {
      Event::Install(config) => match self.lifecycle.install(config).await {
        Ok(state) => Ok(Outcome::Lifecycle(state)),
        Err(err @ CacheError::InstallAborted { .. }) => {
          warn!(error = %err, "candidate discarded, previous version keeps serving");
          Ok(Outcome::Lifecycle(LifecycleState::Discarded))
        }
        Err(err) => Err(err),
      },
      Event::Fetch(request) => self.lifecycle.handle(&request).await.map(Outcome::Response),
      Event::ClientOpened => Ok(Outcome::Clients(self.lifecycle.client_opened())),
      Event::ClientClosed => self.lifecycle.client_closed().await.map(Outcome::Clients),
      Event::Message(message) => {
        self.apply(message).await;
        Ok(Outcome::Ack)
      }
    }
  }

  async fn apply(&self, message: ControlMessage) {
    info!(kind = message.kind(), "control message");
    let result = match message {
      ControlMessage::ForceActivate => self.lifecycle.force_activate().await,
      ControlMessage::ClearAll => self.lifecycle.clear_all().await.map(|_| ()),
    };
    if let Err(err) = result {
      warn!(kind = message.kind(), error = %err, "control message failed");
    }
  }
}

#[derive(Debug, Error)]
#[error("control channel closed")]
pub struct ChannelClosed;

/// Sender half of the control channel. Cheap to clone.
#[derive(Clone)]
pub struct ControlChannel {
  tx: mpsc::UnboundedSender<(ControlMessage, oneshot::Sender<()>)>,
}

impl ControlChannel {
  /// Spawn the task that applies control messages in arrival order.
  pub fn spawn(dispatcher: Dispatcher) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<(ControlMessage, oneshot::Sender<()>)>();

    tokio::spawn(async move {
      while let Some((message, ack)) = rx.recv().await {
        // Messages never fail; errors are logged by the dispatcher
        let _ = dispatcher.dispatch(Event::Message(message)).await;
        // The sender may have stopped waiting
        let _ = ack.send(());
      }
    });

    Self { tx }
  }

  /// Deliver a message and wait until it has been applied.
  pub async fn send(&self, message: ControlMessage) -> Result<(), ChannelClosed> {
    let (ack_tx, ack_rx) = oneshot::channel();
    self.tx.send((message, ack_tx)).map_err(|_| ChannelClosed)?;
    ack_rx.await.map_err(|_| ChannelClosed)
  }
}
