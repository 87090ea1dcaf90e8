//! Side effects the engine asks for but does not implement.
//!
//! [`ActionExecutor`] reopens a snoozed URL and closes the resource a snooze
//! was requested from. Both calls are fire-and-forget: callers log a failure
//! and move on.

use crate::error::{Result, SnoozeError};
use serde::{Deserialize, Serialize};
use std::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

/// The resource a snooze request came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceRef {
    /// Host-specific handle of the originating tab/window, if any.
    pub tab_id: Option<u64>,
    pub url: String,
    pub title: Option<String>,
}

impl SourceRef {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tab(mut self, tab_id: u64) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Performs reopen/close side effects.
pub trait ActionExecutor: Send + Sync {
    /// Reopen `url`.
    fn perform_action(&self, url: &str) -> Result<()>;

    /// Close the resource a snooze was requested from.
    fn close_source(&self, source: &SourceRef) -> Result<()>;
}

/// Request forwarded by [`ChannelExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRequest {
    Open { url: String },
    Close { source: SourceRef },
}

/// Forwards actions to an embedding host over a channel.
pub struct ChannelExecutor {
    request_tx: mpsc::UnboundedSender<ActionRequest>,
}

impl ChannelExecutor {
    #[must_use]
    pub fn new(request_tx: mpsc::UnboundedSender<ActionRequest>) -> Self {
        Self { request_tx }
    }

    /// Executor plus the receiving end of its channel.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ActionRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, request: ActionRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .map_err(|_| SnoozeError::Io(std::io::Error::other("action channel closed")))
    }
}

impl ActionExecutor for ChannelExecutor {
    fn perform_action(&self, url: &str) -> Result<()> {
        self.send(ActionRequest::Open {
            url: url.to_owned(),
        })
    }

    fn close_source(&self, source: &SourceRef) -> Result<()> {
        self.send(ActionRequest::Close {
            source: source.clone(),
        })
    }
}

/// Opens URLs with a desktop opener program.
pub struct SystemOpener {
    command: Option<String>,
}

impl SystemOpener {
    /// `command` overrides the platform opener.
    #[must_use]
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    fn build_command(&self, url: &str) -> Command {
        if let Some(program) = &self.command {
            let mut cmd = Command::new(program);
            cmd.arg(url);
            return cmd;
        }

        #[cfg(target_os = "macos")]
        {
            let mut cmd = Command::new("open");
            cmd.arg(url);
            cmd
        }
        #[cfg(target_os = "windows")]
        {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", ""]).arg(url);
            cmd
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url);
            cmd
        }
    }
}

impl ActionExecutor for SystemOpener {
    fn perform_action(&self, url: &str) -> Result<()> {
        let mut child = self.build_command(url).spawn()?;
        debug!(url, pid = child.id(), "opener spawned");
        // Reap in the background; the exit status is not our concern.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }

    fn close_source(&self, source: &SourceRef) -> Result<()> {
        debug!(url = %source.url, "no source to close outside a browser host");
        Ok(())
    }
}
