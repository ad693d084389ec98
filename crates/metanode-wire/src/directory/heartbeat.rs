//! Registration heartbeat: keeps this node's record fresh in the directory.
//!
//! The first [`RegisterPeer`] frame is sent by the directory client before the
//! loop starts. The loop then runs as a background task on the open
//! `dir.register` stream, sending one frame per interval until the caller
//! aborts it or the directory closes the stream. Its end is reported through
//! [`HeartbeatHandle::finished`].

use crate::codec::write_frame;
use crate::error::WireError;
use crate::message::RegisterPeer;
use crate::transport::{BoxedStream, Transport};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How a heartbeat loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Stopped through [`HeartbeatHandle::abort`].
    Aborted,
    /// The directory closed the register stream.
    Closed,
    /// A stream error ended the loop.
    Failed(String),
}

impl fmt::Display for HeartbeatOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted => write!(f, "aborted"),
            Self::Closed => write!(f, "closed by directory"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Control handle for a running heartbeat loop.
///
/// Dropping the handle detaches the loop; it keeps running until the stream
/// closes.
pub struct HeartbeatHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<HeartbeatOutcome>,
}

impl HeartbeatHandle {
    /// Stop future emissions. Calling this more than once is harmless.
    pub fn abort(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to end and report why.
    pub async fn finished(self) -> HeartbeatOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => HeartbeatOutcome::Failed(e.to_string()),
        }
    }
}

/// Send one registration frame for the local peer.
pub(crate) async fn emit<W>(writer: &mut W, transport: &dyn Transport) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let msg = RegisterPeer {
        info: transport.local_peer(),
    };
    write_frame(writer, &msg).await?;
    debug!(peer = %msg.info.id, "Sent registration heartbeat");
    Ok(())
}

/// Spawn the heartbeat loop on a register stream whose first frame is sent.
pub(crate) fn spawn(
    stream: BoxedStream,
    transport: Arc<dyn Transport>,
    interval: Duration,
) -> HeartbeatHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let outcome = run(stream, transport, interval, shutdown_rx).await;
        match &outcome {
            HeartbeatOutcome::Aborted => info!("Directory heartbeat aborted"),
            HeartbeatOutcome::Closed => warn!("Directory closed the register stream"),
            HeartbeatOutcome::Failed(e) => warn!(error = %e, "Directory heartbeat failed"),
        }
        outcome
    });
    HeartbeatHandle { shutdown_tx, task }
}

async fn run(
    stream: BoxedStream,
    transport: Arc<dyn Transport>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> HeartbeatOutcome {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut detached = false;
    let mut scratch = [0u8; 64];

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed(), if !detached => {
                match changed {
                    Ok(()) if *shutdown.borrow() => return HeartbeatOutcome::Aborted,
                    Ok(()) => {}
                    // Handle dropped without aborting.
                    Err(_) => detached = true,
                }
            }
            read = reader.read(&mut scratch) => {
                match read {
                    Ok(0) => return HeartbeatOutcome::Closed,
                    // The register protocol is one-way; stray bytes are ignored.
                    Ok(_) => {}
                    Err(e) => return HeartbeatOutcome::Failed(e.to_string()),
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = emit(&mut writer, transport.as_ref()).await {
                    return HeartbeatOutcome::Failed(e.to_string());
                }
            }
        }
    }
}
