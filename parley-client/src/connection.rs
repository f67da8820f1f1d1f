use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Identifies one socket. Events from an older socket are ignored.
pub(crate) type Generation = u64;

/// How long to wait for the server's close reply before dropping the socket.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub(crate) enum SocketEvent {
    Opened {
        generation: Generation,
    },
    Frame {
        generation: Generation,
        text: String,
    },
    Closed {
        generation: Generation,
        error: Option<String>,
    },
    ConnectFailed {
        generation: Generation,
        error: String,
    },
}

impl SocketEvent {
    pub(crate) fn generation(&self) -> Generation {
        match self {
            SocketEvent::Opened { generation }
            | SocketEvent::Frame { generation, .. }
            | SocketEvent::Closed { generation, .. }
            | SocketEvent::ConnectFailed { generation, .. } => *generation,
        }
    }
}

#[derive(Debug)]
enum SocketCommand {
    Send(String),
    Close,
}

/// The controller's handle on its socket task.
///
/// Dropping the handle closes the socket: the task sees its command channel
/// end and sends a close frame.
#[derive(Debug)]
pub(crate) struct SocketHandle {
    generation: Generation,
    commands: mpsc::UnboundedSender<SocketCommand>,
    task: JoinHandle<()>,
    open: bool,
    closing: bool,
}

impl SocketHandle {
    pub(crate) fn spawn(
        server_url: String,
        connect_timeout: Duration,
        generation: Generation,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(socket_task(
            server_url,
            connect_timeout,
            generation,
            commands_rx,
            events,
        ));
        Self {
            generation,
            commands,
            task,
            open: false,
            closing: false,
        }
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    /// Open and not yet asked to close. The task stops taking frames once a
    /// close is queued, so nothing may be sent after that.
    pub(crate) fn is_open(&self) -> bool {
        self.open && !self.closing
    }

    pub(crate) fn mark_open(&mut self) {
        self.open = true;
    }

    /// Queue a text frame. Returns false once the socket task is gone.
    pub(crate) fn send(&self, text: String) -> bool {
        self.commands.send(SocketCommand::Send(text)).is_ok()
    }

    pub(crate) fn close(&mut self) {
        self.closing = true;
        let _ = self.commands.send(SocketCommand::Close);
    }

    /// Close and wait for the task to finish, aborting it if the server
    /// never answers.
    pub(crate) async fn shutdown(mut self) {
        self.close();
        let Self { task, .. } = self;
        let abort = task.abort_handle();
        if timeout(CLOSE_GRACE * 2, task).await.is_err() {
            abort.abort();
        }
    }
}

async fn socket_task(
    server_url: String,
    connect_timeout: Duration,
    generation: Generation,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    info!(server_url = %server_url, generation, "connecting");

    let ws_stream = match timeout(connect_timeout, connect_async(server_url.as_str())).await {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(err)) => {
            warn!(generation, "connect failed: {err}");
            let _ = events.send(SocketEvent::ConnectFailed {
                generation,
                error: err.to_string(),
            });
            return;
        }
        Err(_) => {
            let error = format!("connect timed out after {connect_timeout:?}");
            warn!(generation, "{error}");
            let _ = events.send(SocketEvent::ConnectFailed { generation, error });
            return;
        }
    };

    info!(generation, "socket open");
    let _ = events.send(SocketEvent::Opened { generation });

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut close_deadline: Option<tokio::time::Instant> = None;

    let error = loop {
        let closing = close_deadline.is_some();
        let grace = close_deadline.unwrap_or_else(tokio::time::Instant::now);

        tokio::select! {
            command = commands.recv(), if !closing => match command {
                Some(SocketCommand::Send(text)) => {
                    if let Err(err) = ws_write.send(Message::Text(text.into())).await {
                        break Some(format!("send failed: {err}"));
                    }
                }
                Some(SocketCommand::Close) | None => {
                    debug!(generation, "sending close frame");
                    close_deadline = Some(tokio::time::Instant::now() + CLOSE_GRACE);
                    if let Err(err) = ws_write.send(Message::Close(None)).await {
                        debug!(generation, "close frame not sent: {err}");
                        break None;
                    }
                }
            },
            next = ws_read.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Frame {
                        generation,
                        text: text.as_str().to_owned(),
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(generation, ?frame, "server closed the socket");
                    break None;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    if closing {
                        break None;
                    }
                    break Some(format!("read failed: {err}"));
                }
                None => break None,
            },
            () = tokio::time::sleep_until(grace), if closing => {
                debug!(generation, "no close reply from server");
                break None;
            }
        }
    };

    info!(generation, "socket closed");
    let _ = events.send(SocketEvent::Closed { generation, error });
}
