use std::{
    path::PathBuf,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parley_core::{
    ClientAction, CoreError, MediaPayload, ServerFrame, decode_media, decode_server_frame,
    encode_action, has_content,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    connection::{Generation, SocketEvent, SocketHandle},
    error::SessionError,
    media,
    session::{EntryBody, FeedEntry, MediaEntry, Phase, SessionState},
};

/// What the view asks the controller to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    SetName(String),
    SendPublic(String),
    SendPrivate { message: String, to: String },
    SendMedia(PathBuf),
}

/// State changes pushed to the view, in the order they were applied.
#[derive(Debug)]
pub enum UiEvent {
    PhaseChanged(Phase),
    MembersChanged(Vec<String>),
    EntryAppended(FeedEntry),
    /// Members and feed were emptied because the socket closed.
    Cleared,
    LoadingChanged(bool),
    Error(SessionError),
}

#[derive(Debug)]
struct MediaReady {
    generation: Generation,
    result: Result<ClientAction, SessionError>,
}

enum Wakeup {
    Socket(SocketEvent),
    Media(MediaReady),
    LoadingTimer,
}

/// Owns the session: the socket, the chat state and the loading timer.
///
/// Everything is mutated from one task. Drive it with [`Controller::run`], or
/// call the operations directly and [`Controller::pump`] to apply socket
/// events.
pub struct Controller {
    config: ClientConfig,
    state: SessionState,
    socket: Option<SocketHandle>,
    generation: Generation,
    socket_events_tx: mpsc::UnboundedSender<SocketEvent>,
    socket_events_rx: mpsc::UnboundedReceiver<SocketEvent>,
    media_tx: mpsc::UnboundedSender<MediaReady>,
    media_rx: mpsc::UnboundedReceiver<MediaReady>,
    loading_clear_at: Option<Instant>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
}

impl Controller {
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (socket_events_tx, socket_events_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let controller = Self {
            config,
            state: SessionState::new(),
            socket: None,
            generation: 0,
            socket_events_tx,
            socket_events_rx,
            media_tx,
            media_rx,
            loading_clear_at: None,
            ui_tx,
        };
        (controller, ui_rx)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether a loading-clear deadline is pending.
    pub fn loading_timer_pending(&self) -> bool {
        self.loading_clear_at.is_some()
    }

    /// Open a socket unless one already exists. Returns whether a new socket
    /// was started.
    pub fn connect(&mut self) -> bool {
        if self.socket.is_some() {
            debug!(phase = ?self.state.phase(), "connect ignored: socket already exists");
            return false;
        }

        self.generation += 1;
        self.loading_clear_at = None;
        let was_loading = self.state.is_loading();
        self.state.begin_connect();
        if was_loading {
            self.emit(UiEvent::LoadingChanged(false));
        }

        self.socket = Some(SocketHandle::spawn(
            self.config.server_url.clone(),
            self.config.connect_timeout,
            self.generation,
            self.socket_events_tx.clone(),
        ));
        self.emit(UiEvent::PhaseChanged(Phase::Connecting));
        true
    }

    /// Ask the server to close. Only meaningful once a name has been set.
    pub fn disconnect(&mut self) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        let Some(socket) = self.socket.as_mut().filter(|socket| socket.is_open()) else {
            return false;
        };

        info!(generation = socket.generation(), "disconnect requested");
        socket.close();
        self.state.set_loading(true);
        self.emit(UiEvent::LoadingChanged(true));
        true
    }

    /// Returns `Ok(false)` when the name is blank and nothing was sent.
    pub fn set_name(&mut self, name: &str) -> Result<bool, SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }

        self.send_action(&ClientAction::SetName {
            name: name.to_owned(),
        })?;
        self.state.on_name_submitted(name);
        self.emit(UiEvent::PhaseChanged(Phase::Connected));
        Ok(true)
    }

    pub fn send_public(&mut self, message: &str) -> Result<bool, SessionError> {
        if !has_content(message) {
            return Ok(false);
        }
        self.send_action(&ClientAction::SendPublic {
            message: message.to_owned(),
        })?;
        Ok(true)
    }

    pub fn send_private(&mut self, message: &str, to: &str) -> Result<bool, SessionError> {
        if !has_content(message) {
            return Ok(false);
        }
        let to = to.trim();
        if to.is_empty() {
            return Err(CoreError::MissingRecipient.into());
        }
        self.send_action(&ClientAction::SendPrivate {
            message: message.to_owned(),
            to: to.to_owned(),
        })?;
        Ok(true)
    }

    /// Start reading `path` on the blocking pool. The frame goes out when the
    /// read completes, provided the same session is still open.
    pub fn send_media(&mut self, path: PathBuf) -> Result<(), SessionError> {
        if !self.socket_open() {
            return Err(SessionError::NotConnected);
        }

        let generation = self.generation;
        let media_tx = self.media_tx.clone();
        debug!(path = %path.display(), generation, "reading media");
        tokio::spawn(async move {
            let result = media::read_media_file(path).await;
            let _ = media_tx.send(MediaReady { generation, result });
        });
        Ok(())
    }

    pub fn handle_command(&mut self, command: Command) {
        let result = match command {
            Command::Connect => {
                self.connect();
                Ok(())
            }
            Command::Disconnect => {
                self.disconnect();
                Ok(())
            }
            Command::SetName(name) => self.set_name(&name).map(drop),
            Command::SendPublic(message) => self.send_public(&message).map(drop),
            Command::SendPrivate { message, to } => self.send_private(&message, &to).map(drop),
            Command::SendMedia(path) => self.send_media(path),
        };

        if let Err(err) = result {
            self.report(err);
        }
    }

    /// Wait for the next socket event, finished media read or timer expiry and
    /// apply it.
    pub async fn pump(&mut self) {
        let wakeup = self.next_wakeup().await;
        self.handle_wakeup(wakeup).await;
    }

    /// Serve commands until the sender is dropped, then close the socket.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                wakeup = self.next_wakeup() => self.handle_wakeup(wakeup).await,
            }
        }

        info!("controller shutting down");
        self.shutdown().await;
    }

    pub async fn shutdown(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.shutdown().await;
        }
    }

    fn socket_open(&self) -> bool {
        self.socket.as_ref().is_some_and(SocketHandle::is_open)
    }

    fn send_action(&self, action: &ClientAction) -> Result<(), SessionError> {
        let socket = self
            .socket
            .as_ref()
            .filter(|socket| socket.is_open())
            .ok_or(SessionError::NotConnected)?;

        let text = encode_action(action)?;
        if !socket.send(text) {
            return Err(SessionError::NotConnected);
        }
        debug!(action = action.name(), generation = socket.generation(), "queued action");
        Ok(())
    }

    async fn next_wakeup(&mut self) -> Wakeup {
        let deadline = self.loading_clear_at;
        tokio::select! {
            Some(event) = self.socket_events_rx.recv() => Wakeup::Socket(event),
            Some(ready) = self.media_rx.recv() => Wakeup::Media(ready),
            () = sleep_until_deadline(deadline) => Wakeup::LoadingTimer,
        }
    }

    async fn handle_wakeup(&mut self, wakeup: Wakeup) {
        match wakeup {
            Wakeup::Socket(event) => self.handle_socket_event(event).await,
            Wakeup::Media(ready) => self.handle_media_ready(ready),
            Wakeup::LoadingTimer => {
                self.loading_clear_at = None;
                if self.state.is_loading() {
                    self.state.set_loading(false);
                    self.emit(UiEvent::LoadingChanged(false));
                }
            }
        }
    }

    async fn handle_socket_event(&mut self, event: SocketEvent) {
        if event.generation() != self.generation {
            debug!(
                stale = event.generation(),
                current = self.generation,
                "ignoring event from old socket"
            );
            return;
        }

        match event {
            SocketEvent::Opened { .. } => {
                if let Some(socket) = &mut self.socket {
                    socket.mark_open();
                }
                self.state.on_open();
                self.emit(UiEvent::PhaseChanged(Phase::AwaitingName));
            }
            SocketEvent::Frame { text, .. } => self.apply_frame(&text).await,
            SocketEvent::Closed { error, .. } => {
                self.socket = None;
                self.state.on_close();
                self.emit(UiEvent::Cleared);
                self.emit(UiEvent::PhaseChanged(Phase::Unconnected));
                self.loading_clear_at = Some(Instant::now() + self.config.loading_clear_delay);
                if let Some(error) = error {
                    self.report(SessionError::ConnectionLost(error));
                }
            }
            SocketEvent::ConnectFailed { error, .. } => {
                self.socket = None;
                self.state.on_close();
                self.emit(UiEvent::PhaseChanged(Phase::Unconnected));
                self.report(SessionError::ConnectionFailed {
                    url: self.config.server_url.clone(),
                    reason: error,
                });
            }
        }
    }

    fn handle_media_ready(&mut self, ready: MediaReady) {
        if ready.generation != self.generation || !self.socket_open() {
            debug!(generation = ready.generation, "dropping media read from ended session");
            return;
        }

        let result = ready
            .result
            .and_then(|action| self.send_action(&action));
        if let Err(err) = result {
            self.report(err);
        }
    }

    async fn apply_frame(&mut self, text: &str) {
        let frame = match decode_server_frame(text) {
            Ok(frame) => frame,
            Err(CoreError::UnrecognizedFrame) => {
                warn!(len = text.len(), "ignoring frame with no recognized field");
                return;
            }
            Err(err) => {
                self.report(SessionError::MalformedFrame(err));
                return;
            }
        };

        let body = match frame {
            ServerFrame::Members(members) => {
                self.state.replace_members(members.clone());
                self.emit(UiEvent::MembersChanged(members));
                return;
            }
            ServerFrame::Public(text) | ServerFrame::Private(text) | ServerFrame::System(text)
                if text.is_empty() =>
            {
                debug!("ignoring frame with empty text");
                return;
            }
            ServerFrame::Public(text) => EntryBody::Public(text),
            ServerFrame::Private(text) => EntryBody::Private(text),
            ServerFrame::System(text) => EntryBody::System(text),
            ServerFrame::Media(payload) => match self.accept_media(&payload).await {
                Ok(entry) => EntryBody::Media(entry),
                Err(err) => {
                    self.report(err);
                    return;
                }
            },
        };

        let entry = self.state.append(body, now_unix_ms()).clone();
        self.emit(UiEvent::EntryAppended(entry));
    }

    /// Frames after this one wait for the save, so the feed keeps arrival order.
    async fn accept_media(&self, payload: &MediaPayload) -> Result<MediaEntry, SessionError> {
        let decoded =
            decode_media(&payload.data, &payload.file_name).map_err(SessionError::MediaRejected)?;
        let file_name = decoded.file_name.clone();
        let media_type = decoded.media_type;
        let size_bytes = decoded.bytes.len();

        // A failed save still shows the attachment in the feed.
        let saved_to = match self.config.media_dir.clone() {
            Some(dir) => match media::save_incoming_media(dir, decoded).await {
                Ok(path) => {
                    info!(path = %path.display(), "saved incoming media");
                    Some(path)
                }
                Err(err) => {
                    self.report(err);
                    None
                }
            },
            None => None,
        };

        Ok(MediaEntry {
            file_name,
            media_type,
            size_bytes,
            saved_to,
        })
    }

    fn report(&self, err: SessionError) {
        warn!("{err}");
        self.emit(UiEvent::Error(err));
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.ui_tx.send(event);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub(crate) fn now_unix_ms() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    duration.as_millis() as u64
}
