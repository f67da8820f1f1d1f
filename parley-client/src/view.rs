//! Terminal rendering and input parsing. Nothing here touches the socket.

use std::path::PathBuf;

use crate::{
    controller::Command,
    error::SessionError,
    session::{EntryBody, FeedEntry, MediaEntry, Phase, SessionState},
};

pub const HELP: &str = "\
commands:
  /connect              open the connection
  /disconnect           leave the chat
  /name <name>          set your display name
  /pm <to> <message>    private message
  /send <path>          share an image, audio, video or document file
  /members              list who is in the chat
  /quit                 exit
anything else is sent to everyone";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    ShowMembers,
    Help,
    Quit,
    Empty,
    /// Usage hint for a command typed wrong.
    Invalid(String),
}

/// Parse a typed line. While the name prompt is up, a plain line is the name.
pub fn parse_input(line: &str, awaiting_name: bool) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Input::Empty;
    }

    let Some(rest) = line.trim_start().strip_prefix('/') else {
        if awaiting_name {
            return Input::Command(Command::SetName(line.trim().to_owned()));
        }
        return Input::Command(Command::SendPublic(line.to_owned()));
    };

    let (word, args) = match rest.split_once(char::is_whitespace) {
        Some((word, args)) => (word, args.trim()),
        None => (rest, ""),
    };

    match word {
        "connect" => Input::Command(Command::Connect),
        "disconnect" => Input::Command(Command::Disconnect),
        "members" => Input::ShowMembers,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        "name" if !args.is_empty() => Input::Command(Command::SetName(args.to_owned())),
        "name" => Input::Invalid("usage: /name <name>".to_owned()),
        "pm" => match args.split_once(char::is_whitespace) {
            Some((to, message)) if !message.trim().is_empty() => {
                Input::Command(Command::SendPrivate {
                    message: message.trim().to_owned(),
                    to: to.to_owned(),
                })
            }
            _ => Input::Invalid("usage: /pm <to> <message>".to_owned()),
        },
        "send" if !args.is_empty() => Input::Command(Command::SendMedia(PathBuf::from(args))),
        "send" => Input::Invalid("usage: /send <path>".to_owned()),
        other => Input::Invalid(format!("unknown command /{other}; try /help")),
    }
}

pub fn render_entry(entry: &FeedEntry) -> String {
    let clock = format_clock(entry.received_at_ms);
    match &entry.body {
        EntryBody::Public(text) => format!("[{clock}] {text}"),
        EntryBody::Private(text) => format!("[{clock}] (private) {text}"),
        EntryBody::System(text) => format!("[{clock}] * {text}"),
        EntryBody::Media(media) => format!("[{clock}] {}", render_media(media)),
    }
}

fn render_media(media: &MediaEntry) -> String {
    let mut line = format!(
        "[{}] {} ({})",
        media.media_type,
        media.file_name,
        format_size(media.size_bytes)
    );
    if let Some(path) = &media.saved_to {
        line.push_str(&format!(" saved to {}", path.display()));
    }
    line
}

pub fn render_members(members: &[String]) -> String {
    if members.is_empty() {
        return "no one is in the chat".to_owned();
    }
    format!("in the chat ({}): {}", members.len(), members.join(", "))
}

pub fn render_status(state: &SessionState) -> String {
    let status = match state.phase() {
        Phase::Unconnected => "disconnected; type /connect".to_owned(),
        Phase::Connecting => "connecting...".to_owned(),
        Phase::AwaitingName => "connected; enter a display name".to_owned(),
        Phase::Connected => format!("connected as {}", state.name()),
    };
    if state.is_loading() {
        return format!("{status} (working...)");
    }
    status
}

pub fn render_phase(phase: Phase) -> &'static str {
    match phase {
        Phase::Unconnected => "disconnected",
        Phase::Connecting => "connecting...",
        Phase::AwaitingName => "connected; enter a display name",
        Phase::Connected => "you are in the chat",
    }
}

pub fn render_error(err: &SessionError) -> String {
    format!("error: {err}")
}

/// `HH:MM:SS` (UTC) for a unix timestamp in milliseconds.
pub fn format_clock(unix_ms: u64) -> String {
    let secs_of_day = (unix_ms / 1000) % 86_400;
    format!(
        "{:02}:{:02}:{:02}",
        secs_of_day / 3600,
        (secs_of_day / 60) % 60,
        secs_of_day % 60
    )
}

fn format_size(bytes: usize) -> String {
    const KIB: usize = 1024;
    const MIB: usize = 1024 * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
