use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::Parser;
use parley_client::{
    ClientConfig, Command, Controller, Phase, UiEvent,
    config::{DEFAULT_SERVER_URL, default_log_path, validate_display_name},
    view::{self, Input},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing::{info, warn};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser, Debug, Clone)]
#[command(name = "parley", about = "Terminal chat client")]
struct ClientArgs {
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    server_url: String,
    /// Display name submitted automatically once connected.
    #[arg(long)]
    name: Option<String>,
    /// Save received media here.
    #[arg(long)]
    media_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 12)]
    connect_timeout_secs: u64,
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

fn init_logging(log_path: PathBuf) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    if let Some(dir) = log_path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .init();
}

/// What the terminal needs to remember between events.
struct ViewState {
    phase: Phase,
    members: Vec<String>,
    auto_name: Option<String>,
}

impl ViewState {
    /// Print one controller event. Returns a command to send back, if any.
    fn apply(&mut self, event: UiEvent) -> Option<Command> {
        match event {
            UiEvent::PhaseChanged(phase) => {
                self.phase = phase;
                println!("-- {}", view::render_phase(phase));
                if phase == Phase::AwaitingName {
                    return self.auto_name.clone().map(Command::SetName);
                }
            }
            UiEvent::MembersChanged(members) => {
                println!("-- {}", view::render_members(&members));
                self.members = members;
            }
            UiEvent::EntryAppended(entry) => println!("{}", view::render_entry(&entry)),
            UiEvent::Cleared => self.members.clear(),
            UiEvent::LoadingChanged(true) => println!("-- leaving..."),
            UiEvent::LoadingChanged(false) => {}
            UiEvent::Error(err) => println!("!! {}", view::render_error(&err)),
        }
        None
    }
}

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();
    init_logging(args.log_file.clone().unwrap_or_else(default_log_path));

    let mut config = match ClientConfig::new(&args.server_url) {
        Ok(config) => config.with_connect_timeout(Duration::from_secs(args.connect_timeout_secs)),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    if let Some(dir) = args.media_dir.clone() {
        config = config.with_media_dir(dir);
    }
    if let Some(name) = &args.name {
        if let Err(err) = validate_display_name(name) {
            eprintln!("{err}");
            std::process::exit(2);
        }
    }

    info!(server_url = %config.server_url, "parley starting");
    println!("{}", view::HELP);

    let (controller, mut ui_rx) = Controller::new(config);
    let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();
    let controller_task = tokio::spawn(controller.run(command_rx));

    let mut view_state = ViewState {
        phase: Phase::Unconnected,
        members: Vec::new(),
        auto_name: args.name.clone(),
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let _ = command_tx.send(Command::Connect);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    match view::parse_input(&line, view_state.phase == Phase::AwaitingName) {
                        Input::Command(command) => {
                            let _ = command_tx.send(command);
                        }
                        Input::ShowMembers => {
                            println!("-- {}", view::render_members(&view_state.members));
                        }
                        Input::Help => println!("{}", view::HELP),
                        Input::Quit => break,
                        Input::Empty => {}
                        Input::Invalid(hint) => println!("!! {hint}"),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("stdin read failed: {err}");
                    break;
                }
            },
            Some(event) = ui_rx.recv() => {
                if let Some(command) = view_state.apply(event) {
                    let _ = command_tx.send(command);
                }
            }
        }
    }

    // Dropping the sender ends the controller loop, which closes the socket.
    drop(command_tx);
    let _ = controller_task.await;
    info!("parley exiting");
}
