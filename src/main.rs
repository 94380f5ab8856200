//! Assistant Chat
//!
//! Terminal front end: logs in, opens a streaming session and runs a
//! line-oriented REPL. Logs go to stderr; the conversation goes to stdout.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::io::Write;

use anyhow::{Context, Result, bail};
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use assistant_stream_client::config::{AppConfig, Cli};
use assistant_stream_client::{
    ChatController, ConnectionState, Role, SendRejected, SessionEvent, SessionObserver,
    SessionSnapshot, WsConnector,
};

type Controller = ChatController<WsConnector>;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (if present) before flags read their env fallbacks
    let _ = dotenv();

    // Initialize tracing (M-LOG-STRUCTURED)
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_cli(&cli).context("Failed to load configuration")?;
    info!(
        name: "config.loaded",
        api = %config.api.base_url,
        stream = %config.stream.url,
        "Configuration loaded"
    );

    let api = config.api_client()?;
    let connector = WsConnector::new(config.stream.endpoint()?);
    let mut controller = ChatController::new(api, connector, config.stream.session_settings());

    authenticate(&mut controller, &cli).await?;
    choose_session(&mut controller, &cli).await?;

    let renderer = tokio::spawn(render(controller.session().observer()));
    print_help();
    repl(&mut controller).await?;

    controller.session().close();
    renderer.abort();
    Ok(())
}

async fn authenticate(controller: &mut Controller, cli: &Cli) -> Result<()> {
    if let Some(token) = &cli.token {
        let user = controller
            .use_token(token.as_str())
            .await
            .context("Access token rejected")?;
        println!("Logged in as {}", user.email);
        return Ok(());
    }

    let (Some(email), Some(password)) = (&cli.email, &cli.password) else {
        bail!("Provide --token, or --email and --password");
    };
    if cli.register {
        controller
            .register(email, password)
            .await
            .context("Registration failed")?;
        println!("Registered {email}");
    }
    let user = controller
        .login(email, password)
        .await
        .context("Login failed")?;
    println!("Logged in as {}", user.email);
    Ok(())
}

async fn choose_session(controller: &mut Controller, cli: &Cli) -> Result<()> {
    if let Some(assistant) = &cli.assistant {
        controller.select_assistant(assistant.as_str()).await?;
    }
    if controller.current_assistant().is_none() {
        bail!("No assistants available");
    }

    let thread = cli.thread.clone().or_else(|| {
        controller
            .threads()
            .first()
            .map(|t| t.openai_thread_id.clone())
    });
    match thread {
        Some(thread) => controller
            .select_thread(thread)
            .await
            .context("Failed to open session")?,
        None => {
            controller
                .create_thread()
                .await
                .context("Failed to create a thread")?;
        }
    }
    Ok(())
}

/// Print streamed output as it arrives.
async fn render(observer: SessionObserver) {
    let mut view = StreamView::default();
    let mut events = observer.subscribe();
    loop {
        let output = match events.recv().await {
            Ok(event) => view.apply(&event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(name: "ui.lagged", skipped, "Renderer fell behind, resyncing");
                let (snapshot, fresh) = observer.subscribe_with_snapshot();
                events = fresh;
                view.resync(&snapshot)
            }
            Err(RecvError::Closed) => break,
        };
        if !output.is_empty() {
            print!("{output}");
            let _ = std::io::stdout().flush();
        }
    }
}

/// What the terminal has shown of the session so far.
#[derive(Debug, Default)]
struct StreamView {
    /// Last assistant message rendered.
    current: Option<Uuid>,
    /// Bytes of `current` already printed.
    shown: usize,
    /// A reply line is open and needs a newline.
    line_open: bool,
    connection: Option<ConnectionState>,
}

impl StreamView {
    fn apply(&mut self, event: &SessionEvent) -> String {
        let mut out = String::new();
        match event {
            SessionEvent::Fragment { message_id, text } => {
                if self.current != Some(*message_id) {
                    self.end_line(&mut out);
                    self.current = Some(*message_id);
                    self.shown = 0;
                    out.push_str("assistant> ");
                }
                self.line_open = true;
                self.shown += text.len();
                out.push_str(text);
            }
            SessionEvent::TurnCompleted { .. } => self.end_line(&mut out),
            SessionEvent::Connection(state) => self.show_connection(state, &mut out),
            SessionEvent::ReplyTimedOut => {
                self.end_line(&mut out);
                out.push_str("[no reply yet, you may send again]\n");
            }
            SessionEvent::Transcript(_) | SessionEvent::AwaitingReply(_) => {}
        }
        out
    }

    /// Catch up from `snapshot` after missed events.
    fn resync(&mut self, snapshot: &SessionSnapshot) -> String {
        let mut out = String::new();
        match snapshot.transcript.last() {
            Some(tail) if tail.role == Role::Assistant => {
                if self.current == Some(tail.id) {
                    out.push_str(tail.content.get(self.shown..).unwrap_or_default());
                } else {
                    self.end_line(&mut out);
                    self.current = Some(tail.id);
                    out.push_str("assistant> ");
                    out.push_str(&tail.content);
                }
                self.shown = tail.content.len();
                self.line_open |= !out.is_empty();
                if tail.is_complete {
                    self.end_line(&mut out);
                }
            }
            _ => self.end_line(&mut out),
        }
        if self.connection.as_ref() != Some(&snapshot.connection) {
            self.show_connection(&snapshot.connection, &mut out);
        }
        out
    }

    fn show_connection(&mut self, state: &ConnectionState, out: &mut String) {
        self.end_line(out);
        out.push_str(&format!("[{state}]\n"));
        self.connection = Some(state.clone());
    }

    fn end_line(&mut self, out: &mut String) {
        if self.line_open {
            self.line_open = false;
            out.push('\n');
        }
    }
}

async fn repl(controller: &mut Controller) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Quit => break,
            Command::Logout => {
                controller.logout();
                println!("Logged out");
                break;
            }
            Command::Help => print_help(),
            Command::Threads => match controller.refresh_threads().await {
                Ok(_) => print_threads(controller),
                Err(e) => eprintln!("error: {e}"),
            },
            Command::Assistants => match controller.refresh_assistants().await {
                Ok(_) => print_assistants(controller),
                Err(e) => eprintln!("error: {e}"),
            },
            Command::Thread(id) => report(controller.select_thread(id).await),
            Command::Assistant(id) => report(controller.select_assistant(id).await),
            Command::New => match controller.create_thread().await {
                Ok(thread) => println!("Created {}", thread.openai_thread_id),
                Err(e) => eprintln!("error: {e}"),
            },
            Command::Unknown(command) => println!("Unknown command: {command} (try /help)"),
            Command::Message(text) => match controller.send_message(text) {
                Ok(()) | Err(SendRejected::EmptyInput) => {}
                Err(rejected) => println!("[{rejected}]"),
            },
        }
    }
    Ok(())
}

fn report(result: assistant_stream_client::Result<()>) {
    if let Err(e) = result {
        eprintln!("error: {e}");
    }
}

fn print_threads(controller: &Controller) {
    for thread in controller.threads() {
        let marker = if controller.current_thread() == Some(thread.openai_thread_id.as_str()) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {}  {}",
            thread.openai_thread_id,
            thread.created_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn print_assistants(controller: &Controller) {
    for assistant in controller.assistants() {
        let marker =
            if controller.current_assistant() == Some(assistant.openai_assistant_id.as_str()) {
                '*'
            } else {
                ' '
            };
        println!("{marker} {}", assistant.openai_assistant_id);
    }
}

fn print_help() {
    println!(
        "Commands: /threads, /thread <id>, /new, /assistants, /assistant <id>, /logout, /quit"
    );
}

/// One line of REPL input.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Message(&'a str),
    Threads,
    Thread(&'a str),
    New,
    Assistants,
    Assistant(&'a str),
    Logout,
    Help,
    Quit,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let Some(command) = line.trim().strip_prefix('/') else {
            // Messages are sent verbatim.
            return Self::Message(line);
        };
        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, arg)| (name, arg.trim()));
        match (name, arg) {
            ("threads", _) => Self::Threads,
            ("thread", id) if !id.is_empty() => Self::Thread(id),
            ("new", _) => Self::New,
            ("assistants", _) => Self::Assistants,
            ("assistant", id) if !id.is_empty() => Self::Assistant(id),
            ("logout", _) => Self::Logout,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Unknown(line.trim()),
        }
    }
}
