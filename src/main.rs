//! Playground CLI - attach a terminal to a playground session.
//!
//! Renders the selected instance's output on stdout and forwards stdin
//! lines to it as input. Lines starting with `:` are commands:
//!
//! ```text
//! :new          request a new instance
//! :rm NAME      delete an instance
//! :sel NAME     switch to an instance
//! :ls           list instances
//! :close        end the session
//! ```
//!
//! See the `playground_client` library for the engine itself.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use playground_client::transport::session_ws_url;
use playground_client::{
    ApiClient, Command, Config, CreateInstanceRequest, EngineSettings, Geometry, Notice,
    SessionEngine, SessionError, TerminalWidget, Transport, TransportOptions, WidgetFactory,
};
use tokio::io::AsyncBufReadExt;

/// Global allocator.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser, Debug)]
#[command(name = "playground")]
#[command(version)]
#[command(about = "Attach to a playground session from the terminal")]
struct Cli {
    /// Session to attach to
    #[arg(long)]
    session: String,
    /// Backend origin (overrides config and PLAYGROUND_SERVER_URL)
    #[arg(long)]
    server: Option<String>,
    /// Request a new instance right after attaching
    #[arg(long)]
    new: bool,
    /// Image for instances requested with --new or :new
    #[arg(long)]
    image: Option<String>,
}

/// Name of the instance whose output reaches stdout.
type Focus = Arc<Mutex<Option<String>>>;

/// Widget that prints to stdout while its instance is focused.
#[derive(Debug)]
struct StdoutWidget {
    name: String,
    focus: Focus,
}

impl StdoutWidget {
    fn is_focused(&self) -> bool {
        self.focus
            .lock()
            .map(|f| f.as_deref() == Some(self.name.as_str()))
            .unwrap_or(false)
    }
}

impl TerminalWidget for StdoutWidget {
    fn open(&mut self) {
        log::debug!("Opened terminal for {}", self.name);
    }

    fn write(&mut self, data: &[u8]) {
        if self.is_focused() {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(data);
            let _ = stdout.flush();
        }
    }

    fn resize(&mut self, geometry: Geometry) {
        log::debug!("Terminal {} resized to {}", self.name, geometry);
    }

    fn focus(&mut self) {
        if let Ok(mut focus) = self.focus.lock() {
            *focus = Some(self.name.clone());
        }
        eprintln!("--- {} ---", self.name);
    }
}

/// Builder console output goes to stderr unconditionally.
#[derive(Debug)]
struct StderrWidget;

impl TerminalWidget for StderrWidget {
    fn open(&mut self) {}

    fn write(&mut self, data: &[u8]) {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(data);
    }

    fn resize(&mut self, _geometry: Geometry) {}

    fn focus(&mut self) {}
}

#[derive(Debug)]
struct StdoutWidgets {
    focus: Focus,
}

impl WidgetFactory for StdoutWidgets {
    fn create(&mut self, instance: &str) -> Box<dyn TerminalWidget> {
        Box::new(StdoutWidget {
            name: instance.to_string(),
            focus: Arc::clone(&self.focus),
        })
    }
}

/// What a stdin line asks for.
#[derive(Debug, PartialEq, Eq)]
enum LineAction {
    Command(Command),
    List,
    Input(String),
    Unknown(String),
}

fn parse_line(line: &str, image: Option<&str>) -> LineAction {
    let Some(rest) = line.strip_prefix(':') else {
        return LineAction::Input(format!("{line}\r"));
    };
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("new"), _) => LineAction::Command(Command::CreateInstance(CreateInstanceRequest {
            image: image.map(str::to_string),
            ..CreateInstanceRequest::default()
        })),
        (Some("rm"), Some(name)) => LineAction::Command(Command::DeleteInstance {
            name: name.to_string(),
        }),
        (Some("sel"), Some(name)) => LineAction::Command(Command::Select {
            name: name.to_string(),
        }),
        (Some("close"), _) => LineAction::Command(Command::CloseSession),
        (Some("ls"), _) => LineAction::List,
        _ => LineAction::Unknown(line.to_string()),
    }
}

fn describe_notice(notice: &Notice) -> String {
    match notice {
        Notice::CapacityExceeded => "Max instances reached".to_string(),
        Notice::OutOfCapacity => "The playground is out of capacity, try again later".to_string(),
        Notice::SessionEnded => {
            "Session ended: it expired or was closed, and all instances are gone".to_string()
        }
        Notice::RequestFailed { action, message } => format!("{action} failed: {message}"),
        Notice::ConnectionChanged { connected: true } => "Connected".to_string(),
        Notice::ConnectionChanged { connected: false } => "Connection lost, retrying".to_string(),
    }
}

fn list_instances(engine: &SessionEngine) {
    let registry = engine.registry();
    eprintln!(
        "session {} (expires in {})",
        engine.core().session().id,
        engine.core().ttl_text()
    );
    for instance in registry.iter() {
        let marker = if registry.selected_name() == Some(instance.name.as_str()) {
            '*'
        } else {
            ' '
        };
        eprintln!(
            "{} {} ip={} host={}",
            marker,
            instance.name,
            instance.ip.as_deref().unwrap_or("-"),
            instance.hostname.as_deref().unwrap_or("-"),
        );
    }
}

enum Step {
    Line(Option<String>),
    Notice(Notice),
    Engine,
    Interrupt,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    let api = Arc::new(ApiClient::new(config.server_url.clone())?);
    let (transport, inbound) = Transport::connect(
        session_ws_url(&config.server_url, &cli.session),
        TransportOptions {
            reconnect_interval: config.reconnect_interval(),
            protocol: config.protocol,
        },
    );

    let focus: Focus = Arc::new(Mutex::new(None));
    let (mut engine, mut notices) = SessionEngine::new(
        cli.session.clone(),
        EngineSettings::from(&config),
        Box::new(transport),
        inbound,
        api,
        Box::new(StdoutWidgets {
            focus: Arc::clone(&focus),
        }),
    );
    engine.core_mut().attach_builder(Box::new(StderrWidget));

    match engine.bootstrap().await {
        Ok(()) => {}
        Err(SessionError::NotFound(id)) => anyhow::bail!("session not found: {id}"),
        Err(e) => return Err(e).context("Failed to load session"),
    }

    if cli.new {
        engine.execute(Command::CreateInstance(CreateInstanceRequest {
            image: cli.image.clone(),
            ..CreateInstanceRequest::default()
        }))?;
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    while engine.core().session().is_alive() {
        let step = tokio::select! {
            line = lines.next_line() => Step::Line(line.context("Failed to read stdin")?),
            Some(notice) = notices.recv() => Step::Notice(notice),
            () = engine.step() => Step::Engine,
            _ = tokio::signal::ctrl_c() => Step::Interrupt,
        };

        match step {
            Step::Line(None) | Step::Interrupt => break,
            Step::Line(Some(line)) => {
                let result = match parse_line(&line, cli.image.as_deref()) {
                    LineAction::Command(command) => engine.execute(command),
                    LineAction::List => {
                        list_instances(&engine);
                        Ok(())
                    }
                    LineAction::Input(data) => {
                        let selected = focus.lock().ok().and_then(|f| f.clone());
                        match selected {
                            Some(name) => engine.execute(Command::Input {
                                name,
                                data: data.into_bytes(),
                            }),
                            None => {
                                eprintln!("no instance selected (use :new)");
                                Ok(())
                            }
                        }
                    }
                    LineAction::Unknown(line) => {
                        eprintln!("unknown command: {line}");
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    eprintln!("{e}");
                }
            }
            Step::Notice(notice) => eprintln!("{}", describe_notice(&notice)),
            Step::Engine => {}
        }
    }

    while let Ok(notice) = notices.try_recv() {
        eprintln!("{}", describe_notice(&notice));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_line_is_input() {
        assert_eq!(
            parse_line("docker ps", None),
            LineAction::Input("docker ps\r".into())
        );
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_line(":rm node1", None),
            LineAction::Command(Command::DeleteInstance {
                name: "node1".into()
            })
        );
        assert_eq!(
            parse_line(":sel node2", None),
            LineAction::Command(Command::Select {
                name: "node2".into()
            })
        );
        assert_eq!(
            parse_line(":new", Some("franela/dind")),
            LineAction::Command(Command::CreateInstance(CreateInstanceRequest {
                image: Some("franela/dind".into()),
                ..CreateInstanceRequest::default()
            }))
        );
        assert_eq!(parse_line(":ls", None), LineAction::List);
        assert_eq!(
            parse_line(":close", None),
            LineAction::Command(Command::CloseSession)
        );
        assert_eq!(parse_line(":rm", None), LineAction::Unknown(":rm".into()));
    }
}
