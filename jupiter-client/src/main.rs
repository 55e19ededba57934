use jupiter_client::config::ClientConfig;
use jupiter_client::{Engine, EngineEvent, EngineHandle};
use jupiter_proto::{user_status, Message};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const HELP: &str = "\
Commands:
  connect | disconnect
  login <user> <pass> | register <user> <pass> <email> | logout
  friends | msg <friend_id> <text> | history <friend_id> | read <friend_id>
  status <online|away|busy|offline>
  search <query> | invite <user_id> | invitations
  accept <request_id> | reject <request_id> | cancel <request_id>
  quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let (config, source) = load_config()?;

    // Initialize logging
    init_logging(&config);

    info!("Jupiter Client v{}", env!("CARGO_PKG_VERSION"));
    match source {
        Some(path) => info!("Loaded config from {}", path),
        None => warn!("No config file found, using default configuration"),
    }

    // Route engine events to the terminal
    let mut engine = Engine::new(config.connection.clone());
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    engine.subscribers_mut().on_event(move |event| {
        let _ = event_tx.send(event.clone());
    });

    let (handle, engine_task) = jupiter_client::spawn(engine);
    handle.connect();

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    println!("{}", HELP);

    // Interactive command loop
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }

        let input = line.trim();

        if input.is_empty() {
            continue;
        }

        match parse_command(input) {
            Ok(Command::Quit) => {
                info!("Exiting...");
                break;
            }
            Ok(command) => apply(&handle, command),
            Err(e) => println!("[ERROR] {}", e),
        }
    }

    handle.shutdown();
    if let Err(e) = engine_task.await {
        warn!("Engine task ended abnormally: {}", e);
    }
    printer.abort();

    Ok(())
}

#[derive(Debug, PartialEq)]
enum Command {
    Connect,
    Disconnect,
    Login { username: String, password: String },
    Register { username: String, password: String, email: String },
    Logout,
    Send(Message),
    /// Received and sent invitations arrive as two separate lists
    Invitations,
    Quit,
}

fn parse_command(input: &str) -> Result<Command, String> {
    let mut parts = input.splitn(2, ' ');
    let verb = parts.next().unwrap_or_default().to_lowercase();
    let rest = parts.next().unwrap_or("").trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match (verb.as_str(), args.as_slice()) {
        ("connect", []) => Command::Connect,
        ("disconnect", []) => Command::Disconnect,
        ("login", [username, password]) => Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        },
        ("register", [username, password, email]) => Command::Register {
            username: username.to_string(),
            password: password.to_string(),
            email: email.to_string(),
        },
        ("logout", []) => Command::Logout,
        ("friends", []) => Command::Send(Message::get_friends_list()),
        ("msg", [id, ..]) if args.len() > 1 => {
            let text = rest[id.len()..].trim();
            Command::Send(Message::send_chat(parse_id(id)?, text))
        }
        ("history", [id]) => Command::Send(Message::get_messages(parse_id(id)?)),
        ("read", [id]) => Command::Send(Message::mark_messages_read(parse_id(id)?)),
        ("status", [status]) => Command::Send(Message::status_update(parse_status(status)?)),
        ("search", [_, ..]) => Command::Send(Message::search_users(rest)),
        ("invite", [id]) => Command::Send(Message::add_friend_request(parse_id(id)?)),
        ("invitations", []) => Command::Invitations,
        ("accept", [id]) => Command::Send(Message::friend_request_accept(parse_id(id)?)),
        ("reject", [id]) => Command::Send(Message::friend_request_reject(parse_id(id)?)),
        ("cancel", [id]) => Command::Send(Message::cancel_friend_request(parse_id(id)?)),
        ("quit" | "exit", []) => Command::Quit,
        _ => return Err(format!("Unrecognized command: {}", input)),
    };

    Ok(command)
}

fn parse_id(raw: &str) -> Result<i64, String> {
    raw.parse().map_err(|_| format!("Expected a numeric id, got '{}'", raw))
}

fn parse_status(raw: &str) -> Result<&'static str, String> {
    match raw {
        "online" => Ok(user_status::ONLINE),
        "away" => Ok(user_status::AWAY),
        "busy" => Ok(user_status::BUSY),
        "offline" => Ok(user_status::OFFLINE),
        _ => Err(format!("Unknown status: {}", raw)),
    }
}

fn apply(handle: &EngineHandle, command: Command) {
    match command {
        Command::Connect => handle.connect(),
        Command::Disconnect => handle.disconnect(),
        Command::Login { username, password } => handle.login(&username, &password),
        Command::Register {
            username,
            password,
            email,
        } => handle.register(&username, &password, &email),
        Command::Logout => handle.logout(),
        Command::Send(message) => handle.send(message),
        Command::Invitations => {
            handle.send(Message::get_received_invitations());
            handle.send(Message::get_sent_invitations());
        }
        Command::Quit => {}
    }
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::ConnectionStatusChanged(status) => println!("[STATUS] {}", status),
        EngineEvent::Error(e) => println!("[ERROR] {}", e),
        EngineEvent::LoginSuccessful => println!("[OK] Logged in"),
        EngineEvent::RegistrationSuccessful => println!("[OK] Registered"),
        EngineEvent::MessageReceived(message) => {
            let body = serde_json::to_string(&message.fields).unwrap_or_default();
            println!("[{}] {}", message.msg_type, body);
        }
        EngineEvent::Connected | EngineEvent::Disconnected | EngineEvent::ConnectionTimedOut => {}
    }
}

/// Returns the config and the file it came from, if any. Logging is not
/// initialised yet, so the caller reports the source.
fn load_config() -> anyhow::Result<(ClientConfig, Option<&'static str>)> {
    for path in ["configs/client.toml", "client.toml"] {
        if !std::path::Path::new(path).exists() {
            continue;
        }
        let config = ClientConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path, e))?;
        return Ok((config, Some(path)));
    }

    Ok((ClientConfig::default_config(), None))
}

fn init_logging(config: &ClientConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level));

    if config.logging.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }
}
