use anyhow::{Context, Result};
use banter_session::{
    ConnectionState, MessageKind, RoomHandlers, SessionConfig, SessionHandle, WsConnector,
};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing::debug;
use tracing_subscriber::prelude::*;

mod rest;

use rest::ApiClient;

#[derive(Parser)]
#[command(name = "banter")]
#[command(about = "Terminal client for the banter chat server")]
struct Cli {
    /// Server base URL
    #[arg(long, global = true, default_value = "http://localhost:8080")]
    server: String,

    /// Live-connection URL (defaults to <server>/ws with a ws scheme)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Identity token (falls back to $BANTER_TOKEN)
    #[arg(long, env = "BANTER_TOKEN")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available channels
    Channels,
    /// Follow a channel live: history first, then pushes; stdin lines post
    Tail {
        /// Channel id
        room: i64,
        /// History page size
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Post a single message and exit
    Send {
        room: i64,
        body: String,
    },
    /// Delete a message by id
    Delete { message_id: i64 },
    /// Toggle your reaction on a message
    React { message_id: i64 },
    /// Update your display name (and optionally avatar)
    Rename {
        display_name: String,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Show the identity the server sees
    Whoami,
}

impl Cli {
    fn ws_url(&self) -> String {
        self.ws_url.clone().unwrap_or_else(|| {
            let base = self
                .server
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1);
            format!("{}/ws", base.trim_end_matches('/'))
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("banter=info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let cli = Cli::parse();
    let api = ApiClient::new(cli.server.clone(), cli.token.clone());

    match &cli.command {
        Commands::Channels => {
            for channel in api.channels().await? {
                match channel.description {
                    Some(description) => println!("{:>6}  {}  — {}", channel.id, channel.name, description),
                    None => println!("{:>6}  {}", channel.id, channel.name),
                }
            }
        }
        Commands::Tail { room, limit } => tail(&cli, &api, *room, *limit).await?,
        Commands::Send { room, body } => {
            let session = open_session(&cli, &api).await?;
            session.join(*room, RoomHandlers::noop()).await?;
            session
                .post_message(*room, body.clone(), MessageKind::Text)
                .await?;
            // The queue is flushed on connect; wait for it before tearing down
            session
                .state()
                .wait_for(|s| *s == ConnectionState::Connected)
                .await
                .context("session ended before the message went out")?;
            session.disconnect().await;
        }
        Commands::Delete { message_id } => {
            api.delete_message(*message_id).await?;
            println!("deleted {message_id}");
        }
        Commands::React { message_id } => {
            let count = api.toggle_reaction(*message_id).await?;
            println!("message {message_id} now has {count} reaction(s)");
        }
        Commands::Rename {
            display_name,
            avatar,
        } => {
            let user = api.update_profile(display_name, avatar.as_deref()).await?;
            println!("now known as {}", user.display_name);
        }
        Commands::Whoami => {
            let user = api.me().await?;
            println!("{} ({})", user.display_name, user.user_id);
        }
    }
    Ok(())
}

async fn open_session(cli: &Cli, api: &ApiClient) -> Result<SessionHandle> {
    let user = api.sync_user().await?;
    debug!(user = %user.user_id, "identity synced");
    let identity = banter_session::Identity {
        user_id: user.user_id,
        token: cli.token.clone(),
        display_name: user.display_name,
    };
    Ok(SessionHandle::connect(
        identity,
        WsConnector::new(cli.ws_url()),
        SessionConfig::default(),
    ))
}

async fn tail(cli: &Cli, api: &ApiClient, room: i64, limit: usize) -> Result<()> {
    let user = api.sync_user().await?;
    let display_name = user.display_name.clone();
    let identity = banter_session::Identity {
        user_id: user.user_id,
        token: cli.token.clone(),
        display_name: display_name.clone(),
    };
    let session = SessionHandle::connect(
        identity,
        WsConnector::new(cli.ws_url()),
        SessionConfig::default(),
    );

    let handlers = RoomHandlers::new(
        |message| println!("{}", render(message)),
        |names: &[String]| {
            if !names.is_empty() {
                println!("… {} typing", names.join(", "));
            }
        },
        |presence| println!("· {} online", presence.online_count),
    );
    session.join(room, handlers).await?;

    let history = api.messages(room, limit).await?;
    session.seed_history(room, history).await?;
    for message in session.messages(room).await? {
        println!("{}", render(&message));
    }

    let mut state = session.state();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => {
                    session.signal_typing(room, display_name.clone(), false).await?;
                    session
                        .post_message(room, line, MessageKind::Text)
                        .await?;
                }
                Some(_) => {}
                None => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                match *state.borrow_and_update() {
                    ConnectionState::Reconnecting => eprintln!("(connection lost, retrying)"),
                    ConnectionState::Connected => eprintln!("(connected)"),
                    ConnectionState::AuthRejected => {
                        anyhow::bail!("authentication rejected, check your token")
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.leave(room).await.ok();
    session.disconnect().await;
    Ok(())
}

fn render(message: &banter_session::ChatMessage) -> String {
    let time = chrono::DateTime::from_timestamp_millis(message.created_at)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let mut line = format!("[{time}] {}: {}", message.sender.display_name, message.body);
    if message.reaction_count > 0 {
        line.push_str(&format!("  (+{})", message.reaction_count));
    }
    line
}
