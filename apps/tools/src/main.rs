use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::domain::{ConversationId, EventId, RoomId};
use storage::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Inspect and seed the bridge's room/conversation and event/message mappings.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/bridge.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the conversation a room is bridged to.
    Room { room_id: String },
    /// Show the room a conversation belongs to.
    Conversation { conversation_id: i64 },
    /// Show the message an event was bridged as.
    Event { event_id: String },
    /// List every bridged room.
    List,
    /// Attach a room to an existing conversation.
    LinkRoom {
        room_id: String,
        conversation_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Room { room_id } => {
            let room_id = RoomId::new(room_id);
            match storage.conversation_for_room(&room_id).await? {
                Some(conversation_id) => {
                    println!("room {room_id} -> conversation_id={conversation_id}")
                }
                None => println!("room {room_id} is not bridged"),
            }
        }
        Command::Conversation { conversation_id } => {
            let conversation_id = ConversationId(conversation_id);
            match storage.room_for_conversation(conversation_id).await? {
                Some(room_id) => println!("conversation_id={conversation_id} -> room {room_id}"),
                None => println!("conversation_id={conversation_id} has no room"),
            }
        }
        Command::Event { event_id } => {
            let event_id = EventId::new(event_id);
            match storage.message_for_event(&event_id).await? {
                Some(message_id) => println!("event {event_id} -> message_id={message_id}"),
                None => println!("event {event_id} was not bridged"),
            }
        }
        Command::List => {
            let rooms = storage.list_room_conversations().await?;
            for room in &rooms {
                println!(
                    "{}\t{}\t{}",
                    room.room_id,
                    room.conversation_id,
                    room.created_at.to_rfc3339()
                );
            }
            println!(
                "{} rooms, {} bridged messages",
                rooms.len(),
                storage.count_event_messages().await?
            );
        }
        Command::LinkRoom {
            room_id,
            conversation_id,
        } => {
            let room_id = RoomId::new(room_id);
            if let Some(existing) = storage.conversation_for_room(&room_id).await? {
                bail!("room {room_id} is already bridged to conversation_id={existing}");
            }
            storage
                .insert_room_conversation(&room_id, ConversationId(conversation_id))
                .await?;
            info!(%room_id, conversation_id, "linked room");
            println!("linked room {room_id} -> conversation_id={conversation_id}");
        }
    }

    Ok(())
}
