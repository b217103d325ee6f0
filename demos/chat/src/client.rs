//! Interactive terminal client.

use loadchat_client::{
    Attachment, ChannelConfig, ChannelIdentity, ConnectionState, NormalizedEvent,
    RealtimeChannel, RecordId,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One line of user input.
#[derive(Debug, Clone, PartialEq)]
enum Input {
    Say(String),
    Typing,
    Stop,
    Edit { id: RecordId, text: String },
    Delete(RecordId),
    File(PathBuf),
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Say(line.to_string()));
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));
    match name {
        "typing" => Ok(Input::Typing),
        "stop" => Ok(Input::Stop),
        "quit" => Ok(Input::Quit),
        "delete" if !rest.is_empty() => Ok(Input::Delete(RecordId::from(rest))),
        "edit" => match rest.split_once(char::is_whitespace) {
            Some((id, text)) if !text.trim().is_empty() => Ok(Input::Edit {
                id: RecordId::from(id),
                text: text.trim().to_string(),
            }),
            _ => Err("usage: /edit <id> <text>".to_string()),
        },
        "file" if !rest.is_empty() => Ok(Input::File(PathBuf::from(rest))),
        "delete" => Err("usage: /delete <id>".to_string()),
        "file" => Err("usage: /file <path>".to_string()),
        other => Err(format!("unknown command: /{other}")),
    }
}

fn print_event(event: &NormalizedEvent) {
    match event {
        NormalizedEvent::ChatMessage(message) => {
            let id = message.id.as_ref().map(ToString::to_string).unwrap_or_default();
            let user = message.user.as_ref().map(ToString::to_string).unwrap_or_default();
            let text = message.message.as_deref().unwrap_or("");
            match (&message.file_name, &message.file_url) {
                (Some(name), Some(url)) => println!("[{id}] {user}: {text} ({name} {url})"),
                _ => println!("[{id}] {user}: {text}"),
            }
        }
        NormalizedEvent::ConnectionEstablished(hello) => {
            println!("* {}", hello.message.as_deref().unwrap_or("connected"));
        }
        NormalizedEvent::Generic(generic) => {
            let fields = serde_json::to_string(&generic.fields).unwrap_or_default();
            println!("* {} {fields}", generic.kind.as_deref().unwrap_or("event"));
        }
    }
}

pub async fn run(config: ChannelConfig, identity: ChannelIdentity) -> anyhow::Result<()> {
    let channel = RealtimeChannel::new(config);
    channel.on_new_message(print_event);
    channel.on_message_updated(print_event);
    channel.on_message_deleted(print_event);
    channel.on_user_typing(print_event);
    channel.on_user_stopped_typing(print_event);
    channel.on_connection_established(print_event);

    let mut states = channel.subscribe_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            match *states.borrow_and_update() {
                ConnectionState::Retrying { attempt } => println!("* reconnecting ({attempt})"),
                ConnectionState::Closed { code, .. } => println!("* closed ({code})"),
                _ => {}
            }
        }
    });

    channel.connect(identity.clone()).await?;
    channel.join_room()?;
    tracing::info!(%identity, "joined conversation");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_input(&line) {
            Ok(input) => input,
            Err(usage) => {
                eprintln!("{usage}");
                continue;
            }
        };

        let result = match input {
            Input::Empty => Ok(()),
            Input::Quit => break,
            Input::Say(text) => channel.send_message(text),
            Input::Typing => channel.start_typing(),
            Input::Stop => channel.stop_typing(),
            Input::Edit { id, text } => channel.update_message(id, text),
            Input::Delete(id) => channel.delete_message(id),
            Input::File(path) => match Attachment::from_path(&path).await {
                Ok(attachment) => channel
                    .send_file(
                        attachment,
                        "",
                        identity.conversation_id().clone(),
                        identity.user_id().clone(),
                    )
                    .await
                    .map(|_| ()),
                Err(e) => {
                    eprintln!("cannot read {}: {e}", path.display());
                    continue;
                }
            },
        };
        if let Err(e) = result {
            eprintln!("{e}");
        }
    }

    if channel.is_open() {
        let _ = channel.leave_room();
    }
    channel.disconnect();
    Ok(())
}
