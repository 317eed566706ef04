//! Line-oriented interactive chat
//!
//! Reads prompts from stdin and streams replies to stdout. Ctrl+C stops the
//! reply in progress; at the prompt it leaves the chat.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::api::{ChatMessage, Role};
use crate::cli::model_list::auto_select_model;
use crate::core::chat_stream::ChatClient;
use crate::core::config::Settings;
use crate::core::session::{ActiveTurn, Conversation, SendRejection, TurnOutcome};
use crate::utils::logging::TranscriptLog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Message(String),
    /// An empty line; sends the restored text after `/resend`.
    Empty,
    Resend,
    Clear,
    Usage,
    Model(Option<String>),
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_input(line: &str) -> ChatInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ChatInput::Message(trimmed.to_string());
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match name {
        "resend" | "retry" => ChatInput::Resend,
        "clear" => ChatInput::Clear,
        "usage" => ChatInput::Usage,
        "model" if rest.is_empty() => ChatInput::Model(None),
        "model" => ChatInput::Model(Some(rest.to_string())),
        "help" => ChatInput::Help,
        "quit" | "exit" => ChatInput::Quit,
        _ => ChatInput::Unknown(name.to_string()),
    }
}

pub async fn run_chat(mut settings: Settings, log_file: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let client = ChatClient::new(&settings.client_config())?;
    let log = log_file.map(TranscriptLog::open).transpose()?;

    let base_url = client.endpoint().base_url.clone();
    match client.check_connection().await {
        Some(latency) => println!("✅ Connected to {base_url} ({latency} ms)"),
        None => println!("⚠️  Could not reach {base_url}; requests will probably fail"),
    }

    if settings.selected_model.trim().is_empty() {
        match auto_select_model(&client, &mut settings).await {
            Ok(Some(model)) => println!("🎯 No model selected; using {model}"),
            Ok(None) => println!("⚠️  The server reported no models; pick one with /model <id>"),
            Err(err) => println!("⚠️  {err}"),
        }
    }

    let mut conversation = Conversation::new(Arc::new(client), settings.chat_settings());
    print_banner(&conversation);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let turn = match parse_input(&line) {
            ChatInput::Quit => break,
            ChatInput::Message(text) => conversation.send(&text),
            ChatInput::Empty if !conversation.input().is_empty() => conversation.send_input(),
            ChatInput::Empty => continue,
            ChatInput::Resend => {
                match conversation.resend() {
                    Some(text) => {
                        println!("↩️  Took back: {text}");
                        println!("   Press Enter to send it again or type a replacement.");
                        rewrite_log(log.as_ref(), conversation.messages());
                    }
                    None => println!("Nothing to resend."),
                }
                continue;
            }
            ChatInput::Clear => {
                if conversation.clear() {
                    println!("🧹 Conversation cleared.");
                    rewrite_log(log.as_ref(), conversation.messages());
                }
                continue;
            }
            ChatInput::Usage => {
                match conversation.usage() {
                    Some(usage) => println!(
                        "📊 prompt: {} tokens, completion: {} tokens",
                        usage.prompt, usage.completion
                    ),
                    None => println!("No usage reported yet."),
                }
                continue;
            }
            ChatInput::Model(Some(model)) => {
                conversation.set_model(model.clone());
                println!("🤖 Model: {model}");
                continue;
            }
            ChatInput::Model(None) => {
                println!("🤖 Model: {}", model_label(&conversation));
                continue;
            }
            ChatInput::Help => {
                print_help();
                continue;
            }
            ChatInput::Unknown(name) => {
                println!("Unknown command /{name}. Type /help for the list.");
                continue;
            }
        };

        let turn = match turn {
            Ok(turn) => turn,
            Err(SendRejection::NoModelSelected) => {
                println!("⚠️  {}. Use /model <id> or 'lmchat models'.", SendRejection::NoModelSelected);
                continue;
            }
            Err(rejection) => {
                println!("⚠️  {rejection}");
                continue;
            }
        };

        if let Some(user) = conversation
            .messages()
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
        {
            append_log(log.as_ref(), user);
        }

        match stream_turn(&mut conversation, turn).await? {
            TurnOutcome::Committed => {
                if let Some(reply) = conversation.messages().last() {
                    append_log(log.as_ref(), reply);
                }
            }
            TurnOutcome::Cancelled => {
                println!("⏹️  Stopped.");
                if let Some(reply) = conversation.messages().last() {
                    append_log(log.as_ref(), reply);
                }
                if let Some(log) = log.as_ref() {
                    if let Err(err) = log.log_note("Response stopped") {
                        warn!(error = %err, "Failed to write transcript log");
                    }
                }
            }
            TurnOutcome::Failed(message) => println!("❌ {message}"),
        }
    }

    Ok(())
}

/// Print a turn's text as it arrives; Ctrl+C stops it.
pub async fn stream_turn(
    conversation: &mut Conversation,
    mut turn: ActiveTurn,
) -> io::Result<TurnOutcome> {
    let stop_watcher = conversation.stop_handle().map(|stop| {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.stop();
            }
        })
    });

    let mut stdout = io::stdout();
    let mut printed = 0;
    let outcome = loop {
        let update = turn.next_update().await;
        let outcome = conversation.apply_update(turn.stream_id(), update);

        if let Some(reply) = conversation
            .messages()
            .last()
            .filter(|message| message.role == Role::Assistant)
        {
            if reply.content.len() > printed {
                write!(stdout, "{}", &reply.content[printed..])?;
                stdout.flush()?;
                printed = reply.content.len();
            }
        }

        if let Some(outcome) = outcome {
            break outcome;
        }
    };

    if printed > 0 {
        writeln!(stdout)?;
    }
    if let Some(watcher) = stop_watcher {
        watcher.abort();
    }
    Ok(outcome)
}

fn model_label(conversation: &Conversation) -> &str {
    let model = conversation.settings().model.as_str();
    if model.is_empty() {
        "(none selected)"
    } else {
        model
    }
}

fn print_banner(conversation: &Conversation) {
    let settings = conversation.settings();
    println!(
        "💬 Model: {} | Temp: {} | Max tokens: {}",
        model_label(conversation),
        settings.temperature,
        settings.max_tokens
    );
    println!("   Type a message and press Enter. /help lists commands.");
}

fn print_help() {
    println!("Commands:");
    println!("  /resend        Take back the last exchange and edit it");
    println!("  /clear         Start over with an empty conversation");
    println!("  /usage         Show token usage of the last reply");
    println!("  /model [id]    Show or switch the model");
    println!("  /quit          Leave (Ctrl+C or Ctrl+D at the prompt also work)");
    println!("  Ctrl+C while a reply streams stops it and keeps what arrived.");
}

fn append_log(log: Option<&TranscriptLog>, message: &ChatMessage) {
    if let Some(log) = log {
        if let Err(err) = log.log_message(message) {
            warn!(path = %log.path().display(), error = %err, "Failed to write transcript log");
        }
    }
}

fn rewrite_log(log: Option<&TranscriptLog>, messages: &[ChatMessage]) {
    if let Some(log) = log {
        if let Err(err) = log.rewrite(messages) {
            warn!(path = %log.path().display(), error = %err, "Failed to rewrite transcript log");
        }
    }
}
