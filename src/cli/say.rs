//! Non-interactive "say" command

use std::error::Error;
use std::sync::Arc;

use crate::cli::chat::stream_turn;
use crate::cli::model_list::auto_select_model;
use crate::core::chat_stream::ChatClient;
use crate::core::config::Settings;
use crate::core::session::{Conversation, TurnOutcome};

pub async fn run_say(settings: &Settings, prompt: &str) -> Result<(), Box<dyn Error>> {
    if prompt.trim().is_empty() {
        return Err("Usage: lmchat say <prompt>".into());
    }

    let client = ChatClient::new(&settings.client_config())?;
    let mut settings = settings.clone();
    if settings.selected_model.trim().is_empty() {
        auto_select_model(&client, &mut settings).await?;
    }

    let mut conversation = Conversation::new(Arc::new(client), settings.chat_settings());
    let turn = conversation.send(prompt)?;
    match stream_turn(&mut conversation, turn).await? {
        TurnOutcome::Committed | TurnOutcome::Cancelled => Ok(()),
        TurnOutcome::Failed(message) => Err(message.into()),
    }
}
