//! Discord client event loop: button/modal interactions for the "Ask AI"
//! flow (spec §4.4, §4.6). "Listen Live" is a plain link button (see
//! [`super::discord::SerenityDiscordSender::action_row`]) and needs no
//! handler here.

use std::sync::Arc;

use serenity::all::{
    ActionRowComponent, Context, CreateActionRow, CreateInputText, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateModal, EventHandler, Interaction, InputTextStyle,
    Ready,
};
use serenity::async_trait;

use crate::summarizer::Summarizer;

const ASK_AI_PREFIX: &str = "ask_ai:";
const QUESTION_INPUT_ID: &str = "question";

pub struct BotHandler {
    summarizer: Arc<Summarizer>,
}

impl BotHandler {
    pub fn new(summarizer: Arc<Summarizer>) -> Self {
        Self { summarizer }
    }
}

#[async_trait]
impl EventHandler for BotHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(bot = %ready.user.name, "discord client connected");
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Component(component) => {
                let Some(talk_group_id) = component.data.custom_id.strip_prefix(ASK_AI_PREFIX) else {
                    return;
                };
                let modal = CreateModal::new(component.data.custom_id.clone(), format!("Ask about talkgroup {talk_group_id}"))
                    .components(vec![CreateActionRow::InputText(
                        CreateInputText::new(InputTextStyle::Paragraph, "Your question", QUESTION_INPUT_ID)
                            .placeholder("What's happening on this talkgroup?")
                            .required(true),
                    )]);
                if let Err(e) = component.create_response(&ctx.http, CreateInteractionResponse::Modal(modal)).await {
                    tracing::warn!(error = %e, "failed to open ask-ai modal");
                }
            }
            Interaction::Modal(modal) => {
                let Some(talk_group_id) = modal.data.custom_id.strip_prefix(ASK_AI_PREFIX) else {
                    return;
                };
                let question = modal
                    .data
                    .components
                    .iter()
                    .flat_map(|row| row.components.iter())
                    .find_map(|c| match c {
                        ActionRowComponent::InputText(input) if input.custom_id == QUESTION_INPUT_ID => {
                            input.value.clone()
                        }
                        _ => None,
                    })
                    .unwrap_or_default();

                if let Err(e) = modal.create_response(&ctx.http, CreateInteractionResponse::Defer(Default::default())).await {
                    tracing::warn!(error = %e, "failed to defer ask-ai modal response");
                    return;
                }

                let answer = match self.summarizer.ask(talk_group_id, &question).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        tracing::warn!(error = %e, talk_group_id, "ask-ai failed");
                        "Sorry, I couldn't answer that right now.".to_string()
                    }
                };

                let followup = CreateInteractionResponseMessage::new().content(answer).ephemeral(true);
                if let Err(e) = modal.create_followup(&ctx.http, followup).await {
                    tracing::warn!(error = %e, "failed to send ask-ai followup");
                }
            }
            _ => {}
        }
    }
}
