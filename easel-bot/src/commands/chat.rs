//! `chat` and `kobold`: text generation.
//!
//! Each backend serves one request at a time; a second request while one is
//! running gets a busy reply instead of queueing. With DM output enabled the
//! answer goes to the requester's direct messages.

use super::{Command, CommandContext, HandlerFuture, TextSlot};
use crate::error::{CommandError, CommandResult};
use crate::heartbeat::TypingHeartbeat;
use crate::util::{MAX_MESSAGE_LEN, truncate_str};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Text generation commands.
pub const COMMANDS: &[Command] = &[
    Command::new("chat", &["ch"], "Ask the chat backend", chat),
    Command::new("kobold", &["kb"], "Continue a text with Kobold", kobold),
];

/// How one text command presents itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Chat,
    Kobold,
}

impl Flavor {
    const fn feature(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Kobold => "kobold",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Chat => "Chat",
            Self::Kobold => "Kobold",
        }
    }

    fn placeholder(self, prompt: &str) -> String {
        match self {
            Self::Chat => "*(Generating...)*".to_string(),
            Self::Kobold => format!("**Kobold:** {prompt} *(Generating...)*"),
        }
    }

    fn answer(self, prompt: &str, generated: &str) -> String {
        let text = match self {
            Self::Chat => generated.to_string(),
            Self::Kobold => format!("**Kobold:** {prompt}{generated}"),
        };
        truncate_str(&text, MAX_MESSAGE_LEN).to_string()
    }
}

fn chat(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(generate(ctx, ctx.backends.chat.clone(), Flavor::Chat))
}

fn kobold(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(generate(ctx, ctx.backends.kobold.clone(), Flavor::Kobold))
}

async fn generate(
    ctx: &CommandContext,
    slot: Option<Arc<TextSlot>>,
    flavor: Flavor,
) -> CommandResult {
    let slot = slot.ok_or_else(|| CommandError::Disabled(flavor.feature().to_string()))?;
    if ctx.args.is_empty() {
        return ctx.say("**Please specify a prompt!**").await;
    }
    let Some(_claim) = slot.try_claim() else {
        return ctx
            .say(format!(
                "**{} is busy, please wait a few seconds!**",
                flavor.label()
            ))
            .await;
    };

    if slot.dm_output() {
        return generate_to_dm(ctx, &slot, flavor).await;
    }

    match flavor {
        Flavor::Chat => {
            let placeholder = ctx.reply(&flavor.placeholder(&ctx.args)).await?;
            let generated = query(ctx, &slot, flavor).await?;
            ctx.gateway
                .edit_message(&placeholder, &flavor.answer(&ctx.args, &generated))
                .await?;
        }
        Flavor::Kobold => {
            let generated = query(ctx, &slot, flavor).await?;
            ctx.say(flavor.answer(&ctx.args, &generated)).await?;
        }
    }
    Ok(())
}

async fn generate_to_dm(ctx: &CommandContext, slot: &TextSlot, flavor: Flavor) -> CommandResult {
    let notice = format!(
        "**{} will direct message the response to the sender!**",
        flavor.label()
    );
    if let Err(e) = ctx.say(notice).await {
        warn!(error = %e, "failed to announce direct message");
    }
    ctx.typing.stop();

    let dm = ctx
        .gateway
        .create_dm_channel(&ctx.message.author.id)
        .await?;
    let placeholder = ctx
        .gateway
        .send_message(&dm, &flavor.placeholder(&ctx.args))
        .await?;

    let heartbeat = TypingHeartbeat::start(
        Arc::clone(&ctx.gateway),
        dm.clone(),
        Duration::from_secs(ctx.config.typing_interval_secs),
    );
    let generated = query(ctx, slot, flavor).await;
    heartbeat.finish().await;

    ctx.gateway
        .edit_message(&placeholder, &flavor.answer(&ctx.args, &generated?))
        .await?;
    Ok(())
}

async fn query(ctx: &CommandContext, slot: &TextSlot, flavor: Flavor) -> CommandResult<String> {
    match slot.backend().generate(&ctx.args).await {
        Ok(generated) => {
            info!(
                feature = flavor.feature(),
                chars = generated.len(),
                "text generated"
            );
            Ok(generated)
        }
        Err(e) => {
            warn!(feature = flavor.feature(), error = %e, "text generation failed");
            Err(e.into())
        }
    }
}
