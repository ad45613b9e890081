//! `render`, `random` and `stop`.

use super::{Command, CommandContext, HandlerFuture};
use crate::error::{CommandError, CommandResult};
use crate::render::orchestrator::MAX_PROMPT_LEN;
use crate::render::{RenderJob, run_render, stop_render};
use crate::settings::CurrentRenderInfo;
use crate::util::truncate_text;
use tracing::debug;

/// Words drawn from by `random`.
const WORDS: &[&str] = &[
    "abandoned", "aerial", "amber", "ancient", "angel", "aquarium", "arcade", "armor", "aurora",
    "autumn", "avalanche", "balloon", "bamboo", "baroque", "beacon", "blossom", "bonfire",
    "botanical", "brass", "bridge", "butterfly", "cabin", "canyon", "carnival", "castle",
    "cathedral", "cavern", "celestial", "chrome", "cinematic", "citadel", "clockwork", "cloud",
    "coastline", "comet", "coral", "cosmic", "cottage", "crystal", "cyberpunk", "dawn", "desert",
    "dragon", "dreamlike", "dusk", "eclipse", "ember", "emerald", "enchanted", "ethereal", "falcon",
    "feather", "fjord", "foggy", "forest", "fountain", "fox", "frozen", "galaxy", "garden",
    "glacier", "glowing", "gothic", "granite", "harbor", "haunted", "hologram", "horizon",
    "iceberg", "illuminated", "ink", "island", "ivory", "jade", "jellyfish", "jungle", "knight",
    "labyrinth", "lagoon", "lantern", "lava", "library", "lighthouse", "lotus", "lunar", "marble",
    "meadow", "mechanical", "mermaid", "meteor", "misty", "monastery", "moonlit", "mosaic",
    "mountain", "mushroom", "nebula", "neon", "oasis", "obsidian", "ocean", "orchard", "origami",
    "owl", "pagoda", "palace", "panorama", "pastel", "peacock", "phoenix", "pirate", "planet",
    "porcelain", "portrait", "prism", "pyramid", "quartz", "rainforest", "raven", "reef", "ruins",
    "rustic", "sapphire", "savanna", "scarlet", "serene", "shadow", "shipwreck", "silhouette",
    "silver", "skyline", "snowfall", "solar", "spaceship", "spiral", "starlight", "steampunk",
    "storm", "sunflower", "sunset", "surreal", "swamp", "temple", "thunder", "tiger", "tower",
    "tranquil", "treehouse", "tropical", "tundra", "twilight", "underwater", "valley", "velvet",
    "victorian", "village", "vintage", "volcano", "waterfall", "whale", "whimsical", "willow",
    "windmill", "winter", "wizard", "wolf", "zen",
];

const DEFAULT_RANDOM_WORDS: i64 = 10;
const MAX_RANDOM_WORDS: i64 = 100;

/// Render commands. `render` comes first so `help` lists it first.
pub const COMMANDS: &[Command] = &[
    Command::new("render", &["r"], "Render the current settings", render),
    Command::new(
        "random",
        &["rand", "randomrender", "rr"],
        "Set a random prompt, optionally rendering it",
        random,
    ),
    Command::new("stop", &["s"], "Stop your render in this channel", stop),
];

/// `count` random words joined by `", "`.
#[must_use]
pub fn random_prompt(count: usize) -> String {
    (0..count)
        .filter_map(|_| fastrand::choice(WORDS))
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}

/// Take the channel's render lock and run a render with `args`.
async fn start_render(ctx: &CommandContext, args: &str) -> CommandResult {
    let guard = ctx.settings.try_begin_render(CurrentRenderInfo::new(
        ctx.message.author.id.as_str(),
        ctx.config.frames.loading_frame_url.as_str(),
    ))?;
    let summary = run_render(RenderJob {
        guard,
        backend: ctx.backends.image.as_ref(),
        gateway: ctx.gateway.as_ref(),
        config: &ctx.config,
        message: &ctx.message,
        args,
        typing: &ctx.typing,
    })
    .await?;
    debug!(task = summary.task, frames = summary.frames, "render command done");
    Ok(())
}

fn render(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(start_render(ctx, &ctx.args))
}

fn random(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        let count = if ctx.args.is_empty() {
            DEFAULT_RANDOM_WORDS
        } else {
            ctx.args.trim().parse::<i64>()?.clamp(1, MAX_RANDOM_WORDS)
        };
        ctx.can_change("prompt")?;

        let count = usize::try_from(count)
            .map_err(|_| CommandError::validation("invalid word count"))?;
        let prompt = truncate_text(&random_prompt(count), MAX_PROMPT_LEN);
        ctx.settings.update_params(|p| p.prompt.clone_from(&prompt));
        ctx.say(format!("**Prompt randomly set to:** {prompt}"))
            .await?;

        if matches!(ctx.alias.as_str(), "randomrender" | "rr") {
            start_render(ctx, "").await?;
        }
        Ok(())
    })
}

fn stop(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        stop_render(
            &ctx.settings,
            ctx.backends.image.as_ref(),
            &ctx.message.author.id,
        )
        .await?;
        ctx.say("**Stopped current render**").await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MemoryGateway;
    use crate::commands::testing::context;
    use crate::config::BotConfig;
    use easel::image::{OutputEntry, ProgressEvent};
    use easel::mock::{BackendCall, ScriptedImageBackend};
    use std::sync::Arc;

    #[test]
    fn test_random_prompt_word_count() {
        let prompt = random_prompt(7);
        assert_eq!(prompt.split(", ").count(), 7);
        assert!(random_prompt(0).is_empty());
    }

    #[tokio::test]
    async fn test_random_sets_prompt_without_rendering() {
        let gw = Arc::new(MemoryGateway::new());
        let backend = Arc::new(ScriptedImageBackend::new());
        let ctx = context(&gw, &backend, BotConfig::default(), "rand", "3");

        ctx.registry.dispatch("rand", &ctx).await.unwrap();
        let prompt = ctx.settings.params().prompt;
        assert_eq!(prompt.split(", ").count(), 3);
        assert_eq!(gw.texts(), vec![format!("**Prompt randomly set to:** {prompt}")]);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_random_rejects_garbage_and_clamps() {
        let gw = Arc::new(MemoryGateway::new());
        let backend = Arc::new(ScriptedImageBackend::new());
        let ctx = context(&gw, &backend, BotConfig::default(), "random", "many");
        let err = ctx.registry.dispatch("random", &ctx).await.unwrap_err();
        assert!(matches!(err, CommandError::Validation(_)));

        let ctx = context(&gw, &backend, BotConfig::default(), "random", "-4");
        ctx.registry.dispatch("random", &ctx).await.unwrap();
        assert_eq!(ctx.settings.params().prompt.split(", ").count(), 1);
    }

    #[tokio::test]
    async fn test_random_render_alias_renders() {
        let gw = Arc::new(MemoryGateway::new());
        let backend = Arc::new(
            ScriptedImageBackend::new()
                .push_poll(vec![ProgressEvent::succeeded(vec![OutputEntry::at_path("/f.png")])])
                .with_image("/f.png", b"\x89PNGdata".to_vec()),
        );
        let ctx = context(&gw, &backend, BotConfig::default(), "rr", "");

        ctx.registry.dispatch("rr", &ctx).await.unwrap();
        let submitted = backend.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].prompt, ctx.settings.params().prompt);
        assert!(!ctx.settings.is_rendering());
    }

    #[tokio::test]
    async fn test_render_refused_while_rendering() {
        let gw = Arc::new(MemoryGateway::new());
        let backend = Arc::new(ScriptedImageBackend::new());
        let ctx = context(&gw, &backend, BotConfig::default(), "r", "");
        let _guard = ctx
            .settings
            .try_begin_render(CurrentRenderInfo::new("u2", ""))
            .unwrap();

        let err = ctx.registry.dispatch("r", &ctx).await.unwrap_err();
        assert!(matches!(err, CommandError::AlreadyInProgress));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stop_replies_after_cancel() {
        let gw = Arc::new(MemoryGateway::new());
        let backend = Arc::new(ScriptedImageBackend::new());
        let ctx = context(&gw, &backend, BotConfig::default(), "s", "");
        let guard = ctx
            .settings
            .try_begin_render(CurrentRenderInfo::new("u1", ""))
            .unwrap();
        guard.assign_task(9);

        ctx.registry.dispatch("s", &ctx).await.unwrap();
        assert_eq!(backend.calls(), vec![BackendCall::Cancel(9)]);
        assert_eq!(gw.texts(), vec!["**Stopped current render**"]);
    }
}
