//! `listmodels` and `help`.

use super::{Command, CommandContext, HandlerFuture};

/// Informational commands.
pub const COMMANDS: &[Command] = &[
    Command::new(
        "listmodels",
        &["lm"],
        "List the engine's models",
        list_models,
    ),
    Command::new("help", &["h", "?"], "Show usage", help),
];

fn list_models(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        let catalog = ctx.backends.image.fetch_model_catalog().await?;
        let options = &catalog.options;
        ctx.say(format!(
            "**Models:**\n__Stable Diffusion__: {}\n__VAE__: {}\n__HyperNetwork__: {}",
            options.stable_diffusion.join(", "),
            options.vae.join(", "),
            options.hypernetwork.join(", "),
        ))
        .await
    })
}

fn help(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        ctx.say(format!(
            "**Usage:** {}<command> [args]\n**Commands:** {}",
            ctx.prefix,
            ctx.registry.names().join(", ")
        ))
        .await
    })
}
