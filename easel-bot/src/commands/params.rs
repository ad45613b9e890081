//! Commands that show or change channel render settings.
//!
//! Without arguments each command shows the current value; with arguments it
//! validates and stores the new one.

use super::{Command, CommandContext, HandlerFuture};
use crate::error::{CommandError, CommandResult};
use crate::render::img2img::clamp_strength;
use crate::render::orchestrator::MAX_PROMPT_LEN;
use crate::util::{format_float, string_or_none, truncate_text};

/// Image sizes the engine accepts, per side.
pub const VALID_SIZES: [u32; 19] = [
    128, 192, 256, 320, 384, 448, 512, 576, 640, 704, 768, 832, 896, 960, 1024, 1280, 1536, 1792,
    2048,
];

/// Samplers the engine accepts.
pub const VALID_SAMPLERS: [&str; 19] = [
    "plms",
    "ddim",
    "heun",
    "euler",
    "euler_a",
    "dpm2",
    "dpm2_a",
    "lms",
    "dpm_solver_stability",
    "dpmpp_2s_a",
    "dpmpp_2m",
    "dpmpp_sde",
    "dpm_fast",
    "dpm_adaptive",
    "unipc_snr",
    "unipc_tu",
    "unipc_snr_2",
    "unipc_tu_2",
    "unipc_tq",
];

/// Upscalers the engine accepts.
pub const VALID_UPSCALERS: [&str; 2] = ["RealESRGAN_x4plus", "RealESRGAN_x4plus_anime_6B"];

/// Upscale factors the engine accepts.
pub const VALID_UPSCALE_AMOUNTS: [u32; 2] = [2, 4];

const MIN_STEPS: u32 = 1;
const MAX_STEPS: u32 = 100;
const MIN_GUIDANCE: f64 = 1.1;
const MAX_GUIDANCE: f64 = 50.0;

/// Short names accepted by `clear`, with the property they stand for.
const CLEAR_ALIASES: [(&str, &str); 10] = [
    ("p", "prompt"),
    ("np", "negativeprompt"),
    ("ps", "promptstrength"),
    ("is", "inferencesteps"),
    ("gs", "guidancescale"),
    ("sz", "size"),
    ("v", "vae"),
    ("hn", "hypernetwork"),
    ("u", "upscaler"),
    ("ua", "upscaleamount"),
];

/// Setting commands.
pub const COMMANDS: &[Command] = &[
    Command::new("prompt", &["p"], "Show or set the prompt", prompt),
    Command::new(
        "negativeprompt",
        &["np"],
        "Show or set the negative prompt",
        negative_prompt,
    ),
    Command::new("size", &["sz"], "Show or set the image size", size),
    Command::new(
        "inferencesteps",
        &["is"],
        "Show or set the inference steps",
        inference_steps,
    ),
    Command::new(
        "guidancescale",
        &["gs"],
        "Show or set the guidance scale",
        guidance_scale,
    ),
    Command::new(
        "promptstrength",
        &["ps"],
        "Show or set the Img2Img prompt strength",
        prompt_strength,
    ),
    Command::new("sampler", &["sm"], "Show or set the sampler", sampler),
    Command::new("model", &["m"], "Show or set the model", model),
    Command::new("vae", &["v"], "Show or set the VAE", vae),
    Command::new(
        "hypernetwork",
        &["hn"],
        "Show or set the hypernetwork",
        hypernetwork,
    ),
    Command::new("upscaler", &["u"], "Show or set the upscaler", upscaler),
    Command::new(
        "upscaleamount",
        &["ua"],
        "Show or set the upscale amount",
        upscale_amount,
    ),
    Command::new("clear", &["cl"], "Reset a property", clear),
];

/// Parse one side length.
///
/// # Errors
///
/// Returns a validation error for non-numbers and sizes not in [`VALID_SIZES`].
pub fn parse_size(raw: &str) -> CommandResult<u32> {
    let value: u32 = raw.trim().parse()?;
    if VALID_SIZES.contains(&value) {
        Ok(value)
    } else {
        Err(CommandError::validation("invalid size"))
    }
}

/// Parse `WxH`, `W H` or a single value used for both sides.
///
/// # Errors
///
/// Returns a validation error if either side is invalid.
pub fn parse_sizes(raw: &str) -> CommandResult<(u32, u32)> {
    let normalized = raw.trim().to_lowercase().replace('x', " ");
    match normalized.split_once(' ') {
        None => {
            let side = parse_size(&normalized)?;
            Ok((side, side))
        }
        Some((width, height)) => Ok((parse_size(width)?, parse_size(height)?)),
    }
}

fn parse_finite(raw: &str) -> CommandResult<f64> {
    let value: f64 = raw.trim().parse()?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CommandError::validation("value must be a finite number"))
    }
}

fn pick<'a>(options: &[&'a str], wanted: &str) -> Option<&'a str> {
    options
        .iter()
        .copied()
        .find(|o| o.eq_ignore_ascii_case(wanted))
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn prompt(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().prompt;
            return ctx
                .say(format!("**Current prompt:** {}", string_or_none(&current)))
                .await;
        }
        ctx.can_change("prompt")?;
        let prompt = truncate_text(&ctx.args, MAX_PROMPT_LEN);
        ctx.settings.update_params(|p| p.prompt.clone_from(&prompt));
        ctx.say(format!("**Prompt set to:** {prompt}")).await
    })
}

fn negative_prompt(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().negative_prompt;
            return ctx
                .say(format!(
                    "**Current negative prompt:** {}",
                    string_or_none(&current)
                ))
                .await;
        }
        ctx.can_change("negativeprompt")?;
        let negative = truncate_text(&ctx.args, MAX_PROMPT_LEN);
        ctx.settings
            .update_params(|p| p.negative_prompt.clone_from(&negative));
        ctx.say(format!("**Negative prompt set to:** {negative}"))
            .await
    })
}

fn size(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let params = ctx.settings.params();
            return ctx
                .say(format!(
                    "**Current size:** {}x{}\nSizes: {}",
                    params.width,
                    params.height,
                    join(&VALID_SIZES)
                ))
                .await;
        }
        ctx.can_change("size")?;
        let (width, height) = parse_sizes(&ctx.args)?;
        ctx.settings.update_params(|p| {
            p.width = width;
            p.height = height;
        });
        ctx.say(format!("**Size set to:** {width}x{height}")).await
    })
}

fn inference_steps(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().inference_steps;
            return ctx
                .say(format!("**Current inference steps:** {current}"))
                .await;
        }
        ctx.can_change("inferencesteps")?;
        let steps = ctx.args.trim().parse::<u32>()?.clamp(MIN_STEPS, MAX_STEPS);
        ctx.settings.update_params(|p| p.inference_steps = steps);
        ctx.say(format!("**Inference steps set to:** {steps}")).await
    })
}

fn guidance_scale(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().guidance_scale;
            return ctx
                .say(format!(
                    "**Current guidance scale:** {}",
                    format_float(current)
                ))
                .await;
        }
        ctx.can_change("guidancescale")?;
        let scale = parse_finite(&ctx.args)?.clamp(MIN_GUIDANCE, MAX_GUIDANCE);
        ctx.settings.update_params(|p| p.guidance_scale = scale);
        ctx.say(format!("**Guidance scale set to:** {}", format_float(scale)))
            .await
    })
}

fn prompt_strength(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().prompt_strength;
            return ctx
                .say(format!(
                    "**Current Img2Img prompt strength:** {}",
                    format_float(current)
                ))
                .await;
        }
        ctx.can_change("promptstrength")?;
        let strength = clamp_strength(parse_finite(&ctx.args)?);
        ctx.settings.update_params(|p| p.prompt_strength = strength);
        ctx.say(format!(
            "**Img2Img prompt strength set to:** {}",
            format_float(strength)
        ))
        .await
    })
}

fn sampler(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().sampler;
            return ctx
                .say(format!(
                    "**Current Sampler:** {current}\nSamplers: {}",
                    VALID_SAMPLERS.join(", ")
                ))
                .await;
        }
        ctx.can_change("sampler")?;
        let sampler = pick(&VALID_SAMPLERS, &ctx.args)
            .ok_or_else(|| CommandError::validation("invalid sampler"))?;
        ctx.settings
            .update_params(|p| p.sampler = sampler.to_string());
        ctx.say(format!("**Sampler set to:** {sampler}")).await
    })
}

fn model(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().model;
            return ctx.say(format!("**Current Model:** {current}")).await;
        }
        ctx.can_change("model")?;
        let catalog = ctx.backends.image.fetch_model_catalog().await?;
        let model = catalog
            .find_model(&ctx.args)
            .ok_or_else(|| CommandError::validation("invalid model"))?
            .to_string();
        ctx.settings.update_params(|p| p.model.clone_from(&model));
        ctx.say(format!("**Model set to:** {model}")).await
    })
}

fn vae(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().vae;
            return ctx
                .say(format!("**Current VAE:** {}", string_or_none(&current)))
                .await;
        }
        ctx.can_change("vae")?;
        let catalog = ctx.backends.image.fetch_model_catalog().await?;
        let vae = catalog
            .find_vae(&ctx.args)
            .ok_or_else(|| CommandError::validation("invalid vae"))?
            .to_string();
        ctx.settings.update_params(|p| p.vae.clone_from(&vae));
        ctx.say(format!("**VAE set to:** {vae}")).await
    })
}

fn hypernetwork(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().hypernetwork;
            return ctx
                .say(format!(
                    "**Current HyperNetwork:** {}",
                    string_or_none(&current)
                ))
                .await;
        }
        ctx.can_change("hypernetwork")?;
        let catalog = ctx.backends.image.fetch_model_catalog().await?;
        let hypernetwork = catalog
            .find_hypernetwork(&ctx.args)
            .ok_or_else(|| CommandError::validation("invalid HyperNetwork"))?
            .to_string();
        ctx.settings
            .update_params(|p| p.hypernetwork.clone_from(&hypernetwork));
        ctx.say(format!("**HyperNetwork set to:** {hypernetwork}"))
            .await
    })
}

fn upscaler(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().upscaler;
            return ctx
                .say(format!(
                    "**Current upscaler:** {}\nUpscalers: {}",
                    string_or_none(&current),
                    VALID_UPSCALERS.join(", ")
                ))
                .await;
        }
        ctx.can_change("upscaler")?;
        let upscaler = pick(&VALID_UPSCALERS, &ctx.args)
            .ok_or_else(|| CommandError::validation("invalid upscaler"))?;
        ctx.settings
            .update_params(|p| p.upscaler = upscaler.to_string());
        ctx.say(format!("**Upscaler set to:** {upscaler}")).await
    })
}

fn upscale_amount(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        if ctx.args.is_empty() {
            let current = ctx.settings.params().upscale_amount;
            return ctx
                .say(format!(
                    "**Current upscale amount:** {current}\nUpscale amounts: {}",
                    join(&VALID_UPSCALE_AMOUNTS)
                ))
                .await;
        }
        ctx.can_change("upscaleamount")?;
        let amount: u32 = ctx.args.trim().parse()?;
        if !VALID_UPSCALE_AMOUNTS.contains(&amount) {
            return Err(CommandError::validation("invalid upscale amount"));
        }
        ctx.settings.update_params(|p| p.upscale_amount = amount);
        ctx.say(format!("**Upscale amount set to:** {amount}")).await
    })
}

fn clear(ctx: &CommandContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        let wanted = ctx.args.to_lowercase();
        if wanted.is_empty() {
            let valid = CLEAR_ALIASES
                .iter()
                .map(|(short, long)| format!("{short}/{long}"))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CommandError::validation(format!(
                "invalid property specified, valid properties: {valid}"
            )));
        }

        let property = CLEAR_ALIASES
            .iter()
            .find(|(short, long)| *short == wanted || *long == wanted)
            .map(|(_, long)| *long)
            .ok_or_else(|| CommandError::validation("invalid property specified"))?;
        ctx.can_change(property)?;

        let defaults = &ctx.config.defaults;
        ctx.settings.update_params(|p| match property {
            "prompt" => p.prompt.clear(),
            "negativeprompt" => p.negative_prompt.clear(),
            "promptstrength" => p.prompt_strength = defaults.prompt_strength,
            "inferencesteps" => p.inference_steps = defaults.inference_steps,
            "guidancescale" => p.guidance_scale = defaults.guidance_scale,
            "size" => {
                p.width = defaults.width;
                p.height = defaults.height;
            }
            "vae" => p.vae.clear(),
            "hypernetwork" => p.hypernetwork.clear(),
            "upscaler" => p.upscaler.clear(),
            _ => p.upscale_amount = defaults.upscale_amount,
        });
        ctx.say("**Successfully cleared property**").await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MemoryGateway;
    use crate::commands::testing::context;
    use crate::config::BotConfig;
    use crate::settings::CurrentRenderInfo;
    use easel::image::{ModelCatalog, ModelOptions};
    use easel::mock::ScriptedImageBackend;
    use std::sync::Arc;

    async fn run(alias: &str, args: &str, config: BotConfig) -> (CommandResult, CommandContext, Arc<MemoryGateway>) {
        let gw = Arc::new(MemoryGateway::new());
        let backend = Arc::new(ScriptedImageBackend::new().with_catalog(ModelCatalog {
            options: ModelOptions {
                stable_diffusion: vec!["sd-v1-5".into(), "Anything-V3".into()],
                vae: vec!["vae-ft-mse".into()],
                hypernetwork: vec![],
            },
        }));
        let ctx = context(&gw, &backend, config, alias, args);
        let result = ctx.registry.dispatch(alias, &ctx).await;
        (result, ctx, gw)
    }

    #[test]
    fn test_parse_sizes() {
        assert_eq!(parse_sizes("512").unwrap(), (512, 512));
        assert_eq!(parse_sizes("512x768").unwrap(), (512, 768));
        assert_eq!(parse_sizes("1024 X 2048").unwrap(), (1024, 2048));
        assert!(parse_sizes("500").is_err());
        assert!(parse_sizes("512xabc").is_err());
        assert!(parse_sizes("").is_err());
    }

    #[tokio::test]
    async fn test_show_current_value() {
        let (result, _, gw) = run("p", "", BotConfig::default()).await;
        result.unwrap();
        assert_eq!(gw.texts(), vec!["**Current prompt:** cat"]);
    }

    #[tokio::test]
    async fn test_set_prompt_sanitizes_reply() {
        let (result, ctx, gw) = run("prompt", "a fox @everyone", BotConfig::default()).await;
        result.unwrap();
        assert_eq!(ctx.settings.params().prompt, "a fox @everyone");
        assert_eq!(gw.texts(), vec!["**Prompt set to:** a fox @\u{200b}everyone"]);
    }

    #[tokio::test]
    async fn test_size_and_clamps() {
        let (result, ctx, _) = run("sz", "640x1024", BotConfig::default()).await;
        result.unwrap();
        let p = ctx.settings.params();
        assert_eq!((p.width, p.height), (640, 1024));

        let (result, ctx, gw) = run("is", "500", BotConfig::default()).await;
        result.unwrap();
        assert_eq!(ctx.settings.params().inference_steps, 100);
        assert_eq!(gw.texts(), vec!["**Inference steps set to:** 100"]);

        let (result, ctx, _) = run("gs", "0.5", BotConfig::default()).await;
        result.unwrap();
        assert!((ctx.settings.params().guidance_scale - 1.1).abs() < f64::EPSILON);

        let (result, _, _) = run("gs", "inf", BotConfig::default()).await;
        assert!(matches!(result, Err(CommandError::Validation(_))));
    }

    #[tokio::test]
    async fn test_catalog_lookup_is_case_insensitive() {
        let (result, ctx, gw) = run("m", "anything-v3", BotConfig::default()).await;
        result.unwrap();
        assert_eq!(ctx.settings.params().model, "Anything-V3");
        assert_eq!(gw.texts(), vec!["**Model set to:** Anything-V3"]);

        let (result, _, _) = run("hn", "anime", BotConfig::default()).await;
        assert!(matches!(result, Err(CommandError::Validation(m)) if m == "invalid HyperNetwork"));
    }

    #[tokio::test]
    async fn test_sampler_and_upscaler_lists() {
        let (result, ctx, _) = run("sm", "DDIM", BotConfig::default()).await;
        result.unwrap();
        assert_eq!(ctx.settings.params().sampler, "ddim");

        let (result, ctx, _) = run("u", "realesrgan_x4plus", BotConfig::default()).await;
        result.unwrap();
        assert_eq!(ctx.settings.params().upscaler, "RealESRGAN_x4plus");

        let (result, _, _) = run("ua", "3", BotConfig::default()).await;
        assert!(matches!(result, Err(CommandError::Validation(_))));
    }

    #[tokio::test]
    async fn test_denied_property() {
        let config = BotConfig {
            deny_changing: vec!["negative_prompt".into()],
            ..BotConfig::default()
        };
        let (result, ctx, gw) = run("np", "blurry", config).await;
        assert!(matches!(result, Err(CommandError::Denied(_))));
        assert_eq!(ctx.settings.params().negative_prompt, "nsfw");
        assert!(gw.events().is_empty());
    }

    #[tokio::test]
    async fn test_busy_while_rendering() {
        let gw = Arc::new(MemoryGateway::new());
        let backend = Arc::new(ScriptedImageBackend::new());
        let ctx = context(&gw, &backend, BotConfig::default(), "p", "dog");
        let _guard = ctx
            .settings
            .try_begin_render(CurrentRenderInfo::new("u1", ""))
            .unwrap();

        let result = ctx.registry.dispatch("p", &ctx).await;
        assert!(matches!(result, Err(CommandError::Busy)));
        assert_eq!(ctx.settings.params().prompt, "cat");
    }

    #[tokio::test]
    async fn test_clear() {
        let (result, _, _) = run("cl", "", BotConfig::default()).await;
        assert!(matches!(result, Err(CommandError::Validation(m)) if m.contains("sz/size")));

        let (result, _, _) = run("cl", "model", BotConfig::default()).await;
        assert!(matches!(result, Err(CommandError::Validation(_))));

        let gw = Arc::new(MemoryGateway::new());
        let backend = Arc::new(ScriptedImageBackend::new());
        let ctx = context(&gw, &backend, BotConfig::default(), "clear", "SZ");
        ctx.settings.update_params(|p| {
            p.width = 128;
            p.upscale_amount = 4;
        });
        ctx.registry.dispatch("clear", &ctx).await.unwrap();
        assert_eq!(ctx.settings.params().width, 768);
        assert_eq!(gw.texts(), vec!["**Successfully cleared property**"]);

        let ctx = context(&gw, &backend, BotConfig::default(), "clear", "ua");
        ctx.settings.update_params(|p| p.upscale_amount = 4);
        ctx.registry.dispatch("clear", &ctx).await.unwrap();
        assert_eq!(ctx.settings.params().upscale_amount, 2);
    }
}
