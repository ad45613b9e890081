//! Command behavior seen through the bot service.

use easel::image::{ModelCatalog, ModelOptions, OutputEntry, ProgressEvent};
use easel::mock::ScriptedImageBackend;
use easel_bot::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn message(content: &str) -> IncomingMessage {
    IncomingMessage {
        id: "in1".into(),
        channel_id: "c1".into(),
        author: Author {
            id: "u1".into(),
            name: "alice".into(),
            is_bot: false,
        },
        content: content.into(),
        ..IncomingMessage::default()
    }
}

fn bot_with(config: BotConfig, backend: ScriptedImageBackend) -> Bot {
    Bot::new(ConfigStore::new(config), Backends::new(Arc::new(backend)))
}

fn gateway(gw: &Arc<MemoryGateway>) -> Arc<dyn MessagingGateway> {
    Arc::clone(gw) as Arc<dyn MessagingGateway>
}

#[tokio::test]
async fn test_deny_list_blocks_changes() {
    let config = BotConfig {
        deny_changing: vec!["Size".into(), "guidance_scale".into()],
        ..BotConfig::default()
    };
    let bot = bot_with(config, ScriptedImageBackend::new());
    let gw = Arc::new(MemoryGateway::new());

    let result = bot.handle_message(gateway(&gw), message("sd!size 512")).await;
    assert!(matches!(result, Some(Err(CommandError::Denied(_)))));
    let result = bot.handle_message(gateway(&gw), message("sd!gs 7")).await;
    assert!(matches!(result, Some(Err(CommandError::Denied(_)))));
    assert_eq!(
        gw.texts(),
        vec![
            "**Error:** not allowed to change property",
            "**Error:** not allowed to change property",
        ]
    );

    gw.clear();
    bot.handle_message(gateway(&gw), message("sd!sz")).await;
    assert!(gw.texts()[0].starts_with("**Current size:** 768x768\nSizes: 128, 192"));
}

#[tokio::test]
async fn test_size_forms() {
    let bot = bot_with(BotConfig::default(), ScriptedImageBackend::new());
    let gw = Arc::new(MemoryGateway::new());

    for (args, expected) in [("512x768", "512x768"), ("640 1024", "640x1024"), ("256", "256x256")] {
        gw.clear();
        let result = bot
            .handle_message(gateway(&gw), message(&format!("sd!sz {args}")))
            .await;
        assert!(matches!(result, Some(Ok(()))), "{args}");
        assert_eq!(gw.texts(), vec![format!("**Size set to:** {expected}")]);
    }

    gw.clear();
    let result = bot.handle_message(gateway(&gw), message("sd!sz 500")).await;
    assert!(matches!(result, Some(Err(CommandError::Validation(_)))));
    assert_eq!(gw.texts(), vec!["**Error:** invalid size"]);
}

#[tokio::test]
async fn test_mention_and_bare_prefix() {
    let bot = bot_with(BotConfig::default(), ScriptedImageBackend::new());
    let gw = Arc::new(MemoryGateway::new());

    let mut mention = message("@easel_bot steps");
    mention.mentions_bot = true;
    let result = bot.handle_message(gateway(&gw), mention).await;
    assert!(matches!(result, Some(Err(CommandError::NotFound(_)))));

    gw.clear();
    let mut mention = message("@easel_bot is");
    mention.mentions_bot = true;
    bot.handle_message(gateway(&gw), mention).await;
    assert_eq!(gw.texts(), vec!["**Current inference steps:** 28"]);

    gw.clear();
    bot.handle_message(gateway(&gw), message("sd!")).await;
    assert!(gw.texts()[0].starts_with("**Usage:** sd!<command> [args]"));
}

#[tokio::test]
async fn test_model_validated_against_catalog() {
    let backend = ScriptedImageBackend::new().with_catalog(ModelCatalog {
        options: ModelOptions {
            stable_diffusion: vec!["sd-v1-5".into(), "Anything-V3".into()],
            vae: Vec::new(),
            hypernetwork: Vec::new(),
        },
    });
    let bot = bot_with(BotConfig::default(), backend);
    let gw = Arc::new(MemoryGateway::new());

    let result = bot.handle_message(gateway(&gw), message("sd!m nope")).await;
    assert!(matches!(result, Some(Err(CommandError::Validation(_)))));
    let result = bot
        .handle_message(gateway(&gw), message("sd!model ANYTHING-v3"))
        .await;
    assert!(matches!(result, Some(Ok(()))));
    let settings = bot.settings().peek("c1").await.unwrap();
    assert_eq!(settings.params().model, "Anything-V3");
}

#[tokio::test]
async fn test_img2img_attachment_feeds_the_render() {
    let backend = ScriptedImageBackend::new()
        .push_poll(vec![ProgressEvent::succeeded(vec![OutputEntry::at_path(
            "/final.png",
        )])])
        .with_image("/final.png", b"\x89PNGpng".to_vec());
    let backend = Arc::new(backend);
    let bot = Bot::new(
        ConfigStore::new(BotConfig::default()),
        Backends::new(Arc::clone(&backend) as Arc<dyn easel::image::ImageBackend>),
    );
    let gw = Arc::new(
        MemoryGateway::new().with_attachment("https://cdn/init.png", b"\x89PNGinit".to_vec()),
    );

    let mut msg = message("sd!r a castle");
    msg.attachments.push(Attachment {
        id: "a1".into(),
        filename: "init.png".into(),
        content_type: "image/png".into(),
        url: "https://cdn/init.png".into(),
        caption: "0.5".into(),
    });
    let result = bot.handle_message(gateway(&gw), msg).await;
    assert!(matches!(result, Some(Ok(()))));

    let request = backend.submitted().pop().unwrap();
    assert!(
        request
            .init_image
            .as_deref()
            .is_some_and(|url| url.starts_with("data:image/png;base64,"))
    );
    assert_eq!(request.prompt_strength, Some(0.5));
    assert!(
        gw.texts()
            .contains(&"**Loaded Img2Img image from attachment!**".to_string())
    );
    let card = gw.cards().pop().unwrap();
    assert!(card.description.contains("Img2Img Prompt Strength"));
}

#[tokio::test(start_paused = true)]
async fn test_run_serves_injected_messages_until_shutdown() {
    let bot = bot_with(BotConfig::default(), ScriptedImageBackend::new());
    let gw = Arc::new(MemoryGateway::new());
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let service = {
        let bot = bot.clone();
        let gw = gateway(&gw);
        tokio::spawn(async move {
            bot.run(gw, async {
                let _ = stop_rx.await;
            })
            .await
        })
    };

    while gw.inject(message("sd!p a quiet harbor")).await.is_err() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    while gw.texts().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(gw.texts(), vec!["**Prompt set to:** a quiet harbor"]);

    stop_tx.send(()).unwrap();
    service.await.unwrap().unwrap();
    assert!(gw.inject(message("sd!p")).await.is_err());
}
