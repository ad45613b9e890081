//! Wire types for the image engine.

use crate::error::Result;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

/// Status string the engine reports once a job finished successfully.
pub const STATUS_SUCCEEDED: &str = "succeeded";

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of `POST /render`.
///
/// Field names follow the engine's JSON schema. Optional model selectors and
/// the img2img/upscale fields are omitted when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// Positive prompt.
    pub prompt: String,
    /// Random seed.
    pub seed: u32,
    /// Negative prompt.
    pub negative_prompt: String,
    /// Number of images to produce.
    pub num_outputs: u32,
    /// Inference step count.
    pub num_inference_steps: u32,
    /// Classifier-free guidance scale.
    pub guidance_scale: f64,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Engine memory profile.
    pub vram_usage_level: String,
    /// Checkpoint name.
    pub use_stable_diffusion_model: String,
    /// VAE name, empty for the engine default.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub use_vae_model: String,
    /// Hypernetwork name, empty for none.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub use_hypernetwork_model: String,
    /// Emit progress events while rendering.
    pub stream_progress_updates: bool,
    /// Attach intermediate images to progress events.
    pub stream_image_progress: bool,
    /// Only return the filtered (upscaled/corrected) image.
    pub show_only_filtered_image: bool,
    /// Output image format.
    pub output_format: String,
    /// Output quality for lossy formats.
    pub output_quality: u32,
    /// Format of the metadata sidecar.
    pub metadata_output_format: String,
    /// Prompt before any tag expansion.
    pub original_prompt: String,
    /// Enabled prompt modifiers.
    pub active_tags: Vec<String>,
    /// Disabled prompt modifiers.
    pub inactive_tags: Vec<String>,
    /// Sampler name.
    pub sampler_name: String,
    /// Engine session identifier.
    pub session_id: String,
    /// Init image as a `data:` URL for img2img.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_image: Option<String>,
    /// Img2img prompt strength.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_strength: Option<f64>,
    /// Upscaler name, empty for none.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub use_upscale: String,
    /// Upscale factor, sent as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upscale_amount: Option<String>,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            seed: 0,
            negative_prompt: String::new(),
            num_outputs: 1,
            num_inference_steps: 28,
            guidance_scale: 12.0,
            width: 768,
            height: 768,
            vram_usage_level: "high".to_string(),
            use_stable_diffusion_model: String::new(),
            use_vae_model: String::new(),
            use_hypernetwork_model: String::new(),
            stream_progress_updates: true,
            stream_image_progress: true,
            show_only_filtered_image: true,
            output_format: "png".to_string(),
            output_quality: 75,
            metadata_output_format: "txt".to_string(),
            original_prompt: String::new(),
            active_tags: Vec::new(),
            inactive_tags: Vec::new(),
            sampler_name: "euler_a".to_string(),
            session_id: String::new(),
            init_image: None,
            prompt_strength: None,
            use_upscale: String::new(),
            upscale_amount: None,
        }
    }
}

impl RenderRequest {
    /// Create a request for the given prompt with engine defaults.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            original_prompt: prompt.clone(),
            prompt,
            ..Self::default()
        }
    }

    /// Attach an init image (already encoded as a `data:` URL) and its strength.
    #[must_use]
    pub fn with_init_image(mut self, data_url: impl Into<String>, strength: f64) -> Self {
        self.init_image = Some(data_url.into());
        self.prompt_strength = Some(strength);
        self
    }

    /// Request an upscale pass.
    #[must_use]
    pub fn with_upscale(mut self, upscaler: impl Into<String>, amount: u32) -> Self {
        self.use_upscale = upscaler.into();
        self.upscale_amount = Some(amount.to_string());
        self
    }

    /// Whether this is an img2img request.
    #[must_use]
    pub const fn has_init_image(&self) -> bool {
        self.init_image.is_some()
    }
}

/// Response of `POST /render`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderTicket {
    /// Path (or URL) to poll for progress events.
    pub stream: String,
    /// Task id used for cancellation.
    pub task: i64,
}

/// One output slot of a progress event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    /// Inline image as a base64 `data:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Server-relative path of the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl OutputEntry {
    /// Entry carrying an inline data URL.
    #[must_use]
    pub fn inline(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            path: None,
        }
    }

    /// Entry pointing at a server-side path.
    #[must_use]
    pub fn at_path(path: impl Into<String>) -> Self {
        Self {
            data: None,
            path: Some(path.into()),
        }
    }

    /// Inline data, if non-empty.
    #[must_use]
    pub fn inline_data(&self) -> Option<&str> {
        self.data.as_deref().filter(|d| !d.is_empty())
    }

    /// Server path, if non-empty.
    #[must_use]
    pub fn server_path(&self) -> Option<&str> {
        self.path.as_deref().filter(|p| !p.is_empty())
    }

    /// Whether the entry carries neither data nor a path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inline_data().is_none() && self.server_path().is_none()
    }
}

/// A single progress object read from the stream endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Produced images, if any.
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: Vec<OutputEntry>,
    /// Step this event reports.
    #[serde(default, deserialize_with = "null_as_default")]
    pub step: u32,
    /// Total step count; zero means unchanged.
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_steps: u32,
    /// Empty while running, `succeeded` when done, otherwise an error description.
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
}

impl ProgressEvent {
    /// Progress event for `step` carrying the given output.
    #[must_use]
    pub fn at_step(step: u32, output: Vec<OutputEntry>) -> Self {
        Self {
            output,
            step,
            ..Self::default()
        }
    }

    /// Terminal success event.
    #[must_use]
    pub fn succeeded(output: Vec<OutputEntry>) -> Self {
        Self {
            output,
            status: STATUS_SUCCEEDED.to_string(),
            ..Self::default()
        }
    }

    /// Terminal failure event.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: reason.into(),
            ..Self::default()
        }
    }

    /// Set the reported total step count.
    #[must_use]
    pub const fn with_total_steps(mut self, total_steps: u32) -> Self {
        self.total_steps = total_steps;
        self
    }

    /// Whether the job finished successfully.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.status == STATUS_SUCCEEDED
    }

    /// Failure reason when the status is neither empty nor `succeeded`.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        if self.status.is_empty() || self.is_succeeded() {
            None
        } else {
            Some(&self.status)
        }
    }

    /// First output entry, when it carries an image.
    #[must_use]
    pub fn first_output(&self) -> Option<&OutputEntry> {
        self.output.first().filter(|o| !o.is_empty())
    }

    /// Whether the event carries an image.
    #[must_use]
    pub fn has_output(&self) -> bool {
        self.first_output().is_some()
    }
}

/// Decode an inline `data:<mime>;base64,<payload>` image.
///
/// A bare base64 string without the `data:` header is accepted too.
///
/// # Errors
///
/// Returns an error if the payload is not valid base64.
pub fn decode_data_url(data: &str) -> Result<Bytes> {
    let payload = data
        .find(";base64,")
        .map_or(data, |pos| &data[pos + ";base64,".len()..]);
    Ok(Bytes::from(STANDARD.decode(payload.trim())?))
}

/// Encode raw bytes as a `data:` URL with the given content type.
#[must_use]
pub fn encode_data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{content_type};base64,{}", STANDARD.encode(bytes))
}

/// Names the engine can load, from `GET /get/models`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Catalog grouped by model kind.
    #[serde(default)]
    pub options: ModelOptions,
}

/// Model names grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Checkpoints.
    #[serde(rename = "stable-diffusion", default, deserialize_with = "null_as_default")]
    pub stable_diffusion: Vec<String>,
    /// VAEs.
    #[serde(default, deserialize_with = "null_as_default")]
    pub vae: Vec<String>,
    /// Hypernetworks.
    #[serde(default, deserialize_with = "null_as_default")]
    pub hypernetwork: Vec<String>,
}

impl ModelCatalog {
    /// Case-insensitive checkpoint lookup returning the canonical name.
    #[must_use]
    pub fn find_model(&self, name: &str) -> Option<&str> {
        find_ignore_case(&self.options.stable_diffusion, name)
    }

    /// Case-insensitive VAE lookup returning the canonical name.
    #[must_use]
    pub fn find_vae(&self, name: &str) -> Option<&str> {
        find_ignore_case(&self.options.vae, name)
    }

    /// Case-insensitive hypernetwork lookup returning the canonical name.
    #[must_use]
    pub fn find_hypernetwork(&self, name: &str) -> Option<&str> {
        find_ignore_case(&self.options.hypernetwork, name)
    }
}

fn find_ignore_case<'a>(names: &'a [String], name: &str) -> Option<&'a str> {
    names
        .iter()
        .find(|n| n.eq_ignore_ascii_case(name))
        .map(String::as_str)
}

/// Models currently loaded by the engine, from `GET /get/app_config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveModelConfig {
    /// Active selections.
    #[serde(default)]
    pub model: ActiveModels,
}

/// Active model selections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveModels {
    /// Active checkpoint.
    #[serde(rename = "stable-diffusion", default, deserialize_with = "null_as_default")]
    pub stable_diffusion: String,
    /// Active VAE, empty for default.
    #[serde(default, deserialize_with = "null_as_default")]
    pub vae: String,
    /// Active hypernetwork, empty for none.
    #[serde(default, deserialize_with = "null_as_default")]
    pub hypernetwork: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_unset_optionals() {
        let json = serde_json::to_value(RenderRequest::new("cat")).unwrap();
        assert_eq!(json["prompt"], "cat");
        assert_eq!(json["original_prompt"], "cat");
        assert!(json.get("init_image").is_none());
        assert!(json.get("prompt_strength").is_none());
        assert!(json.get("use_vae_model").is_none());
        assert!(json.get("use_upscale").is_none());
        assert!(json.get("upscale_amount").is_none());
    }

    #[test]
    fn test_request_img2img_and_upscale_fields() {
        let req = RenderRequest::new("cat")
            .with_init_image("data:image/png;base64,AAAA", 0.5)
            .with_upscale("RealESRGAN_x4plus", 4);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["init_image"], "data:image/png;base64,AAAA");
        assert_eq!(json["prompt_strength"], 0.5);
        assert_eq!(json["use_upscale"], "RealESRGAN_x4plus");
        assert_eq!(json["upscale_amount"], "4");
        assert!(req.has_init_image());
    }

    #[test]
    fn test_progress_event_tolerates_nulls() {
        let ev: ProgressEvent =
            serde_json::from_str(r#"{"output":null,"step":3,"total_steps":null}"#).unwrap();
        assert!(ev.output.is_empty());
        assert_eq!(ev.step, 3);
        assert_eq!(ev.total_steps, 0);
        assert!(ev.failure().is_none());
    }

    #[test]
    fn test_progress_event_classification() {
        assert!(ProgressEvent::succeeded(vec![]).is_succeeded());
        assert_eq!(ProgressEvent::failed("boom").failure(), Some("boom"));
        assert!(ProgressEvent::succeeded(vec![]).failure().is_none());

        let empty_entry = ProgressEvent::at_step(2, vec![OutputEntry::default()]);
        assert!(!empty_entry.has_output());

        let with_path = ProgressEvent::at_step(2, vec![OutputEntry::at_path("/x")]);
        assert_eq!(with_path.first_output().and_then(OutputEntry::server_path), Some("/x"));
    }

    #[test]
    fn test_data_url_decoding() {
        let url = encode_data_url("image/jpeg", b"hello");
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(decode_data_url(&url).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(decode_data_url("aGVsbG8=").unwrap(), Bytes::from_static(b"hello"));
        assert!(decode_data_url("data:image/png;base64,!!!").is_err());
    }

    #[test]
    fn test_catalog_lookup_is_case_insensitive() {
        let catalog: ModelCatalog = serde_json::from_str(
            r#"{"options":{"stable-diffusion":["sd-v1-4","Anything-V3"],"vae":["vae-ft-mse"],"hypernetwork":null}}"#,
        )
        .unwrap();
        assert_eq!(catalog.find_model("anything-v3"), Some("Anything-V3"));
        assert_eq!(catalog.find_vae("VAE-FT-MSE"), Some("vae-ft-mse"));
        assert!(catalog.find_hypernetwork("x").is_none());
        assert!(catalog.find_model("missing").is_none());
    }

    #[test]
    fn test_active_config_parsing() {
        let cfg: ActiveModelConfig =
            serde_json::from_str(r#"{"model":{"stable-diffusion":"sd-v1-4"}}"#).unwrap();
        assert_eq!(cfg.model.stable_diffusion, "sd-v1-4");
        assert!(cfg.model.vae.is_empty());
    }
}
