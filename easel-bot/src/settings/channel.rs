//! Per-channel render settings and the render lock.

use crate::config::RenderDefaults;
use crate::error::{CommandError, CommandResult};
use crate::util;
use bytes::Bytes;
use easel::image::{ActiveModels, RenderRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::debug;

/// Generation parameters a channel has configured.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    /// Prompt.
    pub prompt: String,
    /// Negative prompt.
    pub negative_prompt: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Inference steps.
    pub inference_steps: u32,
    /// Guidance scale.
    pub guidance_scale: f64,
    /// Sampler.
    pub sampler: String,
    /// Checkpoint.
    pub model: String,
    /// VAE, empty for default.
    pub vae: String,
    /// Hypernetwork, empty for none.
    pub hypernetwork: String,
    /// Upscaler, empty for none.
    pub upscaler: String,
    /// Upscale factor.
    pub upscale_amount: u32,
    /// Img2img prompt strength.
    pub prompt_strength: f64,
    /// Engine session id.
    pub session_id: String,
}

impl RenderParams {
    /// Parameters for a new channel.
    #[must_use]
    pub fn from_defaults(defaults: &RenderDefaults, active: &ActiveModels) -> Self {
        Self {
            prompt: defaults.prompt.clone(),
            negative_prompt: defaults.negative_prompt.clone(),
            width: defaults.width,
            height: defaults.height,
            inference_steps: defaults.inference_steps,
            guidance_scale: defaults.guidance_scale,
            sampler: defaults.sampler.clone(),
            model: active.stable_diffusion.clone(),
            vae: active.vae.clone(),
            hypernetwork: active.hypernetwork.clone(),
            upscaler: defaults.upscaler.clone(),
            upscale_amount: defaults.upscale_amount,
            prompt_strength: defaults.prompt_strength,
            session_id: util::timestamp_ms().to_string(),
        }
    }

    /// Build an engine request from these parameters.
    #[must_use]
    pub fn to_request(&self, seed: u32, stream_image_progress: bool) -> RenderRequest {
        let mut request = RenderRequest {
            seed,
            negative_prompt: self.negative_prompt.clone(),
            num_inference_steps: self.inference_steps,
            guidance_scale: self.guidance_scale,
            width: self.width,
            height: self.height,
            use_stable_diffusion_model: self.model.clone(),
            use_vae_model: self.vae.clone(),
            use_hypernetwork_model: self.hypernetwork.clone(),
            stream_image_progress,
            sampler_name: self.sampler.clone(),
            session_id: self.session_id.clone(),
            ..RenderRequest::new(self.prompt.clone())
        };
        if !self.upscaler.is_empty() {
            request = request.with_upscale(self.upscaler.clone(), self.upscale_amount);
        }
        request
    }
}

/// State of the render currently running in a channel.
#[derive(Debug, Clone, Default)]
pub struct CurrentRenderInfo {
    /// User who started the render.
    pub requested_by: String,
    /// Engine task id; zero until the engine accepted the job.
    pub task: i64,
    /// Image URL shown on the status card.
    pub last_frame_url: String,
    /// Latest frame bytes, served by the frame server.
    pub frame_data: Option<Bytes>,
    /// MIME type of `frame_data`.
    pub frame_content_type: Option<&'static str>,
}

impl CurrentRenderInfo {
    /// Info for a render `requested_by` a user, showing `placeholder_url`
    /// until the first frame.
    #[must_use]
    pub fn new(requested_by: impl Into<String>, placeholder_url: impl Into<String>) -> Self {
        Self {
            requested_by: requested_by.into(),
            last_frame_url: placeholder_url.into(),
            ..Self::default()
        }
    }
}

/// One-render-per-channel flag.
#[derive(Debug, Default)]
pub struct RenderLock(AtomicBool);

impl RenderLock {
    /// Whether a render holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn try_lock(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn unlock(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Settings and render state for one channel.
#[derive(Debug)]
pub struct ChannelSettings {
    channel_id: String,
    in_use: RenderLock,
    params: RwLock<RenderParams>,
    render_info: Mutex<Option<CurrentRenderInfo>>,
}

impl ChannelSettings {
    /// Create settings for `channel_id`.
    #[must_use]
    pub fn new(channel_id: impl Into<String>, params: RenderParams) -> Self {
        Self {
            channel_id: channel_id.into(),
            in_use: RenderLock::default(),
            params: RwLock::new(params),
            render_info: Mutex::new(None),
        }
    }

    /// Channel these settings belong to.
    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Whether a render is running.
    #[must_use]
    pub fn is_rendering(&self) -> bool {
        self.in_use.is_locked()
    }

    /// Snapshot of the parameters.
    #[must_use]
    pub fn params(&self) -> RenderParams {
        self.params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutate the parameters.
    pub fn update_params<R>(&self, f: impl FnOnce(&mut RenderParams) -> R) -> R {
        let mut params = self.params.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut params)
    }

    fn info(&self) -> MutexGuard<'_, Option<CurrentRenderInfo>> {
        self.render_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the running render, if any.
    #[must_use]
    pub fn render_info(&self) -> Option<CurrentRenderInfo> {
        let info = self.info();
        if !self.is_rendering() {
            return None;
        }
        info.clone()
    }

    /// Run `f` with the render info locked.
    pub fn with_render_info<R>(&self, f: impl FnOnce(Option<&mut CurrentRenderInfo>) -> R) -> R {
        let mut info = self.info();
        f(info.as_mut())
    }

    /// Latest buffered frame and its MIME type.
    #[must_use]
    pub fn frame(&self) -> Option<(Bytes, &'static str)> {
        let info = self.info();
        let info = info.as_ref()?;
        Some((info.frame_data.clone()?, info.frame_content_type?))
    }

    /// Take the render lock and record `info` as the running render.
    ///
    /// The info is written while the render-info mutex is held across the
    /// lock flip, so no reader sees the lock taken without its info.
    ///
    /// # Errors
    ///
    /// [`CommandError::AlreadyInProgress`] if another render holds it.
    pub fn try_begin_render(
        self: &Arc<Self>,
        info: CurrentRenderInfo,
    ) -> CommandResult<RenderGuard> {
        let mut slot = self.info();
        if !self.in_use.try_lock() {
            return Err(CommandError::AlreadyInProgress);
        }
        *slot = Some(info);
        drop(slot);
        debug!(channel = %self.channel_id, "render lock acquired");
        Ok(RenderGuard {
            settings: Arc::clone(self),
        })
    }
}

/// Proof that the holder owns a channel's render lock.
///
/// Dropping the guard clears the render info and then releases the lock, on
/// every exit path.
#[derive(Debug)]
pub struct RenderGuard {
    settings: Arc<ChannelSettings>,
}

impl RenderGuard {
    /// Settings this guard locks.
    #[must_use]
    pub const fn settings(&self) -> &Arc<ChannelSettings> {
        &self.settings
    }

    /// Record the engine task once the render has been submitted.
    pub fn assign_task(&self, task: i64) {
        if let Some(info) = self.settings.info().as_mut() {
            info.task = task;
        }
    }
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        let mut info = self.settings.info();
        info.take();
        self.settings.in_use.unlock();
        drop(info);
        debug!(channel = %self.settings.channel_id, "render lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Arc<ChannelSettings> {
        let active = ActiveModels {
            stable_diffusion: "sd-v1-4".into(),
            ..ActiveModels::default()
        };
        Arc::new(ChannelSettings::new(
            "c1",
            RenderParams::from_defaults(&RenderDefaults::default(), &active),
        ))
    }

    fn requested_by(user: &str) -> CurrentRenderInfo {
        CurrentRenderInfo {
            requested_by: user.into(),
            ..CurrentRenderInfo::default()
        }
    }

    #[test]
    fn test_lock_is_exclusive() {
        let s = settings();
        let guard = s.try_begin_render(requested_by("u1")).unwrap();
        assert!(s.is_rendering());
        assert!(matches!(
            s.try_begin_render(requested_by("u2")),
            Err(CommandError::AlreadyInProgress)
        ));
        assert_eq!(s.render_info().unwrap().requested_by, "u1");
        drop(guard);
        assert!(!s.is_rendering());
        assert!(s.try_begin_render(requested_by("u2")).is_ok());
    }

    #[test]
    fn test_info_present_as_soon_as_locked() {
        let s = settings();
        assert!(s.render_info().is_none());
        let guard = s.try_begin_render(requested_by("u1")).unwrap();
        let info = s.render_info().unwrap();
        assert_eq!(info.requested_by, "u1");
        assert_eq!(info.task, 0);

        guard.assign_task(5);
        assert_eq!(s.render_info().map(|i| i.task), Some(5));
    }

    #[test]
    fn test_guard_clears_render_info() {
        let s = settings();
        let guard = s.try_begin_render(requested_by("u1")).unwrap();
        guard.assign_task(5);
        assert_eq!(s.render_info().map(|i| i.task), Some(5));
        drop(guard);
        assert!(s.render_info().is_none());
        assert!(s.with_render_info(|i| i.is_none()));
    }

    #[test]
    fn test_lock_released_on_panic() {
        let s = settings();
        let inner = Arc::clone(&s);
        let result = std::panic::catch_unwind(move || {
            let _guard = inner.try_begin_render(requested_by("u1")).unwrap();
            panic!("render blew up");
        });
        assert!(result.is_err());
        assert!(!s.is_rendering());
    }

    #[test]
    fn test_params_round_trip_into_request() {
        let s = settings();
        s.update_params(|p| {
            p.prompt = "a fox".into();
            p.width = 512;
            p.vae = "vae-ft".into();
            p.upscaler = "RealESRGAN_x4plus".into();
            p.upscale_amount = 4;
        });
        let params = s.params();
        let req = params.to_request(99, true);
        assert_eq!(req.prompt, "a fox");
        assert_eq!(req.original_prompt, "a fox");
        assert_eq!(req.seed, 99);
        assert_eq!(req.width, 512);
        assert_eq!(req.height, 768);
        assert_eq!(req.num_inference_steps, 28);
        assert_eq!(req.use_stable_diffusion_model, "sd-v1-4");
        assert_eq!(req.use_vae_model, "vae-ft");
        assert_eq!(req.sampler_name, "euler_a");
        assert_eq!(req.upscale_amount.as_deref(), Some("4"));
        assert_eq!(req.session_id, params.session_id);
        assert!(!req.has_init_image());
    }

    #[test]
    fn test_frame_requires_data_and_type() {
        let s = settings();
        let _guard = s.try_begin_render(CurrentRenderInfo::default()).unwrap();
        assert!(s.frame().is_none());
        s.with_render_info(|info| {
            let info = info.unwrap();
            info.frame_data = Some(Bytes::from_static(b"png"));
            info.frame_content_type = Some("image/png");
        });
        assert_eq!(s.frame().map(|(_, ct)| ct), Some("image/png"));
    }
}
