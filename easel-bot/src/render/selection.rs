//! Choosing which progress event a poll iteration acts on.

use easel::image::ProgressEvent;

/// Outcome of scanning one poll batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Event to publish this iteration.
    pub frame: Option<ProgressEvent>,
    /// `(step, total)` pairs to surface as image-less progress updates.
    pub frameless_ticks: Vec<(u32, u32)>,
    /// Failure reported by the backend; the render must abort.
    pub failure: Option<String>,
    /// Step reached after the batch.
    pub current_step: u32,
    /// Total step count after the batch.
    pub total_steps: u32,
}

impl Selection {
    /// Whether the batch moved the render forward at all.
    #[must_use]
    pub fn advanced(&self) -> bool {
        self.frame.is_some() || !self.frameless_ticks.is_empty()
    }
}

/// Adopt a reported total. Zero means unchanged; the total never drops below `current`.
const fn revise_total(total: u32, reported: u32, current: u32) -> u32 {
    if reported == 0 {
        total
    } else if reported < current {
        current
    } else {
        reported
    }
}

/// Scan `batch` in order and pick at most one event to act on.
///
/// - `succeeded` wins: the step jumps to the total and scanning stops.
/// - A non-empty, non-`succeeded` status without output is a failure.
/// - Events without output at or behind `current` are stale.
/// - Events without output ahead of `current` advance the counters and,
///   with `count_frameless`, produce a tick.
/// - Events with output ahead of `current` become the frame; a later one in
///   the same batch replaces an earlier one.
#[must_use]
pub fn select_events(
    batch: &[ProgressEvent],
    current: u32,
    total: u32,
    count_frameless: bool,
) -> Selection {
    let mut selection = Selection {
        current_step: current,
        total_steps: total,
        ..Selection::default()
    };

    for event in batch {
        if event.is_succeeded() {
            selection.total_steps =
                revise_total(selection.total_steps, event.total_steps, selection.current_step);
            selection.current_step = selection.total_steps;
            selection.frame = Some(event.clone());
            break;
        }

        if !event.has_output() {
            if let Some(reason) = event.failure() {
                selection.failure = Some(reason.to_string());
                selection.frame = None;
                break;
            }
            if event.step <= selection.current_step {
                continue;
            }
            selection.current_step = event.step;
            selection.total_steps =
                revise_total(selection.total_steps, event.total_steps, event.step);
            if count_frameless {
                selection
                    .frameless_ticks
                    .push((selection.current_step, selection.total_steps));
            }
            continue;
        }

        if event.step <= selection.current_step {
            continue;
        }
        selection.current_step = event.step;
        selection.total_steps = revise_total(selection.total_steps, event.total_steps, event.step);
        selection.frame = Some(event.clone());
    }

    selection
}
