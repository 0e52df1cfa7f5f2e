//! Retargeting math: raw tracking ratios to bounded rig control values.
//!
//! Every function here is pure. Anything that divides by a calibration span
//! returns a neutral value when the span is empty instead of producing
//! `NaN`/`inf`.

use crate::pose::PoseSnapshot;

/// Calibration window for a tracked ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub min: f32,
    pub max: f32,
}

impl Thresholds {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// `max - min`, or `None` when it cannot be divided by.
    fn span(&self) -> Option<f32> {
        let span = self.max - self.min;
        (span.is_finite() && span > f32::EPSILON).then_some(span)
    }
}

/// Asymmetric gaze bounds; tracked iris ratios are not centred on 0.5.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeCeilings {
    pub left: f32,
    pub right: f32,
    pub up: f32,
    pub down: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeadRotation {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// Clamp to `[-max_angle, max_angle]`. Never panics, even on odd bounds.
pub fn clamp_angle(angle: f32, max_angle: f32) -> f32 {
    let limit = max_angle.abs();
    angle.max(-limit).min(limit)
}

pub fn clamp_head(pose: &PoseSnapshot, max_angle: f32) -> HeadRotation {
    HeadRotation {
        roll: clamp_angle(pose.roll, max_angle),
        pitch: clamp_angle(pose.pitch, max_angle),
        yaw: clamp_angle(pose.yaw, max_angle),
    }
}

/// Clamp into the window and map to `[0, 1]`. Empty window gives 0.
pub fn normalize(value: f32, t: Thresholds) -> f32 {
    match t.span() {
        Some(span) => (value.max(t.min).min(t.max) - t.min) / span,
        None => 0.0,
    }
}

/// Clamp into the window and map to `[-1, 1]`. Empty window gives 0 (centre).
pub fn normalize_signed(value: f32, t: Thresholds) -> f32 {
    match t.span() {
        Some(_) => normalize(value, t) * 2.0 - 1.0,
        None => 0.0,
    }
}

/// Blink intensity from the more closed of the two eyes.
///
/// `x` is 1 for a fully closed eye and 0 for a fully open one; the response
/// `90x² - 5x` was fit against the rig's half-closed (20) and closed (85)
/// shapes. It dips slightly below 0 near `x = 0`; callers treat that as open.
pub fn blink(ear_left: f32, ear_right: f32, t: Thresholds) -> f32 {
    if t.span().is_none() {
        return 0.0;
    }
    let ear = ear_left.min(ear_right);
    let x = (normalize(ear, t) - 1.0).abs();
    90.0 * x * x - 5.0 * x
}

/// Per-eye openness in `[0, 1]`, 1 = open.
pub fn eye_openness(ear: f32, t: Thresholds) -> f32 {
    normalize(ear, t)
}

/// Mouth opening scaled by `100 / (max - min)`.
///
/// Only a literal percentage when the window is exactly 1 wide.
pub fn mouth_open(mouth_aspect_ratio: f32, t: Thresholds) -> f32 {
    match t.span() {
        Some(span) => normalize(mouth_aspect_ratio, t) * 100.0 / span,
        None => 0.0,
    }
}

/// Mouth opening in `[0, 1]`.
pub fn mouth_open_unit(mouth_aspect_ratio: f32, t: Thresholds) -> f32 {
    normalize(mouth_aspect_ratio, t)
}

/// Mouth width to form in `[-1, 1]`.
pub fn mouth_form(mouth_distance: f32, t: Thresholds) -> f32 {
    normalize_signed(mouth_distance, t)
}

/// Averaged two-eye gaze in `[-1, 1]` per axis with a cubic response
/// (flat near the centre, sharp towards the edges).
pub fn gaze(pose: &PoseSnapshot, c: GazeCeilings) -> (f32, f32) {
    let x = (pose.gaze_x_left + pose.gaze_x_right) / 2.0;
    let y = (pose.gaze_y_left + pose.gaze_y_right) / 2.0;

    let x = normalize_signed(x, Thresholds::new(c.left, c.right));
    let y = normalize_signed(y, Thresholds::new(c.down, c.up));

    (x.powi(3), y.powi(3))
}

/// Whole-body lean once the head turns past `threshold` degrees.
///
/// Ramps linearly to -10 at `max`, sign following the head, 0 inside the
/// dead zone.
pub fn body_lean(angle: f32, threshold: f32, max: f32) -> f32 {
    let threshold = threshold.abs();
    let max = max.abs();
    let span = max - threshold;
    if angle.abs() <= threshold || !(span > f32::EPSILON) {
        return 0.0;
    }
    -(10.0 / span) * ((angle.abs() - threshold) * angle.signum())
}
