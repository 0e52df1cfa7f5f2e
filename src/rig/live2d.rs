//! 2D Cubism-style rig driven through named model parameters.

use super::PoseSlot;
use crate::pose::PoseSnapshot;
use crate::retarget::{self, GazeCeilings, Thresholds};

/// 頭の回転が閾値を超えたときの体の傾き
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyLeanCalibration {
    pub roll_threshold: f32,
    pub yaw_threshold: f32,
    pub max: f32,
}

impl Default for BodyLeanCalibration {
    fn default() -> Self {
        Self {
            roll_threshold: 30.0,
            yaw_threshold: 30.0,
            max: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Live2dCalibration {
    pub max_rotation_angle: f32,
    pub eye: Thresholds,
    pub gaze: GazeCeilings,
    pub mouth: Thresholds,
    /// `None` leaves the mouth form parameter untouched.
    pub mouth_form: Option<Thresholds>,
    pub body: Option<BodyLeanCalibration>,
}

impl Default for Live2dCalibration {
    fn default() -> Self {
        Self {
            max_rotation_angle: 30.0,
            eye: Thresholds::new(0.30, 0.38),
            gaze: GazeCeilings {
                left: 0.2,
                right: 0.85,
                up: 0.8,
                down: 0.2,
            },
            mouth: Thresholds::new(0.0, 1.0),
            mouth_form: None,
            body: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Live2dFrame {
    pub angle_x: f32,
    pub angle_y: f32,
    pub angle_z: f32,
    pub breath: f32,
    pub cheek: f32,
    pub eye_l_open: f32,
    pub eye_r_open: f32,
    pub eyeball_x: f32,
    pub eyeball_y: f32,
    pub mouth_open_y: f32,
    pub mouth_form: Option<f32>,
    pub body_angle_x: Option<f32>,
    pub body_angle_z: Option<f32>,
}

impl Live2dFrame {
    pub fn parameters(&self) -> Vec<(&'static str, f32)> {
        let mut params = vec![
            ("ParamAngleX", self.angle_x),
            ("ParamAngleY", self.angle_y),
            ("ParamAngleZ", self.angle_z),
            ("ParamBreath", self.breath),
            ("ParamCheek", self.cheek),
            ("ParamEyeLOpen", self.eye_l_open),
            ("ParamEyeROpen", self.eye_r_open),
            ("ParamEyeBallX", self.eyeball_x),
            ("ParamEyeBallY", self.eyeball_y),
            ("ParamMouthOpenY", self.mouth_open_y),
        ];
        if let Some(v) = self.mouth_form {
            params.push(("ParamMouthForm", v));
        }
        if let Some(v) = self.body_angle_x {
            params.push(("ParamBodyAngleX", v));
        }
        if let Some(v) = self.body_angle_z {
            params.push(("ParamBodyAngleZ", v));
        }
        params
    }
}

#[derive(Debug)]
pub struct Live2dRig {
    slot: PoseSlot,
    calibration: Live2dCalibration,
    elapsed: f32,
    blush: bool,
}

impl Live2dRig {
    pub fn new(calibration: Live2dCalibration) -> Self {
        Self {
            slot: PoseSlot::new(),
            calibration,
            elapsed: 0.0,
            blush: false,
        }
    }

    pub fn slot(&self) -> &PoseSlot {
        &self.slot
    }

    /// Returns the new state.
    pub fn toggle_blush(&mut self) -> bool {
        self.blush = !self.blush;
        self.blush
    }

    pub fn tick(&mut self, dt: f32) -> Live2dFrame {
        self.elapsed += dt.max(0.0);
        self.frame_for(&self.slot.latest())
    }

    pub fn frame_for(&self, pose: &PoseSnapshot) -> Live2dFrame {
        let c = &self.calibration;
        let head = retarget::clamp_head(pose, c.max_rotation_angle);
        let (eyeball_x, eyeball_y) = retarget::gaze(pose, c.gaze);

        Live2dFrame {
            // モデル側はミラー
            angle_x: -head.yaw,
            angle_y: head.pitch,
            angle_z: -head.roll,
            breath: ((self.elapsed * 3.0).sin() + 1.0) * 0.5,
            cheek: if self.blush { 1.0 } else { 0.0 },
            // my left eye = model's right eye
            eye_l_open: retarget::eye_openness(pose.ear_right, c.eye),
            eye_r_open: retarget::eye_openness(pose.ear_left, c.eye),
            eyeball_x,
            eyeball_y,
            mouth_open_y: retarget::mouth_open_unit(pose.mouth_aspect_ratio, c.mouth),
            mouth_form: c
                .mouth_form
                .map(|t| retarget::mouth_form(pose.mouth_distance, t)),
            body_angle_x: c
                .body
                .map(|b| retarget::body_lean(pose.yaw, b.yaw_threshold, b.max)),
            body_angle_z: c
                .body
                .map(|b| retarget::body_lean(pose.roll, b.roll_threshold, b.max)),
        }
    }
}
