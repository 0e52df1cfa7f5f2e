//! 3D humanoid rig driven through a neck bone and blend-shape weights.

use nalgebra::{UnitQuaternion, Vector3};

use super::PoseSlot;
use crate::pose::PoseSnapshot;
use crate::retarget::{self, HeadRotation, Thresholds};

pub const EYE_SHAPE: &str = "EyeClose";
pub const MOUTH_SHAPE: &str = "MouthOpen";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendShapeCalibration {
    /// 頭部回転の上限 (度)
    pub max_rotation_angle: f32,
    pub eye: Thresholds,
    pub mouth: Thresholds,
}

impl Default for BlendShapeCalibration {
    fn default() -> Self {
        Self {
            max_rotation_angle: 45.0,
            eye: Thresholds::new(0.30, 0.38),
            mouth: Thresholds::new(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendShapeFrame {
    pub head: HeadRotation,
    /// ネックボーンの回転 (neck offset 込み)
    pub neck_rotation: UnitQuaternion<f32>,
    /// Blend-shape weight, 0 = open, 85 = closed
    pub eye_weight: f32,
    pub mouth_weight: f32,
}

impl BlendShapeFrame {
    pub fn parameters(&self) -> Vec<(&'static str, f32)> {
        vec![(EYE_SHAPE, self.eye_weight), (MOUTH_SHAPE, self.mouth_weight)]
    }
}

/// Euler angles in degrees, applied Z then X then Y.
pub fn euler_zxy(x: f32, y: f32, z: f32) -> UnitQuaternion<f32> {
    let qx = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), x.to_radians());
    let qy = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), y.to_radians());
    let qz = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), z.to_radians());
    qy * qx * qz
}

/// Bind pose of the neck bone relative to the head frame.
pub fn neck_offset() -> UnitQuaternion<f32> {
    euler_zxy(0.0, 90.0, -90.0)
}

#[derive(Debug)]
pub struct BlendShapeRig {
    slot: PoseSlot,
    calibration: BlendShapeCalibration,
}

impl BlendShapeRig {
    pub fn new(calibration: BlendShapeCalibration) -> Self {
        Self {
            slot: PoseSlot::new(),
            calibration,
        }
    }

    pub fn slot(&self) -> &PoseSlot {
        &self.slot
    }

    pub fn tick(&self) -> BlendShapeFrame {
        self.frame_for(&self.slot.latest())
    }

    pub fn frame_for(&self, pose: &PoseSnapshot) -> BlendShapeFrame {
        let c = &self.calibration;
        let head = retarget::clamp_head(pose, c.max_rotation_angle);
        let neck_rotation = euler_zxy(head.pitch, head.yaw, head.roll) * neck_offset();

        BlendShapeFrame {
            head,
            neck_rotation,
            eye_weight: retarget::blink(pose.ear_left, pose.ear_right, c.eye),
            mouth_weight: retarget::mouth_open(pose.mouth_aspect_ratio, c.mouth),
        }
    }
}
