//! Rig consumers: the only coupling point between the pipeline and a
//! concrete avatar technology.

pub mod blend_shape;
pub mod live2d;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::pose::PoseSnapshot;

pub use blend_shape::{BlendShapeCalibration, BlendShapeFrame, BlendShapeRig};
pub use live2d::{BodyLeanCalibration, Live2dCalibration, Live2dFrame, Live2dRig};

/// Accepts the latest pose. Must be cheap; it may run on the ingestion task.
pub trait RigConsumer: Send + Sync {
    fn set_pose(&self, pose: PoseSnapshot);
}

#[derive(Debug, Default)]
struct SlotState {
    pose: PoseSnapshot,
    version: u64,
}

/// 最新ポーズを1つだけ保持する共有スロット
///
/// Writes and reads copy the whole snapshot under a lock, so a reader sees
/// either the previous record or the new one, never a mix.
#[derive(Debug, Clone, Default)]
pub struct PoseSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl PoseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> PoseSnapshot {
        self.inner.lock().pose
    }

    /// Number of poses stored so far.
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    pub fn load(&self) -> (PoseSnapshot, u64) {
        let state = self.inner.lock();
        (state.pose, state.version)
    }
}

impl RigConsumer for PoseSlot {
    fn set_pose(&self, pose: PoseSnapshot) {
        let mut state = self.inner.lock();
        state.pose = pose;
        state.version += 1;
    }
}

/// Output of one render tick.
#[derive(Debug, Clone, PartialEq)]
pub enum RigFrame {
    BlendShape(BlendShapeFrame),
    Live2d(Live2dFrame),
}

impl RigFrame {
    /// Named scalar controls, in a stable order.
    pub fn parameters(&self) -> Vec<(&'static str, f32)> {
        match self {
            RigFrame::BlendShape(frame) => frame.parameters(),
            RigFrame::Live2d(frame) => frame.parameters(),
        }
    }
}

/// Backends known at compile time.
#[derive(Debug)]
pub enum RigBackend {
    BlendShape(BlendShapeRig),
    Live2d(Live2dRig),
}

impl RigBackend {
    pub fn slot(&self) -> &PoseSlot {
        match self {
            RigBackend::BlendShape(rig) => rig.slot(),
            RigBackend::Live2d(rig) => rig.slot(),
        }
    }

    /// Handle the registry routes poses into.
    pub fn consumer(&self) -> Arc<dyn RigConsumer> {
        Arc::new(self.slot().clone())
    }

    /// Advance by `dt` seconds and retarget the latest pose.
    pub fn tick(&mut self, dt: f32) -> RigFrame {
        match self {
            RigBackend::BlendShape(rig) => RigFrame::BlendShape(rig.tick()),
            RigBackend::Live2d(rig) => RigFrame::Live2d(rig.tick(dt)),
        }
    }

    pub fn toggle_blush(&mut self) -> bool {
        match self {
            RigBackend::Live2d(rig) => rig.toggle_blush(),
            RigBackend::BlendShape(_) => false,
        }
    }
}
