use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{AvatarError, AvatarResult};
use crate::osc::OSC_DEFAULT_ADDR;
use crate::protocol::{Framing, DEFAULT_MAX_RECORD_LEN};
use crate::retarget::{GazeCeilings, Thresholds};
use crate::rig::{
    BlendShapeCalibration, BlendShapeRig, BodyLeanCalibration, Live2dCalibration, Live2dRig,
    RigBackend,
};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub osc: OscConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default = "default_avatars")]
    pub avatars: Vec<AvatarConfig>,
    #[serde(default)]
    pub blend_shape: BlendShapeConfig,
    #[serde(default)]
    pub live2d: Live2dConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// トラッカーからの接続を待つアドレス
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// "line" (1行1レコード) or "whitespace" (旧トラッカー互換)
    #[serde(default)]
    pub framing: Framing,
    #[serde(default = "default_max_record_len")]
    pub max_record_len: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OscConfig {
    #[serde(default = "default_osc_target")]
    pub target_addr: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AvatarKind {
    BlendShape,
    Live2d,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AvatarConfig {
    pub name: String,
    pub kind: AvatarKind,
}

/// 3Dモデル (ブレンドシェイプ) のキャリブレーション
#[derive(Debug, Deserialize, Clone)]
pub struct BlendShapeConfig {
    #[serde(default = "default_blend_shape_max_angle")]
    pub max_rotation_angle: f32,
    #[serde(default = "default_ear_min")]
    pub ear_min: f32,
    #[serde(default = "default_ear_max")]
    pub ear_max: f32,
    #[serde(default)]
    pub mar_min: f32,
    #[serde(default = "default_mar_max")]
    pub mar_max: f32,
}

/// Live2Dモデルのキャリブレーション
#[derive(Debug, Deserialize, Clone)]
pub struct Live2dConfig {
    #[serde(default = "default_live2d_max_angle")]
    pub max_rotation_angle: f32,
    #[serde(default = "default_ear_min")]
    pub ear_min: f32,
    #[serde(default = "default_ear_max")]
    pub ear_max: f32,
    #[serde(default = "default_iris_left")]
    pub iris_left_ceiling: f32,
    #[serde(default = "default_iris_right")]
    pub iris_right_ceiling: f32,
    #[serde(default = "default_iris_up")]
    pub iris_up_ceiling: f32,
    #[serde(default = "default_iris_down")]
    pub iris_down_ceiling: f32,
    #[serde(default)]
    pub mar_min: f32,
    #[serde(default = "default_mar_max")]
    pub mar_max: f32,
    /// 口の横幅で口の形を変える
    #[serde(default)]
    pub mouth_form: bool,
    #[serde(default = "default_mouth_dist_min")]
    pub mouth_dist_min: f32,
    #[serde(default = "default_mouth_dist_max")]
    pub mouth_dist_max: f32,
    /// 頭の回転が大きいとき体も傾ける
    #[serde(default)]
    pub body_movement: bool,
    #[serde(default = "default_body_threshold")]
    pub body_roll_threshold: f32,
    #[serde(default = "default_body_threshold")]
    pub body_yaw_threshold: f32,
    #[serde(default = "default_body_max")]
    pub body_roll_yaw_max: f32,
}

fn default_listen_addr() -> String { "127.0.0.1:5066".to_string() }
fn default_max_record_len() -> usize { DEFAULT_MAX_RECORD_LEN }
fn default_osc_target() -> String { OSC_DEFAULT_ADDR.to_string() }
fn default_true() -> bool { true }
fn default_target_fps() -> u32 { 60 }
fn default_avatars() -> Vec<AvatarConfig> {
    vec![
        AvatarConfig { name: "unity_chan".to_string(), kind: AvatarKind::BlendShape },
        AvatarConfig { name: "hiyori".to_string(), kind: AvatarKind::Live2d },
    ]
}
fn default_blend_shape_max_angle() -> f32 { 45.0 }
fn default_live2d_max_angle() -> f32 { 30.0 }
fn default_ear_min() -> f32 { 0.30 }
fn default_ear_max() -> f32 { 0.38 }
fn default_mar_max() -> f32 { 1.0 }
fn default_iris_left() -> f32 { 0.2 }
fn default_iris_right() -> f32 { 0.85 }
fn default_iris_up() -> f32 { 0.8 }
fn default_iris_down() -> f32 { 0.2 }
fn default_mouth_dist_min() -> f32 { 60.0 }
fn default_mouth_dist_max() -> f32 { 80.0 }
fn default_body_threshold() -> f32 { 30.0 }
fn default_body_max() -> f32 { 60.0 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            framing: Framing::default(),
            max_record_len: default_max_record_len(),
        }
    }
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            target_addr: default_osc_target(),
            enabled: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
        }
    }
}

impl Default for BlendShapeConfig {
    fn default() -> Self {
        Self {
            max_rotation_angle: default_blend_shape_max_angle(),
            ear_min: default_ear_min(),
            ear_max: default_ear_max(),
            mar_min: 0.0,
            mar_max: default_mar_max(),
        }
    }
}

impl Default for Live2dConfig {
    fn default() -> Self {
        Self {
            max_rotation_angle: default_live2d_max_angle(),
            ear_min: default_ear_min(),
            ear_max: default_ear_max(),
            iris_left_ceiling: default_iris_left(),
            iris_right_ceiling: default_iris_right(),
            iris_up_ceiling: default_iris_up(),
            iris_down_ceiling: default_iris_down(),
            mar_min: 0.0,
            mar_max: default_mar_max(),
            mouth_form: false,
            mouth_dist_min: default_mouth_dist_min(),
            mouth_dist_max: default_mouth_dist_max(),
            body_movement: false,
            body_roll_threshold: default_body_threshold(),
            body_yaw_threshold: default_body_threshold(),
            body_roll_yaw_max: default_body_max(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> AvatarResult<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|_| AvatarError::Config(format!("invalid listen_addr: {}", self.listen_addr)))
    }
}

impl BlendShapeConfig {
    pub fn calibration(&self) -> BlendShapeCalibration {
        BlendShapeCalibration {
            max_rotation_angle: self.max_rotation_angle,
            eye: Thresholds::new(self.ear_min, self.ear_max),
            mouth: Thresholds::new(self.mar_min, self.mar_max),
        }
    }
}

impl Live2dConfig {
    pub fn calibration(&self) -> Live2dCalibration {
        Live2dCalibration {
            max_rotation_angle: self.max_rotation_angle,
            eye: Thresholds::new(self.ear_min, self.ear_max),
            gaze: GazeCeilings {
                left: self.iris_left_ceiling,
                right: self.iris_right_ceiling,
                up: self.iris_up_ceiling,
                down: self.iris_down_ceiling,
            },
            mouth: Thresholds::new(self.mar_min, self.mar_max),
            mouth_form: self
                .mouth_form
                .then(|| Thresholds::new(self.mouth_dist_min, self.mouth_dist_max)),
            body: self.body_movement.then(|| BodyLeanCalibration {
                roll_threshold: self.body_roll_threshold.abs(),
                yaw_threshold: self.body_yaw_threshold.abs(),
                max: self.body_roll_yaw_max.abs(),
            }),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// 読めなければデフォルト値
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            return Self::default_with_avatars();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}; using defaults", e);
                Self::default_with_avatars()
            }
        }
    }

    /// `Default` leaves the avatar list empty; this matches an empty file.
    pub fn default_with_avatars() -> Self {
        Self {
            avatars: default_avatars(),
            ..Self::default()
        }
    }

    pub fn backend_for(&self, avatar: &AvatarConfig) -> RigBackend {
        match avatar.kind {
            AvatarKind::BlendShape => {
                RigBackend::BlendShape(BlendShapeRig::new(self.blend_shape.calibration()))
            }
            AvatarKind::Live2d => RigBackend::Live2d(Live2dRig::new(self.live2d.calibration())),
        }
    }
}
