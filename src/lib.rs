pub mod config;
pub mod error;
pub mod osc;
pub mod pose;
pub mod protocol;
pub mod registry;
pub mod retarget;
pub mod rig;
pub mod server;

pub use error::{AvatarError, AvatarResult, MalformedRecord};
pub use pose::PoseSnapshot;
pub use registry::{AvatarRegistry, PoseSink, Presentation};
pub use rig::{PoseSlot, RigBackend, RigConsumer, RigFrame};
pub use server::IngestServer;
