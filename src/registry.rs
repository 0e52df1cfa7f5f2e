//! Avatar registry and switch controller.
//!
//! Holds the fixed, ordered set of avatars discovered at startup and routes
//! each published pose to the one that is currently active.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::error::{AvatarError, AvatarResult};
use crate::pose::PoseSnapshot;
use crate::rig::RigConsumer;

/// Host-side presentation object of one avatar.
pub trait Presentation: Send + Sync {
    fn name(&self) -> &str;

    /// Show or hide the avatar.
    fn set_active(&self, active: bool);

    /// `None` if this object cannot be driven by poses.
    fn rig_consumer(&self) -> Option<Arc<dyn RigConsumer>>;
}

/// Where the ingestion server delivers parsed poses.
pub trait PoseSink: Send + Sync {
    fn publish(&self, pose: PoseSnapshot);
}

#[derive(Clone)]
pub struct AvatarEntry {
    handle: Arc<dyn Presentation>,
    consumer: Arc<dyn RigConsumer>,
}

impl AvatarEntry {
    pub fn new(handle: Arc<dyn Presentation>, consumer: Arc<dyn RigConsumer>) -> Self {
        Self { handle, consumer }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }
}

impl std::fmt::Debug for AvatarEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarEntry").field("name", &self.name()).finish()
    }
}

#[derive(Debug)]
pub struct AvatarRegistry {
    entries: Vec<AvatarEntry>,
    /// Also the lock that orders `publish` against `switch_to`.
    active: Mutex<usize>,
}

impl AvatarRegistry {
    /// Builds the registry and activates the first entry, hiding the rest.
    pub fn new(entries: Vec<AvatarEntry>) -> AvatarResult<Self> {
        if entries.is_empty() {
            return Err(AvatarError::NoAvatarsFound);
        }
        for (i, entry) in entries.iter().enumerate() {
            entry.handle.set_active(i == 0);
        }
        info!("Found {} avatars, active: {}", entries.len(), entries[0].name());
        Ok(Self {
            entries,
            active: Mutex::new(0),
        })
    }

    /// Keeps only candidates that expose a rig consumer.
    pub fn discover<I>(candidates: I) -> AvatarResult<Self>
    where
        I: IntoIterator<Item = Arc<dyn Presentation>>,
    {
        let entries = candidates
            .into_iter()
            .filter_map(|handle| {
                let consumer = handle.rig_consumer()?;
                info!("Avatar: {}", handle.name());
                Some(AvatarEntry::new(handle, consumer))
            })
            .collect();
        Self::new(entries)
    }

    /// Like [`discover`](Self::discover), but an empty result is logged and
    /// yields an idle registry instead of an error.
    pub fn discover_or_idle<I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Presentation>>,
    {
        match Self::discover(candidates) {
            Ok(registry) => registry,
            Err(e) => {
                error!("{}; running idle", e);
                Self::idle()
            }
        }
    }

    /// No avatars: publishes are dropped and every switch is rejected.
    pub fn idle() -> Self {
        Self {
            entries: Vec::new(),
            active: Mutex::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[AvatarEntry] {
        &self.entries
    }

    pub fn active_index(&self) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        Some(*self.active.lock())
    }

    /// Switching to the active index changes nothing.
    pub fn switch_to(&self, index: usize) -> AvatarResult<usize> {
        let count = self.entries.len();
        if index >= count {
            return Err(AvatarError::IndexOutOfRange { index, count });
        }

        let mut active = self.active.lock();
        if *active == index {
            return Ok(index);
        }
        self.entries[*active].handle.set_active(false);
        self.entries[index].handle.set_active(true);
        *active = index;
        info!("Switched avatar to {} ({})", index, self.entries[index].name());
        Ok(index)
    }

    /// Advance cyclically to the next avatar.
    pub fn next(&self) -> AvatarResult<usize> {
        let count = self.entries.len();
        if count == 0 {
            return Err(AvatarError::NoAvatarsFound);
        }
        // hold the lock across read-modify-write so concurrent `next`s don't skip
        let mut active = self.active.lock();
        let index = (*active + 1) % count;
        if index != *active {
            self.entries[*active].handle.set_active(false);
            self.entries[index].handle.set_active(true);
            *active = index;
            info!("Switched avatar to {} ({})", index, self.entries[index].name());
        }
        Ok(index)
    }
}

impl PoseSink for AvatarRegistry {
    fn publish(&self, pose: PoseSnapshot) {
        let active = self.active.lock();
        if let Some(entry) = self.entries.get(*active) {
            entry.consumer.set_pose(pose);
        }
    }
}
