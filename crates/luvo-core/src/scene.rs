//! Scenes stored on the lamp and the session's cache of them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A lighting preset stored on the lamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    /// Device-defined scene id
    pub id: u8,
    /// Device-defined display name
    pub name: String,
    /// Brightness in percent (0-100), when the lamp reports it
    #[serde(default)]
    pub brightness: Option<u8>,
    /// Next scene in the lamp's list, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<u8>,
}

/// Scenes queried so far, keyed by id.
///
/// Not exhaustive: only scenes the session has queried are present, and an
/// entry is always the full reply of the latest successful query for its id.
#[derive(Debug, Clone, Default)]
pub struct SceneCache {
    scenes: BTreeMap<u8, Scene>,
}

impl SceneCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: u8) -> Option<&Scene> {
        self.scenes.get(&id)
    }

    /// Insert a scene, replacing any previous entry with the same id
    pub fn put(&mut self, scene: Scene) {
        self.scenes.insert(scene.id, scene);
    }

    /// Iterate the cached scenes. The iterator is `Clone`, so it can be restarted.
    pub fn all(&self) -> impl Iterator<Item = &Scene> + Clone + '_ {
        self.scenes.values()
    }

    /// First cached scene with this name (case-insensitive)
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Scene> {
        self.scenes
            .values()
            .find(|scene| scene.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn contains(&self, id: u8) -> bool {
        self.scenes.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn clear(&mut self) {
        self.scenes.clear();
    }
}
