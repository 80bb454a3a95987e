//! Scene stepping by brightness
//!
//! Mirrors the lamp's own "Next Scene by brightness": brighter picks the
//! dimmest scene that is strictly brighter than the current one, dimmer
//! picks the brightest scene strictly dimmer. Ties go to the lowest id.
//! Scenes whose brightness is unknown take no part.

use crate::scene::{Scene, SceneCache};
use luvo_protocol::Direction;
use serde::Serialize;
use std::cmp::Reverse;

/// Result of a scene step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "scene_id", rename_all = "snake_case")]
pub enum NavigationOutcome {
    /// Step to this scene
    Changed(u8),
    /// No cached scene lies further in that direction
    NoChange,
}

/// Pick the next scene after one with `current_brightness`
#[must_use]
pub fn next_scene<'a, I>(
    scenes: I,
    current_brightness: u8,
    direction: Direction,
) -> NavigationOutcome
where
    I: IntoIterator<Item = &'a Scene>,
{
    let candidates = scenes
        .into_iter()
        .filter_map(|s| s.brightness.map(|brightness| (brightness, s.id)));
    let target = match direction {
        Direction::Brighter => candidates
            .filter(|&(brightness, _)| brightness > current_brightness)
            .min_by_key(|&(brightness, id)| (brightness, id)),
        Direction::Dimmer => candidates
            .filter(|&(brightness, _)| brightness < current_brightness)
            .min_by_key(|&(brightness, id)| (Reverse(brightness), id)),
    };

    target.map_or(NavigationOutcome::NoChange, |(_, id)| NavigationOutcome::Changed(id))
}

/// Pick the next scene after `current_id`. `None` if that scene is not
/// cached or its brightness is unknown.
#[must_use]
pub fn navigate(
    cache: &SceneCache,
    current_id: u8,
    direction: Direction,
) -> Option<NavigationOutcome> {
    let brightness = cache.get(current_id)?.brightness?;
    Some(next_scene(cache.all(), brightness, direction))
}
