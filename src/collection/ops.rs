//! Structural operations: merge, split, group and clear.

use std::collections::BTreeMap;

use super::{Collection, split_attributes};
use crate::error::AnnotationError;
use crate::history::Command;
use crate::interpolation::interpolate;
use crate::model::{AnnotationObject, ClientId, Keyframe, Label, ObjectKind, ObjectState, ObjectType};

/// Options for clearing annotations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearOptions {
    /// Discard local changes and fetch the server state again
    pub reload: bool,
    /// Only clear objects within `from..=to`
    pub frame_range: Option<(u64, u64)>,
    /// Within the range, remove track keyframes instead of whole tracks
    pub track_keyframes_only: bool,
}

impl ClearOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reload(mut self, reload: bool) -> Self {
        self.reload = reload;
        self
    }

    pub fn with_frame_range(mut self, from: u64, to: u64) -> Self {
        self.frame_range = Some((from, to));
        self
    }

    pub fn with_track_keyframes_only(mut self, keyframes_only: bool) -> Self {
        self.track_keyframes_only = keyframes_only;
        self
    }
}

impl Collection {
    // ========================================================================
    // Merge
    // ========================================================================

    /// Merge shapes and tracks of one label and shape type into a new track.
    ///
    /// The inputs are deleted; the track has a keyframe at every frame an
    /// input contributed. Returns the client id of the new track.
    pub fn merge(&mut self, states: &[ObjectState]) -> Result<ClientId, AnnotationError> {
        if states.is_empty() {
            return Err(AnnotationError::argument("Nothing to merge"));
        }

        let mut sources: Vec<AnnotationObject> = Vec::new();
        for state in states {
            let (top_id, element_id) = self.resolve(state)?;
            if element_id.is_some() {
                return Err(AnnotationError::argument(
                    "Skeleton elements cannot be merged on their own",
                ));
            }
            if sources.iter().any(|o| o.client_id == top_id) {
                continue;
            }
            let object = self
                .object(top_id)
                .ok_or_else(|| AnnotationError::argument(format!("Object {} is not in the collection", top_id)))?;
            if object.object_type() == ObjectType::Tag {
                return Err(AnnotationError::argument("Tags cannot be merged"));
            }
            sources.push(object.clone());
        }

        let first = &sources[0];
        if sources.iter().any(|o| o.label_id != first.label_id) {
            return Err(AnnotationError::argument(
                "All merged objects must have the same label",
            ));
        }
        if sources.iter().any(|o| o.shape_type() != first.shape_type()) {
            return Err(AnnotationError::argument(
                "All merged objects must have the same shape type",
            ));
        }
        let label = self
            .labels
            .get(first.label_id)
            .cloned()
            .ok_or_else(|| AnnotationError::data(format!("Unknown label {}", first.label_id)))?;

        sources.sort_by_key(|o| o.first_frame());
        let merged = self.merge_objects(&sources, &label)?;
        let merged_id = merged.client_id;

        for source in &sources {
            let mut tombstone = source.clone();
            tombstone.removed = true;
            tombstone.elements.iter_mut().for_each(|e| e.removed = true);
            self.insert(tombstone);
        }
        self.insert(merged.clone());
        log::debug!("Merged {} objects into track {}", sources.len(), merged_id);
        self.push_command(Command::Merge { sources, merged });
        Ok(merged_id)
    }

    fn merge_objects(
        &mut self,
        sources: &[AnnotationObject],
        label: &Label,
    ) -> Result<AnnotationObject, AnnotationError> {
        let Some(first) = sources.first() else {
            return Err(AnnotationError::argument("Nothing to merge"));
        };
        let shape_type = first
            .shape_type()
            .ok_or_else(|| AnnotationError::argument("Tags cannot be merged"))?;

        let mut keyframes: BTreeMap<u64, Keyframe> = BTreeMap::new();
        for source in sources {
            let contributed: Vec<(u64, Keyframe)> = match &source.kind {
                ObjectKind::Shape {
                    frame, geometry, ..
                } => {
                    let mut keyframe = Keyframe::new(geometry.clone());
                    keyframe.attributes = split_attributes(label, source.attributes.clone()).1;
                    vec![(*frame, keyframe)]
                }
                ObjectKind::Track { keyframes, .. } => keyframes
                    .iter()
                    .map(|(frame, keyframe)| (*frame, keyframe.clone()))
                    .collect(),
                ObjectKind::Tag { .. } => {
                    return Err(AnnotationError::argument("Tags cannot be merged"));
                }
            };
            for (frame, mut keyframe) in contributed {
                keyframe.server_id = None;
                if keyframes.insert(frame, keyframe).is_some() {
                    return Err(AnnotationError::argument(format!(
                        "More than one merged object on frame {}",
                        frame
                    )));
                }
            }
        }

        let mut merged = AnnotationObject::new(
            self.allocate_id(),
            label.id,
            first.color,
            ObjectKind::Track {
                shape_type,
                keyframes,
            },
        );
        merged.attributes = split_attributes(label, first.attributes.clone()).0;
        merged.group = first.group;
        merged.source = first.source.edited();

        for sublabel in &label.sublabels {
            let parts: Vec<AnnotationObject> = sources
                .iter()
                .filter_map(|s| s.elements.iter().find(|e| e.label_id == sublabel.id))
                .cloned()
                .collect();
            if !parts.is_empty() {
                let element = self.merge_objects(&parts, sublabel)?;
                merged.elements.push(element);
            }
        }
        merged.sync_skeleton_keyframes();
        Ok(merged)
    }

    // ========================================================================
    // Split
    // ========================================================================

    /// Split a track at `frame`.
    ///
    /// The original ends with an outside keyframe at `frame`; a new track
    /// starts there with the remaining keyframes. Returns
    /// `(original, new)` client ids.
    pub fn split(
        &mut self,
        state: &ObjectState,
        frame: u64,
    ) -> Result<(ClientId, ClientId), AnnotationError> {
        let (top_id, element_id) = self.resolve(state)?;
        if element_id.is_some() {
            return Err(AnnotationError::argument(
                "Skeleton elements cannot be split on their own",
            ));
        }
        self.check_frame(frame)?;
        let before = self
            .object(top_id)
            .cloned()
            .ok_or_else(|| AnnotationError::argument(format!("Object {} is not in the collection", top_id)))?;
        if before.object_type() != ObjectType::Track {
            return Err(AnnotationError::argument("Only tracks can be split"));
        }
        let first = before.first_frame();
        if frame <= first {
            return Err(AnnotationError::argument(format!(
                "Split frame {} must be after the first keyframe {}",
                frame, first
            )));
        }

        let mut truncated = before.clone();
        let mut created = self.split_object(&mut truncated, frame)?;
        truncated.sync_skeleton_keyframes();
        created.sync_skeleton_keyframes();

        let ids = (truncated.client_id, created.client_id);
        self.insert(truncated.clone());
        self.insert(created.clone());
        log::debug!("Split track {} at frame {} into {}", ids.0, frame, ids.1);
        self.push_command(Command::Split {
            before,
            truncated,
            created,
        });
        Ok(ids)
    }

    fn split_object(
        &mut self,
        original: &mut AnnotationObject,
        frame: u64,
    ) -> Result<AnnotationObject, AnnotationError> {
        let label = self
            .labels
            .get(original.label_id)
            .cloned()
            .ok_or_else(|| AnnotationError::data(format!("Unknown label {}", original.label_id)))?;
        let stop = self.stop;

        let ObjectKind::Track {
            shape_type,
            keyframes,
        } = &mut original.kind
        else {
            return Err(AnnotationError::argument("Only tracks can be split"));
        };
        let shape_type = *shape_type;
        let effective = interpolate(keyframes, shape_type, &label.attributes, frame, stop)
            .ok_or_else(|| AnnotationError::data("Track has no keyframes"))?;

        let mut tail = keyframes.split_off(&frame);
        let mut head = tail
            .remove(&frame)
            .unwrap_or_else(|| Keyframe::new(effective.geometry.clone()));
        head.attributes = effective.attributes.clone();
        tail.insert(frame, head);
        tail.values_mut().for_each(|k| k.server_id = None);

        let mut end = Keyframe::new(effective.geometry);
        end.geometry.outside = true;
        keyframes.insert(frame, end);

        let mut created = AnnotationObject::new(
            self.allocate_id(),
            original.label_id,
            original.color,
            ObjectKind::Track {
                shape_type,
                keyframes: tail,
            },
        );
        created.attributes = original.attributes.clone();
        created.group = original.group;
        created.source = original.source;
        created.lock = original.lock;
        created.hidden = original.hidden;
        created.pinned = original.pinned;

        for element in &mut original.elements {
            let part = self.split_object(element, frame)?;
            created.elements.push(part);
        }
        Ok(created)
    }

    // ========================================================================
    // Group
    // ========================================================================

    /// Put objects into a new group, or ungroup them with `reset`.
    ///
    /// Returns the group id (0 when reset).
    pub fn group(&mut self, states: &[ObjectState], reset: bool) -> Result<u64, AnnotationError> {
        let mut ids: Vec<ClientId> = Vec::new();
        for state in states {
            let (top_id, _) = self.resolve(state)?;
            if !ids.contains(&top_id) {
                ids.push(top_id);
            }
        }
        if ids.is_empty() {
            return Err(AnnotationError::argument("Nothing to group"));
        }

        let group = if reset { 0 } else { self.allocate_group()? };
        let before: Vec<AnnotationObject> =
            ids.iter().filter_map(|id| self.object(*id)).cloned().collect();
        let after: Vec<AnnotationObject> = before
            .iter()
            .map(|object| {
                let mut object = object.clone();
                object.group = group;
                object
            })
            .collect();

        for object in &after {
            self.insert(object.clone());
        }
        log::debug!("Assigned group {} to {} objects", group, after.len());
        self.push_command(Command::Group {
            group,
            before,
            after,
        });
        Ok(group)
    }

    // ========================================================================
    // Clear
    // ========================================================================

    /// Clear annotations without contacting the server.
    ///
    /// Without a frame range everything is dropped together with the
    /// history, and the next save replaces the server state. With a range
    /// the removal is an ordinary undoable action. Reloading is the
    /// session's job; `options.reload` is not looked at here.
    pub fn clear(&mut self, options: &ClearOptions) -> Result<(), AnnotationError> {
        let Some((from, to)) = options.frame_range else {
            self.flush_all();
            return Ok(());
        };
        if from > to {
            return Err(AnnotationError::argument(format!(
                "Invalid frame range [{}, {}]",
                from, to
            )));
        }
        self.check_frame(from)?;
        self.check_frame(to)?;

        let mut before = Vec::new();
        let mut after = Vec::new();
        for object in self.objects() {
            let mut cleared = object.clone();
            let in_range = |frame: u64| (from..=to).contains(&frame);
            match &object.kind {
                ObjectKind::Shape { frame, .. } | ObjectKind::Tag { frame } => {
                    if in_range(*frame) {
                        cleared.removed = true;
                    }
                }
                ObjectKind::Track { .. } if options.track_keyframes_only => {
                    if !remove_keyframes_in(&mut cleared, from, to) {
                        cleared.removed = true;
                    }
                    cleared.sync_skeleton_keyframes();
                }
                ObjectKind::Track { .. } => {
                    if in_range(object.first_frame()) {
                        cleared.removed = true;
                    }
                }
            }
            if cleared.removed {
                cleared.elements.iter_mut().for_each(|e| e.removed = true);
            }
            if cleared != *object {
                before.push(object.clone());
                after.push(cleared);
            }
        }

        if after.is_empty() {
            return Ok(());
        }
        for object in &after {
            self.insert(object.clone());
        }
        log::debug!("Cleared {} objects in frames [{}, {}]", after.len(), from, to);
        self.push_command(Command::Clear { before, after });
        Ok(())
    }
}

/// Remove keyframes within `from..=to` from a track and its elements.
/// Returns false if any of them is left without keyframes.
fn remove_keyframes_in(object: &mut AnnotationObject, from: u64, to: u64) -> bool {
    let mut keeps = true;
    if let Some(keyframes) = object.keyframes_mut() {
        keyframes.retain(|frame, _| !(from..=to).contains(frame));
        keeps = !keyframes.is_empty();
    }
    for element in &mut object.elements {
        keeps &= remove_keyframes_in(element, from, to);
    }
    keeps
}
