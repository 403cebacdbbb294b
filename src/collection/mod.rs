//! The annotation collection.
//!
//! The collection exclusively owns every canonical [`AnnotationObject`] of a
//! session in an arena keyed by client id. Callers read per-frame
//! [`ObjectState`] snapshots and write them back through
//! [`Collection::save_state`]; every mutation is recorded in the undo history
//! and in the [`ChangeSet`] that drives the next save.

mod changes;
mod ops;
mod query;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

pub use changes::ChangeSet;
pub use ops::ClearOptions;
pub use query::{LabelStatistics, SelectResult, ShapeCounts, Statistics};

use crate::config::EngineConfig;
use crate::error::AnnotationError;
use crate::filter::FilterExpr;
use crate::geometry::is_degenerate;
use crate::history::{Command, HistoryInfo, UndoStack};
use crate::interpolation::{interpolate, keyframe_nav};
use crate::model::{
    AnnotationObject, ClientId, Geometry, Keyframe, Label, LabelSet, ObjectKind, ObjectState,
    ObjectType, ShapeType, UpdateFlags,
};

/// In-memory store of a session's annotations.
#[derive(Debug, Clone)]
pub struct Collection {
    labels: LabelSet,
    config: EngineConfig,
    start: u64,
    stop: u64,
    /// Top-level objects; skeleton elements live inside their parent
    objects: BTreeMap<ClientId, AnnotationObject>,
    /// Element client id -> skeleton client id
    parents: BTreeMap<ClientId, ClientId>,
    next_client_id: ClientId,
    next_group: u64,
    changes: ChangeSet,
    history: UndoStack,
    /// The server state must be replaced wholesale on the next save
    flush: bool,
}

impl Collection {
    /// Create an empty collection for frames `start..=stop`.
    pub fn new(
        labels: LabelSet,
        start: u64,
        stop: u64,
        config: EngineConfig,
    ) -> Result<Self, AnnotationError> {
        if start > stop {
            return Err(AnnotationError::argument(format!(
                "Invalid frame range [{}, {}]",
                start, stop
            )));
        }
        Ok(Self {
            labels,
            history: UndoStack::with_config(config.history),
            config,
            start,
            stop,
            objects: BTreeMap::new(),
            parents: BTreeMap::new(),
            next_client_id: 1,
            next_group: 1,
            changes: ChangeSet::new(),
            flush: false,
        })
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn stop(&self) -> u64 {
        self.stop
    }

    /// Canonical object by client id, including tombstones.
    pub fn object(&self, client_id: ClientId) -> Option<&AnnotationObject> {
        self.objects.get(&client_id)
    }

    /// Live (not deleted) top-level objects in creation order.
    pub fn objects(&self) -> impl Iterator<Item = &AnnotationObject> {
        self.objects.values().filter(|o| !o.removed)
    }

    /// Number of live top-level objects.
    pub fn len(&self) -> usize {
        self.objects().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Whether anything was created, changed or deleted since the last save.
    pub fn has_unsaved_changes(&self) -> bool {
        self.flush || !self.changes.is_empty()
    }

    pub fn history_info(&self) -> HistoryInfo {
        self.history.info()
    }

    /// Reject frames outside the session range.
    pub fn check_frame(&self, frame: u64) -> Result<(), AnnotationError> {
        if frame < self.start || frame > self.stop {
            return Err(AnnotationError::argument(format!(
                "Frame {} is out of the range [{}, {}]",
                frame, self.start, self.stop
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// States of every object present on `frame`, ordered by z order.
    ///
    /// Tracks absent on the frame are skipped unless `all_interpolated`.
    pub fn get(
        &self,
        frame: u64,
        all_interpolated: bool,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<ObjectState>, AnnotationError> {
        self.check_frame(frame)?;
        Ok(self.states_at(frame, all_interpolated, filter))
    }

    pub(crate) fn states_at(
        &self,
        frame: u64,
        all_interpolated: bool,
        filter: Option<&FilterExpr>,
    ) -> Vec<ObjectState> {
        let mut states: Vec<ObjectState> = self
            .objects()
            .filter_map(|object| self.state_at(object, frame, None))
            .filter(|s| all_interpolated || s.object_type != ObjectType::Track || !s.outside)
            .filter(|s| filter.is_none_or(|f| f.matches(s)))
            .collect();
        states.sort_by_key(|s| s.z_order);
        states
    }

    /// Snapshot of `object` on `frame`, None if it does not exist there.
    pub(crate) fn state_at(
        &self,
        object: &AnnotationObject,
        frame: u64,
        parent_id: Option<ClientId>,
    ) -> Option<ObjectState> {
        let label = self.labels.get(object.label_id)?.clone();
        let mut attributes = object.attributes.clone();

        let (geometry, keyframe, interpolated, keyframes) = match &object.kind {
            ObjectKind::Tag { frame: f } => {
                if *f != frame {
                    return None;
                }
                (Geometry::default(), false, false, None)
            }
            ObjectKind::Shape {
                frame: f, geometry, ..
            } => {
                if *f != frame {
                    return None;
                }
                (geometry.clone(), false, false, None)
            }
            ObjectKind::Track {
                shape_type,
                keyframes,
            } => {
                let shape = interpolate(keyframes, *shape_type, &label.attributes, frame, self.stop)?;
                attributes.extend(shape.attributes);
                (
                    shape.geometry,
                    shape.keyframe,
                    shape.interpolated,
                    Some(keyframe_nav(keyframes, frame)),
                )
            }
        };

        let elements = object
            .elements
            .iter()
            .map(|element| self.state_at(element, frame, Some(object.client_id)))
            .collect::<Option<Vec<_>>>()?;

        let mut state = ObjectState {
            object_type: object.object_type(),
            shape_type: object.shape_type(),
            client_id: Some(object.client_id),
            server_id: object.server_id,
            parent_id,
            frame,
            color: object.color,
            label,
            attributes,
            elements,
            points: geometry.points,
            rotation: geometry.rotation,
            occluded: geometry.occluded,
            outside: geometry.outside,
            keyframe,
            interpolated,
            z_order: geometry.z_order,
            lock: object.lock,
            hidden: object.hidden,
            pinned: object.pinned,
            group: object.group,
            source: object.source,
            keyframes,
            updated: UpdateFlags::default(),
        };

        if object.is_skeleton() && !state.elements.is_empty() {
            let policy = self.config.skeleton;
            let elements = &state.elements;
            let outside = policy.outside.fold(elements.iter().map(|e| e.outside));
            let occluded = policy.occluded.fold(elements.iter().map(|e| e.occluded));
            let hidden = policy.hidden.fold(elements.iter().map(|e| e.hidden));
            let lock = policy.lock.fold(elements.iter().map(|e| e.lock));
            let interpolated = elements.iter().any(|e| e.interpolated);
            state.outside = outside;
            state.occluded = occluded;
            state.hidden = hidden;
            state.lock = lock;
            state.interpolated = interpolated && !state.keyframe;
        }
        Some(state)
    }

    fn fresh_state(
        &self,
        top_id: ClientId,
        element_id: Option<ClientId>,
        frame: u64,
    ) -> Result<ObjectState, AnnotationError> {
        let state = self
            .objects
            .get(&top_id)
            .and_then(|object| self.state_at(object, frame, None));
        let state = match element_id {
            None => state,
            Some(id) => state.and_then(|s| s.elements.into_iter().find(|e| e.client_id == Some(id))),
        };
        state.ok_or_else(|| {
            AnnotationError::data(format!("Object {} has no state on frame {}", top_id, frame))
        })
    }

    /// Find the canonical object a state refers to.
    ///
    /// Returns the top-level client id and, for skeleton elements, the
    /// element's own id.
    pub(crate) fn resolve(
        &self,
        state: &ObjectState,
    ) -> Result<(ClientId, Option<ClientId>), AnnotationError> {
        let Some(client_id) = state.client_id else {
            return Err(AnnotationError::argument(
                "The object has not been saved in a collection yet",
            ));
        };
        let live = |id: &ClientId| self.objects.get(id).is_some_and(|o| !o.removed);
        if live(&client_id) {
            return Ok((client_id, None));
        }
        match self.parents.get(&client_id) {
            Some(parent) if live(parent) => Ok((*parent, Some(client_id))),
            _ => Err(AnnotationError::argument(format!(
                "Object {} is not in the collection",
                client_id
            ))),
        }
    }

    // ========================================================================
    // Creating
    // ========================================================================

    /// Insert new objects. Either every state is valid and inserted, or the
    /// call fails without changing anything.
    pub fn put(&mut self, states: &[ObjectState]) -> Result<Vec<ClientId>, AnnotationError> {
        let labels = states
            .iter()
            .map(|state| self.validate_new(state))
            .collect::<Result<Vec<_>, _>>()?;

        let mut created = Vec::with_capacity(states.len());
        for (state, label) in states.iter().zip(&labels) {
            created.push(self.build_object(state, label)?);
        }
        if created.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ClientId> = created.iter().map(|o| o.client_id).collect();
        for object in &created {
            self.insert(object.clone());
        }
        log::debug!("Put {} objects: {:?}", ids.len(), ids);
        self.history.push(Command::Create { objects: created });
        Ok(ids)
    }

    fn validate_new(&self, state: &ObjectState) -> Result<Label, AnnotationError> {
        if let Some(id) = state.client_id {
            return Err(AnnotationError::argument(format!(
                "Object {} is already in a collection",
                id
            )));
        }
        self.check_frame(state.frame)?;
        let label = self.labels.resolve(&state.label)?.clone();
        if label.has_parent {
            return Err(AnnotationError::argument(format!(
                "Sublabel '{}' can only be used inside its skeleton",
                label.name
            )));
        }
        self.validate_new_geometry(state, &label)?;
        Ok(label)
    }

    fn validate_new_geometry(&self, state: &ObjectState, label: &Label) -> Result<(), AnnotationError> {
        label.validate_attributes(&state.attributes)?;
        if state.object_type == ObjectType::Tag {
            return Ok(());
        }
        let Some(shape_type) = state.shape_type else {
            return Err(AnnotationError::argument(
                "Shape type is required for shapes and tracks",
            ));
        };
        if !label.label_type.accepts(state.object_type, Some(shape_type)) {
            return Err(AnnotationError::argument(format!(
                "Label '{}' cannot be used for a {}",
                label.name, shape_type
            )));
        }

        if shape_type == ShapeType::Skeleton {
            if state.elements.len() != label.sublabels.len() {
                return Err(AnnotationError::data(format!(
                    "Skeleton '{}' expects {} elements",
                    label.name,
                    label.sublabels.len()
                )));
            }
            for element in &state.elements {
                let sublabel = label
                    .sublabels
                    .iter()
                    .find(|s| **s == element.label)
                    .ok_or_else(|| {
                        AnnotationError::argument(format!(
                            "'{}' is not a sublabel of '{}'",
                            element.label.name, label.name
                        ))
                    })?;
                self.validate_new_geometry(element, sublabel)?;
            }
            return Ok(());
        }

        if state.points.is_empty() {
            return Err(AnnotationError::data("Points are required for shapes and tracks"));
        }
        crate::geometry::validate_points(&state.points, shape_type)?;
        if is_degenerate(&state.points, shape_type, &self.config.geometry) {
            return Err(AnnotationError::data(format!(
                "The {} is too small",
                shape_type
            )));
        }
        Ok(())
    }

    /// Check an object built outside of `put`, such as an imported one,
    /// against the rules `put` applies to new states.
    fn validate_object(
        &self,
        object: &AnnotationObject,
        skeleton: Option<&Label>,
    ) -> Result<(), AnnotationError> {
        let label = match skeleton {
            Some(parent) => parent
                .sublabels
                .iter()
                .find(|s| s.id == object.label_id)
                .ok_or_else(|| {
                    AnnotationError::argument(format!(
                        "Label {} is not a sublabel of '{}'",
                        object.label_id, parent.name
                    ))
                })?,
            None => {
                let label = self.labels.get(object.label_id).ok_or_else(|| {
                    AnnotationError::data(format!("Unknown label id {}", object.label_id))
                })?;
                if label.has_parent {
                    return Err(AnnotationError::argument(format!(
                        "Sublabel '{}' can only be used inside its skeleton",
                        label.name
                    )));
                }
                label
            }
        };

        label.validate_attributes(&object.attributes)?;
        if let Some(keyframes) = object.keyframes() {
            for keyframe in keyframes.values() {
                label.validate_attributes(&keyframe.attributes)?;
            }
        }
        let shape_type = object.shape_type();
        if !label.label_type.accepts(object.object_type(), shape_type) {
            return Err(AnnotationError::argument(format!(
                "Label '{}' cannot be used for this object",
                label.name
            )));
        }
        let Some(shape_type) = shape_type else {
            return Ok(());
        };

        if shape_type == ShapeType::Skeleton {
            if object.elements.len() != label.sublabels.len() {
                return Err(AnnotationError::data(format!(
                    "Skeleton '{}' expects {} elements",
                    label.name,
                    label.sublabels.len()
                )));
            }
            let mut seen = Vec::with_capacity(object.elements.len());
            for element in &object.elements {
                if seen.contains(&element.label_id) {
                    return Err(AnnotationError::argument(format!(
                        "Skeleton '{}' has two elements with label {}",
                        label.name, element.label_id
                    )));
                }
                seen.push(element.label_id);
                self.validate_object(element, Some(label))?;
            }
            return Ok(());
        }
        if !object.elements.is_empty() {
            return Err(AnnotationError::argument(format!(
                "Only skeletons have elements, not a {}",
                shape_type
            )));
        }

        let geometries: Vec<&Geometry> = match &object.kind {
            ObjectKind::Shape { geometry, .. } => vec![geometry],
            ObjectKind::Track { keyframes, .. } => keyframes.values().map(|k| &k.geometry).collect(),
            ObjectKind::Tag { .. } => Vec::new(),
        };
        for geometry in geometries {
            crate::geometry::validate_points(&geometry.points, shape_type)?;
            if !geometry.outside && is_degenerate(&geometry.points, shape_type, &self.config.geometry) {
                return Err(AnnotationError::data(format!(
                    "The {} is too small",
                    shape_type
                )));
            }
        }
        Ok(())
    }

    fn build_object(
        &mut self,
        state: &ObjectState,
        label: &Label,
    ) -> Result<AnnotationObject, AnnotationError> {
        let client_id = self.allocate_id();
        let geometry = Geometry {
            points: if state.shape_type == Some(ShapeType::Skeleton) {
                Vec::new()
            } else {
                state.points.clone()
            },
            rotation: state.rotation,
            occluded: state.occluded,
            outside: state.outside,
            z_order: state.z_order,
        };

        let mut attributes = label.default_attributes();
        attributes.extend(state.attributes.clone());

        let kind = match (state.object_type, state.shape_type) {
            (ObjectType::Tag, _) => ObjectKind::Tag { frame: state.frame },
            (ObjectType::Shape, Some(shape_type)) => ObjectKind::Shape {
                frame: state.frame,
                shape_type,
                geometry,
            },
            (ObjectType::Track, Some(shape_type)) => {
                let (immutable, mutable) = split_attributes(label, attributes);
                attributes = immutable;
                let mut keyframe = Keyframe::new(geometry);
                keyframe.attributes = mutable;
                ObjectKind::Track {
                    shape_type,
                    keyframes: [(state.frame, keyframe)].into(),
                }
            }
            (_, None) => {
                return Err(AnnotationError::argument(
                    "Shape type is required for shapes and tracks",
                ));
            }
        };

        let mut object = AnnotationObject::new(client_id, label.id, state.color, kind);
        object.attributes = attributes;
        object.group = state.group;
        object.source = state.source;
        object.lock = state.lock;
        object.hidden = state.hidden;
        object.pinned = state.pinned;

        for element in &state.elements {
            let sublabel = label
                .sublabels
                .iter()
                .find(|s| s.id == element.label.id)
                .ok_or_else(|| AnnotationError::argument("Unknown skeleton element"))?;
            object.elements.push(self.build_object(element, sublabel)?);
        }
        Ok(object)
    }

    pub(crate) fn allocate_id(&mut self) -> ClientId {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    /// Next unused group id. `u64::MAX` is never handed out.
    pub(crate) fn allocate_group(&mut self) -> Result<u64, AnnotationError> {
        let group = self.next_group;
        if group == u64::MAX {
            return Err(AnnotationError::argument("No group ids left"));
        }
        self.next_group += 1;
        Ok(group)
    }

    /// Insert or overwrite a top-level object and record the change.
    pub(crate) fn insert(&mut self, object: AnnotationObject) {
        if let Some(old) = self.objects.get(&object.client_id) {
            for element in &old.elements {
                self.parents.remove(&element.client_id);
            }
        }
        for element in &object.elements {
            self.parents.insert(element.client_id, object.client_id);
        }
        self.next_group = self.next_group.max(object.group.saturating_add(1));
        self.changes.mark(&object);
        self.objects.insert(object.client_id, object);
    }

    /// Write back a history snapshot, keeping the server ids known now.
    fn restore(&mut self, mut snapshot: AnnotationObject) {
        match self.objects.get(&snapshot.client_id) {
            Some(current) => carry_server_ids(current, &mut snapshot),
            None => snapshot.clear_server_ids(),
        }
        self.insert(snapshot);
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Commit the edits recorded in `state` and return a fresh state.
    ///
    /// Degenerate geometry and edits of locked objects are discarded without
    /// an error; the returned state then shows the unchanged values.
    pub fn save_state(&mut self, state: &ObjectState) -> Result<ObjectState, AnnotationError> {
        let (top_id, element_id) = self.resolve(state)?;
        self.check_frame(state.frame)?;
        if !state.updated.any() {
            return self.fresh_state(top_id, element_id, state.frame);
        }

        let before = self
            .objects
            .get(&top_id)
            .cloned()
            .ok_or_else(|| AnnotationError::argument(format!("Object {} is not in the collection", top_id)))?;
        let mut after = before.clone();

        match element_id {
            None => self.apply_top_level(&mut after, state)?,
            Some(id) => {
                if let Some(element) = after.element_mut(id) {
                    self.apply_edit(element, state)?;
                }
                after.sync_skeleton_keyframes();
            }
        }

        if after != before {
            let flags = state.updated;
            if flags.label || flags.attributes || flags.touches_frame() {
                after.source = after.source.edited();
            }
            log::debug!("Saved state of object {} on frame {}", top_id, state.frame);
            self.insert(after.clone());
            self.history.push(Command::Modify {
                description: describe(&flags),
                before,
                after,
            });
        }
        self.fresh_state(top_id, element_id, state.frame)
    }

    fn apply_top_level(
        &self,
        object: &mut AnnotationObject,
        state: &ObjectState,
    ) -> Result<(), AnnotationError> {
        if !object.is_skeleton() {
            return self.apply_edit(object, state);
        }

        let locked = self
            .config
            .skeleton
            .lock
            .fold(object.elements.iter().map(|e| e.lock));
        if locked && state.lock {
            log::debug!("Object {} is locked, ignoring changes", object.client_id);
            return Ok(());
        }

        let flags = state.updated;
        let label = self.labels.resolve(&state.label)?.clone();
        if flags.attributes {
            label.validate_attributes(&state.attributes)?;
            object.attributes.extend(state.attributes.clone());
        }
        apply_object_flags(object, state);

        for element_state in state.elements.iter().filter(|e| e.updated.any()) {
            let Some(id) = element_state.client_id else {
                continue;
            };
            if let Some(element) = object.element_mut(id) {
                self.apply_edit(element, element_state)?;
            }
        }
        object.sync_skeleton_keyframes();

        if flags.z_order {
            match &mut object.kind {
                ObjectKind::Shape { geometry, .. } => geometry.z_order = state.z_order,
                ObjectKind::Track { keyframes, .. } => {
                    if let Some((_, keyframe)) = keyframes.range_mut(..=state.frame).next_back() {
                        keyframe.geometry.z_order = state.z_order;
                    }
                }
                ObjectKind::Tag { .. } => {}
            }
        }
        Ok(())
    }

    /// Apply the edits of `state` to one non-skeleton object or element.
    fn apply_edit(
        &self,
        object: &mut AnnotationObject,
        state: &ObjectState,
    ) -> Result<(), AnnotationError> {
        if object.lock && state.lock {
            log::debug!("Object {} is locked, ignoring changes", object.client_id);
            return Ok(());
        }
        let flags = state.updated;
        let frame = state.frame;

        let label = self.labels.resolve(&state.label)?.clone();
        if flags.label && label.id != object.label_id {
            if !label.label_type.accepts(object.object_type(), object.shape_type()) {
                return Err(AnnotationError::argument(format!(
                    "Label '{}' cannot be used for this object",
                    label.name
                )));
            }
            object.label_id = label.id;
            object.attributes = label.default_attributes();
            if let Some(keyframes) = object.keyframes_mut() {
                keyframes.values_mut().for_each(|k| k.attributes.clear());
            }
            if object.object_type() == ObjectType::Track {
                object.attributes = split_attributes(&label, object.attributes.clone()).0;
            }
        }

        if flags.attributes {
            label.validate_attributes(&state.attributes)?;
            if object.object_type() == ObjectType::Track {
                let (immutable, mutable) = split_attributes(&label, state.attributes.clone());
                object.attributes.extend(immutable);
                self.apply_mutable_attributes(object, &label, frame, mutable);
            } else {
                object.attributes.extend(state.attributes.clone());
            }
        }

        match object.object_type() {
            ObjectType::Tag => {}
            ObjectType::Shape => {
                if let ObjectKind::Shape {
                    shape_type,
                    geometry,
                    ..
                } = &mut object.kind
                {
                    self.apply_geometry(geometry, *shape_type, state);
                }
            }
            ObjectType::Track => {
                if flags.keyframe && !state.keyframe {
                    remove_keyframe(object, frame);
                } else if flags.touches_frame()
                    && !self.only_rejected_points(state, object.shape_type())
                {
                    let shape_type = object.shape_type();
                    if let (Some(keyframe), Some(shape_type)) =
                        (self.ensure_keyframe(object, frame, &label), shape_type)
                    {
                        self.apply_geometry(&mut keyframe.geometry, shape_type, state);
                    }
                }
            }
        }

        apply_object_flags(object, state);
        Ok(())
    }

    /// Whether the only per-frame write of `state` is geometry that would be
    /// discarded as degenerate. No keyframe is created for such an edit.
    fn only_rejected_points(&self, state: &ObjectState, shape_type: Option<ShapeType>) -> bool {
        let flags = state.updated;
        let others = UpdateFlags {
            points: false,
            ..flags
        };
        flags.points
            && !others.touches_frame()
            && shape_type.is_some_and(|shape_type| {
                shape_type != ShapeType::Skeleton
                    && is_degenerate(&state.points, shape_type, &self.config.geometry)
            })
    }

    fn apply_geometry(&self, geometry: &mut Geometry, shape_type: ShapeType, state: &ObjectState) {
        let flags = state.updated;
        if flags.points && shape_type != ShapeType::Skeleton {
            if is_degenerate(&state.points, shape_type, &self.config.geometry) {
                log::debug!("Ignoring degenerate {} geometry", shape_type);
            } else {
                geometry.points = state.points.clone();
            }
        }
        if flags.rotation {
            geometry.rotation = state.rotation;
        }
        if flags.occluded {
            geometry.occluded = state.occluded;
        }
        if flags.outside {
            geometry.outside = state.outside;
        }
        if flags.z_order {
            geometry.z_order = state.z_order;
        }
    }

    /// Keyframe of a track at `frame`, created from the interpolated
    /// state if missing.
    fn ensure_keyframe<'a>(
        &self,
        object: &'a mut AnnotationObject,
        frame: u64,
        label: &Label,
    ) -> Option<&'a mut Keyframe> {
        let ObjectKind::Track {
            shape_type,
            keyframes,
        } = &mut object.kind
        else {
            return None;
        };
        if !keyframes.contains_key(&frame) {
            let effective = interpolate(keyframes, *shape_type, &label.attributes, frame, self.stop)?;
            let mut keyframe = Keyframe::new(effective.geometry);
            keyframe.attributes = effective.attributes;
            keyframes.insert(frame, keyframe);
        }
        keyframes.get_mut(&frame)
    }

    fn apply_mutable_attributes(
        &self,
        object: &mut AnnotationObject,
        label: &Label,
        frame: u64,
        mutable: BTreeMap<u64, String>,
    ) {
        let current = self
            .state_at(object, frame, None)
            .map(|s| s.attributes)
            .unwrap_or_default();
        let changed: BTreeMap<u64, String> = mutable
            .into_iter()
            .filter(|(id, value)| current.get(id) != Some(value))
            .collect();
        if changed.is_empty() {
            return;
        }
        if let Some(keyframe) = self.ensure_keyframe(object, frame, label) {
            keyframe.attributes.extend(changed);
        }
    }

    // ========================================================================
    // Deleting
    // ========================================================================

    /// Delete objects. Locked objects are skipped unless `force`.
    ///
    /// Returns the number of objects deleted.
    pub fn delete(&mut self, states: &[ObjectState], force: bool) -> Result<usize, AnnotationError> {
        let mut ids = Vec::new();
        for state in states {
            let (top_id, _) = self.resolve(state)?;
            if !ids.contains(&top_id) {
                ids.push(top_id);
            }
        }

        let mut removed = Vec::new();
        for id in ids {
            let Some(object) = self.objects.get(&id) else {
                continue;
            };
            if !force && self.is_locked(object) {
                log::debug!("Object {} is locked, not deleting", id);
                continue;
            }
            removed.push(object.clone());
        }
        if removed.is_empty() {
            return Ok(0);
        }

        for object in &removed {
            let mut tombstone = object.clone();
            tombstone.removed = true;
            tombstone.elements.iter_mut().for_each(|e| e.removed = true);
            self.insert(tombstone);
        }
        let count = removed.len();
        log::debug!("Deleted {} objects", count);
        self.history.push(Command::Remove { objects: removed });
        Ok(count)
    }

    pub(crate) fn is_locked(&self, object: &AnnotationObject) -> bool {
        if object.is_skeleton() && !object.elements.is_empty() {
            self.config
                .skeleton
                .lock
                .fold(object.elements.iter().map(|e| e.lock))
        } else {
            object.lock
        }
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Undo up to `count` actions; returns how many were undone.
    pub fn undo(&mut self, count: usize) -> usize {
        let mut applied = 0;
        while applied < count {
            let Some(command) = self.history.pop_undo() else {
                break;
            };
            for snapshot in command.undo_writes() {
                self.restore(snapshot);
            }
            applied += 1;
        }
        applied
    }

    /// Redo up to `count` actions; returns how many were redone.
    pub fn redo(&mut self, count: usize) -> usize {
        let mut applied = 0;
        while applied < count {
            let Some(command) = self.history.pop_redo() else {
                break;
            };
            for snapshot in command.redo_writes() {
                self.restore(snapshot);
            }
            applied += 1;
        }
        applied
    }

    pub(crate) fn push_command(&mut self, command: Command) {
        self.history.push(command);
    }

    // ========================================================================
    // Synchronization support
    // ========================================================================

    pub(crate) fn object_mut(&mut self, client_id: ClientId) -> Option<&mut AnnotationObject> {
        self.objects.get_mut(&client_id)
    }

    /// The object is in sync with the server.
    pub(crate) fn mark_synced(&mut self, client_id: ClientId) {
        self.changes.forget(client_id);
    }

    pub(crate) fn is_flushed(&self) -> bool {
        self.flush
    }

    /// The wholesale replacement was accepted by the server.
    pub(crate) fn finish_flush(&mut self) {
        self.flush = false;
        self.changes.clear();
    }

    /// Drop every object and all history. The next save replaces the server
    /// state.
    pub(crate) fn flush_all(&mut self) {
        let count = self.objects.len();
        self.objects.clear();
        self.parents.clear();
        self.changes.clear();
        self.history.clear();
        self.flush = true;
        log::info!("Cleared {} objects, server state will be replaced", count);
    }

    /// Replace the content with objects fetched from the server.
    pub(crate) fn replace_all(&mut self, objects: Vec<AnnotationObject>) {
        self.objects.clear();
        self.parents.clear();
        self.history.clear();
        for object in objects {
            self.insert(object);
        }
        self.changes.clear();
        self.flush = false;
    }

    /// Insert converted objects as new, undoable local creations.
    ///
    /// Every object is validated first; nothing is inserted if one is invalid.
    pub(crate) fn import(
        &mut self,
        objects: Vec<AnnotationObject>,
    ) -> Result<Vec<ClientId>, AnnotationError> {
        for object in &objects {
            self.validate_object(object, None)?;
        }
        let ids = objects.iter().map(|o| o.client_id).collect();
        for object in &objects {
            self.insert(object.clone());
        }
        if !objects.is_empty() {
            self.history.push(Command::Batch {
                description: format!("Import {} objects", objects.len()),
                commands: vec![Command::Create { objects }],
            });
        }
        Ok(ids)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Split attribute values into (immutable, mutable) by the label's definitions.
pub(crate) fn split_attributes(
    label: &Label,
    attributes: BTreeMap<u64, String>,
) -> (BTreeMap<u64, String>, BTreeMap<u64, String>) {
    attributes
        .into_iter()
        .partition(|(id, _)| !label.attribute(*id).is_some_and(|spec| spec.mutable))
}

fn apply_object_flags(object: &mut AnnotationObject, state: &ObjectState) {
    let flags = state.updated;
    if flags.lock {
        object.lock = state.lock;
    }
    if flags.hidden {
        object.hidden = state.hidden;
    }
    if flags.pinned {
        object.pinned = state.pinned;
    }
    if flags.color {
        object.color = state.color;
    }
}

/// Remove a track keyframe; the last one is kept.
fn remove_keyframe(object: &mut AnnotationObject, frame: u64) {
    if let Some(keyframes) = object.keyframes_mut() {
        if keyframes.len() > 1 {
            keyframes.remove(&frame);
        } else {
            log::debug!("Keeping the only keyframe of object {}", object.client_id);
        }
    }
}

fn carry_server_ids(current: &AnnotationObject, snapshot: &mut AnnotationObject) {
    snapshot.server_id = current.server_id;
    let current_keyframes = current.keyframes();
    if let Some(keyframes) = snapshot.keyframes_mut() {
        for (frame, keyframe) in keyframes.iter_mut() {
            keyframe.server_id = current_keyframes
                .and_then(|k| k.get(frame))
                .and_then(|k| k.server_id);
        }
    }
    for element in &mut snapshot.elements {
        match current.element(element.client_id) {
            Some(current_element) => carry_server_ids(current_element, element),
            None => element.clear_server_ids(),
        }
    }
}

fn describe(flags: &UpdateFlags) -> String {
    let description = if flags.label {
        "Change label"
    } else if flags.points || flags.rotation {
        "Change geometry"
    } else if flags.attributes {
        "Change attributes"
    } else if flags.keyframe {
        "Change keyframe"
    } else if flags.outside {
        "Change visibility"
    } else if flags.occluded {
        "Change occlusion"
    } else if flags.z_order {
        "Change z order"
    } else if flags.lock {
        "Change lock"
    } else {
        "Change object"
    };
    description.to_string()
}
