//! Read-only queries: hit testing, frame search and statistics.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::Collection;
use crate::error::AnnotationError;
use crate::filter::FilterExpr;
use crate::geometry::distance_to_point;
use crate::interpolation::interpolate;
use crate::model::{AnnotationObject, ObjectKind, ObjectState, ShapeType};

/// Result of a hit test.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectResult {
    pub state: ObjectState,
    pub distance: f64,
}

/// Shape and track counts of one shape type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShapeCounts {
    pub shape: u64,
    pub track: u64,
}

/// Annotation counts of one label (or of all labels).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelStatistics {
    pub by_shape: BTreeMap<ShapeType, ShapeCounts>,
    pub tag: u64,
    /// Frames annotated by hand (shapes, tags and visible keyframes)
    pub manually: u64,
    /// Frames covered by interpolation between keyframes
    pub interpolated: u64,
    pub total: u64,
}

impl LabelStatistics {
    fn empty() -> Self {
        Self {
            by_shape: ShapeType::all()
                .iter()
                .map(|t| (*t, ShapeCounts::default()))
                .collect(),
            ..Default::default()
        }
    }

    fn add(&mut self, other: &LabelStatistics) {
        for (shape_type, counts) in &other.by_shape {
            let entry = self.by_shape.entry(*shape_type).or_default();
            entry.shape += counts.shape;
            entry.track += counts.track;
        }
        self.tag += other.tag;
        self.manually += other.manually;
        self.interpolated += other.interpolated;
        self.total += other.total;
    }
}

/// Per-label annotation counts plus their sum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Keyed by label name
    pub labels: BTreeMap<String, LabelStatistics>,
    pub total: LabelStatistics,
}

impl Collection {
    // ========================================================================
    // Hit testing
    // ========================================================================

    /// Find the object under `(x, y)` among `states`.
    ///
    /// The closest object within the configured tolerance wins; on equal
    /// distance the higher z order wins. Hidden, outside and tag states are
    /// ignored.
    pub fn select(
        &self,
        states: &[ObjectState],
        x: f64,
        y: f64,
    ) -> Result<Option<SelectResult>, AnnotationError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(AnnotationError::argument(format!(
                "Coordinates must be finite numbers, got ({}, {})",
                x, y
            )));
        }
        for state in states {
            self.resolve(state)?;
        }

        let tolerance = self.config.geometry.select_tolerance;
        let mut best: Option<SelectResult> = None;
        for state in states {
            if state.hidden || state.outside {
                continue;
            }
            let Some(distance) = state_distance(state, x, y, tolerance) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some(current) => {
                    distance < current.distance
                        || (distance == current.distance && state.z_order > current.state.z_order)
                }
            };
            if better {
                best = Some(SelectResult {
                    state: state.clone(),
                    distance,
                });
            }
        }
        Ok(best)
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// First frame from `from` towards `to` (either direction) with an
    /// object matching `filter`, skipping `deleted` frames.
    pub fn search(
        &self,
        filter: Option<&FilterExpr>,
        from: u64,
        to: u64,
        deleted: &BTreeSet<u64>,
    ) -> Result<Option<u64>, AnnotationError> {
        self.scan(from, to, deleted, |frame| {
            !self.states_at(frame, false, filter).is_empty()
        })
    }

    /// First frame from `from` towards `to` without any visible object.
    pub fn search_empty(
        &self,
        from: u64,
        to: u64,
        deleted: &BTreeSet<u64>,
    ) -> Result<Option<u64>, AnnotationError> {
        self.scan(from, to, deleted, |frame| {
            self.states_at(frame, false, None).is_empty()
        })
    }

    fn scan(
        &self,
        from: u64,
        to: u64,
        deleted: &BTreeSet<u64>,
        matches: impl Fn(u64) -> bool,
    ) -> Result<Option<u64>, AnnotationError> {
        self.check_frame(from)?;
        self.check_frame(to)?;
        let frames: Box<dyn Iterator<Item = u64>> = if from <= to {
            Box::new(from..=to)
        } else {
            Box::new((to..=from).rev())
        };
        Ok(frames
            .filter(|frame| !deleted.contains(frame))
            .find(|frame| matches(*frame)))
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Count annotations per label, ignoring `deleted` frames.
    pub fn statistics(&self, deleted: &BTreeSet<u64>) -> Statistics {
        let mut labels: BTreeMap<String, LabelStatistics> = self
            .labels
            .iter()
            .map(|label| (label.name.clone(), LabelStatistics::empty()))
            .collect();

        for object in self.objects() {
            let Some(label) = self.labels.get(object.label_id) else {
                continue;
            };
            let Some(entry) = labels.get_mut(&label.name) else {
                continue;
            };
            match &object.kind {
                ObjectKind::Tag { frame } => {
                    if !deleted.contains(frame) {
                        entry.tag += 1;
                        entry.manually += 1;
                    }
                }
                ObjectKind::Shape {
                    frame, shape_type, ..
                } => {
                    if !deleted.contains(frame) {
                        entry.by_shape.entry(*shape_type).or_default().shape += 1;
                        entry.manually += 1;
                    }
                }
                ObjectKind::Track {
                    shape_type,
                    keyframes,
                } => {
                    if keyframes.keys().all(|frame| deleted.contains(frame)) {
                        continue;
                    }
                    entry.by_shape.entry(*shape_type).or_default().track += 1;
                    let (manually, interpolated) = self.track_frames(object, deleted);
                    entry.manually += manually;
                    entry.interpolated += interpolated;
                }
            }
        }

        let mut total = LabelStatistics::empty();
        for entry in labels.values_mut() {
            entry.total = entry.manually + entry.interpolated;
            total.add(entry);
        }
        Statistics { labels, total }
    }

    /// (manual, interpolated) frame counts of a track.
    ///
    /// Every visible keyframe counts as manual; the frames after it up to the
    /// next keyframe (or the session stop) count as interpolated.
    fn track_frames(&self, object: &AnnotationObject, deleted: &BTreeSet<u64>) -> (u64, u64) {
        let Some(keyframes) = object.keyframes() else {
            return (0, 0);
        };
        let frames: Vec<u64> = keyframes
            .keys()
            .copied()
            .filter(|f| !deleted.contains(f) && *f <= self.stop)
            .collect();

        let mut manually = 0;
        let mut interpolated = 0;
        for (i, frame) in frames.iter().enumerate() {
            if self.outside_at(object, *frame) {
                continue;
            }
            manually += 1;
            let end = frames.get(i + 1).map_or(self.stop, |next| next - 1);
            if end > *frame {
                let skipped = deleted.range(frame + 1..=end).count() as u64;
                interpolated += end - frame - skipped;
            }
        }
        (manually, interpolated)
    }

    /// Whether a track is outside at one of its keyframes.
    fn outside_at(&self, object: &AnnotationObject, frame: u64) -> bool {
        if object.is_skeleton() && !object.elements.is_empty() {
            let elements = object.elements.iter().map(|element| {
                let (Some(keyframes), Some(shape_type)) = (element.keyframes(), element.shape_type())
                else {
                    return true;
                };
                interpolate(keyframes, shape_type, &[], frame, self.stop)
                    .is_none_or(|shape| shape.geometry.outside)
            });
            return self.config.skeleton.outside.fold(elements);
        }
        object
            .keyframes()
            .and_then(|k| k.get(&frame))
            .is_some_and(|k| k.geometry.outside)
    }
}

/// Distance from a point to the geometry of a state.
fn state_distance(state: &ObjectState, x: f64, y: f64, tolerance: f64) -> Option<f64> {
    let shape_type = state.shape_type?;
    if shape_type == ShapeType::Skeleton {
        return state
            .elements
            .iter()
            .filter(|e| !e.outside && !e.hidden)
            .filter_map(|e| state_distance(e, x, y, tolerance))
            .min_by(|a, b| a.total_cmp(b));
    }
    distance_to_point(&state.points, shape_type, state.rotation, x, y, tolerance)
}
