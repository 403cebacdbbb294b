//! Track interpolation.
//!
//! A track is defined by sparse keyframes; its shape at any other frame is
//! derived here:
//! - on a keyframe the keyframe itself is returned
//! - between two keyframes coordinates and rotation are interpolated linearly,
//!   unless the earlier keyframe is outside (the object is absent)
//! - after the last keyframe its value is held until the end of the session
//! - before the first keyframe the object is absent
//!
//! Flags and non-numeric attributes step from the earlier keyframe.

use std::collections::BTreeMap;

use crate::geometry::{pairs, path_length};
use crate::model::{AttributeSpec, AttributeType, Geometry, Keyframe, ShapeType, normalize_rotation};

/// The effective state of a track at one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameShape {
    pub geometry: Geometry,
    /// Resolved values of the label's mutable attributes
    pub attributes: BTreeMap<u64, String>,
    /// The frame is an explicit keyframe
    pub keyframe: bool,
    /// The value was computed between two keyframes
    pub interpolated: bool,
}

impl FrameShape {
    /// Whether the object exists on this frame.
    pub fn is_present(&self) -> bool {
        !self.geometry.outside
    }
}

/// Keyframe navigation around a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyframeNav {
    pub first: Option<u64>,
    pub prev: Option<u64>,
    pub next: Option<u64>,
    pub last: Option<u64>,
}

/// Keyframes surrounding `frame` (exclusive).
pub fn keyframe_nav(keyframes: &BTreeMap<u64, Keyframe>, frame: u64) -> KeyframeNav {
    KeyframeNav {
        first: keyframes.keys().next().copied(),
        prev: keyframes.range(..frame).next_back().map(|(f, _)| *f),
        next: keyframes
            .range(frame.saturating_add(1)..)
            .next()
            .map(|(f, _)| *f),
        last: keyframes.keys().next_back().copied(),
    }
}

/// Compute the state of a track at `frame`.
///
/// `stop` is the last frame of the session; beyond it the track is absent.
/// Returns None only for a track without keyframes.
pub fn interpolate(
    keyframes: &BTreeMap<u64, Keyframe>,
    shape_type: ShapeType,
    attributes: &[AttributeSpec],
    frame: u64,
    stop: u64,
) -> Option<FrameShape> {
    let prev = keyframes.range(..=frame).next_back();
    let next = keyframes.range(frame.saturating_add(1)..).next();

    let Some((&prev_frame, prev_kf)) = prev else {
        // Before the first keyframe
        let (&first_frame, first) = next?;
        let mut geometry = first.geometry.clone();
        geometry.outside = true;
        return Some(FrameShape {
            geometry,
            attributes: resolve_attributes(keyframes, attributes, first_frame),
            keyframe: false,
            interpolated: false,
        });
    };

    let prev_attributes = resolve_attributes(keyframes, attributes, prev_frame);

    if prev_frame == frame {
        return Some(FrameShape {
            geometry: prev_kf.geometry.clone(),
            attributes: prev_attributes,
            keyframe: true,
            interpolated: false,
        });
    }

    let held = |outside: bool| {
        let mut geometry = prev_kf.geometry.clone();
        geometry.outside = geometry.outside || outside;
        FrameShape {
            geometry,
            attributes: prev_attributes.clone(),
            keyframe: false,
            interpolated: false,
        }
    };

    if frame > stop {
        return Some(held(true));
    }

    let Some((&next_frame, next_kf)) = next else {
        return Some(held(false));
    };

    if prev_kf.geometry.outside {
        return Some(held(true));
    }

    let t = (frame - prev_frame) as f64 / (next_frame - prev_frame) as f64;
    let next_attributes = resolve_attributes(keyframes, attributes, next_frame);

    let geometry = Geometry {
        points: interpolate_points(
            &prev_kf.geometry.points,
            &next_kf.geometry.points,
            shape_type,
            t,
        ),
        rotation: interpolate_rotation(prev_kf.geometry.rotation, next_kf.geometry.rotation, t),
        occluded: prev_kf.geometry.occluded,
        outside: false,
        z_order: prev_kf.geometry.z_order,
    };

    Some(FrameShape {
        geometry,
        attributes: interpolate_attributes(&prev_attributes, &next_attributes, attributes, t),
        keyframe: false,
        interpolated: true,
    })
}

/// Linear interpolation of a single value.
pub fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

/// Interpolate rotation along the shortest arc.
pub fn interpolate_rotation(from: f64, to: f64, t: f64) -> f64 {
    let delta = ((to - from) % 360.0 + 540.0) % 360.0 - 180.0;
    normalize_rotation(from + delta * t)
}

/// Interpolate two point arrays.
///
/// Arrays of different length are resampled by arc length for polygons and
/// polylines; other shapes hold the earlier value.
pub fn interpolate_points(from: &[f64], to: &[f64], shape_type: ShapeType, t: f64) -> Vec<f64> {
    if from.len() == to.len() {
        return from.iter().zip(to).map(|(a, b)| lerp(*a, *b, t)).collect();
    }

    let closed = match shape_type {
        ShapeType::Polygon => true,
        ShapeType::Polyline => false,
        _ => return from.to_vec(),
    };

    let count = from.len().max(to.len()) / 2;
    let a = resample(&pairs(from), count, closed);
    let b = resample(&pairs(to), count, closed);
    a.iter()
        .zip(&b)
        .flat_map(|(p, q)| [lerp(p.0, q.0, t), lerp(p.1, q.1, t)])
        .collect()
}

/// Resample a vertex path to `count` vertices evenly spaced by arc length.
fn resample(vertices: &[(f64, f64)], count: usize, closed: bool) -> Vec<(f64, f64)> {
    if vertices.len() == count || vertices.len() < 2 || count < 2 {
        return vertices.to_vec();
    }

    let mut ring = vertices.to_vec();
    if closed {
        ring.push(vertices[0]);
    }
    let total = path_length(&ring, false);
    if total == 0.0 {
        return vec![vertices[0]; count];
    }

    let spacing = if closed {
        total / count as f64
    } else {
        total / (count - 1) as f64
    };

    let mut result = Vec::with_capacity(count);
    let mut segment = 0;
    let mut walked = 0.0;
    for i in 0..count {
        let target = spacing * i as f64;
        loop {
            let (a, b) = (ring[segment], ring[segment + 1]);
            let len = ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
            if walked + len >= target || segment + 2 >= ring.len() {
                let local = if len == 0.0 {
                    0.0
                } else {
                    ((target - walked) / len).clamp(0.0, 1.0)
                };
                result.push((lerp(a.0, b.0, local), lerp(a.1, b.1, local)));
                break;
            }
            walked += len;
            segment += 1;
        }
    }
    result
}

/// Value of every mutable attribute as of keyframe `frame`: the latest
/// keyframe at or before `frame` that sets it, else the default.
fn resolve_attributes(
    keyframes: &BTreeMap<u64, Keyframe>,
    attributes: &[AttributeSpec],
    frame: u64,
) -> BTreeMap<u64, String> {
    attributes
        .iter()
        .filter(|spec| spec.mutable)
        .map(|spec| {
            let value = keyframes
                .range(..=frame)
                .rev()
                .find_map(|(_, kf)| kf.attributes.get(&spec.id))
                .cloned()
                .unwrap_or_else(|| spec.default_value.clone());
            (spec.id, value)
        })
        .collect()
}

/// Numeric attributes interpolate (snapped to their step), others step.
fn interpolate_attributes(
    from: &BTreeMap<u64, String>,
    to: &BTreeMap<u64, String>,
    attributes: &[AttributeSpec],
    t: f64,
) -> BTreeMap<u64, String> {
    let mut result = from.clone();
    for spec in attributes
        .iter()
        .filter(|s| s.mutable && s.input_type == AttributeType::Number)
    {
        let (Some(a), Some(b)) = (
            from.get(&spec.id).and_then(|v| v.trim().parse::<f64>().ok()),
            to.get(&spec.id).and_then(|v| v.trim().parse::<f64>().ok()),
        ) else {
            continue;
        };
        let mut value = lerp(a, b, t);
        if let Some((min, _, step)) = spec.number_range() {
            if step > 0.0 {
                value = min + ((value - min) / step).round() * step;
            }
        }
        result.insert(spec.id, format_number(value));
    }
    result
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kf(points: Vec<f64>) -> Keyframe {
        Keyframe::new(Geometry::new(points))
    }

    fn track(entries: Vec<(u64, Keyframe)>) -> BTreeMap<u64, Keyframe> {
        entries.into_iter().collect()
    }

    #[test]
    fn test_exact_keyframes_are_returned_unmodified() {
        let keyframes = track(vec![
            (0, kf(vec![0.0, 0.0, 10.0, 10.0])),
            (10, kf(vec![10.0, 10.0, 30.0, 30.0])),
        ]);
        for (frame, expected) in [(0, vec![0.0, 0.0, 10.0, 10.0]), (10, vec![10.0, 10.0, 30.0, 30.0])] {
            let shape = interpolate(&keyframes, ShapeType::Rectangle, &[], frame, 100)
                .expect("shape");
            assert_eq!(shape.geometry.points, expected);
            assert!(shape.keyframe);
            assert!(!shape.interpolated);
        }
    }

    #[test]
    fn test_linear_interpolation() {
        let keyframes = track(vec![
            (0, kf(vec![0.0, 0.0, 10.0, 10.0])),
            (10, kf(vec![10.0, 20.0, 30.0, 50.0])),
        ]);
        let shape = interpolate(&keyframes, ShapeType::Rectangle, &[], 5, 100).expect("shape");
        assert_eq!(shape.geometry.points, vec![5.0, 10.0, 20.0, 30.0]);
        assert!(shape.interpolated);
        assert!(!shape.keyframe);
        assert!(shape.is_present());

        for k in 0..=10u64 {
            let shape = interpolate(&keyframes, ShapeType::Rectangle, &[], k, 100).expect("shape");
            let expected = 10.0 * k as f64 / 10.0;
            assert!((shape.geometry.points[0] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_outside_gap_is_absent() {
        let mut hidden = kf(vec![0.0, 0.0, 10.0, 10.0]);
        hidden.geometry.outside = true;
        let keyframes = track(vec![(0, hidden), (10, kf(vec![10.0, 10.0, 20.0, 20.0]))]);
        let shape = interpolate(&keyframes, ShapeType::Rectangle, &[], 5, 100).expect("shape");
        assert!(!shape.is_present());
        assert!(!shape.interpolated);
        let shape = interpolate(&keyframes, ShapeType::Rectangle, &[], 10, 100).expect("shape");
        assert!(shape.is_present());
    }

    #[test]
    fn test_hold_after_last_and_absent_before_first() {
        let keyframes = track(vec![(5, kf(vec![1.0, 2.0, 11.0, 12.0]))]);

        let after = interpolate(&keyframes, ShapeType::Rectangle, &[], 50, 100).expect("shape");
        assert!(after.is_present());
        assert!(!after.interpolated);
        assert_eq!(after.geometry.points, vec![1.0, 2.0, 11.0, 12.0]);

        let before = interpolate(&keyframes, ShapeType::Rectangle, &[], 2, 100).expect("shape");
        assert!(!before.is_present());

        let beyond = interpolate(&keyframes, ShapeType::Rectangle, &[], 101, 100).expect("shape");
        assert!(!beyond.is_present());

        assert!(interpolate(&BTreeMap::new(), ShapeType::Rectangle, &[], 0, 100).is_none());
    }

    #[test]
    fn test_rotation_takes_shortest_arc() {
        assert!((interpolate_rotation(350.0, 10.0, 0.5) - 0.0).abs() < 1e-9);
        assert!((interpolate_rotation(10.0, 350.0, 0.25) - 5.0).abs() < 1e-9);
        assert!((interpolate_rotation(0.0, 90.0, 0.5) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_polygon_with_different_vertex_counts() {
        let from = [0.0, 0.0, 10.0, 0.0, 10.0, 10.0];
        let to = [0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0];
        let points = interpolate_points(&from, &to, ShapeType::Polygon, 0.5);
        assert_eq!(points.len(), to.len());
        assert!(points.iter().all(|v| v.is_finite()));

        let held = interpolate_points(&[1.0, 1.0], &[2.0, 2.0, 3.0, 3.0], ShapeType::Points, 0.5);
        assert_eq!(held, vec![1.0, 1.0]);
    }

    #[test]
    fn test_mutable_attributes() {
        let speed = AttributeSpec::new(1, "speed", AttributeType::Number, "0")
            .mutable(true)
            .with_values(["0", "100", "1"]);
        let state = AttributeSpec::new(2, "state", AttributeType::Select, "moving")
            .mutable(true)
            .with_values(["moving", "parked"]);
        let specs = [speed, state];

        let mut first = kf(vec![0.0, 0.0]);
        first.attributes.insert(1, "0".to_string());
        let mut second = kf(vec![10.0, 10.0]);
        second.attributes.insert(1, "10".to_string());
        second.attributes.insert(2, "parked".to_string());
        let keyframes = track(vec![(0, first), (10, second)]);

        let mid = interpolate(&keyframes, ShapeType::Points, &specs, 4, 100).expect("shape");
        assert_eq!(mid.attributes.get(&1).map(String::as_str), Some("4"));
        assert_eq!(mid.attributes.get(&2).map(String::as_str), Some("moving"));

        let end = interpolate(&keyframes, ShapeType::Points, &specs, 20, 100).expect("shape");
        assert_eq!(end.attributes.get(&2).map(String::as_str), Some("parked"));
    }

    #[test]
    fn test_keyframe_nav() {
        let keyframes = track(vec![(2, kf(vec![0.0, 0.0])), (5, kf(vec![0.0, 0.0])), (9, kf(vec![0.0, 0.0]))]);
        let nav = keyframe_nav(&keyframes, 5);
        assert_eq!(
            nav,
            KeyframeNav {
                first: Some(2),
                prev: Some(2),
                next: Some(9),
                last: Some(9),
            }
        );
        assert_eq!(keyframe_nav(&keyframes, 0).prev, None);
    }
}
