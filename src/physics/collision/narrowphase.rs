//! Exact intersection tests between capsules and other shapes.
//!
//! Every test produces a [`ContactManifold`] with the normal pointing from
//! the capsule (body A) toward the other shape, and only when the shapes
//! actually overlap. Touching exactly at the surface is not a contact.

use super::{Capsule, ColliderShape, ContactManifold, ConvexCollider};
use crate::{
    math::{self as m, Unit, Vec3},
    physics::Body,
};

/// Segments shorter than this are treated as points.
const SEGMENT_EPSILON: f64 = 1e-12;
/// Rounds of alternating projection when searching for the closest points
/// between a segment and a box.
const BOX_PROJECTION_ROUNDS: usize = 16;

/// Normal used when the closest points coincide and have no direction between them.
#[inline]
fn fallback_normal() -> Unit<Vec3> {
    Unit::unit_y()
}

/// Closest point to `p` on the segment from `a` to `b`.
pub fn closest_point_on_segment(a: Vec3, b: Vec3, p: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.mag_sq();
    if len_sq < SEGMENT_EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Closest points between the segments `p1 q1` and `p2 q2`,
/// returned as (point on first, point on second).
///
/// Parameters saturating outside the segments are clamped
/// and the other parameter recomputed from the clamped one.
#[allow(clippy::many_single_char_names)]
pub fn closest_points_segments(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Vec3, Vec3) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;

    let a = d1.dot(d1);
    let e = d2.dot(d2);
    let f = d2.dot(r);

    // degenerate segments
    if a < SEGMENT_EPSILON && e < SEGMENT_EPSILON {
        return (p1, p2);
    }
    if a < SEGMENT_EPSILON {
        let t = (f / e).clamp(0.0, 1.0);
        return (p1, p2 + d2 * t);
    }
    if e < SEGMENT_EPSILON {
        let s = (-d1.dot(r) / a).clamp(0.0, 1.0);
        return (p1 + d1 * s, p2);
    }

    let b = d1.dot(d2);
    let c = d1.dot(r);
    let denom = a * e - b * b;

    let (mut s, mut t) = if denom.abs() < SEGMENT_EPSILON {
        // parallel, any point on the first segment works as a start
        (0.0, f / e)
    } else {
        let s = (b * f - c * e) / denom;
        (s, (b * s + f) / e)
    };

    if s < 0.0 {
        s = 0.0;
        t = (f / e).clamp(0.0, 1.0);
    } else if s > 1.0 {
        s = 1.0;
        t = ((b + f) / e).clamp(0.0, 1.0);
    }

    if t < 0.0 {
        t = 0.0;
        s = (-c / a).clamp(0.0, 1.0);
    } else if t > 1.0 {
        t = 1.0;
        s = ((b - c) / a).clamp(0.0, 1.0);
    }

    (p1 + d1 * s, p2 + d2 * t)
}

/// Checks two body capsules for intersection.
pub fn capsule_capsule(
    bodies: &[Body],
    cap_a: &Capsule,
    cap_b: &Capsule,
) -> Option<ContactManifold> {
    let (point_a, point_b) =
        closest_points_segments(cap_a.start, cap_a.end, cap_b.start, cap_b.end);
    let between = point_b - point_a;
    let dist = between.mag();
    let pen = cap_a.radius + cap_b.radius - dist;
    if pen <= 0.0 {
        return None;
    }
    let normal = if dist <= m::NORMALIZE_EPSILON {
        fallback_normal()
    } else {
        Unit::new_unchecked(between / dist)
    };
    // mean of the two materials, same as the friction of two colliding rigid bodies
    let friction = 0.5 * (bodies[cap_a.body].friction + bodies[cap_b.body].friction);

    Some(ContactManifold::new(
        bodies,
        (cap_a.body, Some(cap_b.body)),
        normal,
        [
            point_a + *normal * cap_a.radius,
            point_b - *normal * cap_b.radius,
        ],
        friction,
    ))
}

/// Checks a body capsule against a static collider.
///
/// The collider is expected to have passed validation already.
pub fn capsule_collider(
    bodies: &[Body],
    cap: &Capsule,
    coll: &ConvexCollider,
) -> Option<ContactManifold> {
    let (normal, surfaces) = match coll.shape {
        ColliderShape::Sphere { r } => capsule_sphere(cap, coll.position, r)?,
        ColliderShape::Box { half_extents } => capsule_box(cap, coll, half_extents)?,
    };
    Some(ContactManifold::new(
        bodies,
        (cap.body, None),
        normal,
        surfaces,
        coll.friction,
    ))
}

/// Normal and world-space surface points of a contact, if any.
type SurfaceContact = (Unit<Vec3>, [Vec3; 2]);

fn capsule_sphere(cap: &Capsule, center: Vec3, r: f64) -> Option<SurfaceContact> {
    let seg_point = closest_point_on_segment(cap.start, cap.end, center);
    let between = center - seg_point;
    let dist = between.mag();
    if cap.radius + r - dist <= 0.0 {
        return None;
    }
    let normal = if dist <= m::NORMALIZE_EPSILON {
        fallback_normal()
    } else {
        Unit::new_unchecked(between / dist)
    };
    Some((
        normal,
        [seg_point + *normal * cap.radius, center - *normal * r],
    ))
}

fn capsule_box(
    cap: &Capsule,
    coll: &ConvexCollider,
    half_extents: Vec3,
) -> Option<SurfaceContact> {
    // work in the box's local frame where it's an axis-aligned box around the origin
    let a = coll.world_to_local(cap.start);
    let b = coll.world_to_local(cap.end);
    let clamp_to_box = |p: Vec3| p.clamped(-half_extents, half_extents);

    let mut seg_point = closest_point_on_segment(a, b, Vec3::zero());
    let mut box_point = clamp_to_box(seg_point);
    for _ in 0..BOX_PROJECTION_ROUNDS {
        seg_point = closest_point_on_segment(a, b, box_point);
        let next = clamp_to_box(seg_point);
        let moved = (next - box_point).mag_sq();
        box_point = next;
        if moved < SEGMENT_EPSILON {
            break;
        }
    }

    let between = box_point - seg_point;
    let dist = between.mag();
    let (normal, seg_point, box_point, pen) = if dist > m::NORMALIZE_EPSILON {
        (
            Unit::new_unchecked(between / dist),
            seg_point,
            box_point,
            cap.radius - dist,
        )
    } else {
        // the segment passes through the box.
        // push out through the face closest to the deepest point among the candidates
        let (point, axis, depth) = [seg_point, a, b]
            .into_iter()
            .filter(|p| is_inside(*p, half_extents))
            .map(|p| {
                let (axis, depth) = shallowest_face(p, half_extents);
                (p, axis, depth)
            })
            .fold(None, |best: Option<(Vec3, usize, f64)>, cand| match best {
                Some(best) if best.2 >= cand.2 => Some(best),
                _ => Some(cand),
            })
            .unwrap_or_else(|| {
                let (axis, depth) = shallowest_face(seg_point, half_extents);
                (seg_point, axis, depth)
            });
        let side = if point[axis] < 0.0 { -1.0 } else { 1.0 };
        let mut face_point = point;
        face_point[axis] = side * half_extents[axis];
        let mut normal = Vec3::zero();
        // the box is outward from the capsule, so the normal faces into the box
        normal[axis] = -side;
        (
            Unit::new_unchecked(normal),
            point,
            face_point,
            cap.radius + depth,
        )
    };
    if pen <= 0.0 {
        return None;
    }

    let normal_world = coll.orientation * normal;
    Some((
        normal_world,
        [
            coll.local_to_world(seg_point) + *normal_world * cap.radius,
            coll.local_to_world(box_point),
        ],
    ))
}

#[inline]
fn is_inside(p: Vec3, half_extents: Vec3) -> bool {
    p.x.abs() <= half_extents.x && p.y.abs() <= half_extents.y && p.z.abs() <= half_extents.z
}

/// Axis of the box face closest to a point inside it, and the distance to that face.
fn shallowest_face(p: Vec3, half_extents: Vec3) -> (usize, f64) {
    (0..3)
        .map(|i| (i, half_extents[i] - p[i].abs()))
        .fold((0, f64::INFINITY), |best, cand| {
            if cand.1 < best.1 {
                cand
            } else {
                best
            }
        })
}
