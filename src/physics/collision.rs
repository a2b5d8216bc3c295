//! Collision detection between body capsules and static colliders.
//!
//! Every body is treated as a capsule along its local x axis for collision purposes.
//! Capsule pairs are found with a uniform grid [`SpatialHash`] and
//! checked exactly in [`narrowphase`]. Static colliders are few, so they're
//! tested against every capsule directly.

mod collider;
pub use collider::{ColliderKind, ColliderShape, ConvexCollider};

pub mod narrowphase;

pub mod spatial_hash;
pub use spatial_hash::SpatialHash;

use super::body::Body;
use crate::math::{self as m, Unit, Vec3};

use std::collections::HashSet;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Errors that prevent collision detection from producing a trustworthy contact set.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum CollisionError {
    #[error("Collider {index} is a degenerate {kind:?}: every dimension must be finite and positive")]
    DegenerateCollider { index: usize, kind: ColliderKind },
    #[error("Body {index} has a non-finite position, orientation or velocity")]
    NonFiniteBody { index: usize },
}

/// The collision shape of a body for the current step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Capsule {
    /// Index of the body this capsule was built from.
    pub body: usize,
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f64,
}

impl Capsule {
    pub fn from_body(index: usize, body: &Body, radius: f64, half_length: f64) -> Self {
        let half_axis = body.orientation * Vec3::unit_x() * half_length;
        Self {
            body: index,
            start: body.position - half_axis,
            end: body.position + half_axis,
            radius,
        }
    }

    #[inline]
    pub fn midpoint(&self) -> Vec3 {
        (self.start + self.end) * 0.5
    }
}

/// A single point of contact between a body and another body or the static world.
#[derive(Clone, Copy, Debug)]
pub struct ContactManifold {
    pub body_a: usize,
    /// `None` means the contact is against a static collider.
    pub body_b: Option<usize>,
    /// The normal, facing away from body A.
    pub normal: Unit<Vec3>,
    /// Point of contact on the surface of body A in world space.
    pub point: Vec3,
    /// Depth of the overlap along the normal when the contact was found. Always positive.
    pub penetration: f64,
    pub friction: f64,
    /// Points of contact on the surface of each object, in object-local space.
    /// For the static world the second offset is in world space.
    pub offsets: [Vec3; 2],
    // world-space surface points and lever arms, refreshed on every evaluation
    pub(crate) surface_points: [Vec3; 2],
    pub(crate) arms: [Vec3; 2],
}

impl ContactManifold {
    /// Build a manifold from world-space points on the surface of each object.
    pub fn new(
        bodies: &[Body],
        pair: (usize, Option<usize>),
        normal: Unit<Vec3>,
        surface_points: [Vec3; 2],
        friction: f64,
    ) -> Self {
        let a = &bodies[pair.0];
        let offset_b = match pair.1 {
            Some(b) => bodies[b].world_to_local(surface_points[1]),
            None => surface_points[1],
        };
        Self {
            body_a: pair.0,
            body_b: pair.1,
            normal,
            point: surface_points[0],
            penetration: (surface_points[0] - surface_points[1]).dot(*normal),
            friction,
            offsets: [a.world_to_local(surface_points[0]), offset_b],
            surface_points,
            arms: [
                surface_points[0] - a.position,
                pair.1
                    .map(|b| surface_points[1] - bodies[b].position)
                    .unwrap_or_else(Vec3::zero),
            ],
        }
    }

    /// Unordered body pair of a contact between two bodies.
    pub fn body_pair(&self) -> Option<(usize, usize)> {
        self.body_b
            .map(|b| (self.body_a.min(b), self.body_a.max(b)))
    }
}

/// Shape parameters for the collide stage.
#[derive(Clone, Copy, Debug)]
pub struct CollisionParams {
    pub capsule_radius: f64,
    pub capsule_half_length: f64,
}

impl CollisionParams {
    /// Grid cell size for the broadphase.
    ///
    /// Only the 27 cells around a capsule's midpoint are searched, which is guaranteed
    /// to cover every capsule whose midpoint is less than one cell away along each axis.
    /// Two capsules can touch from up to `2 * (half_length + radius)` apart, so with a radius
    /// comparable to the half length a touching pair two cells apart can be missed.
    #[inline]
    pub fn cell_size(&self) -> f64 {
        2.0 * self.capsule_radius.max(self.capsule_half_length)
    }
}

/// Find every contact in the current configuration.
///
/// Body pairs in `ignored_pairs` (stored with the smaller index first) never produce contacts.
/// Contacts between two bodies come first, ordered by body pair,
/// followed by contacts against static colliders ordered by body and then collider.
/// The output is identical regardless of thread scheduling.
pub fn collide(
    bodies: &[Body],
    colliders: &[ConvexCollider],
    ignored_pairs: &HashSet<(usize, usize)>,
    params: &CollisionParams,
) -> Result<Vec<ContactManifold>, CollisionError> {
    if let Some(index) = bodies.iter().position(|b| !b.is_finite()) {
        return Err(CollisionError::NonFiniteBody { index });
    }
    if let Some((index, coll)) = colliders
        .iter()
        .enumerate()
        .find(|(_, c)| !c.shape.is_valid() || !c.has_finite_pose())
    {
        return Err(CollisionError::DegenerateCollider {
            index,
            kind: coll.shape.kind(),
        });
    }

    let capsules: Vec<Capsule> = {
        let _span = tracy_span!("build capsules");
        let build = |(i, body): (usize, &Body)| {
            Capsule::from_body(i, body, params.capsule_radius, params.capsule_half_length)
        };
        #[cfg(feature = "parallel")]
        let capsules = bodies.par_iter().enumerate().map(build).collect();
        #[cfg(not(feature = "parallel"))]
        let capsules = bodies.iter().enumerate().map(build).collect();
        capsules
    };

    let mut contacts = capsule_pairs(bodies, &capsules, ignored_pairs, params);
    log::trace!("{} capsule-capsule contacts", contacts.len());

    if !colliders.is_empty() {
        let _span = tracy_span!("static colliders");
        let test = |cap: &Capsule| -> Vec<ContactManifold> {
            if !bodies[cap.body].sees_forces() {
                return Vec::new();
            }
            colliders
                .iter()
                .filter_map(|coll| narrowphase::capsule_collider(bodies, cap, coll))
                .collect()
        };
        #[cfg(feature = "parallel")]
        let static_contacts: Vec<ContactManifold> = capsules.par_iter().flat_map(test).collect();
        #[cfg(not(feature = "parallel"))]
        let static_contacts: Vec<ContactManifold> = capsules.iter().flat_map(test).collect();
        log::trace!("{} capsule-collider contacts", static_contacts.len());
        contacts.extend(static_contacts);
    }

    Ok(contacts)
}

fn capsule_pairs(
    bodies: &[Body],
    capsules: &[Capsule],
    ignored_pairs: &HashSet<(usize, usize)>,
    params: &CollisionParams,
) -> Vec<ContactManifold> {
    let cell_size = params.cell_size();
    if capsules.len() < 2 || cell_size <= m::NORMALIZE_EPSILON {
        // points with no radius can never overlap
        return Vec::new();
    }

    let _span = tracy_span!("capsule pairs");
    let midpoints: Vec<Vec3> = capsules.iter().map(Capsule::midpoint).collect();
    let grid = SpatialHash::new(cell_size, &midpoints);
    let pairs = grid.candidate_pairs();
    log::trace!("{} candidate capsule pairs", pairs.len());

    let test = |&(i, j): &(usize, usize)| {
        if ignored_pairs.contains(&(i, j)) {
            return None;
        }
        if !bodies[i].sees_forces() && !bodies[j].sees_forces() {
            // nothing can respond to this contact
            return None;
        }
        narrowphase::capsule_capsule(bodies, &capsules[i], &capsules[j])
    };
    #[cfg(feature = "parallel")]
    let contacts = pairs.par_iter().filter_map(test).collect();
    #[cfg(not(feature = "parallel"))]
    let contacts = pairs.iter().filter_map(test).collect();
    contacts
}
