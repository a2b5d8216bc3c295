use crate::math::{self as m, Rotor3, Vec3};

/// A static obstacle that capsules collide against.
///
/// Colliders are owned by the caller and registered with
/// [`Solver::register_collider`][crate::physics::Solver::register_collider].
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexCollider {
    pub shape: ColliderShape,
    pub position: Vec3,
    #[cfg_attr(feature = "serde-types", serde(with = "crate::math::serde_rotor"))]
    pub orientation: Rotor3,
    pub friction: f64,
}

/// The physical shape of a collider.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum ColliderShape {
    Sphere {
        r: f64,
    },
    /// The box collider stores its side lengths halved because this makes
    /// intersection tests easier.
    Box {
        half_extents: Vec3,
    },
}

/// Shape kind of a collider without its dimensions, for error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColliderKind {
    Sphere,
    Box,
}

impl ColliderShape {
    pub fn kind(&self) -> ColliderKind {
        match self {
            ColliderShape::Sphere { .. } => ColliderKind::Sphere,
            ColliderShape::Box { .. } => ColliderKind::Box,
        }
    }

    /// Check that every dimension is finite and positive.
    pub fn is_valid(&self) -> bool {
        let valid = |x: f64| x.is_finite() && x > 0.0;
        match *self {
            ColliderShape::Sphere { r } => valid(r),
            ColliderShape::Box { half_extents: h } => valid(h.x) && valid(h.y) && valid(h.z),
        }
    }
}

impl ConvexCollider {
    /// Create a sphere collider from a radius.
    pub fn new_sphere(radius: f64) -> Self {
        Self::new(ColliderShape::Sphere { r: radius })
    }

    /// Create a box collider from its full side lengths.
    pub fn new_box(size: Vec3) -> Self {
        Self::new(ColliderShape::Box {
            half_extents: size * 0.5,
        })
    }

    /// Create a cube collider with all sides set to the same length.
    pub fn new_cube(side_length: f64) -> Self {
        Self::new_box(Vec3::broadcast(side_length))
    }

    fn new(shape: ColliderShape) -> Self {
        Self {
            shape,
            position: Vec3::zero(),
            orientation: Rotor3::identity(),
            friction: 0.5,
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_orientation(mut self, orientation: Rotor3) -> Self {
        self.orientation = orientation.normalized();
        self
    }

    pub fn with_friction(mut self, friction: f64) -> Self {
        self.friction = friction;
        self
    }

    /// Transform a world-space point into the collider's local space.
    #[inline]
    pub fn world_to_local(&self, point: Vec3) -> Vec3 {
        self.orientation.reversed() * (point - self.position)
    }

    #[inline]
    pub fn local_to_world(&self, point: Vec3) -> Vec3 {
        self.position + self.orientation * point
    }

    /// Whether the pose is free of NaN and infinity.
    pub fn has_finite_pose(&self) -> bool {
        let o = self.orientation;
        m::is_finite(self.position)
            && o.s.is_finite()
            && o.bv.xy.is_finite()
            && o.bv.xz.is_finite()
            && o.bv.yz.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_shapes_are_invalid() {
        assert!(ConvexCollider::new_sphere(0.5).shape.is_valid());
        assert!(!ConvexCollider::new_sphere(0.0).shape.is_valid());
        assert!(!ConvexCollider::new_box(Vec3::new(1.0, 0.0, 1.0)).shape.is_valid());
        assert!(!ConvexCollider::new_sphere(f64::NAN).shape.is_valid());
    }

    #[test]
    fn box_stores_half_extents() {
        let coll = ConvexCollider::new_box(Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(
            coll.shape,
            ColliderShape::Box {
                half_extents: Vec3::new(1.0, 2.0, 3.0)
            }
        );
    }
}
