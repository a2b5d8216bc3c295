use super::{derivatives_along, BodyPair, Evaluation, Force, Level, RIGID_STIFFNESS};
use crate::math::{self as m, Mat3, Rotor3, Vec3};

/// A joint pins a point on one body to a point on another.
///
/// The linear part is rigid. The angular part holds the relative orientation
/// of the bodies at `rest_rotation` with `angular_stiffness`,
/// which is zero by default, leaving the bodies free to rotate around the anchor.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Joint {
    pub body_a: usize,
    pub body_b: usize,
    /// Anchor point in body A's local space.
    pub anchor_a: Vec3,
    /// Anchor point in body B's local space.
    pub anchor_b: Vec3,
    pub angular_stiffness: f64,
    /// Orientation of B in A's local frame that the angular part holds, `q_a⁻¹ q_b`.
    #[cfg_attr(feature = "serde-types", serde(with = "crate::math::serde_rotor"))]
    pub rest_rotation: Rotor3,
    #[cfg_attr(feature = "serde-types", serde(skip))]
    world_anchors: [Vec3; 2],
    #[cfg_attr(feature = "serde-types", serde(skip))]
    arms: [Vec3; 2],
}

impl Joint {
    pub fn new(body_a: usize, body_b: usize, anchor_a: Vec3, anchor_b: Vec3) -> Self {
        Self {
            body_a,
            body_b,
            anchor_a,
            anchor_b,
            angular_stiffness: 0.0,
            rest_rotation: Rotor3::identity(),
            world_anchors: [Vec3::zero(); 2],
            arms: [Vec3::zero(); 2],
        }
    }

    /// Lock the relative orientation of the bodies with the given stiffness.
    pub fn with_angular_lock(mut self, stiffness: f64, rest_rotation: Rotor3) -> Self {
        self.angular_stiffness = stiffness;
        self.rest_rotation = rest_rotation.normalized();
        self
    }

    /// World-space positions of both anchors from the last `initialize`.
    pub fn world_anchors(&self) -> [Vec3; 2] {
        self.world_anchors
    }

    /// Rotation error of the angular lock.
    ///
    /// The violation is the angle between the current and rest relative orientations,
    /// along the axis that rotates B back toward rest when followed negatively.
    pub fn compute_angular(&self, pair: &BodyPair) -> Evaluation {
        let b = match pair.b {
            Some(b) => b,
            None => return Evaluation::satisfied(m::Unit::unit_y()),
        };
        let target = pair.a.orientation * self.rest_rotation;
        let error = m::rotation_difference(target, b.orientation);
        let angle = error.mag();
        if angle <= m::NORMALIZE_EPSILON {
            return Evaluation::satisfied(m::Unit::unit_y());
        }
        Evaluation {
            jacobian: m::orthonormal_basis(m::Unit::new_unchecked(error / angle)),
            violation: angle,
        }
    }
}

impl Force for Joint {
    const LEVEL: Level = Level::Position;

    fn bodies(&self) -> (usize, Option<usize>) {
        (self.body_a, Some(self.body_b))
    }

    fn rows(&self) -> usize {
        6
    }

    fn initialize(&mut self, pair: &BodyPair) {
        let a = pair.a.local_to_world(self.anchor_a);
        let b = match pair.b {
            Some(b) => b.local_to_world(self.anchor_b),
            None => self.anchor_b,
        };
        self.world_anchors = [a, b];
        self.arms = [
            a - pair.a.position,
            pair.b.map(|body| b - body.position).unwrap_or_else(Vec3::zero),
        ];
    }

    fn compute_constraint(&self, _pair: &BodyPair) -> Evaluation {
        let offset = self.world_anchors[1] - self.world_anchors[0];
        let dist = offset.mag();
        if dist <= m::NORMALIZE_EPSILON {
            return Evaluation::satisfied(m::Unit::unit_y());
        }
        Evaluation {
            jacobian: m::orthonormal_basis(m::Unit::new_unchecked(offset / dist)),
            violation: dist,
        }
    }

    fn compute_derivatives(&self, pair: &BodyPair) -> Mat3 {
        derivatives_along(RIGID_STIFFNESS, self.compute_constraint(pair).direction())
    }

    fn lever_arms(&self) -> [Vec3; 2] {
        self.arms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Body;

    fn pair(a: Body, b: Body) -> BodyPair {
        BodyPair {
            a,
            b: Some(b),
            prev_a: a,
            prev_b: Some(b),
            dt: 1.0 / 60.0,
        }
    }

    #[test]
    fn violation_is_anchor_separation() {
        let a = Body::new_capsule(1.0, 0.1, 0.5);
        let b = Body::new_capsule(1.0, 0.1, 0.5).with_position(Vec3::new(1.5, 0.0, 0.0));
        let mut joint = Joint::new(0, 1, Vec3::new(0.5, 0.0, 0.0), Vec3::new(-0.5, 0.0, 0.0));
        let pair = pair(a, b);
        joint.initialize(&pair);
        let eval = joint.compute_constraint(&pair);
        assert!((eval.violation - 0.5).abs() < 1e-12);
        assert!((eval.direction() - Vec3::unit_x()).mag() < 1e-12);
        let arms = joint.lever_arms();
        assert!((arms[0] - Vec3::new(0.5, 0.0, 0.0)).mag() < 1e-12);
        assert!((arms[1] - Vec3::new(-0.5, 0.0, 0.0)).mag() < 1e-12);
    }

    #[test]
    fn initialize_is_idempotent() {
        let a = Body::new_capsule(1.0, 0.1, 0.5)
            .with_orientation(m::rotor_from_scaled_axis(Vec3::new(0.0, 0.3, 0.0)));
        let b = Body::new_capsule(1.0, 0.1, 0.5).with_position(Vec3::new(1.0, 0.2, 0.0));
        let mut joint = Joint::new(0, 1, Vec3::new(0.5, 0.0, 0.0), Vec3::new(-0.5, 0.0, 0.0));
        let pair = pair(a, b);
        joint.initialize(&pair);
        let first = joint.compute_constraint(&pair).violation;
        joint.initialize(&pair);
        assert_eq!(joint.compute_constraint(&pair).violation, first);
    }

    #[test]
    fn angular_lock_measures_relative_rotation() {
        let a = Body::new_capsule(1.0, 0.1, 0.5);
        let b = Body::new_capsule(1.0, 0.1, 0.5)
            .with_orientation(m::rotor_from_scaled_axis(Vec3::new(0.0, 0.0, 0.2)));
        let joint = Joint::new(0, 1, Vec3::zero(), Vec3::zero())
            .with_angular_lock(100.0, Rotor3::identity());
        let eval = joint.compute_angular(&pair(a, b));
        assert!((eval.violation - 0.2).abs() < 1e-9);
        assert!((eval.direction() - Vec3::unit_z()).mag() < 1e-9);
    }
}
