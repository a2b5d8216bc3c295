use super::{derivatives_along, BodyPair, Evaluation, Force, Level, RIGID_STIFFNESS};
use crate::math::{self as m, Mat3, Vec3};

/// A motor drives the velocity of body B relative to body A toward a target.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Motor {
    pub body_a: usize,
    pub body_b: usize,
    /// Target for `v_b - v_a` in metres per second.
    pub target_velocity: Vec3,
}

impl Motor {
    pub fn new(body_a: usize, body_b: usize, target_velocity: Vec3) -> Self {
        Self {
            body_a,
            body_b,
            target_velocity,
        }
    }

    /// Difference between the current relative velocity and the target.
    pub fn velocity_error(&self, pair: &BodyPair) -> Vec3 {
        let [va, vb] = pair.implied_velocities();
        (vb - va) - self.target_velocity
    }
}

impl Force for Motor {
    const LEVEL: Level = Level::Velocity;

    fn bodies(&self) -> (usize, Option<usize>) {
        (self.body_a, Some(self.body_b))
    }

    fn rows(&self) -> usize {
        3
    }

    fn initialize(&mut self, _pair: &BodyPair) {}

    fn compute_constraint(&self, pair: &BodyPair) -> Evaluation {
        let error = self.velocity_error(pair);
        let mag = error.mag();
        if mag <= m::NORMALIZE_EPSILON * m::NORMALIZE_EPSILON {
            return Evaluation::satisfied(m::Unit::unit_y());
        }
        Evaluation {
            jacobian: m::orthonormal_basis(m::Unit::new_unchecked(error / mag)),
            violation: mag,
        }
    }

    fn compute_derivatives(&self, pair: &BodyPair) -> Mat3 {
        derivatives_along(RIGID_STIFFNESS, self.compute_constraint(pair).direction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Body;

    #[test]
    fn error_uses_motion_since_step_start() {
        let a = Body::new_capsule(1.0, 0.1, 0.5);
        let b = a.with_position(Vec3::new(1.0, 0.0, 0.0));
        let moved_b = b.with_position(Vec3::new(1.2, 0.0, 0.0));
        let pair = BodyPair {
            a,
            b: Some(moved_b),
            prev_a: a,
            prev_b: Some(b),
            dt: 0.1,
        };
        let motor = Motor::new(0, 1, Vec3::new(0.5, 0.0, 0.0));
        let eval = motor.compute_constraint(&pair);
        // relative velocity 2 m/s, target 0.5 m/s
        assert!((eval.violation - 1.5).abs() < 1e-9);
        assert!((eval.direction() - Vec3::unit_x()).mag() < 1e-12);
    }
}
