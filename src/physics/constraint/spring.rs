use super::{derivatives_along, BodyPair, Evaluation, Force, Level};
use crate::math::{self as m, Mat3, Vec3};

/// A spring between the centers of mass of two bodies.
///
/// The restoring force is `stiffness * violation`; the solver reads the
/// stiffness from the derivatives and turns it into compliance.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Spring {
    pub body_a: usize,
    pub body_b: usize,
    pub rest_length: f64,
    /// Units of N/m. Zero or negative disables the spring.
    pub stiffness: f64,
}

impl Spring {
    pub fn new(body_a: usize, body_b: usize, rest_length: f64, stiffness: f64) -> Self {
        Self {
            body_a,
            body_b,
            rest_length,
            stiffness,
        }
    }

    fn offset(pair: &BodyPair) -> Vec3 {
        let b = pair.b.map(|b| b.position).unwrap_or_else(Vec3::zero);
        b - pair.a.position
    }
}

impl Force for Spring {
    const LEVEL: Level = Level::Position;

    fn bodies(&self) -> (usize, Option<usize>) {
        (self.body_a, Some(self.body_b))
    }

    fn rows(&self) -> usize {
        1
    }

    fn initialize(&mut self, _pair: &BodyPair) {}

    fn compute_constraint(&self, pair: &BodyPair) -> Evaluation {
        let offset = Self::offset(pair);
        let length = offset.mag();
        // coincident bodies push apart along an arbitrary fixed axis
        let dir = m::Unit::new_normalize(offset);
        Evaluation {
            jacobian: m::orthonormal_basis(dir),
            violation: length - self.rest_length,
        }
    }

    fn compute_derivatives(&self, pair: &BodyPair) -> Mat3 {
        derivatives_along(
            self.stiffness.max(0.0),
            self.compute_constraint(pair).direction(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{constraint::stiffness_along, Body};

    #[test]
    fn stretched_spring_reports_extension() {
        let a = Body::new_capsule(1.0, 0.1, 0.5);
        let b = a.with_position(Vec3::new(0.0, 3.0, 0.0));
        let pair = BodyPair {
            a,
            b: Some(b),
            prev_a: a,
            prev_b: Some(b),
            dt: 0.01,
        };
        let spring = Spring::new(0, 1, 2.0, 40.0);
        let eval = spring.compute_constraint(&pair);
        assert!((eval.violation - 1.0).abs() < 1e-12);
        assert!((eval.direction() - Vec3::unit_y()).mag() < 1e-12);
        let k = stiffness_along(spring.compute_derivatives(&pair), eval.direction());
        assert!((k - 40.0).abs() < 1e-9);
    }
}
