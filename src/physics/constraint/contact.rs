use super::{derivatives_along, BodyPair, Evaluation, Force, Level, RIGID_STIFFNESS};
use crate::{
    math::{self as m, Mat3, Vec3},
    physics::collision::ContactManifold,
};

impl ContactManifold {
    /// World-space surface point of each object for the given poses.
    fn surfaces(&self, pair: &BodyPair) -> [Vec3; 2] {
        [
            pair.a.local_to_world(self.offsets[0]),
            match pair.b {
                Some(b) => b.local_to_world(self.offsets[1]),
                None => self.offsets[1],
            },
        ]
    }

    /// Relative motion of the contact points since the start of the step,
    /// projected onto the tangent plane of the contact.
    ///
    /// This is the slip that static friction tries to undo.
    pub fn tangential_motion(&self, pair: &BodyPair) -> Vec3 {
        let prev_b = match pair.prev_b {
            Some(b) => b.local_to_world(self.offsets[1]),
            None => self.offsets[1],
        };
        let prev = [pair.prev_a.local_to_world(self.offsets[0]), prev_b];
        let motion =
            (self.surface_points[0] - prev[0]) - (self.surface_points[1] - prev[1]);
        let basis = m::orthonormal_basis(self.normal);
        basis.cols[1] * motion.dot(basis.cols[1]) + basis.cols[2] * motion.dot(basis.cols[2])
    }
}

impl Force for ContactManifold {
    const LEVEL: Level = Level::Position;

    fn bodies(&self) -> (usize, Option<usize>) {
        (self.body_a, self.body_b)
    }

    fn rows(&self) -> usize {
        3
    }

    fn initialize(&mut self, pair: &BodyPair) {
        self.surface_points = self.surfaces(pair);
        self.arms = [
            self.surface_points[0] - pair.a.position,
            pair.b
                .map(|b| self.surface_points[1] - b.position)
                .unwrap_or_else(Vec3::zero),
        ];
    }

    /// Depth is re-measured from the surface points because earlier corrections
    /// in the same step may have moved the bodies.
    /// Separated contacts report zero, so they never pull the bodies together.
    fn compute_constraint(&self, _pair: &BodyPair) -> Evaluation {
        let depth =
            (self.surface_points[0] - self.surface_points[1]).dot(*self.normal);
        // the gradient w.r.t. body B points back toward A: moving B along the
        // normal reduces the depth
        Evaluation {
            jacobian: m::orthonormal_basis(-self.normal),
            violation: depth.max(0.0),
        }
    }

    fn compute_derivatives(&self, _pair: &BodyPair) -> Mat3 {
        derivatives_along(RIGID_STIFFNESS, -*self.normal)
    }

    fn lever_arms(&self) -> [Vec3; 2] {
        self.arms
    }
}
