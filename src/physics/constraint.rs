//! Forces and constraints acting between pairs of bodies.
//!
//! Every force type implements [`Force`], which the solver uses to evaluate
//! the violation and Jacobian of the force for the current body poses.
//! The solver dispatches over the closed set of types in [`ForceKind`].

use super::body::Body;
use crate::math::{self as m, Mat3, Vec3};

mod contact;
mod joint;
pub use joint::Joint;
mod motor;
pub use motor::Motor;
mod spring;
pub use spring::Spring;

/// Stiffness used for constraints that should be satisfied exactly.
///
/// High enough that the resulting compliance is negligible at any reasonable timestep.
pub const RIGID_STIFFNESS: f64 = 1e12;

/// Maximum number of scalar rows a single force can contribute.
pub const MAX_ROWS: usize = 6;

/// Result of evaluating a force for the current poses.
#[derive(Clone, Copy, Debug)]
pub struct Evaluation {
    /// Columns form an orthonormal frame. The first column is the gradient
    /// of the violation with respect to the position of body B
    /// (body A sees the negation). For contacts the other two are the
    /// friction tangents.
    pub jacobian: Mat3,
    /// Scalar violation along the first column of the Jacobian.
    pub violation: f64,
}

impl Evaluation {
    /// Evaluation of a force that is currently satisfied.
    pub fn satisfied(direction: m::Unit<Vec3>) -> Self {
        Self {
            jacobian: m::orthonormal_basis(direction),
            violation: 0.0,
        }
    }

    /// Gradient direction of the violation with respect to body B.
    #[inline]
    pub fn direction(&self) -> Vec3 {
        self.jacobian.cols[0]
    }
}

/// Which solver row type a force uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// Corrects positions toward zero violation.
    Position,
    /// Corrects the relative velocity toward a target.
    Velocity,
}

/// Working copies of the bodies a force acts on, along with their poses
/// at the start of the current step.
///
/// Body B is `None` when the force acts against the static world.
#[derive(Clone, Copy, Debug)]
pub struct BodyPair {
    pub a: Body,
    pub b: Option<Body>,
    pub prev_a: Body,
    pub prev_b: Option<Body>,
    pub dt: f64,
}

impl BodyPair {
    pub fn new(bodies: &[Body], previous: &[Body], pair: (usize, Option<usize>), dt: f64) -> Self {
        Self {
            a: bodies[pair.0],
            b: pair.1.map(|b| bodies[b]),
            prev_a: previous[pair.0],
            prev_b: pair.1.map(|b| previous[b]),
            dt,
        }
    }

    /// Velocity of each body's center of mass implied by its motion
    /// since the start of the step. Zero for the static world.
    pub fn implied_velocities(&self) -> [Vec3; 2] {
        let inv_dt = 1.0 / self.dt;
        [
            (self.a.position - self.prev_a.position) * inv_dt,
            match (self.b, self.prev_b) {
                (Some(b), Some(prev_b)) => (b.position - prev_b.position) * inv_dt,
                _ => Vec3::zero(),
            },
        ]
    }

    /// Move the working copies by a correction.
    pub fn apply(&mut self, deltas: &[Delta; 2]) {
        deltas[0].apply_to(&mut self.a);
        if let Some(b) = &mut self.b {
            deltas[1].apply_to(b);
        }
    }
}

/// Positional and rotational correction for one body.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Delta {
    pub linear: Vec3,
    /// Scaled axis in world space.
    pub angular: Vec3,
}

impl Delta {
    pub fn apply_to(&self, body: &mut Body) {
        body.position += self.linear;
        body.orientation = m::rotate_by_scaled_axis(body.orientation, self.angular);
    }
}

impl std::ops::AddAssign for Delta {
    fn add_assign(&mut self, other: Self) {
        self.linear += other.linear;
        self.angular += other.angular;
    }
}

/// Common interface of every force type.
pub trait Force {
    /// Row type this force contributes.
    const LEVEL: Level;

    /// Indices of the bodies this force acts on.
    /// The second is `None` for forces against the static world.
    fn bodies(&self) -> (usize, Option<usize>);

    /// Number of scalar rows this force contributes.
    fn rows(&self) -> usize;

    /// Per-evaluation setup, such as computing world-space anchors
    /// from the current poses. Calling this repeatedly with the same
    /// poses has no further effect.
    fn initialize(&mut self, pair: &BodyPair);

    /// Violation and Jacobian for the current poses.
    fn compute_constraint(&self, pair: &BodyPair) -> Evaluation;

    /// Second derivative of the energy along the Jacobian, `k * j jᵀ`
    /// where `k` is the stiffness of the force.
    fn compute_derivatives(&self, pair: &BodyPair) -> Mat3;

    /// World-space offsets from each body's center of mass to the point
    /// the force acts on, as computed by the last call to `initialize`.
    fn lever_arms(&self) -> [Vec3; 2] {
        [Vec3::zero(); 2]
    }
}

/// Stiffness of a force along its Jacobian direction, recovered from its derivatives.
#[inline]
pub fn stiffness_along(derivatives: Mat3, direction: Vec3) -> f64 {
    direction.dot(derivatives * direction)
}

/// Derivatives of a force with stiffness `k` acting along `direction`.
#[inline]
pub fn derivatives_along(k: f64, direction: Vec3) -> Mat3 {
    m::outer(direction, direction) * k
}

/// The closed set of force types the solver knows how to evaluate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum ForceKind {
    Joint,
    Spring,
    Motor,
    Contact,
}

/// A tagged reference to a force stored in one of the typed arrays
/// of a [`ConstraintSet`][super::ConstraintSet] or the per-step contact list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstraintHandle {
    pub kind: ForceKind,
    pub index: usize,
}

impl ConstraintHandle {
    pub fn new(kind: ForceKind, index: usize) -> Self {
        Self { kind, index }
    }
}
