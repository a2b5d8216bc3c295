use crate::math::{self as m, Mat3, Rotor3, Vec3};

/// Velocity of a body.
///
// Equivalent to a pair of Vec3 but with names for the translational and rotational part.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Velocity {
    /// Linear velocity in metres per second.
    pub linear: Vec3,
    /// Angular velocity as a scaled axis, in radians per second.
    pub angular: Vec3,
}

impl Velocity {
    pub fn new(linear: Vec3, angular: Vec3) -> Self {
        Self { linear, angular }
    }

    /// Get the linear velocity of a point offset from the center of mass.
    #[inline]
    pub fn point_velocity(&self, offset: Vec3) -> Vec3 {
        self.linear + self.angular.cross(offset)
    }
}

impl std::ops::Add for Velocity {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            linear: self.linear + other.linear,
            angular: self.angular + other.angular,
        }
    }
}
impl std::ops::AddAssign for Velocity {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}
impl std::ops::Mul<f64> for Velocity {
    type Output = Velocity;

    fn mul(self, rhs: f64) -> Self::Output {
        Velocity {
            linear: self.linear * rhs,
            angular: self.angular * rhs,
        }
    }
}
impl std::ops::MulAssign<f64> for Velocity {
    fn mul_assign(&mut self, rhs: f64) {
        *self = *self * rhs;
    }
}

/// A rigid body simulated by the solver.
///
/// Every body also acts as a capsule for collision detection,
/// with its axis along the body-local x axis.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Body {
    pub position: Vec3,
    #[cfg_attr(feature = "serde-types", serde(with = "crate::math::serde_rotor"))]
    pub orientation: Rotor3,
    pub velocity: Velocity,
    pub mass: Mass,
    /// Inertia tensor in body-local coordinates.
    pub inertia: Mat3,
    pub friction: f64,
}

impl Default for Body {
    fn default() -> Self {
        Self::new_immovable()
    }
}

impl Body {
    /// Dynamic bodies respond to gravity and constraints.
    /// A mass of zero creates an immovable body instead.
    pub fn new_dynamic(mass: f64, inertia: Mat3) -> Self {
        Self {
            position: Vec3::zero(),
            orientation: Rotor3::identity(),
            velocity: Velocity::default(),
            mass: Mass::from(mass),
            inertia,
            friction: 0.5,
        }
    }

    /// A dynamic body with the inertia of a capsule along the local x axis.
    ///
    /// The capsule is approximated as a solid cylinder of length `2 * half_length`.
    pub fn new_capsule(mass: f64, radius: f64, half_length: f64) -> Self {
        let length = 2.0 * half_length;
        let axial = 0.5 * mass * radius * radius;
        let lateral = mass * (3.0 * radius * radius + length * length) / 12.0;
        Self::new_dynamic(mass, m::diagonal(Vec3::new(axial, lateral, lateral)))
    }

    /// Immovable bodies have infinite mass. They still move along their velocity
    /// but aren't affected by gravity or constraints.
    pub fn new_immovable() -> Self {
        Self {
            mass: Mass::Infinite,
            ..Self::new_dynamic(1.0, Mat3::identity())
        }
    }

    /// Set the position of the body in a builder-like chain.
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Set the orientation of the body in a builder-like chain.
    pub fn with_orientation(mut self, orientation: Rotor3) -> Self {
        self.orientation = orientation.normalized();
        self
    }

    /// Set the velocity of the body in a builder-like chain.
    pub fn with_velocity(mut self, vel: Velocity) -> Self {
        self.velocity = vel;
        self
    }

    pub fn with_friction(mut self, friction: f64) -> Self {
        self.friction = friction;
        self
    }

    /// Check whether the body has finite mass, allowing forces to have an effect on it.
    #[inline]
    pub fn sees_forces(&self) -> bool {
        matches!(self.mass, Mass::Finite { .. })
    }

    #[inline]
    pub fn inverse_mass(&self) -> f64 {
        self.mass.inv()
    }

    /// Inverse inertia tensor rotated into world space. Zero for immovable bodies.
    pub fn world_inverse_inertia(&self) -> Mat3 {
        if !self.sees_forces() {
            return m::diagonal(Vec3::zero());
        }
        let rot = self.orientation.into_matrix();
        rot * m::inverse_or_zero(self.inertia) * rot.transposed()
    }

    /// Transform a body-local point into world space.
    #[inline]
    pub fn local_to_world(&self, point: Vec3) -> Vec3 {
        self.position + self.orientation * point
    }

    /// Transform a world-space point into body-local space.
    #[inline]
    pub fn world_to_local(&self, point: Vec3) -> Vec3 {
        self.orientation.reversed() * (point - self.position)
    }

    /// Whether position, orientation and velocity are all free of NaN and infinity.
    pub fn is_finite(&self) -> bool {
        let o = self.orientation;
        m::is_finite(self.position)
            && o.s.is_finite()
            && o.bv.xy.is_finite()
            && o.bv.xz.is_finite()
            && o.bv.yz.is_finite()
            && m::is_finite(self.velocity.linear)
            && m::is_finite(self.velocity.angular)
    }
}

/// Mass of a body, which can be infinite.
///
/// This stores both a mass value and its inverse, because calculating inverse mass
/// is expensive and needed a lot in physics calculations.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub enum Mass {
    Finite { mass: f64, inverse: f64 },
    Infinite,
}

impl From<f64> for Mass {
    /// Zero (or negative) mass means the body is immovable.
    /// Tiny positive masses are clamped so the inverse stays finite.
    #[inline]
    fn from(mass: f64) -> Self {
        if mass <= 0.0 {
            return Mass::Infinite;
        }
        let mass = mass.max(m::MIN_MASS);
        Mass::Finite {
            mass,
            inverse: 1.0 / mass,
        }
    }
}

impl Mass {
    /// Get the inverse of the mass, which is zero if the mass is infinite.
    #[inline]
    pub fn inv(&self) -> f64 {
        match self {
            Mass::Finite { inverse, .. } => *inverse,
            Mass::Infinite => 0.0,
        }
    }
}
