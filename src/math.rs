//! Types, aliases and helper operations for doing math with `ultraviolet`.
pub use ultraviolet as uv;

pub type Vec3 = uv::DVec3;
pub type Mat3 = uv::DMat3;
/// Orientation of a body. A rotor is the geometric algebra form of a unit quaternion.
pub type Rotor3 = uv::DRotor3;
pub type Bivec3 = uv::DBivec3;

/// Lengths below this are treated as zero when normalizing.
pub const NORMALIZE_EPSILON: f64 = 1e-6;
/// Smallest finite mass used when inverting. Zero mass still means immovable.
pub const MIN_MASS: f64 = 1e-6;

/// A wrapper type to indicate a vector should always be normalized.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Unit<T>(T);

impl Unit<Vec3> {
    /// Normalize `v`, substituting `fallback` if `v` is too short to have a direction.
    pub fn new_normalize_or(v: Vec3, fallback: Unit<Vec3>) -> Self {
        let mag = v.mag();
        if mag > NORMALIZE_EPSILON {
            Unit(v / mag)
        } else {
            fallback
        }
    }

    /// Normalize `v`, falling back to the y axis.
    pub fn new_normalize(v: Vec3) -> Self {
        Self::new_normalize_or(v, Self::unit_y())
    }

    pub const fn new_unchecked(v: Vec3) -> Self {
        Unit(v)
    }

    pub fn unit_x() -> Self {
        Unit(Vec3::unit_x())
    }

    pub fn unit_y() -> Self {
        Unit(Vec3::unit_y())
    }

    pub fn unit_z() -> Self {
        Unit(Vec3::unit_z())
    }
}

impl std::ops::Mul<Unit<Vec3>> for Rotor3 {
    type Output = Unit<Vec3>;

    fn mul(self, rhs: Unit<Vec3>) -> Self::Output {
        Unit(self * rhs.0)
    }
}

impl<T> std::ops::Deref for Unit<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> std::ops::Neg for Unit<T>
where
    T: std::ops::Neg,
{
    type Output = Unit<<T as std::ops::Neg>::Output>;

    fn neg(self) -> Self::Output {
        Unit(-self.0)
    }
}

// rotor utils

/// Rotor for the rotation described by a scaled axis (axis * angle in radians).
///
/// Returns identity for vectors too short to define an axis.
#[inline]
pub fn rotor_from_scaled_axis(v: Vec3) -> Rotor3 {
    let angle = v.mag();
    if angle <= NORMALIZE_EPSILON {
        return Rotor3::identity();
    }
    rotor_from_axis_angle(Unit::new_unchecked(v / angle), angle)
}

/// Rotor rotating by `angle` radians around `axis`, right-handed.
#[inline]
pub fn rotor_from_axis_angle(axis: Unit<Vec3>, angle: f64) -> Rotor3 {
    Rotor3::from_angle_plane(angle, Bivec3::from_normalized_axis(*axis))
}

/// Rotate `rotation` by the scaled axis `v` and renormalize.
#[inline]
pub fn rotate_by_scaled_axis(rotation: Rotor3, v: Vec3) -> Rotor3 {
    if v.mag_sq() <= NORMALIZE_EPSILON * NORMALIZE_EPSILON {
        return rotation;
    }
    (rotor_from_scaled_axis(v) * rotation).normalized()
}

/// Scaled axis of the smallest rotation taking `from` to `to`.
///
/// Inverse of [`rotor_from_scaled_axis`] for rotations under half a turn.
pub fn rotation_difference(from: Rotor3, to: Rotor3) -> Vec3 {
    let diff = (to * from.reversed()).normalized();
    let (cos_half, bv) = if diff.s < 0.0 {
        // pick the short way around
        (-diff.s, -bivec_axis(diff.bv))
    } else {
        (diff.s, bivec_axis(diff.bv))
    };
    let sin_half = bv.mag();
    if sin_half <= NORMALIZE_EPSILON {
        return Vec3::zero();
    }
    let angle = 2.0 * sin_half.atan2(cos_half);
    let axis = bv / sin_half;
    // resolve the axis sign by how the rotor acts instead of assuming
    // a bivector orientation convention
    let check = bivec_axis(rotor_from_scaled_axis(axis * angle).bv);
    if (check - bv).mag_sq() <= (check + bv).mag_sq() {
        axis * angle
    } else {
        -axis * angle
    }
}

#[inline]
fn bivec_axis(bv: Bivec3) -> Vec3 {
    Vec3::new(bv.yz, -bv.xz, bv.xy)
}

// matrix utils

#[inline]
pub fn diagonal(d: Vec3) -> Mat3 {
    Mat3::new(
        Vec3::new(d.x, 0.0, 0.0),
        Vec3::new(0.0, d.y, 0.0),
        Vec3::new(0.0, 0.0, d.z),
    )
}

/// Outer product `a bᵀ`.
#[inline]
pub fn outer(a: Vec3, b: Vec3) -> Mat3 {
    Mat3::new(a * b.x, a * b.y, a * b.z)
}

/// Inverse of a symmetric positive definite matrix such as an inertia tensor.
/// Singular matrices give the zero matrix, i.e. infinite inertia.
pub fn inverse_or_zero(m: Mat3) -> Mat3 {
    if m.determinant().abs() <= MIN_MASS * MIN_MASS * MIN_MASS {
        Mat3::new(Vec3::zero(), Vec3::zero(), Vec3::zero())
    } else {
        m.inversed()
    }
}

/// Build an orthonormal frame `[normal, tangent1, tangent2]` around a unit normal.
///
/// The reference axis for the first tangent is y, switching to x when the normal
/// itself lies too close to y for the cross product to be well defined.
pub fn orthonormal_basis(normal: Unit<Vec3>) -> Mat3 {
    let n = *normal;
    let reference = if n.y.abs() > 0.707 {
        Vec3::unit_x()
    } else {
        Vec3::unit_y()
    };
    let t1 = *Unit::new_normalize_or(n.cross(reference), Unit::unit_z());
    let t2 = n.cross(t1);
    Mat3::new(n, t1, t2)
}

#[inline]
pub fn is_finite(v: Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// Module to (de)serialize `Rotor3`s, which `ultraviolet` only supports in f32,
/// using the serde attribute `#[serde(with = "crate::math::serde_rotor")]`.
#[cfg(feature = "serde-types")]
pub mod serde_rotor {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct RotorParts {
        s: f64,
        xy: f64,
        xz: f64,
        yz: f64,
    }

    pub fn serialize<S>(rotor: &Rotor3, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::Serialize;
        RotorParts {
            s: rotor.s,
            xy: rotor.bv.xy,
            xz: rotor.bv.xz,
            yz: rotor.bv.yz,
        }
        .serialize(serializer)
    }

    /// Deserialized rotors are normalized, so hand-written ones don't need to be exact.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Rotor3, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::Deserialize;
        RotorParts::deserialize(deserializer)
            .map(|p| Rotor3::new(p.s, Bivec3::new(p.xy, p.xz, p.yz)).normalized())
    }
}
