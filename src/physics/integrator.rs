//! Per-body passes before and after constraint correction.
//!
//! Every body is written only by its own task, so these run in parallel
//! over bodies with the `parallel` feature.

use super::body::Body;
use crate::math::{self as m, Vec3};

#[cfg(not(feature = "parallel"))]
use itertools::izip;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// External accelerations and damping applied during prediction.
#[derive(Clone, Copy, Debug)]
pub struct Environment {
    pub gravity: Vec3,
    pub drag: f64,
    pub dt: f64,
}

/// Apply gravity and drag to dynamic bodies,
/// then move every body along its velocity for one timestep.
pub fn predict(bodies: &mut [Body], env: &Environment) {
    let _span = tracy_span!("predict");
    #[cfg(feature = "parallel")]
    bodies.par_iter_mut().for_each(|body| predict_body(body, env));
    #[cfg(not(feature = "parallel"))]
    bodies.iter_mut().for_each(|body| predict_body(body, env));
}

fn predict_body(body: &mut Body, env: &Environment) {
    if body.sees_forces() {
        body.velocity.linear += env.gravity * env.dt;
        body.velocity *= damping_factor(env.drag, env.dt);
    }

    body.position += body.velocity.linear * env.dt;
    let omega = body.velocity.angular;
    let speed = omega.mag();
    // no well-defined axis for tiny angular velocities
    if speed > m::NORMALIZE_EPSILON {
        let axis = m::Unit::new_unchecked(omega / speed);
        let rotation = m::rotor_from_axis_angle(axis, speed * env.dt);
        body.orientation = (rotation * body.orientation).normalized();
    }
}

/// Recover velocities from the motion over the step.
///
/// Linear velocity is the change in position over the timestep.
/// Angular velocity keeps its predicted value plus the rotation
/// applied by constraints, spread over the timestep.
pub fn update_velocities(bodies: &mut [Body], previous: &[Body], rotations: &[Vec3], dt: f64) {
    let _span = tracy_span!("update velocities");
    let inv_dt = 1.0 / dt;
    let update = |(body, prev, rot): (&mut Body, &Body, &Vec3)| {
        body.velocity.linear = (body.position - prev.position) * inv_dt;
        body.velocity.angular += *rot * inv_dt;
    };
    #[cfg(feature = "parallel")]
    bodies
        .par_iter_mut()
        .zip(previous.par_iter())
        .zip(rotations.par_iter())
        .map(|((body, prev), rot)| (body, prev, rot))
        .for_each(update);
    #[cfg(not(feature = "parallel"))]
    izip!(bodies.iter_mut(), previous, rotations).for_each(update);
}

/// Scale every body's velocity by `1 - post_drag * dt`.
pub fn post_damp(bodies: &mut [Body], post_drag: f64, dt: f64) {
    let _span = tracy_span!("post damp");
    let factor = damping_factor(post_drag, dt);
    #[cfg(feature = "parallel")]
    bodies.par_iter_mut().for_each(|body| body.velocity *= factor);
    #[cfg(not(feature = "parallel"))]
    bodies.iter_mut().for_each(|body| body.velocity *= factor);
}

/// Multiplier for linear drag over one timestep, clamped so it never reverses the velocity.
#[inline]
fn damping_factor(drag: f64, dt: f64) -> f64 {
    (1.0 - drag * dt).max(0.0)
}
