//! The correction pass: iterated projection of every constraint onto the body poses.
//!
//! Each row follows the compliant position-based rule
//! `Δλ = (-α C - α̃ λ) / (w_a + w_b + α̃)` with `α̃ = (γ + 1/k) / dt²`,
//! where `k` is the stiffness of the force and `w` the generalized inverse masses.
//! Motors correct velocity instead with `Δλ = -β |e| dt / (w_a + w_b + α̃)`.

use super::{
    batch::Batches,
    body::Body,
    collision::ContactManifold,
    constraint::{
        self, BodyPair, ConstraintHandle, Delta, Force, ForceKind, Joint, Motor, Spring, MAX_ROWS,
    },
    constraint_set::ConstraintSet,
};
use crate::math::{self as m, Mat3, Rotor3, Vec3};

use itertools::izip;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Scalar parameters of the correction rule.
#[derive(Clone, Copy, Debug)]
pub struct CorrectionParams {
    /// Fraction of position error removed per row solve.
    pub alpha: f64,
    /// Fraction of velocity error removed per motor solve.
    pub beta: f64,
    /// Compliance added to every row, in m/N.
    pub gamma: f64,
    pub dt: f64,
}

impl CorrectionParams {
    /// Compliance of a row with stiffness `k`, scaled by the timestep.
    #[inline]
    fn compliance(&self, k: f64) -> f64 {
        (self.gamma + 1.0 / k) / (self.dt * self.dt)
    }
}

/// Multipliers accumulated by one handle over a step.
///
/// Row 0 is the primary row, row 1 contact friction, row 3 the joint angular lock.
pub type Lambdas = [f64; MAX_ROWS];

const FRICTION_ROW: usize = 1;
const ANGULAR_ROW: usize = 3;

/// Final state of a handle's bodies after it was solved.
#[derive(Clone, Copy, Debug)]
struct Correction {
    bodies: (usize, Option<usize>),
    poses: [(Vec3, Rotor3); 2],
    deltas: [Delta; 2],
    lambdas: Lambdas,
}

/// Run `iterations` passes over every handle, batch by batch.
///
/// Handles within a batch never share a moving body, so they are evaluated
/// against the same state (in parallel with the `parallel` feature)
/// and their results written back in handle order.
///
/// Returns the total rotation applied to each body, for angular velocity recovery.
#[allow(clippy::too_many_arguments)]
pub fn correct(
    bodies: &mut [Body],
    previous: &[Body],
    constraints: &ConstraintSet,
    contacts: &[ContactManifold],
    handles: &[ConstraintHandle],
    batches: &Batches,
    iterations: usize,
    params: &CorrectionParams,
) -> Vec<Vec3> {
    let _span = tracy_span!("correct");

    let mut lambdas: Vec<Lambdas> = vec![[0.0; MAX_ROWS]; handles.len()];
    let mut rotations = vec![Vec3::zero(); bodies.len()];

    for _ in 0..iterations {
        for batch in batches.iter() {
            let corrections: Vec<Correction> = {
                let state = &*bodies;
                let lambdas = &lambdas;
                let solve = |&h: &usize| {
                    evaluate(
                        handles[h],
                        constraints,
                        contacts,
                        state,
                        previous,
                        &lambdas[h],
                        params,
                    )
                };
                #[cfg(feature = "parallel")]
                let corrections = batch.par_iter().map(solve).collect();
                #[cfg(not(feature = "parallel"))]
                let corrections = batch.iter().map(solve).collect();
                corrections
            };

            for (&h, corr) in izip!(batch, &corrections) {
                lambdas[h] = corr.lambdas;
                write_back(bodies, &mut rotations, corr);
            }
        }
    }

    rotations
}

fn write_back(bodies: &mut [Body], rotations: &mut [Vec3], corr: &Correction) {
    let (a, b) = corr.bodies;
    for (idx, (pos, rot), delta) in izip!(
        std::iter::once(a).chain(b),
        corr.poses,
        corr.deltas
    ) {
        let body = &mut bodies[idx];
        if !body.sees_forces() {
            continue;
        }
        body.position = pos;
        body.orientation = rot;
        rotations[idx] += delta.angular;
    }
}

fn evaluate(
    handle: ConstraintHandle,
    constraints: &ConstraintSet,
    contacts: &[ContactManifold],
    bodies: &[Body],
    previous: &[Body],
    lambdas: &Lambdas,
    params: &CorrectionParams,
) -> Correction {
    let pair_idx = constraints.handle_bodies(handle, contacts);
    let mut pair = BodyPair::new(bodies, previous, pair_idx, params.dt);
    let mut lambdas = *lambdas;
    let mut deltas = [Delta::default(); 2];

    match handle.kind {
        ForceKind::Joint => solve_joint(
            constraints.joints[handle.index],
            &mut pair,
            &mut lambdas,
            &mut deltas,
            params,
        ),
        ForceKind::Spring => solve_spring(
            constraints.springs[handle.index],
            &mut pair,
            &mut lambdas,
            &mut deltas,
            params,
        ),
        ForceKind::Motor => solve_motor(
            constraints.motors[handle.index],
            &mut pair,
            &mut lambdas,
            &mut deltas,
            params,
        ),
        ForceKind::Contact => solve_contact(
            contacts[handle.index],
            &mut pair,
            &mut lambdas,
            &mut deltas,
            params,
        ),
    }

    let pose_b = pair
        .b
        .map(|b| (b.position, b.orientation))
        .unwrap_or((Vec3::zero(), Rotor3::identity()));
    Correction {
        bodies: pair_idx,
        poses: [(pair.a.position, pair.a.orientation), pose_b],
        deltas,
        lambdas,
    }
}

//
// Per-type solves
//

fn solve_joint(
    mut joint: Joint,
    pair: &mut BodyPair,
    lambdas: &mut Lambdas,
    deltas: &mut [Delta; 2],
    params: &CorrectionParams,
) {
    solve_position_row(&mut joint, pair, &mut lambdas[0], deltas, params);

    if joint.angular_stiffness > 0.0 {
        let eval = joint.compute_angular(pair);
        let dir = eval.direction();
        let inv_inertias = inverse_inertias(pair);
        let w = (inv_inertias[0] * dir).dot(dir) + (inv_inertias[1] * dir).dot(dir);
        let compliance = params.compliance(joint.angular_stiffness);
        let lambda = &mut lambdas[ANGULAR_ROW];
        let d_lambda = (-params.alpha * eval.violation - compliance * *lambda) / (w + compliance);
        *lambda += d_lambda;

        let twist = [
            -(inv_inertias[0] * dir) * d_lambda,
            (inv_inertias[1] * dir) * d_lambda,
        ];
        let step = [
            Delta {
                linear: Vec3::zero(),
                angular: twist[0],
            },
            Delta {
                linear: Vec3::zero(),
                angular: twist[1],
            },
        ];
        apply(pair, deltas, step);
    }
}

fn solve_spring(
    mut spring: Spring,
    pair: &mut BodyPair,
    lambdas: &mut Lambdas,
    deltas: &mut [Delta; 2],
    params: &CorrectionParams,
) {
    solve_position_row(&mut spring, pair, &mut lambdas[0], deltas, params);
}

fn solve_motor(
    mut motor: Motor,
    pair: &mut BodyPair,
    lambdas: &mut Lambdas,
    deltas: &mut [Delta; 2],
    params: &CorrectionParams,
) {
    motor.initialize(pair);
    let eval = motor.compute_constraint(pair);
    if eval.violation <= 0.0 {
        return;
    }
    let dir = eval.direction();
    let k = constraint::stiffness_along(motor.compute_derivatives(pair), dir);
    if k <= 0.0 {
        return;
    }
    // motors act on the centers of mass, so only the linear part matters
    let inv_masses = inverse_masses(pair);
    let w = inv_masses[0] + inv_masses[1];
    if w <= 0.0 {
        return;
    }
    let d_lambda = -params.beta * eval.violation * params.dt / (w + params.compliance(k));
    lambdas[0] += d_lambda;
    apply(
        pair,
        deltas,
        [
            Delta {
                linear: -dir * (inv_masses[0] * d_lambda),
                angular: Vec3::zero(),
            },
            Delta {
                linear: dir * (inv_masses[1] * d_lambda),
                angular: Vec3::zero(),
            },
        ],
    );
}

fn solve_contact(
    mut contact: ContactManifold,
    pair: &mut BodyPair,
    lambdas: &mut Lambdas,
    deltas: &mut [Delta; 2],
    params: &CorrectionParams,
) {
    contact.initialize(pair);
    let eval = contact.compute_constraint(pair);
    if eval.violation <= 0.0 {
        // separated, no force and nothing to base friction on
        lambdas[0] = 0.0;
        lambdas[FRICTION_ROW] = 0.0;
        return;
    }

    let dir = eval.direction();
    let k = constraint::stiffness_along(contact.compute_derivatives(pair), dir);
    let arms = contact.lever_arms();
    let d_lambda = position_multiplier(pair, arms, dir, eval.violation, k, lambdas[0], params);
    // the accumulated multiplier only ever pushes the bodies apart
    let lambda_n = (lambdas[0] + d_lambda).min(0.0);
    let d_lambda = lambda_n - lambdas[0];
    lambdas[0] = lambda_n;
    apply(pair, deltas, row_deltas(pair, arms, dir, d_lambda));

    // static friction from the tangential slip of the contact points,
    // limited by the normal force
    contact.initialize(pair);
    let slip = contact.tangential_motion(pair);
    let slip_mag = slip.mag();
    if slip_mag <= m::NORMALIZE_EPSILON || contact.friction <= 0.0 {
        return;
    }
    // the gradient w.r.t. body B, which moving along the slip direction reduces
    let tan_dir = -slip / slip_mag;
    let arms = contact.lever_arms();
    let w = generalized_inverse_masses(pair, arms, tan_dir);
    if w[0] + w[1] <= 0.0 {
        return;
    }
    let limit = contact.friction * lambda_n.abs();
    let d_lambda_t = (-slip_mag / (w[0] + w[1])).max(-limit);
    lambdas[FRICTION_ROW] += d_lambda_t;
    apply(pair, deltas, row_deltas(pair, arms, tan_dir, d_lambda_t));
}

/// Solve the primary row of a position-level force and move the working copies.
fn solve_position_row<F: Force>(
    force: &mut F,
    pair: &mut BodyPair,
    lambda: &mut f64,
    deltas: &mut [Delta; 2],
    params: &CorrectionParams,
) {
    force.initialize(pair);
    let eval = force.compute_constraint(pair);
    let dir = eval.direction();
    let k = constraint::stiffness_along(force.compute_derivatives(pair), dir);
    let arms = force.lever_arms();
    let d_lambda = position_multiplier(pair, arms, dir, eval.violation, k, *lambda, params);
    *lambda += d_lambda;
    apply(pair, deltas, row_deltas(pair, arms, dir, d_lambda));
}

//
// Row math
//

fn inverse_masses(pair: &BodyPair) -> [f64; 2] {
    [
        pair.a.inverse_mass(),
        pair.b.map(|b| b.inverse_mass()).unwrap_or(0.0),
    ]
}

fn inverse_inertias(pair: &BodyPair) -> [Mat3; 2] {
    [
        pair.a.world_inverse_inertia(),
        pair.b
            .map(|b| b.world_inverse_inertia())
            .unwrap_or_else(|| m::diagonal(Vec3::zero())),
    ]
}

/// Resistance of each body to a push along `dir` at the given lever arms.
fn generalized_inverse_masses(pair: &BodyPair, arms: [Vec3; 2], dir: Vec3) -> [f64; 2] {
    let inv_masses = inverse_masses(pair);
    let inv_inertias = inverse_inertias(pair);
    let w = |i: usize| {
        let arm_cross_dir = arms[i].cross(dir);
        inv_masses[i] + arm_cross_dir.dot(inv_inertias[i] * arm_cross_dir)
    };
    [w(0), w(1)]
}

/// Change in the multiplier of a position row.
/// Zero if the row has no stiffness or neither body can move.
fn position_multiplier(
    pair: &BodyPair,
    arms: [Vec3; 2],
    dir: Vec3,
    violation: f64,
    stiffness: f64,
    lambda: f64,
    params: &CorrectionParams,
) -> f64 {
    if stiffness <= 0.0 {
        return 0.0;
    }
    let w = generalized_inverse_masses(pair, arms, dir);
    if w[0] + w[1] <= 0.0 {
        return 0.0;
    }
    let compliance = params.compliance(stiffness);
    (-params.alpha * violation - compliance * lambda) / (w[0] + w[1] + compliance)
}

/// Pose changes caused by a multiplier change along `dir` (the gradient w.r.t. body B).
fn row_deltas(pair: &BodyPair, arms: [Vec3; 2], dir: Vec3, d_lambda: f64) -> [Delta; 2] {
    let inv_masses = inverse_masses(pair);
    let inv_inertias = inverse_inertias(pair);
    let impulse = dir * d_lambda;
    [
        Delta {
            linear: -impulse * inv_masses[0],
            angular: -(inv_inertias[0] * arms[0].cross(impulse)),
        },
        Delta {
            linear: impulse * inv_masses[1],
            angular: inv_inertias[1] * arms[1].cross(impulse),
        },
    ]
}

fn apply(pair: &mut BodyPair, total: &mut [Delta; 2], step: [Delta; 2]) {
    pair.apply(&step);
    total[0] += step[0];
    total[1] += step[1];
}
