//! Rigid body chain simulation: bodies, persistent forces, collision and the step loop.

use crate::math::Vec3;

pub mod batch;
use batch::Batches;

pub mod body;
pub use body::{Body, Mass, Velocity};

pub mod collision;
pub use collision::{
    ColliderKind, ColliderShape, CollisionError, CollisionParams, ContactManifold, ConvexCollider,
};

pub mod constraint;
pub use constraint::{ConstraintHandle, Force, ForceKind, Joint, Motor, Spring};

pub mod constraint_set;
pub use constraint_set::ConstraintSet;

pub mod integrator;
use integrator::Environment;

pub mod rope;
pub use rope::{Rope, RopeParameters, RopeState};

pub mod solver;
use solver::CorrectionParams;

//

/// Reasons a step was rejected. A rejected step leaves the bodies untouched.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum StepError {
    #[error("Collision detection failed")]
    Collision(#[from] CollisionError),
    #[error("Timestep must be finite and positive, got {0}")]
    InvalidTimestep(f64),
}

/// Tunable parameters of the solver.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(
    feature = "serde-types",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SolverConfig {
    /// Number of correction passes per step.
    pub iterations: usize,
    /// Fraction of position error removed per correction, in (0, 1].
    pub alpha: f64,
    /// Fraction of motor velocity error removed per correction, in (0, 1].
    pub beta: f64,
    /// Compliance added to every force, in metres per newton.
    pub gamma: f64,
    pub gravity: Vec3,
    /// Linear damping applied to dynamic bodies before correction.
    pub drag: f64,
    /// Damping applied to every body after correction.
    pub post_drag: f64,
    pub dt: f64,
    pub capsule_radius: f64,
    pub capsule_half_length: f64,
    /// Whether bodies linked by a joint, spring or motor can collide with each other.
    pub collide_connected: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            alpha: 1.0,
            beta: 0.5,
            gamma: 0.0,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            drag: 0.0,
            post_drag: 0.0,
            dt: 1.0 / 60.0,
            capsule_radius: 0.05,
            capsule_half_length: 0.25,
            collide_connected: false,
        }
    }
}

impl SolverConfig {
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the correction weights `alpha`, `beta` and `gamma` in a builder-like chain.
    pub fn with_stiffness(mut self, alpha: f64, beta: f64, gamma: f64) -> Self {
        self.alpha = alpha;
        self.beta = beta;
        self.gamma = gamma;
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_drag(mut self, drag: f64, post_drag: f64) -> Self {
        self.drag = drag;
        self.post_drag = post_drag;
        self
    }

    pub fn with_timestep(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Set the shape of the capsule every body collides as.
    pub fn with_capsule(mut self, radius: f64, half_length: f64) -> Self {
        self.capsule_radius = radius;
        self.capsule_half_length = half_length;
        self
    }

    pub fn with_collide_connected(mut self, collide_connected: bool) -> Self {
        self.collide_connected = collide_connected;
        self
    }

    fn environment(&self) -> Environment {
        Environment {
            gravity: self.gravity,
            drag: self.drag,
            dt: self.dt,
        }
    }

    fn correction(&self) -> CorrectionParams {
        CorrectionParams {
            alpha: self.alpha,
            beta: self.beta,
            gamma: self.gamma,
            dt: self.dt,
        }
    }

    fn collision(&self) -> CollisionParams {
        CollisionParams {
            capsule_radius: self.capsule_radius,
            capsule_half_length: self.capsule_half_length,
        }
    }
}

/// The simulation world: owns the bodies, persistent forces and static colliders,
/// and advances them one fixed timestep at a time.
#[derive(Clone, Debug, Default)]
pub struct Solver {
    pub config: SolverConfig,
    bodies: Vec<Body>,
    constraints: ConstraintSet,
    colliders: Vec<ConvexCollider>,
    contacts: Vec<ContactManifold>,
    batch_count: usize,
}

impl Solver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Create a solver with bodies and forces already in place.
    ///
    /// # Panics
    ///
    /// If any force refers to a body that doesn't exist.
    pub fn with_topology(config: SolverConfig, bodies: Vec<Body>, constraints: ConstraintSet) -> Self {
        let mut solver = Self::new(config);
        solver.replace_topology(bodies, constraints);
        solver
    }

    #[inline]
    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    /// Bodies can be moved and pushed around freely between steps.
    /// Changing their number requires [`replace_topology`][Self::replace_topology].
    #[inline]
    pub fn bodies_mut(&mut self) -> &mut [Body] {
        &mut self.bodies
    }

    #[inline]
    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Swap out the body array and all persistent forces at once.
    ///
    /// # Panics
    ///
    /// If any force refers to a body index out of range or connects a body to itself.
    pub fn replace_topology(&mut self, bodies: Vec<Body>, constraints: ConstraintSet) {
        constraints.validate(bodies.len());
        log::debug!(
            "Replaced topology: {} bodies, {} forces",
            bodies.len(),
            constraints.len()
        );
        self.bodies = bodies;
        self.constraints = constraints;
        self.contacts.clear();
    }

    /// Add a static obstacle. Returns its index in [`colliders`][Self::colliders].
    pub fn register_collider(&mut self, collider: ConvexCollider) -> usize {
        self.colliders.push(collider);
        self.colliders.len() - 1
    }

    pub fn clear_colliders(&mut self) {
        self.colliders.clear();
    }

    #[inline]
    pub fn colliders(&self) -> &[ConvexCollider] {
        &self.colliders
    }

    /// Contacts found during the last step.
    #[inline]
    pub fn contacts(&self) -> &[ContactManifold] {
        &self.contacts
    }

    /// Number of parallel batches the last step's forces were split into.
    #[inline]
    pub fn batch_count(&self) -> usize {
        self.batch_count
    }

    /// Advance the simulation by one timestep.
    ///
    /// Collision detection runs before anything moves,
    /// so on error the bodies are left as they were.
    ///
    /// # Panics
    ///
    /// If a force refers to a body that doesn't exist.
    pub fn step(&mut self) -> Result<(), StepError> {
        let _span = tracy_span!("physics step");
        let config = self.config;
        if !(config.dt.is_finite() && config.dt > 0.0) {
            log::warn!("Rejected step with timestep {}", config.dt);
            return Err(StepError::InvalidTimestep(config.dt));
        }

        self.contacts.clear();
        self.constraints.validate(self.bodies.len());

        let ignored_pairs = if config.collide_connected {
            Default::default()
        } else {
            self.constraints.connected_pairs()
        };
        self.contacts = {
            let _span = tracy_span!("collide");
            collision::collide(
                &self.bodies,
                &self.colliders,
                &ignored_pairs,
                &config.collision(),
            )
            .map_err(|err| {
                log::warn!("Rejected step: {err}");
                err
            })?
        };

        let previous = self.bodies.clone();
        integrator::predict(&mut self.bodies, &config.environment());

        let handles = self.constraints.assemble(self.contacts.len());
        let handle_bodies: Vec<(usize, Option<usize>)> = handles
            .iter()
            .map(|&h| self.constraints.handle_bodies(h, &self.contacts))
            .collect();
        let batches = Batches::color(&handle_bodies, &self.bodies);
        self.batch_count = batches.len();
        log::debug!(
            "Step: {} bodies, {} handles ({} rows), {} contacts, {} batches",
            self.bodies.len(),
            handles.len(),
            self.constraints.row_count(&handles, &self.contacts),
            self.contacts.len(),
            batches.len(),
        );

        let rotations = solver::correct(
            &mut self.bodies,
            &previous,
            &self.constraints,
            &self.contacts,
            &handles,
            &batches,
            config.iterations,
            &config.correction(),
        );
        integrator::update_velocities(&mut self.bodies, &previous, &rotations, config.dt);
        integrator::post_damp(&mut self.bodies, config.post_drag, config.dt);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{self as m, Unit};

    fn weightless() -> SolverConfig {
        SolverConfig::default().with_gravity(Vec3::zero())
    }

    #[test]
    fn free_bodies_keep_velocity() {
        let bodies: Vec<Body> = (0..5)
            .map(|i| {
                Body::new_capsule(1.0, 0.05, 0.25)
                    .with_position(Vec3::new(3.0 * i as f64, 0.0, 0.0))
                    .with_velocity(Velocity::new(
                        Vec3::new(0.5, -1.0, i as f64),
                        Vec3::zero(),
                    ))
            })
            .collect();
        let mut solver = Solver::with_topology(weightless(), bodies.clone(), ConstraintSet::new());
        solver.step().unwrap();
        let dt = solver.config.dt;
        for (before, after) in bodies.iter().zip(solver.bodies()) {
            assert!((after.velocity.linear - before.velocity.linear).mag() < 1e-9);
            let expected = before.position + before.velocity.linear * dt;
            assert!((after.position - expected).mag() < 1e-12);
        }
        assert!(solver.contacts().is_empty());
    }

    #[test]
    fn spinning_bodies_stay_normalized() {
        let bodies = vec![
            Body::new_capsule(1.0, 0.05, 0.25)
                .with_velocity(Velocity::new(Vec3::zero(), Vec3::new(5.0, 1.0, -3.0))),
            Body::new_capsule(1.0, 0.05, 0.25)
                .with_position(Vec3::new(0.6, 0.0, 0.0))
                .with_velocity(Velocity::new(Vec3::zero(), Vec3::new(0.0, 9.0, 0.0))),
        ];
        let mut constraints = ConstraintSet::new();
        constraints.add_joint(Joint::new(
            0,
            1,
            Vec3::new(0.25, 0.0, 0.0),
            Vec3::new(-0.25, 0.0, 0.0),
        ));
        let mut solver = Solver::with_topology(weightless(), bodies, constraints);
        for _ in 0..200 {
            solver.step().unwrap();
            for body in solver.bodies() {
                let o = body.orientation;
                let norm_sq = o.s * o.s + o.bv.xy * o.bv.xy + o.bv.xz * o.bv.xz + o.bv.yz * o.bv.yz;
                assert!((norm_sq.sqrt() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn resting_rope_stays_put() {
        let mut state = RopeState::default();
        let params = RopeParameters::default();
        Rope::spawn_line(params, Vec3::zero(), Unit::unit_x(), 8, &mut state).unwrap();
        let start = state.bodies.clone();
        let config = weightless().with_capsule(params.segment_radius, params.segment_half_length);
        let mut solver = Solver::with_topology(config, state.bodies, state.constraints);
        for _ in 0..100 {
            solver.step().unwrap();
        }
        assert!(solver.contacts().is_empty());
        for (before, after) in start.iter().zip(solver.bodies()) {
            assert!((after.position - before.position).mag() < 1e-12);
        }
    }

    #[test]
    fn hanging_rope_holds_together() {
        let mut state = RopeState::default();
        let params = RopeParameters::default();
        Rope::spawn_line(params, Vec3::zero(), Unit::unit_x(), 6, &mut state).unwrap();
        let config = SolverConfig::default()
            .with_iterations(20)
            .with_capsule(params.segment_radius, params.segment_half_length);
        let mut solver = Solver::with_topology(config, state.bodies, state.constraints);
        for _ in 0..30 {
            solver.step().unwrap();
        }
        let bodies = solver.bodies();
        assert_eq!(bodies[0].position, Vec3::zero());
        // the free end has swung down
        assert!(bodies[5].position.y < -0.5);
        for joint in &solver.constraints().joints {
            let a = bodies[joint.body_a].local_to_world(joint.anchor_a);
            let b = bodies[joint.body_b].local_to_world(joint.anchor_b);
            assert!((a - b).mag() < 0.05);
        }
    }

    #[test]
    fn motor_error_shrinks_with_iterations() {
        let bodies = vec![
            Body::new_capsule(1.0, 0.05, 0.25),
            Body::new_capsule(2.0, 0.05, 0.25).with_position(Vec3::new(0.0, 2.0, 0.0)),
        ];
        let target = Vec3::new(1.0, 0.0, -0.5);
        let mut constraints = ConstraintSet::new();
        constraints.add_motor(Motor::new(0, 1, target));

        let error_after = |iterations: usize| {
            let config = weightless().with_iterations(iterations);
            let mut solver = Solver::with_topology(config, bodies.clone(), constraints.clone());
            solver.step().unwrap();
            let b = solver.bodies();
            ((b[1].velocity.linear - b[0].velocity.linear) - target).mag()
        };
        let errors: Vec<f64> = [0, 1, 2, 4, 8, 16].into_iter().map(error_after).collect();
        assert!((errors[0] - target.mag()).abs() < 1e-9);
        for pair in errors.windows(2) {
            assert!(pair[1] < pair[0], "{errors:?}");
        }
        assert!(errors[5] < 1e-3);
    }

    #[test]
    fn contacts_are_deterministic() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(7);
        let bodies: Vec<Body> = (0..60)
            .map(|_| {
                Body::new_capsule(1.0, 0.05, 0.25)
                    .with_position(Vec3::new(
                        rng.gen_range(-1.0..1.0),
                        rng.gen_range(-1.0..1.0),
                        rng.gen_range(-1.0..1.0),
                    ))
                    .with_orientation(m::rotor_from_scaled_axis(Vec3::new(
                        rng.gen_range(-3.0..3.0),
                        rng.gen_range(-3.0..3.0),
                        rng.gen_range(-3.0..3.0),
                    )))
            })
            .collect();
        let run = || {
            let mut solver = Solver::with_topology(weightless(), bodies.clone(), ConstraintSet::new());
            solver.register_collider(ConvexCollider::new_sphere(0.5));
            solver.register_collider(
                ConvexCollider::new_cube(1.0).with_position(Vec3::new(0.0, -1.5, 0.0)),
            );
            solver.step().unwrap();
            solver
                .contacts()
                .iter()
                .map(|c| (c.body_a, c.body_b, c.penetration))
                .collect::<Vec<_>>()
        };
        let first = run();
        assert!(!first.is_empty());
        for _ in 0..5 {
            itertools::assert_equal(first.iter(), run().iter());
        }
    }

    #[test]
    fn capsule_lands_on_box() {
        let bodies = vec![Body::new_capsule(1.0, 0.05, 0.25).with_position(Vec3::new(0.0, 0.6, 0.0))];
        let mut solver = Solver::with_topology(
            SolverConfig::default().with_iterations(10),
            bodies,
            ConstraintSet::new(),
        );
        solver.register_collider(ConvexCollider::new_box(Vec3::new(4.0, 1.0, 4.0)));
        for _ in 0..180 {
            solver.step().unwrap();
        }
        let body = solver.bodies()[0];
        // box top at y = 0.5, capsule radius 0.05
        assert!(body.position.y > 0.5 && body.position.y < 0.7, "{}", body.position.y);
        for end in [-0.25, 0.25] {
            let end = body.local_to_world(Vec3::new(end, 0.0, 0.0));
            assert!(end.y > 0.53, "{}", end.y);
        }
    }

    #[test]
    fn linked_bodies_ignore_each_other() {
        let bodies = vec![
            Body::new_capsule(1.0, 0.05, 0.25),
            Body::new_capsule(1.0, 0.05, 0.25).with_position(Vec3::new(0.0, 0.05, 0.0)),
        ];
        let mut constraints = ConstraintSet::new();
        constraints.add_spring(Spring::new(0, 1, 0.05, 10.0));

        let mut solver = Solver::with_topology(weightless(), bodies.clone(), constraints.clone());
        solver.step().unwrap();
        assert!(solver.contacts().is_empty());

        let mut solver =
            Solver::with_topology(weightless().with_collide_connected(true), bodies, constraints);
        solver.step().unwrap();
        assert_eq!(solver.contacts().len(), 1);
    }

    #[test]
    fn failed_step_leaves_bodies_alone() {
        let bodies = vec![Body::new_capsule(1.0, 0.05, 0.25)
            .with_velocity(Velocity::new(Vec3::unit_x(), Vec3::zero()))];
        let mut solver = Solver::with_topology(SolverConfig::default(), bodies, ConstraintSet::new());
        let idx = solver.register_collider(ConvexCollider::new_sphere(0.0));
        assert_eq!(
            solver.step(),
            Err(StepError::Collision(CollisionError::DegenerateCollider {
                index: idx,
                kind: ColliderKind::Sphere,
            }))
        );
        assert_eq!(solver.bodies()[0].position, Vec3::zero());
        assert_eq!(solver.bodies()[0].velocity.linear, Vec3::unit_x());

        solver.clear_colliders();
        solver.step().unwrap();
        assert!(solver.bodies()[0].position.x > 0.0);

        solver.config.dt = 0.0;
        assert_eq!(solver.step(), Err(StepError::InvalidTimestep(0.0)));
    }

    #[test]
    #[should_panic]
    fn dangling_force_panics() {
        let mut constraints = ConstraintSet::new();
        constraints.add_joint(Joint::new(0, 3, Vec3::zero(), Vec3::zero()));
        Solver::with_topology(SolverConfig::default(), vec![Body::new_immovable()], constraints);
    }

    #[test]
    fn rope_grows_when_pulled() {
        let mut state = RopeState::default();
        let params = RopeParameters {
            auto_length: true,
            stretch_limit: 0.01,
            ..Default::default()
        };
        let mut rope =
            Rope::spawn_line(params, Vec3::zero(), Unit::unit_x(), 4, &mut state).unwrap();
        // reel the free end out from the anchor
        let (anchor, tail) = (rope.segments[0], rope.segments[3]);
        state
            .constraints
            .add_motor(Motor::new(anchor, tail, Vec3::new(3.0, 0.0, 0.0)));
        let config = weightless().with_capsule(params.segment_radius, params.segment_half_length);
        let mut solver =
            Solver::with_topology(config, state.bodies.clone(), state.constraints.clone());

        let anchor_gap = |bodies: &[Body], joint: &Joint| {
            (bodies[joint.body_b].local_to_world(joint.anchor_b)
                - bodies[joint.body_a].local_to_world(joint.anchor_a))
            .mag()
        };

        solver.step().unwrap();
        state.bodies = solver.bodies().to_vec();
        let stretch = rope.terminal_stretch(&state).unwrap();
        assert!(stretch > params.stretch_limit, "{stretch}");
        // the pull lands on the end of the rope more than at the anchor
        let first_gap = anchor_gap(&state.bodies, &state.constraints.joints[0]);
        assert!(stretch > first_gap, "{stretch} {first_gap}");

        assert_eq!(rope.auto_adjust(&mut state), Ok(Some(rope::RopeEdit::Inserted)));
        solver.replace_topology(state.bodies.clone(), state.constraints.clone());
        assert_eq!(rope.len(), 5);
        assert_eq!(solver.bodies().len(), 5);
        assert_eq!(solver.constraints().joints.len(), 4);

        // the new segment is simulated along with the rest
        for _ in 0..10 {
            solver.step().unwrap();
        }
        assert!(solver.bodies().iter().all(Body::is_finite));
        assert!(solver.bodies()[4].position.x > 1.9);
    }

    #[cfg(feature = "serde-types")]
    #[test]
    fn config_from_ron() {
        let config: SolverConfig = ron::from_str(
            "(iterations: 25, alpha: 0.8, post_drag: 0.1, collide_connected: true)",
        )
        .unwrap();
        assert_eq!(config.iterations, 25);
        assert_eq!(config.alpha, 0.8);
        assert_eq!(config.post_drag, 0.1);
        assert!(config.collide_connected);
        // unspecified fields keep their defaults
        assert_eq!(config.beta, SolverConfig::default().beta);
        assert_eq!(config.gravity, SolverConfig::default().gravity);
    }
}
