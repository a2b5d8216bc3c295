//! Tools for creating and manipulating ropes made of jointed capsule segments.
//!
//! A [`Rope`] keeps track of which bodies and joints in a [`RopeState`] make up the rope
//! and grows or shrinks it from its free end. After any change the state should be
//! handed to the solver as a whole with
//! [`Solver::replace_topology`][crate::physics::Solver::replace_topology].

use crate::{
    math::{self as m, Rotor3, Unit, Vec3},
    physics::{Body, ConstraintSet, Joint},
};

/// Reasons a rope edit was refused.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RopeError {
    #[error("A rope needs at least 2 segments, {requested} requested")]
    TooFewSegments { requested: usize },
    #[error("The rope has no segments")]
    EmptyRope,
    #[error("The rope's indices no longer match the body and joint arrays")]
    Desynced,
}

/// Parameters for constructing a [`Rope`][self::Rope].
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct RopeParameters {
    pub segment_mass: f64,
    pub segment_radius: f64,
    pub segment_half_length: f64,
    pub friction: f64,
    /// Make the first segment immovable, hanging the rope from it.
    pub anchored: bool,
    /// Let [`Rope::auto_adjust`] add and remove segments.
    pub auto_length: bool,
    /// How far the terminal joint can stretch (or go slack) before the rope changes length.
    pub stretch_limit: f64,
}

impl Default for RopeParameters {
    fn default() -> Self {
        Self {
            segment_mass: 0.1,
            segment_radius: 0.05,
            segment_half_length: 0.25,
            friction: 0.5,
            anchored: true,
            auto_length: false,
            stretch_limit: 0.05,
        }
    }
}

impl RopeParameters {
    /// Distance between the centers of two neighboring segments at rest.
    #[inline]
    pub fn spacing(&self) -> f64 {
        2.0 * self.segment_half_length
    }

    fn segment(&self) -> Body {
        Body::new_capsule(
            self.segment_mass,
            self.segment_radius,
            self.segment_half_length,
        )
        .with_friction(self.friction)
    }

    fn joint(&self, body_a: usize, body_b: usize) -> Joint {
        let h = self.segment_half_length;
        Joint::new(
            body_a,
            body_b,
            Vec3::new(h, 0.0, 0.0),
            Vec3::new(-h, 0.0, 0.0),
        )
    }
}

/// The bodies and persistent forces of a simulation, edited together
/// and handed to the solver in one piece.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct RopeState {
    pub bodies: Vec<Body>,
    pub constraints: ConstraintSet,
}

/// Structural change made by [`Rope::auto_adjust`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RopeEdit {
    Inserted,
    Removed,
}

/// A rope built out of capsules connected end to end with joints.
#[derive(Clone, Default, Debug)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Rope {
    pub params: RopeParameters,
    /// Body indices of the segments, from the anchored end to the free end.
    pub segments: Vec<usize>,
    /// Index of the joint between `segments[i]` and `segments[i + 1]`.
    pub joints: Vec<usize>,
}

impl Rope {
    /// Spawn a straight rope starting at `start` and extending in direction `dir`,
    /// with the segments at exactly their rest spacing.
    pub fn spawn_line(
        params: RopeParameters,
        start: Vec3,
        dir: Unit<Vec3>,
        segment_count: usize,
        state: &mut RopeState,
    ) -> Result<Self, RopeError> {
        if segment_count < 2 {
            return Err(RopeError::TooFewSegments {
                requested: segment_count,
            });
        }

        let orientation = orientation_along(dir);
        let step = *dir * params.spacing();
        let mut rope = Rope {
            params,
            segments: Vec::with_capacity(segment_count),
            joints: Vec::with_capacity(segment_count - 1),
        };

        for i in 0..segment_count {
            let mut body = params
                .segment()
                .with_position(start + step * i as f64)
                .with_orientation(orientation);
            if i == 0 && params.anchored {
                body.mass = 0.0.into();
            }
            rope.push_segment(body, state);
        }
        log::debug!("Spawned rope with {segment_count} segments");

        Ok(rope)
    }

    fn push_segment(&mut self, body: Body, state: &mut RopeState) {
        state.bodies.push(body);
        let body_idx = state.bodies.len() - 1;
        if let Some(&prev) = self.segments.last() {
            state
                .constraints
                .add_joint(self.params.joint(prev, body_idx));
            self.joints.push(state.constraints.joints.len() - 1);
        }
        self.segments.push(body_idx);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Add a segment to the free end of the rope, continuing in the direction of the last one.
    ///
    /// New bodies and joints are appended, so all existing indices stay valid.
    /// Returns the index of the new body.
    pub fn insert_segment(&mut self, state: &mut RopeState) -> Result<usize, RopeError> {
        let &last = self.segments.last().ok_or(RopeError::EmptyRope)?;
        let tail = *state.bodies.get(last).ok_or(RopeError::Desynced)?;
        let axis = tail.orientation * Vec3::unit_x();
        let body = Body {
            position: tail.position + axis * self.params.spacing(),
            orientation: tail.orientation,
            velocity: tail.velocity,
            ..self.params.segment()
        };
        self.push_segment(body, state);
        log::debug!("Inserted rope segment, now {}", self.len());
        Ok(state.bodies.len() - 1)
    }

    /// Remove the segment at the free end of the rope along with its joint.
    ///
    /// Refused if fewer than 2 segments would remain.
    pub fn remove_segment(&mut self, state: &mut RopeState) -> Result<(), RopeError> {
        if self.is_empty() {
            return Err(RopeError::EmptyRope);
        }
        if self.len() <= 2 {
            log::warn!("Refused to shorten a rope of {} segments", self.len());
            return Err(RopeError::TooFewSegments {
                requested: self.len() - 1,
            });
        }
        let (Some(&last), Some(&joint)) = (self.segments.last(), self.joints.last()) else {
            return Err(RopeError::EmptyRope);
        };
        if last + 1 != state.bodies.len() || joint + 1 != state.constraints.joints.len() {
            return Err(RopeError::Desynced);
        }
        state.bodies.pop();
        state.constraints.joints.pop();
        self.segments.pop();
        self.joints.pop();
        log::debug!("Removed rope segment, now {}", self.len());
        Ok(())
    }

    /// How far apart the anchors of the joint at the free end have pulled.
    ///
    /// The sign follows the last segment's axis: positive when the last segment
    /// has moved out along the rope, negative when it has pushed back past its anchor.
    /// Bending the joint without separating the anchors reads as zero.
    pub fn terminal_stretch(&self, state: &RopeState) -> Result<f64, RopeError> {
        let &joint_idx = self.joints.last().ok_or(RopeError::EmptyRope)?;
        let joint = state
            .constraints
            .joints
            .get(joint_idx)
            .ok_or(RopeError::Desynced)?;
        let (a, b) = match (
            state.bodies.get(joint.body_a),
            state.bodies.get(joint.body_b),
        ) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(RopeError::Desynced),
        };
        let gap = b.local_to_world(joint.anchor_b) - a.local_to_world(joint.anchor_a);
        let axis = b.orientation * Vec3::unit_x();
        if gap.dot(axis) < 0.0 {
            Ok(-gap.mag())
        } else {
            Ok(gap.mag())
        }
    }

    /// Lengthen the rope if its end is stretched past the limit
    /// and shorten it if it's slack past the limit.
    ///
    /// Does nothing unless `params.auto_length` is set.
    pub fn auto_adjust(&mut self, state: &mut RopeState) -> Result<Option<RopeEdit>, RopeError> {
        if !self.params.auto_length {
            return Ok(None);
        }
        let stretch = self.terminal_stretch(state)?;
        if stretch > self.params.stretch_limit {
            self.insert_segment(state)?;
            Ok(Some(RopeEdit::Inserted))
        } else if stretch < -self.params.stretch_limit && self.len() > 2 {
            self.remove_segment(state)?;
            Ok(Some(RopeEdit::Removed))
        } else {
            Ok(None)
        }
    }
}

/// Orientation that points the local x axis along `dir`.
fn orientation_along(dir: Unit<Vec3>) -> Rotor3 {
    let from = Vec3::unit_x();
    if from.dot(*dir) < -1.0 + m::NORMALIZE_EPSILON {
        // exactly opposite, any half turn around a perpendicular axis works
        return m::rotor_from_axis_angle(Unit::unit_y(), std::f64::consts::PI);
    }
    Rotor3::from_rotation_between(from, *dir).normalized()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(count: usize) -> (Rope, RopeState) {
        let mut state = RopeState::default();
        let rope = Rope::spawn_line(
            RopeParameters::default(),
            Vec3::zero(),
            Unit::unit_x(),
            count,
            &mut state,
        )
        .unwrap();
        (rope, state)
    }

    #[test]
    fn spawned_rope_is_at_rest() {
        let (rope, state) = spawn(5);
        assert_eq!(rope.len(), 5);
        assert_eq!(state.constraints.joints.len(), 4);
        assert!(!state.bodies[0].sees_forces());
        assert!(state.bodies[1].sees_forces());
        for joint in &state.constraints.joints {
            let a = state.bodies[joint.body_a].local_to_world(joint.anchor_a);
            let b = state.bodies[joint.body_b].local_to_world(joint.anchor_b);
            assert!((a - b).mag() < 1e-12);
        }
        assert!(rope.terminal_stretch(&state).unwrap().abs() < 1e-12);
    }

    #[test]
    fn spawn_in_any_direction() {
        for dir in [-Vec3::unit_x(), Vec3::unit_y(), Vec3::new(1.0, -1.0, 2.0)] {
            let dir = Unit::new_normalize(dir);
            let mut state = RopeState::default();
            let rope = Rope::spawn_line(
                RopeParameters::default(),
                Vec3::zero(),
                dir,
                3,
                &mut state,
            )
            .unwrap();
            let axis = state.bodies[rope.segments[1]].orientation * Vec3::unit_x();
            assert!((axis - *dir).mag() < 1e-9);
        }
    }

    #[test]
    fn too_short_rope_is_refused() {
        let mut state = RopeState::default();
        let res = Rope::spawn_line(
            RopeParameters::default(),
            Vec3::zero(),
            Unit::unit_x(),
            1,
            &mut state,
        );
        assert_eq!(res.unwrap_err(), RopeError::TooFewSegments { requested: 1 });
        assert!(state.bodies.is_empty());
    }

    #[test]
    fn insert_appends_and_keeps_indices() {
        let (mut rope, mut state) = spawn(3);
        let bodies_before = state.bodies.clone();
        let joints_before: Vec<_> = state
            .constraints
            .joints
            .iter()
            .map(|j| (j.body_a, j.body_b))
            .collect();

        let new_body = rope.insert_segment(&mut state).unwrap();
        assert_eq!(new_body, 3);
        assert_eq!(rope.segments, vec![0, 1, 2, 3]);
        assert_eq!(rope.joints, vec![0, 1, 2]);
        for (before, after) in bodies_before.iter().zip(&state.bodies) {
            assert_eq!(before.position, after.position);
        }
        itertools::assert_equal(
            joints_before.iter().copied(),
            state
                .constraints
                .joints
                .iter()
                .take(2)
                .map(|j| (j.body_a, j.body_b)),
        );
        let new_joint = state.constraints.joints[2];
        assert_eq!((new_joint.body_a, new_joint.body_b), (2, 3));
        assert!(rope.terminal_stretch(&state).unwrap().abs() < 1e-12);
    }

    #[test]
    fn remove_refused_below_two_segments() {
        let (mut rope, mut state) = spawn(3);
        rope.remove_segment(&mut state).unwrap();
        assert_eq!(rope.len(), 2);
        assert_eq!(state.bodies.len(), 2);
        assert_eq!(state.constraints.joints.len(), 1);
        assert_eq!(
            rope.remove_segment(&mut state),
            Err(RopeError::TooFewSegments { requested: 1 })
        );
        assert_eq!(state.bodies.len(), 2);
    }

    #[test]
    fn auto_length_follows_stretch() {
        let (mut rope, mut state) = spawn(3);
        rope.params.auto_length = true;

        // pull the free end out
        state.bodies[2].position.x += 0.2;
        assert_eq!(rope.auto_adjust(&mut state), Ok(Some(RopeEdit::Inserted)));
        assert_eq!(rope.len(), 4);

        // push the new end back in
        state.bodies[3].position = state.bodies[2].position + Vec3::new(0.1, 0.0, 0.0);
        assert_eq!(rope.auto_adjust(&mut state), Ok(Some(RopeEdit::Removed)));
        assert_eq!(rope.len(), 3);

        // within limits nothing happens
        state.bodies[2].position = state.bodies[1].position + Vec3::new(0.5, 0.0, 0.0);
        assert_eq!(rope.auto_adjust(&mut state), Ok(None));

        rope.params.auto_length = false;
        state.bodies[2].position.x += 1.0;
        assert_eq!(rope.auto_adjust(&mut state), Ok(None));
    }

    #[test]
    fn bent_end_is_not_slack() {
        let (mut rope, mut state) = spawn(4);
        rope.params.auto_length = true;

        // swing the last segment a quarter turn around the joint it hangs from
        let pivot = state.bodies[2].local_to_world(Vec3::new(0.25, 0.0, 0.0));
        let turn = m::rotor_from_axis_angle(Unit::unit_z(), std::f64::consts::FRAC_PI_2);
        let last = &mut state.bodies[3];
        last.orientation = turn * last.orientation;
        last.position = pivot + last.orientation * Vec3::new(0.25, 0.0, 0.0);

        assert!(rope.terminal_stretch(&state).unwrap().abs() < 1e-12);
        assert_eq!(rope.auto_adjust(&mut state), Ok(None));
        assert_eq!(rope.len(), 4);

        // sliding the bent segment back toward the rope is slack
        let back = state.bodies[3].orientation * Vec3::new(-0.1, 0.0, 0.0);
        state.bodies[3].position += back;
        assert!((rope.terminal_stretch(&state).unwrap() + 0.1).abs() < 1e-12);
    }

    #[test]
    fn replaced_state_is_desynced() {
        let (mut rope, mut state) = spawn(3);
        state.bodies.truncate(1);
        assert_eq!(rope.terminal_stretch(&state), Err(RopeError::Desynced));
        assert_eq!(rope.insert_segment(&mut state), Err(RopeError::Desynced));

        let (rope, mut state) = spawn(3);
        state.constraints.joints.clear();
        assert_eq!(rope.terminal_stretch(&state), Err(RopeError::Desynced));
    }

    #[test]
    fn empty_rope_errors() {
        let mut rope = Rope::default();
        let mut state = RopeState::default();
        assert_eq!(rope.insert_segment(&mut state), Err(RopeError::EmptyRope));
        assert_eq!(rope.terminal_stretch(&state), Err(RopeError::EmptyRope));
    }
}
