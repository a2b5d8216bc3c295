use super::{
    collision::ContactManifold,
    constraint::{ConstraintHandle, Force, ForceKind, Joint, Motor, Spring},
};

use std::collections::HashSet;

/// Registry of the persistent forces in a simulation, stored in one flat array per type.
///
/// Every step these are combined with the step's contacts into one list of
/// [`ConstraintHandle`]s, persistent forces first.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstraintSet {
    pub joints: Vec<Joint>,
    pub springs: Vec<Spring>,
    pub motors: Vec<Motor>,
}

impl ConstraintSet {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a joint. Returns a handle that stays valid until the set is replaced.
    #[inline]
    pub fn add_joint(&mut self, joint: Joint) -> ConstraintHandle {
        self.joints.push(joint);
        ConstraintHandle::new(ForceKind::Joint, self.joints.len() - 1)
    }

    #[inline]
    pub fn add_spring(&mut self, spring: Spring) -> ConstraintHandle {
        self.springs.push(spring);
        ConstraintHandle::new(ForceKind::Spring, self.springs.len() - 1)
    }

    #[inline]
    pub fn add_motor(&mut self, motor: Motor) -> ConstraintHandle {
        self.motors.push(motor);
        ConstraintHandle::new(ForceKind::Motor, self.motors.len() - 1)
    }

    /// Number of persistent forces of all types.
    #[inline]
    pub fn len(&self) -> usize {
        self.joints.len() + self.springs.len() + self.motors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.joints.clear();
        self.springs.clear();
        self.motors.clear();
    }

    fn body_pairs(&self) -> impl Iterator<Item = (usize, Option<usize>)> + '_ {
        self.joints
            .iter()
            .map(Force::bodies)
            .chain(self.springs.iter().map(Force::bodies))
            .chain(self.motors.iter().map(Force::bodies))
    }

    /// Check that every force refers to existing, distinct bodies.
    ///
    /// # Panics
    ///
    /// If any force refers to a body index out of range or connects a body to itself.
    /// Keeping the forces in sync with the body array is the caller's job,
    /// so this is treated as a bug rather than a recoverable error.
    pub fn validate(&self, body_count: usize) {
        for (a, b) in self.body_pairs() {
            assert!(
                a < body_count,
                "Force refers to body {a} but there are only {body_count} bodies"
            );
            if let Some(b) = b {
                assert!(
                    b < body_count,
                    "Force refers to body {b} but there are only {body_count} bodies"
                );
                assert_ne!(a, b, "Force connects body {a} to itself");
            }
        }
    }

    /// Every pair of bodies directly connected by a force, smaller index first.
    pub fn connected_pairs(&self) -> HashSet<(usize, usize)> {
        self.body_pairs()
            .filter_map(|(a, b)| b.map(|b| (a.min(b), a.max(b))))
            .collect()
    }

    /// Build the combined handle list for a step:
    /// joints, springs and motors in storage order followed by `contact_count` contacts.
    pub fn assemble(&self, contact_count: usize) -> Vec<ConstraintHandle> {
        let typed = |kind: ForceKind, count: usize| {
            (0..count).map(move |index| ConstraintHandle::new(kind, index))
        };
        let mut handles = Vec::with_capacity(self.len() + contact_count);
        handles.extend(typed(ForceKind::Joint, self.joints.len()));
        handles.extend(typed(ForceKind::Spring, self.springs.len()));
        handles.extend(typed(ForceKind::Motor, self.motors.len()));
        handles.extend(typed(ForceKind::Contact, contact_count));
        handles
    }

    /// Bodies the force behind a handle acts on.
    ///
    /// # Panics
    ///
    /// If the handle doesn't point to an existing force.
    pub fn handle_bodies(
        &self,
        handle: ConstraintHandle,
        contacts: &[ContactManifold],
    ) -> (usize, Option<usize>) {
        match handle.kind {
            ForceKind::Joint => self.joints[handle.index].bodies(),
            ForceKind::Spring => self.springs[handle.index].bodies(),
            ForceKind::Motor => self.motors[handle.index].bodies(),
            ForceKind::Contact => contacts[handle.index].bodies(),
        }
    }

    /// Total number of scalar rows contributed by the handles.
    pub fn row_count(&self, handles: &[ConstraintHandle], contacts: &[ContactManifold]) -> usize {
        handles
            .iter()
            .map(|h| match h.kind {
                ForceKind::Joint => self.joints[h.index].rows(),
                ForceKind::Spring => self.springs[h.index].rows(),
                ForceKind::Motor => self.motors[h.index].rows(),
                ForceKind::Contact => contacts[h.index].rows(),
            })
            .sum()
    }
}
