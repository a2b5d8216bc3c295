//! Partitioning of constraint handles into batches that can be evaluated in parallel.

use super::body::Body;

/// Handles grouped so that no two handles in the same batch move the same body.
///
/// Immovable bodies never move, so any number of handles in a batch can share one.
/// Batches are built greedily in handle order, which keeps the result deterministic.
#[derive(Clone, Debug, Default)]
pub struct Batches {
    batches: Vec<Vec<usize>>,
}

impl Batches {
    /// Color handles given the bodies each one acts on.
    /// The stored values are indices into `handle_bodies`.
    pub fn color(handle_bodies: &[(usize, Option<usize>)], bodies: &[Body]) -> Self {
        let _span = tracy_span!("color batches");

        let mut batches: Vec<Vec<usize>> = Vec::new();
        // batches each body already appears in
        let mut body_batches: Vec<Vec<usize>> = vec![Vec::new(); bodies.len()];

        for (handle, &(a, b)) in handle_bodies.iter().enumerate() {
            let moving: Vec<usize> = std::iter::once(a)
                .chain(b)
                .filter(|&i| bodies[i].sees_forces())
                .collect();
            let free = |batch: &usize| moving.iter().all(|&i| !body_batches[i].contains(batch));
            // a new batch at the end is always free
            let batch = (0..batches.len())
                .find(free)
                .unwrap_or(batches.len());
            if batch == batches.len() {
                batches.push(Vec::new());
            }
            batches[batch].push(handle);
            for i in moving {
                body_batches[i].push(batch);
            }
        }

        Self { batches }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.batches.iter().map(Vec::as_slice)
    }
}
