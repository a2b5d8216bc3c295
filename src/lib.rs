/// Open a profiler span that lasts until the end of the enclosing scope.
/// Does nothing unless the `tracy` feature is enabled and a client is running.
macro_rules! tracy_span {
    ($name:literal) => {
        tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!($name), 0))
    };
}

pub mod math;
pub use math::{uv, Unit};

pub mod physics;
pub use physics::{
    body::{Body, Mass, Velocity},
    collision::{self, ColliderShape, CollisionError, ContactManifold, ConvexCollider},
    constraint::{ConstraintHandle, ForceKind, Joint, Motor, Spring},
    rope::{self, Rope, RopeError, RopeParameters, RopeState},
    ConstraintSet, Solver, SolverConfig, StepError,
};
