mod simulated;
mod workers_ai;

pub use simulated::SimulatedModel;
pub use workers_ai::{DEFAULT_MODEL, WorkersAi};
