mod effect;
mod event;
mod state;
mod transition;

pub use effect::Effect;
pub use event::WorkerTrigger;
pub use state::{RunContext, SessionMachineState};
pub use transition::{transition, TransitionError};
