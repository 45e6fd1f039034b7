//! Steppable execution of linked programs

mod eval;
pub mod events;
pub mod memory;
pub mod simulation;
pub mod value;

pub use events::{EventQueue, SimEvent};
pub use memory::{Frame, MemObject, Memory, ObjectKind};
pub use simulation::{Eval, InputBuffer, RuntimeConstruct, RuntimeKind, Simulation, Status};
pub use value::{Address, NULL_ADDRESS, Value};
