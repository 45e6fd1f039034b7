//! Simulation event channel
//!
//! Every observable effect of stepping is pushed onto a queue of typed
//! events the caller drains between steps. Nothing in the engine calls back
//! into the consumer; a UI, a test, or the CLI decides what each event
//! means.

use crate::runtime::value::{Address, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    ObjectAllocated {
        address: Address,
        /// Declared name, when the object has one
        name: Option<String>,
        ty: String,
    },
    ObjectDeallocated {
        address: Address,
    },
    MemoryWrite {
        address: Address,
        value: Value,
    },
    /// Text the program sent to standard output
    Output(String),
    /// The program is blocked on `cin`; call `provide_input`
    InputRequested,
    FunctionCalled {
        name: String,
    },
    FunctionReturned {
        name: String,
    },
    /// Modeled undefined behavior; `fatal` events also end the simulation
    UndefinedBehavior {
        message: String,
        fatal: bool,
    },
    Ended {
        exit_code: Option<i64>,
    },
}

/// FIFO queue of events not yet seen by the caller
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<SimEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SimEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
