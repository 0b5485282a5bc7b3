//! Terminal adapters.

mod simulated;

pub use simulated::SimulatedTerminal;
