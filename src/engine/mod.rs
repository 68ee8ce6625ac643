// 13.x engine/: the composed engine. core.rs wires the ledger, oracle, position
// store, equity engine, settlement coordinator and netting window behind one
// deterministic driver; results.rs aggregates component errors.

mod core;
mod results;

pub use core::Engine;
pub use results::{EngineError, TickReport};
