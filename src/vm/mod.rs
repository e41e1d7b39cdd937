//! The register-based bytecode VM: a flat `Opcode` array, a `Mem` register
//! file, a growable cursor set, and an explicit frame stack for sub-program
//! invocation (triggers, coroutines). Single-threaded cooperative — the
//! only yield points are `ResultRow`, `Halt`, and cancellation checks; there
//! is no `async` anywhere in this module, matching the engine's wider
//! single-fiber scheduling model.

pub mod cursor;
pub mod dispatch;
pub mod opcode;

pub use cursor::Cursor;
pub use dispatch::{StepOutcome, Vm};
pub use opcode::Opcode;

#[cfg(test)]
#[path = "vm_test.rs"]
mod vm_test;
