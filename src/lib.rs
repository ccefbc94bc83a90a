//! rvcore library
//!
//! A RISC-V hart emulator that decodes code once into per-segment decoder
//! caches and runs it block by block, with a precise single-step mode,
//! breakpoints and live-patched fast paths.
//!
//! # Module Organization
//!
//! | Module | Contents |
//! |--------|----------|
//! | `cpu` | Registers, instruction views, integer/FP/atomic semantics, faults |
//! | `decode` | Bytecode classification, rewrite layouts and precise-mode handlers |
//! | `segment` | Execute segments, decoder-cache generation and instrumentation |
//! | `memory` | Paged guest memory and the execute-segment registry |
//! | `machine` | Dispatch loop, precise mode, system calls and snapshots |
//! | `config` | Layered configuration |

pub mod config;
pub mod cpu;
pub mod decode;
pub mod machine;
pub mod memory;
pub mod segment;

pub use config::Config;
pub use cpu::{AddressType, ExceptionKind, MachineException, MachineResult};
pub use machine::{CallArg, Machine, MachineOptions, SnapshotError};
pub use memory::{Memory, PageAttributes};
