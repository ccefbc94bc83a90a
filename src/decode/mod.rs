//! Instruction decoding.
//!
//! Two independent total functions map an instruction word to something
//! executable:
//!
//! - [`computed_index_for`] picks the dispatch [`Bytecode`] for a
//!   decoder-cache entry, and [`threaded_rewrite`] repacks the
//!   instruction bits for that bytecode.
//! - [`handlers::decode_one`] picks the precise-mode handler and printer,
//!   used for single-stepping and for every instruction the block
//!   dispatcher does not execute inline.

pub mod bytecode;
pub mod classify;
pub mod handlers;
pub mod rewrite;

pub use bytecode::Bytecode;
pub use classify::computed_index_for;
pub(crate) use rewrite::is_block_terminator;
pub use rewrite::{
    threaded_rewrite, ExecSpan, FasterFloatType, FasterImmediate, FasterItype, FasterJtype, FasterMove,
    FasterOpType,
};
