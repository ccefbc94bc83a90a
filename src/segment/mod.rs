//! Execute segments and their decoder caches.
//!
//! A segment covers one contiguous executable range. Building it decodes
//! and rewrites every instruction start once, then realizes block
//! metadata so dispatch can charge a whole block on entry.

pub mod crc32c;
pub mod entry;
pub mod execute_segment;
pub mod generate;
pub mod patch;
pub mod shared;

pub use entry::DecoderEntry;
pub use execute_segment::ExecuteSegment;
pub use generate::try_alloc_slice;
pub use patch::{LivePatchProbe, C_EBREAK_INSTRUCTION, EBREAK_INSTRUCTION};
pub use shared::{SegmentKey, SharedSegments};
