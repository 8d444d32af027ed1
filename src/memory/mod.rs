//! Persistent memory stores.
//!
//! Two stores back the assembler and the background distillers:
//! - [`LongTermMemory`]: a capped, deduplicated set of short text facts.
//! - [`CoreMemoryStore`]: structured important facts extracted from
//!   long-term memory by the distiller.
//!
//! Both serialize to pretty-printed JSON on every mutation. A failed write
//! is logged and the in-memory value retained; the next mutation retries.

mod core;
mod long_term;

pub use core::{CoreMemoryEntry, CoreMemoryStore, Importance};
pub use long_term::{LONG_TERM_CAPACITY, LongTermMemory};
