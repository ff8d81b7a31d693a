//! `tape-sort` is a tape device emulator with a tape-based external sort on top.
//!
//! A tape is a sequential-access storage device: a head over fixed-size cells
//! that moves one cell at a time or rewinds in a single jump, with no other
//! way to reach a cell. Data sorted this way may be far larger than the
//! available memory, so the sort works tape-to-tape, touching at most a
//! configurable number of values in RAM at once. This models historical
//! tape-drive computing, where every head movement had a real cost — and the
//! emulator can charge that cost too, via per-operation latency emulation.
//!
//! # Overview
//!
//! `tape-sort` supports the following features:
//!
//! * **Stream agnostic:**
//!   a tape wraps anything implementing the std `Read`/`Write`/`Seek` traits:
//!   files, in-memory cursors, custom devices.
//! * **Capability typed:**
//!   what a tape can do is decided at compile time by its stream type. A tape
//!   over a read-only stream has no write operation at all, and vice versa.
//! * **Latency emulation:**
//!   reads, writes, single steps and rewinds can each carry a configured
//!   latency, loaded from a plain-text delay configuration file.
//! * **Bounded-memory sorting:**
//!   a three-tape randomized quicksort with reservoir-sampled pivots sorts
//!   inputs of any size while holding at most a chunk of values in memory,
//!   falling back to plain in-memory sorting when the input fits.
//! * **Reproducible randomness:**
//!   pivot sampling goes through an injectable random source, so sorting runs
//!   can be replayed with a fixed seed.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//!
//! use tape_sort::{Tape, TapeSorterBuilder};
//!
//! fn main() {
//!     let input = fs::File::open("input.bin").unwrap();
//!     let output = fs::File::create("output.bin").unwrap();
//!
//!     let mut tin = Tape::new(input, 1_000_000).unwrap();
//!     let mut tout = Tape::new(output, 1_000_000).unwrap();
//!
//!     let sorter = TapeSorterBuilder::new()
//!         .with_chunk_size(64 * 1024)
//!         .build()
//!         .unwrap();
//!
//!     sorter.sort(&mut tin, &mut tout).unwrap();
//!     tout.flush().unwrap();
//! }
//! ```

pub mod config;
pub mod sort;
pub mod summary;
pub mod tape;

pub use config::{ConfigError, DelayConfig};
pub use sort::{peek, put, sort, sort_in_memory, split, SortError, TapeSorter, TapeSorterBuilder};
pub use summary::SegmentSummary;
pub use tape::{Tape, TapeBuilder, TapeError, Value, CELL_BYTES};
