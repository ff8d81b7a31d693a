//! Tape-to-tape sorting.
//!
//! The workhorse is a randomized quicksort adapted to sequential devices:
//! the input is copied onto a scratch tape while a [`SegmentSummary`]
//! samples a pivot in the same pass, then the scratch contents are
//! recursively partitioned between two more scratch tapes until a segment
//! either fits the in-memory chunk budget or turns out to be all-equal and
//! can be copied through as-is. Expected cost is O(n log n) cell reads,
//! writes and single-step head moves; memory never exceeds the chunk budget
//! at an in-memory leaf plus O(depth) tape handles.
//!
//! [`TapeSorter`] wraps the algorithm with scratch-tape provisioning: it
//! owns a temporary directory whose files never outlive it and sorts
//! small-enough inputs fully in memory on a thread pool instead.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use log;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::slice::ParallelSliceMut;
use tempfile;

use crate::config::DelayConfig;
use crate::summary::SegmentSummary;
use crate::tape::{Tape, TapeBuilder, TapeError, Value};

/// Moves the head one cell backward and reads the value under it.
///
/// Consuming a region with `peek` walks it from its right edge leftward and
/// leaves the head at the region's left boundary, so the region itself
/// survives the pass.
pub fn peek<S: Read + Seek>(tape: &mut Tape<S>) -> Result<Value, TapeError> {
    tape.prev()?;
    tape.get()
}

/// Writes the value under the head and moves one cell forward: append.
pub fn put<S: Write + Seek>(tape: &mut Tape<S>, value: Value) -> Result<(), TapeError> {
    tape.set(value)?;
    tape.next()
}

/// Peeks up to `len` values into a vector. The tape order is reversed in
/// the result and the head ends at the leftmost value taken.
fn drain_into_vec<S>(tape: &mut Tape<S>, len: u64) -> Result<Vec<Value>, TapeError>
where
    S: Read + Seek,
{
    let mut values = Vec::with_capacity(len as usize);
    let mut pending = len;
    while !tape.is_begin() && pending > 0 {
        values.push(peek(tape)?);
        pending -= 1;
    }
    return Ok(values);
}

/// Puts the values on the tape in slice order; the head ends after the
/// last one.
fn write_slice<S>(tape: &mut Tape<S>, values: &[Value]) -> Result<(), TapeError>
where
    S: Write + Seek,
{
    for &value in values {
        put(tape, value)?;
    }
    return Ok(());
}

/// Splits `len` values peeked off `source` around `key`: values comparing
/// `Less` than the key are appended to `left`, the rest to `right`, and each
/// destination gets its own running [`SegmentSummary`].
///
/// `source` ends at the left boundary of the consumed region with the
/// region preserved; the destinations end after their last appended value.
/// The relative order of the values is not preserved.
pub fn split<S, L, R, F, G>(
    source: &mut Tape<S>,
    left: &mut Tape<L>,
    right: &mut Tape<R>,
    compare: &F,
    key: Value,
    len: u64,
    rng: &mut G,
) -> Result<(SegmentSummary, SegmentSummary), TapeError>
where
    S: Read + Seek,
    L: Write + Seek,
    R: Write + Seek,
    F: Fn(&Value, &Value) -> Ordering,
    G: Rng,
{
    let mut left_summary = SegmentSummary::new();
    let mut right_summary = SegmentSummary::new();

    for _ in 0..len {
        let value = peek(source)?;
        if compare(&value, &key) == Ordering::Less {
            put(left, value)?;
            left_summary.update(value, compare, rng);
        } else {
            put(right, value)?;
            right_summary.update(value, compare, rng);
        }
    }

    return Ok((left_summary, right_summary));
}

/// Sorts the `info.len()` values behind `current`'s head onto `out`.
///
/// All-equal segments are copied through unchanged; segments within the
/// chunk budget are drained and sorted in memory; anything else is split
/// around the segment's representative and both halves recurse with the
/// scratch roles rotated, so the freshly filled destination becomes the
/// next level's source while the drained source joins the free pool.
fn sort_impl<W, B, F, G>(
    out: &mut Tape<W>,
    current: &mut Tape<B>,
    free1: &mut Tape<B>,
    free2: &mut Tape<B>,
    info: &SegmentSummary,
    chunk_size: u64,
    compare: &F,
    rng: &mut G,
) -> Result<(), TapeError>
where
    W: Write + Seek,
    B: Read + Write + Seek,
    F: Fn(&Value, &Value) -> Ordering,
    G: Rng,
{
    if info.is_empty() {
        return Ok(());
    }

    if info.all_equal() {
        for _ in 0..info.len() {
            let value = peek(current)?;
            put(out, value)?;
        }
        return Ok(());
    }

    if info.len() <= chunk_size {
        let mut values = drain_into_vec(current, info.len())?;
        values.sort_unstable_by(|a, b| compare(a, b));
        return write_slice(out, &values);
    }

    let (left, right) = split(
        current,
        free1,
        free2,
        compare,
        info.representative(),
        info.len(),
        rng,
    )?;
    log::debug!(
        "split {} values into {} + {}",
        info.len(),
        left.len(),
        right.len()
    );

    sort_impl(out, free1, current, free2, &left, chunk_size, compare, rng)?;
    sort_impl(out, free2, current, free1, &right, chunk_size, compare, rng)?;
    return Ok(());
}

/// Sorts `input` onto `out` entirely in memory.
///
/// Every value from `input`'s head to its end is materialized, sorted with
/// `compare` and appended to `out`. `input` is left unchanged with its head
/// restored to where it started; `out`'s head ends after the last value
/// written. The sort is not stable.
pub fn sort_in_memory<R, W, F>(
    input: &mut Tape<R>,
    out: &mut Tape<W>,
    compare: F,
) -> Result<(), TapeError>
where
    R: Read + Seek,
    W: Write + Seek,
    F: Fn(&Value, &Value) -> Ordering,
{
    let mut values = Vec::with_capacity(input.remaining() as usize);
    while !input.is_end() {
        values.push(input.get()?);
        input.next()?;
    }
    input.seek(-(values.len() as i64))?;

    values.sort_unstable_by(|a, b| compare(a, b));
    return write_slice(out, &values);
}

/// Sorts `input` onto `out` through three bidirectional scratch tapes,
/// holding at most `chunk_size` values in memory at any moment.
///
/// `input` is first copied linearly onto `tmp1` while the initial
/// [`SegmentSummary`] is built, then partitioned recursively among the
/// scratch tapes. Each scratch tape must have at least as much room after
/// its head as `input` has values after its own. Afterwards `input` is
/// unchanged with its head restored, `out`'s head ends after the last value
/// written, and the scratch heads end where they started.
///
/// `rng` drives the pivot sampling; pass a seeded generator for
/// reproducible runs. The sort is not stable.
pub fn sort<R, W, B, F, G>(
    input: &mut Tape<R>,
    out: &mut Tape<W>,
    tmp1: &mut Tape<B>,
    tmp2: &mut Tape<B>,
    tmp3: &mut Tape<B>,
    chunk_size: u64,
    compare: F,
    rng: &mut G,
) -> Result<(), TapeError>
where
    R: Read + Seek,
    W: Write + Seek,
    B: Read + Write + Seek,
    F: Fn(&Value, &Value) -> Ordering,
    G: Rng,
{
    let mut info = SegmentSummary::new();
    while !input.is_end() {
        let value = input.get()?;
        input.next()?;
        put(tmp1, value)?;
        info.update(value, &compare, rng);
    }
    input.seek(-(info.len() as i64))?;

    log::debug!(
        "materialized {} values onto the scratch tape (chunk size: {})",
        info.len(),
        chunk_size
    );
    return sort_impl(out, tmp1, tmp2, tmp3, &info, chunk_size, &compare, rng);
}

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory or scratch file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuild(rayon::ThreadPoolBuildError),
    /// Tape device failure.
    Tape(TapeError),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SortError::TempDir(err) => err,
            SortError::ThreadPoolBuild(err) => err,
            SortError::Tape(err) => err,
        })
    }
}

impl fmt::Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuild(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Tape(err) => write!(f, "tape operation failed: {}", err),
        }
    }
}

/// Tape sorter builder. Provides methods for [`TapeSorter`] initialization.
#[derive(Debug, Default, Clone)]
pub struct TapeSorterBuilder {
    /// Number of threads to be used to sort in-memory data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store scratch tapes.
    tmp_dir: Option<Box<Path>>,
    /// Maximum number of values held in memory at once.
    chunk_size: u64,
    /// Latency emulation applied to scratch tapes.
    delays: DelayConfig,
    /// Fixed pivot-sampling seed.
    rng_seed: Option<u64>,
}

impl TapeSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        TapeSorterBuilder::default()
    }

    /// Sets the number of threads used to sort in-memory data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> TapeSorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets the directory scratch tapes are created in.
    pub fn with_tmp_dir(mut self, path: &Path) -> TapeSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets the maximum number of values loaded into memory at once.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> TapeSorterBuilder {
        self.chunk_size = chunk_size;
        return self;
    }

    /// Sets the latency emulation applied to scratch tapes.
    pub fn with_delays(mut self, delays: DelayConfig) -> TapeSorterBuilder {
        self.delays = delays;
        return self;
    }

    /// Fixes the pivot-sampling seed, making sorting runs reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> TapeSorterBuilder {
        self.rng_seed = Some(seed);
        return self;
    }

    /// Builds a [`TapeSorter`] instance using the provided configuration.
    pub fn build(self) -> Result<TapeSorter, SortError> {
        TapeSorter::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.chunk_size,
            self.delays,
            self.rng_seed,
        )
    }
}

/// Tape sorter front-end.
///
/// Owns the scratch-tape home (a temporary directory removed on drop, so
/// scratch files never outlive the sorter even on error paths) and a thread
/// pool for in-memory sorting. Inputs no larger than the chunk size are
/// sorted fully in memory; anything larger goes through three scratch tapes
/// created on demand with the input's remaining length as their capacity.
pub struct TapeSorter {
    /// In-memory sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory holding the scratch tapes.
    tmp_dir: tempfile::TempDir,
    /// Maximum number of values held in memory at once.
    chunk_size: u64,
    /// Latency emulation applied to scratch tapes.
    delays: DelayConfig,
    /// Fixed pivot-sampling seed.
    rng_seed: Option<u64>,
}

impl TapeSorter {
    /// Creates a new tape sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort in-memory data in parallel.
    ///   If the parameter is [`None`] threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store scratch tapes. If the parameter is [`None`]
    ///   default OS temporary directory will be used.
    /// * `chunk_size` - Maximum number of values held in memory at once.
    /// * `delays` - Latency emulation applied to scratch tapes.
    /// * `rng_seed` - Fixed pivot-sampling seed; [`None`] seeds from entropy.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        chunk_size: u64,
        delays: DelayConfig,
        rng_seed: Option<u64>,
    ) -> Result<Self, SortError> {
        return Ok(TapeSorter {
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
            chunk_size,
            delays,
            rng_seed,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing sorting thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing sorting thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(SortError::ThreadPoolBuild)?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError> {
        let tmp_dir = match tmp_path {
            Some(tmp_path) => tempfile::tempdir_in(tmp_path),
            None => tempfile::tempdir(),
        }
        .map_err(SortError::TempDir)?;

        log::info!("storing scratch tapes under {}", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Sorts `input` onto `out` in the natural order of the values.
    pub fn sort<R, W>(&self, input: &mut Tape<R>, out: &mut Tape<W>) -> Result<(), SortError>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        self.sort_by(input, out, Value::cmp)
    }

    /// Sorts `input` onto `out` using a custom compare function.
    ///
    /// `input` ends unchanged with its head restored; `out`'s head ends
    /// after the last value written. The sort is not stable.
    pub fn sort_by<R, W, F>(
        &self,
        input: &mut Tape<R>,
        out: &mut Tape<W>,
        compare: F,
    ) -> Result<(), SortError>
    where
        R: Read + Seek,
        W: Write + Seek,
        F: Fn(&Value, &Value) -> Ordering + Sync + Send,
    {
        let pending = input.remaining();

        if pending <= self.chunk_size {
            log::debug!("sorting {} values in memory", pending);
            return self.sort_buffered(input, out, compare);
        }

        log::debug!(
            "sorting {} values through scratch tapes (chunk size: {})",
            pending,
            self.chunk_size
        );
        let mut tmp1 = self.scratch_tape(pending)?;
        let mut tmp2 = self.scratch_tape(pending)?;
        let mut tmp3 = self.scratch_tape(pending)?;

        let mut rng = self.make_rng();
        sort(
            input,
            out,
            &mut tmp1,
            &mut tmp2,
            &mut tmp3,
            self.chunk_size,
            compare,
            &mut rng,
        )
        .map_err(SortError::Tape)
    }

    fn sort_buffered<R, W, F>(
        &self,
        input: &mut Tape<R>,
        out: &mut Tape<W>,
        compare: F,
    ) -> Result<(), SortError>
    where
        R: Read + Seek,
        W: Write + Seek,
        F: Fn(&Value, &Value) -> Ordering + Sync + Send,
    {
        let mut values = Vec::with_capacity(input.remaining() as usize);
        while !input.is_end() {
            values.push(input.get().map_err(SortError::Tape)?);
            input.next().map_err(SortError::Tape)?;
        }
        input.seek(-(values.len() as i64)).map_err(SortError::Tape)?;

        self.thread_pool
            .install(|| values.par_sort_unstable_by(|a, b| compare(a, b)));

        return write_slice(out, &values).map_err(SortError::Tape);
    }

    fn scratch_tape(&self, capacity: u64) -> Result<Tape<fs::File>, SortError> {
        let file = tempfile::tempfile_in(self.tmp_dir.path()).map_err(SortError::TempDir)?;
        TapeBuilder::new()
            .with_delays(self.delays)
            .format(file, capacity)
            .map_err(SortError::Tape)
    }

    fn make_rng(&self) -> StdRng {
        match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}
