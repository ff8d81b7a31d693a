//! Tape device emulation.
//!
//! A [`Tape`] addresses any seekable byte stream as a fixed number of
//! fixed-size cells with a head that moves one cell at a time or rewinds in
//! a single jump. Reads and writes always address the stream positionally
//! from the logical head, so the device stays correct under arbitrary seek
//! patterns even when the physical stream cursor has drifted.

use std::fmt;
use std::io;
use std::io::prelude::*;
use std::io::SeekFrom;
use std::thread;
use std::time::Duration;

use crate::config::DelayConfig;

/// Cell value stored on a tape.
pub type Value = i32;

/// On-stream size of a single cell in bytes. Cells are stored little-endian.
pub const CELL_BYTES: u64 = std::mem::size_of::<Value>() as u64;

/// Tape device error.
#[derive(Debug)]
pub enum TapeError {
    /// A positioned read, write or flush did not complete fully.
    Io(io::Error),
    /// Repositioning the underlying stream failed. The logical head has
    /// already advanced when this is raised, so the logical and physical
    /// positions may disagree until the next successful [`Tape::seek`],
    /// [`Tape::next`] or [`Tape::prev`].
    Seek(io::Error),
}

impl std::error::Error for TapeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(match &self {
            TapeError::Io(err) => err,
            TapeError::Seek(err) => err,
        })
    }
}

impl fmt::Display for TapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            TapeError::Io(err) => write!(f, "tape I/O operation failed: {}", err),
            TapeError::Seek(err) => write!(f, "tape repositioning failed: {}", err),
        }
    }
}

/// Tape builder. Provides methods for [`Tape`] initialization.
#[derive(Debug, Default, Clone)]
pub struct TapeBuilder {
    position: u64,
    offset: u64,
    delays: DelayConfig,
}

impl TapeBuilder {
    /// Creates a builder with default parameters: head at cell 0, cell 0 at
    /// byte 0 of the stream, no latency emulation.
    pub fn new() -> Self {
        TapeBuilder::default()
    }

    /// Sets the starting head position, in cells.
    pub fn with_position(mut self, position: u64) -> TapeBuilder {
        self.position = position;
        return self;
    }

    /// Sets the byte offset into the stream where cell 0 begins.
    pub fn with_offset(mut self, offset: u64) -> TapeBuilder {
        self.offset = offset;
        return self;
    }

    /// Sets the per-operation latency emulation.
    pub fn with_delays(mut self, delays: DelayConfig) -> TapeBuilder {
        self.delays = delays;
        return self;
    }

    /// Wraps `stream` as a tape of `capacity` cells without touching its
    /// contents. The stream is repositioned to the head's byte offset.
    ///
    /// # Panics
    ///
    /// Panics if the configured position exceeds `capacity` or the byte
    /// layout does not fit in `u64`.
    pub fn open<S: Seek>(self, mut stream: S, capacity: u64) -> Result<Tape<S>, TapeError> {
        assert!(
            self.position <= capacity,
            "tape head starts outside of [0, capacity]"
        );
        layout_end(self.offset, capacity);

        stream
            .seek(SeekFrom::Start(self.offset + self.position * CELL_BYTES))
            .map_err(TapeError::Seek)?;

        return Ok(Tape {
            stream,
            position: self.position,
            capacity,
            offset: self.offset,
            cache: None,
            delays: self.delays,
        });
    }

    /// Like [`TapeBuilder::open`], but first zero-extends the stream up to
    /// the tape's full byte length if it is shorter, so that every in-bounds
    /// cell is physically present and reads never run past end-of-stream.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`TapeBuilder::open`].
    pub fn format<S: Write + Seek>(self, mut stream: S, capacity: u64) -> Result<Tape<S>, TapeError> {
        let end = layout_end(self.offset, capacity);
        let mut len = stream.seek(SeekFrom::End(0)).map_err(TapeError::Seek)?;

        let zeros = [0u8; 4096];
        while len < end {
            let step = ((end - len) as usize).min(zeros.len());
            stream.write_all(&zeros[..step]).map_err(TapeError::Io)?;
            len += step as u64;
        }

        self.open(stream, capacity)
    }
}

fn layout_end(offset: u64, capacity: u64) -> u64 {
    capacity
        .checked_mul(CELL_BYTES)
        .and_then(|bytes| offset.checked_add(bytes))
        .expect("tape layout overflows the addressable stream range")
}

/// Sequential-access storage device emulated over a seekable byte stream.
///
/// A tape owns exactly one stream for its whole lifetime and addresses it as
/// `capacity` cells starting at a fixed byte offset. The head position is
/// always within `[0, capacity]`; the cell under the head is read with
/// [`get`](Tape::get) and overwritten with [`set`](Tape::set), and reads are
/// served from a lazy cache until the head moves.
///
/// Which operations exist is decided at compile time by the stream type:
/// `get` requires `S: Read + Seek`, `set` and `flush` require
/// `S: Write + Seek`, so a tape over a read-only stream exposes no write
/// operation at all. A bidirectional tape is simply one whose stream is both
/// readable and writable.
///
/// Every operation can carry an emulated latency, applied as a blocking
/// sleep after the operation's effect (see [`DelayConfig`]).
#[derive(Debug)]
pub struct Tape<S> {
    stream: S,
    position: u64,
    capacity: u64,
    offset: u64,
    cache: Option<Value>,
    delays: DelayConfig,
}

impl<S: Seek> Tape<S> {
    /// Wraps `stream` as a tape of `capacity` cells with default layout and
    /// no latency emulation. See [`TapeBuilder`] for the full set of knobs.
    pub fn new(stream: S, capacity: u64) -> Result<Self, TapeError> {
        TapeBuilder::new().open(stream, capacity)
    }

    /// Whether the head is at cell 0.
    pub fn is_begin(&self) -> bool {
        self.position == 0
    }

    /// Whether the head is one past the last cell.
    pub fn is_end(&self) -> bool {
        self.position == self.capacity
    }

    /// Current head position, in cells.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fixed cell count, set at construction.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of cells between the head and the end of the tape.
    pub fn remaining(&self) -> u64 {
        self.capacity - self.position
    }

    /// Moves the head by `diff` cells (negative moves backward) and
    /// repositions the underlying stream accordingly.
    ///
    /// The read cache is invalidated unless `diff` is zero. Costs
    /// `rewind_delay + rewind_step_delay * |diff|`, saturating instead of
    /// wrapping. On a [`TapeError::Seek`] failure the logical head has
    /// already moved; see [`TapeError`] for the recovery rule.
    ///
    /// # Panics
    ///
    /// Panics if the move would leave `[0, capacity]`.
    pub fn seek(&mut self, diff: i64) -> Result<(), TapeError> {
        self.reposition(diff)?;
        self.pause(
            self.delays
                .rewind_delay
                .saturating_add(self.delays.rewind_step_delay.saturating_mul(diff.unsigned_abs())),
        );
        return Ok(());
    }

    /// Moves the head one cell forward. Same contract as [`Tape::seek`]
    /// with a diff of 1, but costs the single-step `next_delay` instead of
    /// the rewind formula.
    pub fn next(&mut self) -> Result<(), TapeError> {
        self.reposition(1)?;
        self.pause(self.delays.next_delay);
        return Ok(());
    }

    /// Moves the head one cell backward. Counterpart of [`Tape::next`].
    pub fn prev(&mut self) -> Result<(), TapeError> {
        self.reposition(-1)?;
        self.pause(self.delays.next_delay);
        return Ok(());
    }

    /// Detaches and returns the underlying stream, repositioned to the byte
    /// offset of cell 0. Pending writes are not flushed; callers needing
    /// durability flush before releasing.
    pub fn release(mut self) -> Result<S, TapeError> {
        self.stream
            .seek(SeekFrom::Start(self.offset))
            .map_err(TapeError::Seek)?;
        return Ok(self.stream);
    }

    fn reposition(&mut self, diff: i64) -> Result<(), TapeError> {
        let position = match self.position.checked_add_signed(diff) {
            Some(position) if position <= self.capacity => position,
            _ => panic!(
                "tape head moved outside of [0, capacity]: position {}, diff {}",
                self.position, diff
            ),
        };

        if diff != 0 {
            self.cache = None;
        }
        self.position = position;

        self.stream
            .seek(SeekFrom::Start(self.byte_offset(position)))
            .map_err(TapeError::Seek)?;
        return Ok(());
    }

    fn byte_offset(&self, position: u64) -> u64 {
        self.offset + position * CELL_BYTES
    }

    fn pause(&self, nanos: u64) {
        if nanos > 0 {
            thread::sleep(Duration::from_nanos(nanos));
        }
    }
}

impl<S: Read + Seek> Tape<S> {
    /// Reads the cell under the head.
    ///
    /// The first read at a position goes to the device; repeated reads at
    /// the same position are served from the cache and cost nothing. The
    /// configured `read_delay` is applied after every device read.
    ///
    /// # Panics
    ///
    /// Panics if the head is at the end of the tape.
    pub fn get(&mut self) -> Result<Value, TapeError> {
        assert!(!self.is_end(), "reading past the end of the tape");

        if let Some(value) = self.cache {
            return Ok(value);
        }

        let mut cell = [0u8; CELL_BYTES as usize];
        self.stream
            .seek(SeekFrom::Start(self.byte_offset(self.position)))
            .map_err(TapeError::Seek)?;
        self.stream.read_exact(&mut cell).map_err(TapeError::Io)?;

        let value = Value::from_le_bytes(cell);
        self.cache = Some(value);
        self.pause(self.delays.read_delay);
        return Ok(value);
    }
}

impl<S: Write + Seek> Tape<S> {
    /// Overwrites the cell under the head and updates the read cache. The
    /// configured `write_delay` is applied after the write.
    ///
    /// # Panics
    ///
    /// Panics if the head is at the end of the tape.
    pub fn set(&mut self, value: Value) -> Result<(), TapeError> {
        assert!(!self.is_end(), "writing past the end of the tape");

        self.stream
            .seek(SeekFrom::Start(self.byte_offset(self.position)))
            .map_err(TapeError::Seek)?;
        self.stream
            .write_all(&value.to_le_bytes())
            .map_err(TapeError::Io)?;

        self.cache = Some(value);
        self.pause(self.delays.write_delay);
        return Ok(());
    }

    /// Forces the underlying stream to persist buffered writes.
    pub fn flush(&mut self) -> Result<(), TapeError> {
        self.stream.flush().map_err(TapeError::Io)
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
    use std::time::Instant;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::*;

    use super::{Tape, TapeBuilder, TapeError, Value, CELL_BYTES};
    use crate::config::DelayConfig;
    use crate::sort::{peek, put};

    const N: u64 = 100;

    /// Stream wrapper that forwards writes and seeks but implements no read
    /// at all, so the tape over it has no `get` method.
    struct WriteOnly<S>(S);

    impl<S: Write> Write for WriteOnly<S> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    impl<S: Seek> Seek for WriteOnly<S> {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    fn memory_tape(capacity: u64) -> Tape<Cursor<Vec<u8>>> {
        TapeBuilder::new().format(Cursor::new(Vec::new()), capacity).unwrap()
    }

    fn gen_values(len: usize, rng: &mut StdRng) -> Vec<Value> {
        (0..len).map(|_| rng.gen()).collect()
    }

    fn as_bytes(values: &[Value]) -> Vec<u8> {
        values.iter().flat_map(|value| value.to_le_bytes()).collect()
    }

    fn fill<S: Write + Seek>(tape: &mut Tape<S>, values: &[Value]) {
        assert!(tape.is_begin());
        for &value in values {
            put(tape, value).unwrap();
        }
        assert!(tape.is_end());
    }

    fn expect_equals<S: Read + Seek>(tape: &mut Tape<S>, values: &[Value]) {
        assert!(tape.is_end());
        for &value in values.iter().rev() {
            assert_eq!(peek(tape).unwrap(), value);
        }
        assert!(tape.is_begin());
    }

    #[test]
    fn test_begin_end_walk() {
        let mut tape = memory_tape(N);

        for i in 0..N {
            assert_eq!(tape.is_begin(), i == 0);
            assert_eq!(tape.is_end(), false);
            tape.next().unwrap();
        }
        assert_eq!(tape.is_begin(), false);
        assert_eq!(tape.is_end(), true);

        for i in 0..N {
            assert_eq!(tape.is_begin(), false);
            assert_eq!(tape.is_end(), i == 0);
            tape.prev().unwrap();
        }
        assert_eq!(tape.is_begin(), true);
        assert_eq!(tape.is_end(), false);
    }

    #[rstest]
    #[case(0)]
    #[case(24)]
    fn test_get_reads_existing_cells(#[case] offset: u64) {
        let mut rng = StdRng::seed_from_u64(1);
        let values = gen_values(N as usize, &mut rng);

        let mut bytes = vec![0u8; offset as usize];
        bytes.extend(as_bytes(&values));

        let mut tape = TapeBuilder::new()
            .with_offset(offset)
            .with_position(N)
            .open(Cursor::new(bytes), N)
            .unwrap();

        expect_equals(&mut tape, &values);
    }

    #[test]
    fn test_read_only_stream() {
        let mut rng = StdRng::seed_from_u64(2);
        let values = gen_values(N as usize, &mut rng);
        let bytes = as_bytes(&values);

        // Cursor<&[u8]> has no Write impl, so this tape has no set().
        let mut tape = TapeBuilder::new()
            .with_position(N)
            .open(Cursor::new(bytes.as_slice()), N)
            .unwrap();

        expect_equals(&mut tape, &values);
    }

    #[test]
    fn test_write_only_stream() {
        let mut rng = StdRng::seed_from_u64(3);
        let values = gen_values(N as usize, &mut rng);

        // WriteOnly has no Read impl, so this tape has no get().
        let mut tape = TapeBuilder::new()
            .format(WriteOnly(Cursor::new(Vec::new())), N)
            .unwrap();
        fill(&mut tape, &values);

        let stream = tape.release().unwrap();
        assert_eq!(stream.0.into_inner(), as_bytes(&values));
    }

    #[test]
    fn test_round_trip() {
        let mut rng = StdRng::seed_from_u64(4);
        let values = gen_values(N as usize, &mut rng);

        let mut tape = memory_tape(N);
        fill(&mut tape, &values);
        expect_equals(&mut tape, &values);
    }

    #[test]
    fn test_release_and_rewrap() {
        let mut rng = StdRng::seed_from_u64(5);
        let values = gen_values(N as usize, &mut rng);

        let mut tape = memory_tape(N);
        fill(&mut tape, &values);

        let stream = tape.release().unwrap();
        let mut tape = TapeBuilder::new().with_position(N).open(stream, N).unwrap();
        expect_equals(&mut tape, &values);
    }

    #[test]
    fn test_format_zero_extends() {
        let mut tape = TapeBuilder::new()
            .with_offset(8)
            .format(Cursor::new(Vec::new()), 4)
            .unwrap();

        for _ in 0..4 {
            assert_eq!(tape.get().unwrap(), 0);
            tape.next().unwrap();
        }

        let stream = tape.release().unwrap();
        assert_eq!(stream.into_inner().len() as u64, 8 + 4 * CELL_BYTES);
    }

    #[test]
    fn test_format_keeps_existing_data() {
        let values = [7, -7, 7];
        let mut tape = TapeBuilder::new()
            .format(Cursor::new(as_bytes(&values)), 5)
            .unwrap();

        for &value in &values {
            assert_eq!(tape.get().unwrap(), value);
            tape.next().unwrap();
        }
        for _ in values.len()..5 {
            assert_eq!(tape.get().unwrap(), 0);
            tape.next().unwrap();
        }
    }

    #[test]
    fn test_short_stream_read_fails() {
        let bytes = as_bytes(&[1]);
        let mut tape = Tape::new(Cursor::new(bytes.as_slice()), 2).unwrap();

        tape.next().unwrap();
        match tape.get() {
            Err(TapeError::Io(_)) => {}
            other => panic!("expected an I/O failure, got {:?}", other),
        }
    }

    #[test]
    fn test_random_access() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut shadow = vec![0 as Value; N as usize];
        let mut tape = memory_tape(N);

        let mut index = 0i64;
        for _ in 0..2000 {
            let target = rng.gen_range(0..N as i64);
            let diff = target - index;

            if rng.gen_bool(0.5) {
                tape.seek(diff).unwrap();
            } else {
                for _ in 0..diff.abs() {
                    if diff > 0 {
                        tape.next().unwrap();
                    } else {
                        tape.prev().unwrap();
                    }
                }
            }
            index = target;

            assert_eq!(tape.get().unwrap(), shadow[target as usize]);
            let value = rng.gen();
            shadow[target as usize] = value;
            tape.set(value).unwrap();
            assert_eq!(tape.get().unwrap(), value);
        }
    }

    #[test]
    fn test_file_backed_tape() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = gen_values(N as usize, &mut rng);

        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let mut tape = TapeBuilder::new()
                .format(file.reopen().unwrap(), N)
                .unwrap();
            fill(&mut tape, &values);
            tape.flush().unwrap();
        }

        let mut tape = TapeBuilder::new()
            .with_position(N)
            .open(file.reopen().unwrap(), N)
            .unwrap();
        expect_equals(&mut tape, &values);
    }

    #[test]
    fn test_zero_capacity() {
        let tape = memory_tape(0);
        assert!(tape.is_begin());
        assert!(tape.is_end());
    }

    #[test]
    #[should_panic(expected = "reading past the end")]
    fn test_get_at_end_panics() {
        let mut tape = memory_tape(1);
        tape.next().unwrap();
        let _ = tape.get();
    }

    #[test]
    #[should_panic(expected = "outside of [0, capacity]")]
    fn test_seek_out_of_bounds_panics() {
        let mut tape = memory_tape(1);
        tape.seek(2).unwrap();
    }

    #[test]
    fn test_step_delay_lower_bound() {
        let delays = DelayConfig {
            next_delay: 2_000_000, // 2ms
            ..DelayConfig::default()
        };
        let mut tape = TapeBuilder::new()
            .with_delays(delays)
            .format(Cursor::new(Vec::new()), 10)
            .unwrap();

        let start = Instant::now();
        for _ in 0..10 {
            tape.next().unwrap();
        }
        assert!(start.elapsed().as_millis() >= 20);
    }

    #[test]
    fn test_rewind_delay_formula_lower_bound() {
        let delays = DelayConfig {
            rewind_delay: 5_000_000,      // 5ms
            rewind_step_delay: 1_000_000, // 1ms per cell
            ..DelayConfig::default()
        };
        let mut tape = TapeBuilder::new()
            .with_delays(delays)
            .format(Cursor::new(Vec::new()), 10)
            .unwrap();

        let start = Instant::now();
        tape.seek(10).unwrap();
        assert!(start.elapsed().as_millis() >= 15);
    }
}
