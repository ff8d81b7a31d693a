use std::io::Cursor;

use env_logger;
use log;

use tape_sort::{put, TapeBuilder, TapeSorterBuilder};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    // 100 cells in worst-case order, on an in-memory stream.
    let values: Vec<i32> = (0..100).rev().collect();

    let mut input = TapeBuilder::new()
        .format(Cursor::new(Vec::new()), values.len() as u64)
        .unwrap();
    for &value in &values {
        put(&mut input, value).unwrap();
    }
    input.seek(-(values.len() as i64)).unwrap();

    let mut output = TapeBuilder::new()
        .format(Cursor::new(Vec::new()), values.len() as u64)
        .unwrap();

    let sorter = TapeSorterBuilder::new()
        .with_chunk_size(16)
        .build()
        .unwrap();

    sorter.sort(&mut input, &mut output).unwrap();

    output.seek(-(values.len() as i64)).unwrap();
    while !output.is_end() {
        println!("{}", output.get().unwrap());
        output.next().unwrap();
    }
}
