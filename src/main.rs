use std::fs;
use std::path::Path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use tape_sort::{DelayConfig, TapeBuilder, TapeSorterBuilder, CELL_BYTES};

const DEFAULT_CONFIG_PATH: &str = "config.txt";

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let input = arg_parser.value_of("input").expect("value is required");
    let input_file = match fs::File::open(input) {
        Ok(file) => file,
        Err(err) => {
            log::error!("input file opening error: {}", err);
            process::exit(1);
        }
    };

    let tape_size = match arg_parser.value_of("tape_size") {
        Some(raw) => match raw.parse::<u64>() {
            Ok(size) => size,
            Err(err) => {
                log::error!("invalid tape size, non-negative integer expected: {}", err);
                process::exit(1);
            }
        },
        None => infer_tape_size(&input_file),
    };

    let memory_limit = match arg_parser.value_of("memory_limit") {
        Some(raw) => match raw.parse::<ByteSize>() {
            Ok(size) => size.as_u64(),
            Err(err) => {
                log::error!("invalid memory limit: {}", err);
                process::exit(1);
            }
        },
        None => 0,
    };

    let config_path = arg_parser.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH);
    let delays = match DelayConfig::load(config_path) {
        Ok(delays) => delays,
        Err(err) => {
            log::error!("delay configuration error: {}", err);
            process::exit(1);
        }
    };

    let output = arg_parser.value_of("output").expect("value is required");
    let output_file = match fs::File::create(output) {
        Ok(file) => file,
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    let mut tin = match TapeBuilder::new().with_delays(delays).open(input_file, tape_size) {
        Ok(tape) => tape,
        Err(err) => {
            log::error!("input tape error: {}", err);
            process::exit(1);
        }
    };
    let mut tout = match TapeBuilder::new().with_delays(delays).open(output_file, tape_size) {
        Ok(tape) => tape,
        Err(err) => {
            log::error!("output tape error: {}", err);
            process::exit(1);
        }
    };

    let mut sorter_builder = TapeSorterBuilder::new()
        .with_chunk_size(memory_limit / CELL_BYTES)
        .with_delays(delays);
    if let Some(tmp_dir) = arg_parser.value_of("tmp_dir") {
        sorter_builder = sorter_builder.with_tmp_dir(Path::new(tmp_dir));
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = sorter.sort(&mut tin, &mut tout) {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }

    if let Err(err) = tout.flush() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }
}

fn infer_tape_size(input_file: &fs::File) -> u64 {
    let bytes = match input_file.metadata() {
        Ok(metadata) => metadata.len(),
        Err(err) => {
            log::error!("input file metadata error: {}", err);
            process::exit(1);
        }
    };

    if bytes % CELL_BYTES != 0 {
        log::warn!("input length is not a whole number of cells, the trailing bytes are discarded");
    }
    bytes / CELL_BYTES
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("tape-sort")
        .about("sorts binary integer files through emulated tape devices")
        .arg(
            clap::Arg::new("input")
                .help("file with the cells to sort")
                .required(true)
                .index(1),
        )
        .arg(
            clap::Arg::new("output")
                .help("file the sorted cells are written to")
                .required(true)
                .index(2),
        )
        .arg(
            clap::Arg::new("tape_size")
                .help("number of cells on the input tape (inferred from the file length when omitted)")
                .index(3),
        )
        .arg(
            clap::Arg::new("memory_limit")
                .help("in-memory sorting budget in bytes (accepts suffixes like 1MiB)")
                .index(4),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("config")
                .short('c')
                .long("config")
                .help("delay configuration file")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store scratch tapes")
                .takes_value(true),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
