use std::process;
use std::sync::Arc;

use clap::ArgEnum;
use env_logger;
use log;

use tape_sort::config::DEFAULT_CONFIG_FILE;
use tape_sort::{Configuration, FileTape, SortError, TapeSorter, TempFileTapeProvider};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let config_path = arg_parser.value_of("config").unwrap_or(DEFAULT_CONFIG_FILE);
    let config = Configuration::from_file(config_path);

    let order: Order = arg_parser.value_of_t_or_exit("order");
    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");

    let result = match order {
        Order::Asc => run_sort(&config, input, output, |a: &i64, b: &i64| a < b),
        Order::Desc => run_sort(&config, input, output, |a: &i64, b: &i64| a > b),
    };

    if let Err(err) = result {
        log::error!("sorting failed: {}", err);
        process::exit(1);
    }
}

fn run_sort<C>(
    config: &Configuration,
    input: &str,
    output: &str,
    comparator: C,
) -> Result<(), SortError>
where
    C: Fn(&i64, &i64) -> bool + Copy + Send + Sync + 'static,
{
    let mut input_tape = FileTape::<i64>::open_read_only(config, input)?;
    let mut output_tape = FileTape::<i64>::new(config, output)?;

    let provider = Arc::new(TempFileTapeProvider::new(config)?);
    let sorter = TapeSorter::new(config, provider, comparator)?;

    sorter.sort(&mut input_tape, &mut output_tape)
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

#[derive(Copy, Clone, clap::ArgEnum)]
enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Order::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Order as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("tape-sort")
        .about("parallel external tape sorter")
        .arg(
            clap::Arg::new("input")
                .help("tape file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .help("result tape file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("order")
                .help("sorting order")
                .takes_value(true)
                .default_value("asc")
                .possible_values(Order::possible_values()),
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
                .help("configuration file")
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
