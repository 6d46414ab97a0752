use std::path::{
    Path,
    PathBuf,
};

use bytes::Bytes;
use clap::{
    Parser,
    Subcommand,
    ValueEnum,
};
use color_eyre::eyre::Error;
use futures_util::TryStreamExt;
use serde::Deserialize;
use sx128x_spi::{
    BusEvent,
    BusEventKind,
    Decoder,
    RECORD_TYPES,
    Record,
    Timestamp,
    Transfer,
    capture,
};
use tokio::{
    fs::File,
    io::BufReader,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Decode { file, format } => {
            match format {
                Format::Jsonl => {
                    let file = File::open(&file).await?;
                    let mut records =
                        capture::DecodeStream::new(capture::Reader::new(BufReader::new(file)));
                    while let Some(record) = records.try_next().await? {
                        print_record(&record);
                    }
                }
                Format::Csv => {
                    let events = read_csv(&file)?;
                    tracing::debug!(num_events = events.len(), "csv capture loaded");
                    let mut decoder = Decoder::new();
                    for event in &events {
                        if let Some(record) = decoder.decode(event) {
                            print_record(&record);
                        }
                    }
                }
            }
        }
        Command::RecordTypes => {
            for record_type in &RECORD_TYPES {
                println!("{}: {}", record_type.name, record_type.field);
            }
        }
    }

    Ok(())
}

#[derive(Debug, Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode an exported SPI capture and print one line per record.
    Decode {
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Jsonl)]
        format: Format,
    },
    /// Print the result types a host display layer would register.
    RecordTypes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Jsonl,
    Csv,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Jsonl => f.write_str("jsonl"),
            Format::Csv => f.write_str("csv"),
        }
    }
}

fn print_record(record: &Record) {
    match record {
        Record::Transaction {
            start,
            end,
            description,
        } => println!("{start} {end} {description}"),
        Record::Error {
            start,
            end,
            error_info,
        } => println!("{start} {end} ERROR: {error_info}"),
    }
}

/// Saleae-style CSV export row. Times are seconds, payload cells are hex
/// byte strings with an optional `0x` prefix.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "type")]
    kind: String,
    start_time: f64,
    duration: f64,
    #[serde(default)]
    mosi: Option<String>,
    #[serde(default)]
    miso: Option<String>,
}

impl CsvRow {
    fn into_event(self) -> Result<BusEvent, Error> {
        let CsvRow {
            kind,
            start_time,
            duration,
            mosi,
            miso,
        } = self;

        let kind = if kind == "enable" {
            BusEventKind::Enable
        }
        else if kind == "result" {
            BusEventKind::Transfer(Transfer {
                mosi: parse_payload(mosi.as_deref().unwrap_or_default())?,
                miso: parse_payload(miso.as_deref().unwrap_or_default())?,
            })
        }
        else if kind == "disable" {
            BusEventKind::Disable
        }
        else if kind == "error" {
            BusEventKind::Error
        }
        else {
            BusEventKind::Other(kind)
        };

        Ok(BusEvent {
            kind,
            start: Timestamp::from_secs(start_time),
            end: Timestamp::from_secs(start_time + duration),
        })
    }
}

fn parse_payload(cell: &str) -> Result<Bytes, Error> {
    let cell = cell.trim();
    let cell = cell.strip_prefix("0x").unwrap_or(cell);
    if cell.len() % 2 == 1 {
        // single-digit cells like 0x3 are common in exports
        let mut padded = String::with_capacity(cell.len() + 1);
        padded.push('0');
        padded.push_str(cell);
        Ok(Bytes::from(hex::decode(&padded)?))
    }
    else {
        Ok(Bytes::from(hex::decode(cell)?))
    }
}

fn read_csv(path: &Path) -> Result<Vec<BusEvent>, Error> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut events = vec![];
    for row in reader.deserialize::<CsvRow>() {
        events.push(row?.into_event()?);
    }
    Ok(events)
}
