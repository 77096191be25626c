use crate::connection::ReadError;
use crate::decode::{Reading, Value};
use crate::output;
use crate::registers::RegisterIndex;

const READING_HEADERS: [&str; 5] = ["Time", "Address", "Name", "Unit", "Value"];

#[derive(serde::Serialize)]
struct ReadingRecord {
    time: String,
    address: u16,
    name: &'static str,
    unit: &'static str,
    value: Value,
}

#[derive(serde::Serialize)]
struct FailureRecord {
    time: String,
    address: u16,
    name: &'static str,
    error: String,
}

/// Write one register's outcome to the sink: a row per reading, or a single
/// row naming the failure. Timestamped so line-oriented output can feed a
/// time-series store directly.
fn emit(
    sink: &mut output::Sink,
    register: RegisterIndex,
    outcome: &Result<Vec<Reading>, ReadError>,
) -> Result<(), output::Error> {
    let time = jiff::Timestamp::now();
    match outcome {
        Ok(readings) => {
            for reading in readings {
                sink.record(
                    || {
                        vec![
                            time.to_string(),
                            format!("{:#06x}", reading.address),
                            register.name().to_string(),
                            reading.unit.to_string(),
                            reading.value.to_string(),
                        ]
                    },
                    || ReadingRecord {
                        time: time.to_string(),
                        address: reading.address,
                        name: register.name(),
                        unit: reading.unit,
                        value: reading.value,
                    },
                )?;
            }
        }
        Err(error) => {
            sink.record(
                || {
                    vec![
                        time.to_string(),
                        format!("{:#06x}", register.address()),
                        register.name().to_string(),
                        String::new(),
                        format!("error: {error}"),
                    ]
                },
                || FailureRecord {
                    time: time.to_string(),
                    address: register.address(),
                    name: register.name(),
                    error: error.to_string(),
                },
            )?;
        }
    }
    Ok(())
}

fn resolve(spec: &str) -> Option<RegisterIndex> {
    let parsed = match spec.strip_prefix("0x").or_else(|| spec.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => spec.parse(),
    };
    match parsed {
        Ok(address) => RegisterIndex::from_address(address),
        Err(_) => RegisterIndex::from_name(spec),
    }
}

pub mod registers {
    use crate::decode::Decoder;
    use crate::output;
    use crate::registers::RegisterIndex;

    /// Search and output the known device registers.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
        /// Only list registers whose name, description or address matches.
        filter: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error(transparent)]
        Output(#[from] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct RegisterSchema {
        pub address: u16,
        pub name: &'static str,
        pub decoder: Decoder,
        pub scale: Option<u32>,
        pub words: u8,
        pub description: &'static str,
    }

    impl RegisterSchema {
        fn new(register: RegisterIndex) -> Self {
            RegisterSchema {
                address: register.address(),
                name: register.name(),
                decoder: register.decoder(),
                scale: register.scale(),
                words: register.word_count(),
                description: register.description(),
            }
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_uppercase();
            self.name.to_uppercase().contains(&pattern)
                || self.description.to_uppercase().contains(&pattern)
                || format!("{:#06x}", self.address).to_uppercase().contains(&pattern)
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut sink = args.output.into_sink()?;
        sink.headers(vec!["Address", "Name", "Decoder", "Scale", "Words", "Description"])?;
        for register in RegisterIndex::all() {
            let schema = RegisterSchema::new(register);
            if let Some(pattern) = &args.filter {
                if !schema.is_match(pattern) {
                    continue;
                }
            }
            sink.record(
                || {
                    vec![
                        format!("{:#06x}", schema.address),
                        schema.name.to_string(),
                        schema.decoder.to_string(),
                        schema.scale.map(|s| s.to_string()).unwrap_or_default(),
                        schema.words.to_string(),
                        schema.description.to_string(),
                    ]
                },
                || &schema,
            )?;
        }
        sink.finish()?;
        Ok(())
    }
}

pub mod read {
    use crate::connection::{self, Connection};
    use crate::output;
    use crate::registers::RegisterIndex;

    /// Read the chosen registers from the device.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        /// Registers to read, by name or by (hex) address.
        #[arg(required = true)]
        registers: Vec<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("{0:?} does not name a known register")]
        UnknownRegister(String),
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error(transparent)]
        Connection(#[from] connection::Error),
        #[error(transparent)]
        Output(#[from] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let chosen = args
            .registers
            .iter()
            .map(|spec| super::resolve(spec).ok_or_else(|| Error::UnknownRegister(spec.clone())))
            .collect::<Result<Vec<RegisterIndex>, Error>>()?;
        let mut sink = args.output.into_sink()?;
        sink.headers(super::READING_HEADERS.to_vec())?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(async {
            let mut connection = Connection::open(&args.connection)?;
            for register in chosen {
                let outcome = connection.query(register).await?;
                super::emit(&mut sink, register, &outcome)?;
            }
            Ok::<_, Error>(())
        })?;
        sink.finish()?;
        Ok(())
    }
}

pub mod poll {
    use futures::StreamExt as _;

    use crate::connection::{self, Connection};
    use crate::output;

    /// Poll every known register, in ascending address order.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        /// Keep polling, sleeping this long between passes.
        #[arg(long)]
        interval: Option<humantime::Duration>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error(transparent)]
        Connection(#[from] connection::Error),
        #[error(transparent)]
        Output(#[from] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut sink = args.output.into_sink()?;
        sink.headers(super::READING_HEADERS.to_vec())?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(async {
            let mut connection = Connection::open(&args.connection)?;
            loop {
                {
                    let mut pass = std::pin::pin!(connection.poll_all());
                    while let Some(record) = pass.next().await {
                        let record = record?;
                        super::emit(&mut sink, record.register, &record.outcome)?;
                    }
                }
                match &args.interval {
                    Some(interval) => tokio::time::sleep(**interval).await,
                    None => break,
                }
            }
            Ok::<_, Error>(())
        })?;
        sink.finish()?;
        Ok(())
    }
}
