use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write the results to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

impl Args {
    pub fn into_sink(self) -> Result<Sink, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let kind = match &self.format {
            Format::Table => {
                let mut table = comfy_table::Table::new();
                table.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                SinkKind::Table { table }
            }
            Format::Jsonl => SinkKind::Jsonl,
            Format::Csv => SinkKind::Csv,
        };
        Ok(Sink { destination: self.output, io, kind })
    }
}

/// A row-oriented result sink. Tables buffer until [`Sink::finish`]; the
/// line-oriented formats stream rows out as they are produced, which is what
/// a long-running poll wants.
pub struct Sink {
    destination: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
    kind: SinkKind,
}

enum SinkKind {
    Table { table: comfy_table::Table },
    Jsonl,
    Csv,
}

impl Sink {
    pub fn headers(&mut self, headers: Vec<&'static str>) -> Result<(), Error> {
        match &mut self.kind {
            SinkKind::Table { table } => {
                table.set_header(headers);
                Ok(())
            }
            SinkKind::Jsonl => Ok(()),
            SinkKind::Csv => self.write_csv_row(&headers),
        }
    }

    /// Emit one result row. The cell and record closures are only invoked
    /// for the format that needs them.
    pub fn record<R: serde::Serialize>(
        &mut self,
        cells: impl FnOnce() -> Vec<String>,
        record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.kind {
            SinkKind::Table { table } => {
                table.add_row(cells());
                Ok(())
            }
            SinkKind::Jsonl => {
                serde_json::to_writer(&mut self.io, &record()).map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))
            }
            SinkKind::Csv => {
                let cells = cells();
                self.write_csv_row(&cells)
            }
        }
    }

    pub fn finish(mut self) -> Result<(), Error> {
        if let SinkKind::Table { table } = &self.kind {
            writeln!(self.io, "{}", table).map_err(|e| self.write_error(e))?;
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(&mut self, cells: &[V]) -> Result<(), Error> {
        // Large enough for a fully quoted field plus its surrounding quotes.
        let longest = cells.iter().map(|cell| cell.len()).max().unwrap_or(0);
        let mut buffer = vec![0; 4 + 2 * longest];
        let mut writer = csv_core::Writer::new();
        for (position, cell) in cells.iter().enumerate() {
            if position > 0 {
                let (WriteResult::InputEmpty, written) = writer.delimiter(&mut buffer) else {
                    unreachable!("csv delimiter cannot overflow the row buffer");
                };
                self.io.write_all(&buffer[..written]).map_err(|e| self.write_error(e))?;
            }
            let (result, consumed, written) = writer.field(cell.as_bytes(), &mut buffer);
            let WriteResult::InputEmpty = result else {
                unreachable!("csv field cannot overflow the row buffer");
            };
            debug_assert_eq!(consumed, cell.len());
            self.io.write_all(&buffer[..written]).map_err(|e| self.write_error(e))?;
        }
        let (WriteResult::InputEmpty, written) = writer.terminator(&mut buffer) else {
            unreachable!("csv terminator cannot overflow the row buffer");
        };
        self.io.write_all(&buffer[..written]).map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.destination {
            None => Error::WriteStdout(e),
            Some(path) => Error::WriteFile(e, path.clone()),
        }
    }
}
