use clap::Parser as _;
use mppt_commander::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about)]
enum Commands {
    Registers(commands::registers::Args),
    Read(commands::read::Args),
    Poll(commands::poll::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter_description = std::env::var("MPPT_COMMANDER_LOG").unwrap_or_default();
    let filter = filter_description
        .parse::<tracing_subscriber::filter::targets::Targets>()
        .expect("MPPT_COMMANDER_LOG must hold a valid tracing filter");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Registers(args) => end(commands::registers::run(args)),
        Commands::Read(args) => end(commands::read::run(args)),
        Commands::Poll(args) => end(commands::poll::run(args)),
    }
}
