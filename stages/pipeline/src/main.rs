use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::process::ExitCode;

mod result;
mod runner;

fn main() -> ExitCode {
    if let Err(e) = SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
    {
        eprintln!("cannot initialise logger: {e}");
    }

    match runner::run() {
        Ok(result) => {
            result.analyze();
            if result.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
