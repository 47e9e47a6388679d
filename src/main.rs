use clap::Parser;
use log::error;

mod args;
mod etl;

fn main() {
    let parsed = args::Args::parse();
    let default_level = if parsed.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = etl::run_import(&parsed) {
        error!("{}", e);
        eprintln!("An error occured: {}", e);
        let code = match e.as_ref() {
            etl::EtlError::QuotaExhausted {} => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}
