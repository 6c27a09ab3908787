use dotenvy::dotenv;
use log::error;
use std::process::ExitCode;

use ambassador_hub::main_module::cli::{self, EXIT_FAILURE};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match cli::parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            cli::print_usage();
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match cli::run(command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
