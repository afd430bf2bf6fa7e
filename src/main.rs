// src/main.rs

use traind::errors::TraindError;
use traind::{cli, logging, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("traind error: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run_main() -> Result<(), TraindError> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
