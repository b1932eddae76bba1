// src/main.rs

use rundag::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    if let Err(e) = logging::init_logging(args.log_level) {
        eprintln!("failed to initialise logging: {e}");
        std::process::exit(2);
    }

    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("rundag: {e:#}");
            std::process::exit(2);
        }
    }
}
