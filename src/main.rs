// src/main.rs

use rundag::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("rundag error: {err:?}");
        std::process::exit(2);
    }

    match run(args).await {
        Ok(summary) => {
            if !summary.all_succeeded() {
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("rundag error: {err:?}");
            std::process::exit(2);
        }
    }
}
