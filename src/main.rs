//! assetscan - network device discovery and liveness tracking CLI

use assetscan::{AppContext, init_logging, run_with_ctrl_c};

#[tokio::main]
async fn main() {
    if let Err(e) = init_logging() {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    let context = AppContext::from_env();
    if let Err(e) = run_with_ctrl_c(std::env::args(), &context).await {
        assetscan::log_error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
