//! transmux binary entry point

use clap::Parser;

use transmux::cli::{commands, Cli};
use transmux::utils::logging;

fn main() {
    let log = logging::init();
    let cli = Cli::parse();
    let code = commands::run(cli, log);
    std::process::exit(code);
}
