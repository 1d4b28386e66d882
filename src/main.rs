use clap::Parser;
use decaf::cmd::{self, Cli};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = cmd::run(cli) {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
