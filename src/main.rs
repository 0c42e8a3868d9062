//! Provides the main entry point to the program.
use human_panic::{metadata, setup_panic};
use log::error;
use nbsopt::cli::run_cli;
use nbsopt::log::is_logger_initialised;

fn main() {
    setup_panic!(metadata!().support("Please report this crash along with the model you ran."));

    if let Err(err) = run_cli() {
        if is_logger_initialised() {
            error!("{err:?}");
        } else {
            eprintln!("Error: {err:?}");
        }

        // Terminate program, signalling an error
        std::process::exit(1);
    }
}
