use std::process;
use log::error;

use pixkit::commands::{crop_cli, log_settings, Command, CropCommand};
use pixkit::utils::logger::Logger;

fn main() {
    let matches = crop_cli().get_matches();

    let (log_file, level) = log_settings(&matches);
    if let Err(e) = Logger::init_global_logger(log_file.as_deref(), level) {
        eprintln!("Error setting up global logger: {}", e);
        process::exit(1);
    }

    match CropCommand::new(&matches) {
        Ok(command) => {
            if let Err(e) = command.execute() {
                error!("Command execution error: {}", e);
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
        Err(e) => {
            error!("Failed to create command: {}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
}
