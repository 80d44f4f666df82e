//! Colored status lines for the terminal.
//!
//! Errors go to stderr in red; success lines go to stdout in green.

use colored::*;

use crate::error::CliError;

pub fn print_error(prefix: &str, message: &str) {
    eprintln!("{}", format!("{}{}", prefix, message).red());
}

/// Problem with what the user typed.
pub fn input_error(message: &str) {
    print_error("Input error: ", message);
}

/// Problem reported by the hub or the network.
pub fn service_error(message: &str) {
    print_error("Error: ", message);
}

pub fn print_success(message: &str) {
    println!("{}", message.green());
}

/// Print an error with the prefix matching its kind.
pub fn report(error: &CliError) {
    if error.is_input_error() {
        input_error(&error.to_string());
    } else {
        service_error(&error.to_string());
    }
}
