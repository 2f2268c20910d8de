//! Command-line front-end.
//!
//! Thin wrappers over the services: every command loads configuration,
//! calls into the library and prints either a table or JSON.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands, ModeArg, TraceCommands};

/// Report a command failure and exit non-zero.
pub fn handle_error(err: &anyhow::Error, json: bool) -> ! {
    if json {
        let body = serde_json::json!({
            "error": err.to_string(),
            "causes": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        eprintln!("{body}");
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}
