use clap::{CommandFactory, Parser};

use crate::cli::{Cli, TopLevel, DecompileCommand, DecompileModeCli};

mod cli;

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(TopLevel::Decompile { command }) => match command {
            DecompileCommand::File { path, mode, indent } => {
                let mode = match mode {
                    DecompileModeCli::Source => depyo_lib::DecompileMode::Source,
                    DecompileModeCli::Disasm => depyo_lib::DecompileMode::Disasm,
                };
                match std::fs::read_to_string(&path) {
                    Ok(json) => {
                        let result = depyo_lib::code_object_from_json(&json).and_then(|obj| {
                            depyo_lib::decompile_module_with_options(
                                obj,
                                depyo_lib::DecompileOptions { mode, indent },
                            )
                        });
                        match result {
                            Ok(out) => {
                                print!("{out}");
                            }
                            Err(e) => {
                                eprintln!("decompile error: {e}");
                                std::process::exit(1);
                            }
                        }
                    }
                    Err(e) => {
                        eprintln!("failed to read {path:?}: {e}");
                        std::process::exit(1);
                    }
                }
            }
        },
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }
        None => {
            Cli::command().print_help().unwrap();
        }
    }
}
