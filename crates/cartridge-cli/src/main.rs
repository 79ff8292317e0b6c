use std::process::ExitCode;

fn main() -> ExitCode {
    cartridge_cli::run()
}
