use std::process::ExitCode;

fn main() -> ExitCode {
    custody_cli::run()
}
