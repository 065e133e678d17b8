use std::process::ExitCode;

fn main() -> ExitCode {
    ansibug::cli::run()
}
