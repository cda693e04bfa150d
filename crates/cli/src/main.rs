use std::process::ExitCode;

fn main() -> ExitCode {
    formflow_cli::run()
}
