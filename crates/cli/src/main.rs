use std::process::ExitCode;

fn main() -> ExitCode {
    shelfmatch_cli::run()
}
