fn run() -> Result<(), abt::error::Error> {
    // `--help --markdown` territory; handled before clap sees the args
    if std::env::args().any(|arg| arg == "--markdown") {
        print!("{}", abt::cli::markdown_help());
        return Ok(());
    }

    let matches = abt::cli::parse_flags();
    match matches.subcommand() {
        ("ls", Some(cmd)) => abt::commands::run_ls(cmd),
        ("rewrap", Some(cmd)) => abt::commands::run_rewrap(cmd),
        ("split", Some(cmd)) => abt::commands::run_split(cmd),
        ("merge", Some(cmd)) => abt::commands::run_merge(cmd),
        ("unwrap", Some(cmd)) => abt::commands::run_unwrap(cmd),
        ("wrap", Some(cmd)) => abt::commands::run_wrap(cmd),
        _ => Err(abt::error::Error::CliInputError("no subcommand specified".to_string())),
    }
}

fn main() {
    // exit code 1 for user errors, 2 for bugs
    match std::panic::catch_unwind(run) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            eprintln!("abt: {}", err);
            std::process::exit(1);
        }
        Err(_) => std::process::exit(2),
    }
}
