fn main() {
    if let Err(error) = jsoniq_cli::run() {
        // run() installs the subscriber right after parsing the arguments.
        tracing::error!("{error:#}");
        std::process::exit(1);
    }
}
