fn main() {
    if let Err(err) = dossier_cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
