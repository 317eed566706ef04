fn main() {
    if let Err(err) = lmchat::cli::main() {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}
