fn main() {
    if let Err(e) = doseguard::run() {
        eprintln!("doseguard failed to start: {e}");
        std::process::exit(1);
    }
}
