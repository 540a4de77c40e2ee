fn main() {
    if let Err(err) = tabvault::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
