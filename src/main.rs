fn main() {
    if let Err(err) = order_schema_probe::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
