fn main() {
    if let Err(err) = report_mirror::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
