fn main() {
    let args = std::env::args().collect();
    std::process::exit(keel_cli::runner::main(args));
}
