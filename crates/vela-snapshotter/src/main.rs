use std::process;

fn main() {
    process::exit(vela_snapshotter::cli::run(std::env::args_os()));
}
