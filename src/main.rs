fn setup_environment() {
    std::env::remove_var("PYTHONHOME");
    std::env::remove_var("PYTHONPATH");
}

fn main() {
    setup_environment();
    if let Err(e) = relayget_lib::run() {
        eprintln!("relayget: {:#}", e);
        std::process::exit(1);
    }
}
