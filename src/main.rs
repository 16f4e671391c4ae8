fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = trialtrack_lib::run(std::env::args().nth(1)) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
