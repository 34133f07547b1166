use liftlog::error::SyncError;

fn main() {
    if let Err(err) = liftlog::cli::run() {
        eprintln!("error: {err:#}");
        let code = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<SyncError>())
            .map(SyncError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
