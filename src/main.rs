use std::path::PathBuf;
use std::process::ExitCode;

/// Exit 0 when every unit ran (failures recorded in isolation), 1 on a
/// fatal setup failure that prevented any unit from running.
#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    match cvs_promo_crawler_lib::run(config_path).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
