// src/main.rs

use procwatch::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(code) => std::process::exit(exit_status(code)),
        Err(err) => {
            eprintln!("procwatch error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}

/// The child's code when it is a valid process status, otherwise 1 (e.g. for
/// `-1`, "no code available"), so a failure never reads as success.
fn exit_status(code: i32) -> i32 {
    if (0..=255).contains(&code) { code } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_passes_valid_codes_through() {
        assert_eq!(exit_status(0), 0);
        assert_eq!(exit_status(3), 3);
        assert_eq!(exit_status(128 + 15), 143);
        assert_eq!(exit_status(255), 255);
    }

    #[test]
    fn out_of_range_codes_report_failure() {
        assert_eq!(exit_status(-1), 1);
        assert_eq!(exit_status(256), 1);
    }
}
