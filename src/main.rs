use clap::Parser;

use quarry::app::{self, Cli};

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::INFO } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = std::time::Instant::now();
    match app::run(cli) {
        Ok(summary) => {
            let elapsed = start.elapsed();
            tracing::info!(
                "Done! Wrote {} features in {:.2}s ({} dropped duplicates)",
                summary.rows_written,
                elapsed.as_secs_f64(),
                summary.duplicates_dropped
            );
            std::process::ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("{err}");
            std::process::ExitCode::from(err.exit_code() as u8)
        }
    }
}
