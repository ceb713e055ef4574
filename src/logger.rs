use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};

/// Install the process-wide diagnostic logger. The per-job run log is
/// separate and file-based; this one is for the console.
pub fn init() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}
