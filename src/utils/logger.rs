use std::io::Write;

use env_logger::{Builder, Env};
use log::LevelFilter;

const DEFAULT_FILTER: &str = "warn,narration_sync=info";
const VERBOSE_FILTER: &str = "warn,narration_sync=debug";

/// Инициализация логгера CLI, `RUST_LOG` имеет приоритет над `verbose`
pub fn init_logger(verbose: u8) {
    let default_filter = if verbose > 0 { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let env = Env::default().filter_or("RUST_LOG", default_filter);

    let mut builder = Builder::from_env(env);
    builder
        .filter_module("hyper", LevelFilter::Error)
        .filter_module("mio", LevelFilter::Error)
        .filter_module("symphonia", LevelFilter::Warn)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr);

    if verbose > 1 {
        builder.filter_module("narration_sync", LevelFilter::Trace);
    }

    if let Err(e) = builder.try_init() {
        eprintln!("Logger already initialized: {}", e);
    }
}
