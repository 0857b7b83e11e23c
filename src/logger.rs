use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;

use crate::config::KernelConfig;

const DEFAULT_LOG_FILE: &str = "actor.log";

/// Initializes the global logger from a `KernelConfig`.
///
/// This should be called once at actor startup, before the kernel
/// dispatcher thread is spawned. Level is controlled by `config.log_level`
/// (falling back to `RUST_LOG`, then `info`); `log_retain`/`log_file_size`
/// are accepted for parity with the external Configuration interface but
/// fern's single-file sink here does not rotate — an actor that needs
/// rotation should swap the file sink for one that does.
pub fn init(config: &KernelConfig) {
    if let Err(e) = fs::create_dir_all(&config.log_directory) {
        eprintln!("Failed to create log directory at '{}': {}", config.log_directory, e);
    }

    let log_file_path = format!("{}/{}", config.log_directory, DEFAULT_LOG_FILE);

    let log_level = config
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    let log_level_filter = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

    let base_config = Dispatch::new()
        .level(log_level_filter)
        .level_for("serde_json", LevelFilter::Warn)
        .level_for("uuid", LevelFilter::Warn);

    let console_config = Dispatch::new()
        .format(|out, message, record| {
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let file_config = Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{} {} {}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), record.level(), record.target(), message))
        })
        .chain(fern::log_file(&log_file_path).unwrap_or_else(|e| {
            eprintln!("Failed to open log file '{}': {}", log_file_path, e);
            fern::log_file("/dev/stderr").expect("Failed to open stderr as fallback")
        }));

    base_config.chain(console_config).chain(file_config).apply().unwrap_or_else(|e| {
        eprintln!("Failed to apply logger configuration: {}", e);
    });

    log::info!("Logger initialized at level {:?}, writing to '{}'.", log_level_filter, log_file_path);
}
