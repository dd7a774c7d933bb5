use anyhow::Result;
use chrono::{Datelike, Timelike};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

struct LogTimer;

impl fmt::time::FormatTime for LogTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        let cs = now.timestamp_subsec_millis() / 10;
        write!(
            w,
            "{:04}-{:02}-{:02}:{:02}:{:02}:{:02}:{:02}",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            cs
        )
    }
}

/// 初始化日志 / Initialise tracing
///
/// 读取 `logging.level`（默认 info）与 `logging.format`（compact | json）。
/// `rdkafka` 与 `redis` 通过 `log` 输出的记录经由 `LogTracer` 转发。
/// Reads `logging.level` and `logging.format`; `log` records from
/// `rdkafka`/`redis` are bridged through `LogTracer`.
pub fn init_tracing() -> Result<()> {
    let manager = crate::comm::config::get_global_config_manager().ok();
    let level: String = manager
        .as_ref()
        .and_then(|mgr| mgr.get("logging.level").ok())
        .unwrap_or_else(|| "info".to_string());
    let format: String = manager
        .as_ref()
        .and_then(|mgr| mgr.get("logging.format").ok())
        .unwrap_or_else(|| "compact".to_string());

    let filter = EnvFilter::try_new(format!("{},rdkafka=warn,sqlx=warn", level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    LogTracer::init().ok();

    let builder = fmt::SubscriberBuilder::default().with_env_filter(filter).with_timer(LogTimer);
    if format.eq_ignore_ascii_case("json") {
        builder.json().with_current_span(false).try_init().ok();
    } else {
        builder.compact().with_target(false).try_init().ok();
    }
    Ok(())
}
