// Output formatting and display for CLI

use crate::config::GovernorConfig;
use crate::error::Result;
use crate::process::{HealthReport, ServerMetrics, ServerStatus};
use crate::service::StatusReport;
use chrono::Local;
use colored::*;
use std::path::Path;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Metric")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl Row {
    fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print one periodic status report as a table
pub fn print_status_report(report: &StatusReport) {
    let mut rows = server_rows(&report.server);
    rows.extend([
        Row::new("Restart attempts", report.restart_attempts.to_string()),
        Row::new("Queue", report.queue.queue_length.to_string()),
        Row::new("Active", report.queue.active_count.to_string()),
        Row::new(
            "Throttling",
            if report.queue.throttling {
                "yes".yellow().to_string()
            } else {
                "no".to_string()
            },
        ),
        Row::new(
            "Est. wait",
            format_duration(&Duration::from_millis(report.queue.estimated_wait_ms)),
        ),
        Row::new(
            "Requests",
            format!(
                "{} total, {} ok, {} failed, {} rejected",
                report.requests.total_requests,
                report.requests.completed,
                report.requests.failed,
                report.requests.rejected
            ),
        ),
        Row::new(
            "Avg wait / processing",
            format!(
                "{:.0}ms / {:.0}ms",
                report.requests.avg_wait_ms, report.requests.avg_processing_ms
            ),
        ),
        Row::new(
            "Throughput",
            format!("{}/min", report.requests.throughput_per_minute),
        ),
        Row::new(
            "Memory / CPU",
            format!(
                "{:.1}% / {:.1}%",
                report.performance.avg_memory_percent, report.performance.avg_cpu_percent
            ),
        ),
        Row::new("Alerts", alert_count(report.alert_count)),
    ]);

    println!(
        "\n{} {}",
        format!("[{}]", Local::now().format("%H:%M:%S")).dimmed(),
        "Governor status".bold().underline()
    );
    print_table(rows);
}

/// Print the result of a one-off probe
pub fn print_probe(base_url: &str, health: &Result<HealthReport>, metrics: Option<&ServerMetrics>) {
    println!("\n{} {}", "Probe".bold().underline(), base_url.cyan());

    let mut rows = vec![match health {
        Ok(report) => Row::new(
            "Health",
            format!(
                "{} (model {})",
                "healthy".green(),
                if report.model_loaded { "loaded" } else { "not loaded" }
            ),
        ),
        Err(e) => Row::new("Health", format!("{} ({})", "unhealthy".red().bold(), e)),
    }];

    match metrics {
        Some(metrics) => rows.extend(metric_rows(metrics)),
        None => rows.push(Row::new("Metrics", "unavailable".yellow().to_string())),
    }

    print_table(rows);
}

/// Print the effective configuration after validation
pub fn print_config_summary(path: &Path, config: &GovernorConfig) {
    print_success_msg(&format!("{} is valid", path.display()));

    let server = &config.server;
    let governor = &config.governor;
    let thresholds = &config.monitor.thresholds;

    print_table(vec![
        Row::new(
            "Command",
            format!(
                "{} {} {}",
                server.interpreter,
                server.entrypoint,
                server.args.join(" ")
            )
            .trim_end()
            .to_string(),
        ),
        Row::new("Directory", server.server_dir.display().to_string()),
        Row::new("Endpoint", server.base_url()),
        Row::new(
            "Restarts",
            format!(
                "{} attempts, {} apart",
                server.max_restart_attempts,
                format_duration(&server.restart_delay())
            ),
        ),
        Row::new(
            "Concurrency",
            format!(
                "{} active, {} queued",
                governor.max_concurrent, governor.max_queue_size
            ),
        ),
        Row::new(
            "Default timeout",
            format_duration(&governor.default_timeout()),
        ),
        Row::new(
            "Thresholds",
            format!(
                "mem {}%, cpu {}%, queue {}, response {}ms",
                thresholds.max_memory_percent,
                thresholds.max_cpu_percent,
                thresholds.max_queue_length,
                thresholds.max_response_time_ms
            ),
        ),
    ]);
}

fn server_rows(status: &ServerStatus) -> Vec<Row> {
    let state = if !status.running {
        "stopped".bright_black().to_string()
    } else if status.healthy {
        "healthy".green().to_string()
    } else {
        "unhealthy".red().bold().to_string()
    };

    let mut rows = vec![
        Row::new("Server", state),
        Row::new(
            "PID",
            status
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        Row::new(
            "Uptime",
            status
                .uptime_secs
                .map(|secs| format_duration(&Duration::from_secs(secs)))
                .unwrap_or_else(|| "-".to_string()),
        ),
    ];

    if let Some(error) = status.error.as_deref().filter(|_| status.running) {
        rows.push(Row::new("Error", error.red().to_string()));
    }

    rows
}

fn metric_rows(metrics: &ServerMetrics) -> Vec<Row> {
    let mut rows = Vec::new();

    if let Some(memory) = metrics.memory {
        rows.push(Row::new(
            "Memory",
            format!(
                "{} / {} ({:.1}%)",
                format_memory(memory.used_bytes),
                format_memory(memory.total_bytes),
                memory.percent
            ),
        ));
    }

    if let Some(cpu) = metrics.cpu {
        rows.push(Row::new(
            "CPU",
            format!("{:.1}% ({} cores)", cpu.percent, cpu.cores),
        ));
    }

    rows.push(Row::new(
        "Model",
        metrics.model_status.clone().unwrap_or_else(|| "-".to_string()),
    ));
    rows.push(Row::new("Queue", metrics.queue_length.to_string()));
    rows.push(Row::new(
        "Avg response",
        format!("{:.0}ms", metrics.avg_response_time_ms),
    ));
    rows.push(Row::new(
        "Requests",
        format!(
            "{} total, {} ok, {} failed",
            metrics.total_requests, metrics.successful_requests, metrics.failed_requests
        ),
    ));

    rows
}

fn alert_count(count: usize) -> String {
    if count == 0 {
        "0".to_string()
    } else {
        count.to_string().yellow().bold().to_string()
    }
}

fn print_table(rows: Vec<Row>) {
    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("{}", table);
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Format memory usage in human-readable format
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(512), "512B");
        assert_eq!(format_memory(2048), "2.0KB");
        assert_eq!(format_memory(2 * 1024 * 1024), "2.0MB");
        assert_eq!(format_memory(3 * 1024 * 1024 * 1024), "3.00GB");
    }

    #[test]
    fn test_server_rows_hide_error_when_stopped() {
        let rows = server_rows(&ServerStatus::not_running());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].value, "-");

        let rows = server_rows(&ServerStatus::unhealthy(
            "status 503".to_string(),
            Some(Duration::from_secs(5)),
            Some(7),
        ));
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].value, "7");
        assert_eq!(rows[2].value, "5s");
    }

    #[test]
    fn test_metric_rows_skip_missing_sections() {
        let rows = metric_rows(&ServerMetrics::default());
        assert!(rows.iter().all(|r| r.name != "Memory" && r.name != "CPU"));
        assert_eq!(rows.len(), 4);
    }
}
