//! Status command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use matview_core::health::HealthReport;

/// Show status and health.
pub async fn run(url: &str, metrics_url: &str) -> Result<()> {
    println!("Checking health at {}...\n", url);

    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    match client.get(&health_url).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthReport>().await {
                Ok(health) => {
                    print_health_status(&health, status_code.as_u16());
                }
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the matview pipeline running?");
            println!("Start it with: matview run --config <path-to-config>");
            return Ok(());
        }
    }

    let metrics_url = format!("{}/metrics", metrics_url.trim_end_matches('/'));
    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(())
}

fn status_marker(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthReport, status_code: u16) {
    let status = health.status.as_str();
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_marker(status),
        status.to_uppercase(),
        status_code
    );
    println!(
        "Pipeline: {} (uptime {}s)",
        if health.pipeline_running { "running" } else { "stopped" },
        health.uptime_seconds
    );
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, component) in &health.components {
            let marker = status_marker(&component.status);
            match &component.message {
                Some(msg) => println!("  {} {}: {} ({})", marker, name, component.status, msg),
                None => println!("  {} {}: {}", marker, name, component.status),
            }
        }
    }
}

/// One parsed sample: metric name, topic label (if any) and value.
fn parse_sample(line: &str) -> Option<(&str, Option<&str>, f64)> {
    let (series, value) = line.rsplit_once(' ')?;
    let value = value.parse::<f64>().ok()?;

    match series.split_once('{') {
        Some((name, labels)) => {
            let topic = labels
                .trim_end_matches('}')
                .split(',')
                .find_map(|label| label.strip_prefix("topic=\""))
                .map(|t| t.trim_end_matches('"'));
            Some((name, topic, value))
        }
        None => Some((series, None, value)),
    }
}

fn print_metrics(metrics_text: &str) {
    let mut per_topic: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();
    let mut global: BTreeMap<&str, f64> = BTreeMap::new();

    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }
        let Some((name, topic, value)) = parse_sample(line) else {
            continue;
        };
        let Some(short) = name.strip_prefix("matview_") else {
            continue;
        };
        match topic {
            Some(topic) => {
                per_topic.entry(topic).or_default().insert(short, value);
            }
            None => {
                global.insert(short, value);
            }
        }
    }

    if let Some(v) = global.get("reference_records") {
        println!("Reference Records: {}", format_number(*v as u64));
    }
    if let Some(v) = global.get("reference_rows_discarded") {
        println!("Reference Rows Skipped: {}", v);
    }

    for (topic, values) in &per_topic {
        println!("\nTable {}:", topic);
        let rows = [
            ("view_size", "Keys"),
            ("records_applied_total", "Records Applied"),
            ("tombstones_total", "Tombstones"),
            ("duplicates_skipped_total", "Duplicates Skipped"),
            ("deserialization_errors_total", "Decode Errors"),
            ("commits_total", "Commits"),
        ];
        for (metric, label) in rows {
            if let Some(v) = values.get(metric) {
                println!("  {:<20}{}", format!("{}:", label), format_number(*v as u64));
            }
        }
    }

    if global.is_empty() && per_topic.is_empty() {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_with_topic() {
        let sample = parse_sample(r#"matview_view_size{topic="sales"} 42"#).unwrap();
        assert_eq!(sample, ("matview_view_size", Some("sales"), 42.0));
    }

    #[test]
    fn test_parse_sample_without_labels() {
        let sample = parse_sample("matview_reference_records 3").unwrap();
        assert_eq!(sample, ("matview_reference_records", None, 3.0));
        assert!(parse_sample("garbage").is_none());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.50K");
        assert_eq!(format_number(2_000_000), "2.00M");
    }
}
