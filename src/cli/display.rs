//! Table rendering for cluster status and provider capabilities.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use console::style;

use crate::domain::models::cluster::ClusterStatus;
use crate::domain::ports::provider::ProviderCapabilities;
use crate::services::process_metrics::ProcessSample;

/// Colorize an agent or cluster state name.
pub fn styled_state(state: &str) -> String {
    match state {
        "running" | "idle" => style(state).green().to_string(),
        "executing" | "evaluating" | "building_context" | "initializing" => {
            style(state).yellow().to_string()
        }
        "stopping" => style(state).yellow().dim().to_string(),
        "error" => style(state).red().bold().to_string(),
        "stopped" => style(state).dim().to_string(),
        other => other.to_string(),
    }
}

/// Render the per-agent summary table for a finished or running cluster.
pub fn cluster_table(status: &ClusterStatus, samples: &[Option<ProcessSample>]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["agent", "state", "cursor", "runs", "cpu %", "rss", "last error"]);

    for (agent, sample) in status.agents.iter().zip(samples) {
        let (cpu, rss) = match sample {
            Some(s) => (format!("{:.1}", s.cpu_percent), format_bytes(s.rss_bytes)),
            None => ("-".to_string(), "-".to_string()),
        };
        table.add_row([
            Cell::new(&agent.id),
            Cell::new(styled_state(agent.state.as_str())),
            Cell::new(agent.cursor),
            Cell::new(agent.iterations),
            Cell::new(cpu),
            Cell::new(rss),
            Cell::new(agent.last_error.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

/// One-line status footer: cluster state plus per-agent states.
pub fn footer_line(status: &ClusterStatus) -> String {
    let agents = status
        .agents
        .iter()
        .map(|a| format!("{}:{}", a.id, styled_state(a.state.as_str())))
        .collect::<Vec<_>>()
        .join("  ");
    format!(
        "[{}] {} · {} msgs · {agents}",
        status.cluster_id,
        styled_state(status.state.as_str()),
        status.bus_len,
    )
}

/// Render the capability matrix for one provider.
pub fn capabilities_table(provider_id: &str, caps: &ProviderCapabilities) -> Table {
    let rows: [(&str, bool); 11] = [
        ("json", caps.supports_json),
        ("outputSchema", caps.supports_output_schema),
        ("autoApprove", caps.supports_auto_approve),
        ("cwd", caps.supports_cwd),
        ("configOverride", caps.supports_config_override),
        ("model", caps.supports_model),
        ("streamJson", caps.supports_stream_json),
        ("verbose", caps.supports_verbose),
        ("includePartials", caps.supports_include_partials),
        ("jsonSchema", caps.supports_json_schema),
        ("outputFormat", caps.supports_output_format),
    ];

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["provider", "feature", "supported"]);
    for (feature, supported) in rows {
        let mark = if supported {
            style("yes").green().to_string()
        } else {
            style("no").red().to_string()
        };
        table.add_row([provider_id, feature, mark.as_str()]);
    }
    table
}

fn format_bytes(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else {
        format!("{} KiB", bytes / 1024)
    }
}
