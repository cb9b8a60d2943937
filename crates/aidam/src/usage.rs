//! The `/aidam-usage` report: orchestrator status plus per-agent costs.

use crate::config::DEFAULT_SESSION_BUDGET_USD;
use crate::orchestrator::{AgentUsageRow, OrchestratorRow};

/// User-visible message when no sidecar is registered as running.
pub const NO_ORCHESTRATOR_MSG: &str = "No running AIDAM orchestrator found";

/// Render the usage table the way the `/aidam-usage` command prints it.
pub fn format_usage_report(orchestrator: &OrchestratorRow, rows: &[AgentUsageRow]) -> String {
    let total_cost: f64 = rows.iter().map(|r| r.total_cost_usd).sum();
    let session_budget = rows
        .iter()
        .map(|r| r.budget_session)
        .fold(0.0_f64, f64::max)
        .max(DEFAULT_SESSION_BUDGET_USD);

    let mut lines = Vec::new();
    lines.push("AIDAM Usage Report".to_string());
    lines.push("==================".to_string());
    lines.push(String::new());
    lines.push(format!(
        "  Session:    {}",
        &orchestrator.session_id[..orchestrator.session_id.len().min(12)]
    ));
    lines.push(format!(
        "  PID:        {}",
        orchestrator
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string())
    ));
    lines.push(format!("  Started:    {}", orchestrator.started_at));
    lines.push(format!(
        "  Heartbeat:  {}",
        orchestrator
            .last_heartbeat_at
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".to_string())
    ));
    lines.push(String::new());
    lines.push("  Agent           Calls   Cost      Last      Budget/call   Status".to_string());
    lines.push("  -----------     -----   -------   -------   -----------   --------".to_string());

    for row in rows {
        let last = if row.invocation_count > 0 {
            format!("${:.4}", row.last_cost_usd)
        } else {
            "--".to_string()
        };
        lines.push(format!(
            "  {:<15} {:>5}   {:>8}  {:>8}  {:>12}   {}",
            row.agent_name,
            row.invocation_count,
            format!("${:.4}", row.total_cost_usd),
            last,
            format!("${:.2}", row.budget_per_call),
            row.status,
        ));
    }

    lines.push(String::new());
    lines.push(format!("  Total cost:     ${:.4}", total_cost));
    lines.push(format!("  Session budget: ${:.2}", session_budget));
    lines.push(format!(
        "  Remaining:      ${:.4}",
        session_budget - total_cost
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn orchestrator() -> OrchestratorRow {
        OrchestratorRow {
            session_id: "0123456789abcdef".into(),
            pid: Some(4242),
            status: "running".into(),
            started_at: Utc::now(),
            last_heartbeat_at: Some(Utc::now()),
        }
    }

    fn usage(agent: &str, calls: i32, total: f64) -> AgentUsageRow {
        AgentUsageRow {
            session_id: "0123456789abcdef".into(),
            agent_name: agent.into(),
            invocation_count: calls,
            total_cost_usd: total,
            last_cost_usd: if calls > 0 { 0.02 } else { 0.0 },
            budget_per_call: 0.5,
            budget_session: 5.0,
            status: "idle".into(),
        }
    }

    #[test]
    fn test_report_totals_and_remaining() {
        let rows = vec![usage("learner", 3, 0.06), usage("retriever", 10, 0.14)];
        let report = format_usage_report(&orchestrator(), &rows);

        assert!(report.contains("AIDAM Usage Report"));
        assert!(report.contains("Session:    0123456789ab"));
        assert!(report.contains("PID:        4242"));
        assert!(report.contains("Total cost:     $0.2000"));
        assert!(report.contains("Session budget: $5.00"));
        assert!(report.contains("Remaining:      $4.8000"));
    }

    #[test]
    fn test_report_marks_uncalled_agents() {
        let rows = vec![usage("compactor", 0, 0.0)];
        let report = format_usage_report(&orchestrator(), &rows);
        let line = report.lines().find(|l| l.contains("compactor")).unwrap();
        assert!(line.contains("--"));
    }
}
