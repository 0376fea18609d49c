//! Operator-facing run summaries

use chrono::SecondsFormat;
use ethers::types::H256;
use mint_core::{FeeEstimate, SubmissionAttempt};
use serde::Serialize;
use std::fmt::Write;

/// One broadcast transaction of the direct path
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastResult {
    pub hash: H256,
    /// `None` when no receipt arrived
    pub block: Option<u64>,
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastSummary {
    pub sent: Vec<BroadcastResult>,
    pub failed: usize,
}

/// Outcome of a dry run; nothing was submitted
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub bundle_size: usize,
    pub has_prefix: bool,
    pub target_block: u64,
    pub fee_estimate: Option<FeeEstimate>,
}

/// Render submission attempts as a fixed-width table
pub fn attempt_table(attempts: &[SubmissionAttempt]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>7}  {:>12}  {:>4}  {:<66}  {:<28}  {}",
        "attempt", "target_block", "txs", "bundle_hash", "resolution", "submitted_at"
    );
    for attempt in attempts {
        let _ = writeln!(
            out,
            "{:>7}  {:>12}  {:>4}  {:<66}  {:<28}  {}",
            attempt.number,
            attempt.target_block,
            attempt.bundle.len(),
            format!("{:?}", attempt.bundle_hash),
            attempt.resolution.to_string(),
            attempt.submitted_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }
    out
}

pub fn broadcast_table(summary: &BroadcastSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<66}  {:>10}  {}", "tx_hash", "block", "status");
    for tx in &summary.sent {
        let block = tx.block.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string());
        let status = if tx.success { "success" } else { "reverted" };
        let _ = writeln!(out, "{:<66}  {:>10}  {}", format!("{:?}", tx.hash), block, status);
    }
    if summary.failed > 0 {
        let _ = writeln!(out, "{} transaction(s) failed to broadcast", summary.failed);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mint_core::{Bundle, BundleResolution};

    #[test]
    fn test_attempt_table_lists_every_attempt() {
        let attempt = |number: u32, target_block: u64, resolution| SubmissionAttempt {
            number,
            target_block,
            bundle_hash: H256::from_low_u64_be(number as u64),
            bundle: Bundle::default(),
            resolution,
            submitted_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        };

        let table = attempt_table(&[
            attempt(1, 1000, BundleResolution::BlockPassedWithoutInclusion),
            attempt(2, 1003, BundleResolution::Included),
        ]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("attempt"));
        assert!(lines[1].contains("1000"));
        assert!(lines[2].contains("1003"));
        assert!(lines[2].contains("2024-03-01T12:00:00Z"));
    }

    #[test]
    fn test_broadcast_table_counts_failures() {
        let summary = BroadcastSummary {
            sent: vec![BroadcastResult {
                hash: H256::zero(),
                block: Some(17),
                success: true,
            }],
            failed: 2,
        };

        let table = broadcast_table(&summary);
        assert!(table.contains("success"));
        assert!(table.contains("2 transaction(s) failed"));
    }
}
