//! Run summary handed to the notification collaborator.

use crate::tracking::{RunContext, TrackingQuery, TrackingSyncError};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Totals of one `(company_id, shipped_method)` group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupTotal {
    pub company_id: u32,
    pub shipped_method: String,
    /// Expanded tracking entries the group queried
    pub count: usize,
    pub updated: usize,
    pub failed: usize,
}

/// An entry that was not persisted, kept for operator review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub company_id: u32,
    pub shipped_method: String,
    pub package_shipment_id: u64,
    pub tracking_number: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub totals: Vec<GroupTotal>,
    pub errors: Vec<ItemError>,
}

impl RunSummary {
    pub fn record_error(&mut self, context: &RunContext, query: &TrackingQuery, reason: impl Into<String>) {
        self.errors.push(ItemError {
            company_id: context.company_id,
            shipped_method: context.shipped_method.clone(),
            package_shipment_id: query.package_shipment_id,
            tracking_number: query.tracking_number.clone(),
            reason: reason.into(),
        });
    }

    pub fn record_total(&mut self, context: &RunContext, count: usize, updated: usize, failed: usize) {
        self.totals.push(GroupTotal {
            company_id: context.company_id,
            shipped_method: context.shipped_method.clone(),
            count,
            updated,
            failed,
        });
    }

    /// Text recap: one `comp_id ... ship_meth ... qty` line per group, then the errors.
    pub fn summary(&self) -> String {
        let mut recap = String::from("comp_id ... ship_meth ... qty");
        for total in &self.totals {
            recap.push_str(&format!(
                "\n{} ... {} ... {}",
                total.company_id, total.shipped_method, total.count
            ));
        }
        if !self.errors.is_empty() {
            recap.push_str(&format!("\n\n{} errors:", self.errors.len()));
            for error in &self.errors {
                recap.push_str(&format!(
                    "\n{} ... {} ... {} ... {} ... {}",
                    error.company_id,
                    error.shipped_method,
                    error.package_shipment_id,
                    error.tracking_number,
                    error.reason
                ));
            }
        }
        recap
    }

    /// Write the summary as pretty JSON.
    pub async fn write_json(&self, path: &Path) -> Result<(), TrackingSyncError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| TrackingSyncError::Store(format!("Failed to serialize run summary: {}", e)))?;
        tokio::fs::write(path, content).await?;
        info!("Run summary written to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::Carrier;
    use crate::tracking::{DateWindow, SyncGroup};
    use chrono::NaiveDate;

    #[test]
    fn recap_lists_totals_then_errors() {
        let checked_at = NaiveDate::from_ymd_opt(2020, 3, 31)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .unwrap();
        let group = SyncGroup {
            company_id: 1584,
            shipped_method: "UPS MI Dom".to_string(),
            window: DateWindow::days_ago(checked_at.date(), 30),
        };
        let context = RunContext::new(&group, Carrier::Ups, checked_at, false);
        let query = TrackingQuery {
            package_shipment_id: 13544607,
            tracking_number: "92748901204900553018974214".to_string(),
            carrier_hint: Some(Carrier::Ups),
        };

        let mut summary = RunSummary::default();
        summary.record_error(&context, &query, "Bad response: UPS reply without a shipment");
        summary.record_total(&context, 12, 11, 1);

        assert_eq!(
            summary.summary(),
            "comp_id ... ship_meth ... qty\n1584 ... UPS MI Dom ... 12\n\n1 errors:\n\
             1584 ... UPS MI Dom ... 13544607 ... 92748901204900553018974214 ... Bad response: UPS reply without a shipment"
        );
    }
}
