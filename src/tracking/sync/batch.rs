//! Batch windows for carriers that track several numbers per call.
//!
//! Queries are chunked into fixed-size windows. A successful window reply is fanned out to one
//! result per submitted query by matching each reply item's identifiers against the window;
//! numbers the reply never mentions are returned as unresolved.

use crate::carrier::{CarrierError, DeliveryVitals, RawCarrierResponse, dhl};
use crate::tracking::TrackingQuery;
use tracing::debug;

/// Default DHL window size
pub const DEFAULT_WINDOW_SIZE: usize = dhl::MAX_BATCH_SIZE;

/// Per-query results of one window reply.
#[derive(Debug, Default)]
pub struct WindowOutcome {
    /// Queries matched to a reply item, with that item's vitals or parse failure.
    pub resolved: Vec<(TrackingQuery, Result<DeliveryVitals, CarrierError>)>,
    /// Queries no reply item claimed.
    pub unresolved: Vec<TrackingQuery>,
}

/// Splits queries into bounded windows and maps window replies back to queries.
#[derive(Debug, Clone, Copy)]
pub struct BatchWindower {
    window_size: usize,
}

impl Default for BatchWindower {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl BatchWindower {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Fixed-size windows in submission order; only the last may be short.
    pub fn windows<'a>(&self, queries: &'a [TrackingQuery]) -> impl Iterator<Item = &'a [TrackingQuery]> {
        queries.chunks(self.window_size)
    }

    /// Fan a DHL window reply out to the queries of the window.
    ///
    /// A reply carrying a carrier-reported error applies that error to every query. Otherwise
    /// each mail item is matched by the first of its reply identifiers that names a query still
    /// unclaimed in the window.
    pub fn fan_out(&self, window: &[TrackingQuery], raw: &RawCarrierResponse) -> WindowOutcome {
        if let Some(message) = dhl::reported_error(raw) {
            return WindowOutcome {
                resolved: window
                    .iter()
                    .map(|query| (query.clone(), Ok(DeliveryVitals::carrier_error(message.clone()))))
                    .collect(),
                unresolved: Vec::new(),
            };
        }

        let mut slots: Vec<Option<Result<DeliveryVitals, CarrierError>>> =
            window.iter().map(|_| None).collect();

        for item in dhl::mail_items(raw) {
            let identifiers = dhl::reply_identifiers(item);
            let matched = identifiers.iter().find_map(|(key, value)| {
                window
                    .iter()
                    .enumerate()
                    .find(|(i, query)| slots[*i].is_none() && query.tracking_number == *value)
                    .map(|(i, _)| (i, *key))
            });

            match matched {
                Some((index, key)) => {
                    debug!("Reply item matched {} by {}", window[index].tracking_number, key);
                    slots[index] = Some(dhl::vitals_from_item(item));
                }
                None => debug!("Reply item {:?} matches no submitted number", identifiers),
            }
        }

        let mut outcome = WindowOutcome::default();
        for (query, slot) in window.iter().zip(slots) {
            match slot {
                Some(result) => outcome.resolved.push((query.clone(), result)),
                None => outcome.unresolved.push(query.clone()),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::Carrier;
    use serde_json::{Value, json};

    fn queries(count: usize) -> Vec<TrackingQuery> {
        (0..count)
            .map(|i| TrackingQuery {
                package_shipment_id: 100 + i as u64,
                tracking_number: format!("GM{:04}", i),
                carrier_hint: Some(Carrier::Dhl),
            })
            .collect()
    }

    fn item(mail: Value, description: &str) -> Value {
        json!({
            "mail": mail,
            "events": [{"date": "2020-03-03", "time": "09:00:00", "description": description, "location": "Austin, TX"}]
        })
    }

    #[test]
    fn windows_are_bounded() {
        let queries = queries(23);
        let sizes: Vec<usize> = BatchWindower::default().windows(&queries).map(<[_]>::len).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
    }

    #[test]
    fn secondary_key_resolves_item() {
        let window = queries(10);
        let items: Vec<Value> = window
            .iter()
            .enumerate()
            .map(|(i, query)| {
                if i == 6 {
                    item(
                        json!({"dspNumber": "UNRELATED", "customerConfirmationNumber": query.tracking_number}),
                        "DELIVERED",
                    )
                } else {
                    item(json!({"dspNumber": query.tracking_number}), "Processed")
                }
            })
            .collect();
        let raw = json!({"meta": {"code": 200}, "data": {"mailItems": items}});

        let outcome = BatchWindower::default().fan_out(&window, &raw);
        assert!(outcome.unresolved.is_empty());
        assert_eq!(outcome.resolved.len(), 10);

        let (query, vitals) = &outcome.resolved[6];
        assert_eq!(query.tracking_number, "GM0006");
        assert!(vitals.as_ref().unwrap().delivered);
        assert!(outcome.resolved.iter().enumerate().all(|(i, (q, _))| q == &window[i]));
    }

    #[test]
    fn unclaimed_numbers_are_unresolved() {
        let window = queries(3);
        let raw = json!({
            "meta": {"code": 200},
            "data": {"mailItems": [item(json!({"overlabeledDspNumber": "GM0001"}), "Processed")]}
        });
        let outcome = BatchWindower::default().fan_out(&window, &raw);
        assert_eq!(outcome.resolved.len(), 1);
        assert_eq!(outcome.resolved[0].0.tracking_number, "GM0001");
        let unresolved: Vec<&str> = outcome.unresolved.iter().map(|q| q.tracking_number.as_str()).collect();
        assert_eq!(unresolved, vec!["GM0000", "GM0002"]);
    }

    #[test]
    fn window_level_carrier_error_applies_to_all() {
        let window = queries(4);
        let raw = json!({"meta": {"code": 400, "error": [{"error_message": "Invalid client id"}]}});
        let outcome = BatchWindower::default().fan_out(&window, &raw);
        assert_eq!(outcome.resolved.len(), 4);
        assert!(outcome.resolved.iter().all(|(_, v)| v.as_ref().unwrap().carrier_error));
    }
}
