//! Optional InfluxDB export: one line-protocol point per valve state change
//! plus a `valves` summary point. Best-effort — failures are warned and
//! swallowed so telemetry can never stop watering.

use tracing::warn;

/// Format the line-protocol body for one batch of valve changes.
/// `highest_active` is the highest active 1-based station id, or 0.
pub fn lines(changes: &[(usize, bool)], highest_active: usize, ts_ns: i128) -> String {
    let mut body = String::new();
    for &(sid, on) in changes {
        body.push_str(&format!(
            "valve{:02} value={} {}\n",
            sid + 1,
            on as u8,
            ts_ns
        ));
    }
    body.push_str(&format!("valves value={highest_active} {ts_ns}\n"));
    body
}

pub struct Influx {
    client: reqwest::Client,
}

impl Influx {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn publish(&self, url: &str, db: &str, body: String) {
        let endpoint = format!("{}/write?db={}", url.trim_end_matches('/'), db);
        match self.client.post(&endpoint).body(body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                warn!(status = %resp.status(), "influx write rejected");
            }
            Ok(_) => {}
            Err(e) => warn!("influx write failed: {e}"),
        }
    }
}

impl Default for Influx {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_protocol_shape() {
        let body = lines(&[(0, true), (4, false)], 1, 1_700_000_000_000_000_000);
        let mut it = body.lines();
        assert_eq!(it.next(), Some("valve01 value=1 1700000000000000000"));
        assert_eq!(it.next(), Some("valve05 value=0 1700000000000000000"));
        assert_eq!(it.next(), Some("valves value=1 1700000000000000000"));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn summary_point_reports_zero_when_idle() {
        let body = lines(&[(2, false)], 0, 42);
        assert!(body.ends_with("valves value=0 42\n"));
    }
}
