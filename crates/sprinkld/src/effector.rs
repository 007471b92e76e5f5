//! Actuation for non-standard station kinds, delegated out of the control
//! loop. Gpio kinds drive a spare pin directly; http and remote-ip kinds
//! fire best-effort GET requests. Rf stations are modeled but not actuated.

use tracing::{debug, warn};

use crate::program::MAX_DURATION_S;
use crate::station::StationKind;

pub struct Effector {
    client: reqwest::Client,
}

impl Effector {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn apply(&self, sid: usize, kind: &StationKind, on: bool) {
        match kind {
            StationKind::Standard => {}
            StationKind::Gpio { pin, active_high } => {
                drive_gpio(sid, *pin, on == *active_high);
            }
            StationKind::Http {
                host,
                port,
                on_cmd,
                off_cmd,
            } => {
                let cmd = if on { on_cmd } else { off_cmd };
                let url = format!("http://{host}:{port}{cmd}");
                self.get(sid, &url).await;
            }
            StationKind::RemoteIp {
                host,
                port,
                station_id,
            } => {
                // The remote controller is expected to run with its
                // password check disabled for machine peers.
                let url = format!(
                    "http://{host}:{port}/cm?sid={station_id}&en={}&t={MAX_DURATION_S}",
                    on as u8
                );
                self.get(sid, &url).await;
            }
            StationKind::Rf { code } => {
                debug!(station = sid, code = %code, on, "rf station change (no transmitter)");
            }
        }
    }

    async fn get(&self, sid: usize, url: &str) {
        match self.client.get(url).send().await {
            Ok(resp) if !resp.status().is_success() => {
                warn!(station = sid, url, status = %resp.status(), "effector request rejected");
            }
            Ok(_) => debug!(station = sid, url, "effector request sent"),
            Err(e) => warn!(station = sid, url, "effector request failed: {e}"),
        }
    }
}

impl Default for Effector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "gpio")]
fn drive_gpio(sid: usize, pin: u8, high: bool) {
    match rppal::gpio::Gpio::new() {
        Ok(gpio) => match gpio.get(pin) {
            Ok(p) => {
                let mut p = p.into_output();
                // Keep the level across drop; the pin belongs to this
                // station for the process lifetime.
                p.set_reset_on_drop(false);
                if high {
                    p.set_high();
                } else {
                    p.set_low();
                }
            }
            Err(e) => warn!(station = sid, pin, "gpio station pin claim failed: {e}"),
        },
        Err(e) => warn!(station = sid, "gpio open failed: {e}"),
    }
}

#[cfg(not(feature = "gpio"))]
fn drive_gpio(sid: usize, pin: u8, high: bool) {
    eprintln!("[mock-gpio] station {sid} gpio {pin} set {}", if high { "high" } else { "low" });
}
