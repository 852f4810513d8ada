//! `simulator` adapter – stands in for a flight-simulator link.
//!
//! Writes `offset + amplitude * sin(2π · frequency_hz · t)` to one point every
//! `period_ms` until stopped.
//!
//! | Option | Default |
//! |---|---|
//! | `point` | required |
//! | `period_ms` | `100` |
//! | `amplitude` | `1.0` |
//! | `offset` | `0.0` |
//! | `frequency_hz` | `0.1` |

use std::f64::consts::TAU;
use std::time::Duration;

use async_trait::async_trait;
use avhub_types::HubError;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::adapter::{Adapter, AdapterContext};
use crate::options::PluginOptions;

pub const KIND: &str = "simulator";

pub struct Simulator {
    point: String,
    period: Duration,
    amplitude: f64,
    offset: f64,
    frequency_hz: f64,
    samples: u64,
}

impl Simulator {
    pub fn from_options(options: &PluginOptions) -> Result<Self, HubError> {
        let period_ms = options.get_u64("period_ms")?.unwrap_or(100);
        if period_ms == 0 {
            return Err(HubError::InvalidOption {
                option: "period_ms".to_string(),
                details: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            point: options.require_str("point")?.to_string(),
            period: Duration::from_millis(period_ms),
            amplitude: options.get_f64("amplitude")?.unwrap_or(1.0),
            offset: options.get_f64("offset")?.unwrap_or(0.0),
            frequency_hz: options.get_f64("frequency_hz")?.unwrap_or(0.1),
            samples: 0,
        })
    }

    fn sample_at(&self, elapsed: Duration) -> f64 {
        self.offset + self.amplitude * (TAU * self.frequency_hz * elapsed.as_secs_f64()).sin()
    }
}

/// Catalog constructor.
pub fn factory(options: &PluginOptions) -> Result<Box<dyn Adapter>, HubError> {
    Ok(Box::new(Simulator::from_options(options)?))
}

#[async_trait]
impl Adapter for Simulator {
    async fn run(&mut self, mut ctx: AdapterContext) -> Result<(), HubError> {
        // Fail fast on a misconfigured point instead of on every tick.
        ctx.store.registry().definition(&self.point)?;
        ctx.log.log(&format!("driving {} every {:?}", self.point, self.period));

        let started = Instant::now();
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.stop.stopped() => break,
                now = ticker.tick() => {
                    let value = self.sample_at(now.duration_since(started));
                    ctx.store.write(&self.point, value, &ctx.name)?;
                    self.samples += 1;
                }
            }
        }

        debug!(plugin = %ctx.name, samples = self.samples, "simulator stopped");
        ctx.log.log(&format!("stopped after {} samples", self.samples));
        Ok(())
    }
}
