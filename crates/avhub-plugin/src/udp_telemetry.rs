//! `udp_telemetry` adapter – simple text telemetry over UDP.
//!
//! Inbound datagrams carry samples in the [`telemetry_text`] format; every
//! sample is written to `point`. When `forward` is set, every notified change
//! of that point is sent to `peer` as one sample.
//!
//! | Option | Meaning |
//! |---|---|
//! | `bind` | local address, required |
//! | `point` | inbound target point, optional |
//! | `forward` | point whose changes are sent out, optional |
//! | `peer` | destination for forwarded samples, required with `forward` |
//!
//! [`telemetry_text`]: crate::telemetry_text

use std::net::SocketAddr;

use async_trait::async_trait;
use avhub_store::Change;
use avhub_types::{HubError, Value};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapter::{Adapter, AdapterContext};
use crate::options::PluginOptions;
use crate::telemetry_text::{format_sample, parse_samples};

pub const KIND: &str = "udp_telemetry";

const DATAGRAM_CAPACITY: usize = 2048;

pub struct UdpTelemetry {
    bind: SocketAddr,
    point: Option<String>,
    forward: Option<(String, SocketAddr)>,
    buf: Vec<u8>,
}

impl UdpTelemetry {
    pub fn from_options(options: &PluginOptions) -> Result<Self, HubError> {
        let bind = parse_addr("bind", options.require_str("bind")?)?;
        let forward = match options.get_str("forward")? {
            Some(point) => {
                let peer = parse_addr("peer", options.require_str("peer")?)?;
                Some((point.to_string(), peer))
            }
            None => None,
        };
        Ok(Self {
            bind,
            point: options.get_str("point")?.map(str::to_string),
            forward,
            buf: vec![0; DATAGRAM_CAPACITY],
        })
    }

    fn ingest(&self, ctx: &AdapterContext, datagram: &[u8], from: SocketAddr) {
        let Some(point) = &self.point else {
            debug!(plugin = %ctx.name, %from, "datagram ignored, no inbound point");
            return;
        };
        let text = String::from_utf8_lossy(datagram);
        match parse_samples(&text) {
            Ok(samples) => {
                for sample in samples {
                    if let Err(e) = ctx.store.write(point, sample, &ctx.name) {
                        ctx.log.log(&format!("write {point} failed: {e}"));
                    }
                }
            }
            Err(e) => ctx.log.log(&format!("bad datagram from {from}: {e}")),
        }
    }
}

/// Catalog constructor.
pub fn factory(options: &PluginOptions) -> Result<Box<dyn Adapter>, HubError> {
    Ok(Box::new(UdpTelemetry::from_options(options)?))
}

#[async_trait]
impl Adapter for UdpTelemetry {
    async fn run(&mut self, mut ctx: AdapterContext) -> Result<(), HubError> {
        if let Some(point) = &self.point {
            ctx.store.registry().definition(point)?;
        }
        let socket = UdpSocket::bind(self.bind).await?;
        ctx.log.log(&format!("listening on {}", socket.local_addr()?));

        let (subscription, mut outbound) = match &self.forward {
            Some((point, _)) => {
                let (id, rx) = ctx.store.subscribe_channel(point)?;
                (Some(id), rx)
            }
            // Never yields; keeps the select below uniform.
            None => (None, mpsc::unbounded_channel::<Change>().1),
        };

        let outcome = loop {
            tokio::select! {
                _ = ctx.stop.stopped() => break Ok(()),
                received = socket.recv_from(&mut self.buf) => {
                    match received {
                        Ok((len, from)) => self.ingest(&ctx, &self.buf[..len], from),
                        Err(e) => break Err(HubError::Io(e)),
                    }
                }
                Some(change) = outbound.recv(), if self.forward.is_some() => {
                    let Some((_, peer)) = &self.forward else { continue };
                    match sample_of(&change.current) {
                        Some(sample) => {
                            if let Err(e) = socket.send_to(format_sample(sample).as_bytes(), *peer).await {
                                warn!(plugin = %ctx.name, %peer, error = %e, "telemetry send failed");
                            }
                        }
                        None => ctx.log.log(&format!("{} is not numeric, not forwarded", change.key)),
                    }
                }
            }
        };

        if let Some(id) = subscription {
            ctx.store.unsubscribe(id);
        }
        outcome
    }
}

fn parse_addr(option: &str, text: &str) -> Result<SocketAddr, HubError> {
    text.parse().map_err(|e| HubError::InvalidOption {
        option: option.to_string(),
        details: format!("'{text}' is not a socket address: {e}"),
    })
}

fn sample_of(value: &Value) -> Option<f64> {
    match value {
        Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_f64(),
    }
}
