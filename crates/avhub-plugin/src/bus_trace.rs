//! `bus_trace` adapter – renders point changes as bus frames.
//!
//! Every notified change of a listed point becomes one [`Frame`] with
//! `id = base_id + position in the list`, and its diagnostic text is written
//! to the plugin's log sink. Payloads are big-endian: integers and floats use
//! eight bytes, booleans one, strings their first eight UTF-8 bytes.

use async_trait::async_trait;
use avhub_store::{Change, SubscriberError, SubscriptionId};
use avhub_types::{Frame, HubError, MAX_FRAME_LEN, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::adapter::{Adapter, AdapterContext};
use crate::options::PluginOptions;

pub const KIND: &str = "bus_trace";

const DEFAULT_BASE_ID: u32 = 0x100;

pub struct BusTrace {
    points: Vec<String>,
    base_id: u32,
    frames: u64,
}

impl BusTrace {
    pub fn from_options(options: &PluginOptions) -> Result<Self, HubError> {
        let points = options.get_str_list("points")?;
        if points.is_empty() {
            return Err(HubError::InvalidOption {
                option: "points".to_string(),
                details: "at least one point is required".to_string(),
            });
        }
        let base_id = match options.get_u64("base_id")? {
            Some(id) => u32::try_from(id)
                .ok()
                .and_then(|id| id.checked_add(points.len() as u32 - 1).map(|_| id))
                .ok_or_else(|| HubError::InvalidOption {
                    option: "base_id".to_string(),
                    details: format!("{id} leaves no room for {} frame ids", points.len()),
                })?,
            None => DEFAULT_BASE_ID,
        };
        Ok(Self {
            points,
            base_id,
            frames: 0,
        })
    }

    fn frame_for(&self, position: usize, value: &Value) -> Result<Frame, HubError> {
        Frame::new(self.base_id + position as u32, encode_payload(value))
    }
}

/// Big-endian payload bytes of a value.
pub fn encode_payload(value: &Value) -> Vec<u8> {
    match value {
        Value::Integer(v) => v.to_be_bytes().to_vec(),
        Value::Float(v) => v.to_be_bytes().to_vec(),
        Value::Boolean(v) => vec![u8::from(*v)],
        Value::Text(s) => s.bytes().take(MAX_FRAME_LEN).collect(),
    }
}

/// Catalog constructor.
pub fn factory(options: &PluginOptions) -> Result<Box<dyn Adapter>, HubError> {
    Ok(Box::new(BusTrace::from_options(options)?))
}

#[async_trait]
impl Adapter for BusTrace {
    async fn run(&mut self, mut ctx: AdapterContext) -> Result<(), HubError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Change)>();
        let mut subscriptions: Vec<SubscriptionId> = Vec::with_capacity(self.points.len());

        for (position, point) in self.points.iter().enumerate() {
            let tx = tx.clone();
            let subscribed = ctx.store.subscribe(point, move |change: &Change| {
                tx.send((position, change.clone()))
                    .map_err(|_| SubscriberError::Closed)
            });
            match subscribed {
                Ok(id) => subscriptions.push(id),
                Err(e) => {
                    for id in subscriptions {
                        ctx.store.unsubscribe(id);
                    }
                    return Err(e);
                }
            }
        }
        drop(tx);
        ctx.log.log(&format!(
            "tracing {} points from id {:x}",
            self.points.len(),
            self.base_id
        ));

        let outcome = loop {
            tokio::select! {
                _ = ctx.stop.stopped() => break Ok(()),
                received = rx.recv() => {
                    let Some((position, change)) = received else { break Ok(()) };
                    match self.frame_for(position, &change.current) {
                        Ok(frame) => {
                            self.frames += 1;
                            ctx.log.log(&format!("{} {frame}", change.key));
                        }
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        for id in subscriptions {
            ctx.store.unsubscribe(id);
        }
        debug!(plugin = %ctx.name, frames = self.frames, "bus trace stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StopSignal;
    use crate::log_sink::LogSink;
    use avhub_points::PointRegistry;
    use avhub_store::ValueStore;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn payload_encoding() {
        assert_eq!(encode_payload(&Value::Integer(0x0102)), [0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(encode_payload(&Value::Boolean(true)), [1]);
        assert_eq!(encode_payload(&Value::Float(1.0)), 1.0f64.to_be_bytes());
        assert_eq!(encode_payload(&Value::Text("NAV1-STANDBY".into())), b"NAV1-STA");
    }

    #[test]
    fn options_are_validated() {
        assert!(BusTrace::from_options(&PluginOptions::new()).is_err());
        let overflow = PluginOptions::new()
            .with("points", serde_json::json!(["A", "B"]))
            .with("base_id", u64::from(u32::MAX));
        assert!(BusTrace::from_options(&overflow).is_err());
        let ok = PluginOptions::new().with("points", "A").with("base_id", 0x200);
        assert_eq!(BusTrace::from_options(&ok).unwrap().base_id, 0x200);
    }

    #[tokio::test]
    async fn changes_are_logged_as_frames() {
        let registry = PointRegistry::from_source(
            "---\nGEAR:Gear down:bool::::false::\nFLAPS:Flap setting:int:0:40:deg:0::\n",
        )
        .unwrap();
        let store = Arc::new(ValueStore::new(Arc::new(registry)));
        let lines = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&lines);
        let (tx, stop) = StopSignal::channel();
        let ctx = AdapterContext {
            name: "trace".to_string(),
            store: Arc::clone(&store),
            log: LogSink::new(move |m| out.lock().push(m.to_string())),
            stop,
        };
        let mut adapter = BusTrace::from_options(
            &PluginOptions::new().with("points", serde_json::json!(["GEAR", "FLAPS"])),
        )
        .unwrap();
        let task = tokio::spawn(async move { adapter.run(ctx).await });

        for _ in 0..100 {
            if store.subscriber_count("FLAPS").unwrap() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        store.write("GEAR", true, "test").unwrap();
        store.write("FLAPS", 15, "test").unwrap();

        for _ in 0..100 {
            if lines.lock().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let lines = lines.lock();
        assert!(lines.iter().any(|l| l == "GEAR 100:01 "));
        assert!(lines.iter().any(|l| l == "FLAPS 101:00 00 00 00 00 00 00 0F "));
        assert_eq!(store.subscriber_count("GEAR").unwrap(), 0);
    }
}
