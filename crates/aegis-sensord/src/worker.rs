//! Worker pool (§5): one OS thread per core, each owning its own decode
//! context and feeding the shared, frozen [`DetectionEngine`]. Grounded on
//! the teacher's `FastPathEngine`/`Worker` split — `std::thread` workers
//! pinned to the hot path, not tokio tasks, since the capture/queueing
//! layer that would feed them is an external collaborator per §6.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use aegis_alert::{FastLogOutput, LogLine};
use aegis_decode::{DecodeThreadCtx, Packet};
use aegis_detect::DetectionEngine;
use chrono::Utc;
use crossbeam_channel::Receiver;

use crate::decode::decode_packet;

/// Number of usable CPUs, sized the same way the teacher's dataplane sizes
/// its worker pool.
pub fn cpu_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// One packet handed in from the (external) capture/queueing layer.
pub struct RawPacket {
    pub linktype: u32,
    pub bytes: Vec<u8>,
    pub pcap_packet_num: Option<u64>,
}

#[derive(Debug, Default)]
pub struct EngineStats {
    pub rx_packets: AtomicU64,
    pub alerts_fired: AtomicU64,
}

struct Worker {
    core_id: usize,
    running: Arc<AtomicBool>,
    receiver: Receiver<RawPacket>,
    engine: Arc<DetectionEngine>,
    alert_out: Arc<FastLogOutput>,
    stats: Arc<EngineStats>,
}

impl Worker {
    fn run(self) {
        let mut decode_ctx = DecodeThreadCtx::new();
        while self.running.load(Ordering::Relaxed) {
            let Ok(raw) = self.receiver.recv_timeout(std::time::Duration::from_millis(200)) else {
                continue;
            };
            let mut packet = Packet::new();
            decode_packet(raw.linktype, &raw.bytes, &mut decode_ctx, &mut packet);
            self.stats.rx_packets.fetch_add(1, Ordering::Relaxed);

            let now_secs = Utc::now().timestamp().max(0) as u64;
            self.engine.inspect(&mut packet, now_secs);

            if !packet.alerts.is_empty() {
                self.stats.alerts_fired.fetch_add(packet.alerts.len() as u64, Ordering::Relaxed);
                emit_alerts(&self.alert_out, &packet, raw.pcap_packet_num);
            }
        }
        tracing::debug!(core_id = self.core_id, "worker thread exiting");
    }
}

fn emit_alerts(alert_out: &FastLogOutput, packet: &Packet, pcap_packet_num: Option<u64>) {
    let now = Utc::now();
    for alert in packet.alerts.iter() {
        let line = match (packet.src, packet.dst, packet.protocol) {
            (Some(src), Some(dst), Some(proto)) => LogLine::FiveTuple {
                timestamp: now,
                alert: alert.clone(),
                proto,
                src,
                src_port: packet.src_port,
                dst,
                dst_port: packet.dst_port,
            },
            _ => LogLine::DecoderEvent {
                timestamp: now,
                alert: alert.clone(),
                raw: packet.bytes().to_vec(),
                pcap_packet_num,
            },
        };
        alert_out.submit(line);
    }
}

struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
}

/// Owns the worker thread pool and the packet channel that feeds it.
pub struct SensorEngine {
    running: Arc<AtomicBool>,
    workers: Vec<WorkerHandle>,
    sender: crossbeam_channel::Sender<RawPacket>,
    stats: Arc<EngineStats>,
}

/// Depth of the per-worker packet queue; a full queue backs capture up
/// rather than dropping, mirroring the original's ring-buffer contract.
const PACKET_QUEUE_DEPTH: usize = 4096;

impl SensorEngine {
    pub fn start(
        engine: Arc<DetectionEngine>,
        alert_out: Arc<FastLogOutput>,
        worker_count: usize,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(PACKET_QUEUE_DEPTH);
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(EngineStats::default());
        let mut workers = Vec::with_capacity(worker_count);

        for core_id in 0..worker_count.max(1) {
            let worker = Worker {
                core_id,
                running: running.clone(),
                receiver: receiver.clone(),
                engine: engine.clone(),
                alert_out: alert_out.clone(),
                stats: stats.clone(),
            };
            let thread = std::thread::Builder::new()
                .name(format!("aegis-worker-{core_id}"))
                .spawn(move || worker.run())
                .expect("failed to spawn worker thread");
            workers.push(WorkerHandle { thread: Some(thread) });
        }

        tracing::info!(workers = worker_count, "sensor engine started");
        SensorEngine { running, workers, sender, stats }
    }

    pub fn sender(&self) -> crossbeam_channel::Sender<RawPacket> {
        self.sender.clone()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for SensorEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_detect::RuleParser;

    fn build_engine(rule: &str) -> Arc<DetectionEngine> {
        let mut parser = RuleParser::new();
        let sig = parser.parse_rule(rule).unwrap();
        Arc::new(DetectionEngine::build(vec![sig]))
    }

    #[test]
    fn engine_starts_and_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let engine = build_engine(r#"alert tcp any any -> any 80 (msg:"t"; content:"GET"; sid:1; rev:1;)"#);
        let alert_out = Arc::new(FastLogOutput::open(&dir.path().join("fast.log")).unwrap());
        let mut sensor = SensorEngine::start(engine, alert_out, 1);
        assert_eq!(sensor.stats().rx_packets.load(Ordering::Relaxed), 0);
        sensor.stop();
    }
}
