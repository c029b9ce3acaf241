//! Fast-log alert output (component C8).
//!
//! Renders [`aegis_common::PacketAlert`]s into the classic one-line fast-log
//! format and appends them to a local file. The write path borrows the
//! teacher's alert-pipeline shape (bounded channel, dedicated writer
//! thread, atomic stats) but keeps the transport synchronous file I/O
//! instead of a batched UDP send, since the sink here is `fast.log`, not a
//! remote SIEM.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use aegis_common::{Address, AddressFamily, PacketAlert};
use chrono::{DateTime, Datelike, Timelike, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use thiserror::Error;

/// Bound on the in-flight alert-line queue between detection threads and
/// the fast-log writer (mirrors the teacher's `PipelineConfig::queue_size`).
pub const FASTLOG_CHANNEL_CAPACITY: usize = 16_384;

pub const FASTLOG_DEFAULT_FILENAME: &str = "fast.log";

/// Up to this many raw payload bytes are rendered in a decoder-event
/// alert's `[Raw pkt: ...]` segment (§4.6).
pub const RAW_PKT_MAX_BYTES: usize = 32;

#[derive(Error, Debug)]
pub enum AlertOutputError {
    #[error("failed to open fast-log file {path}: {source}")]
    Open { path: String, #[source] source: std::io::Error },
    #[error("fast-log queue is full, alert dropped")]
    QueueFull,
    #[error("fast-log writer thread is no longer running")]
    WriterGone,
}

/// A rendered alert plus whatever 5-tuple or raw-packet context the format
/// needs; decoder-event alerts have no address/port pair at all.
#[derive(Debug, Clone)]
pub enum LogLine {
    FiveTuple {
        timestamp: DateTime<Utc>,
        alert: PacketAlert,
        proto: u8,
        src: Address,
        src_port: Option<u16>,
        dst: Address,
        dst_port: Option<u16>,
    },
    DecoderEvent {
        timestamp: DateTime<Utc>,
        alert: PacketAlert,
        raw: Vec<u8>,
        pcap_packet_num: Option<u64>,
    },
}

/// Render one line of the fast-log format:
/// `MM/DD/YY-HH:MM:SS.UUUUUU  [**] [gid:sid:rev] msg [**] [Classification: class_msg] [Priority: prio] {proto} src:sp -> dst:dp[ [Xref => keyREF]...]\n`
pub fn format_line(line: &LogLine) -> String {
    match line {
        LogLine::FiveTuple { timestamp, alert, proto, src, src_port, dst, dst_port } => {
            let mut s = format_header(timestamp, alert);
            s.push(' ');
            s.push_str(&format!(
                "{{{}}} {} -> {}",
                proto_label(*proto),
                format_endpoint(src, *src_port),
                format_endpoint(dst, *dst_port),
            ));
            append_xrefs(&mut s, alert);
            s.push('\n');
            s
        }
        LogLine::DecoderEvent { timestamp, alert, raw, pcap_packet_num } => {
            let mut s = format_header(timestamp, alert);
            s.push(' ');
            s.push_str(&format!("[Raw pkt: {}]", format_raw_bytes(raw)));
            if let Some(n) = pcap_packet_num {
                s.push_str(&format!(" [pcap file packet: {n}]"));
            }
            append_xrefs(&mut s, alert);
            s.push('\n');
            s
        }
    }
}

fn format_header(timestamp: &DateTime<Utc>, alert: &PacketAlert) -> String {
    let mut s = format!(
        "{:02}/{:02}/{:02}-{:02}:{:02}:{:02}.{:06}  [**] [{}:{}:{}] {} [**]",
        timestamp.month(),
        timestamp.day(),
        timestamp.year() % 100,
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second(),
        timestamp.timestamp_subsec_micros(),
        alert.gid,
        alert.sid,
        alert.rev,
        alert.msg,
    );
    if let Some(class_msg) = &alert.class_msg {
        s.push_str(&format!(" [Classification: {class_msg}]"));
    }
    s.push_str(&format!(" [Priority: {}]", alert.prio));
    s
}

fn append_xrefs(s: &mut String, alert: &PacketAlert) {
    for r in &alert.references {
        s.push_str(&format!(" [Xref => {r}]"));
    }
}

fn format_endpoint(addr: &Address, port: Option<u16>) -> String {
    match port {
        Some(p) => format!("{}:{}", format_addr(addr), p),
        None => format_addr(addr),
    }
}

fn format_addr(addr: &Address) -> String {
    match addr.family() {
        AddressFamily::V4 => addr.to_ipv4().expect("v4 family has a v4 octet view").to_string(),
        AddressFamily::V6 => addr.to_ipv6().expect("v6 family has a v6 octet view").to_string(),
    }
}

fn format_raw_bytes(raw: &[u8]) -> String {
    raw.iter()
        .take(RAW_PKT_MAX_BYTES)
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn proto_label(proto: u8) -> &'static str {
    match proto {
        6 => "TCP",
        17 => "UDP",
        1 => "ICMP",
        58 => "ICMPv6",
        47 => "GRE",
        _ => "IP",
    }
}

#[derive(Debug, Default)]
pub struct FastLogStats {
    pub received: AtomicU64,
    pub written: AtomicU64,
    pub dropped: AtomicU64,
}

/// Fast-log sink: a bounded channel feeding a dedicated writer thread that
/// owns the output file's `BufWriter` under a single mutex, matching the
/// teacher's one-`LogFileCtx`-mutex-per-output-file contract.
pub struct FastLogOutput {
    sender: Sender<LogLine>,
    stats: Arc<FastLogStats>,
    writer: Option<JoinHandle<()>>,
}

impl FastLogOutput {
    pub fn open(path: &Path) -> Result<Self, AlertOutputError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| AlertOutputError::Open { path: path.display().to_string(), source })?;
        Ok(Self::spawn(file))
    }

    fn spawn(file: File) -> Self {
        let (sender, receiver): (Sender<LogLine>, Receiver<LogLine>) = bounded(FASTLOG_CHANNEL_CAPACITY);
        let stats = Arc::new(FastLogStats::default());
        let worker_stats = stats.clone();
        let out = Mutex::new(BufWriter::new(file));

        let writer = std::thread::spawn(move || {
            Self::writer_loop(receiver, out, worker_stats);
        });

        FastLogOutput { sender, stats, writer: Some(writer) }
    }

    fn writer_loop(receiver: Receiver<LogLine>, out: Mutex<BufWriter<File>>, stats: Arc<FastLogStats>) {
        for line in receiver.iter() {
            let rendered = format_line(&line);
            let mut guard = out.lock();
            if let Err(e) = guard.write_all(rendered.as_bytes()).and_then(|_| guard.flush()) {
                tracing::warn!(error = %e, "failed to write fast-log line");
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            stats.written.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Enqueue one rendered alert. Never blocks; a full queue drops the
    /// line and bumps `stats.dropped`, matching `AlertSet`'s own silent
    /// overflow-drop contract.
    pub fn submit(&self, line: LogLine) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        match self.sender.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> &FastLogStats {
        &self.stats
    }
}

impl Drop for FastLogOutput {
    fn drop(&mut self) {
        let (sender, _) = bounded(0);
        let old_sender = std::mem::replace(&mut self.sender, sender);
        drop(old_sender);
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::Address;
    use chrono::TimeZone;

    fn alert(references: Vec<String>) -> PacketAlert {
        PacketAlert {
            sid: 1,
            gid: 1,
            rev: 0,
            prio: 3,
            class: None,
            action: "alert".to_string(),
            msg: "t1".to_string(),
            class_msg: Some("Attempted Information Leak".to_string()),
            references,
            num: 0,
            order_id: 0,
        }
    }

    #[test]
    fn five_tuple_line_matches_fast_log_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 13, 5, 9).unwrap();
        let line = LogLine::FiveTuple {
            timestamp: ts,
            alert: alert(vec!["url,www.example.com".to_string()]),
            proto: 6,
            src: Address::from_ipv4("192.168.1.1".parse().unwrap()),
            src_port: Some(12345),
            dst: Address::from_ipv4("10.0.0.1".parse().unwrap()),
            dst_port: Some(80),
        };
        let rendered = format_line(&line);
        assert!(rendered.starts_with("03/07/24-13:05:09."));
        assert!(rendered.contains("[1:1:0] t1"));
        assert!(rendered.contains("[Classification: Attempted Information Leak]"));
        assert!(rendered.contains("[Priority: 3]"));
        assert!(rendered.contains("{TCP} 192.168.1.1:12345 -> 10.0.0.1:80"));
        assert!(rendered.contains("[Xref => url,www.example.com]"));
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn decoder_event_line_renders_raw_bytes_capped_at_32() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let raw: Vec<u8> = (0u8..40).collect();
        let line = LogLine::DecoderEvent {
            timestamp: ts,
            alert: alert(Vec::new()),
            raw,
            pcap_packet_num: Some(7),
        };
        let rendered = format_line(&line);
        assert!(rendered.contains("[Raw pkt: 00 01 02"));
        assert!(!rendered.contains("27")); // byte 39 (0x27) is past the 32-byte cap
        assert!(rendered.contains("[pcap file packet: 7]"));
    }

    #[test]
    fn written_lines_are_appended_to_the_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fast.log");
        let output = FastLogOutput::open(&path).unwrap();
        output.submit(LogLine::FiveTuple {
            timestamp: Utc::now(),
            alert: alert(Vec::new()),
            proto: 6,
            src: Address::from_ipv4("127.0.0.1".parse().unwrap()),
            src_port: Some(1),
            dst: Address::from_ipv4("127.0.0.2".parse().unwrap()),
            dst_port: Some(2),
        });
        drop(output);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[1:1:0] t1"));
    }
}
