use std::fs::File;
use std::path::Path;

use crate::ffi::syscall;
use crate::error::Result;

/// One event record pulled off a CPU's raw ring buffer: just enough to
/// drive the race-point state machine downstream — which kprobe fired,
/// which task, and when, in kernel timestamp order.
#[derive(Clone, Copy, Debug)]
pub struct RawEvent {
    pub timestamp: u64,
    pub event_id: u64,
    pub pid: i32,
}

/// A page-sized read buffer over one CPU's `trace_pipe_raw` file.
///
/// Each read returns zero or more complete ring-buffer sub-buffers,
/// which this type decodes into [`RawEvent`]s using the common
/// `common_type`/`common_pid` field offsets every kprobe event shares.
pub struct PerCpuReader {
    pub cpu: usize,
    file: File,
    page_size: usize,
}

/// Sub-buffer header: an 8-byte kernel timestamp of the first event,
/// followed by a 4-byte "commit" field whose low bits give the number
/// of bytes of event data that follow.
const HEADER_LEN: usize = 12;
const COMMIT_LEN_MASK: u32 = 0xf_ffff;

/// `RB_MISSED_EVENTS`: set on the commit field when the kernel dropped
/// one or more events from this sub-buffer because the ring buffer
/// filled up before it was drained — distinct from the `overrun`
/// counter in `per_cpu/cpu<i>/stats`, and read straight off the page
/// rather than a control file.
const MISSED_EVENTS_FLAG: u32 = 1 << 31;

/// Minimal per-event framing: a 4-byte encoded header word (an
/// extended timestamp delta tagged with an event "type_len") comes
/// first; a `type_len` of 0 through 28 is the inline record length in
/// words. 29 is `RINGBUF_TYPE_PADDING` (nothing usable follows in the
/// page); 30 is `RINGBUF_TYPE_TIME_EXTEND` (no payload, just 32 more
/// bits of delta for whatever real event follows it).
const TYPE_LEN_MAX_DATA: u32 = 28;
const TYPE_LEN_TIME_EXTEND: u32 = 30;

impl PerCpuReader {
    pub fn open(cpu: usize, per_cpu_dir: &Path, page_size: usize) -> Result<Self> {
        let path = per_cpu_dir.join(format!("cpu{cpu}")).join("trace_pipe_raw");
        let file = syscall::open_nonblocking(&path)?;
        Ok(PerCpuReader {
            cpu,
            file,
            page_size,
        })
    }

    /// Drains every complete page currently available without
    /// blocking, decoding each into its [`RawEvent`]s. Returns an empty
    /// vec once the pipe reports EAGAIN — "nothing more this round".
    ///
    /// The second element is sticky for the whole drain: `true` if any
    /// sub-buffer read along the way had `RB_MISSED_EVENTS` set, i.e.
    /// the kernel dropped events from this CPU before this round's
    /// reader could keep up.
    pub fn drain(
        &mut self,
        common_type: (usize, usize),
        common_pid: (usize, usize),
    ) -> Result<(Vec<RawEvent>, bool)> {
        let mut out = Vec::new();
        let mut missed_events = false;
        let mut page = vec![0u8; self.page_size];
        loop {
            match syscall::read_nonblocking(&self.file, &mut page)? {
                None => break,
                Some(n) if n < HEADER_LEN => break,
                Some(n) => {
                    decode_page(&page[..n], common_type, common_pid, &mut out, &mut missed_events);
                }
            }
        }
        Ok((out, missed_events))
    }
}

fn decode_page(
    page: &[u8],
    common_type: (usize, usize),
    common_pid: (usize, usize),
    out: &mut Vec<RawEvent>,
    missed_events: &mut bool,
) {
    let timestamp_base = u64::from_ne_bytes(match page[0..8].try_into() {
        Ok(b) => b,
        Err(_) => return,
    });
    let commit = u32::from_ne_bytes(match page[8..12].try_into() {
        Ok(b) => b,
        Err(_) => return,
    });
    if commit & MISSED_EVENTS_FLAG != 0 {
        *missed_events = true;
    }
    let data_len = (commit & COMMIT_LEN_MASK) as usize;
    let data = &page[HEADER_LEN..(HEADER_LEN + data_len).min(page.len())];

    let mut pos = 0usize;
    let mut timestamp = timestamp_base;
    while pos + 4 <= data.len() {
        let event_header = u32::from_ne_bytes(data[pos..pos + 4].try_into().unwrap());
        let type_len = event_header & 0x1f;
        let time_delta = (event_header >> 5) as u64;
        timestamp += time_delta;
        pos += 4;

        if type_len == 0 {
            // Extended record: next 4 bytes give the real length in words.
            if pos + 4 > data.len() {
                break;
            }
            let words = u32::from_ne_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            let len = words.saturating_mul(4);
            let record = match data.get(pos..pos + len) {
                Some(r) => r,
                None => break,
            };
            decode_record(record, timestamp, common_type, common_pid, out);
            pos += len;
        } else if type_len <= TYPE_LEN_MAX_DATA {
            let len = type_len as usize * 4;
            let record = match data.get(pos..pos + len) {
                Some(r) => r,
                None => break,
            };
            decode_record(record, timestamp, common_type, common_pid, out);
            pos += len;
        } else if type_len == TYPE_LEN_TIME_EXTEND {
            // No event payload — just 32 more bits of delta for
            // whatever real event follows. Consume them and keep
            // decoding the rest of the page.
            if pos + 4 > data.len() {
                break;
            }
            let high = u32::from_ne_bytes(data[pos..pos + 4].try_into().unwrap());
            timestamp += (high as u64) << 27;
            pos += 4;
        } else {
            // RINGBUF_TYPE_PADDING (or an unrecognized special record
            // type): nothing usable follows in this page.
            break;
        }
    }
}

fn decode_record(
    record: &[u8],
    timestamp: u64,
    common_type: (usize, usize),
    common_pid: (usize, usize),
    out: &mut Vec<RawEvent>,
) {
    let event_id = match read_uint(record, common_type.0, common_type.1) {
        Some(v) => v,
        None => return,
    };
    let pid = match read_uint(record, common_pid.0, common_pid.1) {
        Some(v) => v as i32,
        None => return,
    };
    out.push(RawEvent {
        timestamp,
        event_id,
        pid,
    });
}

fn read_uint(record: &[u8], offset: usize, size: usize) -> Option<u64> {
    let bytes = record.get(offset..offset + size)?;
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(bytes);
    Some(u64::from_ne_bytes(buf))
}

#[cfg(test)]
mod test {
    use super::*;

    fn build_page(timestamp: u64, events: &[(u32, i32)]) -> Vec<u8> {
        let mut data = Vec::new();
        for &(event_id, pid) in events {
            // type_len 3 => 12 bytes of payload (common_type u32 + common_pid i32 + pad)
            let header = 3u32;
            data.extend_from_slice(&header.to_ne_bytes());
            data.extend_from_slice(&event_id.to_ne_bytes());
            data.extend_from_slice(&pid.to_ne_bytes());
            data.extend_from_slice(&0u32.to_ne_bytes());
        }
        let mut page = Vec::new();
        page.extend_from_slice(&timestamp.to_ne_bytes());
        let commit = data.len() as u32;
        page.extend_from_slice(&commit.to_ne_bytes());
        page.extend_from_slice(&data);
        page
    }

    #[test]
    fn decodes_single_event_page() {
        let page = build_page(1000, &[(7, 42)]);
        let mut out = Vec::new();
        let mut missed = false;
        decode_page(&page, (0, 4), (4, 4), &mut out, &mut missed);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event_id, 7);
        assert_eq!(out[0].pid, 42);
        assert_eq!(out[0].timestamp, 1000);
        assert!(!missed);
    }

    #[test]
    fn decodes_multiple_events_with_increasing_timestamps() {
        let page = build_page(500, &[(1, 10), (2, 20)]);
        let mut out = Vec::new();
        let mut missed = false;
        decode_page(&page, (0, 4), (4, 4), &mut out, &mut missed);
        assert_eq!(out.len(), 2);
        assert!(out[1].timestamp >= out[0].timestamp);
    }

    #[test]
    fn empty_commit_decodes_nothing() {
        let page = build_page(1, &[]);
        let mut out = Vec::new();
        let mut missed = false;
        decode_page(&page, (0, 4), (4, 4), &mut out, &mut missed);
        assert!(out.is_empty());
    }

    #[test]
    fn missed_events_flag_on_commit_is_detected() {
        let mut page = build_page(1, &[]);
        let mut commit = u32::from_ne_bytes(page[8..12].try_into().unwrap());
        commit |= MISSED_EVENTS_FLAG;
        page[8..12].copy_from_slice(&commit.to_ne_bytes());

        let mut out = Vec::new();
        let mut missed = false;
        decode_page(&page, (0, 4), (4, 4), &mut out, &mut missed);
        assert!(missed);
    }

    #[test]
    fn time_extend_record_is_consumed_without_aborting_the_page() {
        let mut data = Vec::new();
        // type_len 30 (TIME_EXTEND), time_delta 0, followed by its
        // 32-bit high-order delta extension word.
        data.extend_from_slice(&30u32.to_ne_bytes());
        data.extend_from_slice(&1u32.to_ne_bytes());
        // then one real data event, type_len 3.
        data.extend_from_slice(&3u32.to_ne_bytes());
        data.extend_from_slice(&7u32.to_ne_bytes());
        data.extend_from_slice(&42i32.to_ne_bytes());
        data.extend_from_slice(&0u32.to_ne_bytes());

        let mut page = Vec::new();
        page.extend_from_slice(&1000u64.to_ne_bytes());
        let commit = data.len() as u32;
        page.extend_from_slice(&commit.to_ne_bytes());
        page.extend_from_slice(&data);

        let mut out = Vec::new();
        let mut missed = false;
        decode_page(&page, (0, 4), (4, 4), &mut out, &mut missed);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event_id, 7);
        assert_eq!(out[0].pid, 42);
        assert_eq!(out[0].timestamp, 1000 + (1u64 << 27));
        assert!(!missed);
    }
}
