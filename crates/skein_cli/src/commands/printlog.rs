//! Printlog command implementation.

use serde::Serialize;
use skein_core::{CursorOp, LogRecord, Lsn, RecordType, TxnRecord};
use std::path::Path;

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Record position (`file/offset`).
    pub lsn: String,
    /// Record type.
    pub record_type: &'static str,
    /// Total framed length.
    pub len: u32,
    /// Owning transaction (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txnid: Option<String>,
    /// Previous record of the same transaction (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_lsn: Option<String>,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Decoded transaction record fields (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RecordInfo {
    /// Describes one record.
    pub fn from_record(record: &LogRecord) -> Self {
        let header = &record.header;
        Self {
            lsn: record.lsn.to_string(),
            record_type: record.rectype().name(),
            len: header.len,
            txnid: (!header.txnid.is_none()).then(|| header.txnid.to_string()),
            prev_lsn: (!header.prev_lsn.is_zero()).then(|| header.prev_lsn.to_string()),
            payload_size: record.payload.len(),
            detail: describe(record),
        }
    }
}

fn describe(record: &LogRecord) -> Option<String> {
    match record.rectype() {
        RecordType::FileHeader => None,
        RecordType::User => Some(format!("data={}", hex_preview(&record.payload))),
        rectype => Some(match TxnRecord::decode(rectype, record.lsn, &record.payload) {
            Ok(TxnRecord::Commit { timestamp }) => format!("timestamp={timestamp}"),
            Ok(TxnRecord::ChildCommit {
                child,
                child_last_lsn,
            }) => format!("child={child} child_last={child_last_lsn}"),
            Ok(TxnRecord::Abort) => String::new(),
            Ok(TxnRecord::Prepare { gid, begin_lsn }) => {
                format!("gid={} begin={begin_lsn}", hex_preview(&gid))
            }
            Ok(TxnRecord::TxnRecycle { min, max }) => format!("min={min:08x} max={max:08x}"),
            Ok(TxnRecord::Checkpoint { ckp_lsn, timestamp }) => {
                format!("ckp_lsn={ckp_lsn} timestamp={timestamp}")
            }
            Err(e) => format!("undecodable: {e}"),
        }),
    }
}

/// Runs the printlog command.
pub fn run(
    path: &Path,
    start: Option<Lsn>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let env = super::open_env(path)?;
    let records = read_records(&env, start, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    env.close()?;
    Ok(())
}

/// Reads up to `limit` records starting at `start` (or the first record).
pub fn read_records(
    env: &skein_core::Environment,
    start: Option<Lsn>,
    limit: Option<usize>,
) -> Result<Vec<RecordInfo>, Box<dyn std::error::Error>> {
    let max_records = limit.unwrap_or(usize::MAX);
    let mut cursor = env.log_cursor();
    let mut records = Vec::new();
    let mut op = match start {
        Some(lsn) => CursorOp::Set(lsn),
        None => CursorOp::First,
    };

    while records.len() < max_records {
        let Some(record) = cursor.get(op)? else {
            break;
        };
        records.push(RecordInfo::from_record(&record));
        op = CursorOp::Next;
    }

    Ok(records)
}

fn print_text_output(records: &[RecordInfo]) {
    println!("Log Records ({} total)", records.len());
    println!("================");
    println!();

    for record in records {
        print!("[{:>14}] {:12} len={}", record.lsn, record.record_type, record.len);

        if let Some(ref txnid) = record.txnid {
            print!(" {txnid}");
        }
        if let Some(ref prev) = record.prev_lsn {
            print!(" prev={prev}");
        }
        if let Some(ref detail) = record.detail {
            if !detail.is_empty() {
                print!(" {detail}");
            }
        }

        println!();
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    let shown: String = bytes.iter().take(16).map(|b| format!("{b:02x}")).collect();
    if bytes.len() > 16 {
        format!("{shown}...")
    } else {
        shown
    }
}
