//! Stat command implementation.

use serde::Serialize;
use skein_core::{Environment, LogStat, TxnStat};
use std::path::Path;

/// Statistics for output.
#[derive(Debug, Serialize)]
pub struct EnvStats {
    /// Log statistics.
    pub log: LogStats,
    /// Transaction statistics.
    pub txn: TxnStats,
}

/// Log statistics for output.
#[derive(Debug, Serialize)]
pub struct LogStats {
    /// Position of the next record.
    pub current_lsn: String,
    /// Everything before this is on stable storage.
    pub synced_lsn: String,
    /// Recovery start point of the last checkpoint.
    pub checkpoint_lsn: String,
    /// Records appended.
    pub records: u64,
    /// Bytes appended.
    pub bytes: u64,
    /// Buffer writes to files.
    pub writes: u64,
    /// File syncs.
    pub fsyncs: u64,
    /// File switches.
    pub rotations: u64,
    /// Buffer capacity.
    pub buffer_size: usize,
    /// Size limit of the current file.
    pub file_size: u32,
    /// Files on disk.
    pub files: usize,
}

/// Transaction statistics for output.
#[derive(Debug, Serialize)]
pub struct TxnStats {
    /// Last id handed out.
    pub last_txnid: String,
    /// Highest id before the next recycle.
    pub max_txnid: String,
    /// Position of the last checkpoint record.
    pub last_checkpoint: String,
    /// Transactions begun.
    pub begins: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Transactions aborted.
    pub aborts: u64,
    /// Transactions active.
    pub active: u64,
}

impl EnvStats {
    /// Collects statistics from an open environment.
    pub fn collect(env: &Environment) -> Result<Self, Box<dyn std::error::Error>> {
        let files = env.log().files().list()?.len();
        Ok(Self {
            log: LogStats::from_stat(&env.log_stat(), files),
            txn: TxnStats::from_stat(&env.txn_stat()),
        })
    }
}

impl LogStats {
    fn from_stat(stat: &LogStat, files: usize) -> Self {
        Self {
            current_lsn: stat.current_lsn.to_string(),
            synced_lsn: stat.synced_lsn.to_string(),
            checkpoint_lsn: stat.checkpoint_lsn.to_string(),
            records: stat.records,
            bytes: stat.bytes,
            writes: stat.writes,
            fsyncs: stat.fsyncs,
            rotations: stat.rotations,
            buffer_size: stat.buffer_size,
            file_size: stat.file_size,
            files,
        }
    }
}

impl TxnStats {
    fn from_stat(stat: &TxnStat) -> Self {
        Self {
            last_txnid: format!("{:08x}", stat.last_txnid),
            max_txnid: format!("{:08x}", stat.max_txnid),
            last_checkpoint: stat.last_checkpoint.to_string(),
            begins: stat.begins,
            commits: stat.commits,
            aborts: stat.aborts,
            active: stat.active,
        }
    }
}

/// Runs the stat command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let env = super::open_env(path)?;
    let stats = EnvStats::collect(&env)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
        _ => print_text_output(&stats),
    }

    env.close()?;
    Ok(())
}

fn print_text_output(stats: &EnvStats) {
    println!("Log");
    println!("===");
    println!("Current LSN:        {}", stats.log.current_lsn);
    println!("Synced LSN:         {}", stats.log.synced_lsn);
    println!("Checkpoint LSN:     {}", stats.log.checkpoint_lsn);
    println!("Log files:          {}", stats.log.files);
    println!("Buffer size:        {} bytes", stats.log.buffer_size);
    println!("Current file size:  {} bytes", stats.log.file_size);
    println!();
    println!("Transactions");
    println!("============");
    println!("Last txnid:         {}", stats.txn.last_txnid);
    println!("Max txnid:          {}", stats.txn.max_txnid);
    println!("Last checkpoint:    {}", stats.txn.last_checkpoint);
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::{Config, TxnOptions};
    use tempfile::tempdir;

    #[test]
    fn collects_from_a_used_environment() {
        let tmp = tempdir().unwrap();
        let env = Environment::open(tmp.path(), Config::default()).unwrap();
        let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
        env.txn_put(&txn, b"x").unwrap();
        env.txn_commit(&txn, None).unwrap();

        let stats = EnvStats::collect(&env).unwrap();
        assert_eq!(stats.log.files, 1);
        assert_eq!(stats.log.records, 2);
        assert_eq!(stats.txn.commits, 1);
        assert_eq!(stats.txn.last_txnid, "80000000");

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["txn"]["begins"], 1);
    }
}
