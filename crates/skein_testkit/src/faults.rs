//! Fault injection for log files.
//!
//! These helpers damage the files of a [`MemoryDirectory`] the way a crash
//! or a bad disk would: flipped bits inside a record, a half-written record
//! at the end of a file, junk after the last record, or a file created but
//! never given its header.

use skein_core::log::file_name;
use skein_core::Lsn;
use skein_storage::{InMemoryBackend, MemoryDirectory, StorageBackend};

/// Shared handle to log file `seq`.
///
/// # Panics
///
/// Panics if the file does not exist.
pub fn log_file(dir: &MemoryDirectory, seq: u32) -> InMemoryBackend {
    dir.file(&file_name(seq))
        .unwrap_or_else(|| panic!("log file {seq} does not exist"))
}

/// Current length of log file `seq`.
pub fn file_len(dir: &MemoryDirectory, seq: u32) -> u64 {
    log_file(dir, seq).size().expect("Failed to size log file")
}

/// Length of the record at `lsn`, read from its prefix.
pub fn record_len(dir: &MemoryDirectory, lsn: Lsn) -> u32 {
    let bytes = log_file(dir, lsn.file)
        .read_at(u64::from(lsn.offset), 4)
        .expect("Record prefix is not in the file");
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Inverts one byte of file `seq`.
pub fn flip_byte(dir: &MemoryDirectory, seq: u32, offset: u64) {
    let file = log_file(dir, seq);
    let byte = file.read_at(offset, 1).expect("Offset is past the end of the file")[0];
    file.overwrite(offset, &[!byte]).expect("Failed to overwrite byte");
}

/// Damages the record at `lsn` so its checksum no longer matches.
///
/// The last byte of the record is flipped; it belongs to the payload, or
/// to the checksum itself for an empty payload, and both are covered.
pub fn corrupt_record(dir: &MemoryDirectory, lsn: Lsn) {
    let len = record_len(dir, lsn);
    flip_byte(dir, lsn.file, u64::from(lsn.offset) + u64::from(len) - 1);
}

/// Cuts the record at `lsn` in half and drops everything after it, as if
/// the process died while writing it.
pub fn tear_record(dir: &MemoryDirectory, lsn: Lsn) {
    let len = record_len(dir, lsn);
    let mut file = log_file(dir, lsn.file);
    file.truncate(u64::from(lsn.offset) + u64::from(len / 2))
        .expect("Failed to truncate log file");
}

/// Appends `bytes` after the last record of file `seq`.
pub fn append_garbage(dir: &MemoryDirectory, seq: u32, bytes: &[u8]) {
    let mut file = log_file(dir, seq);
    file.append(bytes).expect("Failed to append to log file");
}

/// Installs log file `seq` as `len` zero bytes, as left by a crash between
/// creating a file and writing its header.
pub fn blank_file(dir: &MemoryDirectory, seq: u32, len: usize) {
    dir.insert(&file_name(seq), vec![0; len]);
}

/// Overwrites the start of file `seq`'s header record with junk.
pub fn damage_header(dir: &MemoryDirectory, seq: u32) {
    log_file(dir, seq)
        .overwrite(4, &[0xde, 0xad, 0xbe, 0xef])
        .expect("Failed to overwrite header");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestEnv;
    use skein_core::PutFlags;

    #[test]
    fn tear_leaves_half_a_record() {
        let env = TestEnv::shared();
        let lsn = env.log_put(&[9; 100], PutFlags::SYNC).unwrap();
        let dir = env.directory().unwrap();
        let len = record_len(dir, lsn);
        tear_record(dir, lsn);
        assert_eq!(
            file_len(dir, lsn.file),
            u64::from(lsn.offset) + u64::from(len / 2)
        );
    }

    #[test]
    fn garbage_extends_the_file() {
        let env = TestEnv::shared();
        let lsn = env.log_put(b"x", PutFlags::SYNC).unwrap();
        let dir = env.directory().unwrap();
        let before = file_len(dir, lsn.file);
        append_garbage(dir, lsn.file, &[1, 2, 3]);
        assert_eq!(file_len(dir, lsn.file), before + 3);
    }
}
