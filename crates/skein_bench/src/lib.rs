//! Benchmark utilities.

use rand::Rng;
use skein_core::{Config, Environment, PutFlags};

/// Generate random record data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Opens an in-memory environment holding `count` records of `size` bytes.
///
/// The buffer is sized so nothing is reclaimed.
pub fn filled_memory_env(count: usize, size: usize) -> Environment {
    let needed = (count * (size + 64)).next_power_of_two().max(4 * 1024 * 1024);
    let config = Config::memory().log_buffer_size(needed);
    let env = Environment::open_in_memory(config).expect("Failed to open environment");
    let data = random_data(size);
    for _ in 0..count {
        env.log_put(&data, PutFlags::NONE).expect("Failed to fill log");
    }
    env
}
