//! Test fixtures and environment helpers.
//!
//! Provides environments over a temporary directory, over a shared
//! [`MemoryDirectory`] (reopenable and open to fault injection), and fully
//! in memory.

use skein_core::{Config, CursorOp, Environment, LogRecord, RecordType};
use skein_storage::{LogDirectory, MemoryDirectory};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Where a [`TestEnv`] keeps its log.
enum Backing {
    Memory,
    Shared(Arc<MemoryDirectory>),
    Disk(TempDir),
}

/// A test environment with automatic cleanup.
pub struct TestEnv {
    /// The environment instance.
    pub env: Environment,
    config: Config,
    backing: Backing,
}

impl TestEnv {
    /// Creates an environment whose log lives in the buffer only.
    pub fn memory() -> Self {
        Self::memory_with(Config::memory())
    }

    /// Creates an in-memory environment with `config`.
    pub fn memory_with(config: Config) -> Self {
        let env = Environment::open_in_memory(config.clone())
            .expect("Failed to open in-memory environment");
        Self {
            env,
            config,
            backing: Backing::Memory,
        }
    }

    /// Creates an environment in a fresh temporary directory.
    pub fn disk() -> Self {
        Self::disk_with(Config::default())
    }

    /// Creates an on-disk environment with `config`.
    pub fn disk_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let env =
            Environment::open(temp_dir.path(), config.clone()).expect("Failed to open environment");
        Self {
            env,
            config,
            backing: Backing::Disk(temp_dir),
        }
    }

    /// Creates an environment writing log files into a [`MemoryDirectory`].
    ///
    /// The files use the on-disk format, so the environment can be reopened
    /// and the files damaged with [`crate::faults`].
    pub fn shared() -> Self {
        Self::shared_with(Config::default())
    }

    /// Creates a shared-directory environment with `config`.
    pub fn shared_with(config: Config) -> Self {
        Self::shared_over(Arc::new(MemoryDirectory::new()), config)
    }

    /// Opens an environment over an existing memory directory.
    pub fn shared_over(dir: Arc<MemoryDirectory>, config: Config) -> Self {
        let logs: Arc<dyn LogDirectory> = Arc::clone(&dir) as Arc<dyn LogDirectory>;
        let env = Environment::open_with_directory(config.clone(), logs)
            .expect("Failed to open environment");
        Self {
            env,
            config,
            backing: Backing::Shared(dir),
        }
    }

    /// The memory directory, for shared environments.
    pub fn directory(&self) -> Option<&Arc<MemoryDirectory>> {
        match &self.backing {
            Backing::Shared(dir) => Some(dir),
            _ => None,
        }
    }

    /// The temporary directory, for on-disk environments.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Disk(dir) => Some(dir.path()),
            _ => None,
        }
    }

    /// Closes the environment cleanly and opens it again.
    ///
    /// # Panics
    ///
    /// Panics for in-memory environments, which do not survive a close.
    pub fn reopen(self) -> Self {
        let Self {
            env,
            config,
            backing,
        } = self;
        env.close().expect("Failed to close environment");
        drop(env);
        Self::open_backing(config, backing)
    }

    /// Abandons the environment without closing it and opens the log
    /// again, as after a process crash. Records still in the log buffer
    /// are lost.
    ///
    /// # Panics
    ///
    /// Panics unless the environment is shared: a crashed on-disk
    /// environment would keep its directory locked.
    pub fn crash(self) -> Self {
        let Self {
            env,
            config,
            backing,
        } = self;
        assert!(
            matches!(backing, Backing::Shared(_)),
            "only shared environments can simulate a crash"
        );
        // Skips Drop, which would close (and flush) the environment.
        std::mem::forget(env);
        Self::open_backing(config, backing)
    }

    fn open_backing(config: Config, backing: Backing) -> Self {
        match backing {
            Backing::Memory => panic!("in-memory environments cannot be reopened"),
            Backing::Shared(dir) => Self::shared_over(dir, config),
            Backing::Disk(temp_dir) => {
                let env = Environment::open(temp_dir.path(), config.clone())
                    .expect("Failed to reopen environment");
                Self {
                    env,
                    config,
                    backing: Backing::Disk(temp_dir),
                }
            }
        }
    }

    /// Every record in the log, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        read_all(&self.env)
    }

    /// Payloads of the user records in the log, oldest first.
    pub fn user_payloads(&self) -> Vec<Vec<u8>> {
        self.records()
            .into_iter()
            .filter(|r| r.rectype() == RecordType::User)
            .map(|r| r.payload)
            .collect()
    }
}

impl std::ops::Deref for TestEnv {
    type Target = Environment;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}

/// Reads every record of `env`'s log with a forward cursor.
pub fn read_all(env: &Environment) -> Vec<LogRecord> {
    let mut cursor = env.log_cursor();
    let mut records = Vec::new();
    while let Some(record) = cursor.get(CursorOp::Next).expect("Failed to read log") {
        records.push(record);
    }
    records
}

/// Runs a test with a temporary in-memory environment.
///
/// # Example
///
/// ```rust,ignore
/// use skein_testkit::with_memory_env;
///
/// #[test]
/// fn my_test() {
///     with_memory_env(|env| {
///         env.log_put(b"hello", PutFlags::NONE).unwrap();
///     });
/// }
/// ```
pub fn with_memory_env<F, R>(f: F) -> R
where
    F: FnOnce(&Environment) -> R,
{
    let test_env = TestEnv::memory();
    f(&test_env.env)
}

/// Runs a test with an environment in a temporary directory.
pub fn with_disk_env<F, R>(f: F) -> R
where
    F: FnOnce(&Environment, &Path) -> R,
{
    let test_env = TestEnv::disk();
    let path = test_env.path().expect("Disk environment should have a path");
    f(&test_env.env, path)
}
