//! Archive command implementation.

use skein_core::log::file_name;
use skein_core::Environment;
use std::path::Path;

/// Runs the archive command.
pub fn run(path: &Path, remove: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env = super::open_env(path)?;
    for line in archive(&env, remove)? {
        println!("{line}");
    }
    env.close()?;
    Ok(())
}

/// Lists (or removes) the log files the last checkpoint no longer needs.
pub fn archive(env: &Environment, remove: bool) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let seqs = env.archive(remove)?;
    Ok(seqs
        .into_iter()
        .map(|seq| match env.log().files().path_of(seq) {
            Some(path) => path.display().to_string(),
            None => file_name(seq),
        })
        .collect())
}
