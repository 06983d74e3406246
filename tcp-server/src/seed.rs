//! Idempotent root-directory fixture seeding (SPEC_FULL §6).
//!
//! Only writes files that don't already exist, so restarting the server
//! against a populated root is a no-op.

use std::path::Path;

const README: &str = "This directory is served by the TCP file-transfer test server.\n";

pub fn seed_root(root: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(root)?;

    let readme = root.join("readme.txt");
    if !readme.exists() {
        std::fs::write(&readme, README)?;
        tracing::info!(path = %readme.display(), "seeded readme.txt");
    }

    let documents = root.join("documents");
    if !documents.exists() {
        std::fs::create_dir_all(&documents)?;
        tracing::info!(path = %documents.display(), "seeded documents/");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn tempdir() -> std::path::PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("tcp-server-seed-{}-{n}", std::process::id()))
    }

    #[test]
    fn seeding_is_idempotent() {
        let root = tempdir();
        seed_root(&root).unwrap();
        std::fs::write(root.join("readme.txt"), b"custom content").unwrap();

        seed_root(&root).unwrap();

        let contents = std::fs::read_to_string(root.join("readme.txt")).unwrap();
        assert_eq!(contents, "custom content");
        assert!(root.join("documents").is_dir());

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn seeds_expected_entries() {
        let root = tempdir();
        seed_root(&root).unwrap();
        assert!(root.join("readme.txt").is_file());
        assert!(root.join("documents").is_dir());
        std::fs::remove_dir_all(&root).ok();
    }
}
