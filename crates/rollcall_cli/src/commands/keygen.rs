//! Keygen command implementation.

use rollcall_protocol::SharedKey;
use std::path::Path;

/// Runs the keygen command.
pub fn run(out: &Path, passphrase: Option<&str>, salt: &str) -> Result<(), Box<dyn std::error::Error>> {
    if out.exists() {
        return Err(format!("{} already exists; refusing to overwrite", out.display()).into());
    }

    let key = match passphrase {
        Some(passphrase) => SharedKey::derive_from_passphrase(passphrase.as_bytes(), salt.as_bytes())?,
        None => SharedKey::generate(),
    };
    key.save(out)?;

    println!("Wrote shared key to {}", out.display());
    println!("Copy this file to the server and every client.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_loadable_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.key");

        run(&path, None, "rollcall").unwrap();
        assert!(SharedKey::load(&path).is_ok());
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.key");

        run(&path, None, "rollcall").unwrap();
        let before = std::fs::read(&path).unwrap();
        assert!(run(&path, None, "rollcall").is_err());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn passphrase_is_deterministic() {
        let dir = tempdir().unwrap();
        let (a, b) = (dir.path().join("a.key"), dir.path().join("b.key"));

        run(&a, Some("correct horse"), "site-1").unwrap();
        run(&b, Some("correct horse"), "site-1").unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }
}
