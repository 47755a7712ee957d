//! Known-hosts membership checks
//!
//! Reads OpenSSH `known_hosts` files, both plaintext
//! (`host[,host...] keytype key`) and hashed
//! (`|1|<base64 salt>|<base64 hmac-sha1> keytype key`) entries.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::trace;

type HmacSha1 = Hmac<Sha1>;

const HASHED_KEY_MAGIC: &str = "|1|";

/// User and system known-hosts files, in lookup order
pub fn default_known_hosts_files() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("~"));
    vec![
        home.join(".ssh/known_hosts"),
        PathBuf::from("/etc/ssh/ssh_known_hosts"),
        PathBuf::from("/etc/ssh/ssh_known_hosts2"),
    ]
}

/// True when no readable file has an entry for `host`
pub fn not_in_host_file<P: AsRef<Path>>(host: &str, files: &[P]) -> bool {
    for path in files {
        let path = path.as_ref();
        let content = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                trace!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let content = String::from_utf8_lossy(&content);
        if content.lines().any(|line| line_matches(line, host)) {
            return false;
        }
    }
    true
}

fn line_matches(line: &str, host: &str) -> bool {
    let mut tokens = line.split_whitespace();
    let Some(mut hosts) = tokens.next() else {
        return false;
    };
    // @cert-authority / @revoked markers precede the host field
    if hosts.starts_with('@') {
        match tokens.next() {
            Some(next) => hosts = next,
            None => return false,
        }
    }
    if hosts.starts_with('#') {
        return false;
    }

    if let Some(hashed) = hosts.strip_prefix(HASHED_KEY_MAGIC) {
        // Corrupt hashed entries are skipped
        return hashed_entry_matches(hashed, host).unwrap_or(false);
    }

    hosts.split(',').any(|pattern| {
        pattern == host
            || pattern
                .strip_prefix('[')
                .and_then(|rest| rest.split_once("]:"))
                .is_some_and(|(name, _port)| name == host)
    })
}

fn hashed_entry_matches(entry: &str, host: &str) -> Option<bool> {
    let (salt, digest) = entry.split_once('|')?;
    let salt = STANDARD.decode(salt).ok()?;
    let digest = STANDARD.decode(digest).ok()?;

    let mut mac = HmacSha1::new_from_slice(&salt).ok()?;
    mac.update(host.as_bytes());
    Some(mac.verify_slice(&digest).is_ok())
}
