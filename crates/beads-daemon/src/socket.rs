//! Socket path derivation and stale-socket cleanup.
//!
//! The socket lives at `.beads/bd.sock` when the absolute path fits the
//! `sockaddr_un` limit; otherwise a short path in the system temp directory
//! is derived from a hash of the workspace path, so every client computes
//! the same fallback deterministically.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

/// Socket file name inside `.beads/`.
pub const SOCKET_FILE_NAME: &str = "bd.sock";

/// Pid file name inside `.beads/`.
pub const PID_FILE_NAME: &str = "daemon.pid";

/// Conservative bound under the 108-byte `sun_path` limit.
const MAX_SOCKET_PATH: usize = 96;

/// Derives the socket path for a workspace.
pub fn socket_path(beads_dir: &Path) -> PathBuf {
    let preferred = beads_dir.join(SOCKET_FILE_NAME);
    if preferred.as_os_str().len() <= MAX_SOCKET_PATH {
        return preferred;
    }

    let digest = Sha256::digest(beads_dir.as_os_str().as_encoded_bytes());
    let short = &format!("{digest:x}")[..16];
    std::env::temp_dir().join(format!("bd-{short}.sock"))
}

/// Removes a socket file left behind by a crashed daemon.
///
/// A connect attempt distinguishes a live daemon from a stale file: if
/// nothing answers, the file is removed so bind can succeed.
pub fn cleanup_stale_socket(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    match UnixStream::connect(path) {
        Ok(_) => Err(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("a daemon is already listening on {}", path.display()),
        )),
        Err(_) => {
            info!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_workspace_uses_beads_dir() {
        let path = socket_path(Path::new("/tmp/w/.beads"));
        assert_eq!(path, Path::new("/tmp/w/.beads/bd.sock"));
    }

    #[test]
    fn long_workspace_falls_back_to_hash() {
        let long = format!("/tmp/{}/.beads", "x".repeat(200));
        let path = socket_path(Path::new(&long));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("bd-"));
        assert!(name.ends_with(".sock"));
        assert!(path.as_os_str().len() <= MAX_SOCKET_PATH);

        // Deterministic: every client computes the same fallback.
        assert_eq!(path, socket_path(Path::new(&long)));
    }

    #[test]
    fn stale_socket_removed() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("bd.sock");
        // A plain file standing in for a dead daemon's socket.
        std::fs::write(&sock, b"").unwrap();

        cleanup_stale_socket(&sock).unwrap();
        assert!(!sock.exists());
    }

    #[test]
    fn missing_socket_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        cleanup_stale_socket(&dir.path().join("bd.sock")).unwrap();
    }
}
