//! Socket path resolution.
//!
//! The daemon listens on a per-user Unix socket. The path comes from
//! `TAPESH_SOCKET` when set, otherwise `$XDG_RUNTIME_DIR/tapesh.sock`,
//! falling back to a uid-scoped directory under the system temp dir. The
//! parent directory is created mode 0700 by whoever binds.

use std::path::PathBuf;

/// Overrides the socket path.
pub const SOCKET_ENV: &str = "TAPESH_SOCKET";

/// Exported into the child shell so nested wrappers can refuse to start.
/// Value is `<short_id>` or `<short_id> - <title>`.
pub const SESSION_ENV: &str = "TAPESH";

/// The default socket path for this user.
pub fn default_socket_path() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_RUNTIME_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join("tapesh.sock");
    }
    let uid = nix::unistd::getuid();
    std::env::temp_dir()
        .join(format!("tapesh-{uid}"))
        .join("tapesh.sock")
}

/// The socket path from `TAPESH_SOCKET`, or the default.
pub fn socket_path_from_env() -> PathBuf {
    match std::env::var_os(SOCKET_ENV).filter(|p| !p.is_empty()) {
        Some(p) => PathBuf::from(p),
        None => default_socket_path(),
    }
}
