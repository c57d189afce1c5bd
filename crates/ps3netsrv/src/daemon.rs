//! Detaching from the controlling terminal.

use nix::{
    sys::stat::{Mode, umask},
    unistd::daemon,
};

/// Fork into the background with a cleared umask.
///
/// Must run before any runtime threads exist: only the calling thread
/// survives the fork. Standard streams are redirected to `/dev/null`.
pub fn daemonize() -> nix::Result<()> {
    umask(Mode::empty());
    // The working directory is changed to the served root afterwards.
    daemon(true, false)
}
