use std::env;
use std::ffi::OsString;
use std::path::Path;
use std::sync::{LazyLock, Mutex, MutexGuard};

use tempfile::TempDir;

/// Global mutex to ensure only one test manipulates HOME at a time.
static HOME_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// RAII guard that redirects HOME to a temporary directory.
///
/// While the guard is alive, configuration lookups that resolve the user's
/// home directory find the sandbox instead, so a developer's own
/// `~/.muster.toml` cannot change test outcomes.
pub struct TempHomeGuard {
    _lock: MutexGuard<'static, ()>,
    temp_home: TempDir,
    prev_home: Option<OsString>,
    #[cfg(windows)]
    prev_userprofile: Option<OsString>,
}

impl TempHomeGuard {
    /// Create a new guard with a fresh temporary home directory.
    pub fn new() -> Self {
        let lock = HOME_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let temp_home = TempDir::new().expect("failed to create temporary HOME");
        let prev_home = env::var_os("HOME");
        #[cfg(windows)]
        let prev_userprofile = env::var_os("USERPROFILE");

        // SAFETY: we hold HOME_MUTEX, ensuring no other thread mutates the
        // environment while we redirect HOME for the test.
        unsafe {
            env::set_var("HOME", temp_home.path());
            #[cfg(windows)]
            env::set_var("USERPROFILE", temp_home.path());
        }

        Self {
            _lock: lock,
            temp_home,
            prev_home,
            #[cfg(windows)]
            prev_userprofile,
        }
    }

    /// Path to the temporary HOME directory.
    pub fn home(&self) -> &Path {
        self.temp_home.path()
    }
}

impl Drop for TempHomeGuard {
    fn drop(&mut self) {
        // SAFETY: guarded by HOME_MUTEX; we restore the environment to its
        // previous state before releasing the lock.
        unsafe {
            restore("HOME", self.prev_home.as_ref());
            #[cfg(windows)]
            restore("USERPROFILE", self.prev_userprofile.as_ref());
        }
    }
}

/// # Safety
///
/// Callers must hold `HOME_MUTEX`.
unsafe fn restore(key: &str, prev: Option<&OsString>) {
    // SAFETY: upheld by the caller.
    unsafe {
        match prev {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }
}
