#![allow(unused_macros)]

/// Helper macro for locking items, propagating a poisoned lock as [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let mut state = lock!(self.state);
///  state.programs.clear();
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for checking the status of a native call
///
/// Returns early with the raw [`crate::native::HResult`] when it is not `S_OK`, so it can only
/// be used in functions returning [`crate::native::Status`].
///
/// ```rust, ignore
///  check_hr!(((*vtbl).Start)(this), "ICorRuntimeHost::Start");
/// ```
macro_rules! check_hr {
    ($hr:expr, $call:expr) => {{
        let hr: crate::native::HResult = $hr;
        if hr.is_ok() {
            log::trace!("{} returned S_OK", $call);
        } else {
            log::debug!("{} returned {}", $call, hr);
            return Err(hr);
        }
    }};
}
