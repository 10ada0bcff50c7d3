//! Process-wide libcurl initialisation as a scoped resource.

use std::sync::Mutex;

use super::EngineError;

/// Number of live [`CurlGlobal`] guards.
static HOLDERS: Mutex<usize> = Mutex::new(0);

/// Guard holding libcurl's global state.
///
/// The first guard initialises libcurl, the last one to drop cleans it up.
/// Acquire it before any engine is built and keep it until every engine is
/// gone.
#[derive(Debug)]
pub struct CurlGlobal {
    _private: (),
}

impl CurlGlobal {
    pub fn acquire() -> Result<Self, EngineError> {
        let mut holders = HOLDERS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *holders == 0 {
            let code = unsafe { curl_sys::curl_global_init(curl_sys::CURL_GLOBAL_ALL) };
            if code != curl_sys::CURLE_OK {
                return Err(EngineError::GlobalInit(code as i32));
            }
            tracing::debug!("libcurl initialised");
        }
        *holders += 1;
        Ok(Self { _private: () })
    }

    #[cfg(test)]
    fn holders() -> usize {
        *HOLDERS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CurlGlobal {
    fn drop(&mut self) {
        let mut holders = HOLDERS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *holders -= 1;
        if *holders == 0 {
            unsafe { curl_sys::curl_global_cleanup() };
            tracing::debug!("libcurl cleaned up");
        }
    }
}
