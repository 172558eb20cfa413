//! C FFI of the framemgr crate.
//!
//! This crate provides a C API so that the C parts of a camera driver (buffer
//! queue glue, interrupt handlers, hardware schedulers) can drive a frame
//! manager. The generated `framemgr.h` header also carries the numeric values
//! of the frame states and manager identity flags.

pub mod manager;

static INIT: std::sync::Once = std::sync::Once::new();

/// Log filter used when `RUST_LOG` is not set: a C host rarely sets it, and the
/// manager reports pool corruption at the `error` level.
#[cfg(feature = "env_logger")]
const DEFAULT_LOG_FILTER: &str = "framemgr=warn,framemgr_ffi=warn";

/// Initialize the framemgr library. This only sets up the proper hooks for
/// logging, so although it is not a hard requirement to call this function,
/// failure to do so will result in no logs being printed, including the
/// reports of a corrupted frame pool.
///
/// Calling it more than once is harmless.
#[no_mangle]
pub extern "C" fn framemgr_init() {
    INIT.call_once(|| {
        #[cfg(feature = "env_logger")]
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(DEFAULT_LOG_FILTER),
        )
        .format_timestamp(None)
        .init();

        #[cfg(feature = "android")]
        android_logger::init_once(
            android_logger::Config::default()
                .with_tag("framemgr")
                .with_min_level(log::Level::Info),
        );

        log::debug!("framemgr {} initialized", env!("CARGO_PKG_VERSION"));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        framemgr_init();
        framemgr_init();
        assert!(INIT.is_completed());
    }
}
