//! Module for creating and driving frame managers from C.
//!
//! Frame managers are created using [`framemgr_new`] and remain valid until
//! being given to [`framemgr_destroy`]. A manager is created closed: its pool
//! must be allocated with [`framemgr_open`] before frames can be moved around.
//!
//! States are passed as their numeric value, given by the `FRAMEMGR_STATE_*`
//! constants. Functions returning a `c_int` return 0 (or a
//! positive value where documented) on success and a negative errno value on
//! failure:
//!
//! * `-EINVAL` for an invalid state, frame index, or a frame that is already
//!   queued;
//! * `-ENOENT` when the queue looked at is empty or contains no matching
//!   frame;
//! * `-ENOMEM` when the pool cannot be allocated;
//! * `-EFAULT` when the manager detected a corruption of its accounting. The
//!   caller must consider the manager unusable.
//!
//! All functions can be called concurrently from any thread on the same
//! manager.
#![allow(non_camel_case_types)]

use log::{error, info, warn};
use nix::errno::Errno;
use std::{
    ffi::CStr,
    os::raw::{c_char, c_int, c_uint},
};

use ::framemgr::{FrameManager, FrameMgrError, FrameMgrId, FrameState, TraceMask};

/// Numeric values of the frame states, as taken and returned by the functions
/// of this module.
pub const FRAMEMGR_STATE_FREE: u32 = 0;
pub const FRAMEMGR_STATE_REQUEST: u32 = 1;
pub const FRAMEMGR_STATE_PROCESS: u32 = 2;
pub const FRAMEMGR_STATE_COMPLETE: u32 = 3;

/// Identity flags that can be given to [`framemgr_new`], next to a sub-id in
/// the low 12 bits.
pub const FRAMEMGR_ID_LATE: u32 = 0x0000_f000;
pub const FRAMEMGR_ID_SHOT: u32 = 0x0001_0000;
pub const FRAMEMGR_ID_HW: u32 = 0x0100_0000;

/// A frame manager instance.
pub struct framemgr {
    mgr: FrameManager,
}

fn errno_of(e: &FrameMgrError) -> c_int {
    let errno = match e {
        FrameMgrError::InvalidState(_)
        | FrameMgrError::NullFrame { .. }
        | FrameMgrError::AlreadyQueued { .. } => Errno::EINVAL,
        FrameMgrError::AllocationFailed(_) => Errno::ENOMEM,
        FrameMgrError::EmptySource { .. } | FrameMgrError::NotQueued { .. } => Errno::EFAULT,
    };

    -(errno as c_int)
}

fn to_ret(res: ::framemgr::Result<()>) -> c_int {
    match res {
        Ok(()) => 0,
        Err(e) => {
            if e.is_fatal() {
                error!("Frame manager is corrupted: {}", e);
            } else {
                warn!("Frame manager operation failed: {}", e);
            }
            errno_of(&e)
        }
    }
}

/// Write the index returned by a lookup into `index`.
unsafe fn to_index_ret(res: ::framemgr::Result<Option<usize>>, index: *mut c_uint) -> c_int {
    match res {
        Ok(Some(i)) => {
            *index = i as c_uint;
            0
        }
        Ok(None) => -(Errno::ENOENT as c_int),
        Err(e) => to_ret(Err(e)),
    }
}

fn state_of(state: c_uint) -> ::framemgr::Result<FrameState> {
    FrameState::n(state).ok_or(FrameMgrError::InvalidState(FrameState::Invalid))
}

/// Create a new, closed frame manager.
///
/// * `id` is the identity of the manager. Bit 24 marks a pool owned by the
///   hardware layer, for which frames entering PROCESS do not get their output
///   flags backed up.
/// * `name` is the name used to identify the manager in logs.
///
/// Returns NULL if `name` is not valid UTF-8.
///
/// # Safety
///
/// `name` must be a valid, zero-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn framemgr_new(id: u32, name: *const c_char) -> *mut framemgr {
    assert!(!name.is_null());

    let name = match CStr::from_ptr(name).to_str() {
        Ok(name) => name,
        Err(e) => {
            error!("Invalid frame manager name: {}", e);
            return std::ptr::null_mut();
        }
    };

    let mgr = Box::new(framemgr {
        mgr: FrameManager::new(FrameMgrId::from_bits_retain(id), name),
    });

    Box::into_raw(mgr)
}

/// Destroy a frame manager, releasing its pool.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`],
/// and must not be used again after this function is called.
#[no_mangle]
pub unsafe extern "C" fn framemgr_destroy(mgr: *mut framemgr) {
    if mgr.is_null() {
        warn!("Trying to destroy a NULL frame manager");
        return;
    }

    let mgr = Box::from_raw(mgr);
    info!("[{}] destroying frame manager", mgr.mgr.name());
}

/// Allocate a pool of `buffer_count` frames, all FREE. An already open pool is
/// released first. A `buffer_count` of 0 just releases the pool.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
#[no_mangle]
pub unsafe extern "C" fn framemgr_open(mgr: *const framemgr, buffer_count: c_uint) -> c_int {
    assert!(!mgr.is_null());
    let mgr = &*mgr;

    to_ret(mgr.mgr.open(buffer_count as usize))
}

/// Release the pool of `mgr`.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
#[no_mangle]
pub unsafe extern "C" fn framemgr_close(mgr: *const framemgr) {
    assert!(!mgr.is_null());
    let mgr = &*mgr;

    mgr.mgr.close();
}

/// Insert the untracked frame `index` into `state`: back at the head if `state`
/// is the one it was taken from with [`framemgr_get`], at the tail otherwise.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
#[no_mangle]
pub unsafe extern "C" fn framemgr_put(mgr: *const framemgr, index: c_uint, state: c_uint) -> c_int {
    assert!(!mgr.is_null());
    let mgr = &*mgr;

    to_ret(state_of(state).and_then(|state| mgr.mgr.put(index as usize, state)))
}

/// Take the frame at the head of `state` out of its queue and write its index
/// into `index`. The frame remains untracked until given to [`framemgr_put`].
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
/// `index` must point to valid memory that can receive an `unsigned int`.
#[no_mangle]
pub unsafe extern "C" fn framemgr_get(
    mgr: *const framemgr,
    state: c_uint,
    index: *mut c_uint,
) -> c_int {
    assert!(!mgr.is_null());
    assert!(!index.is_null());
    let mgr = &*mgr;

    to_index_ret(state_of(state).and_then(|state| mgr.mgr.get(state)), index)
}

/// Move frame `index` from its current state to the tail of `state`.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
#[no_mangle]
pub unsafe extern "C" fn framemgr_trans(
    mgr: *const framemgr,
    index: c_uint,
    state: c_uint,
) -> c_int {
    assert!(!mgr.is_null());
    let mgr = &*mgr;

    to_ret(state_of(state).and_then(|state| mgr.mgr.trans(index as usize, state)))
}

/// Write the index of the frame at the head of `state` into `index`, without
/// removing it.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
/// `index` must point to valid memory that can receive an `unsigned int`.
#[no_mangle]
pub unsafe extern "C" fn framemgr_peek(
    mgr: *const framemgr,
    state: c_uint,
    index: *mut c_uint,
) -> c_int {
    assert!(!mgr.is_null());
    assert!(!index.is_null());
    let mgr = &*mgr;

    to_index_ret(state_of(state).and_then(|state| mgr.mgr.peek(state)), index)
}

/// Same as [`framemgr_peek`], but for the tail of `state`.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
/// `index` must point to valid memory that can receive an `unsigned int`.
#[no_mangle]
pub unsafe extern "C" fn framemgr_peek_tail(
    mgr: *const framemgr,
    state: c_uint,
    index: *mut c_uint,
) -> c_int {
    assert!(!mgr.is_null());
    assert!(!index.is_null());
    let mgr = &*mgr;

    to_index_ret(state_of(state).and_then(|state| mgr.mgr.peek_tail(state)), index)
}

/// Find the first frame of `state` whose frame count is `fcount` and write its
/// index into `index`.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
/// `index` must point to valid memory that can receive an `unsigned int`.
#[no_mangle]
pub unsafe extern "C" fn framemgr_find_fcount(
    mgr: *const framemgr,
    state: c_uint,
    fcount: u64,
    index: *mut c_uint,
) -> c_int {
    assert!(!mgr.is_null());
    assert!(!index.is_null());
    let mgr = &*mgr;

    to_index_ret(
        state_of(state).and_then(|state| mgr.mgr.find_by_fcount(state, fcount)),
        index,
    )
}

/// Set the frame count and the pending output flags of frame `index`.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
#[no_mangle]
pub unsafe extern "C" fn framemgr_set_frame_info(
    mgr: *const framemgr,
    index: c_uint,
    fcount: u64,
    out_flags: u64,
) -> c_int {
    assert!(!mgr.is_null());
    let mgr = &*mgr;

    to_ret(mgr.mgr.update_frame(index as usize, |frame| {
        frame.fcount = fcount;
        frame.out_flags = out_flags;
    }))
}

/// Return the number of frames in `state`, or a negative errno value.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
#[no_mangle]
pub unsafe extern "C" fn framemgr_count(mgr: *const framemgr, state: c_uint) -> c_int {
    assert!(!mgr.is_null());
    let mgr = &*mgr;

    match state_of(state).and_then(|state| mgr.mgr.count(state)) {
        Ok(count) => count as c_int,
        Err(e) => errno_of(&e),
    }
}

/// Return every frame of `mgr` to FREE. To be called on stream off.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
#[no_mangle]
pub unsafe extern "C" fn framemgr_flush(mgr: *const framemgr) -> c_int {
    assert!(!mgr.is_null());
    let mgr = &*mgr;

    to_ret(mgr.mgr.flush())
}

/// Select which queues are dumped by [`framemgr_print_queues`], one bit per
/// state. Unknown bits are ignored.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
#[no_mangle]
pub unsafe extern "C" fn framemgr_set_trace_mask(mgr: *const framemgr, mask: u32) {
    assert!(!mgr.is_null());
    let mgr = &*mgr;

    mgr.mgr.set_trace_mask(TraceMask::from_bits_truncate(mask));
}

/// Log the content of the queues of `mgr`.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
#[no_mangle]
pub unsafe extern "C" fn framemgr_print_queues(mgr: *const framemgr) {
    assert!(!mgr.is_null());
    let mgr = &*mgr;

    mgr.mgr.print_all();
}

/// Return the name of `state` as a static, zero-terminated string, or NULL if
/// `state` is not a valid state number.
#[no_mangle]
pub extern "C" fn framemgr_state_name(state: c_uint) -> *const c_char {
    let name: &'static [u8] = match FrameState::n(state) {
        Some(FrameState::Free) => b"FREE\0",
        Some(FrameState::Request) => b"REQUEST\0",
        Some(FrameState::Process) => b"PROCESS\0",
        Some(FrameState::Complete) => b"COMPLETE\0",
        Some(FrameState::Invalid) => b"INVALID\0",
        None => return std::ptr::null(),
    };

    name.as_ptr() as *const c_char
}

/// Log the number of frames in each state of `mgr`.
///
/// # Safety
///
/// `mgr` must be a valid pointer to a manager returned by [`framemgr_new`].
#[no_mangle]
pub unsafe extern "C" fn framemgr_print_info(mgr: *const framemgr) {
    assert!(!mgr.is_null());
    let mgr = &*mgr;

    mgr.mgr.print_info();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    const FREE: c_uint = FRAMEMGR_STATE_FREE;
    const REQUEST: c_uint = FRAMEMGR_STATE_REQUEST;
    const PROCESS: c_uint = FRAMEMGR_STATE_PROCESS;
    const COMPLETE: c_uint = FRAMEMGR_STATE_COMPLETE;
    const INVALID: c_uint = 4;

    #[test]
    fn test_constants() {
        for (value, state) in [FREE, REQUEST, PROCESS, COMPLETE]
            .into_iter()
            .zip(FrameState::QUEUES)
        {
            assert_eq!(FrameState::n(value), Some(state));
            let name = unsafe { CStr::from_ptr(framemgr_state_name(value)) };
            assert_eq!(name.to_str().unwrap(), state.name());
        }
        assert!(framemgr_state_name(5).is_null());

        assert_eq!(FRAMEMGR_ID_LATE, FrameMgrId::LATE.bits());
        assert_eq!(FRAMEMGR_ID_SHOT, FrameMgrId::SHOT.bits());
        assert_eq!(FRAMEMGR_ID_HW, FrameMgrId::HW.bits());
    }

    #[test]
    fn test_c_api() {
        let name = CString::new("ffi").unwrap();

        unsafe {
            let mgr = framemgr_new(0, name.as_ptr());
            assert!(!mgr.is_null());

            assert_eq!(framemgr_open(mgr, 4), 0);
            assert_eq!(framemgr_count(mgr, FREE), 4);

            assert_eq!(framemgr_set_frame_info(mgr, 1, 33, 0b1), 0);
            assert_eq!(framemgr_trans(mgr, 1, REQUEST), 0);

            let mut index: c_uint = 0;
            assert_eq!(framemgr_get(mgr, REQUEST, &mut index), 0);
            assert_eq!(index, 1);
            assert_eq!(framemgr_get(mgr, REQUEST, &mut index), -(Errno::ENOENT as c_int));
            assert_eq!(framemgr_put(mgr, index, PROCESS), 0);

            let mut found: c_uint = 0;
            assert_eq!(framemgr_find_fcount(mgr, PROCESS, 33, &mut found), 0);
            assert_eq!(found, 1);
            assert_eq!(
                framemgr_find_fcount(mgr, PROCESS, 34, &mut found),
                -(Errno::ENOENT as c_int)
            );
            assert_eq!(framemgr_trans(mgr, found, COMPLETE), 0);

            let mut tail: c_uint = 0;
            assert_eq!(framemgr_peek(mgr, COMPLETE, &mut index), 0);
            assert_eq!(framemgr_peek_tail(mgr, FREE, &mut tail), 0);
            assert_eq!((index, tail), (1, 3));

            framemgr_print_queues(mgr);
            framemgr_print_info(mgr);

            assert_eq!(framemgr_flush(mgr), 0);
            assert_eq!(framemgr_count(mgr, FREE), 4);

            framemgr_close(mgr);
            assert_eq!(framemgr_count(mgr, FREE), 0);
            framemgr_destroy(mgr);
        }
    }

    #[test]
    fn test_c_api_errors() {
        let name = CString::new("ffi-errors").unwrap();

        unsafe {
            let mgr = framemgr_new(FRAMEMGR_ID_HW, name.as_ptr());
            assert_eq!(framemgr_open(mgr, 2), 0);

            let einval = -(Errno::EINVAL as c_int);
            let mut index: c_uint = 0;
            assert_eq!(framemgr_trans(mgr, 0, INVALID), einval);
            assert_eq!(framemgr_trans(mgr, 0, 42), einval);
            assert_eq!(framemgr_trans(mgr, 2, REQUEST), einval);
            assert_eq!(framemgr_put(mgr, 0, REQUEST), einval);
            assert_eq!(framemgr_get(mgr, INVALID, &mut index), einval);
            assert_eq!(framemgr_count(mgr, INVALID), einval);
            assert_eq!(framemgr_set_frame_info(mgr, 5, 0, 0), einval);

            framemgr_set_trace_mask(mgr, 0);
            framemgr_print_queues(mgr);

            framemgr_destroy(mgr);
            framemgr_destroy(std::ptr::null_mut());
        }
    }
}
