//! IPC between the host and kernel processes.
//!
//! This module provides:
//! - Tagged request/notification messages with length-prefixed JSON framing
//! - `KernelManager` for spawning and bridging a kernel subprocess

mod manager;
mod protocol;

pub use manager::{KERNEL_BINARY_ENV, KernelEvent, KernelManager};
pub use protocol::{
    KernelErrorKind, KernelNotification, KernelRequest, read_frame, read_frame_async,
    write_frame, write_frame_async,
};
