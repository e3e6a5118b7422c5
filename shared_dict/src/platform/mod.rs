//! Platform-specific shared-memory primitives.
//!
//! Only a Linux (`/dev/shm`) backend is implemented, matching the teacher
//! crate's platform layer. The module boundary exists so a Windows backend
//! (named `CreateFileMapping`/`MapViewOfFile` segments, as spec.md's Windows
//! caveat anticipates) can be added without touching callers.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::*;
