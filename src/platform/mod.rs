#[cfg(target_os = "windows")]
pub mod windows;

/// Whether this build carries the Direct3D11 device implementation.
/// Other targets can still drive the handoff protocol through their own
/// [`ImageDevice`](crate::device::ImageDevice).
pub const fn d3d11_available() -> bool {
    cfg!(target_os = "windows")
}
