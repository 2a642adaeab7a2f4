// gpu/mod.rs — GPU acceleration layer.
//
// `WgpuBackend` implements `accel::Backend` with WGSL compute shaders. The
// host backend in `accel::host` runs the same index arithmetic on plain
// memory and stays the authoritative reference: every shader is validated
// against it, and both are validated against `reference::Dtcwt2d`.
//
//   device.rs   adapter selection, device profiles, workgroup size
//   backend.rs  storage, pipelines, batched execution, readback
//
// Shader sources live in `src/shaders/` and are specialised per program by
// textual substitution of `{{PLACEHOLDER}}` markers before compilation.

pub mod backend;
pub mod device;

pub use backend::{GpuProgram, WgpuBackend};
pub use device::{DeviceProfile, GpuDevice};

/// Re-run one `#[ignore]`d inner test in a child process.
///
/// A lost or crashing Vulkan device takes the whole test binary down with it;
/// isolating each GPU test keeps the rest of the suite reporting.
#[cfg(test)]
pub(crate) fn run_gpu_test_in_subprocess(test_name: &str) -> String {
    let output = std::process::Command::new("cargo")
        .args(["test", "--lib", "--", test_name, "--exact", "--ignored", "--nocapture"])
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    print!("{stdout}");
    eprint!("{stderr}");
    stdout + &stderr
}
