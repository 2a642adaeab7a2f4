// dtcwt-wgpu: multi-level 2D Dual-Tree Complex Wavelet Transform on the GPU
//
// The forward transform decomposes an image into six oriented complex
// subbands per level plus a lowpass residual. Every level is a short chain
// of separable 1D filter passes, symmetric border padding and a 2×2
// quad-to-complex recombination, all running as compute kernels scheduled
// through a dependency-tracking command queue.
//
// Reference: Kingsbury, "Complex Wavelets for Shift Invariant Analysis and
// Filtering of Signals" (ACHA 2001); Selesnick, Baraniuk, Kingsbury, "The
// Dual-Tree Complex Wavelet Transform" (IEEE SPM 2005).
//
// Layers, bottom up:
//   image, filters, convolution, quad   host data types and 1D reference math
//   reference                           whole-transform host reference
//   accel                               backend trait, buffers, command queue
//   gpu                                 the wgpu backend
//   ops                                 pad, filter, q2c and cornerness operations
//   pyramid                             per-level orchestration

pub mod accel;
pub mod config;
pub mod convolution;
pub mod error;
pub mod filters;
pub mod gpu;
pub mod image;
pub mod ops;
pub mod pyramid;
pub mod quad;
pub mod reference;

pub use accel::host::HostBackend;
pub use accel::queue::{CommandQueue, Event, SchedulePolicy};
pub use accel::Backend;
pub use config::{load_config, DtcwtConfig};
pub use error::{Error, Result};
pub use filters::{DualTreeFilters, FilterBank, FilterSpec, PairOrder};
pub use gpu::{DeviceProfile, WgpuBackend};
pub use image::{Complex, Image};
pub use ops::cornerness::Cornerness;
pub use pyramid::{Dtcwt, PyramidContext, SubbandPyramid};
pub use reference::{cornerness_map, Dtcwt2d};
