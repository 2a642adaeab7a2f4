// ops/mod.rs — Device operators built on the `accel` substrate.
//
//   extend  — symmetric border padding along one axis
//   filter  — plain and decimating separable 1D filters
//   quad    — 2×2 real quad to two complex subbands
//   cornerness — six subbands of a level to one real keypoint map
//
// Every operator validates its configuration at construction, checks the
// shapes of the views it is given before enqueueing anything, and returns
// the event of the single launch it records.

pub mod cornerness;
pub mod extend;
pub mod filter;
pub mod quad;
