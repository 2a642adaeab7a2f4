// accel/buffer.rs — Padded, aligned, multi-slice image buffers.
//
// Every image the kernels touch lives in one linear allocation with this
// layout (one slice shown, padding p, alignment a):
//
//   ◄──────────────── stride = align(width + 2p, a) ────────────────►
//   ┌─────────────────────────────────────────────────────────┬─────┐  ▲
//   │                 top padding (p rows)                    │     │  │
//   │     ┌───────────────────────────────────┐               │align│  │
//   │  p  │ origin ● logical width × height   │  p            │ gap │  full_height
//   │     └───────────────────────────────────┘               │     │  = align(height + 2p, a)
//   │                 bottom padding (p rows)                 │     │  │
//   └─────────────────────────────────────────────────────────┴─────┘  ▼
//
//   pitch          = full_height · stride        (elements per slice)
//   origin(slice)  = p·stride + p + slice·pitch
//
// Padding is what lets the filter kernels read `L/2` or `L − 1` samples
// past either edge with no bounds checks: the pad kernel fills it with the
// symmetric extension before each filter pass.
//
// A `View` is a borrowed window onto a contiguous run of slices. It never
// owns storage; the `ImageBuffer` it borrows from does, through an `Arc`
// that pending commands also hold until they are submitted.
//
// NEW RUST CONCEPTS:
// - `PhantomData<T>` — ties an element type to an untyped f32 allocation so
//   that `ImageBuffer<_, Complex>` and `ImageBuffer<_, f32>` cannot be mixed
//   up, at zero runtime cost.
// - Manual `Clone`/`Copy` impls — `#[derive(Copy)]` would demand `B: Copy`,
//   which no backend is; a view is just a reference plus two integers.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::accel::queue::{CommandQueue, Event, Region};
use crate::accel::{align_to, Allocation, Axis, Backend, StorageId};
use crate::error::{ensure_config, ensure_shape, Result};
use crate::image::{Complex, Image};

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

/// Sample type stored in a buffer, measured in f32 words.
pub trait Element: bytemuck::Pod + Default + Send + Sync + 'static {
    const WORDS: usize;
}

impl Element for f32 {
    const WORDS: usize = 1;
}

impl Element for Complex {
    const WORDS: usize = 2;
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Geometry of a padded multi-slice image. All quantities are in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    width: usize,
    height: usize,
    padding: usize,
    alignment: usize,
    slices: usize,
    stride: usize,
    full_height: usize,
    pitch: usize,
}

impl Layout {
    /// Compute the layout of a `width × height` image with `slices` slices.
    pub fn new(
        width: usize,
        height: usize,
        padding: usize,
        alignment: usize,
        slices: usize,
    ) -> Result<Self> {
        ensure_config!(width > 0 && height > 0, "image extent {width}×{height} must be non-empty");
        ensure_config!(alignment > 0, "alignment must be positive");
        ensure_config!(slices > 0, "a buffer needs at least one slice");

        let stride = align_to(width + 2 * padding, alignment);
        let full_height = align_to(height + 2 * padding, alignment);
        Ok(Layout {
            width,
            height,
            padding,
            alignment,
            slices,
            stride,
            full_height,
            pitch: full_height * stride,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn padding(&self) -> usize {
        self.padding
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[inline]
    pub fn slices(&self) -> usize {
        self.slices
    }

    /// Row pitch.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Rows per slice including padding and alignment.
    #[inline]
    pub fn full_height(&self) -> usize {
        self.full_height
    }

    /// Slice pitch.
    #[inline]
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Total elements across all slices.
    #[inline]
    pub fn elements(&self) -> usize {
        self.slices * self.pitch
    }

    /// Linear index of logical pixel (0, 0) in `slice`.
    ///
    /// # Panics
    /// Panics if `slice >= slices`.
    #[inline]
    pub fn origin(&self, slice: usize) -> usize {
        assert!(slice < self.slices, "slice {slice} out of range ({} slices)", self.slices);
        self.padding * self.stride + self.padding + slice * self.pitch
    }

    /// Linear index of logical pixel (x, y) in `slice`. Coordinates may
    /// reach into the padding.
    #[inline]
    pub fn index(&self, slice: usize, x: isize, y: isize) -> usize {
        (self.origin(slice) as isize + y * self.stride as isize + x) as usize
    }

    /// Logical extent along `axis`.
    #[inline]
    pub fn extent(&self, axis: Axis) -> usize {
        match axis {
            Axis::Row => self.width,
            Axis::Column => self.height,
        }
    }

    /// Logical extent across `axis`.
    #[inline]
    pub fn cross_extent(&self, axis: Axis) -> usize {
        match axis {
            Axis::Row => self.height,
            Axis::Column => self.width,
        }
    }

    /// Elements between neighbouring samples along `axis`.
    #[inline]
    pub fn step(&self, axis: Axis) -> usize {
        match axis {
            Axis::Row => 1,
            Axis::Column => self.stride,
        }
    }

    /// Elements between neighbouring samples across `axis`.
    #[inline]
    pub fn cross_step(&self, axis: Axis) -> usize {
        match axis {
            Axis::Row => self.stride,
            Axis::Column => 1,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}×{}×{} (pad {}, stride {}, pitch {})",
            self.width, self.height, self.slices, self.padding, self.stride, self.pitch
        )
    }
}

// ---------------------------------------------------------------------------
// ImageBuffer
// ---------------------------------------------------------------------------

/// Owner of one padded multi-slice device image.
pub struct ImageBuffer<B: Backend, T: Element> {
    alloc: Arc<Allocation<B::Storage>>,
    layout: Layout,
    _element: PhantomData<T>,
}

impl<B: Backend, T: Element> ImageBuffer<B, T> {
    /// Allocate a zeroed buffer on `backend`.
    pub fn new(
        backend: &B,
        width: usize,
        height: usize,
        padding: usize,
        alignment: usize,
        slices: usize,
        label: &str,
    ) -> Result<Self> {
        let layout = Layout::new(width, height, padding, alignment, slices)?;
        Self::with_layout(backend, layout, label)
    }

    pub fn with_layout(backend: &B, layout: Layout, label: &str) -> Result<Self> {
        let words = layout.elements() * T::WORDS;
        let raw = backend.allocate(words, label)?;
        log::trace!("allocated `{label}`: {layout}, {words} words");
        Ok(ImageBuffer { alloc: Allocation::new(raw, words, label), layout, _element: PhantomData })
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.layout.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.layout.height
    }

    #[inline]
    pub fn slices(&self) -> usize {
        self.layout.slices
    }

    #[inline]
    pub fn allocation(&self) -> &Arc<Allocation<B::Storage>> {
        &self.alloc
    }

    #[inline]
    pub fn label(&self) -> &str {
        self.alloc.label()
    }

    /// View covering every slice.
    pub fn view(&self) -> View<'_, B, T> {
        View { buffer: self, first: 0, count: self.layout.slices }
    }

    /// Single-slice view.
    ///
    /// # Panics
    /// Panics if `index >= slices`.
    pub fn slice(&self, index: usize) -> View<'_, B, T> {
        self.slice_range(index, 1)
    }

    /// View over `count` consecutive slices starting at `first`.
    ///
    /// # Panics
    /// Panics if the range exceeds the buffer or `count == 0`.
    pub fn slice_range(&self, first: usize, count: usize) -> View<'_, B, T> {
        assert!(
            count > 0 && first + count <= self.layout.slices,
            "slices {first}..{} out of range for `{}` ({} slices)",
            first + count,
            self.label(),
            self.layout.slices,
        );
        View { buffer: self, first, count }
    }

    /// Upload into a single-slice buffer. See [`View::upload`].
    pub fn upload(
        &self,
        queue: &mut CommandQueue<'_, B>,
        host: &Image<T>,
        wait: &[Event],
    ) -> Result<Event> {
        self.view().upload(queue, host, wait)
    }

    /// Download a single-slice buffer. See [`View::download`].
    pub fn download(&self, queue: &mut CommandQueue<'_, B>, wait: &[Event]) -> Result<Image<T>> {
        self.view().download(queue, wait)
    }
}

impl<B: Backend, T: Element> fmt::Debug for ImageBuffer<B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageBuffer(`{}` {})", self.label(), self.layout)
    }
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// Non-owning window onto consecutive slices of an [`ImageBuffer`].
pub struct View<'a, B: Backend, T: Element> {
    buffer: &'a ImageBuffer<B, T>,
    first: usize,
    count: usize,
}

impl<B: Backend, T: Element> Clone for View<'_, B, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend, T: Element> Copy for View<'_, B, T> {}

impl<'a, B: Backend, T: Element> View<'a, B, T> {
    #[inline]
    pub fn buffer(&self) -> &'a ImageBuffer<B, T> {
        self.buffer
    }

    #[inline]
    pub fn layout(&self) -> &'a Layout {
        &self.buffer.layout
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.buffer.layout.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.buffer.layout.height
    }

    #[inline]
    pub fn padding(&self) -> usize {
        self.buffer.layout.padding
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.buffer.layout.stride
    }

    #[inline]
    pub fn pitch(&self) -> usize {
        self.buffer.layout.pitch
    }

    /// Number of slices in the view.
    #[inline]
    pub fn slices(&self) -> usize {
        self.count
    }

    /// Index of the first slice within the buffer.
    #[inline]
    pub fn first_slice(&self) -> usize {
        self.first
    }

    /// Linear element index of the view's logical origin.
    #[inline]
    pub fn origin(&self) -> usize {
        self.buffer.layout.origin(self.first)
    }

    #[inline]
    pub fn extent(&self, axis: Axis) -> usize {
        self.buffer.layout.extent(axis)
    }

    #[inline]
    pub fn cross_extent(&self, axis: Axis) -> usize {
        self.buffer.layout.cross_extent(axis)
    }

    #[inline]
    pub fn step(&self, axis: Axis) -> usize {
        self.buffer.layout.step(axis)
    }

    #[inline]
    pub fn cross_step(&self, axis: Axis) -> usize {
        self.buffer.layout.cross_step(axis)
    }

    #[inline]
    pub fn storage_id(&self) -> StorageId {
        self.buffer.alloc.id()
    }

    #[inline]
    pub fn allocation(&self) -> &'a Arc<Allocation<B::Storage>> {
        &self.buffer.alloc
    }

    /// Slice `index` relative to this view.
    ///
    /// # Panics
    /// Panics if `index >= self.slices()`.
    pub fn slice(&self, index: usize) -> View<'a, B, T> {
        assert!(index < self.count, "slice {index} out of range ({} slices in view)", self.count);
        View { buffer: self.buffer, first: self.first + index, count: 1 }
    }

    /// Storage region this view covers, for hazard tracking.
    pub fn region(&self) -> Region {
        Region::new(self.storage_id(), self.first, self.first + self.count)
    }

    /// Copy a host image into this single-slice view.
    ///
    /// The whole slice footprint is written: logical rows land at stride
    /// granularity and everything else (padding, alignment gap) is zeroed.
    /// Host data is copied before returning.
    pub fn upload(
        &self,
        queue: &mut CommandQueue<'_, B>,
        host: &Image<T>,
        wait: &[Event],
    ) -> Result<Event> {
        ensure_shape!(self.count == 1, "upload targets one slice, view has {}", self.count);
        ensure_shape!(
            host.width() == self.width() && host.height() == self.height(),
            "host image {}×{} does not match `{}` ({}×{})",
            host.width(),
            host.height(),
            self.buffer.label(),
            self.width(),
            self.height(),
        );

        let layout = self.layout();
        let mut words = vec![0.0f32; layout.pitch * T::WORDS];
        let local_origin = layout.padding * layout.stride + layout.padding;
        for y in 0..host.height() {
            let start = (local_origin + y * layout.stride) * T::WORDS;
            let row: &[f32] = bytemuck::cast_slice(host.row(y));
            words[start..start + row.len()].copy_from_slice(row);
        }

        let offset = self.first * layout.pitch * T::WORDS;
        queue.write(self.allocation(), offset, words, self.region(), wait)
    }

    /// Read this single-slice view back to the host.
    ///
    /// Blocks until everything in `wait` (and everything already enqueued)
    /// has completed.
    pub fn download(&self, queue: &mut CommandQueue<'_, B>, wait: &[Event]) -> Result<Image<T>> {
        ensure_shape!(self.count == 1, "download reads one slice, view has {}", self.count);
        queue.marker(wait)?;
        queue.finish()?;

        let layout = self.layout();
        let words = queue.backend().read(
            self.allocation().raw(),
            self.first * layout.pitch * T::WORDS,
            layout.pitch * T::WORDS,
        )?;

        let local_origin = layout.padding * layout.stride + layout.padding;
        let mut data = Vec::with_capacity(layout.width * layout.height);
        for y in 0..layout.height {
            let start = (local_origin + y * layout.stride) * T::WORDS;
            let row: &[T] = bytemuck::cast_slice(&words[start..start + layout.width * T::WORDS]);
            data.extend_from_slice(row);
        }
        Ok(Image::from_vec(layout.width, layout.height, data))
    }
}

impl<B: Backend, T: Element> fmt::Debug for View<'_, B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "View(`{}` slices {}..{})",
            self.buffer.label(),
            self.first,
            self.first + self.count
        )
    }
}
