// tests/test_filters.rs — Separable filter operators against the CPU
// reference, on the host backend.

use approx::assert_abs_diff_eq;

use dtcwt_wgpu::accel::buffer::ImageBuffer;
use dtcwt_wgpu::accel::Axis;
use dtcwt_wgpu::convolution::{decimate_columns, decimate_rows, filter_columns, filter_rows};
use dtcwt_wgpu::ops::extend::{BorderPad, Extension};
use dtcwt_wgpu::ops::filter::{DecimatingFilter, SeparableFilter};
use dtcwt_wgpu::{CommandQueue, DualTreeFilters, FilterSpec, HostBackend, Image, PairOrder};

const BLOCK: usize = 16;
const PADDING: usize = 16;
const ALIGN: usize = 32;

fn ramp(w: usize, h: usize) -> Image<f32> {
    Image::from_fn(w, h, |x, y| ((x * 7 + y * 11) % 13) as f32 - 6.0 + 0.25 * x as f32)
}

fn assert_images_close(got: &Image<f32>, want: &Image<f32>) {
    assert_eq!((got.width(), got.height()), (want.width(), want.height()));
    for (x, y, v) in want.pixels() {
        assert_abs_diff_eq!(got.get(x, y), v, epsilon = 1e-5);
    }
}

/// Decimate every row of `img` with `spec` on the host backend.
fn device_decimate_rows(img: &Image<f32>, spec: &FilterSpec) -> Image<f32> {
    let host = HostBackend::new();
    let mut q = CommandQueue::new(&host, Default::default());
    let (w, h) = (img.width(), img.height());
    let ext = Extension::coarse(w);
    let out_w = ext.extended_len(w) / 2;

    let input = ImageBuffer::<_, f32>::new(&host, w, h, PADDING, ALIGN, 1, "in").unwrap();
    let output = ImageBuffer::<_, f32>::new(&host, out_w, h, PADDING, ALIGN, 1, "out").unwrap();
    let pad = BorderPad::new(&host, BLOCK, PADDING).unwrap();
    let op = DecimatingFilter::new(&host, Axis::Row, &[spec.clone()], BLOCK, PADDING).unwrap();

    let up = input.upload(&mut q, img, &[]).unwrap();
    let padded = pad.pad(&mut q, input.view(), Axis::Row, ext, &[up]).unwrap();
    let done = op.apply(&mut q, input.view(), output.view(), &[padded]).unwrap();
    output.download(&mut q, &[done]).unwrap()
}

#[test]
fn plain_columns_match_reference_on_odd_height() {
    let host = HostBackend::new();
    let mut q = CommandQueue::new(&host, Default::default());
    let bank = DualTreeFilters::standard().level1;
    let img = ramp(6, 9);
    let ext = Extension::level_one(9);
    assert!(ext.end && !ext.start);

    let input = ImageBuffer::<_, f32>::new(&host, 6, 9, PADDING, ALIGN, 1, "in").unwrap();
    let output = ImageBuffer::<_, f32>::new(&host, 6, 10, PADDING, ALIGN, 3, "out").unwrap();
    let pad = BorderPad::new(&host, BLOCK, PADDING).unwrap();
    let op = SeparableFilter::new(&host, Axis::Column, &bank.row_triple(), BLOCK, PADDING).unwrap();

    let up = input.upload(&mut q, &img, &[]).unwrap();
    let padded = pad.pad(&mut q, input.view(), Axis::Column, ext, &[up]).unwrap();
    let done = op.apply(&mut q, input.view(), output.view(), &[padded]).unwrap();

    for (i, spec) in bank.row_triple().iter().enumerate() {
        let got = output.slice(i).download(&mut q, &[done]).unwrap();
        assert_images_close(&got, &filter_columns(&img, spec.taps(), ext));
    }
}

#[test]
fn plain_rows_boundary_samples_match_reference() {
    let host = HostBackend::new();
    let mut q = CommandQueue::new(&host, Default::default());
    let h1 = DualTreeFilters::standard().level1.h1;
    let img = ramp(7, 3);
    let ext = Extension::level_one(7);

    let input = ImageBuffer::<_, f32>::new(&host, 7, 3, PADDING, ALIGN, 1, "in").unwrap();
    let output = ImageBuffer::<_, f32>::new(&host, 8, 3, PADDING, ALIGN, 1, "out").unwrap();
    let pad = BorderPad::new(&host, BLOCK, PADDING).unwrap();
    let op = SeparableFilter::new(&host, Axis::Row, &[h1.clone()], BLOCK, PADDING).unwrap();

    let up = input.upload(&mut q, &img, &[]).unwrap();
    let padded = pad.pad(&mut q, input.view(), Axis::Row, ext, &[up]).unwrap();
    let done = op.apply(&mut q, input.view(), output.view(), &[padded]).unwrap();
    let got = output.download(&mut q, &[done]).unwrap();
    let want = filter_rows(&img, h1.taps(), ext);

    // Every output reaches the border with a 19-tap filter on 8 samples.
    for y in 0..3 {
        for x in [0, 1, 6, 7] {
            assert_abs_diff_eq!(got.get(x, y), want.get(x, y), epsilon = 1e-5);
        }
    }
    assert_images_close(&got, &want);
}

#[test]
fn decimating_rows_match_reference_for_every_filter() {
    let bank = DualTreeFilters::standard().level2;
    let img = ramp(20, 4);
    for spec in bank.row_triple() {
        let got = device_decimate_rows(&img, &spec);
        assert_images_close(&got, &decimate_rows(&img, &spec, Extension::coarse(20)));
    }
}

#[test]
fn decimating_rows_with_both_end_extension() {
    // 18 is not a multiple of 4: one duplicated sample at each end.
    let bank = DualTreeFilters::standard().level2;
    let img = ramp(18, 3);
    let ext = Extension::coarse(18);
    assert!(ext.start && ext.end);
    let got = device_decimate_rows(&img, &bank.h1);
    assert_eq!(got.width(), 10);
    assert_images_close(&got, &decimate_rows(&img, &bank.h1, ext));
}

#[test]
fn swapped_order_exchanges_phases() {
    let h1 = DualTreeFilters::standard().level2.h1;
    let img = ramp(16, 3);
    let natural = device_decimate_rows(&img, &h1.with_order(PairOrder::Natural));
    let swapped = device_decimate_rows(&img, &h1.with_order(PairOrder::Swapped));
    for y in 0..3 {
        for pair in 0..natural.width() / 2 {
            assert_eq!(swapped.get(2 * pair, y), natural.get(2 * pair + 1, y));
            assert_eq!(swapped.get(2 * pair + 1, y), natural.get(2 * pair, y));
        }
    }
}

#[test]
fn decimating_columns_shared_input() {
    let host = HostBackend::new();
    let mut q = CommandQueue::new(&host, Default::default());
    let bank = DualTreeFilters::standard().level2;
    let img = ramp(5, 12);
    let ext = Extension::coarse(12);

    let input = ImageBuffer::<_, f32>::new(&host, 5, 12, PADDING, ALIGN, 1, "in").unwrap();
    let output = ImageBuffer::<_, f32>::new(&host, 5, 6, PADDING, ALIGN, 3, "out").unwrap();
    let pad = BorderPad::new(&host, BLOCK, PADDING).unwrap();
    let triple = bank.column_triple();
    let op = DecimatingFilter::new(&host, Axis::Column, &triple, BLOCK, PADDING).unwrap();

    let up = input.upload(&mut q, &img, &[]).unwrap();
    let padded = pad.pad(&mut q, input.view(), Axis::Column, ext, &[up]).unwrap();
    let done = op.apply(&mut q, input.view(), output.view(), &[padded]).unwrap();
    for (i, spec) in triple.iter().enumerate() {
        let got = output.slice(i).download(&mut q, &[done]).unwrap();
        assert_images_close(&got, &decimate_columns(&img, spec, ext));
    }
}

#[test]
fn standard_pair_orders_follow_mirror_correlation() {
    let bank = DualTreeFilters::standard().level2;
    for spec in bank.row_triple() {
        assert_eq!(spec.order(), spec.implied_order(), "{:?}", spec.taps());
    }
    assert!(bank.h0.mirror_correlation() > 0.0);
    assert!(bank.h1.mirror_correlation() < 0.0);
}

#[test]
fn construction_rejects_bad_configurations() {
    let host = HostBackend::new();
    let filters = DualTreeFilters::standard();
    let l2 = filters.level2.row_triple();

    // Decimating halo L − 1 = 13 exceeds an 8-wide block.
    assert!(DecimatingFilter::new(&host, Axis::Row, &l2, 8, PADDING).is_err());
    // Odd-length taps cannot be decimated.
    assert!(DecimatingFilter::new(&host, Axis::Row, &filters.level1.row_triple(), BLOCK, PADDING)
        .is_err());
    // Padding smaller than the block.
    assert!(SeparableFilter::new(&host, Axis::Row, &filters.level1.row_triple(), BLOCK, 8).is_err());
    // No filters at all.
    assert!(SeparableFilter::new(&host, Axis::Row, &[], BLOCK, PADDING).is_err());
    // Workgroup larger than the device allows.
    let small = HostBackend::with_max_invocations(64);
    assert!(SeparableFilter::new(&small, Axis::Row, &l2, BLOCK, PADDING).is_err());
}
