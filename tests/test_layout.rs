// tests/test_layout.rs — Padded multi-slice buffer geometry.

use dtcwt_wgpu::accel::buffer::{ImageBuffer, Layout};
use dtcwt_wgpu::accel::Axis;
use dtcwt_wgpu::{CommandQueue, HostBackend, Image};

#[test]
fn stride_and_pitch_respect_alignment() {
    for width in [1, 5, 16, 33, 640] {
        for height in [1, 7, 32, 481] {
            for padding in [0, 1, 16] {
                for alignment in [1, 4, 32] {
                    let l = Layout::new(width, height, padding, alignment, 3).unwrap();
                    assert_eq!(l.stride() % alignment, 0);
                    assert_eq!(l.full_height() % alignment, 0);
                    assert!(l.stride() >= width + 2 * padding);
                    assert!(l.full_height() >= height + 2 * padding);
                    assert_eq!(l.pitch(), l.stride() * l.full_height());
                    assert_eq!(l.elements(), 3 * l.pitch());
                    assert_eq!(l.origin(2) - l.origin(0), 2 * l.pitch());
                }
            }
        }
    }
}

#[test]
fn padding_corner_is_word_zero() {
    let l = Layout::new(10, 6, 4, 8, 1).unwrap();
    assert_eq!(l.index(0, -4, -4), 0);
    assert_eq!(l.index(0, 0, 1) - l.index(0, 0, 0), l.stride());
    assert_eq!(l.step(Axis::Column), l.stride());
    assert_eq!(l.cross_step(Axis::Column), 1);
    assert_eq!((l.extent(Axis::Row), l.cross_extent(Axis::Row)), (10, 6));
}

#[test]
fn empty_layouts_are_rejected() {
    assert!(Layout::new(0, 4, 2, 8, 1).is_err());
    assert!(Layout::new(4, 0, 2, 8, 1).is_err());
    assert!(Layout::new(4, 4, 2, 0, 1).is_err());
    assert!(Layout::new(4, 4, 2, 8, 0).is_err());
}

#[test]
#[should_panic(expected = "out of range")]
fn slice_out_of_range_panics() {
    let host = HostBackend::new();
    let buf = ImageBuffer::<_, f32>::new(&host, 4, 4, 2, 8, 2, "two").unwrap();
    let _ = buf.slice(2);
}

#[test]
fn upload_download_per_slice() {
    let host = HostBackend::new();
    let mut queue = CommandQueue::new(&host, Default::default());
    let buf = ImageBuffer::<_, f32>::new(&host, 7, 5, 3, 16, 2, "pair").unwrap();
    let a = Image::from_fn(7, 5, |x, y| (x + 10 * y) as f32);
    let b = Image::from_fn(7, 5, |x, y| -((x * y) as f32));

    let ea = buf.slice(0).upload(&mut queue, &a, &[]).unwrap();
    let eb = buf.slice(1).upload(&mut queue, &b, &[]).unwrap();

    assert_eq!(buf.slice(0).download(&mut queue, &[ea]).unwrap(), a);
    assert_eq!(buf.slice(1).download(&mut queue, &[eb]).unwrap(), b);
}

#[test]
fn upload_rejects_wrong_extent() {
    let host = HostBackend::new();
    let mut queue = CommandQueue::new(&host, Default::default());
    let buf = ImageBuffer::<_, f32>::new(&host, 7, 5, 3, 16, 1, "one").unwrap();
    assert!(buf.upload(&mut queue, &Image::new(5, 7), &[]).is_err());
    assert_eq!(queue.pending_len(), 0);
}
