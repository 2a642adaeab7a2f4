// tests/test_fixture.rs — Level 1 and level 2 against values produced by the
// NumPy `dtcwt` package's forward algorithm (near_sym_b_bp / qshift_b_bp).
//
// The fixture is regenerated by tests/fixtures/gen_dtcwt_fixture.py. That
// package filters columns before rows and stores Yh[level][row][col][slot],
// so it is run on the transpose of our image. With that transpose:
//
//   ours slot s at (x = u, y = v)  ==  fixture slot s at [u][v]         s < 3
//   ours slot s at (x = u, y = v)  ==  conj(fixture slot s at [u][v])   s ≥ 3
//
// The conjugate comes from swapping which pair of the 2×2 quad is "b" and
// which is "c" when the axes trade places.

use approx::abs_diff_eq;
use serde::Deserialize;

use dtcwt_wgpu::convolution::coldfilt;
use dtcwt_wgpu::{
    CommandQueue, Complex, DualTreeFilters, Dtcwt, Dtcwt2d, DtcwtConfig, HostBackend, Image,
    SchedulePolicy,
};

const FIXTURE: &str = include_str!("fixtures/dtcwt_numpy_18x13.json");
const EPS: f32 = 1e-5;

#[derive(Debug, Deserialize)]
struct Fixture {
    width: usize,
    height: usize,
    image: Vec<f32>,
    levels: Vec<FixtureLevel>,
    coldfilt_input: Vec<f32>,
    coldfilt: Vec<ColdfiltCase>,
}

#[derive(Debug, Deserialize)]
struct FixtureLevel {
    rows: usize,
    cols: usize,
    /// Six slots, each row-major `[re, im]` pairs.
    slots: Vec<Vec<[f32; 2]>>,
}

#[derive(Debug, Deserialize)]
struct ColdfiltCase {
    filter: String,
    output: Vec<f32>,
}

impl FixtureLevel {
    /// Fixture slot `slot` in our orientation.
    fn subband(&self, slot: usize) -> Image<Complex> {
        Image::from_fn(self.rows, self.cols, |x, y| {
            let [re, im] = self.slots[slot][x * self.cols + y];
            if slot < 3 {
                Complex::new(re, im)
            } else {
                Complex::new(re, -im)
            }
        })
    }
}

fn load() -> Fixture {
    serde_json::from_str(FIXTURE).unwrap()
}

fn fixture_image(f: &Fixture) -> Image<f32> {
    assert_eq!(f.image.len(), f.width * f.height);
    Image::from_vec(f.width, f.height, f.image.clone())
}

fn assert_matches_fixture(got: &[Image<Complex>], level: &FixtureLevel, what: &str) {
    assert_eq!(got.len(), 6, "{what}");
    for (slot, g) in got.iter().enumerate() {
        let want = level.subband(slot);
        assert_eq!(
            (g.width(), g.height()),
            (want.width(), want.height()),
            "{what} slot {slot} extent"
        );
        for (x, y, w) in want.pixels() {
            let z = g.get(x, y);
            assert!(
                abs_diff_eq!(z.re, w.re, epsilon = EPS) && abs_diff_eq!(z.im, w.im, epsilon = EPS),
                "{what} slot {slot} at ({x}, {y}): {z} vs {w}"
            );
        }
    }
}

#[test]
fn fixture_is_well_formed() {
    let f = load();
    assert_eq!((f.width, f.height), (18, 13));
    // 18×13 extends to 18×14 at level 1; its lowpass extends to 20×16 at level 2.
    let extents: Vec<_> = f.levels.iter().map(|l| (l.rows, l.cols)).collect();
    assert_eq!(extents, [(9, 7), (5, 4)]);
    for level in &f.levels {
        assert_eq!(level.slots.len(), 6);
        assert!(level.slots.iter().all(|s| s.len() == level.rows * level.cols));
    }
}

#[test]
fn coldfilt_column_matches_fixture() {
    let f = load();
    let bank = DualTreeFilters::standard().level2;
    assert_eq!(f.coldfilt.len(), 3);
    for case in &f.coldfilt {
        let filter = match case.filter.as_str() {
            "h0" => &bank.h0,
            "h1" => &bank.h1,
            "hbp" => &bank.hbp,
            other => panic!("unknown filter `{other}`"),
        };
        let got = coldfilt(&f.coldfilt_input, filter.taps(), filter.order());
        assert_eq!(got.len(), case.output.len(), "{}", case.filter);
        for (i, (g, w)) in got.iter().zip(&case.output).enumerate() {
            assert!(
                abs_diff_eq!(*g, *w, epsilon = EPS),
                "{} output {i}: {g} vs {w}",
                case.filter
            );
        }
    }
}

#[test]
fn reference_transform_matches_fixture() {
    let f = load();
    let img = fixture_image(&f);
    let pyr = Dtcwt2d::default().forward(&img, f.levels.len(), 0).unwrap();
    assert_eq!(pyr.levels.len(), f.levels.len());
    for (i, (level, want)) in pyr.levels.iter().zip(&f.levels).enumerate() {
        assert_matches_fixture(&level.subbands, want, &format!("reference level {}", i + 1));
    }
}

#[test]
fn host_pipeline_matches_fixture() {
    let f = load();
    let img = fixture_image(&f);
    let host = HostBackend::new();
    let config = DtcwtConfig { num_levels: f.levels.len(), ..Default::default() };
    let dtcwt = Dtcwt::new(&host, &config).unwrap();
    let ctx = dtcwt.context_for(f.width, f.height).unwrap();
    let mut queue = CommandQueue::new(&host, SchedulePolicy::Fifo);
    let pyr = dtcwt.transform(&mut queue, &img, &ctx, &[]).unwrap();

    assert_eq!(pyr.len(), f.levels.len());
    for (i, want) in f.levels.iter().enumerate() {
        let got = pyr.download_level(&mut queue, i).unwrap();
        assert_matches_fixture(&got, want, &format!("host level {}", i + 1));
    }
}
