//! Tone-curve control points and the 256-entry RGB lookup table derived from them.
//!
//! Interpolation is piecewise linear between sorted control points. A LUT is
//! regenerated only when points change; the render loop never calls
//! [`generate`] itself.

use std::fmt;

use serde::Deserialize;

pub const LUT_SIZE: usize = 256;

/// Sorted (x, y) pairs in [0,1]², first x pinned to 0 and last x pinned to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveControlPoints {
    points: Vec<(f32, f32)>,
}

impl Default for CurveControlPoints {
    fn default() -> Self {
        Self::identity()
    }
}

impl CurveControlPoints {
    pub fn identity() -> Self {
        Self {
            points: vec![(0.0, 0.0), (1.0, 1.0)],
        }
    }

    /// Normalizes arbitrary user input into a valid point set.
    ///
    /// Non-finite points are dropped, coordinates are clamped into [0,1], points
    /// are sorted by x with the last duplicate winning, and the endpoints are
    /// pinned to x = 0 and x = 1. An empty set becomes the identity; a single
    /// point becomes a flat line at its y.
    pub fn new(points: impl IntoIterator<Item = (f32, f32)>) -> Self {
        let mut sorted: Vec<(f32, f32)> = points
            .into_iter()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(x, y)| (x.clamp(0.0, 1.0), y.clamp(0.0, 1.0)))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut points: Vec<(f32, f32)> = Vec::with_capacity(sorted.len());
        for point in sorted {
            match points.last_mut() {
                Some(last) if last.0 == point.0 => *last = point,
                _ => points.push(point),
            }
        }

        match points.len() {
            0 => return Self::identity(),
            1 => {
                let y = points[0].1;
                return Self {
                    points: vec![(0.0, y), (1.0, y)],
                };
            }
            _ => {}
        }

        let last = points.len() - 1;
        points[0].0 = 0.0;
        points[last].0 = 1.0;
        Self { points }
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    pub fn is_identity(&self) -> bool {
        self.points.iter().all(|(x, y)| x == y)
    }

    pub fn is_monotonic(&self) -> bool {
        self.points.windows(2).all(|pair| pair[1].1 >= pair[0].1)
    }

    /// Linear interpolation; x outside the point range takes the nearest endpoint's y.
    pub fn evaluate(&self, x: f32) -> f32 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if x.is_nan() || x <= first.0 {
            return first.1;
        }
        if x >= last.0 {
            return last.1;
        }
        let upper = self.points.partition_point(|p| p.0 <= x);
        let (x0, y0) = self.points[upper - 1];
        let (x1, y1) = self.points[upper];
        let t = (x - x0) / (x1 - x0);
        y0 + (y1 - y0) * t
    }
}

/// Config-friendly form: a list of `[x, y]` pairs.
impl<'de> Deserialize<'de> for CurveControlPoints {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Vec::<[f32; 2]>::deserialize(deserializer)?;
        Ok(Self::new(raw.into_iter().map(|[x, y]| (x, y))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red = 0,
    Green = 1,
    Blue = 2,
}

/// 256 × RGB bytes, row-major by sample index.
#[derive(Clone, PartialEq, Eq)]
pub struct Lut {
    entries: [[u8; 3]; LUT_SIZE],
}

impl Lut {
    pub fn identity() -> Self {
        let mut entries = [[0u8; 3]; LUT_SIZE];
        for (i, entry) in entries.iter_mut().enumerate() {
            *entry = [i as u8; 3];
        }
        Self { entries }
    }

    pub fn entry(&self, index: u8) -> [u8; 3] {
        self.entries[usize::from(index)]
    }

    pub fn channel(&self, channel: Channel) -> impl Iterator<Item = u8> + '_ {
        self.entries.iter().map(move |e| e[channel as usize])
    }

    /// The 768-byte upload buffer, channel order R, G, B.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.entries)
    }

    /// RGBA expansion for backends without a three-channel 8-bit format.
    pub fn to_rgba(&self) -> Vec<u8> {
        self.entries
            .iter()
            .flat_map(|[r, g, b]| [*r, *g, *b, u8::MAX])
            .collect()
    }

    pub fn apply(&self, rgb: [u8; 3]) -> [u8; 3] {
        [
            self.entries[usize::from(rgb[0])][0],
            self.entries[usize::from(rgb[1])][1],
            self.entries[usize::from(rgb[2])][2],
        ]
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

impl Default for Lut {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for Lut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lut")
            .field("first", &self.entries[0])
            .field("mid", &self.entries[LUT_SIZE / 2])
            .field("last", &self.entries[LUT_SIZE - 1])
            .finish()
    }
}

fn to_byte(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

fn sample_position(index: usize) -> f32 {
    index as f32 / (LUT_SIZE - 1) as f32
}

/// One curve applied identically to all three channels.
pub fn generate(points: &CurveControlPoints) -> Lut {
    let mut entries = [[0u8; 3]; LUT_SIZE];
    for (i, entry) in entries.iter_mut().enumerate() {
        *entry = [to_byte(points.evaluate(sample_position(i))); 3];
    }
    Lut { entries }
}

/// Composite curve followed by per-channel curves.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CurveSet {
    pub composite: CurveControlPoints,
    pub red: CurveControlPoints,
    pub green: CurveControlPoints,
    pub blue: CurveControlPoints,
}

impl CurveSet {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn channel(&self, channel: Channel) -> &CurveControlPoints {
        match channel {
            Channel::Red => &self.red,
            Channel::Green => &self.green,
            Channel::Blue => &self.blue,
        }
    }

    pub fn generate(&self) -> Lut {
        let mut entries = [[0u8; 3]; LUT_SIZE];
        for (i, entry) in entries.iter_mut().enumerate() {
            let base = self.composite.evaluate(sample_position(i));
            *entry = [
                to_byte(self.red.evaluate(base)),
                to_byte(self.green.evaluate(base)),
                to_byte(self.blue.evaluate(base)),
            ];
        }
        Lut { entries }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    /// Random non-decreasing curve; x values repeat and land on 0 and 1 often.
    fn random_monotonic(rng: &mut StdRng) -> CurveControlPoints {
        let n = rng.random_range(2..=6usize);
        let mut xs: Vec<f32> = (0..n)
            .map(|_| {
                if rng.random_bool(0.4) {
                    [0.0, 0.5, 1.0][rng.random_range(0..3usize)]
                } else {
                    rng.random_range(0.0f32..=1.0)
                }
            })
            .collect();
        let mut ys: Vec<f32> = (0..n).map(|_| rng.random_range(0.0f32..=1.0)).collect();
        xs.sort_by(f32::total_cmp);
        ys.sort_by(f32::total_cmp);
        CurveControlPoints::new(xs.into_iter().zip(ys))
    }

    fn non_decreasing(values: impl Iterator<Item = u8>) -> bool {
        let values: Vec<u8> = values.collect();
        values.windows(2).all(|w| w[1] >= w[0])
    }

    #[test]
    fn random_monotonic_curves_keep_lut_order_and_endpoints() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let points = random_monotonic(&mut rng);
            assert!(points.is_monotonic(), "{points:?}");
            assert!(points.points().len() >= 2);
            assert_eq!(points.points()[0].0, 0.0);
            assert_eq!(points.points()[points.points().len() - 1].0, 1.0);

            let lut = generate(&points);
            let first = points.points()[0].1;
            let last = points.points()[points.points().len() - 1].1;
            assert_eq!(lut.entry(0), [to_byte(first); 3], "{points:?}");
            assert_eq!(lut.entry(255), [to_byte(last); 3], "{points:?}");
            for channel in [Channel::Red, Channel::Green, Channel::Blue] {
                assert!(non_decreasing(lut.channel(channel)), "{points:?}");
            }
        }
    }

    #[test]
    fn random_curve_sets_keep_every_channel_monotonic() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let curves = CurveSet {
                composite: random_monotonic(&mut rng),
                red: random_monotonic(&mut rng),
                green: random_monotonic(&mut rng),
                blue: random_monotonic(&mut rng),
            };
            let lut = curves.generate();
            let (low, high) = (curves.composite.evaluate(0.0), curves.composite.evaluate(1.0));
            for channel in [Channel::Red, Channel::Green, Channel::Blue] {
                let curve = curves.channel(channel);
                assert!(non_decreasing(lut.channel(channel)), "{curves:?}");
                assert_eq!(lut.entry(0)[channel as usize], to_byte(curve.evaluate(low)));
                assert_eq!(lut.entry(255)[channel as usize], to_byte(curve.evaluate(high)));
            }
        }
    }

    #[test]
    fn identity_points_give_identity_lut() {
        let lut = generate(&CurveControlPoints::identity());
        assert!(lut.is_identity());
        assert!(CurveSet::identity().generate().is_identity());
        assert_eq!(lut.as_bytes().len(), LUT_SIZE * 3);
        assert_eq!(&lut.as_bytes()[..6], &[0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn endpoints_match_pinned_y_values() {
        let points = CurveControlPoints::new([(0.2, 0.1), (0.5, 0.7), (0.9, 0.95)]);
        assert_eq!(points.points()[0], (0.0, 0.1));
        assert_eq!(points.points()[2], (1.0, 0.95));
        let lut = generate(&points);
        assert_eq!(lut.entry(0), [26; 3]);
        assert_eq!(lut.entry(255), [242; 3]);
    }

    #[test]
    fn monotonic_points_give_monotonic_lut() {
        let points = CurveControlPoints::new([(0.0, 0.05), (0.3, 0.2), (0.31, 0.8), (1.0, 0.9)]);
        assert!(points.is_monotonic());
        let lut = generate(&points);
        let red: Vec<u8> = lut.channel(Channel::Red).collect();
        assert!(red.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn inverted_curve_maps_black_to_white() {
        let lut = generate(&CurveControlPoints::new([(0.0, 1.0), (1.0, 0.0)]));
        assert_eq!(lut.entry(0), [255; 3]);
        assert_eq!(lut.entry(255), [0; 3]);
        assert_eq!(lut.apply([0, 128, 255]), [255, 127, 0]);
    }

    #[test]
    fn normalization_handles_degenerate_input() {
        assert_eq!(CurveControlPoints::new([]), CurveControlPoints::identity());
        assert_eq!(
            CurveControlPoints::new([(0.4, 0.3)]).points(),
            &[(0.0, 0.3), (1.0, 0.3)]
        );
        let dup = CurveControlPoints::new([(0.5, 0.1), (1.0, 1.0), (0.5, 0.6), (0.0, 0.0)]);
        assert_eq!(dup.points(), &[(0.0, 0.0), (0.5, 0.6), (1.0, 1.0)]);
        let wild = CurveControlPoints::new([(-3.0, 2.0), (f32::NAN, 0.5), (7.0, -1.0)]);
        assert_eq!(wild.points(), &[(0.0, 1.0), (1.0, 0.0)]);
    }

    #[test]
    fn evaluate_clamps_outside_and_interpolates_inside() {
        let points = CurveControlPoints::new([(0.0, 0.2), (0.5, 0.4), (1.0, 1.0)]);
        assert_eq!(points.evaluate(-1.0), 0.2);
        assert_eq!(points.evaluate(2.0), 1.0);
        assert!((points.evaluate(0.25) - 0.3).abs() < 1e-6);
        assert!((points.evaluate(0.75) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn per_channel_curves_follow_composite() {
        let curves = CurveSet {
            composite: CurveControlPoints::new([(0.0, 0.0), (1.0, 0.5)]),
            red: CurveControlPoints::new([(0.0, 0.0), (0.5, 1.0), (1.0, 1.0)]),
            ..CurveSet::identity()
        };
        let lut = curves.generate();
        assert_eq!(lut.entry(255), [255, 128, 128]);
        assert_eq!(lut.entry(0), [0, 0, 0]);
    }

    #[test]
    fn rgba_expansion_is_opaque() {
        let rgba = Lut::identity().to_rgba();
        assert_eq!(rgba.len(), LUT_SIZE * 4);
        assert_eq!(&rgba[4..8], &[1, 1, 1, 255]);
    }
}
