//! Dominant-colour histogram over one decoded image

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::capture::DecodedImage;

/// One entry of the histogram.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColorBucket {
    /// Packed `0xRRGGBB`
    pub color: u32,
    pub count: u64,
    /// `100 * count / (width * height)`
    pub percentage: f32,
}

impl ColorBucket {
    /// The zero-valued filler used when a frame has fewer than `top_n` colours.
    pub const PLACEHOLDER: ColorBucket = ColorBucket {
        color: 0,
        count: 0,
        percentage: 0.0,
    };

    pub fn is_placeholder(&self) -> bool {
        self.count == 0
    }

    pub fn rgb(&self) -> (u8, u8, u8) {
        (
            (self.color >> 16) as u8,
            (self.color >> 8) as u8,
            self.color as u8,
        )
    }

    /// Inverse colour, readable as text on top of this bucket's swatch.
    pub fn contrast_color(&self) -> u32 {
        !self.color & 0x00ff_ffff
    }

    /// Whole-percent label, truncated, e.g. `"42%"`.
    pub fn percent_label(&self) -> String {
        format!("{}%", self.percentage as u32)
    }

    pub fn hex(&self) -> String {
        format!("#{:06X}", self.color & 0x00ff_ffff)
    }
}

impl fmt::Display for ColorBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:.1}% ({})", self.hex(), self.percentage, self.count)
    }
}

/// Top colours of one frame, most frequent first. Always exactly `top_n`
/// buckets long; missing slots are [`ColorBucket::PLACEHOLDER`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistogramResult {
    pub buckets: Vec<ColorBucket>,
    /// Distinct colours seen in the frame
    pub distinct_colors: usize,
    /// Sequence number of the source frame
    pub frame_sequence: u64,
}

impl HistogramResult {
    pub fn dominant(&self) -> Option<&ColorBucket> {
        self.buckets.first().filter(|b| !b.is_placeholder())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

struct Tally {
    count: u64,
    first_seen: usize,
}

/// Most frequent first; equal counts keep discovery order.
fn rank(a: &(u32, Tally), b: &(u32, Tally)) -> Ordering {
    b.1.count
        .cmp(&a.1.count)
        .then(a.1.first_seen.cmp(&b.1.first_seen))
}

/// Count every pixel once and return the `top_n` most frequent colours.
///
/// Equivalent to a stable descending sort by count followed by taking the
/// first `top_n`, but only the selected prefix is fully sorted.
pub fn compute(image: &DecodedImage, top_n: usize) -> HistogramResult {
    let width = image.width.max(1) as usize;
    let height = image.height as usize;
    let mut tallies: HashMap<u32, Tally> = HashMap::new();
    for (index, &color) in image.pixels.iter().enumerate() {
        // Discovery runs column by column, top to bottom.
        let discovered = (index % width) * height + index / width;
        tallies
            .entry(color)
            .and_modify(|t| {
                t.count += 1;
                t.first_seen = t.first_seen.min(discovered);
            })
            .or_insert(Tally {
                count: 1,
                first_seen: discovered,
            });
    }
    let distinct_colors = tallies.len();

    let mut ranked: Vec<(u32, Tally)> = tallies.into_iter().collect();
    if ranked.len() > top_n && top_n > 0 {
        // `first_seen` is unique, so `rank` is a total order and the unstable
        // selection is deterministic.
        ranked.select_nth_unstable_by(top_n - 1, rank);
        ranked.truncate(top_n);
    }
    ranked.sort_unstable_by(rank);

    let total = image.pixel_count();
    let mut buckets: Vec<ColorBucket> = ranked
        .into_iter()
        .take(top_n)
        .map(|(color, tally)| ColorBucket {
            color,
            count: tally.count,
            percentage: percentage(tally.count, total),
        })
        .collect();
    buckets.resize(top_n, ColorBucket::PLACEHOLDER);

    HistogramResult {
        buckets,
        distinct_colors,
        frame_sequence: 0,
    }
}

fn percentage(count: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (100.0 * count as f64 / total as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32, pixels: Vec<u32>) -> DecodedImage {
        DecodedImage::from_pixels(width, height, pixels)
    }

    #[test]
    fn always_returns_top_n_sorted_buckets() {
        let img = image(3, 2, vec![0xff0000, 0x00ff00, 0xff0000, 0x0000ff, 0xff0000, 0x00ff00]);
        for n in [1, 2, 3, 5, 8] {
            let result = compute(&img, n);
            assert_eq!(result.len(), n);
            assert!(result.buckets.windows(2).all(|w| w[0].count >= w[1].count));
            assert!(result
                .buckets
                .iter()
                .all(|b| (0.0..=100.0).contains(&b.percentage)));
        }
        let result = compute(&img, 3);
        assert_eq!(
            result.buckets.iter().map(|b| (b.color, b.count)).collect::<Vec<_>>(),
            vec![(0xff0000, 3), (0x00ff00, 2), (0x0000ff, 1)]
        );
        assert_eq!(result.distinct_colors, 3);
        assert!((result.buckets[0].percentage - 50.0).abs() < 1e-4);
    }

    #[test]
    fn uniform_frame_is_one_full_bucket() {
        let (w, h) = (40, 30);
        let result = compute(&image(w, h, vec![0x336699; (w * h) as usize]), 5);
        assert_eq!(result.buckets[0].color, 0x336699);
        assert_eq!(result.buckets[0].count, u64::from(w * h));
        assert!((result.buckets[0].percentage - 100.0).abs() < 1e-4);
        assert!(result.buckets[1..].iter().all(ColorBucket::is_placeholder));
        assert_eq!(result.buckets[1..], [ColorBucket::PLACEHOLDER; 4]);
    }

    #[test]
    fn all_distinct_ties_follow_discovery_order() {
        let pixels: Vec<u32> = (0..64u32).map(|i| 0x010101 * i).collect();
        let result = compute(&image(8, 8, pixels.clone()), 5);
        assert!(result.buckets.iter().all(|b| b.count == 1));
        assert_eq!(
            result.buckets.iter().map(|b| b.color).collect::<Vec<_>>(),
            (0..5).map(|x| pixels[x * 8]).collect::<Vec<_>>()
        );
    }

    #[test]
    fn discovery_is_column_major() {
        // a b
        // c d
        let result = compute(&image(2, 2, vec![0xa, 0xb, 0xc, 0xd]), 4);
        assert_eq!(
            result.buckets.iter().map(|b| b.color).collect::<Vec<_>>(),
            vec![0xa, 0xc, 0xb, 0xd]
        );

        // a b b
        // c a c
        let result = compute(&image(3, 2, vec![0xa, 0xb, 0xb, 0xc, 0xa, 0xc]), 3);
        assert_eq!(
            result.buckets.iter().map(|b| b.color).collect::<Vec<_>>(),
            vec![0xa, 0xc, 0xb]
        );
    }

    #[test]
    fn ties_keep_first_seen_order_behind_larger_counts() {
        // c and a tie at 2, b leads with 3; c was seen before a.
        let img = image(7, 1, vec![0xc, 0xb, 0xa, 0xb, 0xc, 0xa, 0xb]);
        let result = compute(&img, 3);
        assert_eq!(
            result.buckets.iter().map(|b| b.color).collect::<Vec<_>>(),
            vec![0xb, 0xc, 0xa]
        );
    }

    #[test]
    fn matches_a_stable_full_sort() {
        // Pseudo-random frame with many ties.
        let mut state = 0x2545_f491u32;
        let pixels: Vec<u32> = (0..32 * 32)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state % 23
            })
            .collect();
        let img = image(32, 32, pixels.clone());

        let mut order: Vec<u32> = Vec::new();
        let mut counts: HashMap<u32, u64> = HashMap::new();
        for x in 0..32 {
            for y in 0..32 {
                let p = pixels[y * 32 + x];
                if !counts.contains_key(&p) {
                    order.push(p);
                }
                *counts.entry(p).or_default() += 1;
            }
        }
        order.sort_by(|a, b| counts[b].cmp(&counts[a]));

        let result = compute(&img, 7);
        assert_eq!(
            result.buckets.iter().map(|b| b.color).collect::<Vec<_>>(),
            order[..7].to_vec()
        );
    }

    #[test]
    fn compute_is_idempotent() {
        let img = image(4, 1, vec![1, 2, 2, 3]);
        assert_eq!(compute(&img, 5), compute(&img, 5));
    }

    #[test]
    fn degenerate_inputs() {
        assert!(compute(&image(2, 1, vec![1, 1]), 0).is_empty());

        let empty = compute(&image(0, 0, Vec::new()), 3);
        assert_eq!(empty.buckets, vec![ColorBucket::PLACEHOLDER; 3]);
        assert!(empty.dominant().is_none());
    }

    #[test]
    fn display_helpers() {
        let bucket = ColorBucket {
            color: 0x12ab34,
            count: 10,
            percentage: 42.9,
        };
        assert_eq!(bucket.rgb(), (0x12, 0xab, 0x34));
        assert_eq!(bucket.contrast_color(), 0xed54cb);
        assert_eq!(bucket.percent_label(), "42%");
        assert_eq!(bucket.hex(), "#12AB34");
    }
}
