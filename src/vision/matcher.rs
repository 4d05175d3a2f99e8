//! Template matching
//!
//! Scores are normalised cross-correlation in [0, 1]. Colour matching scores
//! each RGB channel separately and averages them weighted by the template's
//! energy in that channel, so a channel the template does not use cannot
//! drag an exact match below 1.0.
//!
//! Small searches score every placement. Large ones run a luma pass on
//! images downscaled by up to 8x, then rescore only a window around each
//! coarse peak at full resolution.
//!
//! The free functions are pure and work on a single image. [`TemplateMatcher`]
//! adds frame capture and the re-sampling retry loop.

use std::sync::Arc;

use image::imageops::FilterType;
use image::{GrayImage, ImageBuffer, Luma, RgbaImage};
use imageproc::template_matching::{match_template, MatchTemplateMethod};

use super::{Frame, FrameSource, Match, MatchResult, Region, TemplateStore};
use crate::android::DeviceError;
use crate::timing::Waiter;

type ScoreMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Options for a single template lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Search area, clipped to the frame
    pub region: Region,
    /// Minimum score for a match
    pub confidence: f32,
    /// Match on luma instead of colour
    pub grayscale: bool,
    /// Capture-and-match cycles before giving up (at least one)
    pub retries: u32,
    /// Shift applied to the tap point relative to the match centre
    pub offset: (i32, i32),
    /// Settle time after a tap, overriding the configured default
    pub settle: Option<f32>,
    /// Do not log misses
    pub quiet: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            region: Region::full(),
            confidence: 0.9,
            grayscale: false,
            retries: 3,
            offset: (0, 0),
            settle: None,
            quiet: false,
        }
    }
}

impl MatchOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the search to `region`
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    /// Set the confidence threshold
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Match on luma
    pub fn grayscale(mut self) -> Self {
        self.grayscale = true;
        self
    }

    /// Set the number of capture-and-match cycles
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Tap relative to the match centre
    pub fn with_offset(mut self, dx: i32, dy: i32) -> Self {
        self.offset = (dx, dy);
        self
    }

    /// Settle for `seconds` wait units after tapping
    pub fn with_settle(mut self, seconds: f32) -> Self {
        self.settle = Some(seconds);
        self
    }

    /// Suppress miss logging
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }
}

/// Find the best-scoring position of `template` in `region`, ignoring thresholds
pub fn best_match(
    frame: &RgbaImage,
    template: &RgbaImage,
    region: Region,
    grayscale: bool,
) -> Option<Match> {
    let region = region.clip(frame.width(), frame.height())?;
    let crop = crop(frame, region);

    let best = match pyramid_factor(&crop, template) {
        1 => first_max(&score_map(&crop, template, grayscale)?, 0, 0),
        factor => coarse_candidates(&crop, template, factor, BEST_CANDIDATES)
            .into_iter()
            .filter_map(|(x, y)| refine(&crop, template, factor, x, y, grayscale))
            .fold(None, |best: Option<(u32, u32, f32)>, c| match best {
                Some(b) if b.2 >= c.2 => Some(b),
                _ => Some(c),
            }),
    };

    best.map(|(x, y, confidence)| Match {
        x: region.x + x,
        y: region.y + y,
        width: template.width(),
        height: template.height(),
        confidence,
    })
}

/// Locate `template` in `region` if it scores at least `confidence`
pub fn locate(
    frame: &RgbaImage,
    template: &RgbaImage,
    region: Region,
    confidence: f32,
    grayscale: bool,
) -> MatchResult {
    best_match(frame, template, region, grayscale)
        .filter(|m| m.confidence >= confidence)
        .into()
}

/// Locate every non-overlapping occurrence, in raster (top-to-bottom) order
pub fn locate_all(
    frame: &RgbaImage,
    template: &RgbaImage,
    region: Region,
    confidence: f32,
    grayscale: bool,
) -> Vec<Match> {
    let Some(region) = region.clip(frame.width(), frame.height()) else {
        return Vec::new();
    };
    let crop = crop(frame, region);
    let at = |(x, y, score): (u32, u32, f32)| Match {
        x: region.x + x,
        y: region.y + y,
        width: template.width(),
        height: template.height(),
        confidence: score,
    };

    let mut candidates: Vec<Match> = match pyramid_factor(&crop, template) {
        1 => match score_map(&crop, template, grayscale) {
            Some(map) => map
                .enumerate_pixels()
                .filter(|(_, _, score)| score[0] >= confidence)
                .map(|(x, y, score)| at((x, y, score[0])))
                .collect(),
            None => Vec::new(),
        },
        factor => coarse_candidates(&crop, template, factor, ALL_CANDIDATES)
            .into_iter()
            .filter_map(|(x, y)| refine(&crop, template, factor, x, y, grayscale))
            .filter(|&(_, _, score)| score >= confidence)
            .map(at)
            .collect(),
    };
    // Stable sort keeps raster order between equal scores
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    // Neighbouring offsets of one occurrence also clear the threshold
    let mut kept: Vec<Match> = Vec::new();
    for candidate in candidates {
        if !kept.iter().any(|k| k.overlaps(&candidate)) {
            kept.push(candidate);
        }
    }

    kept.sort_by_key(|m| (m.y, m.x));
    kept
}

/// Multiply-adds above which a search goes coarse-to-fine
const EXHAUSTIVE_BUDGET: u64 = 16_000_000;
/// Shortest template side allowed after downscaling
const MIN_COARSE_SIDE: u32 = 6;
const MAX_PYRAMID_FACTOR: u32 = 8;
/// Coarse peaks refined by a single lookup
const BEST_CANDIDATES: usize = 8;
/// Coarse peaks refined when collecting every occurrence
const ALL_CANDIDATES: usize = 32;
/// Coarse peaks this far below the strongest one are not refined
const CANDIDATE_MARGIN: f32 = 0.15;

fn crop(frame: &RgbaImage, region: Region) -> RgbaImage {
    image::imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image()
}

/// Downscale factor for a search, 1 for an exhaustive one
fn pyramid_factor(haystack: &RgbaImage, template: &RgbaImage) -> u32 {
    let (hw, hh) = haystack.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > hw || th > hh {
        return 1;
    }
    let work = u64::from(hw - tw + 1) * u64::from(hh - th + 1) * u64::from(tw * th);
    if work <= EXHAUSTIVE_BUDGET {
        return 1;
    }

    let side = tw.min(th);
    let mut factor = 1;
    while factor < MAX_PYRAMID_FACTOR && side / (factor * 2) >= MIN_COARSE_SIDE {
        factor *= 2;
    }
    factor
}

/// Peaks of a luma search on images downscaled by `factor`, in coarse pixels
///
/// Peaks are taken strongest first, skipping any that overlap a stronger one.
fn coarse_candidates(
    haystack: &RgbaImage,
    template: &RgbaImage,
    factor: u32,
    limit: usize,
) -> Vec<(u32, u32)> {
    let shrink = |image: &RgbaImage| {
        let gray = image::imageops::grayscale(image);
        let width = (image.width() / factor).max(1);
        let height = (image.height() / factor).max(1);
        image::imageops::resize(&gray, width, height, FilterType::Triangle)
    };
    let small_template = shrink(template);
    let small_haystack = shrink(haystack);
    let (tw, th) = small_template.dimensions();
    if tw > small_haystack.width() || th > small_haystack.height() {
        return Vec::new();
    }

    let map = match_template(
        &small_haystack,
        &small_template,
        MatchTemplateMethod::CrossCorrelationNormalized,
    );
    let mut scored: Vec<(u32, u32, f32)> = map
        .enumerate_pixels()
        .map(|(x, y, score)| (x, y, sanitize(score[0])))
        .collect();
    scored.sort_by(|a, b| b.2.total_cmp(&a.2));

    let Some(&(_, _, strongest)) = scored.first() else {
        return Vec::new();
    };
    let mut peaks: Vec<(u32, u32)> = Vec::new();
    for (x, y, score) in scored {
        if peaks.len() >= limit || score < strongest - CANDIDATE_MARGIN {
            break;
        }
        let overlaps = peaks
            .iter()
            .any(|&(px, py)| x < px + tw && px < x + tw && y < py + th && py < y + th);
        if !overlaps {
            peaks.push((x, y));
        }
    }
    peaks
}

/// Best full-resolution position near a coarse peak, relative to `haystack`
fn refine(
    haystack: &RgbaImage,
    template: &RgbaImage,
    factor: u32,
    x: u32,
    y: u32,
    grayscale: bool,
) -> Option<(u32, u32, f32)> {
    let pad = 2 * factor;
    let x0 = (x * factor).saturating_sub(pad);
    let y0 = (y * factor).saturating_sub(pad);
    let x1 = (x * factor + template.width() + pad).min(haystack.width());
    let y1 = (y * factor + template.height() + pad).min(haystack.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let window = crop(haystack, Region::new(x0, y0, x1 - x0, y1 - y0));
    let map = score_map(&window, template, grayscale)?;
    first_max(&map, x0, y0)
}

/// First maximum of a score map in raster order, shifted by an origin
fn first_max(map: &ScoreMap, x0: u32, y0: u32) -> Option<(u32, u32, f32)> {
    let mut best: Option<(u32, u32, f32)> = None;
    for (x, y, score) in map.enumerate_pixels() {
        // Strictly greater keeps the first maximum in raster order
        if !matches!(best, Some((_, _, s)) if score[0] <= s) {
            best = Some((x0 + x, y0 + y, score[0]));
        }
    }
    best
}

/// Score every placement of `template` inside `haystack`
fn score_map(haystack: &RgbaImage, template: &RgbaImage, grayscale: bool) -> Option<ScoreMap> {
    let (hw, hh) = haystack.dimensions();
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > hw || th > hh {
        return None;
    }

    if grayscale {
        let haystack = image::imageops::grayscale(haystack);
        let template = image::imageops::grayscale(template);
        let mut map = match_template(
            &haystack,
            &template,
            MatchTemplateMethod::CrossCorrelationNormalized,
        );
        map.pixels_mut().for_each(|p| p[0] = sanitize(p[0]));
        return Some(map);
    }

    let mut total = ScoreMap::new(hw - tw + 1, hh - th + 1);
    let mut total_weight = 0.0f64;

    for c in 0..3 {
        let template_channel = channel(template, c);
        let weight: f64 = template_channel
            .pixels()
            .map(|p| f64::from(p[0]) * f64::from(p[0]))
            .sum();
        if weight == 0.0 {
            continue;
        }

        let map = match_template(
            &channel(haystack, c),
            &template_channel,
            MatchTemplateMethod::CrossCorrelationNormalized,
        );
        for (acc, score) in total.pixels_mut().zip(map.pixels()) {
            acc[0] += (f64::from(sanitize(score[0])) * weight) as f32;
        }
        total_weight += weight;
    }

    if total_weight > 0.0 {
        let total_weight = total_weight as f32;
        total
            .pixels_mut()
            .for_each(|p| p[0] = (p[0] / total_weight).clamp(0.0, 1.0));
    }
    Some(total)
}

fn channel(image: &RgbaImage, c: usize) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[c]])
    })
}

/// Flat windows divide by zero; treat them as no match
fn sanitize(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Frame-capturing matcher with bounded re-sampling
///
/// UI elements pulse and animate, so a miss is retried on fresh frames
/// rather than trusted after a single capture.
pub struct TemplateMatcher {
    source: Box<dyn FrameSource>,
    templates: Box<dyn TemplateStore>,
    waiter: Waiter,
    retry_wait: f32,
}

impl TemplateMatcher {
    /// Create a matcher
    pub fn new(
        source: Box<dyn FrameSource>,
        templates: Box<dyn TemplateStore>,
        waiter: Waiter,
    ) -> Self {
        Self {
            source,
            templates,
            waiter,
            retry_wait: 1.0,
        }
    }

    /// Set the wait between re-samples, in wait units
    pub fn with_retry_wait(mut self, seconds: f32) -> Self {
        self.retry_wait = seconds.max(0.0);
        self
    }

    /// Capture the current frame
    pub fn frame(&self) -> Result<Frame, DeviceError> {
        self.source.get_frame()
    }

    /// Resolve a template by name
    pub fn template(&self, name: &str) -> crate::Result<Arc<RgbaImage>> {
        Ok(self.templates.load(name)?)
    }

    /// Test whether `name` is visible, re-sampling up to `retries` frames
    ///
    /// Returns on the first hit. `retries <= 1` is a single capture with no
    /// wait. Only capture faults are errors.
    pub fn is_visible(&self, name: &str, opts: &MatchOptions) -> crate::Result<MatchResult> {
        let template = self.template(name)?;
        let attempts = opts.retries.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.waiter.wait(self.retry_wait);
            }
            let frame = self.frame()?;
            let result = locate(
                frame.image(),
                &template,
                opts.region,
                opts.confidence,
                opts.grayscale,
            );
            if result.is_found() {
                return Ok(result);
            }
            if attempts > 1 && !opts.quiet {
                log::debug!("Retrying {} search: {}/{}", name, attempt, attempts);
            }
        }

        log::debug!("{} not visible", name);
        Ok(MatchResult::NotFound)
    }

    /// Find all occurrences of `name`, re-sampling while there are none
    pub fn find_all(&self, name: &str, opts: &MatchOptions) -> crate::Result<Vec<Match>> {
        let template = self.template(name)?;
        let attempts = opts.retries.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.waiter.wait(self.retry_wait);
            }
            let frame = self.frame()?;
            let found = locate_all(
                frame.image(),
                &template,
                opts.region,
                opts.confidence,
                opts.grayscale,
            );
            if !found.is_empty() {
                return Ok(found);
            }
        }
        Ok(Vec::new())
    }

    /// Check `names` in priority order against one frame, returning the first hit
    pub fn first_of<'a>(
        &self,
        names: &[&'a str],
        opts: &MatchOptions,
    ) -> crate::Result<Option<(&'a str, Match)>> {
        let frame = self.frame()?;
        for &name in names {
            let template = self.template(name)?;
            if let MatchResult::Found(m) = locate(
                frame.image(),
                &template,
                opts.region,
                opts.confidence,
                opts.grayscale,
            ) {
                return Ok(Some((name, m)));
            }
            if !opts.quiet {
                log::debug!("{} not found", name);
            }
        }
        Ok(None)
    }
}
