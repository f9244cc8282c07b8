//! Signature placement geometry
//!
//! The browser reports where the signature goes as fractions of the rendered
//! page, measured from the top-left corner. PDF user space has its origin at
//! the bottom-left, so every placement goes through [`compute_placement`]
//! before anything is drawn.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StampError;

/// Smallest rendered signature width in PDF units
pub const MIN_TARGET_WIDTH: f64 = 8.0;

/// Where the caller wants the signature, in page-relative terms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRequest {
    /// 1-based page index
    pub page: i64,
    /// Fraction of page width from the left edge
    pub x_pct: f64,
    /// Fraction of page height from the top edge
    pub y_pct: f64,
    /// Fraction of page width the signature should occupy
    pub width_pct: f64,
}

impl PlacementRequest {
    pub fn new(page: i64, x_pct: f64, y_pct: f64, width_pct: f64) -> Self {
        Self {
            page,
            x_pct,
            y_pct,
            width_pct,
        }
    }

    /// Check the percentage fields against their domains.
    ///
    /// The page index is not checked here; see [`resolve_page`].
    pub fn validate(&self) -> Result<(), StampError> {
        if !self.x_pct.is_finite() || !(0.0..=1.0).contains(&self.x_pct) {
            return Err(StampError::InvalidPlacement(format!(
                "xPct must be within [0, 1], got {}",
                self.x_pct
            )));
        }
        if !self.y_pct.is_finite() || !(0.0..=1.0).contains(&self.y_pct) {
            return Err(StampError::InvalidPlacement(format!(
                "yPct must be within [0, 1], got {}",
                self.y_pct
            )));
        }
        if !self.width_pct.is_finite() || self.width_pct <= 0.0 || self.width_pct > 1.0 {
            return Err(StampError::InvalidPlacement(format!(
                "widthPct must be within (0, 1], got {}",
                self.width_pct
            )));
        }
        Ok(())
    }
}

/// What to do with a page index outside the document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementPolicy {
    /// Move the index into `[1, page_count]`
    #[default]
    Clamp,
    /// Fail with [`StampError::InvalidPlacement`]
    Reject,
}

impl fmt::Display for PlacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementPolicy::Clamp => write!(f, "clamp"),
            PlacementPolicy::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for PlacementPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(PlacementPolicy::Clamp),
            "reject" => Ok(PlacementPolicy::Reject),
            other => Err(format!(
                "unknown placement policy '{}' (expected 'clamp' or 'reject')",
                other
            )),
        }
    }
}

/// A page's MediaBox, normalized so width and height are positive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x0: f64,
    pub y0: f64,
    pub width: f64,
    pub height: f64,
}

impl PageBox {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            x0: 0.0,
            y0: 0.0,
            width,
            height,
        }
    }

    /// Build from the four MediaBox numbers `[llx, lly, urx, ury]`
    pub fn from_media_box([a, b, c, d]: [f64; 4]) -> Self {
        Self {
            x0: a.min(c),
            y0: b.min(d),
            width: (c - a).abs(),
            height: (d - b).abs(),
        }
    }

    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }
}

/// Final image rectangle in PDF user space (bottom-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Turn a requested 1-based page index into one that exists.
pub fn resolve_page(
    requested: i64,
    page_count: u32,
    policy: PlacementPolicy,
) -> Result<u32, StampError> {
    if page_count == 0 {
        return Err(StampError::MalformedDocument(
            "document has no pages".to_string(),
        ));
    }

    let last = i64::from(page_count);
    match policy {
        PlacementPolicy::Clamp => Ok(requested.clamp(1, last) as u32),
        PlacementPolicy::Reject if (1..=last).contains(&requested) => Ok(requested as u32),
        PlacementPolicy::Reject => Err(StampError::InvalidPlacement(format!(
            "page {} does not exist (document has {} pages)",
            requested, page_count
        ))),
    }
}

/// Compute where an image of `image_size` pixels lands on `page`.
///
/// The width is `width_pct` of the page, floored at [`MIN_TARGET_WIDTH`] and
/// capped at the page width; the height follows the image's aspect ratio.
/// The box is then clamped so it never leaves the page, and finally flipped
/// into bottom-left coordinates.
pub fn compute_placement(
    page: PageBox,
    image_size: (u32, u32),
    request: &PlacementRequest,
) -> Result<Placement, StampError> {
    request.validate()?;

    let (pw, ph) = (page.width, page.height);
    if !(pw.is_finite() && ph.is_finite() && pw > 0.0 && ph > 0.0) {
        return Err(StampError::MalformedDocument(format!(
            "page has a degenerate MediaBox ({} x {})",
            pw, ph
        )));
    }

    let (iw, ih) = image_size;
    if iw == 0 || ih == 0 {
        return Err(StampError::InvalidImage(format!(
            "image has zero size ({} x {})",
            iw, ih
        )));
    }
    let aspect = f64::from(ih) / f64::from(iw);

    let mut target_w = (pw * request.width_pct)
        .max(MIN_TARGET_WIDTH.min(pw))
        .min(pw);
    let mut target_h = target_w * aspect;

    // Very tall images: fit by height so the box stays on the page
    if target_h > ph {
        target_h = ph;
        target_w = ph / aspect;
    }

    let x = (pw * request.x_pct).round().max(0.0).min(pw - target_w);
    let y_from_top = (ph * request.y_pct).round().max(0.0).min(ph - target_h);
    let y = ph - y_from_top - target_h;

    Ok(Placement {
        x: page.x0 + x,
        y: page.y0 + y,
        width: target_w,
        height: target_h,
    })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn dimension() -> impl Strategy<Value = f64> {
        1.0f64..2000.0
    }

    fn percentage() -> impl Strategy<Value = f64> {
        0.0f64..=1.0
    }

    fn width_percentage() -> impl Strategy<Value = f64> {
        prop_oneof![Just(0.01), Just(1.0), 0.01f64..=1.0]
    }

    fn pixels() -> impl Strategy<Value = u32> {
        1u32..4000
    }

    proptest! {
        /// Property: the image box never leaves the page
        #[test]
        fn placement_stays_within_page(
            pw in dimension(),
            ph in dimension(),
            x_pct in percentage(),
            y_pct in percentage(),
            width_pct in width_percentage(),
            iw in pixels(),
            ih in pixels(),
        ) {
            let request = PlacementRequest::new(1, x_pct, y_pct, width_pct);
            let p = compute_placement(PageBox::new(pw, ph), (iw, ih), &request).unwrap();

            let tolerance = 1e-6;
            prop_assert!(p.x >= -tolerance, "x below page: {:?}", p);
            prop_assert!(p.y >= -tolerance, "y below page: {:?}", p);
            prop_assert!(p.x + p.width <= pw + tolerance, "right edge past page: {:?}", p);
            prop_assert!(p.y + p.height <= ph + tolerance, "top edge past page: {:?}", p);
        }

        /// Property: the rendered box keeps the image's aspect ratio
        #[test]
        fn placement_preserves_aspect_ratio(
            pw in dimension(),
            ph in dimension(),
            width_pct in width_percentage(),
            iw in pixels(),
            ih in pixels(),
        ) {
            let request = PlacementRequest::new(1, 0.5, 0.5, width_pct);
            let p = compute_placement(PageBox::new(pw, ph), (iw, ih), &request).unwrap();

            let expected = f64::from(ih) / f64::from(iw);
            let actual = p.height / p.width;
            prop_assert!((actual - expected).abs() <= expected * 1e-9);
        }

        /// Property: unless the height fit kicks in, width honors the 8-unit floor
        #[test]
        fn placement_width_floor(
            pw in dimension(),
            width_pct in width_percentage(),
        ) {
            // Wide image on a tall page so height never limits width
            let request = PlacementRequest::new(1, 0.0, 0.0, width_pct);
            let p = compute_placement(PageBox::new(pw, 10_000.0), (1000, 1), &request).unwrap();
            prop_assert!(p.width >= MIN_TARGET_WIDTH.min(pw) - 1e-9);
            prop_assert!(p.width <= pw + 1e-9);
        }

        /// Property: identical input gives identical output
        #[test]
        fn placement_is_deterministic(
            pw in dimension(),
            ph in dimension(),
            x_pct in percentage(),
            y_pct in percentage(),
            width_pct in width_percentage(),
        ) {
            let request = PlacementRequest::new(1, x_pct, y_pct, width_pct);
            let a = compute_placement(PageBox::new(pw, ph), (120, 48), &request).unwrap();
            let b = compute_placement(PageBox::new(pw, ph), (120, 48), &request).unwrap();
            prop_assert_eq!(a, b);
        }

        /// Property: clamped page index is always a real page
        #[test]
        fn resolved_page_is_in_range(requested in -100i64..1000, count in 1u32..500) {
            let page = resolve_page(requested, count, PlacementPolicy::Clamp).unwrap();
            prop_assert!(page >= 1 && page <= count);
        }
    }
}
