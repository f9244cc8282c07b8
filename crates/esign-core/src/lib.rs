//! Document signing core logic
//!
//! This crate holds the parts of the signing workflow that do real work on
//! bytes, independent of HTTP, storage or the cloud drive:
//!
//! - [`filter`]: turn a photographed or scanned signature into a
//!   transparent-background PNG
//! - [`placement`]: map browser percentages to PDF page coordinates
//! - [`stamp`]: composite the signature PNG onto a PDF page with lopdf
//! - [`cache`]: short-lived, memory-only storage for uploaded signatures

pub mod cache;
pub mod error;
pub mod filter;
pub mod placement;
pub mod stamp;

pub use cache::SignatureCache;
pub use error::{FilterError, StampError};
pub use filter::{fit_width, transparentize, try_transparentize};
pub use placement::{compute_placement, PageBox, Placement, PlacementPolicy, PlacementRequest};
pub use stamp::{stamp, stamp_detailed, StampOutcome};
