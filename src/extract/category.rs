//! Category namer.
//!
//! Maps a raw region label and a 1-based sub-bin index to a canonical
//! `Category`. The last sub-bin of a region family becomes the overflow
//! ("at least N jets") bucket. Pure function: every pass over the raw data
//! must name bins identically.

use crate::config::RegionFamily;
use crate::domain::{Category, JetBucket};

/// First region family whose pattern occurs in `region`.
pub fn region_family<'a>(families: &'a [RegionFamily], region: &str) -> Option<&'a RegionFamily> {
    families.iter().find(|f| region.contains(f.pattern.as_str()))
}

/// Name sub-bin `bin` (1-based) of `region`.
///
/// Returns `None` if no family covers the region or `bin` is outside `1..=max_bins`.
pub fn name_category(families: &[RegionFamily], region: &str, bin: u32) -> Option<Category> {
    let family = region_family(families, region)?;
    if bin == 0 || bin > family.max_bins {
        return None;
    }
    let jets = bin + family.jet_offset;
    let bucket = if bin == family.max_bins {
        JetBucket::AtLeast(jets)
    } else {
        JetBucket::Exact(jets)
    };
    Some(Category::new(region, bucket))
}
