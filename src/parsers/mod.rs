pub mod lcov;

use crate::error::Result;
use crate::model::Section;

/// Every report parser implements this trait.
pub trait Parser: Send + Sync {
    /// Parse the input bytes into per-source-file sections, in report order.
    fn parse(&self, input: &[u8]) -> Result<Vec<Section>>;
}
