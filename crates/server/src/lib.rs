//! Request path of the fullpage cache.
//!
//! - [`CacheGate`]: exclusion, lookup and hit replay
//! - [`ResponseCapture`]: stores freshly generated pages on a miss
//! - [`InvalidationEngine`]: clears entries when content changes
//! - [`PageCache`]: picks the gate for a request's host

pub mod capture;
pub mod context;
pub mod error;
pub mod gate;
pub mod invalidation;
pub mod markup;
pub mod multisite;
pub mod page;

pub use capture::{ResponseCapture, SkipReason};
pub use context::RequestContext;
pub use error::GateError;
pub use gate::{CacheGate, Exclusion, Lookup};
pub use invalidation::{ClearOutcome, ContentEvent, InvalidationEngine, KeyTransformer, feed_variants};
pub use multisite::PageCache;
pub use page::{GeneratedPage, PageContext, PageGenerator};
