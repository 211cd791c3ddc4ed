//! wbsync cache
//!
//! Cache invalidation for workbook transitions:
//!
//! - [`SignatureService`]: computes the [`WorkbookSignature`](wbsync_model::WorkbookSignature)
//!   of the loaded workbook
//! - [`SignatureScopedCache`]: a cache that refuses to serve or merge
//!   entries computed under a different signature
//! - [`WorkbookCaches`]: the defined-name and table caches reset on every
//!   transition
//!
//! # Example
//!
//! ```rust,ignore
//! use wbsync_cache::{SignatureService, WorkbookCaches};
//!
//! let signature = SignatureService::new(backend).compute(&descriptor).await;
//! caches.reset_all(&signature).await;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod error;
mod scoped;
mod signature;

pub use error::CacheError;
pub use scoped::{defined_name_key, SignatureScopedCache, WorkbookCaches, DEFAULT_CACHE_CAPACITY};
pub use signature::{format_signature, session_signature, SignatureService};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
