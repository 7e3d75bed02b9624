//! Rate limiting logic: categories, quotas, the three algorithms and the
//! facade that ties them together.

mod attempts;
mod backend;
mod category;
mod classify;
mod decision;
mod facade;
mod fixed_window;
mod guard;
mod key;
mod quota;
mod registry;
mod rejection;
mod sliding_window;
mod token_bucket;

pub use attempts::{AttemptRecord, AttemptTracker};
pub use backend::{Limiter, LimiterSettings, DEFAULT_MAX_CAS_RETRIES, DEFAULT_STORE_TIMEOUT};
pub use category::RateLimitCategory;
pub use classify::{client_identifier, ClassifierRule, PathClassifier};
pub use decision::{Algorithm, Decision, FailurePolicy, LimitResponse};
pub use facade::{RateLimitContext, RateLimitFacade};
pub use fixed_window::FixedWindowLimiter;
pub use guard::SecurityGuard;
pub use key::{KeyCodec, StoreKey, DEFAULT_NAMESPACE};
pub use quota::{QuotaConfig, QuotaSettings};
pub use registry::ConfigRegistry;
pub use rejection::{RejectionBody, RejectionResponse, TOO_MANY_REQUESTS};
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;
