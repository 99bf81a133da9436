pub mod backoff;
pub mod clock;
pub mod close;
pub mod error;
pub mod features;
pub mod id;
pub mod invocation_policy;
pub mod match_style;
pub mod roles;
pub mod stream;
pub mod uri;
