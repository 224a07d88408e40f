//! Run-scoped cancellation.

mod token;

pub use token::CancellationToken;
