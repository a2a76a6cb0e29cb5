//! AI routing and cost ledger (spec.md §4.I).

mod error;
mod ledger;
mod provider;
mod router;

pub use error::ProviderError;
pub use ledger::Ledger;
pub use provider::{AiProvider, AiResponse, HttpProvider, MockProvider};
pub use router::{Route, Router, TaskType};
