pub mod coordinator;
pub mod fetcher;

pub use coordinator::{
    CancelOutcome, CoordinatorStatsSnapshot, FetchStatus, KeyState,
    RequestCoordinator, Subscription, WaiterId,
};
pub use fetcher::{
    DecodeImage, FetchContext, Fetcher, FnFetcher, ProgressReporter,
    fetcher_fn,
};
