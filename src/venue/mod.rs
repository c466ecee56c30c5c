//! Venue capability interface.
//!
//! The core never talks to a concrete exchange SDK. It consumes a
//! [`VenueClient`] trait object offering exactly the two RPCs the engine
//! needs: a chunked atomic place/cancel operation and an authoritative
//! account snapshot. Streams (book, fills) are plain tokio channels handed to
//! the loop separately.

pub mod paper;
pub mod types;

pub use types::{
    AccountInfo, AtomicSubaction, FillEvent, FillMode, MidPrice, OpenOrder, PerpPosition, Side,
    SubactionResult, BBO,
};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

/// Error returned by venue RPCs.
#[derive(Debug, Error)]
pub enum VenueError {
    /// The venue accepted the request but rejected the action, with a reason
    /// string in the venue's vocabulary.
    #[error("venue rejected: {0}")]
    Rejected(String),

    /// Transport-level failure; the venue's view of the action is unknown.
    #[error("venue transport error: {0}")]
    Transport(String),
}

/// Coarse classification of a venue error, derived from the reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueErrorKind {
    /// A post-only order would have crossed the book after submission.
    PostOnlyCross,
    /// A cancel referenced an order the venue no longer knows.
    StaleOrder,
    /// Margin / open-margin-fraction rejection.
    Margin,
    /// The venue rejected with no usable reason; safe to retry next tick.
    Transient,
    /// Anything else, including transport failures.
    Other,
}

impl VenueError {
    /// Classify by reason substring, the way the venue reports failures.
    pub fn kind(&self) -> VenueErrorKind {
        match self {
            VenueError::Transport(_) => VenueErrorKind::Other,
            VenueError::Rejected(reason) => classify_reason(reason),
        }
    }
}

fn classify_reason(reason: &str) -> VenueErrorKind {
    let upper = reason.to_ascii_uppercase();
    if upper.contains("POST_ONLY") || upper.contains("MUST_NOT_FILL") {
        VenueErrorKind::PostOnlyCross
    } else if upper.contains("ORDER_NOT_FOUND") {
        VenueErrorKind::StaleOrder
    } else if upper.contains("OMF") || upper.contains("RISK_TRADE") || upper.contains("MARGIN") {
        VenueErrorKind::Margin
    } else if upper.trim().is_empty() || upper.contains("NO REASON") {
        VenueErrorKind::Transient
    } else {
        VenueErrorKind::Other
    }
}

/// Base delay for snapshot retries.
const FETCH_RETRY_BASE: Duration = Duration::from_millis(500);

/// Retries after the initial snapshot attempt.
const FETCH_RETRIES: u32 = 3;

/// Fetch the account snapshot with bounded exponential backoff (base 500 ms,
/// 3 retries). Returns `None` when every attempt failed; callers retain
/// their prior state until the next sync.
pub async fn fetch_info_with_retry(venue: &dyn VenueClient, what: &str) -> Option<AccountInfo> {
    let mut delay = FETCH_RETRY_BASE;
    for attempt in 0..=FETCH_RETRIES {
        match venue.fetch_info().await {
            Ok(info) => return Some(info),
            Err(e) if attempt < FETCH_RETRIES => {
                debug!(error = %e, attempt, what, "snapshot fetch failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                error!(error = %e, what, "snapshot fetch failed after retries");
            }
        }
    }
    None
}

/// The venue RPC surface the core consumes.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Execute up to a chunk of place/cancel subactions as one atomic group.
    ///
    /// On success, returns one [`SubactionResult`] per subaction, preserving
    /// submission order. On failure the whole group is rejected and nothing
    /// was applied.
    async fn atomic(
        &self,
        actions: &[AtomicSubaction],
    ) -> Result<Vec<SubactionResult>, VenueError>;

    /// Authoritative snapshot of open orders and positions.
    async fn fetch_info(&self) -> Result<AccountInfo, VenueError>;
}
