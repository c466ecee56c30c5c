//! Atomic order reconciliation — diff, cancel, and place in chunks of 4.
//!
//! Compares the resting orders the engine believes it has against a desired
//! quote set, cancels stale orders and places new ones through the venue's
//! atomic operation. Chunks are independent: a recoverable chunk failure is
//! logged and skipped, and the outcome flags tell the caller to resync.
//! Because matching is exact, re-submitting the same desired set is a no-op.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::types::Quote;
use crate::venue::{
    AtomicSubaction, FillMode, Side, SubactionResult, VenueClient, VenueError, VenueErrorKind,
};

/// Maximum subactions per atomic call (venue limit).
const MAX_ATOMIC_ACTIONS: usize = 4;

/// An order whose ID is known (kept from a previous atomic result or sync).
#[derive(Debug, Clone, PartialEq)]
pub struct CachedOrder {
    pub order_id: u64,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Result of one reconcile pass.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// The new resting-order set the engine should cache.
    pub orders: Vec<CachedOrder>,
    /// At least one chunk failed recoverably; the cache may be stale.
    pub had_chunk_errors: bool,
    /// A cancel referenced an unknown order; the caller must force a sync.
    pub needs_sync: bool,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Diff `current_orders` against `desired_quotes`, cancel stale orders, place
/// new ones, and return the resulting resting set.
///
/// Orders that already match a quote (same side, price, size — exact decimal
/// equality) are kept without touching the venue. Unrecoverable venue errors
/// (margin, session, transport) propagate to the caller.
pub async fn reconcile(
    venue: &dyn VenueClient,
    market_id: u32,
    current_orders: &[CachedOrder],
    desired_quotes: &[Quote],
) -> Result<ReconcileOutcome, VenueError> {
    let (kept, to_cancel, to_place) = diff_orders(current_orders, desired_quotes);

    if to_cancel.is_empty() && to_place.is_empty() {
        return Ok(ReconcileOutcome {
            orders: current_orders.to_vec(),
            had_chunk_errors: false,
            needs_sync: false,
        });
    }

    // Build actions: cancels first, then places.
    let mut actions: Vec<AtomicSubaction> = Vec::with_capacity(to_cancel.len() + to_place.len());
    for order in &to_cancel {
        actions.push(build_cancel_action(order.order_id));
    }
    for quote in &to_place {
        actions.push(build_place_action(market_id, quote));
    }

    let executed = execute_atomic(venue, &actions).await?;

    let mut orders = kept;
    orders.extend(executed.placed);
    Ok(ReconcileOutcome {
        orders,
        had_chunk_errors: executed.had_chunk_errors,
        needs_sync: executed.needs_sync,
    })
}

/// Cancel all given orders atomically (in chunks of 4).
///
/// Recoverable chunk failures are skipped like in [`reconcile`]; the venue's
/// periodic sync picks up any survivors.
pub async fn cancel_orders(
    venue: &dyn VenueClient,
    orders: &[CachedOrder],
) -> Result<(), VenueError> {
    if orders.is_empty() {
        return Ok(());
    }
    let actions: Vec<AtomicSubaction> = orders
        .iter()
        .map(|o| build_cancel_action(o.order_id))
        .collect();
    execute_atomic(venue, &actions).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Pure diffing logic (unit-testable)
// ---------------------------------------------------------------------------

/// Returns (kept_orders, orders_to_cancel, quotes_to_place).
fn diff_orders<'a>(
    current: &'a [CachedOrder],
    desired: &'a [Quote],
) -> (Vec<CachedOrder>, Vec<&'a CachedOrder>, Vec<&'a Quote>) {
    let mut kept = Vec::new();
    let mut to_place = Vec::new();
    let mut matched = vec![false; current.len()];

    for quote in desired {
        let found = current
            .iter()
            .enumerate()
            .position(|(i, o)| !matched[i] && order_matches_quote(o, quote));
        if let Some(idx) = found {
            matched[idx] = true;
            kept.push(current[idx].clone());
        } else {
            to_place.push(quote);
        }
    }

    let to_cancel: Vec<&CachedOrder> = current
        .iter()
        .enumerate()
        .filter(|(i, _)| !matched[*i])
        .map(|(_, o)| o)
        .collect();

    (kept, to_cancel, to_place)
}

/// An existing order matches a desired quote iff side, price and size are all
/// exactly equal.
fn order_matches_quote(order: &CachedOrder, quote: &Quote) -> bool {
    order.side == quote.side && order.price == quote.price && order.size == quote.size
}

// ---------------------------------------------------------------------------
// Action builders
// ---------------------------------------------------------------------------

fn build_place_action(market_id: u32, quote: &Quote) -> AtomicSubaction {
    AtomicSubaction::Place {
        market_id,
        side: quote.side,
        fill_mode: FillMode::PostOnly,
        is_reduce_only: false,
        price: quote.price,
        size: quote.size,
    }
}

fn build_cancel_action(order_id: u64) -> AtomicSubaction {
    AtomicSubaction::Cancel { order_id }
}

// ---------------------------------------------------------------------------
// Atomic execution (chunked, with per-chunk failure policy)
// ---------------------------------------------------------------------------

struct ExecutedActions {
    placed: Vec<CachedOrder>,
    had_chunk_errors: bool,
    needs_sync: bool,
}

/// Execute actions in chunks of [`MAX_ATOMIC_ACTIONS`].
///
/// Per-chunk failure policy:
/// - post-only cross: the book moved under us; skip, next tick reprices.
/// - stale order id: skip and tell the caller to force a sync.
/// - reason-less rejection: transient; skip.
/// - anything else (margin, transport, ...): propagate.
async fn execute_atomic(
    venue: &dyn VenueClient,
    actions: &[AtomicSubaction],
) -> Result<ExecutedActions, VenueError> {
    let mut executed = ExecutedActions {
        placed: Vec::new(),
        had_chunk_errors: false,
        needs_sync: false,
    };
    let total_chunks = actions.len().div_ceil(MAX_ATOMIC_ACTIONS);

    for (chunk_idx, chunk) in actions.chunks(MAX_ATOMIC_ACTIONS).enumerate() {
        info!(
            chunk = chunk_idx + 1,
            total = total_chunks,
            actions = format_actions(chunk),
            "ATOMIC"
        );

        match venue.atomic(chunk).await {
            Ok(results) => {
                let placed = extract_placed_orders(&results, chunk);
                if !placed.is_empty() {
                    debug!(
                        ids = ?placed.iter().map(|o| o.order_id).collect::<Vec<_>>(),
                        "placed orders"
                    );
                }
                executed.placed.extend(placed);
            }
            Err(e) => match e.kind() {
                VenueErrorKind::PostOnlyCross => {
                    warn!(error = %e, chunk = chunk_idx + 1, "post-only cross — skipping chunk");
                    executed.had_chunk_errors = true;
                }
                VenueErrorKind::StaleOrder => {
                    warn!(error = %e, chunk = chunk_idx + 1, "stale order id — skipping chunk, sync needed");
                    executed.had_chunk_errors = true;
                    executed.needs_sync = true;
                }
                VenueErrorKind::Transient => {
                    warn!(error = %e, chunk = chunk_idx + 1, "transient rejection — skipping chunk");
                    executed.had_chunk_errors = true;
                }
                VenueErrorKind::Margin | VenueErrorKind::Other => return Err(e),
            },
        }
    }

    Ok(executed)
}

/// Extract placed orders from a chunk result, pairing each `Placed` result
/// positionally with the chunk's place actions (submission order preserved).
fn extract_placed_orders(
    results: &[SubactionResult],
    actions: &[AtomicSubaction],
) -> Vec<CachedOrder> {
    let place_actions: Vec<&AtomicSubaction> = actions
        .iter()
        .filter(|a| matches!(a, AtomicSubaction::Place { .. }))
        .collect();

    let mut orders = Vec::new();
    let mut place_idx = 0;

    for r in results {
        if let SubactionResult::Placed { order_id } = r {
            if let Some(AtomicSubaction::Place {
                side, price, size, ..
            }) = place_actions.get(place_idx).copied()
            {
                orders.push(CachedOrder {
                    order_id: *order_id,
                    side: *side,
                    price: *price,
                    size: *size,
                });
            }
            place_idx += 1;
        }
    }

    orders
}

/// Format actions for logging.
fn format_actions(actions: &[AtomicSubaction]) -> String {
    actions
        .iter()
        .map(|a| match a {
            AtomicSubaction::Cancel { order_id } => format!("X{order_id}"),
            AtomicSubaction::Place {
                side,
                price,
                size,
                is_reduce_only,
                ..
            } => {
                let s = match side {
                    Side::Bid => "B",
                    Side::Ask => "A",
                };
                let ro = if *is_reduce_only { "RO" } else { "" };
                format!("{s}{ro}@{price}x{size}")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
