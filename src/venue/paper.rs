//! In-process simulated venue.
//!
//! Implements [`VenueClient`] against local state: an order set, a signed
//! position, and a synthetic one-level book mirrored from the reference feed.
//! Resting post-only orders fill when the synthetic book crosses them and a
//! [`FillEvent`] is emitted, so the whole engine loop can run end to end with
//! no exchange. The fill model is deliberately naive (no queue position): it
//! exists to exercise the loop, not to estimate fill probability.

use std::sync::{Arc, Mutex, MutexGuard};

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    AccountInfo, AtomicSubaction, FillEvent, MidPrice, OpenOrder, PerpPosition, Side,
    SubactionResult, VenueClient, VenueError,
};

struct PaperState {
    next_order_id: u64,
    orders: Vec<OpenOrder>,
    position: Decimal,
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
    atomic_calls: usize,
    fail_next: Option<String>,
}

/// Simulated venue with a synthetic book.
#[derive(Clone)]
pub struct PaperVenue {
    market_id: u32,
    state: Arc<Mutex<PaperState>>,
    fill_tx: mpsc::UnboundedSender<FillEvent>,
    book_tx: Arc<watch::Sender<Option<MidPrice>>>,
}

impl PaperVenue {
    /// Create a paper venue for one market.
    ///
    /// Returns the venue plus its fill stream and book stream — the same
    /// channel shapes a live venue adapter would hand to the loop.
    pub fn new(
        market_id: u32,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<FillEvent>,
        watch::Receiver<Option<MidPrice>>,
    ) {
        let (fill_tx, fill_rx) = mpsc::unbounded_channel();
        let (book_tx, book_rx) = watch::channel(None);
        let venue = Self {
            market_id,
            state: Arc::new(Mutex::new(PaperState {
                next_order_id: 1,
                orders: Vec::new(),
                position: Decimal::ZERO,
                best_bid: None,
                best_ask: None,
                atomic_calls: 0,
                fail_next: None,
            })),
            fill_tx,
            book_tx: Arc::new(book_tx),
        };
        (venue, fill_rx, book_rx)
    }

    /// Seed the venue-side position (e.g. a pre-existing position at startup).
    pub fn set_position(&self, position: Decimal) {
        self.lock().position = position;
    }

    /// Update the synthetic book, publish it, and fill any crossed orders.
    pub fn set_book(&self, best_bid: Decimal, best_ask: Decimal, timestamp_ms: u64) {
        let fills = {
            let mut st = self.lock();
            st.best_bid = Some(best_bid);
            st.best_ask = Some(best_ask);

            // A resting bid fills when the ask side trades down through it; a
            // resting ask fills when the bid side trades up through it.
            let mut fills = Vec::new();
            st.orders.retain(|o| {
                let crossed = match o.side {
                    Side::Bid => best_ask <= o.price,
                    Side::Ask => best_bid >= o.price,
                };
                if crossed {
                    fills.push(FillEvent {
                        market_id: o.market_id,
                        side: o.side,
                        price: o.price,
                        size: o.size,
                    });
                    false
                } else {
                    true
                }
            });
            for fill in &fills {
                st.position = match fill.side {
                    Side::Bid => st.position + fill.size,
                    Side::Ask => st.position - fill.size,
                };
            }
            fills
        };

        let mid = (best_bid + best_ask) / Decimal::TWO;
        let _ = self.book_tx.send(Some(MidPrice {
            mid,
            best_bid,
            best_ask,
            timestamp_ms,
        }));

        for fill in fills {
            info!(side = %fill.side, price = %fill.price, size = %fill.size, "paper fill");
            let _ = self.fill_tx.send(fill);
        }
    }

    /// Make the next `atomic` call fail with the given venue reason.
    pub fn fail_next_atomic(&self, reason: &str) {
        self.lock().fail_next = Some(reason.to_string());
    }

    /// Number of `atomic` calls seen so far.
    pub fn atomic_calls(&self) -> usize {
        self.lock().atomic_calls
    }

    /// Mirror the reference feed into the synthetic venue book at
    /// `half_spread_bps` around the reference mid, until cancelled.
    pub fn spawn_reference_mirror(
        &self,
        mut reference_rx: watch::Receiver<Option<MidPrice>>,
        half_spread_bps: Decimal,
        cancel: CancellationToken,
    ) {
        let venue = self.clone();
        tokio::spawn(async move {
            let half = half_spread_bps / Decimal::from(10_000u32);
            loop {
                tokio::select! {
                    changed = reference_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let Some(reference) = *reference_rx.borrow_and_update() else {
                            continue;
                        };
                        let spread = reference.mid * half;
                        venue.set_book(
                            reference.mid - spread,
                            reference.mid + spread,
                            reference.timestamp_ms,
                        );
                    }
                    _ = cancel.cancelled() => {
                        debug!("paper venue mirror stopped");
                        return;
                    }
                }
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl VenueClient for PaperVenue {
    async fn atomic(
        &self,
        actions: &[AtomicSubaction],
    ) -> Result<Vec<SubactionResult>, VenueError> {
        let mut st = self.lock();
        st.atomic_calls += 1;

        if let Some(reason) = st.fail_next.take() {
            return Err(VenueError::Rejected(reason));
        }

        // Apply to a scratch copy; commit only if the whole group succeeds.
        let mut orders = st.orders.clone();
        let mut next_order_id = st.next_order_id;
        let mut results = Vec::with_capacity(actions.len());

        for action in actions {
            match action {
                AtomicSubaction::Cancel { order_id } => {
                    let idx = orders
                        .iter()
                        .position(|o| o.order_id == *order_id)
                        .ok_or_else(|| {
                            VenueError::Rejected(format!("ORDER_NOT_FOUND: {order_id}"))
                        })?;
                    orders.remove(idx);
                    results.push(SubactionResult::Cancelled {
                        order_id: *order_id,
                    });
                }
                AtomicSubaction::Place {
                    market_id,
                    side,
                    price,
                    size,
                    ..
                } => {
                    let crosses = match side {
                        Side::Bid => st.best_ask.is_some_and(|ask| *price >= ask),
                        Side::Ask => st.best_bid.is_some_and(|bid| *price <= bid),
                    };
                    if crosses {
                        return Err(VenueError::Rejected(
                            "POST_ONLY order MUST_NOT_FILL".to_string(),
                        ));
                    }
                    let order_id = next_order_id;
                    next_order_id += 1;
                    orders.push(OpenOrder {
                        order_id,
                        market_id: *market_id,
                        side: *side,
                        price: *price,
                        size: *size,
                    });
                    results.push(SubactionResult::Placed { order_id });
                }
            }
        }

        st.orders = orders;
        st.next_order_id = next_order_id;
        Ok(results)
    }

    async fn fetch_info(&self) -> Result<AccountInfo, VenueError> {
        let st = self.lock();
        Ok(AccountInfo {
            orders: st.orders.clone(),
            positions: vec![PerpPosition {
                market_id: self.market_id,
                base_size: st.position,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::FillMode;
    use rust_decimal_macros::dec;

    fn place(side: Side, price: Decimal, size: Decimal) -> AtomicSubaction {
        AtomicSubaction::Place {
            market_id: 1,
            side,
            fill_mode: FillMode::PostOnly,
            is_reduce_only: false,
            price,
            size,
        }
    }

    #[tokio::test]
    async fn test_place_and_fetch() {
        let (venue, _fills, _book) = PaperVenue::new(1);
        venue.set_book(dec!(99), dec!(101), 0);
        let results = venue
            .atomic(&[place(Side::Bid, dec!(98), dec!(1))])
            .await
            .unwrap();
        assert!(matches!(results[0], SubactionResult::Placed { .. }));
        let info = venue.fetch_info().await.unwrap();
        assert_eq!(info.orders.len(), 1);
        assert_eq!(info.orders[0].price, dec!(98));
    }

    #[tokio::test]
    async fn test_post_only_rejects_crossing_bid() {
        let (venue, _fills, _book) = PaperVenue::new(1);
        venue.set_book(dec!(99), dec!(101), 0);
        let err = venue
            .atomic(&[place(Side::Bid, dec!(101), dec!(1))])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("MUST_NOT_FILL"));
    }

    #[tokio::test]
    async fn test_atomic_group_is_all_or_nothing() {
        let (venue, _fills, _book) = PaperVenue::new(1);
        venue.set_book(dec!(99), dec!(101), 0);
        // Second subaction fails (stale cancel) -> the place must not commit.
        let err = venue
            .atomic(&[
                place(Side::Bid, dec!(98), dec!(1)),
                AtomicSubaction::Cancel { order_id: 999 },
            ])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ORDER_NOT_FOUND"));
        assert!(venue.fetch_info().await.unwrap().orders.is_empty());
    }

    #[tokio::test]
    async fn test_book_cross_fills_resting_order() {
        let (venue, mut fills, _book) = PaperVenue::new(1);
        venue.set_book(dec!(99), dec!(101), 0);
        venue
            .atomic(&[place(Side::Bid, dec!(98), dec!(1))])
            .await
            .unwrap();

        // Market trades down through our bid.
        venue.set_book(dec!(97), dec!(98), 1_000);
        let fill = fills.recv().await.unwrap();
        assert_eq!(fill.side, Side::Bid);
        assert_eq!(fill.price, dec!(98));
        assert_eq!(fill.size, dec!(1));

        let info = venue.fetch_info().await.unwrap();
        assert!(info.orders.is_empty());
        assert_eq!(info.positions[0].base_size, dec!(1));
    }

    #[tokio::test]
    async fn test_book_publishes_mid() {
        let (venue, _fills, book) = PaperVenue::new(1);
        venue.set_book(dec!(99), dec!(101), 42);
        let mid = book.borrow().unwrap();
        assert_eq!(mid.mid, dec!(100));
        assert_eq!(mid.timestamp_ms, 42);
    }
}
