//! Checkout engine.
//!
//! One checkout attempt moves `Idle -> AwaitingPaymentInput -> Processing ->
//! Completed`. A failed sale records its error and drops back to
//! `AwaitingPaymentInput` with the input kept. The engine owns payment input
//! and validation; the
//! backend calls happen in [`process_sale`] so a caller holding the engine
//! behind a lock can release it while the sale is in flight:
//!
//! ```rust,ignore
//! let request = engine.begin(&cart)?;           // -> Processing
//! let result = process_sale(&backend, &request, true).await;
//! let sale = engine.finish(result, &mut cart, shop)?; // -> Completed / AwaitingPaymentInput
//! ```
//!
//! Stock is decremented one line at a time after the transaction exists.
//! A failed decrement does not fail the sale; it comes back as a
//! [`StockCorrection`] to be replayed with [`retry_stock_corrections`].

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cart::{Cart, CartLine};
use crate::formatting::parse_amount;
use crate::models::{ItemId, PaymentMethod, TransactionRecord, TransactionRequest};
use crate::receipt_renderer::{ReceiptDoc, ShopHeader};
use crate::store::{PosBackend, StoreError};

/// Rounding steps for the cash shortcut buttons.
const QUICK_AMOUNT_STEPS: [i64; 4] = [1_000, 5_000, 10_000, 50_000];

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Keranjang masih kosong")]
    EmptyCart,
    #[error("Jumlah pembayaran tidak valid")]
    InvalidPayment,
    #[error("Jumlah pembayaran kurang dari total")]
    InsufficientPayment { payment: i64, total: i64 },
    #[error("Transaksi sedang diproses")]
    AlreadyProcessing,
    #[error("Pembayaran belum dibuka")]
    NotAwaitingPayment,
    #[error("Gagal memproses transaksi: {0}")]
    Remote(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutState {
    #[default]
    Idle,
    AwaitingPaymentInput,
    Processing,
    Completed,
}

/// A post-sale stock decrement that did not reach the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCorrection {
    pub transaction_id: i64,
    pub item_id: ItemId,
    pub delta: i64,
    pub error: String,
}

/// What the backend produced for one sale.
#[derive(Debug, Clone)]
pub struct SaleOutcome {
    pub record: TransactionRecord,
    pub corrections: Vec<StockCorrection>,
}

/// A finished sale as handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedSale {
    pub record: TransactionRecord,
    pub lines: Vec<CartLine>,
    pub corrections: Vec<StockCorrection>,
    pub receipt: ReceiptDoc,
}

/// Cash shortcuts: the total rounded up to each step, strictly above the
/// total, deduplicated, at most four.
pub fn quick_amounts(total: i64) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(QUICK_AMOUNT_STEPS.len());
    for step in QUICK_AMOUNT_STEPS {
        let rounded = ceil_to(total, step);
        if rounded > total && !out.contains(&rounded) {
            out.push(rounded);
        }
    }
    out.truncate(4);
    out
}

fn ceil_to(value: i64, step: i64) -> i64 {
    if value <= 0 {
        return 0;
    }
    ((value + step - 1) / step) * step
}

#[derive(Debug, Default)]
pub struct CheckoutEngine {
    state: CheckoutState,
    method: PaymentMethod,
    payment_input: String,
    total: i64,
    /// Lines submitted by the in-flight request.
    submitted: Vec<CartLine>,
    last_error: Option<String>,
}

impl CheckoutEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CheckoutState {
        self.state
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn accepts_input(&self) -> Result<(), CheckoutError> {
        match self.state {
            CheckoutState::AwaitingPaymentInput => Ok(()),
            CheckoutState::Processing => Err(CheckoutError::AlreadyProcessing),
            _ => Err(CheckoutError::NotAwaitingPayment),
        }
    }

    /// Open the payment step for `cart`, pre-filling the amount with the total.
    pub fn open_payment(&mut self, cart: &Cart) -> Result<(), CheckoutError> {
        if self.state == CheckoutState::Processing {
            return Err(CheckoutError::AlreadyProcessing);
        }
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        self.total = cart.total();
        self.method = PaymentMethod::Cash;
        self.payment_input = self.total.to_string();
        self.last_error = None;
        self.state = CheckoutState::AwaitingPaymentInput;
        Ok(())
    }

    pub fn set_payment_method(&mut self, method: PaymentMethod) -> Result<(), CheckoutError> {
        self.accepts_input()?;
        self.method = method;
        Ok(())
    }

    /// Free-form cash input. Ignored while Qris pins the amount.
    pub fn set_payment_input(&mut self, text: &str) -> Result<(), CheckoutError> {
        self.accepts_input()?;
        if self.method == PaymentMethod::Cash {
            self.payment_input = text.to_string();
        }
        Ok(())
    }

    /// What the payment field shows.
    pub fn payment_input(&self) -> String {
        match self.method {
            PaymentMethod::Cash => self.payment_input.clone(),
            PaymentMethod::Qris => self.total.to_string(),
        }
    }

    pub fn parsed_payment(&self) -> Option<i64> {
        match self.method {
            PaymentMethod::Cash => parse_amount(&self.payment_input),
            PaymentMethod::Qris => Some(self.total),
        }
    }

    /// Shortcut amounts for the current total. None under Qris.
    pub fn quick_amounts(&self) -> Vec<i64> {
        match self.method {
            PaymentMethod::Cash => quick_amounts(self.total),
            PaymentMethod::Qris => Vec::new(),
        }
    }

    /// Live change while the cashier types. `None` until the input covers the total.
    pub fn change_preview(&self) -> Option<i64> {
        match self.method {
            PaymentMethod::Qris => Some(0),
            PaymentMethod::Cash => self
                .parsed_payment()
                .filter(|p| *p >= self.total)
                .map(|p| p - self.total),
        }
    }

    /// Validate and move to `Processing`, returning the request to send.
    /// On a validation error the state is unchanged.
    pub fn begin(&mut self, cart: &Cart) -> Result<TransactionRequest, CheckoutError> {
        self.accepts_input()?;
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        self.total = cart.total();

        let (payment, change) = match self.method {
            PaymentMethod::Qris => (self.total, 0),
            PaymentMethod::Cash => {
                let payment = self.parsed_payment().ok_or(CheckoutError::InvalidPayment)?;
                if payment < self.total {
                    return Err(CheckoutError::InsufficientPayment {
                        payment,
                        total: self.total,
                    });
                }
                (payment, payment - self.total)
            }
        };

        self.submitted = cart.lines().to_vec();
        self.last_error = None;
        self.state = CheckoutState::Processing;
        Ok(TransactionRequest {
            total: self.total,
            payment,
            change,
            payment_method: self.method,
            lines: cart.transaction_lines(),
        })
    }

    /// Apply the outcome of [`process_sale`]. Success takes the sold
    /// quantities out of the cart and builds the receipt; failure leaves the
    /// cart alone and reopens the payment step for a retry.
    pub fn finish(
        &mut self,
        result: Result<SaleOutcome, StoreError>,
        cart: &mut Cart,
        shop: ShopHeader,
    ) -> Result<CompletedSale, CheckoutError> {
        let lines = std::mem::take(&mut self.submitted);
        match result {
            Ok(outcome) => {
                let receipt = ReceiptDoc::from_sale(&outcome.record, &lines, shop);
                cart.remove_sold(&lines);
                self.payment_input.clear();
                self.state = CheckoutState::Completed;
                Ok(CompletedSale {
                    record: outcome.record,
                    lines,
                    corrections: outcome.corrections,
                    receipt,
                })
            }
            Err(e) => {
                warn!(total = self.total, error = %e, "Sale failed, payment step reopened");
                self.last_error = Some(e.to_string());
                self.state = CheckoutState::AwaitingPaymentInput;
                Err(CheckoutError::Remote(e))
            }
        }
    }

    /// `begin` + `process_sale` + `finish` in one call.
    pub async fn submit<B: PosBackend>(
        &mut self,
        backend: &B,
        cart: &mut Cart,
        decrement_stock: bool,
        shop: ShopHeader,
    ) -> Result<CompletedSale, CheckoutError> {
        let request = self.begin(cart)?;
        let result = process_sale(backend, &request, decrement_stock).await;
        self.finish(result, cart, shop)
    }

    /// Leave the payment step. Not possible while a sale is in flight.
    pub fn cancel(&mut self) -> Result<(), CheckoutError> {
        if self.state == CheckoutState::Processing {
            return Err(CheckoutError::AlreadyProcessing);
        }
        *self = Self::default();
        Ok(())
    }

    /// Back to `Idle` once the completed sale has been acknowledged.
    pub fn reset_after_completion(&mut self) {
        if self.state == CheckoutState::Completed {
            *self = Self::default();
        }
    }
}

/// Persist the sale, then decrement stock line by line.
pub async fn process_sale<B: PosBackend>(
    backend: &B,
    request: &TransactionRequest,
    decrement_stock: bool,
) -> Result<SaleOutcome, StoreError> {
    let record = match backend.create_transaction(request).await {
        Ok(r) => r,
        Err(e) => {
            error!(total = request.total, error = %e, "Transaction creation failed");
            return Err(e);
        }
    };

    let mut corrections = Vec::new();
    if decrement_stock {
        for line in &request.lines {
            if let Err(e) = backend.adjust_stock(line.item_id, -line.quantity).await {
                warn!(
                    transaction_id = record.id,
                    item_id = line.item_id,
                    quantity = line.quantity,
                    error = %e,
                    "Stock decrement failed after sale, queued for correction"
                );
                corrections.push(StockCorrection {
                    transaction_id: record.id,
                    item_id: line.item_id,
                    delta: -line.quantity,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        transaction_id = record.id,
        total = record.total,
        method = %request.payment_method,
        pending_corrections = corrections.len(),
        "Sale completed"
    );
    Ok(SaleOutcome {
        record,
        corrections,
    })
}

/// Replay pending corrections in order. Returns the ones that still failed,
/// with their latest error.
pub async fn retry_stock_corrections<B: PosBackend>(
    backend: &B,
    corrections: Vec<StockCorrection>,
) -> Vec<StockCorrection> {
    let mut remaining = Vec::new();
    for mut c in corrections {
        match backend.adjust_stock(c.item_id, c.delta).await {
            Ok(item) => info!(
                transaction_id = c.transaction_id,
                item_id = c.item_id,
                delta = c.delta,
                stock = item.stock,
                "Stock correction applied"
            ),
            Err(StoreError::NotFound { .. }) => warn!(
                item_id = c.item_id,
                "Item no longer exists, dropping stock correction"
            ),
            Err(e) => {
                warn!(item_id = c.item_id, error = %e, "Stock correction still failing");
                c.error = e.to_string();
                remaining.push(c);
            }
        }
    }
    remaining
}
