//! Payment transaction lifecycle and the interview access gate.
//!
//! A transaction is created `pending` when an STK push is initiated and is
//! moved to `paid` or `failed` exactly once by the gateway callback. The
//! callback path is idempotent: the transition is gated on the current
//! status and the expiry window, so a retried or late delivery finds the
//! record already final and applies no further side effects. A `pending` row
//! past its expiry is invalid for access-granting and for callback
//! transitions whether or not the sweep has rewritten it to `expired`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// How long an initiated payment stays claimable before it lapses.
pub const PAYMENT_EXPIRY_SECONDS: i64 = 15 * 60;

// ---------------------------------------------------------------------------
// Status and transaction types
// ---------------------------------------------------------------------------

/// Lifecycle status of a payment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(Error::Internal(format!("unknown payment status: {other}"))),
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One mobile-money payment and its consumption state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview_id: Option<String>,
    pub phone: String,
    pub amount: i64,
    pub status: PaymentStatus,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpesa_receipt: Option<String>,
    pub used: bool,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<i64>,
    pub expires_at: i64,
}

impl PaymentTransaction {
    /// Effective status at read time: a pending transaction past its expiry
    /// reads as expired even before the sweep rewrites the column.
    pub fn effective_status(&self, now: i64) -> PaymentStatus {
        if self.status == PaymentStatus::Pending && now > self.expires_at {
            PaymentStatus::Expired
        } else {
            self.status
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            interview_id: row.get("interview_id"),
            phone: row.get("phone"),
            amount: row.get("amount"),
            status: PaymentStatus::parse(&row.get::<String, _>("status"))?,
            checkout_request_id: row.get("checkout_request_id"),
            merchant_request_id: row.get("merchant_request_id"),
            mpesa_receipt: row.get("mpesa_receipt"),
            used: row.get::<i64, _>("used") != 0,
            created_at: row.get("created_at"),
            paid_at: row.get("paid_at"),
            expires_at: row.get("expires_at"),
        })
    }
}

/// Result of applying a gateway callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Transitioned pending -> paid and captured the receipt.
    MarkedPaid,
    /// Transitioned pending -> failed.
    MarkedFailed,
    /// The transaction was already in a terminal state; nothing changed.
    AlreadyFinal,
    /// No transaction matches the checkout request id.
    Unknown,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

const SELECT_COLUMNS: &str = "id, user_id, interview_id, phone, amount, status, \
     checkout_request_id, merchant_request_id, mpesa_receipt, used, \
     created_at, paid_at, expires_at";

/// Store for payment transactions.
#[derive(Clone)]
pub struct PaymentStore {
    pool: Pool<Sqlite>,
}

impl PaymentStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Record a freshly initiated payment as `pending` with a 15-minute
    /// expiry window.
    pub async fn create(
        &self,
        user_id: &str,
        interview_id: Option<&str>,
        phone: &str,
        amount: i64,
        checkout_request_id: &str,
        merchant_request_id: &str,
    ) -> Result<PaymentTransaction> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let expires_at = now + PAYMENT_EXPIRY_SECONDS;

        sqlx::query(
            r#"
            INSERT INTO payments
                (id, user_id, interview_id, phone, amount, status,
                 checkout_request_id, merchant_request_id, mpesa_receipt,
                 used, created_at, paid_at, expires_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, NULL, 0, ?, NULL, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(interview_id)
        .bind(phone)
        .bind(amount)
        .bind(checkout_request_id)
        .bind(merchant_request_id)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        info!(%id, user_id, checkout_request_id, amount, "payment initiated");

        Ok(PaymentTransaction {
            id,
            user_id: user_id.to_string(),
            interview_id: interview_id.map(str::to_string),
            phone: phone.to_string(),
            amount,
            status: PaymentStatus::Pending,
            checkout_request_id: checkout_request_id.to_string(),
            merchant_request_id: merchant_request_id.to_string(),
            mpesa_receipt: None,
            used: false,
            created_at: now,
            paid_at: None,
            expires_at,
        })
    }

    /// Fetch a transaction by its gateway correlation id.
    pub async fn get_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM payments WHERE checkout_request_id = ?"
        ))
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(PaymentTransaction::from_row).transpose()
    }

    /// Apply an asynchronous gateway result to the matching transaction.
    ///
    /// Result code 0 marks the transaction paid and captures the receipt;
    /// any other code marks it failed. The UPDATE is gated on
    /// `status = 'pending'` and on the expiry window, so a redelivered
    /// callback changes nothing, `paid_at` is never overwritten, and a
    /// callback landing after the window cannot resurrect an effectively
    /// expired transaction whether or not the sweep has rewritten it yet.
    pub async fn apply_callback(
        &self,
        checkout_request_id: &str,
        result_code: i64,
        mpesa_receipt: Option<&str>,
    ) -> Result<CallbackOutcome> {
        let now = Utc::now().timestamp();

        let applied = if result_code == 0 {
            sqlx::query(
                r#"
                UPDATE payments
                SET status = 'paid', mpesa_receipt = ?, paid_at = ?
                WHERE checkout_request_id = ? AND status = 'pending'
                  AND expires_at >= ?
                "#,
            )
            .bind(mpesa_receipt)
            .bind(now)
            .bind(checkout_request_id)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE payments
                SET status = 'failed'
                WHERE checkout_request_id = ? AND status = 'pending'
                  AND expires_at >= ?
                "#,
            )
            .bind(checkout_request_id)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected()
        };

        if applied > 0 {
            return Ok(if result_code == 0 {
                info!(checkout_request_id, "payment confirmed");
                CallbackOutcome::MarkedPaid
            } else {
                info!(checkout_request_id, result_code, "payment failed");
                CallbackOutcome::MarkedFailed
            });
        }

        // Nothing transitioned: a retry against a terminal record, a late
        // callback for an overdue pending row, or a callback we have no
        // record of.
        match self.get_by_checkout_id(checkout_request_id).await? {
            Some(tx) => {
                info!(
                    checkout_request_id,
                    status = tx.status.as_str(),
                    "duplicate callback ignored"
                );
                Ok(CallbackOutcome::AlreadyFinal)
            }
            None => {
                warn!(checkout_request_id, "callback for unknown transaction");
                Ok(CallbackOutcome::Unknown)
            }
        }
    }

    /// Rewrite overdue `pending` rows to `expired` so the raw status column
    /// stays authoritative for consumers reading it directly. Access checks
    /// never depended on this sweep running.
    pub async fn expire_pending(&self) -> Result<u64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE payments SET status = 'expired' WHERE status = 'pending' AND expires_at < ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        let expired = result.rows_affected();
        if expired > 0 {
            info!(expired, "pending payments marked expired");
        }
        Ok(expired)
    }

    /// Whether an unused, sufficiently large, paid transaction exists for
    /// this user and interview.
    pub async fn has_valid_access(
        &self,
        user_id: &str,
        interview_id: &str,
        required_amount: i64,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM payments
                WHERE user_id = ? AND interview_id = ?
                  AND status = 'paid' AND used = 0 AND amount >= ?
            )
            "#,
        )
        .bind(user_id)
        .bind(interview_id)
        .bind(required_amount)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Consume one payment to unlock one interview.
    ///
    /// Deterministically selects the oldest eligible transaction and flips
    /// `used` in a single statement; a second call for the same interview
    /// finds no eligible row and reports not-found instead of silently
    /// reusing the consumed one.
    pub async fn mark_used(
        &self,
        user_id: &str,
        interview_id: &str,
        required_amount: i64,
    ) -> Result<PaymentTransaction> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE payments SET used = 1
            WHERE id = (
                SELECT id FROM payments
                WHERE user_id = ? AND interview_id = ?
                  AND status = 'paid' AND used = 0 AND amount >= ?
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(interview_id)
        .bind(required_amount)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let tx = PaymentTransaction::from_row(&row)?;
                info!(id = %tx.id, user_id, interview_id, "payment consumed");
                Ok(tx)
            }
            None => Err(Error::NotFound(format!(
                "no unused paid transaction for user {user_id} interview {interview_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Expired,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(PaymentStatus::parse("bogus").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Expired.is_terminal());
    }

    #[test]
    fn test_effective_status_lazy_expiry() {
        let tx = PaymentTransaction {
            id: "t1".into(),
            user_id: "u1".into(),
            interview_id: None,
            phone: "254700000000".into(),
            amount: 3,
            status: PaymentStatus::Pending,
            checkout_request_id: "ws_CO_1".into(),
            merchant_request_id: "m1".into(),
            mpesa_receipt: None,
            used: false,
            created_at: 1000,
            paid_at: None,
            expires_at: 1000 + PAYMENT_EXPIRY_SECONDS,
        };

        assert_eq!(tx.effective_status(1001), PaymentStatus::Pending);
        assert_eq!(
            tx.effective_status(1000 + PAYMENT_EXPIRY_SECONDS + 1),
            PaymentStatus::Expired
        );

        // Terminal statuses are never reinterpreted.
        let paid = PaymentTransaction {
            status: PaymentStatus::Paid,
            ..tx
        };
        assert_eq!(
            paid.effective_status(1000 + PAYMENT_EXPIRY_SECONDS + 1),
            PaymentStatus::Paid
        );
    }
}
