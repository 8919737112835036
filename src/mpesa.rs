//! M-Pesa Daraja gateway client: STK push initiation and callback payloads.
//!
//! Outbound calls carry no retry policy; a gateway failure surfaces as an
//! upstream error and the client (UI) decides whether to retry.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Gateway credentials and endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct MpesaSettings {
    /// Daraja API base, e.g. "https://sandbox.safaricom.co.ke"
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Paybill/till number (BusinessShortCode).
    pub short_code: String,
    pub passkey: String,
    /// Publicly reachable URL for the asynchronous result callback.
    pub callback_url: String,
}

/// Correlation identifiers returned by a successful STK push.
#[derive(Debug, Clone)]
pub struct StkPushResponse {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
}

/// Client for the Daraja push-payment API.
pub struct MpesaClient {
    settings: MpesaSettings,
    client: reqwest::Client,
}

impl MpesaClient {
    pub fn new(settings: MpesaSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    /// Initiate an STK push to `phone` for `amount` shillings.
    pub async fn stk_push(
        &self,
        phone: &str,
        amount: i64,
        account_reference: &str,
        description: &str,
    ) -> Result<StkPushResponse> {
        let phone = normalize_phone(phone)?;
        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = stk_password(&self.settings.short_code, &self.settings.passkey, &timestamp);

        let body = serde_json::json!({
            "BusinessShortCode": self.settings.short_code,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount,
            "PartyA": phone,
            "PartyB": self.settings.short_code,
            "PhoneNumber": phone,
            "CallBackURL": self.settings.callback_url,
            "AccountReference": account_reference,
            "TransactionDesc": description,
        });

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.settings.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("stk push request failed: {e}")))?;

        let status = resp.status();
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("invalid stk push response: {e}")))?;

        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "stk push rejected ({status}): {}",
                json.get("errorMessage")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown gateway error")
            )));
        }

        let merchant_request_id = json
            .get("MerchantRequestID")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Upstream("stk push response missing MerchantRequestID".into()))?
            .to_string();
        let checkout_request_id = json
            .get("CheckoutRequestID")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Upstream("stk push response missing CheckoutRequestID".into()))?
            .to_string();

        info!(%checkout_request_id, amount, "stk push accepted by gateway");

        Ok(StkPushResponse {
            merchant_request_id,
            checkout_request_id,
        })
    }

    /// Fetch an OAuth bearer token using the consumer key/secret.
    async fn access_token(&self) -> Result<String> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.settings.base_url
        );
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.settings.consumer_key, Some(&self.settings.consumer_secret))
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("gateway auth request failed: {e}")))?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("invalid gateway auth response: {e}")))?;

        json.get("access_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Upstream("gateway auth response missing access_token".into()))
    }
}

/// Daraja STK password: base64(shortcode + passkey + timestamp).
pub fn stk_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    B64.encode(format!("{short_code}{passkey}{timestamp}"))
}

/// Normalize a Kenyan phone number to `2547XXXXXXXX` form.
///
/// Accepts `07…`/`01…`, `+254…`, and already-normalized `254…` input.
pub fn normalize_phone(phone: &str) -> Result<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    let normalized = if digits.len() == 10 && digits.starts_with('0') {
        format!("254{}", &digits[1..])
    } else if digits.len() == 12 && digits.starts_with("254") {
        digits
    } else {
        return Err(Error::InvalidInput(format!("invalid phone number: {phone}")));
    };

    Ok(normalized)
}

// ---------------------------------------------------------------------------
// Callback payload
// ---------------------------------------------------------------------------

/// Asynchronous STK result delivered by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StkCallback {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_desc: String,
    #[serde(default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

/// Named key/value items attached to a successful callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackMetadata {
    #[serde(default, rename = "item", alias = "Item")]
    pub item: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "name", alias = "Name")]
    pub name: String,
    #[serde(default, rename = "value", alias = "Value")]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    fn metadata_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.callback_metadata
            .as_ref()?
            .item
            .iter()
            .find(|i| i.name == name)?
            .value
            .as_ref()
    }

    /// External receipt reference, present on successful payments.
    pub fn receipt_number(&self) -> Option<String> {
        self.metadata_value("MpesaReceiptNumber")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Amount actually charged, as reported by the gateway.
    pub fn amount(&self) -> Option<f64> {
        self.metadata_value("Amount").and_then(|v| v.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stk_password() {
        assert_eq!(
            stk_password("174379", "key", "20260101120000"),
            B64.encode("174379key20260101120000")
        );
    }

    #[test]
    fn test_normalize_phone_local_format() {
        assert_eq!(normalize_phone("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("0112345678").unwrap(), "254112345678");
    }

    #[test]
    fn test_normalize_phone_international_format() {
        assert_eq!(normalize_phone("+254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("254 712 345 678").unwrap(), "254712345678");
    }

    #[test]
    fn test_normalize_phone_rejects_garbage() {
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("").is_err());
        assert!(normalize_phone("44712345678").is_err());
    }

    #[test]
    fn test_callback_receipt_extraction() {
        let raw = serde_json::json!({
            "merchantRequestId": "m-1",
            "checkoutRequestId": "ws_CO_1",
            "resultCode": 0,
            "resultDesc": "The service request is processed successfully.",
            "callbackMetadata": {
                "item": [
                    {"name": "Amount", "value": 3.0},
                    {"name": "MpesaReceiptNumber", "value": "QK12XYZ789"},
                    {"name": "PhoneNumber", "value": 254712345678u64}
                ]
            }
        });
        let cb: StkCallback = serde_json::from_value(raw).unwrap();
        assert_eq!(cb.receipt_number().as_deref(), Some("QK12XYZ789"));
        assert_eq!(cb.amount(), Some(3.0));
    }

    #[test]
    fn test_callback_without_metadata() {
        let raw = serde_json::json!({
            "merchantRequestId": "m-2",
            "checkoutRequestId": "ws_CO_2",
            "resultCode": 1032,
            "resultDesc": "Request cancelled by user"
        });
        let cb: StkCallback = serde_json::from_value(raw).unwrap();
        assert_eq!(cb.result_code, 1032);
        assert!(cb.receipt_number().is_none());
        assert!(cb.amount().is_none());
    }
}
