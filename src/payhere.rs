//! PayHere hosted checkout: form payload, request signature, and callback
//! verification.
//!
//! Both signatures use the merchant secret only through `UPPER(MD5(secret))`.

use chrono::Utc;
use md5::{Digest, Md5};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::format_amount;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayHereError {
    #[error("payment gateway credentials are not configured")]
    MissingCredentials,
    #[error("payment notification signature mismatch")]
    BadSignature,
    #[error("payment notification is for another merchant")]
    MerchantMismatch,
}

fn md5_upper(input: &str) -> String {
    hex::encode_upper(Md5::digest(input.as_bytes()))
}

pub fn checkout_hash(
    merchant_id: &str,
    order_id: &str,
    amount_cents: i64,
    currency: &str,
    merchant_secret: &str,
) -> String {
    let amount = format_amount(amount_cents);
    let secret = md5_upper(merchant_secret);
    md5_upper(&format!("{merchant_id}{order_id}{amount}{currency}{secret}"))
}

pub fn notify_signature(
    merchant_id: &str,
    order_id: &str,
    payhere_amount: &str,
    payhere_currency: &str,
    status_code: i32,
    merchant_secret: &str,
) -> String {
    let secret = md5_upper(merchant_secret);
    md5_upper(&format!(
        "{merchant_id}{order_id}{payhere_amount}{payhere_currency}{status_code}{secret}"
    ))
}

/// `ORD-<unix millis>-<6 hex>`; unique enough given the DB constraint backs it.
pub fn generate_order_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("ORD-{}-{suffix:06X}", Utc::now().timestamp_millis())
}

/// Fields posted by the browser to the hosted checkout page.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutForm {
    pub merchant_id: String,
    pub return_url: String,
    pub cancel_url: String,
    pub notify_url: String,
    pub order_id: String,
    pub items: String,
    pub currency: String,
    pub amount: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub country: String,
    pub hash: String,
    pub custom_1: String,
}

#[derive(Debug, Clone)]
pub struct Payer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

pub struct CheckoutParams<'a> {
    pub merchant_id: &'a str,
    pub merchant_secret: &'a str,
    pub app_base_url: &'a str,
    pub order_id: &'a str,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub session_id: Uuid,
    pub description: String,
    pub payer: &'a Payer,
}

pub fn build_checkout_form(p: CheckoutParams<'_>) -> CheckoutForm {
    CheckoutForm {
        merchant_id: p.merchant_id.to_string(),
        return_url: format!("{}/dashboard/sessions?payment=success&order_id={}", p.app_base_url, p.order_id),
        cancel_url: format!("{}/dashboard/sessions?payment=cancelled&order_id={}", p.app_base_url, p.order_id),
        notify_url: format!("{}/api/payment/notify", p.app_base_url),
        order_id: p.order_id.to_string(),
        items: p.description,
        currency: p.currency.to_string(),
        amount: format_amount(p.amount_cents),
        first_name: p.payer.first_name.clone(),
        last_name: p.payer.last_name.clone(),
        email: p.payer.email.clone(),
        phone: p.payer.phone.clone().unwrap_or_default(),
        address: "N/A".into(),
        city: "Colombo".into(),
        country: "Sri Lanka".into(),
        hash: checkout_hash(
            p.merchant_id,
            p.order_id,
            p.amount_cents,
            p.currency,
            p.merchant_secret,
        ),
        custom_1: p.session_id.to_string(),
    }
}

/// Server-to-server callback body (form-urlencoded).
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyForm {
    pub merchant_id: String,
    pub order_id: String,
    pub payment_id: Option<String>,
    pub payhere_amount: String,
    pub payhere_currency: String,
    pub status_code: i32,
    pub md5sig: String,
    pub method: Option<String>,
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Success,
    Pending,
    Failed,
}

impl NotifyOutcome {
    pub fn from_status_code(code: i32) -> Self {
        match code {
            2 => NotifyOutcome::Success,
            0 => NotifyOutcome::Pending,
            // -1 canceled, -2 failed, -3 chargedback, anything unknown
            _ => NotifyOutcome::Failed,
        }
    }
}

impl NotifyForm {
    pub fn verify(&self, merchant_id: &str, merchant_secret: &str) -> Result<NotifyOutcome, PayHereError> {
        if self.merchant_id != merchant_id {
            return Err(PayHereError::MerchantMismatch);
        }
        let expected = notify_signature(
            &self.merchant_id,
            &self.order_id,
            &self.payhere_amount,
            &self.payhere_currency,
            self.status_code,
            merchant_secret,
        );
        if !expected.eq_ignore_ascii_case(self.md5sig.trim()) {
            return Err(PayHereError::BadSignature);
        }
        Ok(NotifyOutcome::from_status_code(self.status_code))
    }
}
