use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// External gateway seams.
///
/// Checkout and fulfilment only ever talk to these traits; concrete
/// processors plug in behind them. The sandbox implementations below are
/// wired in development and in tests.

/// Result of a successful charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub transaction_id: String,
    pub amount: Decimal,
    pub method: String,
}

/// Result of booking a shipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentBooking {
    pub tracking_number: String,
    pub carrier: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges the customer. A declined charge is a [`ServiceError::PaymentFailed`];
    /// callers treat it as fail-fast and roll back any pending work.
    async fn charge(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        currency: &str,
        method: &str,
    ) -> Result<ChargeReceipt, ServiceError>;

    /// Refunds a previously captured charge, referenced by order number.
    async fn refund(&self, reference: &str, amount: Decimal) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait ShippingGateway: Send + Sync {
    /// Books a shipment for the order and returns a tracking number.
    async fn book_shipment(
        &self,
        order_id: Uuid,
        order_number: &str,
    ) -> Result<ShipmentBooking, ServiceError>;
}

/// Sandbox payment gateway. Approves everything except a zero or negative
/// amount, and `cod` orders are accepted without capture.
#[derive(Debug, Default, Clone)]
pub struct SandboxPaymentGateway;

#[async_trait]
impl PaymentGateway for SandboxPaymentGateway {
    async fn charge(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        currency: &str,
        method: &str,
    ) -> Result<ChargeReceipt, ServiceError> {
        if amount < Decimal::ZERO {
            return Err(ServiceError::PaymentFailed(
                "Charge amount cannot be negative".to_string(),
            ));
        }

        let transaction_id = format!("sandbox_{}", Uuid::new_v4().simple());
        info!(
            customer_id = %customer_id,
            %amount,
            currency,
            method,
            transaction_id = %transaction_id,
            "sandbox charge approved"
        );
        Ok(ChargeReceipt {
            transaction_id,
            amount,
            method: method.to_string(),
        })
    }

    async fn refund(&self, reference: &str, amount: Decimal) -> Result<(), ServiceError> {
        if amount < Decimal::ZERO {
            return Err(ServiceError::PaymentFailed(
                "Refund amount cannot be negative".to_string(),
            ));
        }
        info!(reference, %amount, "sandbox refund issued");
        Ok(())
    }
}

/// Sandbox shipping gateway. Issues deterministic-looking tracking numbers.
#[derive(Debug, Default, Clone)]
pub struct SandboxShippingGateway;

#[async_trait]
impl ShippingGateway for SandboxShippingGateway {
    async fn book_shipment(
        &self,
        order_id: Uuid,
        order_number: &str,
    ) -> Result<ShipmentBooking, ServiceError> {
        let tracking_number = format!("TRK{}", Uuid::new_v4().simple());
        info!(order_id = %order_id, order_number, tracking_number = %tracking_number, "sandbox shipment booked");
        Ok(ShipmentBooking {
            tracking_number,
            carrier: "sandbox-logistics".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn sandbox_charge_approves_positive_amounts() {
        let gateway = SandboxPaymentGateway;
        let receipt = gateway
            .charge(Uuid::new_v4(), dec!(499), "INR", "card")
            .await
            .unwrap();
        assert_eq!(receipt.amount, dec!(499));
        assert!(receipt.transaction_id.starts_with("sandbox_"));
    }

    #[tokio::test]
    async fn sandbox_charge_rejects_negative_amounts() {
        let gateway = SandboxPaymentGateway;
        let err = gateway
            .charge(Uuid::new_v4(), dec!(-1), "INR", "card")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PaymentFailed(_)));
    }

    #[tokio::test]
    async fn sandbox_shipping_returns_tracking_number() {
        let gateway = SandboxShippingGateway;
        let booking = gateway
            .book_shipment(Uuid::new_v4(), "BKC20240300007")
            .await
            .unwrap();
        assert!(booking.tracking_number.starts_with("TRK"));
    }
}
