use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Catalog row for a sellable event. Owned by the catalog; checkout only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub venue_ref: Option<String>,
    /// Current price in the smallest currency unit.
    pub price_minor: i64,
    pub currency: String,
    pub capacity: Option<i32>,
    pub sales_open: bool,
    pub starts_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Whether a new checkout may start for this event, given how many tickets
    /// have already been issued for it.
    pub fn is_purchasable(&self, issued: i64, now: DateTime<Utc>) -> Result<(), &'static str> {
        if !self.sales_open {
            return Err("sales closed");
        }
        if self.starts_at <= now {
            return Err("event already started");
        }
        if let Some(capacity) = self.capacity {
            if issued >= i64::from(capacity) {
                return Err("sold out");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event() -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            title: "Warehouse Night".to_string(),
            venue_ref: Some("dock-7".to_string()),
            price_minor: 250,
            currency: "usd".to_string(),
            capacity: Some(2),
            sales_open: true,
            starts_at: now + Duration::days(3),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_open_event_with_capacity_left_is_purchasable() {
        assert!(event().is_purchasable(1, Utc::now()).is_ok());
    }

    #[test]
    fn test_sold_out_event_is_not_purchasable() {
        assert_eq!(event().is_purchasable(2, Utc::now()), Err("sold out"));
    }

    #[test]
    fn test_closed_or_past_event_is_not_purchasable() {
        let mut closed = event();
        closed.sales_open = false;
        assert_eq!(closed.is_purchasable(0, Utc::now()), Err("sales closed"));

        let past = event();
        let later = past.starts_at + Duration::hours(1);
        assert_eq!(past.is_purchasable(0, later), Err("event already started"));
    }

    #[test]
    fn test_unlimited_capacity() {
        let mut open = event();
        open.capacity = None;
        assert!(open.is_purchasable(10_000, Utc::now()).is_ok());
    }
}
