//! Repository for order aggregate persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    error::Result,
    models::{Order, OrderId, OrderItem, OrderStatus},
};

/// Repository for order database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts an order and its line items within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if any insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order: &Order,
    ) -> Result<OrderId> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, store_id, status, total_amount, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id.0)
        .bind(&order.store_id)
        .bind(order.status.to_string())
        .bind(order.total_amount)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut **tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items
                    (id, order_id, product_name, quantity, unit_price, discount, tax)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(item.id)
            .bind(order.id.0)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.discount)
            .bind(item.tax)
            .execute(&mut **tx)
            .await?;
        }

        Ok(order.id)
    }

    /// Loads an order with its line items.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, store_id, status, total_amount, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT id, product_name, quantity, unit_price, discount, tax
            FROM order_items
            WHERE order_id = $1
            ORDER BY product_name
            "#,
        )
        .bind(order_id.0)
        .fetch_all(&*self.pool)
        .await?;

        let status: OrderStatus = row.try_get::<String, _>("status")?.parse()?;

        Ok(Some(Order {
            id: OrderId(row.try_get("id")?),
            store_id: row.try_get("store_id")?,
            status,
            total_amount: row.try_get("total_amount")?,
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// Updates an order's status within a transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the order does not exist.
    pub async fn update_status_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(status.to_string())
        .bind(updated_at)
        .bind(order_id.0)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(crate::error::CoreError::NotFound(format!("order {order_id} not found")));
        }

        Ok(())
    }
}
