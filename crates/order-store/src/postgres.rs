use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use domain::{
    IdempotencyKey, Money, NewOrder, Order, OrderItem, OrderStatus, OrderSummary, ProductId,
    ShippingAddress, StockSnapshotRow, Totals,
};
use sqlx::{
    PgPool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
};
use uuid::Uuid;

use crate::{
    IdempotencyRecord, OrderPage, OrderQuery, Result, StoreError,
    store::{OrderStore, StoreTransaction},
};

const IDEMPOTENCY_CONSTRAINT: &str = "idempotency_keys_user_key";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url` and applies pending migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let totals = Totals::from_parts(
            Money::from_cents(row.try_get("subtotal_cents")?),
            Money::from_cents(row.try_get("tax_cents")?),
            Money::from_cents(row.try_get("shipping_cents")?),
            Money::from_cents(row.try_get("total_cents")?),
        )?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            status: row.try_get::<String, _>("status")?.parse()?,
            payment_status: row.try_get::<String, _>("payment_status")?.parse()?,
            payment_id: row.try_get("payment_id")?,
            totals,
            shipping_address: ShippingAddress {
                name: row.try_get("shipping_name")?,
                line1: row.try_get("shipping_line1")?,
                line2: row.try_get("shipping_line2")?,
                city: row.try_get("shipping_city")?,
                postal: row.try_get("shipping_postal")?,
                country: row.try_get("shipping_country")?,
            },
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderItem {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::Decode(format!("negative quantity {quantity}")))?,
        })
    }

    fn row_to_summary(row: PgRow) -> Result<OrderSummary> {
        Ok(OrderSummary {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            status: row.try_get::<String, _>("status")?.parse()?,
            total: Money::from_cents(row.try_get("total_cents")?),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }

    async fn find_idempotency_record(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, created_at
            FROM idempotency_keys
            WHERE user_id = $1 AND key_value = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<IdempotencyRecord> {
            Ok(IdempotencyRecord {
                user_id,
                key: key.as_str().to_string(),
                order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let Some(header) = sqlx::query(
            r#"
            SELECT id, user_id, status, payment_status, payment_id,
                   subtotal_cents, tax_cents, shipping_cents, total_cents,
                   shipping_name, shipping_line1, shipping_line2, shipping_city,
                   shipping_postal, shipping_country, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let items = sqlx::query(
            r#"
            SELECT product_id, unit_price_cents, quantity
            FROM order_items
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Self::row_to_item)
        .collect::<Result<Vec<_>>>()?;

        Self::row_to_order(&header, items).map(Some)
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage> {
        let mut filter = String::from(" WHERE 1=1");
        let mut param_count = 0;

        if query.status.is_some() {
            param_count += 1;
            filter.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.user_id.is_some() {
            param_count += 1;
            filter.push_str(&format!(" AND user_id = ${param_count}"));
        }

        let count_sql = format!("SELECT COUNT(*) FROM orders{filter}");
        let list_sql = format!(
            "SELECT id, user_id, status, total_cents, created_at FROM orders{filter} \
             ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        );

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        let mut list_query = sqlx::query(&list_sql);

        if let Some(status) = query.status {
            count_query = count_query.bind(status.as_str());
            list_query = list_query.bind(status.as_str());
        }
        if let Some(user_id) = query.user_id {
            count_query = count_query.bind(user_id.as_uuid());
            list_query = list_query.bind(user_id.as_uuid());
        }

        let (page, limit) = query.normalized();
        let offset = i64::try_from(query.offset()).unwrap_or(i64::MAX);
        list_query = list_query.bind(i64::from(limit)).bind(offset);

        let total = count_query.fetch_one(&self.pool).await?;
        let items = list_query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Self::row_to_summary)
            .collect::<Result<Vec<_>>>()?;

        Ok(OrderPage {
            total: u64::try_from(total).unwrap_or_default(),
            items,
            page,
            limit,
        })
    }

    async fn customer_email(&self, user_id: UserId) -> Result<Option<String>> {
        let email = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(email)
    }
}

/// Transaction over a [`PostgresOrderStore`].
///
/// Rolled back by sqlx when dropped without a commit.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_cart_lines(&mut self, user_id: UserId) -> Result<Vec<StockSnapshotRow>> {
        // Rows are locked in product id order so concurrent checkouts sharing
        // products cannot deadlock each other.
        let rows = sqlx::query(
            r#"
            SELECT ci.product_id, ci.quantity, p.price_cents, p.stock
            FROM carts c
            JOIN cart_items ci ON ci.cart_id = c.id
            JOIN products p ON p.id = ci.product_id
            WHERE c.user_id = $1 AND p.is_deleted = FALSE
            ORDER BY p.id
            FOR UPDATE OF p
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<StockSnapshotRow> {
                Ok(StockSnapshotRow {
                    product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
                    price: Money::from_cents(row.try_get("price_cents")?),
                    stock: row.try_get("stock")?,
                    requested_quantity: row.try_get("quantity")?,
                })
            })
            .collect()
    }

    async fn decrement_stock_if_available(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock - $1 WHERE id = $2 AND stock >= $1",
        )
        .bind(to_units(quantity)?)
        .bind(product_id.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn increment_stock(&mut self, product_id: &ProductId, quantity: u32) -> Result<()> {
        sqlx::query("UPDATE products SET stock = stock + $1 WHERE id = $2")
            .bind(to_units(quantity)?)
            .bind(product_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<()> {
        let address = &order.shipping_address;
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, status, payment_status, payment_id,
                subtotal_cents, tax_cents, shipping_cents, total_cents,
                shipping_name, shipping_line1, shipping_line2, shipping_city,
                shipping_postal, shipping_country, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $16)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.payment_id)
        .bind(order.totals.subtotal().cents())
        .bind(order.totals.tax().cents())
        .bind(order.totals.shipping().cents())
        .bind(order.totals.total().cents())
        .bind(&address.name)
        .bind(&address.line1)
        .bind(&address.line2)
        .bind(&address.city)
        .bind(&address.postal)
        .bind(&address.country)
        .bind(order.placed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_order_items(&mut self, order_id: OrderId, items: &[OrderItem]) -> Result<()> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, unit_price_cents, quantity)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(item.product_id.as_str())
            .bind(item.unit_price.cents())
            .bind(to_units(item.quantity)?)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn insert_idempotency_record(
        &mut self,
        user_id: UserId,
        key: &IdempotencyKey,
        order_id: OrderId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (user_id, key_value, order_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(key.as_str())
        .bind(order_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(IDEMPOTENCY_CONSTRAINT)
            {
                return StoreError::DuplicateIdempotencyKey {
                    user_id,
                    key: key.as_str().to_string(),
                };
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM cart_items
            WHERE cart_id IN (SELECT id FROM carts WHERE user_id = $1)
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_order_status(
        &mut self,
        order_id: OrderId,
        expected: OrderStatus,
        new_status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(new_status.as_str())
        .bind(at)
        .bind(order_id.as_uuid())
        .bind(expected.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn to_units(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::Unavailable(format!("quantity {quantity} out of range")))
}
