use std::sync::Arc;

use isoflow_core::{ListResult, ServiceError, now_rfc3339};
use isoflow_sql::{Row, SQLStore, Value};

use crate::model::{Order, OrderListQuery, OrderStatus, Shipment};

/// SQL schema for the orders tables.
///
/// Orders are stored as a JSON `data` column (status, refs, and the
/// embedded timeline) plus the columns the engine filters or guards on.
/// The timeline rides inside `data`, so a status CAS and its timeline
/// event commit in one write.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS orders (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    status      TEXT NOT NULL,
    customer    TEXT NOT NULL,
    batch_id    TEXT,
    create_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_order_status ON orders(status);
CREATE INDEX IF NOT EXISTS idx_order_customer ON orders(customer);
CREATE INDEX IF NOT EXISTS idx_order_batch ON orders(batch_id);

CREATE TABLE IF NOT EXISTS shipments (
    id          TEXT PRIMARY KEY,
    data        TEXT NOT NULL,
    status      TEXT NOT NULL,
    create_at   TEXT NOT NULL
);
";

/// Persistent storage for orders and shipment slots.
pub struct OrderStore {
    db: Arc<dyn SQLStore>,
}

impl OrderStore {
    /// Create a new OrderStore and initialise the schema.
    pub fn new(db: Arc<dyn SQLStore>) -> Result<Self, ServiceError> {
        db.exec_batch(SCHEMA)
            .map_err(|e| ServiceError::Storage(format!("orders schema init: {e}")))?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Insert a new order.
    pub fn create(&self, order: &Order) -> Result<(), ServiceError> {
        let data =
            serde_json::to_string(order).map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.db
            .exec(
                "INSERT INTO orders (id, data, status, customer, batch_id, create_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                &[
                    Value::Text(order.id.clone()),
                    Value::Text(data),
                    Value::Text(order.status.as_str().to_string()),
                    Value::Text(order.customer.clone()),
                    opt_text(&order.batch_id),
                    Value::Text(order.created_at.clone()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Get an order by ID.
    pub fn get(&self, id: &str) -> Result<Order, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM orders WHERE id = ?1",
                &[Value::Text(id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = rows
            .first()
            .ok_or_else(|| ServiceError::NotFound(format!("order {id}")))?;

        row_to_json(row, "order")
    }

    /// Conditionally update an order: applies only if the stored status
    /// still equals `expected`. The serialized order already carries the
    /// new status and the appended timeline event, so the whole step is
    /// one write. Returns false if the CAS missed.
    pub fn update_cas(&self, order: &Order, expected: OrderStatus) -> Result<bool, ServiceError> {
        let data =
            serde_json::to_string(order).map_err(|e| ServiceError::Internal(e.to_string()))?;

        let affected = self
            .db
            .exec(
                "UPDATE orders SET data = ?1, status = ?2, batch_id = ?3 \
                 WHERE id = ?4 AND status = ?5",
                &[
                    Value::Text(data),
                    Value::Text(order.status.as_str().to_string()),
                    opt_text(&order.batch_id),
                    Value::Text(order.id.clone()),
                    Value::Text(expected.as_str().to_string()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(affected > 0)
    }

    /// List orders with optional filters.
    pub fn list(&self, query: &OrderListQuery) -> Result<ListResult<Order>, ServiceError> {
        let limit = query.limit.unwrap_or(50);
        let offset = query.offset.unwrap_or(0);

        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        let mut idx = 1;

        if let Some(ref s) = query.status {
            where_clauses.push(format!("status = ?{idx}"));
            params.push(Value::Text(s.clone()));
            idx += 1;
        }
        if let Some(ref c) = query.customer {
            where_clauses.push(format!("customer = ?{idx}"));
            params.push(Value::Text(c.clone()));
            idx += 1;
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) as cnt FROM orders {where_sql}");
        let count_rows = self
            .db
            .query(&count_sql, &params)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        let total = count_rows
            .first()
            .and_then(|r| r.get_i64("cnt"))
            .unwrap_or(0) as usize;

        let select_sql = format!(
            "SELECT data FROM orders {where_sql} ORDER BY create_at DESC LIMIT ?{idx} OFFSET ?{}",
            idx + 1
        );
        let mut select_params = params;
        select_params.push(Value::Integer(limit as i64));
        select_params.push(Value::Integer(offset as i64));

        let rows = self
            .db
            .query(&select_sql, &select_params)
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let items = rows
            .iter()
            .map(|r| row_to_json(r, "order"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ListResult { items, total })
    }

    /// Orders attached to a batch and currently in the given status.
    /// The fan-out query behind the batch-release trigger.
    pub fn list_by_batch(
        &self,
        batch_id: &str,
        status: OrderStatus,
    ) -> Result<Vec<Order>, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM orders WHERE batch_id = ?1 AND status = ?2 ORDER BY create_at",
                &[
                    Value::Text(batch_id.to_string()),
                    Value::Text(status.as_str().to_string()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        rows.iter().map(|r| row_to_json(r, "order")).collect()
    }

    // -----------------------------------------------------------------------
    // Shipments
    // -----------------------------------------------------------------------

    /// Insert a new shipment slot.
    pub fn create_shipment(&self, shipment: &Shipment) -> Result<(), ServiceError> {
        let data =
            serde_json::to_string(shipment).map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.db
            .exec(
                "INSERT INTO shipments (id, data, status, create_at) VALUES (?1, ?2, ?3, ?4)",
                &[
                    Value::Text(shipment.id.clone()),
                    Value::Text(data),
                    Value::Text(shipment.status.as_str().to_string()),
                    Value::Text(shipment.created_at.clone()),
                ],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Get a shipment by ID.
    pub fn get_shipment(&self, id: &str) -> Result<Shipment, ServiceError> {
        let rows = self
            .db
            .query(
                "SELECT data FROM shipments WHERE id = ?1",
                &[Value::Text(id.to_string())],
            )
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let row = rows
            .first()
            .ok_or_else(|| ServiceError::NotFound(format!("shipment {id}")))?;

        row_to_json(row, "shipment")
    }
}

/// Mark an order struct as updated now.
pub fn touch(order: &mut Order) {
    order.updated_at = Some(now_rfc3339());
}

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

/// Deserialize an entity from a row's `data` JSON column.
fn row_to_json<T: serde::de::DeserializeOwned>(row: &Row, what: &str) -> Result<T, ServiceError> {
    let json = row
        .get_str("data")
        .ok_or_else(|| ServiceError::Storage("missing data column".into()))?;
    serde_json::from_str(json).map_err(|e| ServiceError::Storage(format!("bad {what} json: {e}")))
}
