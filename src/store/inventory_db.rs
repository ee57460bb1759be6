//! Operational data store: inventory, sales, orders, alerts
//!
//! WAL mode for concurrent reads during cycle writes. Connections are
//! held behind a parking_lot Mutex; every public method locks for the
//! duration of one statement or transaction only.

use crate::models::{Alert, InventoryRecord, OrderRecord, OrderStatus, SalesEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS inventory (
    sku TEXT PRIMARY KEY,
    product_name TEXT NOT NULL,
    quantity INTEGER NOT NULL DEFAULT 0,
    threshold INTEGER NOT NULL DEFAULT 10,
    unit_price REAL NOT NULL DEFAULT 0.0,
    holding_cost_percent REAL NOT NULL DEFAULT 0.15,
    reorder_cost REAL NOT NULL DEFAULT 50.0,
    lead_time_days INTEGER NOT NULL DEFAULT 7,
    supplier TEXT,
    min_order_qty INTEGER NOT NULL DEFAULT 1,
    max_order_qty INTEGER,
    safety_stock INTEGER NOT NULL DEFAULT 5,
    reorder_point INTEGER,
    category TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_updated TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS sales (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL,
    sold_quantity INTEGER NOT NULL,
    date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sales_sku_date ON sales(sku, date DESC);
CREATE INDEX IF NOT EXISTS idx_sales_date ON sales(date DESC);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    order_date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'Pending',
    notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_orders_date ON orders(order_date DESC);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message TEXT NOT NULL,
    type TEXT NOT NULL,
    sku TEXT,
    priority INTEGER NOT NULL DEFAULT 3,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at DESC);
"#;

pub struct InventoryStore {
    conn: Mutex<Connection>,
}

impl InventoryStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {db_path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize inventory schema")?;
        info!("📦 Inventory store ready at {}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- inventory ----

    pub fn upsert_inventory(&self, item: &InventoryRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO inventory (sku, product_name, quantity, threshold, unit_price,
                holding_cost_percent, reorder_cost, lead_time_days, supplier, min_order_qty,
                max_order_qty, safety_stock, reorder_point, category, is_active, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(sku) DO UPDATE SET
                product_name = excluded.product_name,
                quantity = excluded.quantity,
                threshold = excluded.threshold,
                unit_price = excluded.unit_price,
                holding_cost_percent = excluded.holding_cost_percent,
                reorder_cost = excluded.reorder_cost,
                lead_time_days = excluded.lead_time_days,
                supplier = excluded.supplier,
                min_order_qty = excluded.min_order_qty,
                max_order_qty = excluded.max_order_qty,
                safety_stock = excluded.safety_stock,
                reorder_point = excluded.reorder_point,
                category = excluded.category,
                is_active = excluded.is_active,
                last_updated = excluded.last_updated",
            params![
                item.sku,
                item.product_name,
                item.quantity,
                item.threshold,
                item.unit_price,
                item.holding_cost_percent,
                item.reorder_cost,
                item.lead_time_days,
                item.supplier,
                item.min_order_qty,
                item.max_order_qty,
                item.safety_stock,
                item.reorder_point,
                item.category,
                item.is_active as i64,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to upsert inventory record")?;
        Ok(())
    }

    pub fn list_inventory(&self) -> Result<Vec<InventoryRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT sku, product_name, quantity, threshold, unit_price, holding_cost_percent,
                    reorder_cost, lead_time_days, supplier, min_order_qty, max_order_qty,
                    safety_stock, reorder_point, category, is_active
             FROM inventory ORDER BY sku",
        )?;
        let items = stmt
            .query_map([], row_to_inventory)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn get_inventory(&self, sku: &str) -> Result<Option<InventoryRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT sku, product_name, quantity, threshold, unit_price, holding_cost_percent,
                    reorder_cost, lead_time_days, supplier, min_order_qty, max_order_qty,
                    safety_stock, reorder_point, category, is_active
             FROM inventory WHERE sku = ?1",
        )?;
        let item = stmt
            .query_row(params![sku], row_to_inventory)
            .optional()?;
        Ok(item)
    }

    /// Bump on-hand quantity. Used by the simulation receipt path.
    pub fn adjust_quantity(&self, sku: &str, delta: i64) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE inventory SET quantity = quantity + ?1, last_updated = ?2 WHERE sku = ?3",
            params![delta, Utc::now().to_rfc3339(), sku],
        )?;
        if changed == 0 {
            anyhow::bail!("SKU {sku} not found");
        }
        Ok(())
    }

    // ---- sales ----

    pub fn insert_sale(&self, sale: &SalesEvent) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sales (sku, sold_quantity, date) VALUES (?1, ?2, ?3)",
            params![sale.sku, sale.sold_quantity, sale.date.to_rfc3339()],
        )
        .context("Failed to insert sale")?;
        Ok(conn.last_insert_rowid())
    }

    /// Sales newer than `cutoff`, newest first.
    pub fn sales_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SalesEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, sku, sold_quantity, date FROM sales
             WHERE date >= ?1 ORDER BY date DESC",
        )?;
        let sales = stmt
            .query_map(params![cutoff.to_rfc3339()], row_to_sale)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sales)
    }

    pub fn list_sales(&self, limit: usize) -> Result<Vec<SalesEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, sku, sold_quantity, date FROM sales ORDER BY date DESC LIMIT ?1",
        )?;
        let sales = stmt
            .query_map(params![limit as i64], row_to_sale)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sales)
    }

    // ---- orders ----

    pub fn insert_order(&self, order: &OrderRecord) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO orders (sku, quantity, order_date, status, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                order.sku,
                order.quantity,
                order.order_date.to_rfc3339(),
                order.status.as_str(),
                order.notes,
            ],
        )
        .context("Failed to insert order")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_orders(&self, limit: usize) -> Result<Vec<OrderRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, sku, quantity, order_date, status, notes
             FROM orders ORDER BY order_date DESC LIMIT ?1",
        )?;
        let orders = stmt
            .query_map(params![limit as i64], row_to_order)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    pub fn update_order_status(&self, order_id: i64, status: OrderStatus) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE orders SET status = ?1 WHERE id = ?2",
            params![status.as_str(), order_id],
        )?;
        if changed == 0 {
            anyhow::bail!("Order {order_id} not found");
        }
        Ok(())
    }

    // ---- alerts ----

    pub fn insert_alert(&self, alert: &Alert) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO alerts (message, type, sku, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                alert.message,
                alert.alert_type,
                alert.sku,
                alert.priority,
                alert.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert alert")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_alerts(&self, limit: usize) -> Result<Vec<Alert>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, message, type, sku, priority, created_at
             FROM alerts ORDER BY created_at DESC LIMIT ?1",
        )?;
        let alerts = stmt
            .query_map(params![limit as i64], row_to_alert)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(alerts)
    }
}

fn row_to_inventory(row: &rusqlite::Row<'_>) -> rusqlite::Result<InventoryRecord> {
    Ok(InventoryRecord {
        sku: row.get(0)?,
        product_name: row.get(1)?,
        quantity: row.get(2)?,
        threshold: row.get(3)?,
        unit_price: row.get(4)?,
        holding_cost_percent: row.get(5)?,
        reorder_cost: row.get(6)?,
        lead_time_days: row.get(7)?,
        supplier: row.get(8)?,
        min_order_qty: row.get(9)?,
        max_order_qty: row.get(10)?,
        safety_stock: row.get(11)?,
        reorder_point: row.get(12)?,
        category: row.get(13)?,
        is_active: row.get::<_, i64>(14)? != 0,
        semantic_facts: Vec::new(),
    })
}

fn row_to_sale(row: &rusqlite::Row<'_>) -> rusqlite::Result<SalesEvent> {
    let date: String = row.get(3)?;
    Ok(SalesEvent {
        id: row.get(0)?,
        sku: row.get(1)?,
        sold_quantity: row.get(2)?,
        date: parse_ts(&date),
    })
}

fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRecord> {
    let date: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(OrderRecord {
        id: row.get(0)?,
        sku: row.get(1)?,
        quantity: row.get(2)?,
        order_date: parse_ts(&date),
        status: OrderStatus::from_str(&status),
        notes: row.get(5)?,
    })
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    let created: String = row.get(5)?;
    Ok(Alert {
        id: row.get(0)?,
        message: row.get(1)?,
        alert_type: row.get(2)?,
        sku: row.get(3)?,
        priority: row.get(4)?,
        created_at: parse_ts(&created),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
