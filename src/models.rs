// src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hash: String,
    pub cash: Decimal,
}

/// A user's open position in one symbol (a `master` row).
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub user_id: i64,
    pub username: String,
    pub symbol: String,
    pub stock: String,
    pub shares: i64,
    pub price: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeKind {
    Buy,
    Sell,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::Buy => "buy",
            TradeKind::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown trade type: {0}")]
pub struct UnknownTradeKind(String);

impl FromStr for TradeKind {
    type Err = UnknownTradeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(TradeKind::Buy),
            "sell" => Ok(TradeKind::Sell),
            other => Err(UnknownTradeKind(other.to_string())),
        }
    }
}

/// Audit record of a single buy or sell. Written once, never changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub user_id: i64,
    pub username: String,
    pub date: NaiveDate,
    pub stock: String,
    pub price: Decimal,
    pub shares: i64,
    pub cash_before: Decimal,
    pub cash_after: Decimal,
    pub symbol: String,
    pub kind: TradeKind,
}

// Money columns are TEXT so the decimal survives SQLite untouched.
fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(&text).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> FromRow<'r, SqliteRow> for User {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            hash: row.try_get("hash")?,
            cash: decimal_column(row, "cash")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Holding {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Holding {
            user_id: row.try_get("id")?,
            username: row.try_get("username")?,
            symbol: row.try_get("symbol")?,
            stock: row.try_get("stock")?,
            shares: row.try_get("number_of_shares")?,
            price: decimal_column(row, "price")?,
            total: decimal_column(row, "total")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Transaction {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("type")?;
        Ok(Transaction {
            user_id: row.try_get("id")?,
            username: row.try_get("username")?,
            date: row.try_get("date")?,
            stock: row.try_get("stock")?,
            price: decimal_column(row, "price")?,
            shares: row.try_get("number_of_shares")?,
            cash_before: decimal_column(row, "user_cash_before")?,
            cash_after: decimal_column(row, "user_cash_after")?,
            symbol: row.try_get("symbol")?,
            kind: kind.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: "type".to_string(),
                source: Box::new(e),
            })?,
        })
    }
}

// Form payloads. Browsers may omit fields or send them empty; both count as missing.

#[derive(Debug, Default, Deserialize)]
pub struct TradeForm {
    pub symbol: Option<String>,
    pub shares: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteForm {
    pub symbol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    pub username: Option<String>,
    pub password: Option<String>,
    pub confirmation: Option<String>,
}

/// Returns the field's value unless it is absent or empty.
pub fn field(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
