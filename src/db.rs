// src/db.rs
use std::str::FromStr;
use std::time::Duration;

use log::info;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteExecutor, SqlitePool};

use crate::models::{Holding, Transaction, User};

pub async fn init(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    // WAL lets page loads read while a trade is being written; writers still
    // serialize, so give them a generous busy timeout.
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!().run(&pool).await?;

    info!("Successfully connected to {}.", database_url);
    Ok(pool)
}

pub async fn insert_user<'e, E: SqliteExecutor<'e>>(
    executor: E,
    username: &str,
    hash: &str,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query("INSERT INTO users (username, hash) VALUES (?, ?)")
        .bind(username)
        .bind(hash)
        .execute(executor)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn find_user_by_username<'e, E: SqliteExecutor<'e>>(
    executor: E,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT id, username, hash, cash FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(executor)
        .await
}

pub async fn get_user<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: i64,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT id, username, hash, cash FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(executor)
        .await
}

pub async fn update_cash<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: i64,
    cash: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET cash = ? WHERE id = ?")
        .bind(cash.to_string())
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn get_holdings<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: i64,
) -> Result<Vec<Holding>, sqlx::Error> {
    sqlx::query_as::<_, Holding>(
        "SELECT id, username, symbol, stock, number_of_shares, price, total
         FROM master WHERE id = ? ORDER BY symbol",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
}

pub async fn get_holding<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: i64,
    symbol: &str,
) -> Result<Option<Holding>, sqlx::Error> {
    sqlx::query_as::<_, Holding>(
        "SELECT id, username, symbol, stock, number_of_shares, price, total
         FROM master WHERE id = ? AND symbol = ?",
    )
    .bind(user_id)
    .bind(symbol)
    .fetch_optional(executor)
    .await
}

pub async fn insert_holding<'e, E: SqliteExecutor<'e>>(
    executor: E,
    holding: &Holding,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO master (id, username, symbol, stock, number_of_shares, price, total)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(holding.user_id)
    .bind(holding.username.as_str())
    .bind(holding.symbol.as_str())
    .bind(holding.stock.as_str())
    .bind(holding.shares)
    .bind(holding.price.to_string())
    .bind(holding.total.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn update_holding<'e, E: SqliteExecutor<'e>>(
    executor: E,
    holding: &Holding,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE master SET stock = ?, number_of_shares = ?, price = ?, total = ?
         WHERE id = ? AND symbol = ?",
    )
    .bind(holding.stock.as_str())
    .bind(holding.shares)
    .bind(holding.price.to_string())
    .bind(holding.total.to_string())
    .bind(holding.user_id)
    .bind(holding.symbol.as_str())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn delete_holding<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: i64,
    symbol: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM master WHERE id = ? AND symbol = ?")
        .bind(user_id)
        .bind(symbol)
        .execute(executor)
        .await?;
    Ok(())
}

/// Drops positions left at zero shares. Returns how many rows went away.
pub async fn delete_empty_holdings<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM master WHERE id = ? AND number_of_shares = 0")
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_transaction<'e, E: SqliteExecutor<'e>>(
    executor: E,
    transaction: &Transaction,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO transactions (id, username, date, stock, price, number_of_shares,
                                   user_cash_before, user_cash_after, symbol, type)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(transaction.user_id)
    .bind(transaction.username.as_str())
    .bind(transaction.date)
    .bind(transaction.stock.as_str())
    .bind(transaction.price.to_string())
    .bind(transaction.shares)
    .bind(transaction.cash_before.to_string())
    .bind(transaction.cash_after.to_string())
    .bind(transaction.symbol.as_str())
    .bind(transaction.kind.as_str())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_transactions<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: i64,
) -> Result<Vec<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(
        "SELECT id, username, date, stock, price, number_of_shares,
                user_cash_before, user_cash_after, symbol, type
         FROM transactions WHERE id = ? ORDER BY transaction_id",
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
}

/// In-memory database with migrations applied. One connection, so every
/// query in a test sees the same database.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}
