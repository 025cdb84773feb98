// src/trading.rs
use chrono::Local;
use log::{info, warn};
use rust_decimal::Decimal;
use sqlx::SqlitePool;

use crate::db;
use crate::error::TradeError;
use crate::models::{field, Holding, TradeForm, TradeKind, Transaction};
use crate::quote::QuoteClient;

#[derive(Debug)]
pub struct Portfolio {
    pub holdings: Vec<Holding>,
    pub cash: Decimal,
    pub total: Decimal,
}

fn parse_shares(text: &str) -> Result<i64, TradeError> {
    match text.trim().parse::<i64>() {
        Ok(shares) if shares > 0 => Ok(shares),
        _ => Err(TradeError::InvalidShares),
    }
}

/// Holdings marked to the latest price, plus cash and the grand total.
pub async fn portfolio(
    pool: &SqlitePool,
    quotes: &QuoteClient,
    user_id: i64,
) -> Result<Portfolio, TradeError> {
    let user = db::get_user(pool, user_id)
        .await?
        .ok_or(TradeError::UnknownUser(user_id))?;

    db::delete_empty_holdings(pool, user_id).await?;

    let mut holdings = db::get_holdings(pool, user_id).await?;
    for holding in holdings.iter_mut() {
        match quotes.price(&holding.symbol).await {
            Ok(Some(price)) => {
                holding.price = price;
                holding.total = price * Decimal::from(holding.shares);
                db::update_holding(pool, holding).await?;
            }
            Ok(None) => warn!(
                "No current price for {}; keeping {}",
                holding.symbol, holding.price
            ),
            Err(e) => warn!(
                "Price refresh for {} failed: {}; keeping {}",
                holding.symbol, e, holding.price
            ),
        }
    }

    let total = holdings.iter().map(|h| h.total).sum::<Decimal>() + user.cash;
    Ok(Portfolio {
        holdings,
        cash: user.cash,
        total,
    })
}

pub async fn buy(
    pool: &SqlitePool,
    quotes: &QuoteClient,
    user_id: i64,
    form: &TradeForm,
) -> Result<Transaction, TradeError> {
    let symbol = field(&form.symbol).ok_or(TradeError::MissingSymbol)?;
    let quote = quotes
        .lookup(symbol)
        .await?
        .ok_or(TradeError::InvalidSymbol)?;
    let shares = parse_shares(field(&form.shares).ok_or(TradeError::MissingShares)?)?;

    let mut tx = pool.begin().await?;

    let user = db::get_user(&mut *tx, user_id)
        .await?
        .ok_or(TradeError::UnknownUser(user_id))?;
    let cost = quote.price * Decimal::from(shares);
    if cost > user.cash {
        return Err(TradeError::CannotAfford);
    }

    let cash_after = user.cash - cost;
    db::update_cash(&mut *tx, user_id, cash_after).await?;

    let record = Transaction {
        user_id,
        username: user.username.clone(),
        date: Local::now().date_naive(),
        stock: quote.name.clone(),
        price: quote.price,
        shares,
        cash_before: user.cash,
        cash_after,
        symbol: quote.symbol.clone(),
        kind: TradeKind::Buy,
    };
    db::insert_transaction(&mut *tx, &record).await?;

    match db::get_holding(&mut *tx, user_id, &quote.symbol).await? {
        Some(mut holding) => {
            holding.shares += shares;
            holding.stock = quote.name;
            holding.price = quote.price;
            holding.total = quote.price * Decimal::from(holding.shares);
            db::update_holding(&mut *tx, &holding).await?;
        }
        None => {
            let holding = Holding {
                user_id,
                username: user.username,
                symbol: quote.symbol,
                stock: quote.name,
                shares,
                price: quote.price,
                total: cost,
            };
            db::insert_holding(&mut *tx, &holding).await?;
        }
    }

    tx.commit().await?;
    info!(
        "User {} bought {} {} at {}",
        user_id, record.shares, record.symbol, record.price
    );
    Ok(record)
}

pub async fn sell(
    pool: &SqlitePool,
    quotes: &QuoteClient,
    user_id: i64,
    form: &TradeForm,
) -> Result<Transaction, TradeError> {
    let shares_text = field(&form.shares).ok_or(TradeError::MissingShares)?;
    let symbol = field(&form.symbol).ok_or(TradeError::NotHeld)?;
    // Only symbols the user currently holds can be sold.
    let holding = db::get_holding(pool, user_id, symbol)
        .await?
        .filter(|h| h.shares > 0)
        .ok_or(TradeError::NotHeld)?;
    let shares = parse_shares(shares_text)?;
    if shares > holding.shares {
        return Err(TradeError::InsufficientShares);
    }
    let quote = quotes
        .lookup(&holding.symbol)
        .await?
        .ok_or(TradeError::InvalidSymbol)?;

    let mut tx = pool.begin().await?;

    let user = db::get_user(&mut *tx, user_id)
        .await?
        .ok_or(TradeError::UnknownUser(user_id))?;
    // Re-read inside the transaction; a concurrent sell may have run since.
    let mut holding = db::get_holding(&mut *tx, user_id, &holding.symbol)
        .await?
        .ok_or(TradeError::NotHeld)?;
    if shares > holding.shares {
        return Err(TradeError::InsufficientShares);
    }

    let proceeds = quote.price * Decimal::from(shares);
    let cash_after = user.cash + proceeds;
    db::update_cash(&mut *tx, user_id, cash_after).await?;

    let record = Transaction {
        user_id,
        username: user.username,
        date: Local::now().date_naive(),
        stock: quote.name,
        price: quote.price,
        shares,
        cash_before: user.cash,
        cash_after,
        symbol: holding.symbol.clone(),
        kind: TradeKind::Sell,
    };
    db::insert_transaction(&mut *tx, &record).await?;

    holding.shares -= shares;
    if holding.shares == 0 {
        db::delete_holding(&mut *tx, user_id, &holding.symbol).await?;
    } else {
        holding.price = quote.price;
        holding.total = quote.price * Decimal::from(holding.shares);
        db::update_holding(&mut *tx, &holding).await?;
    }

    tx.commit().await?;
    info!(
        "User {} sold {} {} at {}",
        user_id, record.shares, record.symbol, record.price
    );
    Ok(record)
}

pub async fn history(pool: &SqlitePool, user_id: i64) -> Result<Vec<Transaction>, TradeError> {
    Ok(db::get_transactions(pool, user_id).await?)
}

/// Symbols offered on the sell form.
pub async fn held_symbols(pool: &SqlitePool, user_id: i64) -> Result<Vec<String>, TradeError> {
    Ok(db::get_holdings(pool, user_id)
        .await?
        .into_iter()
        .filter(|h| h.shares > 0)
        .map(|h| h.symbol)
        .collect())
}
