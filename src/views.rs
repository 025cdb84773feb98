// src/views.rs
use rust_decimal::Decimal;

use crate::models::{Holding, Transaction};
use crate::quote::Quote;

/// Formats money as US dollars, e.g. `$1,234.56`.
pub fn usd(value: Decimal) -> String {
    let rounded = value.round_dp(2);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    let text = format!("{:.2}", rounded.abs());
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("{sign}${grouped}.{cents}")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn layout(title: &str, logged_in: bool, main: &str) -> String {
    let nav = if logged_in {
        r#"<ul class="nav">
      <li><a href="/quote">Quote</a></li>
      <li><a href="/buy">Buy</a></li>
      <li><a href="/sell">Sell</a></li>
      <li><a href="/history">History</a></li>
    </ul>
    <ul class="nav right"><li><a href="/logout">Log Out</a></li></ul>"#
    } else {
        r#"<ul class="nav right">
      <li><a href="/register">Register</a></li>
      <li><a href="/login">Log In</a></li>
    </ul>"#
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="initial-scale=1, width=device-width">
  <title>C$50 Finance: {title}</title>
</head>
<body>
  <nav>
    <a class="brand" href="/">C$50 Finance</a>
    {nav}
  </nav>
  <main>
{main}
  </main>
</body>
</html>
"#,
        title = escape(title),
    )
}

pub fn apology(message: &str, code: u16) -> String {
    let main = format!(
        r#"    <h1 class="apology">{code}</h1>
    <p class="apology">{}</p>"#,
        escape(message)
    );
    layout("Apology", false, &main)
}

pub fn index(holdings: &[Holding], cash: Decimal, total: Decimal) -> String {
    let rows: String = holdings
        .iter()
        .map(|h| {
            format!(
                "      <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape(&h.symbol),
                escape(&h.stock),
                h.shares,
                usd(h.price),
                usd(h.total)
            )
        })
        .collect();
    let main = format!(
        r#"    <table>
      <thead>
        <tr><th>Symbol</th><th>Name</th><th>Shares</th><th>Price</th><th>TOTAL</th></tr>
      </thead>
      <tbody>
{rows}      </tbody>
      <tfoot>
        <tr><td colspan="4">CASH</td><td>{cash}</td></tr>
        <tr><td colspan="4"><b>TOTAL</b></td><td><b>{total}</b></td></tr>
      </tfoot>
    </table>"#,
        cash = usd(cash),
        total = usd(total),
    );
    layout("Portfolio", true, &main)
}

pub fn buy() -> String {
    let main = r#"    <form action="/buy" method="post">
      <input autocomplete="off" autofocus name="symbol" placeholder="Symbol" type="text">
      <input min="1" name="shares" placeholder="Shares" type="number">
      <button type="submit">Buy</button>
    </form>"#;
    layout("Buy", true, main)
}

pub fn sell(symbols: &[String]) -> String {
    let options: String = symbols
        .iter()
        .map(|s| format!("        <option value=\"{0}\">{0}</option>\n", escape(s)))
        .collect();
    let main = format!(
        r#"    <form action="/sell" method="post">
      <select name="symbol">
        <option disabled selected value="">Symbol</option>
{options}      </select>
      <input min="1" name="shares" placeholder="Shares" type="number">
      <button type="submit">Sell</button>
    </form>"#
    );
    layout("Sell", true, &main)
}

pub fn quote() -> String {
    let main = r#"    <form action="/quote" method="post">
      <input autocomplete="off" autofocus name="symbol" placeholder="Symbol" type="text">
      <button type="submit">Quote</button>
    </form>"#;
    layout("Quote", true, main)
}

pub fn quoted(quote: &Quote) -> String {
    let main = format!(
        "    <p>A share of {} ({}) costs {}.</p>",
        escape(&quote.name),
        escape(&quote.symbol),
        usd(quote.price)
    );
    layout("Quoted", true, &main)
}

pub fn history(transactions: &[Transaction]) -> String {
    let rows: String = transactions
        .iter()
        .map(|t| {
            format!(
                "      <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                t.kind,
                escape(&t.symbol),
                escape(&t.stock),
                t.shares,
                usd(t.price),
                usd(t.cash_before),
                usd(t.cash_after),
                t.date.format("%Y-%m-%d")
            )
        })
        .collect();
    let main = format!(
        r#"    <table>
      <thead>
        <tr><th>Type</th><th>Symbol</th><th>Name</th><th>Shares</th><th>Price</th><th>Cash Before</th><th>Cash After</th><th>Date</th></tr>
      </thead>
      <tbody>
{rows}      </tbody>
    </table>"#
    );
    layout("History", true, &main)
}

pub fn login() -> String {
    let main = r#"    <form action="/login" method="post">
      <input autocomplete="off" autofocus name="username" placeholder="Username" type="text">
      <input name="password" placeholder="Password" type="password">
      <button type="submit">Log In</button>
    </form>"#;
    layout("Log In", false, main)
}

pub fn register() -> String {
    let main = r#"    <form action="/register" method="post">
      <input autocomplete="off" autofocus name="username" placeholder="Username" type="text">
      <input name="password" placeholder="Password" type="password">
      <input name="confirmation" placeholder="Confirm Password" type="password">
      <button type="submit">Register</button>
    </form>"#;
    layout("Register", false, main)
}
