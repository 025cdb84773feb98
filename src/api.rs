// src/api.rs
use std::convert::Infallible;

use log::{debug, error, info};
use sqlx::SqlitePool;
use warp::http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA};
use warp::http::{StatusCode, Uri};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::auth::{self, Sessions, SESSION_COOKIE};
use crate::error::{describe, AppError, LoginRequired};
use crate::models::{field, LoginForm, QuoteForm, RegisterForm, TradeForm};
use crate::quote::QuoteClient;
use crate::trading;
use crate::views;

/// Everything a handler needs. Clones share the pool, HTTP client and sessions.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub quotes: QuoteClient,
    pub sessions: Sessions,
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(index_handler);

    let buy_form = warp::path!("buy")
        .and(warp::get())
        .and(with_user(state.clone()))
        .map(|_user_id: i64| html(views::buy()));

    let buy = warp::path!("buy")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::form())
        .and_then(buy_handler);

    let sell_form = warp::path!("sell")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(sell_form_handler);

    let sell = warp::path!("sell")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::form())
        .and_then(sell_handler);

    let quote_form = warp::path!("quote")
        .and(warp::get())
        .and(with_user(state.clone()))
        .map(|_user_id: i64| html(views::quote()));

    let quote = warp::path!("quote")
        .and(warp::post())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(warp::body::form())
        .and_then(quote_handler);

    let history = warp::path!("history")
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(history_handler);

    let login_form = warp::path!("login")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::cookie::optional::<String>(SESSION_COOKIE))
        .and_then(login_form_handler);

    let login = warp::path!("login")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::cookie::optional::<String>(SESSION_COOKIE))
        .and(warp::body::form())
        .and_then(login_handler);

    let logout = warp::path!("logout")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::cookie::optional::<String>(SESSION_COOKIE))
        .and_then(logout_handler);

    let register_form = warp::path!("register")
        .and(warp::get())
        .map(|| html(views::register()));

    let register = warp::path!("register")
        .and(warp::post())
        .and(with_state(state))
        .and(warp::body::form())
        .and_then(register_handler);

    index
        .or(buy_form)
        .or(buy)
        .or(sell_form)
        .or(sell)
        .or(quote_form)
        .or(quote)
        .or(history)
        .or(login_form)
        .or(login)
        .or(logout)
        .or(register_form)
        .or(register)
        .recover(handle_rejection)
        .with(warp::reply::with::headers(no_cache_headers()))
        .with(warp::log("finance"))
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Resolves the logged-in user's id or rejects with `LoginRequired`.
fn with_user(state: AppState) -> impl Filter<Extract = (i64,), Error = Rejection> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE).and_then(move |token: Option<String>| {
        let sessions = state.sessions.clone();
        async move {
            match token {
                Some(token) => match sessions.user_id(&token).await {
                    Some(user_id) => Ok(user_id),
                    None => Err(warp::reject::custom(LoginRequired)),
                },
                None => Err(warp::reject::custom(LoginRequired)),
            }
        }
    })
}

fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

fn html(body: String) -> Response {
    warp::reply::html(body).into_response()
}

fn apology(message: &str, status: StatusCode) -> Response {
    warp::reply::with_status(
        warp::reply::html(views::apology(message, status.as_u16())),
        status,
    )
    .into_response()
}

fn redirect(location: &'static str) -> Response {
    warp::redirect::see_other(Uri::from_static(location)).into_response()
}

fn with_cookie(response: Response, cookie: String) -> Response {
    warp::reply::with_header(response, "set-cookie", cookie).into_response()
}

async fn index_handler(user_id: i64, state: AppState) -> Result<Response, Rejection> {
    match trading::portfolio(&state.pool, &state.quotes, user_id).await {
        Ok(portfolio) => Ok(html(views::index(
            &portfolio.holdings,
            portfolio.cash,
            portfolio.total,
        ))),
        Err(e) => {
            error!("Failed to load portfolio for user {}: {}", user_id, e);
            Err(warp::reject::custom(AppError::from(e)))
        }
    }
}

async fn buy_handler(
    user_id: i64,
    state: AppState,
    form: TradeForm,
) -> Result<Response, Rejection> {
    match trading::buy(&state.pool, &state.quotes, user_id, &form).await {
        Ok(_) => Ok(redirect("/")),
        Err(e) if e.is_user_error() => {
            debug!("Rejected buy for user {}: {}", user_id, e);
            Ok(apology(&e.to_string(), StatusCode::BAD_REQUEST))
        }
        Err(e) => {
            error!("Failed to buy for user {}: {}", user_id, e);
            Err(warp::reject::custom(AppError::from(e)))
        }
    }
}

async fn sell_form_handler(user_id: i64, state: AppState) -> Result<Response, Rejection> {
    match trading::held_symbols(&state.pool, user_id).await {
        Ok(symbols) => Ok(html(views::sell(&symbols))),
        Err(e) => {
            error!("Failed to load holdings for user {}: {}", user_id, e);
            Err(warp::reject::custom(AppError::from(e)))
        }
    }
}

async fn sell_handler(
    user_id: i64,
    state: AppState,
    form: TradeForm,
) -> Result<Response, Rejection> {
    match trading::sell(&state.pool, &state.quotes, user_id, &form).await {
        Ok(_) => Ok(redirect("/")),
        Err(e) if e.is_user_error() => {
            debug!("Rejected sell for user {}: {}", user_id, e);
            Ok(apology(&e.to_string(), StatusCode::BAD_REQUEST))
        }
        Err(e) => {
            error!("Failed to sell for user {}: {}", user_id, e);
            Err(warp::reject::custom(AppError::from(e)))
        }
    }
}

async fn quote_handler(
    _user_id: i64,
    state: AppState,
    form: QuoteForm,
) -> Result<Response, Rejection> {
    let Some(symbol) = field(&form.symbol) else {
        return Ok(apology("Please provide a valid symbol", StatusCode::BAD_REQUEST));
    };
    match state.quotes.lookup(symbol).await {
        Ok(Some(quote)) => Ok(html(views::quoted(&quote))),
        Ok(None) => Ok(apology("Please provide a valid symbol", StatusCode::BAD_REQUEST)),
        Err(e) => {
            error!("Quote lookup for {} failed: {}", symbol, e);
            Err(warp::reject::custom(AppError::from(e)))
        }
    }
}

async fn history_handler(user_id: i64, state: AppState) -> Result<Response, Rejection> {
    match trading::history(&state.pool, user_id).await {
        Ok(transactions) => Ok(html(views::history(&transactions))),
        Err(e) => {
            error!("Failed to load history for user {}: {}", user_id, e);
            Err(warp::reject::custom(AppError::from(e)))
        }
    }
}

// Visiting the login page forgets whoever was logged in.
async fn login_form_handler(
    state: AppState,
    token: Option<String>,
) -> Result<Response, Rejection> {
    if let Some(token) = token {
        state.sessions.end(&token).await;
    }
    Ok(with_cookie(
        html(views::login()),
        auth::expired_session_cookie(),
    ))
}

async fn login_handler(
    state: AppState,
    token: Option<String>,
    form: LoginForm,
) -> Result<Response, Rejection> {
    if let Some(token) = token {
        state.sessions.end(&token).await;
    }

    let user = match auth::authenticate(&state.pool, &form).await {
        Ok(user) => user,
        Err(e) if e.is_user_error() => {
            info!("Failed login: {}", e);
            let response = apology(&e.to_string(), StatusCode::FORBIDDEN);
            return Ok(with_cookie(response, auth::expired_session_cookie()));
        }
        Err(e) => {
            error!("Failed to authenticate: {}", e);
            return Err(warp::reject::custom(AppError::from(e)));
        }
    };

    match state.sessions.start(user.id).await {
        Ok(token) => {
            info!("User {} logged in.", user.id);
            Ok(with_cookie(redirect("/"), auth::session_cookie(&token)))
        }
        Err(e) => {
            error!("Failed to start session for user {}: {}", user.id, e);
            Err(warp::reject::custom(AppError::from(e)))
        }
    }
}

async fn logout_handler(state: AppState, token: Option<String>) -> Result<Response, Rejection> {
    if let Some(token) = token {
        state.sessions.end(&token).await;
    }
    Ok(with_cookie(redirect("/"), auth::expired_session_cookie()))
}

async fn register_handler(state: AppState, form: RegisterForm) -> Result<Response, Rejection> {
    match auth::register(&state.pool, &form).await {
        Ok(_) => Ok(redirect("/login")),
        Err(e) if e.is_user_error() => {
            debug!("Rejected registration: {}", e);
            Ok(apology(&e.to_string(), StatusCode::BAD_REQUEST))
        }
        Err(e) => {
            error!("Failed to register user: {}", e);
            Err(warp::reject::custom(AppError::from(e)))
        }
    }
}

/// Turns every rejection into the apology page, or a login redirect.
async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.find::<LoginRequired>().is_some() {
        return Ok(redirect("/login"));
    }

    let status = if let Some(e) = err.find::<AppError>() {
        error!("Request failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    // A bad POST body arrives combined with the GET route's method
    // rejection, so it has to win over MethodNotAllowed.
    } else if err.find::<warp::body::BodyDeserializeError>().is_some()
        || err.find::<warp::reject::UnsupportedMediaType>().is_some()
        || err.find::<warp::reject::PayloadTooLarge>().is_some()
    {
        StatusCode::BAD_REQUEST
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else {
        error!("Unhandled rejection: {:?}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok(apology(describe(status), status))
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use rust_decimal_macros::dec;
    use warp::http::header::SET_COOKIE;
    use warp::http::Response as HttpResponse;
    use warp::hyper::body::Bytes;

    use super::*;
    use crate::db;
    use crate::quote::tests::{mock_quote, mock_unknown_symbols};

    struct TestApp {
        state: AppState,
        _server: MockServer,
    }

    async fn setup() -> TestApp {
        let server = MockServer::start_async().await;
        mock_quote(&server, "AAPL", "Apple Inc", "150.25").await;
        mock_unknown_symbols(&server).await;

        TestApp {
            state: AppState {
                pool: db::test_pool().await,
                quotes: QuoteClient::new_with_base_url(server.base_url(), "test_key"),
                sessions: Sessions::new("test_secret"),
            },
            _server: server,
        }
    }

    impl TestApp {
        async fn get(&self, path: &str, cookie: Option<&str>) -> HttpResponse<Bytes> {
            let mut request = warp::test::request().method("GET").path(path);
            if let Some(cookie) = cookie {
                request = request.header("cookie", cookie);
            }
            request.reply(&routes(self.state.clone())).await
        }

        async fn post(&self, path: &str, body: &str, cookie: Option<&str>) -> HttpResponse<Bytes> {
            let mut request = warp::test::request()
                .method("POST")
                .path(path)
                .header("content-type", "application/x-www-form-urlencoded")
                .body(body.to_string());
            if let Some(cookie) = cookie {
                request = request.header("cookie", cookie);
            }
            request.reply(&routes(self.state.clone())).await
        }

        /// Registers and logs in `username`; returns the cookie to send back.
        async fn login_as(&self, username: &str) -> String {
            let form = format!("username={username}&password=pw&confirmation=pw");
            let registered = self.post("/register", &form, None).await;
            assert_eq!(registered.status(), StatusCode::SEE_OTHER);

            let logged_in = self
                .post("/login", &format!("username={username}&password=pw"), None)
                .await;
            assert_eq!(logged_in.status(), StatusCode::SEE_OTHER);
            session_from(&logged_in)
        }

        async fn cash(&self, username: &str) -> rust_decimal::Decimal {
            db::find_user_by_username(&self.state.pool, username)
                .await
                .unwrap()
                .unwrap()
                .cash
        }
    }

    fn session_from(response: &HttpResponse<Bytes>) -> String {
        let set_cookie = response
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn location(response: &HttpResponse<Bytes>) -> &str {
        response.headers().get("location").unwrap().to_str().unwrap()
    }

    fn body(response: &HttpResponse<Bytes>) -> String {
        String::from_utf8(response.body().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn protected_pages_redirect_to_login() {
        let app = setup().await;
        for path in ["/", "/buy", "/sell", "/quote", "/history"] {
            let response = app.get(path, None).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{path}");
            assert_eq!(location(&response), "/login");
        }

        let forged = app.get("/", Some("session=not-a-token")).await;
        assert_eq!(location(&forged), "/login");
    }

    #[tokio::test]
    async fn responses_are_not_cached() {
        let app = setup().await;
        let response = app.get("/login", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CACHE_CONTROL],
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(response.headers()[EXPIRES], "0");
        assert_eq!(response.headers()[PRAGMA], "no-cache");
    }

    #[tokio::test]
    async fn register_then_login_reaches_portfolio() {
        let app = setup().await;
        let cookie = app.login_as("alice").await;

        let response = app.get("/", Some(&cookie)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body(&response).contains("$10,000.00"));
    }

    #[tokio::test]
    async fn register_redirects_to_login() {
        let app = setup().await;
        let response = app
            .post("/register", "username=alice&password=pw&confirmation=pw", None)
            .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let app = setup().await;
        app.login_as("alice").await;

        let response = app
            .post("/register", "username=alice&password=x&confirmation=x", None)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body(&response).contains("invalid username, choose another"));
    }

    #[tokio::test]
    async fn bad_password_is_forbidden() {
        let app = setup().await;
        app.login_as("alice").await;

        let response = app
            .post("/login", "username=alice&password=nope", None)
            .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body(&response).contains("invalid username and/or password"));

        let missing = app.post("/login", "username=alice", None).await;
        assert_eq!(missing.status(), StatusCode::FORBIDDEN);
        assert!(body(&missing).contains("must provide password"));
    }

    #[tokio::test]
    async fn logout_ends_session() {
        let app = setup().await;
        let cookie = app.login_as("alice").await;

        let response = app.get("/logout", Some(&cookie)).await;
        assert_eq!(location(&response), "/");

        let after = app.get("/", Some(&cookie)).await;
        assert_eq!(after.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&after), "/login");
    }

    #[tokio::test]
    async fn visiting_login_forgets_session() {
        let app = setup().await;
        let cookie = app.login_as("alice").await;

        app.get("/login", Some(&cookie)).await;

        let after = app.get("/history", Some(&cookie)).await;
        assert_eq!(location(&after), "/login");
    }

    #[tokio::test]
    async fn quote_shows_price_or_apologizes() {
        let app = setup().await;
        let cookie = app.login_as("alice").await;

        let found = app.post("/quote", "symbol=aapl", Some(&cookie)).await;
        assert_eq!(found.status(), StatusCode::OK);
        assert!(body(&found).contains("A share of Apple Inc (AAPL) costs $150.25."));

        let unknown = app.post("/quote", "symbol=ZZZZ", Some(&cookie)).await;
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
        assert!(body(&unknown).contains("Please provide a valid symbol"));

        let empty = app.post("/quote", "symbol=", Some(&cookie)).await;
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn buy_and_sell_through_forms() {
        let app = setup().await;
        let cookie = app.login_as("alice").await;

        let bought = app
            .post("/buy", "symbol=AAPL&shares=4", Some(&cookie))
            .await;
        assert_eq!(bought.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&bought), "/");
        assert_eq!(app.cash("alice").await, dec!(9399.00));

        let sell_page = app.get("/sell", Some(&cookie)).await;
        assert!(body(&sell_page).contains(r#"<option value="AAPL">AAPL</option>"#));

        let sold = app
            .post("/sell", "symbol=AAPL&shares=1", Some(&cookie))
            .await;
        assert_eq!(sold.status(), StatusCode::SEE_OTHER);
        assert_eq!(app.cash("alice").await, dec!(9549.25));

        let history = body(&app.get("/history", Some(&cookie)).await);
        assert!(history.contains("<td>buy</td><td>AAPL</td>"));
        assert!(history.contains("<td>sell</td><td>AAPL</td>"));
    }

    #[tokio::test]
    async fn buy_rejections_render_apology() {
        let app = setup().await;
        let cookie = app.login_as("alice").await;

        let invalid = app
            .post("/buy", "symbol=ZZZZ&shares=1", Some(&cookie))
            .await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert!(body(&invalid).contains("Please type in a valid Stock Symbol"));

        let too_many = app
            .post("/buy", "symbol=AAPL&shares=1000", Some(&cookie))
            .await;
        assert_eq!(too_many.status(), StatusCode::BAD_REQUEST);
        assert!(body(&too_many).contains("Cannot Afford"));

        assert_eq!(app.cash("alice").await, dec!(10000));
    }

    #[tokio::test]
    async fn oversell_renders_apology() {
        let app = setup().await;
        let cookie = app.login_as("alice").await;
        app.post("/buy", "symbol=AAPL&shares=1", Some(&cookie))
            .await;

        let response = app
            .post("/sell", "symbol=AAPL&shares=2", Some(&cookie))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body(&response).contains("Don&#39;t own that many shares"));
    }

    #[tokio::test]
    async fn unknown_path_and_method_render_apology() {
        let app = setup().await;

        let missing = app.get("/nowhere", None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert!(body(&missing).contains("Not Found"));

        let wrong_method = warp::test::request()
            .method("DELETE")
            .path("/register")
            .reply(&routes(app.state.clone()))
            .await;
        assert_eq!(wrong_method.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn malformed_form_body_is_bad_request() {
        let app = setup().await;

        let duplicate = app
            .post(
                "/register",
                "username=a&username=b&password=p&confirmation=p",
                None,
            )
            .await;
        assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
        assert!(body(&duplicate).contains("Bad Request"));

        let json = warp::test::request()
            .method("POST")
            .path("/register")
            .header("content-type", "application/json")
            .body(r#"{"username":"a"}"#)
            .reply(&routes(app.state.clone()))
            .await;
        assert_eq!(json.status(), StatusCode::BAD_REQUEST);

        let cookie = app.login_as("alice").await;
        let bad_buy = app
            .post("/buy", "symbol=AAPL&symbol=MSFT&shares=1", Some(&cookie))
            .await;
        assert_eq!(bad_buy.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.cash("alice").await, dec!(10000));
    }

    #[tokio::test]
    async fn database_failure_renders_internal_error() {
        let app = setup().await;
        let cookie = app.login_as("alice").await;
        app.state.pool.close().await;

        let response = app.get("/history", Some(&cookie)).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body(&response).contains("Internal Server Error"));
    }
}
