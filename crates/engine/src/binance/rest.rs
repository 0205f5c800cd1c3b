use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use common::{
    Actuation, ActuationRequest, Actuator, BookLevel, Direction, Error, MarketData, OrderBook,
    PositionSource, PriceBar, Quote, Result,
};

/// Depth limits the futures order book endpoint accepts.
const DEPTH_LIMITS: [usize; 7] = [5, 10, 20, 50, 100, 500, 1000];

/// REST client for Binance USDⓈ-M futures.
///
/// Public endpoints (bars, quotes, depth) work without keys; positions and
/// orders need an API key and secret.
pub struct BinanceClient {
    base_url: String,
    credentials: Option<Credentials>,
    http: Client,
    /// Price decimals per symbol, from the exchange's tick size.
    digits: RwLock<HashMap<String, u32>>,
}

struct Credentials {
    api_key: String,
    secret: String,
}

impl BinanceClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        secret: Option<String>,
    ) -> Result<Self> {
        let credentials = match (api_key, secret) {
            (Some(api_key), Some(secret)) => Some(Credentials { api_key, secret }),
            _ => None,
        };
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            http,
            digits: RwLock::new(HashMap::new()),
        })
    }

    fn credentials(&self) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| Error::Config("Binance API key and secret are not configured".into()))
    }

    async fn public_get(&self, path: &str, params: &str) -> Result<String> {
        let url = format!("{}{path}?{params}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        read_body(resp).await
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<String> {
        let creds = self.credentials()?;
        let query = signed_query(&creds.secret, params, Utc::now().timestamp_millis())?;
        let url = format!("{}{path}?{query}", self.base_url);

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        read_body(resp).await
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String> {
        let creds = self.credentials()?;
        let body = signed_query(&creds.secret, params, Utc::now().timestamp_millis())?;
        let url = format!("{}{path}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        read_body(resp).await
    }

    async fn price_digits(&self, symbol: &str) -> Result<u32> {
        if let Some(&d) = self.digits.read().await.get(symbol) {
            return Ok(d);
        }
        let body = self
            .public_get("/fapi/v1/exchangeInfo", &format!("symbol={symbol}"))
            .await?;
        let d = parse_price_digits(&body, symbol)?;
        debug!(symbol, digits = d, "Cached price precision");
        self.digits.write().await.insert(symbol.to_string(), d);
        Ok(d)
    }

    async fn place(&self, params: String) -> Result<String> {
        self.signed_post("/fapi/v1/order", &params).await
    }
}

async fn read_body(resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
    if !status.is_success() {
        return Err(Error::Exchange(format!("HTTP {status}: {body}")));
    }
    Ok(body)
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn bars(&self, symbol: &str, timeframe_minutes: u32, count: usize) -> Result<Vec<PriceBar>> {
        let interval = interval_code(timeframe_minutes)?;
        let limit = count.clamp(1, 1500);
        let body = self
            .public_get(
                "/fapi/v1/klines",
                &format!("symbol={symbol}&interval={interval}&limit={limit}"),
            )
            .await?;
        parse_klines(&body)
    }

    async fn quote(&self, symbol: &str) -> Result<Quote> {
        let digits = self.price_digits(symbol).await?;
        let body = self
            .public_get("/fapi/v1/ticker/bookTicker", &format!("symbol={symbol}"))
            .await?;
        let ticker: BookTicker =
            serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))?;
        Ok(Quote {
            bid: parse_num(&ticker.bid_price)?,
            ask: parse_num(&ticker.ask_price)?,
            digits,
        })
    }

    async fn order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        let limit = DEPTH_LIMITS
            .iter()
            .copied()
            .find(|&l| l >= depth)
            .unwrap_or(1000);
        let body = self
            .public_get("/fapi/v1/depth", &format!("symbol={symbol}&limit={limit}"))
            .await?;
        parse_depth(&body)
    }
}

#[async_trait]
impl PositionSource for BinanceClient {
    async fn open_position_count(&self) -> Result<usize> {
        let body = self.signed_get("/fapi/v2/positionRisk", "").await?;
        count_open_positions(&body)
    }
}

#[async_trait]
impl Actuator for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn act(&self, request: &ActuationRequest) -> Result<Actuation> {
        let (side, exit_side) = match request.direction {
            Direction::Long => ("BUY", "SELL"),
            Direction::Short => ("SELL", "BUY"),
            Direction::Standby => return Ok(Actuation::Rejected("standby is not an order".into())),
        };
        let d = request.digits as usize;

        debug!(symbol = %request.symbol, side, qty = request.lot_size, "Submitting market order to Binance");
        let entry = format!(
            "symbol={}&side={side}&type=MARKET&quantity={}",
            request.symbol, request.lot_size
        );
        match self.place(entry).await {
            Ok(body) => {
                let resp: OrderResponse =
                    serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))?;
                info!(symbol = %request.symbol, order_id = resp.order_id, "Market order accepted");
            }
            Err(Error::Exchange(reason)) => return Ok(Actuation::Rejected(reason)),
            Err(e) => return Err(e),
        }

        // Protective orders close the whole position; failure leaves the
        // entry in place and is only reported.
        let exits = [
            ("STOP_MARKET", request.stop_price),
            ("TAKE_PROFIT_MARKET", request.target_price),
        ];
        for (kind, price) in exits {
            let Some(price) = price else { continue };
            let params = format!(
                "symbol={}&side={exit_side}&type={kind}&stopPrice={price:.d$}&closePosition=true",
                request.symbol
            );
            if let Err(e) = self.place(params).await {
                warn!(symbol = %request.symbol, kind, error = %e, "Protective order failed");
            }
        }
        Ok(Actuation::Attempted)
    }
}

// ─── Pure helpers ─────────────────────────────────────────────────────────────

/// `params&timestamp=..&signature=..`, signed with HMAC-SHA256.
fn signed_query(secret: &str, params: &str, timestamp_ms: i64) -> Result<String> {
    let query = if params.is_empty() {
        format!("timestamp={timestamp_ms}")
    } else {
        format!("{params}&timestamp={timestamp_ms}")
    };
    let signature = sign(secret, &query)?;
    Ok(format!("{query}&signature={signature}"))
}

fn sign(secret: &str, query: &str) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid signing key: {e}")))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn interval_code(minutes: u32) -> Result<&'static str> {
    Ok(match minutes {
        1 => "1m",
        3 => "3m",
        5 => "5m",
        15 => "15m",
        30 => "30m",
        60 => "1h",
        120 => "2h",
        240 => "4h",
        360 => "6h",
        480 => "8h",
        720 => "12h",
        1440 => "1d",
        other => return Err(Error::Config(format!("unsupported timeframe: {other} minutes"))),
    })
}

fn parse_num(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| Error::Exchange(format!("not a number: '{raw}'")))
}

/// Decimals implied by a tick size such as `"0.01000"`.
fn tick_digits(tick_size: &str) -> u32 {
    match tick_size.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

fn parse_price_digits(body: &str, symbol: &str) -> Result<u32> {
    let info: ExchangeInfo = serde_json::from_str(body)?;
    info.symbols
        .iter()
        .find(|s| s.symbol == symbol)
        .and_then(|s| {
            s.filters
                .iter()
                .find(|f| f.filter_type == "PRICE_FILTER")
                .and_then(|f| f.tick_size.as_deref())
        })
        .map(tick_digits)
        .ok_or_else(|| Error::Exchange(format!("no price filter for {symbol}")))
}

/// Kline rows are arrays: `[openTime, open, high, low, close, volume, ...]`.
fn parse_klines(body: &str) -> Result<Vec<PriceBar>> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;
    rows.iter()
        .map(|row| {
            let field = |i: usize| -> Result<f64> {
                row.get(i)
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Exchange(format!("kline field {i} missing")))
                    .and_then(parse_num)
            };
            let open_ms = row
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| Error::Exchange("kline open time missing".into()))?;
            let time = Utc
                .timestamp_millis_opt(open_ms)
                .single()
                .ok_or_else(|| Error::Exchange(format!("bad kline time {open_ms}")))?;
            Ok(PriceBar::new(field(1)?, field(2)?, field(3)?, field(4)?, time))
        })
        .collect()
}

fn parse_depth(body: &str) -> Result<OrderBook> {
    let depth: DepthResponse = serde_json::from_str(body)?;
    let levels = |rows: &[[String; 2]]| -> Result<Vec<BookLevel>> {
        rows.iter()
            .map(|[price, qty]| {
                Ok(BookLevel {
                    price: parse_num(price)?,
                    volume: parse_num(qty)?,
                })
            })
            .collect()
    };
    Ok(OrderBook {
        bids: levels(&depth.bids)?,
        asks: levels(&depth.asks)?,
    })
}

fn count_open_positions(body: &str) -> Result<usize> {
    let positions: Vec<PositionRisk> = serde_json::from_str(body)?;
    positions
        .iter()
        .map(|p| parse_num(&p.position_amt).map(|amt| amt != 0.0))
        .try_fold(0, |n, open| open.map(|open| n + usize::from(open)))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    bid_price: String,
    ask_price: String,
}

#[derive(Deserialize)]
struct DepthResponse {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    position_amt: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<SymbolFilter>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    #[serde(default)]
    tick_size: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_published_vector() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn signed_query_appends_timestamp_and_signature() {
        let q = signed_query("key", "", 42).unwrap();
        assert!(q.starts_with("timestamp=42&signature="));
        let q = signed_query("key", "symbol=BTCUSDT", 42).unwrap();
        assert!(q.starts_with("symbol=BTCUSDT&timestamp=42&signature="));
    }

    #[test]
    fn timeframes_map_to_interval_codes() {
        assert_eq!(interval_code(1).unwrap(), "1m");
        assert_eq!(interval_code(240).unwrap(), "4h");
        assert_eq!(interval_code(1440).unwrap(), "1d");
        assert!(interval_code(7).is_err());
    }

    #[test]
    fn tick_size_gives_price_digits() {
        assert_eq!(tick_digits("0.01000000"), 2);
        assert_eq!(tick_digits("0.10"), 1);
        assert_eq!(tick_digits("1"), 0);
        assert_eq!(tick_digits("1.000"), 0);

        let body = r#"{"symbols":[{"symbol":"XAUUSDT","filters":[
            {"filterType":"LOT_SIZE","minQty":"0.001"},
            {"filterType":"PRICE_FILTER","tickSize":"0.01"}]}]}"#;
        assert_eq!(parse_price_digits(body, "XAUUSDT").unwrap(), 2);
        assert!(parse_price_digits(body, "BTCUSDT").is_err());
    }

    #[test]
    fn klines_parse_in_order() {
        let body = r#"[
            [1700000000000,"1950.10","1951.00","1949.50","1950.80","12.5",1700000059999,"0",10,"0","0","0"],
            [1700000060000,"1950.80","1952.20","1950.40","1952.00","9.1",1700000119999,"0",8,"0","0","0"]
        ]"#;
        let bars = parse_klines(body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, 1950.10);
        assert_eq!(bars[1].close, 1952.00);
        assert!(bars[0].time < bars[1].time);

        assert!(parse_klines(r#"[[1700000000000,"x","1","1","1"]]"#).is_err());
    }

    #[test]
    fn depth_and_positions_parse() {
        let book = parse_depth(r#"{"bids":[["100.0","2.5"]],"asks":[["100.1","1.0"],["100.2","3.0"]]}"#)
            .unwrap();
        assert_eq!(book.bids[0].volume, 2.5);
        assert_eq!(book.asks.len(), 2);

        let positions = r#"[
            {"symbol":"XAUUSDT","positionAmt":"0.010"},
            {"symbol":"BTCUSDT","positionAmt":"0.000"},
            {"symbol":"ETHUSDT","positionAmt":"-0.5"}
        ]"#;
        assert_eq!(count_open_positions(positions).unwrap(), 2);
    }

    #[tokio::test]
    async fn signed_calls_need_credentials() {
        let client = BinanceClient::new("http://127.0.0.1:9", None, None).unwrap();
        assert!(matches!(
            client.open_position_count().await,
            Err(Error::Config(_))
        ));
    }
}
