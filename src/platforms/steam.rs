//! Steam Community integration.
//!
//! Booster pack creator, community market and inventory, driven through the
//! same endpoints the web UI uses. Authentication is the browser session
//! cookie; nothing here can log in or renew a session.
//!
//! Pages: https://steamcommunity.com/tradingcards/boostercreator/
//! Market: https://steamcommunity.com/market/
//! Rate limit: undocumented; every request waits a random delay first.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{CONTENT_TYPE, COOKIE, REFERER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{CatalogSource, MarketActions, PriceOracle};
use crate::config::SteamConfig;
use crate::types::{AssetRef, Bundle, GemsmithError, InventoryItem, ListingOutcome, PriceQuote};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://steamcommunity.com";

/// Steam's own app, which owns trading cards and booster packs.
const COMMUNITY_APP_ID: u32 = 753;
const COMMUNITY_CONTEXT_ID: &str = "6";

const BOOSTER_INIT_MARKER: &str = "CBoosterCreatorPage.Init(";
const GEM_BALANCE_MARKER: &str = "class=\"goovalue\"";
const ORDER_SPREAD_MARKER: &str = "Market_LoadOrderSpread(";

/// Only tradable boosters are worth crafting for the market.
const TRADABILITY_PREFERENCE: u8 = 2;

/// How long one booster creator download answers both the catalog and the
/// balance lookup.
const BOOSTER_PAGE_REUSE: Duration = Duration::from_secs(30);

/// Pause before the single retry of a request that never reached Steam.
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(6);

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
];

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Browser session taken from a raw `Cookie` header value.
struct Session {
    cookies: SecretString,
    /// CSRF token echoed in every POST.
    session_id: String,
    steam_id: String,
}

impl Session {
    fn parse(raw: SecretString) -> Result<Self> {
        let pairs = parse_cookies(raw.expose_secret());
        let session_id = pairs
            .get("sessionid")
            .cloned()
            .ok_or_else(|| GemsmithError::Config("cookie string has no sessionid".into()))?;
        let login = pairs.get("steamLoginSecure").ok_or_else(|| {
            GemsmithError::Config("cookie string has no steamLoginSecure".into())
        })?;
        let steam_id = steam_id_from_login(login)
            .ok_or_else(|| GemsmithError::Config("steamLoginSecure carries no Steam id".into()))?;

        Ok(Self {
            cookies: raw,
            session_id,
            steam_id,
        })
    }
}

/// `name=value; name2=value2` into a map. Malformed pairs are dropped.
fn parse_cookies(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// The 64-bit Steam id prefixing the `steamLoginSecure` token.
fn steam_id_from_login(login: &str) -> Option<String> {
    let id = login
        .split("%7C%7C")
        .next()
        .and_then(|s| s.split("||").next())?
        .trim();
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_digit())).then(|| id.to_string())
}

// ---------------------------------------------------------------------------
// API response types (Steam JSON → Rust)
// ---------------------------------------------------------------------------

/// One entry of the booster creator catalog.
#[derive(Debug, Deserialize)]
struct RawBooster {
    appid: u32,
    name: String,
    #[serde(default)]
    series: Option<u32>,
    /// Gem cost; sent as a string.
    #[serde(deserialize_with = "loose_u32")]
    price: u32,
    /// Present and true while on cooldown.
    #[serde(default)]
    unavailable: bool,
}

impl From<RawBooster> for Bundle {
    fn from(raw: RawBooster) -> Self {
        Bundle {
            name: raw.name,
            app_id: raw.appid,
            cost: raw.price,
            craftable: !raw.unavailable,
            series: raw.series,
        }
    }
}

/// `/market/itemordershistogram`. Prices are strings or null.
#[derive(Debug, Deserialize)]
struct OrderHistogram {
    #[serde(default, deserialize_with = "loose_price")]
    lowest_sell_order: Option<i64>,
    #[serde(default, deserialize_with = "loose_price")]
    highest_buy_order: Option<i64>,
}

impl From<OrderHistogram> for PriceQuote {
    fn from(h: OrderHistogram) -> Self {
        PriceQuote::new(h.lowest_sell_order, h.highest_buy_order)
    }
}

/// `/market/search/render/?norender=1`
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    hash_name: String,
}

/// `/inventory/{steamid}/753/6`
#[derive(Debug, Deserialize)]
struct InventoryResponse {
    #[serde(default)]
    assets: Vec<RawAsset>,
    #[serde(default)]
    descriptions: Vec<RawDescription>,
}

#[derive(Debug, Deserialize)]
struct RawAsset {
    #[serde(deserialize_with = "loose_u32")]
    appid: u32,
    contextid: String,
    assetid: String,
    classid: String,
    instanceid: String,
}

#[derive(Debug, Deserialize)]
struct RawDescription {
    classid: String,
    instanceid: String,
    name: String,
    #[serde(rename = "type", default)]
    item_type: String,
    #[serde(default, deserialize_with = "truthy")]
    marketable: bool,
}

#[derive(Debug, Deserialize)]
struct CraftResponse {
    #[serde(default)]
    purchase_result: Option<PurchaseResult>,
}

#[derive(Debug, Deserialize)]
struct PurchaseResult {
    #[serde(default)]
    success: i64,
}

fn loose_u32<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    let v = Value::deserialize(d)?;
    let parsed = match &v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| serde::de::Error::custom(format!("expected an unsigned integer, got {v}")))
}

fn loose_price<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|p| *p > 0))
}

fn truthy<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Page parsing
// ---------------------------------------------------------------------------

/// Gem balance shown on the booster creator page.
fn parse_gem_balance(html: &str) -> Result<i64> {
    let start = html
        .find(GEM_BALANCE_MARKER)
        .ok_or(GemsmithError::SessionExpired)?;
    let rest = &html[start + GEM_BALANCE_MARKER.len()..];
    let open = rest.find('>').context("Unterminated gem balance element")?;
    let rest = &rest[open + 1..];
    let close = rest.find('<').context("Unterminated gem balance element")?;
    let digits: String = rest[..close].chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse()
        .with_context(|| format!("Unreadable gem balance: {:?}", &rest[..close]))
}

/// Catalog passed to `CBoosterCreatorPage.Init(` as its first argument.
fn parse_booster_catalog(html: &str) -> Result<Vec<Bundle>> {
    let start = html
        .find(BOOSTER_INIT_MARKER)
        .ok_or(GemsmithError::SessionExpired)?;
    let rest = &html[start + BOOSTER_INIT_MARKER.len()..];
    let raw = serde_json::Deserializer::from_str(rest)
        .into_iter::<Vec<RawBooster>>()
        .next()
        .context("Booster creator script has no catalog")?
        .context("Failed to parse booster creator catalog")?;
    Ok(raw.into_iter().map(Bundle::from).collect())
}

/// `item_nameid` from a market listing page.
fn parse_item_nameid(html: &str) -> Option<u64> {
    let start = html.find(ORDER_SPREAD_MARKER)?;
    let rest = &html[start + ORDER_SPREAD_MARKER.len()..];
    let end = rest.find(')')?;
    rest[..end].trim().parse().ok()
}

/// Search hit for `name`'s booster pack, if any.
fn pick_booster_listing<'a>(results: &'a [SearchResult], name: &str) -> Option<&'a str> {
    let suffix = format!("-{name} Booster Pack");
    results
        .iter()
        .map(|r| r.hash_name.as_str())
        .find(|h| h.ends_with(&suffix))
}

/// Marketable booster packs, one entry per asset.
fn booster_packs(inv: InventoryResponse) -> Vec<InventoryItem> {
    let names: HashMap<(&str, &str), &RawDescription> = inv
        .descriptions
        .iter()
        .filter(|d| d.item_type == "Booster Pack" && d.marketable)
        .map(|d| ((d.classid.as_str(), d.instanceid.as_str()), d))
        .collect();

    inv.assets
        .iter()
        .filter_map(|a| {
            let desc = names.get(&(a.classid.as_str(), a.instanceid.as_str()))?;
            Some(InventoryItem {
                name: desc.name.clone(),
                asset: AssetRef {
                    app_id: a.appid,
                    context_id: a.contextid.clone(),
                    asset_id: a.assetid.clone(),
                },
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Last booster creator page, reused for a short window so a refresh
/// downloads it once. Any craft drops it.
#[derive(Default)]
struct PageCache {
    page: Option<(Instant, String)>,
}

impl PageCache {
    fn get(&self, now: Instant) -> Option<&str> {
        match &self.page {
            Some((fetched, page)) if now.duration_since(*fetched) < BOOSTER_PAGE_REUSE => {
                Some(page.as_str())
            }
            _ => None,
        }
    }

    fn put(&mut self, now: Instant, page: String) {
        self.page = Some((now, page));
    }

    fn invalidate(&mut self) {
        self.page = None;
    }
}

/// Steam Community client bound to one browser session.
pub struct SteamClient {
    http: Client,
    session: Session,
    cfg: SteamConfig,
    /// Bundle name → market `item_nameid`. Never changes for a listing.
    name_ids: Mutex<HashMap<String, u64>>,
    page_cache: Mutex<PageCache>,
}

impl SteamClient {
    pub fn new(cfg: &SteamConfig, cookies: SecretString) -> Result<Self> {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client for Steam")?;
        let session = Session::parse(cookies)?;

        info!(steam_id = %session.steam_id, "Steam session loaded");
        Ok(Self {
            http,
            session,
            cfg: cfg.clone(),
            name_ids: Mutex::new(HashMap::new()),
            page_cache: Mutex::new(PageCache::default()),
        })
    }

    // -- Internal helpers ------------------------------------------------

    async fn pause(&self) {
        let ms = rand::thread_rng().gen_range(self.cfg.min_delay_ms..=self.cfg.max_delay_ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Send after the jitter delay, retrying once if the request never got
    /// a response.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.pause().await;
        let retry = request.try_clone();
        let request = request.header(COOKIE, self.session.cookies.expose_secret().as_str());
        match request.send().await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let Some(retry) = retry else {
                    return Err(e).context("Steam request failed");
                };
                warn!(error = %e, "Steam request failed, retrying once");
                tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
                retry
                    .header(COOKIE, self.session.cookies.expose_secret().as_str())
                    .send()
                    .await
                    .context("Steam request failed after retry")
            }
        }
    }

    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        debug!(url, "GET");
        let resp = self.send(self.http.get(url).query(query)).await?;
        let status = resp.status();
        let body = resp.text().await.context("Failed to read Steam response")?;
        if !status.is_success() {
            return Err(GemsmithError::Platform {
                operation: format!("GET {url}"),
                message: format!("{status}: {}", truncate(&body)),
            }
            .into());
        }
        Ok(body)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let body = self.get_text(url, query).await?;
        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse Steam response from {url}"))
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
        referer: Option<String>,
    ) -> Result<(StatusCode, String)> {
        debug!(url, "POST");
        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
            .form(form);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }
        let resp = self.send(request).await?;
        let status = resp.status();
        let body = resp.text().await.context("Failed to read Steam response")?;
        Ok((status, body))
    }

    async fn booster_page(&self) -> Result<String> {
        let mut cache = self.page_cache.lock().await;
        if let Some(page) = cache.get(Instant::now()) {
            debug!("Reusing booster creator page");
            return Ok(page.to_string());
        }
        let page = self
            .get_text(&format!("{BASE_URL}/tradingcards/boostercreator/"), &[])
            .await?;
        cache.put(Instant::now(), page.clone());
        Ok(page)
    }

    async fn histogram(&self, item_nameid: u64) -> Result<PriceQuote> {
        let query = [
            ("country", self.cfg.country.clone()),
            ("language", self.cfg.language.clone()),
            ("currency", self.cfg.currency.to_string()),
            ("item_nameid", item_nameid.to_string()),
            ("two_factor", "0".to_string()),
        ];
        let h: OrderHistogram = self
            .get_json(&format!("{BASE_URL}/market/itemordershistogram"), &query)
            .await?;
        Ok(h.into())
    }

    /// Market `item_nameid` of a bundle's booster pack; `None` when the
    /// pack is not on the market.
    async fn item_nameid(&self, name: &str) -> Result<Option<u64>> {
        if let Some(id) = self.name_ids.lock().await.get(name) {
            return Ok(Some(*id));
        }

        let query = [
            ("query", format!("{name} Booster Pack")),
            ("appid", COMMUNITY_APP_ID.to_string()),
            ("norender", "1".to_string()),
            ("count", "10".to_string()),
        ];
        let search: SearchResponse = self
            .get_json(&format!("{BASE_URL}/market/search/render/"), &query)
            .await?;
        let Some(hash_name) = pick_booster_listing(&search.results, name) else {
            debug!(bundle = name, "Booster pack not on the market");
            return Ok(None);
        };

        let url = format!(
            "{BASE_URL}/market/listings/{COMMUNITY_APP_ID}/{}",
            urlencoding::encode(hash_name)
        );
        let page = self.get_text(&url, &[]).await?;
        let id = parse_item_nameid(&page)
            .with_context(|| format!("No order spread on listing page of {hash_name}"))?;

        self.name_ids.lock().await.insert(name.to_string(), id);
        Ok(Some(id))
    }

    fn inventory_referer(&self) -> String {
        format!("{BASE_URL}/profiles/{}/inventory/", self.session.steam_id)
    }
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl PriceOracle for SteamClient {
    async fn quote(&self, bundle_name: &str) -> Result<PriceQuote> {
        match self.item_nameid(bundle_name).await? {
            Some(id) => self.histogram(id).await,
            None => Ok(PriceQuote::default()),
        }
    }

    async fn pouch_price(&self) -> Result<PriceQuote> {
        self.histogram(self.cfg.pouch_item_nameid).await
    }
}

#[async_trait]
impl CatalogSource for SteamClient {
    async fn craftable_bundles(&self) -> Result<Vec<Bundle>> {
        parse_booster_catalog(&self.booster_page().await?)
    }

    async fn account_balance(&self) -> Result<i64> {
        parse_gem_balance(&self.booster_page().await?)
    }

    async fn inventory(&self) -> Result<Vec<InventoryItem>> {
        let url = format!(
            "{BASE_URL}/inventory/{}/{COMMUNITY_APP_ID}/{COMMUNITY_CONTEXT_ID}",
            self.session.steam_id
        );
        let inv: InventoryResponse = self.get_json(&url, &[("count", "2000".to_string())]).await?;
        let packs = booster_packs(inv);
        debug!(count = packs.len(), "Booster packs in inventory");
        Ok(packs)
    }
}

#[async_trait]
impl MarketActions for SteamClient {
    async fn craft(&self, bundle: &Bundle) -> Result<bool> {
        let form = [
            ("sessionid", self.session.session_id.clone()),
            ("appid", bundle.app_id.to_string()),
            ("series", bundle.series.unwrap_or(1).to_string()),
            ("tradability_preference", TRADABILITY_PREFERENCE.to_string()),
        ];
        self.page_cache.lock().await.invalidate();
        let (status, body) = self
            .post_form(&format!("{BASE_URL}/tradingcards/ajaxcreatebooster"), &form, None)
            .await?;
        if status != StatusCode::OK {
            warn!(bundle = %bundle.name, %status, body = %truncate(&body), "Craft refused");
            return Ok(false);
        }
        let resp: CraftResponse = serde_json::from_str(&body)
            .with_context(|| format!("Unexpected craft response: {}", truncate(&body)))?;
        Ok(resp.purchase_result.is_some_and(|r| r.success == 1))
    }

    async fn list(&self, asset: &AssetRef, price: i64) -> Result<ListingOutcome> {
        let form = [
            ("sessionid", self.session.session_id.clone()),
            ("appid", asset.app_id.to_string()),
            ("contextid", asset.context_id.clone()),
            ("assetid", asset.asset_id.clone()),
            ("amount", "1".to_string()),
            ("price", price.to_string()),
        ];
        let (status, body) = self
            .post_form(
                &format!("{BASE_URL}/market/sellitem/"),
                &form,
                Some(self.inventory_referer()),
            )
            .await?;
        let success = status.is_success()
            && serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("success").and_then(Value::as_bool))
                .unwrap_or(false);
        Ok(ListingOutcome {
            success,
            detail: format!("{status}: {body}"),
        })
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(300) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
