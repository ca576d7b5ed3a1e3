//! GIF and sticker search through the Tenor v2 API.

use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::error::{ClientError, Result};
use crate::models::MessageKind;

const TENOR_BASE: &str = "https://tenor.googleapis.com/v2";
const PAGE_SIZE: &str = "24";
pub const NO_RESULTS: &str = "No results.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GifKind {
    #[default]
    Gifs,
    Stickers,
}

impl GifKind {
    pub fn message_kind(self) -> MessageKind {
        match self {
            GifKind::Gifs => MessageKind::Gif,
            GifKind::Stickers => MessageKind::Sticker,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GifKind::Gifs => "GIFs",
            GifKind::Stickers => "Stickers",
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct MediaFormat {
    url: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct MediaFormats {
    nanogif: Option<MediaFormat>,
    tinygif: Option<MediaFormat>,
    gif: Option<MediaFormat>,
    mediumgif: Option<MediaFormat>,
}

#[derive(Deserialize, Debug)]
struct TenorResult {
    #[serde(default)]
    media_formats: MediaFormats,
}

#[derive(Deserialize, Debug)]
struct TenorResponse {
    #[serde(default)]
    results: Vec<TenorResult>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TenorPage {
    pub urls: Vec<String>,
    pub next: Option<String>,
}

fn pick_url(formats: &MediaFormats) -> Option<String> {
    [&formats.nanogif, &formats.tinygif, &formats.gif, &formats.mediumgif]
        .into_iter()
        .flatten()
        .find_map(|f| f.url.clone().filter(|u| !u.is_empty()))
}

pub fn parse_page(body: &str) -> Result<TenorPage> {
    let response: TenorResponse = serde_json::from_str(body)?;
    Ok(TenorPage {
        urls: response
            .results
            .iter()
            .filter_map(|r| pick_url(&r.media_formats))
            .collect(),
        // Tenor sends "" on the last page.
        next: response.next.filter(|n| !n.is_empty()),
    })
}

/// Endpoint and query pairs; an empty query means the featured feed.
pub fn request_params(key: &str, kind: GifKind, query: &str, pos: Option<&str>) -> (String, Vec<(&'static str, String)>) {
    let query = query.trim();
    let endpoint = if query.is_empty() { "featured" } else { "search" };
    let mut params = vec![
        ("key", key.to_string()),
        ("limit", PAGE_SIZE.to_string()),
        ("media_filter", "gif".to_string()),
        ("contentfilter", "high".to_string()),
    ];
    if kind == GifKind::Stickers {
        params.push(("searchfilter", "sticker".to_string()));
    }
    if !query.is_empty() {
        params.push(("q", query.to_string()));
    }
    if let Some(pos) = pos {
        params.push(("pos", pos.to_string()));
    }
    (format!("{}/{}", TENOR_BASE, endpoint), params)
}

#[derive(Clone)]
pub struct TenorClient {
    http: reqwest::Client,
    key: String,
}

impl TenorClient {
    pub fn new(key: Option<String>, timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(TenorClient {
            http,
            key: key.unwrap_or_default(),
        })
    }

    /// Without an API key the picker stays closed.
    pub fn is_configured(&self) -> bool {
        !self.key.trim().is_empty()
    }

    pub async fn fetch(&self, kind: GifKind, query: &str, pos: Option<&str>) -> Result<TenorPage> {
        let (url, params) = request_params(&self.key, kind, query, pos);
        debug!("GET {} q={:?} pos={:?}", url, query, pos);
        let resp = self.http.get(&url).query(&params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Backend {
                status: status.as_u16(),
                code: None,
                message: "Tenor request failed".to_string(),
            });
        }
        parse_page(&resp.text().await?)
    }
}

/// A page request issued by the picker; `generation` drops stale replies.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub kind: GifKind,
    pub query: String,
    pub pos: Option<String>,
    pub first: bool,
    pub generation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GifPicker {
    pub kind: GifKind,
    pub query: String,
    tiles: Vec<String>,
    next: Option<String>,
    loading: bool,
    empty: bool,
    generation: u64,
}

impl GifPicker {
    pub fn open(kind: GifKind) -> (Self, PageRequest) {
        let mut picker = GifPicker {
            kind,
            ..GifPicker::default()
        };
        let request = picker.reload();
        (picker, request)
    }

    pub fn tiles(&self) -> &[String] {
        &self.tiles
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// `Some("No results.")` after an empty first page.
    pub fn notice(&self) -> Option<&'static str> {
        self.empty.then_some(NO_RESULTS)
    }

    /// Switching tabs starts over from the featured feed.
    pub fn set_kind(&mut self, kind: GifKind) -> PageRequest {
        self.kind = kind;
        self.query.clear();
        self.reload()
    }

    pub fn set_query(&mut self, query: String) {
        self.query = query;
    }

    /// Clears tiles and cursor and asks for the first page again.
    pub fn reload(&mut self) -> PageRequest {
        self.generation += 1;
        self.tiles.clear();
        self.next = None;
        self.empty = false;
        self.loading = true;
        PageRequest {
            kind: self.kind,
            query: self.query.trim().to_string(),
            pos: None,
            first: true,
            generation: self.generation,
        }
    }

    /// Next page, unless one is in flight or the feed is exhausted.
    pub fn load_more(&mut self) -> Option<PageRequest> {
        if self.loading {
            return None;
        }
        let pos = self.next.clone()?;
        self.loading = true;
        Some(PageRequest {
            kind: self.kind,
            query: self.query.trim().to_string(),
            pos: Some(pos),
            first: false,
            generation: self.generation,
        })
    }

    pub fn on_page<E>(
        &mut self,
        request: &PageRequest,
        page: std::result::Result<TenorPage, E>,
    ) -> std::result::Result<(), E> {
        if request.generation != self.generation {
            return Ok(());
        }
        self.loading = false;
        let page = page?;
        self.next = page.next;
        if page.urls.is_empty() {
            self.empty = request.first;
        } else {
            self.tiles.extend(page.urls);
        }
        Ok(())
    }
}
