//! External catalog client: trait boundary, typed errors, retry policy, and
//! the Tidal OpenAPI v2 implementation.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

const AUTH_URL: &str = "https://auth.tidal.com/v1/oauth2/token";
const API_BASE: &str = "https://openapi.tidal.com/v2";
const COVER_BASE: &str = "https://resources.tidal.com/images";

/// Refresh the token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("rate limited by catalog API")]
    RateLimited,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// One page of a cursor-paginated listing. `next_cursor` is opaque; feed it
/// back unchanged to get the following page.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RemoteArtist {
    pub catalog_id: String,
    pub name: String,
    pub popularity: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct RemoteAlbum {
    pub catalog_id: String,
    pub title: String,
    pub release_date: Option<String>,
    pub cover_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RemoteTrack {
    pub catalog_id: String,
    pub title: String,
    pub isrc: Option<String>,
    pub duration_seconds: Option<i64>,
    pub track_number: Option<i64>,
    pub volume_number: Option<i64>,
    pub album_catalog_id: Option<String>,
    pub artist_name: Option<String>,
}

/// The slice of the catalog API the reconciliation passes consume. Kept as a
/// trait so the harvest driver can run against an in-memory fake in tests.
pub trait CatalogClient {
    fn search_artists(&mut self, query: &str, limit: usize) -> Result<Vec<RemoteArtist>, ClientError>;
    fn search_tracks(&mut self, query: &str, limit: usize) -> Result<Vec<RemoteTrack>, ClientError>;
    fn track_details(&mut self, catalog_id: &str) -> Result<RemoteTrack, ClientError>;
    fn artist_albums(&mut self, artist_catalog_id: &str, cursor: Option<&str>)
        -> Result<Page<RemoteAlbum>, ClientError>;
    fn album_tracks(&mut self, album_catalog_id: &str, cursor: Option<&str>)
        -> Result<Page<RemoteTrack>, ClientError>;
}

/// Fixed-backoff retry that only retries rate limiting. Every other error is
/// surfaced to the caller on the first attempt.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(45),
        }
    }
}

impl RetryPolicy {
    pub fn run<T>(
        &self,
        mut op: impl FnMut() -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Err(ClientError::RateLimited) if attempt < self.max_attempts => {
                    std::thread::sleep(self.backoff);
                }
                other => return other,
            }
        }
    }
}

// ============================================================================
// Tidal OpenAPI v2
// ============================================================================

#[derive(Clone, Debug)]
pub struct TidalCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub country_code: String,
}

impl TidalCredentials {
    /// Read credentials from `TIDAL_CLIENT_ID` / `TIDAL_CLIENT_SECRET`,
    /// with `TIDAL_COUNTRY_CODE` defaulting to US.
    pub fn from_env() -> Result<Self, ClientError> {
        let client_id = std::env::var("TIDAL_CLIENT_ID")
            .map_err(|_| ClientError::Auth("TIDAL_CLIENT_ID not set".into()))?;
        let client_secret = std::env::var("TIDAL_CLIENT_SECRET")
            .map_err(|_| ClientError::Auth("TIDAL_CLIENT_SECRET not set".into()))?;
        let country_code = std::env::var("TIDAL_COUNTRY_CODE").unwrap_or_else(|_| "US".into());
        Ok(Self {
            client_id,
            client_secret,
            country_code,
        })
    }
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct TidalClient {
    agent: ureq::Agent,
    credentials: TidalCredentials,
    token: Option<CachedToken>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct JsonApiLinks {
    next: Option<String>,
}

#[derive(Deserialize)]
struct JsonApiDocument<A> {
    #[serde(default = "Vec::new")]
    data: Vec<JsonApiResource<A>>,
    links: Option<JsonApiLinks>,
}

#[derive(Deserialize)]
struct JsonApiSingle<A> {
    data: JsonApiResource<A>,
    #[serde(default)]
    included: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct JsonApiResource<A> {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    attributes: Option<A>,
    relationships: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtistAttributes {
    name: String,
    popularity: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumAttributes {
    title: String,
    release_date: Option<String>,
    image_cover_uuid: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackAttributes {
    title: String,
    isrc: Option<String>,
    duration: Option<String>,
    track_number: Option<i64>,
    volume_number: Option<i64>,
}

static ISO_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").unwrap());

/// Parse an ISO-8601 duration like `PT3M48S` into seconds.
pub fn parse_iso_duration(raw: &str) -> Option<i64> {
    let caps = ISO_DURATION.captures(raw)?;
    let part = |i: usize| {
        caps.get(i)
            .map(|m| m.as_str().parse::<i64>().unwrap_or(0))
            .unwrap_or(0)
    };
    if caps.get(1).is_none() && caps.get(2).is_none() && caps.get(3).is_none() {
        return None;
    }
    Some(part(1) * 3600 + part(2) * 60 + part(3))
}

/// Turn a cover UUID into a fetchable image URL. The UUID's dashes become
/// path separators on the image CDN.
pub fn cover_url(uuid: &str) -> String {
    format!("{}/{}/640x640.jpg", COVER_BASE, uuid.replace('-', "/"))
}

impl TidalClient {
    pub fn new(credentials: TidalCredentials) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .build(),
            credentials,
            token: None,
        }
    }

    fn access_token(&mut self) -> Result<String, ClientError> {
        if let Some(cached) = &self.token {
            if cached.expires_at > Instant::now() {
                return Ok(cached.access_token.clone());
            }
        }
        let basic = BASE64.encode(format!(
            "{}:{}",
            self.credentials.client_id, self.credentials.client_secret
        ));
        let response = self
            .agent
            .post(AUTH_URL)
            .set("Authorization", &format!("Basic {}", basic))
            .send_form(&[("grant_type", "client_credentials")])
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => {
                    ClientError::Auth(format!("token endpoint returned {}", status))
                }
                ureq::Error::Transport(t) => ClientError::Transport(t.to_string()),
            })?;
        let token: TokenResponse = response
            .into_json()
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let lifetime = Duration::from_secs(token.expires_in)
            .saturating_sub(TOKEN_EXPIRY_MARGIN);
        let access_token = token.access_token.clone();
        self.token = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + lifetime,
        });
        Ok(access_token)
    }

    /// GET a v2 path (absolute or relative to the API base) as JSON.
    fn get_json<T: serde::de::DeserializeOwned>(&mut self, path: &str) -> Result<T, ClientError> {
        let token = self.access_token()?;
        let url = if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", API_BASE, path)
        };
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", token))
            .set("Accept", "application/vnd.api+json")
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(429, _) => ClientError::RateLimited,
                ureq::Error::Status(404, _) => ClientError::NotFound(url.clone()),
                ureq::Error::Status(401, _) | ureq::Error::Status(403, _) => {
                    ClientError::Auth(format!("{} rejected credentials", url))
                }
                ureq::Error::Status(status, _) => {
                    ClientError::Transport(format!("{} returned {}", url, status))
                }
                ureq::Error::Transport(t) => ClientError::Transport(t.to_string()),
            })?;
        response
            .into_json()
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    fn track_from_resource(resource: &JsonApiResource<TrackAttributes>) -> Option<RemoteTrack> {
        let attrs = resource.attributes.as_ref()?;
        let album_catalog_id = resource
            .relationships
            .as_ref()
            .and_then(|r| r.pointer("/albums/data/0/id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Some(RemoteTrack {
            catalog_id: resource.id.clone(),
            title: attrs.title.clone(),
            isrc: attrs.isrc.clone(),
            duration_seconds: attrs.duration.as_deref().and_then(parse_iso_duration),
            track_number: attrs.track_number,
            volume_number: attrs.volume_number,
            album_catalog_id,
            artist_name: None,
        })
    }

    /// Pull artist names for tracks out of the `included` side-channel.
    fn artist_name_from_included(included: &[serde_json::Value]) -> Option<String> {
        included
            .iter()
            .find(|v| v.get("type").and_then(|t| t.as_str()) == Some("artists"))
            .and_then(|v| v.pointer("/attributes/name"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

impl CatalogClient for TidalClient {
    fn search_artists(&mut self, query: &str, limit: usize) -> Result<Vec<RemoteArtist>, ClientError> {
        let path = format!(
            "/searchresults/{}/relationships/artists?countryCode={}&include=artists&page[size]={}",
            urlencode(query),
            self.credentials.country_code,
            limit
        );
        let doc: JsonApiDocument<ArtistAttributes> = self.get_json(&path)?;
        Ok(doc
            .data
            .iter()
            .filter(|r| r.kind == "artists")
            .filter_map(|r| {
                let attrs = r.attributes.as_ref()?;
                Some(RemoteArtist {
                    catalog_id: r.id.clone(),
                    name: attrs.name.clone(),
                    popularity: attrs.popularity,
                })
            })
            .take(limit)
            .collect())
    }

    fn search_tracks(&mut self, query: &str, limit: usize) -> Result<Vec<RemoteTrack>, ClientError> {
        let path = format!(
            "/searchresults/{}/relationships/tracks?countryCode={}&include=tracks&page[size]={}",
            urlencode(query),
            self.credentials.country_code,
            limit
        );
        let doc: JsonApiDocument<TrackAttributes> = self.get_json(&path)?;
        Ok(doc
            .data
            .iter()
            .filter(|r| r.kind == "tracks")
            .filter_map(Self::track_from_resource)
            .take(limit)
            .collect())
    }

    fn track_details(&mut self, catalog_id: &str) -> Result<RemoteTrack, ClientError> {
        let path = format!(
            "/tracks/{}?countryCode={}&include=artists,albums",
            catalog_id, self.credentials.country_code
        );
        let doc: JsonApiSingle<TrackAttributes> = self.get_json(&path)?;
        let mut track = Self::track_from_resource(&doc.data)
            .ok_or_else(|| ClientError::Decode(format!("track {} has no attributes", catalog_id)))?;
        track.artist_name = Self::artist_name_from_included(&doc.included);
        Ok(track)
    }

    fn artist_albums(
        &mut self,
        artist_catalog_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<RemoteAlbum>, ClientError> {
        let path = match cursor {
            Some(next) => next.to_string(),
            None => format!(
                "/artists/{}/relationships/albums?countryCode={}&include=albums",
                artist_catalog_id, self.credentials.country_code
            ),
        };
        let doc: JsonApiDocument<AlbumAttributes> = self.get_json(&path)?;
        let items = doc
            .data
            .iter()
            .filter(|r| r.kind == "albums")
            .filter_map(|r| {
                let attrs = r.attributes.as_ref()?;
                Some(RemoteAlbum {
                    catalog_id: r.id.clone(),
                    title: attrs.title.clone(),
                    release_date: attrs.release_date.clone(),
                    cover_url: attrs.image_cover_uuid.as_deref().map(cover_url),
                })
            })
            .collect();
        Ok(Page {
            items,
            next_cursor: doc.links.and_then(|l| l.next),
        })
    }

    fn album_tracks(
        &mut self,
        album_catalog_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<RemoteTrack>, ClientError> {
        let path = match cursor {
            Some(next) => next.to_string(),
            None => format!(
                "/albums/{}/relationships/items?countryCode={}&include=items",
                album_catalog_id, self.credentials.country_code
            ),
        };
        let doc: JsonApiDocument<TrackAttributes> = self.get_json(&path)?;
        let items = doc
            .data
            .iter()
            .filter(|r| r.kind == "tracks")
            .filter_map(Self::track_from_resource)
            .collect();
        Ok(Page {
            items,
            next_cursor: doc.links.and_then(|l| l.next),
        })
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn iso_duration_parsing() {
        assert_eq!(parse_iso_duration("PT3M48S"), Some(228));
        assert_eq!(parse_iso_duration("PT1H2M3S"), Some(3723));
        assert_eq!(parse_iso_duration("PT45S"), Some(45));
        assert_eq!(parse_iso_duration("PT4M"), Some(240));
        assert_eq!(parse_iso_duration("PT"), None);
        assert_eq!(parse_iso_duration("3:48"), None);
    }

    #[test]
    fn cover_url_from_uuid() {
        assert_eq!(
            cover_url("1234abcd-5678-90ef-1234-567890abcdef"),
            "https://resources.tidal.com/images/1234abcd/5678/90ef/1234/567890abcdef/640x640.jpg"
        );
    }

    #[test]
    fn urlencode_keeps_unreserved() {
        assert_eq!(urlencode("Die For You"), "Die%20For%20You");
        assert_eq!(urlencode("AT&T"), "AT%26T");
        assert_eq!(urlencode("plain-name_1.0~x"), "plain-name_1.0~x");
    }

    #[test]
    fn retry_policy_retries_only_rate_limits() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(0),
        };

        let attempts = Cell::new(0);
        let result: Result<(), ClientError> = policy.run(|| {
            attempts.set(attempts.get() + 1);
            Err(ClientError::RateLimited)
        });
        assert!(matches!(result, Err(ClientError::RateLimited)));
        assert_eq!(attempts.get(), 3);

        let attempts = Cell::new(0);
        let result: Result<(), ClientError> = policy.run(|| {
            attempts.set(attempts.get() + 1);
            Err(ClientError::NotFound("x".into()))
        });
        assert!(matches!(result, Err(ClientError::NotFound(_))));
        assert_eq!(attempts.get(), 1);

        let attempts = Cell::new(0);
        let result = policy.run(|| {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 2 {
                Err(ClientError::RateLimited)
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn json_api_page_decoding() {
        let raw = r#"{
            "data": [
                {"id": "t1", "type": "tracks",
                 "attributes": {"title": "SongA", "isrc": "US123", "duration": "PT3M48S",
                                "trackNumber": 2, "volumeNumber": 1},
                 "relationships": {"albums": {"data": [{"id": "al9", "type": "albums"}]}}},
                {"id": "x", "type": "videos", "attributes": {"title": "ignored"}}
            ],
            "links": {"next": "/albums/al9/relationships/items?page[cursor]=abc"}
        }"#;
        let doc: JsonApiDocument<TrackAttributes> = serde_json::from_str(raw).unwrap();
        let tracks: Vec<RemoteTrack> = doc
            .data
            .iter()
            .filter(|r| r.kind == "tracks")
            .filter_map(TidalClient::track_from_resource)
            .collect();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "SongA");
        assert_eq!(tracks[0].duration_seconds, Some(228));
        assert_eq!(tracks[0].album_catalog_id.as_deref(), Some("al9"));
        assert_eq!(doc.links.unwrap().next.as_deref(),
            Some("/albums/al9/relationships/items?page[cursor]=abc"));
    }
}
