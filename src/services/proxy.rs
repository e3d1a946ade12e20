//! HLS playlist proxy.
//!
//! Targets travel base64url-encoded in the `p` query parameter. Playlists are
//! rewritten line by line so every media reference loops back through the
//! proxy with the same server hint.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use axum::body::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::Client;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use crate::clients::hianime::StreamingProvider;
use crate::constants::PROXY_EXTENSIONS;
use crate::error::{CoreError, CoreResult};

const SERVICE: &str = "proxy";

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

pub const PLAYLIST_CACHE_CONTROL: &str = "public, max-age=60";
pub const SEGMENT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[must_use]
pub fn encode_target(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url)
}

/// Decodes a `p` parameter. Padded and standard alphabets are accepted too.
pub fn decode_target(encoded: &str) -> CoreResult<Url> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .or_else(|_| URL_SAFE.decode(encoded))
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|e| CoreError::invalid("p", format!("not base64url: {e}")))?;
    let raw = String::from_utf8(bytes).map_err(|_| CoreError::invalid("p", "not UTF-8"))?;
    let url = Url::parse(&raw).map_err(|e| CoreError::invalid("p", format!("bad URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CoreError::invalid("p", format!("unsupported scheme {other}"))),
    }
}

/// Path of the proxy endpoint serving `target`.
#[must_use]
pub fn proxied_url(target: &str, server: &str) -> String {
    format!(
        "/proxy?p={}&s={}",
        encode_target(target),
        urlencoding::encode(server)
    )
}

/// Lowercased extension of the URL's path, dot included.
#[must_use]
pub fn extension(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or_default();
    name.rfind('.')
        .map(|i| name[i..].to_ascii_lowercase())
        .unwrap_or_default()
}

#[must_use]
pub fn is_playlist(ext: &str) -> bool {
    matches!(ext, ".m3u8" | ".vtt")
}

#[must_use]
pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        ".m3u8" => "application/vnd.apple.mpegurl",
        ".ts" => "video/MP2T",
        ".vtt" => "text/vtt",
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".webp" => "image/webp",
        ".ico" => "image/x-icon",
        ".html" => "text/html",
        ".js" => "application/javascript",
        ".css" => "text/css",
        ".txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Rewrites one playlist line. Tags, comments, blank lines and references
/// with an extension outside the allow list pass through untouched.
#[must_use]
pub fn rewrite_line(line: &str, base: &Url, server: &str) -> String {
    if line.is_empty() || line.starts_with('#') {
        return line.to_string();
    }

    // Thumbnail tracks carry a media fragment after the sprite URL.
    let (reference, fragment) = match line.split_once('#') {
        Some((reference, fragment)) => (reference, Some(fragment)),
        None => (line, None),
    };

    if !PROXY_EXTENSIONS.contains(&extension(reference).as_str()) {
        return line.to_string();
    }

    let Ok(absolute) = base.join(reference.trim()) else {
        return line.to_string();
    };
    let rewritten = proxied_url(absolute.as_str(), server);
    match fragment {
        Some(fragment) => format!("{rewritten}#{fragment}"),
        None => rewritten,
    }
}

#[derive(Clone)]
pub struct PlaylistProxy {
    client: Client,
}

impl PlaylistProxy {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build proxy HTTP client: {e}"))?;
        Ok(Self { client })
    }

    /// Requests `target` with the headers the provider's CDN expects. Any
    /// upstream status is returned as is.
    pub async fn fetch(&self, target: &Url, server: &str) -> CoreResult<reqwest::Response> {
        let provider = StreamingProvider::from_server_name(server);
        let origin = provider.cdn_origin();

        let mut request = self
            .client
            .get(target.clone())
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::REFERER, format!("{origin}/"))
            .header(reqwest::header::ORIGIN, origin);
        if provider == StreamingProvider::Megaplay {
            request = request.header(reqwest::header::USER_AGENT, DESKTOP_USER_AGENT);
        }

        debug!(%target, server, "Proxying upstream request");
        request
            .send()
            .await
            .map_err(|e| CoreError::from_reqwest(SERVICE, &e))
    }
}

/// Streams `body` as rewritten playlist lines, one chunk per line.
pub fn rewrite_playlist<S>(
    body: S,
    base: Url,
    server: String,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + Unpin + 'static,
{
    let reader = StreamReader::new(body.map_err(std::io::Error::other));
    let lines = reader.lines();

    futures::stream::try_unfold(
        (lines, base, server),
        |(mut lines, base, server)| async move {
            match lines.next_line().await? {
                Some(line) => {
                    let mut out = rewrite_line(&line, &base, &server);
                    out.push('\n');
                    Ok(Some((Bytes::from(out), (lines, base, server))))
                }
                None => Ok(None),
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://host.example/path/master.m3u8").unwrap()
    }

    fn decoded(line: &str) -> String {
        let p = line
            .strip_prefix("/proxy?p=")
            .and_then(|rest| rest.split('&').next())
            .unwrap();
        decode_target(p).unwrap().to_string()
    }

    #[test]
    fn relative_lines_resolve_against_target() {
        let out = rewrite_line("720/index.m3u8", &base(), "hd1");
        assert!(out.ends_with("&s=hd1"));
        assert_eq!(decoded(&out), "https://host.example/path/720/index.m3u8");
    }

    #[test]
    fn absolute_lines_keep_their_host() {
        let out = rewrite_line("https://cdn.example/seg-1.ts", &base(), "megaplay");
        assert_eq!(decoded(&out), "https://cdn.example/seg-1.ts");
    }

    #[test]
    fn tags_and_unknown_extensions_pass_through() {
        for line in ["#EXTM3U", "#EXT-X-STREAM-INF:BANDWIDTH=1", "", "chunk.bin", "data.mp4"] {
            assert_eq!(rewrite_line(line, &base(), "hd1"), line);
        }
    }

    #[test]
    fn thumbnail_fragments_survive() {
        let out = rewrite_line("sprite.jpg#xywh=0,0,160,90", &base(), "hd1");
        assert!(out.ends_with("#xywh=0,0,160,90"));
        assert!(out.starts_with("/proxy?p="));
    }

    #[test]
    fn server_hint_is_url_encoded() {
        let out = rewrite_line("a.ts", &base(), "hd 1&x");
        assert!(out.ends_with("&s=hd%201%26x"));
    }

    #[test]
    fn decode_accepts_padded_and_rejects_other_schemes() {
        let padded = URL_SAFE.encode("https://a.example/x.m3u8?t=1");
        assert_eq!(
            decode_target(&padded).unwrap().as_str(),
            "https://a.example/x.m3u8?t=1"
        );
        let ftp = encode_target("ftp://a.example/x");
        assert!(matches!(
            decode_target(&ftp),
            Err(CoreError::InvalidInput { field: "p", .. })
        ));
        assert!(decode_target("%%%").is_err());
    }

    #[test]
    fn extension_ignores_query() {
        assert_eq!(extension("https://a/b/Index.M3U8?token=1"), ".m3u8");
        assert_eq!(extension("https://a/b/noext"), "");
        assert_eq!(content_type_for(".ts"), "video/MP2T");
        assert!(is_playlist(".vtt"));
    }

    #[tokio::test]
    async fn playlist_stream_rewrites_each_line() {
        let body = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\n720/index.m3u8\n";
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from(&body[..10])),
            Ok(Bytes::from(&body[10..])),
        ];
        let out: Vec<Bytes> = rewrite_playlist(futures::stream::iter(chunks), base(), "hd1".to_string())
            .try_collect()
            .await
            .unwrap();

        let text: String = out
            .iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-STREAM-INF:BANDWIDTH=1");
        assert_eq!(
            lines[2],
            proxied_url("https://host.example/path/720/index.m3u8", "hd1")
        );
        assert!(text.ends_with('\n'));
    }
}
