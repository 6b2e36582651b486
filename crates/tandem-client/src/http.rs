//! Key directory over a PostgREST-style HTTP API.
//!
//! - `GET   {base}/rest/v1/{table}?select=id,public_key&id=in.(…)`
//! - `PATCH {base}/rest/v1/{table}?id=eq.{id}` with `{"public_key": "…"}`
//!
//! The PATCH asks for the updated rows back. PostgREST answers a filter that
//! matches nothing with success and an empty array, which is reported as
//! [`BackendError::Unavailable`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;
use tandem_shared::UserId;
use tracing::debug;

use crate::backend::{KeyDirectoryBackend, PublicKeyRow};
use crate::config::MessagingConfig;
use crate::error::BackendError;

pub struct HttpKeyDirectory {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    table: String,
}

impl HttpKeyDirectory {
    pub fn from_config(config: &MessagingConfig) -> Result<Self, BackendError> {
        let base_url = config
            .directory_url
            .clone()
            .ok_or_else(|| BackendError::Unavailable("TANDEM_DIRECTORY_URL is not set".into()))?;

        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            base_url,
            api_key: config.directory_api_key.clone(),
            table: config.directory_table.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }
}

/// `in.(a,b,…)` filter value for a batch lookup.
fn in_filter(ids: &[UserId]) -> String {
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}

async fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl KeyDirectoryBackend for HttpKeyDirectory {
    async fn get_public_keys(&self, ids: &[UserId]) -> Result<Vec<PublicKeyRow>, BackendError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let request = self
            .client
            .get(self.endpoint())
            .query(&[("select", "id,public_key".to_string()), ("id", in_filter(ids))]);

        let response = check(self.authorize(request).send().await?).await?;
        let rows: Vec<PublicKeyRow> = response.json().await?;
        debug!(requested = ids.len(), returned = rows.len(), "Directory lookup");
        Ok(rows)
    }

    async fn put_public_key(&self, id: &UserId, public_key: &str) -> Result<(), BackendError> {
        let request = self
            .client
            .patch(self.endpoint())
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&json!({ "public_key": public_key }));

        let response = check(self.authorize(request).send().await?).await?;
        let updated: Vec<PublicKeyRow> = response.json().await?;
        if updated.is_empty() {
            return Err(BackendError::Unavailable(format!(
                "no directory row for user {id}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    const ALICE: &str = "00000000-0000-0000-0000-00000000000a";
    const BOB: &str = "00000000-0000-0000-0000-00000000000b";

    /// Answer one request with a canned response; the handle yields the raw
    /// request text.
    async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            while !request_complete(&request) {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8(request).unwrap()
        });

        (base, handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..head_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        raw.len() >= head_end + 4 + length
    }

    fn percent_decode(s: &str) -> String {
        let bytes = s.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' && i + 2 < bytes.len() {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
            out.push(bytes[i]);
            i += 1;
        }
        String::from_utf8(out).unwrap()
    }

    fn directory(base: String) -> HttpKeyDirectory {
        HttpKeyDirectory::from_config(&MessagingConfig {
            directory_url: Some(base),
            directory_api_key: Some("anon-key".into()),
            ..MessagingConfig::default()
        })
        .unwrap()
    }

    fn user(id: &str) -> UserId {
        UserId::parse_str(id).unwrap()
    }

    #[tokio::test]
    async fn lookup_sends_filter_and_credentials() {
        let body = format!(
            r#"[{{"id":"{ALICE}","public_key":"a2V5"}},{{"id":"{BOB}","public_key":null}}]"#
        );
        let (base, server) = serve_once("200 OK", body).await;

        let rows = directory(base)
            .get_public_keys(&[user(ALICE), user(BOB)])
            .await
            .unwrap();
        let request = server.await.unwrap();

        let request_line = percent_decode(request.lines().next().unwrap());
        assert!(request_line.starts_with("GET /rest/v1/profiles?"), "{request_line}");
        assert!(request_line.contains("select=id,public_key"), "{request_line}");
        assert!(request_line.contains(&format!("id=in.({ALICE},{BOB})")), "{request_line}");

        let headers = request.to_ascii_lowercase();
        assert!(headers.contains("\r\napikey: anon-key\r\n"));
        assert!(headers.contains("\r\nauthorization: bearer anon-key\r\n"));

        assert_eq!(
            rows,
            vec![
                PublicKeyRow {
                    id: user(ALICE),
                    public_key: Some("a2V5".into()),
                },
                PublicKeyRow {
                    id: user(BOB),
                    public_key: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn rejected_request_maps_to_status() {
        let (base, server) =
            serve_once("401 Unauthorized", r#"{"message":"JWT expired"}"#.to_string()).await;

        let result = directory(base).get_public_keys(&[user(ALICE)]).await;
        server.await.unwrap();

        match result {
            Err(BackendError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("JWT expired"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_patches_matching_row() {
        let body = format!(r#"[{{"id":"{ALICE}","public_key":"a2V5"}}]"#);
        let (base, server) = serve_once("200 OK", body).await;

        directory(base)
            .put_public_key(&user(ALICE), "a2V5")
            .await
            .unwrap();
        let request = server.await.unwrap();

        let request_line = percent_decode(request.lines().next().unwrap());
        assert!(
            request_line.starts_with(&format!("PATCH /rest/v1/profiles?id=eq.{ALICE} ")),
            "{request_line}"
        );
        let lowered = request.to_ascii_lowercase();
        assert!(lowered.contains("\r\nprefer: return=representation\r\n"));
        assert!(lowered.contains("\r\napikey: anon-key\r\n"));
        assert!(request.ends_with(r#"{"public_key":"a2V5"}"#));
    }

    #[tokio::test]
    async fn publish_without_profile_row_fails() {
        let (base, server) = serve_once("200 OK", "[]".to_string()).await;

        let result = directory(base).put_public_key(&user(BOB), "a2V5").await;
        server.await.unwrap();

        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }

    #[test]
    fn in_filter_lists_ids() {
        let a = UserId::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = UserId::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        assert_eq!(
            in_filter(&[a, b]),
            "in.(00000000-0000-0000-0000-000000000001,00000000-0000-0000-0000-000000000002)"
        );
    }

    #[test]
    fn requires_directory_url() {
        assert!(matches!(
            HttpKeyDirectory::from_config(&MessagingConfig::default()),
            Err(BackendError::Unavailable(_))
        ));
    }

    #[test]
    fn endpoint_joins_base_and_table() {
        let config = MessagingConfig {
            directory_url: Some("https://db.example.org".into()),
            directory_table: "messaging_keys".into(),
            ..MessagingConfig::default()
        };
        let directory = HttpKeyDirectory::from_config(&config).unwrap();
        assert_eq!(
            directory.endpoint(),
            "https://db.example.org/rest/v1/messaging_keys"
        );
    }
}
