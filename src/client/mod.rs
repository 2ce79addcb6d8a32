use futures::StreamExt;
use reqwest::{header, Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::Config;
use crate::table::ResultRow;
use crate::workflow::{DataQuery, Indicator, OptionsQuery};

const DEFAULT_CSV_NAME: &str = "data.csv";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },

    #[error("could not decode {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Shapes `/get_indicators` has been seen returning
#[derive(Deserialize)]
#[serde(untagged)]
enum IndicatorList {
    Names(Vec<String>),
    Pairs(Vec<Indicator>),
    Map(BTreeMap<String, String>),
}

impl From<IndicatorList> for Vec<Indicator> {
    fn from(list: IndicatorList) -> Self {
        match list {
            IndicatorList::Names(names) => names.into_iter().map(Indicator::named).collect(),
            IndicatorList::Pairs(pairs) => pairs,
            IndicatorList::Map(map) => map
                .into_iter()
                .map(|(name, code)| Indicator::new(name, code))
                .collect(),
        }
    }
}

/// Async client for the explorer backend endpoints
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base: Url,
}

impl BackendClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let base = config.base_url()?;
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("wb-explorer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, base))
    }

    pub fn with_client(http: Client, base: Url) -> Self {
        Self { http, base }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, name: &str) -> ClientResult<Url> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(name).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", name, e)))
    }

    pub fn indicators_url(&self) -> ClientResult<Url> {
        self.endpoint("get_indicators")
    }

    pub fn options_url(&self, query: &OptionsQuery) -> ClientResult<Url> {
        let mut url = self.endpoint("fetch_options")?;
        url.query_pairs_mut()
            .append_pair("indicator", &query.indicator)
            .append_pair("type", query.group_by.as_param());
        Ok(url)
    }

    pub fn data_url(&self, query: &DataQuery) -> ClientResult<Url> {
        self.triple_url("fetch_data", query)
    }

    pub fn download_url(&self, query: &DataQuery) -> ClientResult<Url> {
        self.triple_url("download_csv", query)
    }

    fn triple_url(&self, name: &str, query: &DataQuery) -> ClientResult<Url> {
        let mut url = self.endpoint(name)?;
        url.query_pairs_mut()
            .append_pair("indicator", &query.indicator)
            .append_pair("type", query.group_by.as_param())
            .append_pair("option", &query.option);
        Ok(url)
    }

    async fn get(&self, endpoint: &'static str, url: Url) -> ClientResult<reqwest::Response> {
        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| ClientError::Http { endpoint, source })?;
        check_status(endpoint, response)
    }

    /// `GET /get_indicators`
    pub async fn indicators(&self) -> ClientResult<Vec<Indicator>> {
        const ENDPOINT: &str = "/get_indicators";
        let response = self.get(ENDPOINT, self.indicators_url()?).await?;
        let list: IndicatorList = response
            .json()
            .await
            .map_err(|source| ClientError::Decode { endpoint: ENDPOINT, source })?;
        let indicators: Vec<Indicator> = list.into();
        debug!("Loaded {} indicators", indicators.len());
        Ok(indicators)
    }

    /// `GET /fetch_options?indicator=&type=`
    pub async fn options(&self, query: &OptionsQuery) -> ClientResult<Vec<String>> {
        const ENDPOINT: &str = "/fetch_options";
        let response = self.get(ENDPOINT, self.options_url(query)?).await?;
        response
            .json()
            .await
            .map_err(|source| ClientError::Decode { endpoint: ENDPOINT, source })
    }

    /// `GET /fetch_data?indicator=&type=&option=`
    pub async fn data(&self, query: &DataQuery) -> ClientResult<Vec<ResultRow>> {
        const ENDPOINT: &str = "/fetch_data";
        let response = self.get(ENDPOINT, self.data_url(query)?).await?;
        let rows: Vec<ResultRow> = response
            .json()
            .await
            .map_err(|source| ClientError::Decode { endpoint: ENDPOINT, source })?;
        debug!("Fetched {} rows for {} / {}", rows.len(), query.indicator, query.option);
        Ok(rows)
    }

    /// `GET /download_csv?...`, streamed into `dest_dir`. `on_chunk` gets the
    /// running byte count after each chunk.
    pub async fn download_csv(
        &self,
        query: &DataQuery,
        dest_dir: &Path,
        mut on_chunk: impl FnMut(u64),
    ) -> ClientResult<PathBuf> {
        const ENDPOINT: &str = "/download_csv";
        let response = self.get(ENDPOINT, self.download_url(query)?).await?;

        let file_name = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_file_name)
            .unwrap_or_else(|| DEFAULT_CSV_NAME.to_string());
        let path = dest_dir.join(file_name);

        let io_err = |source| ClientError::Io { path: path.clone(), source };
        tokio::fs::create_dir_all(dest_dir).await.map_err(io_err)?;

        // Body goes to a sibling temp file first; an earlier download at
        // `path` is only replaced once the whole body has arrived.
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(dest_dir)
            .map_err(io_err)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| ClientError::Http {
                endpoint: ENDPOINT,
                source,
            })?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
            on_chunk(written);
        }
        file.flush().await.map_err(io_err)?;
        drop(file);

        temp_path.persist(&path).map_err(|e| io_err(e.error))?;

        info!("Saved {} bytes to {}", written, path.display());
        Ok(path)
    }

    /// `POST /interactive_graph` with a form-encoded triple
    pub async fn interactive_graph(&self, query: &DataQuery) -> ClientResult<String> {
        const ENDPOINT: &str = "/interactive_graph";
        let url = self.endpoint("interactive_graph")?;
        debug!("POST {}", url);

        let response = self
            .http
            .post(url)
            .form(&[
                ("indicator", query.indicator.as_str()),
                ("type", query.group_by.as_param()),
                ("option", query.option.as_str()),
            ])
            .send()
            .await
            .map_err(|source| ClientError::Http { endpoint: ENDPOINT, source })?;
        let response = check_status(ENDPOINT, response)?;

        response
            .text()
            .await
            .map_err(|source| ClientError::Decode { endpoint: ENDPOINT, source })
    }
}

fn check_status(
    endpoint: &'static str,
    response: reqwest::Response,
) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status { endpoint, status })
    }
}

/// Pull a bare file name out of a `Content-Disposition` header value
fn attachment_file_name(disposition: &str) -> Option<String> {
    let raw = disposition
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))?
        .trim_matches('"');

    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::GroupBy;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn client(base: &str) -> BackendClient {
        BackendClient::with_client(Client::new(), Url::parse(base).unwrap())
    }

    fn query() -> DataQuery {
        DataQuery {
            indicator: "SP.POP.TOTL".into(),
            group_by: GroupBy::Country,
            option: "Côte d'Ivoire".into(),
        }
    }

    /// Accept one connection, answer with a canned response, return the request head
    async fn serve_once(
        status: &'static str,
        headers: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let response = format!(
            "HTTP/1.1 {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            headers,
            body.len(),
            body
        );
        serve_raw(response).await
    }

    async fn serve_raw(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_options_url_carries_both_params() {
        let c = client("http://localhost:5000");
        let url = c
            .options_url(&OptionsQuery {
                indicator: "NY.GDP.MKTP.CD".into(),
                group_by: GroupBy::Year,
            })
            .unwrap();

        assert_eq!(url.path(), "/fetch_options");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("indicator".to_string(), "NY.GDP.MKTP.CD".to_string()),
                ("type".to_string(), "year".to_string()),
            ]
        );
    }

    #[test]
    fn test_urls_respect_base_path_and_encode_values() {
        let c = client("http://localhost:5000/explorer");
        let url = c.download_url(&query()).unwrap();
        assert_eq!(url.path(), "/explorer/download_csv");

        let option = url.query_pairs().find(|(k, _)| k == "option").map(|(_, v)| v.into_owned());
        assert_eq!(option.as_deref(), Some("Côte d'Ivoire"));
        assert!(!url.as_str().contains(' '));
    }

    #[test]
    fn test_indicator_list_shapes() {
        let names: IndicatorList = serde_json::from_str(r#"["Population"]"#).unwrap();
        assert_eq!(Vec::<Indicator>::from(names), vec![Indicator::named("Population")]);

        let map: IndicatorList = serde_json::from_str(r#"{"Population":"SP.POP.TOTL"}"#).unwrap();
        assert_eq!(Vec::<Indicator>::from(map), vec![Indicator::new("Population", "SP.POP.TOTL")]);
    }

    #[test]
    fn test_attachment_file_name() {
        let quoted = attachment_file_name(r#"attachment; filename="data.csv""#);
        assert_eq!(quoted.as_deref(), Some("data.csv"));
        let traversal = attachment_file_name("attachment; filename=../../etc/passwd");
        assert_eq!(traversal.as_deref(), Some("passwd"));
        assert_eq!(attachment_file_name("inline"), None);
    }

    #[tokio::test]
    async fn test_options_round_trip_against_local_server() {
        let (base, server) = serve_once(
            "200 OK",
            "Content-Type: application/json\r\n",
            r#"["2020","2019"]"#,
        )
        .await;
        let c = client(&base);

        let options = c
            .options(&OptionsQuery {
                indicator: "SP.POP.TOTL".into(),
                group_by: GroupBy::Year,
            })
            .await
            .unwrap();
        assert_eq!(options, vec!["2020", "2019"]);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /fetch_options?indicator=SP.POP.TOTL&type=year "));
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let (base, server) = serve_once("500 Internal Server Error", "", "boom").await;
        let err = client(&base).data(&query()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Status { endpoint: "/fetch_data", status } if status.as_u16() == 500
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_download_writes_named_file() {
        let (base, server) = serve_once(
            "200 OK",
            "Content-Type: text/csv\r\nContent-Disposition: attachment; filename=\"data.csv\"\r\n",
            "COUNTRY,DATE,VALUE\nKenya,2020,1.5\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();

        let mut last = 0;
        let path = client(&base)
            .download_csv(&query(), dir.path(), |n| last = n)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("data.csv"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "COUNTRY,DATE,VALUE\nKenya,2020,1.5\n"
        );
        assert_eq!(last, 34);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_download_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("data.csv");
        std::fs::write(&existing, "COUNTRY,DATE,VALUE\nChad,2019,2.0\n").unwrap();

        // promises 100 bytes, sends 18 and hangs up
        let (base, server) = serve_raw(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/csv\r\n\
             Content-Disposition: attachment; filename=\"data.csv\"\r\n\
             Content-Length: 100\r\n\
             Connection: close\r\n\r\n\
             COUNTRY,DATE,VALUE"
                .to_string(),
        )
        .await;

        let err = client(&base)
            .download_csv(&query(), dir.path(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Http { endpoint: "/download_csv", .. }));

        assert_eq!(
            std::fs::read_to_string(&existing).unwrap(),
            "COUNTRY,DATE,VALUE\nChad,2019,2.0\n"
        );
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
        server.await.unwrap();
    }
}
