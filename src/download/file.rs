use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;
use crate::retry::{self, RetryConfig};

/// Sibling `.part` path the body is streamed into before the final rename.
fn part_path_for(download_path: &Path) -> PathBuf {
    let mut name = download_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    download_path.with_file_name(name)
}

/// Download `url` to `download_path`, returning the number of bytes written.
///
/// The body is streamed into a `.part` file that is renamed into place only
/// once complete, so a crash never leaves a truncated file under the final
/// name. Transient failures are retried per `retry_config`; every attempt
/// starts from an empty `.part` file.
pub async fn download_file(
    client: &Client,
    url: &str,
    download_path: &Path,
    retry_config: &RetryConfig,
) -> Result<u64, DownloadError> {
    let part_path = part_path_for(download_path);
    let what = format!("Download of {}", download_path.display());

    let result = retry::retry_with_backoff(retry_config, &what, || {
        attempt_download(client, url, download_path, &part_path)
    })
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&part_path).await;
    }
    result
}

async fn attempt_download(
    client: &Client,
    url: &str,
    download_path: &Path,
    part_path: &Path,
) -> Result<u64, DownloadError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| DownloadError::Http {
            source,
            url: url.to_string(),
            bytes_written: 0,
        })?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part_path)
        .await
        .map_err(|e| DownloadError::disk(part_path, e))?;

    let mut bytes_written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Http {
            source,
            url: url.to_string(),
            bytes_written,
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::disk(part_path, e))?;
        bytes_written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| DownloadError::disk(part_path, e))?;
    drop(file);

    fs::rename(part_path, download_path)
        .await
        .map_err(|e| DownloadError::disk(download_path, e))?;
    tracing::debug!("Wrote {} bytes to {}", bytes_written, download_path.display());
    Ok(bytes_written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_writes_file_and_removes_part() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/a.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.jpg");
        let written = download_file(
            &Client::new(),
            &format!("{}/img/a.jpg", server.uri()),
            &dest,
            &RetryConfig::none(),
        )
        .await
        .unwrap();

        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"jpeg-bytes");
        assert!(!part_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.jpg");
        let retry = RetryConfig {
            max_retries: 3,
            ..RetryConfig::none()
        };
        let err = download_file(&Client::new(), &server.uri(), &dest, &retry)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_server_error_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("flaky.png");
        let retry = RetryConfig {
            max_retries: 2,
            ..RetryConfig::none()
        };
        download_file(&Client::new(), &server.uri(), &dest, &retry)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"ok");
    }

    #[test]
    fn test_part_path_is_sibling() {
        assert_eq!(
            part_path_for(Path::new("/photos/Ada-2024.jpg")),
            Path::new("/photos/Ada-2024.jpg.part")
        );
    }
}
