//! Login pages: the asset source for the served forms and the result pages

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;

use crate::models::Service;

/// Source of the static login pages
#[async_trait]
pub trait PageAssets: Send + Sync {
    async fn read(&self, name: &str) -> io::Result<String>;
}

/// Pages compiled into the binary
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedAssets;

#[async_trait]
impl PageAssets for EmbeddedAssets {
    async fn read(&self, name: &str) -> io::Result<String> {
        let page = match name {
            "login.html" => include_str!("../../assets/login.html"),
            "mock_gmail_login.html" => include_str!("../../assets/mock_gmail_login.html"),
            "mock_outlook_login.html" => include_str!("../../assets/mock_outlook_login.html"),
            "mock_icloud_login.html" => include_str!("../../assets/mock_icloud_login.html"),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no embedded page named {}", other),
                ))
            }
        };
        Ok(page.to_string())
    }
}

/// Pages read from a directory on every request
#[derive(Debug, Clone)]
pub struct AssetDir {
    root: PathBuf,
}

impl AssetDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PageAssets for AssetDir {
    async fn read(&self, name: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.root.join(name)).await
    }
}

const HEAD: &str = "<html><head><meta name='viewport' content='width=device-width, initial-scale=1.0'>\
<style>body{font-family:sans-serif;text-align:center;padding-top:50px;}</style></head>";

/// Page returned after an accepted login
pub fn login_success(service: Service) -> String {
    let title = match service {
        Service::Primary => "Login Successful!".to_string(),
        other => format!("{} Login Successful!", other.as_str()),
    };
    format!(
        "{HEAD}<body><h2>{title}</h2><p>You can now access the internet.</p></body></html>"
    )
}

/// Page returned after a rejected login, with a retry link
pub fn login_failed() -> String {
    format!("{HEAD}<body><h2>Login Failed!</h2><p><a href='/'>Try again</a></p></body></html>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embedded_pages_cover_every_service() {
        for service in [Service::Primary, Service::MockGmail, Service::MockOutlook, Service::MockICloud] {
            let page = EmbeddedAssets.read(service.page_asset()).await.unwrap();
            assert!(page.contains("<form"), "{} has no form", service);
        }
        assert!(EmbeddedAssets.read("missing.html").await.is_err());
    }

    #[tokio::test]
    async fn test_asset_dir_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("login.html"), "<form>custom</form>").unwrap();

        let assets = AssetDir::new(dir.path());
        assert_eq!(assets.read("login.html").await.unwrap(), "<form>custom</form>");
        assert_eq!(
            assets.read("mock_gmail_login.html").await.unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_result_pages() {
        assert!(login_success(Service::Primary).contains("<h2>Login Successful!</h2>"));
        assert!(login_success(Service::MockGmail).contains("MockGmail Login Successful!"));
        assert!(login_failed().contains("Login Failed!"));
        assert!(login_failed().contains("href='/'"));
    }
}
