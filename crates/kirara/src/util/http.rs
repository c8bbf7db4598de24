use std::{ops::Deref, sync::Arc, time::Duration};

use reqwest::{Client, ClientBuilder, IntoUrl};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::error::KiraraResult;

/// Large videos take a long time, so the default timeout is measured in hours.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// HTTP client shared by the downloaders of one job. Cloning is cheap.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> KiraraResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder.cookie_provider(cookies_store.clone()).build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    /// Client with [DEFAULT_TIMEOUT] and no extra headers.
    pub fn with_default_timeout() -> KiraraResult<Self> {
        Self::new(Client::builder().timeout(DEFAULT_TIMEOUT))
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) -> KiraraResult<()> {
        let url = url.into_url()?;
        let Ok(mut lock) = self.cookies_store.lock() else {
            log::warn!("Cookie store is poisoned, cookies are ignored.");
            return Ok(());
        };
        for cookie in cookies {
            if lock.parse(&cookie, &url).is_err() {
                log::warn!("Ignored invalid cookie: {cookie}");
            }
        }
        Ok(())
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
