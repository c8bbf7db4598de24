use std::{future::Future, sync::LazyLock};

use regex::Regex;

use crate::{
    error::KiraraResult,
    fetch::get_text,
    util::http::HttpClient,
};

static VIDEO_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>\\]+?\.(?:m3u8|mp4)(?:\?[^\s"'<>\\]*)?"#).unwrap()
});

/// Finds the media URL a web page plays.
pub trait VideoUrlExtractor {
    /// `Ok(None)` when the page was loaded but contains no video.
    fn extract_video_url(
        &self,
        page_url: &str,
    ) -> impl Future<Output = KiraraResult<Option<String>>> + Send;
}

/// Looks for the first absolute `.m3u8` or `.mp4` URL in the page markup.
///
/// Players that build their URL in script are not supported.
pub struct HtmlRegexExtractor {
    client: HttpClient,
}

impl HtmlRegexExtractor {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub fn find_video_url(html: &str) -> Option<String> {
        VIDEO_URL_REGEX
            .find(html)
            .map(|m| m.as_str().replace("&amp;", "&"))
    }
}

impl VideoUrlExtractor for HtmlRegexExtractor {
    async fn extract_video_url(&self, page_url: &str) -> KiraraResult<Option<String>> {
        tracing::info!("Looking for a video in {page_url}");
        let html = get_text(&self.client, page_url).await?;
        let url = Self::find_video_url(&html);
        match &url {
            Some(url) => tracing::info!("Found video URL: {url}"),
            None => tracing::warn!("No video URL found in {page_url}"),
        }
        Ok(url)
    }
}
