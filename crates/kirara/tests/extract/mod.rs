use kirara::{HtmlRegexExtractor, HttpClient, VideoUrlExtractor};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::AssertWrapper;

#[tokio::test]
async fn test_extract_from_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/watch/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
<video id="player" data-src="https://media.example.com/hls/1/master.m3u8"></video>
</body></html>"#,
        ))
        .mount(&server)
        .await;

    let extractor = HtmlRegexExtractor::new(HttpClient::with_default_timeout().unwrap());
    let url = extractor
        .extract_video_url(&format!("{}/watch/1", server.uri()))
        .await
        .assert_success();
    assert_eq!(
        url.as_deref(),
        Some("https://media.example.com/hls/1/master.m3u8")
    );

    extractor
        .extract_video_url(&format!("{}/watch/2", server.uri()))
        .await
        .assert_error();
}
