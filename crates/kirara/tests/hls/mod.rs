use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use kirara::{
    decrypt::default_iv, ConcatMuxer, DownloadStage, ErrorKind, HttpClient, KiraraError,
    KiraraResult, M3u8Downloader, Muxer,
};
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{entries, setup_tracing, AssertWrapper};

const KEY: [u8; 16] = *b"0123456789abcdef";

fn encrypt(data: &[u8], iv: &[u8; 16]) -> Vec<u8> {
    cbc::Encryptor::<aes::Aes128>::new(&KEY.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(data)
}

/// Records the name and content of every part, then concatenates them.
#[derive(Clone, Default)]
struct RecordingMuxer {
    parts: Arc<Mutex<Option<Vec<(String, Vec<u8>)>>>>,
    fail: bool,
}

impl RecordingMuxer {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn names(&self) -> Option<Vec<String>> {
        let parts = self.parts.lock().unwrap();
        parts
            .as_ref()
            .map(|parts| parts.iter().map(|(name, _)| name.clone()).collect())
    }
}

impl Muxer for RecordingMuxer {
    async fn mux(&self, parts: &[PathBuf], output: &Path) -> KiraraResult<()> {
        let mut recorded = Vec::new();
        for part in parts {
            let name = part.file_name().unwrap().to_string_lossy().to_string();
            recorded.push((name, tokio::fs::read(part).await?));
        }
        *self.parts.lock().unwrap() = Some(recorded);

        if self.fail {
            return Err(KiraraError::MuxError("muxer exited with 1".to_string()));
        }
        ConcatMuxer.mux(parts, output).await
    }
}

trait HlsMock {
    async fn mock<B>(&self, mock_path: &str, body: B) -> &Self
    where
        B: Into<Vec<u8>>;
}

impl HlsMock for MockServer {
    async fn mock<B>(&self, mock_path: &str, body: B) -> &Self
    where
        B: Into<Vec<u8>>,
    {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(self)
            .await;
        self
    }
}

struct Job {
    _root: TempDir,
    temp_root: PathBuf,
    output: PathBuf,
}

impl Job {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self {
            temp_root: root.path().join("tmp"),
            output: root.path().join("videos").join("out.mp4"),
            _root: root,
        }
    }

    fn downloader<M>(&self, muxer: M) -> M3u8Downloader<M>
    where
        M: Muxer + Send + Sync,
    {
        let client = HttpClient::with_default_timeout().unwrap();
        M3u8Downloader::new(client, muxer)
            .temp_dir(&self.temp_root)
            .concurrency(NonZeroU32::new(3).unwrap())
    }
}

#[tokio::test]
async fn test_plain_playlist() -> anyhow::Result<()> {
    setup_tracing();
    let server = MockServer::start().await;
    let absolute = format!("{}/cdn/2.ts", server.uri());
    server
        .mock(
            "/a/index.m3u8",
            format!(
                "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXTINF:10,
0.ts
#EXTINF:10,
seg/1.ts
#EXTINF:10,
{absolute}
#EXT-X-ENDLIST"
            ),
        )
        .await
        .mock("/a/0.ts", "zero;")
        .await
        .mock("/a/seg/1.ts", "one;")
        .await
        .mock("/cdn/2.ts", "two;")
        .await;

    let job = Job::new();
    let output = job
        .downloader(ConcatMuxer)
        .download(&format!("{}/a/index.m3u8", server.uri()), &job.output)
        .await
        .assert_success();

    assert_eq!(output, job.output);
    assert_eq!(std::fs::read(&output)?, b"zero;one;two;");
    assert_eq!(entries(&job.temp_root), 0);
    Ok(())
}

#[tokio::test]
async fn test_encrypted_playlist_with_default_iv() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock(
            "/a/index.m3u8",
            r#"#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-KEY:METHOD=AES-128,URI="key.bin"
#EXTINF:10,
s0.ts
#EXTINF:10,
s1.ts
#EXT-X-ENDLIST"#,
        )
        .await
        .mock("/a/key.bin", KEY.to_vec())
        .await
        .mock("/a/s0.ts", encrypt(b"first segment", &default_iv(0)))
        .await
        .mock("/a/s1.ts", encrypt(b"second segment", &default_iv(1)))
        .await;

    let job = Job::new();
    let muxer = RecordingMuxer::default();
    job.downloader(muxer.clone())
        .download(&format!("{}/a/index.m3u8", server.uri()), &job.output)
        .await
        .assert_success();

    assert_eq!(
        muxer.names().unwrap(),
        ["segment_00000", "segment_00001"]
    );
    assert_eq!(std::fs::read(&job.output)?, b"first segmentsecond segment");
    assert_eq!(entries(&job.temp_root), 0);
    Ok(())
}

#[tokio::test]
async fn test_explicit_iv_and_init_segment() -> anyhow::Result<()> {
    let iv = [0x11u8; 16];
    let server = MockServer::start().await;
    server
        .mock(
            "/v/index.m3u8",
            r#"#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-MAP:URI="init.mp4"
#EXT-X-KEY:METHOD=AES-128,URI="key",IV=0x11111111111111111111111111111111
#EXTINF:10,
frag0.m4s
#EXTINF:10,
frag1.m4s
#EXT-X-ENDLIST"#,
        )
        .await
        .mock("/v/init.mp4", "ftyp")
        .await
        .mock("/v/key", KEY.to_vec())
        .await
        .mock("/v/frag0.m4s", encrypt(b"moof0", &iv))
        .await
        .mock("/v/frag1.m4s", encrypt(b"moof1", &iv))
        .await;

    let job = Job::new();
    let muxer = RecordingMuxer::default();
    job.downloader(muxer.clone())
        .download(&format!("{}/v/index.m3u8", server.uri()), &job.output)
        .await
        .assert_success();

    assert_eq!(
        muxer.names().unwrap(),
        ["init.mp4", "segment_00000", "segment_00001"]
    );
    assert_eq!(std::fs::read(&job.output)?, b"ftypmoof0moof1");
    Ok(())
}

#[tokio::test]
async fn test_manual_key_overrides_key_uri() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock(
            "/index.m3u8",
            r#"#EXTM3U
#EXT-X-KEY:METHOD=AES-128,URI="https://license.invalid/key"
#EXTINF:10,
s0.ts
#EXT-X-ENDLIST"#,
        )
        .await
        .mock("/s0.ts", encrypt(b"secret", &default_iv(0)))
        .await;

    let job = Job::new();
    job.downloader(ConcatMuxer)
        .key(Some(hex::encode(KEY)))
        .download(&format!("{}/index.m3u8", server.uri()), &job.output)
        .await
        .assert_success();

    assert_eq!(std::fs::read(&job.output)?, b"secret");
    Ok(())
}

#[tokio::test]
async fn test_master_playlist_selects_best_variant() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock(
            "/master.m3u8",
            "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080
high/index.m3u8",
        )
        .await
        .mock("/low/index.m3u8", "#EXTM3U\n#EXTINF:10,\ns.ts\n#EXT-X-ENDLIST")
        .await
        .mock("/low/s.ts", "low")
        .await
        .mock("/high/index.m3u8", "#EXTM3U\n#EXTINF:10,\ns.ts\n#EXT-X-ENDLIST")
        .await
        .mock("/high/s.ts", "high")
        .await;

    let job = Job::new();
    job.downloader(ConcatMuxer)
        .download(&format!("{}/master.m3u8", server.uri()), &job.output)
        .await
        .assert_success();

    assert_eq!(std::fs::read(&job.output)?, b"high");
    Ok(())
}

#[tokio::test]
async fn test_failed_segment_aborts_before_mux() {
    setup_tracing();
    let server = MockServer::start().await;
    let mut playlist = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:10\n");
    for i in 0..10 {
        playlist.push_str(&format!("#EXTINF:10,\ns{i}.ts\n"));
        if i != 4 {
            server.mock(&format!("/s{i}.ts"), format!("segment {i}")).await;
        }
    }
    playlist.push_str("#EXT-X-ENDLIST");
    server.mock("/index.m3u8", playlist).await;

    let job = Job::new();
    let muxer = RecordingMuxer::default();
    let error = job
        .downloader(muxer.clone())
        .download(&format!("{}/index.m3u8", server.uri()), &job.output)
        .await
        .unwrap_err();

    assert_eq!(error.stage(), Some(DownloadStage::FetchAndDecryptSegments));
    assert_eq!(error.kind(), ErrorKind::Network);
    assert!(muxer.names().is_none());
    assert!(!job.output.exists());
    assert_eq!(entries(&job.temp_root), 0);
}

#[tokio::test]
async fn test_playlist_not_found() {
    let server = MockServer::start().await;

    let job = Job::new();
    let error = job
        .downloader(ConcatMuxer)
        .download(&format!("{}/missing.m3u8", server.uri()), &job.output)
        .await
        .unwrap_err();

    assert_eq!(error.stage(), Some(DownloadStage::FetchPlaylist));
    assert_eq!(error.kind(), ErrorKind::Network);
    assert!(!job.temp_root.exists());
}

#[tokio::test]
async fn test_invalid_key_length() {
    let server = MockServer::start().await;
    server
        .mock(
            "/index.m3u8",
            "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key\"\n#EXTINF:10,\ns0.ts\n#EXT-X-ENDLIST",
        )
        .await
        .mock("/key", "too short")
        .await;

    let job = Job::new();
    let error = job
        .downloader(ConcatMuxer)
        .download(&format!("{}/index.m3u8", server.uri()), &job.output)
        .await
        .unwrap_err();

    assert_eq!(error.stage(), Some(DownloadStage::FetchKey));
    assert_eq!(error.kind(), ErrorKind::Crypto);
}

#[tokio::test]
async fn test_empty_playlist() {
    let server = MockServer::start().await;
    server
        .mock("/index.m3u8", "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-ENDLIST")
        .await;

    let job = Job::new();
    let muxer = RecordingMuxer::default();
    let error = job
        .downloader(muxer.clone())
        .download(&format!("{}/index.m3u8", server.uri()), &job.output)
        .await
        .unwrap_err();

    assert!(matches!(
        &error,
        KiraraError::Stage { stage: DownloadStage::Mux, source } if matches!(**source, KiraraError::NoSegments)
    ));
    assert_eq!(error.to_string(), "Mux failed: No playable segments found");
    assert!(muxer.names().is_none());
    assert_eq!(entries(&job.temp_root), 0);
}

#[tokio::test]
async fn test_failing_muxer_cleans_up() {
    let server = MockServer::start().await;
    server
        .mock("/index.m3u8", "#EXTM3U\n#EXTINF:10,\ns0.ts\n#EXT-X-ENDLIST")
        .await
        .mock("/s0.ts", "data")
        .await;

    let job = Job::new();
    let muxer = RecordingMuxer::failing();
    let error = job
        .downloader(muxer.clone())
        .download(&format!("{}/index.m3u8", server.uri()), &job.output)
        .await
        .unwrap_err();

    assert_eq!(error.stage(), Some(DownloadStage::Mux));
    assert_eq!(error.kind(), ErrorKind::Mux);
    assert_eq!(muxer.names().unwrap(), ["segment_00000"]);
    assert_eq!(entries(&job.temp_root), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let server = MockServer::start().await;
    server
        .mock("/index.m3u8", "#EXTM3U\n#EXTINF:10,\ns0.ts\n#EXT-X-ENDLIST")
        .await;

    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let job = Job::new();
    let error = job
        .downloader(ConcatMuxer)
        .cancel_token(cancel)
        .download(&format!("{}/index.m3u8", server.uri()), &job.output)
        .await
        .unwrap_err();
    assert!(error.is_cancelled());
}
