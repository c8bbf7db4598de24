use std::path::{Path, PathBuf};

const DEFAULT_EXTENSION: &str = ".mp4";

/// Extension of the file a URL points at, including the leading dot.
///
/// Falls back to `.mp4` when the path has no extension or the extension is longer
/// than 5 characters.
pub fn extension_from_url(url: &str) -> String {
    let path = match reqwest::Url::parse(url) {
        Ok(url) => url.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let file_name = path.rsplit('/').next().unwrap_or_default();
    match file_name.rfind('.') {
        Some(index) if index > 0 => {
            let extension = &file_name[index..];
            if extension.len() > 1 && extension.len() <= 5 {
                extension.to_string()
            } else {
                DEFAULT_EXTENSION.to_string()
            }
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// `<dir>/<name><extension>`
pub fn output_path<P>(dir: P, name: &str, extension: &str) -> PathBuf
where
    P: AsRef<Path>,
{
    dir.as_ref().join(format!("{name}{extension}"))
}

pub fn is_mp4(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mp4"))
        .unwrap_or_default()
}
