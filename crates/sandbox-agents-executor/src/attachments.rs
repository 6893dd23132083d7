//! Image attachment resolution.
//!
//! Attachments arrive as URLs. Each is downloaded into a local directory
//! before the agent starts; an individual failure is logged and skipped so
//! one dead link never aborts the whole run.

use std::path::{Path, PathBuf};

/// Download each URL into `dir`, returning the paths that succeeded.
pub async fn resolve_attachments(urls: &[String], dir: &Path) -> Vec<PathBuf> {
    if urls.is_empty() {
        return Vec::new();
    }
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::warn!(dir = %dir.display(), error = %e, "cannot create attachment dir, skipping all attachments");
        return Vec::new();
    }

    let mut resolved = Vec::new();
    for (index, url) in urls.iter().enumerate() {
        let target = dir.join(file_name(url, index));
        match download(url, &target).await {
            Ok(()) => resolved.push(target),
            Err(e) => {
                tracing::warn!(%url, error = %e, "attachment download failed, skipping");
            }
        }
    }
    resolved
}

async fn download(url: &str, target: &Path) -> anyhow::Result<()> {
    let response = reqwest::get(url).await?.error_for_status()?;
    let bytes = response.bytes().await?;
    tokio::fs::write(target, &bytes).await?;
    Ok(())
}

/// Stable local name: index plus whatever extension the URL carries.
fn file_name(url: &str, index: usize) -> String {
    let extension = url
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| ext.len() <= 4 && ext.chars().all(char::is_alphanumeric))
        .unwrap_or("png");
    format!("attachment-{index}.{extension}")
}

/// Append references to the successfully downloaded files to the prompt.
///
/// Only files that actually landed are mentioned; the agent never hears
/// about failed downloads.
#[must_use]
pub fn augment_prompt(prompt: &str, files: &[PathBuf]) -> String {
    if files.is_empty() {
        return prompt.to_owned();
    }
    let mut augmented = prompt.to_owned();
    augmented.push_str("\n\nThe user attached these image files; look at them before building:\n");
    for file in files {
        augmented.push_str(&format!("- {}\n", file.display()));
    }
    augmented
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_keeps_short_extensions() {
        assert_eq!(file_name("https://x/img.jpeg", 0), "attachment-0.jpeg");
        assert_eq!(file_name("https://x/img", 1), "attachment-1.png");
        assert_eq!(
            file_name("https://x/img.superlongext", 2),
            "attachment-2.png"
        );
    }

    #[test]
    fn augment_prompt_lists_only_successes() {
        assert_eq!(augment_prompt("build it", &[]), "build it");

        let files = vec![PathBuf::from("/tmp/a/attachment-0.png")];
        let augmented = augment_prompt("build it", &files);
        assert!(augmented.starts_with("build it"));
        assert!(augmented.contains("/tmp/a/attachment-0.png"));
    }

    #[tokio::test]
    async fn bad_urls_are_skipped_not_fatal() {
        let dir = std::env::temp_dir().join("sandbox-agents-attachments-test");
        let resolved = resolve_attachments(
            &["http://127.0.0.1:1/unreachable.png".to_owned()],
            &dir,
        )
        .await;
        assert!(resolved.is_empty());
    }
}
