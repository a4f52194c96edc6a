use crate::models::Attachment;
use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use std::path::Path;

/// Infers the MIME type from a filename extension.
fn infer_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// Reads a user-selected file into an attachment.
///
/// Images are inlined as `data:` URLs so the completion service can send
/// them; other files are referenced by name only.
pub async fn load_attachment(path: &Path) -> Result<Attachment, anyhow::Error> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))?;
    let mime_type = infer_mime_type(path);

    let content = if mime_type.starts_with("image/") {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        log::debug!("Inlining image attachment {} ({} bytes)", name, bytes.len());
        Some(format!(
            "data:{};base64,{}",
            mime_type,
            BASE64_STANDARD.encode(&bytes)
        ))
    } else {
        tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        None
    };

    Ok(Attachment {
        name,
        mime_type,
        content,
    })
}

pub async fn load_attachments<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Attachment>, anyhow::Error> {
    let mut attachments = Vec::with_capacity(paths.len());
    for path in paths {
        attachments.push(load_attachment(path.as_ref()).await?);
    }
    Ok(attachments)
}
