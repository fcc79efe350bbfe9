use std::path::{Path, PathBuf};

use serde_json::Value;
use tabled::Tabled;

use crate::cache::{keys, Mutation};
use crate::client::UploadFile;
use crate::context::AppContext;
use crate::error::{Result, TmsError};
use crate::output::{self, format_date_only, format_size, truncate};
use crate::types::Attachment;

use super::fetch;

#[derive(Tabled)]
struct AttachmentRow {
    #[tabled(rename = "File")]
    file_name: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Type")]
    mime_type: String,
    #[tabled(rename = "Uploaded")]
    created: String,
}

impl From<&Attachment> for AttachmentRow {
    fn from(attachment: &Attachment) -> Self {
        Self {
            file_name: truncate(&attachment.file_name, 40),
            size: attachment.file_size.map(format_size).unwrap_or_default(),
            mime_type: attachment.mime_type.clone().unwrap_or_default(),
            created: format_date_only(&attachment.created_at),
        }
    }
}

pub(crate) async fn fetch_attachments(ctx: &AppContext, ticket_id: &str) -> Result<Vec<Attachment>> {
    fetch(
        ctx,
        keys::attachments(ticket_id),
        &format!("/tickets/{ticket_id}/attachments"),
    )
    .await
}

pub(crate) fn print_attachments(attachments: &[Attachment]) {
    if attachments.is_empty() {
        return;
    }
    output::print_table(attachments, |a| AttachmentRow::from(a));
}

pub async fn list(ctx: &AppContext, ticket_id: &str) -> Result<()> {
    let attachments = fetch_attachments(ctx, ticket_id).await?;

    if attachments.is_empty() {
        output::print_message(&format!("No attachments on {ticket_id}"));
        return Ok(());
    }

    print_attachments(&attachments);
    Ok(())
}

pub async fn upload(ctx: &AppContext, ticket_id: &str, paths: &[PathBuf]) -> Result<()> {
    let files = paths
        .iter()
        .map(|p| read_upload(p))
        .collect::<Result<Vec<_>>>()?;

    if files.is_empty() {
        output::print_message("No files given");
        return Ok(());
    }

    ctx.cache
        .mutate(
            Mutation::UploadAttachments {
                ticket_id: ticket_id.to_string(),
            },
            ctx.client
                .upload_files::<Value>(&format!("/tickets/{ticket_id}/attachments"), &files),
        )
        .await?;

    output::print_message(&format!("Uploaded {} file(s) to {ticket_id}", files.len()));
    Ok(())
}

/// Read a local file into an upload part.
pub(crate) fn read_upload(path: &Path) -> Result<UploadFile> {
    let display = path.display().to_string();
    if !path.is_file() {
        return Err(TmsError::FileNotFound(display));
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();

    let data = std::fs::read(path).map_err(|e| TmsError::FileRead {
        path: display,
        source: e,
    })?;

    Ok(UploadFile {
        content_type: guess_content_type(&file_name).to_string(),
        file_name,
        data,
    })
}

fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("screen.PNG"), "image/png");
        assert_eq!(guess_content_type("report.xlsx"), "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet");
        assert_eq!(guess_content_type("Makefile"), "application/octet-stream");
    }

    #[test]
    fn test_read_upload_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_upload(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, TmsError::FileNotFound(_)));
    }

    #[test]
    fn test_read_upload_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"stack trace")
            .unwrap();

        let file = read_upload(&path).unwrap();
        assert_eq!(file.file_name, "trace.log");
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(file.data, b"stack trace");
    }
}
