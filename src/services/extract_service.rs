use docx_rs::{read_docx, DocumentChild};

use super::llm_client::OllamaClient;

pub const UNSUPPORTED_FORMAT: &str = "[unsupported file format]";

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Closed dispatch over the declared MIME type of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    PlainText,
    Image,
    Unsupported,
}

impl DocumentKind {
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            MIME_PDF => Self::Pdf,
            MIME_DOCX => Self::Docx,
            m if m.starts_with("text/") => Self::PlainText,
            m if m.starts_with("image/") => Self::Image,
            _ => Self::Unsupported,
        }
    }
}

/// One file received from the upload surface, with its declared type.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data,
        }
    }
}

/// Extract plain text from one upload. Never fails: every branch converts its
/// own failure into an inline marker so sibling files are unaffected.
pub async fn extract_text(client: &OllamaClient, model: &str, file: &UploadedFile) -> String {
    match DocumentKind::from_mime(&file.mime) {
        DocumentKind::Pdf => extract_pdf(&file.data),
        DocumentKind::Docx => extract_docx(&file.data),
        DocumentKind::PlainText => extract_plain_text(&file.data),
        DocumentKind::Image => client.extract_image_text(&file.data, model).await,
        DocumentKind::Unsupported => {
            log::warn!("unsupported upload type '{}' for {}", file.mime, file.name);
            UNSUPPORTED_FORMAT.to_string()
        }
    }
}

/// Combined context for a multi-file upload: one block per file in upload
/// order, each preceded by a header line naming the source file.
pub async fn build_context(
    client: &OllamaClient,
    model: &str,
    files: &[UploadedFile],
) -> String {
    let mut blocks = Vec::with_capacity(files.len());

    for file in files {
        let text = extract_text(client, model, file).await;
        blocks.push(format!("--- {} ---\n{}", file.name, text));
    }

    blocks.join("\n\n")
}

fn extract_pdf(data: &[u8]) -> String {
    match pdf_extract::extract_text_from_mem(data) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("PDF extraction failed: {}", e);
            format!("[could not extract text from PDF: {}]", e)
        }
    }
}

fn extract_docx(data: &[u8]) -> String {
    match read_docx(data) {
        Ok(docx) => docx
            .document
            .children
            .iter()
            .filter_map(|child| match child {
                DocumentChild::Paragraph(paragraph) => Some(paragraph.raw_text()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => {
            log::warn!("DOCX extraction failed: {}", e);
            format!("[could not extract text from DOCX: {}]", e)
        }
    }
}

fn extract_plain_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
