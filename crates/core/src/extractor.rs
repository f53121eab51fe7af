use crate::error::RagError;
use crate::models::{Document, Page, PageContent};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    Text,
    Multimodal,
}

impl ExtractionMode {
    /// Multimodal only when the answering model can look at page images.
    pub fn for_chat_model(supports_images: bool) -> Self {
        if supports_images {
            ExtractionMode::Multimodal
        } else {
            ExtractionMode::Text
        }
    }
}

pub trait PdfExtractor: Send + Sync {
    fn extract(&self, document: &Document, mode: ExtractionMode) -> Result<Vec<Page>, RagError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

pub trait PageRenderer: Send + Sync {
    fn render(&self, pdf: &[u8], page_number: u32) -> Result<RenderedPage, RagError>;
}

/// Rasterizes single pages with poppler's `pdftoppm`, reading the PDF from stdin.
#[derive(Debug, Clone)]
pub struct PdftoppmRenderer {
    pub binary: PathBuf,
    pub dpi: u32,
}

impl Default for PdftoppmRenderer {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftoppm"),
            dpi: 110,
        }
    }
}

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

impl PageRenderer for PdftoppmRenderer {
    fn render(&self, pdf: &[u8], page_number: u32) -> Result<RenderedPage, RagError> {
        let page = page_number.to_string();
        let mut child = Command::new(&self.binary)
            .args(["-png", "-r", &self.dpi.to_string(), "-f", &page, "-l", &page])
            .args(["-singlefile", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| {
                RagError::Extraction(format!(
                    "failed to start {}: {error}",
                    self.binary.display()
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(pdf)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(RagError::Extraction(format!(
                "pdftoppm failed on page {page_number}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !output.stdout.starts_with(PNG_MAGIC) {
            return Err(RagError::Extraction(format!(
                "pdftoppm produced no image for page {page_number}"
            )));
        }

        Ok(RenderedPage {
            media_type: "image/png".to_string(),
            bytes: output.stdout,
        })
    }
}

pub struct LopdfExtractor {
    renderer: Arc<dyn PageRenderer>,
}

impl Default for LopdfExtractor {
    fn default() -> Self {
        Self::with_renderer(Arc::new(PdftoppmRenderer::default()))
    }
}

impl LopdfExtractor {
    pub fn with_renderer(renderer: Arc<dyn PageRenderer>) -> Self {
        Self { renderer }
    }
}

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, document: &Document, mode: ExtractionMode) -> Result<Vec<Page>, RagError> {
        let pdf = lopdf::Document::load_mem(&document.bytes).map_err(|error| {
            RagError::Extraction(format!("{} is not a readable pdf: {error}", document.source))
        })?;

        let page_numbers: Vec<u32> = pdf.get_pages().into_keys().collect();
        debug!(
            document_id = %document.document_id,
            pages = page_numbers.len(),
            ?mode,
            "extracting pdf"
        );

        let mut pages = Vec::with_capacity(page_numbers.len());
        for number in page_numbers {
            let content = match mode {
                ExtractionMode::Text => match pdf.extract_text(&[number]) {
                    Ok(text) => PageContent::Text(Some(text)),
                    Err(error) => {
                        warn!(
                            document_id = %document.document_id,
                            page = number,
                            %error,
                            "page text layer unreadable"
                        );
                        PageContent::Text(None)
                    }
                },
                ExtractionMode::Multimodal => {
                    let rendered = self.renderer.render(&document.bytes, number)?;
                    PageContent::Image {
                        media_type: rendered.media_type,
                        bytes: rendered.bytes,
                    }
                }
            };

            pages.push(Page {
                document_id: document.document_id.clone(),
                number,
                content,
            });
        }

        Ok(pages)
    }
}
