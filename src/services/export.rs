use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use std::path::Path;

use crate::core::io::Storage;
use crate::core::state::{Book, BookPage};
use crate::utils::image::{decode_data_uri, normalize_to_jpeg, JpegImage};

/// A page rendered and ready to be placed in a document.
#[derive(Debug, Clone)]
pub struct PageSurface {
    pub page_number: u32,
    pub is_cover: bool,
    pub caption: String,
    pub image: JpegImage,
}

pub trait PageCapture: Send + Sync {
    fn capture(&self, page: &BookPage) -> Result<PageSurface>;
}

/// Assembles captured pages, in the given order, into one document file.
pub trait DocumentExporter: Send + Sync {
    fn extension(&self) -> &'static str;
    fn assemble(&self, title: &str, surfaces: &[PageSurface]) -> Result<Vec<u8>>;
}

/// Captures a page from its inline `data:` image reference.
pub struct ImagePageCapture {
    quality: u8,
}

impl ImagePageCapture {
    pub fn new() -> Self {
        Self { quality: 95 }
    }
}

impl Default for ImagePageCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCapture for ImagePageCapture {
    fn capture(&self, page: &BookPage) -> Result<PageSurface> {
        let (_mime, bytes) = decode_data_uri(&page.image_ref)?;
        let image = normalize_to_jpeg(&bytes, self.quality)?;
        Ok(PageSurface {
            page_number: page.page_number,
            is_cover: page.is_cover,
            caption: page.text.clone(),
            image,
        })
    }
}

// A4 portrait, in points.
const PAGE_WIDTH: f32 = 595.28;
const PAGE_HEIGHT: f32 = 841.89;
const MARGIN: f32 = 36.0;
const MAX_IMAGE_HEIGHT: f32 = PAGE_HEIGHT * 0.68;
const BODY_FONT_SIZE: f32 = 14.0;
const TITLE_FONT_SIZE: f32 = 26.0;

pub struct PdfExporter;

impl PdfExporter {
    fn page_content(surface: &PageSurface) -> Content {
        let image = &surface.image;
        let avail_width = PAGE_WIDTH - 2.0 * MARGIN;
        let scale = (avail_width / image.width as f32).min(MAX_IMAGE_HEIGHT / image.height as f32);
        let draw_w = image.width as f32 * scale;
        let draw_h = image.height as f32 * scale;
        let x = (PAGE_WIDTH - draw_w) / 2.0;
        let y = PAGE_HEIGHT - MARGIN - draw_h;

        let (font, size) = if surface.is_cover {
            ("F2", TITLE_FONT_SIZE)
        } else {
            ("F1", BODY_FONT_SIZE)
        };
        let leading = size * 1.3;

        let mut operations = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![draw_w.into(), 0.into(), 0.into(), draw_h.into(), x.into(), y.into()],
            ),
            Operation::new("Do", vec!["Im1".into()]),
            Operation::new("Q", vec![]),
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.into(), size.into()]),
            Operation::new("TL", vec![leading.into()]),
            Operation::new("Td", vec![MARGIN.into(), (y - MARGIN - size).into()]),
        ];
        for line in wrap_text(&surface.caption, max_chars_per_line(avail_width, size)) {
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(to_win_ansi(&line), StringFormat::Literal)],
            ));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        Content { operations }
    }
}

impl DocumentExporter for PdfExporter {
    fn extension(&self) -> &'static str {
        "pdf"
    }

    fn assemble(&self, title: &str, surfaces: &[PageSurface]) -> Result<Vec<u8>> {
        if surfaces.is_empty() {
            return Err(anyhow!("No pages to export"));
        }

        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let body_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let title_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut kids: Vec<Object> = Vec::with_capacity(surfaces.len());
        for surface in surfaces {
            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => surface.image.width as i64,
                    "Height" => surface.image.height as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                surface.image.data.clone(),
            ));
            let content = Self::page_content(surface)
                .encode()
                .context("Failed to encode page content")?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => body_font_id, "F2" => title_font_id },
                    "XObject" => dictionary! { "Im1" => image_id },
                },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }
            .into(),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::String(to_win_ansi(title), StringFormat::Literal),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).context("Failed to write PDF")?;
        Ok(buffer)
    }
}

/// Outcome of an export: where the file went and which pages made it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: String,
    pub page_numbers: Vec<u32>,
    pub skipped_pages: Vec<u32>,
}

/// Every character outside `[A-Za-z0-9]` becomes `_`, then lower-case.
pub fn safe_file_stem(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

pub fn export_file_name(title: &str, extension: &str) -> String {
    format!("{}_storybook.{}", safe_file_stem(title), extension)
}

/// Captures every page in book order and saves the assembled document.
///
/// A page whose capture fails is logged and left out; the remaining pages keep
/// their relative order.
pub async fn export_book(
    book: &Book,
    capture: &dyn PageCapture,
    exporter: &dyn DocumentExporter,
    storage: &dyn Storage,
    output_folder: &str,
) -> Result<ExportReport> {
    let mut surfaces = Vec::with_capacity(book.pages.len());
    let mut skipped_pages = Vec::new();

    for (i, page) in book.pages.iter().enumerate() {
        match capture.capture(page) {
            Ok(surface) => surfaces.push(surface),
            Err(e) => {
                warn!("Error capturing page {} for export: {:#}", i + 1, e);
                skipped_pages.push(page.page_number);
            }
        }
    }

    let bytes = exporter.assemble(&book.title, &surfaces)?;
    let file_name = export_file_name(&book.title, exporter.extension());
    let path = Path::new(output_folder).join(file_name);
    let path_str = path.to_string_lossy().to_string();
    storage.write(&path_str, &bytes).await?;

    info!("Exported {} pages to {}", surfaces.len(), path_str);
    Ok(ExportReport {
        path: path_str,
        page_numbers: surfaces.iter().map(|s| s.page_number).collect(),
        skipped_pages,
    })
}

fn max_chars_per_line(width: f32, font_size: f32) -> usize {
    // Helvetica averages a little over half an em per character.
    ((width / (font_size * 0.52)) as usize).max(1)
}

fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let needed = if line.is_empty() { word.chars().count() } else { line.chars().count() + 1 + word.chars().count() };
        if needed > max_chars && !line.is_empty() {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Latin-1 subset of WinAnsi; anything else becomes `?`. The C1 range is
/// excluded since WinAnsi puts other glyphs at those bytes.
fn to_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => b'\'',
            '\u{201C}' | '\u{201D}' => b'"',
            c if (c as u32) < 0x80 || (0xA0..0x100).contains(&(c as u32)) => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::utils::image::sample_data_uri;

    fn book() -> Book {
        let image_ref = sample_data_uri();
        Book {
            title: "Felix & the Glowing Acorn!".to_string(),
            pages: (0..=10)
                .map(|n| BookPage {
                    page_number: n,
                    text: if n == 0 { "Felix & the Glowing Acorn!".to_string() } else { format!("Story page {} text", n) },
                    image_ref: image_ref.clone(),
                    is_cover: n == 0,
                })
                .collect(),
        }
    }

    fn page_texts(doc: &Document) -> Vec<String> {
        doc.get_pages()
            .values()
            .map(|id| String::from_utf8_lossy(&doc.get_page_content(*id).unwrap()).to_string())
            .collect()
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_stem("Felix & the Glowing Acorn!"), "felix___the_glowing_acorn_");
        assert_eq!(export_file_name("Hello World", "pdf"), "hello_world_storybook.pdf");
        assert_eq!(safe_file_stem("Café"), "caf_");
    }

    #[test]
    fn test_wrap_text() {
        assert_eq!(wrap_text("one two three four", 9), vec!["one two", "three", "four"]);
        assert_eq!(wrap_text("supercalifragilistic", 5), vec!["supercalifragilistic"]);
        assert!(wrap_text("   ", 10).is_empty());
    }

    #[test]
    fn test_win_ansi_fallback() {
        assert_eq!(to_win_ansi("a\u{2019}b é 狐"), b"a'b \xe9 ?".to_vec());
    }

    #[test]
    fn test_win_ansi_replaces_c1_controls() {
        assert_eq!(to_win_ansi("\u{80}\u{85}\u{9F}\u{A0}\u{FF}"), b"???\xa0\xff".to_vec());
    }

    #[tokio::test]
    async fn test_export_writes_one_pdf_page_per_book_page() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().to_str().unwrap();
        let book = book();

        let report = export_book(&book, &ImagePageCapture::new(), &PdfExporter, &NativeStorage::new(), output).await?;

        assert!(report.path.ends_with("felix___the_glowing_acorn__storybook.pdf"));
        assert_eq!(report.page_numbers, (0..=10).collect::<Vec<_>>());
        assert!(report.skipped_pages.is_empty());

        let doc = Document::load(&report.path)?;
        assert_eq!(doc.get_pages().len(), 11);
        let texts = page_texts(&doc);
        assert!(texts[0].contains("Felix & the Glowing Acorn!"));
        for n in 1..=10 {
            assert!(texts[n].contains(&format!("Story page {} text", n)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_capture_is_skipped_and_order_kept() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().to_str().unwrap();
        let mut book = book();
        book.pages[5].image_ref = "not-an-image".to_string();

        let report = export_book(&book, &ImagePageCapture::new(), &PdfExporter, &NativeStorage::new(), output).await?;

        assert_eq!(report.skipped_pages, vec![5]);
        assert_eq!(report.page_numbers, vec![0, 1, 2, 3, 4, 6, 7, 8, 9, 10]);

        let doc = Document::load(&report.path)?;
        let texts = page_texts(&doc);
        assert_eq!(texts.len(), 10);
        let expected = [1, 2, 3, 4, 6, 7, 8, 9, 10];
        for (text, n) in texts[1..].iter().zip(expected) {
            assert!(text.contains(&format!("Story page {} text", n)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_export_with_no_capturable_pages_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().to_str().unwrap();
        let mut book = book();
        for page in &mut book.pages {
            page.image_ref = String::new();
        }

        let result = export_book(&book, &ImagePageCapture::new(), &PdfExporter, &NativeStorage::new(), output).await;

        assert!(result.is_err());
        Ok(())
    }
}
