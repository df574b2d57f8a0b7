//! In-process PDF inspection and creation, using `lopdf`.

use std::{fs, io::Cursor};

use image::{DynamicImage, ImageFormat};
use lopdf::{
    Document, Object, Stream,
    content::{Content, Operation},
    dictionary,
};

use crate::prelude::*;

/// Number of pages in a PDF, according to its page tree.
pub fn page_count(path: &Path) -> Result<usize> {
    let doc = Document::load(path)
        .with_context(|| format!("cannot parse PDF {:?}", path.display()))?;
    Ok(doc.get_pages().len())
}

/// Does this file exist, parse as a PDF, and have at least one page?
pub fn is_valid_pdf(path: &Path) -> bool {
    if !path.exists() {
        debug!(path = %path.display(), "PDF file does not exist");
        return false;
    }
    match page_count(path) {
        Ok(0) => {
            debug!(path = %path.display(), "PDF has no pages");
            false
        }
        Ok(pages) => {
            debug!(path = %path.display(), pages, "PDF validation successful");
            true
        }
        Err(err) => {
            debug!(path = %path.display(), "PDF validation failed: {:?}", err);
            false
        }
    }
}

/// Extract the text of the first `max_pages` pages, one string per page.
///
/// A page whose text can't be decoded yields an empty string rather than an
/// error, so one odd page doesn't hide text on the others.
pub fn page_texts(path: &Path, max_pages: usize) -> Result<Vec<String>> {
    let doc = Document::load(path)
        .with_context(|| format!("cannot parse PDF {:?}", path.display()))?;
    let texts = doc
        .get_pages()
        .keys()
        .take(max_pages)
        .map(|&page_number| match doc.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(err) => {
                debug!(page_number, "cannot extract page text: {}", err);
                String::new()
            }
        })
        .collect();
    Ok(texts)
}

/// Does the raw file contain a `/Text` marker? This is a crude check, but it
/// catches files that `lopdf` and `pdftotext` both choke on.
pub fn contains_text_marker(bytes: &[u8]) -> bool {
    const NEEDLE: &[u8] = b"/Text";
    bytes.windows(NEEDLE.len()).any(|window| window == NEEDLE)
}

/// Convert a JPEG or PNG image into a single-page PDF, one PDF point per
/// pixel.
#[instrument(level = "debug", skip_all, fields(image = %image_path.display()))]
pub fn image_to_pdf(image_path: &Path, pdf_path: &Path) -> Result<()> {
    let image = image::open(image_path)
        .with_context(|| format!("cannot decode image {:?}", image_path.display()))?;
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let (width, height) = (i64::from(rgb.width()), i64::from(rgb.height()));
    let mut jpeg = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .with_context(|| format!("cannot encode {:?} as JPEG", image_path.display()))?;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(width),
                "Height" => Object::Integer(height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            jpeg,
        )
        .with_compression(false),
    );
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(height),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().context("cannot encode page content")?,
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(width),
            Object::Integer(height),
        ],
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => Object::Integer(1),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(pdf_path)
        .with_context(|| format!("cannot write PDF {:?}", pdf_path.display()))?;
    Ok(())
}

/// Read a whole file, for the raw marker scan.
pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("cannot read {:?}", path.display()))
}
