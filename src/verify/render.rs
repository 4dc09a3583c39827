//! PDF artifact rendering.
//!
//! The approved result page is reflowed for print (media emulation plus an
//! enlarged, A4-proportioned viewport), captured as a full-page raster, and
//! embedded into a single-page A4 PDF, scaled to fit inside a fixed margin
//! while preserving aspect ratio. The output buffer is never empty — an
//! empty capture or document is a `RenderFailure`, not a result.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tracing::info;

use super::error::VerifyError;
use crate::core::config::PortalConfig;
use crate::portal::PortalTab;

// A4 in PDF points.
const PAGE_WIDTH: f32 = 595.28;
const PAGE_HEIGHT: f32 = 841.89;
const PAGE_MARGIN: f32 = 24.0;

/// Style overrides applied before capture: plain white page, no shadows or
/// stray margins around the result container.
const PRINT_STYLE_JS: &str = r#"(() => {
    document.documentElement.style.background = '#ffffff';
    document.body.style.background = '#ffffff';
    const containers = document.querySelectorAll('.card, .panel, .container, body > div');
    containers.forEach(el => {
        el.style.boxShadow = 'none';
        el.style.margin = '0';
    });
    return containers.length;
})()"#;

/// Scale `(w, h)` to fit inside `(avail_w, avail_h)` preserving aspect
/// ratio. Never upscales beyond the available box.
fn fit_within(w: f32, h: f32, avail_w: f32, avail_h: f32) -> (f32, f32) {
    let scale = (avail_w / w).min(avail_h / h);
    (w * scale, h * scale)
}

/// Build a single-page A4 PDF around one raster capture.
fn compose_pdf(png: &[u8], jpeg_quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(png).context("capture is not a decodable image")?;
    let rgb = img.to_rgb8();
    let (px_w, px_h) = rgb.dimensions();
    if px_w == 0 || px_h == 0 {
        return Err(anyhow!("capture has zero pixel dimensions"));
    }

    // JPEG keeps the embedded stream an order of magnitude smaller than raw
    // pixels at no visible cost for a scanned-document-style page.
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality)
        .write_image(rgb.as_raw(), px_w, px_h, ExtendedColorType::Rgb8)
        .context("jpeg transcode failed")?;

    let (draw_w, draw_h) = fit_within(
        px_w as f32,
        px_h as f32,
        PAGE_WIDTH - 2.0 * PAGE_MARGIN,
        PAGE_HEIGHT - 2.0 * PAGE_MARGIN,
    );
    let tx = (PAGE_WIDTH - draw_w) / 2.0;
    let ty = (PAGE_HEIGHT - draw_h) / 2.0;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => px_w as i64,
            "Height" => px_h as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    ));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(draw_w),
                    Object::Real(0.0),
                    Object::Real(0.0),
                    Object::Real(draw_h),
                    Object::Real(tx),
                    Object::Real(ty),
                ],
            ),
            Operation::new("Do", vec!["Im0".into()]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().context("content stream encode failed")?,
    ));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![
            Object::Real(0.0),
            Object::Real(0.0),
            Object::Real(PAGE_WIDTH),
            Object::Real(PAGE_HEIGHT),
        ],
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).context("pdf serialization failed")?;
    Ok(out)
}

/// Render the approved result tab into the final PDF artifact.
pub async fn render(tab: &dyn PortalTab, cfg: &PortalConfig) -> Result<Vec<u8>, VerifyError> {
    let print = &cfg.print;
    tab.emulate_print(
        print.viewport_width,
        print.viewport_height,
        print.device_scale_factor,
    )
    .await?;
    tab.eval(PRINT_STYLE_JS).await?;

    let png = tab.capture_full_page().await?;
    if png.is_empty() {
        return Err(VerifyError::RenderFailure);
    }

    let pdf = compose_pdf(&png, print.jpeg_quality)?;
    if pdf.is_empty() {
        return Err(VerifyError::RenderFailure);
    }

    info!("render: produced {} byte pdf", pdf.len());
    Ok(pdf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn sample_png(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Vec::new();
        image::codecs::png::PngEncoder::new(&mut out)
            .write_image(img.as_raw(), w, h, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    #[test]
    fn fit_preserves_aspect_ratio() {
        // Tall portrait capture constrained by height.
        let (w, h) = fit_within(1000.0, 4000.0, 547.0, 794.0);
        assert!((w / h - 0.25).abs() < 1e-4);
        assert!(h <= 794.0 + 1e-3);

        // Wide capture constrained by width.
        let (w, h) = fit_within(4000.0, 1000.0, 547.0, 794.0);
        assert!((w / h - 4.0).abs() < 1e-4);
        assert!(w <= 547.0 + 1e-3);
    }

    #[test]
    fn composed_pdf_is_a_nonempty_single_page_document() {
        let pdf = compose_pdf(&sample_png(64, 128), 85).unwrap();
        assert!(!pdf.is_empty());
        assert!(pdf.starts_with(b"%PDF-1.5"));

        // Re-parse and check the page tree.
        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn garbage_capture_is_rejected() {
        assert!(compose_pdf(b"not a png at all", 85).is_err());
    }

    struct CaptureTab {
        png: Vec<u8>,
    }

    #[async_trait]
    impl PortalTab for CaptureTab {
        async fn navigate(&self, _url: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn wait_for_quiescence(&self, _q: Duration, _t: Duration) -> anyhow::Result<()> {
            Ok(())
        }
        async fn eval(&self, _script: &str) -> anyhow::Result<Value> {
            Ok(json!(3))
        }
        async fn capture_element(&self, _selector: &str) -> anyhow::Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn capture_full_page(&self) -> anyhow::Result<Vec<u8>> {
            Ok(self.png.clone())
        }
        async fn emulate_print(&self, _w: u32, _h: u32, _s: f64) -> anyhow::Result<()> {
            Ok(())
        }
        async fn current_url(&self) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_capture_is_a_render_failure() {
        let tab = CaptureTab { png: vec![] };
        let err = render(&tab, &PortalConfig::default()).await.unwrap_err();
        assert!(matches!(err, VerifyError::RenderFailure));
    }

    #[tokio::test]
    async fn full_render_produces_pdf_bytes() {
        let tab = CaptureTab {
            png: sample_png(32, 48),
        };
        let pdf = render(&tab, &PortalConfig::default()).await.unwrap();
        assert!(pdf.len() > 0);
        assert!(pdf.starts_with(b"%PDF"));
    }
}
