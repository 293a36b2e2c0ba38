//! Preview image retrieval. Every failure is swallowed: the caller shows a
//! placeholder instead.

use std::io::Read;
use std::time::Duration;

use image::{DynamicImage, ImageFormat};
use tracing::debug;

pub const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_THUMBNAIL_BYTES: u64 = 8 * 1024 * 1024;

/// A decoded preview plus the original bytes, so it can be re-served as-is.
#[derive(Clone, Debug)]
pub struct Thumbnail {
    pub image: DynamicImage,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl Thumbnail {
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

/// Single GET with a short timeout; `None` on transport errors, non-200
/// statuses and undecodable bodies.
pub fn fetch_thumbnail(url: &str) -> Option<Thumbnail> {
    let agent = ureq::AgentBuilder::new().timeout(THUMBNAIL_TIMEOUT).build();
    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(err) => {
            debug!(url, "thumbnail request failed: {err}");
            return None;
        }
    };
    if response.status() != 200 {
        debug!(url, status = response.status(), "thumbnail not served");
        return None;
    }

    let mut bytes = Vec::new();
    if let Err(err) = response
        .into_reader()
        .take(MAX_THUMBNAIL_BYTES)
        .read_to_end(&mut bytes)
    {
        debug!(url, "reading thumbnail body failed: {err}");
        return None;
    }
    decode_thumbnail(bytes)
}

pub fn decode_thumbnail(bytes: Vec<u8>) -> Option<Thumbnail> {
    let format = image::guess_format(&bytes).ok()?;
    match image::load_from_memory_with_format(&bytes, format) {
        Ok(image) => Some(Thumbnail {
            image,
            format,
            bytes,
        }),
        Err(err) => {
            debug!("thumbnail decode failed: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 3, Rgb([200, 10, 10])));
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn decodes_png_bodies() {
        let thumb = decode_thumbnail(png_bytes()).unwrap();
        assert_eq!(thumb.dimensions(), (4, 3));
        assert_eq!(thumb.mime_type(), "image/png");
    }

    #[test]
    fn garbage_is_not_an_image() {
        assert!(decode_thumbnail(b"<html>nope</html>".to_vec()).is_none());
        assert!(decode_thumbnail(Vec::new()).is_none());
    }

    #[test]
    fn fetch_returns_decoded_image() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/vi/abc/hq.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(png_bytes())
            .create();

        let thumb = fetch_thumbnail(&format!("{}/vi/abc/hq.png", server.url())).unwrap();
        assert_eq!(thumb.dimensions(), (4, 3));
        mock.assert();
    }

    #[test]
    fn fetch_tolerates_http_errors() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/gone.jpg").with_status(404).create();
        server
            .mock("GET", "/moved.jpg")
            .with_status(204)
            .create();
        assert!(fetch_thumbnail(&format!("{}/gone.jpg", server.url())).is_none());
        assert!(fetch_thumbnail(&format!("{}/moved.jpg", server.url())).is_none());
    }

    #[test]
    fn fetch_tolerates_undecodable_bodies() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/broken.jpg")
            .with_status(200)
            .with_body("definitely not a jpeg")
            .create();
        assert!(fetch_thumbnail(&format!("{}/broken.jpg", server.url())).is_none());
    }

    #[test]
    fn fetch_tolerates_bad_urls() {
        assert!(fetch_thumbnail("not a url").is_none());
        assert!(fetch_thumbnail("http://127.0.0.1:1/thumb.jpg").is_none());
    }
}
